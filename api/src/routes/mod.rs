pub mod health_route;
pub mod reviews_route;
pub mod status_route;
pub mod webhook_route;
