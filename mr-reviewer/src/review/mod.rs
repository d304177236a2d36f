//! Review-time fan-out (C5). `chunk_processor` is the only submodule: it
//! owns the concurrency-bounded dispatch of `DiffChunk`s to the LLM client.

pub mod chunk_processor;

pub use chunk_processor::{ChunkProcessingStats, ChunkProcessor};
