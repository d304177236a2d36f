//! LLMClient (C2): chat-completion transport, JSON-critique parsing with a
//! raw-text fallback, and cumulative token-usage tracking.

use std::sync::Mutex;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;
use crate::errors::{LlmError, MrResult};
use crate::retry::retry_loop;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewType {
    General,
    Security,
    Performance,
}

impl ReviewType {
    fn system_prompt(self) -> &'static str {
        match self {
            ReviewType::General => {
                "You are a meticulous code reviewer. Point out correctness, \
                 readability, and maintainability issues in the diff below."
            }
            ReviewType::Security => {
                "You are a security-focused code reviewer. Point out \
                 vulnerabilities, unsafe input handling, and secrets exposure \
                 in the diff below."
            }
            ReviewType::Performance => {
                "You are a performance-focused code reviewer. Point out \
                 inefficient algorithms, unnecessary allocations, and blocking \
                 calls in the diff below."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CritiqueKind {
    Issue,
    Suggestion,
    Question,
    Summary,
}

impl CritiqueKind {
    fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "issue" => CritiqueKind::Issue,
            "question" => CritiqueKind::Question,
            "summary" => CritiqueKind::Summary,
            _ => CritiqueKind::Suggestion,
        }
    }
}

/// LLM output record, normalized from the model's JSON or text response.
#[derive(Debug, Clone)]
pub struct Critique {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub comment: String,
    pub kind: CritiqueKind,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct CritiqueResponse {
    pub comments: Vec<Critique>,
    pub usage: TokenUsage,
}

/// Cumulative usage across every call made by one `LlmClient` instance.
#[derive(Debug, Clone, Default)]
pub struct TokenUsageStats {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub prompt_tokens_total: u64,
    pub completion_tokens_total: u64,
}

pub struct LlmClient {
    http: Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: usize,
    retry: RetryConfig,
    stats: Mutex<TokenUsageStats>,
}

impl LlmClient {
    pub fn new(
        http: Client,
        api_url: String,
        api_key: String,
        model: String,
        temperature: f64,
        max_tokens: usize,
        retry: RetryConfig,
    ) -> Self {
        LlmClient {
            http,
            api_url,
            api_key,
            model,
            temperature,
            max_tokens,
            retry,
            stats: Mutex::new(TokenUsageStats::default()),
        }
    }

    pub fn usage_stats(&self) -> TokenUsageStats {
        self.stats.lock().expect("usage stats mutex poisoned").clone()
    }

    /// Estimates the chunk's token count before the call so an oversize
    /// chunk is rejected without round-tripping to the model: past 100% of
    /// the configured budget it is skipped with `TokenLimitError`; past 80%
    /// it is still submitted but logged at `warn`, since the response may be
    /// truncated.
    fn check_token_budget(&self, chunk_text: &str) -> MrResult<()> {
        let estimated = chunk_text.len() / 4;
        if estimated > self.max_tokens {
            tracing::warn!(
                estimated,
                budget = self.max_tokens,
                "chunk exceeds configured token budget; skipping without round-tripping"
            );
            return Err(LlmError::TokenLimit {
                estimated,
                budget: self.max_tokens,
            }
            .into());
        }
        let soft_budget = (self.max_tokens as f64 * 0.8) as usize;
        if estimated > soft_budget {
            tracing::warn!(
                estimated,
                soft_budget,
                max_tokens = self.max_tokens,
                "chunk token estimate exceeds 80% of max_tokens; response may be truncated"
            );
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, chunk_text, extra_instructions), fields(review_type = ?review_type))]
    pub async fn review_chunk(
        &self,
        chunk_text: &str,
        extra_instructions: Option<&str>,
        review_type: ReviewType,
        timeout: std::time::Duration,
    ) -> MrResult<CritiqueResponse> {
        self.check_token_budget(chunk_text)?;

        let mut system = review_type.system_prompt().to_string();
        if let Some(extra) = extra_instructions {
            system.push_str("\n\n");
            system.push_str(extra);
        }

        let req = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: system,
                },
                ChatMessage {
                    role: "user".into(),
                    content: chunk_text.to_string(),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let retry = self.retry.clone();
        let url = format!("{}/chat/completions", self.api_url.trim_end_matches('/'));
        let outcome = retry_loop(
            &retry,
            |_attempt| {
                let req = req.clone();
                async {
                    tokio::time::timeout(
                        timeout,
                        self.http
                            .post(&url)
                            .bearer_auth(&self.api_key)
                            .json(&req)
                            .send(),
                    )
                    .await
                    .map_err(|_| LlmError::Timeout)
                    .and_then(|r| r.map_err(LlmError::from))
                }
            },
            |res: &Result<reqwest::Response, LlmError>| match res {
                Ok(resp) => {
                    let code = resp.status().as_u16();
                    code == 429 || (500..=599).contains(&code)
                }
                Err(e) => e.is_retriable(),
            },
        )
        .await;

        if outcome.exhausted {
            let last = match &outcome.result {
                Ok(resp) => format!("http status {}", resp.status().as_u16()),
                Err(e) => e.to_string(),
            };
            return Err(LlmError::RetryExhausted {
                attempts: outcome.attempts,
                last,
            }
            .into());
        }

        let resp = outcome.result.map_err(Into::<crate::errors::Error>::into)?;

        let status = resp.status();
        if !status.is_success() {
            let code = status.as_u16();
            return Err(LlmError::HttpStatus {
                status: code,
                retriable: code == 429 || (500..=599).contains(&code),
            }
            .into());
        }

        let body: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let usage = TokenUsage {
            prompt_tokens: body.usage.prompt_tokens,
            completion_tokens: body.usage.completion_tokens,
            total_tokens: body.usage.total_tokens,
        };

        {
            let mut stats = self.stats.lock().expect("usage stats mutex poisoned");
            stats.total_requests += 1;
            stats.total_tokens += usage.total_tokens as u64;
            stats.prompt_tokens_total += usage.prompt_tokens as u64;
            stats.completion_tokens_total += usage.completion_tokens as u64;
        }

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let comments = parse_critiques_or_fallback(&content);

        Ok(CritiqueResponse { comments, usage })
    }
}

/// Parses `{"comments": [...]}`; on any failure, wraps the raw text as a
/// single medium-severity suggestion targeted at no specific file.
fn parse_critiques_or_fallback(content: &str) -> Vec<Critique> {
    match serde_json::from_str::<RawCritiqueEnvelope>(content) {
        Ok(envelope) => envelope.comments.into_iter().map(normalize_critique).collect(),
        Err(_) => vec![Critique {
            file: None,
            line: None,
            comment: content.to_string(),
            kind: CritiqueKind::Suggestion,
            severity: Severity::Medium,
        }],
    }
}

fn normalize_critique(raw: RawCritique) -> Critique {
    Critique {
        file: raw.file,
        line: raw.line.and_then(|l| parse_line_field(&l)),
        comment: raw.comment,
        kind: CritiqueKind::parse(&raw.r#type),
        severity: Severity::parse(&raw.severity),
    }
}

/// A `line` field may arrive as a JSON number, a numeric string, or a range
/// like `"37-49"`; normalization keeps the first integer in all cases.
fn parse_line_field(raw: &str) -> Option<u32> {
    let first_token = raw.split(|c: char| !c.is_ascii_digit()).find(|s| !s.is_empty())?;
    first_token.parse().ok()
}

#[derive(Debug, Deserialize)]
struct RawCritiqueEnvelope {
    comments: Vec<RawCritique>,
}

#[derive(Debug, Deserialize)]
struct RawCritique {
    file: Option<String>,
    #[serde(default, deserialize_with = "deserialize_line_as_string")]
    line: Option<String>,
    comment: String,
    #[serde(rename = "type", default = "default_critique_type")]
    r#type: String,
    #[serde(default = "default_severity")]
    severity: String,
}

fn default_critique_type() -> String {
    "suggestion".to_string()
}

fn default_severity() -> String {
    "medium".to_string()
}

fn deserialize_line_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum LineField {
        Int(i64),
        Str(String),
        Null,
    }
    Ok(match Option::<LineField>::deserialize(deserializer)? {
        Some(LineField::Int(n)) => Some(n.to_string()),
        Some(LineField::Str(s)) => Some(s),
        Some(LineField::Null) | None => None,
    })
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: usize,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
}

#[derive(Debug, Deserialize)]
struct ChatMessageOut {
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
    #[serde(default)]
    total_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_comments_json() {
        let content = r#"{"comments":[{"file":"a.py","line":"37-49","comment":"x","type":"issue","severity":"high"}]}"#;
        let comments = parse_critiques_or_fallback(content);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].line, Some(37));
        assert_eq!(comments[0].kind, CritiqueKind::Issue);
        assert_eq!(comments[0].severity, Severity::High);
    }

    #[test]
    fn falls_back_to_raw_text_on_parse_failure() {
        let comments = parse_critiques_or_fallback("not json at all");
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].file, None);
        assert_eq!(comments[0].severity, Severity::Medium);
        assert_eq!(comments[0].comment, "not json at all");
    }

    #[test]
    fn line_field_accepts_plain_integer() {
        assert_eq!(parse_line_field("42"), Some(42));
    }

    #[test]
    fn line_field_keeps_first_integer_of_range() {
        assert_eq!(parse_line_field("37-49"), Some(37));
    }

    fn client_with_budget(max_tokens: usize) -> LlmClient {
        LlmClient::new(
            reqwest::Client::new(),
            "https://llm.example.test".to_string(),
            "key".to_string(),
            "model".to_string(),
            0.2,
            max_tokens,
            RetryConfig::default(),
        )
    }

    #[test]
    fn oversize_chunk_is_rejected_before_round_tripping() {
        let client = client_with_budget(10);
        let chunk = "x".repeat(1000); // ~250 estimated tokens, budget is 10
        let err = client.check_token_budget(&chunk).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::Error::Llm(LlmError::TokenLimit { .. })
        ));
    }

    #[test]
    fn chunk_within_budget_is_accepted() {
        let client = client_with_budget(10_000);
        let chunk = "small chunk";
        assert!(client.check_token_budget(chunk).is_ok());
    }
}
