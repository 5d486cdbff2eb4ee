//! Match Scoring Client — the single point of entry for candidate-to-job
//! scoring calls.
//!
//! ARCHITECTURAL RULE: no other module may call the scoring backend
//! directly. The orchestrator sees only the `MatchScorer` trait, so the
//! backend can be swapped (or scripted in tests) without touching its
//! control flow.
//!
//! The production backend is the Anthropic Messages API. It is slow
//! (hundreds of milliseconds), rate-limited, and fallible; every failure
//! is mapped to one of two outcomes the orchestrator knows how to absorb.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::matching::prompts::{build_score_prompt, SCORING_SYSTEM};
use crate::models::candidate::CandidateProfileRow;
use crate::models::job::JobPostingRow;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Intentionally hardcoded to prevent accidental drift between scoring runs.
pub const MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 1024;
const MAX_RETRIES: u32 = 3;

/// One scoring result: an integer fit score plus the recruiter-facing
/// explanation. Validated by the cache before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchScore {
    pub score: i32,
    pub strengths: Vec<String>,
    pub gaps: Vec<String>,
}

/// Per-candidate scoring failure. Non-fatal to a batch run: the
/// orchestrator logs, counts, and moves on.
#[derive(Debug, Error)]
pub enum ScoringError {
    /// The backend could not be reached, rate-limited us past the retry
    /// budget, or answered with a server error.
    #[error("scoring backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered, but not with the JSON contract we asked for.
    #[error("scoring backend returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Scores one candidate against one job's requirements.
#[async_trait]
pub trait MatchScorer: Send + Sync {
    async fn score_match(
        &self,
        job: &JobPostingRow,
        candidate: &CandidateProfileRow,
    ) -> Result<MatchScore, ScoringError>;
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

impl AnthropicResponse {
    fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

/// The production scorer: one Claude call per (job, candidate) pair,
/// strict JSON out, bounded retries on 429/5xx with exponential backoff.
pub struct ClaudeMatchScorer {
    client: Client,
    api_key: String,
}

impl ClaudeMatchScorer {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
        }
    }

    async fn call_backend(&self, prompt: &str) -> Result<String, ScoringError> {
        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system: SCORING_SYSTEM,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut last_error: Option<ScoringError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 500ms, 1s
                let delay = std::time::Duration::from_millis(500 * (1 << (attempt - 1)));
                warn!(
                    "scoring call attempt {} failed, retrying after {}ms",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(ScoringError::Unavailable(e.to_string()));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("scoring backend returned {status}: {body}");
                last_error = Some(ScoringError::Unavailable(format!("status {status}: {body}")));
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ScoringError::Unavailable(format!(
                    "status {status}: {body}"
                )));
            }

            let parsed: AnthropicResponse = response
                .json()
                .await
                .map_err(|e| ScoringError::InvalidResponse(e.to_string()))?;

            return parsed
                .text()
                .map(str::to_string)
                .ok_or_else(|| ScoringError::InvalidResponse("empty content".to_string()));
        }

        Err(last_error
            .unwrap_or_else(|| ScoringError::Unavailable("retry budget exhausted".to_string())))
    }
}

#[async_trait]
impl MatchScorer for ClaudeMatchScorer {
    async fn score_match(
        &self,
        job: &JobPostingRow,
        candidate: &CandidateProfileRow,
    ) -> Result<MatchScore, ScoringError> {
        let prompt = build_score_prompt(job, candidate);
        let text = self.call_backend(&prompt).await?;
        let result = parse_score_payload(&text)?;

        debug!(
            job = %job.id,
            candidate = %candidate.id,
            score = result.score,
            "scored candidate"
        );
        Ok(result)
    }
}

/// Parses the model's reply into a `MatchScore`. The prompt demands bare
/// JSON, but models sometimes wrap it in code fences anyway.
fn parse_score_payload(text: &str) -> Result<MatchScore, ScoringError> {
    let text = strip_json_fences(text);
    serde_json::from_str(text).map_err(|e| ScoringError::InvalidResponse(e.to_string()))
}

/// Strips ```json ... ``` or ``` ... ``` code fences from model output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
