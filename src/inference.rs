//! Inference service client
//!
//! HTTP client for the Gemini text-completion API, behind the [`Inference`]
//! trait so the analyzer can be tested against scripted replies.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::InferenceConfig;

const API_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Black-box text-completion endpoint.
///
/// One call per decision cycle; any error is recoverable and turns into a
/// fallback signal upstream.
#[async_trait]
pub trait Inference: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Gemini `generateContent` client
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("Inference API key not set (config or GEMINI_API_KEY)")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(GeminiClient {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config
                .endpoint
                .clone()
                .unwrap_or_else(|| API_BASE_URL.to_string()),
        })
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl Inference for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Inference request failed")?
            .error_for_status()
            .context("Inference API returned error status")?;

        let body: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse inference response")?;

        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .context("Inference response contained no candidates")?;

        Ok(text)
    }
}

/// Stand-in used when no API key is configured. Every call fails, so every
/// cycle runs on the analyzer's deterministic fallback signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineInference;

#[async_trait]
impl Inference for OfflineInference {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        anyhow::bail!("inference disabled: no API key configured")
    }
}
