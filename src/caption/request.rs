//! Wire types for Ollama's `/api/generate` endpoint.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::{CaptionError, Result};

pub const DEFAULT_MODEL: &str = "gemma3:4b";

/// Phrase the model is asked to answer with when it cannot caption the image.
pub const UNSURE_PHRASE: &str = "I am not sure about the caption";

pub const DEFAULT_PROMPT: &str = "Give me an instagram caption for this image under 100 words. \
Make sure to give me just the caption and no other text. \
Try to provide best 3 captions in a list format. \
If you are not sure about the caption, just say \"I am not sure about the caption\" and do not provide any other text. \
Also include hashtags if relevant.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMode {
    #[default]
    Buffered,
    Streaming,
}

impl RequestMode {
    pub fn is_streaming(self) -> bool {
        self == RequestMode::Streaming
    }
}

impl fmt::Display for RequestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestMode::Buffered => write!(f, "buffered"),
            RequestMode::Streaming => write!(f, "streaming"),
        }
    }
}

impl FromStr for RequestMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buffered" | "batch" => Ok(RequestMode::Buffered),
            "streaming" | "stream" => Ok(RequestMode::Streaming),
            other => Err(format!(
                "Unknown mode '{}'. Expected 'buffered' or 'streaming'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    /// Base64 without a data-URL prefix. Always exactly one entry.
    pub images: Vec<String>,
    pub stream: bool,
}

impl GenerateRequest {
    pub fn new(model: &str, prompt: &str, image_b64: String, mode: RequestMode) -> Self {
        Self {
            model: model.to_string(),
            prompt: prompt.to_string(),
            images: vec![image_b64],
            stream: mode.is_streaming(),
        }
    }
}

/// Body of a non-streaming generate call. Only `response` is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub done: Option<bool>,
}

impl GenerateResponse {
    pub fn into_caption(self) -> Result<String> {
        self.response.ok_or(CaptionError::MissingField("response"))
    }
}

/// One NDJSON line of a streaming generate call.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenerationFragment {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    /// Nanoseconds, as reported on the final fragment.
    #[serde(default)]
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
}

impl GenerationFragment {
    /// The text token carried by this fragment, if any.
    pub fn token(&self) -> Option<&str> {
        self.response.as_deref().filter(|t| !t.is_empty())
    }
}
