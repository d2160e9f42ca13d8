use crate::error::{Error, Result};
use crate::types::{CandidateSource, PlateCandidate, SourceImage};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::time::Duration;

/// Phrase the model is told to answer with when no plate can be read.
pub const UNREADABLE_SENTINEL: &str = "PLACA NO LEGIBLE";

const PROMPT: &str = "Analyze this picture of a vehicle. Find the license plate \
and reply with only the exact alphanumeric text printed on it. If there is no \
visible plate or its text cannot be read clearly, reply with the phrase \
'PLACA NO LEGIBLE'.";

/// Detection and OCR in one remote call on the whole, uncropped image.
#[async_trait]
pub trait CloudVision: Send + Sync {
    async fn read_plate(&self, image: &SourceImage) -> Option<PlateCandidate>;
}

pub struct GeminiVision {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GeminiVision {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(GeminiVision {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn request(&self, image: &SourceImage) -> Result<Option<String>> {
        let payload = json!({
            "contents": [{
                "parts": [
                    { "text": PROMPT },
                    {
                        "inline_data": {
                            "mime_type": image.mime_type,
                            "data": STANDARD.encode(&image.bytes),
                        }
                    }
                ]
            }],
            "generationConfig": {
                "temperature": 0.1,
                "maxOutputTokens": 50
            }
        });
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", &self.api_key)])
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::VisionUnavailable(format!("HTTP {}: {}", status, body)));
        }
        let data: Value = serde_json::from_slice(&response.bytes().await?)?;
        extract_plate(&data)
    }
}

#[async_trait]
impl CloudVision for GeminiVision {
    async fn read_plate(&self, image: &SourceImage) -> Option<PlateCandidate> {
        match self.request(image).await {
            Ok(Some(text)) => {
                info!("Cloud vision read {:?}", text);
                Some(PlateCandidate {
                    text,
                    confidence: None,
                    source: CandidateSource::CloudVision,
                })
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Cloud vision unavailable: {}", e);
                None
            }
        }
    }
}

/// Pulls the reply text out of a `generateContent` response. `Ok(None)` means
/// the model answered but there is no legible plate.
fn extract_plate(data: &Value) -> Result<Option<String>> {
    if let Some(reason) = data["promptFeedback"]["blockReason"].as_str() {
        warn!("Cloud vision blocked the request: {}", reason);
        return Ok(None);
    }
    let text = data["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .ok_or_else(|| Error::VisionUnavailable(format!("unexpected response shape: {}", data)))?;
    Ok(interpret_reply(text))
}

fn interpret_reply(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        debug!("Cloud vision returned empty text");
        return None;
    }
    if text.to_uppercase().contains(UNREADABLE_SENTINEL) {
        info!("Cloud vision reports no legible plate");
        return None;
    }
    Some(text.to_string())
}
