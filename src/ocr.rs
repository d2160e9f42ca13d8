use crate::command;
use crate::error::Result;
use crate::types::{CandidateSource, PlateCandidate};
use async_trait::async_trait;
use image::DynamicImage;
use log::{debug, warn};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextLine {
    pub text: String,
    pub confidence: f32,
}

/// A local text recognition engine: image in, every text line it read out.
#[async_trait]
pub trait TextEngine: Send + Sync {
    async fn read_lines(&self, image: &DynamicImage) -> Result<Vec<TextLine>>;
}

/// Runs an external OCR engine that prints a JSON array of
/// `{text, confidence}` objects.
pub struct CommandTextEngine {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandTextEngine {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        CommandTextEngine { argv, timeout }
    }
}

#[async_trait]
impl TextEngine for CommandTextEngine {
    async fn read_lines(&self, image: &DynamicImage) -> Result<Vec<TextLine>> {
        command::run_json(&self.argv, image, self.timeout).await
    }
}

/// Picks the single most confident line from a local engine.
pub struct LocalOcr {
    engine: Box<dyn TextEngine>,
    min_confidence: f32,
}

impl LocalOcr {
    pub fn new(engine: Box<dyn TextEngine>, min_confidence: f32) -> Self {
        LocalOcr {
            engine,
            min_confidence,
        }
    }

    pub async fn recognize(
        &self,
        image: &DynamicImage,
        source: CandidateSource,
    ) -> Option<PlateCandidate> {
        let lines = match self.engine.read_lines(image).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Local OCR ({:?}) failed: {}", source, e);
                return None;
            }
        };
        debug!("Local OCR ({:?}) read {:?}", source, lines);
        let best = lines
            .into_iter()
            .filter(|l| !l.text.trim().is_empty() && l.confidence >= self.min_confidence)
            .fold(None, |best: Option<TextLine>, line| match best {
                Some(current) if current.confidence >= line.confidence => Some(current),
                _ => Some(line),
            })?;
        Some(PlateCandidate {
            text: best.text.trim().to_string(),
            confidence: Some(best.confidence),
            source,
        })
    }
}
