use crate::error::Result;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An uploaded frame: the encoded bytes as received plus the decoded image.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub image: DynamicImage,
}

impl SourceImage {
    pub fn decode(bytes: Vec<u8>) -> Result<SourceImage> {
        let format = image::guess_format(&bytes)?;
        let image = image::load_from_memory_with_format(&bytes, format)?;
        Ok(SourceImage {
            mime_type: format.to_mime_type().to_string(),
            bytes,
            image,
        })
    }
}

/// Pixel-space box reported by the plate detector.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BoundingBox {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn is_well_formed(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    LocalRaw,
    LocalPreprocessed,
    CloudVision,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlateCandidate {
    pub text: String,
    pub confidence: Option<f32>,
    pub source: CandidateSource,
}

/// Uppercased plate text with all whitespace removed. The only form that
/// is compared, stored or displayed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NormalizedPlate(String);

impl NormalizedPlate {
    pub fn new(raw: &str) -> Self {
        NormalizedPlate(
            raw.chars()
                .filter(|c| !c.is_whitespace())
                .flat_map(char::to_uppercase)
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NormalizedPlate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionResult {
    Recognized(NormalizedPlate),
    NotRecognized,
}

impl RecognitionResult {
    pub fn plate(&self) -> Option<&NormalizedPlate> {
        match self {
            RecognitionResult::Recognized(plate) => Some(plate),
            RecognitionResult::NotRecognized => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    Allow,
    Register,
    Deny,
}
