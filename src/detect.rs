use crate::command;
use crate::error::Result;
use crate::types::BoundingBox;
use async_trait::async_trait;
use image::DynamicImage;
use log::{debug, warn};
use std::time::Duration;

/// A plate detection model: image in, candidate boxes out.
#[async_trait]
pub trait PlateDetector: Send + Sync {
    async fn boxes(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>>;
}

/// Runs an external detector that prints a JSON array of
/// `{x1, y1, x2, y2, confidence}` objects.
pub struct CommandDetector {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandDetector {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        CommandDetector { argv, timeout }
    }
}

#[async_trait]
impl PlateDetector for CommandDetector {
    async fn boxes(&self, image: &DynamicImage) -> Result<Vec<BoundingBox>> {
        command::run_json(&self.argv, image, self.timeout).await
    }
}

/// Never fails: detector errors and malformed boxes become an empty result.
pub async fn detect(detector: &dyn PlateDetector, image: &DynamicImage) -> Vec<BoundingBox> {
    match detector.boxes(image).await {
        Ok(boxes) => {
            let (good, bad): (Vec<_>, Vec<_>) =
                boxes.into_iter().partition(BoundingBox::is_well_formed);
            if !bad.is_empty() {
                warn!("Dropping {} malformed boxes: {:?}", bad.len(), bad);
            }
            debug!("Detector returned {} boxes", good.len());
            good
        }
        Err(e) => {
            warn!("Plate detector failed: {}", e);
            vec![]
        }
    }
}

/// Highest confidence box at or above `min_confidence`; the first one wins
/// ties.
pub fn best_box(boxes: &[BoundingBox], min_confidence: f32) -> Option<BoundingBox> {
    boxes
        .iter()
        .filter(|b| b.confidence >= min_confidence)
        .fold(None, |best: Option<&BoundingBox>, b| match best {
            Some(current) if current.confidence >= b.confidence => Some(current),
            _ => Some(b),
        })
        .copied()
}

/// Crops `image` to `bbox`, clamped to the image bounds. None when nothing
/// of the box lies inside the image.
pub fn crop(image: &DynamicImage, bbox: &BoundingBox) -> Option<DynamicImage> {
    let (width, height) = (image.width() as i64, image.height() as i64);
    let x1 = bbox.x1.clamp(0, width);
    let y1 = bbox.y1.clamp(0, height);
    let x2 = bbox.x2.clamp(0, width);
    let y2 = bbox.y2.clamp(0, height);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(image.crop_imm(x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
}
