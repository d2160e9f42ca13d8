use crate::command;
use crate::detect::{self, PlateDetector};
use crate::ocr::LocalOcr;
use crate::preprocess::preprocess;
use crate::types::{
    BoundingBox, CandidateSource, NormalizedPlate, PlateCandidate, RecognitionResult, SourceImage,
};
use crate::vision::CloudVision;
use image::DynamicImage;
use log::{debug, info, warn};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

const MIN_PLATE_CHARS: usize = 4;

/// Why a cycle moved on to the cloud fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    DetectionMiss,
    OcrRejected,
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::DetectionMiss => f.write_str("no plate box above threshold"),
            Fallback::OcrRejected => f.write_str("local OCR text rejected"),
        }
    }
}

/// Detection, crop, local OCR on raw and preprocessed crops, then the cloud
/// fallback on the whole frame. Each step runs at most once per cycle.
pub struct Recognizer {
    detector: Box<dyn PlateDetector>,
    ocr: LocalOcr,
    vision: Box<dyn CloudVision>,
    min_detection_confidence: f32,
    crops_dir: Option<PathBuf>,
}

impl Recognizer {
    pub fn new(
        detector: Box<dyn PlateDetector>,
        ocr: LocalOcr,
        vision: Box<dyn CloudVision>,
        min_detection_confidence: f32,
    ) -> Self {
        Recognizer {
            detector,
            ocr,
            vision,
            min_detection_confidence,
            crops_dir: None,
        }
    }

    /// Save every selected crop into `dir`.
    pub fn archive_crops(mut self, dir: Option<PathBuf>) -> Self {
        self.crops_dir = dir;
        self
    }

    pub async fn recognize(&self, source: &SourceImage) -> RecognitionResult {
        let fallback = match self.read_locally(&source.image).await {
            Ok(plate) => {
                info!("Recognized plate {} locally", plate);
                return RecognitionResult::Recognized(plate);
            }
            Err(reason) => reason,
        };
        info!("Falling back to cloud vision: {}", fallback);
        match self.vision.read_plate(source).await {
            Some(candidate) => finish(candidate),
            None => {
                info!("Plate not recognized");
                RecognitionResult::NotRecognized
            }
        }
    }

    /// Tries each image in order and stops at the first recognized plate.
    pub async fn recognize_any(&self, sources: &[&SourceImage]) -> RecognitionResult {
        for source in sources {
            if let recognized @ RecognitionResult::Recognized(_) = self.recognize(source).await {
                return recognized;
            }
        }
        RecognitionResult::NotRecognized
    }

    async fn read_locally(&self, image: &DynamicImage) -> Result<NormalizedPlate, Fallback> {
        let boxes = detect::detect(self.detector.as_ref(), image).await;
        let bbox = detect::best_box(&boxes, self.min_detection_confidence)
            .ok_or(Fallback::DetectionMiss)?;
        let crop = detect::crop(image, &bbox).ok_or(Fallback::DetectionMiss)?;
        debug!("Selected plate box {:?}", bbox);
        self.archive(&crop, &bbox);

        let raw = self.ocr.recognize(&crop, CandidateSource::LocalRaw).await;
        let processed = self
            .ocr
            .recognize(&preprocess(&crop), CandidateSource::LocalPreprocessed)
            .await;
        let text = longer_text(raw.as_ref(), processed.as_ref());
        if !is_plausible_plate(text) {
            debug!("Rejected local OCR text {:?}", text);
            return Err(Fallback::OcrRejected);
        }
        Ok(NormalizedPlate::new(text))
    }

    fn archive(&self, crop: &DynamicImage, bbox: &BoundingBox) {
        if let Some(dir) = &self.crops_dir {
            let path = dir.join(format!("{}.jpeg", Uuid::new_v4().simple()));
            match command::write_jpeg(crop, &path) {
                Ok(()) => debug!("Saved crop {:?} to {:?}", bbox, path),
                Err(e) => warn!("Error saving crop to {:?}: {}", path, e),
            }
        }
    }
}

fn finish(candidate: PlateCandidate) -> RecognitionResult {
    let plate = NormalizedPlate::new(&candidate.text);
    if plate.is_empty() {
        return RecognitionResult::NotRecognized;
    }
    info!(
        "Recognized plate {} via {:?} (confidence {:?})",
        plate, candidate.source, candidate.confidence
    );
    RecognitionResult::Recognized(plate)
}

/// The longer of the two readings; the raw crop wins ties.
fn longer_text<'a>(
    raw: Option<&'a PlateCandidate>,
    processed: Option<&'a PlateCandidate>,
) -> &'a str {
    let raw = raw.map_or("", |c| c.text.as_str());
    let processed = processed.map_or("", |c| c.text.as_str());
    if processed.chars().count() > raw.chars().count() {
        processed
    } else {
        raw
    }
}

/// Plates always mix letters and digits; anything short or digit-free is
/// treated as OCR noise.
pub fn is_plausible_plate(text: &str) -> bool {
    text.chars().count() >= MIN_PLATE_CHARS && text.chars().any(|c| c.is_ascii_digit())
}
