mod actuator;
mod command;
mod config;
mod db;
mod detect;
mod dispatch;
mod error;
mod frames;
mod ocr;
mod pipeline;
mod preprocess;
#[cfg(test)]
mod testing;
mod types;
mod vision;
mod webhook;

use crate::actuator::HttpActuator;
use crate::config::Config;
use crate::db::Database;
use crate::detect::CommandDetector;
use crate::dispatch::Dispatcher;
use crate::ocr::{CommandTextEngine, LocalOcr};
use crate::pipeline::Recognizer;
use crate::vision::GeminiVision;
use crate::webhook::Lane;
use env_logger::Env;
use log::{error, info};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting plate-gate");

    let (lane, port) = match build() {
        Ok(built) => built,
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };
    webhook::run(Arc::new(lane), port).await;
    info!("Exiting main");
}

fn build() -> error::Result<(Lane, u16)> {
    let config = Config::from_env()?;

    let recognizer = Recognizer::new(
        Box::new(CommandDetector::new(
            config.detector_command.clone(),
            config.command_timeout,
        )),
        LocalOcr::new(
            Box::new(CommandTextEngine::new(
                config.ocr_command.clone(),
                config.command_timeout,
            )),
            config.min_ocr_confidence,
        ),
        Box::new(GeminiVision::new(
            &config.vision_endpoint,
            &config.vision_api_key,
            config.vision_timeout,
        )?),
        config.min_detection_confidence,
    )
    .archive_crops(config.crops_dir.clone());

    let db = Arc::new(Database::open(&config.registry_path)?);
    info!("Opened plate registry at {:?}", config.registry_path);
    let dispatcher = Dispatcher::new(
        db.clone(),
        db,
        Arc::new(HttpActuator::new(
            &config.actuator_base_url,
            config.actuator_timeout,
        )?),
        &config.registration_base_url,
        config.dwell,
    )?;

    Ok((
        Lane::new(recognizer, dispatcher, config.frame_skip),
        config.listen_port,
    ))
}
