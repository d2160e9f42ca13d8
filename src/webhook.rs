use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::frames::FrameSampler;
use crate::pipeline::Recognizer;
use crate::types::{AccessDecision, RecognitionResult, SourceImage};
use bytes::Buf;
use futures::{pin_mut, StreamExt};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use warp::http::StatusCode;
use warp::multipart::FormData;
use warp::reply::Response;
use warp::{Filter, Reply};

const MAX_UPLOAD_BYTES: u64 = 16 * 1024 * 1024;

/// One lane: a recognizer, a dispatcher and the frame sampler for its
/// camera stream. Cycles never overlap.
pub struct Lane {
    recognizer: Recognizer,
    dispatcher: Dispatcher,
    sampler: Mutex<FrameSampler>,
    cycle: tokio::sync::Mutex<()>,
}

impl Lane {
    pub fn new(recognizer: Recognizer, dispatcher: Dispatcher, frame_skip: u32) -> Self {
        Lane {
            recognizer,
            dispatcher,
            sampler: Mutex::new(FrameSampler::new(frame_skip)),
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    async fn run_cycle(
        &self,
        sources: &[&SourceImage],
    ) -> Result<(RecognitionResult, AccessDecision)> {
        let _cycle = self.cycle.lock().await;
        let result = self.recognizer.recognize_any(sources).await;
        let decision = self.dispatcher.decide_and_act(&result).await?;
        info!("Decision {:?} for {:?}", decision, result.plate());
        Ok((result, decision))
    }

    fn take_frame(&self) -> bool {
        self.sampler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .should_process()
    }
}

pub fn routes(
    lane: Arc<Lane>,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    let upload = warp::multipart::form().max_length(MAX_UPLOAD_BYTES);
    let with_lane = warp::any().map(move || lane.clone());

    let recognize = warp::post()
        .and(warp::path!("recognize"))
        .and(upload.clone())
        .and(with_lane.clone())
        .and_then(handle_recognize);
    let entry = warp::post()
        .and(warp::path!("entry"))
        .and(upload.clone())
        .and(with_lane.clone())
        .and_then(handle_entry);
    let frame = warp::post()
        .and(warp::path!("frame"))
        .and(upload)
        .and(with_lane)
        .and_then(handle_frame);

    recognize.or(entry).unify().or(frame).unify()
}

pub async fn run(lane: Arc<Lane>, port: u16) {
    info!("Listening on port {}", port);
    warp::serve(routes(lane)).run(([0, 0, 0, 0], port)).await;
}

async fn handle_recognize(
    form: FormData,
    lane: Arc<Lane>,
) -> std::result::Result<Response, Infallible> {
    Ok(match read_images(form, &["upload"]).await {
        Ok(images) => decide(&lane, &[&images[0]], false).await,
        Err(reply) => reply,
    })
}

async fn handle_entry(
    form: FormData,
    lane: Arc<Lane>,
) -> std::result::Result<Response, Infallible> {
    Ok(match read_images(form, &["front", "rear"]).await {
        Ok(images) => decide(&lane, &[&images[0], &images[1]], true).await,
        Err(reply) => reply,
    })
}

async fn handle_frame(
    form: FormData,
    lane: Arc<Lane>,
) -> std::result::Result<Response, Infallible> {
    if !lane.take_frame() {
        debug!("Skipping frame");
        return Ok(reply(json!({ "skipped": true }), StatusCode::OK));
    }
    handle_recognize(form, lane).await
}

async fn decide(lane: &Lane, sources: &[&SourceImage], with_access_flag: bool) -> Response {
    match lane.run_cycle(sources).await {
        Ok((result, decision)) => {
            let mut body = json!({ "decision": decision, "plate": result.plate() });
            if with_access_flag {
                // Only a plate already on file opens the barrier.
                let granted = decision == AccessDecision::Allow;
                body["acceso"] = json!(if granted { 1 } else { 0 });
            }
            reply(body, StatusCode::OK)
        }
        Err(e) => {
            error!("Error handling plate: {}", e);
            reply(
                json!({ "error": e.to_string() }),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    }
}

/// Collects the named parts and decodes them as images, in `names` order.
async fn read_images(
    form: FormData,
    names: &[&str],
) -> std::result::Result<Vec<SourceImage>, Response> {
    let mut parts: HashMap<String, Vec<u8>> = HashMap::new();
    pin_mut!(form);
    while let Some(part) = form.next().await {
        let part = part.map_err(|e| bad_request(format!("Malformed multipart body: {}", e)))?;
        if !names.contains(&part.name()) {
            warn!("Ignoring part {}", part.name());
            continue;
        }
        let name = part.name().to_string();
        let mut data: Vec<u8> = vec![];
        let stream = part.stream();
        pin_mut!(stream);
        while let Some(buf) = stream.next().await {
            let buf =
                buf.map_err(|e| bad_request(format!("Error reading part {}: {}", name, e)))?;
            data.extend_from_slice(buf.chunk());
        }
        debug!("Got part {} ({} bytes)", name, data.len());
        parts.insert(name, data);
    }

    names
        .iter()
        .map(|name| {
            let data = parts
                .remove(*name)
                .ok_or_else(|| bad_request(format!("Missing {} image", name)))?;
            SourceImage::decode(data)
                .map_err(|e| bad_request(format!("Failed to decode {} image: {}", name, e)))
        })
        .collect()
}

fn bad_request(message: String) -> Response {
    warn!("{}", message);
    reply(json!({ "error": message }), StatusCode::BAD_REQUEST)
}

fn reply(body: Value, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}
