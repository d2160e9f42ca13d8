use crate::error::{Error, Result};
use crate::types::NormalizedPlate;
use async_trait::async_trait;
use log::info;
use serde_json::{json, Value};
use std::time::Duration;

/// The barrier servo and ticket printer on the companion device.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn open_barrier(&self) -> Result<()>;
    async fn close_barrier(&self) -> Result<()>;
    async fn print_ticket(&self, plate: &NormalizedPlate, registration_url: &str) -> Result<()>;
}

pub struct HttpActuator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpActuator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpActuator {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str, body: Option<Value>) -> Result<Value> {
        let endpoint = format!("{}{}", self.base_url, path);
        let fail = |reason: String| Error::ActuatorUnreachable {
            endpoint: endpoint.clone(),
            reason,
        };
        let mut request = self.client.post(&endpoint);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(|e| fail(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("HTTP {}", status)));
        }
        let value = response
            .json::<Value>()
            .await
            .map_err(|e| fail(format!("invalid JSON reply: {}", e)))?;
        info!("{} -> {} {}", endpoint, status, value);
        Ok(value)
    }
}

#[async_trait]
impl Actuator for HttpActuator {
    async fn open_barrier(&self) -> Result<()> {
        self.post("/servo/abrir", None).await.map(|_| ())
    }

    async fn close_barrier(&self) -> Result<()> {
        self.post("/servo/cerrar", None).await.map(|_| ())
    }

    async fn print_ticket(&self, plate: &NormalizedPlate, registration_url: &str) -> Result<()> {
        let body = json!({ "plate": plate, "registration_url": registration_url });
        self.post("/ticket/print", Some(body)).await.map(|_| ())
    }
}
