//! HTTP probe collaborator for the management UI.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("could not build HTTP client: {0}")]
    Client(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse, HttpError>;
}

/// `reqwest`-backed probe.
#[derive(Debug, Clone)]
pub struct ReqwestProbe {
    client: reqwest::Client,
}

impl ReqwestProbe {
    /// `accept_invalid_certs` lets the probe talk to an appliance still
    /// serving its self-signed certificate.
    pub fn new(accept_invalid_certs: bool, timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .timeout(timeout)
            .build()
            .map_err(|e| HttpError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
        let transport = |e: reqwest::Error| HttpError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };
        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport)?;
        Ok(HttpResponse { status, body })
    }
}
