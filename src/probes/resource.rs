use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::detection::{DetectionConfig, DetectionMethod};

use super::{Probe, ProbeError, ProbeVerdict};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

const USER_AGENT: &str = concat!("adwatch/", env!("CARGO_PKG_VERSION"));

/// Why a resource did not load. To a probe every variant means "blocked".
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoadError {
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("timed out")]
    Timeout,
}

/// Network capabilities: script injection, opaque fetch and image loads.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn load_script(&self, url: &str) -> Result<(), LoadError>;

    /// Opaque request: any response at all counts as reachable.
    async fn fetch_head(&self, url: &str) -> Result<(), LoadError>;

    async fn load_image(&self, url: &str) -> Result<(), LoadError>;
}

/// Native loader for running the network probes outside a browser, where
/// DNS sinkholes and filtering proxies are the blockers being detected.
pub struct HttpResourceLoader {
    client: reqwest::Client,
}

impl HttpResourceLoader {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Self::from_builder(reqwest::Client::builder(), timeout)
    }

    fn from_builder(builder: reqwest::ClientBuilder, timeout: Duration) -> anyhow::Result<Self> {
        let client = builder
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    async fn get_ok(&self, url: &str) -> Result<(), LoadError> {
        let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(LoadError::Status(status.as_u16()))
        }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> LoadError {
    if err.is_timeout() {
        LoadError::Timeout
    } else {
        LoadError::Network(err.to_string())
    }
}

#[async_trait]
impl ResourceLoader for HttpResourceLoader {
    async fn load_script(&self, url: &str) -> Result<(), LoadError> {
        self.get_ok(url).await
    }

    async fn fetch_head(&self, url: &str) -> Result<(), LoadError> {
        self.client
            .head(url)
            .send()
            .await
            .map(|_| ())
            .map_err(map_reqwest_error)
    }

    async fn load_image(&self, url: &str) -> Result<(), LoadError> {
        self.get_ok(url).await
    }
}

/// Requests a known ad-network loader script.
pub struct ScriptBlockProbe {
    loader: Arc<dyn ResourceLoader>,
    url: String,
}

impl ScriptBlockProbe {
    pub fn new(loader: Arc<dyn ResourceLoader>, config: &DetectionConfig) -> Self {
        Self {
            loader,
            url: config.script_url.clone(),
        }
    }
}

#[async_trait]
impl Probe for ScriptBlockProbe {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::ScriptBlock
    }

    async fn run(&self) -> Result<ProbeVerdict, ProbeError> {
        match self.loader.load_script(&self.url).await {
            Ok(()) => Ok(ProbeVerdict::Clear),
            Err(err) => {
                log_debug!("script {} failed to load: {err}", self.url);
                Ok(ProbeVerdict::Blocked(json!({ "url": self.url, "error": err.to_string() })))
            }
        }
    }
}

/// Opaque requests to known ad-serving endpoints; one failure is enough.
pub struct FetchBlockProbe {
    loader: Arc<dyn ResourceLoader>,
    urls: Vec<String>,
}

impl FetchBlockProbe {
    pub fn new(loader: Arc<dyn ResourceLoader>, config: &DetectionConfig) -> Self {
        Self {
            loader,
            urls: config.fetch_urls.clone(),
        }
    }
}

#[async_trait]
impl Probe for FetchBlockProbe {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::FetchBlock
    }

    async fn run(&self) -> Result<ProbeVerdict, ProbeError> {
        let mut failed = Vec::new();
        for url in &self.urls {
            if let Err(err) = self.loader.fetch_head(url).await {
                log_debug!("fetch {} rejected: {err}", url);
                failed.push(url.clone());
            }
        }

        if failed.is_empty() {
            Ok(ProbeVerdict::Clear)
        } else {
            Ok(ProbeVerdict::Blocked(json!({ "failed": failed, "attempted": self.urls.len() })))
        }
    }
}
