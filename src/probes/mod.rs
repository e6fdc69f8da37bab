pub mod element;
pub mod global;
pub mod image;
pub mod resource;
pub mod runner;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::detection::DetectionMethod;

pub use element::{
    BaitElement, ElementHandle, ElementMeasurement, ElementProbe, ProbeEnvironment,
};
pub use global::{GlobalScope, GlobalSymbolProbe};
pub use image::ImageLoadProbe;
pub use resource::{
    FetchBlockProbe, HttpResourceLoader, LoadError, ResourceLoader, ScriptBlockProbe,
};
pub use runner::run_probe;

/// Outcome of a probe that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeVerdict {
    Clear,
    Blocked(Value),
}

/// Anything a probe could not turn into a verdict. Never reaches the page.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe environment unavailable: {0}")]
    EnvironmentUnavailable(String),
    #[error("unexpected probe failure: {0}")]
    Unexpected(#[from] anyhow::Error),
}

/// One independent way of provoking an ad blocker.
#[async_trait]
pub trait Probe: Send + Sync {
    fn method(&self) -> DetectionMethod;

    /// How long after the post-mount delay this probe waits before running.
    fn start_delay(&self) -> Duration {
        Duration::ZERO
    }

    async fn run(&self) -> Result<ProbeVerdict, ProbeError>;
}
