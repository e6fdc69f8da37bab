use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::detection::{DetectionConfig, DetectionMethod};

use super::{Probe, ProbeError, ProbeVerdict};

/// Read access to the page's global namespace.
pub trait GlobalScope: Send + Sync {
    fn has_symbol(&self, name: &str) -> Result<bool, ProbeError>;
}

/// Checks that the ad library installed its namespace object.
///
/// Advisory only: a slow network produces the same absence as a blocker.
pub struct GlobalSymbolProbe {
    scope: Arc<dyn GlobalScope>,
    symbol: String,
    wait: Duration,
}

impl GlobalSymbolProbe {
    pub fn new(scope: Arc<dyn GlobalScope>, config: &DetectionConfig) -> Self {
        Self {
            scope,
            symbol: config.global_symbol.clone(),
            wait: config.global_symbol_wait(),
        }
    }
}

#[async_trait]
impl Probe for GlobalSymbolProbe {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::GlobalSymbol
    }

    fn start_delay(&self) -> Duration {
        self.wait
    }

    async fn run(&self) -> Result<ProbeVerdict, ProbeError> {
        if self.scope.has_symbol(&self.symbol)? {
            Ok(ProbeVerdict::Clear)
        } else {
            Ok(ProbeVerdict::Blocked(json!({ "missing": self.symbol })))
        }
    }
}
