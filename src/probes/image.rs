use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;

use crate::detection::{DetectionConfig, DetectionMethod};

use super::{Probe, ProbeError, ProbeVerdict, ResourceLoader};

/// Loads a 1×1 pixel from an ad-serving host. Only scheduled in production,
/// where the pixel request is not noise in local development logs.
pub struct ImageLoadProbe {
    loader: Arc<dyn ResourceLoader>,
    url: String,
    delay: Duration,
}

impl ImageLoadProbe {
    pub fn new(loader: Arc<dyn ResourceLoader>, config: &DetectionConfig) -> Self {
        Self {
            loader,
            url: config.image_url.clone(),
            delay: config.image_probe_delay(),
        }
    }

    fn cache_busted_url(&self) -> String {
        let buster: u64 = rand::thread_rng().gen();
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}cb={}", self.url, separator, buster)
    }
}

#[async_trait]
impl Probe for ImageLoadProbe {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::ImageLoad
    }

    fn start_delay(&self) -> Duration {
        self.delay
    }

    async fn run(&self) -> Result<ProbeVerdict, ProbeError> {
        let url = self.cache_busted_url();
        match self.loader.load_image(&url).await {
            Ok(()) => Ok(ProbeVerdict::Clear),
            Err(err) => Ok(ProbeVerdict::Blocked(json!({ "url": url, "error": err.to_string() }))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::resource::testing::ScriptedLoader;

    #[tokio::test]
    async fn every_request_carries_a_fresh_cache_buster() {
        let config = DetectionConfig::default();
        let loader = Arc::new(ScriptedLoader::default());
        let probe = ImageLoadProbe::new(loader.clone(), &config);

        probe.run().await.unwrap();
        probe.run().await.unwrap();

        let requested = loader.requested.lock().unwrap();
        assert_eq!(requested.len(), 2);
        assert!(requested[0].starts_with(&format!("{}?cb=", config.image_url)));
        assert_ne!(requested[0], requested[1]);
    }

    #[tokio::test]
    async fn image_error_becomes_signal() {
        let config = DetectionConfig::default();
        let loader = Arc::new(ScriptedLoader::failing(&[config.image_url.as_str()]));
        let probe = ImageLoadProbe::new(loader, &config);

        assert!(matches!(probe.run().await.unwrap(), ProbeVerdict::Blocked(_)));
    }
}
