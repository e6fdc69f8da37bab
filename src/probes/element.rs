use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::detection::{DetectionConfig, DetectionMethod};

use super::{Probe, ProbeError, ProbeVerdict};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Class names filter lists hide on sight.
const STANDARD_BAIT_CLASSES: [&str; 10] = [
    "ads",
    "ad",
    "adsbygoogle",
    "sponsored",
    "banner-ad",
    "ad-banner",
    "advertisement",
    "ad-container",
    "ad-slot",
    "google-ad",
];

/// (id, class) pairs matched by cosmetic id/attribute rules rather than class rules.
const ADVANCED_BAITS: [(&str, &str); 6] = [
    ("ad_banner", "pub_300x250"),
    ("google_ads_iframe_0", "pub_728x90"),
    ("div-gpt-ad-0", "text-ad"),
    ("adunit", "textAd"),
    ("sponsorText", "text_ad"),
    ("carbonads", "adsbox"),
];

/// Off-screen element styled like an ad container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaitElement {
    pub id: Option<String>,
    pub class_names: Vec<String>,
}

impl BaitElement {
    pub fn with_class(class: &str) -> Self {
        Self {
            id: None,
            class_names: vec![class.to_string()],
        }
    }

    pub fn with_id(id: &str, class: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            class_names: vec![class.to_string()],
        }
    }
}

/// Opaque reference to an element the environment created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub u64);

/// Rendered geometry and computed style of a bait element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementMeasurement {
    pub width: f64,
    pub height: f64,
    pub display_none: bool,
    pub visibility_hidden: bool,
    pub opacity: f64,
}

impl ElementMeasurement {
    pub fn visible(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            display_none: false,
            visibility_hidden: false,
            opacity: 1.0,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.width <= 0.0
            || self.height <= 0.0
            || self.display_none
            || self.visibility_hidden
            || self.opacity <= 0.0
    }
}

/// DOM capabilities the element probes need.
pub trait ProbeEnvironment: Send + Sync {
    fn create_probe_element(&self, bait: &BaitElement) -> Result<ElementHandle, ProbeError>;
    fn measure(&self, handle: ElementHandle) -> Result<ElementMeasurement, ProbeError>;
    fn cleanup(&self, handle: ElementHandle);
}

/// Removes every placed bait when dropped, including when the probe is cancelled
/// mid-settle.
struct PlacedBaits<'a> {
    environment: &'a dyn ProbeEnvironment,
    handles: Vec<ElementHandle>,
}

impl Drop for PlacedBaits<'_> {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            self.environment.cleanup(handle);
        }
    }
}

/// Places bait elements, waits for styles to apply, and counts how many were hidden.
pub struct ElementProbe {
    method: DetectionMethod,
    environment: Arc<dyn ProbeEnvironment>,
    baits: Vec<BaitElement>,
    settle: Duration,
    min_blocked_exclusive: usize,
}

impl ElementProbe {
    pub fn element_visibility(
        environment: Arc<dyn ProbeEnvironment>,
        config: &DetectionConfig,
    ) -> Self {
        Self {
            method: DetectionMethod::ElementVisibility,
            environment,
            baits: STANDARD_BAIT_CLASSES
                .iter()
                .map(|class| BaitElement::with_class(class))
                .collect(),
            settle: config.element_settle(),
            min_blocked_exclusive: config.element_block_threshold,
        }
    }

    pub fn advanced(environment: Arc<dyn ProbeEnvironment>, config: &DetectionConfig) -> Self {
        Self {
            method: DetectionMethod::AdvancedElement,
            environment,
            baits: ADVANCED_BAITS
                .iter()
                .map(|(id, class)| BaitElement::with_id(id, class))
                .collect(),
            settle: config.advanced_settle(),
            min_blocked_exclusive: config.advanced_block_threshold,
        }
    }

    pub fn baits(&self) -> &[BaitElement] {
        &self.baits
    }
}

#[async_trait]
impl Probe for ElementProbe {
    fn method(&self) -> DetectionMethod {
        self.method.clone()
    }

    async fn run(&self) -> Result<ProbeVerdict, ProbeError> {
        let environment = self.environment.as_ref();
        let mut placed = PlacedBaits {
            environment,
            handles: Vec::with_capacity(self.baits.len()),
        };

        for bait in &self.baits {
            placed.handles.push(environment.create_probe_element(bait)?);
        }

        tokio::time::sleep(self.settle).await;

        let mut blocked = 0usize;
        for handle in &placed.handles {
            match environment.measure(*handle) {
                Ok(measurement) if measurement.is_hidden() => blocked += 1,
                Ok(_) => {}
                Err(err) => log_warn!("{} could not measure bait {:?}: {err}", self.method, handle),
            }
        }
        let total = placed.handles.len();
        drop(placed);

        log_debug!("{}: {}/{} baits hidden", self.method, blocked, total);

        if blocked > self.min_blocked_exclusive {
            Ok(ProbeVerdict::Blocked(json!({ "blocked": blocked, "total": total })))
        } else {
            Ok(ProbeVerdict::Clear)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// In-memory DOM: hides any bait whose class or id is in the hide list.
    #[derive(Default)]
    pub struct FakeEnvironment {
        hidden_selectors: HashSet<String>,
        fail_create: bool,
        next_id: Mutex<u64>,
        live: Mutex<HashMap<ElementHandle, BaitElement>>,
        pub created: Mutex<usize>,
    }

    impl FakeEnvironment {
        pub fn hiding(selectors: &[&str]) -> Self {
            Self {
                hidden_selectors: selectors.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }

        pub fn failing() -> Self {
            Self {
                fail_create: true,
                ..Self::default()
            }
        }

        pub fn live_count(&self) -> usize {
            self.live.lock().unwrap().len()
        }
    }

    impl ProbeEnvironment for FakeEnvironment {
        fn create_probe_element(&self, bait: &BaitElement) -> Result<ElementHandle, ProbeError> {
            if self.fail_create {
                return Err(ProbeError::EnvironmentUnavailable("no document".into()));
            }
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            let handle = ElementHandle(*next);
            self.live.lock().unwrap().insert(handle, bait.clone());
            *self.created.lock().unwrap() += 1;
            Ok(handle)
        }

        fn measure(&self, handle: ElementHandle) -> Result<ElementMeasurement, ProbeError> {
            let live = self.live.lock().unwrap();
            let bait = live
                .get(&handle)
                .ok_or_else(|| ProbeError::EnvironmentUnavailable("detached".into()))?;
            let hidden = bait
                .class_names
                .iter()
                .chain(bait.id.iter())
                .any(|name| self.hidden_selectors.contains(name));
            if hidden {
                Ok(ElementMeasurement {
                    display_none: true,
                    ..ElementMeasurement::visible(0.0, 0.0)
                })
            } else {
                Ok(ElementMeasurement::visible(1.0, 1.0))
            }
        }

        fn cleanup(&self, handle: ElementHandle) {
            self.live.lock().unwrap().remove(&handle);
        }
    }
}
