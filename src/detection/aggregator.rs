use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::utils::Clock;

use super::bus::SignalSink;
use super::signal::{DetectionMethod, DetectionSignal};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Confidence contributed by each distinct method.
pub const CONFIDENCE_PER_METHOD: u8 = 25;
pub const MAX_CONFIDENCE: u8 = 100;

/// `min(100, 25 × n)` for `n` distinct methods.
pub fn confidence_for(distinct_methods: usize) -> u8 {
    let raw = distinct_methods.saturating_mul(CONFIDENCE_PER_METHOD as usize);
    raw.min(MAX_CONFIDENCE as usize) as u8
}

/// Page-lifetime fold over every signal received.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionAggregate {
    pub is_detected: bool,
    pub methods: BTreeSet<DetectionMethod>,
    pub confidence: u8,
    pub last_signal: Option<DetectionSignal>,
}

impl DetectionAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `signal`. Returns true when a new method raised the confidence.
    ///
    /// Methods are never removed, so confidence only ever goes up.
    pub fn fold(&mut self, signal: DetectionSignal) -> bool {
        let added = self.methods.insert(signal.method.clone());
        self.is_detected = true;
        self.last_signal = Some(signal);
        if added {
            self.confidence = confidence_for(self.methods.len());
        }
        added
    }

    pub fn meets(&self, threshold: u8) -> bool {
        self.confidence >= threshold
    }
}

/// Shared, reactive aggregate. Clones refer to the same state.
#[derive(Clone)]
pub struct SignalAggregator {
    tx: Arc<watch::Sender<DetectionAggregate>>,
    mounted: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
}

impl SignalAggregator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (tx, _rx) = watch::channel(DetectionAggregate::new());
        Self {
            tx: Arc::new(tx),
            mounted: Arc::new(AtomicBool::new(true)),
            clock,
        }
    }

    /// Timestamps and folds a signal. After `unmount` this is a no-op.
    pub fn record(&self, method: DetectionMethod, details: Value) -> bool {
        if !self.is_mounted() {
            log_debug!("dropping late {} signal after unmount", method);
            return false;
        }

        let signal = DetectionSignal::new(method.clone(), details, self.clock.now());
        let mut confidence = 0;
        let added = self.tx.send_if_modified(|aggregate| {
            let added = aggregate.fold(signal);
            confidence = aggregate.confidence;
            added
        });

        if added {
            log_info!("ad blocker signal from {} (confidence {})", method, confidence);
        } else {
            log_debug!("duplicate {} signal ignored (confidence {})", method, confidence);
        }
        added
    }

    pub fn snapshot(&self) -> DetectionAggregate {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DetectionAggregate> {
        self.tx.subscribe()
    }

    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::SeqCst);
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }
}

impl SignalSink for SignalAggregator {
    fn report(&self, method: DetectionMethod, details: Value) {
        self.record(method, details);
    }
}
