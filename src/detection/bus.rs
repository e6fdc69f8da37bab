use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::aggregator::SignalAggregator;
use super::signal::{AdBlockerDetectedEvent, DetectionMethod};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Name of the broadcast event probes in other components publish.
pub const AD_BLOCKER_DETECTED: &str = "adBlockerDetected";

const BUS_CAPACITY: usize = 64;

/// The `report(signal)` capability handed to every probe task.
pub trait SignalSink: Send + Sync {
    fn report(&self, method: DetectionMethod, details: Value);
}

/// In-process stand-in for the page's custom event channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AdBlockerDetectedEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publishing with nobody listening is not an error; the event is dropped.
    pub fn publish(&self, event: AdBlockerDetectedEvent) {
        if self.tx.send(event).is_err() {
            log_debug!("{} published with no listeners", AD_BLOCKER_DETECTED);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AdBlockerDetectedEvent> {
        self.tx.subscribe()
    }

    /// Forwards bus events into `aggregator` until `cancel_token` fires.
    pub fn spawn_listener(
        &self,
        aggregator: SignalAggregator,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(event) => {
                            let (method, details) = event.into_parts();
                            aggregator.record(method, details);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log_warn!(
                                "{} listener lagged, {} events skipped",
                                AD_BLOCKER_DETECTED,
                                skipped
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = cancel_token.cancelled() => break,
                }
            }
        })
    }
}

impl SignalSink for EventBus {
    fn report(&self, method: DetectionMethod, details: Value) {
        let event = AdBlockerDetectedEvent::new(method).with_details(details);
        self.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::SystemClock;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn listener_forwards_events_into_aggregator() {
        let bus = EventBus::new();
        let aggregator = SignalAggregator::new(Arc::new(SystemClock));
        let mut rx = aggregator.subscribe();
        let cancel = CancellationToken::new();
        let handle = bus.spawn_listener(aggregator.clone(), cancel.clone());

        bus.publish(
            AdBlockerDetectedEvent::new("script-block").with_url("https://ads.example/a.js"),
        );
        rx.changed().await.unwrap();

        let snapshot = aggregator.snapshot();
        assert!(snapshot.methods.contains(&DetectionMethod::ScriptBlock));
        assert_eq!(
            snapshot.last_signal.unwrap().details,
            json!({ "url": "https://ads.example/a.js" })
        );

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn publishing_without_listeners_is_harmless() {
        let bus = EventBus::new();
        bus.report(DetectionMethod::FetchBlock, Value::Null);
    }
}
