use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::overlay::{OverlayController, OverlayState, PageHost};
use crate::probes::{
    run_probe, ElementProbe, FetchBlockProbe, GlobalScope, GlobalSymbolProbe, ImageLoadProbe,
    Probe, ProbeEnvironment, ResourceLoader, ScriptBlockProbe,
};
use crate::settings::{ChoiceStore, KeyValueStore};
use crate::utils::Clock;

use super::aggregator::{DetectionAggregate, SignalAggregator};
use super::bus::{EventBus, SignalSink};
use super::config::DetectionConfig;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

/// How a probe's signal reaches the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Reported straight into the aggregator.
    Direct,
    /// Published on the `adBlockerDetected` bus, as a probe living in
    /// another component would.
    Broadcast,
}

#[derive(Default)]
pub struct ProbeSet {
    entries: Vec<(Arc<dyn Probe>, Delivery)>,
}

impl ProbeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn direct(mut self, probe: Arc<dyn Probe>) -> Self {
        self.entries.push((probe, Delivery::Direct));
        self
    }

    pub fn broadcast(mut self, probe: Arc<dyn Probe>) -> Self {
        self.entries.push((probe, Delivery::Broadcast));
        self
    }

    /// Network probes only, for hosts without a DOM.
    pub fn network(loader: Arc<dyn ResourceLoader>, config: &DetectionConfig) -> Self {
        let set = Self::new()
            .broadcast(Arc::new(ScriptBlockProbe::new(loader.clone(), config)))
            .direct(Arc::new(FetchBlockProbe::new(loader.clone(), config)));
        if config.production {
            set.broadcast(Arc::new(ImageLoadProbe::new(loader, config)))
        } else {
            set
        }
    }

    /// Every probe the page runs.
    pub fn full(
        environment: Arc<dyn ProbeEnvironment>,
        scope: Arc<dyn GlobalScope>,
        loader: Arc<dyn ResourceLoader>,
        config: &DetectionConfig,
    ) -> Self {
        Self::new()
            .direct(Arc::new(ElementProbe::element_visibility(environment.clone(), config)))
            .direct(Arc::new(ElementProbe::advanced(environment, config)))
            .direct(Arc::new(GlobalSymbolProbe::new(scope, config)))
            .extend(Self::network(loader, config))
    }

    fn extend(mut self, other: ProbeSet) -> Self {
        self.entries.extend(other.entries);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Owns one page session: probes, bus listener, aggregate and overlay.
/// Everything it spawns stops at `unmount`.
pub struct DetectionController {
    session_id: String,
    config: DetectionConfig,
    aggregator: SignalAggregator,
    bus: EventBus,
    overlay: Arc<Mutex<OverlayController>>,
    tasks: Vec<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl DetectionController {
    pub fn new(
        config: DetectionConfig,
        host: Arc<dyn PageHost>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let overlay = OverlayController::new(
            host,
            ChoiceStore::new(store),
            clock.clone(),
            config.show_threshold,
            config.choice_ttl(),
        );

        Self {
            session_id: Uuid::new_v4().to_string(),
            aggregator: SignalAggregator::new(clock),
            bus: EventBus::new(),
            overlay: Arc::new(Mutex::new(overlay)),
            tasks: Vec::new(),
            cancel_token: None,
            config,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Bus other components publish `adBlockerDetected` events on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn aggregate(&self) -> DetectionAggregate {
        self.aggregator.snapshot()
    }

    pub async fn overlay_state(&self) -> OverlayState {
        self.overlay.lock().await.state()
    }

    /// Starts every probe after the post-mount delay. Returns immediately.
    pub fn mount(&mut self, probes: ProbeSet) -> Result<()> {
        if self.cancel_token.is_some() {
            bail!("detection already mounted");
        }

        log_info!(
            "mounting detection session {} with {} probes",
            self.session_id,
            probes.len()
        );

        let cancel_token = CancellationToken::new();

        self.tasks
            .push(self.bus.spawn_listener(self.aggregator.clone(), cancel_token.clone()));
        self.tasks.push(self.spawn_overlay_watcher(cancel_token.clone()));

        let direct: Arc<dyn SignalSink> = Arc::new(self.aggregator.clone());
        let broadcast: Arc<dyn SignalSink> = Arc::new(self.bus.clone());

        for (probe, delivery) in probes.entries {
            let sink = match delivery {
                Delivery::Direct => direct.clone(),
                Delivery::Broadcast => broadcast.clone(),
            };
            self.tasks.push(tokio::spawn(run_probe(
                probe,
                sink,
                self.config.post_mount_delay(),
                self.config.probe_timeout(),
                cancel_token.clone(),
            )));
        }

        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    fn spawn_overlay_watcher(&self, cancel_token: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.aggregator.subscribe();
        let overlay = Arc::clone(&self.overlay);
        tokio::spawn(async move {
            loop {
                let aggregate = rx.borrow_and_update().clone();
                {
                    let mut overlay = overlay.lock().await;
                    if cancel_token.is_cancelled() {
                        break;
                    }
                    overlay.evaluate(&aggregate);
                }

                tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            // the owner may be gone without unmounting; never leave the page locked
            overlay.lock().await.teardown();
        })
    }

    pub async fn continue_anyway(&self) -> Result<OverlayState> {
        let mut overlay = self.overlay.lock().await;
        overlay.continue_anyway()?;
        Ok(overlay.state())
    }

    pub async fn request_refresh(&self) -> OverlayState {
        let mut overlay = self.overlay.lock().await;
        overlay.request_refresh();
        overlay.state()
    }

    /// Cancels outstanding probe timers, waits for every task, and releases the
    /// page if the overlay was up. Signals arriving afterwards are ignored.
    pub async fn unmount(mut self) -> DetectionAggregate {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.aggregator.unmount();

        for handle in self.tasks.drain(..) {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    log_error!("probe task panicked in session {}", self.session_id);
                }
            }
        }

        self.overlay.lock().await.teardown();
        log_info!("detection session {} unmounted", self.session_id);
        self.aggregator.snapshot()
    }
}

impl Drop for DetectionController {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
            log_info!("detection session {} dropped while mounted", self.session_id);
        }
        self.aggregator.unmount();
        if let Ok(mut overlay) = self.overlay.try_lock() {
            overlay.teardown();
        }
    }
}
