use std::sync::Arc;

use anyhow::Result;

use crate::detection::DetectionAggregate;
use crate::settings::{ChoiceStore, UserChoice, UserChoiceValue};
use crate::utils::Clock;

use super::state::{should_show, OverlayState};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Page-level side effects the overlay drives.
pub trait PageHost: Send + Sync {
    fn set_scroll_locked(&self, locked: bool);
    fn reload(&self);
}

/// Hidden / Shown / Dismissed state machine. Scroll is locked on every entry
/// into `Shown` and released on every exit from it.
pub struct OverlayController {
    state: OverlayState,
    host: Arc<dyn PageHost>,
    choices: ChoiceStore,
    clock: Arc<dyn Clock>,
    threshold: u8,
    choice_ttl: chrono::Duration,
}

impl OverlayController {
    pub fn new(
        host: Arc<dyn PageHost>,
        choices: ChoiceStore,
        clock: Arc<dyn Clock>,
        threshold: u8,
        choice_ttl: chrono::Duration,
    ) -> Self {
        Self {
            state: OverlayState::Hidden,
            host,
            choices,
            clock,
            threshold,
            choice_ttl,
        }
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    /// Re-evaluates against the latest aggregate. Only `Hidden` and
    /// `Dismissed(Continue)` can move to `Shown`; a pending refresh is final.
    pub fn evaluate(&mut self, aggregate: &DetectionAggregate) -> OverlayState {
        match self.state {
            OverlayState::Hidden | OverlayState::Dismissed(UserChoiceValue::Continue) => {
                let choice = self.choices.load();
                if should_show(aggregate, choice.as_ref(), self.clock.now(), self.threshold) {
                    log_info!(
                        "showing ad blocker overlay (confidence {}, methods {:?})",
                        aggregate.confidence,
                        aggregate.methods
                    );
                    self.transition(OverlayState::Shown);
                }
            }
            OverlayState::Shown | OverlayState::Dismissed(UserChoiceValue::Refresh) => {}
        }
        self.state
    }

    /// "Continue anyway": remembers the choice for the TTL and hides the overlay.
    /// The overlay hides even if the choice cannot be persisted.
    pub fn continue_anyway(&mut self) -> Result<()> {
        if self.state != OverlayState::Shown {
            return Ok(());
        }

        let choice = UserChoice::continue_for(self.clock.now(), self.choice_ttl);
        self.transition(OverlayState::Dismissed(UserChoiceValue::Continue));
        self.choices.save(&choice).map_err(|err| {
            log_warn!("failed to persist continue choice: {err:#}");
            err
        })
    }

    /// "Refresh": releases scroll and asks the host to reload. Nothing is stored.
    pub fn request_refresh(&mut self) {
        if self.state != OverlayState::Shown {
            return;
        }
        self.transition(OverlayState::Dismissed(UserChoiceValue::Refresh));
        self.host.reload();
    }

    /// Releases scroll if the component goes away while the overlay is up.
    pub fn teardown(&mut self) {
        if self.state.locks_scroll() {
            self.transition(OverlayState::Hidden);
        }
    }

    fn transition(&mut self, next: OverlayState) {
        let was_locked = self.state.locks_scroll();
        let locks = next.locks_scroll();
        if was_locked != locks {
            self.host.set_scroll_locked(locks);
        }
        log_info!("overlay {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
