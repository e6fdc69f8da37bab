use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detection::DetectionAggregate;
use crate::settings::{UserChoice, UserChoiceValue};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "state", content = "choice")]
pub enum OverlayState {
    #[default]
    Hidden,
    Shown,
    Dismissed(UserChoiceValue),
}

impl OverlayState {
    /// Page scroll is disabled exactly while the overlay is shown.
    pub fn locks_scroll(&self) -> bool {
        matches!(self, OverlayState::Shown)
    }
}

/// Whether the overlay should be visible, given everything detected so far
/// and the stored choice at `now`.
pub fn should_show(
    aggregate: &DetectionAggregate,
    choice: Option<&UserChoice>,
    now: DateTime<Utc>,
    threshold: u8,
) -> bool {
    let suppressed = choice.map_or(false, |choice| choice.suppresses_overlay(now));
    aggregate.meets(threshold) && !suppressed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::DetectionMethod::*;
    use crate::detection::{DetectionMethod, DetectionSignal};
    use chrono::{Duration, TimeZone};
    use serde_json::Value;

    fn aggregate_with(methods: &[DetectionMethod]) -> DetectionAggregate {
        let mut aggregate = DetectionAggregate::new();
        for method in methods {
            aggregate.fold(DetectionSignal::new(method.clone(), Value::Null, Utc::now()));
        }
        aggregate
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 4, 8, 30, 0).unwrap()
    }

    #[test]
    fn below_threshold_never_shows() {
        let aggregate = aggregate_with(&[DetectionMethod::ElementVisibility]);
        assert_eq!(aggregate.confidence, 25);
        assert!(!should_show(&aggregate, None, t0(), 50));
    }

    #[test]
    fn two_methods_show_without_choice() {
        let aggregate = aggregate_with(&[ElementVisibility, ScriptBlock]);
        assert!(should_show(&aggregate, None, t0(), 50));
    }

    #[test]
    fn valid_continue_hides_until_expiry() {
        let aggregate = aggregate_with(&[ElementVisibility, ScriptBlock]);
        let choice = UserChoice::continue_for(t0(), Duration::hours(24));

        assert!(!should_show(&aggregate, Some(&choice), t0(), 50));
        assert!(!should_show(&aggregate, Some(&choice), choice.expiry, 50));
        assert!(should_show(
            &aggregate,
            Some(&choice),
            choice.expiry + Duration::seconds(1),
            50
        ));
    }

    #[test]
    fn refresh_choice_does_not_suppress() {
        let aggregate = aggregate_with(&[GlobalSymbol, FetchBlock]);
        let choice = UserChoice {
            value: UserChoiceValue::Refresh,
            expiry: t0() + Duration::hours(24),
        };
        assert!(should_show(&aggregate, Some(&choice), t0(), 50));
    }

    #[test]
    fn state_serializes_with_choice() {
        let state = OverlayState::Dismissed(UserChoiceValue::Continue);
        let json = serde_json::to_value(state).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "dismissed", "choice": "continue" }));
    }

    #[test]
    fn new_sessions_start_hidden() {
        let state = OverlayState::default();
        assert_eq!(state, OverlayState::Hidden);
        assert!(!state.locks_scroll());
        assert!(OverlayState::Shown.locks_scroll());
    }
}
