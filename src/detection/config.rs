use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::settings::CHOICE_TTL_HOURS;

/// Ten years; longer choices are treated as configuration mistakes.
const MAX_CHOICE_TTL_HOURS: i64 = 24 * 365 * 10;

/// Tunable detection thresholds and delays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionConfig {
    /// Wait after mount before any probe starts, so probing never delays first paint.
    pub post_mount_delay_ms: u64,
    /// Time the bait elements get to be styled before measurement.
    pub element_settle_ms: u64,
    pub advanced_settle_ms: u64,
    /// Grace period for a legitimate ad library to install its global.
    pub global_symbol_wait_ms: u64,
    /// Extra start delay for the image probe, on top of `post_mount_delay_ms`.
    pub image_probe_delay_ms: u64,
    pub probe_timeout_ms: u64,

    /// Element probe fires when strictly more than this many baits are hidden.
    pub element_block_threshold: usize,
    pub advanced_block_threshold: usize,

    /// Minimum confidence that shows the overlay.
    pub show_threshold: u8,
    pub choice_ttl_hours: i64,

    /// Enables the image-load probe.
    pub production: bool,

    pub script_url: String,
    pub fetch_urls: Vec<String>,
    pub image_url: String,
    pub global_symbol: String,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            post_mount_delay_ms: 1_000,
            element_settle_ms: 100,
            advanced_settle_ms: 200,
            global_symbol_wait_ms: 2_000,
            image_probe_delay_ms: 3_000,
            probe_timeout_ms: 5_000,
            element_block_threshold: 3,
            advanced_block_threshold: 1,
            show_threshold: 50,
            choice_ttl_hours: CHOICE_TTL_HOURS,
            production: false,
            script_url: "https://pagead2.googlesyndication.com/pagead/js/adsbygoogle.js".into(),
            fetch_urls: vec![
                "https://googleads.g.doubleclick.net/pagead/id".into(),
                "https://static.doubleclick.net/instream/ad_status.js".into(),
            ],
            image_url: "https://googleads.g.doubleclick.net/pagead/viewthroughconversion/0/".into(),
            global_symbol: "adsbygoogle".into(),
        }
    }
}

impl DetectionConfig {
    /// Reads a JSON config file; missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read detection config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid detection config in {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid detection config in {}", path.display()))?;
        Ok(config)
    }

    /// Rejects values the duration getters cannot represent.
    pub fn validate(&self) -> Result<()> {
        if !(0..=MAX_CHOICE_TTL_HOURS).contains(&self.choice_ttl_hours) {
            bail!(
                "choiceTtlHours must be between 0 and {}, got {}",
                MAX_CHOICE_TTL_HOURS,
                self.choice_ttl_hours
            );
        }
        if self.checked_window_ms().is_none() {
            bail!("probe delays and timeout overflow the observation window");
        }
        Ok(())
    }

    /// Applies `ADWATCH_PRODUCTION` and `ADWATCH_DEBUG` on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if env_flag("ADWATCH_PRODUCTION") {
            self.production = true;
        }
        if env_flag("ADWATCH_DEBUG") {
            self.post_mount_delay_ms = 0;
            self.global_symbol_wait_ms = self.global_symbol_wait_ms.min(250);
            self.image_probe_delay_ms = 0;
        }
        self
    }

    pub fn post_mount_delay(&self) -> Duration {
        Duration::from_millis(self.post_mount_delay_ms)
    }

    pub fn element_settle(&self) -> Duration {
        Duration::from_millis(self.element_settle_ms)
    }

    pub fn advanced_settle(&self) -> Duration {
        Duration::from_millis(self.advanced_settle_ms)
    }

    pub fn global_symbol_wait(&self) -> Duration {
        Duration::from_millis(self.global_symbol_wait_ms)
    }

    pub fn image_probe_delay(&self) -> Duration {
        Duration::from_millis(self.image_probe_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Falls back to the default TTL when `choice_ttl_hours` is out of range.
    pub fn choice_ttl(&self) -> chrono::Duration {
        chrono::Duration::try_hours(self.choice_ttl_hours)
            .filter(|_| (0..=MAX_CHOICE_TTL_HOURS).contains(&self.choice_ttl_hours))
            .unwrap_or_else(|| chrono::Duration::hours(CHOICE_TTL_HOURS))
    }

    /// Upper bound on how long after mount a probe can still report.
    pub fn observation_window(&self) -> Duration {
        Duration::from_millis(self.checked_window_ms().unwrap_or(u64::MAX))
    }

    fn checked_window_ms(&self) -> Option<u64> {
        let longest_probe = self
            .global_symbol_wait_ms
            .max(self.image_probe_delay_ms)
            .max(self.element_settle_ms)
            .max(self.advanced_settle_ms);
        self.post_mount_delay_ms
            .checked_add(longest_probe)?
            .checked_add(self.probe_timeout_ms)
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_config_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "showThreshold": 75, "production": true }}"#).unwrap();

        let config = DetectionConfig::load(file.path()).unwrap();
        assert_eq!(config.show_threshold, 75);
        assert!(config.production);
        assert_eq!(config.element_block_threshold, 3);
        assert_eq!(config.global_symbol, "adsbygoogle");
    }

    #[test]
    fn invalid_config_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        assert!(DetectionConfig::load(file.path()).is_err());
    }

    #[test]
    fn observation_window_covers_slowest_probe() {
        let config = DetectionConfig::default();
        assert_eq!(config.observation_window(), Duration::from_millis(1_000 + 3_000 + 5_000));
    }

    #[test]
    fn default_ttl_matches_stored_choice_ttl() {
        let config = DetectionConfig::default();
        assert_eq!(config.choice_ttl_hours, CHOICE_TTL_HOURS);
        assert_eq!(config.choice_ttl(), chrono::Duration::hours(CHOICE_TTL_HOURS));
    }

    #[test]
    fn out_of_range_ttl_is_rejected_on_load() {
        for ttl in ["9000000000000", "-1"] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            write!(file, r#"{{ "choiceTtlHours": {ttl} }}"#).unwrap();

            let err = DetectionConfig::load(file.path()).unwrap_err();
            assert!(format!("{err:#}").contains("choiceTtlHours"), "{err:#}");
        }
    }

    #[test]
    fn overflowing_delays_are_rejected_on_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "postMountDelayMs": {} }}"#, u64::MAX).unwrap();

        assert!(DetectionConfig::load(file.path()).is_err());
    }

    #[test]
    fn unvalidated_values_never_panic() {
        let config = DetectionConfig {
            choice_ttl_hours: 9_000_000_000_000,
            post_mount_delay_ms: u64::MAX,
            ..DetectionConfig::default()
        };

        assert_eq!(config.choice_ttl(), chrono::Duration::hours(CHOICE_TTL_HOURS));
        assert_eq!(config.observation_window(), Duration::from_millis(u64::MAX));
    }
}
