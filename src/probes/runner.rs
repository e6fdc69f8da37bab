use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::detection::SignalSink;

use super::{Probe, ProbeVerdict};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Runs one probe to completion: waits out `post_mount_delay` plus the probe's
/// own start delay, runs it under `timeout`, and reports a blocked verdict to
/// `sink`. Errors and timeouts are logged and dropped. Cancellation at any
/// point ends the task without reporting.
pub async fn run_probe(
    probe: Arc<dyn Probe>,
    sink: Arc<dyn SignalSink>,
    post_mount_delay: Duration,
    timeout: Duration,
    cancel_token: CancellationToken,
) {
    let method = probe.method();
    let start_after = post_mount_delay + probe.start_delay();

    tokio::select! {
        _ = tokio::time::sleep(start_after) => {}
        _ = cancel_token.cancelled() => {
            log_debug!("{} cancelled before start", method);
            return;
        }
    }

    log_debug!("{} probe starting", method);

    let outcome = tokio::select! {
        outcome = tokio::time::timeout(timeout, probe.run()) => outcome,
        _ = cancel_token.cancelled() => {
            log_debug!("{} cancelled while running", method);
            return;
        }
    };

    match outcome {
        Ok(Ok(ProbeVerdict::Blocked(details))) => {
            log_info!("{} probe detected blocking", method);
            sink.report(method, details);
        }
        Ok(Ok(ProbeVerdict::Clear)) => log_debug!("{} probe clear", method),
        Ok(Err(err)) => log_warn!("{} probe failed: {err}", method),
        Err(_) => log_warn!("{} probe timed out after {}ms", method, timeout.as_millis()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{DetectionMethod, SignalAggregator};
    use crate::probes::ProbeError;
    use crate::utils::SystemClock;
    use async_trait::async_trait;
    use serde_json::json;

    struct Fixed {
        method: DetectionMethod,
        verdict: ProbeVerdict,
        takes: Duration,
    }

    #[async_trait]
    impl Probe for Fixed {
        fn method(&self) -> DetectionMethod {
            self.method.clone()
        }

        async fn run(&self) -> Result<ProbeVerdict, ProbeError> {
            tokio::time::sleep(self.takes).await;
            Ok(self.verdict.clone())
        }
    }

    fn blocked(takes: Duration) -> Arc<dyn Probe> {
        Arc::new(Fixed {
            method: DetectionMethod::ScriptBlock,
            verdict: ProbeVerdict::Blocked(json!({})),
            takes,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_verdict_is_reported_after_delay() {
        let aggregator = SignalAggregator::new(Arc::new(SystemClock));
        run_probe(
            blocked(Duration::ZERO),
            Arc::new(aggregator.clone()),
            Duration::from_secs(1),
            Duration::from_secs(5),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(aggregator.snapshot().confidence, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_times_out_without_signal() {
        let aggregator = SignalAggregator::new(Arc::new(SystemClock));
        run_probe(
            blocked(Duration::from_secs(10)),
            Arc::new(aggregator.clone()),
            Duration::ZERO,
            Duration::from_secs(5),
            CancellationToken::new(),
        )
        .await;

        assert!(!aggregator.snapshot().is_detected);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_probe_never_reports() {
        let aggregator = SignalAggregator::new(Arc::new(SystemClock));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_probe(
            blocked(Duration::ZERO),
            Arc::new(aggregator.clone()),
            Duration::from_secs(1),
            Duration::from_secs(5),
            cancel.clone(),
        ));

        cancel.cancel();
        task.await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(!aggregator.snapshot().is_detected);
    }
}
