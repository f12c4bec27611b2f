//! Placement guard
//!
//! While a generate request is in flight, a background task polls `/api/ps`
//! for the model under test. If the placement breaks the configured policy it
//! records an abort reason and cancels the attempt. The request path checks the
//! same slot before classifying any error, so a policy cancellation is never
//! reported as a network failure.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::client::EndpointClient;
use crate::model::{Placement, PlacementSample};

/// Which placements are acceptable for a benchmark run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementPolicy {
    /// Any spill into system memory aborts the run
    pub gpu_only: bool,
    /// Running entirely from system memory is acceptable
    pub cpu_only_allowed: bool,
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self {
            gpu_only: false,
            cpu_only_allowed: true,
        }
    }
}

impl PlacementPolicy {
    /// Abort reason for `sample`, if it violates the policy
    pub fn evaluate(&self, sample: PlacementSample) -> Option<String> {
        match sample.placement() {
            Placement::SlowMemory if !self.cpu_only_allowed => {
                Some("ABORT: Model loaded 100% on CPU (cpu_only_allowed=false)".to_string())
            }
            Placement::SlowMemory | Placement::Split if self.gpu_only => {
                Some("ABORT: Model is partially on CPU (gpu_only=true)".to_string())
            }
            _ => None,
        }
    }
}

/// Single-slot abort handoff.
///
/// The first reason written wins; later writes are dropped without blocking.
#[derive(Debug, Clone, Default)]
pub struct AbortSlot(Arc<OnceLock<String>>);

impl AbortSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `reason` unless one is already pending. Returns whether it was stored.
    pub fn trip(&self, reason: impl Into<String>) -> bool {
        self.0.set(reason.into()).is_ok()
    }

    pub fn reason(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }

    pub fn is_tripped(&self) -> bool {
        self.0.get().is_some()
    }
}

/// What the guard watches and how often
#[derive(Debug, Clone)]
pub struct GuardSpec {
    pub target: String,
    pub model: String,
    pub policy: PlacementPolicy,
    pub interval: Duration,
    /// Hard upper bound on the monitor's lifetime
    pub deadline: Duration,
}

/// Handle to a running placement monitor.
///
/// The monitor stops when the shared token is cancelled. Dropping the handle
/// cancels and aborts it, so no monitor outlives its attempt.
pub struct PlacementGuard {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PlacementGuard {
    /// Start polling. `cancel` is shared with the request it guards.
    pub fn spawn(
        client: EndpointClient,
        spec: GuardSpec,
        cancel: CancellationToken,
        abort: AbortSlot,
    ) -> Self {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let deadline = spec.deadline;
            if tokio::time::timeout(deadline, watch(client, spec, token, abort))
                .await
                .is_err()
            {
                tracing::debug!(?deadline, "Placement guard reached its deadline");
            }
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Cancel the monitor and wait for it to finish
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::warn!(error = %e, "Placement guard panicked");
                }
            }
        }
    }
}

impl Drop for PlacementGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn watch(client: EndpointClient, spec: GuardSpec, cancel: CancellationToken, abort: AbortSlot) {
    let mut ticker = tokio::time::interval_at(Instant::now() + spec.interval, spec.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut resident = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let sample = tokio::select! {
            _ = cancel.cancelled() => return,
            result = client.placement(&spec.target, &spec.model) => match result {
                Ok(sample) => sample,
                Err(e) => {
                    // Polling races the model's own startup
                    tracing::debug!(model = %spec.model, error = %e, "Placement poll failed");
                    continue;
                }
            },
        };

        if sample.placement() == Placement::NotLoaded {
            continue;
        }

        if !resident {
            resident = true;
            tracing::info!(
                model = %spec.model,
                url = %spec.target,
                placement = ?sample.placement(),
                vram_pct = %format!("{:.1}%", sample.vram_percentage()),
                "Model resident"
            );
        }

        if let Some(reason) = spec.policy.evaluate(sample) {
            if abort.trip(reason.as_str()) {
                tracing::warn!(model = %spec.model, url = %spec.target, reason = %reason, "Placement guard abort");
            }
            cancel.cancel();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_cpu_only_disallowed() {
        let policy = PlacementPolicy {
            gpu_only: false,
            cpu_only_allowed: false,
        };
        let reason = policy.evaluate(PlacementSample::new(1000, 0)).unwrap();
        assert!(reason.contains("100% on CPU"));
        assert_eq!(policy.evaluate(PlacementSample::new(1000, 500)), None);
        assert_eq!(policy.evaluate(PlacementSample::new(1000, 1000)), None);
        assert_eq!(policy.evaluate(PlacementSample::new(0, 0)), None);
    }

    #[test]
    fn test_policy_gpu_only() {
        let policy = PlacementPolicy {
            gpu_only: true,
            cpu_only_allowed: true,
        };
        let reason = policy.evaluate(PlacementSample::new(1000, 500)).unwrap();
        assert!(reason.contains("partially on CPU"));
        // Fully on CPU is still "some part on CPU"
        assert!(policy.evaluate(PlacementSample::new(1000, 0)).is_some());
        assert_eq!(policy.evaluate(PlacementSample::new(1000, 1000)), None);
    }

    #[test]
    fn test_default_policy_allows_everything() {
        let policy = PlacementPolicy::default();
        for sample in [
            PlacementSample::new(0, 0),
            PlacementSample::new(1000, 0),
            PlacementSample::new(1000, 10),
            PlacementSample::new(1000, 1000),
        ] {
            assert_eq!(policy.evaluate(sample), None);
        }
    }

    #[test]
    fn test_abort_slot_first_writer_wins() {
        let slot = AbortSlot::new();
        assert!(!slot.is_tripped());
        assert!(slot.trip("first"));
        assert!(!slot.clone().trip("second"));
        assert_eq!(slot.reason(), Some("first"));
    }

    #[tokio::test]
    async fn test_guard_stops_on_cancel() {
        // Nothing listens on port 9; polls fail and are tolerated
        let client = EndpointClient::new(Duration::from_secs(1), Duration::from_secs(1)).unwrap();
        let cancel = CancellationToken::new();
        let abort = AbortSlot::new();
        let guard = PlacementGuard::spawn(
            client,
            GuardSpec {
                target: "http://127.0.0.1:9".into(),
                model: "m".into(),
                policy: PlacementPolicy::default(),
                interval: Duration::from_millis(10),
                deadline: Duration::from_secs(30),
            },
            cancel.clone(),
            abort.clone(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::time::timeout(Duration::from_secs(5), guard.shutdown())
            .await
            .expect("guard did not stop after cancellation");
        assert!(cancel.is_cancelled());
        assert!(!abort.is_tripped());
    }
}
