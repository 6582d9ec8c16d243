//! Prover compatibility tracking.
//!
//! The gateway pins the ruleset it was built for and periodically compares
//! it against the prover's advertised health. A mismatched prover would
//! produce journals the score contract rejects with a digest error, so
//! admission is refused while the pairing is degraded.

use std::{sync::Arc, time::Duration};

use asteroids_claim_core::constants::{RULESET_NAME, RULES_DIGEST};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::{prover::ProverApi, types::now_unix_s};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PinnedExpectations {
    pub rules_digest: u32,
    pub ruleset: &'static str,
}

impl Default for PinnedExpectations {
    fn default() -> Self {
        Self {
            rules_digest: RULES_DIGEST,
            ruleset: RULESET_NAME,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Compatibility {
    /// No successful health probe yet. Admission proceeds optimistically;
    /// the per-journal digest check still backstops a mismatch.
    Unknown,
    Compatible,
    /// The pairing is unusable. `retryable` says whether waiting can help:
    /// an unhealthy prover may recover, a pinning mismatch needs a deploy.
    Degraded {
        code: String,
        error: String,
        retryable: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub compatibility: Compatibility,
    pub pinned: PinnedExpectations,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prover_image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_probe_at_unix_s: Option<u64>,
}

pub struct HealthState {
    pinned: PinnedExpectations,
    inner: RwLock<HealthSnapshot>,
}

impl HealthState {
    pub fn new() -> Self {
        let pinned = PinnedExpectations::default();
        Self {
            pinned,
            inner: RwLock::new(HealthSnapshot {
                compatibility: Compatibility::Unknown,
                pinned,
                prover_image_id: None,
                last_probe_at_unix_s: None,
            }),
        }
    }

    pub async fn snapshot(&self) -> HealthSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn is_degraded(&self) -> Option<String> {
        match &self.inner.read().await.compatibility {
            Compatibility::Degraded { error, .. } => Some(error.clone()),
            _ => None,
        }
    }

    /// Run one probe against the prover and record the result. Probe
    /// transport failures leave the last known compatibility in place.
    pub async fn probe(&self, prover: &dyn ProverApi) {
        let health = match prover.fetch_health().await {
            Ok(health) => health,
            Err(err) => {
                tracing::warn!(error = %err, "prover health probe failed");
                let mut inner = self.inner.write().await;
                inner.last_probe_at_unix_s = Some(now_unix_s());
                return;
            }
        };

        let compatibility = if health.rules_digest != self.pinned.rules_digest {
            Compatibility::Degraded {
                code: "rules_digest_mismatch".to_string(),
                error: format!(
                    "prover rules digest {:#010x} does not match pinned {:#010x}",
                    health.rules_digest, self.pinned.rules_digest
                ),
                retryable: false,
            }
        } else if health.ruleset != self.pinned.ruleset {
            Compatibility::Degraded {
                code: "ruleset_mismatch".to_string(),
                error: format!(
                    "prover ruleset {:?} does not match pinned {:?}",
                    health.ruleset, self.pinned.ruleset
                ),
                retryable: false,
            }
        } else if health.status != "ok" {
            Compatibility::Degraded {
                code: "prover_unhealthy".to_string(),
                error: format!("prover reports status {:?}", health.status),
                retryable: true,
            }
        } else {
            Compatibility::Compatible
        };

        if let Compatibility::Degraded { code, error, .. } = &compatibility {
            tracing::warn!(code, error, "prover pairing degraded");
        }

        let mut inner = self.inner.write().await;
        inner.compatibility = compatibility;
        inner.prover_image_id = Some(health.image_id);
        inner.last_probe_at_unix_s = Some(now_unix_s());
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task: probe once at startup, then on an interval.
pub fn spawn_refresh_task(
    state: Arc<HealthState>,
    prover: Arc<dyn ProverApi>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            state.probe(prover.as_ref()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::CallFailure;
    use crate::prover::{RemoteHealth, RemoteJob, RemoteJobCreated};
    use crate::types::ReceiptKind;
    use async_trait::async_trait;

    struct FixedHealthProver {
        health: RemoteHealth,
    }

    #[async_trait]
    impl ProverApi for FixedHealthProver {
        async fn submit_tape(
            &self,
            _tape: &[u8],
            _receipt_kind: ReceiptKind,
        ) -> Result<RemoteJobCreated, CallFailure> {
            Err(CallFailure::fatal("not under test"))
        }

        async fn fetch_job(&self, _job_id: &str) -> Result<RemoteJob, CallFailure> {
            Err(CallFailure::fatal("not under test"))
        }

        async fn cancel_job(&self, _job_id: &str) -> Result<(), CallFailure> {
            Err(CallFailure::fatal("not under test"))
        }

        async fn fetch_health(&self) -> Result<RemoteHealth, CallFailure> {
            Ok(self.health.clone())
        }
    }

    fn health(rules_digest: u32, ruleset: &str) -> RemoteHealth {
        RemoteHealth {
            status: "ok".to_string(),
            rules_digest,
            ruleset: ruleset.to_string(),
            image_id: "abc123".to_string(),
            dev_mode: false,
        }
    }

    #[tokio::test]
    async fn matching_probe_is_compatible() {
        let state = HealthState::new();
        let prover = FixedHealthProver {
            health: health(RULES_DIGEST, RULESET_NAME),
        };
        state.probe(&prover).await;
        assert_eq!(state.snapshot().await.compatibility, Compatibility::Compatible);
        assert!(state.is_degraded().await.is_none());
    }

    #[tokio::test]
    async fn digest_mismatch_is_a_permanent_degradation() {
        let state = HealthState::new();
        let prover = FixedHealthProver {
            health: health(RULES_DIGEST ^ 1, RULESET_NAME),
        };
        state.probe(&prover).await;
        match state.snapshot().await.compatibility {
            Compatibility::Degraded {
                code,
                error,
                retryable,
            } => {
                assert_eq!(code, "rules_digest_mismatch");
                assert!(error.contains("rules digest"));
                assert!(!retryable);
            }
            other => panic!("expected Degraded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ruleset_mismatch_degrades() {
        let state = HealthState::new();
        let prover = FixedHealthProver {
            health: health(RULES_DIGEST, "other-v9"),
        };
        state.probe(&prover).await;
        assert!(state.is_degraded().await.is_some());
    }

    #[tokio::test]
    async fn unhealthy_status_is_a_transient_degradation() {
        let state = HealthState::new();
        let mut unhealthy = health(RULES_DIGEST, RULESET_NAME);
        unhealthy.status = "draining".to_string();
        let prover = FixedHealthProver { health: unhealthy };
        state.probe(&prover).await;
        match state.snapshot().await.compatibility {
            Compatibility::Degraded { code, retryable, .. } => {
                assert_eq!(code, "prover_unhealthy");
                assert!(retryable);
            }
            other => panic!("expected Degraded, got {other:?}"),
        }
    }
}
