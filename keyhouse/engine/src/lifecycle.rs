//! Lifecycle orchestrator: the operations transport handlers call.
//!
//! Each operation composes the state machine and the quorum ledger against
//! the store handle this orchestrator was built with, reports a structured
//! result, and records an audit event.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::audit::{AuditEventType, AuditRecord, AuditTracker};
use crate::error::{KeyhouseError, Result};
use crate::store::StateStore;
use crate::types::{QUORUM, SHARE_COUNT, ShareId, VaultState};
use crate::vault::{ledger, state};

pub const SERVICE_NAME: &str = "KeyHouse";

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub service: &'static str,
    pub version: &'static str,
    pub state: VaultState,
    pub active_count: usize,
    pub quorum: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub state: VaultState,
    pub message: String,
    /// Freshly generated ids; empty unless this call generated them.
    pub share_ids: Vec<ShareId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
    pub state: VaultState,
    pub message: String,
}

pub struct Keyhouse {
    store: Arc<dyn StateStore>,
    audit: AuditTracker,
}

impl Keyhouse {
    pub fn new(store: Arc<dyn StateStore>, audit_capacity: usize) -> Self {
        Self {
            store,
            audit: AuditTracker::new(audit_capacity),
        }
    }

    pub fn audit(&self) -> &AuditTracker {
        &self.audit
    }

    /// Vault state with activation progress. Pure read.
    pub async fn status(&self) -> Result<StatusReport> {
        let (state, active_count) = ledger::progress(self.store.as_ref())
            .await
            .inspect_err(|e| report_failure("status", e))?;
        Ok(StatusReport {
            service: SERVICE_NAME,
            version: env!("CARGO_PKG_VERSION"),
            state,
            active_count,
            quorum: QUORUM,
            timestamp: Utc::now(),
        })
    }

    /// Generate shares if the vault is sealed, otherwise report progress.
    pub async fn initialize(&self) -> Result<InitReport> {
        self.initialize_inner()
            .await
            .inspect_err(|e| report_failure("initialize", e))
    }

    async fn initialize_inner(&self) -> Result<InitReport> {
        let store = self.store.as_ref();
        // A concurrent initializer may win the Sealed -> Locked race between
        // our read and our generate; re-read once and report what it did.
        for _ in 0..2 {
            let (vault_state, active_count) = ledger::progress(store).await?;
            match vault_state {
                VaultState::Unlocked => {
                    return Ok(InitReport {
                        state: VaultState::Unlocked,
                        message: "vault is initialized and ready".to_string(),
                        share_ids: Vec::new(),
                    });
                }
                VaultState::Locked => {
                    let needed = QUORUM.saturating_sub(active_count);
                    return Ok(InitReport {
                        state: VaultState::Locked,
                        message: format!(
                            "vault is locked. need {needed} more keyholders to activate keyhouse"
                        ),
                        share_ids: Vec::new(),
                    });
                }
                VaultState::Sealed => match ledger::generate_shares(store).await {
                    Ok(share_ids) => {
                        self.audit.log(AuditRecord::new(
                            AuditEventType::SharesGenerated,
                            format!("generated {SHARE_COUNT} key shares, quorum {QUORUM}"),
                        ));
                        return Ok(InitReport {
                            state: VaultState::Locked,
                            message: "vault is initialized. please distribute generated keys \
                                      to different individuals over private channels"
                                .to_string(),
                            share_ids,
                        });
                    }
                    Err(KeyhouseError::InvalidStateTransition { .. }) => continue,
                    Err(e) => return Err(e),
                },
            }
        }
        Err(KeyhouseError::inconsistent(
            "vault left Sealed but was reported Sealed again",
        ))
    }

    /// Activate one share by id.
    pub async fn activate(&self, share_id: &str) -> Result<ActivationReport> {
        let id = ShareId::new(share_id);
        let outcome = match ledger::activate_share(self.store.as_ref(), &id).await {
            Ok(outcome) => outcome,
            Err(KeyhouseError::UnknownShare) => {
                warn!(component = "keyhouse", share = %id.fingerprint(), "activation with unknown key rejected");
                self.audit.log(
                    AuditRecord::new(AuditEventType::ActivationRejected, "unknown key")
                        .with_fingerprint(id.fingerprint()),
                );
                return Err(KeyhouseError::UnknownShare);
            }
            Err(e) => {
                report_failure("activate", &e);
                return Err(e);
            }
        };

        if outcome.newly_activated {
            self.audit.log(
                AuditRecord::new(
                    AuditEventType::ShareActivated,
                    format!("{} of {QUORUM} required shares active", outcome.active_count),
                )
                .with_fingerprint(id.fingerprint()),
            );
        }
        if outcome.transitioned {
            self.audit.log(AuditRecord::new(
                AuditEventType::VaultUnlocked,
                format!("quorum of {QUORUM} reached"),
            ));
        }

        Ok(if outcome.unlocked {
            ActivationReport {
                state: VaultState::Unlocked,
                message: "vault is activated".to_string(),
            }
        } else {
            ActivationReport {
                state: VaultState::Locked,
                message: "key activated".to_string(),
            }
        })
    }

    /// Init code for the current sealed cycle.
    pub async fn request_init_code(&self) -> Result<String> {
        let init_code = state::request_init_code(self.store.as_ref())
            .await
            .inspect_err(|e| report_failure("request init code", e))?;
        if init_code.newly_issued {
            self.audit.log(AuditRecord::new(
                AuditEventType::InitCodeIssued,
                "init code issued for sealed vault",
            ));
        }
        Ok(init_code.code)
    }

    /// Log where the vault stands and what the operator needs to do next.
    pub async fn startup_checks(&self) -> Result<VaultState> {
        let (vault_state, active_count) = ledger::progress(self.store.as_ref()).await?;
        match vault_state {
            VaultState::Sealed => {
                let code = self.request_init_code().await?;
                info!(
                    component = "keyhouse",
                    code = %code,
                    "==> vault not initialized, initialize it with the following code"
                );
            }
            VaultState::Locked => {
                info!(
                    component = "keyhouse",
                    needed = QUORUM.saturating_sub(active_count),
                    "==> vault is locked, unlock it with a minimum of {QUORUM} activation keys"
                );
            }
            VaultState::Unlocked => {
                info!(component = "keyhouse", "vault is ready");
            }
        }
        Ok(vault_state)
    }
}

fn report_failure(operation: &str, err: &KeyhouseError) {
    match err {
        KeyhouseError::InternalInconsistency(_) => {
            error!(component = "keyhouse", operation, error = %err, "vault invariants violated");
        }
        KeyhouseError::StoreUnavailable(_) => {
            warn!(component = "keyhouse", operation, error = %err, "state store failure");
        }
        KeyhouseError::InvalidStateTransition { .. } | KeyhouseError::UnknownShare => {
            info!(component = "keyhouse", operation, error = %err, "request rejected");
        }
    }
}
