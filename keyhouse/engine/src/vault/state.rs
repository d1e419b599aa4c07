//! Vault state machine: the single stored `VaultState` plus the init code
//! that accompanies the `Sealed` state.

use tracing::{debug, info};

use crate::error::{KeyhouseError, Result};
use crate::store::{StateStore, Transaction, keys};
use crate::types::{InitCode, VaultState};
use crate::vault::{MAX_TXN_ATTEMPTS, contention};

/// Parse a raw stored state. Unrecognised values are a bug, never guessed.
pub(crate) fn parse_state(raw: &str) -> Result<VaultState> {
    raw.parse().map_err(KeyhouseError::inconsistent)
}

/// Write the initial `Sealed` state and a zero activation counter, unless a
/// state already exists. Returns `true` if this call performed the write.
pub async fn initialize(store: &dyn StateStore) -> Result<bool> {
    let txn = Transaction::new()
        .expect(keys::VAULT_STATE, None)
        .set(keys::VAULT_STATE, VaultState::Sealed.as_str())
        .set(keys::ACTIVE_COUNT, "0");
    let created = store.commit(txn).await?;
    if created {
        info!(component = "vault-state", state = %VaultState::Sealed, "vault state initialized");
    } else {
        debug!(component = "vault-state", "vault state already initialized");
    }
    Ok(created)
}

/// Current vault state. Initializes the store on first use.
pub async fn get_state(store: &dyn StateStore) -> Result<VaultState> {
    if let Some(raw) = store.get(keys::VAULT_STATE).await? {
        return parse_state(&raw);
    }
    initialize(store).await?;
    match store.get(keys::VAULT_STATE).await? {
        Some(raw) => parse_state(&raw),
        None => Err(KeyhouseError::inconsistent(
            "vault state missing immediately after initialization",
        )),
    }
}

/// Unconditional overwrite. Only the ledger's guarded transitions should
/// need this; it exists for operator tooling and tests.
pub async fn set_state(store: &dyn StateStore, next: VaultState) -> Result<()> {
    store.set(keys::VAULT_STATE, next.as_str()).await?;
    info!(component = "vault-state", state = %next, "vault state overwritten");
    Ok(())
}

/// Return the init code for the current sealed cycle, creating it on the
/// first request. Fails outside `Sealed`: the code's scope ends once shares
/// are generated.
pub async fn request_init_code(store: &dyn StateStore) -> Result<InitCode> {
    for _ in 0..MAX_TXN_ATTEMPTS {
        let values = store
            .get_many(&[keys::VAULT_STATE, keys::INIT_CODE])
            .await?;
        let state = match values[0].as_deref() {
            Some(raw) => parse_state(raw)?,
            None => {
                initialize(store).await?;
                continue;
            }
        };
        if state != VaultState::Sealed {
            return Err(KeyhouseError::invalid_transition("issue an init code", state));
        }
        if let Some(code) = &values[1] {
            debug!(component = "vault-state", "fetched existing init code");
            return Ok(InitCode {
                code: code.clone(),
                newly_issued: false,
            });
        }

        let code = uuid::Uuid::new_v4().to_string();
        let txn = Transaction::new()
            .expect(keys::VAULT_STATE, Some(VaultState::Sealed.as_str()))
            .expect(keys::INIT_CODE, None)
            .set(keys::INIT_CODE, code.clone());
        if store.commit(txn).await? {
            info!(component = "vault-state", "init code issued");
            return Ok(InitCode {
                code,
                newly_issued: true,
            });
        }
        tokio::task::yield_now().await;
    }
    Err(contention("issue an init code"))
}
