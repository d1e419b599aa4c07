//! Quorum ledger: the key share set and its activation counter.
//!
//! Quorum is plain counting. `QUORUM` distinct activated shares out of
//! `SHARE_COUNT` unlock the vault; nothing is reconstructed.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::error::{KeyhouseError, Result};
use crate::store::{StateStore, Transaction, keys};
use crate::types::{KeyShare, QUORUM, SHARE_COUNT, ShareId, VaultState};
use crate::vault::state::{self, parse_state};
use crate::vault::{MAX_TXN_ATTEMPTS, contention};

const ACTIVE: &str = "true";
const INACTIVE: &str = "false";

/// Result of a successful `activate_share`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationOutcome {
    /// Vault is `Unlocked` after this call.
    pub unlocked: bool,
    /// This call flipped the share from inactive to active.
    pub newly_activated: bool,
    /// This call moved the vault from `Locked` to `Unlocked`.
    pub transitioned: bool,
    pub active_count: usize,
}

/// Point-in-time view of every ledger key, with the raw values kept so
/// the follow-up transaction can guard on exactly what was read.
struct Snapshot {
    state: VaultState,
    raw_count: Option<String>,
    active_count: usize,
    shares: Vec<(String, KeyShare)>,
}

impl Snapshot {
    async fn read(store: &dyn StateStore) -> Result<Self> {
        let share_keys = store.list_keys_with_prefix(keys::SHARE_PREFIX).await?;

        let mut wanted: Vec<&str> = vec![keys::VAULT_STATE, keys::ACTIVE_COUNT];
        wanted.extend(share_keys.iter().map(String::as_str));
        let values = store.get_many(&wanted).await?;

        let state = match values[0].as_deref() {
            Some(raw) => parse_state(raw)?,
            None => state::get_state(store).await?,
        };
        let raw_count = values[1].clone();
        let active_count = match raw_count.as_deref() {
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                KeyhouseError::inconsistent(format!("activation counter holds {raw:?}"))
            })?,
            None => 0,
        };

        let mut shares = Vec::with_capacity(share_keys.len());
        for (key, value) in share_keys.iter().zip(&values[2..]) {
            // Deleted between listing and reading; only possible for stale shares.
            let Some(value) = value else { continue };
            let activated = match value.as_str() {
                ACTIVE => true,
                INACTIVE => false,
                other => {
                    return Err(KeyhouseError::inconsistent(format!(
                        "share flag holds {other:?}"
                    )));
                }
            };
            let id = keys::share_id(key)
                .ok_or_else(|| KeyhouseError::inconsistent("share key outside share namespace"))?;
            shares.push((key.clone(), KeyShare { id, activated }));
        }

        Ok(Self {
            state,
            raw_count,
            active_count,
            shares,
        })
    }

    /// Invariants that must hold once shares exist.
    fn check_distributed(&self) -> Result<()> {
        if self.shares.len() != SHARE_COUNT {
            return Err(KeyhouseError::inconsistent(format!(
                "vault is {} with {} shares, expected {SHARE_COUNT}",
                self.state,
                self.shares.len()
            )));
        }
        let activated = self.shares.iter().filter(|(_, s)| s.activated).count();
        if activated != self.active_count {
            return Err(KeyhouseError::inconsistent(format!(
                "activation counter {} disagrees with {activated} active shares",
                self.active_count
            )));
        }
        Ok(())
    }

    /// Base transaction guarding the state and counter this snapshot saw.
    fn guarded(&self) -> Transaction {
        Transaction::new()
            .expect(keys::VAULT_STATE, Some(self.state.as_str()))
            .expect(keys::ACTIVE_COUNT, self.raw_count.as_deref())
    }
}

/// Replace any stale shares with `SHARE_COUNT` fresh ones, reset the
/// counter, retire the init code and move the vault to `Locked`.
///
/// Only permitted while `Sealed`. The returned ids are the secrets to hand
/// to individual keyholders; they are never logged.
pub async fn generate_shares(store: &dyn StateStore) -> Result<Vec<ShareId>> {
    for _ in 0..MAX_TXN_ATTEMPTS {
        let snapshot = Snapshot::read(store).await?;
        if snapshot.state != VaultState::Sealed {
            return Err(KeyhouseError::invalid_transition(
                "generate key shares",
                snapshot.state,
            ));
        }

        let mut txn = snapshot.guarded();
        for (key, stale) in &snapshot.shares {
            let flag = if stale.activated { ACTIVE } else { INACTIVE };
            txn = txn.expect(key, Some(flag)).delete(key);
        }

        let ids: Vec<ShareId> = (0..SHARE_COUNT).map(|_| ShareId::generate()).collect();
        for id in &ids {
            let key = keys::share(id);
            txn = txn.expect(&key, None).set(&key, INACTIVE);
        }
        txn = txn
            .set(keys::ACTIVE_COUNT, "0")
            .delete(keys::INIT_CODE)
            .set(keys::VAULT_STATE, VaultState::Locked.as_str());

        if store.commit(txn).await? {
            info!(
                component = "ledger",
                shares = SHARE_COUNT,
                quorum = QUORUM,
                stale_cleared = snapshot.shares.len(),
                "new key shares generated"
            );
            return Ok(ids);
        }
        debug!(component = "ledger", "share generation raced a concurrent writer, retrying");
        tokio::task::yield_now().await;
    }
    Err(contention("generate key shares"))
}

/// Mark one share active and count it, unlocking the vault when the
/// counter reaches `QUORUM`.
///
/// Re-activating an active share is a no-op. Once the vault is `Unlocked`
/// the state never changes again, though a first activation of a remaining
/// share is still recorded so the counter matches the share set.
pub async fn activate_share(store: &dyn StateStore, id: &ShareId) -> Result<ActivationOutcome> {
    let share_key = keys::share(id);
    for _ in 0..MAX_TXN_ATTEMPTS {
        let snapshot = Snapshot::read(store).await?;
        if snapshot.state == VaultState::Sealed {
            return Err(KeyhouseError::invalid_transition(
                "activate a key share",
                snapshot.state,
            ));
        }
        snapshot.check_distributed()?;

        let share = snapshot
            .shares
            .iter()
            .find(|(key, _)| *key == share_key)
            .map(|(_, share)| share)
            .ok_or(KeyhouseError::UnknownShare)?;

        if share.activated {
            debug!(component = "ledger", share = %id.fingerprint(), "share already active");
            return Ok(ActivationOutcome {
                unlocked: snapshot.state == VaultState::Unlocked,
                newly_activated: false,
                transitioned: false,
                active_count: snapshot.active_count,
            });
        }

        let active_count = snapshot.active_count + 1;
        let transitioned = snapshot.state == VaultState::Locked && active_count >= QUORUM;

        let mut txn = snapshot
            .guarded()
            .expect(&share_key, Some(INACTIVE))
            .set(&share_key, ACTIVE)
            .set(keys::ACTIVE_COUNT, active_count.to_string());
        if transitioned {
            txn = txn.set(keys::VAULT_STATE, VaultState::Unlocked.as_str());
        }

        if store.commit(txn).await? {
            info!(component = "ledger", share = %id.fingerprint(), active_count, "key share activated");
            if transitioned {
                info!(component = "ledger", active_count, quorum = QUORUM, "vault unlocked");
            }
            return Ok(ActivationOutcome {
                unlocked: transitioned || snapshot.state == VaultState::Unlocked,
                newly_activated: true,
                transitioned,
                active_count,
            });
        }
        debug!(component = "ledger", "activation raced a concurrent writer, retrying");
        tokio::task::yield_now().await;
    }
    Err(contention("activate a key share"))
}

/// Vault state and activation counter read together.
/// Fails with `InternalInconsistency` rather than report a counter that
/// disagrees with the share flags.
pub async fn progress(store: &dyn StateStore) -> Result<(VaultState, usize)> {
    let snapshot = Snapshot::read(store).await?;
    if snapshot.state != VaultState::Sealed {
        snapshot.check_distributed()?;
    }
    Ok((snapshot.state, snapshot.active_count))
}

pub async fn active_count(store: &dyn StateStore) -> Result<usize> {
    Ok(progress(store).await?.1)
}

pub fn quorum() -> usize {
    QUORUM
}

pub fn share_count() -> usize {
    SHARE_COUNT
}

/// Ids of the current share set; empty while `Sealed`.
pub async fn list_share_ids(store: &dyn StateStore) -> Result<BTreeSet<ShareId>> {
    Ok(shares(store)
        .await?
        .into_iter()
        .map(|share| share.id)
        .collect())
}

/// Current share set with activation flags; empty while `Sealed`.
pub async fn shares(store: &dyn StateStore) -> Result<Vec<KeyShare>> {
    let snapshot = Snapshot::read(store).await?;
    if snapshot.state == VaultState::Sealed {
        return Ok(Vec::new());
    }
    snapshot.check_distributed()?;
    Ok(snapshot.shares.into_iter().map(|(_, share)| share).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateStore;

    async fn locked_store() -> (MemoryStateStore, Vec<ShareId>) {
        let store = MemoryStateStore::new();
        let ids = generate_shares(&store).await.unwrap();
        (store, ids)
    }

    #[tokio::test]
    async fn generation_creates_a_full_inactive_set() {
        let (store, ids) = locked_store().await;
        assert_eq!(ids.len(), SHARE_COUNT);
        assert_eq!(
            ids.iter().collect::<BTreeSet<_>>().len(),
            SHARE_COUNT,
            "ids must be distinct"
        );
        assert_eq!(state::get_state(&store).await.unwrap(), VaultState::Locked);
        assert_eq!(active_count(&store).await.unwrap(), 0);
        assert!(shares(&store).await.unwrap().iter().all(|s| !s.activated));
        assert_eq!(
            list_share_ids(&store).await.unwrap(),
            ids.into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[tokio::test]
    async fn generation_clears_stale_shares_and_init_code() {
        let store = MemoryStateStore::new();
        state::initialize(&store).await.unwrap();
        store.set("share:left-over", "true").await.unwrap();
        state::request_init_code(&store).await.unwrap();

        let ids = generate_shares(&store).await.unwrap();
        assert!(store.get("share:left-over").await.unwrap().is_none());
        assert!(store.get(keys::INIT_CODE).await.unwrap().is_none());
        assert_eq!(list_share_ids(&store).await.unwrap().len(), ids.len());
    }

    #[tokio::test]
    async fn sealed_vault_lists_no_shares() {
        let store = MemoryStateStore::new();
        assert!(list_share_ids(&store).await.unwrap().is_empty());
        assert_eq!(active_count(&store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn activation_while_sealed_is_rejected() {
        let store = MemoryStateStore::new();
        let err = activate_share(&store, &ShareId::new("anything"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KeyhouseError::InvalidStateTransition {
                state: VaultState::Sealed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn quorum_transition_is_reported_once() {
        let (store, ids) = locked_store().await;
        let mut transitions = 0;
        for id in &ids {
            let outcome = activate_share(&store, id).await.unwrap();
            if outcome.transitioned {
                transitions += 1;
                assert_eq!(outcome.active_count, QUORUM);
            }
        }
        assert_eq!(transitions, 1);
        assert_eq!(active_count(&store).await.unwrap(), SHARE_COUNT);
    }

    #[tokio::test]
    async fn diverged_counter_is_detected() {
        let (store, ids) = locked_store().await;
        store.set(keys::ACTIVE_COUNT, "2").await.unwrap();
        assert!(matches!(
            activate_share(&store, &ids[0]).await,
            Err(KeyhouseError::InternalInconsistency(_))
        ));
    }

    #[tokio::test]
    async fn diverged_counter_is_never_reported() {
        let (store, _) = locked_store().await;
        store.set(keys::ACTIVE_COUNT, "2").await.unwrap();
        assert!(matches!(
            progress(&store).await,
            Err(KeyhouseError::InternalInconsistency(_))
        ));
        assert!(matches!(
            active_count(&store).await,
            Err(KeyhouseError::InternalInconsistency(_))
        ));
    }

    #[test]
    fn constants_match_the_quorum_rule() {
        assert_eq!(quorum(), 3);
        assert_eq!(share_count(), 5);
    }
}
