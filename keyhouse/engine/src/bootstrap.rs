use std::sync::Arc;

use tracing::{info, warn};

use crate::config::KeyhouseConfig;
use crate::error::{KeyhouseError, Result, StoreError};
use crate::lifecycle::Keyhouse;
use crate::store::StateStore;
use crate::vault::state;

/// Opens the configured store, waits for it to answer, seals the vault on
/// first use and runs the startup checks.
pub async fn bootstrap(config: &KeyhouseConfig) -> Result<Keyhouse> {
    let store = config.store.backend.open()?;
    info!(component = "bootstrap", store = %config.store.backend.describe(), "state store opened");
    init_store(store, config).await
}

/// Bootstrap against an already-constructed store.
pub async fn init_store(store: Arc<dyn StateStore>, config: &KeyhouseConfig) -> Result<Keyhouse> {
    wait_for_store(store.as_ref(), config).await?;
    state::initialize(store.as_ref()).await?;

    let keyhouse = Keyhouse::new(store, config.audit_capacity);
    keyhouse.startup_checks().await?;
    Ok(keyhouse)
}

/// Ping with a fixed backoff until the store answers or the retry budget
/// runs out.
pub async fn wait_for_store(store: &dyn StateStore, config: &KeyhouseConfig) -> Result<()> {
    let attempts = config.store.connect_retries.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match store.ping().await {
            Ok(()) => {
                info!(component = "bootstrap", attempt, "state store reachable");
                return Ok(());
            }
            Err(e) => {
                warn!(component = "bootstrap", attempt, attempts, error = %e, "state store ping failed");
                last_error = Some(e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(config.store.connect_backoff).await;
        }
    }
    let reason = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no ping attempted".to_string());
    Err(KeyhouseError::StoreUnavailable(StoreError::Unavailable(
        format!("state store unreachable after {attempts} attempts: {reason}"),
    )))
}
