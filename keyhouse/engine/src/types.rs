//! Shared data types for the keyhouse: vault states, share ids and key shares.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of key shares generated per cycle (M).
pub const SHARE_COUNT: usize = 5;
/// Distinct activations required to unlock the vault (K).
pub const QUORUM: usize = 3;

/// Lifecycle state of the vault. Stored as its lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultState {
    /// No key shares exist yet.
    Sealed,
    /// Shares exist, quorum not yet met.
    Locked,
    /// Quorum met. Terminal.
    Unlocked,
}

impl VaultState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VaultState::Sealed => "sealed",
            VaultState::Locked => "locked",
            VaultState::Unlocked => "unlocked",
        }
    }
}

impl fmt::Display for VaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VaultState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sealed" => Ok(VaultState::Sealed),
            "locked" => Ok(VaultState::Locked),
            "unlocked" => Ok(VaultState::Unlocked),
            other => Err(format!("unrecognised vault state {other:?}")),
        }
    }
}

/// Opaque identifier handed to a single keyholder.
///
/// `Debug` is redacted so ids cannot leak through `{:?}` in log lines;
/// use [`ShareId::as_str`] or `Display` when the id must be shown.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShareId(String);

impl ShareId {
    pub fn new(id: impl Into<String>) -> Self {
        ShareId(id.into())
    }

    /// Fresh globally-unique id.
    pub fn generate() -> Self {
        ShareId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short blake3 digest, safe to log or audit in place of the id.
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(self.0.as_bytes());
        hash.to_hex()[..12].to_string()
    }
}

impl fmt::Debug for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShareId({})", self.fingerprint())
    }
}

impl fmt::Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of the quorum and its activation flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShare {
    pub id: ShareId,
    pub activated: bool,
}

/// One-time operator token for the current sealed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitCode {
    pub code: String,
    /// True when this request created the code.
    pub newly_issued: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_state_parses_its_own_names() {
        for state in [VaultState::Sealed, VaultState::Locked, VaultState::Unlocked] {
            assert_eq!(state.as_str().parse::<VaultState>(), Ok(state));
        }
        assert!("ready".parse::<VaultState>().is_err());
    }

    #[test]
    fn share_id_debug_hides_the_secret() {
        let id = ShareId::new("0b6c3c55-61c2-4d5b-9a3f-2f3a4a0f8d11");
        let debug = format!("{id:?}");
        assert!(!debug.contains(id.as_str()));
        assert!(debug.contains(&id.fingerprint()));
        assert_eq!(id.to_string(), id.as_str());
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = ShareId::generate();
        let b = ShareId::generate();
        assert_ne!(a, b);
    }
}
