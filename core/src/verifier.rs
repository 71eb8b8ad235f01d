//! Signature authentication contract.
//!
//! Players sign a fixed message binding their address and a timestamp.
//! The verifier checks the signature against the player's registered
//! public key; freshness is checked by the caller against its own clock.

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const AUTH_SKEW_MS: u64 = 5 * 60 * 1000;

/// The exact message clients sign for REST calls and session HELLOs.
pub fn auth_message(player: &str, timestamp: u64) -> String {
    format!("dork.fun authentication for {} at {}", player, timestamp)
}

/// Whether `timestamp` is within the allowed skew of `now`.
pub fn is_fresh(timestamp: u64, now: u64, skew_ms: u64) -> bool {
    now.abs_diff(timestamp) <= skew_ms
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthProof {
    pub player_id: String,
    /// Base64 signature over [`auth_message`].
    pub signature: String,
    pub timestamp: u64,
}

pub trait VerifierT: Send + Sync {
    /// Publish the verifying key for a player.  Replaces any previous key.
    fn register_key(&self, player: &str, public_key_pem: &str) -> Result<()>;

    /// Verify `signature_b64` over `message` for `player`.
    fn verify(&self, player: &str, message: &[u8], signature_b64: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_message_format() {
        assert_eq!(
            auth_message("0xabc", 1700000000000),
            "dork.fun authentication for 0xabc at 1700000000000"
        );
    }

    #[test]
    fn test_freshness_window() {
        assert!(is_fresh(1000, 1000, AUTH_SKEW_MS));
        assert!(is_fresh(1000, 1000 + AUTH_SKEW_MS, AUTH_SKEW_MS));
        assert!(!is_fresh(1000, 1001 + AUTH_SKEW_MS, AUTH_SKEW_MS));
        // clients slightly ahead of the server are fine too
        assert!(is_fresh(2000 + AUTH_SKEW_MS, 2000, AUTH_SKEW_MS));
    }
}
