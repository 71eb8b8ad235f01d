//! Helpers shared by the test suites.

pub mod prelude;
mod solo;

use std::collections::HashMap;
use std::sync::Arc;

use dork_core::cache::MemoryCache;
use dork_core::verifier::VerifierT;
use dork_crypto::{EcdsaVerifier, Keypair};
use dork_local_db::LocalDbStorage;
use dork_settlement::DummySettlement;

pub use solo::SoloClicker;

/// A deterministic-looking test address: `0x` + the digit repeated.
pub fn test_addr(c: char) -> String {
    format!("0x{}", c.to_string().repeat(40))
}

/// A signing client with its key registered in the given verifier.
pub struct TestClient {
    pub addr: String,
    pub keypair: Keypair,
}

impl TestClient {
    pub fn register(verifier: &EcdsaVerifier) -> Self {
        let keypair = Keypair::generate().expect("keygen");
        let addr = keypair.address().expect("address");
        verifier
            .register_key(&addr, &keypair.public_key_pem().expect("pem"))
            .expect("register");
        Self { addr, keypair }
    }

    pub fn sign_auth(&self, timestamp: u64) -> String {
        let message = dork_core::verifier::auth_message(&self.addr, timestamp);
        self.keypair.sign(message.as_bytes()).expect("sign")
    }
}

pub fn mem_storage() -> Arc<LocalDbStorage> {
    Arc::new(LocalDbStorage::try_new_mem().expect("in-memory db"))
}

pub fn mem_cache() -> Arc<MemoryCache> {
    Arc::new(MemoryCache::new())
}

pub fn dummy_settlement(min_stake: &str) -> Arc<DummySettlement> {
    let mut game_ids = HashMap::new();
    game_ids.insert(
        "tictactoe".to_string(),
        format!("0x{:0<64}", hex::encode("tictactoe")),
    );
    game_ids.insert(
        "clicker".to_string(),
        format!("0x{:0<64}", hex::encode("clicker")),
    );
    Arc::new(DummySettlement::new(
        "0x00000000000000000000000000000000000000ee",
        min_stake,
        game_ids,
    ))
}
