pub use crate::{dummy_settlement, mem_cache, mem_storage, test_addr, SoloClicker, TestClient};
pub use dork_crypto::{EcdsaVerifier, Keypair};
