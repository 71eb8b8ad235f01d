pub mod cache;
pub mod elo;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod settlement;
pub mod storage;
pub mod transcript;
pub mod types;
pub mod verifier;

pub use error::{Error, Result};
