pub mod codec;
pub mod orchestrator;
pub mod providers;
pub mod token_cache;
pub mod vault;

pub use codec::SecretCodec;
pub use orchestrator::{EmrBookingOrchestrator, SyncSummary};
pub use providers::{AdapterRegistry, EmrAdapter, MindbodyAdapter, ModMedAdapter, NextechAdapter};
pub use token_cache::{InMemoryTokenCache, TokenCache};
pub use vault::CredentialVault;
