//! EMR integration core.
//!
//! Stores provider credentials encrypted and deduplicated, talks to Mindbody,
//! Nextech and ModMed through one adapter contract, and pushes locally created
//! appointments into the practice's EMR as a best-effort side effect.

pub mod error;
pub mod models;
pub mod services;

pub use error::*;
pub use models::*;
pub use services::*;
