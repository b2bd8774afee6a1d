//! chatrelay - streaming relay for LLM chat completions
//!
//! This library keeps provider credentials server-side and presents one
//! streaming contract over several upstream wire formats.

pub mod config;
pub mod credentials;
pub mod error;
pub mod proxy;
pub mod router;

pub use config::Config;
pub use error::{Error, Result};
