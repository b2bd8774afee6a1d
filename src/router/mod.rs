//! Provider selection.
//!
//! Requests name a provider in the path or fall back to the configured
//! default. Each provider carries its adapter and normalization policy.

mod registry;

pub use registry::{ProviderRegistry, SelectedProvider};
