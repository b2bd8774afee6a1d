//! HTTP relay module.
//!
//! Accepts chat-completion requests, opens a stream against the selected
//! provider and relays its output to the client as it arrives.

pub mod adapter;
mod handlers;
pub mod normalize;
pub mod relay;
mod server;
pub mod stream;
pub mod types;

pub use adapter::{Framing, OpenedStream, ProviderAdapter, UpstreamUnit};
pub use relay::{ClientFrame, Relay, RelayState};
pub use server::{
    build_http_client, create_router, run_server, AppState, RequestId, REQUEST_ID_HEADER,
};
pub use types::{ChatCompletionRequest, Message, UpstreamPayload};
