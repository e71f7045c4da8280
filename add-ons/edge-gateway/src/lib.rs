//! EDGE gateway: the completion endpoint the voice front end talks to.
//!
//! Prepends the system turn, keeps the last 12 client turns, and asks the upstream inference
//! service through the v1 chat protocol, falling back to legacy text generation.

pub mod config;
pub mod error;
pub mod routes;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use routes::{router, AppState, ChatRequest, ChatResponse};
