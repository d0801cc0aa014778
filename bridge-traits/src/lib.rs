//! # Host Bridge Traits
//!
//! Capability traits the publisher core needs from its host.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Async HTTP with retry, backoff and throttling protection
//! - [`CredentialCache`](storage::CredentialCache) - Persistence for the token cache document
//! - [`VerificationPrompt`](prompt::VerificationPrompt) - Shows the device-code challenge to the operator
//! - [`Clock`](time::Clock) - Time source for deterministic expiry checks
//!
//! ## Implementations
//!
//! | Host    | Implementation Crate |
//! |---------|----------------------|
//! | Desktop | `bridge-desktop`     |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). HTTP status
//! codes are *not* errors at this layer; callers interpret them.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single instance can be shared
//! by every upload worker.

pub mod error;
pub mod http;
pub mod prompt;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use prompt::{DeviceChallenge, VerificationPrompt};
pub use storage::CredentialCache;
pub use time::{Clock, LogLevel, SystemClock};
