//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux):
//! - `HttpClient` using `reqwest`, with jittered exponential backoff and a
//!   throttling circuit breaker
//! - `CredentialCache` as an owner-only JSON file under the config directory
//! - `VerificationPrompt` writing the device-code challenge to stderr
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ConsolePrompt, FileCredentialCache, ReqwestHttpClient};
//!
//! let http = ReqwestHttpClient::new();
//! let cache = FileCredentialCache::default_location()?;
//! let prompt = ConsolePrompt::new();
//! ```

mod cache;
mod circuit;
mod http;
mod prompt;

pub use cache::FileCredentialCache;
pub use circuit::{CircuitBreaker, CircuitState};
pub use http::ReqwestHttpClient;
pub use prompt::ConsolePrompt;
