//! # Authentication Module
//!
//! Credential lifecycle for a single repository connection.
//!
//! ## Overview
//!
//! This crate signs the operator in with the OAuth 2.0 device authorization
//! grant (or the client-credentials grant for application auth), keeps the
//! resulting session in a persistent token cache, and renews it silently
//! before it expires. Consumers depend only on [`AccessTokenProvider`].
//!
//! ## Features
//!
//! - Device-code flow with `slow_down`, decline and expiry handling
//! - Single-flight silent refresh and single-flight device sign-in
//! - Token cache keyed by tenant and account
//! - Forced renewal after a 401 from the remote service

pub mod device;
pub mod error;
pub mod manager;
pub mod provider;
pub mod token_store;
pub mod types;

pub use device::{account_from_id_token, DeviceCodeGrant, IdentityClient, TokenSet};
pub use error::{AuthError, Result};
pub use manager::{AuthSessionManager, AuthSettings};
pub use provider::AccessTokenProvider;
pub use token_store::TokenCache;
pub use types::{AccountInfo, AuthSession, AuthState, AuthStatus};
