//! Workspace umbrella crate.
//!
//! Exposes the feature flags that map to the individual workspace crates so a
//! host application can depend on `docpub-workspace` alone. `desktop-shims`
//! pulls in the full publisher façade with the desktop bridges; `publish-only`
//! exposes just the batch orchestration types for hosts that bring their own
//! uploader.

#[cfg(feature = "desktop-shims")]
pub use core_service as service;

#[cfg(feature = "publish-only")]
pub use core_publish as publish;
