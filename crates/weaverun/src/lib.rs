//! # Weaverun
//!
//! Runtime for the applet sandbox bridge: a trusted host embedding untrusted
//! applet bundles in isolated guest contexts, reachable only by message.
//!
//! - `transport`: mailboxes and ports; one private reply channel per call.
//! - `shim`: the capability object guest code holds (`WeaveClient`).
//! - `router`: the single trusted dispatcher for guest envelopes.
//! - `registry`: live contexts and the identity-scoped config cache.
//! - `fallback`: peer-host discovery and call cascading.
//! - `host`: the facade that wires the above together.

pub mod clipboard;
pub mod config;
pub mod fallback;
pub mod guest;
pub mod host;
pub mod registry;
pub mod router;
pub mod services;
pub mod shim;
pub mod storage;
pub mod telemetry;
pub mod transport;

pub use config::BridgeConfig;
pub use fallback::PeerHostNetwork;
pub use fallback::PeerHostSelector;
pub use guest::AppletBundle;
pub use host::GuestContext;
pub use host::Host;
pub use host::HostBuilder;
pub use services::HostServices;
pub use shim::SearchOutcome;
pub use shim::WeaveClient;

#[cfg(test)]
mod tests;
