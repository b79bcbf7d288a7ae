//! # Peer-Host Fallback
//!
//! Completes a remote call when the service behind it is replicated across
//! several peer-run hosts, any of which may be gone.
//!
//! ## Algorithm
//!
//! 1. Discover the candidate hosts registered for the operation.
//! 2. Ping every candidate concurrently, each bounded by `ping_timeout`.
//!    The hosts that answered, in the order they answered, are the
//!    available hosts for this call.
//! 3. Call the available hosts one at a time, first responder first,
//!    until one succeeds.
//! 4. If none succeeds, fail with every attempt listed.
//!
//! ## Invariants
//!
//! - Availability is never cached. Every call pings again.
//! - The ping phase takes at most one `ping_timeout`, whatever the number of hosts.
//! - A host that did not answer its ping is never called.
//! - Call attempts are sequential; at most one host sees the call at a time.

use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use weaverpc::RemoteOperation;

/// Strong type for a peer host's network identity.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PeerHostId(pub String);

impl std::fmt::Display for PeerHostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The network the selector probes and calls through.
///
/// Errors are plain messages; the selector only aggregates them.
#[async_trait::async_trait]
pub trait PeerHostNetwork: Send + Sync + 'static {
    /// Lists the hosts currently registered for `operation`.
    async fn discover(&self, operation: &RemoteOperation) -> std::result::Result<Vec<PeerHostId>, String>;

    /// Checks that `host` is reachable.
    async fn ping(&self, host: &PeerHostId) -> std::result::Result<(), String>;

    /// Runs `operation` on `host`.
    async fn call(&self, host: &PeerHostId, operation: &RemoteOperation, payload: &Value) -> std::result::Result<Value, String>;
}

/// Result of pinging one host in the current round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerHostRecord {
    pub host: PeerHostId,
    pub last_ping: SystemTime,
    pub responded: bool,
}

/// One failed call attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attempt {
    pub host: PeerHostId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackError {
    /// Discovery itself failed.
    Discovery { operation: RemoteOperation, error: String },
    /// Discovery returned no candidates.
    NoHosts { operation: RemoteOperation },
    /// No candidate answered its ping in time.
    NoneAvailable { operation: RemoteOperation, pinged: usize },
    /// Every available host was called and every call failed.
    Exhausted { operation: RemoteOperation, attempts: Vec<Attempt> },
}

impl std::fmt::Display for FallbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovery { operation, error } => {
                write!(f, "Failed to discover peer hosts for {}: {}", operation, error)
            }
            Self::NoHosts { operation } => {
                write!(f, "No peer hosts registered for {}: 0 successful attempts", operation)
            }
            Self::NoneAvailable { operation, pinged } => write!(
                f,
                "None of {} peer hosts for {} answered ping: 0 successful attempts",
                pinged, operation
            ),
            Self::Exhausted { operation, attempts } => {
                write!(
                    f,
                    "All {} available peer hosts failed {}: 0 successful attempts",
                    attempts.len(),
                    operation
                )?;
                for attempt in attempts {
                    write!(f, "; {}: {}", attempt.host, attempt.error)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for FallbackError {}

pub type Result<T> = std::result::Result<T, FallbackError>;

/// Finds a reachable peer host and completes a remote call on it.
#[derive(Clone)]
pub struct PeerHostSelector {
    network: Arc<dyn PeerHostNetwork>,
    ping_timeout: Duration,
}

impl PeerHostSelector {
    pub fn new(network: Arc<dyn PeerHostNetwork>, ping_timeout: Duration) -> Self {
        Self { network, ping_timeout }
    }

    pub fn ping_timeout(&self) -> Duration {
        self.ping_timeout
    }

    /// Discovers and pings the hosts for `operation`.
    ///
    /// Returns one record per candidate: responders first, in the order they
    /// answered, then the hosts that failed or timed out.
    pub async fn available_hosts(&self, operation: &RemoteOperation) -> Result<Vec<PeerHostRecord>> {
        let hosts = self
            .network
            .discover(operation)
            .await
            .map_err(|error| FallbackError::Discovery {
                operation: operation.clone(),
                error,
            })?;

        debug!(%operation, candidates = hosts.len(), "pinging peer hosts");

        let mut pings: FuturesUnordered<_> = hosts
            .into_iter()
            .map(|host| {
                let network = self.network.clone();
                let ping_timeout = self.ping_timeout;
                async move {
                    let outcome = tokio::time::timeout(ping_timeout, network.ping(&host)).await;
                    let responded = match outcome {
                        Ok(Ok(())) => true,
                        Ok(Err(e)) => {
                            debug!(%host, error = %e, "peer host ping failed");
                            false
                        }
                        Err(_) => {
                            debug!(%host, "peer host ping timed out");
                            false
                        }
                    };
                    PeerHostRecord {
                        host,
                        last_ping: SystemTime::now(),
                        responded,
                    }
                }
            })
            .collect();

        let mut responders = Vec::new();
        let mut silent = Vec::new();
        while let Some(record) = pings.next().await {
            if record.responded {
                responders.push(record);
            } else {
                silent.push(record);
            }
        }

        responders.extend(silent);
        Ok(responders)
    }

    /// Runs `operation` on the first available host that completes it.
    pub async fn remote_call_cascade_to_available_hosts(
        &self,
        operation: &RemoteOperation,
        payload: &Value,
    ) -> Result<Value> {
        let records = self.available_hosts(operation).await?;
        if records.is_empty() {
            warn!(%operation, "no peer hosts registered");
            return Err(FallbackError::NoHosts {
                operation: operation.clone(),
            });
        }

        let pinged = records.len();
        let available: Vec<PeerHostId> = records
            .into_iter()
            .filter(|record| record.responded)
            .map(|record| record.host)
            .collect();

        if available.is_empty() {
            warn!(%operation, pinged, "no peer host answered ping");
            return Err(FallbackError::NoneAvailable {
                operation: operation.clone(),
                pinged,
            });
        }

        let mut attempts = Vec::new();
        for host in available {
            match self.network.call(&host, operation, payload).await {
                Ok(value) => {
                    debug!(%operation, %host, failed_before = attempts.len(), "peer host call succeeded");
                    return Ok(value);
                }
                Err(error) => {
                    warn!(%operation, %host, %error, "peer host call failed, trying next");
                    attempts.push(Attempt { host, error });
                }
            }
        }

        Err(FallbackError::Exhausted {
            operation: operation.clone(),
            attempts,
        })
    }
}
