//! # Context Registry
//!
//! Central table of live guest contexts. Maps each `ContextId` to the identity
//! it was created for and the port the host uses to reach it, and caches one
//! `IframeConfig` per identity for as long as any context with that identity
//! is alive.
//!
//! Uses DashMap for concurrent access, so the router can resolve origins from
//! many in-flight requests while contexts are being opened and destroyed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tracing::debug;

use weaverpc::AppletId;
use weaverpc::GuestIdentity;
use weaverpc::IframeConfig;

use crate::transport::ContextId;
use crate::transport::GuestPort;
use crate::transport::Origin;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    ContextNotFound(ContextId),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContextNotFound(id) => write!(f, "Context not found: {}", id),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// One live guest context.
#[derive(Clone)]
pub struct ContextEntry {
    pub identity: GuestIdentity,
    pub origin: Origin,
    pub guest: GuestPort,
}

pub struct ContextRegistry {
    contexts: DashMap<ContextId, ContextEntry>,
    configs: DashMap<GuestIdentity, Arc<IframeConfig>>,
    next_context_id: AtomicU64,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self {
            contexts: DashMap::new(),
            configs: DashMap::new(),
            next_context_id: AtomicU64::new(1),
        }
    }

    /// Registers a new context and returns the origin its port must stamp.
    pub fn register(&self, identity: GuestIdentity, guest: GuestPort) -> Origin {
        let id = ContextId(self.next_context_id.fetch_add(1, Ordering::Relaxed));
        let origin = Origin {
            context: id,
            url: identity.origin_url(),
        };

        debug!(context = %id, %identity, "registered guest context");
        self.contexts.insert(id, ContextEntry {
            identity,
            origin: origin.clone(),
            guest,
        });
        origin
    }

    /// Removes a context. Drops the cached config once no context with the
    /// same identity remains.
    pub fn remove(&self, id: ContextId) -> Result<ContextEntry> {
        let (_, entry) = self.contexts.remove(&id).ok_or(Error::ContextNotFound(id))?;

        if !self.is_live(&entry.identity) {
            self.configs.remove(&entry.identity);
        }

        debug!(context = %id, identity = %entry.identity, "removed guest context");
        Ok(entry)
    }

    /// Derives the sender identity of a message from its transport origin.
    ///
    /// Returns `None` unless the origin names a live context, its URL is the
    /// one registered for that context, and the URL parses to the registered
    /// identity.
    pub fn resolve(&self, origin: &Origin) -> Option<GuestIdentity> {
        let entry = self.contexts.get(&origin.context)?;
        if entry.origin.url != origin.url {
            return None;
        }
        let derived = GuestIdentity::from_origin_url(&origin.url)?;
        (derived == entry.identity).then_some(derived)
    }

    pub fn get(&self, id: ContextId) -> Result<ContextEntry> {
        self.contexts
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(Error::ContextNotFound(id))
    }

    pub fn is_live(&self, identity: &GuestIdentity) -> bool {
        self.contexts.iter().any(|entry| &entry.identity == identity)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// One reachable port per live applet, lowest context id first.
    pub fn applet_ports(&self) -> Vec<(AppletId, GuestPort)> {
        let mut ports: BTreeMap<AppletId, (ContextId, GuestPort)> = BTreeMap::new();
        for entry in self.contexts.iter() {
            let Some(applet_id) = entry.identity.applet_id() else { continue };
            if entry.guest.is_closed() {
                continue;
            }
            let candidate = (*entry.key(), entry.guest.clone());
            ports
                .entry(applet_id.clone())
                .and_modify(|current| {
                    if candidate.0 < current.0 {
                        *current = candidate.clone();
                    }
                })
                .or_insert_with(|| candidate.clone());
        }
        ports.into_iter().map(|(applet_id, (_, port))| (applet_id, port)).collect()
    }

    /// A reachable port into any live context of the given applet.
    pub fn applet_port(&self, applet_id: &AppletId) -> Option<GuestPort> {
        self.applet_ports()
            .into_iter()
            .find(|(id, _)| id == applet_id)
            .map(|(_, port)| port)
    }

    pub fn cached_config(&self, identity: &GuestIdentity) -> Option<Arc<IframeConfig>> {
        self.configs.get(identity).map(|entry| entry.value().clone())
    }

    /// Caches a freshly computed config, unless every context with this
    /// identity has gone away in the meantime.
    ///
    /// Liveness is checked again after the insert: a `remove` of the last
    /// context that ran between the first check and the insert found nothing
    /// to drop, so the entry is dropped here instead.
    pub fn cache_config(&self, identity: &GuestIdentity, config: IframeConfig) -> Arc<IframeConfig> {
        let config = Arc::new(config);
        if !self.is_live(identity) {
            return config;
        }

        let cached = self
            .configs
            .entry(identity.clone())
            .or_insert_with(|| config.clone())
            .value()
            .clone();

        if !self.is_live(identity) {
            self.configs.remove(identity);
        }
        cached
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}
