//! # Host
//!
//! Wires the bridge together: one mailbox and router for the whole host,
//! one registry entry, port and service task per guest context.
//!
//! ## Lifecycle
//!
//! `open_context` registers the context, starts its service loop, and
//! bootstraps it. The returned `GuestContext` owns the registration;
//! dropping it (or passing it to `destroy_context`) stops the service loop
//! and removes the context, so any message still in flight from it is
//! rejected as coming from an unknown origin.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use weaverpc::AppletId;
use weaverpc::AppletView;
use weaverpc::AttachmentType;
use weaverpc::CrossAppletView;
use weaverpc::GuestIdentity;
use weaverpc::IframeConfig;
use weaverpc::ParentToAppletRequest;
use weaverpc::RenderInfo;
use weaverpc::RenderView;

use crate::clipboard::Clipboard;
use crate::config::BridgeConfig;
use crate::fallback::PeerHostNetwork;
use crate::fallback::PeerHostSelector;
use crate::guest;
use crate::guest::AppletBundle;
use crate::guest::BundleError;
use crate::registry::ContextRegistry;
use crate::router::HostRouter;
use crate::services::HostServices;
use crate::shim::ShimError;
use crate::shim::WeaveClient;
use crate::storage::GuestStorage;
use crate::storage::StorageError;
use crate::transport;
use crate::transport::ContextId;
use crate::transport::HostPort;
use crate::transport::Origin;
use crate::transport::PortFactory;

#[derive(Debug)]
pub enum HostError {
    Storage(StorageError),
    Bootstrap(ShimError),
    Bundle(BundleError),
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "Storage error: {}", e),
            Self::Bootstrap(e) => write!(f, "Bootstrap failed: {}", e),
            Self::Bundle(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for HostError {}

impl From<StorageError> for HostError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ShimError> for HostError {
    fn from(e: ShimError) -> Self {
        Self::Bootstrap(e)
    }
}

impl From<BundleError> for HostError {
    fn from(e: BundleError) -> Self {
        Self::Bundle(e)
    }
}

pub type Result<T> = std::result::Result<T, HostError>;

/// Fluent builder for a `Host`.
pub struct HostBuilder {
    services: Arc<dyn HostServices>,
    config: BridgeConfig,
    network: Option<Arc<dyn PeerHostNetwork>>,
    storage: Option<GuestStorage>,
}

impl HostBuilder {
    pub fn new(services: Arc<dyn HostServices>) -> Self {
        Self {
            services,
            config: BridgeConfig::default(),
            network: None,
            storage: None,
        }
    }

    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables `call-remote` through the given peer-host network.
    pub fn peer_hosts(mut self, network: Arc<dyn PeerHostNetwork>) -> Self {
        self.network = Some(network);
        self
    }

    /// Uses an existing store instead of the one named by the config.
    pub fn storage(mut self, storage: GuestStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub async fn build(self) -> Result<Host> {
        let storage = match (self.storage, &self.config.storage_path) {
            (Some(storage), _) => storage,
            (None, Some(path)) => GuestStorage::open(path).await?,
            (None, None) => GuestStorage::new(),
        };

        let selector = self
            .network
            .map(|network| PeerHostSelector::new(network, self.config.ping_timeout()));

        let registry = Arc::new(ContextRegistry::new());
        let clipboard = Clipboard::new();
        let (ports, mailbox) = transport::mailbox();

        let router = Arc::new(HostRouter::new(
            registry.clone(),
            self.services,
            storage.clone(),
            clipboard.clone(),
            selector,
            self.config.call_timeout(),
        ));
        let router = router.spawn(mailbox);

        info!(
            call_timeout_ms = self.config.call_timeout_ms,
            ping_timeout_ms = self.config.ping_timeout_ms,
            "host started"
        );

        Ok(Host {
            registry,
            ports,
            config: self.config,
            storage,
            clipboard,
            router,
        })
    }
}

/// The trusted side of the bridge.
pub struct Host {
    registry: Arc<ContextRegistry>,
    ports: PortFactory,
    config: BridgeConfig,
    storage: GuestStorage,
    clipboard: Clipboard,
    router: JoinHandle<()>,
}

impl Host {
    pub fn builder(services: Arc<dyn HostServices>) -> HostBuilder {
        HostBuilder::new(services)
    }

    /// Creates a guest context for `identity`, rendering the view described
    /// by the navigation `query`, and bootstraps it.
    ///
    /// On any failure the context is torn down again before returning.
    pub async fn open_context(
        &self,
        identity: GuestIdentity,
        query: &str,
        bundle: Arc<dyn AppletBundle>,
    ) -> Result<GuestContext> {
        let (guest_port, inbox) = transport::guest_channel();
        let origin = self.registry.register(identity.clone(), guest_port);
        let service = guest::serve(bundle.clone(), inbox);

        let registration = Registration {
            registry: self.registry.clone(),
            context: origin.context,
            service,
        };

        let port = self.ports.port(origin.clone());
        let client = WeaveClient::new(identity, Arc::new(port.clone()), &self.config);
        let bootstrap = client.bootstrap(query).await?;

        let block = match &bootstrap.info.view {
            RenderView::AppletView {
                view: AppletView::Block { block, .. },
            }
            | RenderView::CrossAppletView {
                view: CrossAppletView::Block { block, .. },
            } => Some(block),
            _ => None,
        };
        if let Some(block) = block {
            if !bundle.blocks().contains(block) {
                return Err(ShimError::UnknownBlock(block.clone()).into());
            }
        }

        debug!(%origin, "opened guest context");
        Ok(GuestContext {
            origin,
            port,
            client,
            config: bootstrap.config,
            info: bootstrap.info,
            bundle,
            _registration: registration,
        })
    }

    /// Tears a context down. Equivalent to dropping it.
    pub fn destroy_context(&self, context: GuestContext) {
        debug!(origin = %context.origin, "destroying guest context");
        drop(context);
    }

    /// Asks every live applet context which attachment types it offers.
    /// Applets that fail or time out are left out of the result.
    pub async fn attachment_types(&self) -> BTreeMap<AppletId, Vec<AttachmentType>> {
        let request = ParentToAppletRequest::GetAttachmentTypes;
        let timeout = self.config.call_timeout();

        let asks = self.registry.applet_ports().into_iter().map(|(applet_id, port)| {
            let request = &request;
            async move {
                let types = guest::ask::<Vec<AttachmentType>>(&port, request, timeout).await;
                (applet_id, types)
            }
        });

        let mut by_applet = BTreeMap::new();
        for (applet_id, types) in join_all(asks).await {
            match types {
                Ok(types) => {
                    by_applet.insert(applet_id, types);
                }
                Err(e) => warn!(%applet_id, error = %e, "attachment types request failed, skipping"),
            }
        }
        by_applet
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    pub fn storage(&self) -> &GuestStorage {
        &self.storage
    }

    pub fn clipboard(&self) -> &Clipboard {
        &self.clipboard
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.router.abort();
    }
}

/// Keeps a context registered and its service loop running.
struct Registration {
    registry: Arc<ContextRegistry>,
    context: ContextId,
    service: JoinHandle<()>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.service.abort();
        // Already gone if the host was torn down first.
        let _ = self.registry.remove(self.context);
    }
}

/// A live guest context with its bundle, as seen from the embedding code.
pub struct GuestContext {
    origin: Origin,
    port: HostPort,
    client: WeaveClient,
    config: IframeConfig,
    info: RenderInfo,
    bundle: Arc<dyn AppletBundle>,
    _registration: Registration,
}

impl std::fmt::Debug for GuestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestContext")
            .field("origin", &self.origin)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl GuestContext {
    pub fn id(&self) -> ContextId {
        self.origin.context
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// The capability object the bundle is handed.
    pub fn client(&self) -> &WeaveClient {
        &self.client
    }

    /// The raw port into the host mailbox, stamped with this context's origin.
    pub fn port(&self) -> &HostPort {
        &self.port
    }

    pub fn iframe_config(&self) -> &IframeConfig {
        &self.config
    }

    pub fn render_info(&self) -> &RenderInfo {
        &self.info
    }

    /// Runs the bundle's renderer for this context's view.
    pub async fn render(&self) -> Result<()> {
        self.bundle.render(&self.client, &self.info).await?;
        Ok(())
    }
}
