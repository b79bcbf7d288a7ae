//! # Host Router
//!
//! The single trusted dispatcher for every envelope a guest context posts.
//!
//! ## Invariants
//!
//! - The sender's identity comes from the transport origin, via the
//!   registry. The identity claimed in the envelope is only ever compared
//!   against it.
//! - A message from an unknown or destroyed context, or whose claim does not
//!   match, or which omits the claim on a non-bootstrap request, is answered
//!   with an error and never reaches a handler.
//! - Every posted message gets exactly one well-formed reply. Handler errors
//!   are encoded into it, never dropped.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::warn;

use weaverpc::AppletId;
use weaverpc::AppletToParentRequest;
use weaverpc::EntryInfo;
use weaverpc::EntryInfoResolved;
use weaverpc::GuestIdentity;
use weaverpc::Hrl;
use weaverpc::HrlWithContext;
use weaverpc::OpenViewRequest;
use weaverpc::ParentToAppletRequest;
use weaverpc::Reply;
use weaverpc::SearchHit;

use crate::clipboard::Clipboard;
use crate::fallback::PeerHostSelector;
use crate::guest;
use crate::registry::ContextRegistry;
use crate::services::HostServices;
use crate::services::Result;
use crate::services::ServiceError;
use crate::storage::GuestStorage;
use crate::transport::Mailbox;
use crate::transport::Origin;
use crate::transport::Posted;

/// Why a message was refused before dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// The origin names no live context.
    UnknownOrigin(String),
    /// The envelope claims a different identity than its origin.
    Unauthorized {
        claimed: Option<GuestIdentity>,
        actual: GuestIdentity,
    },
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownOrigin(origin) => write!(f, "Unauthorized: unknown origin {}", origin),
            Self::Unauthorized {
                claimed: Some(claimed),
                actual,
            } => write!(f, "Unauthorized: {} claimed to be {}", actual, claimed),
            Self::Unauthorized { claimed: None, actual } => {
                write!(f, "Unauthorized: {} sent no identity", actual)
            }
        }
    }
}

impl std::error::Error for RouteError {}

pub struct HostRouter {
    registry: Arc<ContextRegistry>,
    services: Arc<dyn HostServices>,
    storage: GuestStorage,
    clipboard: Clipboard,
    selector: Option<PeerHostSelector>,
    guest_timeout: Duration,
}

impl HostRouter {
    pub fn new(
        registry: Arc<ContextRegistry>,
        services: Arc<dyn HostServices>,
        storage: GuestStorage,
        clipboard: Clipboard,
        selector: Option<PeerHostSelector>,
        guest_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            services,
            storage,
            clipboard,
            selector,
            guest_timeout,
        }
    }

    /// Serves the mailbox until every port into it is gone.
    ///
    /// Each message is handled on its own task, so one slow handler never
    /// holds up other guests.
    pub fn spawn(self: Arc<Self>, mut mailbox: Mailbox) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(posted) = mailbox.recv().await {
                let router = self.clone();
                tokio::spawn(async move { router.handle_posted(posted).await });
            }
            debug!("host mailbox closed");
        })
    }

    async fn handle_posted(&self, posted: Posted) {
        let reply = self.route(&posted.origin, &posted.payload).await;
        match weaverpc::encode(&reply) {
            Ok(bytes) => {
                if posted.reply.send(bytes).is_err() {
                    debug!(origin = %posted.origin, "guest stopped waiting for reply");
                }
            }
            Err(e) => error!(origin = %posted.origin, error = %e, "failed to encode reply"),
        }
    }

    /// Authenticates, decodes and dispatches one posted payload.
    pub async fn route(&self, origin: &Origin, payload: &[u8]) -> Reply {
        let Some(identity) = self.registry.resolve(origin) else {
            warn!(%origin, "rejected message from unknown origin");
            return Reply::error(RouteError::UnknownOrigin(origin.to_string()));
        };

        let envelope = match weaverpc::decode_envelope(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(%identity, error = %e, "malformed envelope");
                return Reply::error(e);
            }
        };

        let authorized = match &envelope.source {
            Some(claimed) => claimed == &identity,
            None => envelope.request.is_bootstrap(),
        };
        if !authorized {
            warn!(
                %identity,
                claimed = ?envelope.source,
                request = envelope.request.kind(),
                "rejected envelope with mismatched identity"
            );
            return Reply::error(RouteError::Unauthorized {
                claimed: envelope.source,
                actual: identity,
            });
        }

        let kind = envelope.request.kind();
        debug!(%identity, request = kind, "dispatching");
        match self.dispatch(&identity, envelope.request).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(%identity, request = kind, error = %e, "handler failed");
                Reply::error(e)
            }
        }
    }

    async fn dispatch(&self, source: &GuestIdentity, request: AppletToParentRequest) -> Result<Reply> {
        match request {
            AppletToParentRequest::GetIframeConfig => {
                let config = match self.registry.cached_config(source) {
                    Some(config) => config,
                    None => {
                        let config = self.services.iframe_config(source).await?;
                        self.registry.cache_config(source, config)
                    }
                };
                reply(config.as_ref())
            }
            AppletToParentRequest::GetHrlLocation { hrl } => reply(&self.services.hrl_location(&hrl).await?),
            AppletToParentRequest::OpenView { request } => {
                self.validate_target(&request).await?;
                reply(&self.services.open_view(source, request).await?)
            }
            AppletToParentRequest::Search { filter } => reply(&self.search(&filter).await?),
            AppletToParentRequest::GetEntryInfo { hrl } => reply(&self.entry_info(&hrl).await?),
            AppletToParentRequest::HrlToClipboard { hrl } => {
                if !self.clipboard.add(hrl).await {
                    debug!(%source, "hrl already on clipboard");
                }
                reply(&())
            }
            AppletToParentRequest::UserSelectHrl => {
                let clipboard = self.clipboard.items().await;
                reply(&self.services.user_select_hrl(source, clipboard).await?)
            }
            AppletToParentRequest::ToggleClipboard => reply(&self.services.toggle_clipboard(source).await?),
            AppletToParentRequest::NotifyFrame { notifications } => {
                reply(&self.services.notify(source, notifications).await?)
            }
            AppletToParentRequest::GetAppletInfo { applet_id } => {
                reply(&self.services.applet_info(&applet_id).await?)
            }
            AppletToParentRequest::GetGroupProfile { group_id } => {
                reply(&self.services.group_profile(&group_id).await?)
            }
            AppletToParentRequest::SignZomeCall { request } => {
                reply(&self.services.sign_zome_call(source, request).await?)
            }
            AppletToParentRequest::CallRemote { call } => {
                let selector = self
                    .selector
                    .as_ref()
                    .ok_or_else(|| ServiceError::Unavailable("no peer-host network configured".into()))?;
                let value = selector
                    .remote_call_cascade_to_available_hosts(&call.operation, &call.payload)
                    .await?;
                reply(&value)
            }
            AppletToParentRequest::LocalStorageGet { key } => reply(&self.storage.get(source, &key)),
            AppletToParentRequest::LocalStorageGetAll => reply(&self.storage.get_all(source)),
            AppletToParentRequest::LocalStorageSet { key, value } => {
                self.storage.set(source, key, value).await?;
                reply(&())
            }
            AppletToParentRequest::LocalStorageRemove { key } => {
                self.storage.remove(source, &key).await?;
                reply(&())
            }
            AppletToParentRequest::LocalStorageClear => {
                self.storage.clear(source).await?;
                reply(&())
            }
        }
    }

    /// Refuses navigation to applets or entries the host cannot resolve.
    async fn validate_target(&self, request: &OpenViewRequest) -> Result<()> {
        match request {
            OpenViewRequest::AppletMain { applet_id } | OpenViewRequest::AppletBlock { applet_id, .. } => {
                if self.services.applet_info(applet_id).await?.is_none() {
                    return Err(ServiceError::NotFound(format!("applet {}", applet_id)));
                }
            }
            OpenViewRequest::Hrl { hrl_with_context } => {
                if self.services.hrl_location(&hrl_with_context.hrl).await?.is_none() {
                    return Err(ServiceError::NotFound(format!("entry {}", hrl_with_context.hrl)));
                }
            }
            OpenViewRequest::CrossAppletMain { .. } | OpenViewRequest::CrossAppletBlock { .. } => {}
        }
        Ok(())
    }

    /// Asks every live applet context to search, then attaches applet and
    /// group metadata to each hit. Applets whose search or metadata lookup
    /// fails are skipped.
    async fn search(&self, filter: &str) -> Result<Vec<SearchHit>> {
        let request = ParentToAppletRequest::Search {
            filter: filter.to_string(),
        };

        let asks = self.registry.applet_ports().into_iter().map(|(applet_id, port)| {
            let request = &request;
            async move {
                let hits = guest::ask::<Vec<HrlWithContext>>(&port, request, self.guest_timeout).await;
                (applet_id, hits)
            }
        });

        let mut by_applet: BTreeMap<AppletId, Vec<HrlWithContext>> = BTreeMap::new();
        for (applet_id, hits) in join_all(asks).await {
            match hits {
                Ok(hits) => {
                    by_applet.insert(applet_id, hits);
                }
                Err(e) => warn!(%applet_id, error = %e, "applet search failed, skipping"),
            }
        }

        let mut results = Vec::new();
        for (applet_id, hits) in by_applet {
            let info = match self.services.applet_info(&applet_id).await {
                Ok(Some(info)) => info,
                Ok(None) => {
                    warn!(%applet_id, "search hits from unknown applet, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(%applet_id, error = %e, "applet info lookup failed, skipping search hits");
                    continue;
                }
            };
            results.extend(hits.into_iter().map(|hrl_with_context| SearchHit {
                hrl_with_context,
                applet_id: applet_id.clone(),
                applet_name: info.name.clone(),
                group_ids: info.group_ids.clone(),
            }));
        }
        Ok(results)
    }

    /// `None` when the entry cannot be located or its applet is not running.
    async fn entry_info(&self, hrl: &Hrl) -> Result<Option<EntryInfoResolved>> {
        let Some(location) = self.services.hrl_location(hrl).await? else {
            return Ok(None);
        };
        let Some(port) = self.registry.applet_port(&location.applet_id) else {
            debug!(%hrl, applet_id = %location.applet_id, "no live context for owning applet");
            return Ok(None);
        };

        let applet_id = location.applet_id.clone();
        let request = ParentToAppletRequest::GetEntryInfo {
            hrl: hrl.clone(),
            location,
        };
        let entry_info: Option<EntryInfo> = guest::ask(&port, &request, self.guest_timeout).await?;
        Ok(entry_info.map(|entry_info| EntryInfoResolved { applet_id, entry_info }))
    }
}

fn reply<T: Serialize>(value: &T) -> Result<Reply> {
    Ok(Reply::success(value)?)
}
