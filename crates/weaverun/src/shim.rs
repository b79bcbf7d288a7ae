//! # Guest-Side API Shim
//!
//! `WeaveClient` is the capability object handed to applet code. Every
//! method is one envelope posted through the context's port; the guest never
//! sees the transport.
//!
//! ## Invariants
//!
//! - Every call gets its own reply channel (see `transport`), so concurrent
//!   calls resolve with their own replies in whatever order they complete.
//! - Every call is bounded by `call_timeout`. A reply arriving later is dropped.
//! - Only `bootstrap` sends envelopes without a claimed identity.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use weaverpc::AppletId;
use weaverpc::AppletInfo;
use weaverpc::AppletToParentRequest;
use weaverpc::AppletView;
use weaverpc::EntryInfoResolved;
use weaverpc::Envelope;
use weaverpc::FrameNotification;
use weaverpc::GroupId;
use weaverpc::GroupProfile;
use weaverpc::GuestIdentity;
use weaverpc::Hrl;
use weaverpc::HrlLocation;
use weaverpc::HrlWithContext;
use weaverpc::IframeConfig;
use weaverpc::OpenViewRequest;
use weaverpc::ProtocolError;
use weaverpc::RemoteCall;
use weaverpc::RenderError;
use weaverpc::RenderInfo;
use weaverpc::RenderView;
use weaverpc::Reply;
use weaverpc::SearchHit;
use weaverpc::SignedZomeCall;
use weaverpc::StorageEntries;
use weaverpc::ZomeCallUnsigned;

use crate::config::BridgeConfig;
use crate::transport;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq)]
pub enum ShimError {
    /// The host could not be reached.
    Transport(String),
    /// The host dropped the reply channel without answering.
    ChannelClosed,
    /// A message could not be encoded or decoded.
    Protocol(ProtocolError),
    /// The host answered with an error.
    Remote(String),
    /// No reply within the call timeout.
    Timeout(Duration),
    /// The host reports nothing is installed for this identity.
    NotInstalled(GuestIdentity),
    /// The navigation query string is malformed.
    Render(RenderError),
    /// The view does not belong to this kind of context.
    ViewMismatch { identity: GuestIdentity, view: RenderView },
    /// The bundle has no block with this name.
    UnknownBlock(String),
    /// The entry an entry view points at could not be located.
    MissingLocation(Hrl),
}

impl std::fmt::Display for ShimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "Transport error: {}", msg),
            Self::ChannelClosed => write!(f, "Reply channel closed without a reply"),
            Self::Protocol(e) => write!(f, "Protocol error: {}", e),
            Self::Remote(msg) => write!(f, "Host error: {}", msg),
            Self::Timeout(after) => write!(f, "No reply after {:?}", after),
            Self::NotInstalled(identity) => write!(f, "Nothing installed for {}", identity),
            Self::Render(e) => write!(f, "{}", e),
            Self::ViewMismatch { identity, view } => {
                write!(f, "{} cannot render {:?}", identity, view)
            }
            Self::UnknownBlock(block) => write!(f, "Unknown block '{}'", block),
            Self::MissingLocation(hrl) => write!(f, "Could not locate {}", hrl),
        }
    }
}

impl std::error::Error for ShimError {}

impl From<transport::Error> for ShimError {
    fn from(e: transport::Error) -> Self {
        match e {
            transport::Error::NoReply => Self::ChannelClosed,
            transport::Error::ConnectionLost(msg) => Self::Transport(msg),
        }
    }
}

impl From<ProtocolError> for ShimError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<RenderError> for ShimError {
    fn from(e: RenderError) -> Self {
        Self::Render(e)
    }
}

pub type Result<T> = std::result::Result<T, ShimError>;

/// Outcome of a search issued through the shim.
#[derive(Clone, Debug, PartialEq)]
pub enum SearchOutcome {
    /// The filter was too short to send.
    TooShort,
    Results(Vec<SearchHit>),
}

/// Everything a guest context learns while starting up.
#[derive(Clone, Debug, PartialEq)]
pub struct Bootstrap {
    pub config: IframeConfig,
    pub info: RenderInfo,
}

/// The capability object guest code holds.
#[derive(Clone)]
pub struct WeaveClient {
    identity: GuestIdentity,
    transport: Arc<dyn Transport>,
    call_timeout: Duration,
    min_search_len: usize,
}

impl WeaveClient {
    pub fn new(identity: GuestIdentity, transport: Arc<dyn Transport>, config: &BridgeConfig) -> Self {
        Self {
            identity,
            transport,
            call_timeout: config.call_timeout(),
            min_search_len: config.min_search_len,
        }
    }

    pub fn identity(&self) -> &GuestIdentity {
        &self.identity
    }

    async fn send<T: DeserializeOwned>(&self, envelope: Envelope) -> Result<T> {
        let kind = envelope.request.kind();
        let payload = weaverpc::encode(&envelope)?;

        let bytes = tokio::time::timeout(self.call_timeout, self.transport.call(&payload))
            .await
            .map_err(|_| {
                debug!(identity = %self.identity, request = kind, "call timed out");
                ShimError::Timeout(self.call_timeout)
            })??;

        let reply: Reply = weaverpc::decode(&bytes)?;
        reply.into_result::<T>()?.map_err(ShimError::Remote)
    }

    async fn request<T: DeserializeOwned>(&self, request: AppletToParentRequest) -> Result<T> {
        self.send(Envelope::new(request, Some(self.identity.clone()))).await
    }

    async fn bootstrap_request<T: DeserializeOwned>(&self, request: AppletToParentRequest) -> Result<T> {
        self.send(Envelope::new(request, None)).await
    }

    /// Resolves what this context should render and how it connects to its
    /// backing services. Any failure here means the context must not render.
    pub async fn bootstrap(&self, query: &str) -> Result<Bootstrap> {
        let view = weaverpc::parse_render_view(query)?;

        let matches_identity = match (&self.identity, &view) {
            (_, RenderView::BackgroundService) => true,
            (GuestIdentity::Applet(_), RenderView::AppletView { .. }) => true,
            (GuestIdentity::CrossApplet(_), RenderView::CrossAppletView { .. }) => true,
            _ => false,
        };
        if !matches_identity {
            return Err(ShimError::ViewMismatch {
                identity: self.identity.clone(),
                view,
            });
        }

        let config: IframeConfig = self.bootstrap_request(AppletToParentRequest::GetIframeConfig).await?;
        if config == IframeConfig::NotInstalled {
            return Err(ShimError::NotInstalled(self.identity.clone()));
        }

        let location = match &view {
            RenderView::AppletView {
                view: AppletView::Entry { hrl, .. },
            } => {
                let location: Option<HrlLocation> = self
                    .bootstrap_request(AppletToParentRequest::GetHrlLocation { hrl: hrl.clone() })
                    .await?;
                Some(location.ok_or_else(|| ShimError::MissingLocation(hrl.clone()))?)
            }
            _ => None,
        };

        debug!(identity = %self.identity, "bootstrapped guest context");
        Ok(Bootstrap {
            config,
            info: RenderInfo {
                identity: self.identity.clone(),
                view,
                location,
            },
        })
    }

    pub async fn open_view(&self, request: OpenViewRequest) -> Result<()> {
        self.request(AppletToParentRequest::OpenView { request }).await
    }

    /// Searches every applet the host knows of. Filters shorter than
    /// `min_search_len` are answered locally.
    pub async fn search(&self, filter: &str) -> Result<SearchOutcome> {
        let filter = filter.trim();
        if filter.chars().count() < self.min_search_len {
            return Ok(SearchOutcome::TooShort);
        }
        let hits = self
            .request(AppletToParentRequest::Search {
                filter: filter.to_string(),
            })
            .await?;
        Ok(SearchOutcome::Results(hits))
    }

    /// `None` if the entry cannot be located.
    pub async fn entry_info(&self, hrl: Hrl) -> Result<Option<EntryInfoResolved>> {
        self.request(AppletToParentRequest::GetEntryInfo { hrl }).await
    }

    pub async fn hrl_to_clipboard(&self, hrl: HrlWithContext) -> Result<()> {
        self.request(AppletToParentRequest::HrlToClipboard { hrl }).await
    }

    /// `None` if the user cancelled.
    pub async fn user_select_hrl(&self) -> Result<Option<HrlWithContext>> {
        self.request(AppletToParentRequest::UserSelectHrl).await
    }

    pub async fn toggle_clipboard(&self) -> Result<()> {
        self.request(AppletToParentRequest::ToggleClipboard).await
    }

    pub async fn notify(&self, notifications: Vec<FrameNotification>) -> Result<()> {
        self.request(AppletToParentRequest::NotifyFrame { notifications }).await
    }

    pub async fn applet_info(&self, applet_id: AppletId) -> Result<Option<AppletInfo>> {
        self.request(AppletToParentRequest::GetAppletInfo { applet_id }).await
    }

    pub async fn group_profile(&self, group_id: GroupId) -> Result<Option<GroupProfile>> {
        self.request(AppletToParentRequest::GetGroupProfile { group_id }).await
    }

    pub async fn sign_zome_call(&self, request: ZomeCallUnsigned) -> Result<SignedZomeCall> {
        self.request(AppletToParentRequest::SignZomeCall { request }).await
    }

    /// Runs a remote operation on whichever peer host is reachable.
    pub async fn call_remote(&self, call: RemoteCall) -> Result<Value> {
        self.request(AppletToParentRequest::CallRemote { call }).await
    }

    pub async fn storage_get(&self, key: &str) -> Result<Option<Value>> {
        self.request(AppletToParentRequest::LocalStorageGet { key: key.to_string() })
            .await
    }

    pub async fn storage_get_all(&self) -> Result<StorageEntries> {
        self.request(AppletToParentRequest::LocalStorageGetAll).await
    }

    pub async fn storage_set(&self, key: &str, value: Value) -> Result<()> {
        self.request(AppletToParentRequest::LocalStorageSet {
            key: key.to_string(),
            value,
        })
        .await
    }

    pub async fn storage_remove(&self, key: &str) -> Result<()> {
        self.request(AppletToParentRequest::LocalStorageRemove { key: key.to_string() })
            .await
    }

    pub async fn storage_clear(&self) -> Result<()> {
        self.request(AppletToParentRequest::LocalStorageClear).await
    }
}
