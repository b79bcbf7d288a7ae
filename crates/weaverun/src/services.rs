//! # Host services
//!
//! Everything the router needs from outside the bridge: the peer-to-peer
//! runtime, the keychain, navigation, and notifications. The router never
//! reaches these directly, only through `HostServices`.

use weaverpc::AppletId;
use weaverpc::AppletInfo;
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
use weaverpc::SignedZomeCall;
use weaverpc::ZomeCallUnsigned;

use crate::fallback::FallbackError;
use crate::storage::StorageError;

/// Recoverable handler failures. Always reported back to the guest as an
/// error reply, never allowed to take down the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The thing the request names does not exist.
    NotFound(String),
    /// The request was understood but refused (e.g. the user declined to sign).
    Rejected(String),
    /// A backing service or peer could not be reached.
    Unavailable(String),
    /// A guest context answered a host request with an error.
    Guest(String),
    /// Something in the host itself went wrong.
    Internal(String),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::Rejected(msg) => write!(f, "Rejected: {}", msg),
            Self::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            Self::Guest(msg) => write!(f, "Guest error: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<ProtocolError> for ServiceError {
    fn from(e: ProtocolError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<FallbackError> for ServiceError {
    fn from(e: FallbackError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        Self::Internal(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// External collaborators the host router delegates to.
///
/// Lookups return `Ok(None)` for "not found"; `Err` is reserved for failures
/// of the collaborator itself.
#[async_trait::async_trait]
pub trait HostServices: Send + Sync + 'static {
    /// Computes how a context with this identity connects to its backing services.
    async fn iframe_config(&self, identity: &GuestIdentity) -> Result<IframeConfig>;

    /// Finds which applet, integrity zome and entry type an HRL belongs to.
    async fn hrl_location(&self, hrl: &Hrl) -> Result<Option<HrlLocation>>;

    async fn applet_info(&self, applet_id: &AppletId) -> Result<Option<AppletInfo>>;

    async fn group_profile(&self, group_id: &GroupId) -> Result<Option<GroupProfile>>;

    /// Navigates to an already validated target.
    async fn open_view(&self, source: &GuestIdentity, request: OpenViewRequest) -> Result<()>;

    /// Asks the user's keychain to sign a zome call.
    async fn sign_zome_call(&self, source: &GuestIdentity, request: ZomeCallUnsigned) -> Result<SignedZomeCall>;

    /// Lets the user pick an HRL. `clipboard` holds what applets have put on
    /// the host clipboard, oldest first. `None` if cancelled.
    async fn user_select_hrl(
        &self,
        source: &GuestIdentity,
        clipboard: Vec<HrlWithContext>,
    ) -> Result<Option<HrlWithContext>>;

    async fn toggle_clipboard(&self, source: &GuestIdentity) -> Result<()>;

    async fn notify(&self, source: &GuestIdentity, notifications: Vec<FrameNotification>) -> Result<()>;
}
