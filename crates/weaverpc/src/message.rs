//! # Envelopes and Replies
//!
//! The closed set of requests a guest may make of its host (and the few the
//! host makes of a guest), the envelope that carries them, and the reply
//! shape that answers them.
//!
//! ## Invariants
//!
//! - Every request variant has a fixed reply value type, noted on the variant.
//! - A reply is either `success` with a value or `error` with a message;
//!   there is no third state.
//! - Decoding an envelope whose tag names no variant fails with
//!   `ProtocolError::UnknownRequest`, never with a generic decode error.

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ProtocolError;
use crate::error::Result;
use crate::types::AppletId;
use crate::types::FrameNotification;
use crate::types::GroupId;
use crate::types::GuestIdentity;
use crate::types::Hrl;
use crate::types::HrlLocation;
use crate::types::HrlWithContext;
use crate::types::OpenViewRequest;
use crate::types::RemoteCall;
use crate::types::ZomeCallUnsigned;

/// Requests a guest context sends to its host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AppletToParentRequest {
    /// Bootstrap. Replies `IframeConfig`.
    GetIframeConfig,
    /// Bootstrap for entry views. Replies `Option<HrlLocation>`.
    GetHrlLocation { hrl: Hrl },
    /// Replies `()`.
    OpenView { request: OpenViewRequest },
    /// Replies `Vec<SearchHit>`.
    Search { filter: String },
    /// Replies `Option<EntryInfoResolved>`.
    GetEntryInfo { hrl: Hrl },
    /// Replies `()`.
    HrlToClipboard { hrl: HrlWithContext },
    /// Replies `Option<HrlWithContext>`.
    UserSelectHrl,
    /// Replies `()`.
    ToggleClipboard,
    /// Replies `()`.
    NotifyFrame { notifications: Vec<FrameNotification> },
    /// Replies `Option<AppletInfo>`.
    GetAppletInfo { applet_id: AppletId },
    /// Replies `Option<GroupProfile>`.
    GetGroupProfile { group_id: GroupId },
    /// Replies `SignedZomeCall`.
    SignZomeCall { request: ZomeCallUnsigned },
    /// Replies the remote operation's JSON result.
    CallRemote { call: RemoteCall },
    /// Replies `Option<Value>`.
    LocalStorageGet { key: String },
    /// Replies `StorageEntries`.
    LocalStorageGetAll,
    /// Replies `()`.
    LocalStorageSet { key: String, value: Value },
    /// Replies `()`.
    LocalStorageRemove { key: String },
    /// Replies `()`.
    LocalStorageClear,
}

impl AppletToParentRequest {
    /// Every tag this enum accepts on the wire.
    pub const KINDS: &'static [&'static str] = &[
        "get-iframe-config",
        "get-hrl-location",
        "open-view",
        "search",
        "get-entry-info",
        "hrl-to-clipboard",
        "user-select-hrl",
        "toggle-clipboard",
        "notify-frame",
        "get-applet-info",
        "get-group-profile",
        "sign-zome-call",
        "call-remote",
        "local-storage-get",
        "local-storage-get-all",
        "local-storage-set",
        "local-storage-remove",
        "local-storage-clear",
    ];

    /// The wire tag of this request, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GetIframeConfig => "get-iframe-config",
            Self::GetHrlLocation { .. } => "get-hrl-location",
            Self::OpenView { .. } => "open-view",
            Self::Search { .. } => "search",
            Self::GetEntryInfo { .. } => "get-entry-info",
            Self::HrlToClipboard { .. } => "hrl-to-clipboard",
            Self::UserSelectHrl => "user-select-hrl",
            Self::ToggleClipboard => "toggle-clipboard",
            Self::NotifyFrame { .. } => "notify-frame",
            Self::GetAppletInfo { .. } => "get-applet-info",
            Self::GetGroupProfile { .. } => "get-group-profile",
            Self::SignZomeCall { .. } => "sign-zome-call",
            Self::CallRemote { .. } => "call-remote",
            Self::LocalStorageGet { .. } => "local-storage-get",
            Self::LocalStorageGetAll => "local-storage-get-all",
            Self::LocalStorageSet { .. } => "local-storage-set",
            Self::LocalStorageRemove { .. } => "local-storage-remove",
            Self::LocalStorageClear => "local-storage-clear",
        }
    }

    /// Bootstrap requests are issued before the guest knows its own identity,
    /// so the host answers them from the transport origin alone.
    pub fn is_bootstrap(&self) -> bool {
        matches!(self, Self::GetIframeConfig | Self::GetHrlLocation { .. })
    }
}

/// Requests a host sends into a guest context, answered by the applet bundle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ParentToAppletRequest {
    /// Replies `Vec<AttachmentType>`.
    GetAttachmentTypes,
    /// Replies `Vec<HrlWithContext>`.
    Search { filter: String },
    /// Replies `Option<EntryInfo>`.
    GetEntryInfo { hrl: Hrl, location: HrlLocation },
}

impl ParentToAppletRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GetAttachmentTypes => "get-attachment-types",
            Self::Search { .. } => "search",
            Self::GetEntryInfo { .. } => "get-entry-info",
        }
    }
}

/// A guest request plus the identity the guest claims to have.
///
/// The claim is never trusted on its own; the host compares it against the
/// identity it derives from the transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub request: AppletToParentRequest,
    pub source: Option<GuestIdentity>,
}

impl Envelope {
    pub fn new(request: AppletToParentRequest, source: Option<GuestIdentity>) -> Self {
        Self { request, source }
    }
}

/// The single answer to one envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Reply {
    Success { value: Value },
    Error { error: String },
}

impl Reply {
    /// Wraps a typed value as a success reply.
    pub fn success<T: Serialize>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value).map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(Self::Success { value })
    }

    pub fn error(error: impl std::fmt::Display) -> Self {
        Self::Error { error: error.to_string() }
    }

    /// Splits the reply into the typed success value or the remote error
    /// message. The outer `Result` fails only if the value has the wrong shape.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<std::result::Result<T, String>> {
        match self {
            Self::Success { value } => serde_json::from_value(value)
                .map(Ok)
                .map_err(|e| ProtocolError::Decode(e.to_string())),
            Self::Error { error } => Ok(Err(error)),
        }
    }
}

/// Serializes any protocol message to JSON bytes.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(message).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Deserializes a protocol message from JSON bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// Deserializes an envelope, reporting unknown request tags distinctly.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope> {
    let raw: Value = decode(bytes)?;

    let tag = raw
        .get("request")
        .and_then(|request| request.get("type"))
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Decode("envelope has no request type".into()))?;

    if !AppletToParentRequest::KINDS.contains(&tag) {
        return Err(ProtocolError::UnknownRequest(tag.to_string()));
    }

    serde_json::from_value(raw).map_err(|e| ProtocolError::Decode(e.to_string()))
}
