//! # Shared payload types
//!
//! Identifiers and records that appear inside envelopes and replies.
//! Hashes are carried as opaque strings; nothing in the bridge interprets them.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::ProtocolError;

/// Strong type for installed applet identifiers.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppletId(pub String);

impl std::fmt::Display for AppletId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strong type for cross-applet tool identifiers (one per applet bundle).
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolId(pub String);

impl std::fmt::Display for ToolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strong type for group identifiers.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

const APPLET_SCHEME: &str = "applet://";
const CROSS_APPLET_SCHEME: &str = "cross-applet://";

/// Which installed code a guest context belongs to.
///
/// Derived from the origin URL of the context and fixed for its lifetime.
/// This is the only key used to authorize and scope guest requests.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "kebab-case")]
pub enum GuestIdentity {
    /// A single applet instance inside one group.
    Applet(AppletId),
    /// A bundle rendering across every applet instance of the same tool.
    CrossApplet(ToolId),
}

impl GuestIdentity {
    /// Derives the identity from an origin URL such as `applet://<id>`.
    ///
    /// Returns `None` for any other scheme, an empty id, or an id with a path.
    pub fn from_origin_url(url: &str) -> Option<Self> {
        if let Some(rest) = url.strip_prefix(CROSS_APPLET_SCHEME) {
            return origin_id(rest).map(|id| Self::CrossApplet(ToolId(id)));
        }
        if let Some(rest) = url.strip_prefix(APPLET_SCHEME) {
            return origin_id(rest).map(|id| Self::Applet(AppletId(id)));
        }
        None
    }

    /// The origin URL a context with this identity is served from.
    pub fn origin_url(&self) -> String {
        match self {
            Self::Applet(id) => format!("{}{}", APPLET_SCHEME, id),
            Self::CrossApplet(id) => format!("{}{}", CROSS_APPLET_SCHEME, id),
        }
    }

    pub fn applet_id(&self) -> Option<&AppletId> {
        match self {
            Self::Applet(id) => Some(id),
            Self::CrossApplet(_) => None,
        }
    }
}

fn origin_id(rest: &str) -> Option<String> {
    let id = rest.trim_end_matches('/');
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id.to_string())
}

impl std::fmt::Display for GuestIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.origin_url())
    }
}

const HRL_SCHEME: &str = "hrl://";

/// A reference to a piece of content inside a specific distributed app.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hrl {
    pub dna_hash: String,
    pub resource_hash: String,
}

impl Hrl {
    pub fn new(dna_hash: impl Into<String>, resource_hash: impl Into<String>) -> Self {
        Self {
            dna_hash: dna_hash.into(),
            resource_hash: resource_hash.into(),
        }
    }
}

impl std::fmt::Display for Hrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}/{}", HRL_SCHEME, self.dna_hash, self.resource_hash)
    }
}

impl FromStr for Hrl {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidHrl(s.to_string());
        let rest = s.strip_prefix(HRL_SCHEME).ok_or_else(invalid)?;
        let (dna_hash, resource_hash) = rest.split_once('/').ok_or_else(invalid)?;
        if dna_hash.is_empty() || resource_hash.is_empty() || resource_hash.contains('/') {
            return Err(invalid());
        }
        Ok(Self::new(dna_hash, resource_hash))
    }
}

/// An HRL plus whatever context the referencing applet wants to attach.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HrlWithContext {
    pub hrl: Hrl,
    #[serde(default)]
    pub context: Value,
}

/// Where the content an HRL points to lives: which applet owns the DNA,
/// and which integrity zome and entry type describe it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HrlLocation {
    pub applet_id: AppletId,
    pub role_name: String,
    pub integrity_zome: String,
    pub entry_type: String,
}

/// Display metadata for a referenced entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub name: String,
    pub icon_src: String,
}

/// Entry display metadata together with the applet that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfoResolved {
    pub applet_id: AppletId,
    pub entry_info: EntryInfo,
}

/// A kind of thing an applet can create and attach elsewhere.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentType {
    pub label: String,
    pub icon_src: String,
}

/// Denormalized applet metadata used for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppletInfo {
    pub applet_id: AppletId,
    pub tool_id: ToolId,
    pub name: String,
    pub icon_src: String,
    pub group_ids: Vec<GroupId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupProfile {
    pub name: String,
    pub logo_src: String,
}

/// One search result, with the owning applet's metadata attached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub hrl_with_context: HrlWithContext,
    pub applet_id: AppletId,
    pub applet_name: String,
    pub group_ids: Vec<GroupId>,
}

/// What the user asked a guest to navigate to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OpenViewRequest {
    AppletMain { applet_id: AppletId },
    AppletBlock { applet_id: AppletId, block: String, context: Value },
    CrossAppletMain { tool_id: ToolId },
    CrossAppletBlock { tool_id: ToolId, block: String, context: Value },
    Hrl { hrl_with_context: HrlWithContext },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

/// A notification an applet asks the host to surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameNotification {
    pub title: String,
    pub body: String,
    pub urgency: Urgency,
    pub timestamp: u64,
}

/// A zome call an applet wants the user's keychain to sign.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZomeCallUnsigned {
    pub dna_hash: String,
    pub agent_pub_key: String,
    pub zome_name: String,
    pub fn_name: String,
    pub payload: Value,
    pub cap_secret: Option<String>,
    pub nonce: String,
    pub expires_at: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedZomeCall {
    pub call: ZomeCallUnsigned,
    pub signature: Vec<u8>,
}

/// A named remote operation served by one or more peer hosts.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteOperation {
    pub zome_name: String,
    pub fn_name: String,
}

impl std::fmt::Display for RemoteOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.zome_name, self.fn_name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteCall {
    pub operation: RemoteOperation,
    pub payload: Value,
}

/// Where the shared profiles service of a group is reachable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilesLocation {
    pub app_id: String,
    pub role_name: String,
}

/// How a guest context should construct its backing service connections.
///
/// Computed once per identity by the host and cached for the lifetime of
/// the contexts that share that identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum IframeConfig {
    Applet {
        app_port: u16,
        applet_id: AppletId,
        role_names: Vec<String>,
        profiles_location: ProfilesLocation,
        group_ids: Vec<GroupId>,
    },
    CrossApplet {
        app_port: u16,
        tool_id: ToolId,
        applets: Vec<AppletId>,
    },
    NotInstalled,
}

/// Guest-scoped key/value state, ordered for stable output.
pub type StorageEntries = BTreeMap<String, Value>;
