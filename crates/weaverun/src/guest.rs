//! # Guest contexts
//!
//! An applet bundle runs inside a guest context and only ever sees the
//! `WeaveClient` it is handed. The host reaches the bundle the other way
//! round, by posting `ParentToAppletRequest`s into the context's inbox.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;

use weaverpc::AttachmentType;
use weaverpc::EntryInfo;
use weaverpc::Hrl;
use weaverpc::HrlLocation;
use weaverpc::HrlWithContext;
use weaverpc::ParentToAppletRequest;
use weaverpc::RenderInfo;
use weaverpc::Reply;

use crate::services::ServiceError;
use crate::shim::WeaveClient;
use crate::transport::GuestInbox;
use crate::transport::GuestPort;
use crate::transport::Transport;

/// A failure inside applet code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleError(pub String);

impl std::fmt::Display for BundleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Applet bundle error: {}", self.0)
    }
}

impl std::error::Error for BundleError {}

impl From<crate::shim::ShimError> for BundleError {
    fn from(e: crate::shim::ShimError) -> Self {
        Self(e.to_string())
    }
}

/// The code an installed applet ships.
///
/// Only `render` is mandatory. The host calls the other hooks when it needs
/// the applet's help with attachments, search, or cross-references.
#[async_trait::async_trait]
pub trait AppletBundle: Send + Sync + 'static {
    /// Renders the view the context was opened for.
    async fn render(&self, client: &WeaveClient, info: &RenderInfo) -> Result<(), BundleError>;

    /// Names of the blocks this bundle can render.
    fn blocks(&self) -> Vec<String> {
        Vec::new()
    }

    async fn attachment_types(&self) -> Result<Vec<AttachmentType>, BundleError> {
        Ok(Vec::new())
    }

    async fn search(&self, _filter: &str) -> Result<Vec<HrlWithContext>, BundleError> {
        Ok(Vec::new())
    }

    /// Display metadata for an entry this applet owns. `None` if unknown.
    async fn entry_info(&self, _hrl: &Hrl, _location: &HrlLocation) -> Result<Option<EntryInfo>, BundleError> {
        Ok(None)
    }
}

/// Answers host requests with `bundle` until the inbox closes.
///
/// Each request runs on its own task so a slow search does not hold up the
/// next request.
pub fn serve(bundle: Arc<dyn AppletBundle>, mut inbox: GuestInbox) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(delivered) = inbox.recv().await {
            let bundle = bundle.clone();
            tokio::spawn(async move {
                let reply = answer(bundle.as_ref(), &delivered.payload).await;
                let bytes = match weaverpc::encode(&reply) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!(error = %e, "failed to encode guest reply");
                        return;
                    }
                };
                // The host may have given up waiting.
                let _ = delivered.reply.send(bytes);
            });
        }
        debug!("guest inbox closed");
    })
}

async fn answer(bundle: &dyn AppletBundle, payload: &[u8]) -> Reply {
    let request: ParentToAppletRequest = match weaverpc::decode(payload) {
        Ok(request) => request,
        Err(e) => return Reply::error(e),
    };

    let outcome = match &request {
        ParentToAppletRequest::GetAttachmentTypes => bundle.attachment_types().await.map(|v| Reply::success(&v)),
        ParentToAppletRequest::Search { filter } => bundle.search(filter).await.map(|v| Reply::success(&v)),
        ParentToAppletRequest::GetEntryInfo { hrl, location } => {
            bundle.entry_info(hrl, location).await.map(|v| Reply::success(&v))
        }
    };

    match outcome {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => Reply::error(e),
        Err(e) => Reply::error(e),
    }
}

/// Sends a request into a guest context and decodes the typed answer.
pub(crate) async fn ask<T: DeserializeOwned>(
    port: &GuestPort,
    request: &ParentToAppletRequest,
    timeout: Duration,
) -> Result<T, ServiceError> {
    let payload = weaverpc::encode(request)?;

    let bytes = tokio::time::timeout(timeout, port.call(&payload))
        .await
        .map_err(|_| ServiceError::Guest(format!("{} timed out after {:?}", request.kind(), timeout)))?
        .map_err(|e| ServiceError::Guest(e.to_string()))?;

    let reply: Reply = weaverpc::decode(&bytes)?;
    reply.into_result::<T>()?.map_err(ServiceError::Guest)
}
