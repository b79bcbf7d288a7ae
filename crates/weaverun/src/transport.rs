//! # Transport Abstraction
//!
//! Moves opaque byte buffers between the host and its guest contexts.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The transport knows nothing about envelopes or
//!   replies. It moves buffers.
//! - **One reply channel per call**: every `call` creates a fresh oneshot and
//!   posts its sender alongside the payload. Replies can never be delivered to
//!   the wrong caller, whatever order the other side finishes in.
//! - **Origin stamping**: only the host mints `HostPort`s, and each port stamps
//!   a fixed `Origin` on everything it posts. Guest code holds the port but
//!   cannot change what it stamps.

use tokio::sync::mpsc;
use tokio::sync::oneshot;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The receiving side of the mailbox is gone.
    ConnectionLost(String),
    /// The other side dropped the reply channel without answering.
    NoReply,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::NoReply => write!(f, "Reply channel closed without a reply"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A mechanism to send a byte buffer and receive a reply.
///
/// This trait is object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a payload and waits for its reply.
    ///
    /// # invariants
    /// - Must return `Ok(vec)` with the raw reply bytes on success.
    /// - Must not interpret the payload content.
    async fn call(&self, payload: &[u8]) -> Result<Vec<u8>>;
}

/// Strong type for guest context identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ContextId(pub u64);

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "context-{}", self.0)
    }
}

/// Where a message came from, as recorded by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Origin {
    pub context: ContextId,
    pub url: String,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.url, self.context)
    }
}

/// A message posted into the host mailbox.
pub struct Posted {
    pub origin: Origin,
    pub payload: Vec<u8>,
    pub reply: oneshot::Sender<Vec<u8>>,
}

/// A message delivered into a guest context.
pub struct Delivered {
    pub payload: Vec<u8>,
    pub reply: oneshot::Sender<Vec<u8>>,
}

/// Creates the host mailbox and the factory that mints ports into it.
pub fn mailbox() -> (PortFactory, Mailbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PortFactory { tx }, Mailbox { rx })
}

/// Host-side factory for guest-held ports.
#[derive(Clone)]
pub struct PortFactory {
    tx: mpsc::UnboundedSender<Posted>,
}

impl PortFactory {
    /// Mints a port that stamps `origin` on every message it posts.
    pub fn port(&self, origin: Origin) -> HostPort {
        HostPort {
            origin,
            tx: self.tx.clone(),
        }
    }
}

/// Receiving end of the host mailbox, owned by the router.
pub struct Mailbox {
    rx: mpsc::UnboundedReceiver<Posted>,
}

impl Mailbox {
    /// Waits for the next posted message. `None` once every port is gone.
    pub async fn recv(&mut self) -> Option<Posted> {
        self.rx.recv().await
    }
}

/// A guest context's handle on the top-level host.
#[derive(Clone)]
pub struct HostPort {
    origin: Origin,
    tx: mpsc::UnboundedSender<Posted>,
}

impl HostPort {
    pub fn origin(&self) -> &Origin {
        &self.origin
    }
}

#[async_trait::async_trait]
impl Transport for HostPort {
    async fn call(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Posted {
                origin: self.origin.clone(),
                payload: payload.to_vec(),
                reply,
            })
            .map_err(|_| Error::ConnectionLost("host mailbox closed".into()))?;

        rx.await.map_err(|_| Error::NoReply)
    }
}

/// Creates the channel the host uses to ask a guest context for something.
pub fn guest_channel() -> (GuestPort, GuestInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (GuestPort { tx }, GuestInbox { rx })
}

/// The host's handle on one guest context.
#[derive(Clone)]
pub struct GuestPort {
    tx: mpsc::UnboundedSender<Delivered>,
}

impl GuestPort {
    /// True once the guest context has stopped serving requests.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait::async_trait]
impl Transport for GuestPort {
    async fn call(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Delivered {
                payload: payload.to_vec(),
                reply,
            })
            .map_err(|_| Error::ConnectionLost("guest context closed".into()))?;

        rx.await.map_err(|_| Error::NoReply)
    }
}

/// Receiving end inside a guest context.
pub struct GuestInbox {
    rx: mpsc::UnboundedReceiver<Delivered>,
}

impl GuestInbox {
    pub async fn recv(&mut self) -> Option<Delivered> {
        self.rx.recv().await
    }
}
