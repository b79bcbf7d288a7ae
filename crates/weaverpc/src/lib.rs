//! # WeaveRPC
//!
//! The message envelope protocol spoken between a host and the applet guest
//! contexts it embeds.
//!
//! ## Architecture
//!
//! - **Closed request set**: every capability is one variant of
//!   `AppletToParentRequest` (guest to host) or `ParentToAppletRequest`
//!   (host to guest). There is no free-form, stringly-typed RPC.
//! - **JSON on the wire**: envelopes and replies are plain JSON so that any
//!   structured-message transport can carry them.
//! - **No correlation ids**: a reply is matched to its request by the private
//!   reply channel the transport hands out per call, not by a field here.
//!
//! Render-view resolution lives here too, because host and guest both need
//! the same view of "what should this context display".

pub mod error;
pub mod message;
pub mod render;
pub mod types;

pub use error::ProtocolError;
pub use error::Result;

pub use message::AppletToParentRequest;
pub use message::Envelope;
pub use message::ParentToAppletRequest;
pub use message::Reply;
pub use message::decode;
pub use message::decode_envelope;
pub use message::encode;

pub use render::AppletView;
pub use render::CrossAppletView;
pub use render::RenderError;
pub use render::RenderInfo;
pub use render::RenderView;
pub use render::format_render_view;
pub use render::parse_render_view;

pub use types::*;

#[cfg(test)]
mod tests;
