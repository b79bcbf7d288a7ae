//! # Render-View Resolution
//!
//! Turns the navigation query string a guest context is loaded with into the
//! closed `RenderView` union, and back.
//!
//! ## Format
//!
//! Ordered `key=value` tokens joined by `&`, read positionally:
//!
//! ```text
//! view=applet-view&view-type=main
//! view=applet-view&view-type=block&block=<name>&context=<ctx>
//! view=applet-view&view-type=entry&hrl=<hrl>&context=<ctx>
//! view=cross-applet-view&view-type=main
//! view=cross-applet-view&view-type=block&block=<name>&context=<ctx>
//! view=background-service
//! ```
//!
//! Values are form-urlencoded, so a block name or HRL may hold `&`, `=` or
//! `%` and still round-trip. `<hrl>` is the `hrl://<dna>/<resource>` text
//! form, which parses unescaped as well. `<ctx>` is the JSON text of the
//! context, base64url encoded without padding.
//!
//! Parsing is a pure function of its input. Any missing, misplaced, unknown or
//! trailing token is an error carrying the original query string; a guest that
//! cannot tell what to render has nothing sensible to show.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use url::form_urlencoded;

use crate::types::GuestIdentity;
use crate::types::Hrl;
use crate::types::HrlLocation;

/// What an applet context renders.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AppletView {
    Main,
    Block { block: String, context: Value },
    Entry { hrl: Hrl, context: Value },
}

/// What a cross-applet context renders.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CrossAppletView {
    Main,
    Block { block: String, context: Value },
}

/// What a guest context should display, fixed when the context is created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RenderView {
    AppletView { view: AppletView },
    CrossAppletView { view: CrossAppletView },
    BackgroundService,
}

/// A render view resolved for one context.
///
/// `location` is present exactly when the view is an entry view; finding it
/// takes a round trip to the host because the query string cannot carry it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderInfo {
    pub identity: GuestIdentity,
    pub view: RenderView,
    pub location: Option<HrlLocation>,
}

/// A query string that does not describe any render view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderError {
    pub query: String,
    pub reason: String,
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid render view query '{}': {}", self.query, self.reason)
    }
}

impl std::error::Error for RenderError {}

pub type Result<T> = std::result::Result<T, RenderError>;

/// Positional reader over `key=value` tokens.
struct Tokens<'a> {
    query: &'a str,
    tokens: std::str::Split<'a, char>,
}

impl<'a> Tokens<'a> {
    fn new(query: &'a str) -> Self {
        let body = query.strip_prefix('?').unwrap_or(query);
        Self {
            query,
            tokens: body.split('&'),
        }
    }

    fn error(&self, reason: impl Into<String>) -> RenderError {
        RenderError {
            query: self.query.to_string(),
            reason: reason.into(),
        }
    }

    /// Reads the next token, which must have the given key, and unescapes its value.
    fn expect(&mut self, key: &str) -> Result<String> {
        let token = self
            .tokens
            .next()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| self.error(format!("missing '{}'", key)))?;

        if !token.contains('=') {
            return Err(self.error(format!("malformed token '{}'", token)));
        }
        let (found, value) = form_urlencoded::parse(token.as_bytes())
            .next()
            .ok_or_else(|| self.error(format!("malformed token '{}'", token)))?;

        if found != key {
            return Err(self.error(format!("expected '{}', found '{}'", key, found)));
        }
        Ok(value.into_owned())
    }

    fn context(&mut self) -> Result<Value> {
        let raw = self.expect("context")?;
        decode_context(&raw).map_err(|reason| self.error(reason))
    }

    fn finish(mut self) -> Result<()> {
        match self.tokens.next() {
            None => Ok(()),
            Some(extra) => Err(self.error(format!("unexpected trailing token '{}'", extra))),
        }
    }
}

/// Parses a navigation query string into a `RenderView`.
pub fn parse_render_view(query: &str) -> Result<RenderView> {
    let mut tokens = Tokens::new(query);

    let view = match tokens.expect("view")?.as_str() {
        "applet-view" => {
            let view = match tokens.expect("view-type")?.as_str() {
                "main" => AppletView::Main,
                "block" => {
                    let block = tokens.expect("block")?;
                    let context = tokens.context()?;
                    AppletView::Block { block, context }
                }
                "entry" => {
                    let raw = tokens.expect("hrl")?;
                    let hrl = raw.parse::<Hrl>().map_err(|e| tokens.error(e.to_string()))?;
                    let context = tokens.context()?;
                    AppletView::Entry { hrl, context }
                }
                other => return Err(tokens.error(format!("unknown applet view type '{}'", other))),
            };
            RenderView::AppletView { view }
        }
        "cross-applet-view" => {
            let view = match tokens.expect("view-type")?.as_str() {
                "main" => CrossAppletView::Main,
                "block" => {
                    let block = tokens.expect("block")?;
                    let context = tokens.context()?;
                    CrossAppletView::Block { block, context }
                }
                other => return Err(tokens.error(format!("unknown cross-applet view type '{}'", other))),
            };
            RenderView::CrossAppletView { view }
        }
        "background-service" => RenderView::BackgroundService,
        other => return Err(tokens.error(format!("unknown view '{}'", other))),
    };

    tokens.finish()?;
    Ok(view)
}

/// Formats a `RenderView` as the canonical query string `parse_render_view` accepts.
pub fn format_render_view(view: &RenderView) -> String {
    match view {
        RenderView::AppletView { view } => match view {
            AppletView::Main => "view=applet-view&view-type=main".to_string(),
            AppletView::Block { block, context } => format!(
                "view=applet-view&view-type=block&block={}&context={}",
                escape(block),
                encode_context(context)
            ),
            AppletView::Entry { hrl, context } => format!(
                "view=applet-view&view-type=entry&hrl={}&context={}",
                escape(&hrl.to_string()),
                encode_context(context)
            ),
        },
        RenderView::CrossAppletView { view } => match view {
            CrossAppletView::Main => "view=cross-applet-view&view-type=main".to_string(),
            CrossAppletView::Block { block, context } => format!(
                "view=cross-applet-view&view-type=block&block={}&context={}",
                escape(block),
                encode_context(context)
            ),
        },
        RenderView::BackgroundService => "view=background-service".to_string(),
    }
}

fn escape(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Encodes a context value for use in a query string.
pub fn encode_context(context: &Value) -> String {
    URL_SAFE_NO_PAD.encode(context.to_string())
}

/// Decodes a context value produced by `encode_context`.
pub fn decode_context(raw: &str) -> std::result::Result<Value, String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(raw)
        .map_err(|e| format!("context is not base64url: {}", e))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("context is not JSON: {}", e))
}
