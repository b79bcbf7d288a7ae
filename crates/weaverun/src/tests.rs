//! Unit tests for the shim, registry and host-owned state, using mock transports.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::future::join_all;
use rand::seq::SliceRandom;
use serde_json::Value;
use serde_json::json;

use weaverpc::AppletId;
use weaverpc::AppletToParentRequest;
use weaverpc::AppletView;
use weaverpc::Envelope;
use weaverpc::GuestIdentity;
use weaverpc::Hrl;
use weaverpc::HrlLocation;
use weaverpc::HrlWithContext;
use weaverpc::IframeConfig;
use weaverpc::ProfilesLocation;
use weaverpc::RenderView;
use weaverpc::Reply;
use weaverpc::ToolId;

use crate::clipboard::Clipboard;
use crate::config::BridgeConfig;
use crate::config::ConfigError;
use crate::registry::ContextRegistry;
use crate::shim::SearchOutcome;
use crate::shim::ShimError;
use crate::shim::WeaveClient;
use crate::storage::GuestStorage;
use crate::telemetry;
use crate::transport;
use crate::transport::Transport;

fn applet(id: &str) -> GuestIdentity {
    GuestIdentity::Applet(AppletId(id.to_string()))
}

fn installed(id: &str) -> IframeConfig {
    IframeConfig::Applet {
        app_port: 8888,
        applet_id: AppletId(id.to_string()),
        role_names: vec!["forum".to_string()],
        profiles_location: ProfilesLocation {
            app_id: "group".to_string(),
            role_name: "profiles".to_string(),
        },
        group_ids: Vec::new(),
    }
}

/// Mock transport that answers every envelope with a fixed function and
/// counts how many envelopes it saw.
struct ScriptedTransport<F> {
    calls: Arc<AtomicUsize>,
    handler: F,
}

impl<F> ScriptedTransport<F>
where
    F: Fn(Envelope) -> Reply + Send + Sync + 'static,
{
    fn new(handler: F) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                calls: calls.clone(),
                handler,
            }),
            calls,
        )
    }
}

#[async_trait::async_trait]
impl<F> Transport for ScriptedTransport<F>
where
    F: Fn(Envelope) -> Reply + Send + Sync + 'static,
{
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let envelope = weaverpc::decode_envelope(payload).unwrap();
        Ok(weaverpc::encode(&(self.handler)(envelope)).unwrap())
    }
}

/// Mock transport that answers `local-storage-get` with the key itself,
/// after a per-key delay.
struct ShuffledTransport {
    delays: HashMap<String, u64>,
}

#[async_trait::async_trait]
impl Transport for ShuffledTransport {
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        let envelope = weaverpc::decode_envelope(payload).unwrap();
        let AppletToParentRequest::LocalStorageGet { key } = envelope.request else {
            panic!("unexpected request");
        };
        let delay = self.delays[&key];
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(weaverpc::encode(&Reply::success(&Some(Value::String(key))).unwrap()).unwrap())
    }
}

/// Mock transport that never replies.
struct SilentTransport;

#[async_trait::async_trait]
impl Transport for SilentTransport {
    async fn call(&self, _payload: &[u8]) -> transport::Result<Vec<u8>> {
        std::future::pending().await
    }
}

// ============================================================================
// Shim
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_resolve_with_their_own_replies() {
    let keys: Vec<String> = (0..32).map(|i| format!("key-{}", i)).collect();
    let mut delays: Vec<u64> = (0..keys.len() as u64).collect();
    delays.shuffle(&mut rand::thread_rng());

    let transport = Arc::new(ShuffledTransport {
        delays: keys.iter().cloned().zip(delays).collect(),
    });
    let client = WeaveClient::new(applet("a"), transport, &BridgeConfig::default());

    let results = join_all(keys.iter().map(|key| client.storage_get(key))).await;

    for (key, result) in keys.iter().zip(results) {
        assert_eq!(result.unwrap(), Some(Value::String(key.clone())));
    }
}

#[tokio::test(start_paused = true)]
async fn test_call_times_out() {
    let config = BridgeConfig {
        call_timeout_ms: 50,
        ..BridgeConfig::default()
    };
    let client = WeaveClient::new(applet("a"), Arc::new(SilentTransport), &config);

    let err = client.toggle_clipboard().await.unwrap_err();
    assert_eq!(err, ShimError::Timeout(Duration::from_millis(50)));
}

#[tokio::test]
async fn test_short_search_makes_no_round_trip() {
    let (transport, calls) = ScriptedTransport::new(|_| Reply::success(&Vec::<Value>::new()).unwrap());
    let client = WeaveClient::new(applet("a"), transport, &BridgeConfig::default());

    assert_eq!(client.search("").await.unwrap(), SearchOutcome::TooShort);
    assert_eq!(client.search("ab").await.unwrap(), SearchOutcome::TooShort);
    assert_eq!(client.search("  ab  ").await.unwrap(), SearchOutcome::TooShort);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert_eq!(client.search("abc").await.unwrap(), SearchOutcome::Results(Vec::new()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_requests_carry_identity() {
    let (transport, _) = ScriptedTransport::new(|envelope| {
        assert_eq!(envelope.source, Some(applet("a")));
        Reply::success(&()).unwrap()
    });
    let client = WeaveClient::new(applet("a"), transport, &BridgeConfig::default());

    client.toggle_clipboard().await.unwrap();
}

#[tokio::test]
async fn test_remote_error_surfaces_message() {
    let (transport, _) = ScriptedTransport::new(|_| Reply::error("keychain locked"));
    let client = WeaveClient::new(applet("a"), transport, &BridgeConfig::default());

    let err = client.toggle_clipboard().await.unwrap_err();
    assert_eq!(err, ShimError::Remote("keychain locked".to_string()));
}

#[tokio::test]
async fn test_closed_reply_channel() {
    let (factory, mailbox) = transport::mailbox();
    let port = factory.port(transport::Origin {
        context: transport::ContextId(1),
        url: "applet://a".to_string(),
    });
    // Receive the message and drop its reply sender unanswered.
    let server = tokio::spawn(async move {
        let mut mailbox = mailbox;
        let posted = mailbox.recv().await.unwrap();
        drop(posted.reply);
    });

    let client = WeaveClient::new(applet("a"), Arc::new(port), &BridgeConfig::default());
    assert_eq!(client.toggle_clipboard().await.unwrap_err(), ShimError::ChannelClosed);
    server.await.unwrap();
}

#[tokio::test]
async fn test_bootstrap_sends_no_claim() {
    let (transport, calls) = ScriptedTransport::new(|envelope| {
        assert_eq!(envelope.source, None);
        assert!(envelope.request.is_bootstrap());
        Reply::success(&installed("a")).unwrap()
    });
    let client = WeaveClient::new(applet("a"), transport, &BridgeConfig::default());

    let bootstrap = client.bootstrap("view=applet-view&view-type=main").await.unwrap();
    assert_eq!(bootstrap.config, installed("a"));
    assert_eq!(bootstrap.info.view, RenderView::AppletView { view: AppletView::Main });
    assert_eq!(bootstrap.info.location, None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bootstrap_entry_view_resolves_location() {
    let location = HrlLocation {
        applet_id: AppletId("a".to_string()),
        role_name: "forum".to_string(),
        integrity_zome: "posts_integrity".to_string(),
        entry_type: "post".to_string(),
    };
    let expected = location.clone();
    let (transport, calls) = ScriptedTransport::new(move |envelope| match envelope.request {
        AppletToParentRequest::GetIframeConfig => Reply::success(&installed("a")).unwrap(),
        AppletToParentRequest::GetHrlLocation { .. } => Reply::success(&Some(location.clone())).unwrap(),
        other => panic!("unexpected request {}", other.kind()),
    });
    let client = WeaveClient::new(applet("a"), transport, &BridgeConfig::default());

    let query = weaverpc::format_render_view(&RenderView::AppletView {
        view: AppletView::Entry {
            hrl: Hrl::new("dna", "entry"),
            context: json!(null),
        },
    });
    let bootstrap = client.bootstrap(&query).await.unwrap();
    assert_eq!(bootstrap.info.location, Some(expected));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_bootstrap_fails_when_not_installed() {
    let (transport, _) = ScriptedTransport::new(|_| Reply::success(&IframeConfig::NotInstalled).unwrap());
    let client = WeaveClient::new(applet("a"), transport, &BridgeConfig::default());

    let err = client.bootstrap("view=applet-view&view-type=main").await.unwrap_err();
    assert_eq!(err, ShimError::NotInstalled(applet("a")));
}

#[tokio::test]
async fn test_bootstrap_rejects_bad_query_without_round_trip() {
    let (transport, calls) = ScriptedTransport::new(|_| Reply::success(&installed("a")).unwrap());
    let client = WeaveClient::new(applet("a"), transport, &BridgeConfig::default());

    let err = client.bootstrap("view=applet-view&view-type=block").await.unwrap_err();
    assert!(matches!(err, ShimError::Render(_)));

    let cross = WeaveClient::new(
        GuestIdentity::CrossApplet(ToolId("tool".to_string())),
        Arc::new(SilentTransport),
        &BridgeConfig::default(),
    );
    let err = cross.bootstrap("view=applet-view&view-type=main").await.unwrap_err();
    assert!(matches!(err, ShimError::ViewMismatch { .. }));

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Registry
// ============================================================================

#[test]
fn test_registry_resolves_only_registered_origins() {
    let registry = ContextRegistry::new();
    let (port, _inbox) = transport::guest_channel();
    let origin = registry.register(applet("a"), port);

    assert_eq!(registry.resolve(&origin), Some(applet("a")));

    let spoofed = transport::Origin {
        context: origin.context,
        url: "applet://b".to_string(),
    };
    assert_eq!(registry.resolve(&spoofed), None);

    registry.remove(origin.context).unwrap();
    assert_eq!(registry.resolve(&origin), None);
    assert!(registry.remove(origin.context).is_err());
}

#[test]
fn test_config_cache_lives_as_long_as_identity() {
    let registry = ContextRegistry::new();
    let (first_port, _first_inbox) = transport::guest_channel();
    let (second_port, _second_inbox) = transport::guest_channel();
    let first = registry.register(applet("a"), first_port);
    let second = registry.register(applet("a"), second_port);

    registry.cache_config(&applet("a"), installed("a"));
    registry.remove(first.context).unwrap();
    assert!(registry.cached_config(&applet("a")).is_some());

    registry.remove(second.context).unwrap();
    assert!(registry.cached_config(&applet("a")).is_none());

    // Nothing is cached for an identity without live contexts.
    registry.cache_config(&applet("a"), installed("a"));
    assert!(registry.cached_config(&applet("a")).is_none());
}

#[test]
fn test_config_cache_never_outlives_concurrent_removal() {
    let registry = Arc::new(ContextRegistry::new());

    for _ in 0..500 {
        let (port, _inbox) = transport::guest_channel();
        let origin = registry.register(applet("a"), port);

        let cacher = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                registry.cache_config(&applet("a"), installed("a"));
            })
        };
        let remover = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                registry.remove(origin.context).unwrap();
            })
        };
        cacher.join().unwrap();
        remover.join().unwrap();

        assert!(registry.is_empty());
        assert!(registry.cached_config(&applet("a")).is_none());
    }
}

#[test]
fn test_applet_ports_skip_closed_and_cross_applet_contexts() {
    let registry = ContextRegistry::new();
    let (a_port, _a_inbox) = transport::guest_channel();
    let (b_port, b_inbox) = transport::guest_channel();
    let (tool_port, _tool_inbox) = transport::guest_channel();
    registry.register(applet("a"), a_port);
    registry.register(applet("b"), b_port);
    registry.register(GuestIdentity::CrossApplet(ToolId("t".to_string())), tool_port);
    drop(b_inbox);

    let ids: Vec<AppletId> = registry.applet_ports().into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec![AppletId("a".to_string())]);
    assert!(registry.applet_port(&AppletId("b".to_string())).is_none());
}

// ============================================================================
// Host-owned state
// ============================================================================

#[tokio::test]
async fn test_clipboard_deduplicates() {
    let clipboard = Clipboard::new();
    let item = HrlWithContext {
        hrl: Hrl::new("dna", "entry"),
        context: json!({"thread": 1}),
    };

    assert!(clipboard.add(item.clone()).await);
    assert!(!clipboard.add(item.clone()).await);
    assert_eq!(clipboard.items().await, vec![item.clone()]);

    clipboard.remove(&item.hrl).await;
    assert!(clipboard.items().await.is_empty());
}

#[tokio::test]
async fn test_storage_buckets_are_per_identity() {
    let storage = GuestStorage::new();
    storage.set(&applet("a"), "theme".into(), json!("dark")).await.unwrap();
    storage.set(&applet("b"), "theme".into(), json!("light")).await.unwrap();

    assert_eq!(storage.get(&applet("a"), "theme"), Some(json!("dark")));
    assert_eq!(storage.get(&applet("b"), "theme"), Some(json!("light")));

    storage.clear(&applet("a")).await.unwrap();
    assert!(storage.get_all(&applet("a")).is_empty());
    assert_eq!(storage.get(&applet("b"), "theme"), Some(json!("light")));
}

#[tokio::test]
async fn test_storage_persists_across_reopen() {
    let path = std::env::temp_dir().join(format!("weaverun-storage-{}.json", rand::random::<u64>()));

    let storage = GuestStorage::open(&path).await.unwrap();
    storage.set(&applet("a"), "count".into(), json!(3)).await.unwrap();
    storage.set(&applet("a"), "gone".into(), json!(true)).await.unwrap();
    storage.remove(&applet("a"), "gone").await.unwrap();
    drop(storage);

    let reopened = GuestStorage::open(&path).await.unwrap();
    assert_eq!(reopened.get(&applet("a"), "count"), Some(json!(3)));
    assert_eq!(reopened.get(&applet("a"), "gone"), None);

    std::fs::remove_file(&path).unwrap();
}

#[tokio::test]
async fn test_storage_failed_write_changes_nothing() {
    let missing = std::env::temp_dir().join(format!("weaverun-missing-{}", rand::random::<u64>()));
    let storage = GuestStorage::open(missing.join("storage.json")).await.unwrap();

    assert!(storage.set(&applet("a"), "theme".into(), json!("dark")).await.is_err());
    assert_eq!(storage.get(&applet("a"), "theme"), None);

    // A store whose file has been replaced by a directory can no longer be written.
    let path = std::env::temp_dir().join(format!("weaverun-storage-{}.json", rand::random::<u64>()));
    let storage = GuestStorage::open(&path).await.unwrap();
    storage.set(&applet("a"), "theme".into(), json!("dark")).await.unwrap();
    std::fs::remove_file(&path).unwrap();
    std::fs::create_dir(&path).unwrap();

    assert!(storage.set(&applet("a"), "theme".into(), json!("light")).await.is_err());
    assert!(storage.remove(&applet("a"), "theme").await.is_err());
    assert!(storage.clear(&applet("a")).await.is_err());
    assert_eq!(storage.get(&applet("a"), "theme"), Some(json!("dark")));

    std::fs::remove_dir(&path).unwrap();
}

// ============================================================================
// Config and telemetry
// ============================================================================

#[test]
fn test_config_defaults() {
    let config = BridgeConfig::from_toml("").unwrap();
    assert_eq!(config, BridgeConfig::default());
    assert_eq!(config.call_timeout(), Duration::from_secs(30));
    assert_eq!(config.min_search_len, 3);
}

#[test]
fn test_config_overrides() {
    let config = BridgeConfig::from_toml(
        r#"
        call_timeout_ms = 500
        ping_timeout_ms = 100
        min_search_len = 2
        log_filter = "weaverun=debug"
        storage_path = "/tmp/weave.json"
        "#,
    )
    .unwrap();

    assert_eq!(config.call_timeout(), Duration::from_millis(500));
    assert_eq!(config.ping_timeout(), Duration::from_millis(100));
    assert_eq!(config.min_search_len, 2);
    assert_eq!(config.log_filter, "weaverun=debug");
    assert_eq!(config.storage_path, Some("/tmp/weave.json".into()));
}

#[test]
fn test_config_rejects_bad_values() {
    assert!(matches!(BridgeConfig::from_toml("ping_timeout_ms = 0"), Err(ConfigError::Invalid(_))));
    assert!(matches!(BridgeConfig::from_toml("retries = 3"), Err(ConfigError::Parse(_))));
    assert!(matches!(BridgeConfig::from_file("/nonexistent/weave.toml"), Err(ConfigError::Io(_))));
}

#[test]
fn test_init_tracing_is_idempotent() {
    telemetry::init_tracing("debug");
    assert!(!telemetry::init_tracing("debug"));
}
