use serde_json::json;

use crate::*;
use crate::render::decode_context;
use crate::render::encode_context;

// ============================================================================
//  RENDER VIEW PARSING
// ============================================================================

#[test]
fn test_parse_applet_main() {
    let view = parse_render_view("view=applet-view&view-type=main").unwrap();
    assert_eq!(view, RenderView::AppletView { view: AppletView::Main });
}

#[test]
fn test_parse_applet_block_matches_wire_shape() {
    let context = json!({ "thread": "abc", "depth": 2 });
    let query = format!(
        "view=applet-view&view-type=block&block=main&context={}",
        encode_context(&context)
    );

    let view = parse_render_view(&query).unwrap();
    assert_eq!(
        serde_json::to_value(&view).unwrap(),
        json!({
            "type": "applet-view",
            "view": { "type": "block", "block": "main", "context": context },
        })
    );
}

#[test]
fn test_parse_block_missing_block_token_reports_query() {
    let query = format!(
        "view=applet-view&view-type=block&context={}",
        encode_context(&json!(null))
    );

    let err = parse_render_view(&query).unwrap_err();
    assert_eq!(err.query, query);
    assert!(err.to_string().contains(&query));
    assert!(err.reason.contains("expected 'block'"), "got: {}", err.reason);
}

#[test]
fn test_parse_entry_view() {
    let query = format!(
        "?view=applet-view&view-type=entry&hrl=hrl://uhC0kDna/uhCkkPost&context={}",
        encode_context(&json!({ "tab": 1 }))
    );

    let view = parse_render_view(&query).unwrap();
    match view {
        RenderView::AppletView { view: AppletView::Entry { hrl, context } } => {
            assert_eq!(hrl, Hrl::new("uhC0kDna", "uhCkkPost"));
            assert_eq!(context, json!({ "tab": 1 }));
        }
        other => panic!("Expected entry view, got {:?}", other),
    }
}

#[test]
fn test_parse_cross_applet_and_background() {
    assert_eq!(
        parse_render_view("view=cross-applet-view&view-type=main").unwrap(),
        RenderView::CrossAppletView { view: CrossAppletView::Main }
    );
    assert_eq!(
        parse_render_view("view=background-service").unwrap(),
        RenderView::BackgroundService
    );
}

#[test]
fn test_parse_rejects_malformed_queries() {
    let bad = [
        "",
        "view-type=main&view=applet-view",
        "view=applet-view",
        "view=applet-view&view-type=unknown",
        "view=somewhere-else",
        "view=applet-view&view-type=main&extra=1",
        "view=applet-view&view-type=block&block=main&context=!!!",
        "view=applet-view&view-type=entry&hrl=not-an-hrl&context=bnVsbA",
        "view=cross-applet-view&view-type=entry",
        "view",
    ];

    for query in bad {
        let err = parse_render_view(query).unwrap_err();
        assert_eq!(err.query, query);
    }
}

#[test]
fn test_parse_is_pure() {
    let query = format!(
        "view=cross-applet-view&view-type=block&block=calendar&context={}",
        encode_context(&json!(["a", "b"]))
    );
    let first = parse_render_view(&query).unwrap();
    for _ in 0..10 {
        assert_eq!(parse_render_view(&query).unwrap(), first);
    }
}

#[test]
fn test_format_is_accepted_by_parse() {
    let views = vec![
        RenderView::AppletView { view: AppletView::Main },
        RenderView::AppletView {
            view: AppletView::Block { block: "board".into(), context: json!({ "id": 7 }) },
        },
        RenderView::AppletView {
            view: AppletView::Entry { hrl: Hrl::new("dna", "post"), context: json!("note") },
        },
        RenderView::CrossAppletView {
            view: CrossAppletView::Block { block: "feed".into(), context: json!(null) },
        },
        RenderView::BackgroundService,
    ];

    for view in views {
        let query = format_render_view(&view);
        assert_eq!(parse_render_view(&query).unwrap(), view, "query: {}", query);
    }
}

#[test]
fn test_format_escapes_reserved_characters() {
    let block = RenderView::AppletView {
        view: AppletView::Block { block: "a&b".into(), context: json!(null) },
    };
    let query = format_render_view(&block);
    assert!(!query.contains("a&b"), "query: {}", query);
    assert_eq!(parse_render_view(&query).unwrap(), block);

    let views = vec![
        RenderView::CrossAppletView {
            view: CrossAppletView::Block { block: "x=y 100%+".into(), context: json!({ "k": "v" }) },
        },
        RenderView::AppletView {
            view: AppletView::Entry { hrl: Hrl::new("dna&1", "post=2%"), context: json!(3) },
        },
    ];
    for view in views {
        let query = format_render_view(&view);
        assert_eq!(parse_render_view(&query).unwrap(), view, "query: {}", query);
    }
}

#[test]
fn test_context_encoding_is_query_safe() {
    let encoded = encode_context(&json!({ "q": "a&b=c", "n": [1, 2, 3] }));
    assert!(!encoded.contains('&'));
    assert!(!encoded.contains('='));
    assert_eq!(decode_context(&encoded).unwrap(), json!({ "q": "a&b=c", "n": [1, 2, 3] }));
}

// ============================================================================
//  IDENTITIES AND HRLS
// ============================================================================

#[test]
fn test_identity_from_origin_url() {
    assert_eq!(
        GuestIdentity::from_origin_url("applet://uhCkkApplet"),
        Some(GuestIdentity::Applet(AppletId("uhCkkApplet".into())))
    );
    assert_eq!(
        GuestIdentity::from_origin_url("cross-applet://tool-1/"),
        Some(GuestIdentity::CrossApplet(ToolId("tool-1".into())))
    );
    assert_eq!(GuestIdentity::from_origin_url("https://example.com"), None);
    assert_eq!(GuestIdentity::from_origin_url("applet://"), None);
    assert_eq!(GuestIdentity::from_origin_url("applet://a/b"), None);
}

#[test]
fn test_identity_origin_url_inverts_parse() {
    let identity = GuestIdentity::CrossApplet(ToolId("forum".into()));
    assert_eq!(GuestIdentity::from_origin_url(&identity.origin_url()), Some(identity));
}

#[test]
fn test_hrl_text_form() {
    let hrl: Hrl = "hrl://dna/resource".parse().unwrap();
    assert_eq!(hrl.to_string(), "hrl://dna/resource");

    assert!("dna/resource".parse::<Hrl>().is_err());
    assert!("hrl://dna".parse::<Hrl>().is_err());
    assert!("hrl:///resource".parse::<Hrl>().is_err());
    assert!("hrl://dna/a/b".parse::<Hrl>().is_err());
}

// ============================================================================
//  ENVELOPES AND REPLIES
// ============================================================================

#[test]
fn test_envelope_wire_shape() {
    let envelope = Envelope::new(
        AppletToParentRequest::LocalStorageSet { key: "k".into(), value: json!("v") },
        Some(GuestIdentity::Applet(AppletId("a1".into()))),
    );

    let value: serde_json::Value = serde_json::from_slice(&encode(&envelope).unwrap()).unwrap();
    assert_eq!(
        value,
        json!({
            "request": { "type": "local-storage-set", "key": "k", "value": "v" },
            "source": { "kind": "applet", "id": "a1" },
        })
    );
}

#[test]
fn test_decode_envelope_unknown_tag() {
    let bytes = br#"{"request":{"type":"format-disk"},"source":null}"#;
    match decode_envelope(bytes) {
        Err(ProtocolError::UnknownRequest(tag)) => assert_eq!(tag, "format-disk"),
        other => panic!("Expected UnknownRequest, got {:?}", other),
    }
}

#[test]
fn test_decode_envelope_known_tag_bad_payload() {
    let bytes = br#"{"request":{"type":"search"},"source":null}"#;
    assert!(matches!(decode_envelope(bytes), Err(ProtocolError::Decode(_))));
}

#[test]
fn test_decode_envelope_garbage() {
    assert!(matches!(decode_envelope(b"\xff\xfe"), Err(ProtocolError::Decode(_))));
    assert!(matches!(decode_envelope(b"{}"), Err(ProtocolError::Decode(_))));
}

#[test]
fn test_kinds_cover_every_variant() {
    let samples = vec![
        AppletToParentRequest::GetIframeConfig,
        AppletToParentRequest::GetHrlLocation { hrl: Hrl::new("d", "r") },
        AppletToParentRequest::OpenView {
            request: OpenViewRequest::AppletMain { applet_id: AppletId("a".into()) },
        },
        AppletToParentRequest::Search { filter: "abc".into() },
        AppletToParentRequest::GetEntryInfo { hrl: Hrl::new("d", "r") },
        AppletToParentRequest::HrlToClipboard {
            hrl: HrlWithContext { hrl: Hrl::new("d", "r"), context: json!(null) },
        },
        AppletToParentRequest::UserSelectHrl,
        AppletToParentRequest::ToggleClipboard,
        AppletToParentRequest::NotifyFrame { notifications: vec![] },
        AppletToParentRequest::GetAppletInfo { applet_id: AppletId("a".into()) },
        AppletToParentRequest::GetGroupProfile { group_id: GroupId("g".into()) },
        AppletToParentRequest::SignZomeCall {
            request: ZomeCallUnsigned {
                dna_hash: "d".into(),
                agent_pub_key: "k".into(),
                zome_name: "z".into(),
                fn_name: "f".into(),
                payload: json!(null),
                cap_secret: None,
                nonce: "n".into(),
                expires_at: 0,
            },
        },
        AppletToParentRequest::CallRemote {
            call: RemoteCall {
                operation: RemoteOperation { zome_name: "z".into(), fn_name: "f".into() },
                payload: json!(1),
            },
        },
        AppletToParentRequest::LocalStorageGet { key: "k".into() },
        AppletToParentRequest::LocalStorageGetAll,
        AppletToParentRequest::LocalStorageSet { key: "k".into(), value: json!(1) },
        AppletToParentRequest::LocalStorageRemove { key: "k".into() },
        AppletToParentRequest::LocalStorageClear,
    ];

    assert_eq!(samples.len(), AppletToParentRequest::KINDS.len());
    for request in samples {
        assert!(AppletToParentRequest::KINDS.contains(&request.kind()));

        let bytes = encode(&Envelope::new(request.clone(), None)).unwrap();
        assert_eq!(decode_envelope(&bytes).unwrap().request, request);
    }
}

#[test]
fn test_bootstrap_requests() {
    assert!(AppletToParentRequest::GetIframeConfig.is_bootstrap());
    assert!(AppletToParentRequest::GetHrlLocation { hrl: Hrl::new("d", "r") }.is_bootstrap());
    assert!(!AppletToParentRequest::LocalStorageClear.is_bootstrap());
}

#[test]
fn test_reply_into_result() {
    let ok = Reply::success(&Some(AppletId("a".into()))).unwrap();
    assert_eq!(
        ok.into_result::<Option<AppletId>>().unwrap(),
        Ok(Some(AppletId("a".into())))
    );

    let unit = Reply::success(&()).unwrap();
    assert_eq!(unit.into_result::<()>().unwrap(), Ok(()));

    let err = Reply::error("lookup miss");
    assert_eq!(err.into_result::<u32>().unwrap(), Err("lookup miss".to_string()));

    let wrong_shape = Reply::success(&"text").unwrap();
    assert!(wrong_shape.into_result::<u32>().is_err());
}

#[test]
fn test_parent_request_wire_shape() {
    let request = ParentToAppletRequest::Search { filter: "cats".into() };
    let bytes = encode(&request).unwrap();
    assert_eq!(decode::<ParentToAppletRequest>(&bytes).unwrap(), request);
    assert_eq!(request.kind(), "search");
}
