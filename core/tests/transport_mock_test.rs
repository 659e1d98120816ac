use framebus_core::{
    BusError, Endpoint, EndpointConfig, Event, Handler, InboundHandler, InboundMessage, ListenerId,
    PeerHandle, TargetScope, Transport,
};
use mockall::mock;
use mockall::predicate::eq;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

mock! {
    pub Host {}

    impl Transport for Host {
        fn post(&self, message: String, target: &PeerHandle, scope: &TargetScope) -> framebus_core::Result<()>;
        fn listen(&self, handler: InboundHandler) -> ListenerId;
        fn unlisten(&self, id: ListenerId) -> bool;
    }
}

// Helper: mock that hands out listener 7 and keeps the registered handler
fn host_with_slot() -> (MockHost, Arc<Mutex<Option<InboundHandler>>>) {
    let slot = Arc::new(Mutex::new(None));
    let captured = Arc::clone(&slot);
    let mut host = MockHost::new();
    host.expect_listen().times(1).returning(move |handler| {
        *captured.lock().unwrap() = Some(handler);
        ListenerId(7)
    });
    host.expect_unlisten()
        .with(eq(ListenerId(7)))
        .times(1)
        .returning(|_| true);
    (host, slot)
}

#[test]
fn send_posts_envelope_to_configured_target_and_scope() {
    let peer = PeerHandle::new("frame");
    let expected_peer = peer.clone();
    let (mut host, _slot) = host_with_slot();
    host.expect_post()
        .withf(move |message, target, scope| {
            let v: Value = serde_json::from_str(message).unwrap();
            v == json!({"connectionID": "svc1", "type": "greet", "data": {"a": 1}})
                && *target == expected_peer
                && *scope == TargetScope::origin("https://widget.example")
        })
        .times(1)
        .returning(|_, _, _| Ok(()));

    let ep = Endpoint::new(
        Arc::new(host),
        EndpointConfig::new(peer)
            .with_connection_id("svc1")
            .with_scope(TargetScope::origin("https://widget.example")),
    )
    .unwrap();
    ep.send("greet", Some(json!({"a": 1}))).unwrap();
    assert_eq!(ep.stats().sent, 1);
}

#[test]
fn transport_failure_propagates_from_send() {
    let (mut host, _slot) = host_with_slot();
    host.expect_post()
        .times(1)
        .returning(|_, _, _| Err(BusError::Transport("host gone".into())));

    let ep = Endpoint::new(Arc::new(host), EndpointConfig::new(PeerHandle::new("frame"))).unwrap();
    let err = ep.send("greet", None).unwrap_err();
    assert!(matches!(err, BusError::Transport(_)));
    assert_eq!(ep.stats().sent, 0);
}

#[test]
fn invalid_payload_never_reaches_transport() {
    let (mut host, _slot) = host_with_slot();
    host.expect_post().times(0);

    let ep = Endpoint::new(Arc::new(host), EndpointConfig::new(PeerHandle::new("frame"))).unwrap();
    assert!(matches!(
        ep.send("greet", Some(json!(3.5))),
        Err(BusError::InvalidPayloadKind { kind: "number" })
    ));
}

#[test]
fn registered_listener_feeds_the_router() {
    let peer = PeerHandle::new("frame");
    let (host, slot) = host_with_slot();
    let ep = Endpoint::new(Arc::new(host), EndpointConfig::new(peer.clone())).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    ep.on(
        "hello",
        &Handler::new(move |evt: &Event| sink.lock().unwrap().push(evt.clone())),
    );

    let handler = slot.lock().unwrap().clone().expect("listener registered");
    handler(&InboundMessage {
        source: peer,
        origin: "https://widget.example".into(),
        payload: r#"{"connectionID":null,"type":"hello","data":{"x":true}}"#.into(),
    });

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("x"), Some(&json!(true)));
}

#[test]
fn listener_outliving_endpoint_is_inert() {
    let peer = PeerHandle::new("frame");
    let (host, slot) = host_with_slot();
    let ep = Endpoint::new(Arc::new(host), EndpointConfig::new(peer.clone())).unwrap();
    let handler = slot.lock().unwrap().clone().expect("listener registered");
    drop(ep);

    // Weak back-reference: nothing to dispatch into, no panic
    handler(&InboundMessage {
        source: peer,
        origin: String::new(),
        payload: r#"{"type":"hello"}"#.into(),
    });
}
