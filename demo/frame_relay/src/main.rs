mod config;
use config::FrameRelayConfig;
use framebus_core::telemetry::init_logging;
use framebus_core::{Endpoint, EndpointConfig, Event, Handler, MemoryHub, RAW_MESSAGE_EVENT};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Logging / tracing
    init_logging("info,framebus_core=info,frame_relay=info")?;

    // Load configuration (defaults + env + optional TOML overlay)
    let cfg = FrameRelayConfig::load();
    info!(target: "frame_relay", ?cfg, "Starting frame relay demo");

    // 1) Two contexts on one in-process host
    let hub = MemoryHub::with_capacity(cfg.queue_capacity)?;
    let host = hub.open_window(cfg.host.label.clone(), cfg.host.origin.clone());
    let frame = hub.open_window(cfg.frame.label.clone(), cfg.frame.origin.clone());

    // 2) One endpoint per side, each bound to the other's peer handle
    let mut host_cfg =
        EndpointConfig::new(frame.peer()).with_scope(cfg.channel.frame_scope.clone());
    let mut frame_cfg =
        EndpointConfig::new(host.peer()).with_scope(cfg.channel.host_scope.clone());
    if let Some(id) = &cfg.channel.connection_id {
        host_cfg = host_cfg.with_connection_id(id.clone());
        frame_cfg = frame_cfg.with_connection_id(id.clone());
    }
    if let Some(mode) = cfg.channel.isolation {
        host_cfg = host_cfg.with_isolation(mode);
        frame_cfg = frame_cfg.with_isolation(mode);
    }
    let host_ep = Endpoint::new(Arc::new(host.clone()), host_cfg)?;
    let frame_ep = Arc::new(Endpoint::new(Arc::new(frame.clone()), frame_cfg)?);

    // 3) Frame answers every ping with a pong carrying the same payload
    {
        let responder = Arc::downgrade(&frame_ep);
        frame_ep.on(
            "ping",
            &Handler::new(move |evt: &Event| {
                let Some(ep) = responder.upgrade() else {
                    return;
                };
                let data = evt.data().cloned().map(serde_json::Value::Object);
                if let Err(e) = ep.send("pong", data) {
                    warn!(target: "frame_relay", error = %e, "Failed to answer ping");
                }
            }),
        );
        frame_ep.on(
            RAW_MESSAGE_EVENT,
            &Handler::new(|evt: &Event| {
                info!(target: "frame_relay", raw = ?evt.raw_json(), "Frame got raw message");
            }),
        );
    }

    // 4) Host forwards pongs to the main task
    let (tx, mut rx) = mpsc::unbounded_channel();
    host_ep.on(
        "pong",
        &Handler::new(move |evt: &Event| {
            let _ = tx.send(evt.get("seq").and_then(|v| v.as_u64()));
        }),
    );
    host_ep.once(
        "all",
        &Handler::new(|evt: &Event| {
            info!(target: "frame_relay", event_type = %evt.event_type(), "First event seen by host");
        }),
    );

    // 5) Delivery loops, one per context
    let host_loop = tokio::spawn({
        let w = host.clone();
        async move { w.run().await }
    });
    let frame_loop = tokio::spawn({
        let w = frame.clone();
        async move { w.run().await }
    });

    host_ep.send_raw(&json!({"legacy": "hello from host"}))?;
    for seq in 0..cfg.rounds {
        host_ep.send("ping", Some(json!({ "seq": seq })))?;
        match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(got)) => info!(target: "frame_relay", sent = seq, received = ?got, "Round trip"),
            Ok(None) => break,
            Err(_) => {
                warn!(target: "frame_relay", seq, "No pong within 1s (check scopes and connection id)");
                break;
            }
        }
    }

    info!(target: "frame_relay", host = ?host_ep.stats(), frame = ?frame_ep.stats(), "Endpoint stats");

    // 6) Deterministic teardown
    host_ep.close();
    frame_ep.close();
    host.shutdown();
    frame.shutdown();
    host_loop.await?;
    frame_loop.await?;
    info!(target: "frame_relay", "Frame relay demo finished");
    Ok(())
}
