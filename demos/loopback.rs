//! In-memory loopback link driven through the pool.
//!
//! Demonstrates:
//! - Implementing `Transport` / `Link` for a custom device
//! - Discovery failures being retried at the configured interval
//! - Sharing one link between a `SerialIn` and a `SerialOut`
//! - Closing the port through the pool
//!
//! Usage:
//!   cargo run --example loopback
//!   cargo run --example loopback -- --debug

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bt_serial_pool::{
    Address, Channel, Link, LinkError, LinkEvent, LinkEvents, Message, PortConfig, Result,
    SerialIn, SerialOut, SerialPool, link_events,
};
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Loopback Transport
// ============================================================================

/// Echoes every write back as inbound data.
///
/// The first `missing_for` discoveries fail, as if the device were still
/// powering up.
struct Loopback {
    discoveries: Arc<AtomicUsize>,
    missing_for: usize,
    events: Option<mpsc::UnboundedSender<LinkEvent>>,
}

#[async_trait]
impl Link for Loopback {
    async fn find_channel(&mut self, _address: &Address) -> StdResult<Channel, LinkError> {
        if self.discoveries.fetch_add(1, Ordering::SeqCst) < self.missing_for {
            return Err(LinkError::new("device not advertising"));
        }
        Ok(Channel(1))
    }

    async fn connect(
        &mut self,
        _address: &Address,
        _channel: Channel,
    ) -> StdResult<LinkEvents, LinkError> {
        let (tx, rx) = link_events();
        self.events = Some(tx);
        Ok(rx)
    }

    async fn write(&mut self, payload: Bytes) -> StdResult<usize, LinkError> {
        let tx = self
            .events
            .as_ref()
            .ok_or_else(|| LinkError::new("not connected"))?;
        let len = payload.len();
        tx.send(LinkEvent::Data(payload))
            .map_err(|_| LinkError::new("loopback closed"))?;
        Ok(len)
    }

    fn is_open(&self) -> bool {
        self.events.is_some()
    }

    async fn close(&mut self) -> StdResult<(), LinkError> {
        self.events = None;
        Ok(())
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let debug = std::env::args().any(|a| a == "--debug");
    let filter = if debug {
        "bt_serial_pool=trace"
    } else {
        "bt_serial_pool=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    println!("=== Loopback ===\n");

    let discoveries = Arc::new(AtomicUsize::new(0));
    let pool = Arc::new(SerialPool::new(move |_: &Address| -> Box<dyn Link> {
        Box::new(Loopback {
            discoveries: Arc::clone(&discoveries),
            missing_for: 2,
            events: None,
        })
    }));

    let config = PortConfig::from_json(r#"{"btAddress":"00:11:22:33:44:55","serialReconnectTime":1}"#)?;
    let mut input = SerialIn::new(Arc::clone(&pool), &config);
    let output = SerialOut::new(Arc::clone(&pool), &config);

    println!("[Connect] Waiting for the device to show up...");
    while !output.port().is_open() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    println!("          ✓ Link open\n");

    for text in ["ping", "hello", "bye"] {
        output.input(&Message::new(text.as_bytes().to_vec())).await?;
        if let Some(Message { payload: Some(echo) }) = input.recv().await {
            println!("[Echo] {}", String::from_utf8_lossy(&echo));
        }
    }

    output.close().await;
    println!("\n[Close] Pool now holds {} port(s)", pool.len());

    Ok(())
}
