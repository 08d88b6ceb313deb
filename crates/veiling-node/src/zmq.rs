//! ZMQ push subscriptions to bitcoind's `rawblock` / `rawtx` publishers.
//!
//! ZMQ sockets are blocking, so each subscription runs on a dedicated OS
//! thread and forwards decoded [`ChainEvent`]s into the tokio channel the
//! broker event loop consumes. Delivery is best-effort — bitcoind drops
//! messages silently under load — which is why the poll scheduler remains
//! the authoritative fallback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bitcoin::{OutPoint, Transaction};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use veiling_core::oracle::ChainEvent;

/// Poll the shutdown flag at least this often.
const RECV_TIMEOUT_MS: i32 = 1_000;

#[derive(Clone, Copy, Debug)]
enum Feed {
    Block,
    Tx,
}

impl Feed {
    fn topic(self) -> &'static [u8] {
        match self {
            Feed::Block => b"rawblock",
            Feed::Tx => b"rawtx",
        }
    }
}

/// Handle over the subscriber threads. Dropping without [`stop`](Self::stop)
/// leaves the threads running until the process exits.
pub struct ZmqListener {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl ZmqListener {
    /// Spawn both subscriber threads. Socket setup happens on the threads;
    /// setup failures are logged and leave that feed dark (the poll
    /// scheduler still makes progress).
    pub fn start(block_url: &str, tx_url: &str, events: UnboundedSender<ChainEvent>) -> Self {
        let ctx = zmq::Context::new();
        let stop = Arc::new(AtomicBool::new(false));
        let handles = vec![
            spawn_subscriber(ctx.clone(), block_url.to_string(), Feed::Block, stop.clone(), events.clone()),
            spawn_subscriber(ctx, tx_url.to_string(), Feed::Tx, stop.clone(), events),
        ];
        Self { stop, handles }
    }

    /// Signal the threads and wait for them to drain.
    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn spawn_subscriber(
    ctx: zmq::Context,
    url: String,
    feed: Feed,
    stop: Arc<AtomicBool>,
    events: UnboundedSender<ChainEvent>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("zmq-{feed:?}").to_lowercase())
        .spawn(move || run_subscriber(ctx, url, feed, stop, events))
        .expect("spawn zmq subscriber thread")
}

fn run_subscriber(
    ctx: zmq::Context,
    url: String,
    feed: Feed,
    stop: Arc<AtomicBool>,
    events: UnboundedSender<ChainEvent>,
) {
    let socket = match ctx.socket(zmq::SUB) {
        Ok(socket) => socket,
        Err(e) => {
            error!(%url, ?feed, "failed to create zmq socket: {e}");
            return;
        }
    };
    if let Err(e) = socket
        .set_rcvtimeo(RECV_TIMEOUT_MS)
        .and_then(|_| socket.set_subscribe(feed.topic()))
        .and_then(|_| socket.connect(&url))
    {
        error!(%url, ?feed, "failed to set up zmq subscription: {e}");
        return;
    }
    info!(%url, ?feed, "zmq subscriber connected");

    while !stop.load(Ordering::Relaxed) {
        match socket.recv_multipart(0) {
            Ok(parts) => {
                if parts.len() < 2 || parts[0] != feed.topic() {
                    continue;
                }
                let event = match feed {
                    Feed::Block => Some(ChainEvent::NewBlock),
                    Feed::Tx => match decode_tx_inputs(&parts[1]) {
                        Some(inputs) => Some(ChainEvent::TxSeen { inputs }),
                        None => {
                            debug!(%url, "undecodable rawtx payload");
                            None
                        }
                    },
                };
                if let Some(event) = event {
                    if events.send(event).is_err() {
                        // Receiver gone: the broker is shutting down.
                        break;
                    }
                }
            }
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                warn!(%url, ?feed, "zmq receive failed: {e}");
                thread::sleep(Duration::from_secs(1));
            }
        }
    }
    debug!(%url, ?feed, "zmq subscriber stopped");
}

/// Consensus-decode a raw transaction and collect its input outpoints.
pub(crate) fn decode_tx_inputs(raw: &[u8]) -> Option<Vec<OutPoint>> {
    let tx: Transaction = bitcoin::consensus::encode::deserialize(raw).ok()?;
    Some(tx.input.iter().map(|input| input.previous_output).collect())
}
