//! per-connection state and the read loop that drives it

use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering::Relaxed},
        Arc, Mutex,
    },
};

use midden::{read_message, Message, MessageKind, WireError};
use tokio::{io::AsyncWriteExt, net::tcp::OwnedWriteHalf, net::TcpStream, select};

use super::Shared;
use crate::{flag::Flag, shutdown::ShutdownHandle};

/// broker side record of one TCP connection.
///
/// all fields except `held` change only on the read loop task. `held` is
/// filled (empty -> set) by a delivery task and cleared (set -> empty) by
/// the read loop on CONFIRM, or taken back by the delivery task after the
/// session closed; the two sides synchronize on the delivery flag.
pub struct Session {
    /// remote address, for logs only
    peer: SocketAddr,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    /// the one item this session currently has to confirm
    held: Mutex<Option<Message>>,
    /// fires when the held item is confirmed or the session closes.
    /// re-armed with a fresh instance each time the session declares
    /// readiness, so a latched signal is never wiped out from under a
    /// delivery task that has not awaited it yet
    delivery: Mutex<Arc<Flag>>,
    /// latch, false -> true once
    closed: AtomicBool,
}

impl Session {
    fn new(peer: SocketAddr, writer: OwnedWriteHalf) -> Arc<Self> {
        Arc::new(Self {
            peer,
            writer: tokio::sync::Mutex::new(writer),
            held: Mutex::new(None),
            delivery: Mutex::new(Arc::new(Flag::new())),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Relaxed)
    }

    /// the current delivery signal. a delivery task grabs this before
    /// anything can re-arm it
    pub(crate) fn delivery_flag(&self) -> Arc<Flag> {
        self.delivery.lock().unwrap().clone()
    }

    fn arm_delivery(&self) {
        *self.delivery.lock().unwrap() = Arc::new(Flag::new());
    }

    fn signal_delivery(&self) {
        self.delivery.lock().unwrap().signal();
    }

    pub(crate) fn begin_delivery(&self, msg: Message) {
        let mut held = self.held.lock().unwrap();
        debug_assert!(held.is_none(), "a session holds at most one item");
        *held = Some(msg);
    }

    /// take back whatever was not confirmed
    pub(crate) fn take_held(&self) -> Option<Message> {
        self.held.lock().unwrap().take()
    }

    fn holds_item(&self) -> bool {
        self.held.lock().unwrap().is_some()
    }

    pub(crate) async fn write_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    async fn close(&self) {
        self.closed.store(true, Relaxed);
        // resolves any delivery still waiting on this session
        self.signal_delivery();
        let _ = self.writer.lock().await.shutdown().await;
    }
}

/// apply one decoded frame to a session. everything here is non-blocking:
/// queue pushes go to unbounded channels and out-of-sequence frames are
/// dropped rather than argued about
fn handle_frame(session: &Arc<Session>, mut msg: Message, shared: &Shared) {
    match msg.kind {
        MessageKind::Send => {
            if let Some(budget) = shared.config.force_retries {
                msg.retries = budget;
            }
            debug!(
                "client {} enqueued an item ({} bytes, {} retries)",
                session.peer,
                msg.payload.len(),
                msg.retries
            );
            shared.main_items.push(msg);
        }
        MessageKind::Receive => {
            if session.holds_item() {
                warn!(
                    "client {} asked to receive before confirming its delivery, dropping the frame",
                    session.peer
                );
                return;
            }
            debug!("client {} is ready to receive", session.peer);
            session.arm_delivery();
            shared.main_ready.push(session.clone());
        }
        MessageKind::DeadReceive => {
            if session.holds_item() {
                warn!(
                    "client {} asked for dead letters before confirming its delivery, dropping the frame",
                    session.peer
                );
                return;
            }
            debug!("client {} is ready to receive dead letters", session.peer);
            session.arm_delivery();
            shared.dead_ready.push(session.clone());
        }
        MessageKind::Confirm => {
            if session.take_held().is_none() {
                warn!(
                    "client {} confirmed with no delivery pending, dropping the frame",
                    session.peer
                );
                return;
            }
            debug!("client {} confirmed its delivery", session.peer);
            session.signal_delivery();
        }
        MessageKind::NoReceive | MessageKind::Other(_) => {
            warn!(
                "client {} sent a {:?} frame, dropping it",
                session.peer, msg.kind
            );
        }
    }
}

/// decode frames off one connection and apply them until the peer goes
/// away, a frame is unsalvageable, or the broker shuts down
pub(crate) async fn run(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    mut handle: ShutdownHandle,
) {
    let (mut reader, writer) = stream.into_split();
    let session = Session::new(peer, writer);

    loop {
        let msg = select! {
            _ = handle.wait_for_shutdown() => break,
            msg = read_message(&mut reader) => msg,
        };
        match msg {
            Ok(msg) => handle_frame(&session, msg, &shared),
            Err(WireError::Closed) => {
                info!("client {peer} disconnected");
                break;
            }
            // no resync after a framing error, the session is done for
            Err(e @ (WireError::BadMagic(..) | WireError::Truncated(_))) => {
                warn!("dropping client {peer}: {e}");
                break;
            }
            Err(WireError::Io(e)) => {
                warn!("client {peer} io error: {e}");
                break;
            }
        }
    }

    session.close().await;
}
