//! the broker core: configuration, the four rendezvous queues, the accept
//! loop, and the dispatcher tasks that tie them together

pub mod dispatch;
pub mod session;

use std::sync::Arc;

use anyhow::Result;
use midden::Message;
use tokio::{net::TcpListener, select};

use crate::shutdown::{Shutdown, ShutdownHandle};
use session::Session;

/// runtime configuration, fixed for the life of the process
#[derive(Debug, Clone, Copy)]
pub struct BrokerConfig {
    /// park items whose retry budget ran out in a secondary queue instead
    /// of dropping them
    pub dead_letter: bool,
    /// override the retry budget of every incoming item
    pub force_retries: Option<u8>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            dead_letter: true,
            force_retries: None,
        }
    }
}

/// unbounded FIFO buffer that suspends consumers while empty.
///
/// flume channels are MPMC and keep per-channel order, which is everything
/// the rendezvous logic relies on
pub(crate) struct Queue<T> {
    tx: flume::Sender<T>,
    rx: flume::Receiver<T>,
}

impl<T> Queue<T> {
    fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    pub(crate) fn push(&self, value: T) {
        self.tx.send(value).expect("queue owns its receiver half")
    }

    pub(crate) async fn pop(&self) -> T {
        self.rx
            .recv_async()
            .await
            .expect("queue owns its sender half")
    }
}

/// the state shared between session read loops and the dispatchers
pub(crate) struct Shared {
    pub(crate) config: BrokerConfig,
    /// items waiting for a receiver
    pub(crate) main_items: Queue<Message>,
    /// items whose retry budget ran out
    pub(crate) dead_items: Queue<Message>,
    /// sessions that declared readiness with RECEIVE
    pub(crate) main_ready: Queue<Arc<Session>>,
    /// sessions that declared readiness with DEAD_RECEIVE
    pub(crate) dead_ready: Queue<Arc<Session>>,
}

pub struct Broker {
    shared: Arc<Shared>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                main_items: Queue::new(),
                dead_items: Queue::new(),
                main_ready: Queue::new(),
                dead_ready: Queue::new(),
            }),
        }
    }

    /// spawn the rendezvous dispatchers. call once, before [`Broker::serve`]
    pub fn spawn_dispatchers(&self, shutdown: &Shutdown) {
        tokio::spawn(dispatch::run_main(self.shared.clone(), shutdown.handle()));
        if self.shared.config.dead_letter {
            tokio::spawn(dispatch::run_dead_letter(
                self.shared.clone(),
                shutdown.handle(),
            ));
        } else {
            tokio::spawn(dispatch::refuse_dead_receivers(
                self.shared.clone(),
                shutdown.handle(),
            ));
        }
    }

    /// accept connections until shutdown, one session read loop per socket
    pub async fn serve(&self, listener: TcpListener, mut handle: ShutdownHandle) -> Result<()> {
        loop {
            select! {
                _ = handle.wait_for_shutdown() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    info!("client {peer} connected");
                    let shared = self.shared.clone();
                    let session_handle = handle.clone();
                    tokio::spawn(session::run(stream, peer, shared, session_handle));
                }
            }
        }
        Ok(())
    }
}
