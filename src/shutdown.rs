//! graceful shutdown plumbing: a broadcast trigger plus a completion channel
//! that resolves once every task holding a handle has dropped it

use tokio::{
    select, signal,
    sync::{broadcast, mpsc},
};

#[derive(Debug)]
pub struct ShutdownHandle {
    // holding this is what keeps `wait_for_completion` pending
    _completion: mpsc::Sender<()>,
    listener: broadcast::Receiver<()>,
    trigger: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub async fn wait_for_shutdown(&mut self) {
        let _ = self.listener.recv().await;
    }

    pub fn trigger_shutdown(&mut self) {
        let _ = self.trigger.send(());
    }
}

impl Clone for ShutdownHandle {
    fn clone(&self) -> Self {
        Self {
            _completion: self._completion.clone(),
            listener: self.trigger.subscribe(),
            trigger: self.trigger.clone(),
        }
    }
}

pub struct Shutdown {
    tx: Option<mpsc::Sender<()>>,
    rx: mpsc::Receiver<()>,
    trigger: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        let (trigger, _) = broadcast::channel(1);
        Self {
            tx: Some(tx),
            rx,
            trigger,
        }
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            _completion: self
                .tx
                .clone()
                .expect("handle() called after wait_for_completion()"),
            listener: self.trigger.subscribe(),
            trigger: self.trigger.clone(),
        }
    }

    /// resolves once every outstanding handle is gone. all handles must be
    /// created before this is called
    pub async fn wait_for_completion(&mut self) {
        drop(self.tx.take());
        self.rx.recv().await;
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.trigger.send(());
    }
}

/// spawn a task that turns the first ctrl+c into a shutdown trigger
pub fn trap_ctrl_c(mut handle: ShutdownHandle) {
    tokio::spawn(async move {
        select! {
            res = signal::ctrl_c() => {
                if res.is_err() {
                    error!("failed to listen for the ctrl+c signal, shutting down now instead");
                }
                info!("shutdown requested");
                handle.trigger_shutdown();
            }
            _ = handle.wait_for_shutdown() => {}
        }
    });
}
