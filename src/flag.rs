//! a one-shot event with memory: firing before the waiter shows up is still
//! observed, and firing twice is harmless

use std::{
    sync::atomic::{AtomicBool, Ordering::Relaxed},
    task::Poll,
};

use futures::{future, task::AtomicWaker};

#[derive(Debug)]
pub struct Flag {
    waker: AtomicWaker,
    set: AtomicBool,
}

impl Flag {
    pub fn new() -> Self {
        Self {
            waker: AtomicWaker::new(),
            set: AtomicBool::new(false),
        }
    }

    pub fn signal(&self) {
        self.set.store(true, Relaxed);
        self.waker.wake();
    }

    /// wait until [`Flag::signal`] is called. resolves immediately if it
    /// already was
    pub async fn wait(&self) {
        future::poll_fn(|cx| {
            // quick check to avoid registration if already signalled
            if self.set.load(Relaxed) {
                return Poll::Ready(());
            }

            self.waker.register(cx.waker());

            // check again *after* register, or a signal racing with the
            // registration would be lost
            if self.set.load(Relaxed) {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }
}
