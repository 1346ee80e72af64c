//! the rendezvous matchmakers: pair one pending item with one ready
//! receiver and drive the delivery / confirm / retry dance

use std::{net::SocketAddr, sync::Arc};

use midden::{Message, RETRY_FOREVER};
use tokio::select;

use super::{Queue, Session, Shared};
use crate::shutdown::ShutdownHandle;

/// which queue pair a delivery came from. decides what happens to the item
/// when the receiver walks away without confirming
#[derive(Debug, Clone, Copy)]
enum Route {
    Main,
    DeadLetter,
}

/// pair items from the main queue with ready receivers.
///
/// deliveries run as independent tasks, so one receiver sitting on an
/// unconfirmed item never stalls deliveries to anybody else.
pub(crate) async fn run_main(shared: Arc<Shared>, mut handle: ShutdownHandle) {
    loop {
        let msg = select! {
            _ = handle.wait_for_shutdown() => return,
            msg = shared.main_items.pop() => msg,
        };
        let session = select! {
            _ = handle.wait_for_shutdown() => return,
            s = next_ready(&shared.main_ready) => s,
        };
        tokio::spawn(deliver(shared.clone(), msg, session, Route::Main));
    }
}

/// same dance over the dead letter queue pair
pub(crate) async fn run_dead_letter(shared: Arc<Shared>, mut handle: ShutdownHandle) {
    loop {
        let msg = select! {
            _ = handle.wait_for_shutdown() => return,
            msg = shared.dead_items.pop() => msg,
        };
        let session = select! {
            _ = handle.wait_for_shutdown() => return,
            s = next_ready(&shared.dead_ready) => s,
        };
        tokio::spawn(deliver(shared.clone(), msg, session, Route::DeadLetter));
    }
}

/// replacement for [`run_dead_letter`] when the dead letter queue is
/// disabled: every DEAD_RECEIVE is answered with NO_RECEIVE instead of
/// being parked forever
pub(crate) async fn refuse_dead_receivers(shared: Arc<Shared>, mut handle: ShutdownHandle) {
    let refusal = Message::no_receive().encode();
    loop {
        let session = select! {
            _ = handle.wait_for_shutdown() => return,
            s = next_ready(&shared.dead_ready) => s,
        };
        debug!(
            "refusing dead letter receive from client {}",
            session.peer()
        );
        if let Err(e) = session.write_bytes(&refusal).await {
            warn!("failed to refuse client {}: {e}", session.peer());
        }
    }
}

/// next receiver that is still around. sessions that closed while waiting
/// in line are dropped on the floor
async fn next_ready(queue: &Queue<Arc<Session>>) -> Arc<Session> {
    loop {
        let session = queue.pop().await;
        if session.is_closed() {
            debug!(
                "client {} went away while queued as a receiver",
                session.peer()
            );
            continue;
        }
        return session;
    }
}

/// one delivery: hand the item to the session, wait for CONFIRM or for the
/// session to die, then settle the item's fate
async fn deliver(shared: Arc<Shared>, msg: Message, session: Arc<Session>, route: Route) {
    let frame = msg.encode();
    // grab the signal before anything can re-arm it
    let flag = session.delivery_flag();
    session.begin_delivery(msg);

    match session.write_bytes(&frame).await {
        Ok(()) => flag.wait().await,
        // the socket is going down. skip the wait, the reclaim below works
        // the same whether the write or the confirmation failed
        Err(e) => debug!("delivery to client {} failed to write: {e}", session.peer()),
    }

    match session.take_held() {
        None => debug!("client {} confirmed the delivery", session.peer()),
        Some(msg) => requeue(&shared, msg, route, session.peer()),
    }
}

/// a delivery came back unconfirmed. retry it, park it in the dead letter
/// queue, or discard it, depending on where it came from and what budget
/// is left
fn requeue(shared: &Shared, mut msg: Message, route: Route, peer: SocketAddr) {
    match route {
        Route::Main => {
            if msg.retries == 0 {
                if shared.config.dead_letter {
                    info!("client {peer} went away and the item is out of retries, moving it to the dead letter queue");
                    shared.dead_items.push(msg);
                } else {
                    warn!("client {peer} went away and the item is out of retries, discarding it");
                }
            } else {
                if msg.retries != RETRY_FOREVER {
                    msg.retries -= 1;
                }
                info!(
                    "client {peer} went away, requeueing the item ({} retries left)",
                    msg.retries
                );
                shared.main_items.push(msg);
            }
        }
        // dead letters keep their budget untouched. they stay around until
        // somebody actually consumes them
        Route::DeadLetter => {
            info!("client {peer} went away, requeueing the dead letter");
            shared.dead_items.push(msg);
        }
    }
}
