//! client side of the broker protocol

use std::io;

use thiserror::Error;
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tracing::debug;

use crate::wire::{read_message, Message, MessageKind, WireError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("still working on an unconfirmed delivery")]
    BusyReceiving,
    #[error("no delivery to confirm")]
    NothingToConfirm,
    /// the broker answered a receive with NO_RECEIVE
    #[error("broker refused: {0}")]
    Refused(&'static str),
    /// the broker answered a receive with something that is neither a
    /// delivery nor a refusal
    #[error("broker answered with an unexpected {0:?} frame")]
    Protocol(MessageKind),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// a connection to the broker.
///
/// state machine: disconnected, connected, and awaiting a delivery
/// ([`Client::receive`] got an item that has not been confirmed yet).
/// `send` is allowed in both connected states; a second `receive` is not
/// until the first delivery was confirmed.
///
/// disconnecting (or crashing) while a delivery is unconfirmed makes the
/// broker requeue the item - that is the at-least-once part of the contract.
#[derive(Debug, Default)]
pub struct Client {
    stream: Option<TcpStream>,
    receiving: bool,
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn connect(&mut self, host: &str, port: u16) -> Result<(), ClientError> {
        if self.stream.is_some() {
            return Err(ClientError::AlreadyConnected);
        }
        self.stream = Some(TcpStream::connect((host, port)).await?);
        debug!("connected to {host}:{port}");
        Ok(())
    }

    /// enqueue one item with the given retry budget (255 = infinite)
    pub async fn send(&mut self, payload: &[u8], retries: u8) -> Result<(), ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        Message::send(payload.to_vec(), retries)
            .write_to(stream)
            .await?;
        Ok(())
    }

    /// declare readiness and block until the broker hands over one item
    /// (from the dead letter queue when `dead` is set).
    ///
    /// the returned payload must be acknowledged with [`Client::confirm`]
    /// before the next `receive`.
    pub async fn receive(&mut self, dead: bool) -> Result<Vec<u8>, ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        if self.receiving {
            return Err(ClientError::BusyReceiving);
        }

        let request = if dead {
            Message::dead_receive()
        } else {
            Message::receive()
        };
        request.write_to(stream).await?;
        self.receiving = true;

        let msg = read_message(stream).await?;
        match msg.kind {
            MessageKind::Send => {
                debug!("got a delivery of {} bytes", msg.payload.len());
                Ok(msg.payload)
            }
            MessageKind::NoReceive => {
                self.receiving = false;
                Err(ClientError::Refused(if dead {
                    "no dead letter queue"
                } else {
                    "blocks receiving"
                }))
            }
            other => {
                // the stream may sit mid-frame now and there is no resync,
                // so the connection is not reusable
                self.stream = None;
                self.receiving = false;
                Err(ClientError::Protocol(other))
            }
        }
    }

    /// acknowledge the last delivery. the broker forgets the item for good
    pub async fn confirm(&mut self) -> Result<(), ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        if !self.receiving {
            return Err(ClientError::NothingToConfirm);
        }
        Message::confirm().write_to(stream).await?;
        self.receiving = false;
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<(), ClientError> {
        let mut stream = self.stream.take().ok_or(ClientError::NotConnected)?;
        self.receiving = false;
        stream.flush().await?;
        stream.shutdown().await?;
        debug!("disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::future::Future;

    use tokio::net::TcpListener;

    use super::*;

    /// one-connection broker stand-in on an ephemeral port
    async fn fake_broker<F, Fut>(behavior: F) -> u16
    where
        F: FnOnce(TcpStream) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            behavior(stream).await;
        });
        port
    }

    #[tokio::test]
    async fn operations_require_a_connection() {
        let mut client = Client::new();
        assert!(matches!(
            client.send(b"x", 0).await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.receive(false).await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.confirm().await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.disconnect().await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn connecting_twice_fails() {
        let port = fake_broker(|_stream| async {}).await;
        let mut client = Client::new();
        client.connect("127.0.0.1", port).await.unwrap();
        assert!(matches!(
            client.connect("127.0.0.1", port).await,
            Err(ClientError::AlreadyConnected)
        ));
    }

    #[tokio::test]
    async fn receive_then_confirm() {
        let port = fake_broker(|mut stream| async move {
            let req = read_message(&mut stream).await.unwrap();
            assert_eq!(req.kind, MessageKind::Receive);
            Message::send(b"abc".to_vec(), 0)
                .write_to(&mut stream)
                .await
                .unwrap();
            let ack = read_message(&mut stream).await.unwrap();
            assert_eq!(ack.kind, MessageKind::Confirm);
        })
        .await;

        let mut client = Client::new();
        client.connect("127.0.0.1", port).await.unwrap();
        let payload = client.receive(false).await.unwrap();
        assert_eq!(payload, b"abc");
        client.confirm().await.unwrap();
        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn send_is_allowed_while_a_delivery_is_unconfirmed() {
        let port = fake_broker(|mut stream| async move {
            let req = read_message(&mut stream).await.unwrap();
            assert_eq!(req.kind, MessageKind::Receive);
            Message::send(b"work".to_vec(), 0)
                .write_to(&mut stream)
                .await
                .unwrap();
            let sent = read_message(&mut stream).await.unwrap();
            assert_eq!(sent.kind, MessageKind::Send);
            assert_eq!(sent.payload, b"followup");
        })
        .await;

        let mut client = Client::new();
        client.connect("127.0.0.1", port).await.unwrap();
        client.receive(false).await.unwrap();
        client.send(b"followup", 1).await.unwrap();
        // but a second receive is not
        assert!(matches!(
            client.receive(false).await,
            Err(ClientError::BusyReceiving)
        ));
    }

    #[tokio::test]
    async fn confirm_without_a_delivery_fails() {
        let port = fake_broker(|_stream| async {}).await;
        let mut client = Client::new();
        client.connect("127.0.0.1", port).await.unwrap();
        assert!(matches!(
            client.confirm().await,
            Err(ClientError::NothingToConfirm)
        ));
    }

    #[tokio::test]
    async fn refusal_reasons_name_the_queue() {
        for (dead, reason) in [(true, "no dead letter queue"), (false, "blocks receiving")] {
            let port = fake_broker(|mut stream| async move {
                read_message(&mut stream).await.unwrap();
                Message::no_receive().write_to(&mut stream).await.unwrap();
            })
            .await;

            let mut client = Client::new();
            client.connect("127.0.0.1", port).await.unwrap();
            match client.receive(dead).await {
                Err(ClientError::Refused(r)) => assert_eq!(r, reason),
                other => panic!("expected a refusal, got {other:?}"),
            }
            // a refusal leaves the client connected and ready again
            assert!(client.is_connected());
            assert!(matches!(
                client.confirm().await,
                Err(ClientError::NothingToConfirm)
            ));
        }
    }

    #[tokio::test]
    async fn unexpected_answer_drops_the_connection() {
        let port = fake_broker(|mut stream| async move {
            read_message(&mut stream).await.unwrap();
            Message::confirm().write_to(&mut stream).await.unwrap();
        })
        .await;

        let mut client = Client::new();
        client.connect("127.0.0.1", port).await.unwrap();
        assert!(matches!(
            client.receive(false).await,
            Err(ClientError::Protocol(MessageKind::Confirm))
        ));
        assert!(!client.is_connected());
    }
}
