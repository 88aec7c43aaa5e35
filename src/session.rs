//! Established-session actor, its mailbox handle, and the shared registry.
//!
//! A session owns the connection halves after the handshake. The upper
//! layer sends through a cloneable [Mailbox] (the actor's send loop is the
//! only writer, keeping the cipher state single-writer) and receives
//! through a [Handler]. The first fault on either loop terminates the
//! session: the other loop is aborted, the socket halves drop, and the
//! session deregisters from the [Registry] exactly once.

use crate::{connection::Connection, frame::Frame, Error};
use bytes::Bytes;
use commonware_cryptography::sha256::Digest;
use commonware_macros::select;
use commonware_runtime::{Clock, Handle, Metrics, Sink, Spawner, Stream};
use commonware_utils::SystemTimeExt;
use futures::{channel::mpsc, SinkExt, StreamExt};
use rand::{CryptoRng, Rng};
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
};
use tracing::debug;

/// Upper layer consuming inbound messages and providing initial traffic.
pub trait Handler: Clone + Send + Sync + 'static {
    /// Called for every inbound application message, in arrival order.
    fn deliver(&mut self, peer: &Digest, message: Bytes) -> impl Future<Output = ()> + Send;

    /// Messages pushed to the peer right after establishment (e.g. a
    /// router database store followed by a delivery status).
    fn initial_messages(&mut self) -> Vec<Bytes> {
        Vec::new()
    }
}

enum Message {
    Data(Bytes),
    TimeSync,
    Kill,
}

/// Handle to a running session.
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    /// Queue an application payload for sending.
    ///
    /// Fails with [Error::SessionClosed] once the session has terminated.
    pub async fn send(&mut self, message: Bytes) -> Result<(), Error> {
        self.sender
            .send(Message::Data(message))
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Queue a time sync frame carrying the send-time timestamp.
    pub async fn send_time_sync(&mut self) -> Result<(), Error> {
        self.sender
            .send(Message::TimeSync)
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Request termination. Idempotent: later calls (and calls racing the
    /// teardown) are no-ops.
    pub async fn kill(&mut self) {
        let _ = self.sender.send(Message::Kill).await;
    }
}

/// Live sessions, keyed by peer ident hash.
///
/// Sessions register on establishment and deregister exactly once on
/// termination; absence is how upper layers learn a peer is gone.
#[derive(Clone, Default)]
pub struct Registry {
    sessions: Arc<Mutex<HashMap<Digest, Mailbox>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: Digest, mailbox: Mailbox) {
        self.sessions
            .lock()
            .expect("registry lock poisoned")
            .insert(peer, mailbox);
    }

    pub fn remove(&self, peer: &Digest) {
        self.sessions
            .lock()
            .expect("registry lock poisoned")
            .remove(peer);
    }

    pub fn get(&self, peer: &Digest) -> Option<Mailbox> {
        self.sessions
            .lock()
            .expect("registry lock poisoned")
            .get(peer)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Actor driving one established session.
pub struct Session<E, Si, St, H>
where
    E: Clock + Spawner + Metrics + Rng + CryptoRng,
    Si: Sink,
    St: Stream,
    H: Handler,
{
    context: E,
    registry: Registry,
    handler: H,
    connection: Connection<Si, St>,
    control: mpsc::Receiver<Message>,
}

impl<E, Si, St, H> Session<E, Si, St, H>
where
    E: Clock + Spawner + Metrics + Rng + CryptoRng,
    Si: Sink,
    St: Stream,
    H: Handler,
{
    /// Create a session actor and its mailbox.
    pub fn new(
        context: E,
        registry: Registry,
        handler: H,
        connection: Connection<Si, St>,
        mailbox_size: usize,
    ) -> (Self, Mailbox) {
        let (sender, control) = mpsc::channel(mailbox_size);
        (
            Self {
                context,
                registry,
                handler,
                connection,
                control,
            },
            Mailbox::new(sender),
        )
    }

    /// Drive the session until a fault or kill, then deregister.
    ///
    /// Returns the fault that ended the session.
    pub async fn run(mut self) -> Error {
        let peer = self.connection.peer().ident_hash().clone();
        let (mut sender, mut receiver) = self.connection.split();

        // Initial traffic: a clock sample, then whatever the upper layer
        // wants pushed (typically a database store and a delivery status).
        let mut rng = self.context.clone();
        let now = self.context.current().epoch().as_secs() as u32;
        if let Err(err) = sender.send_time_sync(&mut rng, now).await {
            self.registry.remove(&peer);
            return err;
        }
        for message in self.handler.initial_messages() {
            if let Err(err) = sender.send(&mut rng, &message).await {
                self.registry.remove(&peer);
                return err;
            }
        }

        // Drain the mailbox into the socket.
        let mut control = self.control;
        let mut send_handle: Handle<Result<(), Error>> =
            self.context.with_label("sender").spawn(move |context| async move {
                let mut context = context;
                while let Some(message) = control.next().await {
                    match message {
                        Message::Data(message) => sender.send(&mut context, &message).await?,
                        Message::TimeSync => {
                            let now = context.current().epoch().as_secs() as u32;
                            sender.send_time_sync(&mut context, now).await?
                        }
                        Message::Kill => return Err(Error::SessionKilled),
                    }
                }
                Err(Error::SessionClosed)
            });

        // Parse inbound frames and hand messages to the upper layer.
        let mut handler = self.handler;
        let receive_peer = peer.clone();
        let mut receive_handle: Handle<Result<(), Error>> =
            self.context.with_label("receiver").spawn(move |_| async move {
                loop {
                    match receiver.receive().await? {
                        Frame::Message(message) => handler.deliver(&receive_peer, message).await,
                        Frame::TimeSync(timestamp) => debug!(timestamp, "time sync"),
                    }
                }
            });

        // The first loop to exit decides the session's fate; the other is
        // aborted so its socket half drops.
        let result = select! {
            send_result = &mut send_handle => { send_result },
            receive_result = &mut receive_handle => { receive_result },
        };
        send_handle.abort();
        receive_handle.abort();
        self.registry.remove(&peer);

        let err = match result {
            Ok(Err(err)) => err,
            Ok(Ok(())) => Error::SessionClosed,
            Err(err) => Error::UnexpectedFailure(err),
        };
        debug!(error = ?err, "session terminated");
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        connection::{Connection, IncomingConnection},
        identity::LocalRouter,
        Config,
    };
    use commonware_runtime::{deterministic, mocks, Runner};
    use std::time::Duration;

    #[derive(Clone)]
    struct TestHandler {
        received: Arc<Mutex<Vec<(Digest, Bytes)>>>,
        initial: Vec<Bytes>,
    }

    impl TestHandler {
        fn new(initial: Vec<Bytes>) -> Self {
            Self {
                received: Arc::new(Mutex::new(Vec::new())),
                initial,
            }
        }

        fn received(&self) -> Vec<(Digest, Bytes)> {
            self.received.lock().unwrap().clone()
        }
    }

    impl Handler for TestHandler {
        async fn deliver(&mut self, peer: &Digest, message: Bytes) {
            self.received.lock().unwrap().push((peer.clone(), message));
        }

        fn initial_messages(&mut self) -> Vec<Bytes> {
            self.initial.clone()
        }
    }

    fn config(local: LocalRouter) -> Config {
        Config {
            local,
            mailbox_size: 8,
            handshake_timeout: Duration::from_secs(10),
        }
    }

    async fn establish(
        context: deterministic::Context,
        dialer: LocalRouter,
        listener: LocalRouter,
    ) -> (
        Connection<mocks::Sink, mocks::Stream>,
        Connection<mocks::Sink, mocks::Stream>,
    ) {
        let listener_info = listener.router_info().clone();
        let (dialer_sink, listener_stream) = mocks::Channel::init();
        let (listener_sink, dialer_stream) = mocks::Channel::init();

        let listener_config = config(listener);
        let listener_handle = context.with_label("listener").spawn(move |context| async move {
            let incoming = IncomingConnection::verify(
                &context,
                listener_config,
                listener_sink,
                listener_stream,
            )
            .await
            .unwrap();
            Connection::upgrade_listener(context, incoming).await.unwrap()
        });
        let dialer_connection = Connection::upgrade_dialer(
            context.clone(),
            config(dialer),
            dialer_sink,
            dialer_stream,
            listener_info,
        )
        .await
        .unwrap();
        let listener_connection = listener_handle.await.unwrap();
        (dialer_connection, listener_connection)
    }

    #[test]
    fn test_exchange_and_initial_messages() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let dialer_local = LocalRouter::generate(&mut context);
            let listener_local = LocalRouter::generate(&mut context);
            let dialer_hash = dialer_local.ident_hash().clone();
            let listener_hash = listener_local.ident_hash().clone();

            let (dialer_connection, listener_connection) =
                establish(context.clone(), dialer_local, listener_local).await;

            // The dialer pushes two messages right after establishment.
            let initial = vec![
                Bytes::from_static(b"database store"),
                Bytes::from_static(b"delivery status"),
            ];
            let dialer_handler = TestHandler::new(initial.clone());
            let listener_handler = TestHandler::new(Vec::new());

            let dialer_registry = Registry::new();
            let listener_registry = Registry::new();

            let (dialer_session, mut dialer_mailbox) = Session::new(
                context.clone(),
                dialer_registry.clone(),
                dialer_handler.clone(),
                dialer_connection,
                8,
            );
            let (listener_session, listener_mailbox) = Session::new(
                context.clone(),
                listener_registry.clone(),
                listener_handler.clone(),
                listener_connection,
                8,
            );
            dialer_registry.register(listener_hash.clone(), dialer_mailbox.clone());
            listener_registry.register(dialer_hash.clone(), listener_mailbox.clone());

            context
                .with_label("dialer_session")
                .spawn(move |_| async move { dialer_session.run().await });
            context
                .with_label("listener_session")
                .spawn(move |_| async move { listener_session.run().await });

            // Queue a few application messages after the initial push.
            for i in 0..3u8 {
                dialer_mailbox.send(Bytes::from(vec![i; 10])).await.unwrap();
            }
            dialer_mailbox.send_time_sync().await.unwrap();
            context.sleep(Duration::from_millis(100)).await;

            let received = listener_handler.received();
            assert_eq!(received.len(), initial.len() + 3);
            for (i, message) in initial.iter().enumerate() {
                assert_eq!(&received[i].1, message);
                assert_eq!(received[i].0, dialer_hash);
            }
            for i in 0..3u8 {
                assert_eq!(received[initial.len() + i as usize].1, vec![i; 10]);
            }

            // The listener pushed nothing beyond its establishment time
            // sync, which the handler never sees.
            assert!(dialer_handler.received().is_empty());
        });
    }

    #[test]
    fn test_kill_is_idempotent() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let dialer_local = LocalRouter::generate(&mut context);
            let listener_local = LocalRouter::generate(&mut context);
            let listener_hash = listener_local.ident_hash().clone();

            let (dialer_connection, listener_connection) =
                establish(context.clone(), dialer_local, listener_local).await;
            // Keep the listener side alive but idle.
            let (_listener_sender, _listener_receiver) = listener_connection.split();

            let registry = Registry::new();
            let (session, mut mailbox) = Session::new(
                context.clone(),
                registry.clone(),
                TestHandler::new(Vec::new()),
                dialer_connection,
                8,
            );
            registry.register(listener_hash.clone(), mailbox.clone());
            assert_eq!(registry.len(), 1);

            let run_handle = context
                .with_label("session")
                .spawn(move |_| async move { session.run().await });

            // Two kills: the session terminates once and deregisters once.
            mailbox.kill().await;
            mailbox.kill().await;
            let err = run_handle.await.unwrap();
            assert!(matches!(err, Error::SessionKilled));
            assert!(registry.is_empty());

            // Sends after termination report a closed session.
            context.sleep(Duration::from_millis(50)).await;
            let result = mailbox.send(Bytes::from_static(b"late")).await;
            assert!(matches!(result, Err(Error::SessionClosed)));
        });
    }

    #[test]
    fn test_peer_disconnect_terminates() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let dialer_local = LocalRouter::generate(&mut context);
            let listener_local = LocalRouter::generate(&mut context);
            let listener_hash = listener_local.ident_hash().clone();

            let (dialer_connection, listener_connection) =
                establish(context.clone(), dialer_local, listener_local).await;

            let registry = Registry::new();
            let (session, mailbox) = Session::new(
                context.clone(),
                registry.clone(),
                TestHandler::new(Vec::new()),
                dialer_connection,
                8,
            );
            registry.register(listener_hash.clone(), mailbox);

            let run_handle = context
                .with_label("session")
                .spawn(move |_| async move { session.run().await });
            context.sleep(Duration::from_millis(10)).await;

            // Hanging up the peer side fails the receive loop.
            drop(listener_connection);
            let err = run_handle.await.unwrap();
            assert!(matches!(err, Error::RecvFailed(_)));
            assert!(registry.is_empty());
        });
    }
}
