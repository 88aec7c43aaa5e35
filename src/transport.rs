//! Dialing and accepting router connections.

use crate::{
    connection::{Connection, IncomingConnection},
    identity::RouterInfo,
    session::{Handler, Mailbox, Registry, Session},
    Config, Error,
};
use commonware_runtime::{Clock, Listener, Metrics, Network, Sink, Spawner, Stream};
use commonware_utils::hex;
use rand::{CryptoRng, Rng};
use std::{marker::PhantomData, net::SocketAddr};
use tracing::debug;

/// Dial a peer and establish a session.
///
/// Returns the session mailbox after the handshake completes. The session
/// actor runs until fault or kill and deregisters itself; connect errors
/// surface to the caller and no session is started.
pub async fn dial<Si, St, L, E, H>(
    context: E,
    config: Config,
    registry: Registry,
    handler: H,
    address: SocketAddr,
    peer: RouterInfo,
) -> Result<Mailbox, Error>
where
    Si: Sink,
    St: Stream,
    L: Listener<Sink = Si, Stream = St>,
    E: Spawner + Clock + Metrics + Network<Listener = L> + Rng + CryptoRng,
    H: Handler,
{
    let (sink, stream) = context.dial(address).await.map_err(Error::DialFailed)?;
    debug!(?address, "connected");

    let connection =
        Connection::upgrade_dialer(context.clone(), config.clone(), sink, stream, peer).await?;
    let peer = connection.peer().ident_hash().clone();
    debug!(peer = hex(&peer), "upgraded connection");

    let (session, mailbox) = Session::new(
        context.clone(),
        registry.clone(),
        handler,
        connection,
        config.mailbox_size,
    );
    registry.register(peer.clone(), mailbox.clone());
    context.with_label("session").spawn(move |_| async move {
        let err = session.run().await;
        debug!(peer = hex(&peer), error = ?err, "session closed");
    });
    Ok(mailbox)
}

/// Accepts inbound connections and runs the listener handshake for each.
pub struct Acceptor<Si, St, L, E, H>
where
    Si: Sink,
    St: Stream,
    L: Listener<Sink = Si, Stream = St>,
    E: Spawner + Clock + Metrics + Network<Listener = L> + Rng + CryptoRng,
    H: Handler,
{
    context: E,
    address: SocketAddr,
    config: Config,
    registry: Registry,
    handler: H,

    _phantom_si: PhantomData<Si>,
    _phantom_st: PhantomData<St>,
    _phantom_l: PhantomData<L>,
}

impl<Si, St, L, E, H> Acceptor<Si, St, L, E, H>
where
    Si: Sink,
    St: Stream,
    L: Listener<Sink = Si, Stream = St>,
    E: Spawner + Clock + Metrics + Network<Listener = L> + Rng + CryptoRng,
    H: Handler,
{
    pub fn new(
        context: E,
        address: SocketAddr,
        config: Config,
        registry: Registry,
        handler: H,
    ) -> Self {
        Self {
            context,
            address,
            config,
            registry,
            handler,

            _phantom_si: PhantomData,
            _phantom_st: PhantomData,
            _phantom_l: PhantomData,
        }
    }

    async fn establish(
        context: E,
        config: Config,
        registry: Registry,
        handler: H,
        sink: Si,
        stream: St,
    ) {
        let incoming =
            match IncomingConnection::verify(&context, config.clone(), sink, stream).await {
                Ok(incoming) => incoming,
                Err(err) => {
                    debug!(error = ?err, "failed to verify incoming connection");
                    return;
                }
            };
        let connection = match Connection::upgrade_listener(context.clone(), incoming).await {
            Ok(connection) => connection,
            Err(err) => {
                debug!(error = ?err, "failed to upgrade connection");
                return;
            }
        };
        let peer = connection.peer().ident_hash().clone();
        debug!(peer = hex(&peer), "upgraded connection");

        let (session, mailbox) = Session::new(
            context,
            registry.clone(),
            handler,
            connection,
            config.mailbox_size,
        );
        registry.register(peer.clone(), mailbox);
        let err = session.run().await;
        debug!(peer = hex(&peer), error = ?err, "session closed");
    }

    /// Bind and accept until the listener fails.
    ///
    /// Each accepted socket gets its own handshake task; a failed
    /// handshake only affects that socket.
    pub async fn run(self) -> Result<(), Error> {
        let mut listener = self
            .context
            .bind(self.address)
            .await
            .map_err(Error::BindFailed)?;
        debug!(address = ?self.address, "listening");

        loop {
            let (address, sink, stream) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    debug!(error = ?err, "failed to accept connection");
                    continue;
                }
            };
            debug!(ip = ?address.ip(), port = ?address.port(), "accepted incoming connection");

            let config = self.config.clone();
            let registry = self.registry.clone();
            let handler = self.handler.clone();
            self.context.with_label("establish").spawn(move |context| {
                Self::establish(context, config, registry, handler, sink, stream)
            });
        }
    }
}
