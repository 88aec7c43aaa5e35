//! Connection establishment and the established send/receive halves.
//!
//! The handshake runs as a single cooperative task that awaits each socket
//! read and write, so per-session serialization holds by construction. Any
//! short read, decode failure, hash mismatch, or signature failure surfaces
//! as an error and the caller drops the socket halves.

use crate::{
    crypto::{cbc, dh, dsa},
    frame::{self, Frame},
    handshake::{
        attestation, mask, Phase1, Phase2, Phase2Payload, Phase3Payload, Phase4Payload,
        PHASE3_LENGTH, PHASE4_LENGTH,
    },
    identity::RouterInfo,
    Config, Error,
};
use commonware_codec::{DecodeExt, Encode, FixedSize};
use commonware_cryptography::{sha256, Hasher, Sha256};
use commonware_macros::select;
use commonware_runtime::{Clock, Sink, Stream};
use commonware_utils::SystemTimeExt;
use rand::{CryptoRng, Rng};
use std::collections::VecDeque;
use tracing::debug;
use zeroize::Zeroize;

/// An incoming connection whose Phase 1 named us as the recipient.
pub struct IncomingConnection<Si: Sink, St: Stream> {
    config: Config,
    sink: Si,
    stream: St,
    deadline: std::time::SystemTime,
    phase1: Phase1,
}

impl<Si: Sink, St: Stream> IncomingConnection<Si, St> {
    /// Read Phase 1 and verify the exchange is bound to our identity.
    ///
    /// A Phase 1 masked against any other router's ident hash is rejected
    /// before anything is written back.
    pub async fn verify<E: Clock>(
        context: &E,
        config: Config,
        sink: Si,
        mut stream: St,
    ) -> Result<Self, Error> {
        let deadline = context.current() + config.handshake_timeout;

        let msg = select! {
            _ = context.sleep_until(deadline) => { return Err(Error::HandshakeTimeout) },
            result = stream.recv(vec![0; Phase1::SIZE]) => { result.map_err(Error::RecvFailed)? },
        };
        let phase1 = Phase1::decode(msg.as_ref()).map_err(Error::UnableToDecode)?;

        let digest = sha256::hash(&phase1.public_key);
        if mask(&digest, config.local.ident_hash()) != phase1.hx_xor_hi {
            return Err(Error::HandshakeNotForUs);
        }

        Ok(Self {
            config,
            sink,
            stream,
            deadline,
            phase1,
        })
    }
}

/// A fully established connection with an authenticated peer.
pub struct Connection<Si: Sink, St: Stream> {
    sink: Si,
    stream: St,
    peer: RouterInfo,
    encryptor: cbc::Encryptor,
    decryptor: cbc::Decryptor,
}

impl<Si: Sink, St: Stream> Connection<Si, St> {
    /// Create a connection from pre-established components.
    ///
    /// Useful in tests, or when upgrading a connection that has already
    /// been verified elsewhere.
    pub fn from_preestablished(
        sink: Si,
        stream: St,
        peer: RouterInfo,
        encryptor: cbc::Encryptor,
        decryptor: cbc::Decryptor,
    ) -> Self {
        Self {
            sink,
            stream,
            peer,
            encryptor,
            decryptor,
        }
    }

    /// Run the dialer side of the handshake against a known peer.
    pub async fn upgrade_dialer<R: Rng + CryptoRng + Clock>(
        mut context: R,
        config: Config,
        mut sink: Si,
        mut stream: St,
        peer: RouterInfo,
    ) -> Result<Self, Error> {
        let deadline = context.current() + config.handshake_timeout;
        let local = config.local;

        // Phase 1: our DH public value, bound to the peer's identity.
        let x = *local.identity().public_key();
        let hx = sha256::hash(&x);
        let phase1 = Phase1 {
            public_key: x,
            hx_xor_hi: mask(&hx, peer.ident_hash()),
        };
        select! {
            _ = context.sleep_until(deadline) => { return Err(Error::HandshakeTimeout) },
            result = sink.send(phase1.encode()) => { result.map_err(Error::SendFailed)? },
        }

        // Phase 2: the peer's DH public value and sealed confirmation.
        let msg = select! {
            _ = context.sleep_until(deadline) => { return Err(Error::HandshakeTimeout) },
            result = stream.recv(vec![0; Phase2::SIZE]) => { result.map_err(Error::RecvFailed)? },
        };
        let phase2 = Phase2::decode(msg.as_ref()).map_err(Error::UnableToDecode)?;
        let y = phase2.public_key;

        let mut secret = local.dh().agree(&y)?;
        let mut key = dh::session_key(&secret);
        secret.zeroize();
        let mut decryptor = cbc::Decryptor::new(&key, &y[240..]);
        let mut encryptor = cbc::Encryptor::new(&key, &phase1.hx_xor_hi[16..]);
        key.zeroize();

        let mut sealed = phase2.sealed;
        decryptor.process(&mut sealed);
        let payload = Phase2Payload::decode(&sealed[..]).map_err(Error::UnableToDecode)?;

        let mut hasher = Sha256::new();
        hasher.update(&x);
        hasher.update(&y);
        if hasher.finalize() != payload.hxy {
            return Err(Error::HashMismatch);
        }
        let ts_b = payload.timestamp;

        // Phase 3: our identity and the attestation signature.
        let ts_a = context.current().epoch().as_secs() as u32;
        let signature = local.sign(&attestation(&x, &y, peer.ident_hash(), ts_a, ts_b));
        let mut padding = [0u8; 15];
        context.fill(&mut padding);
        let mut msg = Phase3Payload {
            identity: local.identity().clone(),
            timestamp: ts_a,
            signature,
            padding,
        }
        .encode();
        encryptor.process(&mut msg[..]);
        select! {
            _ = context.sleep_until(deadline) => { return Err(Error::HandshakeTimeout) },
            result = sink.send(msg) => { result.map_err(Error::SendFailed)? },
        }

        // Phase 4: the peer signs the same attestation, naming us.
        let msg = select! {
            _ = context.sleep_until(deadline) => { return Err(Error::HandshakeTimeout) },
            result = stream.recv(vec![0; PHASE4_LENGTH]) => { result.map_err(Error::RecvFailed)? },
        };
        let mut sealed = msg.as_ref().to_vec();
        decryptor.process(&mut sealed);
        let payload = Phase4Payload::decode(&sealed[..]).map_err(Error::UnableToDecode)?;

        let expected = attestation(&x, &y, local.ident_hash(), ts_a, ts_b);
        if !dsa::verify(peer.identity().signing_key(), &expected, &payload.signature) {
            return Err(Error::InvalidSignature);
        }

        debug!("connection established");
        Ok(Self {
            sink,
            stream,
            peer,
            encryptor,
            decryptor,
        })
    }

    /// Run the listener side of the handshake for a verified incoming
    /// connection.
    ///
    /// The dialer's identity arrives in Phase 3; its ident hash is whatever
    /// that identity hashes to, authenticated by the signature it carries.
    pub async fn upgrade_listener<R: Rng + CryptoRng + Clock>(
        mut context: R,
        incoming: IncomingConnection<Si, St>,
    ) -> Result<Self, Error> {
        let config = incoming.config;
        let local = config.local;
        let phase1 = incoming.phase1;
        let mut sink = incoming.sink;
        let mut stream = incoming.stream;
        let deadline = incoming.deadline;

        let x = phase1.public_key;
        let y = *local.identity().public_key();

        // Phase 2: prove we derived the same secret, under the bootstrap IVs.
        let mut hasher = Sha256::new();
        hasher.update(&x);
        hasher.update(&y);
        let hxy = hasher.finalize();
        let ts_b = context.current().epoch().as_secs() as u32;
        let mut filler = [0u8; 12];
        context.fill(&mut filler);

        let mut secret = local.dh().agree(&x)?;
        let mut key = dh::session_key(&secret);
        secret.zeroize();
        let mut encryptor = cbc::Encryptor::new(&key, &y[240..]);
        let mut decryptor = cbc::Decryptor::new(&key, &phase1.hx_xor_hi[16..]);
        key.zeroize();

        let payload = Phase2Payload {
            hxy,
            timestamp: ts_b,
            filler,
        };
        let mut sealed: [u8; Phase2Payload::SIZE] = payload.encode()[..]
            .try_into()
            .expect("sealed span is 48 bytes");
        encryptor.process(&mut sealed);
        let phase2 = Phase2 {
            public_key: y,
            sealed,
        };
        select! {
            _ = context.sleep_until(deadline) => { return Err(Error::HandshakeTimeout) },
            result = sink.send(phase2.encode()) => { result.map_err(Error::SendFailed)? },
        }

        // Phase 3: the dialer's identity and attestation signature.
        let msg = select! {
            _ = context.sleep_until(deadline) => { return Err(Error::HandshakeTimeout) },
            result = stream.recv(vec![0; PHASE3_LENGTH]) => { result.map_err(Error::RecvFailed)? },
        };
        let mut sealed = msg.as_ref().to_vec();
        decryptor.process(&mut sealed);
        let payload = Phase3Payload::decode(&sealed[..]).map_err(Error::UnableToDecode)?;
        let peer = RouterInfo::new(payload.identity);
        let ts_a = payload.timestamp;

        let expected = attestation(&x, &y, local.ident_hash(), ts_a, ts_b);
        if !dsa::verify(peer.identity().signing_key(), &expected, &payload.signature) {
            return Err(Error::InvalidSignature);
        }

        // Phase 4: sign the attestation naming the dialer.
        let signature = local.sign(&attestation(&x, &y, peer.ident_hash(), ts_a, ts_b));
        let mut padding = [0u8; 8];
        context.fill(&mut padding);
        let mut msg = Phase4Payload { signature, padding }.encode();
        encryptor.process(&mut msg[..]);
        select! {
            _ = context.sleep_until(deadline) => { return Err(Error::HandshakeTimeout) },
            result = sink.send(msg) => { result.map_err(Error::SendFailed)? },
        }

        debug!("connection established");
        Ok(Self {
            sink,
            stream,
            peer,
            encryptor,
            decryptor,
        })
    }

    /// The authenticated peer.
    pub fn peer(&self) -> &RouterInfo {
        &self.peer
    }

    /// Split the connection into independently owned halves.
    ///
    /// Each half owns its cipher state, so there is at most one in-flight
    /// encrypt and one in-flight decrypt per session.
    pub fn split(self) -> (Sender<Si>, Receiver<St>) {
        (
            Sender {
                sink: self.sink,
                cipher: self.encryptor,
            },
            Receiver {
                stream: self.stream,
                decoder: frame::Decoder::new(self.decryptor),
                frames: VecDeque::new(),
            },
        )
    }
}

/// The sending half of a `Connection`.
pub struct Sender<Si: Sink> {
    sink: Si,
    cipher: cbc::Encryptor,
}

impl<Si: Sink> Sender<Si> {
    /// Frame, encrypt, and write a message.
    pub async fn send<R: Rng + CryptoRng>(
        &mut self,
        rng: &mut R,
        msg: &[u8],
    ) -> Result<(), Error> {
        let mut frame = frame::encode(rng, msg, false)?;
        self.cipher.process(&mut frame[..]);
        self.sink.send(frame).await.map_err(Error::SendFailed)
    }

    /// Write a time sync frame carrying the given timestamp.
    pub async fn send_time_sync<R: Rng + CryptoRng>(
        &mut self,
        rng: &mut R,
        timestamp: u32,
    ) -> Result<(), Error> {
        let mut frame = frame::encode(rng, &timestamp.to_be_bytes(), true)?;
        self.cipher.process(&mut frame[..]);
        self.sink.send(frame).await.map_err(Error::SendFailed)
    }
}

/// The receiving half of a `Connection`.
pub struct Receiver<St: Stream> {
    stream: St,
    decoder: frame::Decoder,
    frames: VecDeque<Frame>,
}

impl<St: Stream> Receiver<St> {
    /// Read until the next complete frame decodes.
    pub async fn receive(&mut self) -> Result<Frame, Error> {
        loop {
            if let Some(frame) = self.frames.pop_front() {
                return Ok(frame);
            }
            let required = self.decoder.required();
            let read = self
                .stream
                .recv(vec![0; required])
                .await
                .map_err(Error::RecvFailed)?;
            self.decoder.push(read.as_ref(), &mut self.frames)?;
        }
    }
}
