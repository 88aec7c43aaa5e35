//! Authenticated, encrypted router-to-router transport sessions.
//!
//! Implements the legacy NTCP session protocol used between I2P routers: a
//! four-phase Diffie-Hellman/DSA handshake that authenticates both routers
//! and keys one AES-256-CBC stream per direction, followed by
//! length-prefixed, checksummed message frames multiplexed over a single
//! TCP connection in both directions.
//!
//! # Design
//!
//! ## Handshake
//!
//! The dialer is the party that connects to a known address and router
//! identity; the recipient of the connection is the listener. Both parties
//! hold a long-lived 2048-bit DH keypair whose public value doubles as the
//! first field of their router identity, and a DSA-1024 signing keypair
//! published in the same identity. Four fixed-layout records are exchanged:
//!
//! ```text
//! Phase 1 (dialer -> listener, 288 bytes):
//! +----------------------+------------------------------+
//! |        X (256)       | SHA256(X) ^ H(listener) (32) |
//! +----------------------+------------------------------+
//!
//! Phase 2 (listener -> dialer, 288 bytes):
//! +----------------------+------------------------------------+
//! |        Y (256)       | AES { SHA256(X|Y) | tsB | filler } |
//! +----------------------+------------------------------------+
//!
//! Phase 3 (dialer -> listener, 448 bytes):
//! AES { size=387 | router identity | tsA | DSA sig | padding }
//!
//! Phase 4 (listener -> dialer, 48 bytes):
//! AES { DSA sig | padding }
//! ```
//!
//! The shared DH secret is reduced to an AES-256 key; Phase 2 is encrypted
//! under the bootstrap IVs `Y[240..256]` (listener to dialer) and
//! `(SHA256(X) ^ H)[16..32]` (dialer to listener), and every later record
//! is chained off the last ciphertext block of the previous record in the
//! same direction. Both signatures cover the same 552-byte attestation
//! `X | Y | recipient ident hash | tsA | tsB`, binding the key exchange to
//! both long-lived identities. Any short read, hash mismatch, or signature
//! failure tears the connection down; a configurable deadline bounds the
//! whole exchange so a silent peer cannot hold a pending connection open.
//!
//! ## Framing
//!
//! After Phase 4 both directions carry frames under their own CBC state:
//!
//! ```text
//! +----------+------------------+------------------+-------------+
//! | size (2) |  payload (size)  |  padding (0..15) | Adler32 (4) |
//! +----------+------------------+------------------+-------------+
//! ```
//!
//! The total length is always a whole number of cipher blocks. A zero
//! `size` marks a time sync: a 4-byte timestamp used as keepalive and
//! clock sample. The decoder tolerates arbitrary TCP segmentation,
//! decrypting whole blocks as they arrive and parsing frames greedily;
//! a decoded `size` above [MAX_MESSAGE_SIZE] or a checksum mismatch is
//! unrecoverable and terminates the session.
//!
//! ## Sessions
//!
//! An established connection is owned by a session actor holding the
//! socket halves and both cipher states. The upper layer talks to it
//! through a cloneable [Mailbox] (queued sends keep the cipher state
//! single-writer) and receives inbound messages through a [Handler].
//! Live sessions are tracked in a shared [Registry]; a session
//! deregisters itself exactly once when it terminates, whether through a
//! kill request, a socket fault, or a protocol fault.

use std::time::Duration;
use thiserror::Error as ThisError;

pub mod crypto;
mod connection;
mod frame;
mod handshake;
mod identity;
mod session;
mod transport;

pub use connection::{Connection, IncomingConnection, Receiver, Sender};
pub use frame::Frame;
pub use identity::{LocalRouter, RouterIdentity, RouterInfo};
pub use session::{Handler, Mailbox, Registry, Session};
pub use transport::{dial, Acceptor};

/// Maximum size of a message payload carried in a single frame.
///
/// Also bounds the decoded `size` field on receive: anything larger is a
/// desync or an attack and terminates the session.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Errors that can occur when establishing or driving a session.
#[derive(ThisError, Debug)]
pub enum Error {
    // Socket faults.
    #[error("bind failed: {0}")]
    BindFailed(commonware_runtime::Error),
    #[error("dial failed: {0}")]
    DialFailed(commonware_runtime::Error),
    #[error("send failed: {0}")]
    SendFailed(commonware_runtime::Error),
    #[error("recv failed: {0}")]
    RecvFailed(commonware_runtime::Error),
    #[error("handshake timeout")]
    HandshakeTimeout,
    #[error("unexpected failure: {0}")]
    UnexpectedFailure(commonware_runtime::Error),

    // Protocol faults.
    #[error("unable to decode: {0}")]
    UnableToDecode(commonware_codec::Error),
    #[error("message too large: {0}")]
    SendTooLarge(usize),
    #[error("message empty")]
    SendZeroSize,
    #[error("frame too large: {0}")]
    RecvTooLarge(usize),
    #[error("frame checksum mismatch")]
    ChecksumMismatch,

    // Crypto faults.
    #[error("handshake not for us")]
    HandshakeNotForUs,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("hash mismatch")]
    HashMismatch,
    #[error("invalid signature")]
    InvalidSignature,

    // Session lifecycle.
    #[error("session closed")]
    SessionClosed,
    #[error("session killed")]
    SessionKilled,
}

/// Configuration for establishing sessions.
#[derive(Clone)]
pub struct Config {
    /// The local router: identity plus the private keys needed to open
    /// sessions.
    pub local: LocalRouter,

    /// Number of outbound messages a session queues before `send`
    /// backpressures.
    pub mailbox_size: usize,

    /// Deadline for completing a handshake, covering every phase read and
    /// write.
    pub handshake_timeout: Duration,
}
