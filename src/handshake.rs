//! Handshake phase records and the signed attestation.
//!
//! The four records are fixed byte layouts (see the crate documentation
//! for the wire diagrams); the encrypted spans are carried as opaque bytes
//! here and sealed/opened by the connection driver, which owns the cipher
//! states.

use crate::{
    crypto::{dh, dsa},
    identity::{RouterIdentity, IDENTITY_LENGTH},
};
use bytes::{Buf, BufMut};
use commonware_codec::{Error as CodecError, FixedSize, Read, ReadExt, Write};
use commonware_cryptography::sha256::Digest;

/// Length of the hash span carried in Phase 1.
pub const HASH_LENGTH: usize = 32;

/// Length of the Phase 2 encrypted span.
pub const SEALED_LENGTH: usize = 48;

/// Total length of the Phase 3 record on the wire.
pub const PHASE3_LENGTH: usize = 448;

/// Total length of the Phase 4 record on the wire.
pub const PHASE4_LENGTH: usize = 48;

/// Length of the signed attestation: `X | Y | ident hash | tsA | tsB`.
pub const ATTESTATION_LENGTH: usize = 2 * dh::PUBLIC_LENGTH + HASH_LENGTH + 8;

/// Phase 1: the dialer's DH public value and the hash binding the exchange
/// to the intended recipient.
pub struct Phase1 {
    pub public_key: [u8; dh::PUBLIC_LENGTH],
    pub hx_xor_hi: [u8; HASH_LENGTH],
}

impl Write for Phase1 {
    fn write(&self, buf: &mut impl BufMut) {
        self.public_key.write(buf);
        self.hx_xor_hi.write(buf);
    }
}

impl Read for Phase1 {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let public_key = <[u8; dh::PUBLIC_LENGTH]>::read(buf)?;
        let hx_xor_hi = <[u8; HASH_LENGTH]>::read(buf)?;
        Ok(Self {
            public_key,
            hx_xor_hi,
        })
    }
}

impl FixedSize for Phase1 {
    const SIZE: usize = dh::PUBLIC_LENGTH + HASH_LENGTH;
}

/// Phase 2: the listener's DH public value and its sealed confirmation.
pub struct Phase2 {
    pub public_key: [u8; dh::PUBLIC_LENGTH],
    pub sealed: [u8; SEALED_LENGTH],
}

impl Write for Phase2 {
    fn write(&self, buf: &mut impl BufMut) {
        self.public_key.write(buf);
        self.sealed.write(buf);
    }
}

impl Read for Phase2 {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let public_key = <[u8; dh::PUBLIC_LENGTH]>::read(buf)?;
        let sealed = <[u8; SEALED_LENGTH]>::read(buf)?;
        Ok(Self { public_key, sealed })
    }
}

impl FixedSize for Phase2 {
    const SIZE: usize = dh::PUBLIC_LENGTH + SEALED_LENGTH;
}

/// Plaintext of the Phase 2 sealed span.
pub struct Phase2Payload {
    /// SHA-256 over `X | Y`, proving the listener derived the same secret.
    pub hxy: Digest,
    /// Listener timestamp (seconds since epoch).
    pub timestamp: u32,
    pub filler: [u8; 12],
}

impl Write for Phase2Payload {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(self.hxy.as_ref());
        buf.put_u32(self.timestamp);
        self.filler.write(buf);
    }
}

impl Read for Phase2Payload {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let hxy = Digest::from(<[u8; HASH_LENGTH]>::read(buf)?);
        let timestamp = u32::from_be_bytes(<[u8; 4]>::read(buf)?);
        let filler = <[u8; 12]>::read(buf)?;
        Ok(Self {
            hxy,
            timestamp,
            filler,
        })
    }
}

impl FixedSize for Phase2Payload {
    const SIZE: usize = SEALED_LENGTH;
}

/// Plaintext of the Phase 3 record: the dialer's identity and its
/// attestation signature.
pub struct Phase3Payload {
    pub identity: RouterIdentity,
    /// Dialer timestamp (seconds since epoch).
    pub timestamp: u32,
    pub signature: dsa::Signature,
    pub padding: [u8; 15],
}

impl Write for Phase3Payload {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u16(IDENTITY_LENGTH as u16);
        self.identity.write(buf);
        buf.put_u32(self.timestamp);
        self.signature.write(buf);
        self.padding.write(buf);
    }
}

impl Read for Phase3Payload {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let size = u16::from_be_bytes(<[u8; 2]>::read(buf)?);
        if size as usize != IDENTITY_LENGTH {
            return Err(CodecError::Invalid("Phase3", "unexpected identity length"));
        }
        let identity = RouterIdentity::read(buf)?;
        let timestamp = u32::from_be_bytes(<[u8; 4]>::read(buf)?);
        let signature = dsa::Signature::read(buf)?;
        let padding = <[u8; 15]>::read(buf)?;
        Ok(Self {
            identity,
            timestamp,
            signature,
            padding,
        })
    }
}

impl FixedSize for Phase3Payload {
    const SIZE: usize = PHASE3_LENGTH;
}

/// Plaintext of the Phase 4 record: the listener's attestation signature.
pub struct Phase4Payload {
    pub signature: dsa::Signature,
    pub padding: [u8; 8],
}

impl Write for Phase4Payload {
    fn write(&self, buf: &mut impl BufMut) {
        self.signature.write(buf);
        self.padding.write(buf);
    }
}

impl Read for Phase4Payload {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let signature = dsa::Signature::read(buf)?;
        let padding = <[u8; 8]>::read(buf)?;
        Ok(Self { signature, padding })
    }
}

impl FixedSize for Phase4Payload {
    const SIZE: usize = PHASE4_LENGTH;
}

/// The blob both sides sign: `X | Y | recipient ident hash | tsA | tsB`.
///
/// Field order is fixed; both signatures of a handshake cover the same
/// bytes except for the recipient hash, which names the other router.
pub fn attestation(
    x: &[u8; dh::PUBLIC_LENGTH],
    y: &[u8; dh::PUBLIC_LENGTH],
    ident: &Digest,
    ts_a: u32,
    ts_b: u32,
) -> Vec<u8> {
    let mut blob = Vec::with_capacity(ATTESTATION_LENGTH);
    blob.extend_from_slice(x);
    blob.extend_from_slice(y);
    blob.extend_from_slice(ident.as_ref());
    blob.extend_from_slice(&ts_a.to_be_bytes());
    blob.extend_from_slice(&ts_b.to_be_bytes());
    blob
}

/// XOR a hash against an ident hash, producing the Phase 1 binding span.
pub fn mask(hash: &Digest, ident: &Digest) -> [u8; HASH_LENGTH] {
    let mut out = [0u8; HASH_LENGTH];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = hash[i] ^ ident[i];
    }
    out
}
