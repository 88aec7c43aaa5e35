//! Router identities and the local router context.

use crate::crypto::{dh, dsa};
use bytes::{Buf, BufMut};
use commonware_codec::{Encode, Error as CodecError, FixedSize, Read, ReadExt, Write};
use commonware_cryptography::sha256::{self, Digest};
use rand::{CryptoRng, Rng};

/// Length of a canonically encoded router identity.
pub const IDENTITY_LENGTH: usize = 387;

// Trailing certificate area: a null certificate (type 0, length 0).
const CERTIFICATE_LENGTH: usize = 3;

/// A router's public identity record: its DH public value, its signing key,
/// and a trailing certificate area.
///
/// The SHA-256 of the canonical 387-byte encoding is the router's ident
/// hash, the name every other part of the system knows the router by.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RouterIdentity {
    public_key: [u8; dh::PUBLIC_LENGTH],
    signing_key: [u8; dsa::PUBLIC_LENGTH],
    certificate: [u8; CERTIFICATE_LENGTH],
}

impl RouterIdentity {
    /// Assemble an identity with a null certificate.
    pub fn new(
        public_key: [u8; dh::PUBLIC_LENGTH],
        signing_key: [u8; dsa::PUBLIC_LENGTH],
    ) -> Self {
        Self {
            public_key,
            signing_key,
            certificate: [0u8; CERTIFICATE_LENGTH],
        }
    }

    /// The DH public value.
    pub fn public_key(&self) -> &[u8; dh::PUBLIC_LENGTH] {
        &self.public_key
    }

    /// The DSA verifying key.
    pub fn signing_key(&self) -> &[u8; dsa::PUBLIC_LENGTH] {
        &self.signing_key
    }

    /// SHA-256 of the canonical encoding.
    pub fn ident_hash(&self) -> Digest {
        sha256::hash(&self.encode())
    }
}

impl Write for RouterIdentity {
    fn write(&self, buf: &mut impl BufMut) {
        self.public_key.write(buf);
        self.signing_key.write(buf);
        self.certificate.write(buf);
    }
}

impl Read for RouterIdentity {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let public_key = <[u8; dh::PUBLIC_LENGTH]>::read(buf)?;
        let signing_key = <[u8; dsa::PUBLIC_LENGTH]>::read(buf)?;
        let certificate = <[u8; CERTIFICATE_LENGTH]>::read(buf)?;
        Ok(Self {
            public_key,
            signing_key,
            certificate,
        })
    }
}

impl FixedSize for RouterIdentity {
    const SIZE: usize = IDENTITY_LENGTH;
}

/// A peer record: an identity plus its cached ident hash.
#[derive(Clone, Debug)]
pub struct RouterInfo {
    identity: RouterIdentity,
    ident_hash: Digest,
}

impl RouterInfo {
    pub fn new(identity: RouterIdentity) -> Self {
        let ident_hash = identity.ident_hash();
        Self {
            identity,
            ident_hash,
        }
    }

    pub fn identity(&self) -> &RouterIdentity {
        &self.identity
    }

    pub fn ident_hash(&self) -> &Digest {
        &self.ident_hash
    }
}

/// The local router: its identity plus the private halves needed to open
/// sessions (DH exponent and signing key).
#[derive(Clone)]
pub struct LocalRouter {
    info: RouterInfo,
    dh: dh::Keypair,
    signer: dsa::SigningKey,
}

impl LocalRouter {
    /// Generate a fresh router: a DH keypair (whose public value becomes
    /// the identity's first field) and a DSA signing keypair.
    pub fn generate<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let dh = dh::Keypair::generate(rng);
        let signer = dsa::SigningKey::generate(rng);
        let identity = RouterIdentity::new(*dh.public(), *signer.public());
        Self {
            info: RouterInfo::new(identity),
            dh,
            signer,
        }
    }

    pub fn identity(&self) -> &RouterIdentity {
        self.info.identity()
    }

    pub fn router_info(&self) -> &RouterInfo {
        &self.info
    }

    pub fn ident_hash(&self) -> &Digest {
        self.info.ident_hash()
    }

    pub fn dh(&self) -> &dh::Keypair {
        &self.dh
    }

    /// Sign a message with the router's DSA key.
    pub fn sign(&self, message: &[u8]) -> dsa::Signature {
        self.signer.sign(message)
    }
}
