//! DSA-1024 router signatures over the fixed signing group.
//!
//! Signatures are SHA-1 based with the raw 40-byte `r | s` encoding used on
//! the wire. Signing uses deterministic nonces (RFC 6979), so fixtures are
//! reproducible.

use bytes::{Buf, BufMut};
use commonware_codec::{Error as CodecError, FixedSize, Read, ReadExt, Write};
use dsa::{
    signature::hazmat::{PrehashSigner, PrehashVerifier},
    Components, VerifyingKey,
};
use num_bigint_dig::BigUint;
use rand::{CryptoRng, Rng};
use sha1::{Digest as _, Sha1};

/// Length of a raw signature: two 160-bit integers.
pub const SIGNATURE_LENGTH: usize = 40;

/// Length of an encoded verifying key.
pub const PUBLIC_LENGTH: usize = 128;

// 1024-bit signing group shared by all routers.
const P_HEX: &[u8] = b"9C05B2AA960D9B97B8931963C9CC9E8C3026E9B8ED92FAD0A69CC886D5BF8015\
FCADAE31A0AD18FAB3F01B00A358DE237655C4964AFAA2B337E96AD316B9FB1C\
C564B5AEC5B69A9FF6C3E4548707FEF8503D91DD8602E867E6D35D2235C1869C\
E2479C3B9D5401DE04E0727FB33D6511285D4CF29538D9E3B6051F5B22CC1C93";
const Q_HEX: &[u8] = b"A5DFC28FEF4CA1E286744CD8EED9D29D684046B7";
const G_HEX: &[u8] = b"0C1F4D27D40093B429E962D7223824E0BBC47E7C832A39236FC683AF84889581\
075FF9082ED32353D4374D7301CDA1D23C431F4698599DDA02451824FF369752\
593647CC3DDC197DE985E43D136CDCFC6BD5409CD2F450821142A5E6F8EB1C3A\
B5D0484B8129FCF17BCE4F7F33321C3CB3DBB14A905E7B2B3E93BE4708CBCC82";

fn parse(hex: &[u8]) -> BigUint {
    BigUint::parse_bytes(hex, 16).expect("group constant is valid hex")
}

fn components() -> Components {
    Components::from_components(parse(P_HEX), parse(Q_HEX), parse(G_HEX))
        .expect("group constants are a valid DSA group")
}

/// A raw `r | s` signature.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Signature(pub [u8; SIGNATURE_LENGTH]);

impl Write for Signature {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl Read for Signature {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let array = <[u8; SIGNATURE_LENGTH]>::read(buf)?;
        Ok(Self(array))
    }
}

impl FixedSize for Signature {
    const SIZE: usize = SIGNATURE_LENGTH;
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Signing half of a router's signature keypair.
#[derive(Clone)]
pub struct SigningKey {
    inner: dsa::SigningKey,
    public: [u8; PUBLIC_LENGTH],
}

impl SigningKey {
    /// Generate a keypair from a random exponent below the group order.
    pub fn generate<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let q = parse(Q_HEX);
        let x = loop {
            let mut buf = [0u8; 20];
            rng.fill_bytes(&mut buf);
            let candidate = BigUint::from_bytes_be(&buf);
            if candidate > BigUint::from(0u32) && candidate < q {
                break candidate;
            }
        };
        let y = parse(G_HEX).modpow(&x, &parse(P_HEX));

        let mut public = [0u8; PUBLIC_LENGTH];
        write_fixed(&mut public, &y);
        let verifying = VerifyingKey::from_components(components(), y)
            .expect("public component is in the group");
        let inner = dsa::SigningKey::from_components(verifying, x)
            .expect("private component is below the group order");
        Self { inner, public }
    }

    /// The verifying key, big-endian, zero-padded to 128 bytes.
    pub fn public(&self) -> &[u8; PUBLIC_LENGTH] {
        &self.public
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let digest = Sha1::digest(message);
        let signature = self
            .inner
            .sign_prehash(&digest)
            .expect("signing with a valid key cannot fail");

        let mut out = [0u8; SIGNATURE_LENGTH];
        write_fixed(&mut out[..20], signature.r());
        write_fixed(&mut out[20..], signature.s());
        Signature(out)
    }
}

/// Verify a raw signature against an encoded verifying key.
pub fn verify(public: &[u8; PUBLIC_LENGTH], message: &[u8], signature: &Signature) -> bool {
    let y = BigUint::from_bytes_be(public);
    let verifying = match VerifyingKey::from_components(components(), y) {
        Ok(key) => key,
        Err(_) => return false,
    };

    let r = BigUint::from_bytes_be(&signature.0[..20]);
    let s = BigUint::from_bytes_be(&signature.0[20..]);
    let signature = match dsa::Signature::from_components(r, s) {
        Ok(signature) => signature,
        Err(_) => return false,
    };

    let digest = Sha1::digest(message);
    verifying.verify_prehash(&digest, &signature).is_ok()
}

fn write_fixed(out: &mut [u8], value: &BigUint) {
    let bytes = value.to_bytes_be();
    let start = out.len() - bytes.len();
    out[start..].copy_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_sign_verify() {
        let mut rng = StdRng::seed_from_u64(0);
        let key = SigningKey::generate(&mut rng);

        let message = b"attested handshake material";
        let signature = key.sign(message);
        assert!(verify(key.public(), message, &signature));
        assert!(!verify(key.public(), b"different message", &signature));
    }

    #[test]
    fn test_tampered_signature_fails() {
        let mut rng = StdRng::seed_from_u64(1);
        let key = SigningKey::generate(&mut rng);

        let message = b"attested handshake material";
        let mut signature = key.sign(message);
        signature.0[0] ^= 0x01;
        assert!(!verify(key.public(), message, &signature));
    }

    #[test]
    fn test_wrong_key_fails() {
        let mut rng = StdRng::seed_from_u64(2);
        let key = SigningKey::generate(&mut rng);
        let other = SigningKey::generate(&mut rng);

        let message = b"attested handshake material";
        let signature = key.sign(message);
        assert!(!verify(other.public(), message, &signature));
    }

    #[test]
    fn test_signature_codec() {
        let mut rng = StdRng::seed_from_u64(3);
        let key = SigningKey::generate(&mut rng);

        let signature = key.sign(b"message");
        let encoded = signature.encode();
        assert_eq!(encoded.len(), SIGNATURE_LENGTH);
        let decoded = Signature::decode(encoded).unwrap();
        assert_eq!(signature, decoded);
    }
}
