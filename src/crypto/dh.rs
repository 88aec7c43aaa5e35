//! Diffie-Hellman key agreement over the 2048-bit ElGamal group used for
//! router transport keys.

use crate::Error;
use num_bigint_dig::BigUint;
use rand::{CryptoRng, Rng};

/// Length of a DH public value and of the agreed secret.
pub const PUBLIC_LENGTH: usize = 256;

/// Length of a derived session key.
pub const KEY_LENGTH: usize = 32;

// 2048-bit MODP prime (RFC 3526 group 14), generator 2.
const MODULUS_HEX: &[u8] = b"FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF";
const GENERATOR: u32 = 2;

fn modulus() -> BigUint {
    BigUint::parse_bytes(MODULUS_HEX, 16).expect("modulus constant is valid hex")
}

/// A long-lived DH keypair.
///
/// The public value doubles as the first field of the router identity.
#[derive(Clone)]
pub struct Keypair {
    secret: BigUint,
    public: [u8; PUBLIC_LENGTH],
}

impl Keypair {
    /// Generate a keypair from a random 2048-bit exponent.
    pub fn generate<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let mut exponent = [0u8; PUBLIC_LENGTH];
        rng.fill_bytes(&mut exponent);
        let secret = BigUint::from_bytes_be(&exponent);
        let public = to_fixed(&BigUint::from(GENERATOR).modpow(&secret, &modulus()));
        Self { secret, public }
    }

    /// The public value, big-endian, zero-padded to 256 bytes.
    pub fn public(&self) -> &[u8; PUBLIC_LENGTH] {
        &self.public
    }

    /// Agree on a shared secret with a peer public value.
    ///
    /// Peer values outside `[2, p-2]` are rejected.
    pub fn agree(&self, peer: &[u8; PUBLIC_LENGTH]) -> Result<[u8; PUBLIC_LENGTH], Error> {
        let modulus = modulus();
        let peer = BigUint::from_bytes_be(peer);
        if peer <= BigUint::from(1u32) || peer >= &modulus - 1u32 {
            return Err(Error::InvalidPublicKey);
        }
        Ok(to_fixed(&peer.modpow(&self.secret, &modulus)))
    }
}

/// Reduce a shared secret to an AES-256 session key.
///
/// The secret is read as a signed big-endian integer: when its high bit is
/// set, a zero sign byte is prepended and the last secret byte falls away.
pub fn session_key(secret: &[u8; PUBLIC_LENGTH]) -> [u8; KEY_LENGTH] {
    let mut key = [0u8; KEY_LENGTH];
    if secret[0] & 0x80 != 0 {
        key[1..].copy_from_slice(&secret[..KEY_LENGTH - 1]);
    } else {
        key.copy_from_slice(&secret[..KEY_LENGTH]);
    }
    key
}

fn to_fixed(value: &BigUint) -> [u8; PUBLIC_LENGTH] {
    let bytes = value.to_bytes_be();
    let mut out = [0u8; PUBLIC_LENGTH];
    out[PUBLIC_LENGTH - bytes.len()..].copy_from_slice(&bytes);
    out
}
