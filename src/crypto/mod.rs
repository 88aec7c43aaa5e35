//! Cryptographic primitives for the transport: DH key agreement over the
//! router ElGamal group, AES-256-CBC record encryption with chained IVs,
//! DSA-1024 identity signatures, and the Adler-32 frame checksum.
//!
//! SHA-256 hashing comes from commonware-cryptography; the 32-byte ident
//! hash used throughout the crate is its digest type.

pub mod adler;
pub mod cbc;
pub mod dh;
pub mod dsa;
