//! Framing for established sessions.
//!
//! Frames are `size (2, BE) | payload | padding | Adler-32 (4)`, padded so
//! the total is a whole number of cipher blocks. A zero `size` is a time
//! sync carrying a 4-byte timestamp.

use crate::{
    crypto::{adler, cbc},
    Error, MAX_MESSAGE_SIZE,
};
use bytes::{BufMut, Bytes, BytesMut};
use rand::{CryptoRng, Rng};
use std::collections::VecDeque;

// Non-payload bytes in a frame before padding: size prefix plus checksum.
const OVERHEAD: usize = 6;

/// A decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// An application message.
    Message(Bytes),
    /// A clock sample (seconds since epoch).
    TimeSync(u32),
}

/// Encode a payload into an unencrypted frame.
///
/// Padding is random; it is not authenticated on its own but is covered by
/// the checksum and, once encrypted, by CBC confidentiality.
pub fn encode<R: Rng + CryptoRng>(
    rng: &mut R,
    payload: &[u8],
    time_sync: bool,
) -> Result<BytesMut, Error> {
    let len = payload.len();
    if len == 0 {
        return Err(Error::SendZeroSize);
    }
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::SendTooLarge(len));
    }

    let padding = aligned(len + OVERHEAD) - (len + OVERHEAD);
    let mut frame = BytesMut::with_capacity(len + OVERHEAD + padding);
    frame.put_u16(if time_sync { 0 } else { len as u16 });
    frame.put_slice(payload);

    let mut filler = [0u8; cbc::BLOCK_LENGTH - 1];
    rng.fill_bytes(&mut filler[..padding]);
    frame.put_slice(&filler[..padding]);

    let checksum = adler::checksum(&frame);
    frame.put_slice(&checksum);
    Ok(frame)
}

/// Incremental decoder for one receive direction.
///
/// Accepts arbitrarily segmented ciphertext, decrypts whole blocks as they
/// arrive, and parses complete frames greedily. Between calls, fewer than
/// one block of ciphertext is pending.
pub struct Decoder {
    cipher: cbc::Decryptor,
    pending: BytesMut,
    plain: BytesMut,
}

impl Decoder {
    pub fn new(cipher: cbc::Decryptor) -> Self {
        Self {
            cipher,
            pending: BytesMut::new(),
            plain: BytesMut::new(),
        }
    }

    /// Number of bytes that would complete the current frame, or one block
    /// when no frame is started. Always at least 1.
    pub fn required(&self) -> usize {
        if self.plain.len() >= 2 {
            let size = u16::from_be_bytes([self.plain[0], self.plain[1]]) as usize;
            if size <= MAX_MESSAGE_SIZE {
                let total = total_length(size);
                if total > self.plain.len() {
                    return total - self.plain.len() - self.pending.len();
                }
            }
        }
        cbc::BLOCK_LENGTH - self.pending.len()
    }

    /// Feed ciphertext, appending any completed frames.
    pub fn push(&mut self, chunk: &[u8], frames: &mut VecDeque<Frame>) -> Result<(), Error> {
        self.pending.extend_from_slice(chunk);
        let whole = self.pending.len() - self.pending.len() % cbc::BLOCK_LENGTH;
        if whole > 0 {
            let mut blocks = self.pending.split_to(whole);
            self.cipher.process(&mut blocks);
            self.plain.extend_from_slice(&blocks);
        }

        while self.plain.len() >= 2 {
            let size = u16::from_be_bytes([self.plain[0], self.plain[1]]) as usize;
            if size > MAX_MESSAGE_SIZE {
                return Err(Error::RecvTooLarge(size));
            }
            let total = total_length(size);
            if self.plain.len() < total {
                break;
            }

            let frame = self.plain.split_to(total).freeze();
            let expected = adler::checksum(&frame[..total - adler::CHECKSUM_LENGTH]);
            if frame[total - adler::CHECKSUM_LENGTH..] != expected {
                return Err(Error::ChecksumMismatch);
            }

            if size == 0 {
                let timestamp =
                    u32::from_be_bytes(frame[2..6].try_into().expect("span is 4 bytes"));
                frames.push_back(Frame::TimeSync(timestamp));
            } else {
                frames.push_back(Frame::Message(frame.slice(2..2 + size)));
            }
        }
        Ok(())
    }
}

// Total wire length of a frame with the given payload size. A zero size is
// a time sync: one block in total.
fn total_length(size: usize) -> usize {
    if size == 0 {
        cbc::BLOCK_LENGTH
    } else {
        aligned(size + OVERHEAD)
    }
}

fn aligned(len: usize) -> usize {
    let rem = len % cbc::BLOCK_LENGTH;
    if rem == 0 {
        len
    } else {
        len + cbc::BLOCK_LENGTH - rem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    const KEY: [u8; 32] = [7u8; 32];
    const IV: [u8; 16] = [9u8; 16];

    fn pair() -> (cbc::Encryptor, cbc::Decryptor) {
        (cbc::Encryptor::new(&KEY, &IV), cbc::Decryptor::new(&KEY, &IV))
    }

    fn encrypted(rng: &mut StdRng, encryptor: &mut cbc::Encryptor, payload: &[u8]) -> BytesMut {
        let mut frame = encode(rng, payload, false).unwrap();
        encryptor.process(&mut frame[..]);
        frame
    }

    #[test]
    fn test_encode_lengths() {
        let mut rng = StdRng::seed_from_u64(0);
        for len in [1usize, 9, 10, 15, 16, 100, 1024, MAX_MESSAGE_SIZE] {
            let payload = vec![0xAB; len];
            let frame = encode(&mut rng, &payload, false).unwrap();
            assert_eq!(frame.len() % cbc::BLOCK_LENGTH, 0);
            assert_eq!(frame.len(), aligned(len + OVERHEAD));
        }
    }

    #[test]
    fn test_encode_rejects_empty() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            encode(&mut rng, b"", false),
            Err(Error::SendZeroSize)
        ));
    }

    #[test]
    fn test_encode_rejects_oversize() {
        let mut rng = StdRng::seed_from_u64(0);
        let payload = vec![0u8; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            encode(&mut rng, &payload, false),
            Err(Error::SendTooLarge(n)) if n == MAX_MESSAGE_SIZE + 1
        ));
    }

    #[test]
    fn test_roundtrip() {
        let mut rng = StdRng::seed_from_u64(1);
        let (mut encryptor, decryptor) = pair();
        let mut decoder = Decoder::new(decryptor);
        let mut frames = VecDeque::new();

        for len in [1usize, 15, 16, 1024, MAX_MESSAGE_SIZE] {
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let frame = encrypted(&mut rng, &mut encryptor, &payload);
            decoder.push(&frame, &mut frames).unwrap();
            assert_eq!(
                frames.pop_front(),
                Some(Frame::Message(Bytes::from(payload)))
            );
        }
        assert!(frames.is_empty());
    }

    #[test]
    fn test_time_sync_roundtrip() {
        let mut rng = StdRng::seed_from_u64(2);
        let (mut encryptor, decryptor) = pair();
        let mut decoder = Decoder::new(decryptor);
        let mut frames = VecDeque::new();

        let timestamp = 0xDEADBEEFu32;
        let mut frame = encode(&mut rng, &timestamp.to_be_bytes(), true).unwrap();
        assert_eq!(frame.len(), cbc::BLOCK_LENGTH);
        encryptor.process(&mut frame[..]);

        decoder.push(&frame, &mut frames).unwrap();
        assert_eq!(frames.pop_front(), Some(Frame::TimeSync(timestamp)));
    }

    #[test]
    fn test_byte_at_a_time_reassembly() {
        // Any partition of the ciphertext stream decodes to the same frames.
        let mut rng = StdRng::seed_from_u64(3);
        let (mut encryptor, decryptor) = pair();

        let payloads: Vec<Vec<u8>> = [1usize, 15, 1024]
            .iter()
            .map(|len| (0..*len).map(|i| (i * 7) as u8).collect())
            .collect();
        let mut stream = BytesMut::new();
        for payload in &payloads {
            stream.extend_from_slice(&encrypted(&mut rng, &mut encryptor, payload));
        }

        let mut decoder = Decoder::new(decryptor);
        let mut frames = VecDeque::new();
        for byte in stream.iter() {
            decoder.push(std::slice::from_ref(byte), &mut frames).unwrap();
        }

        for payload in payloads {
            assert_eq!(
                frames.pop_front(),
                Some(Frame::Message(Bytes::from(payload)))
            );
        }
        assert!(frames.is_empty());
    }

    #[test]
    fn test_required_tracks_frame() {
        let mut rng = StdRng::seed_from_u64(4);
        let (mut encryptor, decryptor) = pair();
        let mut decoder = Decoder::new(decryptor);
        let mut frames = VecDeque::new();

        // Nothing buffered: one block.
        assert_eq!(decoder.required(), cbc::BLOCK_LENGTH);

        let payload = vec![5u8; 100];
        let frame = encrypted(&mut rng, &mut encryptor, &payload);
        let total = frame.len();

        decoder.push(&frame[..16], &mut frames).unwrap();
        assert_eq!(decoder.required(), total - 16);
        decoder.push(&frame[16..21], &mut frames).unwrap();
        assert_eq!(decoder.required(), total - 21);
        decoder.push(&frame[21..], &mut frames).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(decoder.required(), cbc::BLOCK_LENGTH);
    }

    #[test]
    fn test_tamper_detection() {
        // Flipping any bit of the ciphertext yields an error or, when the
        // garbled size claims a longer frame, no output at all.
        for position in [0usize, 1, 2, 17, 50] {
            let mut rng = StdRng::seed_from_u64(5);
            let (mut encryptor, decryptor) = pair();
            let mut frame = encrypted(&mut rng, &mut encryptor, &[0x5A; 57]);
            frame[position] ^= 0x01;

            let mut decoder = Decoder::new(decryptor);
            let mut frames = VecDeque::new();
            let result = decoder.push(&frame, &mut frames);
            assert!(
                result.is_err() || frames.is_empty(),
                "tamper at {} slipped through",
                position
            );
        }
    }

    #[test]
    fn test_checksum_mismatch() {
        // Tampering past the first block garbles payload bytes only, so the
        // parse reaches the checksum and fails there.
        let mut rng = StdRng::seed_from_u64(6);
        let (mut encryptor, decryptor) = pair();
        let mut frame = encrypted(&mut rng, &mut encryptor, &[0x5A; 57]);
        let last = frame.len() - 1;
        frame[last] ^= 0x01;

        let mut decoder = Decoder::new(decryptor);
        let mut frames = VecDeque::new();
        assert!(matches!(
            decoder.push(&frame, &mut frames),
            Err(Error::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_oversize_rejected() {
        let (mut encryptor, decryptor) = pair();

        // Hand-build a frame header claiming a 17000-byte payload.
        let mut plaintext = BytesMut::new();
        plaintext.put_u16(17000);
        plaintext.resize(2 * cbc::BLOCK_LENGTH, 0);
        encryptor.process(&mut plaintext[..]);

        let mut decoder = Decoder::new(decryptor);
        let mut frames = VecDeque::new();
        assert!(matches!(
            decoder.push(&plaintext, &mut frames),
            Err(Error::RecvTooLarge(17000))
        ));
        assert!(frames.is_empty());
    }

    #[test]
    fn test_multiple_frames_single_push() {
        let mut rng = StdRng::seed_from_u64(7);
        let (mut encryptor, decryptor) = pair();

        let mut stream = BytesMut::new();
        for len in [3usize, 40, 9] {
            stream.extend_from_slice(&encrypted(&mut rng, &mut encryptor, &vec![len as u8; len]));
        }

        let mut decoder = Decoder::new(decryptor);
        let mut frames = VecDeque::new();
        decoder.push(&stream, &mut frames).unwrap();
        assert_eq!(frames.len(), 3);
    }
}
