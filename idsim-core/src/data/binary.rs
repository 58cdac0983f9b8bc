//! Packed binary order files.
//!
//! Layout (little endian):
//!
//! ```text
//! magic    4 bytes  "IDSB"
//! version  u16
//! count    u64
//! records  count x 49 bytes:
//!          id i64 | initial i64 | start i64 | cancel i64 | delivery i64
//!          | side u8 | price i32 | volume i32
//! digest   32 bytes BLAKE3 of everything above
//! ```
//!
//! Any defect (magic, version, length, digest, side code) rejects the whole
//! file.

use std::fs;
use std::path::Path;

use crate::data::ingest::IngestError;
use crate::domain::{LimitOrder, OrderId, Side};

const MAGIC: &[u8; 4] = b"IDSB";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 8;
const RECORD_LEN: usize = 5 * 8 + 1 + 4 + 4;
const DIGEST_LEN: usize = 32;

pub fn encode_orders(orders: &[LimitOrder]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + orders.len() * RECORD_LEN + DIGEST_LEN);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&(orders.len() as u64).to_le_bytes());
    for o in orders {
        buf.extend_from_slice(&o.id.0.to_le_bytes());
        buf.extend_from_slice(&o.initial_id.0.to_le_bytes());
        buf.extend_from_slice(&o.start.to_le_bytes());
        buf.extend_from_slice(&o.cancel.to_le_bytes());
        buf.extend_from_slice(&o.delivery.to_le_bytes());
        buf.push(o.side.code());
        buf.extend_from_slice(&o.price.to_le_bytes());
        buf.extend_from_slice(&o.volume.to_le_bytes());
    }
    let digest = blake3::hash(&buf);
    buf.extend_from_slice(digest.as_bytes());
    buf
}

pub fn decode_orders(bytes: &[u8]) -> Result<Vec<LimitOrder>, IngestError> {
    if bytes.len() < HEADER_LEN + DIGEST_LEN {
        return Err(IngestError::Truncated {
            expected: HEADER_LEN + DIGEST_LEN,
            actual: bytes.len(),
        });
    }
    if &bytes[..4] != MAGIC {
        return Err(IngestError::BadMagic);
    }
    let mut cursor = Cursor::new(&bytes[4..HEADER_LEN]);
    let version = u16::from_le_bytes(cursor.take());
    if version != VERSION {
        return Err(IngestError::UnsupportedVersion(version));
    }
    let count = u64::from_le_bytes(cursor.take()) as usize;

    let expected = count
        .checked_mul(RECORD_LEN)
        .and_then(|n| n.checked_add(HEADER_LEN + DIGEST_LEN))
        .unwrap_or(usize::MAX);
    if bytes.len() != expected {
        return Err(IngestError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }
    let (body, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
    if blake3::hash(body).as_bytes() != digest {
        return Err(IngestError::DigestMismatch);
    }

    body[HEADER_LEN..]
        .chunks_exact(RECORD_LEN)
        .enumerate()
        .map(|(index, record)| {
            let mut c = Cursor::new(record);
            let id = i64::from_le_bytes(c.take());
            let initial = i64::from_le_bytes(c.take());
            let start = i64::from_le_bytes(c.take());
            let cancel = i64::from_le_bytes(c.take());
            let delivery = i64::from_le_bytes(c.take());
            let [code] = c.take::<1>();
            let side = Side::from_code(code).ok_or(IngestError::BadSideCode { index, code })?;
            Ok(LimitOrder {
                id: OrderId(id),
                initial_id: OrderId(initial),
                start,
                cancel,
                delivery,
                side,
                price: i32::from_le_bytes(c.take()),
                volume: i32::from_le_bytes(c.take()),
            })
        })
        .collect()
}

pub fn write_orders_bin(path: &Path, orders: &[LimitOrder]) -> Result<(), IngestError> {
    fs::write(path, encode_orders(orders))?;
    Ok(())
}

pub fn read_orders_bin(path: &Path) -> Result<Vec<LimitOrder>, IngestError> {
    decode_orders(&fs::read(path)?)
}

/// Fixed-width reader over a slice whose length was checked up front.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<LimitOrder> {
        vec![
            LimitOrder {
                id: OrderId(1),
                initial_id: OrderId(1),
                start: 1_614_585_600_123,
                cancel: 1_614_592_500_000,
                delivery: 1_614_592_800_000,
                side: Side::Buy,
                price: -2_150,
                volume: 35,
            },
            LimitOrder {
                id: OrderId(i64::MAX),
                initial_id: OrderId(1),
                start: 1_614_585_601_000,
                cancel: 1_614_592_500_000,
                delivery: 1_614_592_800_000,
                side: Side::Sell,
                price: i32::MAX,
                volume: 1,
            },
        ]
    }

    #[test]
    fn round_trips_all_fields() {
        let orders = sample();
        let bytes = encode_orders(&orders);
        assert_eq!(bytes.len(), HEADER_LEN + 2 * RECORD_LEN + DIGEST_LEN);
        assert_eq!(decode_orders(&bytes).unwrap(), orders);
    }

    #[test]
    fn empty_file_round_trips() {
        assert!(decode_orders(&encode_orders(&[])).unwrap().is_empty());
    }

    #[test]
    fn corruption_is_detected() {
        let mut bytes = encode_orders(&sample());
        bytes[HEADER_LEN + 20] ^= 0xFF;
        assert!(matches!(
            decode_orders(&bytes),
            Err(IngestError::DigestMismatch)
        ));
    }

    #[test]
    fn truncation_and_magic_are_detected() {
        let bytes = encode_orders(&sample());
        assert!(matches!(
            decode_orders(&bytes[..bytes.len() - 1]),
            Err(IngestError::Truncated { .. })
        ));
        let mut wrong = bytes.clone();
        wrong[0] = b'X';
        assert!(matches!(decode_orders(&wrong), Err(IngestError::BadMagic)));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.bin");
        write_orders_bin(&path, &sample()).unwrap();
        assert_eq!(read_orders_bin(&path).unwrap(), sample());
    }
}
