//! On-disk byte layouts shared by the snapshot and delta-journal readers
//! and writers (spec §4.7, §6 "File formats").
//!
//! The base snapshot only ever records *asserted* (non-inferred) facts —
//! see `SPEC_FULL.md`'s persistence section for the reasoning: replaying
//! the asserted facts through the ordinary `add_fact` pipeline on load
//! re-derives every inference for free (the same static rules and
//! templates that produced them the first time are reinstalled by
//! `Network::new()`), which is both simpler and exactly what spec §8
//! invariant 4 asks for ("all inferences re-derive").

use std::convert::TryInto;
use std::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::fact::FactId;

pub(crate) const SNAPSHOT_MAGIC: &[u8; 8] = b"RSNSHOT1";
pub(crate) const SNAPSHOT_VERSION: u32 = 1;

pub(crate) const DELTA_MAGIC: &[u8; 8] = b"RDELTA01";
pub(crate) const DELTA_VERSION: u32 = 1;
pub(crate) const DELTA_HEADER_LEN: usize = 8 + 4 + 16 + 4;

pub(crate) const OP_ADD_FACT: u8 = 0;
pub(crate) const OP_ADD_SOURCE_BATCH: u8 = 1;
pub(crate) const OP_REMOVE_SOURCE: u8 = 2;
pub(crate) const OP_REMOVE_FACT: u8 = 3;

/// One row of the snapshot's fact table, in the plain `(attr, value)`
/// string form the core's open, dynamic schema uses (spec §9). Only
/// asserted facts are ever encoded as rows — see the module doc.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct FactRow {
    pub id: FactId,
    pub seq: u64,
    pub sources: Vec<String>,
    pub attrs: Vec<(String, String)>,
}

/// A stable, order-independent-enough fingerprint of a byte buffer, used
/// to bind a delta journal to the base snapshot it extends (spec §6
/// "base_fingerprint"). Not cryptographic — just needs to be deterministic
/// for a given buffer and changed by any content edit.
pub(crate) fn fingerprint_of(data: &[u8]) -> u128 {
    let mut h1 = DefaultHasher::new();
    0xA5A5_A5A5_A5A5_A5A5u64.hash(&mut h1);
    data.hash(&mut h1);
    let lo = h1.finish();

    let mut h2 = DefaultHasher::new();
    0x5A5A_5A5A_5A5A_5A5Au64.hash(&mut h2);
    data.len().hash(&mut h2);
    data.hash(&mut h2);
    let hi = h2.finish();

    ((hi as u128) << 64) | lo as u128
}

pub(crate) struct SnapshotHeader {
    pub fingerprint: u128,
    pub row_count: u64,
    /// Byte offset of the first row blob (after the magic/version/
    /// fingerprint/row_count/row_lengths table).
    pub rows_start: usize,
    pub row_lengths: Vec<u32>,
}

/// Encodes `rows` (already in the order they should replay in) into a
/// complete snapshot file image: `magic | version | fingerprint(16) |
/// row_count(8) | row_lengths([u32]) | row blobs | crc32(4)` (spec §6
/// "Must round-trip every canonical fact shape").
pub(crate) fn encode_snapshot(rows: &[FactRow]) -> Result<Vec<u8>, EngineError> {
    let mut blobs = Vec::new();
    let mut lengths = Vec::with_capacity(rows.len());
    for row in rows {
        let encoded = bincode::serialize(row)?;
        lengths.push(encoded.len() as u32);
        blobs.extend_from_slice(&encoded);
    }
    let fingerprint = fingerprint_of(&blobs);

    let mut out = Vec::with_capacity(8 + 4 + 16 + 8 + lengths.len() * 4 + blobs.len() + 4);
    out.extend_from_slice(SNAPSHOT_MAGIC);
    out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    out.extend_from_slice(&fingerprint.to_le_bytes());
    out.extend_from_slice(&(rows.len() as u64).to_le_bytes());
    for l in &lengths {
        out.extend_from_slice(&l.to_le_bytes());
    }
    out.extend_from_slice(&blobs);
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Validates magic/checksum and parses the header + row-lengths table of a
/// snapshot image, without decoding any row blob. Used by both the eager
/// loader (which goes on to decode every row) and the lazy loader (which
/// decodes rows on demand).
pub(crate) fn decode_snapshot_header(buf: &[u8]) -> Result<SnapshotHeader, EngineError> {
    if buf.len() < 8 + 4 + 16 + 8 + 4 || &buf[0..8] != SNAPSHOT_MAGIC {
        return Err(EngineError::BadHeader);
    }
    let (body, crc_bytes) = buf.split_at(buf.len() - 4);
    let stored_crc = u32::from_le_bytes(crc_bytes.try_into().unwrap());
    let actual_crc = crc32fast::hash(body);
    if stored_crc != actual_crc {
        return Err(EngineError::BadHeader);
    }

    let version = u32::from_le_bytes(buf[8..12].try_into().unwrap());
    if version != SNAPSHOT_VERSION {
        return Err(EngineError::BadHeader);
    }
    let fingerprint = u128::from_le_bytes(buf[12..28].try_into().unwrap());
    let row_count = u64::from_le_bytes(buf[28..36].try_into().unwrap());

    let lengths_start = 36;
    let lengths_end = lengths_start + (row_count as usize) * 4;
    if lengths_end > body.len() {
        return Err(EngineError::BadHeader);
    }
    let mut row_lengths = Vec::with_capacity(row_count as usize);
    for chunk in buf[lengths_start..lengths_end].chunks_exact(4) {
        row_lengths.push(u32::from_le_bytes(chunk.try_into().unwrap()));
    }

    Ok(SnapshotHeader { fingerprint, row_count, rows_start: lengths_end, row_lengths })
}

pub(crate) fn decode_row(bytes: &[u8]) -> Result<FactRow, EngineError> {
    Ok(bincode::deserialize(bytes)?)
}

// ---- delta journal wire format (spec §6 "Delta journal") ----

#[derive(Serialize, Deserialize)]
pub(crate) struct AddFactPayload {
    pub attrs: Vec<(String, String)>,
    pub source: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct AddSourceBatchPayload {
    pub source: String,
    pub facts: Vec<Vec<(String, String)>>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct RemoveSourcePayload {
    pub source: String,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct RemoveFactPayload {
    pub id: FactId,
}

pub(crate) enum DeltaOp {
    AddFact(AddFactPayload),
    AddSourceBatch(AddSourceBatchPayload),
    RemoveSource(RemoveSourcePayload),
    RemoveFact(RemoveFactPayload),
}

pub(crate) fn delta_header(base_fingerprint: u128) -> Vec<u8> {
    let mut out = Vec::with_capacity(DELTA_HEADER_LEN);
    out.extend_from_slice(DELTA_MAGIC);
    out.extend_from_slice(&DELTA_VERSION.to_le_bytes());
    out.extend_from_slice(&base_fingerprint.to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out
}

pub(crate) fn read_delta_header(buf: &[u8]) -> Result<u128, EngineError> {
    if buf.len() < DELTA_HEADER_LEN || &buf[0..8] != DELTA_MAGIC {
        return Err(EngineError::BadHeader);
    }
    let version = u32::from_le_bytes(buf[8..12].try_into().unwrap());
    if version != DELTA_VERSION {
        return Err(EngineError::BadHeader);
    }
    Ok(u128::from_le_bytes(buf[12..28].try_into().unwrap()))
}

/// Encodes one entry as `length(4) | op(1) | payload(length-5) | crc32(4)`
/// where `length` is self-inclusive (counts its own 4 bytes, the op byte,
/// and the payload) and the crc32 (IEEE 802.3 polynomial, via `crc32fast`)
/// covers `length || op || payload` (spec §6).
pub(crate) fn encode_entry(op: &DeltaOp) -> Result<Vec<u8>, EngineError> {
    let (tag, payload) = match op {
        DeltaOp::AddFact(p) => (OP_ADD_FACT, bincode::serialize(p)?),
        DeltaOp::AddSourceBatch(p) => (OP_ADD_SOURCE_BATCH, bincode::serialize(p)?),
        DeltaOp::RemoveSource(p) => (OP_REMOVE_SOURCE, bincode::serialize(p)?),
        DeltaOp::RemoveFact(p) => (OP_REMOVE_FACT, bincode::serialize(p)?),
    };
    let length = (4 + 1 + payload.len()) as u32;
    let mut head = Vec::with_capacity(length as usize);
    head.extend_from_slice(&length.to_le_bytes());
    head.push(tag);
    head.extend_from_slice(&payload);
    let crc = crc32fast::hash(&head);
    let mut out = head;
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

fn decode_payload(op: u8, payload: &[u8]) -> Result<DeltaOp, EngineError> {
    Ok(match op {
        OP_ADD_FACT => DeltaOp::AddFact(bincode::deserialize(payload)?),
        OP_ADD_SOURCE_BATCH => DeltaOp::AddSourceBatch(bincode::deserialize(payload)?),
        OP_REMOVE_SOURCE => DeltaOp::RemoveSource(bincode::deserialize(payload)?),
        OP_REMOVE_FACT => DeltaOp::RemoveFact(bincode::deserialize(payload)?),
        _ => return Err(EngineError::BadHeader),
    })
}

/// Replays every well-formed entry in `buf` (the journal body, *after* the
/// fixed header). CRC-mismatched entries are skipped with a warning
/// (`CorruptDeltaEntry`, spec §7); a `crc32 == 0` entry is accepted without
/// validation as an older-format escape hatch (spec §6). A truncated final
/// entry (not enough trailing bytes for the length it declares) stops
/// replay without an error — fsync discipline only guarantees the tail up
/// to the last completed `sync` (spec §4.7 "Fsync discipline").
pub(crate) fn decode_entries(buf: &[u8]) -> Vec<DeltaOp> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos + 4 <= buf.len() {
        let length = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
        if length < 5 {
            tracing::warn!("delta journal: malformed entry length {length} at offset {pos}, stopping replay");
            break;
        }
        let total = length + 4;
        if pos + total > buf.len() {
            tracing::warn!(
                offset = pos,
                remaining = buf.len() - pos,
                "delta journal: truncated final entry, stopping replay"
            );
            break;
        }
        let head = &buf[pos..pos + length];
        let stored_crc = u32::from_le_bytes(buf[pos + length..pos + total].try_into().unwrap());
        let op_byte = head[4];
        let payload = &head[5..];

        if stored_crc != 0 {
            let actual = crc32fast::hash(head);
            if actual != stored_crc {
                tracing::warn!(offset = pos, "delta journal: CRC mismatch, skipping entry");
                pos += total;
                continue;
            }
        }

        match decode_payload(op_byte, payload) {
            Ok(decoded) => out.push(decoded),
            Err(e) => tracing::warn!(offset = pos, error = %e, "delta journal: corrupt entry payload, skipping"),
        }
        pos += total;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips() {
        let rows = vec![FactRow {
            id: 0,
            seq: 0,
            sources: vec!["src1".to_string()],
            attrs: vec![("type".to_string(), "instance_of".to_string()), ("individual".to_string(), "Felix".to_string())],
        }];
        let bytes = encode_snapshot(&rows).unwrap();
        let header = decode_snapshot_header(&bytes).unwrap();
        assert_eq!(header.row_count, 1);
        let row = decode_row(&bytes[header.rows_start..header.rows_start + header.row_lengths[0] as usize]).unwrap();
        assert_eq!(row.id, 0);
        assert_eq!(row.attrs, rows[0].attrs);
    }

    #[test]
    fn corrupted_entry_is_skipped_others_replay() {
        let mut buf = Vec::new();
        for i in 0..3u64 {
            let op = DeltaOp::RemoveFact(RemoveFactPayload { id: i });
            buf.extend_from_slice(&encode_entry(&op).unwrap());
        }
        // Flip a byte inside the middle entry's payload.
        let first_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        let mid_payload_byte = first_len + 4 + 5; // first entry + len/op of second + 1 payload byte in
        buf[mid_payload_byte] ^= 0xFF;

        let decoded = decode_entries(&buf);
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn zero_crc_entry_is_accepted_without_validation() {
        let op = DeltaOp::RemoveFact(RemoveFactPayload { id: 7 });
        let mut bytes = encode_entry(&op).unwrap();
        let len = bytes.len();
        bytes[len - 4..].copy_from_slice(&0u32.to_le_bytes());
        let decoded = decode_entries(&bytes);
        assert_eq!(decoded.len(), 1);
        match &decoded[0] {
            DeltaOp::RemoveFact(p) => assert_eq!(p.id, 7),
            _ => panic!("wrong op"),
        }
    }
}
