//! Pack container parsing, see gitformat-pack(5).
//!
//! The whole pack is held in memory; parsing walks it once and splits
//! it into raw records. Delta records keep their base reference but are
//! not applied here; that is `delta`'s job.

use flate2::bufread::ZlibDecoder;
use std::io::prelude::*;

use crate::errors::GitError;
use crate::object::ObjKind;

/// Pack-internal record type. The two delta kinds never survive into
/// the materialized object set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Commit,
    Tree,
    Blob,
    Tag,
    OfsDelta,
    RefDelta,
}

impl RecordKind {
    fn from_tag(tag: u8) -> Result<RecordKind, GitError> {
        match tag {
            1 => Ok(RecordKind::Commit),
            2 => Ok(RecordKind::Tree),
            3 => Ok(RecordKind::Blob),
            4 => Ok(RecordKind::Tag),
            6 => Ok(RecordKind::OfsDelta),
            7 => Ok(RecordKind::RefDelta),
            t => Err(GitError::InvalidPack(format!("invalid object type tag {}", t))),
        }
    }

    /// The terminal object kind, or None for delta records.
    pub fn obj_kind(self) -> Option<ObjKind> {
        match self {
            RecordKind::Commit => Some(ObjKind::Commit),
            RecordKind::Tree => Some(ObjKind::Tree),
            RecordKind::Blob => Some(ObjKind::Blob),
            RecordKind::Tag => Some(ObjKind::Tag),
            RecordKind::OfsDelta | RecordKind::RefDelta => None,
        }
    }
}

/// What a delta record is relative to: a full object id (ref-delta) or
/// the absolute pack offset of the base record (ofs-delta).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaBase {
    Id(String),
    Offset(usize),
}

/// One record as it sits in the pack, payload inflated but deltas not
/// yet applied. Transient: discarded once resolved into objects.
#[derive(Debug)]
pub struct RawRecord {
    pub kind: RecordKind,
    pub declared_len: usize,
    pub data: Vec<u8>,
    pub base: Option<DeltaBase>,
    /// Byte offset of this record's header in the pack, the key
    /// ofs-delta records use to name their base.
    pub offset: usize,
}

fn truncated(what: &str, offset: usize) -> GitError {
    GitError::InvalidPack(format!("truncated {} at offset {}", what, offset))
}

/// Parse a complete pack buffer into its version and record list.
/// The trailing pack checksum is not verified.
pub fn parse_pack(pack: &[u8]) -> Result<(u32, Vec<RawRecord>), GitError> {
    if pack.len() < 12 {
        return Err(GitError::InvalidPack("shorter than the 12-byte header".into()));
    }
    if &pack[..4] != b"PACK" {
        return Err(GitError::InvalidPack("missing PACK signature".into()));
    }
    let version = u32::from_be_bytes(pack[4..8].try_into().expect("slice size is 4"));
    if !(1..=2).contains(&version) {
        return Err(GitError::InvalidPack(format!("unsupported version {}", version)));
    }
    let count = u32::from_be_bytes(pack[8..12].try_into().expect("slice size is 4"));

    let mut records = Vec::with_capacity(count as usize);
    let mut pos = 12;
    for _ in 0..count {
        let (record, next) = parse_record(pack, pos)?;
        records.push(record);
        pos = next;
    }
    Ok((version, records))
}

// gitformat-pack(5) "object entries": n-byte type-and-length header
// (3-bit type, 4 + (n-1)*7 bits of size), then for deltas the base
// reference, then one zlib stream.
fn parse_record(pack: &[u8], start: usize) -> Result<(RawRecord, usize), GitError> {
    let mut pos = start;
    let (tag, declared_len, next) = read_record_header(pack, pos)?;
    pos = next;
    let kind = RecordKind::from_tag(tag)?;

    let base = match kind {
        RecordKind::RefDelta => {
            let digest = pack
                .get(pos..pos + 20)
                .ok_or_else(|| truncated("base object digest", pos))?;
            pos += 20;
            Some(DeltaBase::Id(hex::encode(digest)))
        }
        RecordKind::OfsDelta => {
            let (distance, next) = read_base_distance(pack, pos)?;
            pos = next;
            let base_offset = start.checked_sub(distance).ok_or_else(|| {
                GitError::InvalidPack(format!(
                    "ofs-delta at offset {} points {} bytes before the pack",
                    start, distance
                ))
            })?;
            Some(DeltaBase::Offset(base_offset))
        }
        _ => None,
    };

    // One zlib stream per record. The cursor advances by the number of
    // compressed bytes the inflater consumed; the declared length says
    // nothing about where the stream ends.
    let mut zdec = ZlibDecoder::new(&pack[pos..]);
    let mut data = Vec::new();
    zdec.read_to_end(&mut data)
        .map_err(|e| GitError::InvalidPack(format!("inflating record at offset {}: {}", start, e)))?;
    let consumed = zdec.total_in() as usize;

    let record = RawRecord {
        kind,
        declared_len,
        data,
        base,
        offset: start,
    };
    if record.data.len() != record.declared_len {
        eprintln!(
            "warning: record at offset {} declared {} bytes but inflated to {}",
            start,
            record.declared_len,
            record.data.len()
        );
    }
    Ok((record, pos + consumed))
}

// gitformat-pack(5) "Size encoding", seeded with the 4 low bits of the
// first byte; continuation bytes contribute 7 bits each.
fn read_record_header(pack: &[u8], mut pos: usize) -> Result<(u8, usize, usize), GitError> {
    let first = *pack.get(pos).ok_or_else(|| truncated("record header", pos))?;
    pos += 1;
    let tag = (first >> 4) & 0b111;
    let mut size = (first & 0x0f) as usize;
    let mut shift = 4;
    let mut byte = first;
    while byte & 0x80 != 0 {
        byte = *pack.get(pos).ok_or_else(|| truncated("record size", pos))?;
        pos += 1;
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
    }
    Ok((tag, size, pos))
}

// Negative distance back to the base record. Unlike the size encoding
// this one is big-endian-first and biases each continuation by one so
// that distinct encodings are distinct values.
fn read_base_distance(pack: &[u8], mut pos: usize) -> Result<(usize, usize), GitError> {
    let mut byte = *pack.get(pos).ok_or_else(|| truncated("base distance", pos))?;
    pos += 1;
    let mut distance = (byte & 0x7f) as usize;
    while byte & 0x80 != 0 {
        byte = *pack.get(pos).ok_or_else(|| truncated("base distance", pos))?;
        pos += 1;
        distance = ((distance + 1) << 7) | (byte & 0x7f) as usize;
    }
    Ok((distance, pos))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::{write::ZlibEncoder, Compression};
    use std::io::Write;

    pub(crate) fn deflate(data: &[u8]) -> Vec<u8> {
        let mut zenc = ZlibEncoder::new(Vec::new(), Compression::default());
        zenc.write_all(data).unwrap();
        zenc.finish().unwrap()
    }

    pub(crate) fn record_header(tag: u8, mut size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut byte = (tag << 4) | (size & 0x0f) as u8;
        size >>= 4;
        while size > 0 {
            out.push(byte | 0x80);
            byte = (size & 0x7f) as u8;
            size >>= 7;
        }
        out.push(byte);
        out
    }

    /// A syntactically complete pack holding the given (tag, extra
    /// header bytes, payload) entries. The trailer is not a real
    /// checksum; the parser ignores it.
    pub(crate) fn make_pack(entries: &[(u8, &[u8], &[u8])]) -> Vec<u8> {
        let mut pack = b"PACK".to_vec();
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        for (tag, extra, payload) in entries {
            pack.extend_from_slice(&record_header(*tag, payload.len()));
            pack.extend_from_slice(extra);
            pack.extend_from_slice(&deflate(payload));
        }
        pack.extend_from_slice(&[0u8; 20]);
        pack
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        assert!(matches!(
            parse_pack(b"PUCK\x00\x00\x00\x02\x00\x00\x00\x00"),
            Err(GitError::InvalidPack(_))
        ));
        assert!(matches!(
            parse_pack(b"PACK\x00\x00\x00\x03\x00\x00\x00\x00"),
            Err(GitError::InvalidPack(_))
        ));
        assert!(matches!(parse_pack(b"PACK"), Err(GitError::InvalidPack(_))));
    }

    #[test]
    fn record_count_matches_header() {
        let pack = make_pack(&[
            (3, &[], b"hello\n"),
            (3, &[], b"world\n"),
            (2, &[], b""),
        ]);
        let (version, records) = parse_pack(&pack).unwrap();
        assert_eq!(version, 2);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].kind, RecordKind::Blob);
        assert_eq!(records[0].data, b"hello\n");
        assert_eq!(records[0].declared_len, 6);
        assert_eq!(records[2].kind, RecordKind::Tree);
        assert!(records[2].data.is_empty());
    }

    #[test]
    fn size_encoding_shifts_by_four_then_seven() {
        // one continuation byte: 0x9c = cont|tag 1|seed 0xc, then 0x01
        let (tag, size, next) = read_record_header(&[0x9c, 0x01], 0).unwrap();
        assert_eq!((tag, size, next), (1, 0x1c, 2));

        // no continuation: seed only
        let (tag, size, _) = read_record_header(&[0x35], 0).unwrap();
        assert_eq!((tag, size), (3, 5));

        // two continuations: 0x7f at shift 4, 0x03 at shift 11
        let (_, size, _) = read_record_header(&[0x9f, 0xff, 0x03], 0).unwrap();
        assert_eq!(size, 0xf | (0x7f << 4) | (0x03 << 11));

        // three continuations: only the last byte contributes, shift 18
        let (_, size, _) = read_record_header(&[0x90, 0x80, 0x80, 0x01], 0).unwrap();
        assert_eq!(size, 1 << 18);
    }

    #[test]
    fn invalid_type_tags_rejected() {
        for tag in [0u8, 5] {
            let pack = make_pack(&[(tag, &[], b"x")]);
            assert!(matches!(parse_pack(&pack), Err(GitError::InvalidPack(_))));
        }
    }

    #[test]
    fn ref_delta_consumes_its_base_digest() {
        let digest = [0xabu8; 20];
        let pack = make_pack(&[(3, &[], b"base"), (7, &digest, b"delta-payload")]);
        let (_, records) = parse_pack(&pack).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].kind, RecordKind::RefDelta);
        assert_eq!(records[1].base, Some(DeltaBase::Id("ab".repeat(20))));
        assert_eq!(records[1].data, b"delta-payload");
    }

    #[test]
    fn ofs_delta_resolves_to_an_absolute_offset() {
        // Built by hand: make_pack can't encode the distance field.
        let base_payload = b"short base";
        let mut pack = b"PACK".to_vec();
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&2u32.to_be_bytes());
        let base_offset = pack.len();
        pack.extend_from_slice(&record_header(3, base_payload.len()));
        pack.extend_from_slice(&deflate(base_payload));
        let delta_offset = pack.len();
        pack.extend_from_slice(&record_header(6, 0));
        pack.push((delta_offset - base_offset) as u8);
        pack.extend_from_slice(&deflate(b""));
        pack.extend_from_slice(&[0u8; 20]);

        let (_, records) = parse_pack(&pack).unwrap();
        assert_eq!(records[0].offset, base_offset);
        assert_eq!(records[1].offset, delta_offset);
        assert_eq!(records[1].base, Some(DeltaBase::Offset(base_offset)));
    }

    #[test]
    fn base_distance_encoding_is_biased() {
        assert_eq!(read_base_distance(&[0x05], 0).unwrap(), (5, 1));
        // two bytes: ((0x01 + 1) << 7) | 0x05
        assert_eq!(read_base_distance(&[0x81, 0x05], 0).unwrap(), (261, 2));
    }
}
