//! Delta resolution: turn the raw record set into whole objects.
//!
//! Bases are looked up by content id (ref-delta) or pack offset
//! (ofs-delta), so records can be processed in any order; resolved
//! deltas become eligible bases themselves, which settles chains.

use std::collections::HashMap;

use crate::errors::GitError;
use crate::object::GitObject;
use crate::pack::{DeltaBase, RawRecord};

/// Outcome of resolving one pack: the materialized objects in the
/// order they settled, plus the deltas whose base never showed up.
pub struct Resolution {
    pub objects: Vec<GitObject>,
    pub skipped: Vec<DeltaBase>,
}

pub fn resolve(records: Vec<RawRecord>) -> Result<Resolution, GitError> {
    let mut by_id: HashMap<String, GitObject> = HashMap::new();
    let mut id_at_offset: HashMap<usize, String> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut pending: Vec<RawRecord> = Vec::new();

    for record in records {
        match record.kind.obj_kind() {
            Some(kind) => {
                let object = GitObject::new(kind, record.data);
                id_at_offset.insert(record.offset, object.id.clone());
                order.push(object.id.clone());
                by_id.insert(object.id.clone(), object);
            }
            None => pending.push(record),
        }
    }

    // A delta's base may itself be a later delta, so sweep until a
    // pass resolves nothing more.
    loop {
        let before = pending.len();
        let mut unresolved = Vec::new();
        for record in pending {
            let base_id = match &record.base {
                Some(DeltaBase::Id(id)) => Some(id.clone()),
                Some(DeltaBase::Offset(offset)) => id_at_offset.get(offset).cloned(),
                None => {
                    return Err(GitError::InvalidPack(format!(
                        "delta record at offset {} has no base reference",
                        record.offset
                    )))
                }
            };
            let base = base_id.and_then(|id| by_id.get(&id));
            match base {
                Some(base) => {
                    let content = apply_delta(&base.content, &record.data)?;
                    let object = GitObject::new(base.kind, content);
                    id_at_offset.insert(record.offset, object.id.clone());
                    order.push(object.id.clone());
                    by_id.insert(object.id.clone(), object);
                }
                None => unresolved.push(record),
            }
        }
        pending = unresolved;
        if pending.is_empty() || pending.len() == before {
            break;
        }
    }

    let mut skipped = Vec::new();
    for record in pending {
        let base = record.base.expect("checked above; deltas carry a base");
        let warning = match &base {
            DeltaBase::Id(id) => GitError::MissingBase(id.clone()),
            DeltaBase::Offset(offset) => GitError::MissingBase(format!("at offset {}", offset)),
        };
        eprintln!("warning: skipping delta at offset {}: {}", record.offset, warning);
        skipped.push(base);
    }

    let objects = order
        .iter()
        .filter_map(|id| by_id.remove(id))
        .collect();
    Ok(Resolution { objects, skipped })
}

/// Reconstruct an object from its base and a copy/insert instruction
/// stream, see gitformat-pack(5) "Deltified representation".
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, GitError> {
    let mut pos = 0;
    let _source_len = read_delta_size(delta, &mut pos)?;
    let target_len = read_delta_size(delta, &mut pos)?;

    let mut out = Vec::with_capacity(target_len);
    while pos < delta.len() {
        let control = delta[pos];
        pos += 1;
        if control & 0x80 != 0 {
            let (offset, len) = read_copy_args(control, delta, &mut pos)?;
            let chunk = offset
                .checked_add(len)
                .and_then(|end| base.get(offset..end))
                .ok_or_else(|| {
                    GitError::InvalidPack(format!(
                        "copy of {} bytes at {} outside base of {} bytes",
                        len,
                        offset,
                        base.len()
                    ))
                })?;
            out.extend_from_slice(chunk);
        } else {
            let len = (control & 0x7f) as usize;
            if len == 0 {
                return Err(GitError::InvalidPack(
                    "reserved zero-length insert instruction".into(),
                ));
            }
            let chunk = delta
                .get(pos..pos + len)
                .ok_or_else(|| GitError::InvalidPack("truncated insert instruction".into()))?;
            out.extend_from_slice(chunk);
            pos += len;
        }
    }
    Ok(out)
}

// Same accumulation as the pack record size, but the shift sequence
// starts at 0: 7 bits per byte, low bits first.
fn read_delta_size(delta: &[u8], pos: &mut usize) -> Result<usize, GitError> {
    let mut size = 0usize;
    let mut shift = 0;
    loop {
        let byte = *delta
            .get(*pos)
            .ok_or_else(|| GitError::InvalidPack("truncated delta size".into()))?;
        *pos += 1;
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(size);
        }
    }
}

// Copy instruction arguments: control bits 0-3 say which little-endian
// offset bytes follow, bits 4-6 which length bytes. Absent bytes are
// zero; an entirely absent length means 0x10000.
fn read_copy_args(control: u8, delta: &[u8], pos: &mut usize) -> Result<(usize, usize), GitError> {
    let mut next = |what: &str| -> Result<usize, GitError> {
        let byte = *delta
            .get(*pos)
            .ok_or_else(|| GitError::InvalidPack(format!("truncated copy {}", what)))?;
        *pos += 1;
        Ok(byte as usize)
    };

    let mut offset = 0usize;
    for i in 0..4 {
        if control & (1 << i) != 0 {
            offset |= next("offset")? << (8 * i);
        }
    }
    let mut len = 0usize;
    for i in 0..3 {
        if control & (1 << (4 + i)) != 0 {
            len |= next("length")? << (8 * i);
        }
    }
    if len == 0 {
        len = 0x10000;
    }
    Ok((offset, len))
}
