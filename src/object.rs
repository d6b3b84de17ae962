//! Object identity: kinds, content hashing, the in-memory object.

use anyhow::{anyhow, Result};
use sha1::{Digest, Sha1};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjKind {
    // Loose objects, once uncompressed, start with either
    // "commit", "tree", "blob" or "tag", followed by a " ".
    pub fn from_bytes(label: &[u8]) -> Result<ObjKind> {
        match label {
            b"commit" => Ok(ObjKind::Commit),
            b"tree" => Ok(ObjKind::Tree),
            b"blob" => Ok(ObjKind::Blob),
            b"tag" => Ok(ObjKind::Tag),
            l => Err(anyhow!("unknown object type {:?}", l)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjKind::Commit => "commit",
            ObjKind::Tree => "tree",
            ObjKind::Blob => "blob",
            ObjKind::Tag => "tag",
        }
    }
}

/// A fully materialized object. The id is always recomputed from the
/// content, never trusted from the wire.
#[derive(Debug, Clone)]
pub struct GitObject {
    pub id: String,
    pub kind: ObjKind,
    pub content: Vec<u8>,
}

impl GitObject {
    pub fn new(kind: ObjKind, content: Vec<u8>) -> GitObject {
        let id = object_id(kind, &content);
        GitObject { id, kind, content }
    }
}

/// Content address: sha1 over `"<kind> <len>\0"` followed by the content.
pub fn object_id(kind: ObjKind, content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{} {}\0", kind.as_str(), content.len()).as_bytes());
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
