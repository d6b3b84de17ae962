//! Loose-object storage under `.git/objects`, sharded by the first two
//! hex digits of the id. Writes go through a temporary file and a
//! rename, so a half-written object is never visible under its final
//! name; content addressing makes repeated writes idempotent.

use anyhow::{bail, ensure, Context, Result};
use flate2::{bufread::ZlibDecoder, write::ZlibEncoder, Compression};
use rand::Rng;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use crate::object::{object_id, ObjKind};

pub struct ObjectStore {
    git_dir: PathBuf,
}

impl ObjectStore {
    /// Locate the enclosing repository, as the plumbing commands do.
    pub fn from_cwd() -> Result<ObjectStore> {
        let cwd = std::env::current_dir()?;
        for dir in cwd.ancestors() {
            if dir.join(".git").is_dir() {
                return Ok(ObjectStore {
                    git_dir: dir.join(".git"),
                });
            }
        }
        bail!("not a git repository (or any of the parent directories): .git");
    }

    /// Create a fresh repository layout at `path`.
    pub fn init(path: &Path) -> Result<ObjectStore> {
        let git_dir = path.join(".git");
        fs::create_dir_all(git_dir.join("objects"))
            .with_context(|| format!("creating {}", git_dir.join("objects").display()))?;
        fs::create_dir_all(git_dir.join("refs")).context("creating .git/refs")?;
        fs::write(git_dir.join("HEAD"), b"ref: refs/heads/main\n").context("creating .git/HEAD")?;
        Ok(ObjectStore { git_dir })
    }

    /// The layout a clone produces: the extra bookkeeping directories
    /// and a HEAD pointing at master, with no trailing newline.
    pub fn init_for_clone(path: &Path) -> Result<ObjectStore> {
        let git_dir = path.join(".git");
        for sub in ["objects", "refs", "branches", "info", "logs", "hooks"] {
            fs::create_dir_all(git_dir.join(sub))
                .with_context(|| format!("creating .git/{}", sub))?;
        }
        fs::write(git_dir.join("HEAD"), b"ref: refs/heads/master")
            .context("creating .git/HEAD")?;
        Ok(ObjectStore { git_dir })
    }

    /// Root of the working tree this store belongs to.
    pub fn work_root(&self) -> &Path {
        self.git_dir.parent().expect(".git has a parent")
    }

    fn object_path(&self, id: &str) -> Result<PathBuf> {
        ensure!(id.len() == 40, "not a valid object name {}", id);
        Ok(self.git_dir.join("objects").join(&id[0..2]).join(&id[2..]))
    }

    /// Persist an object, returning its content address.
    pub fn put(&self, kind: ObjKind, content: &[u8]) -> Result<String> {
        let id = object_id(kind, content);
        let path = self.object_path(&id)?;
        if path.exists() {
            // same content, same bytes: nothing to do
            return Ok(id);
        }
        fs::create_dir_all(path.parent().expect("object path has a shard dir"))
            .with_context(|| format!("creating shard for {}", id))?;

        let mut tmp_rand = [0u8; 20];
        rand::rng().fill(&mut tmp_rand);
        let tmp_path = self.git_dir.join(format!("tmpobj{}", hex::encode(tmp_rand)));
        let file = fs::File::create(&tmp_path)
            .with_context(|| format!("could not create {}", tmp_path.display()))?;
        let mut zenc = ZlibEncoder::new(file, Compression::default());
        write!(zenc, "{} {}\0", kind.as_str(), content.len()).context("writing object header")?;
        zenc.write_all(content).context("writing object content")?;
        zenc.finish().context("closing zlib stream")?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("renaming temporary file to {}", path.display()))?;
        Ok(id)
    }

    /// Read an object back: inflate, strip the `"<kind> <len>\0"` header.
    pub fn get(&self, id: &str) -> Result<(ObjKind, Vec<u8>)> {
        let path = self.object_path(id)?;
        let file =
            fs::File::open(&path).with_context(|| format!("not a valid object name {}", id))?;
        let mut zdec = ZlibDecoder::new(io::BufReader::new(file));
        let mut raw = Vec::new();
        zdec.read_to_end(&mut raw)
            .with_context(|| format!("inflating object {}", id))?;

        let nul = raw
            .iter()
            .position(|&b| b == 0)
            .with_context(|| format!("object {} has no header terminator", id))?;
        let header = &raw[..nul];
        let space = header
            .iter()
            .position(|&b| b == b' ')
            .with_context(|| format!("object {} has a malformed header", id))?;
        let kind = ObjKind::from_bytes(&header[..space])?;
        let size: usize = std::str::from_utf8(&header[space + 1..])?
            .parse()
            .with_context(|| format!("object {} has a malformed size field", id))?;
        let content = raw.split_off(nul + 1);
        ensure!(
            content.len() == size,
            "size mismatch in object {}: expected {}, got {}",
            id,
            size,
            content.len()
        );
        Ok((kind, content))
    }
}
