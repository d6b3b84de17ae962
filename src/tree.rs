//! Tree objects: entry codec, listing, and building a tree from the
//! working directory.

use anyhow::{anyhow, bail, Context, Result};
use std::fs;
use std::io;
use std::io::prelude::*;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::object::ObjKind;
use crate::store::ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Dir,
    File,
    Exe,
    SymLink,
    SubMod,
}

impl Mode {
    fn from_bytes(mode: &[u8]) -> Result<Self> {
        match mode {
            b"40000" => Ok(Mode::Dir),
            b"100644" => Ok(Mode::File),
            b"100755" => Ok(Mode::Exe),
            b"120000" => Ok(Mode::SymLink),
            b"160000" => Ok(Mode::SubMod),
            m => bail!("unknown mode {:?}", m),
        }
    }

    fn from_metadata(meta: &fs::Metadata) -> Result<Self> {
        if meta.is_symlink() {
            Ok(Mode::SymLink)
        } else if meta.is_dir() {
            Ok(Mode::Dir)
        } else if meta.is_file() {
            if meta.permissions().mode() & 0o111 != 0 {
                Ok(Mode::Exe)
            } else {
                Ok(Mode::File)
            }
        } else {
            bail!("neither a regular file, nor a directory, nor a symlink");
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Dir => "40000",
            Mode::File => "100644",
            Mode::Exe => "100755",
            Mode::SymLink => "120000",
            Mode::SubMod => "160000",
        }
    }

    fn obj_kind(&self) -> ObjKind {
        match self {
            Mode::Dir => ObjKind::Tree,
            Mode::File | Mode::Exe | Mode::SymLink => ObjKind::Blob,
            Mode::SubMod => ObjKind::Commit,
        }
    }
}

/// One decoded tree entry: `<mode> <name>\0` + 20 raw digest bytes.
pub struct TreeEntry {
    pub mode: Mode,
    pub name: Vec<u8>,
    pub id: [u8; 20],
}

/// Decode a tree object's raw content, left to right.
pub fn parse_tree(content: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0;
    while pos < content.len() {
        let space = content[pos..]
            .iter()
            .position(|&b| b == b' ')
            .map(|i| pos + i)
            .ok_or_else(|| anyhow!("tree entry at {} has no mode terminator", pos))?;
        let nul = content[space..]
            .iter()
            .position(|&b| b == b'\0')
            .map(|i| space + i)
            .ok_or_else(|| anyhow!("tree entry at {} has no name terminator", pos))?;
        let id: [u8; 20] = content
            .get(nul + 1..nul + 21)
            .ok_or_else(|| anyhow!("tree entry at {} has a truncated id", pos))?
            .try_into()
            .expect("slice size is 20");
        entries.push(TreeEntry {
            mode: Mode::from_bytes(&content[pos..space])?,
            name: content[space + 1..nul].to_vec(),
            id,
        });
        pos = nul + 21;
    }
    Ok(entries)
}

fn push_tree_entry(out: &mut Vec<u8>, mode: Mode, name: &[u8], id: &str) -> Result<()> {
    let id = hex::decode(id).context("entry id is not valid hex")?;
    out.extend_from_slice(mode.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(name);
    out.push(b'\0');
    out.extend_from_slice(&id);
    Ok(())
}

/// Print a stored tree in `ls-tree` format.
pub fn ls_tree(store: &ObjectStore, id: &str, name_only: bool) -> Result<()> {
    let (kind, content) = store.get(id)?;
    if kind != ObjKind::Tree {
        bail!("not a tree object");
    }
    let mut stdout = io::stdout().lock();
    for entry in parse_tree(&content)? {
        if !name_only {
            write!(
                stdout,
                "{:0>6} {} {}\t",
                entry.mode.as_str(),
                entry.mode.obj_kind().as_str(),
                hex::encode(entry.id)
            )?;
        }
        stdout.write_all(&entry.name)?;
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}

const EMPTY_TREE_ID: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

fn hash_dir_entry(store: &ObjectStore, entry: &fs::DirEntry) -> Result<String> {
    let path = entry.path();
    let file_type = entry.file_type().context("checking entry type")?;

    if file_type.is_dir() {
        tree_from_dir(store, &path).context("hashing subtree")
    } else if file_type.is_file() {
        let content =
            fs::read(&path).with_context(|| format!("could not read {}", path.display()))?;
        store.put(ObjKind::Blob, &content).context("hashing file")
    } else if file_type.is_symlink() {
        let dest = fs::read_link(&path).context("readlink")?;
        store
            .put(ObjKind::Blob, dest.as_os_str().as_bytes())
            .context("hashing symlink")
    } else {
        bail!("neither a regular file, nor a directory, nor a symlink");
    }
}

fn tree_from_dir(store: &ObjectStore, dir: &Path) -> Result<String> {
    let mut out = Vec::new();

    // Entries must be sorted by name for the tree id to be stable.
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().into_encoded_bytes();
        if name == b".git" {
            continue;
        }

        let id = hash_dir_entry(store, &entry)?;
        if id == EMPTY_TREE_ID {
            continue;
        }

        let meta = entry.metadata().context("checking entry metadata")?;
        push_tree_entry(&mut out, Mode::from_metadata(&meta)?, &name, &id)?;
    }

    store.put(ObjKind::Tree, &out)
}

/// Hash the working directory into a tree object, returning its id.
pub fn tree_from_workdir(store: &ObjectStore) -> Result<String> {
    tree_from_dir(store, store.work_root())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::object_id;

    #[test]
    fn entries_decode_in_order() {
        let mut content = Vec::new();
        push_tree_entry(&mut content, Mode::File, b"a.txt", &"0a".repeat(20)).unwrap();
        push_tree_entry(&mut content, Mode::Dir, b"sub", &"0b".repeat(20)).unwrap();
        let entries = parse_tree(&content).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].mode, Mode::File);
        assert_eq!(entries[0].name, b"a.txt");
        assert_eq!(entries[0].id, [0x0a; 20]);
        assert_eq!(entries[1].mode, Mode::Dir);
        assert_eq!(entries[1].name, b"sub");
    }

    #[test]
    fn truncated_entries_rejected() {
        let mut content = Vec::new();
        push_tree_entry(&mut content, Mode::File, b"a", &"0c".repeat(20)).unwrap();
        content.truncate(content.len() - 3);
        assert!(parse_tree(&content).is_err());
        assert!(parse_tree(b"100644 noterminator").is_err());
    }

    #[test]
    fn workdir_tree_skips_git_and_sorts_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::init(dir.path()).unwrap();
        fs::write(dir.path().join("b.txt"), b"bee\n").unwrap();
        fs::write(dir.path().join("a.txt"), b"ay\n").unwrap();

        let id = tree_from_workdir(&store).unwrap();

        let mut expected = Vec::new();
        push_tree_entry(
            &mut expected,
            Mode::File,
            b"a.txt",
            &object_id(ObjKind::Blob, b"ay\n"),
        )
        .unwrap();
        push_tree_entry(
            &mut expected,
            Mode::File,
            b"b.txt",
            &object_id(ObjKind::Blob, b"bee\n"),
        )
        .unwrap();
        assert_eq!(id, object_id(ObjKind::Tree, &expected));

        // blobs were stored along the way
        let (kind, content) = store
            .get(&object_id(ObjKind::Blob, b"ay\n"))
            .unwrap();
        assert_eq!(kind, ObjKind::Blob);
        assert_eq!(content, b"ay\n");
    }
}
