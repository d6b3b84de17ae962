//! Working-tree materialization from an in-memory object set.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::commit;
use crate::errors::GitError;
use crate::object::{GitObject, ObjKind};
use crate::tree::{parse_tree, Mode};

/// Write out the working tree of every commit in `objects` under
/// `target`. Objects come from the resolved pack, not the store: a
/// tree entry pointing outside the set is fatal for this checkout.
pub fn materialize(objects: &[GitObject], target: &Path) -> Result<()> {
    let by_id: HashMap<&str, &GitObject> = objects.iter().map(|o| (o.id.as_str(), o)).collect();
    for object in objects.iter().filter(|o| o.kind == ObjKind::Commit) {
        for tree_id in commit::tree_ids(&object.content) {
            materialize_tree(&by_id, &tree_id, target)
                .with_context(|| format!("checking out commit {}", object.id))?;
        }
    }
    Ok(())
}

// Explicit worklist instead of recursing per directory, so repository
// depth can't exhaust the call stack.
fn materialize_tree(
    by_id: &HashMap<&str, &GitObject>,
    root: &str,
    target: &Path,
) -> Result<()> {
    let mut work: Vec<(String, PathBuf)> = vec![(root.to_owned(), target.to_owned())];

    while let Some((tree_id, dir)) = work.pop() {
        let tree = by_id
            .get(tree_id.as_str())
            .ok_or_else(|| GitError::MissingObject(tree_id.clone()))?;
        if tree.kind != ObjKind::Tree {
            bail!("object {} is a {}, expected a tree", tree_id, tree.kind.as_str());
        }

        for entry in parse_tree(&tree.content)? {
            let id = hex::encode(entry.id);
            let path = dir.join(OsStr::from_bytes(&entry.name));
            let child = by_id
                .get(id.as_str())
                .ok_or_else(|| GitError::MissingObject(id.clone()))?;

            match child.kind {
                ObjKind::Tree => {
                    fs::create_dir_all(&path)
                        .with_context(|| format!("creating directory {}", path.display()))?;
                    work.push((id, path));
                }
                ObjKind::Blob => match entry.mode {
                    Mode::SymLink => {
                        let dest = OsStr::from_bytes(&child.content);
                        if path.symlink_metadata().is_ok() {
                            fs::remove_file(&path)?;
                        }
                        std::os::unix::fs::symlink(dest, &path).with_context(|| {
                            format!("creating symlink {}", path.display())
                        })?;
                    }
                    _ => {
                        fs::write(&path, &child.content)
                            .with_context(|| format!("writing file {}", path.display()))?;
                        if entry.mode == Mode::Exe {
                            let mut perms = fs::metadata(&path)?.permissions();
                            perms.set_mode(perms.mode() | 0o111);
                            fs::set_permissions(&path, perms)
                                .with_context(|| format!("making {} executable", path.display()))?;
                        }
                    }
                },
                kind => bail!(
                    "tree entry {} points at a {}, which cannot be checked out",
                    id,
                    kind.as_str()
                ),
            }
        }
    }
    Ok(())
}
