//! Commit objects: construction for `commit-tree`, header parsing for
//! checkout.

use std::fmt::Write;
use std::time::{SystemTime, UNIX_EPOCH};

// A real client would read user.name/user.email from config; the
// plumbing only needs a syntactically valid identity.
const IDENTITY: &str = "minigit <minigit@localhost>";

/// Build the raw content of a commit object.
pub fn build_commit(tree: &str, parent: Option<&str>, message: &str) -> Vec<u8> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut out = String::new();
    let _ = writeln!(out, "tree {}", tree);
    if let Some(parent) = parent {
        let _ = writeln!(out, "parent {}", parent);
    }
    let _ = writeln!(out, "author {} {} +0000", IDENTITY, timestamp);
    let _ = writeln!(out, "committer {} {} +0000", IDENTITY, timestamp);
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", message);
    out.into_bytes()
}

/// Extract the `tree <id>` lines from a commit's header block
/// (normally exactly one). The message body is never consulted.
pub fn tree_ids(content: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(content);
    let header = text.split("\n\n").next().unwrap_or("");
    header
        .lines()
        .filter_map(|line| line.strip_prefix("tree "))
        .filter(|id| id.len() == 40 && id.bytes().all(|b| b.is_ascii_hexdigit()))
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";
    const PARENT: &str = "ce013625030ba8dba906f756967f9e9ca394464a";

    #[test]
    fn commit_content_has_the_header_block() {
        let content = build_commit(TREE, Some(PARENT), "initial commit");
        let text = String::from_utf8(content).unwrap();
        assert!(text.starts_with(&format!("tree {}\nparent {}\nauthor ", TREE, PARENT)));
        assert!(text.contains("\n\ninitial commit\n"));

        let rootless = build_commit(TREE, None, "no parent");
        assert!(!String::from_utf8(rootless).unwrap().contains("parent"));
    }

    #[test]
    fn tree_ids_come_from_the_header_only() {
        let content = build_commit(TREE, None, &format!("tree {}", PARENT));
        assert_eq!(tree_ids(&content), vec![TREE.to_owned()]);
    }

    #[test]
    fn non_id_tree_lines_are_ignored() {
        let content = b"tree not-a-hash\nauthor x <x> 0 +0000\n\nmsg\n";
        assert!(tree_ids(content).is_empty());
    }
}
