//! Nested directory view over a flat repository listing.

use std::collections::BTreeMap;

use crate::repository::{EntryKind, RevisionId, TreeEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub name: String,
    pub path: String,
    pub revision: RevisionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirectoryNode {
    pub name: String,
    pub path: String,
    pub children: BTreeMap<String, TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    File(FileNode),
    Directory(DirectoryNode),
}

impl TreeNode {
    pub fn name(&self) -> &str {
        match self {
            TreeNode::File(file) => &file.name,
            TreeNode::Directory(dir) => &dir.name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            TreeNode::File(file) => &file.path,
            TreeNode::Directory(dir) => &dir.path,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, TreeNode::Directory(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTree {
    root: DirectoryNode,
}

impl FileTree {
    /// Build the tree from a flat listing. Shallow entries are placed first so
    /// explicit directory entries exist before their children; an entry whose
    /// parent turns out to be a file is skipped.
    pub fn from_entries(entries: &[TreeEntry]) -> Self {
        let mut root = DirectoryNode {
            name: "root".to_string(),
            path: String::new(),
            children: BTreeMap::new(),
        };

        let mut sorted: Vec<&TreeEntry> = entries.iter().filter(|e| !e.path.is_empty()).collect();
        sorted.sort_by_key(|e| e.path.split('/').count());

        for entry in sorted {
            if !insert(&mut root, entry) {
                tracing::warn!(path = %entry.path, "path conflict: a parent is a file, skipping entry");
            }
        }

        Self { root }
    }

    pub fn root(&self) -> &DirectoryNode {
        &self.root
    }

    /// The node at `path`. The root itself has no node.
    pub fn node(&self, path: &str) -> Option<&TreeNode> {
        let mut parts = path.split('/').filter(|p| !p.is_empty()).peekable();
        let mut dir = &self.root;
        while let Some(part) = parts.next() {
            let child = dir.children.get(part)?;
            if parts.peek().is_none() {
                return Some(child);
            }
            match child {
                TreeNode::Directory(next) => dir = next,
                TreeNode::File(_) => return None,
            }
        }
        None
    }

    /// Immediate children of the directory at `path`, `None` if it is not a directory.
    pub fn children_at(&self, path: &str) -> Option<Vec<&TreeNode>> {
        let dir = if path.split('/').all(|p| p.is_empty()) {
            &self.root
        } else {
            match self.node(path)? {
                TreeNode::Directory(dir) => dir,
                TreeNode::File(_) => return None,
            }
        };
        Some(dir.children.values().collect())
    }
}

fn insert(root: &mut DirectoryNode, entry: &TreeEntry) -> bool {
    let parts: Vec<&str> = entry.path.split('/').collect();
    let Some((name, parents)) = parts.split_last() else {
        return true;
    };

    let mut dir = root;
    for (depth, part) in parents.iter().enumerate() {
        let child = dir
            .children
            .entry(part.to_string())
            .or_insert_with(|| {
                TreeNode::Directory(DirectoryNode {
                    name: part.to_string(),
                    path: parts[..=depth].join("/"),
                    children: BTreeMap::new(),
                })
            });
        match child {
            TreeNode::Directory(next) => dir = next,
            TreeNode::File(_) => return false,
        }
    }

    match entry.kind {
        EntryKind::Blob => {
            dir.children.insert(
                name.to_string(),
                TreeNode::File(FileNode {
                    name: name.to_string(),
                    path: entry.path.clone(),
                    revision: entry.revision.clone(),
                }),
            );
        }
        EntryKind::Tree => {
            dir.children.entry(name.to_string()).or_insert_with(|| {
                TreeNode::Directory(DirectoryNode {
                    name: name.to_string(),
                    path: entry.path.clone(),
                    children: BTreeMap::new(),
                })
            });
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(path: &str) -> TreeEntry {
        TreeEntry {
            path: path.to_string(),
            kind: EntryKind::Blob,
            revision: RevisionId::new(format!("sha-{}", path)),
        }
    }

    fn dir(path: &str) -> TreeEntry {
        TreeEntry {
            path: path.to_string(),
            kind: EntryKind::Tree,
            revision: RevisionId::new("tree"),
        }
    }

    #[test]
    fn test_builds_nested_directories() {
        let tree = FileTree::from_entries(&[
            blob("src/components/App.tsx"),
            dir("src"),
            blob("package.json"),
        ]);

        let names: Vec<&str> = tree.children_at("").unwrap().iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["package.json", "src"]);

        let components = tree.node("src/components").unwrap();
        assert!(components.is_directory());
        assert_eq!(components.path(), "src/components");

        match tree.node("src/components/App.tsx").unwrap() {
            TreeNode::File(file) => assert_eq!(file.revision.as_str(), "sha-src/components/App.tsx"),
            other => panic!("expected a file, got {other:?}"),
        }
    }

    #[test]
    fn test_children_at_file_or_missing_path() {
        let tree = FileTree::from_entries(&[blob("README.md")]);
        assert!(tree.children_at("README.md").is_none());
        assert!(tree.children_at("docs").is_none());
        assert!(tree.node("README.md/extra").is_none());
    }

    #[test]
    fn test_file_parent_conflict_is_skipped() {
        let tree = FileTree::from_entries(&[blob("notes"), blob("notes/today.md"), blob("ok.txt")]);

        let names: Vec<&str> = tree.children_at("").unwrap().iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["notes", "ok.txt"]);
        assert!(!tree.node("notes").unwrap().is_directory());
    }

    #[test]
    fn test_empty_listing() {
        let tree = FileTree::from_entries(&[]);
        assert!(tree.children_at("/").unwrap().is_empty());
        assert!(tree.node("").is_none());
    }
}
