//! In-memory directory tree model
//!
//! The walker produces a tree of [`Node`] values: files, directories, and
//! the parent-sentinel placeholder used for the root's parent slot.
//! Parents own their children; the back-reference to a parent is a
//! lookup-only path, never ownership, and must not be used for mutation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Single-character status flag attached to every entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryFlag {
    /// Nothing notable (`' '`)
    Normal,
    /// Directory listed successfully but contained no entries (`'e'`)
    Empty,
    /// Stat or listing failed entirely (`'!'`)
    Error,
    /// Listing partially failed or the walk was cancelled mid-directory (`'.'`)
    Partial,
    /// Entry is a symbolic link (`'@'`)
    Symlink,
}

impl EntryFlag {
    /// The on-screen character for this flag
    pub fn as_char(self) -> char {
        match self {
            EntryFlag::Normal => ' ',
            EntryFlag::Empty => 'e',
            EntryFlag::Error => '!',
            EntryFlag::Partial => '.',
            EntryFlag::Symlink => '@',
        }
    }

    /// Parse a flag from its character form
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            ' ' => Some(EntryFlag::Normal),
            'e' => Some(EntryFlag::Empty),
            '!' => Some(EntryFlag::Error),
            '.' => Some(EntryFlag::Partial),
            '@' => Some(EntryFlag::Symlink),
            _ => None,
        }
    }

    /// True for the hard-error flag
    pub fn is_error(self) -> bool {
        matches!(self, EntryFlag::Error)
    }
}

/// A regular file (or symlink) in the tree
#[derive(Debug, Clone, PartialEq)]
pub struct FileNode {
    /// Basename of the file
    pub name: String,
    /// Apparent size in bytes
    pub size: u64,
    /// Allocated size in bytes
    pub usage: u64,
    /// Modification time (nanosecond precision preserved)
    pub mtime: SystemTime,
    /// Status flag
    pub flag: EntryFlag,
    /// Stable per-inode identifier for multi-linked files (0 if none)
    pub hardlink_id: u64,
    /// Path of the owning directory. Lookup-only back-reference.
    pub parent_path: PathBuf,
}

/// A directory in the tree, owning its children
#[derive(Debug, PartialEq)]
pub struct DirNode {
    /// Basename of the directory
    pub name: String,
    /// Path of the parent directory. Lookup-only back-reference.
    pub base_path: PathBuf,
    /// Aggregate apparent size, including all descendants
    pub size: u64,
    /// Aggregate allocated size, including all descendants
    pub usage: u64,
    /// Directory modification time
    pub mtime: SystemTime,
    /// Status flag
    pub flag: EntryFlag,
    /// Descendant count + 1 (self)
    pub item_count: u64,
    /// Direct children, in filesystem listing order
    pub children: Vec<Node>,
}

impl DirNode {
    /// Build an empty directory node for `path` with the given flag
    pub fn new(path: &Path, flag: EntryFlag, mtime: SystemTime) -> Self {
        Self {
            name: basename(path),
            base_path: parent_of(path),
            size: 0,
            usage: 0,
            mtime,
            flag,
            item_count: 1,
            children: Vec::new(),
        }
    }

    /// Build the `'!'`-flagged node returned when a directory cannot be
    /// stat'ed or the cache store cannot be opened
    pub fn error_dir(path: &Path) -> Self {
        Self::new(path, EntryFlag::Error, SystemTime::UNIX_EPOCH)
    }

    /// Full path of this directory
    pub fn path(&self) -> PathBuf {
        self.base_path.join(&self.name)
    }

    /// The parent slot of this directory as a navigable node.
    ///
    /// Always a [`Node::Parent`] sentinel; navigation code dispatches on
    /// the variant and can never mistake it for a real directory.
    pub fn parent_entry(&self) -> Node {
        Node::Parent(ParentSentinel {
            path: self.base_path.clone(),
        })
    }

    /// Attach a child, accumulating its totals into this directory
    pub fn add_child(&mut self, child: Node) {
        self.size += child.size();
        self.usage += child.usage();
        self.item_count += child.item_count();
        self.children.push(child);
    }
}

/// Placeholder for the parent slot of the top-level node.
///
/// Carries only the parent path; it is not a real directory and has no
/// metadata of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentSentinel {
    pub path: PathBuf,
}

/// A node in the analyzed tree
#[derive(Debug, PartialEq)]
pub enum Node {
    File(FileNode),
    Dir(DirNode),
    Parent(ParentSentinel),
}

impl Node {
    /// Entry name. `None` for the parent sentinel, which has no name.
    pub fn name(&self) -> Option<&str> {
        match self {
            Node::File(f) => Some(&f.name),
            Node::Dir(d) => Some(&d.name),
            Node::Parent(_) => None,
        }
    }

    /// Apparent size (aggregate for directories, 0 for the sentinel)
    pub fn size(&self) -> u64 {
        match self {
            Node::File(f) => f.size,
            Node::Dir(d) => d.size,
            Node::Parent(_) => 0,
        }
    }

    /// Allocated size (aggregate for directories, 0 for the sentinel)
    pub fn usage(&self) -> u64 {
        match self {
            Node::File(f) => f.usage,
            Node::Dir(d) => d.usage,
            Node::Parent(_) => 0,
        }
    }

    /// Modification time, if this node carries one
    pub fn mtime(&self) -> Option<SystemTime> {
        match self {
            Node::File(f) => Some(f.mtime),
            Node::Dir(d) => Some(d.mtime),
            Node::Parent(_) => None,
        }
    }

    /// Status flag, if this node carries one
    pub fn flag(&self) -> Option<EntryFlag> {
        match self {
            Node::File(f) => Some(f.flag),
            Node::Dir(d) => Some(d.flag),
            Node::Parent(_) => None,
        }
    }

    /// Number of items this node contributes to its parent's total
    pub fn item_count(&self) -> u64 {
        match self {
            Node::File(_) => 1,
            Node::Dir(d) => d.item_count,
            Node::Parent(_) => 0,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Dir(_))
    }

    pub fn is_parent_sentinel(&self) -> bool {
        matches!(self, Node::Parent(_))
    }

    pub fn as_dir(&self) -> Option<&DirNode> {
        match self {
            Node::Dir(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            Node::File(f) => Some(f),
            _ => None,
        }
    }
}

/// Basename of a path; the path itself when it has no file name (e.g. `/`)
pub(crate) fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Parent directory of a path; the path itself at the filesystem root
pub(crate) fn parent_of(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.to_path_buf())
}
