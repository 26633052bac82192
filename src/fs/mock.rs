// src/fs/mock.rs

use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File(Vec<u8>),
    Dir(Vec<String>), // List of child names
}

type Entries = HashMap<PathBuf, MockEntry>;

/// In-memory filesystem for tests. Clones share the same tree, so a test can
/// keep one handle and mutate files while an adapter reads through another.
#[derive(Debug, Clone)]
pub struct MockFileSystem {
    files: Arc<Mutex<Entries>>,
    /// When set, every `read_dir` fails. Simulates an unreachable resource.
    offline: Arc<Mutex<bool>>,
}

fn parent_of(path: &Path) -> Option<&Path> {
    path.parent().map(|p| {
        if p.as_os_str().is_empty() {
            Path::new(".")
        } else {
            p
        }
    })
}

fn child_name(path: &Path) -> Option<String> {
    path.file_name().and_then(|n| n.to_str()).map(str::to_string)
}

impl MockFileSystem {
    pub fn new() -> Self {
        let mut files = HashMap::new();
        files.insert(PathBuf::from("."), MockEntry::Dir(Vec::new()));

        Self {
            files: Arc::new(Mutex::new(files)),
            offline: Arc::new(Mutex::new(false)),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref().to_path_buf();
        let mut files = self.entries();
        files.insert(path.clone(), MockEntry::File(content.into()));
        link_into_parent(&mut files, &path);
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut files = self.entries();
        ensure_dir_entry(&mut files, path.as_ref());
    }

    /// Remove a file or an empty directory entry.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut files = self.entries();
        files.remove(path);
        if let (Some(parent), Some(name)) = (parent_of(path), child_name(path)) {
            if let Some(MockEntry::Dir(children)) = files.get_mut(parent) {
                children.retain(|c| c != &name);
            }
        }
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap_or_else(|p| p.into_inner()) = offline;
    }

    fn is_offline(&self) -> bool {
        *self.offline.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn link_into_parent(files: &mut Entries, path: &Path) {
    let Some(parent) = parent_of(path) else {
        return;
    };
    if parent == path {
        return;
    }
    ensure_dir_entry(files, parent);
    if let (Some(MockEntry::Dir(children)), Some(name)) = (files.get_mut(parent), child_name(path))
    {
        if !children.contains(&name) {
            children.push(name);
        }
    }
}

fn ensure_dir_entry(files: &mut Entries, path: &Path) {
    if files.contains_key(path) {
        return;
    }
    files.insert(path.to_path_buf(), MockEntry::Dir(Vec::new()));
    link_into_parent(files, path);
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let files = self.entries();
        match files.get(path) {
            Some(MockEntry::File(content)) => {
                String::from_utf8(content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let files = self.entries();
        match files.get(path) {
            Some(MockEntry::File(content)) => Ok(Box::new(Cursor::new(content.clone()))),
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let entry = {
            let files = self.entries();
            files
                .get(from)
                .cloned()
                .ok_or_else(|| anyhow!("File not found: {:?}", from))?
        };
        self.remove(from);
        let mut files = self.entries();
        files.insert(to.to_path_buf(), entry);
        link_into_parent(&mut files, to);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.entries().contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(self.entries().get(path), Some(MockEntry::File(_)))
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.entries().get(path), Some(MockEntry::Dir(_)))
    }

    fn walk_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if self.is_offline() {
            return Err(anyhow!("resource offline: {:?}", root));
        }
        let files = self.entries();
        if !matches!(files.get(root), Some(MockEntry::Dir(_))) {
            return Err(anyhow!("Not a directory or not found: {:?}", root));
        }

        let mut found = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Some(MockEntry::Dir(children)) = files.get(&dir) else {
                continue;
            };
            for name in children {
                let path = dir.join(name);
                match files.get(&path) {
                    Some(MockEntry::Dir(_)) => stack.push(path),
                    Some(MockEntry::File(_)) => found.push(path),
                    None => {}
                }
            }
        }
        Ok(found)
    }
}
