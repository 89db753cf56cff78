//! Access to note text, by vault-relative path.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use walkdir::WalkDir;

/// The host's note corpus: read/write note text by path, enumerate notes.
pub trait NoteVault {
    fn read_note(&self, path: &str) -> io::Result<String>;
    fn write_note(&mut self, path: &str, content: &str) -> io::Result<()>;
    /// Vault-relative paths of every note, sorted.
    fn list_notes(&self) -> io::Result<Vec<String>>;
}

/// Filesystem vault rooted at a directory; notes are `.md` files.
pub struct FsNoteVault {
    root: PathBuf,
}

impl FsNoteVault {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl NoteVault for FsNoteVault {
    fn read_note(&self, path: &str) -> io::Result<String> {
        fs::read_to_string(self.root.join(path))
    }

    fn write_note(&mut self, path: &str, content: &str) -> io::Result<()> {
        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(full, content)
    }

    fn list_notes(&self) -> io::Result<Vec<String>> {
        let mut notes = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().map_or(false, |e| e == "md") {
                let rel = entry
                    .path()
                    .strip_prefix(&self.root)
                    .unwrap_or(entry.path());
                notes.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        notes.sort();
        Ok(notes)
    }
}

/// In-memory vault for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryVault {
    notes: BTreeMap<String, String>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, content: &str) {
        self.notes.insert(path.to_string(), content.to_string());
    }

    pub fn remove(&mut self, path: &str) {
        self.notes.remove(path);
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.notes.get(path).map(String::as_str)
    }
}

impl NoteVault for MemoryVault {
    fn read_note(&self, path: &str) -> io::Result<String> {
        self.notes
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }

    fn write_note(&mut self, path: &str, content: &str) -> io::Result<()> {
        self.notes.insert(path.to_string(), content.to_string());
        Ok(())
    }

    fn list_notes(&self) -> io::Result<Vec<String>> {
        Ok(self.notes.keys().cloned().collect())
    }
}
