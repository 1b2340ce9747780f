//! File-backed journal.

use super::backend::JournalBackend;
use crate::error::{CoreError, CoreResult};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A journal stored in a single file.
///
/// - `sync()` calls `File::sync_all()`
/// - `replace()` writes a sibling temporary file, syncs it and renames it
///   over the journal, so a crash leaves either the old or the new content
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    file: File,
    size: u64,
}

impl FileJournal {
    /// Opens or creates the journal at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    /// Returns the journal path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".compact");
        self.path.with_file_name(name)
    }
}

impl JournalBackend for FileJournal {
    fn read_all(&self) -> CoreResult<Vec<u8>> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::with_capacity(usize::try_from(self.size).unwrap_or(0));
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> CoreResult<()> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(data)?;
        self.size += data.len() as u64;
        Ok(())
    }

    fn sync(&mut self) -> CoreResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> CoreResult<()> {
        if len > self.size {
            return Err(CoreError::journal_corruption(format!(
                "cannot truncate {} bytes to {len}",
                self.size
            )));
        }
        self.file.set_len(len)?;
        self.file.sync_all()?;
        self.size = len;
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> CoreResult<()> {
        let temp = self.temp_path();
        {
            let mut out = File::create(&temp)?;
            out.write_all(data)?;
            out.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.size = data.len() as u64;
        Ok(())
    }

    fn size(&self) -> CoreResult<u64> {
        Ok(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.journal");

        let mut journal = FileJournal::open(&path).unwrap();
        journal.append(b"hello").unwrap();
        journal.append(b" world").unwrap();
        journal.sync().unwrap();
        drop(journal);

        let journal = FileJournal::open(&path).unwrap();
        assert_eq!(journal.size().unwrap(), 11);
        assert_eq!(journal.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn replace_swaps_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.journal");

        let mut journal = FileJournal::open(&path).unwrap();
        journal.append(b"old old old").unwrap();
        journal.replace(b"new").unwrap();
        journal.append(b"!").unwrap();

        assert_eq!(journal.read_all().unwrap(), b"new!");
        assert!(!dir.path().join("store.journal.compact").exists());
    }

    #[test]
    fn truncate_cuts_tail() {
        let dir = tempdir().unwrap();
        let mut journal = FileJournal::open(dir.path().join("j")).unwrap();
        journal.append(b"abcdef").unwrap();
        journal.truncate(2).unwrap();
        assert_eq!(journal.read_all().unwrap(), b"ab");
        assert!(journal.truncate(10).is_err());
    }
}
