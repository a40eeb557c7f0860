//! Filesystem collaborators used by the command handlers.
//!
//! Names supplied by clients are plain file names inside the data root;
//! anything that could escape it is rejected with `InvalidInput`.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Produces a directory listing.
pub trait DirectoryLister: Send + Sync {
    /// Newline-joined entry names of `root`.
    fn list(&self, root: &Path) -> io::Result<String>;
}

/// Opens files for transfer.
pub trait FileStore: Send + Sync {
    /// Open an existing regular file for reading.
    fn open_for_read(&self, name: &str) -> io::Result<File>;

    /// Create or truncate a file for writing.
    fn open_for_write(&self, name: &str) -> io::Result<File>;
}

/// Lists a directory by reading its entries, sorted by name.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsLister;

impl DirectoryLister for FsLister {
    fn list(&self, root: &Path) -> io::Result<String> {
        let mut names = fs::read_dir(root)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names.join("\n"))
    }
}

/// File store rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a client-supplied name to a path inside the root.
    pub fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

impl FileStore for FsStore {
    fn open_for_read(&self, name: &str) -> io::Result<File> {
        let path = self.resolve(name)?;
        let file = File::open(&path)?;
        if !file.metadata()?.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(file)
    }

    fn open_for_write(&self, name: &str) -> io::Result<File> {
        let path = self.resolve(name)?;
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
    }
}

fn validate_name(name: &str) -> io::Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid file name: {name:?}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TempDir;

    #[test]
    fn test_list_sorted() {
        let dir = TempDir::new("store-list");
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("a.bin"), b"a").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let listing = FsLister.list(dir.path()).unwrap();
        assert_eq!(listing, "a.bin\nb.txt\nsub");
    }

    #[test]
    fn test_list_empty_dir() {
        let dir = TempDir::new("store-empty");
        assert_eq!(FsLister.list(dir.path()).unwrap(), "");
    }

    #[test]
    fn test_rejects_escaping_names() {
        let store = FsStore::new("/srv/data");
        for name in ["", ".", "..", "../etc/passwd", "a/b", "a\\b"] {
            let err = store.resolve(name).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{name:?}");
        }
        assert_eq!(
            store.resolve("report.bin").unwrap(),
            PathBuf::from("/srv/data/report.bin")
        );
    }

    #[test]
    fn test_open_for_read_missing_and_directory() {
        let dir = TempDir::new("store-read");
        fs::create_dir(dir.path().join("sub")).unwrap();
        let store = FsStore::new(dir.path());

        let err = store.open_for_read("missing.bin").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        let err = store.open_for_read("sub").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_open_for_write_truncates() {
        let dir = TempDir::new("store-write");
        fs::write(dir.path().join("out.bin"), b"old contents").unwrap();
        let store = FsStore::new(dir.path());

        let file = store.open_for_write("out.bin").unwrap();
        assert_eq!(file.metadata().unwrap().len(), 0);
    }
}
