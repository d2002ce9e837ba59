use crate::errors::RecorderError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, RecorderError>;
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), RecorderError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), RecorderError>;
    fn exists(&self, path: &Path) -> bool;

    /// Removes every file and sub-directory below `path`, keeping `path` itself.
    /// A missing directory is not an error.
    fn clean_dir(&self, path: &Path) -> Result<(), RecorderError>;

    fn ensure_dir(&self, path: &Path) -> Result<(), RecorderError> {
        if self.exists(path) {
            return Ok(());
        }
        self.create_dir_all(path)
    }
}

pub trait Terminal: Send + Sync {
    fn write_line(&self, line: &str) -> Result<(), RecorderError>;
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, RecorderError> {
        std::fs::read_to_string(path)
            .map_err(|e| RecorderError::Io(format!("{}: {e}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), RecorderError> {
        std::fs::write(path, contents)
            .map_err(|e| RecorderError::Io(format!("{}: {e}", path.display())))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), RecorderError> {
        std::fs::create_dir_all(path).map_err(|e| RecorderError::Io(e.to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn clean_dir(&self, path: &Path) -> Result<(), RecorderError> {
        if !path.is_dir() {
            return Ok(());
        }
        let entries = std::fs::read_dir(path).map_err(|e| RecorderError::Io(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| RecorderError::Io(e.to_string()))?;
            let child = entry.path();
            let result = if child.is_dir() {
                std::fs::remove_dir_all(&child)
            } else {
                std::fs::remove_file(&child)
            };
            result.map_err(|e| RecorderError::Io(format!("{}: {e}", child.display())))?;
        }
        Ok(())
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn write_line(&self, line: &str) -> Result<(), RecorderError> {
        use std::io::Write;
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| RecorderError::Io(e.to_string()))
    }
}

pub struct ProductionRuntime {
    pub file_system: Arc<dyn FileSystem>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            file_system: Arc::new(ProductionFileSystem),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    fail_next: Arc<Mutex<Option<RecorderError>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
        fs
    }

    pub fn set_fail_next(&self, error: RecorderError) {
        *self.fail_next.lock().expect("fail lock") = Some(error);
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .lock()
            .expect("files lock")
            .get(path.as_ref())
            .cloned()
    }

    pub fn created_dirs(&self) -> Vec<PathBuf> {
        self.dirs.lock().expect("dirs lock").clone()
    }

    fn maybe_fail(&self) -> Result<(), RecorderError> {
        if let Some(err) = self.fail_next.lock().expect("fail lock").take() {
            return Err(err);
        }
        Ok(())
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, RecorderError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| RecorderError::Io(format!("missing file {}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), RecorderError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), RecorderError> {
        self.maybe_fail()?;
        self.dirs
            .lock()
            .expect("dirs lock")
            .push(path.to_path_buf());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("files lock").contains_key(path)
            || self.dirs.lock().expect("dirs lock").iter().any(|d| d == path)
    }

    fn clean_dir(&self, path: &Path) -> Result<(), RecorderError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .retain(|file, _| !file.starts_with(path));
        self.dirs
            .lock()
            .expect("dirs lock")
            .retain(|dir| dir == path || !dir.starts_with(path));
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    writes: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }
}

impl Terminal for FakeTerminal {
    fn write_line(&self, line: &str) -> Result<(), RecorderError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push(line.to_string());
        Ok(())
    }
}
