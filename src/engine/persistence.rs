use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::NamedTempFile;

use crate::engine::StoreImage;
use crate::{Error, Result};

/// Handles disk I/O for the [`Store`](crate::Store).
///
/// The whole [`StoreImage`] lives in a single JSON file. Saves write a
/// temporary file next to it and rename it into place, so readers never
/// see a half-written image.
pub struct Persistence {
    path: PathBuf,
}

impl Persistence {
    /// Initializes a `Persistence` handler for the file at `path`.
    ///
    /// The parent directory is created if missing; the file itself is
    /// created on first [`load`](Self::load).
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes `image` and atomically replaces the backing file.
    pub fn save(&self, image: &StoreImage) -> Result<()> {
        let bytes = serde_json::to_vec(image)?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        debug!("Flushed {} tables to {:?}", image.tables.len(), self.path);
        Ok(())
    }

    /// Reads the backing file without any recovery.
    ///
    /// A missing file reads as an empty image. An empty or unparsable file
    /// yields [`Error::Corrupted`].
    pub fn read(&self) -> Result<StoreImage> {
        let content = match fs::read(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StoreImage::new()),
            Err(e) => return Err(e.into()),
        };

        if content.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::Corrupted("backing file is empty".to_string()));
        }

        serde_json::from_slice(&content).map_err(|e| Error::Corrupted(e.to_string()))
    }

    /// Loads the image, healing the backing file when needed.
    ///
    /// A missing file is created with an empty image. A corrupted one is
    /// logged and immediately overwritten with an empty image. Only real
    /// I/O failures are returned.
    pub fn load(&self) -> Result<StoreImage> {
        if !self.path.exists() {
            let image = StoreImage::new();
            self.save(&image)?;
            return Ok(image);
        }

        match self.read() {
            Ok(image) => Ok(image),
            Err(Error::Corrupted(reason)) => {
                warn!("Could not parse store image from {:?}: {}. Resetting to an empty image.", self.path, reason);
                let image = StoreImage::new();
                self.save(&image)?;
                Ok(image)
            }
            Err(e) => Err(e),
        }
    }
}
