use std::io::Read;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use uuid::Uuid;

use crate::error::FaceError;

/// A selfie stored in the upload directory.
///
/// The file is removed when the value is dropped, unless [`Upload::keep`]
/// hands ownership of the file to the caller.
#[derive(Debug)]
pub struct Upload {
    path: PathBuf,
    keep: bool,
}

impl Upload {
    /// Validate `source` and copy it into `upload_dir` under a unique name.
    pub fn accept(source: &Path, upload_dir: &Path, max_bytes: u64) -> Result<Self, FaceError> {
        let unreadable =
            |e: std::io::Error| FaceError::Validation(format!("cannot read {}: {}", source.display(), e));

        let len = std::fs::metadata(source).map_err(unreadable)?.len();
        if len > max_bytes {
            return Err(FaceError::Validation(format!(
                "image is {} bytes, limit is {} bytes",
                len, max_bytes
            )));
        }

        let mut data = Vec::with_capacity(len as usize);
        std::fs::File::open(source)
            .and_then(|f| f.take(max_bytes + 1).read_to_end(&mut data))
            .map_err(unreadable)?;
        if data.len() as u64 > max_bytes {
            return Err(FaceError::Validation(format!(
                "image exceeds {} bytes",
                max_bytes
            )));
        }

        match image::guess_format(&data) {
            Ok(ImageFormat::Jpeg) | Ok(ImageFormat::Png) => {}
            _ => {
                return Err(FaceError::Validation(
                    "only jpeg and png images are supported".to_string(),
                ))
            }
        }

        let original = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "selfie".to_string());
        let path = upload_dir.join(format!("{}-{}", Uuid::new_v4().simple(), original));

        std::fs::create_dir_all(upload_dir).map_err(|e| {
            FaceError::storage(anyhow::anyhow!(e).context(format!("creating {}", upload_dir.display())))
        })?;
        let upload = Self::write_new(path, |p| std::fs::write(p, &data))?;

        log::debug!("accepted upload {}", upload.path.display());
        Ok(upload)
    }

    /// Guard `path` before `write` runs so a partial file never outlives a failure.
    fn write_new(
        path: PathBuf,
        write: impl FnOnce(&Path) -> std::io::Result<()>,
    ) -> Result<Self, FaceError> {
        let upload = Self { path, keep: false };
        write(&upload.path).map_err(|e| {
            FaceError::storage(anyhow::anyhow!(e).context(format!("writing {}", upload.path.display())))
        })?;
        Ok(upload)
    }

    /// Take responsibility for a file that is already in place.
    pub fn from_path(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the file and return its path.
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for Upload {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("removed upload {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("failed to remove upload {}: {}", self.path.display(), e),
        }
    }
}
