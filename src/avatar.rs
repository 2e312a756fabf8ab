//! Avatar files on local disk, served back under `/avatars/`.

use std::path::PathBuf;

use crate::error::{CotaskError, CotaskResult};
use crate::storage::StorageError;

pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;
pub const PUBLIC_PREFIX: &str = "/avatars/";

/// Raster formats only. SVG can carry script and is never stored.
const EXTENSIONS: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
];

fn io_error(e: std::io::Error) -> CotaskError {
    CotaskError::from(StorageError::from(e))
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    EXTENSIONS
        .iter()
        .find(|(mime, _)| *mime == content_type)
        .map(|(_, ext)| *ext)
}

fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    EXTENSIONS
        .iter()
        .find(|(_, e)| *e == ext)
        .map(|(mime, _)| *mime)
        .unwrap_or("application/octet-stream")
}

fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub struct AvatarStore {
    dir: PathBuf,
}

impl AvatarStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store an image under `key`, replacing any previous one, and return its
    /// public URL. Size and type are checked before anything is written.
    pub fn upload(&self, key: &str, content_type: &str, bytes: &[u8]) -> CotaskResult<String> {
        if !valid_key(key) {
            return Err(CotaskError::validation("invalid avatar key"));
        }
        let content_type = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if !content_type.starts_with("image/") {
            return Err(CotaskError::validation("avatar must be an image"));
        }
        let Some(ext) = extension_for(&content_type) else {
            return Err(CotaskError::validation(format!(
                "unsupported avatar type {content_type}"
            )));
        };
        if bytes.is_empty() {
            return Err(CotaskError::validation("avatar file is empty"));
        }
        if bytes.len() > MAX_AVATAR_BYTES {
            return Err(CotaskError::validation(format!(
                "avatar exceeds maximum size of {MAX_AVATAR_BYTES} bytes"
            )));
        }

        std::fs::create_dir_all(&self.dir).map_err(io_error)?;
        self.remove(key)?;
        let file_name = format!("{key}.{ext}");
        std::fs::write(self.dir.join(&file_name), bytes).map_err(io_error)?;
        Ok(format!("{PUBLIC_PREFIX}{file_name}"))
    }

    /// Delete every stored file for `key`. Returns whether anything existed.
    pub fn remove(&self, key: &str) -> CotaskResult<bool> {
        if !valid_key(key) {
            return Ok(false);
        }
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(io_error(e)),
        };
        let mut removed = false;
        for entry in entries {
            let entry = entry.map_err(io_error)?;
            let name = entry.file_name();
            let matches = name
                .to_str()
                .and_then(|n| n.rsplit_once('.'))
                .map(|(stem, _)| stem == key)
                .unwrap_or(false);
            if matches {
                std::fs::remove_file(entry.path()).map_err(io_error)?;
                removed = true;
            }
        }
        Ok(removed)
    }

    /// Contents and MIME type of a stored file, by its public file name.
    pub fn read(&self, file_name: &str) -> CotaskResult<Option<(Vec<u8>, &'static str)>> {
        let stem_ok = file_name
            .rsplit_once('.')
            .map(|(stem, _)| valid_key(stem))
            .unwrap_or(false);
        if !stem_ok || file_name.contains('/') || file_name.contains("..") {
            return Ok(None);
        }
        match std::fs::read(self.dir.join(file_name)) {
            Ok(bytes) => Ok(Some((bytes, content_type_for(file_name)))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }
}
