//! MD5 verification of downloaded or supplied data files, plus the `.md5`
//! sidecar that remembers the expected checksum between runs.

use md5::{Digest, Md5};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    Mismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("could not checksum {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

pub fn sidecar_path(data: &Path) -> PathBuf {
    let mut name = data.as_os_str().to_owned();
    name.push(".md5");
    PathBuf::from(name)
}

/// Lowercase hex MD5 of the file's contents.
pub fn md5_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn verify(path: &Path, expected: &str) -> Result<(), IntegrityError> {
    let actual = md5_file(path).map_err(|source| IntegrityError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(IntegrityError::Mismatch {
            path: path.to_path_buf(),
            expected: expected.trim().to_string(),
            actual,
        });
    }
    log::info!("{} matches checksum {}", path.display(), actual);
    Ok(())
}

pub fn write_sidecar(data: &Path, checksum: &str) -> io::Result<PathBuf> {
    let path = sidecar_path(data);
    fs::write(&path, format!("{}\n", checksum.trim()))?;
    Ok(path)
}

/// `None` when no sidecar exists or it is empty.
pub fn read_sidecar(data: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(sidecar_path(data)) {
        Ok(text) => {
            let text = text.trim();
            Ok((!text.is_empty()).then(|| text.to_string()))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Removes a data file that failed verification along with its sidecar.
pub fn discard(data: &Path) {
    for path in [data.to_path_buf(), sidecar_path(data)] {
        match fs::remove_file(&path) {
            Ok(()) => log::warn!("removed {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => log::error!("could not remove {}: {}", path.display(), err),
        }
    }
}

/// `verify`, deleting the file and its sidecar when the contents don't match.
pub fn verify_or_discard(path: &Path, expected: &str) -> Result<(), IntegrityError> {
    let result = verify(path, expected);
    if let Err(IntegrityError::Mismatch { .. }) = result {
        discard(path);
    }
    result
}
