use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("model file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// Where the face model comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelSource {
    /// A model file on disk; never downloaded.
    File(PathBuf),
    /// A named model looked up in the cache, then a bundled directory, then
    /// fetched from `url` into the cache.
    Remote {
        name: String,
        url: String,
        bundled_dir: Option<PathBuf>,
    },
}

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 if the server didn't provide Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Resolves a model source to a local file, downloading when needed.
pub fn resolve(
    source: &ModelSource,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    match source {
        ModelSource::File(path) => {
            if path.is_file() {
                Ok(path.clone())
            } else {
                Err(ModelResolveError::NotFound(path.clone()))
            }
        }
        ModelSource::Remote {
            name,
            url,
            bundled_dir,
        } => resolve_in(
            &model_cache_dir()?,
            name,
            url,
            bundled_dir.as_deref(),
            progress,
        ),
    }
}

/// Resolution order inside `cache_dir`: cached copy, bundled copy, download.
pub fn resolve_in(
    cache_dir: &Path,
    name: &str,
    url: &str,
    bundled_dir: Option<&Path>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    let cached_path = cache_dir.join(name);
    if cached_path.exists() {
        log::debug!("Using cached model {}", cached_path.display());
        return Ok(cached_path);
    }

    if let Some(dir) = bundled_dir {
        let bundled_path = dir.join(name);
        if bundled_path.exists() {
            log::debug!("Using bundled model {}", bundled_path.display());
            return Ok(bundled_path);
        }
    }

    fs::create_dir_all(cache_dir).map_err(ModelResolveError::CacheDir)?;
    log::info!("Downloading model {name} from {url}");
    download(url, &cached_path, progress)?;
    Ok(cached_path)
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/facewatch/models/`
/// - Linux: `$XDG_CACHE_HOME/facewatch/models/` or `~/.cache/facewatch/models/`
/// - Windows: `%LOCALAPPDATA%/facewatch/models/`
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir()
            .map(|d| d.join("facewatch").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::cache_dir()
            .map(|d| d.join("facewatch").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
}

fn download(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let temp_path = dest.with_extension("part");

    let result = download_to(url, dest, &temp_path, progress);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn download_to(
    url: &str,
    dest: &Path,
    temp_path: &Path,
    progress: Option<ProgressFn>,
) -> Result<(), ModelResolveError> {
    let write_err = |source: std::io::Error| ModelResolveError::Write {
        path: temp_path.to_path_buf(),
        source,
    };

    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| ModelResolveError::Download {
            url: url.to_string(),
            source: e,
        })?;

    let total = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;
    let mut file = fs::File::create(temp_path).map_err(write_err)?;

    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = response.read(&mut buf).map_err(write_err)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_err)?;
        downloaded += n as u64;
        if let Some(ref cb) = progress {
            cb(downloaded, total);
        }
    }

    file.flush().map_err(write_err)?;
    drop(file);

    fs::rename(temp_path, dest).map_err(|e| ModelResolveError::Write {
        path: dest.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BAD_URL: &str = "http://invalid.nonexistent.example.com/model.onnx";

    #[test]
    fn test_file_source_existing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("face.onnx");
        fs::write(&path, b"model").unwrap();

        let resolved = resolve(&ModelSource::File(path.clone()), None).unwrap();
        assert_eq!(resolved, path);
    }

    #[test]
    fn test_file_source_missing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("missing.onnx");
        let err = resolve(&ModelSource::File(path), None).unwrap_err();
        assert!(matches!(err, ModelResolveError::NotFound(_)));
    }

    #[test]
    fn test_resolve_in_prefers_cache() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("cache");
        let bundled = tmp.path().join("bundled");
        fs::create_dir_all(&cache).unwrap();
        fs::create_dir_all(&bundled).unwrap();
        fs::write(cache.join("face.onnx"), b"cached").unwrap();
        fs::write(bundled.join("face.onnx"), b"bundled").unwrap();

        let path = resolve_in(&cache, "face.onnx", BAD_URL, Some(&bundled), None).unwrap();
        assert_eq!(path, cache.join("face.onnx"));
    }

    #[test]
    fn test_resolve_in_falls_back_to_bundled() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("cache");
        let bundled = tmp.path().join("bundled");
        fs::create_dir_all(&bundled).unwrap();
        fs::write(bundled.join("face.onnx"), b"bundled").unwrap();

        let path = resolve_in(&cache, "face.onnx", BAD_URL, Some(&bundled), None).unwrap();
        assert_eq!(path, bundled.join("face.onnx"));
    }

    #[test]
    fn test_model_cache_dir_returns_path() {
        let path = model_cache_dir().unwrap();
        assert!(path.to_string_lossy().contains("facewatch"));
        assert!(path.ends_with("models"));
    }

    #[test]
    fn test_download_failure_leaves_no_files() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("model.onnx");
        let result = download(BAD_URL, &dest, None);
        assert!(result.is_err());
        assert!(!dest.exists());
        assert!(!dest.with_extension("part").exists());
    }
}
