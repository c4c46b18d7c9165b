//! Fetches pre-trained model files on first use.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use log::info;
use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::config::Config;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("could not retrieve {url}: {reason}")]
    Retrieval { url: String, reason: String },

    #[error("filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ProvisionError {
    fn retrieval(url: &str, reason: impl ToString) -> Self {
        Self::Retrieval {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    fn filesystem(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Make sure `path` holds the model served at `url`.
///
/// Existing files are left alone. Otherwise the body is fetched into a
/// temporary archive next to `path`, unpacked (bzip2 for `.bz2` URLs) into
/// a partial file and renamed into place.
pub async fn ensure_model(path: &Path, url: &str) -> Result<(), ProvisionError> {
    if path.exists() {
        log::debug!("model present at {}", path.display());
        return Ok(());
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(ProvisionError::filesystem(parent))?;
    }

    let archive = sibling(path, "download");
    info!("Downloading {} to {}", url, path.display());
    if let Err(err) = download(url, &archive).await {
        let _ = tokio::fs::remove_file(&archive).await;
        return Err(err);
    }

    let partial = sibling(path, "partial");
    let compressed = url.ends_with(".bz2");
    let (src, tmp) = (archive.clone(), partial.clone());
    let unpacked = tokio::task::spawn_blocking(move || unpack(&src, &tmp, compressed))
        .await
        .map_err(|e| ProvisionError::Filesystem {
            path: partial.clone(),
            source: io::Error::other(e),
        })
        .and_then(|res| res);

    let _ = tokio::fs::remove_file(&archive).await;
    if let Err(err) = unpacked {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(err);
    }

    tokio::fs::rename(&partial, path)
        .await
        .map_err(ProvisionError::filesystem(path))?;
    info!("Model ready at {}", path.display());
    Ok(())
}

/// Provision every model the detector needs.
pub async fn ensure_models(config: &Config) -> Result<(), ProvisionError> {
    ensure_model(&config.landmark_model_path(), &config.landmark_model.url).await?;
    ensure_model(&config.detector_model_path(), &config.detector_model.url).await
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

async fn download(url: &str, dest: &Path) -> Result<(), ProvisionError> {
    let client = Client::builder()
        .user_agent(concat!("facemark/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProvisionError::retrieval(url, e))?;

    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ProvisionError::retrieval(url, e))?;
    if !response.status().is_success() {
        return Err(ProvisionError::retrieval(
            url,
            format!("HTTP {}", response.status()),
        ));
    }

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(ProvisionError::filesystem(dest))?;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ProvisionError::retrieval(url, e))?
    {
        file.write_all(&chunk)
            .await
            .map_err(ProvisionError::filesystem(dest))?;
    }
    file.flush().await.map_err(ProvisionError::filesystem(dest))?;
    Ok(())
}

fn unpack(archive: &Path, dest: &Path, compressed: bool) -> Result<(), ProvisionError> {
    let input = BufReader::new(File::open(archive).map_err(ProvisionError::filesystem(archive))?);
    let mut output = BufWriter::new(File::create(dest).map_err(ProvisionError::filesystem(dest))?);

    let copied = if compressed {
        io::copy(&mut BzDecoder::new(input), &mut output)
    } else {
        let mut input = input;
        io::copy(&mut input, &mut output)
    };
    copied.map_err(ProvisionError::filesystem(dest))?;

    output
        .into_inner()
        .map_err(|e| ProvisionError::Filesystem {
            path: dest.to_path_buf(),
            source: e.into_error(),
        })?
        .sync_all()
        .map_err(ProvisionError::filesystem(dest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_appends_suffix() {
        let p = Path::new("/tmp/models/shape.dat");
        assert_eq!(sibling(p, "partial"), PathBuf::from("/tmp/models/shape.dat.partial"));
    }

    #[test]
    fn unpack_copies_plain_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in");
        let dst = dir.path().join("out");
        std::fs::write(&src, b"onnx bytes").unwrap();

        unpack(&src, &dst, false).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"onnx bytes");
    }

    #[test]
    fn unpack_rejects_corrupt_bz2() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.bz2");
        std::fs::write(&src, b"not bzip2 at all").unwrap();

        let err = unpack(&src, &dir.path().join("out"), true).unwrap_err();
        assert!(matches!(err, ProvisionError::Filesystem { .. }));
    }
}
