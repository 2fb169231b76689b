//! Input resolution: turn a CLI argument (local path, `file://` URI or
//! http(s) URL) into a filename plus the document bytes.
//!
//! Everything downstream works on in-memory bytes, so a download never
//! touches the disk.

use crate::error::ConvertError;
use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// A document loaded from wherever the caller pointed.
#[derive(Debug, Clone)]
pub struct LoadedInput {
    /// Name used for format detection and output naming.
    pub filename: String,
    pub bytes: Bytes,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load `input`, downloading it when it is a URL.
pub async fn load_input(input: &str, download_timeout: Duration) -> Result<LoadedInput, ConvertError> {
    if is_url(input) {
        download_url(input, download_timeout).await
    } else {
        let path = input.strip_prefix("file://").unwrap_or(input);
        load_local(PathBuf::from(path)).await
    }
}

async fn load_local(path: PathBuf) -> Result<LoadedInput, ConvertError> {
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ConvertError::PermissionDenied { path });
        }
        Err(_) => return Err(ConvertError::FileNotFound { path }),
    };
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    debug!("Loaded {} ({} bytes)", path.display(), bytes.len());
    Ok(LoadedInput {
        filename,
        bytes: Bytes::from(bytes),
    })
}

async fn download_url(url: &str, timeout: Duration) -> Result<LoadedInput, ConvertError> {
    info!("Downloading document from: {}", url);
    let failed = |reason: String| ConvertError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {}s", timeout.as_secs()))
        } else {
            failed(e.to_string())
        }
    })?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let filename = filename_from_url(url);
    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    info!("Downloaded {} ({} bytes)", filename, bytes.len());
    Ok(LoadedInput { filename, bytes })
}

/// Last path segment of `url` when it carries an extension.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("file:///tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_comes_from_the_last_segment() {
        assert_eq!(filename_from_url("https://h/a/b/report.docx?x=1"), "report.docx");
        assert_eq!(filename_from_url("https://h/a/b/"), "downloaded.pdf");
        assert_eq!(filename_from_url("https://h/download"), "downloaded.pdf");
    }

    #[tokio::test]
    async fn local_and_file_uri_inputs_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.xlsx");
        std::fs::write(&path, b"PK\x03\x04data").unwrap();

        let plain = load_input(path.to_str().unwrap(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(plain.filename, "sheet.xlsx");
        assert_eq!(plain.bytes.len(), 8);

        let uri = format!("file://{}", path.display());
        let via_uri = load_input(&uri, Duration::from_secs(1)).await.unwrap();
        assert_eq!(via_uri.bytes, plain.bytes);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = load_input("/definitely/not/here.pdf", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::FileNotFound { .. }));
    }
}
