//! Fetching missing model weights into the local model directory

use super::error::BackendError;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

const DOWNLOAD_TIMEOUT_SECS: u64 = 3600;
const MAX_MODEL_SIZE: u64 = 2_000_000_000;
/// Anything smaller is an error page, not an ONNX graph
const MIN_MODEL_SIZE: usize = 1024;

/// Turn a Google Drive share link (`/file/d/<id>/view`) into a direct
/// download URL. Other URLs are returned unchanged.
pub fn direct_download_url(url: &str) -> String {
    let Some(rest) = url.split("drive.google.com/file/d/").nth(1) else {
        return url.to_string();
    };
    let id = rest.split(['/', '?']).next().unwrap_or_default();
    if id.is_empty() {
        return url.to_string();
    }
    format!("https://drive.usercontent.google.com/download?id={id}&export=download&confirm=t")
}

/// Download `url` to `dest`, creating the parent directory.
///
/// The body goes to a `.part` file first and is renamed into place once
/// complete, so an interrupted download never leaves a truncated model behind.
pub fn fetch_model(name: &str, url: &str, dest: &Path) -> Result<(), BackendError> {
    let failed = |reason: String| BackendError::Download {
        name: name.to_string(),
        url: url.to_string(),
        reason,
    };

    if !url.starts_with("https://") {
        return Err(failed("only HTTPS URLs are allowed for model downloads".to_string()));
    }

    if let Some(dir) = dest.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| failed(format!("cannot create {}: {e}", dir.display())))?;
            tracing::info!("Created model directory: {}", dir.display());
        }
    }

    let direct = direct_download_url(url);
    tracing::info!("Downloading model {} from {}", name, direct);

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .build()?;
    let response = client.get(&direct).send()?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }
    if let Some(length) = response.content_length() {
        if length > MAX_MODEL_SIZE {
            return Err(failed(format!("model too large: {length} bytes (max {MAX_MODEL_SIZE})")));
        }
    }
    let is_html = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"));
    if is_html {
        return Err(failed("server returned an HTML page instead of the model".to_string()));
    }

    let bytes = response.bytes()?;
    if bytes.len() < MIN_MODEL_SIZE {
        return Err(failed(format!("downloaded file too small ({} bytes)", bytes.len())));
    }

    let partial = dest.with_extension("part");
    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&partial)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&partial, dest)
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&partial);
        return Err(failed(format!("cannot write {}: {e}", dest.display())));
    }

    tracing::info!("Model {} saved to {} ({} bytes)", name, dest.display(), bytes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_share_link_becomes_direct_url() {
        assert_eq!(
            direct_download_url(
                "https://drive.google.com/file/d/1cxFVincc2-Yi1WACbC46l9vF4rJoilq5/view?usp=drive_link"
            ),
            "https://drive.usercontent.google.com/download?id=1cxFVincc2-Yi1WACbC46l9vF4rJoilq5&export=download&confirm=t"
        );
        assert_eq!(
            direct_download_url("https://example.com/models/encoder.onnx"),
            "https://example.com/models/encoder.onnx"
        );
        assert_eq!(
            direct_download_url("https://drive.google.com/file/d/"),
            "https://drive.google.com/file/d/"
        );
    }

    #[test]
    fn test_plain_http_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("models").join("m.onnx");

        match fetch_model("m.onnx", "http://example.com/m.onnx", &dest) {
            Err(BackendError::Download { name, reason, .. }) => {
                assert_eq!(name, "m.onnx");
                assert!(reason.contains("HTTPS"));
            }
            other => panic!("Expected Download error, got {other:?}"),
        }
        assert!(!dest.exists());
    }

    #[test]
    fn test_unreachable_host_is_a_network_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("models").join("m.onnx");

        let result = fetch_model("m.onnx", "https://127.0.0.1:9/m.onnx", &dest);
        assert!(matches!(result, Err(BackendError::Network(_))), "{result:?}");
        assert!(tmp.path().join("models").is_dir());
        assert!(!dest.exists());
    }
}
