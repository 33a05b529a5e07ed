use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use actix_multipart::Multipart;
use futures_util::TryStreamExt as _;
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UploadKind {
    /// Doctor's notes and letters backing a leave or absence
    Attachment,
    ScheduleImage,
}

impl UploadKind {
    fn subdir(self) -> &'static str {
        match self {
            UploadKind::Attachment => "attachments",
            UploadKind::ScheduleImage => "schedules",
        }
    }

    fn allowed_extensions(self) -> &'static [&'static str] {
        match self {
            UploadKind::Attachment => &["jpg", "jpeg", "png", "pdf"],
            UploadKind::ScheduleImage => &["jpg", "jpeg", "png", "webp"],
        }
    }
}

/// Lower-cased extension of `filename` if `kind` accepts it.
pub fn checked_extension(filename: &str, kind: UploadKind) -> ApiResult<String> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    if kind.allowed_extensions().contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(ApiError::validation(format!(
            "File type not allowed, expected one of: {}",
            kind.allowed_extensions().join(", ")
        )))
    }
}

fn io_error(e: std::io::Error) -> ApiError {
    tracing::error!(error = %e, "Upload I/O failed");
    ApiError::Internal
}

/// Streams the multipart field named `field_name` to disk and returns its path
/// relative to the upload directory (served under `/uploads`).
pub async fn save_upload(
    mut payload: Multipart,
    field_name: &str,
    kind: UploadKind,
    config: &Config,
) -> ApiResult<String> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to parse multipart: {e}")))?
    {
        let content_disposition = field.content_disposition();
        let name = content_disposition.and_then(|cd| cd.get_name()).unwrap_or("");
        if name != field_name {
            // drain fields we don't care about
            while field
                .try_next()
                .await
                .map_err(|e| ApiError::BadRequest(format!("File read error: {e}")))?
                .is_some()
            {}
            continue;
        }

        let original = content_disposition
            .and_then(|cd| cd.get_filename())
            .unwrap_or("")
            .to_string();
        let ext = checked_extension(&original, kind)?;

        let dir = PathBuf::from(&config.upload_dir).join(kind.subdir());
        fs::create_dir_all(&dir).await.map_err(io_error)?;

        let filename = format!("{}.{}", Uuid::new_v4(), ext);
        let filepath = dir.join(&filename);
        let mut file = fs::File::create(&filepath).await.map_err(io_error)?;

        let mut written = 0usize;
        let result: ApiResult<()> = async {
            while let Some(chunk) = field
                .try_next()
                .await
                .map_err(|e| ApiError::BadRequest(format!("File read error: {e}")))?
            {
                written += chunk.len();
                if written > config.max_upload_bytes {
                    return Err(ApiError::validation(format!(
                        "File exceeds {} bytes",
                        config.max_upload_bytes
                    )));
                }
                file.write_all(&chunk).await.map_err(io_error)?;
            }
            file.flush().await.map_err(io_error)
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&filepath).await;
            return Err(e);
        }

        tracing::info!(file = %filename, bytes = written, "Upload stored");
        return Ok(format!("{}/{}", kind.subdir(), filename));
    }

    Err(ApiError::validation(format!("Missing file field '{field_name}'")))
}

/// Best-effort removal of a previously stored upload.
pub async fn remove_upload(config: &Config, relative: &str) {
    // stored paths never contain parent components, but don't trust the DB blindly
    if relative.contains("..") {
        return;
    }
    let path = PathBuf::from(&config.upload_dir).join(relative);
    if let Err(e) = fs::remove_file(&path).await {
        tracing::warn!(error = %e, path = %path.display(), "Failed to remove old upload");
    }
}

/// Removes a freshly stored upload when recording it failed, so no file is
/// left without a row pointing at it.
pub async fn discard_on_error<T, E>(
    config: &Config,
    stored: &str,
    result: Result<T, E>,
) -> Result<T, E> {
    if result.is_err() {
        remove_upload(config, stored).await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_checked_per_kind() {
        assert_eq!(
            checked_extension("Surat Dokter.PDF", UploadKind::Attachment).unwrap(),
            "pdf"
        );
        assert!(checked_extension("jadwal.pdf", UploadKind::ScheduleImage).is_err());
        assert!(checked_extension("jadwal.webp", UploadKind::ScheduleImage).is_ok());
        assert!(checked_extension("noext", UploadKind::Attachment).is_err());
        assert!(checked_extension("shell.php", UploadKind::Attachment).is_err());
    }

    fn scratch_config() -> Config {
        let mut config = crate::config::tests::test_config();
        config.upload_dir = std::env::temp_dir()
            .join(format!("absensi-uploads-{}", Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        config
    }

    async fn stored_file(config: &Config) -> String {
        let dir = PathBuf::from(&config.upload_dir).join("attachments");
        fs::create_dir_all(&dir).await.unwrap();
        fs::write(dir.join("note.pdf"), b"%PDF").await.unwrap();
        "attachments/note.pdf".to_string()
    }

    #[actix_web::test]
    async fn failed_save_removes_the_new_file() {
        let config = scratch_config();
        let stored = stored_file(&config).await;

        let result: Result<(), &str> = discard_on_error(&config, &stored, Err("update failed")).await;
        assert!(result.is_err());
        assert!(!PathBuf::from(&config.upload_dir).join(&stored).exists());

        let _ = fs::remove_dir_all(&config.upload_dir).await;
    }

    #[actix_web::test]
    async fn successful_save_keeps_the_file() {
        let config = scratch_config();
        let stored = stored_file(&config).await;

        let result: Result<u64, &str> = discard_on_error(&config, &stored, Ok(1)).await;
        assert_eq!(result, Ok(1));
        assert!(PathBuf::from(&config.upload_dir).join(&stored).exists());

        let _ = fs::remove_dir_all(&config.upload_dir).await;
    }
}
