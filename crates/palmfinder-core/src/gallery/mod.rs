//! Gallery Persister
//!
//! Saves a processed result into the device media library:
//!
//! 1. LibraryWrite is requested through the permission gate. A denial aborts
//!    with no side effect.
//! 2. The bytes at the result's output locator are downloaded into a scratch
//!    file named from the current time and media kind.
//! 3. The scratch file is committed into the media library and removed.
//!
//! Remote locators (`http`/`https`) are streamed with a size cap and retried
//! on transient failures. Local paths and `file://` URLs, which the video
//! endpoint may return instead of a URL, are copied.

mod library;

pub use library::{DirectoryMediaLibrary, MediaLibrary};

use chrono::Utc;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::fs::{scratch_file_name, unique_path};
use crate::permission::{Capability, PermissionGate};
use crate::settings::AppSettings;
use crate::{CoreError, CoreResult, DetectionResult, MediaKind};

// =============================================================================
// Constants
// =============================================================================

/// Maximum download attempts for transient errors
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds)
const BASE_RETRY_DELAY_MS: u64 = 500;

/// Maximum allowed download size (500 MiB)
const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 500 * 1024 * 1024;

/// Default download timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 300;

// =============================================================================
// Types
// =============================================================================

/// A result committed to the media library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedMedia {
    /// Location of the committed file
    pub library_path: PathBuf,
    /// Size of the committed file
    pub bytes: u64,
}

/// Where the processed bytes live
#[derive(Debug, Clone, PartialEq, Eq)]
enum Locator {
    Remote(reqwest::Url),
    Local(PathBuf),
}

/// Classifies an output locator. Anything that does not parse as a URL is a
/// filesystem path.
fn classify_locator(locator: &str) -> CoreResult<Locator> {
    let trimmed = locator.trim();
    if trimmed.is_empty() {
        return Err(CoreError::StorageError(
            "Result has no output to save".to_string(),
        ));
    }

    let Ok(url) = reqwest::Url::parse(trimmed) else {
        return Ok(Locator::Local(PathBuf::from(trimmed)));
    };

    match url.scheme() {
        "http" | "https" => Ok(Locator::Remote(url)),
        "file" => url.to_file_path().map(Locator::Local).map_err(|_| {
            CoreError::StorageError(format!("Invalid file URL '{}'", trimmed))
        }),
        // Windows drive letters parse as one-letter schemes.
        scheme if scheme.len() == 1 => Ok(Locator::Local(PathBuf::from(trimmed))),
        scheme => Err(CoreError::StorageError(format!(
            "Unsupported output scheme '{}'. Only http/https and local files are allowed.",
            scheme
        ))),
    }
}

/// A failed download attempt, classified where it happened
#[derive(Debug)]
struct AttemptError {
    error: CoreError,
    retryable: bool,
}

impl AttemptError {
    fn fatal(error: CoreError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }

    fn retryable(error: CoreError) -> Self {
        Self {
            error,
            retryable: true,
        }
    }

    /// Timeouts and connection failures may clear up on the next attempt
    fn transport(action: &str, e: reqwest::Error) -> Self {
        let retryable = e.is_timeout() || e.is_connect() || e.is_body();
        let error = if e.is_timeout() {
            CoreError::StorageError(format!("Download timed out: {}", e))
        } else {
            CoreError::StorageError(format!("{}: {}", action, e))
        };
        Self { error, retryable }
    }
}

/// Statuses worth another download attempt
fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Folds every persistence failure into `StorageError`
fn into_storage_error(error: CoreError) -> CoreError {
    match error {
        CoreError::StorageError(_) | CoreError::PermissionDenied(_) => error,
        other => CoreError::StorageError(other.to_string()),
    }
}

// =============================================================================
// GalleryPersister
// =============================================================================

/// Downloads processed results and commits them to the media library
pub struct GalleryPersister {
    gate: Arc<dyn PermissionGate>,
    library: Arc<dyn MediaLibrary>,
    client: reqwest::Client,
    scratch_dir: PathBuf,
    max_download_bytes: u64,
    retry_base_delay: Duration,
}

impl std::fmt::Debug for GalleryPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GalleryPersister")
            .field("scratch_dir", &self.scratch_dir)
            .field("max_download_bytes", &self.max_download_bytes)
            .finish_non_exhaustive()
    }
}

impl GalleryPersister {
    /// Creates a persister writing scratch files into `scratch_dir`
    pub fn new(
        gate: Arc<dyn PermissionGate>,
        library: Arc<dyn MediaLibrary>,
        scratch_dir: impl Into<PathBuf>,
    ) -> CoreResult<Self> {
        Self::with_timeout(
            gate,
            library,
            scratch_dir,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }

    /// Creates a persister with an explicit download timeout
    pub fn with_timeout(
        gate: Arc<dyn PermissionGate>,
        library: Arc<dyn MediaLibrary>,
        scratch_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            gate,
            library,
            client,
            scratch_dir: scratch_dir.into(),
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            retry_base_delay: Duration::from_millis(BASE_RETRY_DELAY_MS),
        })
    }

    /// Creates a persister backed by the album directories from settings
    pub fn from_settings(
        gate: Arc<dyn PermissionGate>,
        settings: &AppSettings,
    ) -> CoreResult<Self> {
        let library = Arc::new(DirectoryMediaLibrary::from_settings(&settings.storage));
        Ok(Self::with_timeout(
            gate,
            library,
            settings.storage.scratch_dir_path(),
            Duration::from_secs(settings.service.timeout_sec),
        )?
        .with_max_download_bytes(settings.storage.max_download_bytes()))
    }

    /// Sets the download size cap
    pub fn with_max_download_bytes(mut self, limit: u64) -> Self {
        self.max_download_bytes = limit;
        self
    }

    /// Sets the base delay between download attempts
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Scratch directory for in-progress downloads
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Requests LibraryWrite. Fails with `PermissionDenied` when refused.
    pub async fn authorize(&self) -> CoreResult<()> {
        let status = self.gate.request(Capability::LibraryWrite).await;
        if status.is_granted() {
            Ok(())
        } else {
            Err(CoreError::PermissionDenied(
                Capability::LibraryWrite.to_string(),
            ))
        }
    }

    /// Downloads the result and commits it to the library.
    ///
    /// Assumes [`authorize`](Self::authorize) already succeeded. Every failure
    /// is reported as `StorageError`.
    pub async fn persist(
        &self,
        result: &DetectionResult,
        kind: MediaKind,
    ) -> CoreResult<SavedMedia> {
        let locator = classify_locator(&result.output_locator)?;

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| {
                CoreError::StorageError(format!(
                    "Failed to create scratch directory {}: {}",
                    self.scratch_dir.display(),
                    e
                ))
            })?;

        let scratch = unique_path(&self.scratch_dir, &scratch_file_name(kind, Utc::now()));
        debug!("Saving {} via scratch file {}", kind, scratch.display());

        let outcome = self.fetch_and_commit(&locator, &scratch, kind).await;

        if let Err(e) = tokio::fs::remove_file(&scratch).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove scratch file {}: {}", scratch.display(), e);
            }
        }

        outcome.map_err(into_storage_error)
    }

    /// Authorizes, downloads and commits in one call
    pub async fn save(&self, result: &DetectionResult, kind: MediaKind) -> CoreResult<SavedMedia> {
        self.authorize().await?;
        self.persist(result, kind).await
    }

    async fn fetch_and_commit(
        &self,
        locator: &Locator,
        scratch: &Path,
        kind: MediaKind,
    ) -> CoreResult<SavedMedia> {
        let bytes = match locator {
            Locator::Remote(url) => {
                self.execute_with_retry("download", || self.download_once(url, scratch))
                    .await?
            }
            Locator::Local(path) => self.copy_local(path, scratch).await?,
        };

        let library_path = self.library.commit(scratch, kind).await?;
        info!(
            "Saved {} to {} ({} bytes)",
            kind,
            library_path.display(),
            bytes
        );

        Ok(SavedMedia {
            library_path,
            bytes,
        })
    }

    /// Execute a download with retries and exponential backoff
    async fn execute_with_retry<F, Fut, T>(&self, operation: &str, f: F) -> CoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, AttemptError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(AttemptError { error: e, retryable }) => {
                    attempt += 1;
                    if !retryable || attempt >= MAX_RETRIES {
                        return Err(e);
                    }

                    let delay = self.retry_base_delay * 2u32.pow(attempt - 1);
                    warn!(
                        "Gallery {} attempt {} failed, retrying in {}ms: {}",
                        operation,
                        attempt,
                        delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Streams a remote result into `dest`, removing it on failure
    async fn download_once(&self, url: &reqwest::Url, dest: &Path) -> Result<u64, AttemptError> {
        let outcome = self.stream_to_file(url, dest).await;
        if outcome.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        outcome
    }

    async fn stream_to_file(&self, url: &reqwest::Url, dest: &Path) -> Result<u64, AttemptError> {
        debug!("Downloading {}", url);

        let mut resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AttemptError::transport("Download failed", e))?;

        let status = resp.status();
        if !status.is_success() {
            let error =
                CoreError::StorageError(format!("Download failed with status: {}", status));
            return Err(if is_transient_status(status) {
                AttemptError::retryable(error)
            } else {
                AttemptError::fatal(error)
            });
        }

        if let Some(content_len) = resp.content_length() {
            if content_len > self.max_download_bytes {
                return Err(AttemptError::fatal(CoreError::StorageError(format!(
                    "Result is too large ({} bytes > {} bytes limit)",
                    content_len, self.max_download_bytes
                ))));
            }
        }

        let mut file = tokio::fs::File::create(dest).await.map_err(|e| {
            AttemptError::fatal(CoreError::StorageError(format!(
                "Failed to create scratch file: {}",
                e
            )))
        })?;

        let mut total_bytes: u64 = 0;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| AttemptError::transport("Failed to read chunk", e))?
        {
            total_bytes = total_bytes.saturating_add(chunk.len() as u64);
            if total_bytes > self.max_download_bytes {
                return Err(AttemptError::fatal(CoreError::StorageError(format!(
                    "Result exceeded max size limit ({} bytes)",
                    self.max_download_bytes
                ))));
            }

            file.write_all(&chunk).await.map_err(|e| {
                AttemptError::fatal(CoreError::StorageError(format!(
                    "Failed to write scratch file: {}",
                    e
                )))
            })?;
        }

        file.flush().await.map_err(|e| {
            AttemptError::fatal(CoreError::StorageError(format!(
                "Failed to flush scratch file: {}",
                e
            )))
        })?;

        Ok(total_bytes)
    }

    /// Copies a result the service left on the local filesystem
    async fn copy_local(&self, src: &Path, dest: &Path) -> CoreResult<u64> {
        let metadata = tokio::fs::metadata(src).await.map_err(|e| {
            CoreError::StorageError(format!("Result file {} unavailable: {}", src.display(), e))
        })?;

        if !metadata.is_file() {
            return Err(CoreError::StorageError(format!(
                "Result is not a file: {}",
                src.display()
            )));
        }

        if metadata.len() > self.max_download_bytes {
            return Err(CoreError::StorageError(format!(
                "Result is too large ({} bytes > {} bytes limit)",
                metadata.len(),
                self.max_download_bytes
            )));
        }

        match tokio::fs::copy(src, dest).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                let _ = tokio::fs::remove_file(dest).await;
                Err(CoreError::StorageError(format!(
                    "Failed to copy result {}: {}",
                    src.display(),
                    e
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PolicyPermissionGate;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    struct Fixture {
        dir: TempDir,
        gate: Arc<PolicyPermissionGate>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_gate(PolicyPermissionGate::allow_all())
        }

        fn with_gate(gate: PolicyPermissionGate) -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                gate: Arc::new(gate),
            }
        }

        fn album(&self) -> PathBuf {
            self.dir.path().join("album")
        }

        fn scratch(&self) -> PathBuf {
            self.dir.path().join("scratch")
        }

        fn persister(&self) -> GalleryPersister {
            let library = Arc::new(DirectoryMediaLibrary::new(self.album(), self.album()));
            GalleryPersister::new(self.gate.clone(), library, self.scratch())
                .unwrap()
                .with_retry_base_delay(Duration::from_millis(10))
        }

        fn write_result(&self, name: &str, bytes: &[u8]) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, bytes).unwrap();
            path
        }

        fn album_entries(&self) -> Vec<PathBuf> {
            match std::fs::read_dir(self.album()) {
                Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
                Err(_) => Vec::new(),
            }
        }

        fn scratch_is_empty(&self) -> bool {
            match std::fs::read_dir(self.scratch()) {
                Ok(mut entries) => entries.next().is_none(),
                Err(_) => true,
            }
        }
    }

    /// Serves the scripted `(status, body)` replies, one connection each
    async fn serve(replies: Vec<(u16, Vec<u8>)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for (status, body) in replies {
                let (mut socket, _) = listener.accept().await.unwrap();

                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }

                let reason = if status == 200 { "OK" } else { "Error" };
                let head = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    reason,
                    body.len()
                );
                socket.write_all(head.as_bytes()).await.unwrap();
                socket.write_all(&body).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });

        format!("http://{}", addr)
    }

    #[test]
    fn test_classify_locator() {
        assert!(matches!(
            classify_locator("http://x/o.jpg").unwrap(),
            Locator::Remote(_)
        ));
        assert!(matches!(
            classify_locator("https://x/o.mp4").unwrap(),
            Locator::Remote(_)
        ));
        assert_eq!(
            classify_locator("/tmp/o.mp4").unwrap(),
            Locator::Local(PathBuf::from("/tmp/o.mp4"))
        );
        assert_eq!(
            classify_locator("outputs/o.mp4").unwrap(),
            Locator::Local(PathBuf::from("outputs/o.mp4"))
        );
        assert_eq!(
            classify_locator("C:\\outputs\\o.mp4").unwrap(),
            Locator::Local(PathBuf::from("C:\\outputs\\o.mp4"))
        );
        assert!(matches!(
            classify_locator("ftp://x/o.mp4"),
            Err(CoreError::StorageError(_))
        ));
        assert!(matches!(
            classify_locator("  "),
            Err(CoreError::StorageError(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_file_url() {
        assert_eq!(
            classify_locator("file:///tmp/o.mp4").unwrap(),
            Locator::Local(PathBuf::from("/tmp/o.mp4"))
        );
    }

    #[tokio::test]
    async fn test_save_local_result() {
        let fx = Fixture::new();
        let output = fx.write_result("o.mp4", b"processed video");
        let result = DetectionResult::new(3, output.to_string_lossy());

        let saved = fx.persister().save(&result, MediaKind::Video).await.unwrap();

        assert_eq!(saved.bytes, 15);
        assert!(saved.library_path.starts_with(fx.album()));
        let name = saved.library_path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("processed_palm_"));
        assert!(name.ends_with(".mp4"));
        assert_eq!(std::fs::read(&saved.library_path).unwrap(), b"processed video");
        assert!(fx.scratch_is_empty());
        // The service's file is left alone.
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_save_denied_performs_no_download() {
        let fx = Fixture::with_gate(
            PolicyPermissionGate::allow_all().with_denied(Capability::LibraryWrite),
        );
        let output = fx.write_result("o.jpg", b"jpeg");
        let result = DetectionResult::new(7, output.to_string_lossy());

        let err = fx
            .persister()
            .save(&result, MediaKind::Image)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::PermissionDenied(_)));
        assert!(fx.album_entries().is_empty());
        assert!(!fx.scratch().exists());
        assert_eq!(fx.gate.request_count(), 1);
    }

    #[tokio::test]
    async fn test_save_missing_local_result() {
        let fx = Fixture::new();
        let result = DetectionResult::new(3, fx.dir.path().join("gone.mp4").to_string_lossy());

        let err = fx
            .persister()
            .save(&result, MediaKind::Video)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::StorageError(_)));
        assert!(fx.album_entries().is_empty());
        assert!(fx.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_save_rejects_oversized_local_result() {
        let fx = Fixture::new();
        let output = fx.write_result("big.mp4", &[0u8; 64]);
        let result = DetectionResult::new(1, output.to_string_lossy());

        let err = fx
            .persister()
            .with_max_download_bytes(32)
            .save(&result, MediaKind::Video)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("too large"));
        assert!(fx.album_entries().is_empty());
    }

    #[tokio::test]
    async fn test_save_remote_result() {
        let fx = Fixture::new();
        let base = serve(vec![(200, b"annotated jpeg".to_vec())]).await;
        let result = DetectionResult::new(7, format!("{}/outputs/o.jpg", base));

        let saved = fx.persister().save(&result, MediaKind::Image).await.unwrap();

        assert_eq!(saved.bytes, 14);
        assert_eq!(std::fs::read(&saved.library_path).unwrap(), b"annotated jpeg");
        let name = saved.library_path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("palm_") && name.ends_with(".jpg"));
        assert!(fx.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_download_retries_transient_status() {
        let fx = Fixture::new();
        let base = serve(vec![(503, Vec::new()), (200, b"ok".to_vec())]).await;
        let result = DetectionResult::new(1, format!("{}/o.jpg", base));

        let saved = fx.persister().save(&result, MediaKind::Image).await.unwrap();
        assert_eq!(saved.bytes, 2);
    }

    #[tokio::test]
    async fn test_download_does_not_retry_not_found() {
        let fx = Fixture::new();
        // A single scripted reply: a retry would find the listener closed.
        let base = serve(vec![(404, b"missing".to_vec())]).await;
        let result = DetectionResult::new(1, format!("{}/o.jpg", base));

        let err = fx
            .persister()
            .save(&result, MediaKind::Image)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::StorageError(ref m) if m.contains("404")));
        assert!(fx.album_entries().is_empty());
        assert!(fx.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_download_enforces_size_cap() {
        let fx = Fixture::new();
        let base = serve(vec![(200, vec![1u8; 128])]).await;
        let result = DetectionResult::new(1, format!("{}/o.mp4", base));

        let err = fx
            .persister()
            .with_max_download_bytes(64)
            .save(&result, MediaKind::Video)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::StorageError(_)));
        assert!(fx.album_entries().is_empty());
        assert!(fx.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_download_does_not_retry_fatal_status_with_digits_in_url() {
        let fx = Fixture::new();
        // The file name carries "502"; only the 410 status decides.
        let base = serve(vec![(410, b"gone".to_vec())]).await;
        let result = DetectionResult::new(1, format!("{}/outputs/3f5029ab-502.jpg", base));

        let err = fx
            .persister()
            .save(&result, MediaKind::Image)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::StorageError(ref m) if m.contains("410")));
        assert!(fx.album_entries().is_empty());
    }

    #[tokio::test]
    async fn test_download_gives_up_after_max_retries() {
        let fx = Fixture::new();
        let base = serve(vec![(502, Vec::new()), (503, Vec::new()), (504, Vec::new())]).await;
        let result = DetectionResult::new(1, format!("{}/o.jpg", base));

        let err = fx
            .persister()
            .save(&result, MediaKind::Image)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::StorageError(ref m) if m.contains("504")));
        assert!(fx.scratch_is_empty());
    }

    #[test]
    fn test_transient_statuses() {
        for code in [429, 502, 503, 504] {
            assert!(is_transient_status(StatusCode::from_u16(code).unwrap()));
        }
        for code in [400, 403, 404, 410, 500] {
            assert!(!is_transient_status(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn test_into_storage_error() {
        let io = CoreError::IoError(std::io::Error::other("disk full"));
        assert!(matches!(
            into_storage_error(io),
            CoreError::StorageError(m) if m.contains("disk full")
        ));

        let denied = CoreError::PermissionDenied("x".into());
        assert!(matches!(into_storage_error(denied), CoreError::PermissionDenied(_)));
    }
}
