//! Fetch stage: open a byte stream for a URL, read it, decode it.
//!
//! Streams come from a [`Transport`] chosen by URL scheme. Every stream is
//! wrapped in a guard for as long as it is open, so it is released on every
//! exit path: success, error, timeout, or the future being dropped on
//! cancellation.
//!
//! The transfer and the decode are separate steps so a pipeline can run the
//! first on its I/O pool and the second on its CPU pool.

use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use image::GenericImageView;
use reqwest::Url;
use tokio_util::io::ReaderStream;

use crate::config::{Config, FetchConfig, LimitsConfig};
use crate::error::{FetchError, Result};
use crate::types::ImageBuffer;

/// An open byte stream plus its announced length, if any.
pub struct ByteStream {
    chunks: BoxStream<'static, std::result::Result<Bytes, FetchError>>,
    content_length: Option<u64>,
}

impl ByteStream {
    pub fn new(
        chunks: BoxStream<'static, std::result::Result<Bytes, FetchError>>,
        content_length: Option<u64>,
    ) -> Self {
        Self {
            chunks,
            content_length,
        }
    }
}

/// Source of byte streams for one or more URL schemes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Open a stream for `url`. Failing to connect is `FetchError::Unreachable`.
    async fn open(&self, url: &Url) -> std::result::Result<ByteStream, FetchError>;
}

/// HTTP(S) GET via reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn open(&self, url: &Url) -> std::result::Result<ByteStream, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Unreachable {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_length = response.content_length();
        let url = url.to_string();
        let chunks = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| FetchError::Interrupted {
                    url: url.clone(),
                    message: e.to_string(),
                })
            })
            .boxed();
        Ok(ByteStream::new(chunks, content_length))
    }
}

/// Local files via `file://` URLs.
pub struct FileTransport;

#[async_trait]
impl Transport for FileTransport {
    fn name(&self) -> &str {
        "file"
    }

    async fn open(&self, url: &Url) -> std::result::Result<ByteStream, FetchError> {
        let path = url.to_file_path().map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
            message: "not a local file path".to_string(),
        })?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| FetchError::Unreachable {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        let content_length = file.metadata().await.ok().map(|m| m.len());

        let url = url.to_string();
        let chunks = ReaderStream::new(file)
            .map(move |chunk| {
                chunk.map_err(|e| FetchError::Interrupted {
                    url: url.clone(),
                    message: e.to_string(),
                })
            })
            .boxed();
        Ok(ByteStream::new(chunks, content_length))
    }
}

/// Bytes of a completed transfer, not yet decoded.
#[derive(Debug)]
pub struct Payload {
    url: String,
    bytes: Vec<u8>,
}

impl Payload {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A stream counted in the stage's open-stream gauge until dropped.
struct TrackedStream<'a> {
    stream: ByteStream,
    open: &'a AtomicUsize,
}

impl<'a> TrackedStream<'a> {
    fn new(stream: ByteStream, open: &'a AtomicUsize) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self { stream, open }
    }
}

impl Drop for TrackedStream<'_> {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Retrieves and decodes images.
pub struct FetchStage {
    transports: HashMap<String, Arc<dyn Transport>>,
    limits: LimitsConfig,
    open_streams: AtomicUsize,
}

impl FetchStage {
    /// Create a fetch stage with the http, https and file transports.
    pub fn new(config: &Config) -> Result<Self> {
        let http: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.fetch)?);
        let mut stage = Self {
            transports: HashMap::new(),
            limits: config.limits.clone(),
            open_streams: AtomicUsize::new(0),
        };
        stage.register("http", http.clone());
        stage.register("https", http);
        stage.register("file", Arc::new(FileTransport));
        Ok(stage)
    }

    /// Serve `scheme` URLs with `transport`, replacing any existing one.
    pub fn register(&mut self, scheme: &str, transport: Arc<dyn Transport>) {
        self.transports.insert(scheme.to_ascii_lowercase(), transport);
    }

    /// Number of streams currently open.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Fetch `url` and decode it into an image.
    ///
    /// Decoding runs on the blocking pool. Callers with their own CPU pool
    /// use [`download`](Self::download) and [`decode`](Self::decode) instead.
    pub async fn fetch(&self, url: &str) -> std::result::Result<ImageBuffer, FetchError> {
        let payload = self.download(url).await?;
        let max_dim = self.limits.max_image_dimension;
        tokio::task::spawn_blocking(move || decode_payload(payload, max_dim))
            .await
            .map_err(|e| FetchError::Undecodable {
                url: url.to_string(),
                message: format!("Task join error: {e}"),
            })?
    }

    /// Transfer the bytes behind `url` without decoding them.
    pub async fn download(&self, url: &str) -> std::result::Result<Payload, FetchError> {
        let start = Instant::now();
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let transport = self
            .transports
            .get(parsed.scheme())
            .cloned()
            .ok_or_else(|| FetchError::UnsupportedScheme {
                url: url.to_string(),
                scheme: parsed.scheme().to_string(),
            })?;

        let bytes = match self.limits.fetch_timeout_ms {
            Some(timeout_ms) => tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                self.read_all(transport.as_ref(), &parsed),
            )
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
                timeout_ms,
            })??,
            None => self.read_all(transport.as_ref(), &parsed).await?,
        };
        tracing::trace!(
            "  Read {} bytes via {}: {:?}",
            bytes.len(),
            transport.name(),
            start.elapsed()
        );

        Ok(Payload {
            url: url.to_string(),
            bytes,
        })
    }

    /// Decode a downloaded payload. CPU bound.
    pub fn decode(&self, payload: Payload) -> std::result::Result<ImageBuffer, FetchError> {
        decode_payload(payload, self.limits.max_image_dimension)
    }

    async fn read_all(
        &self,
        transport: &dyn Transport,
        url: &Url,
    ) -> std::result::Result<Vec<u8>, FetchError> {
        let max = self.limits.max_download_bytes();
        let mut tracked = TrackedStream::new(transport.open(url).await?, &self.open_streams);

        if let Some(size) = tracked.stream.content_length {
            if size > max {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    size,
                    max,
                });
            }
        }

        let capacity = tracked.stream.content_length.unwrap_or(0).min(max) as usize;
        let mut bytes = Vec::with_capacity(capacity);
        while let Some(chunk) = tracked.stream.chunks.next().await {
            let chunk = chunk?;
            let size = (bytes.len() + chunk.len()) as u64;
            if size > max {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    size,
                    max,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(bytes)
    }
}

impl fmt::Debug for FetchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<_> = self.transports.keys().collect();
        schemes.sort();
        f.debug_struct("FetchStage")
            .field("schemes", &schemes)
            .field("open_streams", &self.open_streams())
            .finish()
    }
}

/// Synchronous decode with format detection and the dimension limit.
fn decode_payload(payload: Payload, max_dim: u32) -> std::result::Result<ImageBuffer, FetchError> {
    let start = Instant::now();
    let Payload { url, bytes } = payload;
    let url = url.as_str();
    let source_hash = blake3::hash(&bytes).to_hex().to_string();
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| FetchError::Undecodable {
            url: url.to_string(),
            message: format!("Cannot detect image format: {e}"),
        })?;
    let format = reader.format().ok_or_else(|| FetchError::Undecodable {
        url: url.to_string(),
        message: "Unrecognized image format".to_string(),
    })?;
    let image = reader.decode().map_err(|e| FetchError::Undecodable {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let (width, height) = image.dimensions();
    if width > max_dim || height > max_dim {
        return Err(FetchError::ImageTooLarge {
            url: url.to_string(),
            width,
            height,
            max_dim,
        });
    }

    tracing::debug!("Decoded {} in {:?} ({}x{})", url, start.elapsed(), width, height);
    Ok(ImageBuffer::new(image.to_rgba8())
        .with_format(format)
        .with_source_hash(source_hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use image::{ImageFormat, Rgba, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 90, 255])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// Serves fixed chunks, optionally never finishing.
    struct MemoryTransport {
        chunks: Vec<Bytes>,
        content_length: Option<u64>,
        hang: bool,
    }

    impl MemoryTransport {
        fn serving(bytes: Vec<u8>) -> Self {
            Self {
                content_length: Some(bytes.len() as u64),
                chunks: vec![Bytes::from(bytes)],
                hang: false,
            }
        }

        fn hanging() -> Self {
            Self {
                chunks: vec![Bytes::from_static(b"\x89PNG")],
                content_length: None,
                hang: true,
            }
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        fn name(&self) -> &str {
            "memory"
        }

        async fn open(&self, _url: &Url) -> std::result::Result<ByteStream, FetchError> {
            let head = stream::iter(self.chunks.clone().into_iter().map(Ok));
            let chunks = if self.hang {
                head.chain(stream::pending()).boxed()
            } else {
                head.boxed()
            };
            Ok(ByteStream::new(chunks, self.content_length))
        }
    }

    fn stage_with(config: Config, transport: MemoryTransport) -> FetchStage {
        let mut stage = FetchStage::new(&config).unwrap();
        stage.register("mem", Arc::new(transport));
        stage
    }

    #[tokio::test]
    async fn test_fetch_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("square.png");
        std::fs::write(&path, png_bytes(100, 100)).unwrap();
        let url = Url::from_file_path(&path).unwrap();

        let stage = FetchStage::new(&Config::default()).unwrap();
        let image = stage.fetch(url.as_str()).await.unwrap();

        assert_eq!(image.dimensions(), (100, 100));
        assert_eq!(image.format(), Some(ImageFormat::Png));
        assert_eq!(image.source_hash().unwrap().len(), 64);
        assert_eq!(stage.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(dir.path().join("nope.png")).unwrap();
        let stage = FetchStage::new(&Config::default()).unwrap();

        let err = stage.fetch(url.as_str()).await.unwrap_err();
        assert!(matches!(err, FetchError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_invalid_and_unsupported_urls() {
        let stage = FetchStage::new(&Config::default()).unwrap();

        let err = stage.fetch("not a url").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));

        let err = stage.fetch("ftp://example.com/a.png").await.unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedScheme { ref scheme, .. } if scheme == "ftp"));
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        let stage = FetchStage::new(&Config::default()).unwrap();
        let err = stage.fetch("http://127.0.0.1:1/a.png").await.unwrap_err();
        assert!(matches!(err, FetchError::Unreachable { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_garbage_is_undecodable_and_stream_released() {
        let stage = stage_with(
            Config::default(),
            MemoryTransport::serving(b"definitely not an image".to_vec()),
        );
        let err = stage.fetch("mem://host/garbage").await.unwrap_err();
        assert!(matches!(err, FetchError::Undecodable { .. }));
        assert_eq!(stage.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_payload_over_limit_rejected() {
        let mut config = Config::default();
        config.limits.max_download_mb = 1;
        let stage = stage_with(config, MemoryTransport::serving(vec![0u8; 2 * 1024 * 1024]));

        let err = stage.fetch("mem://host/big").await.unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { .. }));
        assert_eq!(stage.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_dimensions_over_limit_rejected() {
        let mut config = Config::default();
        config.limits.max_image_dimension = 50;
        let stage = stage_with(config, MemoryTransport::serving(png_bytes(100, 20)));

        let err = stage.fetch("mem://host/wide").await.unwrap_err();
        assert!(matches!(err, FetchError::ImageTooLarge { width: 100, .. }));
    }

    #[tokio::test]
    async fn test_timeout_releases_stream() {
        let mut config = Config::default();
        config.limits.fetch_timeout_ms = Some(20);
        let stage = stage_with(config, MemoryTransport::hanging());

        let err = stage.fetch("mem://host/slow").await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout { timeout_ms: 20, .. }));
        assert_eq!(stage.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_download_leaves_decoding_to_caller() {
        let stage = stage_with(Config::default(), MemoryTransport::serving(png_bytes(12, 7)));

        let payload = stage.download("mem://host/tile.png").await.unwrap();
        assert_eq!(payload.url(), "mem://host/tile.png");
        assert!(!payload.is_empty());
        assert_eq!(stage.open_streams(), 0);

        let image = stage.decode(payload).unwrap();
        assert_eq!(image.dimensions(), (12, 7));
    }

    #[tokio::test]
    async fn test_decode_rejects_garbage_payload() {
        let stage = stage_with(Config::default(), MemoryTransport::serving(b"GIF? no".to_vec()));
        let payload = stage.download("mem://host/fake.gif").await.unwrap();
        let err = stage.decode(payload).unwrap_err();
        assert!(
            matches!(err, FetchError::Undecodable { ref url, .. } if url == "mem://host/fake.gif")
        );
    }

    #[tokio::test]
    async fn test_dropping_fetch_releases_stream() {
        let stage = stage_with(Config::default(), MemoryTransport::hanging());

        let mut fetch = Box::pin(stage.fetch("mem://host/slow"));
        let raced = tokio::time::timeout(Duration::from_millis(20), &mut fetch).await;
        assert!(raced.is_err());
        assert_eq!(stage.open_streams(), 1);

        drop(fetch);
        assert_eq!(stage.open_streams(), 0);
    }
}
