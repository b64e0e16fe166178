//! Download Pipeline
//!
//! A download is a stream of progress events closed by exactly one
//! `Finished` event. The transfer runs in its own task and talks to the
//! consumer over a bounded channel, so events arrive in order and a slow
//! consumer throttles the transfer instead of losing ticks.
//!
//! Dropping a [`DownloadStream`] before `Finished` aborts the transfer and
//! removes its `.partial` file. The partial file is created before the
//! stream is handed out, so an aborted transfer never recreates it.

use futures_util::{Stream, StreamExt};
use reqwest::Url;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::UpdateError;
use super::release::Asset;
use super::transform::{apply_transform, UrlTransform};

const CHANNEL_CAPACITY: usize = 64;

/// One step of a download
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    /// Fraction completed, as reported by the transport
    Progress(f64),
    /// Terminal event with the final file location
    Finished(PathBuf),
}

type EventResult = Result<DownloadEvent, UpdateError>;

/// Producer side handed to a transfer task
#[derive(Clone)]
pub struct DownloadSink {
    tx: mpsc::Sender<EventResult>,
}

impl DownloadSink {
    /// Emit a progress tick. Fails with `Cancelled` once the consumer is gone.
    pub async fn progress(&self, fraction: f64) -> Result<(), UpdateError> {
        self.tx
            .send(Ok(DownloadEvent::Progress(fraction)))
            .await
            .map_err(|_| UpdateError::Cancelled)
    }
}

/// Consumer side of a download
pub struct DownloadStream {
    rx: mpsc::Receiver<EventResult>,
    task: Option<JoinHandle<()>>,
    partial: Option<PathBuf>,
    finished: bool,
}

impl DownloadStream {
    /// Run `producer` in a new task.
    ///
    /// The producer reports progress through the sink and returns the final
    /// location; the task turns that into the terminal event. On failure the
    /// `partial` file, if any, is removed before the error is delivered.
    pub fn spawn<F, Fut>(partial: Option<PathBuf>, producer: F) -> Self
    where
        F: FnOnce(DownloadSink) -> Fut + Send + 'static,
        Fut: Future<Output = Result<PathBuf, UpdateError>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let sink = DownloadSink { tx: tx.clone() };
        let cleanup = partial.clone();

        let task = tokio::spawn(async move {
            match producer(sink).await {
                Ok(location) => {
                    if tx.send(Ok(DownloadEvent::Finished(location.clone()))).await.is_err() {
                        debug!("Download finished after the consumer left");
                        let _ = tokio::fs::remove_file(&location).await;
                    }
                }
                Err(e) => {
                    if let Some(path) = &cleanup {
                        let _ = tokio::fs::remove_file(path).await;
                    }
                    if e.is_cancelled() {
                        debug!("Download abandoned by consumer");
                    }
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Self {
            rx,
            task: Some(task),
            partial,
            finished: false,
        }
    }

    /// A stream replaying fixed events, then closing
    pub fn from_events(events: Vec<EventResult>) -> Self {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            // Capacity covers every event.
            let _ = tx.try_send(event);
        }
        Self {
            rx,
            task: None,
            partial: None,
            finished: false,
        }
    }

    /// Drain the stream, forwarding progress, and return the final location.
    ///
    /// A stream that closes without `Finished` is an error, never an empty
    /// success.
    pub async fn wait_for_location<F>(mut self, mut on_progress: F) -> Result<PathBuf, UpdateError>
    where
        F: FnMut(f64),
    {
        while let Some(event) = self.next().await {
            match event? {
                DownloadEvent::Progress(fraction) => on_progress(fraction),
                DownloadEvent::Finished(location) => return Ok(location),
            }
        }
        Err(UpdateError::MissingTerminalEvent)
    }
}

impl Stream for DownloadStream {
    type Item = EventResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.rx.poll_recv(cx);
        if let Poll::Ready(Some(Ok(DownloadEvent::Finished(_)))) = &polled {
            self.finished = true;
        }
        polled
    }
}

impl Drop for DownloadStream {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(partial) = &self.partial {
            if partial.exists() {
                let _ = std::fs::remove_file(partial);
            }
        }
    }
}

/// Location used while bytes are still arriving
pub fn partial_path(destination: &Path) -> PathBuf {
    destination.with_extension("partial")
}

/// HTTP download manager for release assets
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    transform: Option<UrlTransform>,
}

impl Downloader {
    pub fn new(client: reqwest::Client, transform: Option<UrlTransform>) -> Self {
        Self { client, transform }
    }

    /// Start streaming `asset` to `destination`
    pub fn download(&self, asset: &Asset, destination: &Path) -> Result<DownloadStream, UpdateError> {
        let url = Url::parse(&asset.download_url)
            .map_err(|_| UpdateError::InvalidUrl(asset.download_url.clone()))?;
        let url = apply_transform(self.transform.as_ref(), url);
        let partial = partial_path(destination);
        let destination = destination.to_path_buf();
        let client = self.client.clone();

        if let Some(parent) = partial.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = tokio::fs::File::from_std(std::fs::File::create(&partial)?);

        info!("Downloading {} to {}", url, destination.display());
        let cleanup = partial.clone();
        Ok(DownloadStream::spawn(Some(cleanup), move |sink| {
            fetch_to_file(client, url, file, partial, destination, sink)
        }))
    }
}

async fn fetch_to_file(
    client: reqwest::Client,
    url: Url,
    mut file: tokio::fs::File,
    partial: PathBuf,
    destination: PathBuf,
    sink: DownloadSink,
) -> Result<PathBuf, UpdateError> {
    sink.progress(0.0).await?;

    let response = client.get(url.clone()).send().await?;
    if !response.status().is_success() {
        return Err(UpdateError::HttpStatus {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }

    let total = response.content_length().unwrap_or(0);
    debug!("Download size: {} bytes", total);

    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        if total > 0 {
            sink.progress((downloaded as f64 / total as f64).min(1.0)).await?;
        }
    }

    file.flush().await?;
    drop(file);

    if total > 0 && downloaded != total {
        warn!("Downloaded size mismatch: expected {}, got {}", total, downloaded);
        return Err(UpdateError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("download incomplete: expected {} bytes, got {}", total, downloaded),
        )));
    }

    std::fs::rename(&partial, &destination)?;
    info!("Download complete: {} bytes", downloaded);
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::updater::release::MediaKind;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a loopback port
    async fn serve_once(response: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await;
            let _ = socket.write_all(&response).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{}/App-1.0.0.zip", addr)
    }

    fn http_response(status: &str, content_length: usize, body: &[u8]) -> Vec<u8> {
        let mut response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/zip\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status, content_length
        )
        .into_bytes();
        response.extend_from_slice(body);
        response
    }

    fn local_downloader() -> Downloader {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        Downloader::new(client, None)
    }

    #[tokio::test]
    async fn test_progress_then_finished() {
        let stream = DownloadStream::from_events(vec![
            Ok(DownloadEvent::Progress(0.25)),
            Ok(DownloadEvent::Progress(0.75)),
            Ok(DownloadEvent::Finished(PathBuf::from("/tmp/download"))),
        ]);
        let mut seen = Vec::new();
        let location = stream.wait_for_location(|f| seen.push(f)).await.unwrap();
        assert_eq!(location, PathBuf::from("/tmp/download"));
        assert_eq!(seen, vec![0.25, 0.75]);
    }

    #[tokio::test]
    async fn test_missing_finished_is_error() {
        let stream = DownloadStream::from_events(vec![Ok(DownloadEvent::Progress(1.0))]);
        let result = stream.wait_for_location(|_| {}).await;
        assert!(matches!(result, Err(UpdateError::MissingTerminalEvent)));

        let empty = DownloadStream::from_events(vec![]);
        let result = empty.wait_for_location(|_| {}).await;
        assert!(matches!(result, Err(UpdateError::MissingTerminalEvent)));
    }

    #[tokio::test]
    async fn test_failure_is_propagated() {
        let stream = DownloadStream::from_events(vec![
            Ok(DownloadEvent::Progress(0.1)),
            Err(UpdateError::HttpStatus {
                status: 503,
                url: "https://example.com".into(),
            }),
        ]);
        let result = stream.wait_for_location(|_| {}).await;
        assert!(matches!(result, Err(UpdateError::HttpStatus { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_spawned_producer_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("download");
        let out = target.clone();
        let stream = DownloadStream::spawn(None, move |sink| async move {
            for i in 1..=4 {
                sink.progress(i as f64 / 4.0).await?;
            }
            tokio::fs::write(&out, b"payload").await?;
            Ok(out)
        });
        let mut ticks = 0;
        let location = stream.wait_for_location(|_| ticks += 1).await.unwrap();
        assert_eq!(ticks, 4);
        assert_eq!(std::fs::read(location).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_failed_producer_removes_partial() {
        let dir = tempfile::tempdir().unwrap();
        let partial = partial_path(&dir.path().join("download"));
        let written = partial.clone();
        let stream = DownloadStream::spawn(Some(partial.clone()), move |_sink| async move {
            tokio::fs::write(&written, b"half").await?;
            Err::<PathBuf, _>(UpdateError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            )))
        });
        assert!(stream.wait_for_location(|_| {}).await.is_err());
        assert!(!partial.exists());
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let partial = partial_path(&dir.path().join("download"));
        let written = partial.clone();
        let mut stream = DownloadStream::spawn(Some(partial.clone()), move |sink| async move {
            tokio::fs::write(&written, b"half").await?;
            sink.progress(0.5).await?;
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(written)
        });

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, DownloadEvent::Progress(0.5));
        drop(stream);

        assert!(!partial.exists());
    }

    #[tokio::test]
    async fn test_invalid_asset_url() {
        let downloader = Downloader::new(reqwest::Client::new(), None);
        let asset = Asset::new("App-1.0.0.zip", "not a url", MediaKind::Zip);
        let dir = tempfile::tempdir().unwrap();
        let result = downloader.download(&asset, &dir.path().join("download"));
        assert!(matches!(result, Err(UpdateError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_http_download_streams_to_destination() {
        let body: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let url = serve_once(http_response("200 OK", body.len(), &body)).await;
        let asset = Asset::new("App-1.0.0.zip", url, MediaKind::Zip);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("download");

        let stream = local_downloader().download(&asset, &destination).unwrap();
        let mut fractions = Vec::new();
        let location = stream.wait_for_location(|f| fractions.push(f)).await.unwrap();

        assert_eq!(location, destination);
        assert_eq!(std::fs::read(&destination).unwrap(), body);
        assert!(!partial_path(&destination).exists());
        assert_eq!(fractions.first(), Some(&0.0));
        assert_eq!(fractions.last(), Some(&1.0));
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let url = serve_once(http_response("404 Not Found", 9, b"not found")).await;
        let asset = Asset::new("App-1.0.0.zip", url, MediaKind::Zip);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("download");

        let stream = local_downloader().download(&asset, &destination).unwrap();
        let result = stream.wait_for_location(|_| {}).await;

        assert!(matches!(result, Err(UpdateError::HttpStatus { status: 404, .. })));
        assert!(!partial_path(&destination).exists());
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_http_short_body_fails() {
        let url = serve_once(http_response("200 OK", 4096, &[7u8; 100])).await;
        let asset = Asset::new("App-1.0.0.zip", url, MediaKind::Zip);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("download");

        let stream = local_downloader().download(&asset, &destination).unwrap();
        let err = stream.wait_for_location(|_| {}).await.unwrap_err();

        // The transport may notice the truncation before the size check does.
        assert!(matches!(err, UpdateError::Http(_) | UpdateError::Io(_)));
        assert!(!partial_path(&destination).exists());
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_dropped_http_download_leaves_no_partial() {
        // Accepts the connection but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let asset = Asset::new("App-1.0.0.zip", format!("http://{}/App.zip", addr), MediaKind::Zip);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("download");

        let mut stream = local_downloader().download(&asset, &destination).unwrap();
        assert!(partial_path(&destination).exists());
        assert_eq!(stream.next().await.unwrap().unwrap(), DownloadEvent::Progress(0.0));
        drop(stream);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!partial_path(&destination).exists());
        assert!(!destination.exists());
        server.abort();
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/tmp/work/download")),
            PathBuf::from("/tmp/work/download.partial")
        );
    }
}
