//! Response observer.
//!
//! Watches the page's network traffic for POST responses whose URL exactly
//! matches a tracked endpoint and writes each matching JSON body into the
//! snapshot folder. Matching is literal string equality on the URL — a
//! redirect or an added query parameter means no match, deliberately.
//!
//! The observer runs concurrently with the crawl sequence and may fire zero
//! or more times; the last matching response wins. Writes are awaitable:
//! [`ResponseObserver::finish`] lets the driver drain any in-flight write
//! before the session is torn down.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived, GetResponseBodyParams,
    RequestId,
};
use chromiumoxide::Page;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// One endpoint to capture: exact URL to match and the file it lands in.
#[derive(Debug, Clone)]
pub struct CaptureTarget {
    pub url: String,
    pub filename: String,
}

impl CaptureTarget {
    pub fn new(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
        }
    }
}

/// How often each capture file was written during the run.
#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    pub saved: Vec<(String, usize)>,
}

impl CaptureStats {
    /// Save count for one capture file.
    pub fn count(&self, filename: &str) -> usize {
        self.saved
            .iter()
            .find(|(name, _)| name == filename)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

/// Event-driven capture of matching POST response bodies.
pub struct ResponseObserver {
    stop: oneshot::Sender<()>,
    task: JoinHandle<CaptureStats>,
}

impl ResponseObserver {
    /// Subscribe to the page's network events and start observing.
    pub async fn attach(
        page: &Page,
        snapshot_folder: &Path,
        targets: Vec<CaptureTarget>,
    ) -> Result<Self> {
        let requests = page.event_listener::<EventRequestWillBeSent>().await?.boxed();
        let responses = page.event_listener::<EventResponseReceived>().await?.boxed();
        let finished = page.event_listener::<EventLoadingFinished>().await?.boxed();

        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(observe_loop(
            page.clone(),
            snapshot_folder.to_path_buf(),
            targets,
            requests,
            responses,
            finished,
            stop_rx,
        ));

        Ok(Self { stop, task })
    }

    /// Stop observing, waiting for any in-flight write to complete.
    pub async fn finish(self) -> CaptureStats {
        let _ = self.stop.send(());
        self.task.await.unwrap_or_default()
    }
}

#[allow(clippy::too_many_arguments)]
async fn observe_loop(
    page: Page,
    folder: PathBuf,
    targets: Vec<CaptureTarget>,
    mut requests: BoxStream<'static, Arc<EventRequestWillBeSent>>,
    mut responses: BoxStream<'static, Arc<EventResponseReceived>>,
    mut finished: BoxStream<'static, Arc<EventLoadingFinished>>,
    mut stop: oneshot::Receiver<()>,
) -> CaptureStats {
    // POST requests whose URL matched a target, by request id.
    let mut posts: HashMap<RequestId, usize> = HashMap::new();
    // Requests confirmed by a matching response, body pending.
    let mut ready: HashMap<RequestId, usize> = HashMap::new();
    let mut counts = vec![0usize; targets.len()];

    loop {
        tokio::select! {
            _ = &mut stop => break,
            ev = requests.next() => {
                let Some(ev) = ev else { break };
                if ev.request.method == "POST" {
                    if let Some(idx) = targets.iter().position(|t| t.url == ev.request.url) {
                        debug!(url = %ev.request.url, "Tracking POST to capture endpoint");
                        posts.insert(ev.request_id.clone(), idx);
                    }
                }
            }
            ev = responses.next() => {
                let Some(ev) = ev else { break };
                if let Some(&idx) = posts.get(&ev.request_id) {
                    if targets[idx].url == ev.response.url {
                        ready.insert(ev.request_id.clone(), idx);
                    }
                }
            }
            ev = finished.next() => {
                let Some(ev) = ev else { break };
                let Some(idx) = ready.remove(&ev.request_id) else { continue };
                posts.remove(&ev.request_id);
                let target = &targets[idx];
                let path = folder.join(&target.filename);
                match save_body(&page, &ev.request_id, &path).await {
                    Ok(()) => {
                        counts[idx] += 1;
                        info!("Saved {}", target.filename);
                    }
                    Err(e) => warn!("Failed to capture {}: {e}", target.filename),
                }
            }
        }
    }

    CaptureStats {
        saved: targets
            .into_iter()
            .map(|t| t.filename)
            .zip(counts)
            .collect(),
    }
}

/// Fetch a response body over CDP, parse it as JSON and write it
/// pretty-printed (2-space indent).
async fn save_body(page: &Page, request_id: &RequestId, path: &Path) -> Result<()> {
    let body = page
        .execute(GetResponseBodyParams::new(request_id.clone()))
        .await?;

    let raw = if body.base64_encoded {
        let bytes = BASE64
            .decode(body.body.as_bytes())
            .map_err(|e| Error::Capture(format!("invalid base64 body: {e}")))?;
        String::from_utf8(bytes).map_err(|e| Error::Capture(format!("non-utf8 body: {e}")))?
    } else {
        body.body.clone()
    };

    let value: serde_json::Value = serde_json::from_str(&raw)?;
    write_capture(path, &value).await
}

/// Write one captured JSON payload. Last write wins.
pub(crate) async fn write_capture(path: &Path, value: &serde_json::Value) -> Result<()> {
    let pretty = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, pretty).await?;
    Ok(())
}
