//! Timing, navigation and interaction helpers.
//!
//! Thin wrappers over the page handle with the validation the crawl driver
//! relies on: waits reject inverted bounds, every helper that needs a page
//! fails with [`Error::MissingResource`] when handed none, and navigation
//! implements the "networkidle2" completion condition (at most two in-flight
//! requests, sustained for half a second).

use std::collections::HashSet;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, RequestId,
};
use chromiumoxide::element::Element;
use chromiumoxide::{Browser, Page};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use rand::Rng;
use std::sync::Arc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::debug;

use crate::{Error, Result};

/// In-flight request ceiling for the idle condition.
pub const NETWORK_IDLE_ALLOWED: usize = 2;

/// How long the in-flight count must stay at or below the ceiling.
pub const NETWORK_IDLE_WINDOW_MS: u64 = 500;

/// Navigation completion condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitUntil {
    /// The load lifecycle event fired.
    Load,
    /// Load fired and the network settled ("networkidle2").
    #[default]
    NetworkIdle2,
}

fn require_page(page: Option<&Page>) -> Result<&Page> {
    page.ok_or_else(|| Error::MissingResource("page is required".into()))
}

/// Uniformly distributed integer in `[min, max]`, bounds inclusive.
pub fn random_range(min: u64, max: u64) -> Result<u64> {
    if min > max {
        return Err(Error::InvalidArgument(format!(
            "min ({min}) must not exceed max ({max})"
        )));
    }
    Ok(rand::rng().random_range(min..=max))
}

/// Suspend the driving sequence for a fixed duration.
///
/// The page keeps running while the sequence waits.
pub async fn page_wait(page: Option<&Page>, wait_ms: u64) -> Result<()> {
    require_page(page)?;
    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
    Ok(())
}

/// Suspend the driving sequence for a random duration in `[min_ms, max_ms]`.
pub async fn random_page_wait(page: Option<&Page>, min_ms: u64, max_ms: u64) -> Result<()> {
    require_page(page)?;
    let wait_ms = random_range(min_ms, max_ms)?;
    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
    Ok(())
}

/// The page's current URL (`window.location.href`).
pub async fn current_url(page: Option<&Page>) -> Result<Option<String>> {
    let page = require_page(page)?;
    Ok(page.url().await?)
}

/// Navigate and suspend until the requested completion condition is met,
/// bounded by `timeout_ms`. A no-op on an empty URL.
pub async fn navigate_to_url(
    page: Option<&Page>,
    url: &str,
    wait_until: WaitUntil,
    timeout_ms: u64,
) -> Result<()> {
    let page = require_page(page)?;
    if url.is_empty() {
        return Ok(());
    }

    let navigation = async {
        match wait_until {
            WaitUntil::Load => {
                page.goto(url).await?;
                page.wait_for_navigation().await?;
                Ok(())
            }
            WaitUntil::NetworkIdle2 => {
                // Subscribe before the navigation so its own requests count.
                let watcher = NetworkIdleWatcher::attach(page).await?;
                page.goto(url).await?;
                page.wait_for_navigation().await?;
                watcher
                    .wait_until_idle(
                        NETWORK_IDLE_ALLOWED,
                        Duration::from_millis(NETWORK_IDLE_WINDOW_MS),
                    )
                    .await
            }
        }
    };

    timeout(Duration::from_millis(timeout_ms), navigation)
        .await
        .map_err(|_| Error::Timeout(format!("navigation to {url} timed out after {timeout_ms}ms")))?
}

/// Inner markup of the first element matching `selector`, or `None` when
/// nothing matches.
pub async fn capture_inner_html(page: Option<&Page>, selector: &str) -> Result<Option<String>> {
    let page = require_page(page)?;
    let quoted = serde_json::to_string(selector)?;
    let js = format!("document.querySelector({quoted})?.innerHTML ?? null");
    let html: Option<String> = page.evaluate(js).await?.into_value()?;
    Ok(html)
}

/// Scroll an element into view.
pub async fn scroll_to_element(page: Option<&Page>, element: &Element) -> Result<()> {
    require_page(page)?;
    element.scroll_into_view().await?;
    Ok(())
}

/// Scroll to a link and click it.
///
/// With `wait_for_navigation` the click races against the subsequent
/// navigation settling and both must complete; without it the click fires and
/// the helper returns. `slow_mo` is the debug-mode inter-action delay.
pub async fn click_link_element(
    page: Option<&Page>,
    element: &Element,
    min_wait_ms: u64,
    max_wait_ms: u64,
    wait_for_navigation: bool,
    slow_mo: Option<Duration>,
) -> Result<()> {
    if min_wait_ms > max_wait_ms {
        return Err(Error::InvalidArgument(format!(
            "min_wait_ms ({min_wait_ms}) must not exceed max_wait_ms ({max_wait_ms})"
        )));
    }
    let page = require_page(page)?;

    element.scroll_into_view().await?;
    if max_wait_ms > 0 {
        random_page_wait(Some(page), min_wait_ms, max_wait_ms).await?;
    }
    if let Some(delay) = slow_mo {
        tokio::time::sleep(delay).await;
    }

    if wait_for_navigation {
        let (nav, click) = tokio::join!(page.wait_for_navigation(), element.click());
        click?;
        nav?;
    } else {
        element.click().await?;
    }
    Ok(())
}

/// Click a link that opens in a new tab and return the new page handle.
///
/// The click races against the new page appearing; `None` when no page was
/// supplied or no tab opened within the settling window.
pub async fn click_link_element_new_tab(
    browser: &Browser,
    page: Option<&Page>,
    element: &Element,
    min_wait_ms: u64,
    max_wait_ms: u64,
    slow_mo: Option<Duration>,
) -> Result<Option<Page>> {
    if min_wait_ms > max_wait_ms {
        return Err(Error::InvalidArgument(format!(
            "min_wait_ms ({min_wait_ms}) must not exceed max_wait_ms ({max_wait_ms})"
        )));
    }
    let Some(page) = page else {
        return Ok(None);
    };

    element.scroll_into_view().await?;
    if max_wait_ms > 0 {
        random_page_wait(Some(page), min_wait_ms, max_wait_ms).await?;
    }
    if let Some(delay) = slow_mo {
        tokio::time::sleep(delay).await;
    }

    let known: HashSet<_> = browser
        .pages()
        .await?
        .iter()
        .map(|p| p.target_id().clone())
        .collect();

    element.click().await?;

    // The popup target shows up asynchronously; poll briefly for it.
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        for candidate in browser.pages().await? {
            if !known.contains(candidate.target_id()) {
                debug!("New tab opened: {:?}", candidate.target_id());
                return Ok(Some(candidate));
            }
        }
    }
    Ok(None)
}

/// Tracks in-flight requests through CDP network events.
struct NetworkIdleWatcher {
    requests: BoxStream<'static, Arc<EventRequestWillBeSent>>,
    finished: BoxStream<'static, Arc<EventLoadingFinished>>,
    failed: BoxStream<'static, Arc<EventLoadingFailed>>,
}

impl NetworkIdleWatcher {
    async fn attach(page: &Page) -> Result<Self> {
        Ok(Self {
            requests: page.event_listener::<EventRequestWillBeSent>().await?.boxed(),
            finished: page.event_listener::<EventLoadingFinished>().await?.boxed(),
            failed: page.event_listener::<EventLoadingFailed>().await?.boxed(),
        })
    }

    /// Resolve once the in-flight count has stayed at or below `allowed` for
    /// `window`. Also resolves if the event streams end (page went away).
    async fn wait_until_idle(mut self, allowed: usize, window: Duration) -> Result<()> {
        let mut inflight: HashSet<RequestId> = HashSet::new();
        let mut idle_since = Instant::now();

        loop {
            let idle = inflight.len() <= allowed;
            tokio::select! {
                _ = sleep_until(idle_since + window), if idle => return Ok(()),
                ev = self.requests.next() => match ev {
                    Some(ev) => {
                        inflight.insert(ev.request_id.clone());
                    }
                    None => return Ok(()),
                },
                ev = self.finished.next() => match ev {
                    Some(ev) => {
                        if inflight.remove(&ev.request_id) && inflight.len() <= allowed {
                            idle_since = Instant::now();
                        }
                    }
                    None => return Ok(()),
                },
                ev = self.failed.next() => match ev {
                    Some(ev) => {
                        if inflight.remove(&ev.request_id) && inflight.len() <= allowed {
                            idle_since = Instant::now();
                        }
                    }
                    None => return Ok(()),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_range_bounds() {
        for _ in 0..200 {
            let v = random_range(10, 100).unwrap();
            assert!((10..=100).contains(&v));
        }
    }

    #[test]
    fn test_random_range_degenerate() {
        assert_eq!(random_range(42, 42).unwrap(), 42);
    }

    #[test]
    fn test_random_range_inverted_bounds() {
        let err = random_range(100, 10).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_page_wait_requires_page() {
        let err = page_wait(None, 10).await.unwrap_err();
        assert!(matches!(err, Error::MissingResource(_)));
    }

    #[tokio::test]
    async fn test_random_page_wait_requires_page() {
        let err = random_page_wait(None, 10, 20).await.unwrap_err();
        assert!(matches!(err, Error::MissingResource(_)));
    }

    #[tokio::test]
    async fn test_navigate_requires_page() {
        let err = navigate_to_url(None, "https://example.com", WaitUntil::default(), 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingResource(_)));
    }

    #[tokio::test]
    async fn test_current_url_requires_page() {
        let err = current_url(None).await.unwrap_err();
        assert!(matches!(err, Error::MissingResource(_)));
    }
}
