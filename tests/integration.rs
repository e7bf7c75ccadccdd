//! Integration tests for snapcrawl
//!
//! These tests require Chrome to be installed and available.
//! Run with: cargo test --test integration -- --ignored

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use snapcrawl::{CrawlConfig, Crawler};

/// Check if Chrome is available
fn chrome_available() -> bool {
    [
        "google-chrome-stable",
        "google-chrome",
        "chromium",
        "chromium-browser",
        "chrome",
    ]
    .iter()
    .any(|bin| {
        std::process::Command::new(bin)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
}

/// Minimal HTTP server for the crawl to hit: serves `page` at `/`, answers
/// POSTs to `/fp` with a JSON body derived from the hit count, and POSTs to
/// `/analysis` with a fixed body when enabled.
async fn spawn_site(page: String, analysis_enabled: bool) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let fp_hits = Arc::new(AtomicUsize::new(0));
    let hits = fp_hits.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let page = page.clone();
            let hits = hits.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 16 * 1024];
                let Ok(n) = socket.read(&mut buf).await else {
                    return;
                };
                let request = String::from_utf8_lossy(&buf[..n]);
                let first_line = request.lines().next().unwrap_or("");

                let (status, content_type, body) = if first_line.starts_with("GET / ") {
                    ("200 OK", "text/html", page)
                } else if first_line.starts_with("POST /fp") {
                    let hit = hits.fetch_add(1, Ordering::SeqCst) + 1;
                    (
                        "200 OK",
                        "application/json",
                        format!("{{\"fp\":\"abc\",\"hit\":{hit}}}"),
                    )
                } else if first_line.starts_with("POST /analysis") && analysis_enabled {
                    ("200 OK", "application/json", "{\"score\":42}".to_string())
                } else {
                    ("404 Not Found", "text/plain", "not found".to_string())
                };

                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, fp_hits)
}

fn test_config(addr: SocketAddr, snapshot_root: &std::path::Path) -> CrawlConfig {
    CrawlConfig {
        target_url: format!("http://{addr}/"),
        fingerprint_url: format!("http://{addr}/fp"),
        analysis_url: format!("http://{addr}/analysis"),
        proxy: None,
        timeout_ms: 20_000,
        snapshot_root: snapshot_root.to_path_buf(),
        ..Default::default()
    }
}

fn snapshot_folder(root: &std::path::Path) -> std::path::PathBuf {
    let mut entries: Vec<_> = std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries.len(), 1, "expected exactly one snapshot folder");
    entries.remove(0)
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_fingerprint_only_capture() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let page = r#"<html><body>ok<script>
        fetch('/fp', {method: 'POST', headers: {'content-type': 'application/json'}, body: '{}'});
    </script></body></html>"#
        .to_string();
    let (addr, _) = spawn_site(page, false).await;
    let dir = tempfile::tempdir().unwrap();

    let crawler = Crawler::new(test_config(addr, dir.path())).await.unwrap();
    let report = crawler.run().await;

    assert!(report.success, "crawl failed: {:?}", report.error);
    let folder = snapshot_folder(dir.path());

    let fingerprint = std::fs::read_to_string(folder.join("fingerprint.json")).unwrap();
    assert_eq!(fingerprint, "{\n  \"fp\": \"abc\",\n  \"hit\": 1\n}");
    assert!(!folder.join("analysis.json").exists());
    assert_eq!(report.captures.count("fingerprint.json"), 1);
    assert_eq!(report.captures.count("analysis.json"), 0);
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_both_endpoints_last_write_wins() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let page = r#"<html><body>ok<script>
        const post = (url) => fetch(url, {method: 'POST', headers: {'content-type': 'application/json'}, body: '{}'});
        post('/fp').then(() => post('/fp')).then(() => post('/analysis'));
    </script></body></html>"#
        .to_string();
    let (addr, fp_hits) = spawn_site(page, true).await;
    let dir = tempfile::tempdir().unwrap();

    let crawler = Crawler::new(test_config(addr, dir.path())).await.unwrap();
    let report = crawler.run().await;

    assert!(report.success, "crawl failed: {:?}", report.error);
    assert_eq!(fp_hits.load(Ordering::SeqCst), 2);
    let folder = snapshot_folder(dir.path());

    // last response wins
    let fingerprint = std::fs::read_to_string(folder.join("fingerprint.json")).unwrap();
    assert!(fingerprint.contains("\"hit\": 2"), "got: {fingerprint}");
    let analysis = std::fs::read_to_string(folder.join("analysis.json")).unwrap();
    assert!(analysis.contains("\"score\": 42"), "got: {analysis}");
    assert_eq!(report.captures.count("fingerprint.json"), 2);
    assert_eq!(report.captures.count("analysis.json"), 1);
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_page_artifacts_written() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let page = "<html><body><h1>hello</h1></body></html>".to_string();
    let (addr, _) = spawn_site(page, false).await;
    let dir = tempfile::tempdir().unwrap();

    let crawler = Crawler::new(test_config(addr, dir.path())).await.unwrap();
    let report = crawler.run().await;

    assert!(report.success, "crawl failed: {:?}", report.error);
    let folder = snapshot_folder(dir.path());

    for artifact in ["screenshot.png", "printout.pdf", "content.html"] {
        let meta = std::fs::metadata(folder.join(artifact))
            .unwrap_or_else(|_| panic!("{artifact} missing"));
        assert!(meta.len() > 0, "{artifact} is empty");
    }

    let html = std::fs::read_to_string(folder.join("content.html")).unwrap();
    assert!(html.contains("hello"));
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_navigation_failure_writes_no_page_artifacts() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    // A server that accepts and never responds, so navigation cannot settle.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut open = Vec::new();
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            open.push(socket);
        }
    });

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(addr, dir.path());
    config.timeout_ms = 3_000;

    let crawler = Crawler::new(config).await.unwrap();
    let report = crawler.run().await;

    assert!(!report.success);
    assert!(report.error.is_some());
    let folder = snapshot_folder(dir.path());
    for artifact in ["screenshot.png", "printout.pdf", "content.html"] {
        assert!(
            !folder.join(artifact).exists(),
            "{artifact} should not exist"
        );
    }
}
