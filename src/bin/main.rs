use std::path::PathBuf;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use snapcrawl::{CrawlConfig, Crawler};

#[derive(Parser)]
#[command(name = "snapcrawl")]
#[command(about = "Headless-Chrome crawl that snapshots a fingerprinting test site")]
#[command(version)]
struct Cli {
    /// Config file to run (YAML); defaults are the standard crawl
    config: Option<PathBuf>,

    /// Proxy address (overrides config)
    #[arg(long, value_name = "HOST:PORT")]
    proxy: Option<String>,

    /// Connect directly, ignoring any configured proxy
    #[arg(long, conflicts_with = "proxy")]
    no_proxy: bool,

    /// Run headful with devtools open
    #[arg(long)]
    debug_browser: bool,

    /// Navigation timeout in milliseconds (overrides config)
    #[arg(long, value_name = "MS")]
    timeout: Option<u64>,

    /// Directory snapshot folders are created under (overrides config)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Verbose output (-v for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,

    /// Validate config without running
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> snapcrawl::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    let mut config = match &cli.config {
        Some(path) => CrawlConfig::load(path)?,
        None => CrawlConfig::default(),
    };

    if let Some(proxy) = cli.proxy {
        config.proxy = Some(proxy);
    }
    if cli.no_proxy {
        config.proxy = None;
    }
    if cli.debug_browser {
        config.debug = true;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_ms = timeout;
    }
    if let Some(output) = cli.output {
        config.snapshot_root = output;
    }
    config.validate()?;

    if cli.check {
        println!("Config valid");
        println!("  Target: {}", config.target_url);
        println!("  Fingerprint endpoint: {}", config.fingerprint_url);
        println!("  Analysis endpoint: {}", config.analysis_url);
        match &config.proxy {
            Some(proxy) => println!("  Proxy: {proxy}"),
            None => println!("  Proxy: none"),
        }
        println!("  Timeout: {}ms", config.timeout_ms);
        return Ok(());
    }

    let crawler = Crawler::new(config).await?;
    let report = crawler.run().await;

    println!();
    if report.success {
        println!("✓ Success");
    } else {
        println!("✗ Failed");
        if let Some(ref error) = report.error {
            println!("  Error: {error}");
        }
    }
    println!("  Run: {}", report.crawl_id);
    println!("  Snapshots: {}", report.snapshot_folder.display());
    for (file, count) in &report.captures.saved {
        println!("  {file}: {count} save(s)");
    }
    println!("  Duration: {}ms", report.duration_ms);

    if !report.success {
        std::process::exit(1);
    }

    Ok(())
}
