//! Integration tests for the dashcache binary
//!
//! Runs the one-shot commands against temporary cache files.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::process::Command;
use std::thread;

use chrono::{Duration, Utc};
use dashcache::cache::{MetricsStore, CACHE_FILE_NAME};
use dashcache::data::{CachedMetrics, RevenueMetrics};
use tempfile::TempDir;

/// Helper to run the CLI with given args and capture output
fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_dashcache"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute dashcache")
}

fn cache_path(temp_dir: &TempDir) -> String {
    temp_dir
        .path()
        .join(CACHE_FILE_NAME)
        .to_string_lossy()
        .into_owned()
}

/// Runs `refresh` with only the Stripe source configured
fn run_refresh(stripe_url: &str, cache_file: &str) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_dashcache"))
        .args(["refresh", "--stripe-url", stripe_url, "--cache-file", cache_file])
        .env_remove("RUST_LOG")
        .env_remove("DASHCACHE_GOOGLE_ADS_URL")
        .env_remove("DASHCACHE_META_ADS_URL")
        .env_remove("DASHCACHE_CALENDLY_URL")
        .env_remove("DASHCACHE_SOURCE_TOKEN")
        .output()
        .expect("Failed to execute dashcache")
}

/// Answers a single HTTP request with a Stripe block and returns its URL
fn serve_stripe_once() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let port = listener.local_addr().expect("listener address").port();

    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
        let body = r#"{"grossRevenue":900.0,"refunded":0.0,"chargeCount":3,"currency":"usd"}"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes());
    });

    format!("http://127.0.0.1:{}/stripe", port)
}

#[test]
fn test_help_flag_exits_successfully() {
    let output = run_cli(&["--help"]);
    assert!(output.status.success(), "Expected --help to exit successfully");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("dashcache"), "Help should mention dashcache");
    assert!(stdout.contains("serve"), "Help should list the serve command");
    assert!(stdout.contains("status"), "Help should list the status command");
}

#[test]
fn test_status_without_cache_reports_miss() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = cache_path(&temp_dir);

    let output = run_cli(&["status", "--cache-file", &path]);

    assert!(!output.status.success(), "A cache miss should exit non-zero");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No cached data"), "stderr was: {}", stderr);
}

#[test]
fn test_status_prints_cached_metrics() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = cache_path(&temp_dir);

    let mut metrics = CachedMetrics::empty(Utc::now() - Duration::minutes(45));
    metrics.stripe = Some(RevenueMetrics {
        gross_revenue: 320.0,
        refunded: 0.0,
        charge_count: 2,
        currency: "usd".to_string(),
    });
    MetricsStore::with_path(&path)
        .write(&metrics)
        .expect("Seed write should succeed");

    let output = run_cli(&["status", "--cache-file", &path]);

    assert!(output.status.success());
    let body: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("status should print JSON");
    assert_eq!(body["timeSinceUpdate"], "45 minutes ago");
    assert_eq!(body["stripe"]["chargeCount"], 2);
}

#[test]
fn test_status_treats_corrupt_cache_as_miss() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = cache_path(&temp_dir);
    std::fs::write(&path, "not json").expect("Should write garbage");

    let output = run_cli(&["status", "--cache-file", &path]);

    assert!(!output.status.success());
}

#[test]
fn test_refresh_without_sources_leaves_cache_untouched() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = cache_path(&temp_dir);

    let output = Command::new(env!("CARGO_BIN_EXE_dashcache"))
        .args(["refresh", "--cache-file", &path])
        .env_remove("DASHCACHE_GOOGLE_ADS_URL")
        .env_remove("DASHCACHE_META_ADS_URL")
        .env_remove("DASHCACHE_CALENDLY_URL")
        .env_remove("DASHCACHE_STRIPE_URL")
        .output()
        .expect("Failed to execute dashcache");

    assert!(!output.status.success(), "Nothing fetched means no success");
    let body: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("refresh should print JSON");
    assert_eq!(body["persisted"]["status"], "skipped");
    assert!(!temp_dir.path().join(CACHE_FILE_NAME).exists());
}

#[test]
fn test_refresh_writes_fetched_metrics() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = cache_path(&temp_dir);

    let output = run_refresh(&serve_stripe_once(), &path);

    assert!(output.status.success(), "stderr was: {}", String::from_utf8_lossy(&output.stderr));
    let body: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("refresh should print JSON");
    assert_eq!(body["persisted"]["status"], "written");
    let cached = MetricsStore::with_path(&path).read().expect("cache should exist");
    assert_eq!(cached.stripe.map(|s| s.charge_count), Some(3));
}

#[test]
fn test_refresh_exits_non_zero_when_write_fails() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    // A regular file where the cache directory should be
    let blocker = temp_dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").expect("Should write blocker");
    let path = blocker.join(CACHE_FILE_NAME).to_string_lossy().into_owned();

    let output = run_refresh(&serve_stripe_once(), &path);

    assert!(!output.status.success(), "A failed write must not exit 0");
    let body: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("refresh should print JSON");
    assert_eq!(body["success"], true, "every source was fetched");
    assert_eq!(body["persisted"]["status"], "failed");
}

#[test]
fn test_trigger_without_server_fails() {
    // Port 9 (discard) on localhost is not expected to accept connections
    let output = run_cli(&[
        "trigger",
        "--url",
        "http://127.0.0.1:9",
        "--refresh-secret",
        "s3cret",
    ]);
    assert!(!output.status.success());
}

#[test]
fn test_zero_refresh_threshold_is_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = cache_path(&temp_dir);

    let output = run_cli(&["status", "--cache-file", &path, "--refresh-after-hours", "0"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("refresh-after-hours"), "stderr was: {}", stderr);
}

#[cfg(test)]
mod unit_tests {
    //! Unit tests for CLI parsing that don't require running the binary

    use clap::Parser;
    use dashcache::cli::{Cli, Command, ServiceConfig};
    use std::path::Path;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["dashcache"]).is_err());
    }

    #[test]
    fn test_cli_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["dashcache", "explode"]).is_err());
    }

    #[test]
    fn test_cli_serve_parses_bind_and_secret() {
        let cli = Cli::parse_from([
            "dashcache",
            "serve",
            "--bind",
            "0.0.0.0:9000",
            "--refresh-secret",
            "hunter2",
        ]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve command");
        };
        assert_eq!(args.bind.port(), 9000);
        assert_eq!(args.refresh_secret.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_cli_serve_rejects_bad_bind_address() {
        assert!(Cli::try_parse_from(["dashcache", "serve", "--bind", "not-an-addr"]).is_err());
    }

    #[test]
    fn test_service_config_from_cli_with_cache_file() {
        let cli = Cli::parse_from(["dashcache", "--cache-file", "/tmp/x/metrics.json", "status"]);
        let config = ServiceConfig::from_cli(&cli).expect("config should build");
        assert_eq!(config.store.path(), Path::new("/tmp/x/metrics.json"));
    }
}
