use anyhow::Result;
use std::time::Duration;
use tempfile::TempDir;
use telepoll::config::{TOKEN_ENV, WATCHDOG_FACTOR};
use telepoll::{BotConfig, MemoryConnection, Regime, TelegramBot};

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, body).expect("write config");
    path
}

// ══════════════════════════════════════════════════════════════════
// Gate 1: loading from disk
// ══════════════════════════════════════════════════════════════════

#[test]
fn gate1_load_full_file() -> Result<()> {
    let tmp = TempDir::new()?;
    let path = write_config(
        &tmp,
        r#"
token = "77:file-token"
poll_interval_ms = 1000
long_poll_timeout_secs = 20
allowed_updates = ["message", "callback_query"]
fallback_address = "149.154.167.220"
regime = "inline"
upload_chunk_bytes = 1024
"#,
    );

    let config = BotConfig::load(&path)?;
    assert_eq!(config.poll_interval(), Duration::from_secs(1));
    assert_eq!(config.watchdog_interval(), Duration::from_secs(WATCHDOG_FACTOR as u64));
    assert_eq!(config.long_poll_timeout_secs, 20);
    assert_eq!(config.regime, Regime::Inline);
    assert_eq!(config.upload_chunk(), 1024);
    assert_eq!(config.endpoints().len(), 2);
    Ok(())
}

#[test]
fn gate1_invalid_file_lists_every_problem() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(
        &tmp,
        "token = \"nocolon\"\nfallback_address = \"nowhere\"\nmax_payload_bytes = 10\n",
    );

    let err = BotConfig::load(&path).unwrap_err().to_string();
    assert!(err.contains("bot config errors"));
    assert!(err.contains("fallback_address"));
    assert!(err.contains("max_payload_bytes"));
}

#[test]
fn gate1_malformed_toml_names_the_file() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(&tmp, "token = [unclosed\n");

    let err = BotConfig::load(&path).unwrap_err().to_string();
    assert!(err.contains("invalid bot config"));
    assert!(err.contains("config.toml"));
}

#[test]
fn gate1_insecure_and_fingerprint_conflict() {
    let config = BotConfig {
        tls: telepoll::config::TlsConfig {
            insecure: true,
            fingerprint: Some("ab".repeat(32)),
            ca_cert_path: None,
        },
        ..BotConfig::with_token("1:a")
    };
    let errors = config.validate().unwrap_err();
    assert!(errors.iter().any(|e| e.contains("mutually exclusive")));
}

// ══════════════════════════════════════════════════════════════════
// Gate 2: environment override
// ══════════════════════════════════════════════════════════════════

#[test]
fn gate2_env_token_wins_over_file() -> Result<()> {
    let tmp = TempDir::new()?;
    let path = write_config(&tmp, "poll_interval_ms = 600\n");

    std::env::set_var(TOKEN_ENV, "  99:from-env  ");
    let loaded = BotConfig::load(&path);
    std::env::remove_var(TOKEN_ENV);

    let config = loaded?;
    assert_eq!(config.token, "99:from-env");
    assert_eq!(config.poll_interval(), Duration::from_millis(600));
    Ok(())
}

#[test]
fn gate2_default_path_is_under_config_dir() {
    if let Some(path) = BotConfig::default_path() {
        assert!(path.ends_with("config.toml"));
    }
}

// ══════════════════════════════════════════════════════════════════
// Gate 3: regime resolution
// ══════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "current_thread")]
async fn gate3_auto_is_inline_on_current_thread() {
    let (conn, _remote) = MemoryConnection::pair();
    let bot = TelegramBot::new(BotConfig::with_token("1:a"), Box::new(conn));
    assert_eq!(bot.regime(), Regime::Inline);
    assert!(bot.is_transmitter_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gate3_explicit_inline_on_multi_thread() {
    let (conn, _remote) = MemoryConnection::pair();
    let config = BotConfig {
        regime: Regime::Inline,
        ..BotConfig::with_token("1:a")
    };
    let bot = TelegramBot::new(config, Box::new(conn));
    assert_eq!(bot.regime(), Regime::Inline);
}
