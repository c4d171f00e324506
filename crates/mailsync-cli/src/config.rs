use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use mailsync_core::StoreConfig;
use mailsync_mail::ImapConfig;

#[derive(Debug)]
pub(crate) struct AppConfig {
    pub(crate) imap: ImapConfig,
    pub(crate) store: StoreConfig,
}

fn xdg_config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn config_path_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("mailsync.toml"),
        xdg_config_dir().join("mailsync").join("mailsync.toml"),
    ]
}

/// Reads `explicit` if given, otherwise the first default location that exists.
pub(crate) fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let (path, text) = match explicit {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            (path.to_path_buf(), text)
        }
        None => config_path_candidates()
            .into_iter()
            .find_map(|path| std::fs::read_to_string(&path).ok().map(|text| (path, text)))
            .ok_or_else(|| anyhow!("no mailsync.toml found"))?,
    };
    parse_config(&text).with_context(|| format!("in {}", path.display()))
}

pub(crate) fn parse_config(text: &str) -> Result<AppConfig> {
    let value: toml::Value = toml::from_str(text)?;
    let imap = value
        .get("imap")
        .ok_or_else(|| anyhow!("missing [imap] table"))?;
    let imap = parse_imap_table(imap)
        .ok_or_else(|| anyhow!("[imap] needs address, username and password"))?;
    let store = match value.get("store") {
        Some(store) => parse_store_table(store),
        None => StoreConfig::sqlite("mailsync.db"),
    };
    Ok(AppConfig { imap, store })
}

fn parse_imap_table(imap: &toml::Value) -> Option<ImapConfig> {
    let mut config = ImapConfig::new(
        imap.get("address")?.as_str()?,
        imap.get("username")?.as_str()?,
        imap.get("password")?.as_str()?,
        imap.get("tls").and_then(|v| v.as_bool()).unwrap_or(true),
    );
    config.skip_tls_verify = imap
        .get("skip_tls_verify")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if let Some(secs) = imap.get("timeout_secs").and_then(|v| v.as_integer()) {
        // 0 disables the deadline.
        config.timeout = (secs > 0).then(|| Duration::from_secs(secs as u64));
    }
    if let Some(retries) = imap.get("connect_retries").and_then(|v| v.as_integer()) {
        config.connect_retries = retries.clamp(0, 10) as u32;
    }
    if let Some(ms) = imap.get("retry_backoff_ms").and_then(|v| v.as_integer()) {
        config.retry_backoff = Duration::from_millis(ms.max(0) as u64);
    }
    if let Some(size) = imap.get("fetch_chunk_size").and_then(|v| v.as_integer()) {
        config.fetch_chunk_size = size.max(1) as usize;
    }
    Some(config)
}

fn parse_store_table(store: &toml::Value) -> StoreConfig {
    let text = |key: &str| {
        store
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let port = match store.get("port") {
        Some(toml::Value::Integer(port)) => port.to_string(),
        Some(toml::Value::String(port)) => port.clone(),
        _ => String::new(),
    };
    let driver = text("driver");
    StoreConfig {
        driver: if driver.is_empty() {
            "sqlite".to_string()
        } else {
            driver
        },
        user: text("user"),
        pass: text("pass"),
        name: text("name"),
        host: text("host"),
        port,
        params: text("params"),
    }
}
