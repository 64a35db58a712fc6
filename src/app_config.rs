//! Configuration file loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Upper bound accepted for `fetch_retries`.
const MAX_FETCH_RETRIES: u32 = 10;

/// File configuration; every key is optional and CLI flags win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Transfer database location.
    pub database_path: Option<PathBuf>,
    /// Directory payloads are written into.
    pub download_dir: Option<PathBuf>,
    /// aria2 JSON-RPC endpoint.
    pub aria2_rpc_url: Option<String>,
    /// aria2 `--rpc-secret`.
    pub aria2_rpc_secret: Option<String>,
    /// Retry budget for catalog fetches.
    pub fetch_retries: Option<u32>,
    /// Default verbosity mode.
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Validates values against runtime constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(retries) = self.fetch_retries
            && retries > MAX_FETCH_RETRIES
        {
            bail!(
                "Invalid config value for `fetch_retries`: {retries}. Expected range: 0..={MAX_FETCH_RETRIES}"
            );
        }
        if let Some(url) = &self.aria2_rpc_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            bail!("Invalid config value for `aria2_rpc_url`: '{url}'. Expected an http(s) URL");
        }
        Ok(())
    }
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Returns the stable string label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Verbose => "verbose",
            Self::Quiet => "quiet",
            Self::Debug => "debug",
        }
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/gamegrab/config.toml`
/// 2. `$HOME/.config/gamegrab/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    Some(app_dir_from_env("XDG_CONFIG_HOME", ".config")?.join("config.toml"))
}

/// Resolves the default transfer database path.
///
/// Priority:
/// 1. `$XDG_DATA_HOME/gamegrab/transfers.db`
/// 2. `$HOME/.local/share/gamegrab/transfers.db`
/// 3. `./transfers.db`
#[must_use]
pub fn resolve_default_database_path() -> PathBuf {
    app_dir_from_env("XDG_DATA_HOME", ".local/share")
        .map_or_else(|| PathBuf::from("transfers.db"), |dir| dir.join("transfers.db"))
}

fn app_dir_from_env(xdg_var: &str, home_fallback: &str) -> Option<PathBuf> {
    if let Some(base) = env_var_non_empty_os(xdg_var) {
        return Some(PathBuf::from(base).join("gamegrab"));
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(PathBuf::from(home).join(home_fallback).join("gamegrab"))
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from `explicit` if given (must exist), otherwise from the
/// default path if a file is there.
pub fn load_file_config(explicit: Option<&Path>) -> Result<FileConfig> {
    if let Some(path) = explicit {
        return read_file_config(path);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => read_file_config(&path),
        _ => Ok(FileConfig::default()),
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "database_path" => {
                cfg.database_path =
                    Some(PathBuf::from(parse_string_literal(value).with_context(invalid)?));
            }
            "download_dir" => {
                cfg.download_dir =
                    Some(PathBuf::from(parse_string_literal(value).with_context(invalid)?));
            }
            "aria2_rpc_url" => {
                cfg.aria2_rpc_url = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "aria2_rpc_secret" => {
                cfg.aria2_rpc_secret = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "fetch_retries" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                let n = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("fetch_retries out of range for u32"))
                    .with_context(invalid)?;
                cfg.fetch_retries = Some(n);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!("Invalid `verbosity` value '{parsed}' on line {line_no}")
                })?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_all_fields() {
        let cfg = parse_config_str(
            r#"
database_path = "/var/lib/gamegrab/transfers.db"
download_dir = "/srv/games"   # payloads
aria2_rpc_url = "http://127.0.0.1:6800/jsonrpc"
aria2_rpc_secret = "s3cr#t"
fetch_retries = 4
verbosity = "verbose"
"#,
        )
        .expect("full config should parse");
        assert_eq!(
            cfg.database_path,
            Some(PathBuf::from("/var/lib/gamegrab/transfers.db"))
        );
        assert_eq!(cfg.download_dir, Some(PathBuf::from("/srv/games")));
        assert_eq!(cfg.aria2_rpc_secret.as_deref(), Some("s3cr#t"));
        assert_eq!(cfg.fetch_retries, Some(4));
        assert_eq!(cfg.verbosity, Some(VerbositySetting::Verbose));
    }

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str("fetch_retries = 0").expect("partial config should parse");
        assert_eq!(cfg.fetch_retries, Some(0));
        assert!(cfg.download_dir.is_none());
    }

    #[test]
    fn test_parse_config_rejects_out_of_range_retries() {
        let err = parse_config_str("fetch_retries = 11").expect_err("range error expected");
        assert!(err.to_string().contains("fetch_retries"));
    }

    #[test]
    fn test_parse_config_rejects_non_http_rpc_url() {
        let err = parse_config_str(r#"aria2_rpc_url = "ws://localhost:6800/jsonrpc""#)
            .expect_err("scheme error expected");
        assert!(err.to_string().contains("aria2_rpc_url"));
    }

    #[test]
    fn test_parse_config_rejects_unquoted_strings() {
        let err = parse_config_str("download_dir = /srv/games").expect_err("quote error expected");
        assert!(err.to_string().contains("download_dir"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let err = parse_config_str("concurrency = 4").expect_err("unknown key error expected");
        assert!(err.to_string().contains("Unknown configuration key"));
    }

    #[test]
    fn test_parse_config_rejects_missing_equals() {
        let err = parse_config_str("verbosity").expect_err("syntax error expected");
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_explicit_config_path_must_exist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.toml");
        assert!(load_file_config(Some(&missing)).is_err());

        let present = dir.path().join("config.toml");
        fs::write(&present, "fetch_retries = 3\n").expect("write config");
        let cfg = load_file_config(Some(&present)).expect("config should load");
        assert_eq!(cfg.fetch_retries, Some(3));
    }
}
