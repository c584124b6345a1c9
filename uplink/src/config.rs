//! Config loader (C11): a JSON file's `"uplink"` object, with CLI flags (or
//! `UPLINK_*` environment variables, via `clap`'s `env` attribute) taking
//! precedence over whatever the file set — the teacher's `load_config`
//! convention of CLI-overrides-file (see `yahoo_logic::config::load_config`),
//! generalized from "file or CLI" to "file, then CLI/env on top".

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// `"index"` identifies a network interface either by its numeric index or
/// by name; the source JSON may carry either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InterfaceSelector {
    Index(u32),
    Name(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    pub token: String,
    pub index: Option<InterfaceSelector>,
    pub tag: Option<String>,
    pub certs_path: String,
    pub verify_certs: bool,
    pub reboot: bool,
    pub ws_logging: bool,
    pub serialize_ct: bool,
    pub log_dir: Option<PathBuf>,
    pub log_level: String,
    pub listen_port: Option<u16>,
}

impl Config {
    pub fn ws_url(&self) -> Result<String, ConfigError> {
        let url = url::Url::parse(&self.url).map_err(|e| ConfigError::InvalidField {
            field: "url",
            reason: e.to_string(),
        })?;
        let ws_scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(ConfigError::InvalidField {
                    field: "url",
                    reason: format!("unsupported scheme `{other}`"),
                })
            }
        };
        let authority = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
            None => url.host_str().unwrap_or_default().to_string(),
        };
        Ok(format!("{ws_scheme}://{authority}/dock"))
    }

    pub fn auth_url(&self) -> String {
        format!("{}/auth", self.url.trim_end_matches('/'))
    }
}

/// Command-line surface (C14). Every optional field doubles as an
/// `UPLINK_*`-prefixed environment variable override via `clap`'s `env`.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "uplink-agent")]
pub struct Cli {
    /// Path to a JSON config file carrying a top-level `"uplink"` object.
    #[arg(long, env = "UPLINK_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "UPLINK_URL")]
    pub url: Option<String>,
    #[arg(long, env = "UPLINK_TOKEN")]
    pub token: Option<String>,
    #[arg(long, env = "UPLINK_INDEX")]
    pub index: Option<String>,
    #[arg(long, env = "UPLINK_TAG")]
    pub tag: Option<String>,
    #[arg(long, env = "UPLINK_CERTS_PATH")]
    pub certs_path: Option<String>,
    #[arg(long, env = "UPLINK_VERIFY_CERTS")]
    pub verify_certs: Option<bool>,
    #[arg(long, env = "UPLINK_REBOOT")]
    pub reboot: Option<bool>,
    #[arg(long, env = "UPLINK_WS_LOGGING")]
    pub ws_logging: Option<bool>,
    #[arg(long, env = "UPLINK_SERIALIZE_CT")]
    pub serialize_ct: Option<bool>,

    #[arg(long, env = "UPLINK_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
    #[arg(long, env = "UPLINK_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
    #[arg(long, env = "UPLINK_LISTEN_PORT")]
    pub listen_port: Option<u16>,
}

/// The shape of the JSON file's `"uplink"` object; every field optional so
/// a partially-specified file is legal and CLI/env fill in the rest.
#[derive(Debug, Default, Deserialize)]
struct FileUplinkSection {
    url: Option<String>,
    token: Option<String>,
    index: Option<InterfaceSelector>,
    tag: Option<String>,
    certs_path: Option<String>,
    verify_certs: Option<bool>,
    reboot: Option<bool>,
    ws_logging: Option<bool>,
    serialize_ct: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    uplink: Option<FileUplinkSection>,
}

const DEFAULT_CERTS_PATH: &str = "/certs";

/// Load and resolve a [`Config`]: read `cli.config` (if set) for defaults,
/// then let every CLI/env field override the file's value, per §4.8's
/// resolution order. Missing `url`/`token` after merging is a hard error.
pub fn load(cli: &Cli) -> Result<Config, ConfigError> {
    let file = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            serde_json::from_str::<FileConfig>(&raw)?.uplink.unwrap_or_default()
        }
        None => FileUplinkSection::default(),
    };

    let url = cli.url.clone().or(file.url).ok_or(ConfigError::MissingField("url"))?;
    let token = cli.token.clone().or(file.token).ok_or(ConfigError::MissingField("token"))?;

    let index = match &cli.index {
        Some(raw) => Some(parse_interface_selector(raw)),
        None => file.index,
    };

    Ok(Config {
        url,
        token,
        index,
        tag: cli.tag.clone().or(file.tag),
        certs_path: cli
            .certs_path
            .clone()
            .or(file.certs_path)
            .unwrap_or_else(|| DEFAULT_CERTS_PATH.to_string()),
        verify_certs: cli.verify_certs.or(file.verify_certs).unwrap_or(true),
        reboot: cli.reboot.or(file.reboot).unwrap_or(true),
        ws_logging: cli.ws_logging.or(file.ws_logging).unwrap_or(true),
        serialize_ct: cli.serialize_ct.or(file.serialize_ct).unwrap_or(false),
        log_dir: cli.log_dir.clone(),
        log_level: cli.log_level.clone(),
        listen_port: cli.listen_port,
    })
}

fn parse_interface_selector(raw: &str) -> InterfaceSelector {
    match raw.parse::<u32>() {
        Ok(index) => InterfaceSelector::Index(index),
        Err(_) => InterfaceSelector::Name(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_required_fields_is_a_hard_error() {
        let cli = Cli::default();
        let err = load(&cli).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("url")));
    }

    #[test]
    fn file_supplies_defaults_cli_overrides_them() {
        let file = write_config(r#"{"uplink": {"url": "https://controller.example", "token": "file-token", "tag": "file-tag"}}"#);
        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            tag: Some("cli-tag".to_string()),
            ..Cli::default()
        };
        let config = load(&cli).unwrap();
        assert_eq!(config.url, "https://controller.example");
        assert_eq!(config.token, "file-token");
        assert_eq!(config.tag.as_deref(), Some("cli-tag"));
        assert!(config.reboot);
        assert_eq!(config.certs_path, DEFAULT_CERTS_PATH);
    }

    #[test]
    fn ws_url_substitutes_scheme_and_path() {
        let cli = Cli {
            url: Some("https://controller.example:9443".to_string()),
            token: Some("t".to_string()),
            ..Cli::default()
        };
        let config = load(&cli).unwrap();
        assert_eq!(config.ws_url().unwrap(), "wss://controller.example:9443/dock");
        assert_eq!(config.auth_url(), "https://controller.example:9443/auth");
    }

    #[test]
    fn interface_selector_parses_numeric_or_name() {
        let by_name = Cli {
            url: Some("http://x".to_string()),
            token: Some("t".to_string()),
            index: Some("eth0".to_string()),
            ..Cli::default()
        };
        assert_eq!(load(&by_name).unwrap().index, Some(InterfaceSelector::Name("eth0".to_string())));

        let by_index = Cli {
            url: Some("http://x".to_string()),
            token: Some("t".to_string()),
            index: Some("2".to_string()),
            ..Cli::default()
        };
        assert_eq!(load(&by_index).unwrap().index, Some(InterfaceSelector::Index(2)));
    }
}
