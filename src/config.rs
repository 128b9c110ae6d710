use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  #[serde(default)]
  pub backup: BackupConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub points: PointsConfig,
  /// Where the outbox, cache and logs live (defaults to $XDG_DATA_HOME/loyalty-sync)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Base URL of the document store REST API
  pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Base URL of the spreadsheet API
  pub base_url: Option<String>,
  pub spreadsheet_id: Option<String>,
}

impl Default for BackupConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      base_url: None,
      spreadsheet_id: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Version tag shared by every cache namespace; bump to invalidate all of them
  #[serde(default = "default_cache_version")]
  pub version: String,
  /// Origin the application is served from; relative manifest paths resolve against it
  #[serde(default = "default_origin")]
  pub origin: String,
  /// Critical assets pre-cached on install
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
  /// Landing page served when a navigation fails
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
  #[serde(default = "default_network_timeout_secs")]
  pub network_timeout_secs: u64,
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  #[serde(default = "default_auth_hosts")]
  pub auth_hosts: Vec<String>,
  #[serde(default = "default_document_store_hosts")]
  pub document_store_hosts: Vec<String>,
  /// Base URLs routed as document-store traffic regardless of host
  #[serde(default)]
  pub document_store_urls: Vec<String>,
  #[serde(default = "default_font_hosts")]
  pub font_hosts: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      version: default_cache_version(),
      origin: default_origin(),
      manifest: default_manifest(),
      offline_page: default_offline_page(),
      network_timeout_secs: default_network_timeout_secs(),
      api_prefix: default_api_prefix(),
      auth_hosts: default_auth_hosts(),
      document_store_hosts: default_document_store_hosts(),
      document_store_urls: Vec::new(),
      font_hosts: default_font_hosts(),
    }
  }
}

impl CacheConfig {
  pub fn network_timeout(&self) -> Duration {
    Duration::from_secs(self.network_timeout_secs)
  }

  pub fn origin_url(&self) -> Result<url::Url> {
    url::Url::parse(&self.origin).map_err(|e| eyre!("Invalid cache origin '{}': {}", self.origin, e))
  }

  /// Resolve a manifest entry or page path against the origin.
  pub fn resolve(&self, path: &str) -> Result<url::Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid cache path '{}': {}", path, e))
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// How often the sync service reports pending items
  #[serde(default = "default_poll_interval_secs")]
  pub poll_interval_secs: u64,
  /// URL probed to detect connectivity; defaults to the remote base URL
  pub probe_url: Option<String>,
  #[serde(default = "default_probe_interval_secs")]
  pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      poll_interval_secs: default_poll_interval_secs(),
      probe_url: None,
      probe_interval_secs: default_probe_interval_secs(),
    }
  }
}

/// Local copy of the earning rates, used when the remote `config/points`
/// document cannot be read.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct PointsConfig {
  #[serde(default = "default_trade_rate")]
  pub trade_rate: f64,
  #[serde(default = "default_non_trade_rate")]
  pub non_trade_rate: f64,
}

impl Default for PointsConfig {
  fn default() -> Self {
    Self {
      trade_rate: default_trade_rate(),
      non_trade_rate: default_non_trade_rate(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_cache_version() -> String {
  "v1".to_string()
}

fn default_origin() -> String {
  "http://localhost:3000/".to_string()
}

fn default_manifest() -> Vec<String> {
  [
    "/",
    "/index.html",
    "/offline.html",
    "/manifest.json",
    "/favicon.ico",
    "/logo192.png",
    "/logo512.png",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

fn default_offline_page() -> String {
  "/offline.html".to_string()
}

fn default_network_timeout_secs() -> u64 {
  3
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

fn default_auth_hosts() -> Vec<String> {
  vec![
    "identitytoolkit.googleapis.com".to_string(),
    "securetoken.googleapis.com".to_string(),
  ]
}

fn default_document_store_hosts() -> Vec<String> {
  vec!["firestore.googleapis.com".to_string()]
}

fn default_font_hosts() -> Vec<String> {
  vec![
    "fonts.googleapis.com".to_string(),
    "fonts.gstatic.com".to_string(),
  ]
}

fn default_poll_interval_secs() -> u64 {
  30
}

fn default_probe_interval_secs() -> u64 {
  10
}

fn default_trade_rate() -> f64 {
  2.0
}

fn default_non_trade_rate() -> f64 {
  1.0
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./loyalty-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/loyalty-sync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/loyalty-sync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("loyalty-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("loyalty-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Cache settings the engine runs with: the remote store's base URL is
  /// always routed as document-store traffic, whatever its host.
  pub fn cache_routing(&self) -> CacheConfig {
    let mut cache = self.cache.clone();
    if !cache.document_store_urls.contains(&self.remote.base_url) {
      cache.document_store_urls.push(self.remote.base_url.clone());
    }
    cache
  }

  /// Bearer token for the remote document store.
  ///
  /// Checks LOYALTY_REMOTE_TOKEN. A missing token is allowed for local
  /// emulators, so this returns `None` instead of failing.
  pub fn remote_token() -> Option<String> {
    std::env::var("LOYALTY_REMOTE_TOKEN").ok()
  }

  /// Bearer token for the backup spreadsheet API.
  pub fn backup_token() -> Result<String> {
    std::env::var("LOYALTY_BACKUP_TOKEN")
      .map_err(|_| eyre!("Backup token not found. Set LOYALTY_BACKUP_TOKEN environment variable."))
  }
}
