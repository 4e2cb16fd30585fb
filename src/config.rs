use crate::connection::ConnectionOptions;
use crate::controls::SyncMode;
use crate::cookie::{CookieManager, FileCookieManager, InMemoryCookieManager};
use crate::protocol::{SearchRequest, SearchScope};
use crate::referral::DEFAULT_REFERRAL_LIMIT;
use crate::sync::RunnerSettings;
use crate::tls;
use crate::url::LdapUrl;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub referral: ReferralConfig,
    #[serde(default)]
    pub paging: PagingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// `ldap://host:port` or `ldaps://host:port`.
    pub url: String,
    pub bind_dn: Option<String>,
    pub bind_password: Option<String>,
    /// Connect timeout in seconds (default 5).
    pub connect_timeout_sec: Option<u64>,
    /// Largest accepted server message in bytes (default 16 MiB).
    pub max_message_size: Option<usize>,
    /// For ldaps://: do not verify the server certificate (tests and internal networks only).
    pub tls_skip_verify: Option<bool>,
    /// For ldaps://: PEM CA bundle trusted in addition to the system roots.
    pub tls_ca_file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeConfig {
    Base,
    One,
    #[default]
    Sub,
}

impl From<ScopeConfig> for SearchScope {
    fn from(scope: ScopeConfig) -> Self {
        match scope {
            ScopeConfig::Base => SearchScope::BaseObject,
            ScopeConfig::One => SearchScope::SingleLevel,
            ScopeConfig::Sub => SearchScope::WholeSubtree,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub base: String,
    #[serde(default)]
    pub scope: ScopeConfig,
    /// Default `(objectClass=*)`.
    pub filter: Option<String>,
    #[serde(default)]
    pub attributes: Vec<String>,
    pub size_limit: Option<i32>,
    pub time_limit: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncModeConfig {
    RefreshOnly,
    #[default]
    RefreshAndPersist,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub mode: SyncModeConfig,
    /// Where the sync cookie is kept between runs; in memory when unset.
    pub cookie_file: Option<String>,
    pub reload_hint: Option<bool>,
    /// First reconnect delay in milliseconds (default 1000), doubled per failed attempt.
    pub reconnect_delay_ms: Option<u64>,
    /// Reconnect delay cap in milliseconds (default 30000).
    pub max_reconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferralConfig {
    /// Most referral hops per response (default 10).
    pub limit: Option<u32>,
    /// Fail instead of returning the unresolved referral when a hop fails (default false).
    pub throw_on_failure: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PagingConfig {
    /// Default 100.
    pub page_size: Option<i32>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        Self::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.url()?;
        Ok(config)
    }

    pub fn url(&self) -> Result<LdapUrl> {
        self.connection
            .url
            .parse()
            .with_context(|| format!("invalid connection url '{}'", self.connection.url))
    }

    pub fn connection_options(&self) -> Result<ConnectionOptions> {
        let conn = &self.connection;
        let defaults = ConnectionOptions::default();
        let tls = if self.url()?.secure {
            let ca_file = conn.tls_ca_file.as_deref().map(Path::new);
            Some(tls::load_client_config(conn.tls_skip_verify.unwrap_or(false), ca_file).context("loading TLS settings")?)
        } else {
            None
        };
        let bind = match (&conn.bind_dn, &conn.bind_password) {
            (Some(dn), password) => Some((dn.clone(), password.clone().unwrap_or_default())),
            (None, _) => None,
        };
        Ok(ConnectionOptions {
            connect_timeout: conn
                .connect_timeout_sec
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            max_message_size: conn.max_message_size.unwrap_or(defaults.max_message_size),
            auto_read: true,
            tls,
            bind,
        })
    }

    pub fn search_request(&self) -> SearchRequest {
        let search = &self.search;
        let filter = search.filter.as_deref().unwrap_or("(objectClass=*)");
        let mut request =
            SearchRequest::new(search.base.as_str(), search.scope.into(), filter).with_attributes(search.attributes.iter().cloned());
        request.size_limit = search.size_limit.unwrap_or(0);
        request.time_limit = search.time_limit.unwrap_or(0);
        request
    }

    pub fn sync_mode(&self) -> SyncMode {
        match self.sync.mode {
            SyncModeConfig::RefreshOnly => SyncMode::RefreshOnly,
            SyncModeConfig::RefreshAndPersist => SyncMode::RefreshAndPersist,
        }
    }

    pub fn cookie_manager(&self) -> Arc<dyn CookieManager> {
        match self.sync.cookie_file {
            Some(ref path) => Arc::new(FileCookieManager::new(path)),
            None => Arc::new(InMemoryCookieManager::new()),
        }
    }

    pub fn runner_settings(&self) -> Result<RunnerSettings> {
        let mut settings = RunnerSettings::new(self.url()?, self.search_request());
        settings.reconnect_delay = Duration::from_millis(self.sync.reconnect_delay_ms.unwrap_or(1000));
        settings.max_reconnect_delay = Duration::from_millis(self.sync.max_reconnect_delay_ms.unwrap_or(30_000));
        if settings.max_reconnect_delay < settings.reconnect_delay {
            settings.max_reconnect_delay = settings.reconnect_delay;
        }
        Ok(settings)
    }

    pub fn referral_limit(&self) -> u32 {
        self.referral.limit.unwrap_or(DEFAULT_REFERRAL_LIMIT)
    }

    pub fn page_size(&self) -> i32 {
        self.paging.page_size.unwrap_or(100)
    }
}
