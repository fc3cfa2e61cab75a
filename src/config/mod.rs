//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::CommandMinifier;

mod cli;

pub use cli::{
    CacheRootOverride, ClearArgs, CliArgs, Command, PurgeArgs, ServeArgs, ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pagestash";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_SITE_BASE_URL: &str = "http://127.0.0.1:3000/";
const DEFAULT_SITE_ROOT: &str = "public";
const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CACHE_ROOT: &str = "cache/pagestash";
const DEFAULT_MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;
const DEFAULT_SETTINGS_PATH: &str = "/settings";
const DEFAULT_ADMIN_PATH_PREFIX: &str = "/admin";
const DEFAULT_SESSION_COOKIE_PREFIX: &str = "session";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub site: SiteSettings,
    pub upstream: UpstreamSettings,
    pub cache: CacheSettings,
    pub minify: MinifySettings,
    pub privilege: PrivilegeSettings,
    pub admin: AdminSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    /// Always ends with `/`.
    pub base_url: String,
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub url: Url,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub root: PathBuf,
    pub enabled: bool,
    pub minify_enabled: bool,
    /// Always ends with `/`.
    pub asset_base_url: String,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MinifySettings {
    pub css_command: Option<CommandMinifier>,
    pub js_command: Option<CommandMinifier>,
}

#[derive(Debug, Clone)]
pub struct PrivilegeSettings {
    pub admin_path_prefixes: Vec<String>,
    pub session_cookie_prefixes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AdminSettings {
    pub settings_path: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("PAGESTASH")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("privilege.admin_path_prefixes")
            .with_list_parse_key("privilege.session_cookie_prefixes")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Clear(args)) => raw.apply_cache_root_override(&args.cache),
        Some(Command::Purge(args)) => raw.apply_cache_root_override(&args.cache),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    site: RawSiteSettings,
    upstream: RawUpstreamSettings,
    cache: RawCacheSettings,
    minify: RawMinifySettings,
    privilege: RawPrivilegeSettings,
    admin: RawAdminSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.site_base_url.as_ref() {
            self.site.base_url = Some(url.clone());
        }
        if let Some(root) = overrides.site_root.as_ref() {
            self.site.root = Some(root.clone());
        }
        if let Some(url) = overrides.upstream_url.as_ref() {
            self.upstream.url = Some(url.clone());
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(enabled) = overrides.minify_enabled {
            self.cache.minify_enabled = Some(enabled);
        }

        self.apply_cache_root_override(&overrides.cache);
    }

    fn apply_cache_root_override(&mut self, overrides: &CacheRootOverride) {
        if let Some(root) = overrides.cache_root.as_ref() {
            self.cache.root = Some(root.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            site,
            upstream,
            cache,
            minify,
            privilege,
            admin,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let site = build_site_settings(site)?;
        let upstream = build_upstream_settings(upstream)?;
        let cache = build_cache_settings(cache, &site)?;
        let minify = build_minify_settings(minify)?;
        let privilege = build_privilege_settings(privilege);
        let admin = build_admin_settings(admin)?;

        Ok(Self {
            server,
            logging,
            site,
            upstream,
            cache,
            minify,
            privilege,
            admin,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        public_addr,
        admin_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let base_url = site
        .base_url
        .unwrap_or_else(|| DEFAULT_SITE_BASE_URL.to_string());
    let base_url = normalize_base_url(&base_url, "site.base_url")?;

    let root = site.root.unwrap_or_else(|| PathBuf::from(DEFAULT_SITE_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("site.root", "path must not be empty"));
    }

    Ok(SiteSettings { base_url, root })
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let raw_url = upstream
        .url
        .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string());
    let url = Url::parse(raw_url.trim())
        .map_err(|err| LoadError::invalid("upstream.url", format!("failed to parse: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "upstream.url",
            format!("unsupported scheme `{}`", url.scheme()),
        ));
    }

    let timeout_secs = upstream
        .timeout_seconds
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "upstream.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(UpstreamSettings {
        url,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_cache_settings(
    cache: RawCacheSettings,
    site: &SiteSettings,
) -> Result<CacheSettings, LoadError> {
    let root = cache
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("cache.root", "path must not be empty"));
    }

    let asset_base_url = match cache.asset_base_url {
        Some(url) => normalize_base_url(&url, "cache.asset_base_url")?,
        None => site.base_url.clone(),
    };

    let max_body_bytes = cache.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
    if max_body_bytes == 0 {
        return Err(LoadError::invalid(
            "cache.max_body_bytes",
            "must be greater than zero",
        ));
    }
    let max_body_bytes = usize::try_from(max_body_bytes).map_err(|_| {
        LoadError::invalid(
            "cache.max_body_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(CacheSettings {
        root,
        enabled: cache.enabled.unwrap_or(true),
        minify_enabled: cache.minify_enabled.unwrap_or(false),
        asset_base_url,
        max_body_bytes,
    })
}

fn build_minify_settings(minify: RawMinifySettings) -> Result<MinifySettings, LoadError> {
    Ok(MinifySettings {
        css_command: parse_command(minify.css_command, "minify.css_command")?,
        js_command: parse_command(minify.js_command, "minify.js_command")?,
    })
}

fn parse_command(
    value: Option<String>,
    key: &'static str,
) -> Result<Option<CommandMinifier>, LoadError> {
    match value {
        None => Ok(None),
        Some(line) => CommandMinifier::parse(&line)
            .map(Some)
            .ok_or_else(|| LoadError::invalid(key, "command must not be empty")),
    }
}

fn build_privilege_settings(privilege: RawPrivilegeSettings) -> PrivilegeSettings {
    PrivilegeSettings {
        admin_path_prefixes: privilege
            .admin_path_prefixes
            .unwrap_or_else(|| vec![DEFAULT_ADMIN_PATH_PREFIX.to_string()]),
        session_cookie_prefixes: privilege
            .session_cookie_prefixes
            .unwrap_or_else(|| vec![DEFAULT_SESSION_COOKIE_PREFIX.to_string()]),
    }
}

fn build_admin_settings(admin: RawAdminSettings) -> Result<AdminSettings, LoadError> {
    let settings_path = admin
        .settings_path
        .unwrap_or_else(|| DEFAULT_SETTINGS_PATH.to_string());
    if !settings_path.starts_with('/') {
        return Err(LoadError::invalid(
            "admin.settings_path",
            "must start with `/`",
        ));
    }

    Ok(AdminSettings { settings_path })
}

/// Parse an absolute http(s) URL and make sure it ends with `/`.
fn normalize_base_url(value: &str, key: &'static str) -> Result<String, LoadError> {
    let url = Url::parse(value.trim())
        .map_err(|err| LoadError::invalid(key, format!("failed to parse: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{}`", url.scheme()),
        ));
    }

    let mut normalized = url.to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Ok(normalized)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    base_url: Option<String>,
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    url: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    root: Option<PathBuf>,
    enabled: Option<bool>,
    minify_enabled: Option<bool>,
    asset_base_url: Option<String>,
    max_body_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMinifySettings {
    css_command: Option<String>,
    js_command: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPrivilegeSettings {
    admin_path_prefixes: Option<Vec<String>>,
    session_cookie_prefixes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAdminSettings {
    settings_path: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

#[cfg(test)]
mod tests;
