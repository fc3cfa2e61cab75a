use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the pagestash binary.
#[derive(Debug, Parser)]
#[command(
    name = "pagestash",
    version,
    about = "Full-page cache and asset minifier in front of an HTML origin"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PAGESTASH_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the caching proxy and the admin listener.
    Serve(Box<ServeArgs>),
    /// Delete stored pages, and optionally minified assets, then exit.
    Clear(ClearArgs),
    /// Delete every cache and remove the cache root directory.
    Purge(PurgeArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheRootOverride {
    /// Override the cache root directory.
    #[arg(long = "cache-root", value_name = "PATH")]
    pub cache_root: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ClearArgs {
    #[command(flatten)]
    pub cache: CacheRootOverride,

    /// Also delete minified CSS and JS files.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub all: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct PurgeArgs {
    #[command(flatten)]
    pub cache: CacheRootOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub cache: CacheRootOverride,

    /// Override the public listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the administrative listener host.
    #[arg(long = "server-admin-host", value_name = "HOST")]
    pub server_admin_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the administrative listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the public base URL of the site.
    #[arg(long = "site-base-url", value_name = "URL")]
    pub site_base_url: Option<String>,

    /// Override the directory asset sources are read from.
    #[arg(long = "site-root", value_name = "PATH")]
    pub site_root: Option<PathBuf>,

    /// Override the origin that cache misses are proxied to.
    #[arg(long = "upstream-url", value_name = "URL")]
    pub upstream_url: Option<String>,

    /// Toggle the page cache layer.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Toggle CSS/JS minification of stored pages.
    #[arg(
        long = "minify",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub minify_enabled: Option<bool>,
}
