use crate::{
    storage::{QuotaLimits, StoreKind},
    units::{format_bytes, format_duration, parse_byte_size, parse_duration},
};
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, path::PathBuf, time::Duration};

const ENV_PREFIX: &str = "PASTE_STORE_";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub site_url: String,
    /// How long a paste lives; zero disables expiry.
    pub lifetime: Duration,
    pub max_size: u64,
    pub max_number: usize,
    pub max_storage: u64,
    pub storage_dir: PathBuf,
    pub backend: StoreKind,
    pub report_interval: Duration,
    /// Deadline for streaming one paste response.
    pub read_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            site_url: "http://localhost:8080".into(),
            lifetime: Duration::from_secs(24 * 60 * 60),
            max_size: 1 << 20,
            max_number: 0,
            max_storage: 1 << 30,
            storage_dir: PathBuf::from("pastes"),
            backend: StoreKind::File,
            report_interval: Duration::from_secs(60),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Time-limited paste store")]
pub struct Args {
    /// Host to bind to (overrides PASTE_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PASTE_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Public URL prefix for paste links (overrides PASTE_STORE_SITE_URL)
    #[arg(long)]
    pub site_url: Option<String>,

    /// Paste lifetime such as 24h or 30m, 0 to keep forever (overrides PASTE_STORE_LIFETIME)
    #[arg(short = 't', long, value_parser = parse_duration)]
    pub lifetime: Option<Duration>,

    /// Maximum size of a single paste (overrides PASTE_STORE_MAX_SIZE)
    #[arg(short = 's', long, value_parser = parse_byte_size)]
    pub max_size: Option<u64>,

    /// Maximum number of live pastes, 0 for no limit (overrides PASTE_STORE_MAX_NUMBER)
    #[arg(short = 'm', long)]
    pub max_number: Option<usize>,

    /// Maximum total size of live pastes, 0 for no limit (overrides PASTE_STORE_MAX_STORAGE)
    #[arg(short = 'M', long, value_parser = parse_byte_size)]
    pub max_storage: Option<u64>,

    /// Directory for file-backed stores (overrides PASTE_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Storage backend (overrides PASTE_STORE_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<StoreKind>,

    /// Interval between usage log lines (overrides PASTE_STORE_REPORT_INTERVAL)
    #[arg(long, value_parser = parse_duration)]
    pub report_interval: Option<Duration>,

    /// Deadline for serving one paste, after which the read is cut off (overrides PASTE_STORE_READ_TIMEOUT)
    #[arg(long, value_parser = parse_duration)]
    pub read_timeout: Option<Duration>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::from_sources(args, |key| env::var(key).ok())
    }

    /// Merge `args` over values looked up through `env`, over the defaults.
    pub fn from_sources(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let lookup = |name: &str| env(&format!("{ENV_PREFIX}{name}"));

        let cfg = Self {
            host: args
                .host
                .or_else(|| lookup("HOST"))
                .unwrap_or(defaults.host),
            port: pick(args.port, &lookup, "PORT", str::parse::<u16>)?.unwrap_or(defaults.port),
            site_url: args
                .site_url
                .or_else(|| lookup("SITE_URL"))
                .unwrap_or(defaults.site_url),
            lifetime: pick(args.lifetime, &lookup, "LIFETIME", parse_duration)?
                .unwrap_or(defaults.lifetime),
            max_size: pick(args.max_size, &lookup, "MAX_SIZE", parse_byte_size)?
                .unwrap_or(defaults.max_size),
            max_number: pick(args.max_number, &lookup, "MAX_NUMBER", str::parse::<usize>)?
                .unwrap_or(defaults.max_number),
            max_storage: pick(args.max_storage, &lookup, "MAX_STORAGE", parse_byte_size)?
                .unwrap_or(defaults.max_storage),
            storage_dir: args
                .storage_dir
                .or_else(|| lookup("STORAGE_DIR").map(PathBuf::from))
                .unwrap_or(defaults.storage_dir),
            backend: pick(args.backend, &lookup, "BACKEND", |v| {
                <StoreKind as ValueEnum>::from_str(v, true)
            })?
            .unwrap_or(defaults.backend),
            report_interval: pick(
                args.report_interval,
                &lookup,
                "REPORT_INTERVAL",
                parse_duration,
            )?
            .unwrap_or(defaults.report_interval),
            read_timeout: pick(args.read_timeout, &lookup, "READ_TIMEOUT", parse_duration)?
                .unwrap_or(defaults.read_timeout),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            bail!("max size must be greater than zero");
        }
        if usize::try_from(self.max_size).is_err() {
            bail!("max size {} does not fit in memory", format_bytes(self.max_size));
        }
        if self.report_interval.is_zero() {
            bail!("report interval must be greater than zero");
        }
        if self.read_timeout.is_zero() {
            bail!("read timeout must be greater than zero");
        }
        if self.site_url.trim().is_empty() {
            bail!("site url must not be empty");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn quota_limits(&self) -> QuotaLimits {
        QuotaLimits {
            max_count: self.max_number,
            max_bytes: self.max_storage,
        }
    }

    /// Lifetime handed to the store, `None` when expiry is disabled.
    pub fn expiry(&self) -> Option<Duration> {
        Some(self.lifetime).filter(|l| !l.is_zero())
    }

    /// Request body ceiling for uploads.
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_size).unwrap_or(usize::MAX)
    }

    /// One-line summary logged at startup.
    pub fn describe(&self) -> String {
        let lifetime = match self.expiry() {
            Some(l) => format_duration(l),
            None => "forever".into(),
        };
        format!(
            "site_url={} listen={} lifetime={} max_size={} max_number={} max_storage={} backend={} storage_dir={}",
            self.site_url,
            self.addr(),
            lifetime,
            format_bytes(self.max_size),
            self.max_number,
            format_bytes(self.max_storage),
            self.backend
                .to_possible_value()
                .map(|v| v.get_name().to_owned())
                .unwrap_or_default(),
            self.storage_dir.display(),
        )
    }
}

/// CLI value if given, else the environment value parsed with `parse`.
fn pick<T, E: std::fmt::Display>(
    cli: Option<T>,
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<Option<T>> {
    if cli.is_some() {
        return Ok(cli);
    }
    match lookup(name) {
        Some(value) => parse(value.trim())
            .map(Some)
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("parsing {ENV_PREFIX}{name} value `{value}`")),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_sources() {
        let cfg = AppConfig::from_sources(Args::default(), env_from(&[])).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.lifetime, Duration::from_secs(86_400));
        assert_eq!(cfg.max_size, 1 << 20);
        assert_eq!(cfg.max_storage, 1 << 30);
        assert_eq!(cfg.backend, StoreKind::File);
        assert_eq!(cfg.read_timeout, Duration::from_secs(60));
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
    }

    #[test]
    fn environment_fills_gaps_and_cli_wins() {
        let args = Args {
            port: Some(9000),
            ..Args::default()
        };
        let env = env_from(&[
            ("PASTE_STORE_PORT", "7000"),
            ("PASTE_STORE_MAX_NUMBER", "10"),
            ("PASTE_STORE_MAX_STORAGE", "2MB"),
            ("PASTE_STORE_LIFETIME", "0"),
            ("PASTE_STORE_BACKEND", "fs-mmap"),
        ]);
        let cfg = AppConfig::from_sources(args, env).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(
            cfg.quota_limits(),
            QuotaLimits {
                max_count: 10,
                max_bytes: 2 << 20
            }
        );
        assert_eq!(cfg.expiry(), None);
        assert_eq!(cfg.backend, StoreKind::Mapped);
    }

    #[test]
    fn bad_environment_values_are_reported() {
        let err = AppConfig::from_sources(
            Args::default(),
            env_from(&[("PASTE_STORE_MAX_SIZE", "2EB")]),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("PASTE_STORE_MAX_SIZE"));

        assert!(
            AppConfig::from_sources(Args::default(), env_from(&[("PASTE_STORE_PORT", "x")]))
                .is_err()
        );
        assert!(
            AppConfig::from_sources(Args::default(), env_from(&[("PASTE_STORE_MAX_SIZE", "0")]))
                .is_err()
        );

        let err = AppConfig::from_sources(
            Args::default(),
            env_from(&[("PASTE_STORE_LIFETIME", "300000000000000000d")]),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("PASTE_STORE_LIFETIME"));
        assert!(
            AppConfig::from_sources(
                Args::default(),
                env_from(&[("PASTE_STORE_READ_TIMEOUT", "0")])
            )
            .is_err()
        );
    }

    #[test]
    fn cli_parses_units() {
        let args = Args::try_parse_from([
            "paste-store",
            "-t",
            "1h30m",
            "-s",
            "64KB",
            "--backend",
            "mem",
        ])
        .unwrap();
        let cfg = AppConfig::from_sources(args, env_from(&[])).unwrap();
        assert_eq!(cfg.lifetime, Duration::from_secs(5400));
        assert_eq!(cfg.max_size, 64 << 10);
        assert_eq!(cfg.backend, StoreKind::Memory);
    }
}
