use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use crate::classifier::ClassifierConfig;
use crate::grouping::GroupingConfig;

/// Complete application configuration, loaded from environment variables or
/// default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub catalog: CatalogConfig,
    pub classifier: ClassifierSettings,
    pub grouping: GroupingSettings,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment
    /// variables.
    pub fn from_env() -> Self {
        Self {
            api: ApiConfig::from_env(),
            catalog: CatalogConfig::from_env(),
            classifier: ClassifierSettings::from_env(),
            grouping: GroupingSettings::from_env(),
        }
    }
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    bind_ip: IpAddr,
    display_host: String,
    port: u16,
}

impl ApiConfig {
    const DEFAULT_HOST: &'static str = "0.0.0.0";
    const DEFAULT_PORT: u16 = 8091;

    fn from_env() -> Self {
        let host_value =
            env_string("BOXFIT_API_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let (bind_ip, display_host) = match host_value.parse::<IpAddr>() {
            Ok(ip) => (ip, host_value),
            Err(err) => {
                eprintln!(
                    "⚠️ Could not parse BOXFIT_API_HOST ('{}'): {}. Using {}.",
                    host_value,
                    err,
                    Self::DEFAULT_HOST
                );
                (
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    Self::DEFAULT_HOST.to_string(),
                )
            }
        };

        let port = match env_string("BOXFIT_API_PORT").map(|raw| (raw.parse::<u16>(), raw)) {
            Some((Ok(value), _)) if value != 0 => value,
            Some((Ok(_), _)) => {
                eprintln!(
                    "⚠️ BOXFIT_API_PORT must not be 0. Using {}.",
                    Self::DEFAULT_PORT
                );
                Self::DEFAULT_PORT
            }
            Some((Err(err), raw)) => {
                eprintln!(
                    "⚠️ Could not parse BOXFIT_API_PORT ('{}'): {}. Using {}.",
                    raw,
                    err,
                    Self::DEFAULT_PORT
                );
                Self::DEFAULT_PORT
            }
            None => Self::DEFAULT_PORT,
        };

        Self {
            bind_ip,
            display_host,
            port,
        }
    }

    /// Socket address to bind the server to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Visible hostname for logging and hints.
    pub fn display_host(&self) -> &str {
        &self.display_host
    }

    /// Configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Indicates whether binding to all interfaces.
    pub fn binds_to_all_interfaces(&self) -> bool {
        match self.bind_ip {
            IpAddr::V4(addr) => addr == Ipv4Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr == Ipv6Addr::UNSPECIFIED,
        }
    }
}

/// Configuration for the reference-data collaborators.
#[derive(Clone, Debug)]
pub struct CatalogConfig {
    base_url: String,
    timeout_secs: u64,
}

impl CatalogConfig {
    const DEFAULT_BASE_URL: &'static str = "http://127.0.0.1:4000/api";
    const DEFAULT_TIMEOUT_SECS: u64 = 10;

    fn from_env() -> Self {
        let base_url = env_string("BOXFIT_CATALOG_BASE_URL")
            .unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string());
        let timeout_secs = load_u64(
            "BOXFIT_CATALOG_TIMEOUT_SECS",
            Self::DEFAULT_TIMEOUT_SECS,
            |value| value > 0,
            "must be greater than 0",
        );
        Self {
            base_url,
            timeout_secs,
        }
    }

    /// Base URL of the box-config/batch services.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Request timeout for collaborator calls.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Configuration for the box-fit classifier.
#[derive(Clone, Debug)]
pub struct ClassifierSettings {
    config: ClassifierConfig,
}

impl ClassifierSettings {
    const PACKING_EFFICIENCY_VAR: &'static str = "BOXFIT_PACKING_EFFICIENCY";
    const MAX_QTY_PER_PRODUCT_VAR: &'static str = "BOXFIT_MAX_QTY_PER_PRODUCT";
    const MAX_TOTAL_QTY_VAR: &'static str = "BOXFIT_MAX_TOTAL_QTY";

    fn from_env() -> Self {
        let packing_efficiency = load_f64(
            Self::PACKING_EFFICIENCY_VAR,
            ClassifierConfig::DEFAULT_PACKING_EFFICIENCY,
            |value| value > 0.0 && value <= 1.0,
            "must be between 0 (exclusive) and 1",
        );
        let max_qty_per_product = load_u32(
            Self::MAX_QTY_PER_PRODUCT_VAR,
            ClassifierConfig::DEFAULT_MAX_QTY_PER_PRODUCT,
            |value| value > 0,
            "must be greater than 0",
        );
        let max_total_qty = load_u32(
            Self::MAX_TOTAL_QTY_VAR,
            ClassifierConfig::DEFAULT_MAX_TOTAL_QTY,
            |value| value > 0,
            "must be greater than 0",
        );

        let config = ClassifierConfig::builder()
            .packing_efficiency(packing_efficiency)
            .max_qty_per_product(max_qty_per_product)
            .max_total_qty(max_total_qty)
            .build();

        Self { config }
    }

    /// Returns the configured ClassifierConfig.
    pub fn classifier_config(&self) -> ClassifierConfig {
        self.config
    }
}

/// Configuration defaults for bulk grouping.
#[derive(Clone, Debug)]
pub struct GroupingSettings {
    min_group_size: u32,
}

impl GroupingSettings {
    const MIN_GROUP_SIZE_VAR: &'static str = "BOXFIT_MIN_GROUP_SIZE";

    fn from_env() -> Self {
        let min_group_size = load_u32(
            Self::MIN_GROUP_SIZE_VAR,
            GroupingConfig::DEFAULT_MIN_GROUP_SIZE,
            |value| value > 0,
            "must be greater than 0",
        );
        Self { min_group_size }
    }

    /// Grouping configuration; requests may still override the minimum
    /// group size per call.
    pub fn grouping_config(&self) -> GroupingConfig {
        GroupingConfig {
            min_group_size: self.min_group_size,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            eprintln!(
                "⚠️ Access to {} failed: {}. Using default value.",
                name, err
            );
            None
        }
    }
}

fn load_f64(name: &str, default: f64, validator: impl Fn(f64) -> bool, hint: &str) -> f64 {
    load_parsed(name, default, validator, hint)
}

fn load_u32(name: &str, default: u32, validator: impl Fn(u32) -> bool, hint: &str) -> u32 {
    load_parsed(name, default, validator, hint)
}

fn load_u64(name: &str, default: u64, validator: impl Fn(u64) -> bool, hint: &str) -> u64 {
    load_parsed(name, default, validator, hint)
}

/// Parses an environment variable, warning and falling back to the default
/// on parse or validation failure. Startup never aborts over a bad value.
fn load_parsed<T>(name: &str, default: T, validator: impl Fn(T) -> bool, hint: &str) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => match raw.parse::<T>() {
            Ok(value) if validator(value) => value,
            Ok(_) => {
                eprintln!(
                    "⚠️ {} contains invalid value '{}': {}. Using {}.",
                    name, raw, hint, default
                );
                default
            }
            Err(err) => {
                eprintln!(
                    "⚠️ Could not parse {} ('{}'): {}. Using {}.",
                    name, raw, err, default
                );
                default
            }
        },
        None => default,
    }
}
