//! Configuration data model (spec §3 "Configuration") and TOML loading/
//! validation (C14, SPEC_FULL §4.14). Parsing happens in two steps: a
//! permissive `serde`/`toml` deserialize into [`RawConfig`], then a fallible
//! validation pass into the immutable [`Configuration`] this crate and
//! every other component actually consumes.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Origin,
    LoadBalancer,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub health_check_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub global_rps: f64,
    pub per_ip_rps: Option<f64>,
    pub burst_multiplier: f64,
    pub enable_ebpf: bool,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub prometheus_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

/// Immutable once installed (spec §3). Replaced wholesale by
/// [`crate::reload::ReloadManager`], never mutated in place.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub mode: Mode,
    pub listen: String,
    pub quic_listen: Option<String>,
    pub backends: Vec<BackendConfig>,
    pub rate_limit: RateLimitConfig,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub idle_timeout: Duration,
    pub max_connections: usize,
    pub max_retries: u32,
    pub jwt: JwtConfig,
    pub metrics: MetricsConfig,
}

impl Configuration {
    #[cfg(any(test, feature = "test-util"))]
    pub fn minimal_for_test(mode: Mode) -> Self {
        Configuration {
            mode,
            listen: "127.0.0.1:8080".to_string(),
            quic_listen: None,
            backends: Vec::new(),
            rate_limit: RateLimitConfig {
                global_rps: 1000.0,
                per_ip_rps: None,
                burst_multiplier: 2.0,
                enable_ebpf: false,
            },
            tls_cert_path: None,
            tls_key_path: None,
            idle_timeout: Duration::from_secs(60),
            max_connections: 1024,
            max_retries: 2,
            jwt: JwtConfig {
                issuer: None,
                audience: None,
            },
            metrics: MetricsConfig {
                enabled: false,
                port: 9090,
                prometheus_enabled: false,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub mode: String,
    pub listen: String,
    pub quic_listen: Option<String>,
    #[serde(default)]
    pub rate_limit: Option<String>,
    #[serde(default)]
    pub rate_limit_per_ip: Option<String>,
    #[serde(default = "default_burst_multiplier")]
    pub rate_limit_burst_multiplier: f64,
    #[serde(default)]
    pub rate_limit_enable_ebpf: bool,
    #[serde(default)]
    pub backends: std::collections::BTreeMap<String, RawBackend>,
    #[serde(default)]
    pub tls_cert: Option<String>,
    #[serde(default)]
    pub tls_key: Option<String>,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub metrics: Option<RawMetrics>,
    #[serde(default)]
    pub jwt_issuer: Option<String>,
    #[serde(default)]
    pub jwt_audience: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawBackend {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub health_check_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawMetrics {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default)]
    pub prometheus_enabled: bool,
}

fn default_burst_multiplier() -> f64 {
    2.0
}
fn default_weight() -> u32 {
    1
}
fn default_idle_timeout() -> u64 {
    60
}
fn default_max_connections() -> usize {
    65536
}
fn default_max_retries() -> u32 {
    2
}
fn default_metrics_port() -> u16 {
    9090
}

/// Parses "`N req/s`" (spec §6 `rate_limit`) into a plain requests-per-second
/// float.
fn parse_rate(raw: &str) -> Result<f64, ConfigError> {
    let trimmed = raw.trim();
    let num_part = trimmed
        .split_whitespace()
        .next()
        .ok_or_else(|| ConfigError::BadRateLimit(raw.to_string()))?;
    num_part
        .parse::<f64>()
        .map_err(|_| ConfigError::BadRateLimit(raw.to_string()))
}

pub fn load_toml(text: &str) -> Result<Configuration, ConfigError> {
    let raw: RawConfig = toml::from_str(text)?;
    validate(raw)
}

/// Validates a [`RawConfig`] into a [`Configuration`], collecting every
/// problem found rather than failing fast on the first one (spec §4.14),
/// and never mutating any live state (spec §7 "configuration errors ...
/// reject at load, no live state mutated").
pub fn validate(raw: RawConfig) -> Result<Configuration, ConfigError> {
    let mut problems = Vec::new();

    let mode = match raw.mode.as_str() {
        "origin" => Mode::Origin,
        "load_balancer" => Mode::LoadBalancer,
        other => {
            problems.push(ConfigError::BadListenAddress(format!(
                "unknown mode {other:?}"
            )));
            Mode::Origin
        }
    };

    let global_rps = match &raw.rate_limit {
        Some(s) => parse_rate(s).unwrap_or_else(|e| {
            problems.push(e);
            0.0
        }),
        None => f64::INFINITY,
    };
    let per_ip_rps = match &raw.rate_limit_per_ip {
        Some(s) => Some(parse_rate(s).unwrap_or_else(|e| {
            problems.push(e);
            0.0
        })),
        None => None,
    };

    let mut seen_names = std::collections::HashSet::new();
    let mut backends = Vec::new();
    for (name, b) in raw.backends {
        if !seen_names.insert(name.clone()) {
            problems.push(ConfigError::DuplicateBackend(name.clone()));
            continue;
        }
        if b.weight == 0 {
            problems.push(ConfigError::ZeroWeightBackend(name.clone()));
            continue;
        }
        backends.push(BackendConfig {
            name,
            host: b.host,
            port: b.port,
            weight: b.weight,
            health_check_path: b.health_check_path,
        });
    }

    if mode == Mode::LoadBalancer && backends.is_empty() {
        problems.push(ConfigError::BadListenAddress(
            "load_balancer mode requires at least one backend".to_string(),
        ));
    }

    if raw.quic_listen.is_some() && (raw.tls_cert.is_none() || raw.tls_key.is_none()) {
        problems.push(ConfigError::MissingTlsMaterial {
            reason: "QUIC listener requires TLS is mandatory for HTTP/3",
        });
    }

    if !problems.is_empty() {
        let n = problems.len();
        return Err(ConfigError::Multiple(n, problems));
    }

    Ok(Configuration {
        mode,
        listen: raw.listen,
        quic_listen: raw.quic_listen,
        backends,
        rate_limit: RateLimitConfig {
            global_rps,
            per_ip_rps,
            burst_multiplier: raw.rate_limit_burst_multiplier,
            enable_ebpf: raw.rate_limit_enable_ebpf,
        },
        tls_cert_path: raw.tls_cert,
        tls_key_path: raw.tls_key,
        idle_timeout: Duration::from_secs(raw.idle_timeout_secs),
        max_connections: raw.max_connections,
        max_retries: raw.max_retries,
        jwt: JwtConfig {
            issuer: raw.jwt_issuer,
            audience: raw.jwt_audience,
        },
        metrics: MetricsConfig {
            enabled: raw.metrics.as_ref().is_some_and(|m| m.enabled),
            port: raw.metrics.as_ref().map_or(9090, |m| m.port),
            prometheus_enabled: raw.metrics.as_ref().is_some_and(|m| m.prometheus_enabled),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_origin_config() {
        let text = r#"
            mode = "origin"
            listen = "0.0.0.0:8080"
            rate_limit = "500 req/s"
        "#;
        let cfg = load_toml(text).unwrap();
        assert_eq!(cfg.mode, Mode::Origin);
        assert_eq!(cfg.rate_limit.global_rps, 500.0);
    }

    #[test]
    fn rejects_duplicate_and_zero_weight_backends_together() {
        let text = r#"
            mode = "load_balancer"
            listen = "0.0.0.0:8080"

            [backends.b1]
            host = "10.0.0.1"
            port = 80
            weight = 0
        "#;
        let err = load_toml(text).unwrap_err();
        match err {
            ConfigError::Multiple(n, problems) => {
                assert_eq!(n, problems.len());
                assert!(problems
                    .iter()
                    .any(|p| matches!(p, ConfigError::ZeroWeightBackend(_))));
            }
            other => panic!("expected Multiple, got {other:?}"),
        }
    }

    #[test]
    fn quic_listener_requires_tls_material() {
        let text = r#"
            mode = "origin"
            listen = "0.0.0.0:8080"
            quic_listen = "0.0.0.0:8443"
        "#;
        let err = load_toml(text).unwrap_err();
        assert!(matches!(err, ConfigError::Multiple(..)));
    }
}
