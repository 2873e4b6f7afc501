//! Binary entry point (C15, SPEC_FULL §4.15): CLI parsing, tracing/crypto
//! provider installation, configuration resolution, and dispatch to one of
//! the three modes named in the CLI surface.

mod cli;
mod echo;
mod gateway;
mod metrics;
mod quic_loop;
mod session;
mod trace;

use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use tracing::{error, info};

use blitz_core::config::{validate, Configuration, RawBackend, RawConfig};
use blitz_core::error::ConfigError;

use cli::{CliMode, ServeArgs};

fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    let _trace_guard = trace::init_tracing();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        error!("failed to install rustls crypto provider (already installed?)");
    }

    match run(cli.mode) {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => code,
    }
}

fn run(mode: CliMode) -> Result<(), ExitCode> {
    match mode {
        CliMode::Http(args) => run_http(args, &["h2", "http/1.1"]),
        CliMode::Quic(args) => run_quic(args),
        CliMode::Echo(args) => echo::run(args.port).map_err(|e| {
            error!(error = %e, "echo mode failed");
            ExitCode::FAILURE
        }),
    }
}

fn run_http(args: ServeArgs, alpn: &[&str]) -> Result<(), ExitCode> {
    let config = resolve_config(&args, false).map_err(|e| {
        error!(error = %e, "configuration error");
        ExitCode::from(2)
    })?;

    let tls_config = match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert), Some(key)) => Some(
            blitz_tls::material::load_server_config(cert, key, alpn).map_err(|e| {
                error!(error = %e, "failed to load TLS material");
                ExitCode::from(2)
            })?,
        ),
        _ => None,
    };

    let metrics = Arc::new(metrics::Counters::default());
    let mut gw = gateway::Gateway::bootstrap(Arc::new(config), tls_config, metrics, args.config.clone())
        .map_err(|e| {
            error!(error = %e, "gateway bootstrap failed");
            ExitCode::from(3)
        })?;

    info!(port = args.port, "blitz-gateway listening (http)");
    gw.run().map_err(|e| {
        error!(error = %e, "fatal event-loop error");
        ExitCode::from(1)
    })
}

fn run_quic(args: ServeArgs) -> Result<(), ExitCode> {
    let config = resolve_config(&args, true).map_err(|e| {
        error!(error = %e, "configuration error");
        ExitCode::from(2)
    })?;

    let (cert, key) = match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(c), Some(k)) => (c, k),
        _ => {
            error!("quic mode requires --cert and --key");
            return Err(ExitCode::from(2));
        }
    };
    let tls_config = blitz_tls::material::load_server_config(cert, key, &["h3"]).map_err(|e| {
        error!(error = %e, "failed to load TLS material");
        ExitCode::from(2)
    })?;

    let listen = config.quic_listen.clone().unwrap_or(config.listen.clone());
    let capture_root = args.capture.then(|| std::path::PathBuf::from("captures"));

    info!(addr = %listen, "blitz-gateway listening (quic)");
    quic_loop::run(&listen, tls_config, capture_root).map_err(|e| {
        error!(error = %e, "fatal quic loop error");
        ExitCode::from(1)
    })
}

#[derive(Debug, Deserialize)]
struct LbFile {
    #[serde(default)]
    backends: BTreeMap<String, RawBackend>,
}

/// Resolves the effective `Configuration` from `--config` (if given) plus
/// CLI flag overrides plus `--lb` (if given), following §4.14's field-by-
/// field override rule: flags win over a loaded file's matching field.
fn resolve_config(args: &ServeArgs, is_quic: bool) -> Result<Configuration, ConfigError> {
    let mut raw = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::BadListenAddress(format!("{path}: {e}")))?;
            toml::from_str(&text)?
        }
        None => default_raw_config(),
    };

    let bind = format!("0.0.0.0:{}", args.port);
    if is_quic {
        raw.quic_listen = Some(bind);
    } else {
        raw.listen = bind;
    }

    if let Some(lb_path) = &args.lb {
        let text = std::fs::read_to_string(lb_path)
            .map_err(|e| ConfigError::BadListenAddress(format!("{lb_path}: {e}")))?;
        let lb_file: LbFile = toml::from_str(&text)?;
        raw.backends.extend(lb_file.backends);
        raw.mode = "load_balancer".to_string();
    }

    if let Some(cert) = &args.cert {
        raw.tls_cert = Some(cert.clone());
    }
    if let Some(key) = &args.key {
        raw.tls_key = Some(key.clone());
    }

    validate(raw)
}

fn default_raw_config() -> RawConfig {
    toml::from_str(
        r#"
        mode = "origin"
        listen = "0.0.0.0:8080"
        "#,
    )
    .expect("built-in default config is valid TOML")
}
