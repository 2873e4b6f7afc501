//! CLI surface (C15, SPEC_FULL §4.15): argument parsing for the `quic`,
//! `echo`, and `http` modes and the `--port`/`--cert`/`--key`/`--config`/
//! `--lb`/`--capture` flags.

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "blitz-gateway")]
#[command(bin_name = "blitz-gateway")]
#[command(version, about = "High-throughput L7 gateway over io_uring")]
pub struct Cli {
    #[command(subcommand)]
    pub mode: CliMode,
}

#[derive(Debug, Subcommand)]
pub enum CliMode {
    /// Serve HTTP/1.1 and HTTP/2 (h2c or ALPN over TLS).
    Http(ServeArgs),
    /// Serve HTTP/3 over QUIC (implies TLS).
    Quic(ServeArgs),
    /// One-shot diagnostic: echoes bytes back to a single TCP peer, bypassing
    /// the gateway entirely (spec §6: "thin, explicitly out of the
    /// core-design scope beyond having a real entry point").
    Echo(EchoArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Listening port for the fast path.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// PEM certificate chain; required for `quic` and for TLS-terminated `http`.
    #[arg(long)]
    pub cert: Option<String>,

    /// PEM private key matching `--cert`.
    #[arg(long)]
    pub key: Option<String>,

    /// TOML configuration file (§3 `Configuration`); flags below override it
    /// field-by-field when both are given.
    #[arg(long)]
    pub config: Option<String>,

    /// Enables load-balancer mode, reading the named backend set from a
    /// small TOML file containing just a `[backends.*]` table.
    #[arg(long = "lb", value_name = "PATH")]
    pub lb: Option<String>,

    /// Writes per-connection QUIC packet/key diagnostics under `captures/`.
    #[arg(long)]
    pub capture: bool,
}

#[derive(Debug, Args)]
pub struct EchoArgs {
    #[arg(long, default_value_t = 9999)]
    pub port: u16,
}
