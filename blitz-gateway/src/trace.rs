//! Observability wiring (C12, SPEC_FULL §4.12): `tracing-subscriber`'s
//! `EnvFilter` honoring `RUST_LOG`, writing through a `tracing-appender`
//! non-blocking writer so a slow terminal/file never stalls the fast path.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the process-wide subscriber. The returned guard must be held for
/// the process lifetime: dropping it stops the background flush thread and
/// silently truncates in-flight log lines.
pub fn init_tracing() -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    guard
}
