//! Subscriber setup for programs embedding the kernel.
//!
//! The library itself only emits `tracing` events and spans; nothing is
//! printed unless a subscriber is installed. [`init_tracing`] installs one
//! configured from the environment:
//!
//! - `RUST_LOG`: filter directives (default: `ag_kernel=info`)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development
//!   (default: json)

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "ag_kernel=info";

/// Output format of [`init_tracing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Human-readable, with span timings.
    Pretty,
}

impl LogFormat {
    /// Read `LOG_FORMAT`; anything but "pretty" means JSON.
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT").as_deref() {
            Ok("pretty") => Self::Pretty,
            _ => Self::Json,
        }
    }
}

/// Install a global subscriber using `RUST_LOG` and `LOG_FORMAT`.
///
/// Returns `false` if a global subscriber was already set.
pub fn init_tracing() -> bool {
    init_tracing_with(LogFormat::from_env())
}

/// Install a global subscriber in the given format, filtered by `RUST_LOG`.
pub fn init_tracing_with(format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_span_events(FmtSpan::CLOSE))
            .try_init()
            .is_ok(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .try_init()
            .is_ok(),
    }
}
