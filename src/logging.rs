use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable holding the log filter, e.g. `VIDAUDIO_LOG=vidaudio=debug`.
pub const LOG_ENV_VAR: &str = "VIDAUDIO_LOG";

/// Initialize structured JSON logging on stderr.
///
/// Defaults to `warn` unless overridden by `VIDAUDIO_LOG`. Calling it more than once is harmless.
pub fn init() {
    let filter = EnvFilter::builder()
        .with_env_var(LOG_ENV_VAR)
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(true),
        )
        .try_init();
}
