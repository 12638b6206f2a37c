use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable read for per-target log directives.
pub const LOG_ENV_VAR: &str = "GAME_DETECTOR_LOG";

/// Installs a `fmt` subscriber filtered by `GAME_DETECTOR_LOG`, falling back
/// to `default_level`. For hosts without their own subscriber.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(default_level: LevelFilter) -> bool {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    let layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .try_init()
        .is_ok()
}
