use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

fn rotation(name: &str) -> Rotation {
    match name.to_ascii_lowercase().as_str() {
        "minutely" => Rotation::MINUTELY,
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        _ => Rotation::NEVER,
    }
}

/// `RUST_LOG` wins; otherwise the configured level with sqlx statement logs muted
fn directives(config: &AppConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn,hyper=warn", config.log_level)))
}

/// Install the global subscriber. The log file always receives output; the
/// console mirror is only added for plain-text mode.
///
/// Hold the returned guard until shutdown.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let appender = RollingFileAppender::new(
        rotation(&config.rotation),
        &config.log_dir,
        &config.log_file,
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let (json_file, text_file, console) = if config.use_json {
        let layer = fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(writer)
            .with_ansi(false);
        (Some(layer), None, None)
    } else {
        let file = fmt::layer()
            .with_target(false)
            .with_writer(writer)
            .with_ansi(false);
        let console = fmt::layer().with_target(false);
        (None, Some(file), Some(console))
    };

    tracing_subscriber::registry()
        .with(directives(config))
        .with(json_file)
        .with(text_file)
        .with(console)
        .init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_names() {
        assert_eq!(rotation("hourly"), Rotation::HOURLY);
        assert_eq!(rotation("Daily"), Rotation::DAILY);
        assert_eq!(rotation("minutely"), Rotation::MINUTELY);
        assert_eq!(rotation("weekly"), Rotation::NEVER);
    }
}
