//! Logging setup for the CLI.
//!
//! Levels come from the `[logging]` table of the config:
//!
//! ```toml
//! [logging]
//! default = "warn"
//!
//! [logging.modules]
//! evidx_index = "info"
//! ```
//!
//! `RUST_LOG` takes precedence when set.

use std::sync::Once;

use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use evidx_core::config::LoggingSettings;

static INIT: Once = Once::new();

/// HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

pub fn filter_directives(settings: &LoggingSettings) -> String {
    let mut directives = settings.default.clone();
    for (module, level) in &settings.modules {
        directives.push_str(&format!(",{module}={level}"));
    }
    directives
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_with_settings(settings: &LoggingSettings) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(settings))
        };
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);
        tracing_subscriber::registry().with(fmt_layer).init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_levels_follow_default() {
        let mut settings = LoggingSettings::default();
        settings.modules.insert("evidx_index".into(), "debug".into());
        assert_eq!(filter_directives(&settings), "warn,evidx_index=debug");
    }
}
