//! Observability and diagnostics for the resolver and readers.
//!
//! All logging goes through the `log` facade. The `log_metric!` macro emits a
//! single structured key-value line under the `jsontable::metrics` target at
//! debug level; the formatting work is skipped entirely unless that target is
//! enabled. `enable_verbose_logging` installs an `env_logger` backend once per
//! process.

use std::fs::OpenOptions;
use std::sync::Once;

use log::LevelFilter;

use crate::error::Result;

/// Logs a structured key-value metric line at debug level.
///
/// # Example
/// ```
/// use jsontable::log_metric;
/// let rows = 4;
/// log_metric!("event" = "batch_pulled", "shape" = "ROWS_ARRAY", "rows" = &rows);
/// ```
#[macro_export]
macro_rules! log_metric {
    ($($key:literal = $value:expr),+ $(,)?) => {
        if ::log::log_enabled!(target: "jsontable::metrics", ::log::Level::Debug) {
            let mut parts: Vec<String> = Vec::new();
            $(
                parts.push(format!("\"{}\": \"{}\"", $key, $value));
            )+
            ::log::debug!(
                target: "jsontable::metrics",
                "JSONTABLE_METRIC: {{ {} }}",
                parts.join(", ")
            );
        }
    };
}

static INIT_LOGGER: Once = Once::new();

/// Turns on `Debug`-level logging for the library.
///
/// When `log_file` is given, log lines are appended to that file instead of
/// stderr. Only the first call in a process has any effect.
pub fn enable_verbose_logging(log_file: Option<String>) -> Result<()> {
    let target = match log_file {
        Some(filename) => Some(OpenOptions::new().append(true).create(true).open(filename)?),
        None => None,
    };

    INIT_LOGGER.call_once(move || {
        let mut builder = env_logger::Builder::new();

        builder.is_test(false);
        builder.filter_level(LevelFilter::Debug);

        // Custom formatter: just print the level, target and message
        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(buf, "[{}] {}: {}", record.level(), record.target(), record.args())?;
            buf.flush()?;
            Ok(())
        });

        if let Some(file) = target {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }

        let _ = builder.try_init();
    });
    Ok(())
}
