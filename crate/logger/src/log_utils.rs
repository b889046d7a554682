use std::{io::IsTerminal, sync::Once};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static LOG_INIT: Once = Once::new();

/// Initialise the global tracing subscriber once per process.
///
/// `RUST_LOG` wins over `default_value` when it is set.
/// Diagnostics are written to stderr: stdout belongs to the report.
pub fn log_init(default_value: &str) {
    LOG_INIT.call_once(|| {
        if std::env::var("RUST_BACKTRACE").is_err() {
            unsafe {
                std::env::set_var("RUST_BACKTRACE", "1");
            }
        }

        if std::env::var("RUST_LOG").is_err() {
            unsafe {
                std::env::set_var("RUST_LOG", default_value);
            }
        }

        tracing_setup();
    });
}

fn tracing_setup() {
    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_target(false)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(std::io::stderr().is_terminal())
        .compact();

    // `try_init` so that a subscriber installed by a test harness is left alone
    drop(
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(format)
            .try_init(),
    );
}
