//! Logging setup
//!
//! The engine logs through the `log` facade; this module wires up an
//! `env_logger` backend with per-severity console colors:
//! error = red, warn = yellow, info = green, debug = blue, trace = grey.
//! Fatal conditions use [`fatal!`](crate::fatal), which logs at error level
//! with a `FATAL` prefix before the error propagates out.

use env_logger::fmt::Color;
use log::Level;
use std::io::Write;

/// Initializes the global logger. Safe to call once per process; the
/// sandbox entry point calls this before creating the application.
pub fn init() {
    let mut builder = env_logger::Builder::from_default_env();
    builder
        .format(|buf, record| {
            let mut style = buf.style();
            match record.level() {
                Level::Error => style.set_color(Color::Red),
                Level::Warn => style.set_color(Color::Yellow),
                Level::Info => style.set_color(Color::Green),
                Level::Debug => style.set_color(Color::Blue),
                Level::Trace => style.set_color(Color::Rgb(128, 128, 128)),
            };
            writeln!(
                buf,
                "[{}] {}",
                style.value(record.level()),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

/// Logs an unrecoverable condition at error level with a FATAL prefix.
///
/// The `log` facade has five severities; the engine's sixth (fatal) maps
/// onto `error!` with this marker, and the surrounding `Result` propagation
/// carries the abort.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {
        log::error!("FATAL: {}", format_args!($($arg)*))
    };
}
