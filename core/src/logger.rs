use tracing::{debug, level_filters::LevelFilter};
use tracing_subscriber::{
    fmt::format::{Format, Writer},
    EnvFilter,
};

struct LocalTimer;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, writer: &mut Writer<'_>) -> std::fmt::Result {
        let now = chrono::Local::now();
        write!(writer, "{} - {}", now.format("%d %B"), now.format("%H:%M:%S%.6f"))
    }
}

/// Installs the global subscriber. `RUST_LOG` directives still apply on top
/// of `log_level`; a second call leaves the first subscriber in place.
pub fn setup_logger(log_level: LevelFilter) {
    install(EnvFilter::from_default_env().add_directive(log_level.into()));
}

pub fn setup_info_logger() {
    setup_logger(LevelFilter::INFO);
}

/// Info everywhere, debug for this crate, which logs every statement it runs.
pub fn setup_sql_logger() {
    let filter = EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into());
    match "fast_update=debug".parse() {
        Ok(directive) => install(filter.add_directive(directive)),
        Err(_) => install(filter),
    }
}

fn install(filter: EnvFilter) {
    let format = Format::default().with_timer(LocalTimer).with_level(true).with_target(false);

    let subscriber =
        tracing_subscriber::fmt().with_env_filter(filter).event_format(format).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        debug!("Logger has already been set up, continuing...");
    }
}
