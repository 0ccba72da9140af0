/* Logger initialization */
use std::{panic, thread};

use tracing::{error, level_filters::LevelFilter};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::CargoEnv;

/// panics starting with this marker are logged without a backtrace
const NO_TRACE_MARKER: &str = "notrace - ";

pub struct LoggerGuards {
    pub _tracing_guard: WorkerGuard,
    pub _sentry_guard: Option<sentry::ClientInitGuard>,
}

pub struct Logger {}

impl Logger {
    /// guards have to outlive the server or buffered logs are lost
    pub fn init(cargo_env: CargoEnv, sentry_dsn: Option<String>) -> LoggerGuards {
        let (writer, tracing_guard) = Self::writer(cargo_env);
        let sentry_guard = sentry_dsn.map(|dsn| Self::init_sentry(cargo_env, dsn));

        let registry = tracing_subscriber::registry()
            .with(Self::max_level(cargo_env))
            .with(tracing_subscriber::fmt::layer().with_writer(writer));

        if sentry_guard.is_some() {
            registry.with(sentry_tracing::layer()).init();
        } else {
            registry.init();
        }

        Self::install_panic_hook();

        LoggerGuards {
            _tracing_guard: tracing_guard,
            _sentry_guard: sentry_guard,
        }
    }

    // debug prints every decoded proxy url and rewritten playlist, too much for production
    fn max_level(cargo_env: CargoEnv) -> LevelFilter {
        match cargo_env {
            CargoEnv::Development => LevelFilter::DEBUG,
            CargoEnv::Production => LevelFilter::INFO,
        }
    }

    fn writer(cargo_env: CargoEnv) -> (NonBlocking, WorkerGuard) {
        match cargo_env {
            CargoEnv::Development => tracing_appender::non_blocking(std::io::stdout()),
            CargoEnv::Production => tracing_appender::non_blocking(
                tracing_appender::rolling::daily("logs", "mediaflow.log"),
            ),
        }
    }

    fn init_sentry(cargo_env: CargoEnv, dsn: String) -> sentry::ClientInitGuard {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some(match cargo_env {
                    CargoEnv::Development => "development".into(),
                    CargoEnv::Production => "production".into(),
                }),
                attach_stacktrace: true,
                ..Default::default()
            },
        ))
    }

    fn install_panic_hook() {
        panic::set_hook(Box::new(|info| {
            let thread = thread::current();
            let thread = thread.name().unwrap_or("unknown");

            let msg = info
                .payload()
                .downcast_ref::<&'static str>()
                .copied()
                .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
                .unwrap_or("Box<Any>");

            let location = info
                .location()
                .map(|l| format!(": {}:{}", l.file(), l.line()))
                .unwrap_or_default();

            match msg.strip_prefix(NO_TRACE_MARKER) {
                Some(msg) => error!(
                    target: "panic", "thread '{}' panicked at '{}'{}",
                    thread, msg, location
                ),
                None => error!(
                    target: "panic", "thread '{}' panicked at '{}'{}\n{:?}",
                    thread,
                    msg,
                    location,
                    backtrace::Backtrace::new()
                ),
            }
        }));
    }
}
