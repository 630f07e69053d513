use std::sync::Once;

use env_logger::Env;
use log::LevelFilter;

static RUST_LOG_ONCE: Once = Once::new();

/// Level from `MICROBIT_LOG`, then `RUST_LOG`, defaulting to `info`.
pub fn env_level() -> LevelFilter {
    std::env::var("MICROBIT_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .as_deref()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info)
}

fn level_to_str(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}

/// Initialize logging for Rust binaries (stderr formatter).
///
/// An explicit `level` wins; otherwise it comes from `MICROBIT_LOG`/`RUST_LOG`.
pub fn init_rust_logging_with(level: Option<LevelFilter>) {
    let level = level.unwrap_or_else(env_level);
    RUST_LOG_ONCE.call_once(|| {
        let env = Env::default().default_filter_or(level_to_str(level));
        env_logger::Builder::from_env(env)
            .filter_level(level)
            .format_timestamp_millis()
            .format_module_path(true)
            .format_target(false)
            .init();
    });
}

#[cfg(feature = "python")]
pub use python_bridge::init_python_logging;

/// Forwards `log` records into Python's `logging` module.
#[cfg(feature = "python")]
mod python_bridge {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use log::{Level, LevelFilter, Log, Metadata, Record};
    use once_cell::sync::OnceCell;
    use pyo3::prelude::*;
    use pyo3::types::PyModule;

    static PY_LOGGER: OnceCell<&'static PyLogger> = OnceCell::new();

    struct PyLogger {
        filter: Mutex<LevelFilter>,
        logging_mod: Py<PyModule>,
        // target -> logging.Logger
        loggers: Mutex<HashMap<String, Py<PyAny>>>,
    }

    fn py_level(level: Level) -> usize {
        match level {
            Level::Error => 40,
            Level::Warn => 30,
            Level::Info => 20,
            Level::Debug => 10,
            Level::Trace => 5,
        }
    }

    impl PyLogger {
        fn logger<'py>(&self, py: Python<'py>, target: &str) -> PyResult<Bound<'py, PyAny>> {
            let mut loggers = self.loggers.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(logger) = loggers.get(target) {
                return Ok(logger.bind(py).clone());
            }
            let logger = self
                .logging_mod
                .bind(py)
                .getattr("getLogger")?
                .call1((target,))?;
            loggers.insert(target.to_string(), logger.clone().unbind());
            Ok(logger)
        }
    }

    impl Log for PyLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            let filter = *self.filter.lock().unwrap_or_else(|p| p.into_inner());
            metadata.level().to_level_filter() <= filter
        }

        fn log(&self, record: &Record) {
            if !self.enabled(record.metadata()) {
                return;
            }
            let target = record.target().replace("::", ".");
            let message = record.args().to_string();
            Python::attach(|py| {
                let sent = self
                    .logger(py, &target)
                    .and_then(|l| l.call_method1("log", (py_level(record.level()), message)));
                if let Err(e) = sent {
                    e.restore(py);
                }
            });
        }

        fn flush(&self) {}
    }

    /// Install the bridge; later calls only adjust the level.
    pub fn init_python_logging(py: Python<'_>, level: LevelFilter) -> PyResult<()> {
        let logger = PY_LOGGER.get_or_try_init(|| -> PyResult<&'static PyLogger> {
            let logger = PyLogger {
                filter: Mutex::new(level),
                logging_mod: py.import("logging")?.unbind(),
                loggers: Mutex::new(HashMap::new()),
            };
            let leaked: &'static PyLogger = Box::leak(Box::new(logger));
            // another logger may already be installed (e.g. env_logger); keep it
            let _ = log::set_logger(leaked);
            Ok(leaked)
        })?;
        *logger.filter.lock().unwrap_or_else(|p| p.into_inner()) = level;
        log::set_max_level(level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_round_trip() {
        for level in [
            LevelFilter::Off,
            LevelFilter::Error,
            LevelFilter::Warn,
            LevelFilter::Info,
            LevelFilter::Debug,
            LevelFilter::Trace,
        ] {
            assert_eq!(level_to_str(level).parse::<LevelFilter>().unwrap(), level);
        }
    }
}
