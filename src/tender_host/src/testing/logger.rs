use std::sync::Mutex;

use log::{set_logger, set_max_level, Level, LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;

pub(crate) static LOGGER: Logger = Logger {
    log_calls: Mutex::new(Vec::new()),
};
static INITIALIZED: OnceCell<()> = OnceCell::new();

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct LogCall {
    pub(crate) level: Level,
    pub(crate) args: String,
}

pub(crate) struct Logger {
    log_calls: Mutex<Vec<LogCall>>,
}

impl Logger {
    /// Install `LOGGER` as the process-wide `log` logger. Safe to call from
    /// every test; only the first call installs it.
    pub(crate) fn initialize_test_logger() {
        INITIALIZED.get_or_init(|| {
            set_logger(&LOGGER).unwrap();
            set_max_level(LevelFilter::Trace);
        });
    }

    pub(crate) fn test_log_records<F: Fn(&Vec<LogCall>)>(&self, f: F) {
        let log_calls = self.log_calls.lock().unwrap();
        f(&log_calls);
    }
}

impl Log for Logger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        self.log_calls.lock().unwrap().push(LogCall {
            level: record.level(),
            args: format!("{}", record.args()),
        });
    }

    fn flush(&self) {}
}
