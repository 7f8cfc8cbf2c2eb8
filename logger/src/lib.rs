use std::{
    fs::File,
    io::{self, Write},
    sync::Mutex,
    time::Instant,
};

use chrono::Utc;
use once_cell::sync::OnceCell;

static LOGGER: OnceCell<Logger> = OnceCell::new();

struct LoggerImpl {
    sink: Box<dyn Write + Send>,
    start_instant: Instant,
}

impl LoggerImpl {
    fn new(kind: LogKind) -> Self {
        let start_instant = Instant::now();
        match kind {
            LogKind::Stdout => Self {
                sink: Box::new(io::stdout()),
                start_instant,
            },
            LogKind::File => {
                let now = Utc::now();
                let filename = format!("tangelo-{}.log", now.timestamp());
                let path = std::env::temp_dir().join(filename);
                Self {
                    sink: Box::new(File::create(path).unwrap()),
                    start_instant,
                }
            }
        }
    }

    fn log<T>(&mut self, data: T)
    where
        T: std::fmt::Display,
    {
        let elapsed = self.start_instant.elapsed();
        let seconds = elapsed.as_secs();
        let hours = seconds / 3600;
        let minutes = (seconds / 60) % 60;
        let seconds = seconds % 60;
        let milliseconds = elapsed.subsec_millis();

        writeln!(
            self.sink,
            "[{hours:02}:{minutes:02}:{seconds:02}.{milliseconds:03}] {data}"
        )
        .ok();
    }
}

/// `LogKind` selects the log sink: the console or a file in the temp
/// directory.
#[derive(Copy, Clone, PartialEq, Eq)]
pub enum LogKind {
    Stdout,
    File,
}

struct Logger {
    inner_impl: Mutex<LoggerImpl>,
}

impl Logger {
    fn new(kind: LogKind) -> Self {
        Self {
            inner_impl: Mutex::new(LoggerImpl::new(kind)),
        }
    }

    fn log<T>(&self, data: T)
    where
        T: std::fmt::Display,
    {
        if let Ok(ref mut inner) = self.inner_impl.lock() {
            inner.log(data);
        }
    }
}

/// Installs the global logger. Calling it twice keeps the first sink.
pub fn init_logger(kind: LogKind) {
    LOGGER.set(Logger::new(kind)).ok();
}

/// Logs a line through the global logger. A no-op until [`init_logger`] has
/// been called, so library code can log unconditionally.
pub fn log<T>(data: T)
where
    T: std::fmt::Display,
{
    LOGGER.get().map_or((), |logger| logger.log(data));
}
