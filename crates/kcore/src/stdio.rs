use alloc::{boxed::Box, collections::TryReserveError, vec::Vec};
use core::fmt::{self, Write};

use hal::{
    interrupts::{self, SpinLock, SpinLockGuard},
    task::hw_thread_id,
};
use log::{Level, LevelFilter, Log};
use owo_colors::OwoColorize;
use spin::{Lazy, Once};
use tracing::Dispatch;

use crate::{
    config::KernelConfig,
    error::{KernErrorKind, KernResult},
    subscriber::KernelSubscriber,
};

pub fn stdout() -> Stdout {
    Stdout(())
}

#[derive(Debug)]
pub struct Stdout(());

impl Stdout {
    pub fn lock<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut StdoutLock<'_>) -> T,
    {
        interrupts::without(|g| {
            let guard = STDOUT.lock(g);
            let mut stdout_lock = StdoutLock { guard };
            f(&mut stdout_lock)
        })
    }
}

impl Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.lock(|w| w.write_str(s))
    }

    fn write_char(&mut self, c: char) -> fmt::Result {
        self.lock(|w| w.write_char(c))
    }

    fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> fmt::Result {
        self.lock(|w| w.write_fmt(args))
    }
}

pub struct StdoutLock<'a> {
    guard: SpinLockGuard<'a, StdoutInner>,
}

impl<'a> StdoutLock<'a> {
    /// Mirror everything written from now on into `writer` as well.
    pub fn register_additional_writer<W>(&mut self, writer: W) -> KernResult<()>
    where
        W: Write + Send + 'static,
    {
        self.guard
            .extra_writers
            .try_reserve(1)
            .map_err(|_: TryReserveError| KernErrorKind::AllocError)?;

        self.guard.extra_writers.push(Box::new(writer));

        Ok(())
    }
}

impl<'a> Write for StdoutLock<'a> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.guard.write_str(s)
    }
}

#[derive(Debug)]
pub struct StdoutLogger {
    color: bool,
}

impl Log for StdoutLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        _ = stdout().lock(|w| -> fmt::Result {
            w.write_str("[")?;
            if self.color {
                match record.level() {
                    Level::Error => write!(w, "{}", record.level().red().bold())?,
                    Level::Warn => write!(w, "{}", record.level().yellow().bold())?,
                    Level::Info => write!(w, "{}", record.level().green().bold())?,
                    Level::Debug => write!(w, "{}", record.level().blue().bold())?,
                    Level::Trace => write!(w, "{}", record.level().white().bold())?,
                }
                write!(w, " {}", record.target().bold())?;
                write!(w, " {}={:#x}", "cpu".bold(), hw_thread_id())?;
            } else {
                write!(w, "{} {} cpu={:#x}", record.level(), record.target(), hw_thread_id())?;
            }
            w.write_char(']')?;
            writeln!(w, " {}", record.args())?;
            Ok(())
        });
    }

    fn flush(&self) {}
}

static LOGGER: Once<StdoutLogger> = Once::new();

/// Route `log` records and `tracing` events to the console.
pub fn init(config: &KernelConfig) -> KernResult<()> {
    let logger = LOGGER.call_once(|| StdoutLogger {
        color: config.color(),
    });
    log::set_logger(logger).map_err(|_| KernErrorKind::LoggerInstalled)?;
    log::set_max_level(config.log_level());

    let subscriber = KernelSubscriber::new(to_tracing(config.log_level()));
    tracing::dispatcher::set_global_default(Dispatch::new(subscriber))
        .map_err(|_| KernErrorKind::LoggerInstalled)?;
    Ok(())
}

fn to_tracing(level: LevelFilter) -> tracing::level_filters::LevelFilter {
    use tracing::level_filters::LevelFilter as T;

    match level {
        LevelFilter::Off => T::OFF,
        LevelFilter::Error => T::ERROR,
        LevelFilter::Warn => T::WARN,
        LevelFilter::Info => T::INFO,
        LevelFilter::Debug => T::DEBUG,
        LevelFilter::Trace => T::TRACE,
    }
}

static STDOUT: Lazy<SpinLock<StdoutInner>> = Lazy::new(|| SpinLock::new(StdoutInner::new()));

struct StdoutInner {
    console: console::Console,
    extra_writers: Vec<Box<dyn Write + Send>>,
}

impl StdoutInner {
    fn new() -> Self {
        Self {
            console: console::Console::new(),
            extra_writers: Vec::new(),
        }
    }
}

impl Write for StdoutInner {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.console.write_str(s)?;
        for writer in self.extra_writers.iter_mut() {
            writer.write_str(s)?;
        }
        Ok(())
    }
}

#[cfg(target_os = "none")]
mod console {
    use core::fmt::{self, Write};

    use uart_16550::SerialPort;

    const PORT_NUMBER: u16 = 0x3f8;

    pub struct Console(SerialPort);

    // The port is only touched with the stdout lock held.
    unsafe impl Send for Console {}

    impl Console {
        pub fn new() -> Self {
            let mut serial_port = unsafe { SerialPort::new(PORT_NUMBER) };
            serial_port.init();
            Self(serial_port)
        }
    }

    impl Write for Console {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.0.write_str(s)
        }
    }
}

#[cfg(not(target_os = "none"))]
mod console {
    use std::{
        fmt::{self, Write},
        io::{self, Write as _},
    };

    pub struct Console(io::Stderr);

    impl Console {
        pub fn new() -> Self {
            Self(io::stderr())
        }
    }

    impl Write for Console {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.0.write_all(s.as_bytes()).map_err(|_| fmt::Error)
        }
    }
}
