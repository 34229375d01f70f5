//! Leveled diagnostic logging for the group core.
//!
//! Mirrors the kernel's own hand-rolled logger (`LogLevel`, module
//! filtering, `debug!`/`info!`/`warn!`/`error!` macros) but emits through a
//! pluggable [`DiagnosticSink`] instead of a VGA/serial console, since the
//! real console is an external collaborator this spec only names, not
//! implements.

use std::fmt;
use std::sync::Mutex;

/// ANSI color codes for terminal output.
pub struct Colors;

impl Colors {
    pub const RESET: &'static str = "\x1b[0m";
    pub const CYAN: &'static str = "\x1b[36m";
    pub const GREEN: &'static str = "\x1b[32m";
    pub const YELLOW: &'static str = "\x1b[33m";
    pub const RED: &'static str = "\x1b[31m";
    pub const DIM: &'static str = "\x1b[2m";
}

/// Log levels in order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    pub fn color(&self) -> &'static str {
        match self {
            LogLevel::Debug => Colors::CYAN,
            LogLevel::Info => Colors::GREEN,
            LogLevel::Warn => Colors::YELLOW,
            LogLevel::Error => Colors::RED,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Where formatted log lines go. The real virtual-console/log layer is out
/// of scope for this core; callers embedding it in a kernel build supply
/// their own sink.
pub trait DiagnosticSink: Send {
    fn emit(&self, line: &str);
}

/// Default sink used outside of a real kernel build.
pub struct StdoutSink;

impl DiagnosticSink for StdoutSink {
    fn emit(&self, line: &str) {
        println!("{line}");
    }
}

/// Logger configuration.
pub struct LoggerConfig {
    pub level: LogLevel,
    pub enable_colors: bool,
    pub module_filter: ModuleFilter,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            enable_colors: true,
            module_filter: ModuleFilter::default(),
        }
    }
}

/// Allow/deny list over module path prefixes. Disabled patterns win over
/// enabled ones; with no patterns at all, `default_enabled` decides.
#[derive(Default)]
pub struct ModuleFilter {
    enabled: Vec<&'static str>,
    disabled: Vec<&'static str>,
    default_enabled: bool,
}

impl ModuleFilter {
    pub fn new() -> Self {
        Self {
            enabled: Vec::new(),
            disabled: Vec::new(),
            default_enabled: true,
        }
    }

    pub fn enable_module(&mut self, module: &'static str) {
        self.disabled.retain(|m| *m != module);
        if !self.enabled.contains(&module) {
            self.enabled.push(module);
        }
    }

    pub fn disable_module(&mut self, module: &'static str) {
        self.enabled.retain(|m| *m != module);
        if !self.disabled.contains(&module) {
            self.disabled.push(module);
        }
    }

    pub fn is_module_enabled(&self, module: &str) -> bool {
        if self.disabled.iter().any(|p| module.starts_with(p)) {
            return false;
        }
        if self.enabled.iter().any(|p| module.starts_with(p)) {
            return true;
        }
        self.default_enabled
    }
}

struct Logger {
    config: LoggerConfig,
    sink: Box<dyn DiagnosticSink>,
}

impl Logger {
    fn new() -> Self {
        Self {
            config: LoggerConfig::default(),
            sink: Box::new(StdoutSink),
        }
    }

    fn log(&self, level: LogLevel, module: &str, args: fmt::Arguments<'_>) {
        if level < self.config.level || !self.config.module_filter.is_module_enabled(module) {
            return;
        }
        let line = if self.config.enable_colors {
            format!(
                "[{}{}{}] [{}{module}{}] {args}",
                level.color(),
                level.name(),
                Colors::RESET,
                Colors::DIM,
                Colors::RESET,
            )
        } else {
            format!("[{}] [{module}] {args}", level.name())
        };
        self.sink.emit(&line);
    }
}

lazy_static::lazy_static! {
    static ref LOGGER: Mutex<Logger> = Mutex::new(Logger::new());
}

/// Replace the global diagnostic sink (the external virtual-console/log
/// collaborator).
pub fn set_sink(sink: Box<dyn DiagnosticSink>) {
    LOGGER.lock().unwrap().sink = sink;
}

pub fn set_level(level: LogLevel) {
    LOGGER.lock().unwrap().config.level = level;
}

pub fn with_module_filter(f: impl FnOnce(&mut ModuleFilter)) {
    f(&mut LOGGER.lock().unwrap().config.module_filter);
}

#[doc(hidden)]
pub fn __log(level: LogLevel, module: &str, args: fmt::Arguments<'_>) {
    LOGGER.lock().unwrap().log(level, module, args);
}

macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log::__log($crate::log::LogLevel::Debug, module_path!(), format_args!($($arg)*))
    };
}

macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log::__log($crate::log::LogLevel::Info, module_path!(), format_args!($($arg)*))
    };
}

macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log::__log($crate::log::LogLevel::Warn, module_path!(), format_args!($($arg)*))
    };
}

macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log::__log($crate::log::LogLevel::Error, module_path!(), format_args!($($arg)*))
    };
}

pub(crate) use debug;
pub(crate) use error;
pub(crate) use info;
pub(crate) use warn;
