//! Leveled logging for modules and hosts.
//!
//! Modules log through the `pr_*!` macros ([`pr_info!`], [`pr_alert!`], …),
//! which forward a level and preformatted arguments to a single global log
//! function. The host installs that function with [`set_log_fn`]. Until it
//! does, every message is discarded.

use core::fmt;
use core::sync::atomic::{AtomicPtr, Ordering};

// ---------------------------------------------------------------------------
// Log levels (printk numbering, lower = more severe)
// ---------------------------------------------------------------------------

/// Message severity, numbered like the kernel's `KERN_*` prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    /// System is unusable.
    Emerg = 0,
    /// Action must be taken immediately.
    Alert = 1,
    /// Critical condition.
    Crit = 2,
    /// Error condition.
    Err = 3,
    /// Warning condition.
    Warning = 4,
    /// Normal but significant condition.
    Notice = 5,
    /// Informational.
    Info = 6,
    /// Debug-level message.
    Debug = 7,
}

impl LogLevel {
    /// All levels, most severe first.
    pub const ALL: [Self; 8] = [
        Self::Emerg,
        Self::Alert,
        Self::Crit,
        Self::Err,
        Self::Warning,
        Self::Notice,
        Self::Info,
        Self::Debug,
    ];

    /// Returns the fixed-width tag printed in front of a message.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Emerg => "EMERG",
            Self::Alert => "ALERT",
            Self::Crit => "CRIT ",
            Self::Err => "ERR  ",
            Self::Warning => "WARN ",
            Self::Notice => "NOTE ",
            Self::Info => "INFO ",
            Self::Debug => "DEBUG",
        }
    }

    /// Returns the numeric printk level.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a printk level number, clamping anything above 7 to `Debug`.
    pub const fn from_u8(val: u8) -> Self {
        match val {
            0 => Self::Emerg,
            1 => Self::Alert,
            2 => Self::Crit,
            3 => Self::Err,
            4 => Self::Warning,
            5 => Self::Notice,
            6 => Self::Info,
            _ => Self::Debug,
        }
    }

    /// Parses a level name as written in configuration files
    /// (`"info"`, `"warn"`, `"err"`, …). Case-insensitive.
    pub fn parse(name: &str) -> Option<Self> {
        let level = match name.trim() {
            n if n.eq_ignore_ascii_case("emerg") => Self::Emerg,
            n if n.eq_ignore_ascii_case("alert") => Self::Alert,
            n if n.eq_ignore_ascii_case("crit") => Self::Crit,
            n if n.eq_ignore_ascii_case("err") || n.eq_ignore_ascii_case("error") => Self::Err,
            n if n.eq_ignore_ascii_case("warn") || n.eq_ignore_ascii_case("warning") => {
                Self::Warning
            }
            n if n.eq_ignore_ascii_case("notice") => Self::Notice,
            n if n.eq_ignore_ascii_case("info") => Self::Info,
            n if n.eq_ignore_ascii_case("debug") => Self::Debug,
            _ => return None,
        };
        Some(level)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag().trim_end())
    }
}

// ---------------------------------------------------------------------------
// Global log function
// ---------------------------------------------------------------------------

/// The signature of the global log function.
pub type LogFn = fn(LogLevel, fmt::Arguments<'_>);

fn null_log(_level: LogLevel, _args: fmt::Arguments<'_>) {}

static LOG_FN: AtomicPtr<()> = AtomicPtr::new(null_log as *mut ());

/// Installs the global log function.
///
/// May be called more than once; later calls replace the earlier sink.
pub fn set_log_fn(f: LogFn) {
    LOG_FN.store(f as *mut (), Ordering::Release);
}

/// Restores the discarding log function.
pub fn clear_log_fn() {
    LOG_FN.store(null_log as *mut (), Ordering::Release);
}

#[inline]
fn load_log_fn() -> LogFn {
    let ptr = LOG_FN.load(Ordering::Acquire);
    // SAFETY: LOG_FN only ever holds `null_log` or a pointer stored by
    // `set_log_fn`, both of which are valid `LogFn` values.
    unsafe { core::mem::transmute::<*mut (), LogFn>(ptr) }
}

/// Implementation detail of [`klog!`]. Not public API.
#[doc(hidden)]
pub fn _log(level: LogLevel, args: fmt::Arguments<'_>) {
    load_log_fn()(level, args);
}

/// Logs a message at the given [`LogLevel`].
#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {
        $crate::log::_log($level, format_args!($($arg)*))
    };
}

/// Logs an emergency message (level 0).
#[macro_export]
macro_rules! pr_emerg {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Emerg, $($arg)*) };
}

/// Logs an alert (level 1).
#[macro_export]
macro_rules! pr_alert {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Alert, $($arg)*) };
}

/// Logs a critical message (level 2).
#[macro_export]
macro_rules! pr_crit {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Crit, $($arg)*) };
}

/// Logs an error (level 3).
#[macro_export]
macro_rules! pr_err {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Err, $($arg)*) };
}

/// Logs a warning (level 4).
#[macro_export]
macro_rules! pr_warn {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Warning, $($arg)*) };
}

/// Logs a notice (level 5).
#[macro_export]
macro_rules! pr_notice {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Notice, $($arg)*) };
}

/// Logs an informational message (level 6).
#[macro_export]
macro_rules! pr_info {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Info, $($arg)*) };
}

/// Logs a debug message (level 7).
#[macro_export]
macro_rules! pr_debug {
    ($($arg:tt)*) => { $crate::klog!($crate::log::LogLevel::Debug, $($arg)*) };
}
