//! A tiny leveled logger over the UART byte sink.
//!
//! Grounded on the original C sources' `tiny_printf(LEVEL, "[MODULE] ...")`
//! call sites throughout `fat32.c`/`virtio_mmio.c`, and on the teacher's
//! layering of a `core::fmt::Write` console over a raw byte sink
//! (`printf.rs`/`console.rs`). Unlike the original, the level filter is a
//! compile-time const rather than a runtime-configurable global, since
//! there is no console here to reconfigure at runtime.

use core::fmt::Write;

use crate::uart::UART;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

/// Messages below this level are compiled out of the `log_*!` macros.
pub const LOG_LEVEL: Level = Level::Info;

#[doc(hidden)]
pub fn _log(level: Level, module: &str, args: core::fmt::Arguments<'_>) {
    if level < LOG_LEVEL {
        return;
    }
    let tag = match level {
        Level::Debug => "DEBUG",
        Level::Info => "INFO",
        Level::Warn => "WARN",
        Level::Error => "ERROR",
    };
    let mut uart = &UART;
    let _ = write!(uart, "[{}][{}] ", module, tag);
    let _ = uart.write_fmt(args);
    let _ = uart.write_str("\n");
}

#[macro_export]
macro_rules! log_debug {
    ($module:expr, $($arg:tt)*) => {
        $crate::log::_log($crate::log::Level::Debug, $module, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($module:expr, $($arg:tt)*) => {
        $crate::log::_log($crate::log::Level::Info, $module, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($module:expr, $($arg:tt)*) => {
        $crate::log::_log($crate::log::Level::Warn, $module, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($module:expr, $($arg:tt)*) => {
        $crate::log::_log($crate::log::Level::Error, $module, format_args!($($arg)*))
    };
}
