//! Logging macros for actors.
//!
//! The macros prefix the message with the current simulation time, the log level and the actor name, and use the actor
//! name as the log target:
//!
//! ```text
//! [12.500 INFO  worker-3] task 7 done
//! ```

/// Logs a message at the error level.
#[macro_export]
macro_rules! log_error {
    ($ctx:expr, $msg:expr) => (
        log::error!(
            target: $ctx.name(),
            "[{:.3} {} {}] {}",
            $ctx.time(),
            $crate::colored::Colorize::red("ERROR"),
            $ctx.name(),
            $msg
        )
    );
    ($ctx:expr, $format:expr, $($arg:tt)+) => (
        log::error!(
            target: $ctx.name(),
            "[{:.3} {} {}] {}",
            $ctx.time(),
            $crate::colored::Colorize::red("ERROR"),
            $ctx.name(),
            format!($format, $($arg)+)
        )
    );
}

/// Logs a message at the warn level.
#[macro_export]
macro_rules! log_warn {
    ($ctx:expr, $msg:expr) => (
        log::warn!(
            target: $ctx.name(),
            "[{:.3} {} {}] {}",
            $ctx.time(),
            $crate::colored::Colorize::yellow("WARN "),
            $ctx.name(),
            $msg
        )
    );
    ($ctx:expr, $format:expr, $($arg:tt)+) => (
        log::warn!(
            target: $ctx.name(),
            "[{:.3} {} {}] {}",
            $ctx.time(),
            $crate::colored::Colorize::yellow("WARN "),
            $ctx.name(),
            format!($format, $($arg)+)
        )
    );
}

/// Logs a message at the info level.
#[macro_export]
macro_rules! log_info {
    ($ctx:expr, $msg:expr) => (
        log::info!(
            target: $ctx.name(),
            "[{:.3} {} {}] {}",
            $ctx.time(),
            $crate::colored::Colorize::green("INFO "),
            $ctx.name(),
            $msg
        )
    );
    ($ctx:expr, $format:expr, $($arg:tt)+) => (
        log::info!(
            target: $ctx.name(),
            "[{:.3} {} {}] {}",
            $ctx.time(),
            $crate::colored::Colorize::green("INFO "),
            $ctx.name(),
            format!($format, $($arg)+)
        )
    );
}

/// Logs a message at the debug level.
#[macro_export]
macro_rules! log_debug {
    ($ctx:expr, $msg:expr) => (
        log::debug!(
            target: $ctx.name(),
            "[{:.3} {} {}] {}",
            $ctx.time(),
            $crate::colored::Colorize::blue("DEBUG"),
            $ctx.name(),
            $msg
        )
    );
    ($ctx:expr, $format:expr, $($arg:tt)+) => (
        log::debug!(
            target: $ctx.name(),
            "[{:.3} {} {}] {}",
            $ctx.time(),
            $crate::colored::Colorize::blue("DEBUG"),
            $ctx.name(),
            format!($format, $($arg)+)
        )
    );
}

/// Logs a message at the trace level.
#[macro_export]
macro_rules! log_trace {
    ($ctx:expr, $msg:expr) => (
        log::trace!(
            target: $ctx.name(),
            "[{:.3} {} {}] {}",
            $ctx.time(),
            $crate::colored::Colorize::cyan("TRACE"),
            $ctx.name(),
            $msg
        )
    );
    ($ctx:expr, $format:expr, $($arg:tt)+) => (
        log::trace!(
            target: $ctx.name(),
            "[{:.3} {} {}] {}",
            $ctx.time(),
            $crate::colored::Colorize::cyan("TRACE"),
            $ctx.name(),
            format!($format, $($arg)+)
        )
    );
}
