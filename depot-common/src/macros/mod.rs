// Level-checked logging macros.
// These forward to depot_common::logging::Logger methods and skip formatting
// entirely when the level is disabled for the logger's component.

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => {{
        if $crate::log::log_enabled!(
            target: ($logger).component().target(),
            $crate::log::Level::Debug
        ) {
            ($logger).debug_args(format_args!($($arg)*));
        }
    }}
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => {{
        if $crate::log::log_enabled!(
            target: ($logger).component().target(),
            $crate::log::Level::Info
        ) {
            ($logger).info_args(format_args!($($arg)*));
        }
    }}
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => {{
        if $crate::log::log_enabled!(
            target: ($logger).component().target(),
            $crate::log::Level::Warn
        ) {
            ($logger).warn_args(format_args!($($arg)*));
        }
    }}
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => {{
        if $crate::log::log_enabled!(
            target: ($logger).component().target(),
            $crate::log::Level::Error
        ) {
            ($logger).error_args(format_args!($($arg)*));
        }
    }}
}
