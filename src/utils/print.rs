//! Helper macros for logging (console printing), prefixed by node identity.

use std::sync::OnceLock;

use env_logger::Env;

/// Global variable holding the node identity string (`"<app>.<server>"`)
/// used as logging prefix.
pub static ME: OnceLock<String> = OnceLock::new();

/// Sets the node identity logging prefix. Only the first call takes effect;
/// returns false if the identity has already been set to something else.
pub fn set_me(identity: impl Into<String>) -> bool {
    let identity = identity.into();
    match ME.set(identity.clone()) {
        Ok(()) => true,
        Err(_) => ME.get().is_some_and(|me| *me == identity),
    }
}

/// Gets the current logging prefix, `-` if identity not set yet.
#[doc(hidden)]
pub fn me_prefix() -> &'static str {
    ME.get().map_or("-", |me| me.as_str())
}

/// Log message at given `log::Level` with parenthesized identity prefix.
/// Use the level-specific wrappers below instead of this one.
#[doc(hidden)]
#[macro_export]
macro_rules! pf_log {
    ($level:expr, $($fmt_args:tt)*) => {
        log::log!(
            $level,
            "({}) {}",
            $crate::me_prefix(),
            format!($($fmt_args)*)
        )
    };
}

/// Log TRACE message with parenthesized prefix.
#[macro_export]
macro_rules! pf_trace {
    ($($fmt_args:tt)*) => { $crate::pf_log!(log::Level::Trace, $($fmt_args)*) };
}

/// Log DEBUG message with parenthesized prefix.
#[macro_export]
macro_rules! pf_debug {
    ($($fmt_args:tt)*) => { $crate::pf_log!(log::Level::Debug, $($fmt_args)*) };
}

/// Log INFO message with parenthesized prefix.
///
/// Example:
/// ```no_compile
/// pf_info!("checkpoint saved to {}", path.display());
/// ```
#[macro_export]
macro_rules! pf_info {
    ($($fmt_args:tt)*) => { $crate::pf_log!(log::Level::Info, $($fmt_args)*) };
}

/// Log WARN message with parenthesized prefix.
#[macro_export]
macro_rules! pf_warn {
    ($($fmt_args:tt)*) => { $crate::pf_log!(log::Level::Warn, $($fmt_args)*) };
}

/// Log ERROR message with parenthesized prefix.
#[macro_export]
macro_rules! pf_error {
    ($($fmt_args:tt)*) => { $crate::pf_log!(log::Level::Error, $($fmt_args)*) };
}

/// Initialize `env_logger` to desired configuration if haven't.
pub fn logger_init() {
    let _ =
        env_logger::Builder::from_env(Env::default().default_filter_or("info"))
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .try_init();
}

/// Log an error string to logger and then return a `CacheSyncError`
/// containing the string.
///
/// Example:
/// ```no_compile
/// let e = logged_err!("config key '{}' missing", key);
/// ```
#[macro_export]
macro_rules! logged_err {
    ($($fmt_args:tt)*) => {
        {
            $crate::pf_error!($($fmt_args)*);
            Err($crate::CacheSyncError::msg(format!($($fmt_args)*)))
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::CacheSyncError;

    #[test]
    fn error_with_args() {
        assert_eq!(
            logged_err!("sync_once returned code {}", -3),
            Err::<(), CacheSyncError>(CacheSyncError::msg(
                "sync_once returned code -3"
            ))
        );
    }

    #[test]
    fn identity_set_once() {
        assert!(set_me("App.Server"));
        assert!(set_me("App.Server"));
        assert!(!set_me("App.Other"));
        assert_eq!(me_prefix(), "App.Server");
    }
}
