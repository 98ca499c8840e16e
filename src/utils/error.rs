//! Customized unified error type.

use std::error;
use std::fmt;
use std::io;
use std::net;
use std::num;
use std::string;

/// Customized error type for cachesync.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct CacheSyncError(pub(crate) String);

impl CacheSyncError {
    pub fn msg(msg: impl ToString) -> Self {
        CacheSyncError(msg.to_string())
    }
}

impl fmt::Display for CacheSyncError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0) // do not display literal quotes
    }
}

impl error::Error for CacheSyncError {}

// Helper macro for saving boiler-plate `impl From<X>`s for transparent
// conversion from various common error types to `CacheSyncError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for CacheSyncError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                CacheSyncError(e.to_string())
            }
        }
    };
}

// Helper macro for saving boiler-plate `impl From<X<T>>`s for transparent
// conversion from various common generic error types to `CacheSyncError`.
macro_rules! impl_from_error_generic {
    ($error:ty) => {
        impl<T> From<$error> for CacheSyncError {
            fn from(e: $error) -> CacheSyncError {
                CacheSyncError::msg(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(string::FromUtf8Error);
impl_from_error!(num::ParseIntError);
impl_from_error!(net::AddrParseError);
impl_from_error!(toml::ser::Error);
impl_from_error!(toml::de::Error);
impl_from_error!(rmp_serde::encode::Error);
impl_from_error!(rmp_serde::decode::Error);
impl_from_error!(ctrlc::Error);
impl_from_error!(tokio::time::error::Elapsed);
impl_from_error!(tokio::task::JoinError);

impl_from_error_generic!(tokio::sync::watch::error::SendError<T>);
