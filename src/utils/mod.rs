//! Helper utilities, functions, and macros.

#[macro_use]
mod print;

#[macro_use]
mod config;

mod error;
mod safetcp;
mod timer;

pub use config::ConfigFile;
pub use error::CacheSyncError;
pub use print::{logger_init, me_prefix, set_me, ME};
pub use timer::{Clock, ManualClock, SystemClock, Timer};

pub(crate) use safetcp::{
    frame_read, frame_read_raw, frame_write, tcp_bind, tcp_connect,
};
