//! Configuration.
//!
//! - [`ConfigOverrides`]: one optional layer (builder or URL), merged in order
//! - [`ClientConfig`]: the resolved configuration, defaults applied once
//! - [`QueryOptions`]: per-call overrides, cancel token and timeout

mod merge;
mod options;

pub use merge::{
    ClientConfig, ConfigOverrides, DEFAULT_DATABASE, DEFAULT_IDLE_SOCKET_TTL,
    DEFAULT_MAX_OPEN_CONNECTIONS, DEFAULT_REQUEST_TIMEOUT, DEFAULT_URL, DEFAULT_USERNAME,
};
pub use options::{Credentials, QueryOptions};
pub(crate) use options::upsert;
