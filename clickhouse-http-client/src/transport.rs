//! HTTP transport layer.
//!
//! - [`TransportBody`]: outbound request bodies (empty, full, streamed, gzipped)
//! - connector: TCP and rustls setup for new connections (feature-gated TLS)
//! - channel: one HTTP/1.1 connection and the task driving it
//! - pool: fixed-size slot pool with admission control, keep-alive reuse and
//!   idle-TTL staleness checks
//!
//! # Feature Flags
//!
//! - `tls` (default) - Enables `tls-ring` + `tls-native-roots` for convenience
//! - `tls-ring` / `tls-aws-lc` - Crypto providers
//! - `tls-native-roots` / `tls-webpki-roots` - Root certificates

mod body;
mod channel;
mod connector;
mod pool;

pub use body::{BodyStream, TransportBody};
pub use pool::PoolStatus;

pub(crate) use connector::Connector;
pub(crate) use pool::{ChannelPool, Lease, PoolConfig};

// Re-export rustls types that users might need for TLS configuration
pub use rustls::ClientConfig as TlsClientConfig;
