//! Core protocol types for the ClickHouse HTTP driver.
//!
//! This crate holds the pieces of the HTTP query interface that do not depend
//! on any transport, so they can be tested without a live connection.
//!
//! ## Modules
//!
//! - `error`: Error kinds and sentinel framing errors
//! - `codec`: Compression codec trait, gzip codec and incremental gzip coders
//! - `compression`: Compression encoding negotiation
//! - `format`: The closed set of output formats and their decode policies
//! - [`sentinel`]: The embedded exception block appended to a streamed body

mod codec;
mod compression;
mod error;
mod format;
pub mod sentinel;

pub use codec::*;
pub use compression::*;
pub use error::*;
pub use format::*;
