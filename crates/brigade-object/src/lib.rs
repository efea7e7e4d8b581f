//! Chunked JSON record streams.
//!
//! An [`ObjectBrigade`] packs many small records into each slot of a
//! bucket brigade. Every chunk is one newline-delimited JSON file; readers
//! demultiplex it back into individual [`Record`]s, each carrying a forked
//! completion token, so the chunk is retired (and, for a queue, deleted)
//! only after every record in it has been processed.
//!
//! Record offsets are `chunk * chunk_size + index`. A short chunk written
//! by [`ObjectBrigade::close`] or [`ObjectBrigade::flush`] in the middle of
//! a stream leaves a gap in that offset space.

pub mod brigade;
pub mod chunk;
pub mod config;
pub mod error;
pub mod reader;

// Re-export primary types at crate root for ergonomic imports.
pub use brigade::{ObjectBrigade, CHUNK_SIZE_TAG};
pub use config::{ObjectConfig, CHUNK_EXTENSION, DEFAULT_CHUNK_SIZE};
pub use error::{ObjectError, ObjectResult};
pub use reader::{ObjectReader, Record};
