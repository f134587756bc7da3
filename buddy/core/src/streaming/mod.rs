//! Streaming
//!
//! Incremental response assembly for generative calls.
//!
//! - [`ChunkBuffer`] / [`BufferReader`]: single-writer, multi-reader text accumulation
//! - [`StreamSession`]: lifecycle, cancellation and the producer loop
//! - [`SessionObserver`]: a consumer's weak view of a session

mod chunk_buffer;
mod session;

pub use chunk_buffer::{BufferContents, BufferReader, ChunkBuffer};
pub use session::{FailureKind, SessionObserver, SessionState, StreamSession};
