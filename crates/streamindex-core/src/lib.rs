//! streamindex-core — foundation for the resumable streaming-indexer runner.
//!
//! # Architecture
//!
//! ```text
//! Runner
//!   ├── RunnerConfig        (validated endpoints, reset flag)
//!   ├── StreamClient        (channel to the remote service, handshake)
//!   ├── StorageManager      (persisted cursor + configuration, scoped writes)
//!   └── Indexer             (user policy: decode, handle, reconnect decision)
//! ```
//!
//! The runner consumes the stream strictly sequentially: one message, one
//! cursor-scoped storage transaction, one handler invocation — then the next
//! message. Failures inside the loop go to the indexer's reconnection policy;
//! a reconnect resumes from the last persisted cursor.

pub mod config;
pub mod cursor;
pub mod error;
pub mod indexer;
pub mod message;
pub mod runner;
pub mod storage;
pub mod stream;

pub use config::{DataFinality, Filter, RunnerConfig, StreamConfiguration};
pub use cursor::Cursor;
pub use error::RunnerError;
pub use indexer::{Indexer, ReconnectDecision, ScopedContext};
pub use message::{ConfigureRequest, RawBatch, StreamMessage};
pub use runner::{Runner, RunnerState};
pub use storage::{MemoryStorage, StorageManager, StorageScope};
pub use stream::{StreamChannel, StreamClient};
