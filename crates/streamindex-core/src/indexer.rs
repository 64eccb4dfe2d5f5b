//! The indexer trait — the user-supplied policy object driven by the runner.

use async_trait::async_trait;

use crate::config::StreamConfiguration;
use crate::cursor::Cursor;
use crate::error::RunnerError;
use crate::storage::StorageScope;

/// Context handed to data and invalidate handlers.
///
/// Exactly two fields: the caller-supplied user context and the storage scope
/// for the current message. Everything the handler writes through `storage`
/// commits atomically under the message's cursor when the scope is released.
pub struct ScopedContext<'a, C> {
    /// The user context passed to [`Runner::run`](crate::runner::Runner::run).
    pub context: &'a mut C,
    /// Write handle bound to the current message's cursor.
    pub storage: &'a mut dyn StorageScope,
}

/// Outcome of the reconnection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Re-handshake and resume from the last persisted cursor.
    Reconnect,
    /// Give up; the runner returns the original error to its caller.
    Shutdown,
}

impl ReconnectDecision {
    pub fn should_reconnect(&self) -> bool {
        matches!(self, Self::Reconnect)
    }
}

/// A streaming indexer: declares what to stream, decodes raw batches, reacts
/// to new data and invalidation, and decides whether failures are worth
/// retrying.
///
/// The runner drives exactly one message at a time; handlers never run
/// concurrently with each other or with the reconnection policy.
#[async_trait]
pub trait Indexer: Send {
    /// Caller-supplied context threaded through every handler call.
    type Context: Send;
    /// Decoded form of one raw batch.
    type Data: Send;

    /// Stable identifier used to namespace all persisted state.
    fn indexer_id(&self) -> &str;

    /// The configuration to open the stream with. `starting_cursor` is a
    /// static default; a persisted cursor from a previous run overrides it.
    fn initial_configuration(&self) -> StreamConfiguration;

    /// Decode one raw batch into domain data.
    fn decode_data(&self, batch: &[u8]) -> Result<Self::Data, RunnerError>;

    /// React to new data. Storage writes go through `ctx.storage` and commit
    /// under the message's end cursor.
    async fn handle_data(
        &mut self,
        ctx: ScopedContext<'_, Self::Context>,
        data: Self::Data,
    ) -> Result<(), RunnerError>;

    /// React to invalidation: data delivered after `cursor` is rolled back.
    async fn handle_invalidate(
        &mut self,
        ctx: ScopedContext<'_, Self::Context>,
        cursor: Cursor,
    ) -> Result<(), RunnerError>;

    /// Decide whether a failure is worth a reconnect.
    ///
    /// Called with every error raised inside the message loop and the number
    /// of failures since the last successfully received message
    /// (`retry_count` starts at 1). The policy cannot distinguish a bad
    /// record from a bad connection unless it inspects `error`.
    async fn handle_reconnect(
        &mut self,
        error: &RunnerError,
        retry_count: u32,
    ) -> ReconnectDecision;
}
