//! The runner — wires indexer, storage, and stream together and drives the
//! message loop.
//!
//! # Lifecycle
//!
//! ```text
//! Unstarted → Validating → Connecting → Streaming ⇄ Reconnecting
//!                                          │
//!                             Stopped ←────┴────→ Failed
//! ```
//!
//! Messages are processed strictly one at a time: the next message is only
//! requested after the previous one's storage scope has been committed. Every
//! error raised inside the streaming loop is funneled to the indexer's
//! reconnection policy; a declined error surfaces unchanged from [`Runner::run`].

use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::indexer::{Indexer, ScopedContext};
use crate::message::{ConfigureRequest, StreamMessage};
use crate::storage::{StorageManager, StorageScope};
use crate::stream::{StreamChannel, StreamClient};

/// Lifecycle state of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Not yet started.
    Unstarted,
    /// Checking the configuration; nothing has been contacted.
    Validating,
    /// Preparing storage, opening a channel, sending the handshake.
    Connecting,
    /// Consuming the message loop.
    Streaming,
    /// A streaming failure is being weighed by the reconnection policy.
    Reconnecting,
    /// The stream closed gracefully.
    Stopped,
    /// A non-reconnectable error was returned to the caller.
    Failed,
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unstarted => write!(f, "unstarted"),
            Self::Validating => write!(f, "validating"),
            Self::Connecting => write!(f, "connecting"),
            Self::Streaming => write!(f, "streaming"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Drives one indexer against one stream and one storage namespace.
///
/// The runner exclusively owns the retry counter and the channel for the
/// duration of a [`run`](Self::run); storage owns the persisted cursor and
/// configuration across runs.
pub struct Runner<I, M, C>
where
    I: Indexer,
    M: StorageManager,
    C: StreamClient,
{
    config: RunnerConfig,
    indexer: I,
    storage: M,
    client: C,
    state: RunnerState,
    /// Failures since the last received message. Owned by the runner's
    /// single task; updated only here and in the reconnect path.
    retry_count: u32,
}

impl<I, M, C> Runner<I, M, C>
where
    I: Indexer,
    M: StorageManager,
    C: StreamClient,
{
    pub fn new(config: RunnerConfig, indexer: I, storage: M, client: C) -> Self {
        Self {
            config,
            indexer,
            storage,
            client,
            state: RunnerState::Unstarted,
            retry_count: 0,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Failures since the last received message.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Run until the stream closes gracefully (`Ok`) or a non-reconnectable
    /// error occurs (`Err`, returned verbatim).
    pub async fn run(&mut self, mut context: I::Context) -> Result<(), RunnerError> {
        match self.run_inner(&mut context).await {
            Ok(()) => {
                self.state = RunnerState::Stopped;
                Ok(())
            }
            Err(err) => {
                self.state = RunnerState::Failed;
                Err(err)
            }
        }
    }

    async fn run_inner(&mut self, context: &mut I::Context) -> Result<(), RunnerError> {
        self.state = RunnerState::Validating;
        self.config.validate()?;

        let identity = self.indexer.indexer_id().to_string();
        self.state = RunnerState::Connecting;
        self.storage.namespace(&identity).await?;

        if self.config.reset_state {
            tracing::info!(identity = %identity, "resetting indexer state");
            self.storage.drop_all().await?;
        }

        loop {
            self.state = RunnerState::Connecting;
            let mut channel = self
                .client
                .open_channel(&self.config.stream_url, self.config.stream_uses_tls)
                .await?;

            let declared = self.indexer.initial_configuration();
            let effective = self.storage.merge_configuration(declared).await?;

            channel
                .configure(ConfigureRequest {
                    filter: effective.filter.encode().to_vec(),
                    finality: effective.finality,
                    starting_cursor: effective.starting_cursor,
                    // The message loop assumes one batch per message.
                    batch_size: 1,
                })
                .await?;

            tracing::info!(
                identity = %identity,
                cursor = ?effective.starting_cursor,
                finality = %effective.finality,
                "stream configured"
            );

            self.state = RunnerState::Streaming;
            match self.stream_loop(&mut channel, context).await {
                Ok(()) => {
                    tracing::info!(identity = %identity, "stream closed");
                    return Ok(());
                }
                Err(err) => {
                    self.state = RunnerState::Reconnecting;
                    self.retry_count += 1;
                    let decision = self.indexer.handle_reconnect(&err, self.retry_count).await;
                    if !decision.should_reconnect() {
                        return Err(err);
                    }
                    tracing::warn!(
                        identity = %identity,
                        retry = self.retry_count,
                        error = %err,
                        "reconnecting"
                    );
                }
            }
        }
    }

    async fn stream_loop(
        &mut self,
        channel: &mut C::Channel,
        context: &mut I::Context,
    ) -> Result<(), RunnerError> {
        loop {
            let Some(message) = channel.next_message().await? else {
                return Ok(());
            };
            // A message made it through: the connection is healthy again.
            self.retry_count = 0;
            self.dispatch(message, context).await?;
        }
    }

    async fn dispatch(
        &mut self,
        message: StreamMessage,
        context: &mut I::Context,
    ) -> Result<(), RunnerError> {
        match message {
            StreamMessage::Data { end_cursor, batches } => {
                if batches.len() != 1 {
                    return Err(RunnerError::InvariantViolation(format!(
                        "expected exactly one batch per data message, got {}",
                        batches.len()
                    )));
                }

                let mut scope = self.storage.open_scope_for_data(end_cursor).await?;
                let outcome = match self.indexer.decode_data(&batches[0]) {
                    Ok(data) => {
                        let ctx = ScopedContext {
                            context,
                            storage: &mut scope,
                        };
                        self.indexer.handle_data(ctx, data).await
                    }
                    Err(err) => Err(err),
                };
                // The scope is released on every exit path.
                let committed = scope.commit().await;
                outcome?;
                committed?;
                tracing::debug!(cursor = %end_cursor, "data message processed");
            }
            StreamMessage::Invalidate { cursor } => {
                let mut scope = self.storage.open_scope_for_invalidate(cursor).await?;
                let ctx = ScopedContext {
                    context,
                    storage: &mut scope,
                };
                let outcome = self.indexer.handle_invalidate(ctx, cursor).await;
                let committed = scope.commit().await;
                outcome?;
                committed?;
                tracing::debug!(cursor = %cursor, "invalidate message processed");
            }
        }
        Ok(())
    }
}
