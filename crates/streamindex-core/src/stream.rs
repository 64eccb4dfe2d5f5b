//! Stream client — the channel to the remote stream service.
//!
//! The wire protocol is not part of this crate: transports implement
//! [`StreamClient`]/[`StreamChannel`] and the runner stays protocol-agnostic.
//! An in-process implementation over a tokio mpsc channel is provided for
//! tests and embedded producers; see [`channel`].

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::error::RunnerError;
use crate::message::{ConfigureRequest, StreamMessage};

/// Opens channels to the remote stream service.
///
/// The runner opens a fresh channel on every connect, including after a
/// reconnect decision.
#[async_trait]
pub trait StreamClient: Send + Sync {
    type Channel: StreamChannel + Send;

    async fn open_channel(&self, url: &str, use_tls: bool)
        -> Result<Self::Channel, RunnerError>;
}

/// One open, ordered channel.
#[async_trait]
pub trait StreamChannel: Send {
    /// Send the configure handshake. Called exactly once per channel, before
    /// the first `next_message`.
    async fn configure(&mut self, request: ConfigureRequest) -> Result<(), RunnerError>;

    /// Receive the next message in delivery order.
    ///
    /// `Ok(None)` signals graceful closure: the service ended the stream
    /// without error.
    async fn next_message(&mut self) -> Result<Option<StreamMessage>, RunnerError>;
}

// ─── In-process channel ──────────────────────────────────────────────────────

type Item = Result<StreamMessage, RunnerError>;
type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Item>>>;
type RequestLog = Arc<Mutex<Vec<ConfigureRequest>>>;

/// Create an in-process stream: a producer handle and a [`StreamClient`]
/// reading from it.
///
/// Successive channels opened from the client (one per runner connect) drain
/// the same queue, so messages produced before a reconnect are delivered
/// after it — the ordering a real resumable stream provides. Dropping the
/// sender closes the stream gracefully.
pub fn channel(capacity: usize) -> (StreamSender, ChannelStreamClient) {
    let (tx, rx) = mpsc::channel(capacity);
    let requests: RequestLog = Arc::default();
    let sender = StreamSender {
        tx: Some(tx),
        requests: Arc::clone(&requests),
    };
    let client = ChannelStreamClient {
        rx: Arc::new(tokio::sync::Mutex::new(rx)),
        requests,
    };
    (sender, client)
}

/// Producer half of an in-process stream.
pub struct StreamSender {
    tx: Option<mpsc::Sender<Item>>,
    requests: RequestLog,
}

impl StreamSender {
    fn tx(&self) -> Result<&mpsc::Sender<Item>, RunnerError> {
        self.tx
            .as_ref()
            .ok_or_else(|| RunnerError::StreamTransport("stream already closed".into()))
    }

    /// Deliver a message to the next open channel.
    pub async fn send(&self, message: StreamMessage) -> Result<(), RunnerError> {
        self.tx()?
            .send(Ok(message))
            .await
            .map_err(|_| RunnerError::StreamTransport("stream receiver dropped".into()))
    }

    /// Inject a transport failure: the consuming channel's `next_message`
    /// returns this error.
    pub async fn fail(&self, error: RunnerError) -> Result<(), RunnerError> {
        self.tx()?
            .send(Err(error))
            .await
            .map_err(|_| RunnerError::StreamTransport("stream receiver dropped".into()))
    }

    /// Close the stream gracefully: once the queue drains, `next_message`
    /// returns `Ok(None)`. The handshake log stays readable.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Every configure handshake received so far, in order. One entry per
    /// connect; tests assert the resumed cursor here.
    pub fn configure_requests(&self) -> Vec<ConfigureRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Consumer half of an in-process stream.
pub struct ChannelStreamClient {
    rx: SharedReceiver,
    requests: RequestLog,
}

#[async_trait]
impl StreamClient for ChannelStreamClient {
    type Channel = ChannelStream;

    async fn open_channel(
        &self,
        _url: &str,
        _use_tls: bool,
    ) -> Result<Self::Channel, RunnerError> {
        Ok(ChannelStream {
            rx: Arc::clone(&self.rx),
            requests: Arc::clone(&self.requests),
        })
    }
}

/// A channel over the in-process queue.
pub struct ChannelStream {
    rx: SharedReceiver,
    requests: RequestLog,
}

#[async_trait]
impl StreamChannel for ChannelStream {
    async fn configure(&mut self, request: ConfigureRequest) -> Result<(), RunnerError> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<StreamMessage>, RunnerError> {
        match self.rx.lock().await.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(error)) => Err(error),
            // Sender dropped: graceful closure.
            None => Ok(None),
        }
    }
}
