//! Runner and stream configuration types.

use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::error::RunnerError;

// ─── Filter ──────────────────────────────────────────────────────────────────

/// The filter payload sent in the stream handshake.
///
/// The payload is opaque to the runner: it is produced by the indexer in
/// whatever encoding the remote service expects and forwarded verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter(Vec<u8>);

impl Filter {
    /// Create a filter from a raw, already-encoded payload.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Create a filter by JSON-encoding any serializable value.
    pub fn from_json<T: Serialize>(value: &T) -> Result<Self, RunnerError> {
        let bytes = serde_json::to_vec(value).map_err(|e| RunnerError::Decode(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// The encoded payload, as sent on the wire.
    pub fn encode(&self) -> &[u8] {
        &self.0
    }

    /// Returns `true` if the filter carries no payload.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ─── DataFinality ────────────────────────────────────────────────────────────

/// Confirmation depth requested for delivered data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFinality {
    /// Deliver data as soon as the service sees it; may be rolled back.
    Pending,
    /// Deliver data once accepted by the source. The default.
    #[default]
    Accepted,
    /// Deliver only data the source considers irreversible.
    Finalized,
}

impl std::fmt::Display for DataFinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Finalized => write!(f, "finalized"),
        }
    }
}

// ─── StreamConfiguration ─────────────────────────────────────────────────────

/// The configuration an indexer declares for its stream.
///
/// `starting_cursor` is a static default: when a previous run persisted a
/// cursor under the same indexer identity, the merge in
/// [`StorageManager::merge_configuration`](crate::storage::StorageManager::merge_configuration)
/// overrides it so the stream resumes where it left off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfiguration {
    /// Opaque filter payload forwarded in the handshake.
    pub filter: Filter,
    /// Requested confirmation depth.
    pub finality: DataFinality,
    /// Position to start streaming from. `None` = beginning of the stream.
    pub starting_cursor: Option<Cursor>,
    /// Batches per `Data` message. The runner pins this to 1 in the
    /// handshake regardless of the declared value.
    pub batch_size: u64,
}

impl StreamConfiguration {
    /// Create a configuration with the given filter and defaults elsewhere.
    pub fn with_filter(filter: Filter) -> Self {
        Self {
            filter,
            batch_size: 1,
            ..Default::default()
        }
    }

    /// Set the requested finality.
    pub fn finality(mut self, finality: DataFinality) -> Self {
        self.finality = finality;
        self
    }

    /// Set the static starting cursor.
    pub fn starting_cursor(mut self, cursor: impl Into<Cursor>) -> Self {
        self.starting_cursor = Some(cursor.into());
        self
    }
}

// ─── RunnerConfig ────────────────────────────────────────────────────────────

/// Configuration for one runner instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// URL of the remote stream service.
    pub stream_url: String,
    /// Whether the stream connection uses transport security.
    pub stream_uses_tls: bool,
    /// Connection string for the storage backend.
    pub storage_url: String,
    /// Wipe all persisted state for the indexer before the first handshake.
    pub reset_state: bool,
}

impl RunnerConfig {
    /// Create a configuration with the two required targets and defaults
    /// elsewhere (TLS on, no reset).
    pub fn new(stream_url: impl Into<String>, storage_url: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
            stream_uses_tls: true,
            storage_url: storage_url.into(),
            reset_state: false,
        }
    }

    /// Disable transport security (local development streams).
    pub fn insecure(mut self) -> Self {
        self.stream_uses_tls = false;
        self
    }

    /// Request a state reset before the first handshake.
    pub fn reset(mut self) -> Self {
        self.reset_state = true;
        self
    }

    /// Validate the configuration. Fails before any connection attempt when
    /// either target is missing.
    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.stream_url.is_empty() {
            return Err(RunnerError::Configuration("stream_url is required".into()));
        }
        if self.storage_url.is_empty() {
            return Err(RunnerError::Configuration("storage_url is required".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_encode_roundtrip() {
        let f = Filter::from_json(&serde_json::json!({"address": "0xabc"})).unwrap();
        assert!(!f.is_empty());
        let decoded: serde_json::Value = serde_json::from_slice(f.encode()).unwrap();
        assert_eq!(decoded["address"], "0xabc");
    }

    #[test]
    fn stream_configuration_builder() {
        let cfg = StreamConfiguration::with_filter(Filter::from_bytes(b"f".to_vec()))
            .finality(DataFinality::Finalized)
            .starting_cursor(100u64);
        assert_eq!(cfg.finality, DataFinality::Finalized);
        assert_eq!(cfg.starting_cursor, Some(Cursor::new(100)));
        assert_eq!(cfg.batch_size, 1);
    }

    #[test]
    fn validate_accepts_complete_config() {
        let cfg = RunnerConfig::new("stream://a", "store://b");
        assert!(cfg.validate().is_ok());
        assert!(cfg.stream_uses_tls);
        assert!(!cfg.reset_state);
    }

    #[test]
    fn validate_rejects_missing_stream_url() {
        let cfg = RunnerConfig::new("", "store://b");
        let err = cfg.validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn validate_rejects_missing_storage_url() {
        let cfg = RunnerConfig::new("stream://a", "");
        let err = cfg.validate().unwrap_err();
        assert!(err.is_configuration());
    }
}
