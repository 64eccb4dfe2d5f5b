//! Messages exchanged with the remote stream service.

use serde::{Deserialize, Serialize};

use crate::config::DataFinality;
use crate::cursor::Cursor;

/// A raw, undecoded batch as delivered by the remote service.
pub type RawBatch = Vec<u8>;

/// A message received on an open stream channel.
///
/// Each message is consumed exactly once by the runner and never retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamMessage {
    /// New data up to (and including) `end_cursor`.
    Data {
        /// The cursor of the last record in this message. The runner scopes
        /// all storage writes for the message to this cursor and resumes
        /// from it after a reconnect.
        end_cursor: Cursor,
        /// Raw batches. The configured batch size is 1, so exactly one batch
        /// is expected; anything else is an invariant violation.
        batches: Vec<RawBatch>,
    },
    /// Data previously delivered at a position after `cursor` must be
    /// treated as rolled back.
    Invalidate { cursor: Cursor },
}

/// The handshake sent once per connection, before any message is received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureRequest {
    /// Encoded filter payload.
    pub filter: Vec<u8>,
    /// Requested confirmation depth.
    pub finality: DataFinality,
    /// Position to resume from. `None` = beginning of the stream.
    pub starting_cursor: Option<Cursor>,
    /// Batches per `Data` message. Always 1.
    pub batch_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_message_carries_end_cursor() {
        let msg = StreamMessage::Data {
            end_cursor: Cursor::new(101),
            batches: vec![b"b1".to_vec()],
        };
        match msg {
            StreamMessage::Data { end_cursor, batches } => {
                assert_eq!(end_cursor, Cursor::new(101));
                assert_eq!(batches.len(), 1);
            }
            _ => panic!("expected data message"),
        }
    }

    #[test]
    fn configure_request_serde() {
        let req = ConfigureRequest {
            filter: b"f".to_vec(),
            finality: DataFinality::Accepted,
            starting_cursor: Some(Cursor::new(100)),
            batch_size: 1,
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: ConfigureRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }
}
