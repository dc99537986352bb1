use serde::{Deserialize, Serialize};

/// A control request sent by a client as a JSON text frame.
///
/// The `type` field selects the variant. Anything that does not parse into
/// one of these shapes is not answered; the router drops it.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RequestPacket {
    /// Ask the server to create a new room and become its first member.
    Create {
        /// Requested member capacity. Defaults to 2 when absent; values
        /// outside [1, 254] are answered with an `InvalidSize` error.
        size: Option<i64>,
    },
    /// Ask the server to join the room with the given identifier.
    Join { id: String },
}

impl RequestPacket {
    /// Parses the payload of a text frame.
    ///
    /// Returns `None` for malformed JSON, a non-object root, an unknown
    /// `type` or missing required fields; the caller drops those silently.
    pub fn decode(text: &str) -> Option<RequestPacket> {
        serde_json::from_str(text).ok()
    }
}

/// A control response sent by the server as a JSON text frame.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResponsePacket {
    /// Acknowledges `create`; carries the identifier of the new room.
    Create { id: String },
    /// Sent on a successful join. The joiner receives `size`, the number
    /// of members that were already present; everyone else receives the
    /// packet without a `size` field.
    Join {
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<usize>,
    },
    /// Tells the remaining members that the member at `index` departed.
    /// Members above that index have shifted down by one.
    Leave { index: usize },
    /// Reports a failed `create` or `join`. The connection stays open.
    Error { message: ErrorCode },
}

impl ResponsePacket {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap()
    }
}

/// The errors the protocol surfaces to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// `create.size` was present and outside [1, 254].
    InvalidSize,
    /// The id generator produced an identifier that is already taken.
    AlreadyExists,
    /// `join.id` named no room.
    DoesNotExist,
    /// The target room is at capacity.
    IsFull,
}
