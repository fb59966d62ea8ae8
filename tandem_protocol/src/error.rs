// Decode failures for inbound packets.
//
// Every way a payload can be malformed maps to one variant here. The hub
// treats any of them as a protocol fault for the sending peer (see
// `tandem_hub::error::ProtocolError`).

/// A payload could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of payload: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("negative length prefix: {0}")]
    NegativeLength(i32),

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("unknown packet id {0}")]
    UnknownPacket(u8),

    #[error("unknown command kind {0}")]
    UnknownCommandKind(i32),

    #[error("invalid {field} tag {value}")]
    InvalidTag { field: &'static str, value: u8 },

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}
