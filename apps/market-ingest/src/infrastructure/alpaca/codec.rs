//! Stream Codec
//!
//! Decodes Alpaca JSON frames. A frame is an array of message objects, each
//! tagged by its `T` field. Elements decode independently: one malformed
//! element is reported without discarding its siblings.

use crate::infrastructure::alpaca::messages::{
    AlpacaMessage, ErrorMessage, NewsMessage, StockQuoteMessage, StockTradeMessage,
    SubscriptionMessage, SuccessMessage,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Element has no `T` discriminator.
    #[error("message without type discriminator")]
    MissingType,

    /// Frame is neither an array nor an object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Result of decoding one frame.
#[derive(Debug, Default)]
pub struct DecodedFrame {
    /// Successfully decoded messages, in frame order.
    pub messages: Vec<AlpacaMessage>,
    /// Per-element failures.
    pub errors: Vec<CodecError>,
}

impl DecodedFrame {
    /// Whether any element failed to decode.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// JSON codec for the stock and news streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error only when the frame as a whole is not JSON or is not
    /// an array or object. Element failures land in [`DecodedFrame::errors`].
    pub fn decode(&self, text: &str) -> Result<DecodedFrame, CodecError> {
        let trimmed = text.trim();

        let values: Vec<serde_json::Value> = if trimmed.starts_with('[') {
            serde_json::from_str(trimmed)?
        } else if trimmed.starts_with('{') {
            vec![serde_json::from_str(trimmed)?]
        } else {
            let preview: String = trimmed.chars().take(50).collect();
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got: {preview}..."
            )));
        };

        let mut frame = DecodedFrame {
            messages: Vec::with_capacity(values.len()),
            errors: Vec::new(),
        };

        for value in values {
            match Self::decode_value(value) {
                Ok(message) => frame.messages.push(message),
                Err(e) => frame.errors.push(e),
            }
        }

        Ok(frame)
    }

    fn decode_value(value: serde_json::Value) -> Result<AlpacaMessage, CodecError> {
        let msg_type = value
            .get("T")
            .and_then(|v| v.as_str())
            .ok_or(CodecError::MissingType)?
            .to_string();

        let message = match msg_type.as_str() {
            "success" => AlpacaMessage::Success(serde_json::from_value::<SuccessMessage>(value)?),
            "error" => AlpacaMessage::Error(serde_json::from_value::<ErrorMessage>(value)?),
            "subscription" => {
                AlpacaMessage::Subscription(serde_json::from_value::<SubscriptionMessage>(value)?)
            }
            "t" => AlpacaMessage::Trade(serde_json::from_value::<StockTradeMessage>(value)?),
            "q" => AlpacaMessage::Quote(serde_json::from_value::<StockQuoteMessage>(value)?),
            "n" => AlpacaMessage::News(serde_json::from_value::<NewsMessage>(value)?),
            _ => AlpacaMessage::Ignored(msg_type),
        };

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::alpaca::messages::SuccessKind;

    #[test]
    fn decodes_control_frame() {
        let frame = JsonCodec::new()
            .decode(r#"[{"T":"success","msg":"connected"}]"#)
            .unwrap();
        assert!(!frame.has_errors());
        assert!(matches!(
            &frame.messages[0],
            AlpacaMessage::Success(s) if s.msg == SuccessKind::Connected
        ));
    }

    #[test]
    fn decodes_mixed_data_frame_in_order() {
        let text = r#"[
            {"T":"t","S":"AAPL","p":100.0,"s":10,"t":"2025-03-14T15:00:00Z"},
            {"T":"q","S":"AAPL","bp":99.9,"ap":100.1,"bs":1,"as":2,"t":"2025-03-14T15:00:00Z"},
            {"T":"b","S":"AAPL","o":1,"h":1,"l":1,"c":1,"v":1,"t":"2025-03-14T15:00:00Z"}
        ]"#;
        let frame = JsonCodec::new().decode(text).unwrap();
        assert_eq!(frame.messages.len(), 3);
        assert!(matches!(frame.messages[0], AlpacaMessage::Trade(_)));
        assert!(matches!(frame.messages[1], AlpacaMessage::Quote(_)));
        assert!(matches!(&frame.messages[2], AlpacaMessage::Ignored(t) if t == "b"));
    }

    #[test]
    fn bad_element_does_not_drop_siblings() {
        let text = r#"[
            {"T":"t","S":"AAPL","p":"not-a-number","s":10,"t":"2025-03-14T15:00:00Z"},
            {"T":"t","S":"MSFT","p":400.0,"s":5,"t":"2025-03-14T15:00:00Z"},
            {"S":"NOTYPE"}
        ]"#;
        let frame = JsonCodec::new().decode(text).unwrap();
        assert_eq!(frame.messages.len(), 1);
        assert_eq!(frame.errors.len(), 2);
        assert!(matches!(frame.errors[1], CodecError::MissingType));
    }

    #[test]
    fn decodes_single_object() {
        let frame = JsonCodec::new()
            .decode(r#"{"T":"error","code":406,"msg":"connection limit exceeded"}"#)
            .unwrap();
        assert!(matches!(&frame.messages[0], AlpacaMessage::Error(e) if e.code == 406));
    }

    #[test]
    fn rejects_non_json_frame() {
        assert!(matches!(
            JsonCodec::new().decode("hello"),
            Err(CodecError::InvalidFormat(_))
        ));
        assert!(matches!(
            JsonCodec::new().decode("[{"),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn empty_array_decodes_to_nothing() {
        let frame = JsonCodec::new().decode("[]").unwrap();
        assert!(frame.messages.is_empty());
        assert!(!frame.has_errors());
    }
}
