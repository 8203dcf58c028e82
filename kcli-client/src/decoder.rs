//! Payload decoding hook

use bytes::Bytes;

/// Failure reported by a [`Decoder`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to decode message from topic '{topic}': {message}")]
pub struct DecodeError {
    pub topic: String,
    pub message: String,
}

impl DecodeError {
    pub fn new<T: Into<String>, M: Into<String>>(topic: T, message: M) -> Self {
        Self {
            topic: topic.into(),
            message: message.into(),
        }
    }
}

/// Turns a raw message payload into the bytes callers search and display.
///
/// Invoked for every scanned or fetched message and for each message a
/// range read keeps. An error aborts or quietly ends the enclosing read,
/// depending on its [`OnDecodeError`] policy.
///
/// [`OnDecodeError`]: crate::reader::OnDecodeError
pub trait Decoder: Send + Sync {
    fn decode(&self, topic: &str, data: Bytes) -> Result<Bytes, DecodeError>;
}

/// Identity decoder, used when the caller does not install one
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainDecoder;

impl Decoder for PlainDecoder {
    fn decode(&self, _topic: &str, data: Bytes) -> Result<Bytes, DecodeError> {
        Ok(data)
    }
}

impl<F> Decoder for F
where
    F: Fn(&str, Bytes) -> Result<Bytes, DecodeError> + Send + Sync,
{
    fn decode(&self, topic: &str, data: Bytes) -> Result<Bytes, DecodeError> {
        self(topic, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_decoder_is_identity() {
        let data = Bytes::from_static(b"\x00\x01payload");
        assert_eq!(PlainDecoder.decode("t", data.clone()).unwrap(), data);
    }

    #[test]
    fn test_closure_decoder() {
        let upper = |topic: &str, data: Bytes| {
            if data.is_empty() {
                return Err(DecodeError::new(topic, "empty payload"));
            }
            Ok(Bytes::from(data.to_ascii_uppercase()))
        };

        assert_eq!(
            upper.decode("t", Bytes::from_static(b"abc")).unwrap(),
            Bytes::from_static(b"ABC")
        );
        let err = upper.decode("orders", Bytes::new()).unwrap_err();
        assert_eq!(err.topic, "orders");
        assert!(err.to_string().contains("empty payload"));
    }
}
