//! Message payloads and their encodings.

use crate::error::ProtocolError;
use bytes::Bytes;

/// Payload encoding advertised in the message type byte.
///
/// The framework never inspects payload content; the encoding only affects
/// framing (UTF-16 payloads must start at an even offset within the frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Binary,
    Utf8,
    Utf16,
}

impl Encoding {
    /// Returns whether this encoding requires even payload alignment.
    pub fn is_utf16(&self) -> bool {
        matches!(self, Encoding::Utf16)
    }
}

/// An opaque payload tagged with its encoding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload {
    pub encoding: Encoding,
    pub data: Bytes,
}

impl Payload {
    pub fn new(encoding: Encoding, data: impl Into<Bytes>) -> Self {
        Self {
            encoding,
            data: data.into(),
        }
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(Encoding::Binary, data)
    }

    pub fn utf8(data: impl Into<Bytes>) -> Self {
        Self::new(Encoding::Utf8, data)
    }

    pub fn utf16(data: impl Into<Bytes>) -> Self {
        Self::new(Encoding::Utf16, data)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Validates the payload against its encoding.
    ///
    /// UTF-16 payloads are sequences of 16-bit code units and must have an
    /// even byte length.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.encoding.is_utf16() && self.data.len() % 2 != 0 {
            return Err(ProtocolError::OddUtf16Payload(self.data.len()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_encoding_is_binary() {
        assert_eq!(Encoding::default(), Encoding::Binary);
        assert_eq!(Payload::default().encoding, Encoding::Binary);
    }

    #[test]
    fn test_utf16_even_length_accepted() {
        let payload = Payload::utf16(vec![b'h', 0, b'i', 0]);
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_utf16_odd_length_rejected() {
        let payload = Payload::utf16(vec![b'h', 0, b'i']);
        assert!(matches!(
            payload.validate(),
            Err(ProtocolError::OddUtf16Payload(3))
        ));
    }

    #[test]
    fn test_empty_utf16_accepted() {
        let payload = Payload::utf16(Bytes::new());
        assert!(payload.validate().is_ok());
        assert!(payload.is_empty());
    }

    #[test]
    fn test_binary_odd_length_accepted() {
        let payload = Payload::binary(vec![1, 2, 3]);
        assert!(payload.validate().is_ok());
        assert_eq!(payload.len(), 3);
    }
}
