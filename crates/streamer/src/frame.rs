//! Fixed-length payload frames

use std::fmt;

/// One transfer's worth of payload
///
/// The bytes are opaque to the session and never change once built; the same
/// frame is written for every transfer of a streaming run.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Box<[u8]>,
}

impl Frame {
    /// Frame of `length` bytes, all set to `fill`
    pub fn filled(length: usize, fill: u8) -> Self {
        Self {
            bytes: vec![fill; length].into_boxed_slice(),
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into().into_boxed_slice(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Builds a frame by patching individual bytes of a filled buffer
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    bytes: Vec<u8>,
}

impl FrameBuilder {
    pub fn new(length: usize, fill: u8) -> Self {
        Self {
            bytes: vec![fill; length],
        }
    }

    /// Set the byte at `offset`; offsets past the end are ignored and
    /// reported through the return value
    pub fn set(&mut self, offset: usize, value: u8) -> bool {
        match self.bytes.get_mut(offset) {
            Some(byte) => {
                *byte = value;
                true
            }
            None => false,
        }
    }

    pub fn with(mut self, offset: usize, value: u8) -> Self {
        self.set(offset, value);
        self
    }

    pub fn build(self) -> Frame {
        Frame::from_bytes(self.bytes)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = &self.bytes[..self.bytes.len().min(8)];
        f.debug_struct("Frame")
            .field("len", &self.bytes.len())
            .field("head", &head)
            .finish()
    }
}
