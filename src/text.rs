//! # Text
//!
//! The boundary to the target's rich text format. The real codec is supplied by the host; the
//! engine only needs decode and encode to round-trip anything it decoded.

use std::fmt;

/// One run of decoded text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Readable text
    Text(String),
    /// Bytes the codec does not interpret, kept verbatim
    Raw(Vec<u8>),
}

/// Decoded, mutable rich text.
///
/// Lives only for the callback that decoded it; it is re-encoded before the native call continues.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredText {
    /// Runs in display order
    payloads: Vec<Payload>,
}

impl StructuredText {
    /// Creates text from its runs
    pub fn new(payloads: Vec<Payload>) -> Self {
        Self { payloads }
    }

    /// Runs in display order
    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    /// Mutable access to the runs
    pub fn payloads_mut(&mut self) -> &mut Vec<Payload> {
        &mut self.payloads
    }

    /// Appends a text run
    pub fn push_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.payloads.push(Payload::Text(text.into()));
        self
    }

    /// Whether there are no runs or all runs are empty
    pub fn is_empty(&self) -> bool {
        self.payloads.iter().all(|p| match p {
            Payload::Text(s) => s.is_empty(),
            Payload::Raw(b) => b.is_empty(),
        })
    }

    /// Concatenated readable text, skipping raw runs
    pub fn text_value(&self) -> String {
        self.payloads
            .iter()
            .filter_map(|p| match p {
                Payload::Text(s) => Some(s.as_str()),
                Payload::Raw(_) => None,
            })
            .collect()
    }
}

impl From<&str> for StructuredText {
    fn from(value: &str) -> Self {
        Self::new(vec![Payload::Text(value.to_owned())])
    }
}

impl From<String> for StructuredText {
    fn from(value: String) -> Self {
        Self::new(vec![Payload::Text(value)])
    }
}

impl fmt::Display for StructuredText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text_value())
    }
}

/// Converts between native text bytes (without the terminator) and [`StructuredText`]
pub trait TextCodec: Send + Sync {
    /// Decodes native bytes
    fn decode(&self, bytes: &[u8]) -> StructuredText;

    /// Encodes text back into native bytes; must reproduce any input `decode` accepted
    fn encode(&self, text: &StructuredText) -> Vec<u8>;
}

/// Codec treating text as UTF-8 and passing any other bytes through as raw runs
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8Codec;

impl TextCodec for Utf8Codec {
    fn decode(&self, bytes: &[u8]) -> StructuredText {
        let mut payloads = Vec::new();
        for chunk in bytes.utf8_chunks() {
            if !chunk.valid().is_empty() {
                payloads.push(Payload::Text(chunk.valid().to_owned()));
            }
            if !chunk.invalid().is_empty() {
                payloads.push(Payload::Raw(chunk.invalid().to_vec()));
            }
        }
        StructuredText::new(payloads)
    }

    fn encode(&self, text: &StructuredText) -> Vec<u8> {
        let mut out = Vec::new();
        for payload in text.payloads() {
            match payload {
                Payload::Text(s) => out.extend_from_slice(s.as_bytes()),
                Payload::Raw(b) => out.extend_from_slice(b),
            }
        }
        out
    }
}
