//! Wildcard byte signatures and their text form (`"48 8B ?? 57"`)

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ScanError;

/// An ordered sequence of bytes where `None` matches any byte
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signature {
    /// Pattern bytes, `None` for wildcard positions
    bytes: Vec<Option<u8>>,
}

impl Signature {
    /// Creates a signature from raw pattern bytes. Empty patterns are rejected.
    pub fn new(bytes: Vec<Option<u8>>) -> Result<Self, ScanError> {
        if bytes.is_empty() {
            return Err(ScanError::InvalidPattern("signature pattern is empty".into()));
        }
        Ok(Self { bytes })
    }

    /// Number of bytes the signature spans
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; empty signatures cannot be constructed
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Pattern bytes, `None` for wildcards
    pub fn bytes(&self) -> &[Option<u8>] {
        &self.bytes
    }

    /// First concrete byte and its position, used to anchor the search
    pub(crate) fn anchor(&self) -> Option<(usize, u8)> {
        self.bytes
            .iter()
            .enumerate()
            .find_map(|(i, b)| b.map(|b| (i, b)))
    }

    /// Whether `window` (exactly `len()` bytes) matches
    pub(crate) fn matches(&self, window: &[u8]) -> bool {
        window.len() == self.bytes.len()
            && self
                .bytes
                .iter()
                .zip(window)
                .all(|(expected, actual)| expected.map_or(true, |e| e == *actual))
    }

    /// Whether the pattern starts with a relative `call`/`jmp` whose target is the real function
    pub(crate) fn is_relative_branch(&self) -> bool {
        matches!(self.bytes.first(), Some(Some(0xE8 | 0xE9)))
    }
}

impl FromStr for Signature {
    type Err = ScanError;

    fn from_str(pattern: &str) -> Result<Self, Self::Err> {
        let mut bytes = Vec::new();
        for token in pattern.split_whitespace() {
            if token == "??" || token == "?" {
                bytes.push(None);
                continue;
            }

            let value = u8::from_str_radix(token, 16).map_err(|e| {
                ScanError::InvalidPattern(format!("invalid signature token '{token}': {e}"))
            })?;
            bytes.push(Some(value));
        }
        Self::new(bytes)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match b {
                Some(value) => write!(f, "{value:02X}")?,
                None => f.write_str("??")?,
            }
        }
        Ok(())
    }
}

impl TryFrom<String> for Signature {
    type Error = ScanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Signature> for String {
    fn from(value: Signature) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// Wildcards in both spellings parse to `None`
    fn test_parse_pattern_with_wildcards() {
        let sig: Signature = "48 8D 0D ?? ? ?? ??".parse().unwrap();
        assert_eq!(sig.len(), 7);
        assert_eq!(sig.bytes()[0], Some(0x48));
        assert_eq!(sig.bytes()[2], Some(0x0D));
        assert_eq!(sig.bytes()[3], None);
        assert_eq!(sig.bytes()[4], None);
    }

    #[test]
    /// Display prints the canonical upper-case form
    fn test_format_pattern() {
        let sig = Signature::new(vec![Some(0x48), Some(0x8d), None, Some(0xff)]).unwrap();
        assert_eq!(sig.to_string(), "48 8D ?? FF");
    }

    #[test]
    /// Empty and malformed patterns are rejected
    fn test_invalid_patterns() {
        assert!(matches!(
            "".parse::<Signature>(),
            Err(ScanError::InvalidPattern(_))
        ));
        assert!(matches!(
            "48 XZ".parse::<Signature>(),
            Err(ScanError::InvalidPattern(_))
        ));
    }

    #[test]
    /// Leading wildcards are skipped when picking the search anchor
    fn test_anchor() {
        let sig: Signature = "?? ?? 57 41".parse().unwrap();
        assert_eq!(sig.anchor(), Some((2, 0x57)));
        let all_wild: Signature = "?? ??".parse().unwrap();
        assert_eq!(all_wild.anchor(), None);
    }

    #[test]
    /// Signatures serialize as their text form
    fn test_serde_as_string() {
        let sig: Signature = "E8 ?? ?? ?? ?? 41 03 ED".parse().unwrap();
        let json = serde_json::to_string(&sig).unwrap();
        assert_eq!(json, "\"E8 ?? ?? ?? ?? 41 03 ED\"");
        let back: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
        assert!(back.is_relative_branch());
    }
}
