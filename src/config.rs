//! # Config
//!
//! Which features to install, the client language and the version specific data (signatures and
//! menu offsets) the engine needs. Stored as JSON.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::menu::native::{CHANGE_TYPE_LABEL, GET_ADDON_LABEL, SET_STRING_LABEL};
use crate::menu::{ClientLanguage, MenuLayout, OPEN_LABEL, SELECT_LABEL};
use crate::scan::{Scanner, Signature};
use crate::talk;

/// Signatures known to match the current client
const DEFAULT_SIGNATURES: [(&str, &str); 6] = [
    (
        talk::SIGNATURE_LABEL,
        "48 89 5C 24 ?? 57 48 83 EC 50 48 8B 01 49 8B D8 0F 29 74 24 ?? 48 8B FA 0F 28 F3 FF 50 40 C7 44 24 ?? ?? ?? ?? ??",
    ),
    (OPEN_LABEL, "48 8B C4 57 41 56 41 57 48 81 EC ?? ?? ?? ??"),
    (
        SELECT_LABEL,
        "48 89 5C 24 ?? 55 57 41 56 48 81 EC ?? ?? ?? ?? 48 8B 05 ?? ?? ?? ?? 48 33 C4 48 89 44 24 ?? 80 B9 ?? ?? ?? ?? ??",
    ),
    (CHANGE_TYPE_LABEL, "E8 ?? ?? ?? ?? 45 84 F6 48 8D 4C 24 ??"),
    (SET_STRING_LABEL, "E8 ?? ?? ?? ?? 41 03 ED"),
    (GET_ADDON_LABEL, "E8 ?? ?? ?? ?? 8B 6B 20"),
];

/// Features the engine installs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookFlags {
    /// Talk window bridge
    pub talk: bool,
    /// Context menu augmentation
    pub context_menu: bool,
}

impl Default for HookFlags {
    fn default() -> Self {
        Self {
            talk: true,
            context_menu: true,
        }
    }
}

/// A labeled signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    /// Name used in logs and lookups
    pub label: String,
    /// Pattern to search for
    pub pattern: Signature,
}

/// Ordered list of labeled signatures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureSet(Vec<SignatureEntry>);

impl Default for SignatureSet {
    fn default() -> Self {
        Self(
            DEFAULT_SIGNATURES
                .iter()
                .filter_map(|(label, pattern)| {
                    let pattern = pattern.parse().ok()?;
                    Some(SignatureEntry {
                        label: (*label).to_owned(),
                        pattern,
                    })
                })
                .collect(),
        )
    }
}

impl SignatureSet {
    /// Creates an empty set
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Adds or replaces the signature stored under `label`
    pub fn insert(&mut self, label: impl Into<String>, pattern: Signature) {
        let label = label.into();
        match self.0.iter_mut().find(|e| e.label == label) {
            Some(entry) => entry.pattern = pattern,
            None => self.0.push(SignatureEntry { label, pattern }),
        }
    }

    /// Signature stored under `label`
    pub fn get(&self, label: &str) -> Result<&Signature> {
        self.0
            .iter()
            .find(|e| e.label == label)
            .map(|e| &e.pattern)
            .ok_or_else(|| Error::NotFound {
                label: label.to_owned(),
            })
    }

    /// Entries in order
    pub fn iter(&self) -> impl Iterator<Item = &SignatureEntry> {
        self.0.iter()
    }

    /// Address of the function the signature under `label` identifies
    pub fn locate(&self, scanner: &Scanner<'_>, label: &str) -> Result<usize> {
        let signature = self.get(label)?;
        scanner
            .try_scan(label, signature)
            .ok_or_else(|| Error::NotFound {
                label: label.to_owned(),
            })
    }
}

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Features to install
    pub hooks: HookFlags,
    /// Client display language
    pub language: ClientLanguage,
    /// Signatures of every hooked or called function
    pub signatures: SignatureSet,
    /// Context menu structure offsets
    pub menu: MenuLayout,
}

impl EngineConfig {
    /// Loads a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Saves the configuration as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;
        info!("Saved engine config to {}", path.as_ref().display());
        Ok(())
    }

    /// Signature stored under `label`
    pub fn signature(&self, label: &str) -> Result<&Signature> {
        self.signatures.get(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    /// Every built-in signature parses
    fn test_default_signatures_parse() {
        let config = EngineConfig::default();
        assert_eq!(config.signatures.iter().count(), DEFAULT_SIGNATURES.len());
        assert_eq!(
            config.signature(OPEN_LABEL).unwrap().to_string(),
            "48 8B C4 57 41 56 41 57 48 81 EC ?? ?? ?? ??"
        );
    }

    #[test]
    /// Saved configuration loads back unchanged
    fn test_config_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        let mut config = EngineConfig {
            language: ClientLanguage::French,
            ..Default::default()
        };
        config.hooks.talk = false;
        config.menu.item_capacity = 16;
        config
            .signatures
            .insert(OPEN_LABEL, "48 8B C4 ?? 41".parse().unwrap());
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.signature(OPEN_LABEL).unwrap().to_string(),
            "48 8B C4 ?? 41"
        );
    }

    #[test]
    /// Missing fields fall back to defaults
    fn test_partial_config() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "language": "japanese",
                "signatures": [{ "label": "battle talk", "pattern": "48 89 5C 24 ??" }]
            }"#,
        )
        .unwrap();
        assert_eq!(config.language, ClientLanguage::Japanese);
        assert_eq!(config.hooks, HookFlags::default());
        assert_eq!(config.menu, MenuLayout::default());
        assert_eq!(config.signatures.iter().count(), 1);
        assert!(matches!(
            config.signature(OPEN_LABEL),
            Err(Error::NotFound { label }) if label == OPEN_LABEL
        ));
    }

    #[test]
    /// Unknown languages, malformed patterns and missing files are errors
    fn test_invalid_config() {
        assert!(serde_json::from_str::<EngineConfig>(r#"{ "language": "klingon" }"#).is_err());
        assert!(serde_json::from_str::<EngineConfig>(
            r#"{ "signatures": [{ "label": "x", "pattern": "ZZ" }] }"#
        )
        .is_err());
        assert!(matches!(
            EngineConfig::load("/nonexistent/engine.json"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    /// Absent labels are not found, present ones resolve to an address
    fn test_locate_missing_label() {
        let region = [0x90u8; 16];
        let scanner = Scanner::new(&region);
        let signatures = SignatureSet::empty();
        assert!(signatures
            .locate(&scanner, SELECT_LABEL)
            .unwrap_err()
            .is_not_found());

        let mut signatures = SignatureSet::empty();
        signatures.insert("nop", "90 90".parse().unwrap());
        assert_eq!(
            signatures.locate(&scanner, "nop").unwrap(),
            region.as_ptr() as usize
        );
    }
}
