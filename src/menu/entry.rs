//! Synthetic menu entries and the languages their names are resolved for

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::Error;
use crate::event::HandlerResult;

use super::native::MenuContext;

/// Display language of the client
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ClientLanguage {
    /// Japanese client
    Japanese,
    /// English client
    #[default]
    English,
    /// German client
    German,
    /// French client
    French,
}

impl ClientLanguage {
    /// Parses a language name, rejecting anything outside the enumerated set
    pub fn parse(name: &str) -> Result<Self, Error> {
        Self::from_str(name)
            .map_err(|_| Error::InvalidArgument(format!("unrecognized language '{name}'")))
    }
}

impl TryFrom<u8> for ClientLanguage {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Japanese),
            1 => Ok(Self::English),
            2 => Ok(Self::German),
            3 => Ok(Self::French),
            other => Err(Error::InvalidArgument(format!(
                "unrecognized language code {other}"
            ))),
        }
    }
}

/// Process-unique identifier of a menu entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MenuEntryId(u64);

impl MenuEntryId {
    /// Hands out the next id
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for MenuEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "menu-entry-{}", self.0)
    }
}

/// Callback run when a synthetic entry is selected
pub type MenuAction = Arc<dyn Fn(&MenuContext) -> HandlerResult + Send + Sync>;

/// A synthetic context menu entry
#[derive(Clone)]
pub struct MenuEntry {
    /// Unique id
    id: MenuEntryId,
    /// Name shown on English clients
    pub name_english: String,
    /// Name shown on Japanese clients
    pub name_japanese: String,
    /// Name shown on French clients
    pub name_french: String,
    /// Name shown on German clients
    pub name_german: String,
    /// Selection callback
    action: MenuAction,
}

impl MenuEntry {
    /// Creates an entry using `name` for every language
    pub fn new<A>(name: impl Into<String>, action: A) -> Self
    where
        A: Fn(&MenuContext) -> HandlerResult + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            id: MenuEntryId::next(),
            name_english: name.clone(),
            name_japanese: name.clone(),
            name_french: name.clone(),
            name_german: name,
            action: Arc::new(action),
        }
    }

    /// Overrides the name for one language
    pub fn with_name(mut self, language: ClientLanguage, name: impl Into<String>) -> Self {
        let name = name.into();
        match language {
            ClientLanguage::English => self.name_english = name,
            ClientLanguage::Japanese => self.name_japanese = name,
            ClientLanguage::French => self.name_french = name,
            ClientLanguage::German => self.name_german = name,
        }
        self
    }

    /// Unique id
    pub fn id(&self) -> MenuEntryId {
        self.id
    }

    /// Name displayed for `language`
    pub fn name(&self, language: ClientLanguage) -> &str {
        match language {
            ClientLanguage::English => &self.name_english,
            ClientLanguage::Japanese => &self.name_japanese,
            ClientLanguage::French => &self.name_french,
            ClientLanguage::German => &self.name_german,
        }
    }

    /// Selection callback
    pub fn action(&self) -> &MenuAction {
        &self.action
    }
}

impl fmt::Debug for MenuEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MenuEntry")
            .field("id", &self.id)
            .field("name_english", &self.name_english)
            .finish_non_exhaustive()
    }
}
