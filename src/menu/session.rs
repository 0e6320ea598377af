//! State shared between the menu-open and menu-select detours.
//!
//! The open detour is the only writer: it replaces the session on every open. The select detour only
//! reads it. Entries are matched by position, not identity.

use super::entry::MenuEntry;

/// What a selected index refers to
#[derive(Debug)]
pub enum Selection<'a> {
    /// One of the game's own entries
    Native,
    /// A synthetic entry added during open
    Synthetic(&'a MenuEntry),
    /// Past the end of the synthetic entries; forwarded untouched
    Stale,
}

/// Entries of the currently open menu
#[derive(Debug, Default)]
pub struct MenuSession {
    /// Number of entries the game put in the menu
    native_count: u32,
    /// Synthetic entries, in the order they were written after the native ones
    items: Vec<MenuEntry>,
}

impl MenuSession {
    /// Starts a new session, discarding the previous one
    pub fn reset(&mut self, native_count: u32) {
        self.native_count = native_count;
        self.items.clear();
    }

    /// Records a synthetic entry written at position `native_count + len()`
    pub fn push(&mut self, entry: MenuEntry) {
        self.items.push(entry);
    }

    /// Number of entries the game put in the menu
    pub fn native_count(&self) -> u32 {
        self.native_count
    }

    /// Synthetic entries of this session
    pub fn items(&self) -> &[MenuEntry] {
        &self.items
    }

    /// Maps a selected menu index to what was displayed there
    pub fn resolve(&self, index: i32) -> Selection<'_> {
        let delta = i64::from(index) - i64::from(self.native_count);
        if delta < 0 {
            return Selection::Native;
        }
        usize::try_from(delta)
            .ok()
            .and_then(|delta| self.items.get(delta))
            .map_or(Selection::Stale, Selection::Synthetic)
    }
}
