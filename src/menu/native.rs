//! Native side of the context menu: value slots, layout offsets and the game functions used to fill them

use std::ffi::c_void;

use serde::{Deserialize, Serialize};

use crate::config::SignatureSet;
use crate::error::{Error, Result};
use crate::memory::{read_field, read_pointer, read_terminated};
use crate::scan::Scanner;

/// Signature label of the value change-type function
pub const CHANGE_TYPE_LABEL: &str = "context menu (change type)";
/// Signature label of the value set-string function
pub const SET_STRING_LABEL: &str = "context menu (set string)";
/// Signature label of the addon lookup function
pub const GET_ADDON_LABEL: &str = "context menu (get addon)";

/// Actor id the game uses when the menu has no actor
pub const INVALID_ACTOR_ID: u32 = 0xE000_0000;

/// Tagged value slot of the menu argument array
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AtkValue {
    /// Value type tag
    pub kind: u32,
    /// Padding before the payload
    pub _pad: u32,
    /// Payload union (integer, or pointer for strings)
    pub data: u64,
}

impl AtkValue {
    /// Offset of the payload inside a slot
    pub const DATA_OFFSET: usize = 8;
    /// Tag for unsigned integer values
    pub const UINT: u32 = 4;

    /// Unsigned integer value
    pub fn uint(value: u32) -> Self {
        Self {
            kind: Self::UINT,
            _pad: 0,
            data: u64::from(value),
        }
    }
}

/// Version specific offsets of the context menu structures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MenuLayout {
    /// Addon → id of the addon that opened the menu (`u16`)
    pub parent_addon_id_offset: usize,
    /// Addon → inline zero-terminated name
    pub addon_name_offset: usize,
    /// Agent → pointer to the block holding the action table
    pub actions_pointer_offset: usize,
    /// Block → first byte of the action table
    pub actions_offset: usize,
    /// Agent → actor id (`u32`)
    pub actor_id_offset: usize,
    /// Agent → lower half of the content id (`u32`)
    pub content_id_lower_offset: usize,
    /// Agent → pointer to the associated text
    pub text_pointer_offset: usize,
    /// Agent → actor home world (`u16`)
    pub world_offset: usize,
    /// Action code that makes the agent ignore an entry
    pub noop_action: u8,
    /// Value slots before the first menu entry
    pub header_len: usize,
    /// Type tag passed to change-type for string values
    pub string_value_type: u32,
    /// Maximum number of entries the argument array can hold
    pub item_capacity: usize,
}

impl Default for MenuLayout {
    fn default() -> Self {
        Self {
            parent_addon_id_offset: 0x1D2,
            addon_name_offset: 0x8,
            actions_pointer_offset: 0xD18,
            actions_offset: 0x428,
            actor_id_offset: 0xEF0,
            content_id_lower_offset: 0xEE0,
            text_pointer_offset: 0xE08,
            world_offset: 0xF00,
            noop_action: 0x67,
            header_len: 7,
            string_value_type: 6,
            item_capacity: 32,
        }
    }
}

/// Identity of a menu's target actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorRef {
    /// Actor id, may be [`INVALID_ACTOR_ID`] for offline targets
    pub actor_id: u32,
    /// Lower half of the content id, may be zero
    pub content_id_lower: u32,
    /// Home world
    pub world: u16,
}

/// Snapshot of what a menu was opened on; passed to open subscribers and entry actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuContext {
    /// Context menu addon
    pub addon: usize,
    /// Context menu agent
    pub agent: usize,
    /// Name of the addon the menu was opened from
    pub parent_addon_name: Option<String>,
    /// Actor id as stored in the agent
    pub actor_id: u32,
    /// Lower half of the content id as stored in the agent
    pub content_id_lower: u32,
    /// Home world as stored in the agent
    pub actor_world: u16,
    /// Associated text, usually an actor name
    pub text: Option<String>,
}

impl MenuContext {
    /// Target actor, `None` when the agent holds no actor
    pub fn actor(&self) -> Option<ActorRef> {
        if self.actor_id == INVALID_ACTOR_ID && self.content_id_lower == 0 {
            return None;
        }
        Some(ActorRef {
            actor_id: self.actor_id,
            content_id_lower: self.content_id_lower,
            world: self.actor_world,
        })
    }
}

/// Game functions and singletons the menu bridge depends on
pub trait MenuNative: Send + Sync {
    /// Address of the context menu agent, zero when unavailable
    fn agent(&self) -> usize;

    /// Looks up an addon by its internal id, zero when absent
    ///
    /// # Safety
    ///
    /// Calls into the game
    unsafe fn addon_by_id(&self, id: u16) -> usize;

    /// Turns `value` into a string slot holding a copy of `text`
    ///
    /// # Safety
    ///
    /// `value` must be a slot of the menu argument array and `text` zero-terminated
    unsafe fn set_string(&self, value: *mut AtkValue, text: *const u8);
}

/// `AtkValue::ChangeType(this, type)`
type ChangeTypeFn = unsafe extern "C" fn(value: *mut AtkValue, kind: u32);
/// `AtkValue::SetString(this, bytes)`
type SetStringFn = unsafe extern "C" fn(value: *mut AtkValue, bytes: *const u8);
/// `RaptureAtkUnitManager::GetAddonById(this, id)`
type GetAddonFn = unsafe extern "C" fn(unit_manager: *mut c_void, id: u16) -> *mut u8;

/// [`MenuNative`] backed by functions located in the running game
pub struct ResolvedMenuNative {
    /// Change-type function
    change_type: ChangeTypeFn,
    /// Set-string function
    set_string: SetStringFn,
    /// Addon lookup function
    get_addon: GetAddonFn,
    /// Type tag for string values
    string_value_type: u32,
    /// Supplies the context menu agent
    agent: Box<dyn Fn() -> usize + Send + Sync>,
    /// Supplies the addon unit manager
    unit_manager: Box<dyn Fn() -> usize + Send + Sync>,
}

impl ResolvedMenuNative {
    /// Locates every function the menu bridge calls
    pub fn locate(
        scanner: &Scanner<'_>,
        signatures: &SignatureSet,
        layout: &MenuLayout,
        agent: Box<dyn Fn() -> usize + Send + Sync>,
        unit_manager: Box<dyn Fn() -> usize + Send + Sync>,
    ) -> Result<Self> {
        let change_type = signatures.locate(scanner, CHANGE_TYPE_LABEL)?;
        let set_string = signatures.locate(scanner, SET_STRING_LABEL)?;
        let get_addon = signatures.locate(scanner, GET_ADDON_LABEL)?;

        // SAFETY: each signature identifies the entry of a function with the matching type
        unsafe {
            Ok(Self {
                change_type: std::mem::transmute::<usize, ChangeTypeFn>(change_type),
                set_string: std::mem::transmute::<usize, SetStringFn>(set_string),
                get_addon: std::mem::transmute::<usize, GetAddonFn>(get_addon),
                string_value_type: layout.string_value_type,
                agent,
                unit_manager,
            })
        }
    }
}

impl MenuNative for ResolvedMenuNative {
    fn agent(&self) -> usize {
        (self.agent)()
    }

    unsafe fn addon_by_id(&self, id: u16) -> usize {
        let unit_manager = (self.unit_manager)();
        if unit_manager == 0 {
            return 0;
        }
        (self.get_addon)(unit_manager as *mut c_void, id) as usize
    }

    unsafe fn set_string(&self, value: *mut AtkValue, text: *const u8) {
        (self.change_type)(value, self.string_value_type);
        (self.set_string)(value, text);
    }
}

/// Reads the identity of the menu opened by `addon`
///
/// # Safety
///
/// `addon` must be null or the context menu addon, and the layout must match the running game
pub unsafe fn read_context(
    native: &dyn MenuNative,
    layout: &MenuLayout,
    addon: usize,
) -> Result<MenuContext> {
    if addon == 0 {
        return Err(Error::InvalidState("context menu addon is null".into()));
    }
    let agent = native.agent();
    if agent == 0 {
        return Err(Error::InvalidState("context menu agent unavailable".into()));
    }

    let text = read_terminated(read_pointer(agent, layout.text_pointer_offset) as *const u8);
    Ok(MenuContext {
        addon,
        agent,
        parent_addon_name: parent_addon_name(native, layout, addon),
        actor_id: read_field(agent, layout.actor_id_offset),
        content_id_lower: read_field(agent, layout.content_id_lower_offset),
        actor_world: read_field(agent, layout.world_offset),
        text: (!text.is_empty()).then(|| String::from_utf8_lossy(&text).into_owned()),
    })
}

/// Name of the addon that opened the menu
unsafe fn parent_addon_name(
    native: &dyn MenuNative,
    layout: &MenuLayout,
    addon: usize,
) -> Option<String> {
    let id: u16 = read_field(addon, layout.parent_addon_id_offset);
    if id == 0 {
        return None;
    }
    let parent = native.addon_by_id(id);
    if parent == 0 {
        return None;
    }
    let name = read_terminated((parent + layout.addon_name_offset) as *const u8);
    Some(String::from_utf8_lossy(&name).into_owned())
}
