//! # Menu
//!
//! Adds synthetic entries to the native context menu and routes their selection back to Rust.
//!
//! The open detour resets the [`MenuSession`](session::MenuSession), lets subscribers contribute
//! entries and writes them into the argument array past the game's own entries. The select detour
//! maps the chosen index back onto the session. Any failure while augmenting forwards the call
//! untouched, so the game's menu always opens and closes.

pub mod entry;
pub mod native;
pub mod session;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::config::SignatureSet;
use crate::error::{Error, Result};
use crate::event::{guarded, HandlerResult, Subscribers, SubscriptionId};
use crate::hook::{Detour, HookHandle};
use crate::memory::{read_field, read_pointer, terminate, write_field};
use crate::scan::Scanner;

pub use entry::{ClientLanguage, MenuAction, MenuEntry, MenuEntryId};
pub use native::{ActorRef, AtkValue, MenuContext, MenuLayout, MenuNative, ResolvedMenuNative};

use native::read_context;
use session::{MenuSession, Selection};

/// Signature label of the menu-open function
pub const OPEN_LABEL: &str = "context menu (open)";
/// Signature label of the menu-select function
pub const SELECT_LABEL: &str = "context menu (select)";

/// Native `OpenContextMenu(addon, menuSize, values)`
pub type MenuOpenFn =
    unsafe extern "C" fn(addon: *mut u8, menu_size: i32, values: *mut AtkValue) -> u8;

/// Native `ContextMenuItemSelected(addon, index, a3)`
pub type MenuSelectFn = unsafe extern "C" fn(addon: *mut u8, index: i32, a3: u8) -> u8;

/// Event passed to menu-open subscribers
#[derive(Debug)]
pub struct OpenEvent {
    /// What the menu was opened on
    pub context: MenuContext,
    /// Entries to append after the game's own, in order
    pub additional_items: Vec<MenuEntry>,
}

/// Hooks both menu call sites and owns the session they share
pub struct MenuAugmenter {
    /// Hook on the menu-open function
    open: Mutex<Box<dyn Detour<MenuOpenFn> + Send>>,
    /// Hook on the menu-select function
    select: Mutex<Box<dyn Detour<MenuSelectFn> + Send>>,
    /// Game functions and singletons
    native: Arc<dyn MenuNative>,
    /// Structure offsets of the running game
    layout: MenuLayout,
    /// Language entry names are shown in
    language: RwLock<ClientLanguage>,
    /// Entries of the menu currently open
    session: Mutex<MenuSession>,
    /// Menu-open subscribers
    subscribers: Subscribers<OpenEvent>,
}

impl MenuAugmenter {
    /// Creates an augmenter around existing detours
    pub fn new(
        open: Box<dyn Detour<MenuOpenFn> + Send>,
        select: Box<dyn Detour<MenuSelectFn> + Send>,
        native: Arc<dyn MenuNative>,
        layout: MenuLayout,
        language: ClientLanguage,
    ) -> Self {
        Self {
            open: Mutex::new(open),
            select: Mutex::new(select),
            native,
            layout,
            language: RwLock::new(language),
            session: Mutex::new(MenuSession::default()),
            subscribers: Subscribers::new(),
        }
    }

    /// Registers a handler for menu openings
    pub fn subscribe<H>(&self, handler: H) -> SubscriptionId
    where
        H: Fn(&mut OpenEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribers.subscribe(handler)
    }

    /// Removes a handler
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Language entry names are shown in
    pub fn language(&self) -> ClientLanguage {
        *self.language.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Changes the language used for menus opened from now on
    pub fn set_language(&self, language: ClientLanguage) {
        *self.language.write().unwrap_or_else(PoisonError::into_inner) = language;
    }

    /// Redirects both menu functions to the augmenter
    pub fn enable(&self) -> Result<()> {
        let mut open = self.lock_open();
        let was_enabled = open.is_enabled();
        open.enable()?;
        if let Err(e) = self.lock_select().enable() {
            // never leave the open hook writing entries nothing can select
            if !was_enabled {
                open.disable()?;
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Restores both menu functions
    pub fn disable(&self) -> Result<()> {
        self.lock_open().disable()?;
        self.lock_select().disable()?;
        Ok(())
    }

    /// Restores both menu functions and releases the hooks
    pub fn dispose(&self) {
        self.lock_open().dispose();
        self.lock_select().dispose();
    }

    /// Native entry point of the open hook.
    ///
    /// # Safety
    ///
    /// Arguments must be those the game passed to the menu-open function
    pub unsafe fn intercept_open(
        &self,
        addon: *mut u8,
        menu_size: i32,
        values: *mut AtkValue,
    ) -> u8 {
        let menu_size = match self.augment(addon as usize, values) {
            Ok(size) => size,
            Err(e) => {
                warn!("context menu left unaugmented: {e}");
                menu_size
            }
        };

        let original = self.lock_open().original();
        match original {
            Ok(original) => original(addon, menu_size, values),
            Err(e) => {
                warn!("cannot forward context menu open: {e}");
                0
            }
        }
    }

    /// Native entry point of the select hook.
    ///
    /// # Safety
    ///
    /// Arguments must be those the game passed to the menu-select function
    pub unsafe fn intercept_select(&self, addon: *mut u8, index: i32, a3: u8) -> u8 {
        let selected = {
            let session = self.lock_session();
            match session.resolve(index) {
                Selection::Native => None,
                Selection::Synthetic(entry) => Some((entry.id(), entry.action().clone())),
                Selection::Stale => {
                    debug!(index, "selected index is past the synthetic entries");
                    None
                }
            }
        };

        if let Some((id, action)) = selected {
            match read_context(&*self.native, &self.layout, addon as usize) {
                Ok(context) => {
                    // faults are logged by `guarded`
                    let _ = guarded("menu select", id, || action(&context));
                }
                Err(e) => warn!(%id, "cannot resolve context for selected entry: {e}"),
            }
        }

        let original = self.lock_select().original();
        match original {
            Ok(original) => original(addon, index, a3),
            Err(e) => {
                warn!("cannot forward context menu selection: {e}");
                0
            }
        }
    }

    /// Runs the open protocol and returns the size to forward
    unsafe fn augment(&self, addon: usize, values: *mut AtkValue) -> Result<i32> {
        if values.is_null() {
            self.lock_session().reset(0);
            return Err(Error::InvalidState("menu values are null".into()));
        }
        let count_field = values as usize;
        let native_count: u32 = read_field(count_field, AtkValue::DATA_OFFSET);
        self.lock_session().reset(native_count);
        if native_count as usize > self.layout.item_capacity {
            return Err(Error::InvalidState(format!(
                "native menu reports {native_count} entries, more than the array holds"
            )));
        }

        let context = read_context(&*self.native, &self.layout, addon)?;
        let agent = context.agent;
        let mut event = OpenEvent {
            context,
            additional_items: Vec::new(),
        };
        let mut faults = self.subscribers.dispatch("menu open", &mut event);
        if !faults.is_empty() {
            return Err(faults.swap_remove(0));
        }

        let mut items = event.additional_items;
        let capacity = self.layout.item_capacity.saturating_sub(native_count as usize);
        if items.len() > capacity {
            warn!(
                offered = items.len(),
                capacity, "dropping context menu entries that do not fit"
            );
            items.truncate(capacity);
        }

        let actions =
            read_pointer(agent, self.layout.actions_pointer_offset) + self.layout.actions_offset;
        let language = self.language();
        let mut session = self.lock_session();
        for entry in items {
            let position = self.layout.header_len + native_count as usize + session.items().len();
            write_field(actions, position, self.layout.noop_action);

            let name = terminate(entry.name(language).as_bytes());
            self.native.set_string(values.add(position), name.as_ptr());

            let total: u32 = read_field(count_field, AtkValue::DATA_OFFSET);
            write_field(count_field, AtkValue::DATA_OFFSET, total.saturating_add(1));
            session.push(entry);
        }

        let total: u32 = read_field(count_field, AtkValue::DATA_OFFSET);
        debug!(
            native = native_count,
            synthetic = session.items().len(),
            "context menu augmented"
        );
        i32::try_from(total)
            .ok()
            .zip(i32::try_from(self.layout.header_len).ok())
            .and_then(|(total, header)| total.checked_add(header))
            .ok_or_else(|| Error::InvalidState(format!("menu size {total} is out of range")))
    }

    /// Locks the open detour, recovering from poisoning
    fn lock_open(&self) -> MutexGuard<'_, Box<dyn Detour<MenuOpenFn> + Send>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the select detour, recovering from poisoning
    fn lock_select(&self) -> MutexGuard<'_, Box<dyn Detour<MenuSelectFn> + Send>> {
        self.select.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the session, recovering from poisoning
    fn lock_session(&self) -> MutexGuard<'_, MenuSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Augmenter the native detours route to
static ACTIVE: RwLock<Option<Arc<MenuAugmenter>>> = RwLock::new(None);

/// Currently routed augmenter
fn active() -> Option<Arc<MenuAugmenter>> {
    ACTIVE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Replacement installed over the menu-open function
unsafe extern "C" fn open_detour(addon: *mut u8, menu_size: i32, values: *mut AtkValue) -> u8 {
    match active() {
        Some(augmenter) => augmenter.intercept_open(addon, menu_size, values),
        None => 0,
    }
}

/// Replacement installed over the menu-select function
unsafe extern "C" fn select_detour(addon: *mut u8, index: i32, a3: u8) -> u8 {
    match active() {
        Some(augmenter) => augmenter.intercept_select(addon, index, a3),
        None => 0,
    }
}

/// Locates, hooks and enables both menu functions
pub fn install(
    scanner: &Scanner<'_>,
    signatures: &SignatureSet,
    native: Arc<dyn MenuNative>,
    layout: MenuLayout,
    language: ClientLanguage,
) -> Result<Arc<MenuAugmenter>> {
    let open = signatures.locate(scanner, OPEN_LABEL)?;
    let select = signatures.locate(scanner, SELECT_LABEL)?;

    // SAFETY: the signatures identify the entries of functions with these types
    let (open, select) = unsafe {
        (
            HookHandle::<MenuOpenFn>::new(open, open_detour)?,
            HookHandle::<MenuSelectFn>::new(select, select_detour)?,
        )
    };
    let augmenter = Arc::new(MenuAugmenter::new(
        Box::new(open),
        Box::new(select),
        native,
        layout,
        language,
    ));

    *ACTIVE.write().unwrap_or_else(PoisonError::into_inner) = Some(augmenter.clone());
    if let Err(e) = augmenter.enable() {
        uninstall(&augmenter);
        return Err(e);
    }
    Ok(augmenter)
}

/// Disposes the augmenter's hooks and stops routing native calls to it
pub fn uninstall(augmenter: &Arc<MenuAugmenter>) {
    augmenter.dispose();
    let mut active = ACTIVE.write().unwrap_or_else(PoisonError::into_inner);
    if active.as_ref().is_some_and(|a| Arc::ptr_eq(a, augmenter)) {
        *active = None;
    }
}
