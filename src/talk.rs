//! # Talk
//!
//! Bridge for the native "show talk window" call. Subscribers receive the decoded sender, message and
//! options, may rewrite them, or suppress the window by marking the event handled.

use std::ffi::c_void;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::config::SignatureSet;
use crate::error::{Error, Result};
use crate::event::{HandlerResult, Subscribers, SubscriptionId};
use crate::hook::{Detour, HookHandle};
use crate::memory::{read_terminated, terminate};
use crate::scan::Scanner;
use crate::text::{StructuredText, TextCodec};

/// Signature label of the native talk function
pub const SIGNATURE_LABEL: &str = "battle talk";

/// Native `AddBattleTalk(uiModule, sender, message, duration, style)`
pub type AddTalkFn = unsafe extern "C" fn(
    ui_module: *mut c_void,
    sender: *const u8,
    message: *const u8,
    duration: f32,
    style: u8,
) -> u8;

/// Visual style of the talk window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TalkStyle {
    /// White background
    #[default]
    Normal,
    /// Blue background with styled edges
    Aetherial,
    /// Black background, like a system message
    System,
    /// Blue, computer-like background
    Blue,
    /// Style byte without a name, forwarded unchanged
    Other(u8),
}

impl From<u8> for TalkStyle {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Normal,
            6 => Self::Aetherial,
            7 => Self::System,
            9 => Self::Blue,
            other => Self::Other(other),
        }
    }
}

impl From<TalkStyle> for u8 {
    fn from(value: TalkStyle) -> Self {
        match value {
            TalkStyle::Normal => 0,
            TalkStyle::Aetherial => 6,
            TalkStyle::System => 7,
            TalkStyle::Blue => 9,
            TalkStyle::Other(other) => other,
        }
    }
}

/// Display options of a talk window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TalkOptions {
    /// Seconds the window stays up
    pub duration: f32,
    /// Window style
    pub style: TalkStyle,
}

impl Default for TalkOptions {
    fn default() -> Self {
        Self {
            duration: 5.0,
            style: TalkStyle::Normal,
        }
    }
}

/// Event passed to talk subscribers
#[derive(Debug, Clone)]
pub struct TalkEvent {
    /// Name the message is attributed to
    pub sender: StructuredText,
    /// Message body
    pub message: StructuredText,
    /// Display options
    pub options: TalkOptions,
    /// Set to suppress the window; ignored for [`TalkBridge::show`]
    pub handled: bool,
}

/// How a call reached the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// The game called the hooked function
    Intercepted,
    /// [`TalkBridge::show`] injected the call
    Injected,
}

/// Decodes, dispatches and forwards talk calls
pub struct TalkBridge {
    /// Hook on the native function
    detour: Mutex<Box<dyn Detour<AddTalkFn> + Send>>,
    /// Text format of the target
    codec: Arc<dyn TextCodec>,
    /// Supplies the UI module the native function expects as `this`
    ui_module: Box<dyn Fn() -> usize + Send + Sync>,
    /// Talk subscribers
    subscribers: Subscribers<TalkEvent>,
}

impl TalkBridge {
    /// Creates a bridge around an existing detour
    pub fn new(
        detour: Box<dyn Detour<AddTalkFn> + Send>,
        codec: Arc<dyn TextCodec>,
        ui_module: Box<dyn Fn() -> usize + Send + Sync>,
    ) -> Self {
        Self {
            detour: Mutex::new(detour),
            codec,
            ui_module,
            subscribers: Subscribers::new(),
        }
    }

    /// Registers a handler for talk windows
    pub fn subscribe<H>(&self, handler: H) -> SubscriptionId
    where
        H: Fn(&mut TalkEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribers.subscribe(handler)
    }

    /// Removes a handler
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Redirects the native function to the bridge
    pub fn enable(&self) -> Result<()> {
        Ok(self.lock_detour().enable()?)
    }

    /// Restores the native function
    pub fn disable(&self) -> Result<()> {
        Ok(self.lock_detour().disable()?)
    }

    /// Restores the native function and releases the hook
    pub fn dispose(&self) {
        self.lock_detour().dispose();
    }

    /// Native entry point while hooked.
    ///
    /// # Safety
    ///
    /// `sender` and `message` must be null or point to zero-terminated strings
    pub unsafe fn intercept(
        &self,
        ui_module: *mut c_void,
        sender: *const u8,
        message: *const u8,
        duration: f32,
        style: u8,
    ) -> u8 {
        let sender = read_terminated(sender);
        let message = read_terminated(message);
        let options = TalkOptions {
            duration,
            style: style.into(),
        };
        self.run(ui_module, &sender, &message, options, Trigger::Intercepted)
    }

    /// Shows a talk window as if the game had requested it.
    ///
    /// Subscribers still run, but the window is always shown.
    pub fn show(
        &self,
        sender: &StructuredText,
        message: &StructuredText,
        options: Option<TalkOptions>,
    ) -> Result<u8> {
        if !self.lock_detour().was_enabled() {
            return Err(Error::InvalidState("talk hook is not enabled".into()));
        }

        let sender = self.codec.encode(sender);
        if sender.is_empty() {
            return Err(Error::InvalidArgument("sender cannot be empty".into()));
        }
        let message = self.codec.encode(message);
        if message.is_empty() {
            return Err(Error::InvalidArgument("message cannot be empty".into()));
        }

        let ui_module = (self.ui_module)() as *mut c_void;
        let options = options.unwrap_or_default();
        Ok(self.run(ui_module, &sender, &message, options, Trigger::Injected))
    }

    /// Decode, dispatch and forward (or suppress) one call
    fn run(
        &self,
        ui_module: *mut c_void,
        sender: &[u8],
        message: &[u8],
        options: TalkOptions,
        trigger: Trigger,
    ) -> u8 {
        let mut event = TalkEvent {
            sender: self.codec.decode(sender),
            message: self.codec.decode(message),
            options,
            handled: false,
        };
        self.subscribers.dispatch("talk", &mut event);

        if event.handled && trigger == Trigger::Intercepted {
            debug!("talk window suppressed by subscriber");
            return 0;
        }

        let sender = terminate(&self.codec.encode(&event.sender));
        let message = terminate(&self.codec.encode(&event.message));
        let original = match self.lock_detour().original() {
            Ok(original) => original,
            Err(e) => {
                warn!("cannot forward talk window: {e}");
                return 0;
            }
        };

        // SAFETY: both buffers are zero-terminated and outlive the call
        unsafe {
            original(
                ui_module,
                sender.as_ptr(),
                message.as_ptr(),
                event.options.duration,
                event.options.style.into(),
            )
        }
    }

    /// Locks the detour, recovering from poisoning
    fn lock_detour(&self) -> std::sync::MutexGuard<'_, Box<dyn Detour<AddTalkFn> + Send>> {
        self.detour.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bridge the native detour routes to
static ACTIVE: RwLock<Option<Arc<TalkBridge>>> = RwLock::new(None);

/// Replacement installed over the native function
unsafe extern "C" fn add_talk_detour(
    ui_module: *mut c_void,
    sender: *const u8,
    message: *const u8,
    duration: f32,
    style: u8,
) -> u8 {
    let bridge = ACTIVE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    match bridge {
        Some(bridge) => bridge.intercept(ui_module, sender, message, duration, style),
        None => 0,
    }
}

/// Locates, hooks and enables the native talk function
pub fn install(
    scanner: &Scanner<'_>,
    signatures: &SignatureSet,
    codec: Arc<dyn TextCodec>,
    ui_module: Box<dyn Fn() -> usize + Send + Sync>,
) -> Result<Arc<TalkBridge>> {
    let address = signatures.locate(scanner, SIGNATURE_LABEL)?;

    // SAFETY: the signature identifies the AddBattleTalk entry, whose type is `AddTalkFn`
    let hook = unsafe { HookHandle::<AddTalkFn>::new(address, add_talk_detour)? };
    let bridge = Arc::new(TalkBridge::new(Box::new(hook), codec, ui_module));

    *ACTIVE.write().unwrap_or_else(PoisonError::into_inner) = Some(bridge.clone());
    if let Err(e) = bridge.enable() {
        uninstall(&bridge);
        return Err(e);
    }
    Ok(bridge)
}

/// Disposes the bridge's hook and stops routing native calls to it
pub fn uninstall(bridge: &Arc<TalkBridge>) {
    bridge.dispose();
    let mut active = ACTIVE.write().unwrap_or_else(PoisonError::into_inner);
    if active.as_ref().is_some_and(|a| Arc::ptr_eq(a, bridge)) {
        *active = None;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::ptr;

    use super::*;
    use crate::hook::mock::MockDetour;
    use crate::text::Utf8Codec;

    /// Arguments seen by [`recording_original`]
    #[derive(Debug, Clone, PartialEq)]
    struct Forwarded {
        /// Sender bytes
        sender: Vec<u8>,
        /// Message bytes
        message: Vec<u8>,
        /// Duration argument
        duration: f32,
        /// Style argument
        style: u8,
    }

    thread_local! {
        /// Calls that reached the original on this test's thread
        static FORWARDED: RefCell<Vec<Forwarded>> = const { RefCell::new(Vec::new()) };
    }

    /// Stand-in for the native function
    unsafe extern "C" fn recording_original(
        _ui_module: *mut c_void,
        sender: *const u8,
        message: *const u8,
        duration: f32,
        style: u8,
    ) -> u8 {
        let call = Forwarded {
            sender: read_terminated(sender),
            message: read_terminated(message),
            duration,
            style,
        };
        FORWARDED.with(|f| f.borrow_mut().push(call));
        1
    }

    /// Drains the calls recorded on this thread
    fn forwarded() -> Vec<Forwarded> {
        FORWARDED.with(|f| f.borrow_mut().drain(..).collect())
    }

    /// Bridge around an enabled mock detour
    fn bridge() -> TalkBridge {
        TalkBridge::new(
            Box::new(MockDetour::<AddTalkFn>::enabled(recording_original)),
            Arc::new(Utf8Codec),
            Box::new(|| 0x1000),
        )
    }

    /// Intercepts a call with the given strings
    fn intercept(bridge: &TalkBridge, sender: &str, message: &str) -> u8 {
        let sender = terminate(sender.as_bytes());
        let message = terminate(message.as_bytes());
        unsafe {
            bridge.intercept(
                ptr::null_mut(),
                sender.as_ptr(),
                message.as_ptr(),
                3.0,
                6,
            )
        }
    }

    #[test]
    /// Without subscribers the call is forwarded unchanged
    fn test_forward_unchanged() {
        let bridge = bridge();
        assert_eq!(intercept(&bridge, "Nael", "Hello"), 1);
        assert_eq!(
            forwarded(),
            [Forwarded {
                sender: b"Nael".to_vec(),
                message: b"Hello".to_vec(),
                duration: 3.0,
                style: 6,
            }]
        );
    }

    #[test]
    /// Mutations are re-encoded and forwarded exactly once
    fn test_forward_mutated() {
        let bridge = bridge();
        bridge.subscribe(|event| {
            event.sender = "Bahamut".into();
            event.message.push_text("!");
            event.options.duration = 10.0;
            event.options.style = TalkStyle::Blue;
            Ok(())
        });

        intercept(&bridge, "Nael", "Hello");
        assert_eq!(
            forwarded(),
            [Forwarded {
                sender: b"Bahamut".to_vec(),
                message: b"Hello!".to_vec(),
                duration: 10.0,
                style: 9,
            }]
        );
    }

    #[test]
    /// Zero bytes inserted by a subscriber do not truncate the forwarded text
    fn test_forward_strips_interior_zero() {
        let bridge = bridge();
        bridge.subscribe(|event| {
            event.message = "a\0b".into();
            Ok(())
        });

        intercept(&bridge, "Nael", "Hello");
        let calls = forwarded();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].message, b"ab");
    }

    #[test]
    /// Handled events never reach the original
    fn test_handled_suppresses() {
        let bridge = bridge();
        bridge.subscribe(|event| {
            event.handled = true;
            Ok(())
        });
        assert_eq!(intercept(&bridge, "Nael", "Hello"), 0);
        assert!(forwarded().is_empty());
    }

    #[test]
    /// A failing subscriber neither suppresses nor stops later subscribers
    fn test_subscriber_fault_forwards() {
        let bridge = bridge();
        bridge.subscribe(|_| Err("broken".into()));
        bridge.subscribe(|event| {
            event.message = "patched".into();
            Ok(())
        });

        assert_eq!(intercept(&bridge, "Nael", "Hello"), 1);
        let calls = forwarded();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].message, b"patched");
    }

    #[test]
    /// Injected windows are forwarded even when a subscriber handles them
    fn test_show_ignores_handled() {
        let bridge = bridge();
        bridge.subscribe(|event| {
            event.handled = true;
            Ok(())
        });

        let result = bridge.show(&"Nael".into(), &"Hello".into(), None);
        assert_eq!(result.unwrap(), 1);
        let calls = forwarded();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].duration, 5.0);
        assert_eq!(calls[0].style, 0);
    }

    #[test]
    /// Showing requires an enabled hook and non-empty text
    fn test_show_errors() {
        let disabled = TalkBridge::new(
            Box::new(MockDetour::<AddTalkFn>::new(recording_original)),
            Arc::new(Utf8Codec),
            Box::new(|| 0),
        );
        assert!(matches!(
            disabled.show(&"Nael".into(), &"Hello".into(), None),
            Err(Error::InvalidState(_))
        ));

        let bridge = bridge();
        assert!(matches!(
            bridge.show(&"".into(), &"Hello".into(), None),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            bridge.show(&"Nael".into(), &StructuredText::default(), None),
            Err(Error::InvalidArgument(_))
        ));
        assert!(forwarded().is_empty());
    }

    #[test]
    /// Unnamed style bytes pass through untouched
    fn test_style_round_trip() {
        assert_eq!(TalkStyle::from(7), TalkStyle::System);
        assert_eq!(u8::from(TalkStyle::from(42)), 42);
    }
}
