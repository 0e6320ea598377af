//! # Hook
//!
//! This module covers hooks, which redirect execution from a native function to a replacement while
//! keeping the original callable.
//!
//! Bridges only see the [`Detour`] trait; the code rewriting lives in [`inline`].

pub mod inline;
#[cfg(test)]
pub mod mock;

use thiserror::Error;

use crate::alloc::ProximityError;
use crate::code::x64::CodeError;
use crate::patch::mem::PermissionError;

pub use inline::HookHandle;

/// Lifecycle of a hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    /// Trampoline built, target untouched
    Created,
    /// Calls to the target run the replacement
    Enabled,
    /// Target restored, hook can be enabled again
    Disabled,
    /// Resources released, terminal
    Disposed,
}

/// Errors raised by hook lifecycle operations
#[derive(Debug, Error)]
pub enum HookError {
    /// Another live hook already owns the target
    #[error("address {0:#x} is already hooked")]
    AlreadyHooked(usize),
    /// Operation not allowed in the current state
    #[error("invalid hook state: {0}")]
    InvalidState(String),
    /// Hook type parameter is not a plain function pointer
    #[error("hook function type must be pointer sized")]
    NotAFunctionPointer,
    /// Trampoline could not be generated
    #[error("{0}")]
    Code(#[from] CodeError),
    /// Target could not be written
    #[error("{0}")]
    Patch(#[from] PermissionError<std::convert::Infallible>),
    /// Trampoline memory could not be allocated
    #[error("{0}")]
    Alloc(#[from] ProximityError),
}

/// A redirected native function of type `F` (an `unsafe extern "C" fn` pointer)
///
/// # Safety
///
/// Implementors must guarantee that the pointer returned by [`Detour::original`] can be called with
/// the calling convention and argument layout of `F` while the detour is not disposed.
pub unsafe trait Detour<F: Copy> {
    /// Current lifecycle state
    fn state(&self) -> HookState;

    /// Redirects the target to the replacement. Enabling an enabled hook does nothing.
    fn enable(&mut self) -> Result<(), HookError>;

    /// Restores the target's original code. Disabling a hook that is not enabled does nothing.
    fn disable(&mut self) -> Result<(), HookError>;

    /// Restores the target and releases every resource. Safe to call more than once.
    fn dispose(&mut self);

    /// Callable that runs the pre-redirection code path
    fn original(&self) -> Result<F, HookError>;

    /// Whether calls are currently redirected
    fn is_enabled(&self) -> bool {
        self.state() == HookState::Enabled
    }

    /// Whether the hook was enabled at some point and is not disposed
    fn was_enabled(&self) -> bool {
        matches!(self.state(), HookState::Enabled | HookState::Disabled)
    }
}
