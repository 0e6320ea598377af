//! # Inline Hook
//!
//! Overwrites the entry of a function with an absolute `jmp` to the replacement. The overwritten
//! instructions are relocated into a trampoline which serves as the callable original.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::mem;
use std::sync::{Mutex, PoisonError};

use lazy_static::lazy_static;
use tracing::debug;

use crate::code::x64::{redirect_patch, Trampoline};
use crate::patch::byte::{BytePatchGuard, BytePatcher};
use crate::patch::mem::{PermissionWrapper, PermissionWrapperGuard};
use crate::patch::Patcher;

use super::{Detour, HookError, HookState};

lazy_static! {
    /// Target addresses owned by a live hook
    static ref OWNED: Mutex<HashSet<usize>> = Mutex::new(HashSet::new());
}

/// Marks `target` as owned, failing if a live hook already owns it
fn claim(target: usize) -> Result<(), HookError> {
    let mut owned = OWNED.lock().unwrap_or_else(PoisonError::into_inner);
    if owned.insert(target) {
        Ok(())
    } else {
        Err(HookError::AlreadyHooked(target))
    }
}

/// Gives up ownership of `target`
fn release(target: usize) {
    OWNED
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&target);
}

/// Inline hook on a native function of type `F`
pub struct HookHandle<F: Copy> {
    /// Entry of the hooked function
    target: usize,
    /// Replacement the target jumps to while enabled
    destination: usize,
    /// Relocated entry, `None` once disposed
    trampoline: Option<Trampoline>,
    /// Active redirect, `Some` exactly while enabled
    patch: Option<PermissionWrapperGuard<BytePatchGuard>>,
    /// Lifecycle state
    state: HookState,
    /// Function type of the target
    _fn: PhantomData<F>,
}

// The raw addresses inside are never dereferenced through a shared reference
unsafe impl<F: Copy> Send for HookHandle<F> {}
unsafe impl<F: Copy> Sync for HookHandle<F> {}

impl<F: Copy> HookHandle<F> {
    /// Prepares a hook redirecting `target` to `replacement` without enabling it.
    ///
    /// # Safety
    ///
    /// - `target` must be the entry of a function whose signature is `F`
    /// - `replacement` must be a function pointer of type `F`
    pub unsafe fn new(target: usize, replacement: F) -> Result<Self, HookError> {
        if mem::size_of::<F>() != mem::size_of::<usize>() {
            return Err(HookError::NotAFunctionPointer);
        }
        let destination: usize = mem::transmute_copy(&replacement);

        claim(target)?;
        let trampoline = match Trampoline::build(target as *const u8) {
            Ok(trampoline) => trampoline,
            Err(e) => {
                release(target);
                return Err(e.into());
            }
        };
        debug!(
            "created hook {target:#x} -> {destination:#x}, trampoline at {:#x}",
            trampoline.address()
        );

        Ok(Self {
            target,
            destination,
            trampoline: Some(trampoline),
            patch: None,
            state: HookState::Created,
            _fn: PhantomData,
        })
    }

    /// Prepares and enables a hook in one step
    ///
    /// # Safety
    ///
    /// See [`HookHandle::new`]
    pub unsafe fn install(target: usize, replacement: F) -> Result<Self, HookError> {
        let mut hook = Self::new(target, replacement)?;
        hook.enable()?;
        Ok(hook)
    }

    /// Address of the hooked function
    pub fn target(&self) -> usize {
        self.target
    }
}

unsafe impl<F: Copy> Detour<F> for HookHandle<F> {
    fn state(&self) -> HookState {
        self.state
    }

    /// Writes the redirect over the target's first bytes.
    ///
    /// The write is a plain multi-byte copy and no other thread is suspended. Callers must ensure
    /// no thread is executing the overwritten bytes while the hook is enabled or disabled.
    fn enable(&mut self) -> Result<(), HookError> {
        match self.state {
            HookState::Enabled => return Ok(()),
            HookState::Disposed => {
                return Err(HookError::InvalidState("cannot enable a disposed hook".into()))
            }
            HookState::Created | HookState::Disabled => {}
        }
        let Some(trampoline) = &self.trampoline else {
            return Err(HookError::InvalidState("hook has no trampoline".into()));
        };

        let patch = redirect_patch(self.destination, trampoline.stolen_len());
        // SAFETY: the trampoline build decoded `stolen_len` bytes of whole instructions at the target
        let guard =
            unsafe { PermissionWrapper::new(BytePatcher).patch(self.target as *mut u8, &patch)? };
        self.patch = Some(guard);
        self.state = HookState::Enabled;
        debug!("enabled hook at {:#x}", self.target);
        Ok(())
    }

    fn disable(&mut self) -> Result<(), HookError> {
        match self.state {
            HookState::Enabled => {
                // dropping the guard writes the original bytes back
                self.patch = None;
                self.state = HookState::Disabled;
                debug!("disabled hook at {:#x}", self.target);
                Ok(())
            }
            HookState::Created | HookState::Disabled => Ok(()),
            HookState::Disposed => Err(HookError::InvalidState(
                "cannot disable a disposed hook".into(),
            )),
        }
    }

    fn dispose(&mut self) {
        if self.state == HookState::Disposed {
            return;
        }
        self.patch = None;
        self.trampoline = None;
        release(self.target);
        self.state = HookState::Disposed;
        debug!("disposed hook at {:#x}", self.target);
    }

    fn original(&self) -> Result<F, HookError> {
        match &self.trampoline {
            // SAFETY: `F` is pointer sized (checked in `new`) and the trampoline keeps `F`'s ABI
            Some(trampoline) => Ok(unsafe { mem::transmute_copy(&trampoline.address()) }),
            None => Err(HookError::InvalidState(
                "original is unavailable after dispose".into(),
            )),
        }
    }
}

impl<F: Copy> Drop for HookHandle<F> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use std::hint::black_box;

    use super::*;

    /// Signature of the functions hooked by the tests
    type BinaryFn = extern "C" fn(i32, i32) -> i32;

    /// Hook target; the loop keeps the body longer than the redirect
    #[inline(never)]
    extern "C" fn add(a: i32, b: i32) -> i32 {
        let mut total = black_box(a);
        for _ in 0..black_box(1) {
            total = black_box(total.wrapping_add(b));
        }
        total
    }

    /// Second target so tests do not race on the same code
    #[inline(never)]
    extern "C" fn sub(a: i32, b: i32) -> i32 {
        let mut total = black_box(a);
        for _ in 0..black_box(1) {
            total = black_box(total.wrapping_sub(b));
        }
        total
    }

    /// Replacement used while hooked
    extern "C" fn multiply(a: i32, b: i32) -> i32 {
        a.wrapping_mul(b)
    }

    /// Calls through an opaque pointer so the call cannot be folded
    fn call(f: BinaryFn) -> i32 {
        black_box(f)(3, 4)
    }

    #[test]
    /// Enable, disable and dispose transitions redirect and restore the target
    fn test_hook_lifecycle() {
        let mut hook = unsafe { HookHandle::<BinaryFn>::new(add as usize, multiply) }.unwrap();
        assert_eq!(hook.state(), HookState::Created);
        assert_eq!(call(add), 7);

        hook.enable().unwrap();
        assert_eq!(call(add), 12);
        // original still runs the unhooked code
        assert_eq!(call(hook.original().unwrap()), 7);

        // idempotent enable
        hook.enable().unwrap();
        assert_eq!(call(add), 12);

        hook.disable().unwrap();
        assert_eq!(hook.state(), HookState::Disabled);
        assert_eq!(call(add), 7);

        // re-enable restores the redirect exactly
        hook.enable().unwrap();
        assert_eq!(call(add), 12);

        hook.dispose();
        assert_eq!(hook.state(), HookState::Disposed);
        assert_eq!(call(add), 7);

        // dispose is idempotent, enable is forbidden afterwards
        hook.dispose();
        assert!(matches!(hook.enable(), Err(HookError::InvalidState(_))));
        assert!(hook.original().is_err());
    }

    #[test]
    /// Only one live hook may own a target
    fn test_already_hooked() {
        let first = unsafe { HookHandle::<BinaryFn>::install(sub as usize, multiply) }.unwrap();
        let second = unsafe { HookHandle::<BinaryFn>::new(sub as usize, multiply) };
        assert!(matches!(second, Err(HookError::AlreadyHooked(_))));
        assert_eq!(call(sub), 12);

        // dropping disposes and frees the target
        drop(first);
        assert_eq!(call(sub), -1);
        let mut again = unsafe { HookHandle::<BinaryFn>::new(sub as usize, multiply) }.unwrap();
        again.dispose();
    }

    #[test]
    /// Non pointer-sized hook types are rejected
    fn test_not_a_function_pointer() {
        let result = unsafe { HookHandle::<(usize, usize)>::new(0x1000, (0, 0)) };
        assert!(matches!(result, Err(HookError::NotAFunctionPointer)));
    }
}
