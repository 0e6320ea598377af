//! Test double for [`Detour`] that never touches code

use super::{Detour, HookError, HookState};

/// Fake detour whose original is an ordinary function pointer
pub struct MockDetour<F: Copy> {
    /// Function returned as the original
    original: F,
    /// Simulated lifecycle state
    state: HookState,
}

impl<F: Copy> MockDetour<F> {
    /// Creates a fake detour in the `Created` state
    pub fn new(original: F) -> Self {
        Self {
            original,
            state: HookState::Created,
        }
    }

    /// Creates a fake detour that is already enabled
    pub fn enabled(original: F) -> Self {
        Self {
            original,
            state: HookState::Enabled,
        }
    }
}

unsafe impl<F: Copy> Detour<F> for MockDetour<F> {
    fn state(&self) -> HookState {
        self.state
    }

    fn enable(&mut self) -> Result<(), HookError> {
        if self.state == HookState::Disposed {
            return Err(HookError::InvalidState("disposed".into()));
        }
        self.state = HookState::Enabled;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), HookError> {
        match self.state {
            HookState::Disposed => Err(HookError::InvalidState("disposed".into())),
            HookState::Enabled => {
                self.state = HookState::Disabled;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn dispose(&mut self) {
        self.state = HookState::Disposed;
    }

    fn original(&self) -> Result<F, HookError> {
        match self.state {
            HookState::Disposed => Err(HookError::InvalidState("disposed".into())),
            _ => Ok(self.original),
        }
    }
}
