//! Errors and Diagnostics
//!
//! Most misuse of the reactive engine is not fatal. Calling a helper that
//! only makes sense inside an effect, or closing a batch that was never
//! opened, degrades to a no-op. Those situations are still reported so they
//! can be found: every reported error is logged through `tracing` and handed
//! to the thread's diagnostic hook, if one is installed.
//!
//! Reading a computed value while it is still computing is the one error the
//! engine refuses to paper over. `try_get` returns it, `get` panics with it.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

use crate::reactive::SubscriberId;

/// Errors produced by the reactive engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A helper was called where it has nothing to attach to.
    #[error("`{helper}` was called outside of {expected}")]
    MisuseOutsideContext {
        helper: &'static str,
        expected: &'static str,
    },

    /// A subscriber triggered itself while running. The trigger was dropped.
    #[error("subscriber {id} triggered itself while running; the rerun was suppressed")]
    ReentrantTrigger { id: SubscriberId },

    /// A computed value was read while its own computation was in progress.
    #[error("computed {id} was read while it was still computing its value")]
    StaleComputedRead { id: SubscriberId },

    /// A single propagation pass ran more subscribers than the configured limit.
    #[error("update depth exceeded: more than {limit} subscriber runs in one propagation pass")]
    UpdateDepthExceeded { limit: usize },
}

/// Callback that observes reported errors.
pub type DiagnosticHook = Rc<dyn Fn(&ReactiveError)>;

thread_local! {
    static DIAGNOSTIC_HOOK: RefCell<Option<DiagnosticHook>> = const { RefCell::new(None) };
}

/// Install a diagnostic hook for the current thread.
///
/// Returns the previously installed hook, if any.
pub fn set_diagnostic_hook<F>(hook: F) -> Option<DiagnosticHook>
where
    F: Fn(&ReactiveError) + 'static,
{
    DIAGNOSTIC_HOOK.with(|slot| slot.borrow_mut().replace(Rc::new(hook)))
}

/// Remove the current thread's diagnostic hook.
pub fn clear_diagnostic_hook() -> Option<DiagnosticHook> {
    DIAGNOSTIC_HOOK.with(|slot| slot.borrow_mut().take())
}

/// Log an error and pass it to the diagnostic hook.
pub(crate) fn report(error: &ReactiveError) {
    match error {
        ReactiveError::ReentrantTrigger { id } => {
            tracing::debug!(subscriber = %id, "suppressed reentrant trigger");
        }
        ReactiveError::UpdateDepthExceeded { limit } => {
            tracing::error!(limit, "update depth exceeded");
        }
        _ => tracing::warn!(error = %error, "reactive misuse"),
    }

    // The hook may itself touch reactive state, so call it without holding
    // the slot borrow.
    let hook = DIAGNOSTIC_HOOK
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten();
    if let Some(hook) = hook {
        hook(error);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
