//! Reactive Primitives
//!
//! This module implements the reactive engine: signals, computed values,
//! effects, watchers and batching.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal is read while a
//! computed value or effect is running, that computation is registered as a
//! dependent. When the signal's value changes, every dependent is notified.
//!
//! ## Computed Values
//!
//! A Computed is a derived value that caches its result. It recomputes only
//! after one of its dependencies changed, and notifies its own dependents
//! only when the result is different.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that reruns whenever its
//! dependencies change. Effects synchronize reactive state with the outside
//! world. Watchers are effects that report old and new values.
//!
//! ## Batches
//!
//! A batch groups writes so that every affected subscriber reruns once, after
//! the last write, and sees only the final values.
//!
//! # Implementation Notes
//!
//! Dependencies are discovered at run time through a thread-local tracking
//! context. Each run of a computation throws away the edges of its previous
//! run, so a branch that is no longer taken stops causing reruns. All state
//! is per thread and every handle is `!Send`.

mod batch;
mod computed;
mod context;
mod effect;
mod runtime;
mod signal;
mod subscriber;
mod watch;

pub use batch::{
    after_batch, batch, batch_depth, batched, end_batch, is_batching, pending_count, start_batch,
};
pub use computed::{computed, Computed, ComputedState};
pub use context::{is_tracking, untracked, ReactiveContext};
pub use effect::{
    effect, effect_with_options, live_effect_count, on_cleanup, Effect, EffectOptions, OnCleanup,
};
pub use runtime::Runtime;
pub use signal::{signal, Signal, Subscription};
pub use subscriber::{CleanupFn, SubscriberId, SubscriberKind};
pub use watch::{
    source_fn, watch, watch_once, watch_with_options, FnSource, WatchOptions, WatchSource,
};
