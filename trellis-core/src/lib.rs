//! Trellis Core
//!
//! This crate provides a synchronous, fine-grained reactive engine. It
//! implements:
//!
//! - Signals: reactive cells that know who reads them
//! - Computed values: cached derivations with glitch-free propagation
//! - Effects and watchers: eager side effects with cleanup
//! - Batching: write coalescing with a single flush
//!
//! The engine keeps a bipartite dependency graph between sources and
//! subscribers. Edges are discovered while a subscriber runs and rebuilt on
//! every run, so the graph always reflects the branches actually taken.
//!
//! # Architecture
//!
//! - `reactive`: the primitives and the dependency tracker
//! - `error`: error type and the diagnostic hook
//! - `config`: per-thread runtime settings
//!
//! # Example
//!
//! ```
//! use trellis_core::reactive::{batch, computed, effect, signal};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let count = signal(2);
//! let count_clone = count.clone();
//! let doubled = computed(move || count_clone.get() * 2);
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let log_clone = log.clone();
//! let _effect = effect(move |_| log_clone.borrow_mut().push(doubled.get()));
//!
//! count.set(5);
//! batch(|| {
//!     count.set(6);
//!     count.set(7);
//! });
//!
//! assert_eq!(*log.borrow(), vec![4, 10, 14]);
//! ```

pub mod config;
pub mod error;
pub mod reactive;

pub use config::{configure, runtime_config, RuntimeConfig};
pub use error::{clear_diagnostic_hook, set_diagnostic_hook, DiagnosticHook, ReactiveError};
