//! Subscriber types for the reactive system.
//!
//! A subscriber is any computation that reads reactive values and can be
//! rerun when they change: computed values and effects. Sources (signals and
//! computed values) own a [`DependencySet`] listing the subscribers that read
//! them; each subscriber's [`SubscriberNode`] lists the dependency sets it was
//! registered in during its most recent run. The two sides always mirror each
//! other.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;

/// Cleanup callback registered by an effect run.
pub type CleanupFn = Box<dyn FnOnce()>;

/// Unique identifier for a subscriber.
///
/// Each subscriber (computed or effect) gets a unique ID when created. The ID
/// is the identity used to deduplicate edges and pending batch entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What kind of computation a subscriber is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberKind {
    Computed,
    Effect,
}

/// Bookkeeping shared by every subscriber.
pub(crate) struct SubscriberNode {
    id: SubscriberId,
    kind: SubscriberKind,
    /// Dependency sets this subscriber is registered in.
    dependencies: RefCell<SmallVec<[Rc<DependencySet>; 4]>>,
    /// Set while the subscriber sits in the drain queue.
    queued: Cell<bool>,
}

impl SubscriberNode {
    pub(crate) fn new(kind: SubscriberKind) -> Self {
        Self {
            id: SubscriberId::new(),
            kind,
            dependencies: RefCell::new(SmallVec::new()),
            queued: Cell::new(false),
        }
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn kind(&self) -> SubscriberKind {
        self.kind
    }

    pub(crate) fn add_dependency(&self, set: Rc<DependencySet>) {
        self.dependencies.borrow_mut().push(set);
    }

    pub(crate) fn take_dependencies(&self) -> SmallVec<[Rc<DependencySet>; 4]> {
        std::mem::take(&mut *self.dependencies.borrow_mut())
    }

    pub(crate) fn dependency_count(&self) -> usize {
        self.dependencies.borrow().len()
    }

    pub(crate) fn is_queued(&self) -> bool {
        self.queued.get()
    }

    pub(crate) fn set_queued(&self, queued: bool) {
        self.queued.set(queued);
    }
}

/// A node in the dependency graph that can be notified and rerun.
pub(crate) trait Reactive {
    fn node(&self) -> &SubscriberNode;

    /// Called synchronously for every trigger that reaches this subscriber,
    /// before it is queued or deferred.
    fn notify(&self) {}

    /// Mark a clean computed as possibly stale. Returns the computed's own
    /// dependents when the state changed so the caller can keep walking.
    fn mark_check(&self) -> Option<Rc<DependencySet>> {
        None
    }

    /// Whether the subscriber is executing right now.
    fn is_running(&self) -> bool;

    fn is_disposed(&self) -> bool;

    /// Attach a cleanup to the current run. Subscribers that have no cleanup
    /// slot hand the callback back.
    fn register_cleanup(&self, cleanup: CleanupFn) -> Result<(), CleanupFn> {
        Err(cleanup)
    }

    /// Rerun the subscriber.
    fn execute(self: Rc<Self>);
}

/// The subscribers that read one particular source, in first-read order.
///
/// Entries are weak: a dependency set never keeps a subscriber alive. Dead
/// entries are pruned whenever the set is snapshotted.
#[derive(Default)]
pub(crate) struct DependencySet {
    subscribers: RefCell<IndexMap<SubscriberId, Weak<dyn Reactive>>>,
}

impl DependencySet {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Insert a subscriber. Returns `false` if it was already present.
    pub(crate) fn insert(&self, id: SubscriberId, subscriber: Weak<dyn Reactive>) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        if subscribers.contains_key(&id) {
            return false;
        }
        subscribers.insert(id, subscriber);
        true
    }

    pub(crate) fn remove(&self, id: SubscriberId) {
        self.subscribers.borrow_mut().shift_remove(&id);
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.borrow().contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Live subscribers in insertion order.
    ///
    /// The returned list is detached from the set, so callers may run
    /// subscribers that add or remove edges while iterating it.
    pub(crate) fn snapshot(&self) -> Vec<Rc<dyn Reactive>> {
        let mut subscribers = self.subscribers.borrow_mut();
        let mut live = Vec::with_capacity(subscribers.len());
        subscribers.retain(|_, weak| match weak.upgrade() {
            Some(subscriber) => {
                live.push(subscriber);
                true
            }
            None => false,
        });
        live
    }
}

impl fmt::Debug for DependencySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.subscribers.borrow().keys())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        node: SubscriberNode,
        runs: Cell<u32>,
    }

    impl Probe {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                node: SubscriberNode::new(SubscriberKind::Effect),
                runs: Cell::new(0),
            })
        }
    }

    impl Reactive for Probe {
        fn node(&self) -> &SubscriberNode {
            &self.node
        }

        fn is_running(&self) -> bool {
            false
        }

        fn is_disposed(&self) -> bool {
            false
        }

        fn execute(self: Rc<Self>) {
            self.runs.set(self.runs.get() + 1);
        }
    }

    fn weak(probe: &Rc<Probe>) -> Weak<dyn Reactive> {
        let strong: Rc<dyn Reactive> = probe.clone();
        Rc::downgrade(&strong)
    }

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn dependency_set_deduplicates_by_id() {
        let set = DependencySet::new();
        let probe = Probe::new();

        assert!(set.insert(probe.node.id(), weak(&probe)));
        assert!(!set.insert(probe.node.id(), weak(&probe)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn snapshot_preserves_insertion_order() {
        let set = DependencySet::new();
        let probes: Vec<_> = (0..4).map(|_| Probe::new()).collect();
        for probe in &probes {
            set.insert(probe.node.id(), weak(probe));
        }

        let ids: Vec<_> = set.snapshot().iter().map(|s| s.node().id()).collect();
        let expected: Vec<_> = probes.iter().map(|p| p.node.id()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn snapshot_prunes_dropped_subscribers() {
        let set = DependencySet::new();
        let kept = Probe::new();
        let dropped = Probe::new();
        set.insert(kept.node.id(), weak(&kept));
        set.insert(dropped.node.id(), weak(&dropped));
        drop(dropped);

        assert_eq!(set.snapshot().len(), 1);
        assert_eq!(set.len(), 1);
        assert!(set.contains(kept.node.id()));
    }

    #[test]
    fn node_hands_back_dependencies() {
        let probe = Probe::new();
        probe.node.add_dependency(DependencySet::new());
        probe.node.add_dependency(DependencySet::new());
        assert_eq!(probe.node.dependency_count(), 2);

        let taken = probe.node.take_dependencies();
        assert_eq!(taken.len(), 2);
        assert_eq!(probe.node.dependency_count(), 0);
    }

    #[test]
    fn execute_through_trait_object() {
        let probe = Probe::new();
        let dynamic: Rc<dyn Reactive> = probe.clone();
        dynamic.execute();
        assert_eq!(probe.runs.get(), 1);
    }
}
