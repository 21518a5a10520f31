//! Resource State Tracker
//!
//! Remembers the state each resource will be in once all recorded work
//! executes, and turns requested transitions into barriers. Transitions to
//! the state a resource is already in are elided.
//!
//! The barrier is pushed and the recorded state updated under the same
//! lock, so no observer sees one without the other.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::hal::{Barrier, CommandList, RawResource, ResourceState};

/// Emitted / elided transition counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionStats {
    pub emitted: u64,
    pub elided: u64,
}

#[derive(Default)]
pub struct ResourceStateTracker {
    states: Mutex<FxHashMap<RawResource, ResourceState>>,
    emitted: AtomicU64,
    elided: AtomicU64,
}

impl ResourceStateTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `resource` in `state`, replacing any previous entry.
    pub fn register(&self, resource: RawResource, state: ResourceState) {
        if let Some(old) = self.states.lock().insert(resource, state) {
            log::debug!("{resource:?} re-registered: {old:?} -> {state:?}");
        }
    }

    pub fn unregister(&self, resource: RawResource) -> Option<ResourceState> {
        self.states.lock().remove(&resource)
    }

    #[must_use]
    pub fn is_tracked(&self, resource: RawResource) -> bool {
        self.states.lock().contains_key(&resource)
    }

    #[must_use]
    pub fn try_state(&self, resource: RawResource) -> Option<ResourceState> {
        self.states.lock().get(&resource).copied()
    }

    /// Current state; untracked resources report `Common` with a warning.
    #[must_use]
    pub fn state(&self, resource: RawResource) -> ResourceState {
        self.try_state(resource).unwrap_or_else(|| {
            log::warn!("State queried for untracked resource {resource:?}; assuming Common");
            ResourceState::Common
        })
    }

    /// Records a barrier moving `resource` into `new_state`.
    ///
    /// Returns `false` when the resource already is in `new_state` and no
    /// barrier was needed.
    pub fn transition(
        &self,
        list: &mut CommandList,
        resource: RawResource,
        new_state: ResourceState,
    ) -> bool {
        self.transition_many(list, &[(resource, new_state)]) == 1
    }

    /// Batched [`transition`](Self::transition): all needed barriers go into
    /// a single barrier command. Returns the number of barriers emitted.
    ///
    /// A closed list records nothing, so tracked states are left unchanged.
    pub fn transition_many(
        &self,
        list: &mut CommandList,
        requests: &[(RawResource, ResourceState)],
    ) -> usize {
        if list.is_closed() {
            log::error!(
                "Transition of {} resource(s) into a closed command list ignored",
                requests.len()
            );
            return 0;
        }
        let mut states = self.states.lock();
        let mut barriers: SmallVec<[Barrier; 4]> = SmallVec::new();

        for &(resource, after) in requests {
            let before = match states.get(&resource) {
                Some(&s) => s,
                None => {
                    log::warn!("Transition of untracked resource {resource:?}; assuming Common");
                    ResourceState::Common
                }
            };
            if before == after {
                self.elided.fetch_add(1, Ordering::Relaxed);
                states.insert(resource, after);
                continue;
            }
            barriers.push(Barrier {
                resource,
                before,
                after,
            });
            states.insert(resource, after);
        }

        let emitted = barriers.len();
        self.emitted.fetch_add(emitted as u64, Ordering::Relaxed);
        list.barriers(barriers);
        emitted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> TransitionStats {
        TransitionStats {
            emitted: self.emitted.load(Ordering::Relaxed),
            elided: self.elided.load(Ordering::Relaxed),
        }
    }
}
