use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{MappingError, Result};
use crate::model::Value;
use crate::types::MappedTypeId;

/// Fetches the full representation of a resource by URI.
pub trait ResourceLoader {
    /// Loads the value stored at `uri`, expected to be assignable to `expected`.
    fn load(&self, uri: &str, expected: MappedTypeId) -> Result<Value>;
}

/// Lifecycle of a [`LazyRef`].
#[derive(Clone, Debug)]
pub enum RefState {
    /// Only the URI is known.
    Unresolved,
    /// A fetch is in flight on the given thread.
    Resolving(ThreadId),
    /// The target has been loaded.
    Resolved(Value),
    /// The fetch failed; the error is replayed on every later call.
    Failed(MappingError),
}

struct Slot {
    uri: String,
    target: MappedTypeId,
    state: Mutex<RefState>,
    settled: Condvar,
}

/// Reference to a remote resource that is fetched only on an explicit
/// [`LazyRef::resolve`] call.
#[derive(Clone)]
pub struct LazyRef(Arc<Slot>);

impl LazyRef {
    /// Creates an unresolved reference.
    pub fn new(uri: impl Into<String>, target: MappedTypeId) -> Self {
        LazyRef(Arc::new(Slot {
            uri: uri.into(),
            target,
            state: Mutex::new(RefState::Unresolved),
            settled: Condvar::new(),
        }))
    }

    /// Creates a reference whose target is already known.
    pub fn resolved(uri: impl Into<String>, target: MappedTypeId, value: Value) -> Self {
        let reference = Self::new(uri, target);
        *reference.0.state.lock() = RefState::Resolved(value);
        reference
    }

    /// URI of the referenced resource.
    pub fn uri(&self) -> &str {
        &self.0.uri
    }

    /// Statically expected type of the target.
    pub fn target_type(&self) -> MappedTypeId {
        self.0.target
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> RefState {
        self.0.state.lock().clone()
    }

    /// Returns `true` once the target has been loaded.
    pub fn is_resolved(&self) -> bool {
        matches!(*self.0.state.lock(), RefState::Resolved(_))
    }

    /// Loads the target through `loader` on first call and returns the cached
    /// outcome afterwards.
    ///
    /// The state lock is released while the loader runs. Other threads wait for the
    /// in-flight fetch; a re-entrant call from the fetching thread fails with
    /// [`MappingError::NotSupported`].
    pub fn resolve(&self, loader: &dyn ResourceLoader) -> Result<Value> {
        let me = thread::current().id();
        {
            let mut state = self.0.state.lock();
            loop {
                match &*state {
                    RefState::Resolved(value) => return Ok(value.clone()),
                    RefState::Failed(err) => return Err(err.clone()),
                    RefState::Resolving(owner) if *owner == me => {
                        return Err(MappingError::not_supported(format!(
                            "re-entrant resolution of '{}'",
                            self.0.uri
                        )))
                    }
                    RefState::Resolving(_) => self.0.settled.wait(&mut state),
                    RefState::Unresolved => {
                        *state = RefState::Resolving(me);
                        break;
                    }
                }
            }
        }

        debug!(uri = %self.0.uri, target = self.0.target.0, "model.lazy_ref.resolving");
        let outcome = loader.load(&self.0.uri, self.0.target);
        let mut state = self.0.state.lock();
        *state = match &outcome {
            Ok(value) => RefState::Resolved(value.clone()),
            Err(err) => {
                warn!(uri = %self.0.uri, error = %err, "model.lazy_ref.failed");
                RefState::Failed(err.clone())
            }
        };
        self.0.settled.notify_all();
        outcome
    }
}

impl PartialEq for LazyRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.uri == other.0.uri && self.0.target == other.0.target
    }
}

impl fmt::Debug for LazyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRef")
            .field("uri", &self.0.uri)
            .field("target", &self.0.target)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
