use crate::indicator::Indicator;
use crate::machine::{Effect, LoadingMachine, TimerId, Timings};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Drives a [`LoadingMachine`] with tokio timers.
///
/// Cloning is cheap; every clone controls the same indicator.
#[derive(Clone)]
pub struct LoadingCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    indicator: Arc<dyn Indicator>,
}

struct State {
    machine: LoadingMachine,
    timers: HashMap<TimerId, JoinHandle<()>>,
}

impl LoadingCoordinator {
    pub fn new(timings: Timings, indicator: Arc<dyn Indicator>) -> Self {
        let state = State { machine: LoadingMachine::new(timings), timers: HashMap::new() };
        Self { inner: Arc::new(Inner { state: Mutex::new(state), indicator }) }
    }

    /// Mark an operation as outstanding until the returned guard is dropped.
    #[must_use = "the operation ends as soon as the guard is dropped"]
    pub fn enter(&self) -> LoadingGuard {
        let effects = self.inner.lock().machine.enter();
        Inner::apply(&self.inner, effects);
        LoadingGuard { coordinator: self.clone() }
    }

    fn exit(&self) {
        let effects = self.inner.lock().machine.exit();
        Inner::apply(&self.inner, effects);
    }

    /// Number of operations currently holding a guard.
    pub fn active(&self) -> usize {
        self.inner.lock().machine.active()
    }

    pub fn is_visible(&self) -> bool {
        self.inner.lock().machine.is_shown()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic inside the indicator must not wedge every future request.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply(this: &Arc<Self>, effects: Vec<Effect>) {
        let mut renders = Vec::new();
        {
            let mut state = this.lock();
            for effect in effects {
                match effect {
                    Effect::Arm { id, kind, after } => {
                        let Ok(runtime) = Handle::try_current() else {
                            tracing::warn!(?kind, "no tokio runtime; loading timer not armed");
                            continue;
                        };
                        let weak = Arc::downgrade(this);
                        let task = runtime.spawn(async move {
                            tokio::time::sleep(after).await;
                            Self::fire(weak, id);
                        });
                        state.timers.insert(id, task);
                    },
                    Effect::Cancel(id) => {
                        if let Some(task) = state.timers.remove(&id) {
                            task.abort();
                        }
                    },
                    Effect::Show => renders.push(true),
                    Effect::Hide => renders.push(false),
                }
            }
        }
        // Render outside the lock so indicators may query the coordinator.
        for visible in renders {
            tracing::trace!(visible, "loading indicator");
            this.indicator.set_visible(visible);
        }
    }

    fn fire(this: Weak<Self>, id: TimerId) {
        let Some(this) = this.upgrade() else { return };
        let effects = {
            let mut state = this.lock();
            state.timers.remove(&id);
            state.machine.fire(id, Instant::now().into_std())
        };
        Self::apply(&this, effects);
    }
}

/// Ends its operation when dropped, on every exit path.
pub struct LoadingGuard {
    coordinator: LoadingCoordinator,
}
impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.coordinator.exit();
    }
}
