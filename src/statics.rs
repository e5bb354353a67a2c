//! Run-once bookkeeping for type initializers (`.cctor`).
//!
//! Each class carries a [`TypeInitState`]. The first thread to claim it runs the initializer;
//! other threads block until it finishes, and a re-entrant request from the initializing thread
//! proceeds as if the type were ready. A failure is sticky: every later request observes the
//! original error.
use crate::error::RuntimeError;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

pub const INIT_STATE_UNINITIALIZED: u8 = 0;
pub const INIT_STATE_INITIALIZING: u8 = 1;
pub const INIT_STATE_INITIALIZED: u8 = 2;
pub const INIT_STATE_FAILED: u8 = 3;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|t| *t)
}

#[derive(Debug, PartialEq)]
pub enum StaticInitResult {
    /// This thread must execute the static constructor.
    Execute,
    /// The type is already fully initialized.
    Initialized,
    /// This is a recursive call on the same thread; proceed as if initialized.
    Recursive,
    /// Type initialization failed previously.
    Failed(RuntimeError),
    /// Another thread is currently initializing this type.
    Waiting,
}

pub struct TypeInitState {
    state: AtomicU8,
    initializing_thread: AtomicU64,
    failure: Mutex<Option<RuntimeError>>,
    init_mutex: Mutex<()>,
    init_cond: Condvar,
}

impl Default for TypeInitState {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(INIT_STATE_UNINITIALIZED),
            initializing_thread: AtomicU64::new(0),
            failure: Mutex::new(None),
            init_mutex: Mutex::new(()),
            init_cond: Condvar::new(),
        }
    }
}

impl std::fmt::Debug for TypeInitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state() {
            INIT_STATE_INITIALIZED => write!(f, "initialized"),
            INIT_STATE_INITIALIZING => write!(f, "initializing"),
            INIT_STATE_FAILED => write!(f, "failed"),
            _ => write!(f, "uninitialized"),
        }
    }
}

impl TypeInitState {
    pub fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    /// Decide what the calling thread should do about this type's initializer.
    pub fn begin(&self) -> StaticInitResult {
        let me = current_thread_token();
        match self.state.compare_exchange(
            INIT_STATE_UNINITIALIZED,
            INIT_STATE_INITIALIZING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.initializing_thread.store(me, Ordering::Release);
                StaticInitResult::Execute
            }
            Err(INIT_STATE_INITIALIZED) => StaticInitResult::Initialized,
            Err(INIT_STATE_INITIALIZING) => {
                if self.initializing_thread.load(Ordering::Acquire) == me {
                    StaticInitResult::Recursive
                } else {
                    StaticInitResult::Waiting
                }
            }
            Err(_) => StaticInitResult::Failed(
                self.failure
                    .lock()
                    .clone()
                    .unwrap_or_else(|| RuntimeError::Invocation("type initializer failed".into())),
            ),
        }
    }

    /// Mark the type fully initialized after its .cctor completes.
    pub fn mark_initialized(&self) {
        self.finish(INIT_STATE_INITIALIZED);
    }

    pub fn mark_failed(&self, error: RuntimeError) {
        *self.failure.lock() = Some(error);
        self.finish(INIT_STATE_FAILED);
    }

    fn finish(&self, state: u8) {
        self.initializing_thread.store(0, Ordering::Release);
        let _lock = self.init_mutex.lock();
        self.state.store(state, Ordering::Release);
        self.init_cond.notify_all();
    }

    /// Block until another thread's initialization of this type completes or fails.
    pub fn wait(&self) {
        let mut lock = self.init_mutex.lock();
        while self.state() == INIT_STATE_INITIALIZING {
            self.init_cond.wait(&mut lock);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{mpsc, Arc},
        thread,
    };

    #[test]
    fn first_caller_executes_and_later_callers_see_initialized() {
        let state = TypeInitState::default();
        assert_eq!(state.begin(), StaticInitResult::Execute);
        assert_eq!(state.begin(), StaticInitResult::Recursive);
        state.mark_initialized();
        assert_eq!(state.begin(), StaticInitResult::Initialized);
    }

    #[test]
    fn other_threads_wait_for_the_initializer() {
        let state = Arc::new(TypeInitState::default());
        assert_eq!(state.begin(), StaticInitResult::Execute);

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let state = state.clone();
            thread::spawn(move || {
                tx.send(state.begin()).unwrap();
                state.wait();
                state.begin()
            })
        };

        assert_eq!(rx.recv().unwrap(), StaticInitResult::Waiting);
        state.mark_initialized();
        assert_eq!(waiter.join().unwrap(), StaticInitResult::Initialized);
    }

    #[test]
    fn failure_is_sticky() {
        let state = TypeInitState::default();
        assert_eq!(state.begin(), StaticInitResult::Execute);
        state.mark_failed(RuntimeError::Invocation("boom".into()));
        for _ in 0..2 {
            assert_eq!(
                state.begin(),
                StaticInitResult::Failed(RuntimeError::Invocation("boom".into()))
            );
        }
    }
}
