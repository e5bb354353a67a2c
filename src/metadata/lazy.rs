//! Per-class member collections that are materialized on first use.
//!
//! A collection is either [`LazyState::Uninitialized`] or [`LazyState::Initialized`]; there is no
//! partially-built state visible to readers. Initialization runs under the write lock, so
//! concurrent first callers block until exactly one of them has built the collection. If the
//! builder fails nothing is published and a later call starts over.
use crate::error::RuntimeResult;
use parking_lot::RwLock;
use std::{fmt, sync::Arc};

pub enum LazyState<T> {
    Uninitialized,
    Initialized(Arc<[T]>),
}

pub struct LazyMembers<T> {
    state: RwLock<LazyState<T>>,
}

impl<T> Default for LazyMembers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LazyMembers<T> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LazyState::Uninitialized),
        }
    }

    /// The published collection, if initialization has completed.
    pub fn get(&self) -> Option<Arc<[T]>> {
        match &*self.state.read() {
            LazyState::Initialized(items) => Some(items.clone()),
            LazyState::Uninitialized => None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(&*self.state.read(), LazyState::Initialized(_))
    }

    /// Element count; zero until initialized.
    pub fn len(&self) -> usize {
        match &*self.state.read() {
            LazyState::Initialized(items) => items.len(),
            LazyState::Uninitialized => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_or_try_init<F>(&self, init: F) -> RuntimeResult<Arc<[T]>>
    where
        F: FnOnce() -> RuntimeResult<Vec<T>>,
    {
        if let Some(items) = self.get() {
            return Ok(items);
        }

        let mut state = self.state.write();
        if let LazyState::Initialized(items) = &*state {
            return Ok(items.clone());
        }

        let items: Arc<[T]> = init()?.into();
        *state = LazyState::Initialized(items.clone());
        Ok(items)
    }
}

impl<T> fmt::Debug for LazyMembers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.read() {
            LazyState::Initialized(items) => write!(f, "Initialized({} items)", items.len()),
            LazyState::Uninitialized => write!(f, "Uninitialized"),
        }
    }
}
