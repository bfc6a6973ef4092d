//! Shared state for the exam module.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use exam_types::ExamId;

use crate::config::ProtocolConfig;
use crate::store::{ExamStore, MemoryStore};

/// Lock table keyed by exam id.
///
/// Holding an exam's lock serializes every load-modify-store sequence on that
/// exam. Different exams never contend. Entries are never removed, so a
/// recreated exam id maps to the same lock as its predecessor.
#[derive(Debug, Default)]
pub struct ExamLocks {
    locks: Mutex<HashMap<ExamId, Arc<Mutex<()>>>>,
}

impl ExamLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the lock for an exam.
    pub fn for_exam(&self, exam_id: &ExamId) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(exam_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exam module state: a store, its per-exam locks and the protocol config.
///
/// Handlers take `&ModuleState`, so one instance can be shared across threads.
#[derive(Debug, Default)]
pub struct ModuleState<S: ExamStore = MemoryStore> {
    pub store: S,
    pub locks: ExamLocks,
    pub config: ProtocolConfig,
}

impl ModuleState<MemoryStore> {
    /// Create state over an empty in-memory store with default config.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: ExamStore> ModuleState<S> {
    pub fn with_store(store: S, config: ProtocolConfig) -> Self {
        Self {
            store,
            locks: ExamLocks::new(),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_exam_same_lock() {
        let locks = ExamLocks::new();
        let a = locks.for_exam(&ExamId::from("e1"));
        let b = locks.for_exam(&ExamId::from("e1"));
        let c = locks.for_exam(&ExamId::from("e2"));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_locks_are_independent() {
        let locks = ExamLocks::new();
        let first = locks.for_exam(&ExamId::from("e1"));
        let _held = first.lock();

        let other = locks.for_exam(&ExamId::from("e2"));
        assert!(other.try_lock().is_some());
        assert!(first.try_lock().is_none());
    }
}
