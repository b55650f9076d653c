//! Transaction Log Module
//!
//! Records the previous state of every key mutated while a transaction is
//! open so the engine can undo those mutations. Writes are applied eagerly;
//! the log never defers them.

use parking_lot::Mutex;

use crate::cache::CacheEntry;
use crate::error::{CacheError, Result};

/// A logged mutation together with the entry it replaced.
#[derive(Debug, Clone, PartialEq)]
pub enum TxOp<V> {
    Set {
        key: String,
        previous: Option<CacheEntry<V>>,
    },
    Delete {
        key: String,
        previous: Option<CacheEntry<V>>,
    },
}

impl<V> TxOp<V> {
    pub fn key(&self) -> &str {
        match self {
            TxOp::Set { key, .. } | TxOp::Delete { key, .. } => key,
        }
    }
}

// == Transaction Log ==
/// `idle -> open -> idle` state machine. `None` means idle.
#[derive(Debug)]
pub struct TransactionLog<V> {
    ops: Mutex<Option<Vec<TxOp<V>>>>,
}

impl<V> Default for TransactionLog<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TransactionLog<V> {
    pub fn new() -> Self {
        Self {
            ops: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        self.ops.lock().is_some()
    }

    /// Opens a transaction.
    pub fn begin(&self) -> Result<()> {
        let mut ops = self.ops.lock();
        if ops.is_some() {
            return Err(CacheError::TransactionAlreadyOpen);
        }
        *ops = Some(Vec::new());
        Ok(())
    }

    /// Appends `op` if a transaction is open; ignored otherwise.
    pub fn record(&self, op: TxOp<V>) {
        if let Some(ops) = self.ops.lock().as_mut() {
            ops.push(op);
        }
    }

    /// Number of logged operations, 0 when idle.
    pub fn len(&self) -> usize {
        self.ops.lock().as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the transaction and discards the log.
    pub fn commit(&self) -> Result<usize> {
        self.take().map(|ops| ops.len())
    }

    /// Closes the transaction and hands back the log in recording order.
    pub fn take(&self) -> Result<Vec<TxOp<V>>> {
        self.ops.lock().take().ok_or(CacheError::NoActiveTransaction)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_twice_fails() {
        let log: TransactionLog<u32> = TransactionLog::new();
        log.begin().unwrap();
        assert!(matches!(log.begin(), Err(CacheError::TransactionAlreadyOpen)));
    }

    #[test]
    fn test_record_only_while_open() {
        let log = TransactionLog::new();
        log.record(TxOp::Delete {
            key: "ignored".to_string(),
            previous: None::<CacheEntry<u32>>,
        });
        assert!(log.is_empty());

        log.begin().unwrap();
        log.record(TxOp::Set {
            key: "a".to_string(),
            previous: None,
        });
        log.record(TxOp::Delete {
            key: "b".to_string(),
            previous: Some(CacheEntry::new(7, 0, 60)),
        });
        assert_eq!(log.len(), 2);

        let ops = log.take().unwrap();
        assert_eq!(ops[0].key(), "a");
        assert_eq!(ops[1].key(), "b");
        assert!(!log.is_open());
    }

    #[test]
    fn test_commit_discards_log() {
        let log: TransactionLog<u32> = TransactionLog::new();
        log.begin().unwrap();
        log.record(TxOp::Set {
            key: "a".to_string(),
            previous: None,
        });

        assert_eq!(log.commit().unwrap(), 1);
        assert!(!log.is_open());
        assert!(matches!(log.commit(), Err(CacheError::NoActiveTransaction)));
    }
}
