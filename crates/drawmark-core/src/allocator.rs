//! Reference number allocation
//!
//! Each file owns one counter row. Allocation is an optimistic transaction:
//! read the current value, compute `next = current + 1`, and write it back
//! only if the row still holds the value that was read. A conflict (the CAS
//! matched no row, or SQLite reports the write lock or read snapshot as
//! busy) rolls the transaction back and retries after a short backoff.
//!
//! `allocate_with` runs the caller's record write inside the same
//! transaction, so a number is only consumed together with the record that
//! carries it, and exhaustion never leaves a partial record behind.

use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::debug;

use crate::identity::FileId;
use crate::storage::error::{StoreError, StoreResult};

/// Default number of attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 64;

/// Backoff grows linearly per attempt up to this cap
const MAX_BACKOFF: Duration = Duration::from_millis(25);

/// Outcome of a single optimistic attempt
enum Attempt {
    Committed(i64),
    Conflict,
}

/// Per-file reference number allocator
#[derive(Debug, Clone)]
pub struct RefAllocator {
    file_id: FileId,
    max_attempts: u32,
}

impl RefAllocator {
    pub fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Allocate the next reference number for this file
    pub fn allocate_next(&self, conn: &mut Connection) -> StoreResult<i64> {
        self.allocate_with(conn, |_, _| Ok(()))
    }

    /// Allocate the next reference number and run `write` in the same transaction
    ///
    /// `write` may run more than once if earlier attempts conflict; only the
    /// committed attempt's effects persist.
    pub fn allocate_with<F>(&self, conn: &mut Connection, mut write: F) -> StoreResult<i64>
    where
        F: FnMut(&Transaction<'_>, i64) -> StoreResult<()>,
    {
        for attempt in 1..=self.max_attempts {
            match self.try_allocate(conn, &mut write) {
                Ok(Attempt::Committed(value)) => {
                    if attempt > 1 {
                        debug!(
                            "Allocated ref {} for {} after {} attempts",
                            value, self.file_id, attempt
                        );
                    }
                    return Ok(value);
                }
                Ok(Attempt::Conflict) => {}
                Err(e) if e.is_busy() => {}
                Err(e) => return Err(e),
            }

            debug!("Ref allocation conflict for {} (attempt {})", self.file_id, attempt);
            std::thread::sleep(backoff(attempt));
        }

        Err(StoreError::AllocatorExhausted {
            file_id: self.file_id.clone(),
            attempts: self.max_attempts,
        })
    }

    fn try_allocate<F>(&self, conn: &mut Connection, write: &mut F) -> StoreResult<Attempt>
    where
        F: FnMut(&Transaction<'_>, i64) -> StoreResult<()>,
    {
        // Deferred: the read takes no write lock, the conditional write detects interleaving
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT value FROM counters WHERE file_id = ?1",
                params![self.file_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let next = current.unwrap_or(0) + 1;

        let changed = match current {
            Some(value) => tx.execute(
                "UPDATE counters SET value = ?1 WHERE file_id = ?2 AND value = ?3",
                params![next, self.file_id.as_str(), value],
            )?,
            None => tx.execute(
                "INSERT OR IGNORE INTO counters (file_id, value) VALUES (?1, ?2)",
                params![self.file_id.as_str(), next],
            )?,
        };

        if changed == 0 {
            return Ok(Attempt::Conflict);
        }

        write(&tx, next)?;
        tx.commit()?;
        Ok(Attempt::Committed(next))
    }

    /// Current counter value without allocating (0 if nothing was ever allocated)
    pub fn current(&self, conn: &Connection) -> StoreResult<i64> {
        let value = conn
            .query_row(
                "SELECT value FROM counters WHERE file_id = ?1",
                params![self.file_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0))
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(u64::from(attempt) * 2).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use std::sync::{Arc, Barrier};
    use tempfile::TempDir;

    fn setup(temp_dir: &TempDir) -> (Database, FileId) {
        let db = Database::open_path(temp_dir.path().join("drawmark.db")).unwrap();
        let file_id = FileId::from_raw("file-1");
        db.connect()
            .unwrap()
            .execute(
                "INSERT INTO files (id, file_url, file_name, created_at, updated_at) VALUES (?1, 'u', 'n', 0, 0)",
                params![file_id.as_str()],
            )
            .unwrap();
        (db, file_id)
    }

    #[test]
    fn test_sequential_allocation() {
        let temp_dir = TempDir::new().unwrap();
        let (db, file_id) = setup(&temp_dir);
        let mut conn = db.connect().unwrap();
        let allocator = RefAllocator::new(file_id);

        assert_eq!(allocator.current(&conn).unwrap(), 0);
        assert_eq!(allocator.allocate_next(&mut conn).unwrap(), 1);
        assert_eq!(allocator.allocate_next(&mut conn).unwrap(), 2);
        assert_eq!(allocator.allocate_next(&mut conn).unwrap(), 3);
        assert_eq!(allocator.current(&conn).unwrap(), 3);
    }

    #[test]
    fn test_counters_are_per_file() {
        let temp_dir = TempDir::new().unwrap();
        let (db, file_id) = setup(&temp_dir);
        let other = FileId::from_raw("file-2");
        let mut conn = db.connect().unwrap();
        conn.execute(
            "INSERT INTO files (id, file_url, file_name, created_at, updated_at) VALUES (?1, 'u2', 'n2', 0, 0)",
            params![other.as_str()],
        )
        .unwrap();

        assert_eq!(RefAllocator::new(file_id.clone()).allocate_next(&mut conn).unwrap(), 1);
        assert_eq!(RefAllocator::new(file_id).allocate_next(&mut conn).unwrap(), 2);
        assert_eq!(RefAllocator::new(other).allocate_next(&mut conn).unwrap(), 1);
    }

    #[test]
    fn test_failed_write_rolls_back_allocation() {
        let temp_dir = TempDir::new().unwrap();
        let (db, file_id) = setup(&temp_dir);
        let mut conn = db.connect().unwrap();
        let allocator = RefAllocator::new(file_id);

        let result = allocator.allocate_with(&mut conn, |_, _| {
            Err(StoreError::InvalidAnnotation("rejected".to_string()))
        });
        assert!(matches!(result, Err(StoreError::InvalidAnnotation(_))));
        assert_eq!(allocator.current(&conn).unwrap(), 0);
        assert_eq!(allocator.allocate_next(&mut conn).unwrap(), 1);
    }

    #[test]
    fn test_persistent_conflict_exhausts() {
        let temp_dir = TempDir::new().unwrap();
        let (db, file_id) = setup(&temp_dir);
        let mut conn = db.connect().unwrap();
        let allocator = RefAllocator::new(file_id).with_max_attempts(3);

        let mut calls = 0;
        let busy = || {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                None,
            ))
        };
        let result = allocator.allocate_with(&mut conn, |_, _| {
            calls += 1;
            Err(busy())
        });

        assert!(matches!(result, Err(StoreError::AllocatorExhausted { attempts: 3, .. })));
        assert_eq!(calls, 3);
        assert_eq!(allocator.current(&conn).unwrap(), 0);
    }

    #[test]
    fn test_concurrent_allocation_is_contiguous() {
        let temp_dir = TempDir::new().unwrap();
        let (db, file_id) = setup(&temp_dir);

        // Prior maximum of 5
        {
            let mut conn = db.connect().unwrap();
            let allocator = RefAllocator::new(file_id.clone());
            for _ in 0..5 {
                allocator.allocate_next(&mut conn).unwrap();
            }
        }

        const WORKERS: usize = 8;
        let barrier = Arc::new(Barrier::new(WORKERS));
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let db = db.clone();
                let file_id = file_id.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let mut conn = db.connect().unwrap();
                    let allocator = RefAllocator::new(file_id).with_max_attempts(500);
                    barrier.wait();
                    allocator.allocate_next(&mut conn).unwrap()
                })
            })
            .collect();

        let mut values: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        values.sort_unstable();
        assert_eq!(values, (6..=13).collect::<Vec<i64>>());
    }
}
