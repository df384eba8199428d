//! Connection pool: one writer connection (serialized behind an async
//! mutex) and N reader connections (semaphore-gated, each opened with
//! `PRAGMA query_only = ON`). Adapted from the teacher's `ConfigDb`, which
//! held a single `Mutex<Connection>`; here readers and the writer are split
//! so concurrent reads never block behind a write.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::{Mutex, Semaphore};

use crate::error::PiwError;

use super::migrations;

struct ReaderSlot {
    conn: Mutex<Connection>,
}

pub struct Pool {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Vec<ReaderSlot>,
    reader_gate: Semaphore,
}

fn open_writer(path: &Path) -> Result<Connection, PiwError> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

fn open_reader(path: &Path) -> Result<Connection, PiwError> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA query_only = ON;")?;
    Ok(conn)
}

/// Default reader count: half the available CPUs, minimum 1.
pub fn default_reader_count() -> usize {
    std::thread::available_parallelism().map(|n| (n.get() / 2).max(1)).unwrap_or(1)
}

impl Pool {
    /// Open (creating if absent) the store at `path`, run migrations on the
    /// writer connection, check integrity, and spin up `reader_count` reader
    /// connections.
    pub fn open(path: impl AsRef<Path>, reader_count: usize) -> Result<Arc<Self>, PiwError> {
        let path = path.as_ref().to_path_buf();
        let mut writer_conn = open_writer(&path)?;
        migrations::check_integrity(&writer_conn)?;
        migrations::run(&mut writer_conn)?;

        let reader_count = reader_count.max(1);
        let mut readers = Vec::with_capacity(reader_count);
        for _ in 0..reader_count {
            readers.push(ReaderSlot { conn: Mutex::new(open_reader(&path)?) });
        }

        Ok(Arc::new(Self {
            path,
            writer: Mutex::new(writer_conn),
            reader_gate: Semaphore::new(reader_count),
            readers,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Exclusive access to the writer connection.
    pub async fn get_writer(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.writer.lock().await
    }

    /// Access to one of the reader connections, round-robin by permit
    /// acquisition order; never blocks on the writer.
    pub async fn get_reader(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        let _permit = self.reader_gate.acquire().await.expect("semaphore not closed");
        for slot in &self.readers {
            if let Ok(guard) = slot.conn.try_lock() {
                return guard;
            }
        }
        // All slots momentarily contended (shouldn't happen given the gate
        // matches slot count): fall back to awaiting the first slot.
        self.readers[0].conn.lock().await
    }

    /// Reopen the pool after a file has been replaced out from under it
    /// (used by backup/restore).
    pub fn reopen(self: &Arc<Self>) -> Result<Arc<Self>, PiwError> {
        Self::open(&self.path, self.readers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_and_migrates_fresh_file() {
        let dir = tempfile_dir();
        let path = dir.join("store.sqlite3");
        let pool = Pool::open(&path, 2).unwrap();
        let reader = pool.get_reader().await;
        let count: i64 = reader
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert!(count > 0);
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("piwardrive-pool-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
