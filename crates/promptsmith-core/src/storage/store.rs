use crate::errors::{OptimizeError, Result};
use crate::storage::repos::{
    EvaluationRepository, PromptRepository, RunRepository, StageResultRepository,
    TestCaseRepository, TrackRepository, WeaknessRepository,
};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle on the SQLite database. Cloning is cheap.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| OptimizeError::LockPoisoned)
    }

    /// Runs `f` inside one transaction; rolled back unless `f` succeeds.
    pub(crate) fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn runs(&self) -> RunRepository<'_> {
        RunRepository::new(self)
    }

    pub fn prompts(&self) -> PromptRepository<'_> {
        PromptRepository::new(self)
    }

    pub fn test_cases(&self) -> TestCaseRepository<'_> {
        TestCaseRepository::new(self)
    }

    pub fn evaluations(&self) -> EvaluationRepository<'_> {
        EvaluationRepository::new(self)
    }

    pub fn stage_results(&self) -> StageResultRepository<'_> {
        StageResultRepository::new(self)
    }

    pub fn weaknesses(&self) -> WeaknessRepository<'_> {
        WeaknessRepository::new(self)
    }

    pub fn tracks(&self) -> TrackRepository<'_> {
        TrackRepository::new(self)
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
