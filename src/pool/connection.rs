//! Pooled Connection
//!
//! A connection lent by a pool. The value is move-only, so it is held by the
//! pool or by exactly one caller. Give it back with `ConnectionPool::release`
//! or `ConnectionPool::destroy`; dropping it instead closes the link and
//! frees its slot.

use std::fmt;
use std::sync::Weak;

use chrono::{DateTime, Utc};

use super::pool::PoolInner;
use crate::backend::{Backend, BackendError, Reply};
use crate::error::Result;

/// Connection as it sits in the idle set.
pub(crate) struct IdleConnection {
    pub(crate) id: u64,
    pub(crate) database: u32,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) backend: Box<dyn Backend>,
}

// == Connection ==
/// Exclusive handle to one backend link.
pub struct Connection {
    id: u64,
    pool_id: u64,
    database: u32,
    created_at: DateTime<Utc>,
    backend: Option<Box<dyn Backend>>,
    pool: Weak<PoolInner>,
}

impl Connection {
    pub(crate) fn lend(idle: IdleConnection, pool_id: u64, pool: Weak<PoolInner>) -> Self {
        Self {
            id: idle.id,
            pool_id,
            database: idle.database,
            created_at: idle.created_at,
            backend: Some(idle.backend),
            pool,
        }
    }

    /// Takes the link back out; the handle is inert afterwards.
    pub(crate) fn take_idle(&mut self) -> Option<IdleConnection> {
        self.backend.take().map(|backend| IdleConnection {
            id: self.id,
            database: self.database,
            created_at: self.created_at,
            backend,
        })
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.pool_id
    }

    /// Pool-unique connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Logical database the link currently targets.
    pub fn database(&self) -> u32 {
        self.database
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn backend(&mut self) -> Result<&mut Box<dyn Backend>> {
        self.backend.as_mut().ok_or(BackendError::Closed.into())
    }

    /// Executes a raw command on this link.
    pub async fn execute(&mut self, command: &str, args: &[String]) -> Result<Reply> {
        Ok(self.backend()?.execute(command, args).await?)
    }

    /// Switches this link to another logical database.
    pub async fn select_database(&mut self, db: u32) -> Result<()> {
        self.backend()?.select_database(db).await?;
        self.database = db;
        Ok(())
    }

    /// Loads a script, returning its id.
    pub async fn load_script(&mut self, source: &str) -> Result<String> {
        Ok(self.backend()?.load_script(source).await?)
    }

    /// Evaluates a loaded script by id.
    pub async fn eval_script(
        &mut self,
        script_id: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<Reply> {
        Ok(self.backend()?.eval_script(script_id, keys, args).await?)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.backend.take().is_some() {
            if let Some(pool) = self.pool.upgrade() {
                pool.forget(self.id);
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("pool_id", &self.pool_id)
            .field("database", &self.database)
            .field("created_at", &self.created_at)
            .field("open", &self.backend.is_some())
            .finish()
    }
}
