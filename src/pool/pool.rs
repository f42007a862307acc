//! Connection Pool
//!
//! Lends backend connections to callers and keeps the open set within
//! `[min, max]`.
//!
//! Bookkeeping lives behind one mutex that is never held across an await:
//! - `idle`: connections ready to lend
//! - `leased`: ids of connections held by callers
//! - `creating`: connections being opened by background tasks
//! - `waiters`: queued acquires keyed by `(priority, arrival)`
//!
//! A connection that comes back (released or freshly created) goes straight
//! to the first open waiter, or to the idle set when nobody waits.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, info, warn};

use super::connection::{Connection, IdleConnection};
use super::retry::RetryPolicy;
use super::status::PoolStatus;
use crate::backend::{Connector, Reply};
use crate::config::PoolConfig;
use crate::error::{CacheError, Result};
use crate::logger::{self, Logger};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

type Delivery = oneshot::Sender<Result<Connection>>;

enum Checkout {
    Ready(IdleConnection),
    Queued(oneshot::Receiver<Result<Connection>>, (u32, u64)),
}

// == Pool State ==
#[derive(Default)]
struct PoolState {
    idle: VecDeque<IdleConnection>,
    leased: HashSet<u64>,
    creating: usize,
    waiters: BTreeMap<(u32, u64), Delivery>,
    next_waiter: u64,
    draining: bool,
}

impl PoolState {
    fn size(&self) -> usize {
        self.idle.len() + self.leased.len() + self.creating
    }

    /// Drops waiters whose acquire was abandoned.
    fn prune_waiters(&mut self) {
        self.waiters.retain(|_, delivery| !delivery.is_closed());
    }
}

// == Pool Inner ==
pub(crate) struct PoolInner {
    id: u64,
    name: String,
    config: PoolConfig,
    retry: RetryPolicy,
    connector: Arc<dyn Connector>,
    logger: Arc<dyn Logger>,
    state: Mutex<PoolState>,
    next_connection: AtomicU64,
    changed: Notify,
}

impl PoolInner {
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn max(&self) -> usize {
        self.config.sizing.max
    }

    fn clamp_priority(&self, priority: u32) -> u32 {
        priority.min(self.config.sizing.priority_range - 1)
    }

    /// Hands `idle` to the first open waiter, or parks it in the idle set.
    fn dispatch(self: &Arc<Self>, mut state: MutexGuard<'_, PoolState>, mut idle: IdleConnection) {
        while let Some((_, delivery)) = state.waiters.pop_first() {
            if delivery.is_closed() {
                continue;
            }
            state.leased.insert(idle.id);
            let conn = Connection::lend(idle, self.id, Arc::downgrade(self));
            match delivery.send(Ok(conn)) {
                Ok(()) => {
                    drop(state);
                    self.changed.notify_waiters();
                    return;
                }
                Err(returned) => {
                    // Receiver went away between the check and the send.
                    let Some(back) = returned.ok().and_then(|mut conn| conn.take_idle()) else {
                        return;
                    };
                    state.leased.remove(&back.id);
                    idle = back;
                }
            }
        }
        state.idle.push_back(idle);
        drop(state);
        self.changed.notify_waiters();
    }

    /// Dispatches a returned connection, or hands it back for teardown when
    /// the pool is draining and nobody waits.
    ///
    /// `created` marks a connection that just finished opening.
    fn settle(self: &Arc<Self>, idle: IdleConnection, created: bool) -> Option<IdleConnection> {
        let mut state = self.state();
        if created {
            state.creating -= 1;
        } else {
            state.leased.remove(&idle.id);
        }
        state.prune_waiters();
        if state.draining && state.waiters.is_empty() {
            return Some(idle);
        }
        self.dispatch(state, idle);
        None
    }

    /// Starts creations for queued waiters and, unless draining, for the
    /// `min` floor.
    fn replenish(self: &Arc<Self>) {
        let spawns = {
            let mut state = self.state();
            state.prune_waiters();
            let floor = if state.draining { 0 } else { self.config.sizing.min };
            let mut spawns = 0;
            while state.size() < self.max()
                && (state.size() < floor || state.waiters.len() > state.creating)
            {
                state.creating += 1;
                spawns += 1;
            }
            spawns
        };
        for _ in 0..spawns {
            self.spawn_create();
        }
    }

    /// Runs one creation in the background. The caller already counted it
    /// in `creating`.
    fn spawn_create(self: &Arc<Self>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(self);
                handle.spawn(async move { inner.create_connection().await });
            }
            Err(_) => {
                self.state().creating -= 1;
                warn!(pool = %self.name, "No async runtime available, skipping connection creation");
            }
        }
    }

    async fn create_connection(self: Arc<Self>) {
        let target = self.connector.describe();
        debug!(pool = %self.name, target = %target, "Creating connection");

        let outcome = self.retry.run(|_| self.connector.connect()).await;

        match outcome {
            Ok(backend) => {
                let idle = IdleConnection {
                    id: self.next_connection.fetch_add(1, Ordering::Relaxed),
                    database: self.connector.default_database(),
                    created_at: Utc::now(),
                    backend,
                };
                debug!(pool = %self.name, connection = idle.id, "Connection created");

                if let Some(idle) = self.settle(idle, true) {
                    self.teardown(idle).await;
                    self.changed.notify_waiters();
                }
            }
            Err(failure) => {
                let err = CacheError::ConnectionCreateFailed {
                    pool: self.name.clone(),
                    target,
                    attempts: failure.attempts,
                    reason: failure.last.to_string(),
                };
                error!(pool = %self.name, error = %err, "Errored while connecting");
                self.logger
                    .error(&format!("Errored while connecting: {}", err));

                {
                    let mut state = self.state();
                    state.creating -= 1;
                    let mut undelivered = Some(err);
                    while let Some(err) = undelivered.take() {
                        let Some((_, delivery)) = state.waiters.pop_first() else {
                            break;
                        };
                        if let Err(Err(err)) = delivery.send(Err(err)) {
                            undelivered = Some(err);
                        }
                    }
                }
                self.changed.notify_waiters();
                // Other waiters still deserve an attempt of their own.
                self.replenish_waiters();
            }
        }
    }

    /// Like `replenish`, without the `min` floor, so a dead backend does not
    /// spin on background creations nobody waits for.
    fn replenish_waiters(self: &Arc<Self>) {
        let spawns = {
            let mut state = self.state();
            state.prune_waiters();
            let mut spawns = 0;
            while state.size() < self.max() && state.waiters.len() > state.creating {
                state.creating += 1;
                spawns += 1;
            }
            spawns
        };
        for _ in 0..spawns {
            self.spawn_create();
        }
    }

    /// Best-effort close: failures are logged, never returned.
    async fn teardown(&self, mut idle: IdleConnection) {
        let limit = self.config.backend.connect_timeout();
        let outcome = match tokio::time::timeout(limit, idle.backend.close(true)).await {
            Ok(result) => result.map_err(|err| err.to_string()),
            Err(_) => Err(format!("close timed out after {:?}", limit)),
        };

        let (available, size) = {
            let state = self.state();
            (state.idle.len(), state.size())
        };
        match outcome {
            Ok(()) => {
                debug!(pool = %self.name, connection = idle.id, available, size, "Connection closed");
                self.logger.log(&format!(
                    "Client conn closed. Available count : {}. Pool size: {}",
                    available, size
                ));
            }
            Err(reason) => {
                warn!(pool = %self.name, connection = idle.id, reason = %reason, "Failed to destroy connection");
                self.logger
                    .error(&format!("Failed to destroy connection: {}", reason));
            }
        }
    }

    /// Called when a lent connection is dropped without being returned.
    pub(crate) fn forget(self: &Arc<Self>, id: u64) {
        let known = self.state().leased.remove(&id);
        if known {
            warn!(pool = %self.name, connection = id, "Connection dropped without release");
            self.changed.notify_waiters();
            self.replenish();
        }
    }
}

// == Connection Pool ==
/// Bounded pool of backend connections. Cloning shares the pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    // == Constructor ==
    /// Creates a pool that logs through `tracing` only.
    ///
    /// Must be called inside a Tokio runtime for the `min` connections to be
    /// opened in the background.
    pub fn new(config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_logger(config, connector, None)
    }

    /// Creates a pool reporting events to `logger` as well.
    pub fn with_logger(
        mut config: PoolConfig,
        connector: Arc<dyn Connector>,
        logger: Option<Arc<dyn Logger>>,
    ) -> Self {
        config.sizing = config.sizing.normalized();
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| super::random_name("pool"));
        let retry = config.retry.policy();

        debug!(
            pool = %name,
            target = %connector.describe(),
            min = config.sizing.min,
            max = config.sizing.max,
            "Creating pool"
        );

        let inner = Arc::new(PoolInner {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            name,
            config,
            retry,
            connector,
            logger: logger::shared(logger),
            state: Mutex::new(PoolState::default()),
            next_connection: AtomicU64::new(1),
            changed: Notify::new(),
        });
        inner.replenish();

        Self { inner }
    }

    // == Accessors ==
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Options the pool was built with, sizing normalized.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub(crate) fn logger(&self) -> &Arc<dyn Logger> {
        &self.inner.logger
    }

    // == Status ==
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state();
        PoolStatus {
            name: self.inner.name.clone(),
            size: state.size(),
            available: state.idle.len(),
            pending: state
                .waiters
                .values()
                .filter(|delivery| !delivery.is_closed())
                .count(),
        }
    }

    // == Acquire ==
    /// Borrows a connection.
    ///
    /// Returns an idle connection, opens a new one while below `max`, or
    /// queues until one is returned. Lower `priority` values are served
    /// first (default 0). With `db`, the connection is switched to that
    /// database before it is handed out.
    pub async fn acquire(&self, priority: Option<u32>, db: Option<u32>) -> Result<Connection> {
        let inner = &self.inner;
        let priority = inner.clamp_priority(priority.unwrap_or(0));

        let (mut receiver, key) = match self.checkout(priority)? {
            Checkout::Ready(idle) => {
                let conn = Connection::lend(idle, inner.id, Arc::downgrade(inner));
                return self.prepare(conn, db).await;
            }
            Checkout::Queued(receiver, key) => (receiver, key),
        };
        inner.replenish_waiters();

        let delivered = match inner.config.sizing.acquire_timeout() {
            None => receiver.await,
            Some(limit) => match tokio::time::timeout(limit, &mut receiver).await {
                Ok(delivered) => delivered,
                Err(_) => {
                    let removed = inner.state().waiters.remove(&key).is_some();
                    if removed {
                        inner.changed.notify_waiters();
                        return Err(self.acquire_timed_out(limit));
                    }
                    // A connection was delivered as the timer fired.
                    receiver.await
                }
            },
        };

        let conn = delivered.map_err(|_| CacheError::PoolDraining(inner.name.clone()))??;
        self.prepare(conn, db).await
    }

    fn checkout(&self, priority: u32) -> Result<Checkout> {
        let inner = &self.inner;
        let mut state = inner.state();
        if state.draining {
            return Err(CacheError::PoolDraining(inner.name.clone()));
        }
        if let Some(idle) = state.idle.pop_front() {
            state.leased.insert(idle.id);
            return Ok(Checkout::Ready(idle));
        }

        let (sender, receiver) = oneshot::channel();
        let key = (priority, state.next_waiter);
        state.next_waiter += 1;
        state.waiters.insert(key, sender);
        debug!(pool = %inner.name, priority, pending = state.waiters.len(), "Queued acquire");
        Ok(Checkout::Queued(receiver, key))
    }

    fn acquire_timed_out(&self, waited: Duration) -> CacheError {
        let err = CacheError::AcquireTimeout {
            pool: self.inner.name.clone(),
            waited,
        };
        warn!(pool = %self.inner.name, error = %err, "Couldn't acquire connection");
        self.inner
            .logger
            .error(&format!("Couldn't acquire connection: {}", err));
        err
    }

    async fn prepare(&self, mut conn: Connection, db: Option<u32>) -> Result<Connection> {
        let Some(db) = db else {
            return Ok(conn);
        };
        if conn.database() == db {
            return Ok(conn);
        }

        self.inner.logger.info(&format!("select DB: {}", db));
        match conn.select_database(db).await {
            Ok(()) => {
                debug!(pool = %self.inner.name, connection = conn.id(), db, "DB selected");
                Ok(conn)
            }
            Err(err) => {
                error!(pool = %self.inner.name, db, error = %err, "Failed to select DB");
                self.inner
                    .logger
                    .error(&format!("Failed to select DB {}: {}", db, err));
                self.destroy(conn).await?;
                Err(err)
            }
        }
    }

    // == Release ==
    /// Returns a connection to the pool.
    ///
    /// A connection switched to another database is reset to the configured
    /// one first.
    pub async fn release(&self, mut conn: Connection) -> Result<()> {
        self.ensure_member(&conn)?;

        let default_db = self.inner.connector.default_database();
        if conn.database() != default_db {
            debug!(pool = %self.inner.name, connection = conn.id(), db = default_db, "Resetting DB on release");
            if let Err(err) = conn.select_database(default_db).await {
                warn!(pool = %self.inner.name, error = %err, "Failed to reset DB, destroying connection");
                return self.destroy(conn).await;
            }
        }

        let Some(idle) = conn.take_idle() else {
            return Err(CacheError::NotPartOfPool(self.inner.name.clone()));
        };

        if let Some(idle) = self.inner.settle(idle, false) {
            self.inner.teardown(idle).await;
            self.inner.changed.notify_waiters();
        }
        Ok(())
    }

    // == Destroy ==
    /// Removes a connection from the pool and closes it.
    ///
    /// Closing is best-effort: teardown failures are logged, not returned.
    /// The freed slot is refilled up to `min` and offered to waiters.
    pub async fn destroy(&self, mut conn: Connection) -> Result<()> {
        self.ensure_member(&conn)?;

        let Some(idle) = conn.take_idle() else {
            return Err(CacheError::NotPartOfPool(self.inner.name.clone()));
        };
        self.inner.state().leased.remove(&idle.id);

        self.inner.teardown(idle).await;
        self.inner.changed.notify_waiters();
        self.inner.replenish();
        Ok(())
    }

    fn ensure_member(&self, conn: &Connection) -> Result<()> {
        let member =
            conn.pool_id() == self.inner.id && self.inner.state().leased.contains(&conn.id());
        if member {
            Ok(())
        } else {
            Err(CacheError::NotPartOfPool(self.inner.name.clone()))
        }
    }

    // == Drain ==
    /// Stops lending, waits for every lent or queued connection to come back,
    /// then closes all idle connections.
    pub async fn drain(&self) {
        let inner = &self.inner;
        inner.state().draining = true;
        info!(pool = %inner.name, "Draining pool");

        loop {
            let notified = inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = inner.state();
                state.prune_waiters();
                if state.leased.is_empty() && state.waiters.is_empty() && state.creating == 0 {
                    break;
                }
                debug!(
                    pool = %inner.name,
                    leased = state.leased.len(),
                    pending = state.waiters.len(),
                    creating = state.creating,
                    "Waiting for outstanding connections"
                );
            }
            notified.await;
        }

        let idle: Vec<IdleConnection> = inner.state().idle.drain(..).collect();
        let closed = idle.len();
        for conn in idle {
            inner.teardown(conn).await;
        }
        info!(pool = %inner.name, closed, "Pool drained");
    }

    pub fn is_draining(&self) -> bool {
        self.inner.state().draining
    }

    // == Commands ==
    /// Acquires a connection, runs one command, and always releases it.
    pub async fn send_command(&self, command: &str, args: &[String]) -> Result<Reply> {
        debug!(pool = %self.inner.name, command, "Executing command");
        let mut conn = self.acquire(Some(self.lowest_priority()), None).await?;
        let result = conn.execute(command, args).await;
        self.finish(command, conn, result).await
    }

    /// Loads a script through a pooled connection.
    pub async fn load_script(&self, source: &str) -> Result<String> {
        let mut conn = self.acquire(Some(self.lowest_priority()), None).await?;
        let result = conn.load_script(source).await;
        self.finish("SCRIPT LOAD", conn, result).await
    }

    /// Evaluates a loaded script through a pooled connection.
    pub async fn eval_script(&self, script_id: &str, keys: &[String], args: &[String]) -> Result<Reply> {
        let mut conn = self.acquire(Some(self.lowest_priority()), None).await?;
        let result = conn.eval_script(script_id, keys, args).await;
        self.finish("EVALSHA", conn, result).await
    }

    fn lowest_priority(&self) -> u32 {
        self.inner.config.sizing.priority_range - 1
    }

    async fn finish<T>(&self, command: &str, conn: Connection, result: Result<T>) -> Result<T> {
        self.release(conn).await?;
        if let Err(err) = &result {
            error!(pool = %self.inner.name, command, error = %err, "Errored send_command");
            self.inner
                .logger
                .error(&format!("Errored send_command {}: {}", command, err));
        }
        result
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("status", &self.status())
            .finish()
    }
}
