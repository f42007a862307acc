//! In-Memory Backend
//!
//! An in-process store speaking the command subset the gateway uses. Every
//! connection opened by a `MemoryConnector` shares one `MemoryServer`, so
//! data written through one pooled connection is visible through the others.
//!
//! The server keeps one keyspace per logical database, expires entries lazily
//! on access (and optionally through a background sweeper), keeps a script
//! cache keyed by SHA-256 id, and can be told to refuse connections.

mod entry;
mod glob;
mod sweeper;

#[cfg(test)]
mod property_tests;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{Backend, BackendError, BackendResult, Connector, Reply};
use crate::store::DELETE_BY_PATTERN_SCRIPT;

pub use entry::StoredEntry;
pub use glob::glob_match;
pub use sweeper::spawn_expiry_sweeper;

// == Server State ==
#[derive(Debug, Default)]
struct ServerState {
    databases: HashMap<u32, HashMap<String, StoredEntry>>,
    /// Script id -> source
    scripts: HashMap<String, String>,
    unreachable: bool,
    refuse_next: u32,
    connects: u64,
}

impl ServerState {
    fn db(&mut self, db: u32) -> &mut HashMap<String, StoredEntry> {
        self.databases.entry(db).or_default()
    }

    /// Live value for `key`, dropping it first if it expired.
    fn live(&mut self, db: u32, key: &str) -> Option<&mut StoredEntry> {
        let entries = self.db(db);
        if entries.get(key).is_some_and(StoredEntry::is_expired) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }

    fn live_keys(&mut self, db: u32, pattern: &str) -> Vec<String> {
        let entries = self.db(db);
        entries.retain(|_, entry| !entry.is_expired());
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

// == Memory Server ==
/// Shared state behind every in-memory connection.
#[derive(Debug, Default)]
pub struct MemoryServer {
    state: Mutex<ServerState>,
}

impl MemoryServer {
    /// Creates an empty server.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connector producing connections to this server.
    pub fn connector(self: &Arc<Self>) -> MemoryConnector {
        MemoryConnector {
            server: Arc::clone(self),
            database: 0,
        }
    }

    /// Refuses (or accepts again) every connection attempt.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Refuses the next `count` connection attempts.
    pub fn refuse_next_connects(&self, count: u32) {
        self.state().refuse_next = count;
    }

    /// Number of connection attempts seen so far.
    pub fn connect_attempts(&self) -> u64 {
        self.state().connects
    }

    /// Empties the script cache, as a server restart would.
    pub fn flush_scripts(&self) {
        self.state().scripts.clear();
    }

    /// Number of live keys in `db`.
    pub fn db_size(&self, db: u32) -> usize {
        let mut state = self.state();
        state.db(db).retain(|_, entry| !entry.is_expired());
        state.db(db).len()
    }

    /// Removes expired entries from every database, returning how many.
    pub fn purge_expired(&self) -> usize {
        let mut state = self.state();
        let mut removed = 0;
        for entries in state.databases.values_mut() {
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired());
            removed += before - entries.len();
        }
        removed
    }

    fn execute(&self, db: &mut u32, command: &str, args: &[String]) -> BackendResult<Reply> {
        let name = command.to_ascii_uppercase();
        let mut state = self.state();

        match (name.as_str(), args) {
            ("PING", []) => Ok(Reply::Status("PONG".to_string())),
            ("PING", [message]) => Ok(Reply::Data(message.clone())),
            ("SELECT", [index]) => {
                *db = parse_int(index)?
                    .try_into()
                    .map_err(|_| BackendError::Command("ERR DB index is out of range".to_string()))?;
                Ok(ok())
            }
            ("GET", [key]) => Ok(state
                .live(*db, key)
                .map(|entry| Reply::Data(entry.value.clone()))
                .unwrap_or(Reply::Nil)),
            ("SET", [key, value]) => {
                state.db(*db).insert(key.clone(), StoredEntry::new(value.clone(), None));
                Ok(ok())
            }
            ("SET", [key, value, option, seconds]) if option.eq_ignore_ascii_case("EX") => {
                let ttl = positive_seconds(seconds, "set")?;
                state.db(*db).insert(key.clone(), StoredEntry::new(value.clone(), Some(ttl)));
                Ok(ok())
            }
            ("SETEX", [key, seconds, value]) => {
                let ttl = positive_seconds(seconds, "setex")?;
                state.db(*db).insert(key.clone(), StoredEntry::new(value.clone(), Some(ttl)));
                Ok(ok())
            }
            ("GETSET", [key, value]) => {
                let previous = state.live(*db, key).map(|entry| entry.value.clone());
                state.db(*db).insert(key.clone(), StoredEntry::new(value.clone(), None));
                Ok(previous.map(Reply::Data).unwrap_or(Reply::Nil))
            }
            ("DEL" | "UNLINK", keys) if !keys.is_empty() => {
                let removed = keys
                    .iter()
                    .filter(|key| state.live(*db, key).is_some())
                    .cloned()
                    .collect::<Vec<_>>();
                let entries = state.db(*db);
                for key in &removed {
                    entries.remove(key);
                }
                Ok(Reply::Int(removed.len() as i64))
            }
            ("EXPIRE", [key, seconds]) => {
                let seconds = parse_int(seconds)?;
                if state.live(*db, key).is_none() {
                    return Ok(Reply::Int(0));
                }
                if seconds <= 0 {
                    state.db(*db).remove(key);
                } else if let Some(entry) = state.live(*db, key) {
                    entry.expire_in(Some(seconds as u64));
                }
                Ok(Reply::Int(1))
            }
            ("TTL", [key]) => Ok(Reply::Int(match state.live(*db, key) {
                None => -2,
                Some(entry) => entry.ttl_remaining().map(|secs| secs as i64).unwrap_or(-1),
            })),
            ("KEYS", [pattern]) => Ok(Reply::Array(
                state
                    .live_keys(*db, pattern)
                    .into_iter()
                    .map(Reply::Data)
                    .collect(),
            )),
            ("DBSIZE", []) => {
                let current = *db;
                Ok(Reply::Int(state.live_keys(current, "*").len() as i64))
            }
            ("FLUSHDB", []) => {
                state.db(*db).clear();
                Ok(ok())
            }
            ("SCRIPT", [sub, rest @ ..]) => script_command(&mut state, sub, rest),
            ("EVALSHA", [id, numkeys, rest @ ..]) => {
                let numkeys = parse_int(numkeys)? as usize;
                let args = rest.get(numkeys..).unwrap_or_default();
                eval_script(&mut state, *db, id, args)
            }
            (
                "PING" | "SELECT" | "GET" | "SET" | "SETEX" | "GETSET" | "DEL" | "UNLINK"
                | "EXPIRE" | "TTL" | "KEYS" | "DBSIZE" | "FLUSHDB" | "SCRIPT" | "EVALSHA",
                _,
            ) => Err(BackendError::Command(format!(
                "ERR wrong number of arguments for '{}' command",
                command.to_ascii_lowercase()
            ))),
            _ => Err(BackendError::Command(format!(
                "ERR unknown command '{}'",
                command
            ))),
        }
    }
}

fn script_command(state: &mut ServerState, sub: &str, args: &[String]) -> BackendResult<Reply> {
    match (sub.to_ascii_uppercase().as_str(), args) {
        ("LOAD", [source]) => {
            let id = format!("{:x}", Sha256::digest(source.as_bytes()));
            state.scripts.insert(id.clone(), source.clone());
            Ok(Reply::Data(id))
        }
        ("EXISTS", ids) => Ok(Reply::Array(
            ids.iter()
                .map(|id| Reply::Int(i64::from(state.scripts.contains_key(id))))
                .collect(),
        )),
        ("FLUSH", _) => {
            state.scripts.clear();
            Ok(ok())
        }
        _ => Err(BackendError::Command(format!(
            "ERR unknown subcommand '{}'",
            sub
        ))),
    }
}

/// Runs a cached script. Only the pattern-delete script has a native
/// counterpart; it runs under the server lock, as scripts run atomically.
fn eval_script(state: &mut ServerState, db: u32, id: &str, args: &[String]) -> BackendResult<Reply> {
    let source = state
        .scripts
        .get(id)
        .ok_or_else(|| BackendError::NoScript("No matching script. Please use EVAL.".to_string()))?;

    if source.as_str() != DELETE_BY_PATTERN_SCRIPT {
        return Err(BackendError::Command(
            "ERR in-memory backend only evaluates the pattern-delete script".to_string(),
        ));
    }

    let pattern = args.first().map(String::as_str).unwrap_or("*");
    let matched = state.live_keys(db, pattern);
    let entries = state.db(db);
    for key in &matched {
        entries.remove(key);
    }
    debug!(pattern = pattern, deleted = matched.len(), "Pattern delete evaluated");
    Ok(Reply::Int(matched.len() as i64))
}

fn ok() -> Reply {
    Reply::Status("OK".to_string())
}

fn parse_int(raw: &str) -> BackendResult<i64> {
    raw.parse()
        .map_err(|_| BackendError::Command("ERR value is not an integer or out of range".to_string()))
}

fn positive_seconds(raw: &str, command: &str) -> BackendResult<u64> {
    match parse_int(raw)? {
        secs if secs > 0 => Ok(secs as u64),
        _ => Err(BackendError::Command(format!(
            "ERR invalid expire time in '{}' command",
            command
        ))),
    }
}

// == Connector ==
/// Opens connections to a shared `MemoryServer`.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    server: Arc<MemoryServer>,
    database: u32,
}

impl MemoryConnector {
    /// Connections start on `database` instead of 0.
    pub fn with_database(mut self, database: u32) -> Self {
        self.database = database;
        self
    }

    pub fn server(&self) -> &Arc<MemoryServer> {
        &self.server
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> BackendResult<Box<dyn Backend>> {
        {
            let mut state = self.server.state();
            state.connects += 1;
            if state.unreachable {
                return Err(BackendError::Connect("connection refused".to_string()));
            }
            if state.refuse_next > 0 {
                state.refuse_next -= 1;
                return Err(BackendError::Connect("connection refused".to_string()));
            }
        }
        Ok(Box::new(MemoryBackend {
            server: Arc::clone(&self.server),
            db: self.database,
            open: true,
        }))
    }

    fn default_database(&self) -> u32 {
        self.database
    }

    fn describe(&self) -> String {
        format!("memory (db {})", self.database)
    }
}

// == Backend ==
/// One connection to a `MemoryServer`.
#[derive(Debug)]
pub struct MemoryBackend {
    server: Arc<MemoryServer>,
    db: u32,
    open: bool,
}

impl MemoryBackend {
    /// Logical database this connection currently targets.
    pub fn database(&self) -> u32 {
        self.db
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn execute(&mut self, command: &str, args: &[String]) -> BackendResult<Reply> {
        if !self.open {
            return Err(BackendError::Closed);
        }
        self.server.execute(&mut self.db, command, args)
    }

    async fn close(&mut self, _flush: bool) -> BackendResult<()> {
        if !self.open {
            return Err(BackendError::Closed);
        }
        self.open = false;
        Ok(())
    }
}
