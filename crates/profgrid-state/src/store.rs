//! StateStore — redb-backed persistence for the profgrid control plane.
//!
//! Provides typed CRUD operations over associations, backend records,
//! and recording policies, plus an expiring-lease primitive used by the
//! association registry for single-writer exclusion. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// A successfully acquired lease. Pass it back to [`StateStore::release_lease`]
/// when the guarded section completes.
#[derive(Debug, Clone)]
pub struct Lease {
    pub name: String,
    pub holder: String,
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ASSOCIATIONS).map_err(map_err!(Table))?;
        txn.open_table(BACKENDS).map_err(map_err!(Table))?;
        txn.open_table(POLICIES).map_err(map_err!(Table))?;
        txn.open_table(LEASES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Associations ───────────────────────────────────────────────

    /// Persist (or overwrite) a process-group → backend association.
    pub fn put_association(
        &self,
        process_group: &ProcessGroup,
        backend: &str,
    ) -> StateResult<()> {
        let key = process_group.table_key();
        let value = serde_json::to_vec(&backend).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ASSOCIATIONS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, %backend, "association stored");
        Ok(())
    }

    /// Get the backend associated with a process group, if any.
    pub fn get_association(
        &self,
        process_group: &ProcessGroup,
    ) -> StateResult<Option<BackendAddress>> {
        let key = process_group.table_key();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ASSOCIATIONS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let backend: BackendAddress =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(backend))
            }
            None => Ok(None),
        }
    }

    /// List all persisted associations.
    pub fn list_associations(&self) -> StateResult<Vec<(String, BackendAddress)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ASSOCIATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let backend: BackendAddress =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push((key.value().to_string(), backend));
        }
        Ok(results)
    }

    /// Delete an association. Returns true if it existed.
    pub fn delete_association(&self, process_group: &ProcessGroup) -> StateResult<bool> {
        let key = process_group.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(ASSOCIATIONS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "association deleted");
        Ok(existed)
    }

    // ── Backends ───────────────────────────────────────────────────

    /// Insert or update a backend record.
    pub fn put_backend(&self, record: &BackendRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(BACKENDS).map_err(map_err!(Table))?;
            table
                .insert(record.address.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a backend record by address.
    pub fn get_backend(&self, address: &str) -> StateResult<Option<BackendRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BACKENDS).map_err(map_err!(Table))?;
        match table.get(address).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: BackendRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all backend records.
    pub fn list_backends(&self) -> StateResult<Vec<BackendRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BACKENDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: BackendRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    // ── Policies ───────────────────────────────────────────────────

    /// Insert or update the recording policy for a process group.
    pub fn put_policy(
        &self,
        process_group: &ProcessGroup,
        policy: &RecordingPolicy,
    ) -> StateResult<()> {
        let key = process_group.table_key();
        let value = serde_json::to_vec(policy).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "policy stored");
        Ok(())
    }

    /// Get the recording policy for a process group, if any.
    pub fn get_policy(
        &self,
        process_group: &ProcessGroup,
    ) -> StateResult<Option<RecordingPolicy>> {
        let key = process_group.table_key();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let policy: RecordingPolicy =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(policy))
            }
            None => Ok(None),
        }
    }

    // ── Leases ─────────────────────────────────────────────────────

    /// Try to acquire a named lease for `ttl_secs`.
    ///
    /// Succeeds when the lease row is absent, expired at `now`, or
    /// already held by the same holder (re-entrant refresh). A live
    /// lease held by someone else yields [`StateError::LeaseHeld`],
    /// which callers treat as retryable. The check-and-write runs in
    /// one redb write transaction, so two contenders cannot both win.
    pub fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl_secs: u64,
        now: u64,
    ) -> StateResult<Lease> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            if let Some(guard) = table.get(name).map_err(map_err!(Read))? {
                let current: LeaseRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                if current.expires_at > now && current.holder != holder {
                    return Err(StateError::LeaseHeld {
                        name: name.to_string(),
                        holder: current.holder,
                    });
                }
            }
            let record = LeaseRecord {
                holder: holder.to_string(),
                expires_at: now + ttl_secs,
            };
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(name, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%name, %holder, "lease acquired");
        Ok(Lease {
            name: name.to_string(),
            holder: holder.to_string(),
        })
    }

    /// Release a lease. A no-op if the lease has since expired and been
    /// re-acquired by another holder.
    pub fn release_lease(&self, lease: &Lease) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            let held_by_us = match table.get(lease.name.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    let current: LeaseRecord = serde_json::from_slice(guard.value())
                        .map_err(map_err!(Deserialize))?;
                    current.holder == lease.holder
                }
                None => false,
            };
            if held_by_us {
                table
                    .remove(lease.name.as_str())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(name = %lease.name, holder = %lease.holder, "lease released");
        Ok(())
    }
}
