//! Database handle and per-organization serialization locks
//!
//! SQLite lacks row-level locking, so the ledger's read-last/compute/insert
//! critical section is guarded by an in-process mutex registry keyed by
//! organization id: lazily created, never removed, never coarser or finer
//! than one organization.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::info;
use uuid::Uuid;

#[derive(Default)]
struct OrgLockRegistry {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl OrgLockRegistry {
    fn lock_for(&self, organization_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("org lock registry poisoned");
        locks
            .entry(organization_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

pub struct Database {
    pool: SqlitePool,
    org_locks: OrgLockRegistry,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Database {
            pool,
            org_locks: OrgLockRegistry::default(),
        })
    }

    /// In-memory database for tests. A single connection keeps every
    /// transaction on the same in-memory instance.
    pub async fn new_in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Database {
            pool,
            org_locks: OrgLockRegistry::default(),
        })
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(include_str!("../../migrations/001_initial_schema.sql"))
            .execute(&self.pool)
            .await?;
        info!("Database schema applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Exclusive append lock for one organization. Held across the whole
    /// read-last/compute-next/insert sequence; other organizations proceed
    /// in parallel.
    pub async fn org_lock(&self, organization_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.org_locks.lock_for(organization_id);
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_migrates() {
        let db = Database::new_in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        // Idempotent: applying twice is fine.
        db.run_migrations().await.unwrap();
    }

    #[tokio::test]
    async fn test_org_locks_are_per_organization() {
        let db = Database::new_in_memory().await.unwrap();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();

        let guard_a = db.org_lock(org_a).await;
        // A different organization's lock is not blocked.
        let guard_b = db.org_lock(org_b).await;
        drop(guard_a);
        drop(guard_b);

        // Same organization's lock is reacquirable after release.
        let _again = db.org_lock(org_a).await;
    }
}
