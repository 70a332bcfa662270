//! Connection handles for the `PostgreSQL` store.
//!
//! A handle is either the pool, from which every call checks out a fresh
//! connection, or one checked-out connection with an open transaction that
//! every call on the handle shares.

use crate::campaign::ports::{StoreError, StoreResult};
use diesel::connection::{AnsiTransactionManager, TransactionManager};
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use std::sync::{Arc, Mutex};

/// `PostgreSQL` connection pool type used by the campaign store.
pub type CampaignPgPool = Pool<ConnectionManager<PgConnection>>;

type PooledPgConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// Where store calls get their connection from.
#[derive(Clone)]
pub(super) enum Handle {
    Pool(CampaignPgPool),
    Transaction(Arc<TransactionSlot>),
}

impl Handle {
    pub(super) const fn is_transaction(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }

    /// Runs `op` on this handle's connection. Blocks.
    pub(super) fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut PgConnection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        match self {
            Self::Pool(pool) => {
                let mut connection = checkout(pool)?;
                op(&mut connection)
            }
            Self::Transaction(slot) => slot.with_connection(op),
        }
    }

    /// Opens a transaction, or shares the one this handle is bound to. Blocks.
    pub(super) fn begin(&self) -> StoreResult<Self> {
        match self {
            Self::Transaction(_) => Ok(self.clone()),
            Self::Pool(pool) => {
                let connection = checkout(pool)?;
                TransactionSlot::begin(connection).map(|slot| Self::Transaction(Arc::new(slot)))
            }
        }
    }
}

fn checkout(pool: &CampaignPgPool) -> StoreResult<PooledPgConnection> {
    pool.get()
        .map_err(|err| StoreError::connection(err.to_string()))
}

/// One connection with an open transaction.
///
/// The connection is taken out of the slot when the transaction ends; a slot
/// dropped while still holding it rolls back.
pub(super) struct TransactionSlot {
    connection: Mutex<Option<PooledPgConnection>>,
}

impl TransactionSlot {
    fn begin(mut connection: PooledPgConnection) -> StoreResult<Self> {
        let conn: &mut PgConnection = &mut connection;
        let depth = AnsiTransactionManager::transaction_manager_status_mut(conn).transaction_depth();
        if !matches!(depth, Ok(None)) {
            return Err(StoreError::NotTransactable);
        }
        AnsiTransactionManager::begin_transaction(conn).map_err(|err| {
            tracing::debug!(error = %err, "connection refused to begin a transaction");
            StoreError::NotTransactable
        })?;
        Ok(Self {
            connection: Mutex::new(Some(connection)),
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut PgConnection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self
            .connection
            .lock()
            .map_err(|_| StoreError::connection("transaction connection lock poisoned"))?;
        let connection = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        op(connection)
    }

    /// Commits or rolls back and returns the connection to the pool. Blocks.
    pub(super) fn finish(&self, commit: bool) -> StoreResult<()> {
        let taken = self
            .connection
            .lock()
            .map_err(|_| StoreError::connection("transaction connection lock poisoned"))?
            .take();
        let Some(mut connection) = taken else {
            return Err(StoreError::TransactionClosed);
        };
        let conn: &mut PgConnection = &mut connection;
        let ended = if commit {
            AnsiTransactionManager::commit_transaction(conn)
        } else {
            AnsiTransactionManager::rollback_transaction(conn)
        };
        ended.map_err(StoreError::persistence)
    }
}

impl Drop for TransactionSlot {
    fn drop(&mut self) {
        let abandoned = match self.connection.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut connection) = abandoned {
            tracing::warn!("rolling back transaction dropped without being finished");
            if let Err(err) = AnsiTransactionManager::rollback_transaction(&mut *connection) {
                tracing::warn!(error = %err, "rollback of abandoned transaction failed");
            }
        }
    }
}

/// Runs `op` inside a savepoint (or a transaction when none is open), so a
/// multi-statement write either lands completely or not at all. Blocks.
pub(super) fn atomically<T>(
    conn: &mut PgConnection,
    op: impl FnOnce(&mut PgConnection) -> StoreResult<T>,
) -> StoreResult<T> {
    AnsiTransactionManager::begin_transaction(conn).map_err(StoreError::persistence)?;
    match op(conn) {
        Ok(value) => {
            AnsiTransactionManager::commit_transaction(conn).map_err(StoreError::persistence)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = AnsiTransactionManager::rollback_transaction(conn) {
                tracing::warn!(error = %rollback, "savepoint rollback failed");
            }
            Err(err)
        }
    }
}

/// Runs `op` against `handle` on Tokio's blocking pool.
pub(super) async fn run_blocking<F, T>(handle: Handle, op: F) -> StoreResult<T>
where
    F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || handle.with_connection(op))
        .await
        .map_err(|err| StoreError::connection(err.to_string()))?
}
