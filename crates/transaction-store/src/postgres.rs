use async_trait::async_trait;
use common::TransactionId;
use domain::Transaction;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    Result, StoreError,
    store::{Mutation, TransactionStore},
};

/// PostgreSQL-backed transaction store.
///
/// One row per transaction; the aggregate lives in the `body` JSONB column
/// and `status`/`completed_at` are mirrored for querying. Updates lock the
/// row with `SELECT ... FOR UPDATE`.
#[derive(Clone)]
pub struct PostgresTransactionStore {
    pool: PgPool,
}

impl PostgresTransactionStore {
    /// Creates a new PostgreSQL transaction store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and creates a store on the new pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_transaction(row: PgRow) -> Result<Transaction> {
        let body: serde_json::Value = row.try_get("body")?;
        Ok(serde_json::from_value(body)?)
    }
}

#[async_trait]
impl TransactionStore for PostgresTransactionStore {
    async fn create(&self, transaction: Transaction) -> Result<Transaction> {
        let transaction_id = transaction.transaction_id();
        let body = serde_json::to_value(&transaction)?;

        let result = sqlx::query(
            r#"
            INSERT INTO saga_transactions (id, status, created_at, completed_at, body)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(transaction_id.as_uuid())
        .bind(transaction.status().as_str())
        .bind(transaction.created_at())
        .bind(transaction.completed_at())
        .bind(body)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(transaction_id));
        }
        tracing::debug!(%transaction_id, "transaction created");
        Ok(transaction)
    }

    async fn get(&self, transaction_id: TransactionId) -> Result<Option<Transaction>> {
        let row: Option<PgRow> = sqlx::query("SELECT body FROM saga_transactions WHERE id = $1")
            .bind(transaction_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_transaction).transpose()
    }

    async fn update(
        &self,
        transaction_id: TransactionId,
        mutation: Mutation<'_>,
    ) -> Result<Transaction> {
        let mut tx = self.pool.begin().await?;

        let row: Option<PgRow> =
            sqlx::query("SELECT body FROM saga_transactions WHERE id = $1 FOR UPDATE")
                .bind(transaction_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        let mut transaction = match row {
            Some(row) => Self::row_to_transaction(row)?,
            None => return Err(StoreError::NotFound(transaction_id)),
        };

        // Dropping `tx` on a rejected mutation rolls back and releases the lock
        mutation(&mut transaction)?;

        sqlx::query(
            r#"
            UPDATE saga_transactions
            SET status = $2, completed_at = $3, body = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(transaction_id.as_uuid())
        .bind(transaction.status().as_str())
        .bind(transaction.completed_at())
        .bind(serde_json::to_value(&transaction)?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(transaction)
    }

    async fn list(&self) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT body
            FROM saga_transactions
            ORDER BY created_at DESC, seq DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_transaction).collect()
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM saga_transactions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn delete(&self, transaction_id: TransactionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM saga_transactions WHERE id = $1")
            .bind(transaction_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
