//! `SqliteStore` keeps branches and donor balances in SQLite.
//!
//! The pool is created once at startup and shared by clones of the store.
use crate::domain::model::{Branch, BranchId, Donor, DonorDebit, DonorId};
use crate::domain::ports::InventoryStore;
use crate::utils::error::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        tracing::info!(url, max_connections, "Database pool created");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::debug!("Database migrations applied");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }

    pub async fn insert_branch(&self, city: &str, town: &str) -> Result<BranchId> {
        let result = sqlx::query("INSERT INTO branch (city, town) VALUES (?, ?)")
            .bind(city)
            .bind(town)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn insert_donor(&self, branch_id: BranchId, blood_type: &str, units: i64) -> Result<DonorId> {
        let result = sqlx::query("INSERT INTO donor (branch_id, blood_type, units_of_blood) VALUES (?, ?, ?)")
            .bind(branch_id)
            .bind(blood_type)
            .bind(units)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn fetch_donor(&self, donor_id: DonorId) -> Result<Option<Donor>> {
        let donor = sqlx::query_as::<_, Donor>(
            "SELECT iddonor, branch_id, blood_type, units_of_blood FROM donor WHERE iddonor = ?",
        )
        .bind(donor_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(donor)
    }
}

/// Sets a donor's balance only if it still holds `expected_units`.
/// Returns whether the row was updated.
pub(crate) async fn update_donor_units(
    donor_id: DonorId,
    new_units: i64,
    expected_units: i64,
    conn: &mut SqliteConnection,
) -> Result<bool> {
    let result = sqlx::query("UPDATE donor SET units_of_blood = ? WHERE iddonor = ? AND units_of_blood = ?")
        .bind(new_units)
        .bind(donor_id)
        .bind(expected_units)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl InventoryStore for SqliteStore {
    async fn list_branches(&self) -> Result<Vec<Branch>> {
        let branches = sqlx::query_as::<_, Branch>("SELECT city, town, idbranch FROM branch")
            .fetch_all(&self.pool)
            .await?;
        Ok(branches)
    }

    async fn list_donors(&self, branch_id: BranchId, blood_type: &str) -> Result<Vec<Donor>> {
        let donors = sqlx::query_as::<_, Donor>(
            r#"
            SELECT iddonor, branch_id, blood_type, units_of_blood FROM donor
            WHERE branch_id = ? AND blood_type = ?
            "#,
        )
        .bind(branch_id)
        .bind(blood_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(donors)
    }

    async fn apply_debits(&self, debits: &[DonorDebit]) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        for debit in debits {
            if !update_donor_units(debit.donor_id, debit.new_units, debit.previous_units, &mut *tx).await? {
                tracing::debug!(donor_id = debit.donor_id, "Donor balance moved, rolling back");
                tx.rollback().await?;
                return Ok(false);
            }
        }
        tx.commit().await?;
        Ok(true)
    }
}
