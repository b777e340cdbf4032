use anyhow::{Context, Result};
use shared::domain::{BaseKind, BaseRecord, UnitRow};
use sqlx::{Row, SqliteConnection};
use tracing::info;

use crate::Storage;

/// Rebuilds the whole-building membership: unit rows (`H` prefix) first, then
/// common-area rows (`C` prefix).
async fn rederive_building_units(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("DELETE FROM building_units")
        .execute(&mut *conn)
        .await?;

    for kind in [BaseKind::UnitInterior, BaseKind::CommonBuilding] {
        sqlx::query(
            "INSERT INTO building_units (unit_id, floor, room, inner_area, usage)
             SELECT ? || source_id, floor, room, inner_area, usage
             FROM base_records
             WHERE kind = ?
             ORDER BY row_order",
        )
        .bind(kind.id_prefix())
        .bind(kind.as_str())
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to derive whole-building rows from {} records", kind.as_str()))?;
    }
    Ok(())
}

impl Storage {
    /// Replaces one base row set and rederives the whole-building membership.
    pub async fn save_base_records(&self, kind: BaseKind, records: &[BaseRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM base_records WHERE kind = ?")
            .bind(kind.as_str())
            .execute(&mut *tx)
            .await?;

        for (row_order, record) in records.iter().enumerate() {
            sqlx::query(
                "INSERT INTO base_records (kind, row_order, source_id, floor, room, main_area, balcony_area, inner_area, usage)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(kind.as_str())
            .bind(row_order as i64)
            .bind(&record.source_id)
            .bind(&record.floor)
            .bind(&record.room)
            .bind(&record.main_area)
            .bind(&record.balcony_area)
            .bind(&record.inner_area)
            .bind(&record.usage)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to store {} record '{}'", kind.as_str(), record.source_id))?;
        }

        rederive_building_units(&mut tx).await?;
        tx.commit().await?;

        info!(kind = kind.as_str(), rows = records.len(), "base records saved");
        Ok(records.len())
    }

    pub async fn list_base_records(&self, kind: BaseKind) -> Result<Vec<BaseRecord>> {
        let rows = sqlx::query(
            "SELECT source_id, floor, room, main_area, balcony_area, inner_area, usage
             FROM base_records
             WHERE kind = ?
             ORDER BY row_order",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| BaseRecord {
                source_id: r.get::<String, _>(0),
                floor: r.get::<String, _>(1),
                room: r.get::<String, _>(2),
                main_area: r.get::<String, _>(3),
                balcony_area: r.get::<String, _>(4),
                inner_area: r.get::<String, _>(5),
                usage: r.get::<String, _>(6),
            })
            .collect())
    }

    /// The whole-building membership, i.e. the rows loaded for editing.
    pub async fn list_building_units(&self) -> Result<Vec<UnitRow>> {
        let rows =
            sqlx::query("SELECT unit_id, room, inner_area FROM building_units ORDER BY row_order")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|r| UnitRow {
                id: r.get::<String, _>(0),
                room: r.get::<String, _>(1),
                inner_area: r.get::<String, _>(2),
            })
            .collect())
    }
}

#[cfg(test)]
#[path = "tests/base_records_tests.rs"]
mod tests;
