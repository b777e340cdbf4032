use anyhow::{Context, Result};
use shared::{
    domain::{AllocationGroupId, UnitRow},
    error::ApiException,
};
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use crate::Storage;

/// Rows of one allocation table. The permanent root reads the derived
/// whole-building membership.
pub(crate) async fn table_rows(
    conn: &mut SqliteConnection,
    table: AllocationGroupId,
) -> Result<Vec<UnitRow>> {
    let permanent: Option<bool> =
        sqlx::query_scalar("SELECT is_permanent FROM allocation_group_tree WHERE id = ?")
            .bind(table.0)
            .fetch_optional(&mut *conn)
            .await?;
    let Some(permanent) = permanent else {
        return Err(ApiException::not_found(format!("allocation table {} not found", table.0)).into());
    };

    let fetched = if permanent {
        sqlx::query("SELECT unit_id, room, inner_area FROM building_units ORDER BY row_order")
            .fetch_all(&mut *conn)
            .await
    } else {
        sqlx::query(
            "SELECT unit_id, room, inner_area FROM allocation_members WHERE group_id = ? ORDER BY position",
        )
        .bind(table.0)
        .fetch_all(&mut *conn)
        .await
    };
    let rows =
        fetched.with_context(|| format!("failed to read allocation table {}", table.0))?;

    Ok(rows
        .into_iter()
        .map(|r| UnitRow {
            id: r.get::<String, _>(0),
            room: r.get::<String, _>(1),
            inner_area: r.get::<String, _>(2),
        })
        .collect())
}

/// Every row of every listed table, in list order.
pub(crate) async fn collect_rows(
    conn: &mut SqliteConnection,
    tables: &[AllocationGroupId],
) -> Result<Vec<UnitRow>> {
    let mut rows = Vec::new();
    for &table in tables {
        rows.extend(table_rows(conn, table).await?);
    }
    Ok(rows)
}

pub(crate) fn sum_area(rows: &[UnitRow]) -> f64 {
    rows.iter().map(UnitRow::area).sum()
}

pub(crate) async fn total_area_in(
    conn: &mut SqliteConnection,
    tables: &[AllocationGroupId],
) -> Result<f64> {
    let rows = collect_rows(conn, tables).await?;
    let total = sum_area(&rows);
    debug!(tables = tables.len(), rows = rows.len(), total, "aggregated inner area");
    Ok(total)
}

impl Storage {
    /// Sum of `innerArea` over all rows of the given tables; `0` for none.
    pub async fn total_area(&self, tables: &[AllocationGroupId]) -> Result<f64> {
        if tables.is_empty() {
            return Ok(0.0);
        }
        let mut conn = self.pool.acquire().await?;
        total_area_in(&mut conn, tables).await
    }
}

#[cfg(test)]
#[path = "tests/aggregate_tests.rs"]
mod tests;
