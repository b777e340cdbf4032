//! Per-model coefficient results.
//!
//! Results are kept sparse: one `model_unit_results` cell per (model, unit)
//! plus the `coefficient_units` base row. The wide per-unit table with
//! `<model>_coefficient`, `<model>_apportionedArea`,
//! `<model>_apportionableArea` and `totalCoefficient` columns is assembled on
//! read by [`Storage::coefficient_table`].

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use shared::{
    domain::{AllocationGroupId, ModelId, UnitRow},
    error::{ApiException, ErrorCode},
    numeric::{
        apportionable_area, apportioned_area, apportionment_coefficient, format_area,
        format_coefficient, parse_decimal, round_coefficient,
    },
    protocol::{
        apportionable_area_column, apportioned_area_column, coefficient_column,
        CalculatedCoefficient, CoefficientOutcome, CoefficientRequest, CoefficientRow,
        CoefficientTable, UnitShare, BASE_COLUMNS, TOTAL_COEFFICIENT_COLUMN,
    },
};
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info};

use crate::{aggregate, hierarchy::Hierarchy, Storage, TreeNode};

async fn load_model(conn: &mut SqliteConnection, id: ModelId) -> Result<TreeNode> {
    let arena = Hierarchy::APPORTIONMENT_MODELS.load(conn).await?;
    arena
        .get(id.0)
        .cloned()
        .ok_or_else(|| ApiException::not_found(format!("apportionment model {} not found", id.0)).into())
}

/// Registers `model` as the owner of its result columns. A different model
/// already holding the same labels is a schema conflict.
async fn claim_result_columns(conn: &mut SqliteConnection, model: &TreeNode) -> Result<()> {
    let holder: Option<i64> = sqlx::query_scalar("SELECT model_id FROM result_models WHERE label = ?")
        .bind(&model.name)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(holder) = holder.filter(|&holder| holder != model.id) {
        return Err(ApiException::new(
            ErrorCode::SchemaConflict,
            format!(
                "result columns for '{}' already belong to model {holder}; delete it or rename this model",
                model.name
            ),
        )
        .into());
    }

    sqlx::query(
        "INSERT INTO result_models (model_id, label) VALUES (?, ?)
         ON CONFLICT(model_id) DO NOTHING",
    )
    .bind(model.id)
    .bind(&model.name)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn require_finite(what: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(ApiException::new(
            ErrorCode::ValidationFailed,
            format!("{what} must be a finite number, got {value}"),
        )
        .into());
    }
    Ok(())
}

async fn upsert_unit(conn: &mut SqliteConnection, unit: &UnitRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO coefficient_units (unit_id, room, inner_area, first_seen)
         VALUES (?, ?, ?, (SELECT COALESCE(MAX(first_seen) + 1, 0) FROM coefficient_units))
         ON CONFLICT(unit_id) DO UPDATE SET room = excluded.room, inner_area = excluded.inner_area",
    )
    .bind(&unit.id)
    .bind(&unit.room)
    .bind(&unit.inner_area)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("failed to upsert result row '{}'", unit.id))?;
    Ok(())
}

async fn prune_empty_cells(conn: &mut SqliteConnection, model_id: i64) -> Result<()> {
    sqlx::query(
        "DELETE FROM model_unit_results
         WHERE model_id = ? AND coefficient IS NULL AND apportioned_area IS NULL AND apportionable_area IS NULL",
    )
    .bind(model_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// `totalCoefficient` = round6(sum of every stored model coefficient), per unit.
async fn recompute_totals(conn: &mut SqliteConnection) -> Result<()> {
    let rows = sqlx::query(
        "SELECT u.unit_id, r.coefficient
         FROM coefficient_units u
         LEFT JOIN model_unit_results r ON r.unit_id = u.unit_id",
    )
    .fetch_all(&mut *conn)
    .await
    .context("failed to read coefficients for totals")?;

    let mut totals: HashMap<String, f64> = HashMap::new();
    for row in rows {
        let coefficient = row
            .get::<Option<String>, _>(1)
            .map(|raw| parse_decimal(&raw))
            .unwrap_or_default();
        *totals.entry(row.get::<String, _>(0)).or_default() += coefficient;
    }

    for (unit_id, total) in &totals {
        sqlx::query("UPDATE coefficient_units SET total_coefficient = ? WHERE unit_id = ?")
            .bind(format_coefficient(round_coefficient(*total)))
            .bind(unit_id)
            .execute(&mut *conn)
            .await?;
    }
    debug!(units = totals.len(), "total coefficients recomputed");
    Ok(())
}

impl Storage {
    /// Computes a model's coefficient from the common and participant tables
    /// and stores it with the apportioned area of every participant unit.
    /// Nothing is written when the participant area is zero.
    pub async fn compute_and_store(&self, request: &CoefficientRequest) -> Result<CoefficientOutcome> {
        require_finite("parent coefficient", request.parent_coefficient)?;

        let mut tx = self.pool.begin().await?;
        let model = load_model(&mut tx, request.model_id).await?;

        let common_area = aggregate::total_area_in(&mut tx, &request.common_tables).await?;
        let participants = aggregate::collect_rows(&mut tx, &request.participant_tables).await?;
        let participant_area = aggregate::sum_area(&participants);

        let coefficient =
            apportionment_coefficient(common_area, participant_area, request.parent_coefficient)
                .ok_or_else(|| {
                    ApiException::new(
                        ErrorCode::DivisionByZero,
                        format!(
                            "participant area for model '{}' is zero; cannot compute a coefficient",
                            model.name
                        ),
                    )
                })?;
        require_finite("coefficient", coefficient)?;
        let coefficient_text = format_coefficient(coefficient);

        claim_result_columns(&mut tx, &model).await?;
        sqlx::query(
            "UPDATE model_unit_results SET coefficient = NULL, apportioned_area = NULL WHERE model_id = ?",
        )
        .bind(model.id)
        .execute(&mut *tx)
        .await?;

        let mut shares = Vec::with_capacity(participants.len());
        for unit in &participants {
            let area = format_area(apportioned_area(unit.area(), coefficient));
            upsert_unit(&mut tx, unit).await?;
            sqlx::query(
                "INSERT INTO model_unit_results (model_id, unit_id, coefficient, apportioned_area)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(model_id, unit_id) DO UPDATE SET
                    coefficient = excluded.coefficient,
                    apportioned_area = excluded.apportioned_area",
            )
            .bind(model.id)
            .bind(&unit.id)
            .bind(&coefficient_text)
            .bind(&area)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to store apportioned area for '{}'", unit.id))?;
            shares.push(UnitShare {
                unit_id: unit.id.clone(),
                room: unit.room.clone(),
                inner_area: unit.inner_area.clone(),
                area,
            });
        }
        prune_empty_cells(&mut tx, model.id).await?;

        sqlx::query(
            "UPDATE result_models SET coefficient = ?, parent_coefficient = ?, computed_at = ? WHERE model_id = ?",
        )
        .bind(&coefficient_text)
        .bind(format_coefficient(request.parent_coefficient))
        .bind(Utc::now())
        .bind(model.id)
        .execute(&mut *tx)
        .await?;

        recompute_totals(&mut tx).await?;
        tx.commit().await?;

        info!(
            model_id = model.id,
            model = %model.name,
            common_area,
            participant_area,
            coefficient = %coefficient_text,
            units = shares.len(),
            "coefficient computed"
        );
        Ok(CoefficientOutcome {
            model_id: request.model_id,
            model_name: model.name,
            common_area,
            participant_area,
            parent_coefficient: request.parent_coefficient,
            coefficient,
            shares,
        })
    }

    /// Stores `round2(innerArea * (1 + parent))` for every unit of the common
    /// tables under the model's apportionable-area column.
    pub async fn store_apportionable_area(
        &self,
        model_id: ModelId,
        common_tables: &[AllocationGroupId],
        parent_coefficient: f64,
    ) -> Result<Vec<UnitShare>> {
        require_finite("parent coefficient", parent_coefficient)?;

        let mut tx = self.pool.begin().await?;
        let model = load_model(&mut tx, model_id).await?;
        let commons = aggregate::collect_rows(&mut tx, common_tables).await?;

        claim_result_columns(&mut tx, &model).await?;
        sqlx::query("UPDATE model_unit_results SET apportionable_area = NULL WHERE model_id = ?")
            .bind(model.id)
            .execute(&mut *tx)
            .await?;

        let mut shares = Vec::with_capacity(commons.len());
        for unit in &commons {
            let area = format_area(apportionable_area(unit.area(), parent_coefficient));
            upsert_unit(&mut tx, unit).await?;
            sqlx::query(
                "INSERT INTO model_unit_results (model_id, unit_id, apportionable_area)
                 VALUES (?, ?, ?)
                 ON CONFLICT(model_id, unit_id) DO UPDATE SET apportionable_area = excluded.apportionable_area",
            )
            .bind(model.id)
            .bind(&unit.id)
            .bind(&area)
            .execute(&mut *tx)
            .await?;
            shares.push(UnitShare {
                unit_id: unit.id.clone(),
                room: unit.room.clone(),
                inner_area: unit.inner_area.clone(),
                area,
            });
        }
        prune_empty_cells(&mut tx, model.id).await?;
        recompute_totals(&mut tx).await?;
        tx.commit().await?;

        info!(model_id = model.id, units = shares.len(), "apportionable area stored");
        Ok(shares)
    }

    /// Deletes a model, its descendants and all of their result columns.
    /// Returns the labels of the columns that actually held values.
    pub async fn delete_model(&self, id: ModelId) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let arena = Hierarchy::APPORTIONMENT_MODELS.load(&mut tx).await?;
        if !arena.contains(id.0) {
            return Err(
                ApiException::not_found(format!("apportionment model {} not found", id.0)).into(),
            );
        }
        let doomed = arena.subtree(id.0);

        let mut removed = Vec::new();
        for &model_id in &doomed {
            let label: Option<String> =
                sqlx::query_scalar("SELECT label FROM result_models WHERE model_id = ?")
                    .bind(model_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            let filled = sqlx::query(
                "SELECT COUNT(coefficient), COUNT(apportioned_area), COUNT(apportionable_area)
                 FROM model_unit_results
                 WHERE model_id = ?",
            )
            .bind(model_id)
            .fetch_one(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM model_unit_results WHERE model_id = ?")
                .bind(model_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM result_models WHERE model_id = ?")
                .bind(model_id)
                .execute(&mut *tx)
                .await?;
            if let Some(label) = label {
                let columns = [
                    coefficient_column(&label),
                    apportioned_area_column(&label),
                    apportionable_area_column(&label),
                ];
                // only columns that held at least one cell
                for (index, column) in columns.into_iter().enumerate() {
                    if filled.get::<i64, _>(index) > 0 {
                        removed.push(column);
                    }
                }
            }
        }

        Hierarchy::APPORTIONMENT_MODELS
            .delete_nodes(&mut tx, &doomed)
            .await?;
        recompute_totals(&mut tx).await?;
        tx.commit().await?;

        info!(model_id = id.0, models = doomed.len(), columns = removed.len(), "apportionment model deleted");
        Ok(removed)
    }

    /// Name-based delete; resolves the first model with that name.
    pub async fn delete_model_named(&self, name: &str) -> Result<(ModelId, Vec<String>)> {
        let id = self.find_model_by_name(name).await?.ok_or_else(|| {
            ApiException::not_found(format!("no apportionment model named '{name}'"))
        })?;
        let removed = self.delete_model(id).await?;
        Ok((id, removed))
    }

    pub async fn model_coefficient(&self, id: ModelId) -> Result<Option<f64>> {
        let stored: Option<Option<String>> =
            sqlx::query_scalar("SELECT coefficient FROM result_models WHERE model_id = ?")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(stored.flatten().map(|raw| parse_decimal(&raw)))
    }

    /// Coefficient a model inherits: its parent's stored coefficient, else `0`.
    pub async fn inherited_coefficient(&self, id: ModelId) -> Result<f64> {
        let model = self
            .get_model(id)
            .await?
            .ok_or_else(|| ApiException::not_found(format!("apportionment model {} not found", id.0)))?;
        let Some(parent) = model.parent_id else {
            return Ok(0.0);
        };
        Ok(self.model_coefficient(parent).await?.unwrap_or_default())
    }

    pub async fn calculated_coefficients(&self) -> Result<Vec<CalculatedCoefficient>> {
        let rows = sqlx::query(
            "SELECT model_id, label, coefficient, parent_coefficient, computed_at
             FROM result_models
             WHERE coefficient IS NOT NULL
             ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| CalculatedCoefficient {
                model_id: ModelId(r.get::<i64, _>(0)),
                model_name: r.get::<String, _>(1),
                coefficient: r.get::<String, _>(2),
                parent_coefficient: r.get::<Option<String>, _>(3).unwrap_or_default(),
                computed_at: r.get::<DateTime<Utc>, _>(4),
            })
            .collect())
    }

    /// Assembles the wide per-unit results table.
    pub async fn coefficient_table(&self) -> Result<CoefficientTable> {
        let mut conn = self.pool.acquire().await?;

        let models: Vec<(i64, String)> =
            sqlx::query("SELECT model_id, label FROM result_models ORDER BY seq")
                .fetch_all(&mut *conn)
                .await?
                .into_iter()
                .map(|r| (r.get::<i64, _>(0), r.get::<String, _>(1)))
                .collect();

        let mut columns: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
        for (_, label) in &models {
            columns.push(coefficient_column(label));
            columns.push(apportioned_area_column(label));
            columns.push(apportionable_area_column(label));
        }
        columns.push(TOTAL_COEFFICIENT_COLUMN.to_string());

        type Cells = (Option<String>, Option<String>, Option<String>);
        let cells: HashMap<(i64, String), Cells> = sqlx::query(
            "SELECT model_id, unit_id, coefficient, apportioned_area, apportionable_area
             FROM model_unit_results",
        )
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|r| {
            (
                (r.get::<i64, _>(0), r.get::<String, _>(1)),
                (
                    r.get::<Option<String>, _>(2),
                    r.get::<Option<String>, _>(3),
                    r.get::<Option<String>, _>(4),
                ),
            )
        })
        .collect();

        let units = sqlx::query(
            "SELECT unit_id, room, inner_area, total_coefficient
             FROM coefficient_units
             ORDER BY first_seen",
        )
        .fetch_all(&mut *conn)
        .await?;

        let rows = units
            .into_iter()
            .map(|r| {
                let unit_id = r.get::<String, _>(0);
                let mut model_cells = Vec::with_capacity(models.len() * 3);
                for (model_id, _) in &models {
                    let (coefficient, apportioned, apportionable) = cells
                        .get(&(*model_id, unit_id.clone()))
                        .cloned()
                        .unwrap_or_default();
                    model_cells.push(coefficient);
                    model_cells.push(apportioned);
                    model_cells.push(apportionable);
                }
                CoefficientRow {
                    unit_id,
                    room: r.get::<String, _>(1),
                    inner_area: r.get::<String, _>(2),
                    model_cells,
                    total_coefficient: r.get::<String, _>(3),
                }
            })
            .collect();

        Ok(CoefficientTable { columns, rows })
    }
}

#[cfg(test)]
#[path = "tests/coefficients_tests.rs"]
mod tests;
