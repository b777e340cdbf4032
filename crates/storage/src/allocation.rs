//! Allocation groups and their membership tables.
//!
//! Every non-root node of the allocation tree owns one membership table,
//! stored as the `allocation_members` rows keyed by the node id. The
//! permanent whole-building root has no stored rows of its own; its
//! membership is the derived `building_units` set.

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Context, Result};
use shared::{
    domain::{
        allocation_node_name, is_common_parts, AllocationGroupId, AllocationGroupNode,
        ProposedMember, UnitRow,
    },
    error::{ApiException, ErrorCode},
    protocol::{AllocationGroupEntry, AllocationTable},
};
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info, warn};

use crate::{aggregate, hierarchy::Hierarchy, Storage, TreeArena};

#[derive(Debug, Clone)]
struct GroupMeta {
    alias: String,
    permanent: bool,
}

/// Allocation tree snapshot plus the columns only groups carry.
struct GroupTree {
    arena: TreeArena,
    meta: HashMap<i64, GroupMeta>,
}

impl GroupTree {
    async fn load(conn: &mut SqliteConnection) -> Result<Self> {
        let arena = Hierarchy::ALLOCATION_GROUPS.load(conn).await?;
        let rows = sqlx::query("SELECT id, alias, is_permanent FROM allocation_group_tree")
            .fetch_all(&mut *conn)
            .await
            .context("failed to load allocation group aliases")?;
        let meta = rows
            .into_iter()
            .map(|r| {
                (
                    r.get::<i64, _>(0),
                    GroupMeta {
                        alias: r.get::<String, _>(1),
                        permanent: r.get::<bool, _>(2),
                    },
                )
            })
            .collect();
        Ok(Self { arena, meta })
    }

    fn root(&self) -> Result<i64> {
        self.meta
            .iter()
            .filter(|(_, m)| m.permanent)
            .map(|(&id, _)| id)
            .min()
            .ok_or_else(|| anyhow!("whole-building root is missing from the allocation tree"))
    }

    fn is_permanent(&self, id: i64) -> bool {
        self.meta.get(&id).is_some_and(|m| m.permanent)
    }

    fn node(&self, id: i64) -> Option<AllocationGroupNode> {
        let node = self.arena.get(id)?;
        let meta = self.meta.get(&id)?;
        Some(AllocationGroupNode {
            id: AllocationGroupId(id),
            name: node.name.clone(),
            alias: meta.alias.clone(),
            parent_id: node.parent_id.map(AllocationGroupId),
            order_index: node.order_index,
            permanent: meta.permanent,
        })
    }

    fn table(&self, id: i64) -> Option<AllocationTable> {
        let node = self.arena.get(id)?;
        Some(AllocationTable {
            id: AllocationGroupId(id),
            name: node.name.clone(),
            alias: self.meta.get(&id).map(|m| m.alias.clone()).unwrap_or_default(),
        })
    }

    fn find_child(&self, parent: i64, name: &str) -> Option<i64> {
        self.arena
            .children(parent)
            .iter()
            .copied()
            .find(|&child| self.arena.get(child).is_some_and(|n| n.name == name))
    }

    /// Resolves an allocation by its display name under the root, then by
    /// exact node name anywhere in the tree.
    fn resolve_allocation(&self, root: i64, allocation_name: &str) -> Option<i64> {
        self.find_child(root, &allocation_node_name(allocation_name))
            .or_else(|| self.arena.find_by_name(allocation_name))
    }

    fn child_name(&self, parent: i64, group_name: &str) -> String {
        if self.is_permanent(parent) {
            return allocation_node_name(group_name);
        }
        let parent_name = self
            .arena
            .get(parent)
            .map(|n| n.name.as_str())
            .unwrap_or_default();
        format!("{parent_name}_{group_name}")
    }
}

fn require_name(kind: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(
            ApiException::new(ErrorCode::ValidationFailed, format!("{kind} name must not be empty"))
                .into(),
        );
    }
    Ok(())
}

fn missing_group(id: AllocationGroupId) -> anyhow::Error {
    ApiException::not_found(format!("allocation group {} not found", id.0)).into()
}

/// Returns the existing child called `name` or appends a new one.
async fn ensure_child(
    conn: &mut SqliteConnection,
    tree: &GroupTree,
    parent: i64,
    name: &str,
    alias: &str,
) -> Result<i64> {
    if let Some(existing) = tree.find_child(parent, name) {
        return Ok(existing);
    }
    let id = Hierarchy::ALLOCATION_GROUPS
        .insert(conn, name, Some(parent))
        .await?;
    sqlx::query("UPDATE allocation_group_tree SET alias = ? WHERE id = ?")
        .bind(alias)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(id)
}

/// Delete-then-insert; a re-save never merges with the previous membership.
async fn replace_members(conn: &mut SqliteConnection, group_id: i64, members: &[UnitRow]) -> Result<()> {
    sqlx::query("DELETE FROM allocation_members WHERE group_id = ?")
        .bind(group_id)
        .execute(&mut *conn)
        .await?;

    for (position, unit) in members.iter().enumerate() {
        sqlx::query(
            "INSERT INTO allocation_members (group_id, position, unit_id, room, inner_area)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(group_id)
        .bind(position as i64)
        .bind(&unit.id)
        .bind(&unit.room)
        .bind(&unit.inner_area)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to store member '{}' of group {group_id}", unit.id))?;
    }
    debug!(group_id, members = members.len(), "group membership replaced");
    Ok(())
}

/// Drops the tables and nodes of `id`'s subtree. The permanent root is
/// never part of the result.
async fn drop_subtree(
    conn: &mut SqliteConnection,
    tree: &GroupTree,
    id: i64,
) -> Result<Vec<AllocationTable>> {
    let doomed: Vec<i64> = tree
        .arena
        .subtree(id)
        .into_iter()
        .filter(|&node| !tree.is_permanent(node))
        .collect();

    let mut dropped = Vec::with_capacity(doomed.len());
    for &node in &doomed {
        sqlx::query("DELETE FROM allocation_members WHERE group_id = ?")
            .bind(node)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed to drop allocation table {node}"))?;
        if let Some(table) = tree.table(node) {
            dropped.push(table);
        }
    }
    Hierarchy::ALLOCATION_GROUPS.delete_nodes(conn, &doomed).await?;
    Ok(dropped)
}

impl Storage {
    pub async fn whole_building_group(&self) -> Result<AllocationGroupId> {
        let mut conn = self.pool.acquire().await?;
        let tree = GroupTree::load(&mut conn).await?;
        Ok(AllocationGroupId(tree.root()?))
    }

    pub async fn get_group(&self, id: AllocationGroupId) -> Result<Option<AllocationGroupNode>> {
        let mut conn = self.pool.acquire().await?;
        let tree = GroupTree::load(&mut conn).await?;
        Ok(tree.node(id.0))
    }

    pub async fn group_children(&self, id: AllocationGroupId) -> Result<Vec<AllocationGroupId>> {
        let mut conn = self.pool.acquire().await?;
        let tree = GroupTree::load(&mut conn).await?;
        if !tree.arena.contains(id.0) {
            return Err(missing_group(id));
        }
        Ok(tree.arena.children(id.0).iter().copied().map(AllocationGroupId).collect())
    }

    pub async fn group_ancestors(&self, id: AllocationGroupId) -> Result<Vec<AllocationGroupId>> {
        let mut conn = self.pool.acquire().await?;
        let tree = GroupTree::load(&mut conn).await?;
        let path = tree.arena.ancestors(id.0).ok_or_else(|| missing_group(id))?;
        Ok(path.into_iter().map(AllocationGroupId).collect())
    }

    pub async fn group_subtree(&self, id: AllocationGroupId) -> Result<Vec<AllocationGroupId>> {
        let mut conn = self.pool.acquire().await?;
        let tree = GroupTree::load(&mut conn).await?;
        if !tree.arena.contains(id.0) {
            return Err(missing_group(id));
        }
        Ok(tree.arena.subtree(id.0).into_iter().map(AllocationGroupId).collect())
    }

    pub async fn find_group_by_name(&self, name: &str) -> Result<Option<AllocationGroupId>> {
        let mut conn = self.pool.acquire().await?;
        let tree = GroupTree::load(&mut conn).await?;
        Ok(tree.arena.find_by_name(name).map(AllocationGroupId))
    }

    /// Creates (or re-saves) `分摊所属_<allocation>_<group>` under the allocation
    /// node, creating the allocation node if needed.
    pub async fn create_group(
        &self,
        allocation_name: &str,
        group_name: &str,
        members: &[UnitRow],
    ) -> Result<AllocationGroupId> {
        require_name("allocation", allocation_name)?;
        require_name("group", group_name)?;

        let mut tx = self.pool.begin().await?;
        let tree = GroupTree::load(&mut tx).await?;
        let root = tree.root()?;
        let allocation_node = allocation_node_name(allocation_name);
        let allocation_id =
            ensure_child(&mut tx, &tree, root, &allocation_node, allocation_name).await?;
        let group_node = format!("{allocation_node}_{group_name}");
        let group_id = ensure_child(&mut tx, &tree, allocation_id, &group_node, group_name).await?;
        replace_members(&mut tx, group_id, members).await?;
        tx.commit().await?;

        info!(group_id, name = %group_node, members = members.len(), "allocation group saved");
        Ok(AllocationGroupId(group_id))
    }

    /// Creates (or re-saves) a group nested under any existing node.
    pub async fn create_subgroup(
        &self,
        parent: AllocationGroupId,
        group_name: &str,
        members: &[UnitRow],
    ) -> Result<AllocationGroupId> {
        require_name("group", group_name)?;

        let mut tx = self.pool.begin().await?;
        let tree = GroupTree::load(&mut tx).await?;
        if !tree.arena.contains(parent.0) {
            return Err(missing_group(parent));
        }
        let name = tree.child_name(parent.0, group_name);
        let group_id = ensure_child(&mut tx, &tree, parent.0, &name, group_name).await?;
        replace_members(&mut tx, group_id, members).await?;
        tx.commit().await?;

        info!(group_id, parent = parent.0, %name, members = members.len(), "allocation subgroup saved");
        Ok(AllocationGroupId(group_id))
    }

    /// Replaces a whole allocation: each proposed group is created or
    /// re-saved and groups no longer proposed are cascaded away.
    pub async fn save_allocation(
        &self,
        allocation_name: &str,
        members: &[ProposedMember],
    ) -> Result<Vec<AllocationTable>> {
        require_name("allocation", allocation_name)?;

        let mut grouped: Vec<(&str, Vec<UnitRow>)> = Vec::new();
        let mut slots: HashMap<&str, usize> = HashMap::new();
        for member in members {
            require_name("group", &member.group_name)?;
            let slot = *slots.entry(member.group_name.as_str()).or_insert_with(|| {
                grouped.push((member.group_name.as_str(), Vec::new()));
                grouped.len() - 1
            });
            grouped[slot].1.push(member.unit.clone());
        }

        let mut tx = self.pool.begin().await?;
        let tree = GroupTree::load(&mut tx).await?;
        let root = tree.root()?;
        let allocation_node = allocation_node_name(allocation_name);
        let allocation_id =
            ensure_child(&mut tx, &tree, root, &allocation_node, allocation_name).await?;

        let mut saved = Vec::with_capacity(grouped.len());
        let mut kept = HashSet::new();
        for (group_name, rows) in &grouped {
            let group_node = format!("{allocation_node}_{group_name}");
            let group_id =
                ensure_child(&mut tx, &tree, allocation_id, &group_node, group_name).await?;
            replace_members(&mut tx, group_id, rows).await?;
            kept.insert(group_id);
            saved.push(AllocationTable {
                id: AllocationGroupId(group_id),
                name: group_node,
                alias: group_name.to_string(),
            });
        }

        let stale: Vec<i64> = tree
            .arena
            .children(allocation_id)
            .iter()
            .copied()
            .filter(|id| !kept.contains(id))
            .collect();
        let mut removed = 0;
        for id in stale {
            removed += drop_subtree(&mut tx, &tree, id).await?.len();
        }
        tx.commit().await?;

        info!(
            allocation = allocation_name,
            groups = saved.len(),
            removed,
            "allocation saved"
        );
        Ok(saved)
    }

    /// Cascades through the subtree of the named allocation. Unknown names
    /// and the whole-building root delete nothing.
    pub async fn delete_allocation(&self, allocation_name: &str) -> Result<Vec<AllocationTable>> {
        let mut tx = self.pool.begin().await?;
        let tree = GroupTree::load(&mut tx).await?;
        let root = tree.root()?;
        let Some(target) = tree.resolve_allocation(root, allocation_name) else {
            info!(allocation = allocation_name, "no allocation matched; nothing deleted");
            return Ok(Vec::new());
        };
        if tree.is_permanent(target) {
            warn!(allocation = allocation_name, "refusing to delete the whole-building root");
            return Ok(Vec::new());
        }

        let dropped = drop_subtree(&mut tx, &tree, target).await?;
        tx.commit().await?;

        info!(allocation = allocation_name, tables = dropped.len(), "allocation deleted");
        Ok(dropped)
    }

    pub async fn delete_group(&self, id: AllocationGroupId) -> Result<Vec<AllocationTable>> {
        let mut tx = self.pool.begin().await?;
        let tree = GroupTree::load(&mut tx).await?;
        if !tree.arena.contains(id.0) {
            return Err(missing_group(id));
        }
        if tree.is_permanent(id.0) {
            warn!(group_id = id.0, "refusing to delete the whole-building root");
            return Ok(Vec::new());
        }

        let dropped = drop_subtree(&mut tx, &tree, id.0).await?;
        tx.commit().await?;

        info!(group_id = id.0, tables = dropped.len(), "allocation group deleted");
        Ok(dropped)
    }

    /// Tables that can be apportioned: the whole-building root first, then
    /// every leaf group that is not a common-parts marker.
    pub async fn list_available_leaf_groups(&self) -> Result<Vec<AllocationTable>> {
        let mut conn = self.pool.acquire().await?;
        let tree = GroupTree::load(&mut conn).await?;
        let root = tree.root()?;

        let mut tables: Vec<AllocationTable> = tree.table(root).into_iter().collect();
        tables.extend(
            tree.arena
                .preorder()
                .into_iter()
                .map(|(id, _)| id)
                .filter(|&id| !tree.is_permanent(id) && tree.arena.is_leaf(id))
                .filter(|&id| tree.arena.get(id).is_some_and(|n| !is_common_parts(&n.name)))
                .filter_map(|id| tree.table(id)),
        );
        Ok(tables)
    }

    /// Display names of the allocations directly under the root.
    pub async fn list_allocation_options(&self) -> Result<Vec<String>> {
        let mut conn = self.pool.acquire().await?;
        let tree = GroupTree::load(&mut conn).await?;
        let root = tree.root()?;
        Ok(tree
            .arena
            .children(root)
            .iter()
            .filter_map(|&id| tree.meta.get(&id).map(|m| m.alias.clone()))
            .collect())
    }

    /// Every group below an allocation, common-parts markers included.
    pub async fn list_allocation_tables(&self, allocation_name: &str) -> Result<Vec<AllocationTable>> {
        let mut conn = self.pool.acquire().await?;
        let tree = GroupTree::load(&mut conn).await?;
        let root = tree.root()?;
        let Some(allocation_id) = tree.find_child(root, &allocation_node_name(allocation_name)) else {
            return Ok(Vec::new());
        };
        Ok(tree
            .arena
            .descendants(allocation_id)
            .into_iter()
            .filter_map(|id| tree.table(id))
            .collect())
    }

    /// The whole allocation tree in display order.
    pub async fn list_allocation_groups(&self) -> Result<Vec<AllocationGroupEntry>> {
        let mut conn = self.pool.acquire().await?;
        let tree = GroupTree::load(&mut conn).await?;

        let counts: HashMap<i64, i64> = sqlx::query(
            "SELECT group_id, COUNT(*) FROM allocation_members GROUP BY group_id",
        )
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|r| (r.get::<i64, _>(0), r.get::<i64, _>(1)))
        .collect();
        let building_units: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM building_units")
            .fetch_one(&mut *conn)
            .await?;

        Ok(tree
            .arena
            .preorder()
            .into_iter()
            .filter_map(|(id, depth)| {
                let member_count = if tree.is_permanent(id) {
                    building_units
                } else {
                    counts.get(&id).copied().unwrap_or_default()
                };
                Some(AllocationGroupEntry {
                    table: tree.table(id)?,
                    parent_id: tree.arena.get(id)?.parent_id.map(AllocationGroupId),
                    depth,
                    member_count: usize::try_from(member_count).unwrap_or_default(),
                })
            })
            .collect())
    }

    pub async fn group_members(&self, id: AllocationGroupId) -> Result<Vec<UnitRow>> {
        let mut conn = self.pool.acquire().await?;
        aggregate::table_rows(&mut conn, id).await
    }
}

#[cfg(test)]
#[path = "tests/allocation_tests.rs"]
mod tests;
