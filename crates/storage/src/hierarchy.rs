//! Adjacency-list trees with ordered siblings.
//!
//! Both the allocation-group tree and the apportionment-model tree are stored
//! as `(id, name, parent_id, order_index)` rows. Closure queries (subtree,
//! ancestors) load the whole table into a [`TreeArena`] and walk it there, so
//! a cascading delete always sees every descendant before it touches one.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{Context, Result};
use shared::{
    domain::{ApportionmentModelNode, ModelId},
    error::{ApiException, ErrorCode},
    protocol::ModelHierarchyEntry,
};
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info};

use crate::Storage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub order_index: i64,
}

/// In-memory snapshot of one tree, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct TreeArena {
    nodes: HashMap<i64, TreeNode>,
    children: HashMap<i64, Vec<i64>>,
    roots: Vec<i64>,
}

impl TreeArena {
    pub fn from_nodes(nodes: impl IntoIterator<Item = TreeNode>) -> Self {
        let nodes: HashMap<i64, TreeNode> = nodes.into_iter().map(|n| (n.id, n)).collect();
        let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
        let mut roots = Vec::new();

        for node in nodes.values() {
            match node.parent_id {
                Some(parent) if nodes.contains_key(&parent) => {
                    children.entry(parent).or_default().push(node.id)
                }
                // a dangling parent reference is surfaced as a root
                _ => roots.push(node.id),
            }
        }

        let sibling_key = |id: &i64| (nodes[id].order_index, *id);
        roots.sort_by_key(sibling_key);
        for siblings in children.values_mut() {
            siblings.sort_by_key(sibling_key);
        }

        Self {
            nodes,
            children,
            roots,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn roots(&self) -> &[i64] {
        &self.roots
    }

    pub fn children(&self, id: i64) -> &[i64] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_leaf(&self, id: i64) -> bool {
        self.children(id).is_empty()
    }

    /// Path from the root down to `id`, both inclusive.
    pub fn ancestors(&self, id: i64) -> Option<Vec<i64>> {
        let mut current = self.nodes.get(&id)?;
        let mut seen = HashSet::from([id]);
        let mut path = vec![id];
        while let Some(parent) = current.parent_id {
            if !seen.insert(parent) {
                break;
            }
            let Some(node) = self.nodes.get(&parent) else {
                break;
            };
            path.push(parent);
            current = node;
        }
        path.reverse();
        Some(path)
    }

    /// `id` and all of its descendants in breadth-first order. Empty when the
    /// node does not exist.
    pub fn subtree(&self, id: i64) -> Vec<i64> {
        if !self.contains(id) {
            return Vec::new();
        }
        let mut seen = HashSet::from([id]);
        let mut order = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(next) = queue.pop_front() {
            order.push(next);
            for &child in self.children(next) {
                if seen.insert(child) {
                    queue.push_back(child);
                }
            }
        }
        order
    }

    pub fn descendants(&self, id: i64) -> Vec<i64> {
        self.subtree(id).into_iter().skip(1).collect()
    }

    /// Depth-first display order with depth, siblings by `order_index`.
    pub fn preorder(&self) -> Vec<(i64, usize)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut seen = HashSet::new();
        let mut stack: Vec<(i64, usize)> = self.roots.iter().rev().map(|&id| (id, 0)).collect();
        while let Some((id, depth)) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            out.push((id, depth));
            for &child in self.children(id).iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        out
    }

    /// First node carrying `name` in display order.
    pub fn find_by_name(&self, name: &str) -> Option<i64> {
        self.preorder()
            .into_iter()
            .map(|(id, _)| id)
            .find(|id| self.nodes[id].name == name)
    }
}

/// One persisted tree. The two instances never reference each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hierarchy {
    table: &'static str,
    label: &'static str,
}

impl Hierarchy {
    pub const ALLOCATION_GROUPS: Self = Self {
        table: "allocation_group_tree",
        label: "allocation group",
    };
    pub const APPORTIONMENT_MODELS: Self = Self {
        table: "apportionment_model_tree",
        label: "apportionment model",
    };

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub async fn load(&self, conn: &mut SqliteConnection) -> Result<TreeArena> {
        let rows = sqlx::query(&format!(
            "SELECT id, name, parent_id, order_index FROM {}",
            self.table
        ))
        .fetch_all(&mut *conn)
        .await
        .with_context(|| format!("failed to load {} tree", self.label))?;

        Ok(TreeArena::from_nodes(rows.into_iter().map(|r| TreeNode {
            id: r.get::<i64, _>(0),
            name: r.get::<String, _>(1),
            parent_id: r.get::<Option<i64>, _>(2),
            order_index: r.get::<i64, _>(3),
        })))
    }

    pub async fn exists(&self, conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar(&format!("SELECT id FROM {} WHERE id = ?", self.table))
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(found.is_some())
    }

    /// Appends a node after its existing siblings.
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
        parent_id: Option<i64>,
    ) -> Result<i64> {
        if let Some(parent) = parent_id {
            if !self.exists(conn, parent).await? {
                return Err(ApiException::not_found(format!(
                    "parent {} {parent} not found",
                    self.label
                ))
                .into());
            }
        }

        let order_index: i64 = sqlx::query_scalar(&format!(
            "SELECT COALESCE(MAX(order_index) + 1, 0) FROM {} WHERE parent_id IS ?",
            self.table
        ))
        .bind(parent_id)
        .fetch_one(&mut *conn)
        .await?;

        let id: i64 = sqlx::query_scalar(&format!(
            "INSERT INTO {} (name, parent_id, order_index) VALUES (?, ?, ?) RETURNING id",
            self.table
        ))
        .bind(name)
        .bind(parent_id)
        .bind(order_index)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to insert {} '{name}'", self.label))?;

        debug!(table = self.table, id, name, ?parent_id, order_index, "tree node inserted");
        Ok(id)
    }

    /// Removes the given nodes, deepest first. Callers pass a full subtree.
    pub async fn delete_nodes(&self, conn: &mut SqliteConnection, ids: &[i64]) -> Result<u64> {
        let mut removed = 0;
        for id in ids.iter().rev() {
            removed += sqlx::query(&format!("DELETE FROM {} WHERE id = ?", self.table))
                .bind(*id)
                .execute(&mut *conn)
                .await
                .with_context(|| format!("failed to delete {} {id}", self.label))?
                .rows_affected();
        }
        Ok(removed)
    }
}

fn model_node(node: &TreeNode) -> ApportionmentModelNode {
    ApportionmentModelNode {
        id: ModelId(node.id),
        name: node.name.clone(),
        parent_id: node.parent_id.map(ModelId),
        order_index: node.order_index,
    }
}

fn missing_model(id: ModelId) -> anyhow::Error {
    ApiException::not_found(format!("apportionment model {} not found", id.0)).into()
}

impl Storage {
    pub(crate) async fn model_arena(&self) -> Result<TreeArena> {
        let mut conn = self.pool.acquire().await?;
        Hierarchy::APPORTIONMENT_MODELS.load(&mut conn).await
    }

    pub async fn insert_model(&self, name: &str, parent: Option<ModelId>) -> Result<ModelId> {
        if name.trim().is_empty() {
            return Err(ApiException::new(
                ErrorCode::ValidationFailed,
                "model name must not be empty",
            )
            .into());
        }

        let mut tx = self.pool.begin().await?;
        let id = Hierarchy::APPORTIONMENT_MODELS
            .insert(&mut tx, name, parent.map(|p| p.0))
            .await?;
        tx.commit().await?;

        info!(model_id = id, name, parent = ?parent.map(|p| p.0), "apportionment model registered");
        Ok(ModelId(id))
    }

    pub async fn get_model(&self, id: ModelId) -> Result<Option<ApportionmentModelNode>> {
        let arena = self.model_arena().await?;
        Ok(arena.get(id.0).map(model_node))
    }

    pub async fn model_children(&self, id: ModelId) -> Result<Vec<ModelId>> {
        let arena = self.model_arena().await?;
        if !arena.contains(id.0) {
            return Err(missing_model(id));
        }
        Ok(arena.children(id.0).iter().copied().map(ModelId).collect())
    }

    pub async fn model_ancestors(&self, id: ModelId) -> Result<Vec<ModelId>> {
        let arena = self.model_arena().await?;
        let path = arena.ancestors(id.0).ok_or_else(|| missing_model(id))?;
        Ok(path.into_iter().map(ModelId).collect())
    }

    pub async fn model_subtree(&self, id: ModelId) -> Result<Vec<ModelId>> {
        let arena = self.model_arena().await?;
        if !arena.contains(id.0) {
            return Err(missing_model(id));
        }
        Ok(arena.subtree(id.0).into_iter().map(ModelId).collect())
    }

    /// First model with this name in display order; names are not unique.
    pub async fn find_model_by_name(&self, name: &str) -> Result<Option<ModelId>> {
        let arena = self.model_arena().await?;
        Ok(arena.find_by_name(name).map(ModelId))
    }

    pub async fn list_model_hierarchy(&self) -> Result<Vec<ModelHierarchyEntry>> {
        let arena = self.model_arena().await?;
        Ok(arena
            .preorder()
            .into_iter()
            .filter_map(|(id, depth)| {
                let node = arena.get(id)?;
                let path = arena
                    .ancestors(id)?
                    .into_iter()
                    .filter_map(|step| arena.get(step).map(|n| n.name.as_str()))
                    .collect::<Vec<_>>()
                    .join("/");
                Some(ModelHierarchyEntry {
                    model: model_node(node),
                    depth,
                    path,
                })
            })
            .collect())
    }
}

#[cfg(test)]
#[path = "tests/hierarchy_tests.rs"]
mod tests;
