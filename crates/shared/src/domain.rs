use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(AllocationGroupId);
id_newtype!(ModelId);

/// Name of the permanent allocation root.
pub const WHOLE_BUILDING: &str = "整幢";
/// Prefix of every allocation node name below the root.
pub const ALLOCATION_PREFIX: &str = "分摊所属";
/// Group-name suffix marking the common parts being apportioned.
pub const COMMON_PARTS_SUFFIX: &str = "分摊公共建筑部位";

pub fn allocation_node_name(allocation: &str) -> String {
    format!("{ALLOCATION_PREFIX}_{allocation}")
}

pub fn is_common_parts(name: &str) -> bool {
    name.ends_with(COMMON_PARTS_SUFFIX)
}

/// The two externally maintained base row sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseKind {
    UnitInterior,
    CommonBuilding,
}

impl BaseKind {
    pub fn id_prefix(self) -> &'static str {
        match self {
            BaseKind::UnitInterior => "H",
            BaseKind::CommonBuilding => "C",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BaseKind::UnitInterior => "unit",
            BaseKind::CommonBuilding => "common",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "unit" | "h" | "unit_interior" => Some(BaseKind::UnitInterior),
            "common" | "c" | "common_building" => Some(BaseKind::CommonBuilding),
            _ => None,
        }
    }
}

/// One imported row of a base table, values kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseRecord {
    pub source_id: String,
    #[serde(default)]
    pub floor: String,
    pub room: String,
    #[serde(default)]
    pub main_area: String,
    #[serde(default)]
    pub balcony_area: String,
    pub inner_area: String,
    #[serde(default)]
    pub usage: String,
}

/// A member row of an allocation table: `(ID, room, innerArea)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitRow {
    pub id: String,
    pub room: String,
    pub inner_area: String,
}

impl UnitRow {
    pub fn new(id: impl Into<String>, room: impl Into<String>, inner_area: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            room: room.into(),
            inner_area: inner_area.into(),
        }
    }

    pub fn area(&self) -> f64 {
        crate::numeric::parse_area(&self.inner_area)
    }
}

/// A unit placed into a named group of an allocation being saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedMember {
    pub group_name: String,
    pub unit: UnitRow,
}

impl ProposedMember {
    pub fn new(group_name: impl Into<String>, unit: UnitRow) -> Self {
        Self {
            group_name: group_name.into(),
            unit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationGroupNode {
    pub id: AllocationGroupId,
    pub name: String,
    pub alias: String,
    pub parent_id: Option<AllocationGroupId>,
    pub order_index: i64,
    pub permanent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApportionmentModelNode {
    pub id: ModelId,
    pub name: String,
    pub parent_id: Option<ModelId>,
    pub order_index: i64,
}
