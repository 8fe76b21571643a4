//! Persisted registry types.
//!
//! Field names match the on-disk JSON document (camelCase) so existing
//! registry files keep loading.

use crate::config::RegistryConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A block coordinate.
///
/// Ordering is lexicographic on x, then y, then z, which is what makes a
/// composite container's primary coordinate deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// `None` when any axis leaves the `i32` range.
    pub fn checked_offset(self, dx: i32, dy: i32, dz: i32) -> Option<Self> {
        Some(Self::new(
            self.x.checked_add(dx)?,
            self.y.checked_add(dy)?,
            self.z.checked_add(dz)?,
        ))
    }

    /// The horizontal neighbours, in probe order +x, -x, +z, -z. Neighbours
    /// outside the coordinate range are skipped.
    pub fn horizontal_neighbors(self) -> impl Iterator<Item = Coord> {
        [(1, 0), (-1, 0), (0, 1), (0, -1)]
            .into_iter()
            .filter_map(move |(dx, dz)| self.checked_offset(dx, 0, dz))
    }

    /// Manhattan distance; adjacent blocks are at distance 1.
    pub fn manhattan(self, other: Coord) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y) + self.z.abs_diff(other.z)
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Kind of storage container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Single,
    Double,
    Trapped,
    Barrel,
    Ender,
    Shulker,
    Generic,
}

impl ContainerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Single => "single",
            ContainerKind::Double => "double",
            ContainerKind::Trapped => "trapped",
            ContainerKind::Barrel => "barrel",
            ContainerKind::Ender => "ender",
            ContainerKind::Shulker => "shulker",
            ContainerKind::Generic => "generic",
        }
    }

    /// Whether `count` member positions is valid for this kind.
    pub fn accepts_positions(&self, count: usize) -> bool {
        match self {
            ContainerKind::Double => count == 2,
            ContainerKind::Trapped => count == 1 || count == 2,
            _ => count == 1,
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partition key of the registry: `"<host>:<port>:<dimension>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldKey(String);

impl WorldKey {
    pub fn new(host: &str, port: u16, dimension: &str) -> Self {
        Self(format!("{}:{}:{}", host, port, dimension))
    }

    /// Wrap an already formatted key, e.g. one read from the registry file.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The dimension component (everything after the second colon).
    pub fn dimension(&self) -> Option<&str> {
        self.0.splitn(3, ':').nth(2)
    }
}

impl fmt::Display for WorldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A labeled container, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub forbidden: bool,
    #[serde(rename = "type")]
    pub kind: ContainerKind,
    pub positions: Vec<Coord>,
    pub primary: Coord,
    pub world_key: WorldKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub destroyed: bool,
}

impl ContainerRecord {
    /// Whether the record occupies `coord` (either half of a composite counts).
    pub fn occupies(&self, coord: Coord) -> bool {
        self.positions.contains(&coord)
    }

    /// Case-insensitive comparison against an already normalized label.
    pub(crate) fn label_matches(&self, normalized: &str) -> bool {
        normalize_label(&self.label) == normalized
    }

    /// Visible to label lookups and listings.
    pub fn is_live(&self) -> bool {
        !self.destroyed && !self.forbidden
    }
}

/// Trim and lowercase a label for comparison.
pub fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

/// Caller-supplied values for [`crate::registry::RegistryStore::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDraft {
    pub label: String,
    pub notes: Option<String>,
    pub hidden: bool,
    pub forbidden: bool,
    pub kind: ContainerKind,
    pub positions: Vec<Coord>,
    pub dimension: Option<String>,
}

impl RecordDraft {
    pub fn new(label: impl Into<String>, kind: ContainerKind, positions: Vec<Coord>) -> Self {
        Self {
            label: label.into(),
            notes: None,
            hidden: false,
            forbidden: false,
            kind,
            positions,
            dimension: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn forbidden(mut self, forbidden: bool) -> Self {
        self.forbidden = forbidden;
        self
    }

    pub fn in_dimension(mut self, dimension: impl Into<String>) -> Self {
        self.dimension = Some(dimension.into());
        self
    }
}

/// How a record is addressed by `remove` and `mark_destroyed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSelector {
    Id(String),
    Label(String),
}

/// Records of one world.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldRecords {
    #[serde(default)]
    pub records: Vec<ContainerRecord>,
}

/// The persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootRegistry {
    pub version: u32,
    #[serde(default)]
    pub worlds: BTreeMap<WorldKey, WorldRecords>,
}

impl Default for RootRegistry {
    fn default() -> Self {
        Self {
            version: RegistryConfig::SCHEMA_VERSION,
            worlds: BTreeMap::new(),
        }
    }
}
