//! Turns block observations into addressable containers.
//!
//! Chests and trapped chests pair with an identical horizontal neighbour into
//! one composite container; every other container block maps 1:1 to a kind.

use crate::config::AccessConfig;
use crate::registry::{ContainerKind, Coord};
use crate::world::BlockView;
use crate::{Result, StashError};
use std::collections::HashSet;
use tracing::debug;

/// Pairable blocks: (name, kind when alone, kind when paired).
const PAIRABLE: &[(&str, ContainerKind, ContainerKind)] = &[
    ("chest", ContainerKind::Single, ContainerKind::Double),
    ("trapped_chest", ContainerKind::Trapped, ContainerKind::Trapped),
];

/// Blocks that are always a single-cell container.
const FIXED: &[(&str, ContainerKind)] = &[
    ("barrel", ContainerKind::Barrel),
    ("ender_chest", ContainerKind::Ender),
    ("shulker_box", ContainerKind::Shulker),
    ("hopper", ContainerKind::Generic),
    ("dropper", ContainerKind::Generic),
    ("dispenser", ContainerKind::Generic),
];

const SHULKER_SUFFIX: &str = "_shulker_box";

/// Strip a `minecraft:` style namespace.
fn base_name(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, base)| base).unwrap_or(name)
}

/// How a block name takes part in classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockClass {
    Pairable {
        single: ContainerKind,
        paired: ContainerKind,
    },
    Fixed(ContainerKind),
}

/// Look up a block name in the container tables.
pub fn block_class(name: &str) -> Option<BlockClass> {
    let name = base_name(name);

    if let Some(&(_, single, paired)) = PAIRABLE.iter().find(|(n, _, _)| *n == name) {
        return Some(BlockClass::Pairable { single, paired });
    }
    if let Some(&(_, kind)) = FIXED.iter().find(|(n, _)| *n == name) {
        return Some(BlockClass::Fixed(kind));
    }
    if name.ends_with(SHULKER_SUFFIX) {
        return Some(BlockClass::Fixed(ContainerKind::Shulker));
    }
    None
}

/// A classified container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: ContainerKind,
    /// Member coordinates, ascending.
    pub positions: Vec<Coord>,
    /// Smallest member coordinate.
    pub primary: Coord,
}

impl Classification {
    fn single(kind: ContainerKind, at: Coord) -> Self {
        Self {
            kind,
            positions: vec![at],
            primary: at,
        }
    }

    fn pair(kind: ContainerKind, a: Coord, b: Coord) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self {
            kind,
            positions: vec![first, second],
            primary: first,
        }
    }

    pub fn is_composite(&self) -> bool {
        self.positions.len() > 1
    }
}

/// Classify the block at `position`.
///
/// Fails with [`StashError::NotAContainer`] when the block is unknown or not
/// a container.
pub fn classify<W: BlockView + ?Sized>(world: &W, position: Coord) -> Result<Classification> {
    classify_with(world, position, |_| false)
}

/// Like [`classify`], but never pairs with a neighbour for which `claimed`
/// returns true.
fn classify_with<W: BlockView + ?Sized>(
    world: &W,
    position: Coord,
    claimed: impl Fn(Coord) -> bool,
) -> Result<Classification> {
    let name = world.block_name(position);
    let Some(class) = name.as_deref().and_then(block_class) else {
        return Err(StashError::NotAContainer {
            position,
            block: name,
        });
    };

    match class {
        BlockClass::Fixed(kind) => Ok(Classification::single(kind, position)),
        BlockClass::Pairable { single, paired } => {
            let name = name.as_deref().map(base_name);
            let partner = position.horizontal_neighbors().find(|n| {
                !claimed(*n) && world.block_name(*n).as_deref().map(base_name) == name
            });

            Ok(match partner {
                Some(partner) => Classification::pair(paired, position, partner),
                None => Classification::single(single, position),
            })
        }
    }
}

/// Inclusive axis-aligned box of block coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: Coord,
    pub max: Coord,
}

impl Bounds {
    /// Box spanning two corners in any order.
    pub fn new(a: Coord, b: Coord) -> Self {
        Self {
            min: Coord::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Coord::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// Cube of half-width `radius` around `center`.
    pub fn around(center: Coord, radius: u32) -> Self {
        let r = i32::try_from(radius).unwrap_or(i32::MAX);
        Self::new(
            Coord::new(
                center.x.saturating_sub(r),
                center.y.saturating_sub(r),
                center.z.saturating_sub(r),
            ),
            Coord::new(
                center.x.saturating_add(r),
                center.y.saturating_add(r),
                center.z.saturating_add(r),
            ),
        )
    }

    pub fn volume(&self) -> u64 {
        let span = |lo: i32, hi: i32| u64::from(hi.abs_diff(lo)) + 1;
        span(self.min.x, self.max.x)
            .saturating_mul(span(self.min.y, self.max.y))
            .saturating_mul(span(self.min.z, self.max.z))
    }

    pub fn contains(&self, c: Coord) -> bool {
        (self.min.x..=self.max.x).contains(&c.x)
            && (self.min.y..=self.max.y).contains(&c.y)
            && (self.min.z..=self.max.z).contains(&c.z)
    }

    /// Every coordinate, x outermost, then y, then z.
    pub fn iter(&self) -> impl Iterator<Item = Coord> + '_ {
        (self.min.x..=self.max.x).flat_map(move |x| {
            (self.min.y..=self.max.y)
                .flat_map(move |y| (self.min.z..=self.max.z).map(move |z| Coord::new(x, y, z)))
        })
    }
}

/// Find every container in `bounds`, reporting composites once.
pub fn scan<W: BlockView + ?Sized>(world: &W, bounds: Bounds) -> Result<Vec<Classification>> {
    if bounds.volume() > AccessConfig::MAX_SCAN_BLOCKS {
        return Err(StashError::validation(
            "bounds",
            format!(
                "scan volume {} exceeds {} blocks",
                bounds.volume(),
                AccessConfig::MAX_SCAN_BLOCKS
            ),
        ));
    }

    let mut visited = HashSet::new();
    let mut found = Vec::new();

    for coord in bounds.iter() {
        if visited.contains(&coord) {
            continue;
        }
        let Ok(classification) = classify_with(world, coord, |c| visited.contains(&c)) else {
            continue;
        };
        visited.extend(classification.positions.iter().copied());
        found.push(classification);
    }

    debug!("Scanned {} blocks, found {} containers", bounds.volume(), found.len());
    Ok(found)
}
