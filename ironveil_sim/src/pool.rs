// Unit and structure pools — the slot-indexed arenas the grid points into.
//
// The occupancy grid stores only `(kind, slot)` pairs; the records
// themselves live here. Slots of deleted occupants are reused: allocation
// scans for the first free slot once anything has been deleted, otherwise
// appends. An infantry unit always belongs to an `InfantryGroup`, the
// 5-member roster shared by everyone in its cell; the grid's occupant index
// refers to any one member and the group is reached through it.
//
// Pools never touch cell flags directly — creation and removal go through
// `OccupancyGrid::create_*`/`remove_*`, which keep the cell state and the
// pool records in step.
//
// See also: `grid.rs` for the create/remove operations, `types.rs` for the
// slot identifier types.

use crate::types::{Cell, INFANTRY_PER_CELL, PlayerId, Tick, UnitSlot};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

/// Movement class of a unit. Infantry share cells in groups of up to 5;
/// vehicles occupy a cell exclusively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitKind {
    Infantry,
    Vehicle,
}

/// A unit record. Combat stats live with the (out of scope) weapons layer;
/// the sim core only needs what movement and sight require.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Unit {
    pub kind: UnitKind,
    pub owner: PlayerId,
    pub cell: Cell,
    /// Sub-position 0..4 within the cell. Meaningful for infantry only.
    pub subpos: u8,
    /// Facing in 32 steps, 0 = north.
    pub facing: u8,
    /// Pixels of sub-cell offset gained per movement tick.
    pub speed: i8,
    /// Ticks between movement task runs.
    pub move_delay: Tick,
    /// Sight radius in cells, for the owner's sight matrix.
    pub sight: u8,
    /// The infantry group this unit belongs to. `None` for vehicles.
    pub group: Option<GroupId>,
}

/// The stats a unit is created with; shared by every unit of one type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnitTemplate {
    pub kind: UnitKind,
    pub speed: i8,
    pub move_delay: Tick,
    pub sight: u8,
}

/// Index into the infantry group arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupId(pub u16);

/// Up to 5 infantry sharing one cell, addressed by sub-position.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InfantryGroup {
    members: [Option<UnitSlot>; INFANTRY_PER_CELL as usize],
}

impl InfantryGroup {
    pub fn count(&self) -> u8 {
        self.members.iter().filter(|m| m.is_some()).count() as u8
    }

    pub fn member_at(&self, subpos: u8) -> Option<UnitSlot> {
        self.members.get(usize::from(subpos)).copied().flatten()
    }

    pub fn is_free(&self, subpos: u8) -> bool {
        self.member_at(subpos).is_none()
    }

    /// Lowest free sub-position, or `None` when the group is full.
    pub fn first_free(&self) -> Option<u8> {
        self.members
            .iter()
            .position(|m| m.is_none())
            .map(|i| i as u8)
    }

    /// Any current member, lowest sub-position first.
    pub fn first_member(&self) -> Option<UnitSlot> {
        self.members.iter().copied().flatten().next()
    }

    pub fn insert(&mut self, subpos: u8, slot: UnitSlot) {
        debug_assert!(self.is_free(subpos), "sub-position already occupied");
        if let Some(member) = self.members.get_mut(usize::from(subpos)) {
            *member = Some(slot);
        }
    }

    pub fn remove(&mut self, subpos: u8) {
        if let Some(member) = self.members.get_mut(usize::from(subpos)) {
            *member = None;
        }
    }
}

/// All unit records, slot-addressed. Freed slots are reused.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UnitPool {
    units: Vec<Option<Unit>>,
    groups: Vec<Option<InfantryGroup>>,
    deleted_units: u16,
    deleted_groups: u16,
}

impl UnitPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: UnitSlot) -> Option<&Unit> {
        self.units.get(usize::from(slot.0))?.as_ref()
    }

    pub fn get_mut(&mut self, slot: UnitSlot) -> Option<&mut Unit> {
        self.units.get_mut(usize::from(slot.0))?.as_mut()
    }

    /// Store a new unit record, reusing an expired slot when one exists.
    pub fn allocate(&mut self, unit: Unit) -> UnitSlot {
        if self.deleted_units > 0 {
            if let Some(index) = self.units.iter().position(|u| u.is_none()) {
                self.units[index] = Some(unit);
                self.deleted_units -= 1;
                return UnitSlot(index as u16);
            }
        }
        self.units.push(Some(unit));
        UnitSlot((self.units.len() - 1) as u16)
    }

    /// Drop a unit record. Returns the record so callers can finish
    /// bookkeeping (group membership, cell flags).
    pub fn release(&mut self, slot: UnitSlot) -> Option<Unit> {
        let unit = self.units.get_mut(usize::from(slot.0))?.take();
        if unit.is_some() {
            self.deleted_units += 1;
        }
        unit
    }

    pub fn group(&self, id: GroupId) -> Option<&InfantryGroup> {
        self.groups.get(usize::from(id.0))?.as_ref()
    }

    pub fn group_mut(&mut self, id: GroupId) -> Option<&mut InfantryGroup> {
        self.groups.get_mut(usize::from(id.0))?.as_mut()
    }

    pub fn create_group(&mut self) -> GroupId {
        if self.deleted_groups > 0 {
            if let Some(index) = self.groups.iter().position(|g| g.is_none()) {
                self.groups[index] = Some(InfantryGroup::default());
                self.deleted_groups -= 1;
                return GroupId(index as u16);
            }
        }
        self.groups.push(Some(InfantryGroup::default()));
        GroupId((self.groups.len() - 1) as u16)
    }

    pub fn release_group(&mut self, id: GroupId) {
        if let Some(group) = self.groups.get_mut(usize::from(id.0)) {
            if group.take().is_some() {
                self.deleted_groups += 1;
            }
        }
    }

    /// Number of units sharing the cell the slot's unit stands in: the
    /// group size for infantry, 1 for vehicles.
    pub fn cell_population(&self, slot: UnitSlot) -> u8 {
        let Some(unit) = self.get(slot) else { return 0 };
        match unit.group {
            Some(id) => self.group(id).map_or(0, InfantryGroup::count),
            None => 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Structures
// ---------------------------------------------------------------------------

/// A structure's footprint: width x height sub-cells, each either blocked
/// (occupies its cell) or passable (bibs, gaps).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footprint {
    pub width: u8,
    pub height: u8,
    blocked: SmallVec<[bool; 9]>,
}

impl Footprint {
    pub fn new(width: u8, height: u8, blocked: impl IntoIterator<Item = bool>) -> Self {
        let blocked: SmallVec<[bool; 9]> = blocked.into_iter().collect();
        debug_assert_eq!(
            blocked.len(),
            usize::from(width) * usize::from(height),
            "footprint mask size mismatch"
        );
        Self {
            width,
            height,
            blocked,
        }
    }

    /// A fully blocked rectangular footprint.
    pub fn solid(width: u8, height: u8) -> Self {
        let count = usize::from(width) * usize::from(height);
        Self::new(width, height, std::iter::repeat(true).take(count))
    }

    /// 1x1 solid footprint (walls, pillbox-sized buildings).
    pub fn single() -> Self {
        Self::solid(1, 1)
    }

    pub fn is_blocked(&self, x: u8, y: u8) -> bool {
        self.blocked
            .get(usize::from(y) * usize::from(self.width) + usize::from(x))
            .copied()
            .unwrap_or(false)
    }
}

/// Wall link bits, one per cardinal neighbor holding a wall. Purely visual
/// wall-joining data; never consulted by movement.
pub const WALL_LINK_NORTH: u8 = 0x1;
pub const WALL_LINK_EAST: u8 = 0x2;
pub const WALL_LINK_SOUTH: u8 = 0x4;
pub const WALL_LINK_WEST: u8 = 0x8;

/// Parameters for creating a structure.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StructureSpec {
    pub footprint: Footprint,
    pub is_wall: bool,
    /// Sight radius granted to the owner around the footprint.
    pub sight: u8,
}

impl StructureSpec {
    pub fn wall() -> Self {
        Self {
            footprint: Footprint::single(),
            is_wall: true,
            sight: 1,
        }
    }

    pub fn building(width: u8, height: u8, sight: u8) -> Self {
        Self {
            footprint: Footprint::solid(width, height),
            is_wall: false,
            sight,
        }
    }
}

/// A structure record. `cell` is the anchor (top-left of the footprint as
/// placed); `wall_links` is maintained by the grid as neighboring walls
/// come and go.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Structure {
    pub footprint: Footprint,
    pub is_wall: bool,
    pub sight: u8,
    pub cell: Cell,
    pub owner: PlayerId,
    pub wall_links: u8,
}

/// All structure records, slot-addressed, walls included.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StructurePool {
    structures: Vec<Option<Structure>>,
    deleted: u16,
}

impl StructurePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: crate::types::StructureSlot) -> Option<&Structure> {
        self.structures.get(usize::from(slot.0))?.as_ref()
    }

    pub fn get_mut(&mut self, slot: crate::types::StructureSlot) -> Option<&mut Structure> {
        self.structures.get_mut(usize::from(slot.0))?.as_mut()
    }

    pub fn allocate(&mut self, structure: Structure) -> crate::types::StructureSlot {
        if self.deleted > 0 {
            if let Some(index) = self.structures.iter().position(|s| s.is_none()) {
                self.structures[index] = Some(structure);
                self.deleted -= 1;
                return crate::types::StructureSlot(index as u16);
            }
        }
        self.structures.push(Some(structure));
        crate::types::StructureSlot((self.structures.len() - 1) as u16)
    }

    pub fn release(&mut self, slot: crate::types::StructureSlot) -> Option<Structure> {
        let structure = self.structures.get_mut(usize::from(slot.0))?.take();
        if structure.is_some() {
            self.deleted += 1;
        }
        structure
    }
}
