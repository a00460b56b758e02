// Occupancy grid: who stands where, and who has promised to move where.
//
// One `CellState` per map cell, flat row-major. The occupant is a tagged
// slot into the unit or structure pool; multi-cell structures mark every
// blocked sub-cell and flag exactly one of them as the anchor, so whole-map
// sweeps can visit each structure once.
//
// Movement is a three-phase protocol. `pre_move` validates a single step
// and reserves the destination cell; `post_move` commits the mover into it
// and releases the reservation; `abort_move` releases without committing.
// Reservations are what keep two movers from converging on the same cell
// between ticks: a vehicle reservation closes the cell outright, infantry
// reservations count toward the 5-per-cell limit alongside the infantry
// already standing there. First caller wins; later callers see the
// reservation and fail their own `pre_move`.
//
// **Critical constraint: determinism.** Cell state changes only through
// the operations below, in task execution order. Nothing here consults
// wall-clock time or any unordered container.
//
// See also: `pool.rs` for the records slots point at, `terrain.rs` for the
// combined cost function, `tasks.rs` for the movement task driving the
// protocol.

use crate::overlay::{Overlay, OverlayId, OverlayTable};
use crate::pool::{
    Structure, StructurePool, StructureSpec, Unit, UnitKind, UnitPool, UnitTemplate,
    WALL_LINK_EAST, WALL_LINK_NORTH, WALL_LINK_SOUTH, WALL_LINK_WEST,
};
use crate::terrain::{BLOCKED_THRESHOLD, TerrainMap};
use crate::types::{
    Cell, Direction, INFANTRY_PER_CELL, MapGeometry, PlayerId, StructureSlot, UnitSlot,
};
use serde::{Deserialize, Serialize};

/// What stands in a cell. Structures and walls record every blocked
/// sub-cell; units record the cell they are committed to (for infantry,
/// any one member of the cell's group).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Occupant {
    #[default]
    Empty,
    Unit(UnitSlot),
    Structure(StructureSlot),
    Wall(StructureSlot),
}

impl Occupant {
    pub fn is_empty(self) -> bool {
        matches!(self, Occupant::Empty)
    }
}

/// An outstanding movement promise on a cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reservation {
    #[default]
    None,
    /// 1..=5 infantry are mid-step into this cell.
    Infantry(u8),
    /// A vehicle is mid-step into this cell; nothing else may enter.
    Vehicle,
}

/// Full state of one map cell.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct CellState {
    pub occupant: Occupant,
    /// Set on exactly one sub-cell of each structure (and on every unit
    /// cell); whole-map sweeps visit each occupant once by testing it.
    pub anchor: bool,
    pub reservation: Reservation,
    /// Mirror of the overlay table: true iff the cell has entries there.
    pub has_overlay: bool,
}

/// A granted `pre_move` reservation: where the step lands and the per-tick
/// pixel offset that animates it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PreMove {
    pub dest: Cell,
    pub pixel_step: (i8, i8),
}

/// The per-cell occupancy state of a session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OccupancyGrid {
    geometry: MapGeometry,
    cells: Vec<CellState>,
    overlays: OverlayTable,
    /// Owner used by `tile_cost` to price friendly vs enemy units. Set per
    /// pathfinding/movement request.
    cost_owner: Option<PlayerId>,
}

impl OccupancyGrid {
    pub fn new(geometry: MapGeometry) -> Self {
        Self {
            geometry,
            cells: vec![CellState::default(); geometry.cell_count()],
            overlays: OverlayTable::new(),
            cost_owner: None,
        }
    }

    pub fn geometry(&self) -> MapGeometry {
        self.geometry
    }

    pub fn cell(&self, cell: Cell) -> &CellState {
        &self.cells[usize::from(cell.0)]
    }

    fn cell_mut(&mut self, cell: Cell) -> &mut CellState {
        &mut self.cells[usize::from(cell.0)]
    }

    /// Set the owner on whose behalf subsequent `tile_cost` queries are
    /// priced. Movement tasks set this before pathfinding and stepping.
    pub fn set_cost_context(&mut self, owner: PlayerId) {
        self.cost_owner = Some(owner);
    }

    pub fn is_reserved(&self, cell: Cell) -> bool {
        self.cell(cell).reservation != Reservation::None
    }

    /// True when nothing stands in the cell (reservations don't count).
    pub fn cell_is_free(&self, cell: Cell) -> bool {
        self.cell(cell).occupant.is_empty()
    }

    /// Occupancy surcharge of entering `cell`, added on top of the terrain
    /// base cost:
    ///
    /// - structure or wall: effectively blocked
    /// - reserved: 2 (someone is already headed here)
    /// - the excluded unit itself: 0
    /// - friendly unit (per the cost context): 2
    /// - any other unit: 10
    pub fn tile_cost(&self, cell: Cell, exclude: Option<UnitSlot>, units: &UnitPool) -> u16 {
        let state = self.cell(cell);
        match state.occupant {
            Occupant::Structure(_) | Occupant::Wall(_) => return 0xfff0,
            Occupant::Empty | Occupant::Unit(_) => {}
        }
        if state.reservation != Reservation::None {
            return 2;
        }
        if let Occupant::Unit(slot) = state.occupant {
            if exclude == Some(slot) {
                return 0;
            }
            let friendly = units
                .get(slot)
                .is_some_and(|unit| Some(unit.owner) == self.cost_owner);
            return if friendly { 2 } else { 10 };
        }
        0
    }

    // -----------------------------------------------------------------------
    // Unit creation and removal
    // -----------------------------------------------------------------------

    /// Create a unit at `cell`. Infantry join the cell's group at `subpos`
    /// (which must be free, with room left for movers mid-step into the
    /// cell); vehicles require an empty, unreserved cell. Returns `None`
    /// when the placement is invalid.
    pub fn create_unit(
        &mut self,
        units: &mut UnitPool,
        template: &UnitTemplate,
        owner: PlayerId,
        cell: Cell,
        subpos: u8,
        facing: u8,
    ) -> Option<UnitSlot> {
        if !self.geometry.contains(cell) {
            return None;
        }
        let state = *self.cell(cell);
        // Reserved cells have movers committed to arrive; spawning under
        // them would collide at their half-cell commit.
        let reserved = match state.reservation {
            Reservation::None => 0,
            Reservation::Infantry(n) => n,
            Reservation::Vehicle => return None,
        };
        let group = match template.kind {
            UnitKind::Vehicle => {
                if !state.occupant.is_empty() || reserved > 0 {
                    return None;
                }
                None
            }
            UnitKind::Infantry => match state.occupant {
                Occupant::Structure(_) | Occupant::Wall(_) => return None,
                Occupant::Unit(other) => {
                    let other = units.get(other)?;
                    let id = other.group?;
                    let members = units.group(id)?;
                    if !members.is_free(subpos) || members.count() + reserved >= INFANTRY_PER_CELL {
                        return None;
                    }
                    Some(id)
                }
                Occupant::Empty => {
                    if reserved >= INFANTRY_PER_CELL {
                        return None;
                    }
                    Some(units.create_group())
                }
            },
        };
        let slot = units.allocate(Unit {
            kind: template.kind,
            owner,
            cell,
            subpos: if template.kind == UnitKind::Infantry {
                subpos
            } else {
                0
            },
            facing,
            speed: template.speed,
            move_delay: template.move_delay,
            sight: template.sight,
            group,
        });
        if let Some(id) = group {
            if let Some(members) = units.group_mut(id) {
                members.insert(subpos, slot);
            }
        }
        let state = self.cell_mut(cell);
        state.occupant = Occupant::Unit(slot);
        state.anchor = true;
        Some(slot)
    }

    /// Remove a unit from the grid and release its record. Removing an
    /// already-removed slot is a no-op.
    pub fn remove_unit(&mut self, units: &mut UnitPool, slot: UnitSlot) -> bool {
        let Some(unit) = units.get(slot) else {
            return false;
        };
        let cell = unit.cell;
        let subpos = unit.subpos;
        let group = unit.group;

        match group {
            Some(id) => {
                let survivor = {
                    let Some(members) = units.group_mut(id) else {
                        return false;
                    };
                    members.remove(subpos);
                    members.first_member()
                };
                match survivor {
                    None => {
                        units.release_group(id);
                        let state = self.cell_mut(cell);
                        state.occupant = Occupant::Empty;
                        state.anchor = false;
                    }
                    Some(survivor) => {
                        // Keep the cell pointing at a live member.
                        let state = self.cell_mut(cell);
                        if state.occupant == Occupant::Unit(slot) {
                            state.occupant = Occupant::Unit(survivor);
                        }
                    }
                }
            }
            None => {
                let state = self.cell_mut(cell);
                if state.occupant == Occupant::Unit(slot) {
                    state.occupant = Occupant::Empty;
                    state.anchor = false;
                }
            }
        }
        units.release(slot).is_some()
    }

    // -----------------------------------------------------------------------
    // Structure creation and removal
    // -----------------------------------------------------------------------

    /// Place a structure with its footprint anchored at `cell` (top-left).
    /// Fails without side effects if any blocked sub-cell is off-map,
    /// occupied, or reserved by a mover mid-step.
    pub fn create_structure(
        &mut self,
        structures: &mut StructurePool,
        spec: StructureSpec,
        owner: PlayerId,
        cell: Cell,
    ) -> Option<StructureSlot> {
        let (x, y) = self.geometry.coords(cell);
        let footprint = &spec.footprint;

        // Validate the whole footprint before touching anything.
        for fy in 0..footprint.height {
            for fx in 0..footprint.width {
                if !footprint.is_blocked(fx, fy) {
                    continue;
                }
                let sub = self
                    .geometry
                    .cell_at(x.checked_add(u16::from(fx))?, y.checked_add(u16::from(fy))?)?;
                let state = self.cell(sub);
                // A reserved sub-cell has a mover committed to arrive; the
                // footprint must not be laid under it.
                if !state.occupant.is_empty() || state.reservation != Reservation::None {
                    return None;
                }
            }
        }

        let slot = structures.allocate(Structure {
            footprint: spec.footprint.clone(),
            is_wall: spec.is_wall,
            sight: spec.sight,
            cell,
            owner,
            wall_links: 0,
        });

        // Mark blocked sub-cells; the anchor goes on the last one in scan
        // order (the lower-right-most blocked sub-cell).
        let mut anchor = None;
        for fy in 0..spec.footprint.height {
            for fx in 0..spec.footprint.width {
                if !spec.footprint.is_blocked(fx, fy) {
                    continue;
                }
                let sub = self
                    .geometry
                    .cell_at(x + u16::from(fx), y + u16::from(fy))
                    .unwrap_or(cell);
                self.cell_mut(sub).occupant = if spec.is_wall {
                    Occupant::Wall(slot)
                } else {
                    Occupant::Structure(slot)
                };
                anchor = Some(sub);
            }
        }
        if let Some(anchor) = anchor {
            self.cell_mut(anchor).anchor = true;
        }

        if spec.is_wall {
            self.link_wall(structures, slot, cell);
        }
        Some(slot)
    }

    /// Remove a structure, clearing every sub-cell it blocked. Removing a
    /// stale slot is a no-op.
    pub fn remove_structure(&mut self, structures: &mut StructurePool, slot: StructureSlot) -> bool {
        let Some(structure) = structures.release(slot) else {
            return false;
        };
        let (x, y) = self.geometry.coords(structure.cell);
        for fy in 0..structure.footprint.height {
            for fx in 0..structure.footprint.width {
                if !structure.footprint.is_blocked(fx, fy) {
                    continue;
                }
                if let Some(sub) = self.geometry.cell_at(x + u16::from(fx), y + u16::from(fy)) {
                    let state = self.cell_mut(sub);
                    let matches_slot = match state.occupant {
                        Occupant::Structure(s) | Occupant::Wall(s) => s == slot,
                        _ => false,
                    };
                    if matches_slot {
                        state.occupant = Occupant::Empty;
                        state.anchor = false;
                    }
                }
            }
        }
        if structure.is_wall {
            self.unlink_wall(structures, structure.cell);
        }
        true
    }

    /// Connect a newly placed wall to cardinal neighbors that are walls,
    /// updating both sides' link bits.
    fn link_wall(&mut self, structures: &mut StructurePool, slot: StructureSlot, cell: Cell) {
        for (dir, own_bit, their_bit) in CARDINAL_LINKS {
            let Some(neighbor) = self.geometry.neighbor(cell, dir) else {
                continue;
            };
            let Occupant::Wall(other) = self.cell(neighbor).occupant else {
                continue;
            };
            if let Some(record) = structures.get_mut(other) {
                record.wall_links |= their_bit;
            }
            if let Some(record) = structures.get_mut(slot) {
                record.wall_links |= own_bit;
            }
        }
    }

    /// Clear the link bits neighbors held toward a wall that was removed
    /// from `cell`.
    fn unlink_wall(&mut self, structures: &mut StructurePool, cell: Cell) {
        for (dir, _, their_bit) in CARDINAL_LINKS {
            let Some(neighbor) = self.geometry.neighbor(cell, dir) else {
                continue;
            };
            let Occupant::Wall(other) = self.cell(neighbor).occupant else {
                continue;
            };
            if let Some(record) = structures.get_mut(other) {
                record.wall_links &= !their_bit;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Movement reservation protocol
    // -----------------------------------------------------------------------

    /// Phase 1: validate a one-cell step in `dir` and reserve the
    /// destination. Returns `None` (leaving no reservation) when the step
    /// is off-map, too costly, or the destination cannot take the mover.
    pub fn pre_move(
        &mut self,
        units: &UnitPool,
        terrain: &TerrainMap,
        slot: UnitSlot,
        dir: Direction,
    ) -> Option<PreMove> {
        let unit = units.get(slot)?;
        let dest = self.geometry.neighbor(unit.cell, dir)?;
        if terrain.cost(dest, self, units, Some(slot)) > BLOCKED_THRESHOLD {
            return None;
        }

        let state = self.cell(dest);
        let reservation = match unit.kind {
            UnitKind::Vehicle => {
                // Vehicles need the cell entirely to themselves.
                if !state.occupant.is_empty() || state.reservation != Reservation::None {
                    return None;
                }
                Reservation::Vehicle
            }
            UnitKind::Infantry => {
                let present = match state.occupant {
                    Occupant::Structure(_) | Occupant::Wall(_) => return None,
                    Occupant::Unit(other) => {
                        let record = units.get(other)?;
                        if record.kind != UnitKind::Infantry || record.owner != unit.owner {
                            return None;
                        }
                        units.cell_population(other)
                    }
                    Occupant::Empty => 0,
                };
                let reserved = match state.reservation {
                    Reservation::None => 0,
                    Reservation::Infantry(n) => n,
                    Reservation::Vehicle => return None,
                };
                if present + reserved >= INFANTRY_PER_CELL {
                    return None;
                }
                Reservation::Infantry(reserved + 1)
            }
        };

        let pixel_step = dir.pixel_step(unit.speed);
        self.cell_mut(dest).reservation = reservation;
        Some(PreMove { dest, pixel_step })
    }

    /// Phase 2: commit the mover into `dest`, consuming its reservation.
    /// The unit leaves its old cell and joins (or founds) the destination's
    /// group. Returns the unit's new sub-position.
    pub fn post_move(&mut self, units: &mut UnitPool, slot: UnitSlot, dest: Cell) -> Option<u8> {
        let unit = units.get(slot)?;
        let old = unit.cell;
        let kind = unit.kind;
        let subpos = unit.subpos;
        let group = unit.group;

        match kind {
            UnitKind::Infantry => {
                // Leave the old cell's group.
                let id = group?;
                let survivor = {
                    let members = units.group_mut(id)?;
                    members.remove(subpos);
                    members.first_member()
                };
                match survivor {
                    None => {
                        units.release_group(id);
                        let state = self.cell_mut(old);
                        state.occupant = Occupant::Empty;
                        state.anchor = false;
                    }
                    Some(survivor) => {
                        let state = self.cell_mut(old);
                        if state.occupant == Occupant::Unit(slot) {
                            state.occupant = Occupant::Unit(survivor);
                        }
                    }
                }

                // Release one infantry reservation on the destination.
                {
                    let state = self.cell_mut(dest);
                    state.reservation = match state.reservation {
                        Reservation::Infantry(1) => Reservation::None,
                        Reservation::Infantry(n) => Reservation::Infantry(n - 1),
                        other => {
                            debug_assert!(
                                false,
                                "post_move without infantry reservation: {other:?}"
                            );
                            other
                        }
                    };
                }

                // Join the destination.
                let (new_group, new_subpos) = match self.cell(dest).occupant {
                    Occupant::Unit(other) => {
                        let id = units.get(other)?.group?;
                        let new_subpos = units.group(id)?.first_free()?;
                        units.group_mut(id)?.insert(new_subpos, slot);
                        (id, new_subpos)
                    }
                    Occupant::Empty => {
                        let id = units.create_group();
                        units.group_mut(id)?.insert(0, slot);
                        let state = self.cell_mut(dest);
                        state.occupant = Occupant::Unit(slot);
                        state.anchor = true;
                        (id, 0)
                    }
                    Occupant::Structure(_) | Occupant::Wall(_) => {
                        debug_assert!(false, "post_move into a structure cell");
                        return None;
                    }
                };
                let unit = units.get_mut(slot)?;
                unit.cell = dest;
                unit.group = Some(new_group);
                unit.subpos = new_subpos;
                Some(new_subpos)
            }
            UnitKind::Vehicle => {
                {
                    let state = self.cell_mut(old);
                    if state.occupant == Occupant::Unit(slot) {
                        state.occupant = Occupant::Empty;
                        state.anchor = false;
                    }
                }
                let state = self.cell_mut(dest);
                debug_assert_eq!(state.reservation, Reservation::Vehicle);
                state.reservation = Reservation::None;
                state.occupant = Occupant::Unit(slot);
                state.anchor = true;
                let unit = units.get_mut(slot)?;
                unit.cell = dest;
                unit.subpos = 0;
                Some(0)
            }
        }
    }

    /// Phase 3: release a reservation on `dest` without committing. Takes
    /// the mover's kind rather than its slot so a task can clean up even
    /// after the unit record is gone. Safe to call when no reservation is
    /// held; that is a no-op.
    pub fn abort_move(&mut self, kind: UnitKind, dest: Cell) {
        if self.cell(dest).reservation == Reservation::None {
            return;
        }
        let state = self.cell_mut(dest);
        state.reservation = match (kind, state.reservation) {
            (UnitKind::Infantry, Reservation::Infantry(1)) => Reservation::None,
            (UnitKind::Infantry, Reservation::Infantry(n)) => Reservation::Infantry(n - 1),
            (UnitKind::Vehicle, Reservation::Vehicle) => Reservation::None,
            (_, other) => other,
        };
    }

    /// Drop every outstanding reservation. Used when restoring a snapshot,
    /// where the tasks that held them no longer exist.
    pub fn clear_reservations(&mut self) {
        for state in &mut self.cells {
            state.reservation = Reservation::None;
        }
    }

    // -----------------------------------------------------------------------
    // Overlays
    // -----------------------------------------------------------------------

    pub fn add_overlay(&mut self, cell: Cell, overlay: Overlay) -> OverlayId {
        let id = self.overlays.add(cell, overlay);
        self.cell_mut(cell).has_overlay = true;
        id
    }

    pub fn remove_overlay(&mut self, id: OverlayId) -> bool {
        match self.overlays.remove(id) {
            Some(cell) => {
                self.cell_mut(cell).has_overlay = self.overlays.cell_has_overlays(cell);
                true
            }
            None => false,
        }
    }

    pub fn overlays_at(&self, cell: Cell) -> impl Iterator<Item = &Overlay> {
        self.overlays.at_cell(cell)
    }
}

const CARDINAL_LINKS: [(Direction, u8, u8); 4] = [
    (Direction::North, WALL_LINK_NORTH, WALL_LINK_SOUTH),
    (Direction::East, WALL_LINK_EAST, WALL_LINK_WEST),
    (Direction::South, WALL_LINK_SOUTH, WALL_LINK_NORTH),
    (Direction::West, WALL_LINK_WEST, WALL_LINK_EAST),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::TerrainKind;

    fn world() -> (MapGeometry, TerrainMap, OccupancyGrid, UnitPool, StructurePool) {
        let geo = MapGeometry::new(8, 8);
        (
            geo,
            TerrainMap::new(geo, TerrainKind::Land),
            OccupancyGrid::new(geo),
            UnitPool::new(),
            StructurePool::new(),
        )
    }

    fn infantry_template() -> UnitTemplate {
        UnitTemplate {
            kind: UnitKind::Infantry,
            speed: 2,
            move_delay: 3,
            sight: 4,
        }
    }

    fn vehicle_template() -> UnitTemplate {
        UnitTemplate {
            kind: UnitKind::Vehicle,
            speed: 3,
            move_delay: 2,
            sight: 5,
        }
    }

    #[test]
    fn vehicle_full_step_round_trip() {
        let (geo, terrain, mut grid, mut units, _) = world();
        let start = geo.cell_at(2, 2).unwrap();
        let slot = grid
            .create_unit(&mut units, &vehicle_template(), PlayerId(0), start, 0, 0)
            .unwrap();

        let step = grid.pre_move(&units, &terrain, slot, Direction::East).unwrap();
        let dest = geo.cell_at(3, 2).unwrap();
        assert_eq!(step.dest, dest);
        assert_eq!(step.pixel_step, (3, 0));
        assert_eq!(grid.cell(dest).reservation, Reservation::Vehicle);
        // Still standing on the start cell until commit.
        assert_eq!(grid.cell(start).occupant, Occupant::Unit(slot));

        grid.post_move(&mut units, slot, dest).unwrap();
        assert_eq!(grid.cell(start).occupant, Occupant::Empty);
        assert_eq!(grid.cell(dest).occupant, Occupant::Unit(slot));
        assert_eq!(grid.cell(dest).reservation, Reservation::None);
        assert_eq!(units.get(slot).unwrap().cell, dest);
    }

    #[test]
    fn abort_releases_reservation() {
        let (geo, terrain, mut grid, mut units, _) = world();
        let start = geo.cell_at(2, 2).unwrap();
        let slot = grid
            .create_unit(&mut units, &vehicle_template(), PlayerId(0), start, 0, 0)
            .unwrap();
        let step = grid.pre_move(&units, &terrain, slot, Direction::South).unwrap();
        grid.abort_move(UnitKind::Vehicle, step.dest);
        assert!(!grid.is_reserved(step.dest));
        // Aborting again is harmless.
        grid.abort_move(UnitKind::Vehicle, step.dest);
        assert!(!grid.is_reserved(step.dest));
    }

    #[test]
    fn first_reservation_wins() {
        let (geo, terrain, mut grid, mut units, _) = world();
        let a = grid
            .create_unit(
                &mut units,
                &vehicle_template(),
                PlayerId(0),
                geo.cell_at(2, 2).unwrap(),
                0,
                0,
            )
            .unwrap();
        let b = grid
            .create_unit(
                &mut units,
                &vehicle_template(),
                PlayerId(0),
                geo.cell_at(4, 2).unwrap(),
                0,
                0,
            )
            .unwrap();
        // Both aim at (3, 2); only the first reservation is granted.
        assert!(grid.pre_move(&units, &terrain, a, Direction::East).is_some());
        assert!(grid.pre_move(&units, &terrain, b, Direction::West).is_none());
    }

    #[test]
    fn infantry_share_cells_up_to_five() {
        let (geo, terrain, mut grid, mut units, _) = world();
        let dest = geo.cell_at(3, 3).unwrap();
        // Four infantry already committed in the destination cell.
        for subpos in 0..4 {
            grid.create_unit(
                &mut units,
                &infantry_template(),
                PlayerId(0),
                dest,
                subpos,
                0,
            )
            .unwrap();
        }
        let a = grid
            .create_unit(
                &mut units,
                &infantry_template(),
                PlayerId(0),
                geo.cell_at(2, 3).unwrap(),
                0,
                0,
            )
            .unwrap();
        let b = grid
            .create_unit(
                &mut units,
                &infantry_template(),
                PlayerId(0),
                geo.cell_at(4, 3).unwrap(),
                0,
                0,
            )
            .unwrap();
        // The fifth place goes to the first caller; the sixth is refused.
        assert!(grid.pre_move(&units, &terrain, a, Direction::East).is_some());
        assert!(grid.pre_move(&units, &terrain, b, Direction::West).is_none());
    }

    #[test]
    fn infantry_rejects_vehicle_and_enemy_cells() {
        let (geo, terrain, mut grid, mut units, _) = world();
        let mover = grid
            .create_unit(
                &mut units,
                &infantry_template(),
                PlayerId(0),
                geo.cell_at(1, 1).unwrap(),
                0,
                0,
            )
            .unwrap();
        // Enemy infantry east of the mover.
        grid.create_unit(
            &mut units,
            &infantry_template(),
            PlayerId(1),
            geo.cell_at(2, 1).unwrap(),
            0,
            0,
        )
        .unwrap();
        // Friendly vehicle south of the mover.
        grid.create_unit(
            &mut units,
            &vehicle_template(),
            PlayerId(0),
            geo.cell_at(1, 2).unwrap(),
            0,
            0,
        )
        .unwrap();
        assert!(grid.pre_move(&units, &terrain, mover, Direction::East).is_none());
        assert!(grid.pre_move(&units, &terrain, mover, Direction::South).is_none());
        assert!(grid.pre_move(&units, &terrain, mover, Direction::North).is_some());
    }

    #[test]
    fn vehicle_rejects_reserved_cell() {
        let (geo, terrain, mut grid, mut units, _) = world();
        let walker = grid
            .create_unit(
                &mut units,
                &infantry_template(),
                PlayerId(0),
                geo.cell_at(2, 2).unwrap(),
                0,
                0,
            )
            .unwrap();
        let driver = grid
            .create_unit(
                &mut units,
                &vehicle_template(),
                PlayerId(0),
                geo.cell_at(4, 2).unwrap(),
                0,
                0,
            )
            .unwrap();
        // Infantry reserves (3, 2) first; the vehicle may not follow.
        assert!(grid.pre_move(&units, &terrain, walker, Direction::East).is_some());
        assert!(grid.pre_move(&units, &terrain, driver, Direction::West).is_none());
    }

    #[test]
    fn infantry_post_move_joins_destination_group() {
        let (geo, terrain, mut grid, mut units, _) = world();
        let dest = geo.cell_at(3, 3).unwrap();
        let resident = grid
            .create_unit(&mut units, &infantry_template(), PlayerId(0), dest, 0, 0)
            .unwrap();
        let start = geo.cell_at(2, 3).unwrap();
        let mover = grid
            .create_unit(&mut units, &infantry_template(), PlayerId(0), start, 0, 0)
            .unwrap();

        let step = grid.pre_move(&units, &terrain, mover, Direction::East).unwrap();
        let subpos = grid.post_move(&mut units, mover, step.dest).unwrap();

        // Mover took the lowest free sub-position after the resident.
        assert_eq!(subpos, 1);
        assert_eq!(units.get(mover).unwrap().cell, dest);
        assert_eq!(units.get(mover).unwrap().group, units.get(resident).unwrap().group);
        assert_eq!(grid.cell(start).occupant, Occupant::Empty);
        // The cell keeps pointing at the original resident.
        assert_eq!(grid.cell(dest).occupant, Occupant::Unit(resident));
        assert_eq!(grid.cell(dest).reservation, Reservation::None);
    }

    #[test]
    fn removing_group_representative_retargets_cell() {
        let (geo, _, mut grid, mut units, _) = world();
        let cell = geo.cell_at(3, 3).unwrap();
        let first = grid
            .create_unit(&mut units, &infantry_template(), PlayerId(0), cell, 0, 0)
            .unwrap();
        let second = grid
            .create_unit(&mut units, &infantry_template(), PlayerId(0), cell, 1, 0)
            .unwrap();
        // Creation left the cell pointing at the newest member.
        assert_eq!(grid.cell(cell).occupant, Occupant::Unit(second));

        assert!(grid.remove_unit(&mut units, second));
        assert_eq!(grid.cell(cell).occupant, Occupant::Unit(first));

        assert!(grid.remove_unit(&mut units, first));
        assert_eq!(grid.cell(cell).occupant, Occupant::Empty);
        // Double removal is a no-op.
        assert!(!grid.remove_unit(&mut units, first));
    }

    #[test]
    fn structure_footprint_marks_blocked_subcells_only() {
        let (geo, _, mut grid, units, mut structures) = world();
        // 2x2 footprint with a passable lower-left sub-cell.
        let spec = StructureSpec {
            footprint: crate::pool::Footprint::new(2, 2, [true, true, false, true]),
            is_wall: false,
            sight: 3,
        };
        let cell = geo.cell_at(2, 2).unwrap();
        let slot = grid
            .create_structure(&mut structures, spec, PlayerId(0), cell)
            .unwrap();

        assert_eq!(grid.cell(geo.cell_at(2, 2).unwrap()).occupant, Occupant::Structure(slot));
        assert_eq!(grid.cell(geo.cell_at(3, 2).unwrap()).occupant, Occupant::Structure(slot));
        assert_eq!(grid.cell(geo.cell_at(2, 3).unwrap()).occupant, Occupant::Empty);
        assert_eq!(grid.cell(geo.cell_at(3, 3).unwrap()).occupant, Occupant::Structure(slot));
        // Exactly one anchor, on the lower-right-most blocked sub-cell.
        let anchors = [(2u16, 2u16), (3, 2), (3, 3)]
            .iter()
            .filter(|(x, y)| grid.cell(geo.cell_at(*x, *y).unwrap()).anchor)
            .count();
        assert_eq!(anchors, 1);
        assert!(grid.cell(geo.cell_at(3, 3).unwrap()).anchor);

        assert_eq!(grid.tile_cost(cell, None, &units), 0xfff0);
        assert!(grid.remove_structure(&mut structures, slot));
        assert_eq!(grid.cell(cell).occupant, Occupant::Empty);
        assert_eq!(grid.tile_cost(cell, None, &units), 0);
    }

    #[test]
    fn structure_placement_fails_atomically() {
        let (geo, _, mut grid, mut units, mut structures) = world();
        // A unit sits where the footprint's second column would land.
        grid.create_unit(
            &mut units,
            &vehicle_template(),
            PlayerId(0),
            geo.cell_at(3, 2).unwrap(),
            0,
            0,
        )
        .unwrap();
        let spec = StructureSpec::building(2, 1, 3);
        let result =
            grid.create_structure(&mut structures, spec, PlayerId(0), geo.cell_at(2, 2).unwrap());
        assert!(result.is_none());
        // The free first column was not marked.
        assert_eq!(grid.cell(geo.cell_at(2, 2).unwrap()).occupant, Occupant::Empty);
    }

    #[test]
    fn structure_placement_rejects_reserved_cells() {
        let (geo, terrain, mut grid, mut units, mut structures) = world();
        let slot = grid
            .create_unit(
                &mut units,
                &infantry_template(),
                PlayerId(0),
                geo.cell_at(3, 1).unwrap(),
                0,
                0,
            )
            .unwrap();
        // The mover is committed to (3, 2); a structure there would make
        // its half-cell commit land inside a building.
        let step = grid.pre_move(&units, &terrain, slot, Direction::South).unwrap();
        assert_eq!(step.dest, geo.cell_at(3, 2).unwrap());

        let spec = StructureSpec::building(1, 1, 3);
        assert!(
            grid.create_structure(&mut structures, spec, PlayerId(0), step.dest)
                .is_none()
        );
        assert!(grid.cell(step.dest).occupant.is_empty());

        // Once the reservation is released the same placement goes through.
        grid.abort_move(UnitKind::Infantry, step.dest);
        let spec = StructureSpec::building(1, 1, 3);
        assert!(
            grid.create_structure(&mut structures, spec, PlayerId(0), step.dest)
                .is_some()
        );
    }

    #[test]
    fn unit_creation_rejects_reserved_cells() {
        let (geo, terrain, mut grid, mut units, _) = world();
        let mover = grid
            .create_unit(
                &mut units,
                &vehicle_template(),
                PlayerId(0),
                geo.cell_at(2, 2).unwrap(),
                0,
                0,
            )
            .unwrap();
        let step = grid.pre_move(&units, &terrain, mover, Direction::East).unwrap();

        // Neither kind may spawn under a vehicle reservation.
        assert!(
            grid.create_unit(&mut units, &vehicle_template(), PlayerId(0), step.dest, 0, 0)
                .is_none()
        );
        assert!(
            grid.create_unit(&mut units, &infantry_template(), PlayerId(0), step.dest, 0, 0)
                .is_none()
        );

        grid.abort_move(UnitKind::Vehicle, step.dest);
        assert!(
            grid.create_unit(&mut units, &vehicle_template(), PlayerId(0), step.dest, 0, 0)
                .is_some()
        );
    }

    #[test]
    fn walls_link_to_cardinal_neighbors() {
        let (geo, _, mut grid, _, mut structures) = world();
        let west = grid
            .create_structure(
                &mut structures,
                StructureSpec::wall(),
                PlayerId(0),
                geo.cell_at(2, 2).unwrap(),
            )
            .unwrap();
        let east = grid
            .create_structure(
                &mut structures,
                StructureSpec::wall(),
                PlayerId(0),
                geo.cell_at(3, 2).unwrap(),
            )
            .unwrap();

        assert_eq!(structures.get(west).unwrap().wall_links, WALL_LINK_EAST);
        assert_eq!(structures.get(east).unwrap().wall_links, WALL_LINK_WEST);

        assert!(grid.remove_structure(&mut structures, east));
        assert_eq!(structures.get(west).unwrap().wall_links, 0);
    }

    #[test]
    fn tile_cost_prices_reservations_and_owners() {
        let (geo, terrain, mut grid, mut units, _) = world();
        let friendly = grid
            .create_unit(
                &mut units,
                &vehicle_template(),
                PlayerId(0),
                geo.cell_at(1, 1).unwrap(),
                0,
                0,
            )
            .unwrap();
        let enemy = grid
            .create_unit(
                &mut units,
                &vehicle_template(),
                PlayerId(1),
                geo.cell_at(5, 5).unwrap(),
                0,
                0,
            )
            .unwrap();
        grid.set_cost_context(PlayerId(0));

        let friendly_cell = units.get(friendly).unwrap().cell;
        let enemy_cell = units.get(enemy).unwrap().cell;
        assert_eq!(grid.tile_cost(friendly_cell, None, &units), 2);
        assert_eq!(grid.tile_cost(enemy_cell, None, &units), 10);
        // The mover itself costs nothing.
        assert_eq!(grid.tile_cost(friendly_cell, Some(friendly), &units), 0);

        // A reserved empty cell costs 2.
        let step = grid.pre_move(&units, &terrain, friendly, Direction::East).unwrap();
        assert_eq!(grid.tile_cost(step.dest, None, &units), 2);
    }

    #[test]
    fn overlay_flag_tracks_table() {
        let (geo, _, mut grid, _, _) = world();
        let cell = geo.cell_at(4, 4).unwrap();
        let a = grid.add_overlay(cell, Overlay::single(7));
        let b = grid.add_overlay(cell, Overlay::single(8));
        assert!(grid.cell(cell).has_overlay);
        assert!(grid.remove_overlay(a));
        assert!(grid.cell(cell).has_overlay);
        assert!(grid.remove_overlay(b));
        assert!(!grid.cell(cell).has_overlay);
        assert!(!grid.remove_overlay(b));
    }

    #[test]
    fn grid_serialization_round_trip() {
        let (geo, _, mut grid, mut units, _) = world();
        let cell = geo.cell_at(2, 2).unwrap();
        let slot = grid
            .create_unit(&mut units, &vehicle_template(), PlayerId(0), cell, 0, 0)
            .unwrap();
        let bytes = bincode::serialize(&grid).unwrap();
        let restored: OccupancyGrid = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored.cell(cell).occupant, Occupant::Unit(slot));
    }
}
