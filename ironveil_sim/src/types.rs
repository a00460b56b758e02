// Core types shared across the simulation.
//
// Defines the flat cell index (`Cell`), the map coordinate math
// (`MapGeometry`), 8-way movement directions, and the compact slot
// identifiers that the grid stores in place of actual unit/structure
// records. All types derive `Serialize` and `Deserialize`.
//
// The map is a dense row-major grid: `Cell` is `y * width + x`. Every
// component that walks the map (grid, pathfinder, movement tasks) does its
// neighbor arithmetic through `MapGeometry` so bounds handling lives in one
// place.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulation time unit. Derived from quantized wall-clock time by
/// `GameClock`; monotonically non-decreasing within a session.
pub type Tick = u64;

/// Maximum number of infantry occupants sharing one cell.
pub const INFANTRY_PER_CELL: u8 = 5;

// ---------------------------------------------------------------------------
// Cells and map geometry
// ---------------------------------------------------------------------------

/// A map cell, addressed by flat row-major index `y * width + x`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell(pub u16);

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cell({})", self.0)
    }
}

/// Width/height of the map plus all coordinate arithmetic over flat cells.
///
/// Sized once at session start; cells are never created or destroyed after
/// that.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapGeometry {
    width: u16,
    height: u16,
}

impl MapGeometry {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn cell_count(&self) -> usize {
        usize::from(self.width) * usize::from(self.height)
    }

    pub fn contains(&self, cell: Cell) -> bool {
        usize::from(cell.0) < self.cell_count()
    }

    /// Build a cell from (x, y). Returns `None` outside the map.
    pub fn cell_at(&self, x: u16, y: u16) -> Option<Cell> {
        if x < self.width && y < self.height {
            Some(Cell(y * self.width + x))
        } else {
            None
        }
    }

    /// Split a flat cell back into (x, y).
    pub fn coords(&self, cell: Cell) -> (u16, u16) {
        (cell.0 % self.width, cell.0 / self.width)
    }

    /// The 8-way neighbor of `cell` in `dir`, or `None` if it would leave
    /// the map.
    pub fn neighbor(&self, cell: Cell, dir: Direction) -> Option<Cell> {
        let (x, y) = self.coords(cell);
        let (dx, dy) = dir.delta();
        let nx = i32::from(x) + dx;
        let ny = i32::from(y) + dy;
        if nx < 0 || ny < 0 || nx >= i32::from(self.width) || ny >= i32::from(self.height) {
            return None;
        }
        Some(Cell(ny as u16 * self.width + nx as u16))
    }

    /// Octile distance between two cells with the pathfinder's 10/14 step
    /// weights: `min(dx, dy) * 14 + |dx - dy| * 10`.
    pub fn octile_distance(&self, a: Cell, b: Cell) -> u32 {
        let (ax, ay) = self.coords(a);
        let (bx, by) = self.coords(b);
        let dx = u32::from(ax.abs_diff(bx));
        let dy = u32::from(ay.abs_diff(by));
        dx.min(dy) * 14 + dx.abs_diff(dy) * 10
    }
}

// ---------------------------------------------------------------------------
// Directions
// ---------------------------------------------------------------------------

/// One of the 8 grid-step directions. The discriminant order (clockwise
/// from north) is also the order the pathfinder expands neighbors in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Direction {
    /// All 8 directions, clockwise from north.
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    /// (dx, dy) offset of one step. North is -y.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::NorthEast => (1, -1),
            Direction::East => (1, 0),
            Direction::SouthEast => (1, 1),
            Direction::South => (0, 1),
            Direction::SouthWest => (-1, 1),
            Direction::West => (-1, 0),
            Direction::NorthWest => (-1, -1),
        }
    }

    pub fn is_diagonal(self) -> bool {
        matches!(
            self,
            Direction::NorthEast
                | Direction::SouthEast
                | Direction::SouthWest
                | Direction::NorthWest
        )
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::NorthEast => Direction::SouthWest,
            Direction::East => Direction::West,
            Direction::SouthEast => Direction::NorthWest,
            Direction::South => Direction::North,
            Direction::SouthWest => Direction::NorthEast,
            Direction::West => Direction::East,
            Direction::NorthWest => Direction::SouthEast,
        }
    }

    /// Per-tick pixel offset applied while animating one step in this
    /// direction, scaled by the mover's speed modifier.
    pub fn pixel_step(self, speed_mod: i8) -> (i8, i8) {
        let (dx, dy) = self.delta();
        (dx as i8 * speed_mod, dy as i8 * speed_mod)
    }

    /// The 32-step facing value a unit sprite uses when moving this way.
    /// Facing 0 is north, increasing counter-clockwise.
    pub fn facing(self) -> u8 {
        (32 - ((self as u8) << 2)) & 0x1f
    }
}

// ---------------------------------------------------------------------------
// Slot identifiers
// ---------------------------------------------------------------------------

/// Index into the unit pool. The grid stores slots, never unit records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitSlot(pub u16);

/// Index into the structure pool (walls included).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructureSlot(pub u16);

/// Player number. The player pool owns the actual records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_round_trip_through_coords() {
        let geo = MapGeometry::new(10, 8);
        let cell = geo.cell_at(7, 3).unwrap();
        assert_eq!(cell, Cell(37));
        assert_eq!(geo.coords(cell), (7, 3));
    }

    #[test]
    fn cell_at_rejects_out_of_bounds() {
        let geo = MapGeometry::new(10, 8);
        assert!(geo.cell_at(10, 0).is_none());
        assert!(geo.cell_at(0, 8).is_none());
    }

    #[test]
    fn neighbor_steps_all_eight_ways() {
        let geo = MapGeometry::new(5, 5);
        let center = geo.cell_at(2, 2).unwrap();
        for dir in Direction::ALL {
            let next = geo.neighbor(center, dir).unwrap();
            let (dx, dy) = dir.delta();
            let (nx, ny) = geo.coords(next);
            assert_eq!(i32::from(nx), 2 + dx);
            assert_eq!(i32::from(ny), 2 + dy);
        }
    }

    #[test]
    fn neighbor_clips_at_map_edge() {
        let geo = MapGeometry::new(4, 4);
        let corner = geo.cell_at(0, 0).unwrap();
        assert!(geo.neighbor(corner, Direction::North).is_none());
        assert!(geo.neighbor(corner, Direction::West).is_none());
        assert!(geo.neighbor(corner, Direction::NorthWest).is_none());
        assert!(geo.neighbor(corner, Direction::SouthEast).is_some());
    }

    #[test]
    fn neighbor_does_not_wrap_rows() {
        // Cell (3, 1) stepping east must not silently land on (0, 2) even
        // though the flat index would be in range.
        let geo = MapGeometry::new(4, 4);
        let edge = geo.cell_at(3, 1).unwrap();
        assert!(geo.neighbor(edge, Direction::East).is_none());
    }

    #[test]
    fn octile_distance_matches_weights() {
        let geo = MapGeometry::new(16, 16);
        let a = geo.cell_at(0, 0).unwrap();
        // Straight line: 5 orthogonal steps.
        assert_eq!(geo.octile_distance(a, geo.cell_at(5, 0).unwrap()), 50);
        // Pure diagonal: 3 diagonal steps.
        assert_eq!(geo.octile_distance(a, geo.cell_at(3, 3).unwrap()), 42);
        // Mixed: 2 diagonal + 3 straight.
        assert_eq!(geo.octile_distance(a, geo.cell_at(5, 2).unwrap()), 58);
        assert_eq!(geo.octile_distance(a, a), 0);
    }

    #[test]
    fn opposite_direction_round_trips() {
        for dir in Direction::ALL {
            assert_eq!(dir.opposite().opposite(), dir);
            let (dx, dy) = dir.delta();
            let (ox, oy) = dir.opposite().delta();
            assert_eq!((dx, dy), (-ox, -oy));
        }
    }

    #[test]
    fn facing_is_within_32_steps() {
        for dir in Direction::ALL {
            assert!(dir.facing() < 32);
        }
        assert_eq!(Direction::North.facing(), 0);
        assert_eq!(Direction::East.facing(), 24);
    }

    #[test]
    fn direction_serialization_round_trip() {
        for dir in Direction::ALL {
            let json = serde_json::to_string(&dir).unwrap();
            let restored: Direction = serde_json::from_str(&json).unwrap();
            assert_eq!(dir, restored);
        }
    }
}
