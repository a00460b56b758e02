// Static terrain layer and the combined movement-cost view.
//
// Terrain is fixed at session start: one `TerrainKind` per cell, flat
// row-major like everything else. The dynamic part of movement cost (units,
// structures, reservations) lives in the occupancy grid; `TerrainMap::cost`
// folds both together and is the single cost function the pathfinder and
// the movement reservation protocol consult.
//
// Costs are u16 with `IMPASSABLE_COST` (0xffff) as the hard sentinel.
// Anything above `BLOCKED_THRESHOLD` (0xf000) is treated as untraversable
// by movement; the pathfinder still sees the numbers and will route around.
//
// See also: `grid.rs` for `tile_cost`, `path.rs` for the consumer.

use crate::grid::OccupancyGrid;
use crate::pool::UnitPool;
use crate::types::{Cell, MapGeometry, UnitSlot};
use serde::{Deserialize, Serialize};

/// Cost of a cell that can never be entered (off-map, water, rock).
pub const IMPASSABLE_COST: u16 = 0xffff;

/// Costs above this are untraversable for movement. Structure-blocked cells
/// sit just above it so arithmetic never wraps.
pub const BLOCKED_THRESHOLD: u16 = 0xf000;

/// Ground cover of one cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerrainKind {
    #[default]
    Land,
    Road,
    Trees,
    Rock,
    Water,
}

impl TerrainKind {
    /// Base traversal cost before any occupancy is considered. `None` means
    /// the kind is impassable to ground movement.
    pub fn base_cost(self) -> Option<u16> {
        match self {
            TerrainKind::Land => Some(1),
            TerrainKind::Road => Some(0),
            TerrainKind::Trees => Some(2),
            TerrainKind::Rock | TerrainKind::Water => None,
        }
    }
}

/// The per-cell terrain of a map.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TerrainMap {
    geometry: MapGeometry,
    kinds: Vec<TerrainKind>,
}

impl TerrainMap {
    pub fn new(geometry: MapGeometry, fill: TerrainKind) -> Self {
        Self {
            geometry,
            kinds: vec![fill; geometry.cell_count()],
        }
    }

    pub fn geometry(&self) -> MapGeometry {
        self.geometry
    }

    pub fn kind(&self, cell: Cell) -> TerrainKind {
        self.kinds
            .get(usize::from(cell.0))
            .copied()
            .unwrap_or(TerrainKind::Water)
    }

    pub fn set_kind(&mut self, cell: Cell, kind: TerrainKind) {
        if let Some(slot) = self.kinds.get_mut(usize::from(cell.0)) {
            *slot = kind;
        }
    }

    /// Combined movement cost of entering `cell`: terrain base cost plus
    /// the grid's occupancy surcharge. `exclude` is the moving unit, which
    /// never pays for standing on its own cell.
    pub fn cost(
        &self,
        cell: Cell,
        grid: &OccupancyGrid,
        units: &UnitPool,
        exclude: Option<UnitSlot>,
    ) -> u16 {
        if !self.geometry.contains(cell) {
            return IMPASSABLE_COST;
        }
        let Some(base) = self.kind(cell).base_cost() else {
            return IMPASSABLE_COST;
        };
        base.saturating_add(grid.tile_cost(cell, exclude, units))
    }
}

/// Borrowed bundle of the three layers a cost query needs. Built per
/// pathfinding request so the active cost context travels with it.
pub struct CostView<'a> {
    pub terrain: &'a TerrainMap,
    pub grid: &'a OccupancyGrid,
    pub units: &'a UnitPool,
    pub exclude: Option<UnitSlot>,
}

impl CostView<'_> {
    pub fn cost_at(&self, cell: Cell) -> u16 {
        self.terrain.cost(cell, self.grid, self.units, self.exclude)
    }
}
