// Per-player visibility bookkeeping.
//
// Each player keeps a count per cell of how many of their units and
// structures can currently see it. Counts go up when something is created
// or steps into a new cell, down when it is removed or steps away, so
// overlapping sight ranges nest correctly. A cell is visible while its
// count is positive; once seen it stays explored for the rest of the
// session (shroud, not fog, is permanent).
//
// Sight areas are squares clamped to the map edge: a range-2 unit at the
// corner simply sees the quarter of its square that exists.

use crate::types::{Cell, MapGeometry, PlayerId};
use serde::{Deserialize, Serialize};

/// One player's sight state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    geometry: MapGeometry,
    sight_counts: Vec<u8>,
    explored: Vec<bool>,
}

impl Player {
    pub fn new(id: PlayerId, geometry: MapGeometry) -> Self {
        Self {
            id,
            geometry,
            sight_counts: vec![0; geometry.cell_count()],
            explored: vec![false; geometry.cell_count()],
        }
    }

    pub fn is_visible(&self, cell: Cell) -> bool {
        self.sight_counts
            .get(usize::from(cell.0))
            .is_some_and(|count| *count > 0)
    }

    pub fn is_explored(&self, cell: Cell) -> bool {
        self.explored
            .get(usize::from(cell.0))
            .copied()
            .unwrap_or(false)
    }

    /// Grant sight in a square of `range` cells around `cell`.
    pub fn add_sight(&mut self, cell: Cell, range: u8) {
        self.add_sight_area(cell, 1, 1, range);
    }

    /// Grant sight around a `width` x `height` footprint anchored at
    /// `cell`, extended outward by `range`.
    pub fn add_sight_area(&mut self, cell: Cell, width: u8, height: u8, range: u8) {
        self.for_each_sighted(cell, width, height, range, |counts, explored, index| {
            counts[index] = counts[index].saturating_add(1);
            explored[index] = true;
        });
    }

    /// Revoke sight previously granted with `add_sight`.
    pub fn remove_sight(&mut self, cell: Cell, range: u8) {
        self.remove_sight_area(cell, 1, 1, range);
    }

    pub fn remove_sight_area(&mut self, cell: Cell, width: u8, height: u8, range: u8) {
        self.for_each_sighted(cell, width, height, range, |counts, _, index| {
            debug_assert!(counts[index] > 0, "sight count underflow");
            counts[index] = counts[index].saturating_sub(1);
        });
    }

    /// Shift a unit's sight from `old` to `new` after a committed step.
    pub fn moved_unit(&mut self, old: Cell, new: Cell, range: u8) {
        self.remove_sight(old, range);
        self.add_sight(new, range);
    }

    fn for_each_sighted(
        &mut self,
        cell: Cell,
        width: u8,
        height: u8,
        range: u8,
        mut apply: impl FnMut(&mut [u8], &mut [bool], usize),
    ) {
        let (x, y) = self.geometry.coords(cell);
        let range = u16::from(range);
        let x0 = x.saturating_sub(range);
        let y0 = y.saturating_sub(range);
        let x1 = (x + u16::from(width) - 1 + range).min(self.geometry.width() - 1);
        let y1 = (y + u16::from(height) - 1 + range).min(self.geometry.height() - 1);
        for sy in y0..=y1 {
            for sx in x0..=x1 {
                let index = usize::from(sy) * usize::from(self.geometry.width()) + usize::from(sx);
                apply(&mut self.sight_counts, &mut self.explored, index);
            }
        }
    }
}

/// All players of a session, indexed by `PlayerId`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlayerRoster {
    players: Vec<Player>,
}

impl PlayerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player and return its id (ids are assigned in join order).
    pub fn add_player(&mut self, geometry: MapGeometry) -> PlayerId {
        let id = PlayerId(self.players.len() as u8);
        self.players.push(Player::new(id, geometry));
        id
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(usize::from(id.0))
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(usize::from(id.0))
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
