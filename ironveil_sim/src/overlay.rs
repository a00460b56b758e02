// Overlay side table: decorations that sit on cells without occupying them.
//
// Smudges, craters, flags and similar markers never block movement, so
// storing them inline in every `CellState` would waste space on a feature
// most cells never use. Instead the grid keeps one `has_overlay` bit per
// cell and this table holds the actual entries, keyed by cell in a
// `BTreeMap` (deterministic iteration; see the module header in `lib.rs`).
//
// Handles are generation-tagged like task handles: removing an overlay
// bumps its slot's generation, so a stale `OverlayId` held across a
// removal can never free someone else's entry.

use crate::types::Cell;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Stable handle to an overlay entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayId {
    index: u16,
    generation: u16,
}

/// One sprite of an overlay, offset in pixels from its cell's origin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayImage {
    pub image: u32,
    pub x_offset: i8,
    pub y_offset: i8,
}

/// A cell decoration: one or more sprites drawn over the terrain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlay {
    pub images: SmallVec<[OverlayImage; 1]>,
}

impl Overlay {
    pub fn single(image: u32) -> Self {
        Self {
            images: SmallVec::from_buf([OverlayImage {
                image,
                x_offset: 0,
                y_offset: 0,
            }]),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct OverlaySlot {
    entry: Option<(Cell, Overlay)>,
    generation: u16,
}

/// All overlays of a session. Most cells carry none; a cell with any is
/// flagged in the grid and its entries found here.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OverlayTable {
    slots: Vec<OverlaySlot>,
    free: Vec<u16>,
    by_cell: BTreeMap<Cell, SmallVec<[OverlayId; 2]>>,
}

impl OverlayTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an overlay to `cell`. Returns the handle used to remove it.
    pub fn add(&mut self, cell: Cell, overlay: Overlay) -> OverlayId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(OverlaySlot::default());
                (self.slots.len() - 1) as u16
            }
        };
        let slot = &mut self.slots[usize::from(index)];
        debug_assert!(slot.entry.is_none(), "reused a live overlay slot");
        slot.entry = Some((cell, overlay));
        let id = OverlayId {
            index,
            generation: slot.generation,
        };
        self.by_cell.entry(cell).or_default().push(id);
        id
    }

    /// Detach an overlay. Stale handles are ignored. Returns the cell the
    /// overlay was on, so the grid can refresh its flag.
    pub fn remove(&mut self, id: OverlayId) -> Option<Cell> {
        let slot = self.slots.get_mut(usize::from(id.index))?;
        if slot.generation != id.generation {
            return None;
        }
        let (cell, _) = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        if let Some(ids) = self.by_cell.get_mut(&cell) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_cell.remove(&cell);
            }
        }
        Some(cell)
    }

    pub fn get(&self, id: OverlayId) -> Option<&Overlay> {
        let slot = self.slots.get(usize::from(id.index))?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref().map(|(_, overlay)| overlay)
    }

    /// All overlays currently on `cell`, in insertion order.
    pub fn at_cell(&self, cell: Cell) -> impl Iterator<Item = &Overlay> {
        self.by_cell
            .get(&cell)
            .into_iter()
            .flatten()
            .filter_map(|id| self.get(*id))
    }

    pub fn cell_has_overlays(&self, cell: Cell) -> bool {
        self.by_cell.contains_key(&cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_remove_clears_cell() {
        let mut table = OverlayTable::new();
        let id = table.add(Cell(4), Overlay::single(10));
        assert!(table.cell_has_overlays(Cell(4)));
        assert_eq!(table.remove(id), Some(Cell(4)));
        assert!(!table.cell_has_overlays(Cell(4)));
        assert!(table.get(id).is_none());
    }

    #[test]
    fn multiple_overlays_share_a_cell() {
        let mut table = OverlayTable::new();
        let a = table.add(Cell(2), Overlay::single(1));
        let _b = table.add(Cell(2), Overlay::single(2));
        table.remove(a);
        // One remains, so the cell still reports overlays.
        assert!(table.cell_has_overlays(Cell(2)));
        let images: Vec<u32> = table
            .at_cell(Cell(2))
            .flat_map(|ov| ov.images.iter().map(|img| img.image))
            .collect();
        assert_eq!(images, vec![2]);
    }

    #[test]
    fn stale_handle_cannot_remove_reused_slot() {
        let mut table = OverlayTable::new();
        let old = table.add(Cell(1), Overlay::single(1));
        table.remove(old);
        let fresh = table.add(Cell(3), Overlay::single(2));
        // Same slot index, new generation.
        assert!(table.remove(old).is_none());
        assert!(table.get(fresh).is_some());
    }
}
