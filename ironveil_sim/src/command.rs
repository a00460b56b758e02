// The command surface of a session.
//
// Everything the outside (UI, network layer, scenario script) may ask the
// simulation to do is one `SimCommand` value. Commands are applied through
// `GameSession::apply`, which validates against current state and either
// mutates it or returns a `CommandError`; they are plain serializable data
// so a networked game can ship them between peers verbatim.

use crate::overlay::{Overlay, OverlayId};
use crate::pool::{StructureSpec, UnitTemplate};
use crate::types::{Cell, PlayerId, StructureSlot, UnitSlot};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One externally issued order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SimCommand {
    CreateUnit {
        template: UnitTemplate,
        owner: PlayerId,
        cell: Cell,
        subpos: u8,
        facing: u8,
    },
    RemoveUnit {
        unit: UnitSlot,
    },
    /// Start (or redirect) a unit's movement toward `goal`. `tolerance`
    /// is in cells; 0 demands the exact goal cell.
    MoveUnit {
        unit: UnitSlot,
        goal: Cell,
        tolerance: u32,
    },
    StopUnit {
        unit: UnitSlot,
    },
    /// Rotate a unit in place to a 32-step facing.
    TurnUnit {
        unit: UnitSlot,
        facing: u8,
    },
    PlaceStructure {
        spec: StructureSpec,
        owner: PlayerId,
        cell: Cell,
    },
    RemoveStructure {
        structure: StructureSlot,
    },
    AddOverlay {
        cell: Cell,
        overlay: Overlay,
    },
    RemoveOverlay {
        id: OverlayId,
    },
}

/// Why a command was refused. Commands never partially apply; a returned
/// error means state is unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandError {
    UnknownUnit(UnitSlot),
    UnknownStructure(StructureSlot),
    UnknownOverlay,
    UnknownPlayer(PlayerId),
    InvalidPlacement(Cell),
    OffMap(Cell),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::UnknownUnit(slot) => write!(f, "no unit in slot {}", slot.0),
            CommandError::UnknownStructure(slot) => {
                write!(f, "no structure in slot {}", slot.0)
            }
            CommandError::UnknownOverlay => write!(f, "overlay handle is stale"),
            CommandError::UnknownPlayer(id) => write!(f, "no player {}", id.0),
            CommandError::InvalidPlacement(cell) => {
                write!(f, "cannot place at {cell}")
            }
            CommandError::OffMap(cell) => write!(f, "{cell} is outside the map"),
        }
    }
}

impl std::error::Error for CommandError {}
