// Session tuning knobs.
//
// Everything here is plain data so a whole session setup can be loaded
// from a serialized blob. Defaults match the pacing the movement tasks
// were tuned against; `Default` is the reference configuration tests use.

use serde::{Deserialize, Serialize};

/// Fixed parameters of one simulation session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Map width in cells.
    pub map_width: u16,
    /// Map height in cells.
    pub map_height: u16,
    /// Facing steps (of 32) a unit rotates per turn-task run.
    pub turn_rate: u8,
    /// Consecutive failed step reservations before a move gives up.
    pub blocked_retry_limit: u8,
    /// Ticks a blocked mover waits before re-planning.
    pub blocked_delay: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            map_width: 64,
            map_height: 64,
            turn_rate: 2,
            blocked_retry_limit: 3,
            blocked_delay: 5,
        }
    }
}
