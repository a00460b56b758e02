// ironveil_sim: the deterministic real-time-strategy simulation core.
//
// No rendering, no audio, no networking — this crate owns game state and
// the rules for changing it, and reports what happened as `SimEvent`s.
// Outer layers (a renderer, a network lobby, a scenario runner) issue
// `SimCommand`s and draw whatever the events and the queryable state tell
// them to.
//
// Module map:
// - `types`: cells, map geometry, directions, slot identifiers
// - `clock`: wall-clock to tick quantization
// - `queue`: the deadline-ordered task scheduler
// - `terrain`: static ground layer and the combined cost function
// - `grid`: per-cell occupancy and the movement reservation protocol
// - `overlay`: decorations side table
// - `path`: bounded A*
// - `pool`: unit and structure records, infantry groups
// - `player`: per-player sight matrices
// - `tasks`: movement and turning state machines
// - `config`, `command`, `sim`: session surface
//
// **Critical constraint: determinism.** The same commands applied at the
// same ticks must yield the same state and events on every machine.
// Iteration over anything unordered is forbidden in simulation paths; maps
// keyed for iteration are `BTreeMap`, never `HashMap`. Wall-clock time
// enters exactly once, in `clock`, and only to choose the target tick.

pub mod clock;
pub mod command;
pub mod config;
pub mod grid;
pub mod overlay;
pub mod path;
pub mod player;
pub mod pool;
pub mod queue;
pub mod sim;
pub mod tasks;
pub mod terrain;
pub mod types;

pub use command::{CommandError, SimCommand};
pub use config::SimConfig;
pub use sim::{GameSession, SessionSnapshot, SimContext, SimEvent};
pub use types::{Cell, Direction, MapGeometry, PlayerId, StructureSlot, Tick, UnitSlot};
