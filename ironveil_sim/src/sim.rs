// The session: owner of all simulation state and the only entry point.
//
// `GameSession` wires the pieces together — clock, task queue, terrain,
// occupancy grid, pools, players, pathfinder — and exposes exactly two
// mutations: `apply` for externally issued `SimCommand`s and `advance` for
// the passage of time. Everything that happens in between is tasks running
// against a `SimContext`, the borrowed view of session state handed to
// each `Task::run`. Tasks never see the session itself or the queue; new
// work is handed back through `SimContext::spawn` and picked up by the
// queue mid-drain.
//
// Observable output is the `SimEvent` stream: `apply` returns the events a
// command produced directly, `advance` returns everything the drained
// tasks emitted. Renderers and network layers consume events; nothing in
// here knows they exist.
//
// **Critical constraint: determinism.** Given the same command sequence
// applied at the same ticks, two sessions produce identical event streams.
// `advance` reads the wall clock only to pick the target tick; state
// transitions depend solely on tick numbers.

use crate::clock::GameClock;
use crate::command::{CommandError, SimCommand};
use crate::config::SimConfig;
use crate::grid::OccupancyGrid;
use crate::overlay::OverlayId;
use crate::path::Pathfinder;
use crate::player::PlayerRoster;
use crate::pool::{StructurePool, UnitPool};
use crate::queue::{Task, TaskHandle, TaskQueue};
use crate::tasks::{MoveTask, TurnTask};
use crate::terrain::{TerrainKind, TerrainMap};
use crate::types::{Cell, MapGeometry, PlayerId, StructureSlot, Tick, UnitSlot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Something observable happened. Events are facts about committed state
/// changes, emitted in the order they occurred.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimEvent {
    UnitCreated {
        unit: UnitSlot,
        cell: Cell,
    },
    UnitRemoved {
        unit: UnitSlot,
    },
    /// A unit committed a step into a new cell.
    UnitMoved {
        unit: UnitSlot,
        from: Cell,
        to: Cell,
        subpos: u8,
    },
    /// A movement order finished within its tolerance of the goal.
    MoveCompleted {
        unit: UnitSlot,
        at: Cell,
    },
    /// A movement order gave up after repeated failed reservations.
    MoveBlocked {
        unit: UnitSlot,
        at: Cell,
    },
    UnitTurned {
        unit: UnitSlot,
        facing: u8,
    },
    StructurePlaced {
        structure: StructureSlot,
        cell: Cell,
    },
    StructureRemoved {
        structure: StructureSlot,
    },
    OverlayAdded {
        id: OverlayId,
        cell: Cell,
    },
    OverlayRemoved {
        id: OverlayId,
    },
}

/// Borrowed view of session state handed to each task run. Field borrows
/// are disjoint, so a task may path-find against the grid while mutating
/// units.
pub struct SimContext<'a> {
    pub now: Tick,
    pub config: &'a SimConfig,
    pub terrain: &'a TerrainMap,
    pub grid: &'a mut OccupancyGrid,
    pub units: &'a mut UnitPool,
    pub structures: &'a mut StructurePool,
    pub players: &'a mut PlayerRoster,
    pub pathfinder: &'a mut Pathfinder,
    pub events: &'a mut Vec<SimEvent>,
    /// Tasks handed back mid-run; the queue adopts these at the current
    /// tick before the drain continues.
    pub spawned: Vec<Box<dyn Task>>,
}

impl SimContext<'_> {
    /// Hand a new task to the queue. Scheduled at the current tick, so a
    /// zero-delay task still runs within the same drain.
    pub fn spawn(&mut self, task: Box<dyn Task>) {
        self.spawned.push(task);
    }
}

/// Serializable image of committed session state. In-flight movement is
/// not captured: restoring drops scheduled tasks and clears outstanding
/// reservations, so units resume standing wherever they last committed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub config: SimConfig,
    pub terrain: TerrainMap,
    pub grid: OccupancyGrid,
    pub units: UnitPool,
    pub structures: StructurePool,
    pub players: PlayerRoster,
    pub last_tick: Tick,
}

/// One running simulation.
pub struct GameSession {
    config: SimConfig,
    clock: GameClock,
    queue: TaskQueue,
    terrain: TerrainMap,
    grid: OccupancyGrid,
    units: UnitPool,
    structures: StructurePool,
    players: PlayerRoster,
    pathfinder: Pathfinder,
    /// Live movement order per unit, so a new order replaces the old one.
    move_tasks: BTreeMap<UnitSlot, TaskHandle>,
    last_tick: Tick,
}

impl GameSession {
    pub fn new(config: SimConfig) -> Self {
        let geometry = MapGeometry::new(config.map_width, config.map_height);
        Self {
            config,
            clock: GameClock::start(),
            queue: TaskQueue::new(),
            terrain: TerrainMap::new(geometry, TerrainKind::Land),
            grid: OccupancyGrid::new(geometry),
            units: UnitPool::new(),
            structures: StructurePool::new(),
            players: PlayerRoster::new(),
            pathfinder: Pathfinder::new(geometry),
            move_tasks: BTreeMap::new(),
            last_tick: 0,
        }
    }

    pub fn geometry(&self) -> MapGeometry {
        self.grid.geometry()
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn current_tick(&self) -> Tick {
        self.last_tick
    }

    pub fn add_player(&mut self) -> PlayerId {
        self.players.add_player(self.geometry())
    }

    pub fn terrain(&self) -> &TerrainMap {
        &self.terrain
    }

    /// Map setup hook; terrain is meant to be laid out before play starts.
    pub fn terrain_mut(&mut self) -> &mut TerrainMap {
        &mut self.terrain
    }

    pub fn grid(&self) -> &OccupancyGrid {
        &self.grid
    }

    pub fn units(&self) -> &UnitPool {
        &self.units
    }

    pub fn structures(&self) -> &StructurePool {
        &self.structures
    }

    pub fn players(&self) -> &PlayerRoster {
        &self.players
    }

    /// Advance to the tick the wall clock has reached and run everything
    /// due. Returns the events emitted.
    pub fn advance(&mut self) -> Vec<SimEvent> {
        // A restored session's clock restarts at zero; never step backwards.
        let now = self.clock.current_tick().max(self.last_tick);
        self.advance_to(now)
    }

    /// Advance to an explicit tick. This is the deterministic core of
    /// `advance`; replays and tests drive it directly.
    pub fn advance_to(&mut self, now: Tick) -> Vec<SimEvent> {
        debug_assert!(now >= self.last_tick, "time went backwards");
        let mut events = Vec::new();
        let Self {
            config,
            queue,
            terrain,
            grid,
            units,
            structures,
            players,
            pathfinder,
            ..
        } = self;
        let mut ctx = SimContext {
            now,
            config,
            terrain,
            grid,
            units,
            structures,
            players,
            pathfinder,
            events: &mut events,
            spawned: Vec::new(),
        };
        queue.drain(now, &mut ctx);
        self.last_tick = now;
        self.move_tasks.retain(|_, handle| self.queue.is_live(*handle));
        events
    }

    /// Apply one command at the current tick. Returns the events the
    /// command produced directly; a returned error means state is
    /// unchanged.
    pub fn apply(&mut self, command: SimCommand) -> Result<Vec<SimEvent>, CommandError> {
        let mut events = Vec::new();
        match command {
            SimCommand::CreateUnit {
                template,
                owner,
                cell,
                subpos,
                facing,
            } => {
                if self.players.get(owner).is_none() {
                    return Err(CommandError::UnknownPlayer(owner));
                }
                if !self.geometry().contains(cell) {
                    return Err(CommandError::OffMap(cell));
                }
                let slot = self
                    .grid
                    .create_unit(&mut self.units, &template, owner, cell, subpos, facing)
                    .ok_or(CommandError::InvalidPlacement(cell))?;
                if let Some(player) = self.players.get_mut(owner) {
                    player.add_sight(cell, template.sight);
                }
                events.push(SimEvent::UnitCreated { unit: slot, cell });
            }
            SimCommand::RemoveUnit { unit } => {
                let (cell, owner, sight) = {
                    let record = self
                        .units
                        .get(unit)
                        .ok_or(CommandError::UnknownUnit(unit))?;
                    (record.cell, record.owner, record.sight)
                };
                if let Some(handle) = self.move_tasks.remove(&unit) {
                    self.queue.stop(handle);
                }
                if let Some(player) = self.players.get_mut(owner) {
                    player.remove_sight(cell, sight);
                }
                self.grid.remove_unit(&mut self.units, unit);
                events.push(SimEvent::UnitRemoved { unit });
            }
            SimCommand::MoveUnit {
                unit,
                goal,
                tolerance,
            } => {
                if !self.geometry().contains(goal) {
                    return Err(CommandError::OffMap(goal));
                }
                let task = {
                    let record = self
                        .units
                        .get(unit)
                        .ok_or(CommandError::UnknownUnit(unit))?;
                    Box::new(MoveTask::new(unit, record, goal, tolerance, &self.config))
                };
                if let Some(previous) = self.move_tasks.remove(&unit) {
                    self.queue.stop(previous);
                }
                let handle = self.queue.schedule(task, self.last_tick);
                self.move_tasks.insert(unit, handle);
            }
            SimCommand::StopUnit { unit } => {
                if self.units.get(unit).is_none() {
                    return Err(CommandError::UnknownUnit(unit));
                }
                if let Some(handle) = self.move_tasks.remove(&unit) {
                    self.queue.stop(handle);
                }
            }
            SimCommand::TurnUnit { unit, facing } => {
                if self.units.get(unit).is_none() {
                    return Err(CommandError::UnknownUnit(unit));
                }
                let task = Box::new(TurnTask::new(unit, facing & 0x1f));
                self.queue.schedule(task, self.last_tick);
            }
            SimCommand::PlaceStructure { spec, owner, cell } => {
                if self.players.get(owner).is_none() {
                    return Err(CommandError::UnknownPlayer(owner));
                }
                if !self.geometry().contains(cell) {
                    return Err(CommandError::OffMap(cell));
                }
                let (width, height, sight) = (spec.footprint.width, spec.footprint.height, spec.sight);
                let slot = self
                    .grid
                    .create_structure(&mut self.structures, spec, owner, cell)
                    .ok_or(CommandError::InvalidPlacement(cell))?;
                if let Some(player) = self.players.get_mut(owner) {
                    player.add_sight_area(cell, width, height, sight);
                }
                events.push(SimEvent::StructurePlaced {
                    structure: slot,
                    cell,
                });
            }
            SimCommand::RemoveStructure { structure } => {
                let (cell, owner, width, height, sight) = {
                    let record = self
                        .structures
                        .get(structure)
                        .ok_or(CommandError::UnknownStructure(structure))?;
                    (
                        record.cell,
                        record.owner,
                        record.footprint.width,
                        record.footprint.height,
                        record.sight,
                    )
                };
                self.grid.remove_structure(&mut self.structures, structure);
                if let Some(player) = self.players.get_mut(owner) {
                    player.remove_sight_area(cell, width, height, sight);
                }
                events.push(SimEvent::StructureRemoved { structure });
            }
            SimCommand::AddOverlay { cell, overlay } => {
                if !self.geometry().contains(cell) {
                    return Err(CommandError::OffMap(cell));
                }
                let id = self.grid.add_overlay(cell, overlay);
                events.push(SimEvent::OverlayAdded { id, cell });
            }
            SimCommand::RemoveOverlay { id } => {
                if !self.grid.remove_overlay(id) {
                    return Err(CommandError::UnknownOverlay);
                }
                events.push(SimEvent::OverlayRemoved { id });
            }
        }
        Ok(events)
    }

    /// Capture committed state for save or transfer.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            config: self.config.clone(),
            terrain: self.terrain.clone(),
            grid: self.grid.clone(),
            units: self.units.clone(),
            structures: self.structures.clone(),
            players: self.players.clone(),
            last_tick: self.last_tick,
        }
    }

    /// Rebuild a session from a snapshot. The clock restarts; scheduled
    /// tasks are gone, so any outstanding reservations are cleared.
    pub fn restore(snapshot: SessionSnapshot) -> Self {
        let geometry = MapGeometry::new(snapshot.config.map_width, snapshot.config.map_height);
        let mut grid = snapshot.grid;
        grid.clear_reservations();
        Self {
            config: snapshot.config,
            clock: GameClock::start(),
            queue: TaskQueue::new(),
            terrain: snapshot.terrain,
            grid,
            units: snapshot.units,
            structures: snapshot.structures,
            players: snapshot.players,
            pathfinder: Pathfinder::new(geometry),
            move_tasks: BTreeMap::new(),
            last_tick: snapshot.last_tick,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::Overlay;
    use crate::pool::{StructureSpec, UnitKind, UnitTemplate};

    fn small_session() -> (GameSession, PlayerId) {
        let mut session = GameSession::new(SimConfig {
            map_width: 16,
            map_height: 16,
            ..SimConfig::default()
        });
        let player = session.add_player();
        (session, player)
    }

    fn vehicle() -> UnitTemplate {
        UnitTemplate {
            kind: UnitKind::Vehicle,
            speed: 4,
            move_delay: 1,
            sight: 3,
        }
    }

    #[test]
    fn create_unit_emits_event_and_grants_sight() {
        let (mut session, player) = small_session();
        let cell = session.geometry().cell_at(4, 4).unwrap();
        let events = session
            .apply(SimCommand::CreateUnit {
                template: vehicle(),
                owner: player,
                cell,
                subpos: 0,
                facing: 0,
            })
            .unwrap();
        let unit = match events.as_slice() {
            [SimEvent::UnitCreated { unit, cell: at }] => {
                assert_eq!(*at, cell);
                *unit
            }
            other => panic!("unexpected events: {other:?}"),
        };
        assert!(session.units().get(unit).is_some());
        let viewer = session.players().get(player).unwrap();
        assert!(viewer.is_visible(session.geometry().cell_at(6, 4).unwrap()));
        assert!(!viewer.is_visible(session.geometry().cell_at(8, 4).unwrap()));
    }

    #[test]
    fn create_unit_rejects_unknown_player_and_off_map() {
        let (mut session, _) = small_session();
        let cell = session.geometry().cell_at(1, 1).unwrap();
        assert_eq!(
            session.apply(SimCommand::CreateUnit {
                template: vehicle(),
                owner: PlayerId(7),
                cell,
                subpos: 0,
                facing: 0,
            }),
            Err(CommandError::UnknownPlayer(PlayerId(7)))
        );
        let (mut session, player) = small_session();
        assert_eq!(
            session.apply(SimCommand::CreateUnit {
                template: vehicle(),
                owner: player,
                cell: Cell(9999),
                subpos: 0,
                facing: 0,
            }),
            Err(CommandError::OffMap(Cell(9999)))
        );
    }

    #[test]
    fn remove_unit_revokes_sight() {
        let (mut session, player) = small_session();
        let cell = session.geometry().cell_at(4, 4).unwrap();
        let events = session
            .apply(SimCommand::CreateUnit {
                template: vehicle(),
                owner: player,
                cell,
                subpos: 0,
                facing: 0,
            })
            .unwrap();
        let SimEvent::UnitCreated { unit, .. } = events[0] else {
            panic!("expected UnitCreated");
        };
        session.apply(SimCommand::RemoveUnit { unit }).unwrap();
        assert!(session.units().get(unit).is_none());
        let viewer = session.players().get(player).unwrap();
        assert!(!viewer.is_visible(cell));
        assert!(viewer.is_explored(cell));
        // Removing again reports the stale slot.
        assert_eq!(
            session.apply(SimCommand::RemoveUnit { unit }),
            Err(CommandError::UnknownUnit(unit))
        );
    }

    #[test]
    fn structure_lifecycle_round_trip() {
        let (mut session, player) = small_session();
        let cell = session.geometry().cell_at(5, 5).unwrap();
        let events = session
            .apply(SimCommand::PlaceStructure {
                spec: StructureSpec::building(2, 2, 2),
                owner: player,
                cell,
            })
            .unwrap();
        let SimEvent::StructurePlaced { structure, .. } = events[0] else {
            panic!("expected StructurePlaced");
        };
        // Second placement on the same footprint is refused.
        assert_eq!(
            session.apply(SimCommand::PlaceStructure {
                spec: StructureSpec::building(2, 2, 2),
                owner: player,
                cell,
            }),
            Err(CommandError::InvalidPlacement(cell))
        );
        session
            .apply(SimCommand::RemoveStructure { structure })
            .unwrap();
        assert!(session.structures().get(structure).is_none());
        assert!(session.grid().cell_is_free(cell));
    }

    #[test]
    fn overlay_commands_round_trip() {
        let (mut session, _) = small_session();
        let cell = session.geometry().cell_at(3, 3).unwrap();
        let events = session
            .apply(SimCommand::AddOverlay {
                cell,
                overlay: Overlay::single(42),
            })
            .unwrap();
        let SimEvent::OverlayAdded { id, .. } = events[0] else {
            panic!("expected OverlayAdded");
        };
        assert!(session.grid().cell(cell).has_overlay);
        session.apply(SimCommand::RemoveOverlay { id }).unwrap();
        assert!(!session.grid().cell(cell).has_overlay);
        assert_eq!(
            session.apply(SimCommand::RemoveOverlay { id }),
            Err(CommandError::UnknownOverlay)
        );
    }

    #[test]
    fn snapshot_restores_committed_state() {
        let (mut session, player) = small_session();
        let cell = session.geometry().cell_at(2, 2).unwrap();
        let events = session
            .apply(SimCommand::CreateUnit {
                template: vehicle(),
                owner: player,
                cell,
                subpos: 0,
                facing: 8,
            })
            .unwrap();
        let SimEvent::UnitCreated { unit, .. } = events[0] else {
            panic!("expected UnitCreated");
        };
        session.advance_to(10);

        let bytes = bincode::serialize(&session.snapshot()).unwrap();
        let snapshot: SessionSnapshot = bincode::deserialize(&bytes).unwrap();
        let restored = GameSession::restore(snapshot);

        assert_eq!(restored.current_tick(), 10);
        assert_eq!(restored.units().get(unit).unwrap().cell, cell);
        assert!(restored.players().get(player).unwrap().is_visible(cell));
    }
}
