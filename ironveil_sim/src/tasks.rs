// Movement and turning, expressed as scheduler tasks.
//
// A `MoveTask` walks one unit toward a goal: plan a (possibly partial)
// path, then for each step face the right way, reserve the destination
// through the grid's `pre_move`, and animate across at the unit's speed.
// The step commits at the half-cell mark — from the map's point of view the
// unit is in the new cell the moment it crosses the midpoint, sight and
// all — and the remaining pixels are pure animation. When the path runs
// out the task re-plans; partial paths from the bounded pathfinder make
// this the normal case, not an error.
//
// A refused reservation throws the path away and waits out `blocked_delay`
// before re-planning; after `blocked_retry_limit` consecutive refusals the
// order gives up with a `MoveBlocked` event. Cancellation (a stop order,
// a replacing move order, the unit dying) is handled in `finish`, which
// releases an uncommitted reservation so the destination cell never leaks.
//
// See also: `grid.rs` for the reservation protocol, `queue.rs` for the
// task contract.

use crate::config::SimConfig;
use crate::grid::PreMove;
use crate::path::{PathRequest, STRAIGHT_COST};
use crate::pool::{Unit, UnitKind};
use crate::queue::{Task, TaskControl};
use crate::sim::{SimContext, SimEvent};
use crate::terrain::CostView;
use crate::types::{Cell, Direction, Tick, UnitSlot};

/// Width of one cell in animation pixels.
pub const CELL_PIXELS: u8 = 24;
/// Crossing this many pixels into a step commits the move.
pub const HALF_CELL_PIXELS: u8 = 12;

#[derive(Clone, Copy, Debug)]
enum MovePhase {
    /// Needs a (re)computed path.
    Planning,
    /// Rotating in place until facing matches the next step.
    Turning { dir: Direction },
    /// Mid-step; the destination is reserved until `committed`.
    Stepping {
        step: PreMove,
        pixels: u8,
        committed: bool,
    },
    /// Reservation refused; waiting before the next plan.
    Blocked,
}

/// Walks a unit toward a goal cell. One per unit at a time; the session
/// replaces the old task when a new move order arrives.
pub struct MoveTask {
    unit: UnitSlot,
    kind: UnitKind,
    goal: Cell,
    tolerance: u32,
    move_delay: Tick,
    blocked_delay: Tick,
    retry_limit: u8,
    path: Vec<Direction>,
    path_index: usize,
    phase: MovePhase,
    retries: u8,
    stopping: bool,
}

impl MoveTask {
    pub fn new(
        unit: UnitSlot,
        record: &Unit,
        goal: Cell,
        tolerance: u32,
        config: &SimConfig,
    ) -> Self {
        Self {
            unit,
            kind: record.kind,
            goal,
            tolerance,
            move_delay: record.move_delay,
            blocked_delay: config.blocked_delay,
            retry_limit: config.blocked_retry_limit,
            path: Vec::new(),
            path_index: 0,
            phase: MovePhase::Planning,
            retries: 0,
            stopping: false,
        }
    }

    fn plan(&mut self, ctx: &mut SimContext<'_>) -> TaskControl {
        let Some(record) = ctx.units.get(self.unit) else {
            return TaskControl::Done;
        };
        let (cell, owner) = (record.cell, record.owner);
        let geometry = ctx.grid.geometry();
        if geometry.octile_distance(cell, self.goal) <= self.tolerance * STRAIGHT_COST {
            ctx.events.push(SimEvent::MoveCompleted {
                unit: self.unit,
                at: cell,
            });
            return TaskControl::Done;
        }

        ctx.grid.set_cost_context(owner);
        let path = {
            let view = CostView {
                terrain: ctx.terrain,
                grid: ctx.grid,
                units: ctx.units,
                exclude: Some(self.unit),
            };
            ctx.pathfinder.find_path(
                PathRequest {
                    start: cell,
                    goal: self.goal,
                    tolerance: self.tolerance,
                },
                |c| view.cost_at(c),
            )
        };
        if path.is_empty() {
            return self.step_refused(ctx, cell);
        }
        self.path = path;
        self.path_index = 0;
        self.begin_step(ctx)
    }

    /// Line up the next path step: turn first if needed, else reserve.
    fn begin_step(&mut self, ctx: &mut SimContext<'_>) -> TaskControl {
        let Some(&dir) = self.path.get(self.path_index) else {
            self.phase = MovePhase::Planning;
            return TaskControl::Continue;
        };
        let Some(record) = ctx.units.get(self.unit) else {
            return TaskControl::Done;
        };
        if record.facing != dir.facing() {
            self.phase = MovePhase::Turning { dir };
            return TaskControl::Continue;
        }
        self.reserve(ctx, dir)
    }

    fn reserve(&mut self, ctx: &mut SimContext<'_>, dir: Direction) -> TaskControl {
        match ctx.grid.pre_move(ctx.units, ctx.terrain, self.unit, dir) {
            Some(step) => {
                self.retries = 0;
                self.phase = MovePhase::Stepping {
                    step,
                    pixels: 0,
                    committed: false,
                };
                TaskControl::Continue
            }
            None => {
                let at = ctx.units.get(self.unit).map_or(self.goal, |r| r.cell);
                self.step_refused(ctx, at)
            }
        }
    }

    /// The world refused a step. Wait, re-plan, and eventually give up.
    fn step_refused(&mut self, ctx: &mut SimContext<'_>, at: Cell) -> TaskControl {
        self.retries += 1;
        if self.retries > self.retry_limit {
            ctx.events.push(SimEvent::MoveBlocked {
                unit: self.unit,
                at,
            });
            return TaskControl::Done;
        }
        self.path.clear();
        self.phase = MovePhase::Blocked;
        TaskControl::Continue
    }

    fn turn_toward(&mut self, ctx: &mut SimContext<'_>, dir: Direction) -> TaskControl {
        let rate = ctx.config.turn_rate.max(1);
        let target = dir.facing();
        let Some(record) = ctx.units.get_mut(self.unit) else {
            return TaskControl::Done;
        };
        record.facing = rotate_facing(record.facing, target, rate);
        if record.facing == target {
            self.reserve(ctx, dir)
        } else {
            TaskControl::Continue
        }
    }

    fn advance_step(&mut self, ctx: &mut SimContext<'_>) -> TaskControl {
        let MovePhase::Stepping {
            step,
            mut pixels,
            mut committed,
        } = self.phase
        else {
            debug_assert!(false, "advance_step outside Stepping");
            return TaskControl::Done;
        };
        let Some(record) = ctx.units.get(self.unit) else {
            return TaskControl::Done;
        };
        let speed = record.speed.unsigned_abs().max(1);
        let (old, owner, sight) = (record.cell, record.owner, record.sight);

        pixels = pixels.saturating_add(speed);
        if !committed && pixels >= HALF_CELL_PIXELS {
            let Some(subpos) = ctx.grid.post_move(ctx.units, self.unit, step.dest) else {
                return TaskControl::Done;
            };
            if let Some(player) = ctx.players.get_mut(owner) {
                player.moved_unit(old, step.dest, sight);
            }
            ctx.events.push(SimEvent::UnitMoved {
                unit: self.unit,
                from: old,
                to: step.dest,
                subpos,
            });
            committed = true;
        }
        if pixels >= CELL_PIXELS {
            debug_assert!(committed, "step completed without committing");
            self.path_index += 1;
            if self.path_index >= self.path.len() {
                self.phase = MovePhase::Planning;
                return TaskControl::Continue;
            }
            return self.begin_step(ctx);
        }
        self.phase = MovePhase::Stepping {
            step,
            pixels,
            committed,
        };
        TaskControl::Continue
    }
}

impl Task for MoveTask {
    fn delay(&self) -> Tick {
        match self.phase {
            MovePhase::Planning | MovePhase::Turning { .. } => 1,
            MovePhase::Stepping { .. } => self.move_delay.max(1),
            MovePhase::Blocked => self.blocked_delay.max(1),
        }
    }

    fn run(&mut self, ctx: &mut SimContext<'_>) -> TaskControl {
        if self.stopping || ctx.units.get(self.unit).is_none() {
            return TaskControl::Done;
        }
        match self.phase {
            MovePhase::Planning => self.plan(ctx),
            MovePhase::Turning { dir } => self.turn_toward(ctx, dir),
            MovePhase::Stepping { .. } => self.advance_step(ctx),
            MovePhase::Blocked => {
                self.phase = MovePhase::Planning;
                TaskControl::Continue
            }
        }
    }

    fn finish(&mut self, ctx: &mut SimContext<'_>) -> Option<Box<dyn Task>> {
        // However the task ends, an uncommitted reservation must not
        // outlive it.
        if let MovePhase::Stepping {
            step,
            committed: false,
            ..
        } = self.phase
        {
            ctx.grid.abort_move(self.kind, step.dest);
            self.phase = MovePhase::Planning;
        }
        None
    }

    fn stop(&mut self) {
        self.stopping = true;
    }
}

/// Rotates a unit in place to a target facing.
pub struct TurnTask {
    unit: UnitSlot,
    target: u8,
    stopping: bool,
}

impl TurnTask {
    pub fn new(unit: UnitSlot, target: u8) -> Self {
        Self {
            unit,
            target: target & 0x1f,
            stopping: false,
        }
    }
}

impl Task for TurnTask {
    fn delay(&self) -> Tick {
        1
    }

    fn run(&mut self, ctx: &mut SimContext<'_>) -> TaskControl {
        if self.stopping {
            return TaskControl::Done;
        }
        let rate = ctx.config.turn_rate.max(1);
        let Some(record) = ctx.units.get_mut(self.unit) else {
            return TaskControl::Done;
        };
        record.facing = rotate_facing(record.facing, self.target, rate);
        if record.facing == self.target {
            ctx.events.push(SimEvent::UnitTurned {
                unit: self.unit,
                facing: self.target,
            });
            TaskControl::Done
        } else {
            TaskControl::Continue
        }
    }

    fn stop(&mut self) {
        self.stopping = true;
    }
}

/// One rotation increment toward `target`, at most `rate` of the 32 facing
/// steps, around whichever way is shorter.
fn rotate_facing(facing: u8, target: u8, rate: u8) -> u8 {
    let diff = target.wrapping_sub(facing) & 0x1f;
    if diff == 0 {
        return facing;
    }
    if diff <= 16 {
        (facing + diff.min(rate)) & 0x1f
    } else {
        let back = 32 - diff;
        facing.wrapping_sub(back.min(rate)) & 0x1f
    }
}
