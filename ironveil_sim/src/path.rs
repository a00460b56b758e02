// Bounded A* pathfinding over the cell grid.
//
// Searches 8-way with step cost `cell_cost * 10` (orthogonal) or
// `cell_cost * 14` (diagonal) and the matching octile heuristic, so on
// plain land a step costs 10/14 and the heuristic is exact. The search is
// deliberately bounded: it is abandoned the first time a popped node's
// accumulated cost has reached `MAX_PATH_COST`, and if the goal (or its
// tolerance ring) was never reached the result is a partial path to the
// expanded node closest to the goal by heuristic. Movement tasks re-plan from wherever a partial
// path leaves them, so short horizons self-correct as the world changes.
//
// The per-cell node arena is allocated once and reused across searches: a
// generation counter marks which entries belong to the current search, so
// a new request costs no clearing pass. Heap ties break on (f, cell), which
// keeps results identical across runs.
//
// See also: `terrain.rs` for the cost function searches run against,
// `tasks.rs` for the consumer.

use crate::terrain::BLOCKED_THRESHOLD;
use crate::types::{Cell, Direction, MapGeometry};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Cost multiplier for an orthogonal step.
pub const STRAIGHT_COST: u32 = 10;
/// Cost multiplier for a diagonal step.
pub const DIAGONAL_COST: u32 = 14;
/// Popping a node whose accumulated cost has reached this abandons the
/// search.
pub const MAX_PATH_COST: u32 = 100;

/// One pathfinding request. `tolerance` is in cells: a node within that
/// octile distance of the goal counts as arrived (0 means the exact goal).
#[derive(Clone, Copy, Debug)]
pub struct PathRequest {
    pub start: Cell,
    pub goal: Cell,
    pub tolerance: u32,
}

#[derive(Clone, Copy, Debug, Default)]
struct Node {
    generation: u32,
    g: u32,
    closed: bool,
    /// Direction the best known route enters this cell by.
    from: Option<Direction>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct OpenEntry {
    f: u32,
    g: u32,
    cell: Cell,
}

// Reversed so the BinaryHeap pops the lowest f first; ties resolve by cell
// index for run-to-run determinism.
impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .cmp(&self.f)
            .then_with(|| other.cell.0.cmp(&self.cell.0))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Reusable A* searcher. One per session; not shared across maps of
/// different sizes.
#[derive(Debug)]
pub struct Pathfinder {
    geometry: MapGeometry,
    nodes: Vec<Node>,
    open: BinaryHeap<OpenEntry>,
    generation: u32,
}

impl Pathfinder {
    pub fn new(geometry: MapGeometry) -> Self {
        Self {
            geometry,
            nodes: vec![Node::default(); geometry.cell_count()],
            open: BinaryHeap::new(),
            generation: 0,
        }
    }

    /// Search for a path from `start` toward `goal`. The returned
    /// directions are in travel order; empty means the start already
    /// satisfies the request (or nothing at all could be expanded).
    /// `cost` prices entering a cell; values above the blocked threshold
    /// are never entered.
    pub fn find_path(&mut self, request: PathRequest, cost: impl Fn(Cell) -> u16) -> Vec<Direction> {
        self.generation = self.generation.wrapping_add(1);
        self.open.clear();

        let arrive_within = request.tolerance * STRAIGHT_COST;
        let h_start = self.geometry.octile_distance(request.start, request.goal);

        self.touch(request.start);
        self.node_mut(request.start).g = 0;
        self.open.push(OpenEntry {
            f: h_start,
            g: 0,
            cell: request.start,
        });

        // Closest-to-goal node expanded so far, for the partial-path case.
        let mut best = (request.start, h_start);

        while let Some(entry) = self.open.pop() {
            let node = *self.node(entry.cell);
            // Lazily dropped: a better route to this cell was pushed later.
            if node.closed || node.g != entry.g {
                continue;
            }
            self.node_mut(entry.cell).closed = true;

            let h = self.geometry.octile_distance(entry.cell, request.goal);
            if h < best.1 {
                best = (entry.cell, h);
            }
            if h <= arrive_within {
                best = (entry.cell, h);
                break;
            }
            // Budget exhausted: abandon the search, keeping whatever node
            // got closest. Expanding cheaper frontier nodes past this point
            // would change the answer, not just trim it.
            if entry.g >= MAX_PATH_COST {
                break;
            }

            for dir in Direction::ALL {
                let Some(next) = self.geometry.neighbor(entry.cell, dir) else {
                    continue;
                };
                let cell_cost = cost(next);
                if cell_cost > BLOCKED_THRESHOLD {
                    continue;
                }
                let step = u32::from(cell_cost)
                    * if dir.is_diagonal() {
                        DIAGONAL_COST
                    } else {
                        STRAIGHT_COST
                    };
                let g = entry.g + step;

                self.touch(next);
                let known = self.node(next);
                if known.closed || (known.from.is_some() && known.g <= g) {
                    continue;
                }
                let node = self.node_mut(next);
                node.g = g;
                node.from = Some(dir);
                self.open.push(OpenEntry {
                    f: g + self.geometry.octile_distance(next, request.goal),
                    g,
                    cell: next,
                });
            }
        }

        self.reconstruct(request.start, best.0)
    }

    /// Walk the `from` links back from `end` and return the route in
    /// travel order.
    fn reconstruct(&self, start: Cell, end: Cell) -> Vec<Direction> {
        let mut path = Vec::new();
        let mut cell = end;
        while cell != start {
            let Some(dir) = self.node(cell).from else {
                break;
            };
            path.push(dir);
            match self.geometry.neighbor(cell, dir.opposite()) {
                Some(prev) => cell = prev,
                None => break,
            }
        }
        path.reverse();
        path
    }

    fn node(&self, cell: Cell) -> &Node {
        &self.nodes[usize::from(cell.0)]
    }

    fn node_mut(&mut self, cell: Cell) -> &mut Node {
        &mut self.nodes[usize::from(cell.0)]
    }

    /// Reset the cell's node if it still belongs to an earlier search.
    fn touch(&mut self, cell: Cell) {
        let generation = self.generation;
        let node = &mut self.nodes[usize::from(cell.0)];
        if node.generation != generation {
            *node = Node {
                generation,
                ..Node::default()
            };
        }
    }
}
