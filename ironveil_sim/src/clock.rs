// Wall-clock to tick quantization.
//
// The simulation advances in discrete ticks derived from elapsed real time:
// one tick is 32 milliseconds (`elapsed_ms >> TICK_SHIFT`). The clock never
// resets during a session, so ticks are monotonically non-decreasing.
//
// Only `GameSession::advance` reads the clock; everything below the session
// (queue, tasks) takes `now` as a plain value, which is what makes the
// scheduler testable without real time passing.

use crate::types::Tick;
use std::time::Instant;

/// Right-shift applied to elapsed milliseconds to obtain the current tick.
pub const TICK_SHIFT: u32 = 5;

/// Monotonic session clock.
#[derive(Clone, Copy, Debug)]
pub struct GameClock {
    started: Instant,
}

impl GameClock {
    /// Start the clock. Tick 0 begins now.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the clock started.
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// The current tick: elapsed milliseconds quantized by `TICK_SHIFT`.
    pub fn current_tick(&self) -> Tick {
        self.elapsed_ms() >> TICK_SHIFT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_never_decrease() {
        let clock = GameClock::start();
        let a = clock.current_tick();
        let b = clock.current_tick();
        assert!(b >= a);
    }

    #[test]
    fn tick_quantization_is_32ms() {
        // 31 ms is still tick 0; 32 ms is tick 1; 1 second is tick 31.
        assert_eq!(31u64 >> TICK_SHIFT, 0);
        assert_eq!(32u64 >> TICK_SHIFT, 1);
        assert_eq!(1000u64 >> TICK_SHIFT, 31);
    }
}
