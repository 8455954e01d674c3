// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::time::Duration;

use tracing::debug;

/// Splits real time into fixed-length physics steps.
///
/// Each frame, [`FixedTimestep::advance`] is called with the current time,
/// and it returns how many steps should be simulated. The time left over is
/// available as [`FixedTimestep::blend_factor`], for
/// [extrapolating](super::PhysicsManager::extrapolate) the rendered
/// transforms between steps.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    step: Duration,
    max_steps_per_frame: u32,
    accumulator: Duration,
    last_time: Option<Duration>,
}

impl FixedTimestep {
    /// Creates a timestep of `step`. If a frame would need more than
    /// `max_steps_per_frame` steps to catch up, the extra time is dropped
    /// and the simulation slows down instead.
    pub fn new(step: Duration, max_steps_per_frame: u32) -> FixedTimestep {
        FixedTimestep {
            step: step.max(Duration::from_micros(1)),
            max_steps_per_frame: max_steps_per_frame.max(1),
            accumulator: Duration::ZERO,
            last_time: None,
        }
    }

    /// The length of each step, in seconds.
    pub fn dt(&self) -> f32 {
        self.step.as_secs_f32()
    }

    /// Adds the time passed since the last call (the first call just starts
    /// the clock), and returns the amount of steps to simulate.
    pub fn advance(&mut self, now: Duration) -> u32 {
        let last_time = self.last_time.replace(now).unwrap_or(now);
        self.accumulator += now.saturating_sub(last_time);

        let max_accumulated = self.step * self.max_steps_per_frame;
        if self.accumulator > max_accumulated {
            let dropped = self.accumulator - max_accumulated;
            debug!("Physics can't keep up, dropping {dropped:?} of simulation time.");
            self.accumulator = max_accumulated;
        }

        let mut steps = 0;
        while self.accumulator >= self.step {
            self.accumulator -= self.step;
            steps += 1;
        }
        steps
    }

    /// How far into the next step the current time is, between 0 and 1.
    pub fn blend_factor(&self) -> f32 {
        self.accumulator.as_secs_f32() / self.step.as_secs_f32()
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use platform::Platform;

    use super::FixedTimestep;
    use crate::test_platform::TestPlatform;

    #[test]
    fn steps_follow_the_clock() {
        let platform = TestPlatform::new();
        let mut timestep = FixedTimestep::new(Duration::from_millis(10), 4);
        assert_eq!(0, timestep.advance(platform.elapsed()));

        platform.set_elapsed(Duration::from_millis(25));
        assert_eq!(2, timestep.advance(platform.elapsed()));
        assert!((timestep.blend_factor() - 0.5).abs() < 1e-5);

        platform.set_elapsed(Duration::from_millis(30));
        assert_eq!(1, timestep.advance(platform.elapsed()));
        assert!(timestep.blend_factor().abs() < 1e-5);
    }

    #[test]
    fn long_frames_drop_time() {
        let platform = TestPlatform::new();
        let mut timestep = FixedTimestep::new(Duration::from_millis(10), 4);
        timestep.advance(platform.elapsed());

        platform.set_elapsed(Duration::from_secs(5));
        assert_eq!(4, timestep.advance(platform.elapsed()));
        assert_eq!(0.0, timestep.blend_factor());

        platform.set_elapsed(Duration::from_millis(5005));
        assert_eq!(0, timestep.advance(platform.elapsed()));
        assert!((timestep.blend_factor() - 0.5).abs() < 1e-5);
    }
}
