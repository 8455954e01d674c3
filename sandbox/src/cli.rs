// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use bpaf::{batteries::verbose_by_slice, construct, long, OptionParser, Parser};
use tracing::level_filters::LevelFilter;

#[derive(Debug, Clone)]
pub struct Options {
    pub verbosity_level: LevelFilter,
    pub step_rate: u32,
    pub frame_rate: u32,
    pub max_steps_per_frame: u32,
    pub seconds: f32,
    pub realtime: bool,
    pub scene: Option<PathBuf>,
}

pub fn options() -> OptionParser<Options> {
    let verbosity_level = verbose_by_slice(
        3,
        [
            LevelFilter::OFF,
            LevelFilter::ERROR,
            LevelFilter::WARN,
            LevelFilter::INFO,
            LevelFilter::DEBUG,
            LevelFilter::TRACE,
        ],
    );

    let step_rate = long("step-rate")
        .help("Physics steps per second")
        .argument::<u32>("HZ")
        .guard(|&hz| hz > 0, "the step rate must be positive")
        .fallback(120)
        .display_fallback();

    let frame_rate = long("frame-rate")
        .help("Rendered frames per second")
        .argument::<u32>("HZ")
        .guard(|&hz| hz > 0, "the frame rate must be positive")
        .fallback(60)
        .display_fallback();

    let max_steps_per_frame = long("max-steps")
        .help("Maximum physics steps per frame, time beyond that is dropped")
        .argument::<u32>("STEPS")
        .fallback(8)
        .display_fallback();

    let seconds = long("seconds")
        .help("How long to run the simulation for")
        .argument::<f32>("SECONDS")
        .guard(|&s| s.is_finite() && s >= 0.0, "the duration can't be negative")
        .fallback(10.0)
        .display_fallback();

    let realtime = long("realtime")
        .help("Run at the speed of the wall clock instead of as fast as possible")
        .switch();

    let scene = long("scene")
        .help("Loads the bodies from a JSON scene file instead of the built-in scene")
        .argument::<PathBuf>("FILE")
        .complete_shell(bpaf::ShellComp::File { mask: Some("*.json") })
        .optional();

    construct!(Options {
        verbosity_level,
        step_rate,
        frame_rate,
        max_steps_per_frame,
        seconds,
        realtime,
        scene,
    })
    .to_options()
    .descr("Runs the physics simulation headlessly, logging what happens")
}

#[cfg(test)]
mod tests {
    use super::options;

    #[test]
    fn check_bpaf_invariants() {
        options().check_invariants(true);
    }

    #[test]
    fn defaults_and_guards() {
        let parsed = options().run_inner(&["--seconds", "2.5"]).unwrap();
        assert_eq!(120, parsed.step_rate);
        assert_eq!(60, parsed.frame_rate);
        assert_eq!(2.5, parsed.seconds);
        assert_eq!(None, parsed.scene);
        assert!(!parsed.realtime);

        assert!(options().run_inner(&["--step-rate", "0"]).is_err());
    }
}
