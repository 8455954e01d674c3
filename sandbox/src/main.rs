// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

mod cli;
mod scene;
mod std_platform;

use std::{thread, time::Duration};

use anyhow::Context;
use engine::{
    allocators::{
        ChunkMemoryResource, DebugMemoryResource, LinearAllocator, MultiBufferMemoryResource,
        PoolMemoryResource,
    },
    collections::FixedVec,
    physics::{
        BodyHandle, DebugLine, FixedTimestep, PhysicsError, PhysicsManager, PhysicsSettings,
    },
};
use platform::Platform as _;
use tracing::{debug, info, trace, warn};

use crate::std_platform::StdPlatform;

/// Bodies that fall below this are removed.
const KILL_HEIGHT: f32 = -50.0;
const PHYSICS_MEMORY: usize = 128 * 1024 * 1024;
const DEBUG_LINES: usize = 16 * 1024;

fn main() -> anyhow::Result<()> {
    let options = cli::options().run();
    tracing_subscriber::fmt()
        .with_max_level(options.verbosity_level)
        .init();

    let scene = match &options.scene {
        Some(path) => scene::read(path)
            .with_context(|| format!("Failed to load the scene from {}", path.display()))?,
        None => scene::built_in(),
    };

    let platform = StdPlatform::new();
    let persistent_arena = LinearAllocator::new(&platform, PHYSICS_MEMORY)
        .context("Failed to allocate memory for the physics")?;
    let physics_memory = DebugMemoryResource::new("physics", &persistent_arena);
    // Small, short-lived allocations, recycled from step to step.
    let scratch_chunks = ChunkMemoryResource::new(&platform, 64 * 1024, 1024 * 1024);
    let scratch = PoolMemoryResource::new(&scratch_chunks);
    // The debug lines of a frame are kept around for the next frame, like a
    // renderer drawing one frame behind would need.
    let mut frame_memory = MultiBufferMemoryResource::<2>::new(
        &platform,
        DEBUG_LINES * size_of::<DebugLine>() + 1024,
    )
    .context("Failed to allocate the frame buffers")?;

    let mut settings = PhysicsSettings::default();
    scene.apply_settings(&mut settings);
    let mut physics = PhysicsManager::new(&physics_memory, scene.limits(), settings)
        .context("Failed to create the physics world")?;
    let bodies = scene.spawn(&mut physics)?;
    info!(
        "Simulating {} bodies for {} seconds at {} Hz.",
        bodies.len(),
        options.seconds,
        options.step_rate,
    );

    let step = Duration::from_secs_f64(1.0 / options.step_rate as f64);
    let frame_time = Duration::from_secs_f64(1.0 / options.frame_rate as f64);
    let mut timestep = FixedTimestep::new(step, options.max_steps_per_frame);
    let frames = (options.seconds as f64 * options.frame_rate as f64).ceil() as u64;
    let mut steps_taken = 0u64;

    for frame in 0..=frames {
        let frame_start = frame_time * frame as u32;
        let now = if options.realtime {
            thread::sleep(frame_start.saturating_sub(platform.elapsed()));
            platform.elapsed()
        } else {
            frame_start
        };

        for _ in 0..timestep.advance(now) {
            match physics.update(timestep.dt()) {
                Ok(()) => {}
                Err(PhysicsError::CapacityExceeded(pool)) => {
                    warn!("Physics step skipped some collisions, {pool:?} is full.");
                }
                Err(err) => return Err(err).context("Physics step failed"),
            }
            remove_fallen_bodies(&mut physics, &scratch)?;
            steps_taken += 1;
        }

        {
            let mut lines = FixedVec::<DebugLine>::new(&frame_memory, DEBUG_LINES)
                .context("Failed to allocate the debug lines")?;
            if !physics.debug_draw(&mut lines) {
                debug!("Out of space for debug lines, the wireframe is incomplete.");
            }
            trace!("Frame {frame} has {} debug lines.", lines.len());
        }
        frame_memory.swap_buffers();

        let mut highest = f32::NEG_INFINITY;
        physics.extrapolate(timestep.blend_factor(), |_, body, transform| {
            if !body.is_static() {
                highest = highest.max(transform.position.y);
            }
        });
        if frame % options.frame_rate as u64 == 0 {
            let stats = physics.stats();
            info!(
                frame,
                steps = steps_taken,
                bodies = stats.bodies,
                arbiters = stats.arbiters,
                contacts = stats.contacts,
                bvh_height = stats.bvh_height,
                "Highest moving body at y = {highest:.3}.",
            );
        }
    }

    for (handle, body) in physics.bodies().filter(|(_, body)| !body.is_static()) {
        debug!(
            "Body {handle:?} (user data {}) ended up at {:.3}.",
            body.user_data, body.position,
        );
    }
    let memory = physics_memory.stats();
    info!(
        peak_bytes = memory.peak_bytes,
        scratch_pooled_bytes = scratch.pooled_bytes(),
        scratch_reserved_bytes = scratch_chunks.reserved(),
        "Simulated {steps_taken} steps.",
    );

    drop(physics);
    physics_memory.report_leaks();
    Ok(())
}

/// Queues the bodies that have fallen out of the world for removal.
fn remove_fallen_bodies(physics: &mut PhysicsManager, scratch: &PoolMemoryResource) -> anyhow::Result<()> {
    let capacity = physics.limits().pending_removals as usize;
    let mut fallen = FixedVec::<BodyHandle>::new(scratch, capacity)
        .context("Failed to allocate the removal list")?;
    for (handle, body) in physics.bodies() {
        if body.position.y < KILL_HEIGHT && fallen.push(handle).is_err() {
            break;
        }
    }
    for &handle in fallen.iter() {
        debug!("Body {handle:?} fell out of the world.");
        if let Err(err) = physics.queue_removal(handle) {
            warn!("Can't remove {handle:?} yet: {err}.");
            break;
        }
    }
    Ok(())
}
