// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::Path};

use anyhow::{anyhow, Context};
use engine::physics::{
    BodyHandle, ColliderKind, ColliderSettings, ColliderShape, Hull, MotionType, PhysicsLimits,
    PhysicsManager, PhysicsSettings, RigidBodySettings, Transform,
};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A scene file, listing the bodies to simulate.
///
/// Has enum variants for breaking changes in the format of the scene file,
/// but [`read`] always returns the newest variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scene_file_version", rename_all = "snake_case")]
pub enum SceneFile {
    V1 {
        #[serde(default)]
        settings: SceneSettings,
        bodies: Vec<SceneBody>,
    },
}

/// Overrides for the [`PhysicsSettings`] defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneSettings {
    pub gravity: Option<Vec3>,
    pub ground: Option<f32>,
    pub solver_iterations: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneMotionType {
    Static,
    Kinematic,
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneBody {
    pub motion_type: SceneMotionType,
    #[serde(default)]
    pub position: Vec3,
    #[serde(default)]
    pub rotation: Quat,
    #[serde(default = "one")]
    pub scale: Vec3,
    pub friction: Option<f32>,
    pub restitution: Option<f32>,
    #[serde(default)]
    pub velocity: Vec3,
    #[serde(default)]
    pub user_data: u64,
    pub colliders: Vec<SceneCollider>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneCollider {
    pub shape: SceneShape,
    #[serde(default)]
    pub mass: f32,
    #[serde(default)]
    pub offset: Vec3,
    #[serde(default)]
    pub rotation: Quat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneShape {
    Sphere { radius: f32 },
    Capsule { radius: f32, length: f32 },
    Cuboid { half_extents: Vec3 },
    Hull { points: Vec<Vec3> },
}

fn one() -> Vec3 {
    Vec3::ONE
}

pub fn read(path: &Path) -> anyhow::Result<SceneFile> {
    let scene = fs::read_to_string(path).context("Failed to open the scene file")?;
    let scene = serde_json::from_str(&scene).context("Failed to parse the scene file")?;

    // NOTE: When there's new versions of SceneFile, convert to the newest
    // here (the rest of the sandbox assumes it)

    Ok(scene)
}

/// A pyramid of crates on the ground, with some balls and capsules dropped
/// on top.
pub fn built_in() -> SceneFile {
    let mut bodies = vec![SceneBody {
        motion_type: SceneMotionType::Static,
        position: Vec3::new(0.0, -0.5, 0.0),
        ..SceneBody::new(SceneShape::Cuboid {
            half_extents: Vec3::new(20.0, 0.5, 20.0),
        })
    }];

    let crate_shape = SceneShape::Cuboid {
        half_extents: Vec3::splat(0.5),
    };
    for row in 0..5 {
        for column in 0..(5 - row) {
            let x = column as f32 * 1.05 - (4 - row) as f32 * 0.525;
            bodies.push(SceneBody {
                position: Vec3::new(x, 0.5 + row as f32 * 1.01, 0.0),
                user_data: bodies.len() as u64,
                ..SceneBody::new(crate_shape.clone())
            });
        }
    }

    for i in 0..4 {
        let shape = if i % 2 == 0 {
            SceneShape::Sphere { radius: 0.4 }
        } else {
            SceneShape::Capsule {
                radius: 0.25,
                length: 0.8,
            }
        };
        bodies.push(SceneBody {
            position: Vec3::new(i as f32 * 0.7 - 1.0, 8.0 + i as f32 * 1.5, 0.1),
            rotation: Quat::from_rotation_z(i as f32 * 0.4),
            restitution: Some(0.4),
            user_data: bodies.len() as u64,
            ..SceneBody::new(shape)
        });
    }

    SceneFile::V1 {
        settings: SceneSettings::default(),
        bodies,
    }
}

impl SceneBody {
    /// A dynamic body with one collider of 1 kg.
    fn new(shape: SceneShape) -> SceneBody {
        SceneBody {
            motion_type: SceneMotionType::Dynamic,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            friction: None,
            restitution: None,
            velocity: Vec3::ZERO,
            user_data: 0,
            colliders: vec![SceneCollider {
                shape,
                mass: 1.0,
                offset: Vec3::ZERO,
                rotation: Quat::IDENTITY,
            }],
        }
    }

    pub fn to_settings(&self) -> anyhow::Result<RigidBodySettings> {
        let motion_type = match self.motion_type {
            SceneMotionType::Static => MotionType::Static,
            SceneMotionType::Kinematic => MotionType::Kinematic,
            SceneMotionType::Dynamic => MotionType::Dynamic,
        };
        let transform = Transform {
            position: self.position,
            orientation: self.rotation,
            scale: self.scale,
        };
        let mut settings = RigidBodySettings::new(motion_type, transform)
            .with_linear_velocity(self.velocity)
            .with_user_data(self.user_data);
        if let Some(friction) = self.friction {
            settings = settings.with_friction(friction);
        }
        if let Some(restitution) = self.restitution {
            settings = settings.with_restitution(restitution);
        }
        for collider in &self.colliders {
            let shape = match &collider.shape {
                SceneShape::Sphere { radius } => ColliderShape::Sphere { radius: *radius },
                SceneShape::Capsule { radius, length } => ColliderShape::Capsule {
                    radius: *radius,
                    length: *length,
                },
                SceneShape::Cuboid { half_extents } => ColliderShape::Hull(
                    Hull::cuboid(*half_extents)
                        .ok_or_else(|| anyhow!("Cuboid has non-positive half extents"))?,
                ),
                SceneShape::Hull { points } => ColliderShape::Hull(
                    Hull::from_points(points)
                        .ok_or_else(|| anyhow!("Hull points are degenerate or too many"))?,
                ),
            };
            let collider = ColliderSettings::new(shape, collider.mass)
                .with_relative_position(collider.offset)
                .with_relative_rotation(collider.rotation);
            settings = settings.with_collider(collider)?;
        }
        Ok(settings)
    }
}

impl SceneFile {
    pub fn bodies(&self) -> &[SceneBody] {
        match self {
            SceneFile::V1 { bodies, .. } => bodies,
        }
    }

    pub fn apply_settings(&self, physics_settings: &mut PhysicsSettings) {
        let SceneFile::V1 { settings, .. } = self;
        if let Some(gravity) = settings.gravity {
            physics_settings.gravity = gravity;
        }
        if let Some(ground) = settings.ground {
            physics_settings.ground = Some(ground);
        }
        if let Some(iterations) = settings.solver_iterations {
            physics_settings.solver_iterations = iterations;
        }
    }

    /// Limits that fit this scene, with room for twice as many bodies to be
    /// spawned at runtime.
    pub fn limits(&self) -> PhysicsLimits {
        let mut limits = PhysicsLimits::default();
        let bodies = self.bodies();
        let moving = bodies.iter().filter(|b| b.motion_type != SceneMotionType::Static);
        limits.bodies = limits.bodies.max(2 * bodies.len() as u32);
        limits.moving_bodies = limits.moving_bodies.max(2 * moving.count() as u32);
        for body in bodies {
            for collider in &body.colliders {
                let kind = match collider.shape {
                    SceneShape::Sphere { .. } => ColliderKind::Sphere,
                    SceneShape::Capsule { .. } => ColliderKind::Capsule,
                    SceneShape::Cuboid { .. } | SceneShape::Hull { .. } => ColliderKind::Hull,
                };
                limits.colliders[kind] += 2;
            }
        }
        limits
    }

    /// Creates all the bodies of the scene.
    pub fn spawn(&self, manager: &mut PhysicsManager) -> anyhow::Result<Vec<BodyHandle>> {
        let mut handles = Vec::with_capacity(self.bodies().len());
        for (i, body) in self.bodies().iter().enumerate() {
            let settings = (body.to_settings())
                .with_context(|| format!("Invalid body #{i} in the scene"))?;
            let handle = (manager.create_rigid_body(&settings))
                .with_context(|| format!("Failed to create body #{i} of the scene"))?;
            handles.push(handle);
        }
        debug!("Spawned {} bodies.", handles.len());
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use engine::{
        allocators::LinearAllocator,
        physics::{ColliderKind, PhysicsError, PhysicsManager, PhysicsSettings},
    };
    use glam::Vec3;

    use super::{built_in, SceneFile, SceneMotionType, SceneShape};
    use crate::std_platform::StdPlatform;

    const SCENE: &str = r#"{
        "scene_file_version": "v1",
        "settings": { "ground": 0.0, "gravity": [0.0, -1.62, 0.0] },
        "bodies": [
            {
                "motion_type": "dynamic",
                "position": [0.0, 2.0, 0.0],
                "restitution": 0.2,
                "colliders": [
                    { "shape": { "sphere": { "radius": 0.5 } }, "mass": 2.0 },
                    {
                        "shape": { "cuboid": { "half_extents": [0.2, 0.2, 0.2] } },
                        "mass": 1.0,
                        "offset": [0.0, 0.6, 0.0]
                    }
                ]
            },
            {
                "motion_type": "static",
                "scale": [2.0, 1.0, 2.0],
                "colliders": [{ "shape": { "capsule": { "radius": 0.5, "length": 1.0 } } }]
            }
        ]
    }"#;

    #[test]
    fn parses_scene_files() {
        let scene: SceneFile = serde_json::from_str(SCENE).unwrap();
        let bodies = scene.bodies();
        assert_eq!(2, bodies.len());
        assert_eq!(SceneMotionType::Dynamic, bodies[0].motion_type);
        assert_eq!(Vec3::new(0.0, 0.6, 0.0), bodies[0].colliders[1].offset);
        assert_eq!(Vec3::ONE, bodies[0].scale);
        assert_eq!(
            SceneShape::Capsule {
                radius: 0.5,
                length: 1.0
            },
            bodies[1].colliders[0].shape,
        );

        let mut settings = PhysicsSettings::default();
        scene.apply_settings(&mut settings);
        assert_eq!(Some(0.0), settings.ground);
        assert_eq!(-1.62, settings.gravity.y);
        assert_eq!(8, settings.solver_iterations);

        let limits = scene.limits();
        assert!(limits.colliders[ColliderKind::Capsule] >= 2);
    }

    #[test]
    fn unknown_shapes_are_rejected() {
        let scene = SCENE.replace("\"sphere\"", "\"cylinder\"");
        assert!(serde_json::from_str::<SceneFile>(&scene).is_err());
    }

    #[test]
    fn spawns_and_simulates_the_built_in_scene() {
        let platform = StdPlatform::new();
        let arena = LinearAllocator::new(&platform, 64 * 1024 * 1024).unwrap();
        let scene = built_in();
        let mut manager =
            PhysicsManager::new(&arena, scene.limits(), PhysicsSettings::default()).unwrap();
        let handles = scene.spawn(&mut manager).unwrap();
        assert_eq!(scene.bodies().len(), handles.len());
        for _ in 0..120 {
            manager.update(1.0 / 60.0).unwrap();
        }
        // Nothing falls through the ground.
        for (_, body) in manager.bodies() {
            assert!(body.position.y > -0.6, "{body:?} fell through the ground");
        }
    }

    #[test]
    fn dynamic_bodies_need_mass() {
        let platform = StdPlatform::new();
        let arena = LinearAllocator::new(&platform, 64 * 1024 * 1024).unwrap();
        let scene: SceneFile = serde_json::from_str(SCENE).unwrap();
        let mut manager =
            PhysicsManager::new(&arena, scene.limits(), PhysicsSettings::default()).unwrap();
        let SceneFile::V1 { mut bodies, settings } = scene;
        for collider in &mut bodies[0].colliders {
            collider.mass = 0.0;
        }
        let massless = SceneFile::V1 { settings, bodies };
        let error = massless.spawn(&mut manager).unwrap_err();
        assert_eq!(Some(&PhysicsError::InvalidMass), error.downcast_ref::<PhysicsError>());
    }
}
