//! Incremental collider tracking.
//!
//! The builder's input set accumulates a [`ColliderSnapshot`] per tracked
//! [`NavmeshAffector`] entity between builds. The set lives behind a mutex:
//! the frame thread mutates it on collider add/remove, and the build worker
//! holds the lock for the whole backend invocation. That region is the only
//! shared-state exclusion in the crate and guarantees builder mutation and
//! builder consumption never interleave. It does not guarantee freshness; a
//! collider changing mid-build is captured by the next build.

use bevy_ecs::prelude::*;
use bevy_math::bounding::Aabb3d;
use bevy_platform::collections::HashMap;
use bevy_reflect::prelude::*;
use bevy_transform::components::{GlobalTransform, Transform};
use glam::{Vec3, Vec3A};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    driver::DynamicNavmeshState,
    settings::{CollisionGroupFlags, DynamicNavmeshConfig},
};

/// A static collider contributing geometry to the navmesh. Attach to entities
/// under the bound scene root; adding or removing the component schedules a
/// rebuild when automatic rebuild is enabled.
#[derive(Component, Debug, Clone, Reflect)]
#[reflect(Component)]
#[require(Transform)]
pub struct NavmeshAffector {
    /// Collision shape of the collider.
    pub shape: ColliderShape,
    /// Collision layer of the collider. Geometry is sampled only if this
    /// intersects the configured included layers and the sampling group's
    /// filter.
    #[reflect(ignore)]
    pub group: CollisionGroupFlags,
}

impl NavmeshAffector {
    /// A box collider on the default collision layers.
    pub fn cuboid(half_extents: Vec3) -> Self {
        Self {
            shape: ColliderShape::Cuboid { half_extents },
            group: CollisionGroupFlags::default(),
        }
    }

    /// A sphere collider on the default collision layers.
    pub fn sphere(radius: f32) -> Self {
        Self {
            shape: ColliderShape::Sphere { radius },
            group: CollisionGroupFlags::default(),
        }
    }

    /// Restrict the collider to the given collision layers.
    pub fn with_group(mut self, group: CollisionGroupFlags) -> Self {
        self.group = group;
        self
    }
}

/// Collision shape of a [`NavmeshAffector`], in local space.
#[derive(Debug, Clone, Copy, PartialEq, Reflect)]
pub enum ColliderShape {
    /// An axis-aligned box.
    Cuboid {
        /// Half extents along each local axis.
        half_extents: Vec3,
    },
    /// A sphere centered on the entity.
    Sphere {
        /// Sphere radius.
        radius: f32,
    },
    /// A vertical capsule centered on the entity.
    Capsule {
        /// Capsule radius.
        radius: f32,
        /// Half the length of the cylindrical part.
        half_length: f32,
    },
}

impl ColliderShape {
    /// The local-space bounding box of the shape.
    pub fn local_aabb(&self) -> Aabb3d {
        let half = match *self {
            Self::Cuboid { half_extents } => half_extents,
            Self::Sphere { radius } => Vec3::splat(radius),
            Self::Capsule {
                radius,
                half_length,
            } => Vec3::new(radius, half_length + radius, radius),
        };
        Aabb3d::new(Vec3::ZERO, half)
    }
}

/// Default shape is a unit cube; mainly useful for reflection round-trips.
impl Default for ColliderShape {
    fn default() -> Self {
        Self::Cuboid {
            half_extents: Vec3::splat(0.5),
        }
    }
}

/// One static collider's shape and world transform at the moment it was
/// observed.
#[derive(Debug, Clone)]
pub struct ColliderSnapshot {
    /// Local-space shape.
    pub shape: ColliderShape,
    /// World transform at observation time.
    pub transform: GlobalTransform,
    /// Collision layer of the collider.
    pub group: CollisionGroupFlags,
}

impl ColliderSnapshot {
    /// World-space bounding box of the snapshot.
    pub fn world_aabb(&self) -> Aabb3d {
        world_aabb(&self.shape, &self.transform)
    }
}

/// The builder's incremental input set: the currently known collider
/// snapshots, keyed by the owning entity.
#[derive(Debug, Default)]
pub struct NavmeshSourceSet {
    colliders: HashMap<Entity, ColliderSnapshot>,
}

impl NavmeshSourceSet {
    /// Insert or replace the snapshot for `entity`.
    pub fn insert(&mut self, entity: Entity, snapshot: ColliderSnapshot) {
        self.colliders.insert(entity, snapshot);
    }

    /// Remove the snapshot owned by `entity`. Returns whether one was present.
    pub fn remove(&mut self, entity: Entity) -> bool {
        self.colliders.remove(&entity).is_some()
    }

    /// Whether a snapshot for `entity` is present.
    pub fn contains(&self, entity: Entity) -> bool {
        self.colliders.contains_key(&entity)
    }

    /// Number of tracked colliders.
    pub fn len(&self) -> usize {
        self.colliders.len()
    }

    /// Whether no colliders are tracked.
    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }

    /// Iterate over the tracked snapshots.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &ColliderSnapshot)> {
        self.colliders.iter().map(|(entity, snap)| (*entity, snap))
    }

    pub(crate) fn clear(&mut self) {
        self.colliders.clear();
    }
}

/// The shared incremental source set. Cloning is cheap; clones refer to the
/// same underlying set.
#[derive(Resource, Debug, Clone, Default)]
pub struct SharedSources(Arc<Mutex<NavmeshSourceSet>>);

impl SharedSources {
    /// Lock the set. Recovers from poisoning: a build task that panicked can
    /// only have been reading.
    pub fn lock(&self) -> MutexGuard<'_, NavmeshSourceSet> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of tracked colliders.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no colliders are tracked.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether a snapshot for `entity` is present.
    pub fn contains(&self, entity: Entity) -> bool {
        self.lock().contains(entity)
    }
}

/// Applies collider add/remove events to the shared source set.
///
/// Changes are batched: any number of collider events within one frame set
/// the pending flag once, so a scene load does not schedule a build per
/// collider. Removal is by entity identity and is performed even for entities
/// whose hierarchy is already gone.
pub(crate) fn track_collider_changes(
    config: Res<DynamicNavmeshConfig>,
    mut state: ResMut<DynamicNavmeshState>,
    sources: Res<SharedSources>,
    added: Query<(Entity, &NavmeshAffector, &GlobalTransform), Added<NavmeshAffector>>,
    mut removed: RemovedComponents<NavmeshAffector>,
    parents: Query<&ChildOf>,
) {
    if !config.enabled {
        removed.clear();
        return;
    }
    let Some(scene) = state.bound_scene() else {
        removed.clear();
        return;
    };
    if added.is_empty() && removed.is_empty() {
        return;
    }

    let mut changed = false;
    {
        let mut set = sources.lock();
        for (entity, affector, transform) in &added {
            if !in_scene(scene, entity, &parents) {
                continue;
            }
            set.insert(
                entity,
                ColliderSnapshot {
                    shape: affector.shape,
                    transform: *transform,
                    group: affector.group,
                },
            );
            changed = true;
        }
        for entity in removed.read() {
            if set.remove(entity) {
                changed = true;
            }
        }
    }

    if changed && config.automatic_rebuild {
        state.mark_pending();
    }
}

/// Whether `entity` lives under the scene root `scene` (or is the root).
pub(crate) fn in_scene(scene: Entity, entity: Entity, parents: &Query<&ChildOf>) -> bool {
    entity == scene || parents.iter_ancestors(entity).any(|a| a == scene)
}

/// Snapshot the world-space bounding boxes of every tracked collider under
/// `scene` whose layer intersects `included`.
///
/// Must run on the main thread, before the build is handed to the worker:
/// transforms are owned by the frame loop and are only settled here.
pub(crate) fn collect_bounding_boxes(
    scene: Entity,
    affectors: &Query<(Entity, &NavmeshAffector, &GlobalTransform)>,
    parents: &Query<&ChildOf>,
    included: CollisionGroupFlags,
) -> Vec<(Entity, Aabb3d)> {
    affectors
        .iter()
        .filter(|(entity, affector, _)| {
            affector.group.intersects(included) && in_scene(scene, *entity, parents)
        })
        .map(|(entity, affector, transform)| (entity, world_aabb(&affector.shape, transform)))
        .collect()
}

/// World-space bounding box of `shape` under `transform`.
pub fn world_aabb(shape: &ColliderShape, transform: &GlobalTransform) -> Aabb3d {
    let local = shape.local_aabb();
    let affine = transform.affine();
    let mut min = Vec3A::splat(f32::INFINITY);
    let mut max = Vec3A::splat(f32::NEG_INFINITY);
    for i in 0..8 {
        let corner = Vec3A::new(
            if i & 1 == 0 { local.min.x } else { local.max.x },
            if i & 2 == 0 { local.min.y } else { local.max.y },
            if i & 4 == 0 { local.min.z } else { local.max.z },
        );
        let world = affine.transform_point3a(corner);
        min = min.min(world);
        max = max.max(world);
    }
    Aabb3d { min, max }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    fn assert_vec3a_eq(a: Vec3A, b: Vec3A) {
        assert!((a - b).abs().max_element() < 1e-4, "{a} != {b}");
    }

    #[test]
    fn cuboid_world_aabb_translates() {
        let shape = ColliderShape::Cuboid {
            half_extents: Vec3::new(1.0, 2.0, 3.0),
        };
        let transform = GlobalTransform::from(Transform::from_xyz(10.0, 0.0, -5.0));
        let aabb = world_aabb(&shape, &transform);
        assert_vec3a_eq(aabb.min, Vec3A::new(9.0, -2.0, -8.0));
        assert_vec3a_eq(aabb.max, Vec3A::new(11.0, 2.0, -2.0));
    }

    #[test]
    fn rotated_cuboid_aabb_covers_all_corners() {
        let shape = ColliderShape::Cuboid {
            half_extents: Vec3::new(1.0, 1.0, 1.0),
        };
        let transform = GlobalTransform::from(
            Transform::from_rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_4)),
        );
        let aabb = world_aabb(&shape, &transform);
        let expected = 2.0f32.sqrt();
        assert_vec3a_eq(aabb.min, Vec3A::new(-expected, -1.0, -expected));
        assert_vec3a_eq(aabb.max, Vec3A::new(expected, 1.0, expected));
    }

    #[test]
    fn capsule_aabb_includes_caps() {
        let shape = ColliderShape::Capsule {
            radius: 0.5,
            half_length: 1.0,
        };
        let aabb = shape.local_aabb();
        assert_vec3a_eq(aabb.min, Vec3A::new(-0.5, -1.5, -0.5));
        assert_vec3a_eq(aabb.max, Vec3A::new(0.5, 1.5, 0.5));
    }

    #[test]
    fn source_set_removal_is_by_identity() {
        let mut world = World::new();
        let mut set = NavmeshSourceSet::default();
        let a = world.spawn_empty().id();
        let b = world.spawn_empty().id();
        set.insert(
            a,
            ColliderSnapshot {
                shape: ColliderShape::default(),
                transform: GlobalTransform::default(),
                group: CollisionGroupFlags::ALL,
            },
        );
        assert!(set.contains(a));
        assert!(!set.remove(b));
        assert!(set.remove(a));
        assert!(set.is_empty());
    }
}
