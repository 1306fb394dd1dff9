//! The pluggable navmesh build backend.
//!
//! The geometric build is a black box to this crate: a synchronous function
//! from grouped geometry, settings, and a cancellation token to a mesh. Only
//! one backend can be registered at a time; by default, none is set and
//! builds report [`NavmeshBuildOutcome::Unavailable`](crate::NavmeshBuildOutcome::Unavailable).

use anyhow::Result;
use bevy_app::prelude::*;
use bevy_ecs::prelude::*;
use glam::Vec3;
use std::sync::Arc;

use crate::{
    Navmesh, NavmeshLayer,
    coordinator::{CancellationToken, NavmeshBuildJob},
    sources::NavmeshSourceSet,
};

/// A navmesh build implementation.
///
/// Called on a worker thread while the incremental source set's lock is held;
/// the implementation must not reach back into the `World`. Long-running
/// implementations must poll `cancel` at bounded intervals and return
/// promptly once it reports cancellation — the return value of a cancelled
/// call is discarded.
pub trait NavmeshBuildBackend: Send + Sync {
    /// Build a navmesh from the current source set.
    fn build(
        &self,
        job: &NavmeshBuildJob,
        sources: &NavmeshSourceSet,
        cancel: &CancellationToken,
    ) -> Result<Navmesh>;
}

/// The currently registered backend, set through
/// [`NavmeshBackendApp::set_navmesh_build_backend`].
#[derive(Resource, Clone)]
pub struct NavmeshBackend(Arc<dyn NavmeshBuildBackend>);

impl NavmeshBackend {
    /// Wrap a backend for registration.
    pub fn new(backend: impl NavmeshBuildBackend + 'static) -> Self {
        Self(Arc::new(backend))
    }

    pub(crate) fn shared(&self) -> Arc<dyn NavmeshBuildBackend> {
        self.0.clone()
    }
}

/// Extension used to register a build backend on [`App`].
pub trait NavmeshBackendApp {
    /// Set the backend that performs navmesh builds. Only one backend can be
    /// set at a time; setting a backend replaces any existing one. By
    /// default, no backend is set.
    fn set_navmesh_build_backend(&mut self, backend: impl NavmeshBuildBackend + 'static)
    -> &mut App;
}

impl NavmeshBackendApp for App {
    fn set_navmesh_build_backend(
        &mut self,
        backend: impl NavmeshBuildBackend + 'static,
    ) -> &mut App {
        self.insert_resource(NavmeshBackend::new(backend));
        self
    }
}

/// Reference backend that emits the top face of every source's bounding box,
/// inset by the group's agent radius.
///
/// This is not a real voxelization pipeline. It exists for prototyping and
/// tests: it honors group filters, produces one layer per group in group
/// order, and checks its cancellation token once per source.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatSurfaceBackend;

impl NavmeshBuildBackend for FlatSurfaceBackend {
    fn build(
        &self,
        job: &NavmeshBuildJob,
        sources: &NavmeshSourceSet,
        cancel: &CancellationToken,
    ) -> Result<Navmesh> {
        // Deterministic output regardless of map iteration order.
        let mut snapshots: Vec<_> = sources.iter().collect();
        snapshots.sort_by_key(|(entity, _)| *entity);

        let mut layers = Vec::with_capacity(job.groups.len());
        for (group_index, group) in job.groups.iter().enumerate() {
            let sampled = job.included_groups & group.filter;
            let mut layer = NavmeshLayer {
                group_index,
                ..Default::default()
            };
            for (_, snapshot) in &snapshots {
                if cancel.is_cancelled() {
                    return Ok(Navmesh { layers });
                }
                if !snapshot.group.intersects(sampled) {
                    continue;
                }
                let aabb = snapshot.world_aabb();
                let inset = group.agent.radius;
                let min_x = aabb.min.x + inset;
                let max_x = aabb.max.x - inset;
                let min_z = aabb.min.z + inset;
                let max_z = aabb.max.z - inset;
                if min_x >= max_x || min_z >= max_z {
                    // Too small for the agent to stand on.
                    continue;
                }
                let top = aabb.max.y;
                let base = layer.vertices.len() as u32;
                layer.vertices.extend([
                    Vec3::new(min_x, top, min_z),
                    Vec3::new(max_x, top, min_z),
                    Vec3::new(max_x, top, max_z),
                    Vec3::new(min_x, top, max_z),
                ]);
                layer
                    .triangles
                    .extend([[base, base + 1, base + 2], [base, base + 2, base + 3]]);
            }
            layers.push(layer);
        }
        Ok(Navmesh { layers })
    }
}
