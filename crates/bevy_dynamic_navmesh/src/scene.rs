//! Scene binding.
//!
//! The engine names its current scene root in [`ActiveNavmeshScene`]; the
//! driver compares it against the bound scene every frame. A swap tears the
//! old binding down completely (no stale collider data carries across
//! scenes) and replays the colliders already present under the new root, so
//! binding behaves the same whether colliders were spawned before or after
//! it.

use bevy_ecs::prelude::*;
use bevy_reflect::prelude::*;
use bevy_transform::components::GlobalTransform;

use crate::{
    coordinator::BuildCoordinator,
    driver::DynamicNavmeshState,
    settings::DynamicNavmeshConfig,
    sources::{ColliderSnapshot, NavmeshAffector, SharedSources, in_scene},
};

/// The scene root the navmesh system should track. Set by the application
/// when (un)loading levels; `None` unbinds.
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq, Reflect)]
#[reflect(Resource)]
pub struct ActiveNavmeshScene(pub Option<Entity>);

/// Rebinds the system when the active scene changed.
///
/// Teardown first: cancel in-flight builds and discard the incremental source
/// set. Then, for a new root, repopulate the set from every tracked collider
/// already under it and flag a rebuild.
pub(crate) fn rebind_active_scene(
    config: Res<DynamicNavmeshConfig>,
    active: Res<ActiveNavmeshScene>,
    mut state: ResMut<DynamicNavmeshState>,
    mut coordinator: ResMut<BuildCoordinator>,
    sources: Res<SharedSources>,
    affectors: Query<(Entity, &NavmeshAffector, &GlobalTransform)>,
    parents: Query<&ChildOf>,
) {
    if !config.enabled {
        return;
    }
    if state.bound_scene() == active.0 {
        return;
    }

    coordinator.cancel_in_flight();
    {
        let mut set = sources.lock();
        set.clear();
        if let Some(scene) = active.0 {
            for (entity, affector, transform) in &affectors {
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
            }
        }
    }
    state.bind_scene(active.0);
    if active.0.is_some() {
        state.mark_pending();
        tracing::debug!("navmesh scene binding changed, rebuild scheduled");
    }
}
