#![doc = include_str!("../../../readme.md")]

use bevy_app::prelude::*;
use bevy_derive::Deref;
use bevy_ecs::prelude::*;
use bevy_reflect::prelude::*;
use bevy_transform::TransformSystems;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod backend;
pub mod coordinator;
pub mod driver;
pub mod scene;
pub mod settings;
pub mod sources;

pub use backend::{FlatSurfaceBackend, NavmeshBackendApp, NavmeshBuildBackend};
pub use coordinator::{CancellationToken, NavmeshBuildCompleted, NavmeshBuildJob, NavmeshBuildOutcome};
pub use driver::NavmeshControl;
pub use scene::ActiveNavmeshScene;
pub use settings::{
    CollisionGroupFlags, DynamicNavmeshConfig, NavmeshAgentSettings, NavmeshBuildSettings,
    NavmeshGroup,
};
pub use sources::{ColliderShape, NavmeshAffector, SharedSources};

/// Commonly used types, re-exported for convenience.
pub mod prelude {
    pub use crate::{
        ActiveNavmeshScene, CollisionGroupFlags, ColliderShape, CurrentNavmesh,
        DynamicNavmeshConfig, DynamicNavmeshPlugin, FlatSurfaceBackend, Navmesh, NavmeshAffector,
        NavmeshAgentSettings, NavmeshBackendApp, NavmeshBuildCompleted, NavmeshBuildOutcome,
        NavmeshBuildSettings, NavmeshControl, NavmeshGroup, NavmeshUpdated,
    };
}

/// The main plugin of the crate. Tracks static colliders in the active scene and
/// keeps [`CurrentNavmesh`] up to date by running asynchronous rebuilds.
///
/// There are two initialization paths: [`DynamicNavmeshPlugin::default`] uses
/// engine defaults, [`DynamicNavmeshPlugin::with_config`] takes an explicit
/// settings object. Invalid configuration is rejected at plugin build time.
#[derive(Debug, Default)]
pub struct DynamicNavmeshPlugin {
    config: DynamicNavmeshConfig,
}

impl DynamicNavmeshPlugin {
    /// Create the plugin from an explicit configuration.
    ///
    /// # Panics
    ///
    /// [`Plugin::build`] panics if the configuration fails validation. This is a
    /// programmer error, not a recoverable condition.
    pub fn with_config(config: DynamicNavmeshConfig) -> Self {
        Self { config }
    }
}

impl Plugin for DynamicNavmeshPlugin {
    fn build(&self, app: &mut App) {
        if let Err(err) = self.config.validate() {
            panic!("invalid dynamic navmesh configuration: {err}");
        }

        app.register_type::<NavmeshAffector>();
        app.register_type::<DynamicNavmeshConfig>();
        app.register_type::<ActiveNavmeshScene>();

        app.insert_resource(self.config.clone());
        app.init_resource::<ActiveNavmeshScene>();
        app.init_resource::<CurrentNavmesh>();
        app.init_resource::<SharedSources>();
        app.init_resource::<driver::DynamicNavmeshState>();
        app.init_resource::<coordinator::BuildCoordinator>();

        app.configure_sets(
            PostUpdate,
            DynamicNavmeshSystems.after(TransformSystems::Propagate),
        );
        app.add_systems(
            PostUpdate,
            (
                driver::apply_enabled_transition,
                scene::rebind_active_scene,
                sources::track_collider_changes,
                coordinator::launch_armed_build,
                driver::arm_pending_rebuild,
                coordinator::poll_build_tasks,
            )
                .chain()
                .in_set(DynamicNavmeshSystems),
        );
    }
}

/// System set containing the per-frame navmesh driver. Runs in [`PostUpdate`]
/// after transform propagation so collected geometry uses settled transforms.
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DynamicNavmeshSystems;

/// The navigation mesh produced by a build: one layer per configured
/// [`NavmeshGroup`], in group order.
#[derive(Debug, Clone, PartialEq, Reflect, Serialize, Deserialize)]
#[reflect(Serialize, Deserialize)]
pub struct Navmesh {
    /// Walkable-surface layers, index-aligned with
    /// [`DynamicNavmeshConfig::groups`] at the time the build was launched.
    pub layers: Vec<NavmeshLayer>,
}

/// The walkable surface built for a single [`NavmeshGroup`].
#[derive(Debug, Clone, PartialEq, Default, Reflect, Serialize, Deserialize)]
#[reflect(Serialize, Deserialize)]
pub struct NavmeshLayer {
    /// Index of the group this layer was built for.
    pub group_index: usize,
    /// World-space vertices of the walkable surface.
    pub vertices: Vec<Vec3>,
    /// Triangle indices into [`NavmeshLayer::vertices`].
    pub triangles: Vec<[u32; 3]>,
}

/// The last successfully published navmesh, shared with consumers as a
/// read-only snapshot. Replaced wholesale by a successful build; cleared when
/// the system is disabled. Readers clone the [`Arc`] and never observe a
/// partially built mesh.
#[derive(Resource, Debug, Default, Deref)]
pub struct CurrentNavmesh(pub Option<Arc<Navmesh>>);

/// Triggered exactly when [`CurrentNavmesh`] changes, including the transition
/// to empty when the system is disabled.
#[derive(Debug, Event)]
pub struct NavmeshUpdated;
