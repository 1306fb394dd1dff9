//! Per-frame driver of the navmesh system.
//!
//! Rebuild scheduling is an explicit two-phase machine: a pending request is
//! armed at the end of the frame that observed it, and launched at the start
//! of the next frame's driver pass. That gives every build exactly one frame
//! of delay for transform propagation to settle before geometry is sampled.
//! The pending flag is cleared when the request is armed, not when the build
//! completes, so collider events arriving during the wait or during the build
//! schedule a fresh rebuild instead of being lost.

use bevy_ecs::{prelude::*, system::SystemParam};
use std::sync::Arc;

use crate::{
    CurrentNavmesh, Navmesh, NavmeshUpdated,
    coordinator::{BuildCoordinator, NavmeshBuildCompleted, NavmeshBuildOutcome},
    settings::DynamicNavmeshConfig,
    sources::SharedSources,
};

/// Rebuild scheduling phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum RebuildPhase {
    /// No rebuild scheduled.
    #[default]
    Idle,
    /// A rebuild was scheduled this frame and launches on the next driver
    /// pass.
    Armed,
}

/// Internal facade state: scene binding and rebuild scheduling.
#[derive(Resource, Debug, Default)]
pub struct DynamicNavmeshState {
    bound_scene: Option<Entity>,
    pending_rebuild: bool,
    phase: RebuildPhase,
    was_enabled: bool,
}

impl DynamicNavmeshState {
    /// The scene root the system is currently bound to.
    pub fn bound_scene(&self) -> Option<Entity> {
        self.bound_scene
    }

    /// Whether a rebuild is flagged but not yet armed.
    pub fn is_rebuild_pending(&self) -> bool {
        self.pending_rebuild
    }

    pub(crate) fn mark_pending(&mut self) {
        self.pending_rebuild = true;
    }

    pub(crate) fn phase(&self) -> RebuildPhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: RebuildPhase) {
        self.phase = phase;
    }

    pub(crate) fn bind_scene(&mut self, scene: Option<Entity>) {
        self.bound_scene = scene;
        self.phase = RebuildPhase::Idle;
        self.pending_rebuild = false;
    }
}

/// Handles `enabled` flips of [`DynamicNavmeshConfig`].
///
/// Disabling tears down the scene binding, cancels in-flight builds, clears
/// the source set, and clears the published mesh (emitting [`NavmeshUpdated`]
/// if one was published, so consumers learn the mesh is gone). Re-enabling
/// only flags a rebuild; the regular driver pass performs the rebinding.
pub(crate) fn apply_enabled_transition(
    config: Res<DynamicNavmeshConfig>,
    mut state: ResMut<DynamicNavmeshState>,
    mut coordinator: ResMut<BuildCoordinator>,
    sources: Res<SharedSources>,
    mut current: ResMut<CurrentNavmesh>,
    mut commands: Commands,
) {
    if config.enabled == state.was_enabled {
        return;
    }
    state.was_enabled = config.enabled;

    if config.enabled {
        state.mark_pending();
        return;
    }

    coordinator.cancel_in_flight();
    sources.lock().clear();
    state.bind_scene(None);
    if current.0.take().is_some() {
        commands.trigger(NavmeshUpdated);
    }
}

/// Arms a pending rebuild for the next frame. Requires a bound scene; an
/// unbound pending request stays pending until a scene is bound.
pub(crate) fn arm_pending_rebuild(
    config: Res<DynamicNavmeshConfig>,
    mut state: ResMut<DynamicNavmeshState>,
) {
    if !config.enabled {
        return;
    }
    if state.pending_rebuild && state.bound_scene.is_some() {
        state.pending_rebuild = false;
        state.phase = RebuildPhase::Armed;
    }
}

/// Control surface of the dynamic navmesh system, for tooling and scripted
/// triggers.
#[derive(SystemParam)]
pub struct NavmeshControl<'w, 's> {
    config: ResMut<'w, DynamicNavmeshConfig>,
    state: ResMut<'w, DynamicNavmeshState>,
    current: Res<'w, CurrentNavmesh>,
    commands: Commands<'w, 's>,
}

impl NavmeshControl<'_, '_> {
    /// Request a rebuild, regardless of
    /// [`automatic_rebuild`](DynamicNavmeshConfig::automatic_rebuild).
    ///
    /// Returns `true` if a rebuild was scheduled. With the system disabled or
    /// no scene bound this is a no-op that reports
    /// [`NavmeshBuildOutcome::Unavailable`] through [`NavmeshBuildCompleted`]
    /// and returns `false`.
    ///
    /// The scheduled build completes asynchronously; its result arrives as a
    /// [`NavmeshBuildCompleted`] trigger carrying the generation assigned at
    /// launch (or a later one, if a newer request supersedes it).
    pub fn rebuild(&mut self) -> bool {
        if !self.config.enabled || self.state.bound_scene().is_none() {
            // No build launches, so no generation is consumed: consuming one
            // here would supersede a build that is still in flight.
            self.commands.trigger(NavmeshBuildCompleted {
                generation: NavmeshBuildCompleted::NO_BUILD,
                outcome: NavmeshBuildOutcome::Unavailable,
            });
            return false;
        }
        self.state.mark_pending();
        true
    }

    /// The last published navmesh, if any.
    pub fn navmesh(&self) -> Option<&Arc<Navmesh>> {
        self.current.0.as_ref()
    }

    /// Enable or disable the system. Takes effect on the next driver pass.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }
}
