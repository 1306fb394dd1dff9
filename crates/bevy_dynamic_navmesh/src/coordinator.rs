//! Build coordination: launching, superseding, and publishing builds.
//!
//! At most one build executes against the incremental source set at any
//! instant: the worker holds the set's mutex for the whole backend call.
//! Superseding is cooperative. Launching a build signals the previous build's
//! cancellation token; the backend is expected to poll it at bounded
//! intervals and bail out. A backend that ignores its token merely occupies
//! the worker longer: the build generation recorded at launch makes sure a
//! superseded build can never publish, even if it returns a mesh.

use bevy_ecs::prelude::*;
use bevy_math::bounding::Aabb3d;
use bevy_tasks::{AsyncComputeTaskPool, Task, futures_lite::future};
use bevy_transform::components::GlobalTransform;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    CurrentNavmesh, Navmesh, NavmeshUpdated,
    backend::NavmeshBackend,
    driver::{DynamicNavmeshState, RebuildPhase},
    settings::{CollisionGroupFlags, DynamicNavmeshConfig, NavmeshBuildSettings, NavmeshGroup},
    sources::{NavmeshAffector, SharedSources, collect_bounding_boxes},
};

/// Cooperative cancellation handle passed by value into a build.
///
/// Long-running backends must call [`CancellationToken::is_cancelled`] at
/// bounded intervals inside their geometry loops and abort promptly when it
/// reports `true`. There is no hard timeout and no forced preemption.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Input snapshot handed to the build backend. Captured at launch time;
/// configuration edits after launch affect only the next build.
#[derive(Debug, Clone)]
pub struct NavmeshBuildJob {
    /// Voxelization parameters.
    pub settings: NavmeshBuildSettings,
    /// Layer definitions, in output order.
    pub groups: Vec<NavmeshGroup>,
    /// Collision layers contributing geometry.
    pub included_groups: CollisionGroupFlags,
    /// World-space bounding boxes of the tracked colliders, collected on the
    /// main thread before dispatch.
    pub bounding_boxes: Vec<(Entity, Aabb3d)>,
}

/// Outcome of one build. Cancellation and failure are values, never panics or
/// errors propagated out of the coordinator.
#[derive(Debug, Clone)]
pub enum NavmeshBuildOutcome {
    /// The build ran to completion; the mesh was (or is about to be)
    /// published.
    Built(Arc<Navmesh>),
    /// The build was superseded or torn down before completing.
    Cancelled,
    /// The backend reported an error. The published mesh is untouched.
    Failed(String),
    /// No build could run: the system is disabled, no scene is bound, or no
    /// backend is registered.
    Unavailable,
}

impl NavmeshBuildOutcome {
    /// Whether the build produced a mesh.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Built(_))
    }
}

/// Triggered once per finished (or refused) build request with its outcome.
#[derive(Debug, Clone, Event)]
pub struct NavmeshBuildCompleted {
    /// Build generation, monotonically increasing per launched build.
    /// Refused requests that never launched carry [`Self::NO_BUILD`].
    pub generation: u64,
    /// What happened.
    pub outcome: NavmeshBuildOutcome,
}

impl NavmeshBuildCompleted {
    /// Generation reported for a request that was refused before any build
    /// launched. Launched builds start at `1`.
    pub const NO_BUILD: u64 = 0;
}

struct ActiveBuild {
    generation: u64,
    cancel: CancellationToken,
    task: Task<NavmeshBuildOutcome>,
}

/// Owns the in-flight builds and the publish-eligibility generation.
#[derive(Resource, Default)]
pub struct BuildCoordinator {
    in_flight: Vec<ActiveBuild>,
    generation: u64,
}

impl BuildCoordinator {
    /// Number of builds currently in flight (superseded ones included until
    /// they finish).
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Signal cancellation to every in-flight build and revoke its right to
    /// publish. Bumping the generation here covers backends that ignore
    /// their token.
    pub(crate) fn cancel_in_flight(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        for build in &self.in_flight {
            build.cancel.cancel();
        }
        self.generation += 1;
    }

    pub(crate) fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

/// Launches the build armed on the previous frame.
///
/// Bounding boxes are collected here, synchronously, because transform data
/// belongs to the frame thread. Only the backend call itself moves to the
/// worker.
pub(crate) fn launch_armed_build(
    config: Res<DynamicNavmeshConfig>,
    mut state: ResMut<DynamicNavmeshState>,
    mut coordinator: ResMut<BuildCoordinator>,
    backend: Option<Res<NavmeshBackend>>,
    sources: Res<SharedSources>,
    affectors: Query<(Entity, &NavmeshAffector, &GlobalTransform)>,
    parents: Query<&ChildOf>,
    mut commands: Commands,
) {
    if !config.enabled || state.phase() != RebuildPhase::Armed {
        return;
    }
    state.set_phase(RebuildPhase::Idle);
    let Some(scene) = state.bound_scene() else {
        return;
    };
    let Some(backend) = backend else {
        tracing::error!("cannot build navmesh: no build backend registered");
        commands.trigger(NavmeshBuildCompleted {
            generation: NavmeshBuildCompleted::NO_BUILD,
            outcome: NavmeshBuildOutcome::Unavailable,
        });
        return;
    };

    coordinator.cancel_in_flight();
    let generation = coordinator.next_generation();
    let cancel = CancellationToken::default();
    let job = NavmeshBuildJob {
        settings: config.build.clone(),
        groups: config.groups.clone(),
        included_groups: config.included_groups,
        bounding_boxes: collect_bounding_boxes(scene, &affectors, &parents, config.included_groups),
    };

    let task = AsyncComputeTaskPool::get().spawn(run_build(
        job,
        sources.clone(),
        backend.shared(),
        cancel.clone(),
    ));
    coordinator.in_flight.push(ActiveBuild {
        generation,
        cancel,
        task,
    });
    tracing::debug!(generation, "navmesh build launched");
}

/// The build body, executed on the worker context.
///
/// Holds the source-set lock across the backend call, whether it succeeds,
/// fails, or is cancelled. A cancellation observed after the call wins over
/// whatever the backend returned.
async fn run_build(
    job: NavmeshBuildJob,
    sources: SharedSources,
    backend: Arc<dyn crate::backend::NavmeshBuildBackend>,
    cancel: CancellationToken,
) -> NavmeshBuildOutcome {
    if cancel.is_cancelled() {
        return NavmeshBuildOutcome::Cancelled;
    }
    let result = {
        let set = sources.lock();
        backend.build(&job, &set, &cancel)
    };
    if cancel.is_cancelled() {
        return NavmeshBuildOutcome::Cancelled;
    }
    match result {
        Ok(navmesh) => NavmeshBuildOutcome::Built(Arc::new(navmesh)),
        Err(err) => {
            tracing::error!("navmesh build failed: {err:#}");
            NavmeshBuildOutcome::Failed(format!("{err:#}"))
        }
    }
}

/// Polls in-flight builds and publishes finished ones.
///
/// Exactly one [`NavmeshBuildCompleted`] fires per finished build. Only the
/// newest-generation successful build, with the system still enabled,
/// replaces [`CurrentNavmesh`] and fires [`NavmeshUpdated`]; a success that
/// cannot publish is downgraded to cancelled.
pub(crate) fn poll_build_tasks(
    config: Res<DynamicNavmeshConfig>,
    mut coordinator: ResMut<BuildCoordinator>,
    mut current: ResMut<CurrentNavmesh>,
    mut commands: Commands,
) {
    let latest = coordinator.generation;
    let mut i = 0;
    while i < coordinator.in_flight.len() {
        let Some(outcome) =
            future::block_on(future::poll_once(&mut coordinator.in_flight[i].task))
        else {
            i += 1;
            continue;
        };
        let build = coordinator.in_flight.swap_remove(i);
        let publishable = build.generation == latest && config.enabled;
        let outcome = if !publishable && outcome.is_success() {
            NavmeshBuildOutcome::Cancelled
        } else {
            outcome
        };
        if publishable {
            if let NavmeshBuildOutcome::Built(mesh) = &outcome {
                current.0 = Some(mesh.clone());
                commands.trigger(NavmeshUpdated);
            }
        }
        commands.trigger(NavmeshBuildCompleted {
            generation: build.generation,
            outcome,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_unset_and_latches() {
        let token = CancellationToken::default();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::default();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn only_built_counts_as_success() {
        assert!(NavmeshBuildOutcome::Built(Arc::new(Navmesh { layers: vec![] })).is_success());
        assert!(!NavmeshBuildOutcome::Cancelled.is_success());
        assert!(!NavmeshBuildOutcome::Failed("boom".to_string()).is_success());
        assert!(!NavmeshBuildOutcome::Unavailable.is_success());
    }

    #[test]
    fn cancel_in_flight_without_builds_keeps_generation() {
        let mut coordinator = BuildCoordinator::default();
        let before = coordinator.generation;
        coordinator.cancel_in_flight();
        assert_eq!(coordinator.generation, before);
    }

    #[test]
    fn successful_build_while_disabled_reports_cancelled() {
        use bevy_ecs::system::RunSystemOnce;
        use bevy_tasks::TaskPool;

        #[derive(Resource, Default)]
        struct Seen(Vec<NavmeshBuildOutcome>);

        let mut world = World::new();
        world.insert_resource(DynamicNavmeshConfig {
            enabled: false,
            ..Default::default()
        });
        world.init_resource::<CurrentNavmesh>();
        world.init_resource::<Seen>();
        world.add_observer(
            |completed: On<NavmeshBuildCompleted>, mut seen: ResMut<Seen>| {
                seen.0.push(completed.event().outcome.clone());
            },
        );

        let task = AsyncComputeTaskPool::get_or_init(TaskPool::new)
            .spawn(async { NavmeshBuildOutcome::Built(Arc::new(Navmesh { layers: vec![] })) });
        while !task.is_finished() {
            std::thread::yield_now();
        }
        let mut coordinator = BuildCoordinator::default();
        let generation = coordinator.next_generation();
        coordinator.in_flight.push(ActiveBuild {
            generation,
            cancel: CancellationToken::default(),
            task,
        });
        world.insert_resource(coordinator);

        world
            .run_system_once(poll_build_tasks)
            .expect("poll runs headless");

        let seen = world.resource::<Seen>();
        assert_eq!(seen.0.len(), 1);
        assert!(matches!(seen.0[0], NavmeshBuildOutcome::Cancelled));
        assert!(world.resource::<CurrentNavmesh>().0.is_none());
        assert_eq!(world.resource::<BuildCoordinator>().in_flight(), 0);
    }
}
