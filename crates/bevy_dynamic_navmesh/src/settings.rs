//! Configuration surface of the dynamic navmesh system.
//!
//! All of this takes effect on the next launched build, never retroactively:
//! the coordinator clones the relevant parts into the build job at launch
//! time.

use bevy_ecs::prelude::*;
use bevy_reflect::prelude::*;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

bitflags! {
    /// Bitmask selecting which collision layers contribute geometry to the
    /// navmesh.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CollisionGroupFlags: u32 {
        /// Collision layer 0. Conventionally the default static layer.
        const GROUP_0 = 1 << 0;
        /// Collision layer 1.
        const GROUP_1 = 1 << 1;
        /// Collision layer 2.
        const GROUP_2 = 1 << 2;
        /// Collision layer 3.
        const GROUP_3 = 1 << 3;
        /// Collision layer 4.
        const GROUP_4 = 1 << 4;
        /// Collision layer 5.
        const GROUP_5 = 1 << 5;
        /// Collision layer 6.
        const GROUP_6 = 1 << 6;
        /// Collision layer 7.
        const GROUP_7 = 1 << 7;
        /// All collision layers.
        const ALL = u32::MAX;
    }
}

impl Default for CollisionGroupFlags {
    fn default() -> Self {
        Self::ALL
    }
}

/// Voxelization and tiling parameters of a build. Cloned into the build job
/// at launch, so mutating this mid-build affects only the next build.
#[derive(Debug, Clone, PartialEq, Reflect, Serialize, Deserialize)]
#[reflect(Serialize, Deserialize)]
pub struct NavmeshBuildSettings {
    /// Length of a tile edge in cells.
    pub tile_size: u32,
    /// Horizontal voxel resolution in world units.
    pub cell_size: f32,
    /// Vertical voxel resolution in world units.
    pub cell_height: f32,
}

impl Default for NavmeshBuildSettings {
    fn default() -> Self {
        Self {
            tile_size: 32,
            cell_size: 0.3,
            cell_height: 0.2,
        }
    }
}

/// Parameters of the agent a navmesh layer is built for.
#[derive(Debug, Clone, PartialEq, Reflect, Serialize, Deserialize)]
#[reflect(Serialize, Deserialize)]
pub struct NavmeshAgentSettings {
    /// Height of the agent in world units.
    pub height: f32,
    /// Radius of the agent in world units. Walkable surfaces are inset by
    /// this much.
    pub radius: f32,
    /// Maximum ledge height the agent can step over, in world units.
    pub max_climb: f32,
    /// Maximum walkable slope in degrees.
    pub max_slope_degrees: f32,
}

impl Default for NavmeshAgentSettings {
    fn default() -> Self {
        Self {
            height: 1.8,
            radius: 0.35,
            max_climb: 0.4,
            max_slope_degrees: 45.0,
        }
    }
}

/// A named navmesh layer definition: which geometry it samples and which
/// agent it is built for. Group order is meaningful; the built
/// [`NavmeshLayer::group_index`](crate::NavmeshLayer::group_index) refers back
/// to it.
#[derive(Debug, Clone, PartialEq, Reflect, Serialize, Deserialize)]
#[reflect(Serialize, Deserialize)]
pub struct NavmeshGroup {
    /// Unique name of the group.
    pub name: String,
    /// Agent parameters for this group.
    pub agent: NavmeshAgentSettings,
    /// Collision layers sampled by this group, further restricted by
    /// [`DynamicNavmeshConfig::included_groups`].
    #[reflect(ignore)]
    pub filter: CollisionGroupFlags,
}

impl Default for NavmeshGroup {
    fn default() -> Self {
        Self {
            name: "Default".to_string(),
            agent: NavmeshAgentSettings::default(),
            filter: CollisionGroupFlags::ALL,
        }
    }
}

/// Top-level configuration of the dynamic navmesh system. Mutable at runtime;
/// every field takes effect on the next triggered rebuild.
#[derive(Resource, Debug, Clone, Reflect)]
#[reflect(Resource)]
pub struct DynamicNavmeshConfig {
    /// Whether the system runs at all. Disabling tears down the scene binding
    /// and clears the published mesh; re-enabling schedules a rebuild.
    pub enabled: bool,
    /// Whether collider add/remove events schedule rebuilds automatically.
    /// Explicit [`NavmeshControl::rebuild`](crate::NavmeshControl::rebuild)
    /// calls work either way.
    pub automatic_rebuild: bool,
    /// Collision layers contributing geometry, applied on top of each group's
    /// own filter.
    #[reflect(ignore)]
    pub included_groups: CollisionGroupFlags,
    /// Voxelization parameters.
    pub build: NavmeshBuildSettings,
    /// Layer definitions, in output order.
    pub groups: Vec<NavmeshGroup>,
}

impl Default for DynamicNavmeshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            automatic_rebuild: true,
            included_groups: CollisionGroupFlags::ALL,
            build: NavmeshBuildSettings::default(),
            groups: vec![NavmeshGroup::default()],
        }
    }
}

impl DynamicNavmeshConfig {
    /// Validate the configuration. Called by the plugin at build time;
    /// violations there are treated as programmer errors and panic before any
    /// state is touched.
    pub fn validate(&self) -> Result<(), NavmeshConfigError> {
        if self.build.tile_size == 0 {
            return Err(NavmeshConfigError::InvalidParameter {
                name: "tile_size",
                value: 0.0,
            });
        }
        for (name, value) in [
            ("cell_size", self.build.cell_size),
            ("cell_height", self.build.cell_height),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(NavmeshConfigError::InvalidParameter { name, value });
            }
        }
        for group in &self.groups {
            if group.name.is_empty() {
                return Err(NavmeshConfigError::UnnamedGroup);
            }
            let agent = &group.agent;
            for (name, value) in [
                ("agent.height", agent.height),
                ("agent.radius", agent.radius),
                ("agent.max_climb", agent.max_climb),
            ] {
                if !value.is_finite() || value <= 0.0 {
                    return Err(NavmeshConfigError::InvalidParameter { name, value });
                }
            }
            if !(0.0..90.0).contains(&agent.max_slope_degrees) {
                return Err(NavmeshConfigError::InvalidParameter {
                    name: "agent.max_slope_degrees",
                    value: agent.max_slope_degrees,
                });
            }
        }
        if let Some(name) = first_duplicate(self.groups.iter().map(|g| g.name.as_str())) {
            return Err(NavmeshConfigError::DuplicateGroup {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

fn first_duplicate<'a>(names: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen = Vec::new();
    for name in names {
        if seen.contains(&name) {
            return Some(name);
        }
        seen.push(name);
    }
    None
}

/// Rejected configuration, reported at initialization before any state
/// mutation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NavmeshConfigError {
    /// A numeric parameter is zero, negative, or non-finite.
    #[error("parameter `{name}` has invalid value {value}")]
    InvalidParameter {
        /// Name of the offending parameter.
        name: &'static str,
        /// The rejected value.
        value: f32,
    },
    /// A group was configured with an empty name.
    #[error("navmesh group has an empty name")]
    UnnamedGroup,
    /// Two groups share a name.
    #[error("duplicate navmesh group name `{name}`")]
    DuplicateGroup {
        /// The duplicated name.
        name: String,
    },
}
