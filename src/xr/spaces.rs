//! Named reference spaces drawn as cubes.

use crate::math::{Pose, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_3;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    View,
    Local,
    Stage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VisualizedSpace {
    View,
    ViewFront,
    Local,
    Stage,
    StageLeft,
    StageRight,
    StageLeftRotated,
    StageRightRotated,
}

impl VisualizedSpace {
    pub const ALL: [VisualizedSpace; 8] = [
        VisualizedSpace::View,
        VisualizedSpace::ViewFront,
        VisualizedSpace::Local,
        VisualizedSpace::Stage,
        VisualizedSpace::StageLeft,
        VisualizedSpace::StageRight,
        VisualizedSpace::StageLeftRotated,
        VisualizedSpace::StageRightRotated,
    ];

    /// Spaces shown when nothing is configured.
    pub const DEFAULTS: [VisualizedSpace; 7] = [
        VisualizedSpace::ViewFront,
        VisualizedSpace::Local,
        VisualizedSpace::Stage,
        VisualizedSpace::StageLeft,
        VisualizedSpace::StageRight,
        VisualizedSpace::StageLeftRotated,
        VisualizedSpace::StageRightRotated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VisualizedSpace::View => "View",
            VisualizedSpace::ViewFront => "ViewFront",
            VisualizedSpace::Local => "Local",
            VisualizedSpace::Stage => "Stage",
            VisualizedSpace::StageLeft => "StageLeft",
            VisualizedSpace::StageRight => "StageRight",
            VisualizedSpace::StageLeftRotated => "StageLeftRotated",
            VisualizedSpace::StageRightRotated => "StageRightRotated",
        }
    }

    pub fn reference(self) -> ReferenceKind {
        match self {
            VisualizedSpace::View | VisualizedSpace::ViewFront => ReferenceKind::View,
            VisualizedSpace::Local => ReferenceKind::Local,
            VisualizedSpace::Stage
            | VisualizedSpace::StageLeft
            | VisualizedSpace::StageRight
            | VisualizedSpace::StageLeftRotated
            | VisualizedSpace::StageRightRotated => ReferenceKind::Stage,
        }
    }

    /// Offset of this space within its reference space.
    pub fn pose_in_reference(self) -> Pose {
        let at = |x, z, yaw: f32| Pose::new(Quat::from_rotation_y(yaw), Vec3::new(x, 0.0, z));
        match self {
            VisualizedSpace::View | VisualizedSpace::Local | VisualizedSpace::Stage => {
                Pose::IDENTITY
            }
            VisualizedSpace::ViewFront => at(0.0, -2.0, 0.0),
            VisualizedSpace::StageLeft => at(-2.0, -2.0, 0.0),
            VisualizedSpace::StageRight => at(2.0, -2.0, 0.0),
            VisualizedSpace::StageLeftRotated => at(-2.0, -2.0, FRAC_PI_3),
            VisualizedSpace::StageRightRotated => at(2.0, -2.0, -FRAC_PI_3),
        }
    }
}

impl fmt::Display for VisualizedSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSpace(pub String);

impl fmt::Display for UnknownSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown visualized space '{}'", self.0)
    }
}

impl std::error::Error for UnknownSpace {}

impl FromStr for VisualizedSpace {
    type Err = UnknownSpace;

    /// Case-insensitive.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|space| space.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownSpace(name.to_string()))
    }
}

impl TryFrom<String> for VisualizedSpace {
    type Error = UnknownSpace;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VisualizedSpace> for String {
    fn from(space: VisualizedSpace) -> Self {
        space.as_str().to_string()
    }
}
