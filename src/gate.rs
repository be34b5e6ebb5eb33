//! Subsystem gating.
//!
//! Every frame belongs to zero or more subsystem groups. A frame may be put on
//! the bus only while at least one of its groups is enabled; a frame without
//! any group is never transmitted.

use crate::frames::{Frame, FrameId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const GROUP_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubsystemGroup {
    General,
    Dashboard,
    Lighting,
    Multimedia,
    Climate,
    Doors,
}

impl SubsystemGroup {
    pub const ALL: [SubsystemGroup; GROUP_COUNT] = [
        SubsystemGroup::General,
        SubsystemGroup::Dashboard,
        SubsystemGroup::Lighting,
        SubsystemGroup::Multimedia,
        SubsystemGroup::Climate,
        SubsystemGroup::Doors,
    ];

    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub fn name(self) -> &'static str {
        match self {
            SubsystemGroup::General => "general",
            SubsystemGroup::Dashboard => "dashboard",
            SubsystemGroup::Lighting => "lighting",
            SubsystemGroup::Multimedia => "multimedia",
            SubsystemGroup::Climate => "climate",
            SubsystemGroup::Doors => "doors",
        }
    }
}

impl core::fmt::Display for SubsystemGroup {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown subsystem group '{0}'")]
pub struct UnknownGroup(pub String);

impl core::str::FromStr for SubsystemGroup {
    type Err = UnknownGroup;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubsystemGroup::ALL
            .iter()
            .copied()
            .find(|group| group.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownGroup(s.to_string()))
    }
}

/// A set of subsystem groups packed into one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupSet(u8);

impl GroupSet {
    pub const EMPTY: GroupSet = GroupSet(0);
    pub const ALL: GroupSet = GroupSet((1 << GROUP_COUNT) - 1);

    pub const fn with(self, group: SubsystemGroup) -> Self {
        GroupSet(self.0 | group.bit())
    }

    pub const fn without(self, group: SubsystemGroup) -> Self {
        GroupSet(self.0 & !group.bit())
    }

    pub const fn contains(self, group: SubsystemGroup) -> bool {
        self.0 & group.bit() != 0
    }

    pub const fn intersects(self, other: GroupSet) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = SubsystemGroup> {
        SubsystemGroup::ALL
            .into_iter()
            .filter(move |group| self.contains(*group))
    }
}

impl FromIterator<SubsystemGroup> for GroupSet {
    fn from_iter<I: IntoIterator<Item = SubsystemGroup>>(iter: I) -> Self {
        iter.into_iter().fold(GroupSet::EMPTY, GroupSet::with)
    }
}

/// Boolean switches for each subsystem group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsystemGate {
    enabled: GroupSet,
}

impl SubsystemGate {
    /// All groups enabled.
    pub fn new() -> Self {
        Self {
            enabled: GroupSet::ALL,
        }
    }

    pub fn from_enabled(enabled: GroupSet) -> Self {
        Self { enabled }
    }

    pub fn set_enabled(&mut self, group: SubsystemGroup, enabled: bool) {
        self.enabled = if enabled {
            self.enabled.with(group)
        } else {
            self.enabled.without(group)
        };
    }

    pub fn is_group_enabled(&self, group: SubsystemGroup) -> bool {
        self.enabled.contains(group)
    }

    pub fn enabled_groups(&self) -> GroupSet {
        self.enabled
    }

    /// True iff any group owning `frame` is enabled.
    pub fn is_enabled(&self, frame: &Frame) -> bool {
        self.is_frame_enabled(frame.id())
    }

    pub fn is_frame_enabled(&self, id: FrameId) -> bool {
        id.spec().groups.intersects(self.enabled)
    }
}

impl Default for SubsystemGate {
    fn default() -> Self {
        Self::new()
    }
}
