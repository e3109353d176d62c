use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

/// Identity of a profile. Also used as the session id by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(pub String);

impl ProfileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id can name a file or directory of its own: exactly one
    /// normal path component, no separators, no `.` or `..`.
    pub fn is_single_path_component(&self) -> bool {
        if self.0.contains(['/', '\\']) {
            return false;
        }
        let mut components = Path::new(&self.0).components();
        matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        )
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProfileId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ProfileId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Host lifecycle events a snapshot can be taken on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LifecycleEvent {
    GameStart,
    RaidStart,
    RaidEnd,
    Logout,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown lifecycle event: {0}")]
pub struct ParseEventError(pub String);

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 4] = [
        LifecycleEvent::GameStart,
        LifecycleEvent::RaidStart,
        LifecycleEvent::RaidEnd,
        LifecycleEvent::Logout,
    ];

    /// Name embedded in snapshot file names.
    pub fn name(self) -> &'static str {
        match self {
            LifecycleEvent::GameStart => "onGameStart",
            LifecycleEvent::RaidStart => "onRaidStart",
            LifecycleEvent::RaidEnd => "onRaidEnd",
            LifecycleEvent::Logout => "onLogout",
        }
    }

    /// Host route whose completion signals this event.
    pub fn route(self) -> &'static str {
        match self {
            LifecycleEvent::GameStart => "/client/game/start",
            LifecycleEvent::RaidStart => "/client/match/local/start",
            LifecycleEvent::RaidEnd => "/client/match/local/end",
            LifecycleEvent::Logout => "/client/game/logout",
        }
    }

    pub fn from_route(route: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.route() == route)
    }

    fn alias(self) -> &'static str {
        match self {
            LifecycleEvent::GameStart => "game-start",
            LifecycleEvent::RaidStart => "raid-start",
            LifecycleEvent::RaidEnd => "raid-end",
            LifecycleEvent::Logout => "logout",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LifecycleEvent {
    type Err = ParseEventError;

    /// Accepts both the file-name form (`onRaidEnd`) and the short alias (`raid-end`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.name() == s || event.alias().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseEventError(s.to_owned()))
    }
}
