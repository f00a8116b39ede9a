use crate::error::Error;

/// Lifecycle of a session as observed by its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RunState {
    /// Open and not executing.
    #[default]
    Idle,
    /// Inside a `start` call; hooks observe this state.
    Running,
    /// Closed; every further operation fails.
    Closed,
}

impl RunState {
    /// Fails with [`Error::Disposed`] once the session is closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] for [`RunState::Closed`].
    pub const fn ensure_open(self) -> Result<(), Error> {
        match self {
            Self::Closed => Err(Error::Disposed),
            Self::Idle | Self::Running => Ok(()),
        }
    }

    /// Returns `true` while a `start` call is executing.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}
