// Copyright 2026 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Contract errors reported by the reconciliation engine.

use core::fmt;

/// A usage-contract violation.
///
/// Every variant signals that a collaborator broke the single-writer,
/// single-window protocol. None of them is recoverable by retrying the same
/// call; they are returned (rather than panicking) so the caller can report
/// them with context and so a view's update can propagate them with `?`.
///
/// Reuse rejection is *not* an error: it is reported through
/// [`Validity::Rejected`](crate::view::Validity::Rejected) and handled inside
/// [`UpdateContext`](crate::context::UpdateContext).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReconcileError {
    /// [`begin_update`](crate::map::IdentityMap::begin_update) was called
    /// while an update window was already open.
    AlreadyUpdating,
    /// [`end_update`](crate::map::IdentityMap::end_update) was called with no
    /// open update window.
    NoUpdateOpen,
    /// An entry was committed outside of an update window.
    UpdateWindowClosed,
    /// An [`UpdateContext`](crate::context::UpdateContext) was used after its
    /// rebuild finished.
    ContextExpired,
    /// A rebuild was requested from inside the same scene's rebuild.
    ReentrantRebuild,
    /// Guarded iteration was requested while the scene was rebuilding.
    ReentrantIteration,
    /// A rebuild or guarded iteration needed exclusive access to the scene
    /// while a reference returned by one of its readers (such as
    /// [`Scene::view`](crate::scene::Scene::view)) was still alive.
    BorrowHeld,
    /// Rebuild-completed listeners kept requesting rebuilds past the
    /// configured chain limit.
    RebuildLoop {
        /// The configured
        /// [`max_chained_rebuilds`](crate::config::SceneConfig::max_chained_rebuilds).
        limit: u32,
    },
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyUpdating => f.write_str("identity map is already open for update"),
            Self::NoUpdateOpen => f.write_str("identity map has no open update window"),
            Self::UpdateWindowClosed => {
                f.write_str("cannot commit an entry outside of an update window")
            }
            Self::ContextExpired => f.write_str("update context used after its rebuild finished"),
            Self::ReentrantRebuild => f.write_str("rebuild requested while already rebuilding"),
            Self::ReentrantIteration => {
                f.write_str("guarded iteration requested while rebuilding")
            }
            Self::BorrowHeld => f.write_str("scene state is still borrowed by a reader"),
            Self::RebuildLoop { limit } => {
                write!(f, "rebuild listeners chained more than {limit} rebuilds")
            }
        }
    }
}

impl core::error::Error for ReconcileError {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn display_names_the_violation() {
        assert_eq!(
            ReconcileError::ReentrantRebuild.to_string(),
            "rebuild requested while already rebuilding"
        );
        assert_eq!(
            ReconcileError::RebuildLoop { limit: 4 }.to_string(),
            "rebuild listeners chained more than 4 rebuilds"
        );
        assert_eq!(
            ReconcileError::BorrowHeld.to_string(),
            "scene state is still borrowed by a reader"
        );
    }
}
