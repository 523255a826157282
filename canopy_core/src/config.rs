// Copyright 2026 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scene configuration.

/// Tuning knobs for a [`Scene`](crate::scene::Scene).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SceneConfig {
    /// Number of view slots to allocate up front.
    pub initial_capacity: usize,
    /// How many extra rebuilds rebuild-completed listeners may trigger in a
    /// row before [`invalidate`](crate::scene::Scene::invalidate) gives up
    /// with [`RebuildLoop`](crate::ReconcileError::RebuildLoop).
    pub max_chained_rebuilds: u32,
}

impl SceneConfig {
    /// Default configuration for small documents.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            initial_capacity: 0,
            max_chained_rebuilds: 8,
        }
    }

    /// Configuration for documents with thousands of source objects.
    #[must_use]
    pub const fn large() -> Self {
        Self {
            initial_capacity: 4096,
            max_chained_rebuilds: 8,
        }
    }

    /// Returns this configuration with a different chain limit.
    #[must_use]
    pub const fn with_max_chained_rebuilds(mut self, limit: u32) -> Self {
        self.max_chained_rebuilds = limit;
        self
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self::new()
    }
}
