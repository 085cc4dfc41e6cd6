//! Run lifecycle state machine.
//!
//! Each generation run moves through a fixed set of phases. Transitions
//! outside the documented edges are refused and logged rather than applied,
//! so a racing completion path can never rewind a terminal phase.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Phase of a generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// No run in progress; log and result may still hold the previous run.
    #[default]
    Idle,
    /// A run was accepted; subscription and dispatch are being set up.
    Starting,
    /// The worker is executing and events are streaming in.
    Running,
    /// Terminal success event observed and artifact fetch completed.
    Succeeded,
    /// Terminal error event observed, or the dispatch itself failed.
    Failed,
    /// The run was stopped on user request.
    Cancelled,
}

impl RunPhase {
    /// Checks whether the phase may transition to `to`.
    #[must_use]
    pub fn can_transition_to(&self, to: Self) -> bool {
        match (self, to) {
            // A new run may only start from Idle.
            (Self::Idle, Self::Starting) => true,
            // Starting either reaches Running or fails/cancels outright.
            (Self::Starting, Self::Running | Self::Failed | Self::Cancelled) => true,
            // Running ends in exactly one terminal phase.
            (Self::Running, Self::Succeeded | Self::Failed | Self::Cancelled) => true,
            // Terminal phases reset to Idle via clear or the next run.
            (Self::Succeeded | Self::Failed | Self::Cancelled, Self::Idle) => true,
            // Same phase is always valid.
            (a, b) if *a == b => true,
            _ => false,
        }
    }

    /// Returns `true` while a run is being set up or executing.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// Returns `true` for the three end-of-run phases.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Applies a transition in place if it is valid.
    ///
    /// # Returns
    /// Returns `true` if the transition was applied, `false` if it was
    /// refused (and logged).
    pub fn advance(&mut self, to: Self) -> bool {
        if self.can_transition_to(to) {
            *self = to;
            true
        } else {
            warn!(from = ?self, to = ?to, "Invalid run phase transition refused");
            false
        }
    }
}
