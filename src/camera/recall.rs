//! Memory recall coordination
//!
//! A recall moves the camera to a stored position and then restores the focus
//! value saved alongside it. If focus is locked, it is unlocked for the move
//! (ephemeral autofocus) and locked again afterwards.
//!
//! Every recall takes a fresh generation number. Before the re-lock and before
//! the final focus correction, the sequence checks that it still holds the
//! newest generation; a newer recall on the same camera makes it stop there.
//! Frames already sent are never interrupted, the camera cannot abort them.

use super::{Camera, CameraError};
use crate::visca::{check_range, DeviceState, MAX_FOCUS, MAX_POSITION};
use std::sync::atomic::Ordering;
use tracing::{debug, info};

/// How a recall sequence ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecallOutcome {
    /// All steps ran, including the focus correction
    Completed,

    /// A newer recall took over; the remaining steps were skipped
    Superseded,
}

impl Camera {
    /// Generation of the most recently started recall
    pub fn recall_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Recalls memory slot `position` and applies `focus` afterwards.
    pub async fn recall(&self, position: u8, focus: u16) -> Result<RecallOutcome, CameraError> {
        check_range("position", position.into(), MAX_POSITION.into())?;
        check_range("focus", focus.into(), MAX_FOCUS.into())?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(camera = self.index, position, generation, "Executing recall");

        // An unlock left behind by a superseded recall can be reused as is
        if !self.ephemeral_autofocus() {
            let mode = self.query_autofocus_mode().await?;
            if mode == DeviceState::Off {
                debug!(camera = self.index, "Enabling ephemeral AF");
                self.ephemeral_autofocus.store(true, Ordering::SeqCst);
                self.set_focus_lock(DeviceState::Off).await?;
            }
        }

        self.memory_recall(position).await?;

        if !self.is_current(generation) {
            return Ok(self.superseded(generation));
        }
        if self.ephemeral_autofocus() {
            debug!(camera = self.index, "Disabling ephemeral AF");
            self.set_focus_lock(DeviceState::On).await?;
        }

        if !self.is_current(generation) {
            return Ok(self.superseded(generation));
        }
        self.set_focus(focus).await?;

        info!(camera = self.index, position, focus, "Recall completed");
        Ok(RecallOutcome::Completed)
    }

    fn superseded(&self, generation: u64) -> RecallOutcome {
        debug!(
            camera = self.index,
            generation,
            current = self.recall_generation(),
            "Recall superseded, skipping remaining steps"
        );
        RecallOutcome::Superseded
    }
}
