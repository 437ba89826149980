use std::time::Duration;

use crate::pipeline::dispatcher::{Delivery, DispatchReceiver, WaitOutcome};
use crate::presentation::domain::media_surface::{FrameDisplay, MediaSurface};
use crate::presentation::domain::playback_controller::PlaybackController;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpOutcome {
    /// This many attention updates were applied.
    Delivered(usize),
    Idle,
    /// Capture has ended and everything it posted has been applied.
    Closed,
}

/// The presentation thread's side of the pipeline: applies delivered
/// attention updates in order and shows the newest camera frame.
pub struct Presenter<S: MediaSurface, D: FrameDisplay> {
    controller: PlaybackController<S>,
    display: D,
    last_sequence: u64,
    updates_applied: usize,
}

impl<S: MediaSurface, D: FrameDisplay> Presenter<S, D> {
    pub fn new(controller: PlaybackController<S>, display: D) -> Self {
        Self {
            controller,
            display,
            last_sequence: 0,
            updates_applied: 0,
        }
    }

    pub fn controller(&self) -> &PlaybackController<S> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut PlaybackController<S> {
        &mut self.controller
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn updates_applied(&self) -> usize {
        self.updates_applied
    }

    /// Applies `delivery` and returns how many updates it carried.
    pub fn apply(&mut self, delivery: Delivery) -> usize {
        let count = delivery.updates.len();
        for update in delivery.updates {
            debug_assert!(update.sequence > self.last_sequence, "updates out of order");
            if update.merged > 0 {
                log::debug!(
                    "Update #{} stands for {} folded posts",
                    update.sequence,
                    update.merged + 1
                );
            }
            self.controller.apply(update.attentive);
            self.last_sequence = update.sequence;
        }
        self.updates_applied += count;

        if let Some(frame) = delivery.frame {
            self.display.display(&frame);
        }
        count
    }

    /// Waits up to `timeout` for work from the capture thread and applies it.
    pub fn pump(&mut self, receiver: &DispatchReceiver, timeout: Duration) -> PumpOutcome {
        match receiver.wait(timeout) {
            WaitOutcome::Ready => PumpOutcome::Delivered(self.apply(receiver.drain())),
            WaitOutcome::TimedOut => PumpOutcome::Idle,
            WaitOutcome::Closed => PumpOutcome::Closed,
        }
    }
}
