//! Controller actions: grab scales the hand cube, squeezing hard buzzes,
//! and the menu button asks the runtime to end the session.

use super::{Hand, XrResult, XrRuntime};

/// Grab values above this trigger a haptic pulse.
pub const HAPTIC_GRAB_THRESHOLD: f32 = 0.9;
pub const HAPTIC_AMPLITUDE: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputState {
    hand_scale: [f32; 2],
    hand_active: [bool; 2],
}

impl Default for InputState {
    fn default() -> Self {
        Self {
            hand_scale: [1.0; 2],
            hand_active: [false; 2],
        }
    }
}

impl InputState {
    /// Multiplier in `[0.5, 1.0]` applied to the hand cube.
    pub fn hand_scale(&self, hand: Hand) -> f32 {
        self.hand_scale[hand.index()]
    }

    pub fn hand_active(&self, hand: Hand) -> bool {
        self.hand_active[hand.index()]
    }

    /// Syncs actions and refreshes per-hand state. Returns `true` when an
    /// exit was requested from the quit action this poll.
    pub fn poll<R: XrRuntime + ?Sized>(&mut self, runtime: &mut R) -> XrResult<bool> {
        self.hand_active = [false; 2];
        runtime.sync_actions()?;

        for hand in Hand::ALL {
            let grab = runtime.grab_value(hand)?;
            if grab.is_active {
                self.hand_scale[hand.index()] = 1.0 - 0.5 * grab.current;
                if grab.current > HAPTIC_GRAB_THRESHOLD {
                    runtime.apply_haptic(hand, HAPTIC_AMPLITUDE)?;
                    log::trace!("[input] {} hand haptic pulse", hand.as_str());
                }
            }
            self.hand_active[hand.index()] = runtime.hand_pose_active(hand)?;
        }

        let quit = runtime.quit_value()?;
        if quit.is_active && quit.changed_since_last_sync && quit.current {
            log::info!("[input] quit action pressed, requesting session exit");
            runtime.request_exit()?;
            return Ok(true);
        }
        Ok(false)
    }
}
