//! State carried from frame to frame by one channel
//!
//! Frames of a channel must be fed in order; everything that depends on
//! earlier frames lives here and nowhere else.

use crate::ltp::LtpState;
use crate::prediction::PredictorState;
use crate::psy::PsyState;
use crate::types::WindowSequence;

/// Persistent per-channel state
#[derive(Debug, Clone, Default)]
pub struct ChannelState {
    /// Threshold history for temporal masking
    pub psy: PsyState,
    /// Time-domain history of the long-term predictor
    pub ltp: LtpState,
    /// Backward-adaptive predictors, one per coefficient
    pub predictors: PredictorState,
    frames: u64,
    last_sequence: Option<WindowSequence>,
}

impl ChannelState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames processed since creation or the last reset
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Window sequence of the previous frame
    pub fn last_sequence(&self) -> Option<WindowSequence> {
        self.last_sequence
    }

    /// Record the end of a frame coded with `sequence`
    pub(crate) fn advance(&mut self, sequence: WindowSequence) {
        self.frames += 1;
        self.last_sequence = Some(sequence);
    }

    /// Drop all history, as at the start of a new stream
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_and_reset() {
        let mut state = ChannelState::new();
        assert_eq!(state.frames(), 0);
        assert_eq!(state.last_sequence(), None);

        state.advance(WindowSequence::OnlyLong);
        state.advance(WindowSequence::EightShort);
        assert_eq!(state.frames(), 2);
        assert_eq!(state.last_sequence(), Some(WindowSequence::EightShort));

        state.reset();
        assert_eq!(state.frames(), 0);
        assert_eq!(state.last_sequence(), None);
        assert_eq!(state.ltp.lag(), 0);
    }
}
