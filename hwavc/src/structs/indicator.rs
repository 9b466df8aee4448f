//! Blink animation for the poor-network overlay.

/// Alpha change per presented frame.
pub const INDICATOR_ALPHA_STEP: u8 = 4;

/// Animation state of the network-health indicator.
///
/// The alpha ramps by [`INDICATOR_ALPHA_STEP`] per presented frame and wraps
/// through `u8`; whenever it lands on zero the ramp direction flips, so the
/// icon fades in and out as a triangle wave.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndicatorStatus {
    activated: bool,
    alpha: u8,
    rising: bool,
}

impl IndicatorStatus {
    pub fn activate(&mut self) {
        self.activated = true;
    }

    /// Deactivates and clears the ramp.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_active(&self) -> bool {
        self.activated
    }

    pub fn alpha(&self) -> u8 {
        self.alpha
    }

    /// Returns the alpha to draw this frame and steps the ramp, or `None`
    /// while inactive.
    pub fn advance(&mut self) -> Option<u8> {
        if !self.activated {
            return None;
        }

        let current = self.alpha;
        self.step();
        if self.alpha == 0 {
            self.rising = !self.rising;
            self.step();
        }

        Some(current)
    }

    fn step(&mut self) {
        self.alpha = if self.rising {
            self.alpha.wrapping_add(INDICATOR_ALPHA_STEP)
        } else {
            self.alpha.wrapping_sub(INDICATOR_ALPHA_STEP)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_indicator_is_not_drawn() {
        let mut indicator = IndicatorStatus::default();
        assert_eq!(indicator.advance(), None);
        assert_eq!(indicator.alpha(), 0);
    }

    #[test]
    fn ramp_bounces_off_zero() {
        let mut indicator = IndicatorStatus::default();
        indicator.activate();

        let drawn: Vec<u8> = (0..66).filter_map(|_| indicator.advance()).collect();

        assert_eq!(&drawn[..3], &[0, 252, 248]);
        // 252 down to 4 in 63 draws, then the ramp turns and rises again.
        assert_eq!(drawn[63], 4);
        assert_eq!(drawn[64], 4);
        assert_eq!(drawn[65], 8);
        assert!(drawn.iter().all(|&a| a % INDICATOR_ALPHA_STEP == 0));
    }

    #[test]
    fn reset_discards_ramp_position() {
        let mut indicator = IndicatorStatus::default();
        indicator.activate();
        for _ in 0..10 {
            indicator.advance();
        }
        assert_ne!(indicator.alpha(), 0);

        indicator.reset();
        assert!(!indicator.is_active());
        assert_eq!(indicator, IndicatorStatus::default());

        indicator.activate();
        assert_eq!(indicator.advance(), Some(0));
    }
}
