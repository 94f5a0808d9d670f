use crate::core::{PositionEstimate, SmoothedEstimate, SMOOTHING_ALPHA};

/// Exponential moving average over successive raw estimates.
///
/// Higher `alpha` follows the tag faster but passes more jitter through;
/// lower `alpha` is steadier but lags.
#[derive(Debug, Clone)]
pub struct Smoother {
    alpha: f64,
    state: Option<SmoothedEstimate>,
}

impl Default for Smoother {
    fn default() -> Self {
        Self::new(SMOOTHING_ALPHA)
    }
}

impl Smoother {
    /// `alpha` must lie in (0, 1); configuration validation enforces this
    pub fn new(alpha: f64) -> Self {
        Self { alpha, state: None }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Feed the next raw estimate. The first call adopts it unchanged.
    pub fn update(&mut self, raw: PositionEstimate) -> SmoothedEstimate {
        let next = match self.state {
            None => SmoothedEstimate { x: raw.x, y: raw.y },
            Some(prev) => SmoothedEstimate {
                x: prev.x + self.alpha * (raw.x - prev.x),
                y: prev.y + self.alpha * (raw.y - prev.y),
            },
        };
        self.state = Some(next);
        next
    }

    pub fn current(&self) -> Option<SmoothedEstimate> {
        self.state
    }

    /// Forget the filtered value; the next update starts fresh
    pub fn reset(&mut self) {
        self.state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_update_adopts_raw() {
        let mut smoother = Smoother::new(0.35);
        assert!(smoother.current().is_none());

        let out = smoother.update(PositionEstimate::new(2.0, -1.0));
        assert_eq!(out, SmoothedEstimate { x: 2.0, y: -1.0 });
        assert_eq!(smoother.current(), Some(out));
    }

    #[test]
    fn test_exponential_step() {
        let mut smoother = Smoother::new(0.25);
        smoother.update(PositionEstimate::new(0.0, 0.0));
        let out = smoother.update(PositionEstimate::new(4.0, -8.0));
        assert!((out.x - 1.0).abs() < 1e-12);
        assert!((out.y + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_input_converges_monotonically() {
        let mut smoother = Smoother::new(0.35);
        smoother.update(PositionEstimate::new(-3.0, 5.0));

        let target = PositionEstimate::new(1.5, 0.5);
        let mut prev = smoother.current().unwrap();
        for _ in 0..200 {
            let next = smoother.update(target);
            // x climbs toward 1.5, y falls toward 0.5, neither overshoots
            assert!(next.x >= prev.x && next.x <= target.x);
            assert!(next.y <= prev.y && next.y >= target.y);
            prev = next;
        }
        assert!((prev.x - target.x).abs() < 1e-9);
        assert!((prev.y - target.y).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let mut smoother = Smoother::default();
        smoother.update(PositionEstimate::new(1.0, 1.0));
        smoother.reset();
        let out = smoother.update(PositionEstimate::new(7.0, 7.0));
        assert_eq!(out, SmoothedEstimate { x: 7.0, y: 7.0 });
    }
}
