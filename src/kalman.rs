//! 1-D Kalman smoothing for scalar time series (C1). Two independent
//! instances run in lock-step inside `ActivityBrain`: one per position axis
//! (lat, lon) and one for altitude, rather than a full vector/matrix filter
//! -- dependency-free, matches the "2-D position treated jointly with
//! identical Q" wording, and keeps `nalgebra` off the dependency tree.

/// Process variance, in units²/s. Governs how quickly the filter's
/// uncertainty grows between observations, which in turn governs how much
/// it trusts a new noisy reading vs. its current estimate.
const DEFAULT_PROCESS_VARIANCE: f64 = 0.25;

#[derive(Debug, Clone, Copy)]
struct State {
    value: f64,
    variance: f64,
    timestamp: f64,
}

/// A scalar Kalman filter over a value observed at increasing timestamps.
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    process_variance: f64,
    state: Option<State>,
}

impl KalmanFilter {
    pub fn new() -> Self {
        Self::with_process_variance(DEFAULT_PROCESS_VARIANCE)
    }

    pub fn with_process_variance(process_variance: f64) -> Self {
        Self {
            process_variance,
            state: None,
        }
    }

    /// Fold in a new observation `value` at `timestamp` with measurement
    /// variance `measurement_variance` (R). Fails silently -- i.e. the
    /// observation is dropped -- when the variance is non-positive or the
    /// timestamp does not move forward, matching the design's "fails
    /// silently" failure model.
    pub fn update(&mut self, value: f64, timestamp: f64, measurement_variance: f64) {
        if measurement_variance <= 0.0 || !measurement_variance.is_finite() {
            return;
        }

        let Some(state) = self.state else {
            self.state = Some(State {
                value,
                variance: measurement_variance,
                timestamp,
            });
            return;
        };

        if timestamp < state.timestamp {
            return;
        }

        let dt = (timestamp - state.timestamp).max(0.0);
        let predicted_variance = state.variance + self.process_variance * dt;
        let gain = predicted_variance / (predicted_variance + measurement_variance);
        let new_value = state.value + gain * (value - state.value);
        let new_variance = (1.0 - gain) * predicted_variance;

        self.state = Some(State {
            value: new_value,
            variance: new_variance,
            timestamp,
        });
    }

    pub fn value(&self) -> Option<f64> {
        self.state.map(|s| s.value)
    }

    pub fn variance(&self) -> Option<f64> {
        self.state.map(|s| s.variance)
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// The jointly-run lat/lon filter pair, gated by a single shared timestamp.
#[derive(Debug, Clone, Default)]
pub struct PositionFilter {
    pub lat: KalmanFilter,
    pub lon: KalmanFilter,
}

impl PositionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update both axes. Per the design, vertical accuracy gates the
    /// altitude filter only; this filter gates on horizontal accuracy.
    pub fn update(&mut self, lat: f64, lon: f64, timestamp: f64, horizontal_accuracy: f64) {
        if horizontal_accuracy <= 0.0 {
            return;
        }
        let variance = horizontal_accuracy * horizontal_accuracy;
        self.lat.update(lat, timestamp, variance);
        self.lon.update(lon, timestamp, variance);
    }

    pub fn value(&self) -> Option<(f64, f64)> {
        Some((self.lat.value()?, self.lon.value()?))
    }

    pub fn reset(&mut self) {
        self.lat.reset();
        self.lon.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_becomes_state() {
        let mut kf = KalmanFilter::new();
        kf.update(10.0, 0.0, 4.0);
        assert_eq!(kf.value(), Some(10.0));
    }

    #[test]
    fn converges_toward_repeated_observation() {
        let mut kf = KalmanFilter::with_process_variance(0.1);
        kf.update(0.0, 0.0, 1.0);
        for t in 1..20 {
            kf.update(10.0, t as f64, 1.0);
        }
        let value = kf.value().unwrap();
        assert!((value - 10.0).abs() < 0.5, "value={value}");
    }

    #[test]
    fn non_monotonic_timestamp_is_dropped() {
        let mut kf = KalmanFilter::new();
        kf.update(10.0, 5.0, 1.0);
        kf.update(20.0, 1.0, 1.0);
        assert_eq!(kf.value(), Some(10.0));
    }

    #[test]
    fn non_positive_variance_is_dropped() {
        let mut kf = KalmanFilter::new();
        kf.update(10.0, 0.0, 0.0);
        assert_eq!(kf.value(), None);
    }

    #[test]
    fn reset_clears_state() {
        let mut kf = KalmanFilter::new();
        kf.update(10.0, 0.0, 1.0);
        kf.reset();
        assert_eq!(kf.value(), None);
        kf.update(5.0, 1.0, 1.0);
        assert_eq!(kf.value(), Some(5.0));
    }

    #[test]
    fn position_filter_requires_positive_accuracy() {
        let mut pf = PositionFilter::new();
        pf.update(35.0, 139.0, 0.0, 0.0);
        assert_eq!(pf.value(), None);
        pf.update(35.0, 139.0, 0.0, 10.0);
        assert_eq!(pf.value(), Some((35.0, 139.0)));
    }
}
