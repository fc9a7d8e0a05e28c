//! Fixed-capacity moving-average ring buffer (spec §3, §4.10).
//!
//! Residuals are computed against the *current* mean at append time, a
//! deliberate streaming approximation the spec mandates for reproducibility
//! (see DESIGN.md Open Question log). Buffers start empty, not pre-sized
//! with leading zeros.

use std::collections::VecDeque;
use std::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum MovingAverageError {
    #[error("change rate is undefined on an empty buffer")]
    EmptyBuffer,
}

struct Inner {
    capacity: usize,
    values: VecDeque<f64>,
    residuals: VecDeque<f64>,
    running_sum: f64,
    running_res_sq: f64,
}

impl Inner {
    fn append(&mut self, v: f64) {
        self.values.push_back(v);
        self.running_sum += v;
        if self.values.len() > self.capacity {
            let oldest = self.values.pop_front().unwrap();
            self.running_sum -= oldest;
        }

        let current_len = self.values.len() as f64;
        let residual = v - self.running_sum / current_len;
        self.residuals.push_back(residual);
        self.running_res_sq += residual * residual;
        if self.residuals.len() > self.capacity {
            let oldest = self.residuals.pop_front().unwrap();
            self.running_res_sq -= oldest * oldest;
        }
    }

    fn mean(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.running_sum / self.values.len() as f64
        }
    }

    fn std(&self) -> f64 {
        let n = self.residuals.len();
        if n < 2 {
            0.0
        } else {
            (self.running_res_sq / (n - 1) as f64).sqrt()
        }
    }

    fn change_rate(&self) -> Result<f64, MovingAverageError> {
        let first = *self.values.front().ok_or(MovingAverageError::EmptyBuffer)?;
        let last = *self.values.back().ok_or(MovingAverageError::EmptyBuffer)?;
        Ok((first - last) / first)
    }
}

/// Ring buffer of length `L` used by alpha nodes (spec §4.10). Readers take
/// a shared lock; appenders take an exclusive lock.
pub struct MovingAverage {
    inner: RwLock<Inner>,
}

impl MovingAverage {
    pub fn new(length: usize) -> Self {
        MovingAverage {
            inner: RwLock::new(Inner {
                capacity: length.max(1),
                values: VecDeque::with_capacity(length),
                residuals: VecDeque::with_capacity(length),
                running_sum: 0.0,
                running_res_sq: 0.0,
            }),
        }
    }

    pub fn append(&self, value: f64) {
        self.inner.write().unwrap().append(value);
    }

    pub fn mean(&self) -> f64 {
        self.inner.read().unwrap().mean()
    }

    pub fn std(&self) -> f64 {
        self.inner.read().unwrap().std()
    }

    pub fn change_rate(&self) -> Result<f64, MovingAverageError> {
        self.inner.read().unwrap().change_rate()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moving_average_of_length_3() {
        let ma = MovingAverage::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            ma.append(v);
        }
        assert_eq!(ma.len(), 3);
        assert_eq!(ma.mean(), 3.0);
        let expected_std = (2.25_f64 / 2.0).sqrt();
        assert!((ma.std() - expected_std).abs() < 1e-9);
    }

    #[test]
    fn empty_buffer_mean_and_std_are_zero() {
        let ma = MovingAverage::new(5);
        assert_eq!(ma.mean(), 0.0);
        assert_eq!(ma.std(), 0.0);
    }

    #[test]
    fn change_rate_errors_on_empty_buffer() {
        let ma = MovingAverage::new(5);
        assert!(matches!(ma.change_rate(), Err(MovingAverageError::EmptyBuffer)));
    }

    #[test]
    fn running_sum_tracks_at_most_l_most_recent_values() {
        let ma = MovingAverage::new(2);
        ma.append(10.0);
        ma.append(20.0);
        ma.append(30.0);
        assert_eq!(ma.mean(), 25.0);
        assert_eq!(ma.len(), 2);
    }
}
