//! Gradient containers and the optimizer primitive contract

use ndarray::Array1;

/// Gradients for both parameter groups of an actor-critic
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    /// Gradient of the loss w.r.t. the policy parameters
    pub policy: Array1<f64>,
    /// Gradient of the loss w.r.t. the value parameters
    pub value: Array1<f64>,
}

impl Gradients {
    /// Zeroed gradients for groups of the given sizes
    #[must_use]
    pub fn zeros(policy_len: usize, value_len: usize) -> Self {
        Self {
            policy: Array1::zeros(policy_len),
            value: Array1::zeros(value_len),
        }
    }

    /// Global L2 norm across both groups
    #[must_use]
    pub fn norm(&self) -> f64 {
        (self.policy.iter().chain(self.value.iter()).map(|g| g * g).sum::<f64>()).sqrt()
    }

    /// Scale every entry in place
    pub fn scale(&mut self, factor: f64) {
        self.policy.mapv_inplace(|g| g * factor);
        self.value.mapv_inplace(|g| g * factor);
    }

    /// Rescale so the global norm is at most `max_norm`; returns the norm before clipping
    pub fn clip_norm(&mut self, max_norm: f64) -> f64 {
        let norm = self.norm();
        if norm > max_norm {
            self.scale(max_norm / (norm + 1e-12));
        }
        norm
    }

    /// Whether every entry is finite
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.policy.iter().chain(self.value.iter()).all(|g| g.is_finite())
    }
}

/// Gradient-based parameter update primitive
///
/// `params` and `grads` are parallel slices of parameter groups; an
/// implementation may keep per-group state (moments) keyed by position.
pub trait GradientOptimizer: Send + Sync {
    /// Update every parameter group in place from its gradient
    fn apply_gradients(
        &mut self,
        params: &mut [&mut Array1<f64>],
        grads: &[&Array1<f64>],
    ) -> crate::Result<()>;

    /// Current learning rate
    fn learning_rate(&self) -> f64;

    /// Change the learning rate (used for annealing)
    fn set_learning_rate(&mut self, lr: f64);

    /// Drop any accumulated state so the next update starts fresh
    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr1;

    #[test]
    fn test_clip_norm_rescales_only_when_needed() {
        let mut grads = Gradients {
            policy: arr1(&[3.0]),
            value: arr1(&[4.0]),
        };
        assert_relative_eq!(grads.clip_norm(10.0), 5.0);
        assert_relative_eq!(grads.norm(), 5.0);

        assert_relative_eq!(grads.clip_norm(1.0), 5.0);
        assert_relative_eq!(grads.norm(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(grads.policy[0], 0.6, epsilon = 1e-9);
    }

    #[test]
    fn test_finiteness() {
        let mut grads = Gradients::zeros(2, 1);
        assert!(grads.is_finite());
        grads.value[0] = f64::NAN;
        assert!(!grads.is_finite());
    }
}
