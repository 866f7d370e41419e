//! Gradient-descent primitives: Adam and plain SGD

use ndarray::{Array1, Zip};
use serde::{Deserialize, Serialize};

use rlkit_core::{GradientOptimizer, RLError, Result};

fn check_groups(params: &[&mut Array1<f64>], grads: &[&Array1<f64>]) -> Result<()> {
    if params.len() != grads.len() {
        return Err(RLError::DimensionMismatch {
            expected: params.len(),
            actual: grads.len(),
        });
    }
    for (p, g) in params.iter().zip(grads) {
        if p.len() != g.len() {
            return Err(RLError::DimensionMismatch {
                expected: p.len(),
                actual: g.len(),
            });
        }
    }
    Ok(())
}

/// Adam hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamConfig {
    /// Step size
    pub learning_rate: f64,
    /// First moment decay
    pub beta1: f64,
    /// Second moment decay
    pub beta2: f64,
    /// Denominator epsilon
    pub eps: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 3e-4,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

/// Adam with bias-corrected moments, one moment pair per parameter group
///
/// Moment buffers are sized lazily from the first update.
#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    t: i32,
    m: Vec<Array1<f64>>,
    v: Vec<Array1<f64>>,
}

impl Adam {
    /// Create an optimizer with default betas
    #[must_use]
    pub fn new(learning_rate: f64) -> Self {
        Self::with_config(AdamConfig {
            learning_rate,
            ..AdamConfig::default()
        })
    }

    /// Create an optimizer from a full configuration
    #[must_use]
    pub fn with_config(config: AdamConfig) -> Self {
        Self {
            config,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    /// Number of updates applied so far
    #[must_use]
    pub fn steps(&self) -> i32 {
        self.t
    }

}

impl GradientOptimizer for Adam {
    fn apply_gradients(
        &mut self,
        params: &mut [&mut Array1<f64>],
        grads: &[&Array1<f64>],
    ) -> Result<()> {
        check_groups(params, grads)?;
        let shapes_match = self.m.len() == params.len()
            && self.m.iter().zip(params.iter()).all(|(m, p)| m.len() == p.len());
        if !shapes_match {
            self.m = params.iter().map(|p| Array1::zeros(p.len())).collect();
            self.v = params.iter().map(|p| Array1::zeros(p.len())).collect();
            self.t = 0;
        }

        self.t += 1;
        let AdamConfig {
            learning_rate,
            beta1,
            beta2,
            eps,
        } = self.config;
        let bias1 = 1.0 - beta1.powi(self.t);
        let bias2 = 1.0 - beta2.powi(self.t);

        for (i, param) in params.iter_mut().enumerate() {
            Zip::from(&mut **param)
                .and(&mut self.m[i])
                .and(&mut self.v[i])
                .and(grads[i])
                .for_each(|p, m, v, &g| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    let m_hat = *m / bias1;
                    let v_hat = *v / bias2;
                    *p -= learning_rate * m_hat / (v_hat.sqrt() + eps);
                });
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.config.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.config.learning_rate = lr;
    }

    fn reset(&mut self) {
        self.t = 0;
        self.m.clear();
        self.v.clear();
    }
}

/// Vanilla stochastic gradient descent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sgd {
    learning_rate: f64,
}

impl Sgd {
    /// Create an SGD optimizer
    #[must_use]
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl GradientOptimizer for Sgd {
    fn apply_gradients(
        &mut self,
        params: &mut [&mut Array1<f64>],
        grads: &[&Array1<f64>],
    ) -> Result<()> {
        check_groups(params, grads)?;
        for (param, grad) in params.iter_mut().zip(grads) {
            param.scaled_add(-self.learning_rate, *grad);
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr1;

    #[test]
    fn test_sgd_step() {
        let mut opt = Sgd::new(0.5);
        let mut a = arr1(&[1.0, 2.0]);
        let mut b = arr1(&[3.0]);
        opt.apply_gradients(&mut [&mut a, &mut b], &[&arr1(&[2.0, -2.0]), &arr1(&[1.0])])
            .unwrap();
        assert_eq!(a, arr1(&[0.0, 3.0]));
        assert_eq!(b, arr1(&[2.5]));
    }

    #[test]
    fn test_adam_first_step_moves_by_learning_rate() {
        let mut opt = Adam::new(0.1);
        let mut p = arr1(&[0.0, 0.0]);
        opt.apply_gradients(&mut [&mut p], &[&arr1(&[4.0, -0.01])]).unwrap();
        // bias-corrected first step is lr * sign(g)
        assert_relative_eq!(p[0], -0.1, epsilon = 1e-6);
        assert_relative_eq!(p[1], 0.1, epsilon = 1e-4);
        assert_eq!(opt.steps(), 1);
    }

    #[test]
    fn test_adam_reset_restarts_moments() {
        let mut fresh = Adam::new(0.1);
        let mut reused = Adam::new(0.1);
        let mut p = arr1(&[0.0]);
        let mut q = arr1(&[0.0]);
        for _ in 0..5 {
            reused.apply_gradients(&mut [&mut q], &[&arr1(&[-3.0])]).unwrap();
        }
        reused.reset();
        assert_eq!(reused.steps(), 0);

        q.fill(0.0);
        fresh.apply_gradients(&mut [&mut p], &[&arr1(&[1.0])]).unwrap();
        reused.apply_gradients(&mut [&mut q], &[&arr1(&[1.0])]).unwrap();
        assert_eq!(p, q);
        assert_eq!(reused.steps(), 1);
    }

    #[test]
    fn test_adam_minimizes_quadratic() {
        let mut opt = Adam::new(0.05);
        let mut p = arr1(&[3.0, -2.0]);
        for _ in 0..2000 {
            let grad = p.mapv(|x| 2.0 * x);
            opt.apply_gradients(&mut [&mut p], &[&grad]).unwrap();
        }
        assert!(p.iter().all(|x| x.abs() < 5e-2));
    }

    #[test]
    fn test_group_mismatch_is_rejected() {
        let mut opt = Adam::new(0.1);
        let mut p = arr1(&[0.0, 0.0]);
        let err = opt
            .apply_gradients(&mut [&mut p], &[&arr1(&[1.0])])
            .unwrap_err();
        assert!(matches!(err, RLError::DimensionMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn test_learning_rate_can_be_changed() {
        let mut opt = Adam::new(0.1);
        opt.set_learning_rate(0.01);
        assert_eq!(opt.learning_rate(), 0.01);
    }
}
