//! State-value function contract

use ndarray::Array1;

/// State value function V(s)
pub trait ValueFunction: Send + Sync {
    /// Estimate the value of an observation
    fn value(&self, observation: &[f64]) -> crate::Result<f64>;

    /// Batch value estimation
    fn batch_value(&self, observations: &[Vec<f64>]) -> crate::Result<Vec<f64>> {
        observations.iter().map(|obs| self.value(obs)).collect()
    }

    /// Accumulate `d_value * ∇V(s)` into `grad`
    fn backward(
        &self,
        observation: &[f64],
        d_value: f64,
        grad: &mut Array1<f64>,
    ) -> crate::Result<()>;

    /// Trainable parameters
    fn parameters(&self) -> &Array1<f64>;

    /// Mutable trainable parameters
    fn parameters_mut(&mut self) -> &mut Array1<f64>;
}
