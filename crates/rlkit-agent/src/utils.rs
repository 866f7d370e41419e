//! Utility functions and helpers for RL agents

/// Trait for schedules (e.g., for learning-rate decay)
pub trait Schedule: Send + Sync {
    /// Get value at step t
    fn value(&self, t: usize) -> f64;
}

/// Linear schedule that moves from start to end over steps
#[derive(Debug, Clone)]
pub struct LinearSchedule {
    /// Starting value
    pub start: f64,
    /// Ending value
    pub end: f64,
    /// Number of steps for decay
    pub steps: usize,
}

impl LinearSchedule {
    /// Create a new linear schedule
    #[must_use]
    pub fn new(start: f64, end: f64, steps: usize) -> Self {
        Self { start, end, steps }
    }
}

impl Schedule for LinearSchedule {
    fn value(&self, t: usize) -> f64 {
        if t >= self.steps {
            self.end
        } else {
            let progress = t as f64 / self.steps as f64;
            self.start + (self.end - self.start) * progress
        }
    }
}

/// Constant schedule
#[derive(Debug, Clone)]
pub struct ConstantSchedule {
    /// Constant value
    pub value: f64,
}

impl Schedule for ConstantSchedule {
    fn value(&self, _t: usize) -> f64 {
        self.value
    }
}

/// Discounted returns that restart after every `done`, seeded with `terminal_value`
pub fn compute_returns(rewards: &[f64], dones: &[bool], gamma: f64, terminal_value: f64) -> Vec<f64> {
    let mut returns = vec![0.0; rewards.len()];
    let mut running_return = terminal_value;

    for i in (0..rewards.len()).rev() {
        if dones[i] {
            running_return = 0.0;
        }
        running_return = rewards[i] + gamma * running_return;
        returns[i] = running_return;
    }

    returns
}

/// Mean and population standard deviation; `(0, 0)` for an empty slice
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Fraction of the variance in `targets` explained by `predictions`
///
/// 1 is perfect, 0 is no better than predicting the mean. Targets without
/// variance carry nothing to explain and yield 0.
pub fn explained_variance(predictions: &[f64], targets: &[f64]) -> f64 {
    let (_, target_std) = mean_std(targets);
    if target_std == 0.0 {
        return 0.0;
    }
    let residuals: Vec<f64> = targets.iter().zip(predictions).map(|(t, p)| t - p).collect();
    let (_, residual_std) = mean_std(&residuals);
    1.0 - residual_std.powi(2) / target_std.powi(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_schedule() {
        let schedule = LinearSchedule::new(1.0, 0.0, 10);
        assert_eq!(schedule.value(0), 1.0);
        assert_relative_eq!(schedule.value(5), 0.5);
        assert_eq!(schedule.value(10), 0.0);
        assert_eq!(schedule.value(100), 0.0);
    }

    #[test]
    fn test_returns_restart_at_done() {
        let returns = compute_returns(&[1.0, 1.0, 1.0], &[false, true, false], 0.5, 4.0);
        assert_eq!(returns, vec![1.5, 1.0, 3.0]);
    }

    #[test]
    fn test_explained_variance() {
        let targets = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(explained_variance(&targets, &targets), 1.0);
        assert_relative_eq!(explained_variance(&[2.5; 4], &targets), 0.0);
        assert_eq!(explained_variance(&[0.0; 3], &[1.0; 3]), 0.0);
        assert_eq!(explained_variance(&[], &[]), 0.0);
    }
}
