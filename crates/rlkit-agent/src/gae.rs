//! Generalized Advantage Estimation
//!
//! Walks a completed rollout from the last transition to the first, cutting
//! the recursion at every `done` so advantages never leak across episodes.

use tracing::{debug, warn};

use rlkit_core::{AdvantageTargets, RLError, Result, RolloutBuffer};

/// Standard deviations below this leave advantages unnormalized
pub const MIN_ADVANTAGE_STD: f64 = 1e-8;

/// GAE advantages and return targets (`return = advantage + value`)
///
/// `last_value` is V of the observation following the final transition; it
/// is ignored when that transition is terminal. `values` and `dones` must be
/// as long as `rewards`.
pub fn compute_gae(
    rewards: &[f64],
    values: &[f64],
    dones: &[bool],
    last_value: f64,
    gamma: f64,
    lambda: f64,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let n = rewards.len();
    for actual in [values.len(), dones.len()] {
        if actual != n {
            return Err(RLError::DimensionMismatch { expected: n, actual });
        }
    }
    let mut advantages = vec![0.0; n];
    let mut returns = vec![0.0; n];
    let mut running_advantage = 0.0;

    for t in (0..n).rev() {
        let next_value = if t + 1 == n { last_value } else { values[t + 1] };
        let not_done = if dones[t] { 0.0 } else { 1.0 };
        let delta = rewards[t] + gamma * next_value * not_done - values[t];
        running_advantage = delta + gamma * lambda * not_done * running_advantage;
        advantages[t] = running_advantage;
        returns[t] = advantages[t] + values[t];
    }

    Ok((advantages, returns))
}

/// Standardize to zero mean and unit variance
///
/// Returns `None` when the spread is too small to divide by.
pub fn normalize_advantages(advantages: &[f64]) -> Option<Vec<f64>> {
    let (mean, std) = crate::utils::mean_std(advantages);
    if !std.is_finite() || std < MIN_ADVANTAGE_STD {
        return None;
    }
    Some(advantages.iter().map(|a| (a - mean) / std).collect())
}

/// Fills a rollout buffer's advantage and return targets
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaeEstimator {
    /// Discount factor
    pub gamma: f64,
    /// GAE lambda
    pub lambda: f64,
    /// Whether to attach standardized advantages
    pub normalize: bool,
}

impl GaeEstimator {
    /// Create an estimator
    #[must_use]
    pub fn new(gamma: f64, lambda: f64, normalize: bool) -> Self {
        Self {
            gamma,
            lambda,
            normalize,
        }
    }

    /// Compute and install targets for a completed rollout
    ///
    /// Rewards and value estimates are left untouched.
    pub fn estimate<A>(&self, buffer: &mut RolloutBuffer<A>, bootstrap_value: f64) -> Result<()> {
        if buffer.is_empty() {
            return Err(RLError::InvalidPhase(
                "advantage estimation requires a non-empty rollout".into(),
            ));
        }
        if !bootstrap_value.is_finite() {
            return Err(RLError::numerical(
                "advantage estimation",
                format!("bootstrap value {bootstrap_value}"),
            ));
        }

        let transitions = buffer.transitions();
        let rewards: Vec<f64> = transitions.iter().map(|t| t.reward).collect();
        let values: Vec<f64> = transitions.iter().map(|t| t.value).collect();
        let dones: Vec<bool> = transitions.iter().map(|t| t.done).collect();

        let (advantages, returns) =
            compute_gae(&rewards, &values, &dones, bootstrap_value, self.gamma, self.lambda)?;
        if let Some(t) = advantages.iter().position(|a| !a.is_finite()) {
            return Err(RLError::numerical(
                "advantage estimation",
                format!("advantage at step {t} is {}", advantages[t]),
            ));
        }

        let mut targets = AdvantageTargets::new(advantages, returns)?;
        if self.normalize {
            match normalize_advantages(targets.advantages()) {
                Some(normalized) => targets = targets.with_normalized(normalized)?,
                None => warn!(
                    len = targets.len(),
                    "advantages have near-zero variance; leaving them unnormalized"
                ),
            }
        }

        debug!(
            len = targets.len(),
            bootstrap_value,
            normalized = targets.normalized().is_some(),
            "computed advantages"
        );
        buffer.install_targets(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::compute_returns;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use rlkit_core::{DiscreteAction, Transition};

    fn buffer_from(rewards: &[f64], values: &[f64], dones: &[bool]) -> RolloutBuffer<DiscreteAction> {
        let mut buffer = RolloutBuffer::new(rewards.len());
        for i in 0..rewards.len() {
            buffer
                .record(Transition {
                    observation: vec![i as f64],
                    action: DiscreteAction(0),
                    log_prob: 0.0,
                    reward: rewards[i],
                    done: dones[i],
                    value: values[i],
                })
                .unwrap();
        }
        buffer
    }

    fn rollout() -> impl Strategy<Value = (Vec<f64>, Vec<f64>, Vec<bool>)> {
        (1usize..40).prop_flat_map(|n| {
            (
                prop::collection::vec(-10.0f64..10.0, n),
                prop::collection::vec(-10.0f64..10.0, n),
                prop::collection::vec(prop::bool::weighted(0.2), n),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_advantage_plus_value_is_return(
            (rewards, values, dones) in rollout(),
            last_value in -10.0f64..10.0,
            gamma in 0.5f64..1.0,
            lambda in 0.0f64..=1.0,
        ) {
            let mut buffer = buffer_from(&rewards, &values, &dones);
            GaeEstimator::new(gamma, lambda, true).estimate(&mut buffer, last_value).unwrap();
            let targets = buffer.targets().unwrap();
            for (t, transition) in buffer.transitions().iter().enumerate() {
                prop_assert_eq!(targets.advantages()[t] + transition.value, targets.returns()[t]);
            }
        }

        #[test]
        fn prop_lambda_one_is_monte_carlo(
            (rewards, values, mut dones) in rollout(),
            gamma in 0.5f64..1.0,
        ) {
            *dones.last_mut().unwrap() = true;
            let (advantages, _) = compute_gae(&rewards, &values, &dones, 0.0, gamma, 1.0).unwrap();
            let mc = compute_returns(&rewards, &dones, gamma, 0.0);
            for t in 0..rewards.len() {
                prop_assert!((advantages[t] - (mc[t] - values[t])).abs() < 1e-9);
            }
        }

        #[test]
        fn prop_lambda_zero_is_td(
            (rewards, values, dones) in rollout(),
            last_value in -10.0f64..10.0,
            gamma in 0.5f64..1.0,
        ) {
            let (advantages, _) = compute_gae(&rewards, &values, &dones, last_value, gamma, 0.0).unwrap();
            for t in 0..rewards.len() {
                let next = if t + 1 == rewards.len() { last_value } else { values[t + 1] };
                let not_done = if dones[t] { 0.0 } else { 1.0 };
                let td = rewards[t] + gamma * next * not_done - values[t];
                prop_assert!((advantages[t] - td).abs() < 1e-12);
            }
        }

        #[test]
        fn prop_estimator_leaves_rewards_and_values(
            (rewards, values, dones) in rollout(),
        ) {
            let mut buffer = buffer_from(&rewards, &values, &dones);
            GaeEstimator::new(0.99, 0.95, true).estimate(&mut buffer, 1.0).unwrap();
            for (t, transition) in buffer.transitions().iter().enumerate() {
                prop_assert_eq!(transition.reward, rewards[t]);
                prop_assert_eq!(transition.value, values[t]);
            }
        }
    }

    #[test]
    fn test_done_boundary_isolates_episodes() {
        let dones = [false, false, true, false, false];
        let values = [0.5, 0.4, 0.3, 0.2, 0.1];
        let small = compute_gae(&[1.0, 1.0, 1.0, 2.0, 3.0], &values, &dones, 0.7, 0.99, 0.95).unwrap().0;
        let large = compute_gae(&[100.0, -50.0, 1e6, 2.0, 3.0], &values, &dones, 0.7, 0.99, 0.95).unwrap().0;
        assert_eq!(small[3..], large[3..]);
        assert_ne!(small[2], large[2]);
    }

    #[test]
    fn test_bootstrap_ignored_after_terminal() {
        let a = compute_gae(&[1.0, 1.0], &[0.0, 0.0], &[false, true], 0.0, 0.9, 0.9).unwrap().0;
        let b = compute_gae(&[1.0, 1.0], &[0.0, 0.0], &[false, true], 123.0, 0.9, 0.9).unwrap().0;
        assert_eq!(a, b);
    }

    #[test]
    fn test_mismatched_lengths_are_rejected() {
        let err = compute_gae(&[1.0, 1.0], &[0.0], &[false, false], 0.0, 0.9, 0.9).unwrap_err();
        assert!(matches!(err, RLError::DimensionMismatch { expected: 2, actual: 1 }));
        let err = compute_gae(&[1.0], &[0.0], &[false, true], 0.0, 0.9, 0.9).unwrap_err();
        assert!(matches!(err, RLError::DimensionMismatch { expected: 1, actual: 2 }));
    }

    #[test]
    fn test_hand_computed_values() {
        let (advantages, returns) =
            compute_gae(&[1.0, 0.0], &[0.5, 0.25], &[false, false], 1.0, 0.5, 0.5).unwrap();
        // delta_1 = 0 + 0.5 * 1 - 0.25 = 0.25; delta_0 = 1 + 0.5 * 0.25 - 0.5 = 0.625
        assert_relative_eq!(advantages[1], 0.25);
        assert_relative_eq!(advantages[0], 0.625 + 0.25 * 0.25);
        assert_relative_eq!(returns[0], advantages[0] + 0.5);
    }

    #[test]
    fn test_zero_variance_leaves_advantages_unnormalized() {
        let mut buffer = buffer_from(&[1.0], &[0.0], &[true]);
        GaeEstimator::new(0.99, 0.95, true).estimate(&mut buffer, 0.0).unwrap();
        let targets = buffer.targets().unwrap();
        assert!(targets.normalized().is_none());
        assert_eq!(targets.policy_advantages(), &[1.0]);
    }

    #[test]
    fn test_normalized_advantages_are_standardized() {
        let normalized = normalize_advantages(&[1.0, 2.0, 3.0, 6.0]).unwrap();
        let (mean, std) = crate::utils::mean_std(&normalized);
        assert_relative_eq!(mean, 0.0, epsilon = 1e-12);
        assert_relative_eq!(std, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_second_estimate_is_rejected() {
        let mut buffer = buffer_from(&[1.0, 2.0], &[0.0, 0.0], &[false, false]);
        let estimator = GaeEstimator::new(0.99, 0.95, false);
        estimator.estimate(&mut buffer, 0.0).unwrap();
        assert!(matches!(
            estimator.estimate(&mut buffer, 0.0),
            Err(RLError::InvalidPhase(_))
        ));
    }

    #[test]
    fn test_non_finite_inputs_are_reported() {
        let mut buffer = buffer_from(&[f64::NAN], &[0.0], &[false]);
        let err = GaeEstimator::new(0.99, 0.95, false)
            .estimate(&mut buffer, 0.0)
            .unwrap_err();
        assert!(matches!(err, RLError::NumericalInstability { .. }));

        let mut buffer = buffer_from(&[1.0], &[0.0], &[false]);
        let err = GaeEstimator::new(0.99, 0.95, false)
            .estimate(&mut buffer, f64::INFINITY)
            .unwrap_err();
        assert!(matches!(err, RLError::NumericalInstability { .. }));
    }
}
