//! Rollout storage: transitions and the fixed-capacity trajectory buffer

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{RLError, Result};

/// Single environment step as recorded during collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition<A> {
    /// Flattened observation the action was chosen from
    pub observation: Vec<f64>,
    /// Action taken
    pub action: A,
    /// Log probability of `action` under the acting policy
    pub log_prob: f64,
    /// Reward received
    pub reward: f64,
    /// Whether this step ended the episode
    pub done: bool,
    /// Value estimate of `observation` at collection time
    pub value: f64,
}

/// Advantage and return targets derived from a completed rollout
#[derive(Debug, Clone, PartialEq)]
pub struct AdvantageTargets {
    advantages: Vec<f64>,
    returns: Vec<f64>,
    normalized: Option<Vec<f64>>,
}

impl AdvantageTargets {
    /// Raw advantages and their return targets (`return = advantage + value`)
    pub fn new(advantages: Vec<f64>, returns: Vec<f64>) -> Result<Self> {
        if advantages.len() != returns.len() {
            return Err(RLError::DimensionMismatch {
                expected: advantages.len(),
                actual: returns.len(),
            });
        }
        Ok(Self {
            advantages,
            returns,
            normalized: None,
        })
    }

    /// Attach standardized advantages for the policy loss
    pub fn with_normalized(mut self, normalized: Vec<f64>) -> Result<Self> {
        if normalized.len() != self.advantages.len() {
            return Err(RLError::DimensionMismatch {
                expected: self.advantages.len(),
                actual: normalized.len(),
            });
        }
        self.normalized = Some(normalized);
        Ok(self)
    }

    /// Raw GAE advantages
    #[must_use]
    pub fn advantages(&self) -> &[f64] {
        &self.advantages
    }

    /// Value regression targets
    #[must_use]
    pub fn returns(&self) -> &[f64] {
        &self.returns
    }

    /// Standardized advantages, if normalization ran
    #[must_use]
    pub fn normalized(&self) -> Option<&[f64]> {
        self.normalized.as_deref()
    }

    /// Advantages the policy loss should weight by: standardized when available
    #[must_use]
    pub fn policy_advantages(&self) -> &[f64] {
        self.normalized.as_deref().unwrap_or(&self.advantages)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.advantages.len()
    }

    /// Whether there are no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.advantages.is_empty()
    }
}

/// Fixed-capacity store for one rollout
///
/// Single producer: the collector records, the estimator installs targets
/// once, the optimizer reads, and the agent clears. Recording after targets
/// exist or past capacity is a contract violation.
#[derive(Debug, Clone)]
pub struct RolloutBuffer<A> {
    transitions: Vec<Transition<A>>,
    capacity: usize,
    targets: Option<AdvantageTargets>,
}

impl<A> RolloutBuffer<A> {
    /// Create an empty buffer holding up to `capacity` transitions
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            transitions: Vec::with_capacity(capacity),
            capacity,
            targets: None,
        }
    }

    /// Append one transition
    pub fn record(&mut self, transition: Transition<A>) -> Result<()> {
        if self.targets.is_some() {
            return Err(RLError::InvalidPhase(
                "cannot record into a rollout whose advantages were already computed".into(),
            ));
        }
        if self.transitions.len() >= self.capacity {
            error!(capacity = self.capacity, "write past rollout capacity");
            return Err(RLError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.transitions.push(transition);
        Ok(())
    }

    /// Discard all transitions and derived targets
    pub fn clear(&mut self) {
        self.transitions.clear();
        self.targets = None;
    }

    /// Whether `capacity` transitions have been recorded
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.transitions.len() >= self.capacity
    }

    /// Number of recorded transitions
    #[must_use]
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// Whether nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Configured capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Recorded transitions in time order
    #[must_use]
    pub fn transitions(&self) -> &[Transition<A>] {
        &self.transitions
    }

    /// Last recorded transition
    #[must_use]
    pub fn last(&self) -> Option<&Transition<A>> {
        self.transitions.last()
    }

    /// Computed targets, if the estimator has run
    #[must_use]
    pub fn targets(&self) -> Option<&AdvantageTargets> {
        self.targets.as_ref()
    }

    /// Install targets computed by the advantage estimator; allowed once per rollout
    pub fn install_targets(&mut self, targets: AdvantageTargets) -> Result<()> {
        if self.targets.is_some() {
            return Err(RLError::InvalidPhase(
                "advantages for this rollout were already computed".into(),
            ));
        }
        if targets.len() != self.transitions.len() {
            return Err(RLError::DimensionMismatch {
                expected: self.transitions.len(),
                actual: targets.len(),
            });
        }
        self.targets = Some(targets);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn transition(reward: f64, done: bool) -> Transition<usize> {
        Transition {
            observation: vec![0.0],
            action: 0,
            log_prob: -0.7,
            reward,
            done,
            value: 0.5,
        }
    }

    #[test]
    fn test_capacity_exceeded_after_rollout_length() {
        let mut buffer = RolloutBuffer::new(3);
        for _ in 0..3 {
            buffer.record(transition(1.0, false)).unwrap();
        }
        assert!(buffer.is_full());
        let err = buffer.record(transition(1.0, false)).unwrap_err();
        assert!(matches!(err, RLError::CapacityExceeded { capacity: 3 }));
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_clear_resets_lifecycle() {
        let mut buffer = RolloutBuffer::new(2);
        buffer.record(transition(1.0, false)).unwrap();
        buffer.record(transition(0.0, true)).unwrap();
        buffer
            .install_targets(AdvantageTargets::new(vec![0.1, 0.2], vec![0.6, 0.7]).unwrap())
            .unwrap();

        buffer.clear();
        assert!(!buffer.is_full());
        assert!(buffer.is_empty());
        assert!(buffer.targets().is_none());
        buffer.record(transition(1.0, false)).unwrap();
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_targets_are_write_once() {
        let mut buffer = RolloutBuffer::new(1);
        buffer.record(transition(1.0, true)).unwrap();
        let targets = AdvantageTargets::new(vec![0.5], vec![1.0]).unwrap();
        buffer.install_targets(targets.clone()).unwrap();
        assert!(matches!(
            buffer.install_targets(targets),
            Err(RLError::InvalidPhase(_))
        ));
    }

    #[test]
    fn test_record_after_targets_is_rejected() {
        let mut buffer = RolloutBuffer::new(4);
        buffer.record(transition(1.0, false)).unwrap();
        buffer
            .install_targets(AdvantageTargets::new(vec![0.0], vec![0.5]).unwrap())
            .unwrap();
        assert!(matches!(
            buffer.record(transition(1.0, false)),
            Err(RLError::InvalidPhase(_))
        ));
    }

    #[test]
    fn test_target_length_must_match() {
        let mut buffer = RolloutBuffer::new(4);
        buffer.record(transition(1.0, false)).unwrap();
        let targets = AdvantageTargets::new(vec![0.0, 0.0], vec![0.0, 0.0]).unwrap();
        assert!(matches!(
            buffer.install_targets(targets),
            Err(RLError::DimensionMismatch { expected: 1, actual: 2 })
        ));
    }

    #[test]
    fn test_policy_advantages_prefers_normalized() {
        let targets = AdvantageTargets::new(vec![1.0, 3.0], vec![2.0, 4.0]).unwrap();
        assert_eq!(targets.policy_advantages(), &[1.0, 3.0]);
        let targets = targets.with_normalized(vec![-1.0, 1.0]).unwrap();
        assert_eq!(targets.policy_advantages(), &[-1.0, 1.0]);
        assert_eq!(targets.advantages(), &[1.0, 3.0]);
    }

    proptest! {
        #[test]
        fn prop_buffer_never_exceeds_capacity(capacity in 1usize..32, writes in 0usize..64) {
            let mut buffer = RolloutBuffer::new(capacity);
            let mut accepted = 0;
            for _ in 0..writes {
                if buffer.record(transition(0.0, false)).is_ok() {
                    accepted += 1;
                }
            }
            prop_assert_eq!(accepted, writes.min(capacity));
            prop_assert_eq!(buffer.len(), accepted);
            prop_assert_eq!(buffer.is_full(), writes >= capacity);
        }
    }
}
