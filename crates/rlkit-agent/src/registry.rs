//! Named policy/value architecture factories
//!
//! A registry is an ordinary value owned by whoever builds agents; several
//! registries can coexist and nothing is shared between them.

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::SeedableRng;

use rlkit_core::{
    Action, ActorCritic, ContinuousAction, DiscreteAction, RLError, Result, StochasticPolicy,
    ValueFunction,
};

use crate::networks::{Activation, CategoricalPolicy, GaussianPolicy, MLPConfig, MlpValue};

/// Initial log standard deviation of the default Gaussian policies
pub const DEFAULT_INIT_LOG_STD: f64 = -0.5;

/// Output-layer scale of the default policies (near-uniform initial policy)
const POLICY_OUTPUT_SCALE: f64 = 0.01;

/// Dimensions and seed handed to an architecture factory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchitectureSpec {
    /// Flattened observation length
    pub observation_dim: usize,
    /// Policy outputs: number of choices or action dimensions
    pub action_dim: usize,
    /// Seed for parameter initialization
    pub seed: u64,
}

impl ArchitectureSpec {
    fn policy_rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed)
    }

    fn value_rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed.wrapping_add(0x9E37_79B9_7F4A_7C15))
    }
}

/// Factory producing a policy for a spec
pub type PolicyFactory<A> =
    Box<dyn Fn(&ArchitectureSpec) -> Result<Box<dyn StochasticPolicy<Action = A>>> + Send + Sync>;

/// Factory producing a value function for a spec
pub type ValueFactory = Box<dyn Fn(&ArchitectureSpec) -> Result<Box<dyn ValueFunction>> + Send + Sync>;

/// Maps architecture names to factories
pub struct ArchitectureRegistry<A> {
    policies: IndexMap<String, PolicyFactory<A>>,
    values: IndexMap<String, ValueFactory>,
}

impl<A: Action + 'static> ArchitectureRegistry<A> {
    /// Registry with no architectures
    #[must_use]
    pub fn empty() -> Self {
        Self {
            policies: IndexMap::new(),
            values: IndexMap::new(),
        }
    }

    /// Register (or replace) a policy architecture
    pub fn register_policy<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ArchitectureSpec) -> Result<Box<dyn StochasticPolicy<Action = A>>>
            + Send
            + Sync
            + 'static,
    {
        self.policies.insert(name.into(), Box::new(factory));
    }

    /// Register (or replace) a value architecture
    pub fn register_value<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ArchitectureSpec) -> Result<Box<dyn ValueFunction>> + Send + Sync + 'static,
    {
        self.values.insert(name.into(), Box::new(factory));
    }

    /// Instantiate a policy by name
    pub fn build_policy(
        &self,
        name: &str,
        spec: &ArchitectureSpec,
    ) -> Result<Box<dyn StochasticPolicy<Action = A>>> {
        let factory = self
            .policies
            .get(name)
            .ok_or_else(|| RLError::UnknownArchitecture(format!("policy '{name}'")))?;
        factory(spec)
    }

    /// Instantiate a value function by name
    pub fn build_value(&self, name: &str, spec: &ArchitectureSpec) -> Result<Box<dyn ValueFunction>> {
        let factory = self
            .values
            .get(name)
            .ok_or_else(|| RLError::UnknownArchitecture(format!("value '{name}'")))?;
        factory(spec)
    }

    /// Instantiate a full actor-critic from a policy and a value name
    pub fn build(
        &self,
        policy: &str,
        value: &str,
        spec: &ArchitectureSpec,
    ) -> Result<ActorCritic<A>> {
        Ok(ActorCritic::new(
            self.build_policy(policy, spec)?,
            self.build_value(value, spec)?,
        ))
    }

    /// Registered policy names, in registration order
    pub fn policy_names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    /// Registered value names, in registration order
    pub fn value_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl<A: DefaultArchitectures> Default for ArchitectureRegistry<A> {
    fn default() -> Self {
        let mut registry = Self::empty();
        A::register_defaults(&mut registry);
        registry
    }
}

impl<A> std::fmt::Debug for ArchitectureRegistry<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchitectureRegistry")
            .field("policies", &self.policies.keys().collect::<Vec<_>>())
            .field("values", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Action types with built-in `"linear"` and `"mlp"` architectures
pub trait DefaultArchitectures: Action + Sized + 'static {
    /// Register this action type's default policies and the shared value heads
    fn register_defaults(registry: &mut ArchitectureRegistry<Self>);
}

fn layer_config(spec: &ArchitectureSpec, hidden_dims: &[usize], output_dim: usize) -> MLPConfig {
    MLPConfig {
        input_dim: spec.observation_dim,
        hidden_dims: hidden_dims.to_vec(),
        output_dim,
        activation: Activation::Tanh,
        output_scale: 1.0,
    }
}

const DEFAULT_LAYOUTS: [(&str, &[usize]); 2] = [("linear", &[]), ("mlp", &[64, 64])];

fn register_values<A: Action + 'static>(registry: &mut ArchitectureRegistry<A>) {
    for (name, hidden) in DEFAULT_LAYOUTS {
        registry.register_value(name, move |spec: &ArchitectureSpec| {
            let value = MlpValue::new(layer_config(spec, hidden, 1), &mut spec.value_rng());
            Ok(Box::new(value) as Box<dyn ValueFunction>)
        });
    }
}

impl DefaultArchitectures for DiscreteAction {
    fn register_defaults(registry: &mut ArchitectureRegistry<Self>) {
        for (name, hidden) in DEFAULT_LAYOUTS {
            registry.register_policy(name, move |spec: &ArchitectureSpec| {
                let config = MLPConfig {
                    output_scale: POLICY_OUTPUT_SCALE,
                    ..layer_config(spec, hidden, spec.action_dim)
                };
                let policy = CategoricalPolicy::new(config, &mut spec.policy_rng());
                Ok(Box::new(policy) as Box<dyn StochasticPolicy<Action = DiscreteAction>>)
            });
        }
        register_values(registry);
    }
}

impl DefaultArchitectures for ContinuousAction {
    fn register_defaults(registry: &mut ArchitectureRegistry<Self>) {
        for (name, hidden) in DEFAULT_LAYOUTS {
            registry.register_policy(name, move |spec: &ArchitectureSpec| {
                let config = MLPConfig {
                    output_scale: POLICY_OUTPUT_SCALE,
                    ..layer_config(spec, hidden, spec.action_dim)
                };
                let policy =
                    GaussianPolicy::new(config, DEFAULT_INIT_LOG_STD, &mut spec.policy_rng());
                Ok(Box::new(policy) as Box<dyn StochasticPolicy<Action = ContinuousAction>>)
            });
        }
        register_values(registry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ArchitectureSpec {
        ArchitectureSpec {
            observation_dim: 4,
            action_dim: 2,
            seed: 11,
        }
    }

    #[test]
    fn test_defaults_are_registered() {
        let registry = ArchitectureRegistry::<DiscreteAction>::default();
        assert_eq!(registry.policy_names().collect::<Vec<_>>(), ["linear", "mlp"]);
        assert_eq!(registry.value_names().collect::<Vec<_>>(), ["linear", "mlp"]);

        let ac = registry.build("mlp", "linear", &spec()).unwrap();
        assert_eq!(ac.policy_parameters().len(), 4 * 64 + 64 + 64 * 64 + 64 + 64 * 2 + 2);
        assert_eq!(ac.value_parameters().len(), 4 + 1);
        assert_eq!(
            format!("{ac:?}"),
            format!(
                "ActorCritic {{ policy_parameters: {}, value_parameters: 5 }}",
                ac.policy_parameters().len()
            )
        );
    }

    #[test]
    fn test_unknown_name_is_reported() {
        let registry = ArchitectureRegistry::<ContinuousAction>::default();
        let err = registry.build("transformer", "mlp", &spec()).unwrap_err();
        assert!(matches!(err, RLError::UnknownArchitecture(ref name) if name.contains("transformer")));
    }

    #[test]
    fn test_same_seed_same_parameters() {
        let registry = ArchitectureRegistry::<DiscreteAction>::default();
        let a = registry.build("mlp", "mlp", &spec()).unwrap();
        let b = registry.build("mlp", "mlp", &spec()).unwrap();
        assert_eq!(a.policy_parameters(), b.policy_parameters());
        assert_eq!(a.value_parameters(), b.value_parameters());
    }

    #[test]
    fn test_custom_registration_is_instance_local() {
        let mut custom = ArchitectureRegistry::<DiscreteAction>::empty();
        custom.register_value("zero", |spec: &ArchitectureSpec| {
            let config = MLPConfig {
                input_dim: spec.observation_dim,
                hidden_dims: vec![],
                output_dim: 1,
                activation: Activation::Identity,
                output_scale: 0.0,
            };
            Ok(Box::new(MlpValue::new(config, &mut spec.value_rng())) as Box<dyn ValueFunction>)
        });
        assert!(custom.build_value("zero", &spec()).is_ok());
        assert!(ArchitectureRegistry::<DiscreteAction>::default()
            .build_value("zero", &spec())
            .is_err());
    }
}
