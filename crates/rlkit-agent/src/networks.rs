//! Reference policy and value networks
//!
//! Pure ndarray multilayer perceptrons with hand-written backpropagation.
//! Every network keeps its trainable scalars in one flat `Array1<f64>` so the
//! optimizer can treat a whole network as a single parameter group.

use ndarray::{s, Array1, ArrayView1, ArrayView2, ArrayViewMut1};
use rand::{Rng, RngCore};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use rlkit_core::{
    ContinuousAction, DiscreteAction, RLError, Result, StochasticPolicy, ValueFunction,
};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Hidden-layer nonlinearity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Hyperbolic tangent
    Tanh,
    /// Rectified linear unit
    Relu,
    /// No nonlinearity
    Identity,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Self::Tanh => x.tanh(),
            Self::Relu => x.max(0.0),
            Self::Identity => x,
        }
    }

    /// Derivative expressed in terms of the activation's output
    fn derivative_from_output(self, y: f64) -> f64 {
        match self {
            Self::Tanh => 1.0 - y * y,
            Self::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Identity => 1.0,
        }
    }
}

/// MLP (Multi-Layer Perceptron) configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MLPConfig {
    /// Input dimension
    pub input_dim: usize,
    /// Hidden layer sizes; empty for a linear model
    pub hidden_dims: Vec<usize>,
    /// Output dimension
    pub output_dim: usize,
    /// Activation function for hidden layers
    pub activation: Activation,
    /// Multiplier on the Xavier range of the output layer
    pub output_scale: f64,
}

impl Default for MLPConfig {
    fn default() -> Self {
        Self {
            input_dim: 4,
            hidden_dims: vec![64, 64],
            output_dim: 2,
            activation: Activation::Tanh,
            output_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LayerShape {
    in_dim: usize,
    out_dim: usize,
    offset: usize,
}

impl LayerShape {
    fn weight_range(self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.in_dim * self.out_dim
    }

    fn bias_range(self) -> std::ops::Range<usize> {
        let start = self.offset + self.in_dim * self.out_dim;
        start..start + self.out_dim
    }
}

/// Layout of a multilayer perceptron over an external flat parameter vector
///
/// Each layer stores a row-major `in_dim x out_dim` weight block followed by
/// its bias.
#[derive(Debug, Clone)]
pub struct Mlp {
    config: MLPConfig,
    layers: Vec<LayerShape>,
    num_parameters: usize,
}

impl Mlp {
    /// Create the layout for a configuration
    #[must_use]
    pub fn new(config: MLPConfig) -> Self {
        let mut layers = Vec::with_capacity(config.hidden_dims.len() + 1);
        let mut offset = 0;
        let mut prev_dim = config.input_dim;
        for &dim in config.hidden_dims.iter().chain(std::iter::once(&config.output_dim)) {
            layers.push(LayerShape {
                in_dim: prev_dim,
                out_dim: dim,
                offset,
            });
            offset += prev_dim * dim + dim;
            prev_dim = dim;
        }
        Self {
            config,
            layers,
            num_parameters: offset,
        }
    }

    /// Configuration this layout was built from
    #[must_use]
    pub fn config(&self) -> &MLPConfig {
        &self.config
    }

    /// Number of scalars in the flat parameter vector
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.num_parameters
    }

    /// Xavier-initialized parameters; biases start at zero
    pub fn init_parameters(&self, rng: &mut dyn RngCore) -> Array1<f64> {
        let mut params = Array1::zeros(self.num_parameters);
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            let mut limit = (6.0 / (layer.in_dim + layer.out_dim) as f64).sqrt();
            if i == last {
                limit *= self.config.output_scale;
            }
            for w in params.slice_mut(s![layer.weight_range()]).iter_mut() {
                *w = if limit > 0.0 {
                    rng.gen_range(-limit..limit)
                } else {
                    0.0
                };
            }
        }
        params
    }

    fn weights<'a>(&self, params: ArrayView1<'a, f64>, layer: LayerShape) -> Result<ArrayView2<'a, f64>> {
        Ok(params
            .slice_move(s![layer.weight_range()])
            .into_shape((layer.in_dim, layer.out_dim))?)
    }

    fn check(&self, params: &ArrayView1<f64>, input: &[f64]) -> Result<()> {
        if params.len() != self.num_parameters {
            return Err(RLError::DimensionMismatch {
                expected: self.num_parameters,
                actual: params.len(),
            });
        }
        if input.len() != self.config.input_dim {
            return Err(RLError::DimensionMismatch {
                expected: self.config.input_dim,
                actual: input.len(),
            });
        }
        Ok(())
    }

    /// Activations of every layer: index 0 is the input, the last entry the output
    fn trace(&self, params: ArrayView1<f64>, input: &[f64]) -> Result<Vec<Array1<f64>>> {
        self.check(&params, input)?;
        let last = self.layers.len() - 1;
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(Array1::from_vec(input.to_vec()));
        for (i, &layer) in self.layers.iter().enumerate() {
            let weights = self.weights(params, layer)?;
            let bias = params.slice(s![layer.bias_range()]);
            let mut z = activations[i].dot(&weights) + &bias;
            if i != last {
                let activation = self.config.activation;
                z.mapv_inplace(|v| activation.apply(v));
            }
            activations.push(z);
        }
        Ok(activations)
    }

    /// Forward pass
    pub fn forward(&self, params: ArrayView1<f64>, input: &[f64]) -> Result<Array1<f64>> {
        let mut activations = self.trace(params, input)?;
        activations
            .pop()
            .ok_or_else(|| RLError::Computation("network has no layers".into()))
    }

    /// Accumulate the gradient of `d_output · f(input)` w.r.t. the parameters into `grad`
    pub fn backward(
        &self,
        params: ArrayView1<f64>,
        input: &[f64],
        d_output: &Array1<f64>,
        mut grad: ArrayViewMut1<f64>,
    ) -> Result<()> {
        if grad.len() != self.num_parameters {
            return Err(RLError::DimensionMismatch {
                expected: self.num_parameters,
                actual: grad.len(),
            });
        }
        if d_output.len() != self.config.output_dim {
            return Err(RLError::DimensionMismatch {
                expected: self.config.output_dim,
                actual: d_output.len(),
            });
        }
        let activations = self.trace(params.view(), input)?;
        let mut delta = d_output.clone();

        for (i, &layer) in self.layers.iter().enumerate().rev() {
            let a_prev = &activations[i];
            {
                let mut grad_w = grad
                    .slice_mut(s![layer.weight_range()])
                    .into_shape((layer.in_dim, layer.out_dim))?;
                for (j, &a) in a_prev.iter().enumerate() {
                    grad_w.row_mut(j).scaled_add(a, &delta);
                }
            }
            {
                let mut grad_b = grad.slice_mut(s![layer.bias_range()]);
                grad_b += &delta;
            }
            if i > 0 {
                let weights = self.weights(params, layer)?;
                let activation = self.config.activation;
                delta = weights.dot(&delta);
                delta.zip_mut_with(a_prev, |d, &y| *d *= activation.derivative_from_output(y));
            }
        }
        Ok(())
    }
}

fn log_softmax(logits: &Array1<f64>) -> Array1<f64> {
    let max_logit = logits.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let log_sum_exp = logits.iter().map(|&l| (l - max_logit).exp()).sum::<f64>().ln() + max_logit;
    logits.mapv(|l| l - log_sum_exp)
}

/// Softmax policy over a discrete action set
#[derive(Debug, Clone)]
pub struct CategoricalPolicy {
    net: Mlp,
    params: Array1<f64>,
}

impl CategoricalPolicy {
    /// Create a policy from a logits network
    pub fn new(config: MLPConfig, rng: &mut dyn RngCore) -> Self {
        let net = Mlp::new(config);
        let params = net.init_parameters(rng);
        Self { net, params }
    }

    fn num_actions(&self) -> usize {
        self.net.config().output_dim
    }

    /// Log probabilities of every action
    pub fn log_probs(&self, observation: &[f64]) -> Result<Array1<f64>> {
        let logits = self.net.forward(self.params.view(), observation)?;
        Ok(log_softmax(&logits))
    }

    fn check_action(&self, action: DiscreteAction) -> Result<()> {
        if action.0 >= self.num_actions() {
            return Err(RLError::InvalidAction(format!(
                "action {} outside {} choices",
                action.0,
                self.num_actions()
            )));
        }
        Ok(())
    }
}

impl StochasticPolicy for CategoricalPolicy {
    type Action = DiscreteAction;

    fn sample(&self, observation: &[f64], rng: &mut dyn RngCore) -> Result<(DiscreteAction, f64)> {
        let log_probs = self.log_probs(observation)?;
        let u: f64 = rng.gen();
        let mut cumsum = 0.0;
        let mut action_idx = log_probs.len() - 1;
        for (i, &lp) in log_probs.iter().enumerate() {
            cumsum += lp.exp();
            if u < cumsum {
                action_idx = i;
                break;
            }
        }
        Ok((DiscreteAction(action_idx), log_probs[action_idx]))
    }

    fn mode(&self, observation: &[f64]) -> Result<DiscreteAction> {
        let log_probs = self.log_probs(observation)?;
        let best = log_probs
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, &lp)| if lp > best.1 { (i, lp) } else { best });
        Ok(DiscreteAction(best.0))
    }

    fn log_prob(&self, observation: &[f64], action: &DiscreteAction) -> Result<f64> {
        self.check_action(*action)?;
        Ok(self.log_probs(observation)?[action.0])
    }

    fn entropy(&self, observation: &[f64]) -> Result<f64> {
        let log_probs = self.log_probs(observation)?;
        Ok(-log_probs.iter().map(|&lp| lp.exp() * lp).sum::<f64>())
    }

    fn backward(
        &self,
        observation: &[f64],
        action: &DiscreteAction,
        d_log_prob: f64,
        d_entropy: f64,
        grad: &mut Array1<f64>,
    ) -> Result<()> {
        self.check_action(*action)?;
        let log_probs = self.log_probs(observation)?;
        let probs = log_probs.mapv(f64::exp);
        let entropy = -probs.iter().zip(&log_probs).map(|(p, lp)| p * lp).sum::<f64>();

        // d log π(a) / dz = onehot(a) - p ; dH / dz = -p (log p + H)
        let mut d_logits = Array1::zeros(probs.len());
        for (j, d) in d_logits.iter_mut().enumerate() {
            let indicator = if j == action.0 { 1.0 } else { 0.0 };
            *d = d_log_prob * (indicator - probs[j]) - d_entropy * probs[j] * (log_probs[j] + entropy);
        }
        self.net
            .backward(self.params.view(), observation, &d_logits, grad.view_mut())
    }

    fn parameters(&self) -> &Array1<f64> {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut Array1<f64> {
        &mut self.params
    }
}

/// Diagonal Gaussian policy with state-independent log standard deviations
///
/// The flat parameter vector holds the mean network followed by one log-std
/// per action dimension.
#[derive(Debug, Clone)]
pub struct GaussianPolicy {
    net: Mlp,
    params: Array1<f64>,
}

impl GaussianPolicy {
    /// Create a policy from a mean network and an initial log-std
    pub fn new(config: MLPConfig, init_log_std: f64, rng: &mut dyn RngCore) -> Self {
        let net = Mlp::new(config);
        let action_dim = net.config().output_dim;
        let mut params = Array1::zeros(net.num_parameters() + action_dim);
        params
            .slice_mut(s![..net.num_parameters()])
            .assign(&net.init_parameters(rng));
        params.slice_mut(s![net.num_parameters()..]).fill(init_log_std);
        Self { net, params }
    }

    fn split(&self) -> (ArrayView1<f64>, ArrayView1<f64>) {
        let n = self.net.num_parameters();
        (self.params.slice(s![..n]), self.params.slice(s![n..]))
    }

    fn mean(&self, observation: &[f64]) -> Result<Array1<f64>> {
        let (net_params, _) = self.split();
        self.net.forward(net_params, observation)
    }

    fn check_action(&self, action: &ContinuousAction) -> Result<()> {
        let expected = self.net.config().output_dim;
        if action.0.len() != expected {
            return Err(RLError::DimensionMismatch {
                expected,
                actual: action.0.len(),
            });
        }
        Ok(())
    }
}

fn gaussian_log_prob(mean: &Array1<f64>, log_std: &ArrayView1<f64>, action: &[f64]) -> f64 {
    mean.iter()
        .zip(log_std.iter())
        .zip(action)
        .map(|((&mu, &ls), &a)| {
            let z = (a - mu) / ls.exp();
            -0.5 * z * z - ls - 0.5 * LN_2PI
        })
        .sum()
}

impl StochasticPolicy for GaussianPolicy {
    type Action = ContinuousAction;

    fn sample(&self, observation: &[f64], rng: &mut dyn RngCore) -> Result<(ContinuousAction, f64)> {
        let mean = self.mean(observation)?;
        let (_, log_std) = self.split();
        let mut action = Vec::with_capacity(mean.len());
        for (&mu, &ls) in mean.iter().zip(log_std.iter()) {
            let dist = Normal::new(mu, ls.exp())
                .map_err(|e| RLError::Computation(format!("invalid Gaussian ({mu}, {ls}): {e}")))?;
            action.push(dist.sample(rng));
        }
        let log_prob = gaussian_log_prob(&mean, &log_std, &action);
        Ok((ContinuousAction(action), log_prob))
    }

    fn mode(&self, observation: &[f64]) -> Result<ContinuousAction> {
        Ok(ContinuousAction(self.mean(observation)?.to_vec()))
    }

    fn log_prob(&self, observation: &[f64], action: &ContinuousAction) -> Result<f64> {
        self.check_action(action)?;
        let mean = self.mean(observation)?;
        let (_, log_std) = self.split();
        Ok(gaussian_log_prob(&mean, &log_std, &action.0))
    }

    fn entropy(&self, _observation: &[f64]) -> Result<f64> {
        let (_, log_std) = self.split();
        Ok(log_std.iter().map(|ls| ls + 0.5 * (1.0 + LN_2PI)).sum())
    }

    fn backward(
        &self,
        observation: &[f64],
        action: &ContinuousAction,
        d_log_prob: f64,
        d_entropy: f64,
        grad: &mut Array1<f64>,
    ) -> Result<()> {
        self.check_action(action)?;
        let n = self.net.num_parameters();
        let (net_params, log_std) = self.split();
        let mean = self.net.forward(net_params.view(), observation)?;

        let mut d_mean = Array1::zeros(mean.len());
        for k in 0..mean.len() {
            let var = (2.0 * log_std[k]).exp();
            let diff = action.0[k] - mean[k];
            d_mean[k] = d_log_prob * diff / var;
            grad[n + k] += d_log_prob * (diff * diff / var - 1.0) + d_entropy;
        }
        self.net
            .backward(net_params, observation, &d_mean, grad.slice_mut(s![..n]))
    }

    fn parameters(&self) -> &Array1<f64> {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut Array1<f64> {
        &mut self.params
    }
}

/// Scalar state-value network
#[derive(Debug, Clone)]
pub struct MlpValue {
    net: Mlp,
    params: Array1<f64>,
}

impl MlpValue {
    /// Create a value network; `config.output_dim` is forced to 1
    pub fn new(mut config: MLPConfig, rng: &mut dyn RngCore) -> Self {
        config.output_dim = 1;
        let net = Mlp::new(config);
        let params = net.init_parameters(rng);
        Self { net, params }
    }
}

impl ValueFunction for MlpValue {
    fn value(&self, observation: &[f64]) -> Result<f64> {
        Ok(self.net.forward(self.params.view(), observation)?[0])
    }

    fn backward(&self, observation: &[f64], d_value: f64, grad: &mut Array1<f64>) -> Result<()> {
        let d_output = Array1::from_elem(1, d_value);
        self.net
            .backward(self.params.view(), observation, &d_output, grad.view_mut())
    }

    fn parameters(&self) -> &Array1<f64> {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut Array1<f64> {
        &mut self.params
    }
}
