//! Training Infrastructure
//!
//! Losses, optimization and monitoring for the InfoMax-regularized classifier.
//!
//! ## Overview
//!
//! - **Losses**: cross-entropy on class logits, binary cross-entropy on
//!   discriminator logits (true pairs → 1, shuffled pairs → 0)
//! - **Optimizers**: Wrapped candle-nn optimizers (AdamW, SGD)
//! - **Safe steps**: gradient clipping and NaN detection
//! - **Metrics**: Loss tracking and convergence monitoring
//!
//! ## Example
//!
//! ```ignore
//! use brain_gin::prelude::*;
//!
//! let config = TrainingConfig::default();
//! let mut optimizer = Optimizer::from_config(model.trainable_vars()?, &config)?;
//!
//! for batch in batches {
//!     let result = train_step(&mut model, &mut optimizer, batch, &config, &mut rng)?;
//!     tracker.record(&result);
//! }
//! ```

use crate::graph::{BatchBuilder, Graph};
use crate::model::InfoMaxGnn;
use crate::{GnnError, Result};
use candle_core::backprop::GradStore;
use candle_core::{DType, Tensor, Var};
use candle_nn::optim::Optimizer as CandleOptimizer;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// =============================================================================
// Losses
// =============================================================================

/// Mean cross-entropy of `logits [B, C]` against class indices
pub fn cross_entropy_loss(logits: &Tensor, labels: &[u32]) -> Result<Tensor> {
    let (batch, _) = logits
        .dims2()
        .map_err(|e| GnnError::Tensor(format!("logits must be [B, C]: {}", e)))?;
    if labels.len() != batch {
        return Err(GnnError::InvalidArgument(format!(
            "{} labels for a batch of {}",
            labels.len(),
            batch
        )));
    }
    let targets = Tensor::from_slice(labels, batch, logits.device())?;
    candle_nn::loss::cross_entropy(logits, &targets)
        .map_err(|e| GnnError::Tensor(format!("cross entropy failed: {}", e)))
}

/// Binary cross-entropy with logits over discriminator scores `[N, 2]`.
///
/// Column 0 (true pairs) targets 1, column 1 (shuffled pairs) targets 0.
/// Uses `max(x, 0) - x·t + ln(1 + e^{-|x|})` for stability.
pub fn infomax_loss(scores: &Tensor) -> Result<Tensor> {
    let (n, cols) = scores
        .dims2()
        .map_err(|e| GnnError::Tensor(format!("scores must be [N, 2]: {}", e)))?;
    if cols != 2 {
        return Err(GnnError::InvalidArgument(format!(
            "discriminator scores have {} columns, expected 2",
            cols
        )));
    }

    let device = scores.device();
    let targets = Tensor::cat(
        &[
            Tensor::ones((n, 1), DType::F32, device)?,
            Tensor::zeros((n, 1), DType::F32, device)?,
        ],
        1,
    )?;

    let positive = scores.relu()?;
    let agreement = (scores * &targets)?;
    let softplus = (scores.abs()?.neg()?.exp()? + 1.0)?.log()?;
    ((positive - agreement)? + softplus)?
        .mean_all()
        .map_err(|e| GnnError::Tensor(format!("infomax loss failed: {}", e)))
}

// =============================================================================
// Optimizers
// =============================================================================

/// Wrapper around candle-nn's AdamW optimizer
pub struct AdamOptimizer {
    inner: candle_nn::optim::AdamW,
    steps: usize,
}

impl AdamOptimizer {
    /// Create a new AdamW optimizer
    pub fn new(vars: Vec<Var>, learning_rate: f64, weight_decay: f64) -> Result<Self> {
        let params = candle_nn::optim::ParamsAdamW {
            lr: learning_rate,
            weight_decay,
            ..Default::default()
        };
        let inner = <candle_nn::optim::AdamW as CandleOptimizer>::new(vars, params)
            .map_err(|e| GnnError::Tensor(format!("AdamW init failed: {}", e)))?;
        Ok(Self { inner, steps: 0 })
    }
}

/// Wrapper around candle-nn's SGD optimizer
pub struct SGDOptimizer {
    inner: candle_nn::optim::SGD,
    steps: usize,
}

impl SGDOptimizer {
    /// Create a new SGD optimizer
    pub fn new(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        let inner = <candle_nn::optim::SGD as CandleOptimizer>::new(vars, learning_rate)
            .map_err(|e| GnnError::Tensor(format!("SGD init failed: {}", e)))?;
        Ok(Self { inner, steps: 0 })
    }
}

/// Optimizer enum for flexibility
pub enum Optimizer {
    /// Stochastic Gradient Descent optimizer
    SGD(SGDOptimizer),
    /// Adam optimizer with weight decay (AdamW)
    Adam(AdamOptimizer),
}

impl Optimizer {
    /// Create SGD optimizer
    pub fn sgd(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        Ok(Self::SGD(SGDOptimizer::new(vars, learning_rate)?))
    }

    /// Create AdamW optimizer
    pub fn adam(vars: Vec<Var>, learning_rate: f64, weight_decay: f64) -> Result<Self> {
        Ok(Self::Adam(AdamOptimizer::new(vars, learning_rate, weight_decay)?))
    }

    /// Build the optimizer selected by `config`
    pub fn from_config(vars: Vec<Var>, config: &TrainingConfig) -> Result<Self> {
        if config.use_adam {
            Self::adam(vars, config.learning_rate, config.weight_decay)
        } else {
            Self::sgd(vars, config.learning_rate)
        }
    }

    /// Take a plain gradient step
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        let result = match self {
            Self::SGD(opt) => CandleOptimizer::step(&mut opt.inner, grads),
            Self::Adam(opt) => CandleOptimizer::step(&mut opt.inner, grads),
        };
        result.map_err(|e| GnnError::Tensor(format!("optimizer step failed: {}", e)))?;
        self.count_step();
        Ok(())
    }

    /// Clipped step via [`safe_optimizer_step`].
    ///
    /// Returns `false` when the step was skipped for non-finite gradients.
    pub fn safe_step(&mut self, grads: &mut GradStore, vars: &[Var], max_grad_norm: f32) -> Result<bool> {
        let applied = match self {
            Self::SGD(opt) => safe_optimizer_step(&mut opt.inner, grads, vars, max_grad_norm)?,
            Self::Adam(opt) => safe_optimizer_step(&mut opt.inner, grads, vars, max_grad_norm)?,
        };
        if applied {
            self.count_step();
        }
        Ok(applied)
    }

    /// Get the learning rate
    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::SGD(opt) => CandleOptimizer::learning_rate(&opt.inner),
            Self::Adam(opt) => CandleOptimizer::learning_rate(&opt.inner),
        }
    }

    /// Set the learning rate
    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::SGD(opt) => CandleOptimizer::set_learning_rate(&mut opt.inner, lr),
            Self::Adam(opt) => CandleOptimizer::set_learning_rate(&mut opt.inner, lr),
        }
    }

    /// Number of applied steps
    pub fn steps(&self) -> usize {
        match self {
            Self::SGD(opt) => opt.steps,
            Self::Adam(opt) => opt.steps,
        }
    }

    fn count_step(&mut self) {
        match self {
            Self::SGD(opt) => opt.steps += 1,
            Self::Adam(opt) => opt.steps += 1,
        }
    }
}

// =============================================================================
// Configuration and results
// =============================================================================

/// Configuration for learning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Learning rate
    pub learning_rate: f64,

    /// Weight decay for regularization (AdamW only)
    pub weight_decay: f64,

    /// Weight of the InfoMax loss added to the classification loss
    pub infomax_weight: f64,

    /// Global gradient-norm clipping threshold, applied before the optimizer update
    pub grad_clip: f32,

    /// Use AdamW (true) or SGD (false)
    pub use_adam: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            weight_decay: 0.0,
            infomax_weight: 1.0,
            grad_clip: 5.0,
            use_adam: true,
        }
    }
}

/// Result of a training step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResult {
    /// Total loss value
    pub loss: f32,

    /// Cross-entropy part
    pub classification_loss: f32,

    /// InfoMax part, if the model has a discriminator
    pub infomax_loss: Option<f32>,

    /// Number of graphs processed
    pub samples: usize,

    /// Gradient norm before clipping
    pub grad_norm: f32,

    /// Whether the update was skipped (non-finite gradients)
    pub skipped: bool,

    /// Training step number
    pub step: usize,
}

/// One optimization step on a labeled batch.
///
/// Puts the model in training mode, runs the forward pass, and minimizes
/// `cross_entropy + infomax_weight · infomax`. Non-finite gradients skip the
/// update and are reported through [`TrainingResult::skipped`].
pub fn train_step<R: Rng + ?Sized>(
    model: &mut InfoMaxGnn,
    optimizer: &mut Optimizer,
    graphs: &[Graph],
    config: &TrainingConfig,
    rng: &mut R,
) -> Result<TrainingResult> {
    let labels = BatchBuilder::new(graphs)?.labels()?;
    model.set_training(true);

    let out = model.forward(graphs, rng)?;
    let classification = cross_entropy_loss(&out.class_logits, &labels)?;
    let (total, infomax) = match &out.discriminator_scores {
        Some(scores) => {
            let im = infomax_loss(scores)?;
            let total = (&classification + (&im * config.infomax_weight)?)?;
            (total, Some(im.to_scalar::<f32>()?))
        }
        None => (classification.clone(), None),
    };

    let loss = total.to_scalar::<f32>()?;
    if !loss.is_finite() {
        return Err(GnnError::Training(format!("non-finite loss {}", loss)));
    }

    let mut grads = total.backward()?;
    let vars = model.trainable_vars()?;
    let grad_norm = compute_grad_norm(&grads, &vars)?;

    let skipped = !optimizer.safe_step(&mut grads, &vars, config.grad_clip)?;
    if skipped {
        warn!(step = optimizer.steps(), grad_norm, "non-finite gradients, skipping optimizer step");
    }

    let result = TrainingResult {
        loss,
        classification_loss: classification.to_scalar::<f32>()?,
        infomax_loss: infomax,
        samples: graphs.len(),
        grad_norm,
        skipped,
        step: optimizer.steps(),
    };
    debug!(
        step = result.step,
        loss = result.loss,
        grad_norm = result.grad_norm,
        "training step"
    );
    Ok(result)
}

/// Classification accuracy on a labeled batch, in evaluation mode
pub fn evaluate<R: Rng + ?Sized>(model: &mut InfoMaxGnn, graphs: &[Graph], rng: &mut R) -> Result<f32> {
    let labels = BatchBuilder::new(graphs)?.labels()?;
    model.set_training(false);

    let out = model.forward(graphs, rng)?;
    let predicted: Vec<u32> = out.class_logits.argmax(1)?.to_vec1()?;
    let correct = predicted.iter().zip(&labels).filter(|(p, l)| p == l).count();
    Ok(correct as f32 / labels.len() as f32)
}

/// Training metrics tracker
#[derive(Debug, Default)]
pub struct MetricsTracker {
    /// Loss history
    losses: Vec<f32>,

    /// Best loss seen
    best_loss: Option<f32>,

    /// Steps since improvement
    steps_since_improvement: usize,
}

impl MetricsTracker {
    /// Create a new metrics tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a training result
    pub fn record(&mut self, result: &TrainingResult) {
        self.losses.push(result.loss);

        match self.best_loss {
            Some(best) if result.loss >= best => self.steps_since_improvement += 1,
            _ => {
                self.best_loss = Some(result.loss);
                self.steps_since_improvement = 0;
            }
        }
    }

    /// Get average loss over last N steps
    pub fn average_loss(&self, n: usize) -> Option<f32> {
        if self.losses.is_empty() {
            return None;
        }
        let start = self.losses.len().saturating_sub(n);
        let slice = &self.losses[start..];
        Some(slice.iter().sum::<f32>() / slice.len() as f32)
    }

    /// Check if training has converged (no improvement for N steps)
    pub fn has_converged(&self, patience: usize) -> bool {
        self.steps_since_improvement >= patience
    }

    /// Get best loss
    pub fn best_loss(&self) -> Option<f32> {
        self.best_loss
    }

    /// Get total training steps
    pub fn total_steps(&self) -> usize {
        self.losses.len()
    }
}

// =============================================================================
// Gradient Utilities
// =============================================================================

/// Safe optimizer step with gradient clipping
///
/// Returns `Ok(false)` without touching any parameter when gradients contain
/// NaN/Inf. When the gradient norm exceeds `max_grad_norm`, the gradients in
/// `grads` are rescaled to that norm before the optimizer runs, so AdamW
/// moments and weight decay apply to clipped steps as well. Optimizer
/// failures propagate as errors.
pub fn safe_optimizer_step<O: CandleOptimizer>(
    optimizer: &mut O,
    grads: &mut GradStore,
    vars: &[Var],
    max_grad_norm: f32,
) -> Result<bool> {
    if !check_gradients_health(grads, vars) {
        return Ok(false);
    }

    let total_norm = compute_grad_norm(grads, vars)?;
    if total_norm > max_grad_norm && total_norm > 0.0 {
        let scale = (max_grad_norm / total_norm) as f64;
        for var in vars {
            if let Some(grad) = grads.remove(var.as_tensor()) {
                let clipped = grad
                    .affine(scale, 0.0)
                    .map_err(|e| GnnError::Tensor(format!("gradient scale failed: {}", e)))?;
                grads.insert(var.as_tensor(), clipped);
            }
        }
    }

    optimizer
        .step(grads)
        .map_err(|e| GnnError::Tensor(format!("optimizer step failed: {}", e)))?;
    Ok(true)
}

/// Compute the total L2 norm of all gradients
pub fn compute_grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f32> {
    let mut total_sq_norm = 0.0f32;

    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            let sq_norm = grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
            total_sq_norm += sq_norm;
        }
    }

    Ok(total_sq_norm.sqrt())
}

/// Returns true if gradients are healthy (no NaN/Inf).
pub fn check_gradients_health(grads: &GradStore, vars: &[Var]) -> bool {
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            if let Ok(vals) = grad.flatten_all().and_then(|t| t.to_vec1::<f32>()) {
                if vals.iter().any(|v| !v.is_finite()) {
                    return false;
                }
            }
        }
    }
    true
}
