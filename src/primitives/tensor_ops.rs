//! Core Tensor Operations
//!
//! Device selection and the small tensor helpers shared by the layer stack.
//!
//! ## Device selection
//!
//! ```bash
//! export BRAIN_GIN_NO_GPU=1   # force CPU even when built with `metal` / `cuda`
//! ```

use crate::{GnnError, Result};
use candle_core::{Device, Tensor};
use rand::Rng;
use tracing::info;

// ============================================================================
// Environment-controlled Device Selection
// ============================================================================

/// Check if GPU is disabled via environment variable.
///
/// Set `BRAIN_GIN_NO_GPU=1` to force CPU-only mode.
pub fn gpu_disabled() -> bool {
    std::env::var("BRAIN_GIN_NO_GPU")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
}

/// Get the best available device for tensor operations
///
/// Priority:
/// 1. Check `BRAIN_GIN_NO_GPU` env var (forces CPU if set)
/// 2. Metal (Apple Silicon)
/// 3. CUDA (NVIDIA GPUs)
/// 4. CPU (fallback)
pub fn best_device() -> Device {
    if gpu_disabled() {
        info!("Using CPU device (BRAIN_GIN_NO_GPU set)");
        return Device::Cpu;
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            info!("Using Metal device");
            return device;
        }
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            info!("Using CUDA device");
            return device;
        }
    }

    info!("Using CPU device");
    Device::Cpu
}

/// Force CPU device, ignoring GPU availability.
pub fn cpu_device() -> Device {
    Device::Cpu
}

/// Check if Metal is available (respects BRAIN_GIN_NO_GPU)
#[cfg(feature = "metal")]
pub fn metal_available() -> bool {
    !gpu_disabled() && Device::new_metal(0).is_ok()
}

/// Check if Metal is available (always false when `metal` feature is not enabled)
#[cfg(not(feature = "metal"))]
pub fn metal_available() -> bool {
    false
}

/// Check if CUDA is available (respects BRAIN_GIN_NO_GPU)
#[cfg(feature = "cuda")]
pub fn cuda_available() -> bool {
    !gpu_disabled() && Device::new_cuda(0).is_ok()
}

/// Check if CUDA is available (always false when `cuda` feature is not enabled)
#[cfg(not(feature = "cuda"))]
pub fn cuda_available() -> bool {
    false
}

// ============================================================================
// Dropout
// ============================================================================

/// Inverted dropout driven by an explicit RNG.
///
/// In training mode each element is zeroed with probability `p` and the
/// survivors are scaled by `1 / (1 - p)`; otherwise the input is returned
/// unchanged. The mask is drawn from `rng` so passes are reproducible.
pub fn dropout<R: Rng + ?Sized>(xs: &Tensor, p: f64, train: bool, rng: &mut R) -> Result<Tensor> {
    if !train || p <= 0.0 {
        return Ok(xs.clone());
    }
    if p >= 1.0 {
        return Err(GnnError::InvalidArgument(format!("dropout probability {} >= 1", p)));
    }

    let scale = (1.0 / (1.0 - p)) as f32;
    let mask: Vec<f32> = (0..xs.elem_count())
        .map(|_| if rng.gen_bool(p) { 0.0 } else { scale })
        .collect();
    let mask = Tensor::from_vec(mask, xs.dims(), xs.device())
        .map_err(|e| GnnError::Tensor(format!("dropout mask failed: {}", e)))?;

    xs.mul(&mask)
        .map_err(|e| GnnError::Tensor(format!("dropout mul failed: {}", e)))
}

/// True when every element is finite
pub fn all_finite(xs: &Tensor) -> Result<bool> {
    let values = xs.flatten_all()?.to_vec1::<f32>()?;
    Ok(values.iter().all(|v| v.is_finite()))
}
