//! Learned Transforms
//!
//! Parameterised sub-modules applied after neighbor aggregation, plus the
//! discriminator head. All parameters are created through a
//! [`candle_nn::VarBuilder`] so they live in the owning model's `VarMap`.
//!
//! - [`Mlp`]: GIN / GCN node transform
//! - [`ChebConv`]: Chebyshev spectral convolution
//! - [`Discriminator`]: bilinear InfoMax scorer

mod cheb;
mod discriminator;
mod mlp;

pub use cheb::ChebConv;
pub use discriminator::Discriminator;
pub use mlp::Mlp;
