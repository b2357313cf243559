//! Node saliency for a single subject graph
//!
//! Demonstrates: train briefly → compute_saliency → rank ROIs
//!
//! Run with:
//! ```bash
//! RUST_LOG=brain_gin=debug cargo run --example saliency_map
//! ```

use brain_gin::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

const NUM_ROIS: usize = 8;
const FEATURES: usize = 4;

fn ring_graph(label: u32, rng: &mut StdRng) -> Result<Graph> {
    let mut edges: Vec<(usize, usize)> = (0..NUM_ROIS).map(|i| (i, (i + 1) % NUM_ROIS)).collect();
    if label == 1 {
        // class 1 adds a hub at ROI 0
        edges.extend((2..NUM_ROIS - 1).map(|j| (0, j)));
    }
    let rows: Vec<Vec<f32>> = (0..NUM_ROIS)
        .map(|_| (0..FEATURES).map(|_| rng.gen_range(0.0..1.0)).collect())
        .collect();
    Ok(Graph::from_rows(&rows, &edges)?.with_label(label))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let device = best_device();
    let mut rng = StdRng::seed_from_u64(9);

    let graphs = (0..16)
        .map(|i| ring_graph((i % 2) as u32, &mut rng))
        .collect::<Result<Vec<_>>>()?;

    let config = ModelConfig::gin(FEATURES, 16, 2).with_layers(3);
    let mut model = InfoMaxGnn::new(config, &device)?;

    let train_config = TrainingConfig::default();
    let mut optimizer = Optimizer::from_config(model.trainable_vars()?, &train_config)?;
    for _ in 0..25 {
        train_step(&mut model, &mut optimizer, &graphs, &train_config, &mut rng)?;
    }
    println!("Training accuracy: {:.3}", evaluate(&mut model, &graphs, &mut rng)?);

    // Attribute class 1 on a hub subject
    let subject = &graphs[1..2];
    let map = model.compute_saliency(subject, 1)?;

    let saliency = map.input_saliency.abs()?.sum(1)?.to_vec1::<f32>()?;
    let gca = match &map.grad_class_activation {
        Some(t) => t.to_vec1::<f32>()?,
        None => vec![0.0; NUM_ROIS],
    };

    let mut ranked: Vec<usize> = (0..NUM_ROIS).collect();
    ranked.sort_by(|&a, &b| saliency[b].total_cmp(&saliency[a]));

    println!("\n--- ROI ranking (class 1) ---");
    for roi in ranked {
        println!("  ROI {:2}: |saliency|={:.4} grad_cam={:.4}", roi, saliency[roi], gca[roi]);
    }

    Ok(())
}
