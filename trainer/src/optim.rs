//! Plain SGD with momentum for the dense parameter group.
//!
//! The embedding table never goes through here; its updates are
//! index-addressed and live in [`crate::sparse`].

use lm::NceModel;

/// Heavy-ball SGD over the model's dense parameters.
///
/// Velocity buffers are allocated lazily on the first step, one per dense
/// tensor, matching the fixed parameter order the model exposes. Weight
/// decay is folded into the gradient before the momentum update, the
/// classic (non-decoupled) form; the sparse path decays decoupled because
/// there decay must only touch visited rows.
#[derive(Debug, Default)]
pub struct DenseSgd {
    momentum: f32,
    weight_decay: f32,
    velocities: Vec<Vec<f32>>,
}

impl DenseSgd {
    pub fn new(momentum: f32, weight_decay: f32) -> Self {
        Self {
            momentum,
            weight_decay,
            velocities: Vec::new(),
        }
    }

    /// Applies one step at learning rate `lr` to every dense tensor.
    pub fn step<M: NceModel>(&mut self, model: &mut M, lr: f32) {
        let pairs = model.dense_pairs();

        if self.velocities.is_empty() {
            self.velocities = pairs.iter().map(|(p, _)| vec![0.0; p.len()]).collect();
        }
        debug_assert_eq!(self.velocities.len(), pairs.len());

        for ((param, grad), velocity) in pairs.into_iter().zip(&mut self.velocities) {
            for ((w, &g), v) in param.iter_mut().zip(grad).zip(velocity) {
                let g = g + self.weight_decay * *w;
                *v = self.momentum * *v + g;
                *w -= lr * *v;
            }
        }
    }
}

/// Rescales `grads` in place so their global L2 norm is at most `max_norm`.
///
/// Returns the norm measured before clipping. Gradients at or under the
/// threshold pass through untouched.
pub fn clip_grad_norm(grads: Vec<&mut [f32]>, max_norm: f32) -> f32 {
    let total: f32 = grads
        .iter()
        .flat_map(|g| g.iter())
        .map(|&g| g * g)
        .sum::<f32>()
        .sqrt();

    if total > max_norm {
        let scale = max_norm / total;
        for grad in grads {
            for g in grad.iter_mut() {
                *g *= scale;
            }
        }
    }

    total
}

#[cfg(test)]
mod tests {
    use lm::{NceModel, NoiseDistribution, RnnConfig, RnnLm};

    use super::*;

    fn tiny_model() -> RnnLm {
        let noise = NoiseDistribution::from_counts(&[1; 8]).unwrap();
        RnnLm::new(
            &RnnConfig {
                vocab_size: 8,
                dim: 4,
                dropout: 0.0,
                noise_ratio: 2,
                norm_term: 2.0,
                seed: 11,
            },
            noise,
        )
        .unwrap()
    }

    #[test]
    fn momentum_accumulates_across_steps() {
        let mut model = tiny_model();
        for g in model.dense_grads_mut().into_iter().flatten() {
            *g = 1.0;
        }
        let first = model.dense_params_mut()[0][0];

        let mut sgd = DenseSgd::new(0.5, 0.0);
        sgd.step(&mut model, 0.1);
        let after_one = model.dense_params_mut()[0][0];
        // v = 1, step = 0.1
        assert!((first - after_one - 0.1).abs() < 1e-6);

        for g in model.dense_grads_mut().into_iter().flatten() {
            *g = 1.0;
        }
        sgd.step(&mut model, 0.1);
        let after_two = model.dense_params_mut()[0][0];
        // v = 0.5 * 1 + 1 = 1.5, step = 0.15
        assert!((after_one - after_two - 0.15).abs() < 1e-6);
    }

    #[test]
    fn clipping_caps_the_global_norm() {
        let mut a = [3.0f32, 0.0];
        let mut b = [0.0f32, 4.0];

        let norm = clip_grad_norm(vec![&mut a, &mut b], 1.0);
        assert!((norm - 5.0).abs() < 1e-6);

        let clipped: f32 = a
            .iter()
            .chain(b.iter())
            .map(|&g| g * g)
            .sum::<f32>()
            .sqrt();
        assert!((clipped - 1.0).abs() < 1e-6);
    }

    #[test]
    fn small_gradients_pass_untouched() {
        let mut a = [0.3f32, 0.4];
        let before = a;

        let norm = clip_grad_norm(vec![&mut a], 10.0);
        assert!((norm - 0.5).abs() < 1e-6);
        assert_eq!(a, before);
    }
}
