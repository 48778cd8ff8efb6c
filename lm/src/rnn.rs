//! A single-layer recurrent language model trained with NCE.
//!
//! The input embedding doubles as the output projection (tied weights), so
//! the hidden size equals the embedding size. Training scores the target
//! against `noise_ratio` sampled noise tokens per position; evaluation
//! scores the full vocabulary exactly.

use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    Batch, EmbeddingTable, GradientBuffer, LmErr, Mode, NceModel, NoiseDistribution, Result,
};

// Floor for noise probabilities inside the NCE offset, so a zero-count
// target cannot produce an infinite logit.
const NOISE_PROB_FLOOR: f32 = 1e-10;

#[derive(Debug, Clone)]
pub struct RnnConfig {
    pub vocab_size: usize,
    /// Embedding size; also the hidden size, the output layer is tied.
    pub dim: usize,
    pub dropout: f32,
    /// Noise samples per predicted token.
    pub noise_ratio: usize,
    /// Fixed log-normalization term subtracted from every score.
    pub norm_term: f32,
    pub seed: u64,
}

pub struct RnnLm {
    embedding: EmbeddingTable,
    w_ih: Array2<f32>,
    w_hh: Array2<f32>,
    b_h: Array1<f32>,
    nce_bias: Array1<f32>,

    g_w_ih: Array2<f32>,
    g_w_hh: Array2<f32>,
    g_b_h: Array1<f32>,
    g_nce_bias: Array1<f32>,
    sparse: GradientBuffer,

    noise: NoiseDistribution,
    noise_ratio: usize,
    norm_term: f32,
    dropout: f32,
    rng: StdRng,
}

impl RnnLm {
    /// Builds the model with uniform random parameters.
    ///
    /// # Errors
    /// Returns `LmErr::ShapeMismatch` when the noise distribution does not
    /// cover the configured vocabulary.
    pub fn new(cfg: &RnnConfig, noise: NoiseDistribution) -> Result<Self> {
        if noise.vocab_size() != cfg.vocab_size {
            return Err(LmErr::ShapeMismatch {
                what: "noise distribution",
                got: noise.vocab_size(),
                expected: cfg.vocab_size,
            });
        }

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let d = cfg.dim;
        let bound = 1.0 / (d as f32).sqrt();
        let mut uniform =
            |r: &mut StdRng, shape: (usize, usize)| -> Array2<f32> {
                Array2::from_shape_simple_fn(shape, || r.random_range(-bound..bound))
            };

        let embedding = EmbeddingTable::new(cfg.vocab_size, d, &mut rng);
        let w_ih = uniform(&mut rng, (d, d));
        let w_hh = uniform(&mut rng, (d, d));

        Ok(Self {
            embedding,
            w_ih,
            w_hh,
            b_h: Array1::zeros(d),
            nce_bias: Array1::zeros(cfg.vocab_size),
            g_w_ih: Array2::zeros((d, d)),
            g_w_hh: Array2::zeros((d, d)),
            g_b_h: Array1::zeros(d),
            g_nce_bias: Array1::zeros(cfg.vocab_size),
            sparse: GradientBuffer::new(d),
            noise,
            noise_ratio: cfg.noise_ratio,
            norm_term: cfg.norm_term,
            dropout: cfg.dropout,
            rng,
        })
    }

    pub fn dim(&self) -> usize {
        self.embedding.dim()
    }

    pub fn vocab_size(&self) -> usize {
        self.embedding.vocab_size()
    }

    /// Forward and backward for one batch under the NCE objective.
    fn train_pass(&mut self, batch: &Batch) -> Result<f32> {
        let n = batch.token_count;
        if n == 0 {
            return Err(LmErr::EmptyStream);
        }

        let d = self.dim();
        let inv_n = 1.0 / n as f32;
        let k = self.noise_ratio;
        let mut total_loss = 0.0_f64;
        let mut noise_ids = vec![0_usize; k];

        for seq in &batch.sequences {
            let steps = seq.len().saturating_sub(1);
            if steps == 0 {
                continue;
            }

            // Forward, caching what backpropagation through time needs.
            let mut inputs_e: Vec<Array1<f32>> = Vec::with_capacity(steps);
            let mut hiddens: Vec<Array1<f32>> = Vec::with_capacity(steps);
            let mut dropped: Vec<Array1<f32>> = Vec::with_capacity(steps);
            let mut masks: Vec<Option<Vec<f32>>> = Vec::with_capacity(steps);
            // Per position: scored ids with their loss gradient d(loss)/d(logit).
            let mut scored: Vec<Vec<(usize, f32)>> = Vec::with_capacity(steps);

            let mut h_prev = Array1::<f32>::zeros(d);

            for t in 0..steps {
                let input = seq[t];
                let target = seq[t + 1];
                self.embedding.check_row(input)?;
                self.embedding.check_row(target)?;

                let e = self.embedding.row(input).to_owned();
                let mut h = self.w_ih.dot(&e) + self.w_hh.dot(&h_prev) + &self.b_h;
                h.mapv_inplace(f32::tanh);

                let (z, mask) = self.apply_dropout(&h);

                self.noise.sample_into(&mut self.rng, &mut noise_ids);
                let mut hits = Vec::with_capacity(1 + k);

                for (slot, &id) in std::iter::once(&target).chain(&noise_ids).enumerate() {
                    let is_target = slot == 0;
                    let score =
                        self.embedding.row(id).dot(&z) + self.nce_bias[id] - self.norm_term;
                    let offset = (k as f32 * self.noise.prob(id).max(NOISE_PROB_FLOOR)).ln();
                    let logit = score - offset;

                    // -ln sigma(x) = softplus(-x); -ln(1 - sigma(x)) = softplus(x).
                    let (loss, label) = if is_target {
                        (softplus(-logit), 1.0)
                    } else {
                        (softplus(logit), 0.0)
                    };

                    total_loss += f64::from(loss);
                    hits.push((id, (sigmoid(logit) - label) * inv_n));
                }

                inputs_e.push(e);
                dropped.push(z);
                masks.push(mask);
                scored.push(hits);
                hiddens.push(h.clone());
                h_prev = h;
            }

            // Backpropagation through time.
            let mut delta_next = Array1::<f32>::zeros(d);

            for t in (0..steps).rev() {
                let z = &dropped[t];
                let mut dz = Array1::<f32>::zeros(d);

                for &(id, dlogit) in &scored[t] {
                    dz.scaled_add(dlogit, &self.embedding.row(id));
                    self.g_nce_bias[id] += dlogit;
                    self.sparse
                        .accumulate(id, z.as_slice().expect("contiguous"), dlogit)?;
                }

                let mut dh = match &masks[t] {
                    Some(mask) => {
                        let mut dropped_back = dz;
                        for (g, m) in dropped_back.iter_mut().zip(mask) {
                            *g *= m;
                        }
                        dropped_back
                    }
                    None => dz,
                };
                dh += &self.w_hh.t().dot(&delta_next);

                let h = &hiddens[t];
                let delta = &dh * &h.mapv(|v| 1.0 - v * v);

                add_outer(&mut self.g_w_ih, &delta, &inputs_e[t]);
                if t > 0 {
                    add_outer(&mut self.g_w_hh, &delta, &hiddens[t - 1]);
                }
                self.g_b_h += &delta;

                let de = self.w_ih.t().dot(&delta);
                self.sparse
                    .accumulate(seq[t], de.as_slice().expect("contiguous"), 1.0)?;

                delta_next = delta;
            }
        }

        Ok((total_loss / n as f64) as f32)
    }

    /// Exact full-vocabulary loss; touches no gradient buffer.
    fn eval_pass(&self, batch: &Batch) -> Result<f32> {
        let n = batch.token_count;
        if n == 0 {
            return Err(LmErr::EmptyStream);
        }

        let d = self.dim();
        let mut total_loss = 0.0_f64;

        for seq in &batch.sequences {
            let steps = seq.len().saturating_sub(1);
            let mut h = Array1::<f32>::zeros(d);

            for t in 0..steps {
                let input = seq[t];
                let target = seq[t + 1];
                self.embedding.check_row(input)?;
                self.embedding.check_row(target)?;

                let e = self.embedding.row(input);
                h = self.w_ih.dot(&e) + self.w_hh.dot(&h) + &self.b_h;
                h.mapv_inplace(f32::tanh);

                let scores = self.embedding.weights().dot(&h) + &self.nce_bias;
                total_loss += f64::from(log_sum_exp(&scores) - scores[target]);
            }
        }

        Ok((total_loss / n as f64) as f32)
    }

    /// Inverted dropout on the hidden output connection. The recurrent
    /// state itself stays undropped.
    fn apply_dropout(&mut self, h: &Array1<f32>) -> (Array1<f32>, Option<Vec<f32>>) {
        if self.dropout <= 0.0 {
            return (h.clone(), None);
        }

        let keep_scale = 1.0 / (1.0 - self.dropout);
        let mask: Vec<f32> = h
            .iter()
            .map(|_| {
                if self.rng.random::<f32>() < self.dropout {
                    0.0
                } else {
                    keep_scale
                }
            })
            .collect();

        let mut z = h.clone();
        for (v, m) in z.iter_mut().zip(&mask) {
            *v *= m;
        }

        (z, Some(mask))
    }
}

impl NceModel for RnnLm {
    fn forward(&mut self, batch: &Batch, mode: Mode) -> Result<f32> {
        match mode {
            Mode::Train => self.train_pass(batch),
            Mode::Eval => self.eval_pass(batch),
        }
    }

    fn zero_grads(&mut self) {
        self.g_w_ih.fill(0.0);
        self.g_w_hh.fill(0.0);
        self.g_b_h.fill(0.0);
        self.g_nce_bias.fill(0.0);
        self.sparse.clear();
    }

    fn dense_params_mut(&mut self) -> Vec<&mut [f32]> {
        let Self {
            w_ih,
            w_hh,
            b_h,
            nce_bias,
            ..
        } = self;

        vec![
            w_ih.as_slice_mut().expect("contiguous"),
            w_hh.as_slice_mut().expect("contiguous"),
            b_h.as_slice_mut().expect("contiguous"),
            nce_bias.as_slice_mut().expect("contiguous"),
        ]
    }

    fn dense_grads_mut(&mut self) -> Vec<&mut [f32]> {
        let Self {
            g_w_ih,
            g_w_hh,
            g_b_h,
            g_nce_bias,
            ..
        } = self;

        vec![
            g_w_ih.as_slice_mut().expect("contiguous"),
            g_w_hh.as_slice_mut().expect("contiguous"),
            g_b_h.as_slice_mut().expect("contiguous"),
            g_nce_bias.as_slice_mut().expect("contiguous"),
        ]
    }

    fn dense_pairs(&mut self) -> Vec<(&mut [f32], &[f32])> {
        let Self {
            w_ih,
            w_hh,
            b_h,
            nce_bias,
            g_w_ih,
            g_w_hh,
            g_b_h,
            g_nce_bias,
            ..
        } = self;

        vec![
            (
                w_ih.as_slice_mut().expect("contiguous"),
                g_w_ih.as_slice().expect("contiguous"),
            ),
            (
                w_hh.as_slice_mut().expect("contiguous"),
                g_w_hh.as_slice().expect("contiguous"),
            ),
            (
                b_h.as_slice_mut().expect("contiguous"),
                g_b_h.as_slice().expect("contiguous"),
            ),
            (
                nce_bias.as_slice_mut().expect("contiguous"),
                g_nce_bias.as_slice().expect("contiguous"),
            ),
        ]
    }

    fn take_sparse_grad(&mut self) -> GradientBuffer {
        let replacement = GradientBuffer::new(self.sparse.dim());
        std::mem::replace(&mut self.sparse, replacement)
    }

    fn embedding(&self) -> &EmbeddingTable {
        &self.embedding
    }

    fn embedding_mut(&mut self) -> &mut EmbeddingTable {
        &mut self.embedding
    }

    fn tensors(&self) -> Vec<(&'static str, Vec<usize>, &[f32])> {
        let (vocab, d) = (self.vocab_size(), self.dim());

        vec![
            ("embedding.weight", vec![vocab, d], self.embedding.as_slice()),
            (
                "rnn.w_ih",
                vec![d, d],
                self.w_ih.as_slice().expect("contiguous"),
            ),
            (
                "rnn.w_hh",
                vec![d, d],
                self.w_hh.as_slice().expect("contiguous"),
            ),
            ("rnn.b_h", vec![d], self.b_h.as_slice().expect("contiguous")),
            (
                "nce.bias",
                vec![vocab],
                self.nce_bias.as_slice().expect("contiguous"),
            ),
        ]
    }

    fn load_tensor(&mut self, name: &str, shape: &[usize], data: &[f32]) -> Result<()> {
        let (vocab, d) = (self.vocab_size(), self.dim());

        let (expected_shape, dest): (Vec<usize>, &mut [f32]) = match name {
            "embedding.weight" => (vec![vocab, d], self.embedding.as_slice_mut()),
            "rnn.w_ih" => (vec![d, d], self.w_ih.as_slice_mut().expect("contiguous")),
            "rnn.w_hh" => (vec![d, d], self.w_hh.as_slice_mut().expect("contiguous")),
            "rnn.b_h" => (vec![d], self.b_h.as_slice_mut().expect("contiguous")),
            "nce.bias" => (vec![vocab], self.nce_bias.as_slice_mut().expect("contiguous")),
            other => {
                return Err(LmErr::UnknownTensor {
                    name: other.to_string(),
                });
            }
        };

        if shape != expected_shape || data.len() != dest.len() {
            return Err(LmErr::ShapeMismatch {
                what: "checkpoint tensor",
                got: data.len(),
                expected: dest.len(),
            });
        }

        dest.copy_from_slice(data);
        Ok(())
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable `ln(1 + e^x)`.
#[inline]
fn softplus(x: f32) -> f32 {
    if x > 0.0 { x + (-x).exp().ln_1p() } else { x.exp().ln_1p() }
}

fn log_sum_exp(scores: &Array1<f32>) -> f32 {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = scores.iter().map(|&s| (s - max).exp()).sum();
    max + sum.ln()
}

/// Accumulates the outer product `u vᵀ` into `acc`.
fn add_outer(acc: &mut Array2<f32>, u: &Array1<f32>, v: &Array1<f32>) {
    for (i, &ui) in u.iter().enumerate() {
        acc.row_mut(i).scaled_add(ui, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_model(vocab: usize, dim: usize) -> RnnLm {
        let cfg = RnnConfig {
            vocab_size: vocab,
            dim,
            dropout: 0.0,
            noise_ratio: 3,
            norm_term: 0.0,
            seed: 42,
        };
        let noise = NoiseDistribution::from_counts(&vec![1; vocab]).unwrap();
        RnnLm::new(&cfg, noise).unwrap()
    }

    fn batch(seqs: &[&[usize]]) -> Batch {
        Batch::new(seqs.iter().map(|s| s.to_vec()).collect())
    }

    #[test]
    fn train_pass_touches_only_batch_and_noise_rows() {
        let mut model = tiny_model(20, 4);
        let b = batch(&[&[1, 2, 3]]);

        let loss = model.forward(&b, Mode::Train).unwrap();
        assert!(loss.is_finite());

        let sparse = model.take_sparse_grad();

        // Every touched row is a valid vocabulary id; inputs and targets
        // must be among them.
        let touched: Vec<usize> = sparse.coalesce().indices;
        assert!(touched.iter().all(|&i| i < 20));
        for expected in [1, 2, 3] {
            assert!(touched.contains(&expected), "row {expected} missing");
        }
    }

    #[test]
    fn eval_pass_leaves_gradients_untouched() {
        let mut model = tiny_model(10, 4);
        model.zero_grads();

        let b = batch(&[&[0, 1, 2, 3]]);
        let loss = model.forward(&b, Mode::Eval).unwrap();
        assert!(loss.is_finite());

        assert!(model.take_sparse_grad().is_empty());
        assert!(model.g_w_ih.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn zeroed_model_scores_uniformly() {
        let mut model = tiny_model(16, 4);
        // Flatten everything so each vocabulary id scores identically.
        for slice in model.dense_params_mut() {
            slice.fill(0.0);
        }
        model.embedding.as_slice_mut().fill(0.0);

        let b = batch(&[&[0, 5, 9]]);
        let loss = model.forward(&b, Mode::Eval).unwrap();
        assert!((loss - (16.0_f32).ln()).abs() < 1e-5);
    }

    #[test]
    fn empty_batch_is_rejected_in_both_modes() {
        let mut model = tiny_model(10, 4);
        let b = batch(&[]);

        assert!(matches!(model.forward(&b, Mode::Train), Err(LmErr::EmptyStream)));
        assert!(matches!(model.forward(&b, Mode::Eval), Err(LmErr::EmptyStream)));
    }

    #[test]
    fn training_reduces_loss_on_a_repeating_pattern() {
        let mut model = tiny_model(4, 8);
        let b = batch(&[&[0, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3]]);

        let before = model.forward(&b, Mode::Eval).unwrap();

        for _ in 0..120 {
            model.zero_grads();
            let _ = model.forward(&b, Mode::Train).unwrap();

            for (param, grad) in model.dense_pairs() {
                for (w, g) in param.iter_mut().zip(grad) {
                    *w -= 0.5 * g;
                }
            }

            let sparse = model.take_sparse_grad();
            for (index, row) in sparse.coalesce().iter() {
                let mut table_row = model.embedding_mut().row_mut(index);
                for (w, g) in table_row.iter_mut().zip(row) {
                    *w -= 0.5 * g;
                }
            }
        }

        let after = model.forward(&b, Mode::Eval).unwrap();
        assert!(
            after < before,
            "loss did not improve: before {before}, after {after}"
        );
    }
}
