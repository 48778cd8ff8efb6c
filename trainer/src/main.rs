use std::{io, net::SocketAddr, num::NonZeroUsize, path::PathBuf};

use clap::Parser;
use collective::{Coordinator, ProcessGroup};
use lm::{Corpus, NoiseDistribution, RnnConfig, RnnLm};
use log::{info, warn};
use rand::{SeedableRng, rngs::StdRng};
use tokio::signal;
use trainer::{CancelToken, TrainConfig, TrainingController};

/// Distributed NCE language-model trainer.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Directory holding train.txt, valid.txt and test.txt.
    #[arg(long, default_value = "./data")]
    data: PathBuf,

    /// Vocabulary count file (`token count` per line).
    #[arg(long, default_value = "./data/vocab.txt")]
    vocab: PathBuf,

    /// Best-checkpoint path; epoch snapshots append `.epoch_<n>`.
    #[arg(long, default_value = "model.safetensors")]
    save: PathBuf,

    #[arg(long, default_value_t = 64)]
    batch_size: usize,

    /// Sequence length for truncated backpropagation.
    #[arg(long, default_value_t = 35)]
    bptt: usize,

    /// Embedding width; the tied architecture reuses it as the hidden size.
    #[arg(long, default_value_t = 200)]
    emsize: usize,

    #[arg(long, default_value_t = 0.5)]
    dropout: f32,

    #[arg(long, default_value_t = 0.25)]
    clip: f32,

    #[arg(long, default_value_t = 1.0)]
    lr: f32,

    /// Learning-rate divisor applied after a stagnant epoch.
    #[arg(long, default_value_t = 2.0)]
    lr_decay: f32,

    #[arg(long, default_value_t = 1e-5)]
    weight_decay: f32,

    #[arg(long, default_value_t = 0.9)]
    momentum: f32,

    /// Noise samples per predicted token.
    #[arg(long, default_value_t = 10)]
    noise_ratio: usize,

    /// Fixed log-normalization constant for the unnormalized scores.
    #[arg(long, default_value_t = 9.0)]
    norm_term: f32,

    /// Dense synchronization and progress-log cadence, in batches.
    #[arg(long, default_value_t = NonZeroUsize::new(200).unwrap())]
    log_interval: NonZeroUsize,

    #[arg(long, default_value_t = NonZeroUsize::new(40).unwrap())]
    epochs: NonZeroUsize,

    /// Tokens rarer than this fold into `<unk>`.
    #[arg(long, default_value_t = 1)]
    min_freq: u64,

    #[arg(long, default_value_t = 1111)]
    seed: u64,

    /// Train before evaluating; without it only the saved best model is
    /// scored.
    #[arg(long)]
    train: bool,

    /// This worker's rank within the group.
    #[arg(long, default_value_t = 0)]
    rank: usize,

    #[arg(long, default_value_t = NonZeroUsize::new(1).unwrap())]
    world_size: NonZeroUsize,

    /// Rendezvous endpoint; rank 0 hosts the coordinator there.
    #[arg(long, default_value = "127.0.0.1:29500")]
    rendezvous: SocketAddr,
}

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let cfg = TrainConfig {
        save: args.save.clone(),
        epochs: args.epochs,
        log_interval: args.log_interval,
        lr: args.lr,
        lr_decay: args.lr_decay,
        weight_decay: args.weight_decay,
        momentum: args.momentum,
        clip: args.clip,
    }
    .validate()
    .map_err(io::Error::from)?;

    let mut corpus = Corpus::load(
        &args.data,
        &args.vocab,
        args.min_freq,
        args.batch_size,
        args.bptt,
    )
    .map_err(io::Error::other)?;
    info!(
        vocab = corpus.vocab.len(),
        train_batches = corpus.train.len(),
        valid_batches = corpus.valid.len();
        "corpus loaded"
    );

    let noise = NoiseDistribution::from_counts(corpus.vocab.counts()).map_err(io::Error::other)?;
    let model = RnnLm::new(
        &RnnConfig {
            vocab_size: corpus.vocab.len(),
            dim: args.emsize,
            dropout: args.dropout,
            noise_ratio: args.noise_ratio,
            norm_term: args.norm_term,
            seed: args.seed.wrapping_add(args.rank as u64),
        },
        noise,
    )
    .map_err(io::Error::other)?;

    let cancel = CancelToken::new();
    let mut controller = TrainingController::new(cfg, model, cancel.clone());

    if !args.train {
        let test_ppl = controller
            .evaluate_best(&corpus)
            .map_err(io::Error::from)?;
        info!(test_ppl = test_ppl; "evaluation complete");
        return Ok(());
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping at the next batch boundary");
                cancel.cancel();
            }
        });
    }

    // Rank 0 hosts the rendezvous coordinator in-process and joins its own
    // group like any other member.
    let coordinator = if args.rank == 0 {
        let coordinator = Coordinator::bind(args.rendezvous, args.world_size).await?;
        Some(tokio::spawn(coordinator.run()))
    } else {
        None
    };

    let mut group = ProcessGroup::join(args.rendezvous, args.rank, args.world_size)
        .await
        .map_err(io::Error::other)?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let test_ppl = controller
        .train(&mut corpus, &mut group, &mut rng)
        .await
        .map_err(io::Error::from)?;
    info!(rank = args.rank, test_ppl = test_ppl; "run complete");

    group.leave().await.map_err(io::Error::other)?;
    if let Some(handle) = coordinator {
        handle
            .await
            .map_err(io::Error::other)?
            .map_err(io::Error::other)?;
    }

    Ok(())
}
