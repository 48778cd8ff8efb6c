use std::{fs, num::NonZeroUsize, path::PathBuf};

use collective::{Coordinator, ProcessGroup};
use lm::{Batch, Corpus, NceModel, NoiseDistribution, RnnConfig, RnnLm, Vocab};
use rand::{SeedableRng, rngs::StdRng};
use trainer::{CancelToken, TrainConfig, TrainErr, TrainingController, sync};

fn world(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

fn model(vocab: usize, seed: u64) -> RnnLm {
    let noise = NoiseDistribution::from_counts(&vec![1; vocab]).unwrap();
    RnnLm::new(
        &RnnConfig {
            vocab_size: vocab,
            dim: 8,
            dropout: 0.0,
            noise_ratio: 4,
            norm_term: (vocab as f32).ln(),
            seed,
        },
        noise,
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dense_sync_averages_two_workers() {
    let coordinator = Coordinator::bind("127.0.0.1:0".parse().unwrap(), world(2))
        .await
        .unwrap();
    let endpoint = coordinator.local_addr().unwrap();
    let coordinator_task = tokio::spawn(coordinator.run());

    let mut tasks = Vec::new();
    for (rank, fill) in [(0usize, 10.0f32), (1, 20.0)] {
        tasks.push(tokio::spawn(async move {
            let mut m = model(16, rank as u64);
            for p in m.dense_params_mut().into_iter().flatten() {
                *p = fill;
            }

            let mut group = ProcessGroup::join(endpoint, rank, world(2)).await?;
            sync::sync_dense(&mut group, &mut m).await?;
            group.leave().await?;
            Ok::<_, TrainErr>(m)
        }));
    }

    for task in tasks {
        let mut m = task.await.unwrap().unwrap();
        for p in m.dense_params_mut().into_iter().flatten() {
            assert_eq!(*p, 15.0);
        }
    }
    coordinator_task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sync_keeps_embeddings_local() {
    let coordinator = Coordinator::bind("127.0.0.1:0".parse().unwrap(), world(2))
        .await
        .unwrap();
    let endpoint = coordinator.local_addr().unwrap();
    let coordinator_task = tokio::spawn(coordinator.run());

    let mut tasks = Vec::new();
    for rank in 0..2usize {
        tasks.push(tokio::spawn(async move {
            // Distinct seeds give distinct embedding tables.
            let mut m = model(16, rank as u64);
            let before: Vec<u32> = m.embedding().as_slice().iter().map(|w| w.to_bits()).collect();

            let mut group = ProcessGroup::join(endpoint, rank, world(2)).await?;
            sync::sync_dense(&mut group, &mut m).await?;
            group.leave().await?;

            let after: Vec<u32> = m.embedding().as_slice().iter().map(|w| w.to_bits()).collect();
            assert_eq!(before, after);
            Ok::<_, TrainErr>(())
        }));
    }

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    coordinator_task.await.unwrap().unwrap();
}

fn toy_corpus(vocab_size: usize) -> Corpus {
    // `<unk>` is always entry 0, so one fewer named word keeps ids within
    // the model's vocabulary.
    let entries: Vec<(String, u64)> = (1..vocab_size)
        .map(|i| (format!("w{i}"), (vocab_size - i) as u64))
        .collect();
    let vocab = Vocab::from_entries(entries, 1);

    let stream: Vec<usize> = (0..240).map(|i| (i * 7 + 3) % vocab_size).collect();
    let batches = |ids: &[usize]| -> Vec<Batch> { lm::batchify(ids, 6, 4) };

    Corpus {
        train: batches(&stream),
        valid: batches(&stream[..60]),
        test: batches(&stream[60..120]),
        vocab,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_worker_run_selects_and_checkpoints() {
    let save = std::env::temp_dir().join(format!("train_loop_{}.safetensors", std::process::id()));
    let _ = fs::remove_file(&save);

    let cfg = TrainConfig {
        save: save.clone(),
        epochs: world(2),
        log_interval: world(4),
        lr: 0.1,
        lr_decay: 2.0,
        weight_decay: 1e-5,
        momentum: 0.9,
        clip: 0.25,
    }
    .validate()
    .unwrap();

    let coordinator = Coordinator::bind("127.0.0.1:0".parse().unwrap(), world(1))
        .await
        .unwrap();
    let endpoint = coordinator.local_addr().unwrap();
    let coordinator_task = tokio::spawn(coordinator.run());
    let mut group = ProcessGroup::join(endpoint, 0, world(1)).await.unwrap();

    let vocab_size = 16;
    let mut corpus = toy_corpus(vocab_size);
    let mut controller = TrainingController::new(cfg, model(vocab_size, 5), CancelToken::new());

    let mut rng = StdRng::seed_from_u64(0);
    let test_ppl = controller
        .train(&mut corpus, &mut group, &mut rng)
        .await
        .unwrap();
    group.leave().await.unwrap();
    coordinator_task.await.unwrap().unwrap();

    assert!(test_ppl.is_finite() && test_ppl > 1.0);
    assert!(controller.state().best_val_ppl.is_some());
    assert_eq!(controller.state().best_path.as_deref(), Some(save.as_path()));

    // The best checkpoint plus one snapshot per epoch.
    assert!(save.exists());
    for epoch in 1..=2 {
        let snapshot = PathBuf::from(format!("{}.epoch_{epoch}", save.display()));
        assert!(snapshot.exists(), "missing {}", snapshot.display());
        fs::remove_file(snapshot).unwrap();
    }

    // Scoring the saved best from disk reproduces a finite perplexity.
    let mut fresh = TrainingController::new(
        TrainConfig {
            save: save.clone(),
            epochs: world(2),
            log_interval: world(4),
            lr: 0.1,
            lr_decay: 2.0,
            weight_decay: 1e-5,
            momentum: 0.9,
            clip: 0.25,
        },
        model(vocab_size, 99),
        CancelToken::new(),
    );
    let reloaded_ppl = fresh.evaluate_best(&corpus).unwrap();
    assert!(reloaded_ppl.is_finite() && reloaded_ppl > 1.0);

    fs::remove_file(save).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_run_stops_before_the_first_batch() {
    let save = std::env::temp_dir().join(format!("cancelled_{}.safetensors", std::process::id()));

    let cfg = TrainConfig {
        save: save.clone(),
        epochs: world(3),
        log_interval: world(4),
        lr: 0.1,
        lr_decay: 2.0,
        weight_decay: 0.0,
        momentum: 0.0,
        clip: 0.25,
    };

    let coordinator = Coordinator::bind("127.0.0.1:0".parse().unwrap(), world(1))
        .await
        .unwrap();
    let endpoint = coordinator.local_addr().unwrap();
    let coordinator_task = tokio::spawn(coordinator.run());
    let mut group = ProcessGroup::join(endpoint, 0, world(1)).await.unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();

    let mut corpus = toy_corpus(16);
    let mut controller = TrainingController::new(cfg, model(16, 5), cancel);

    let mut rng = StdRng::seed_from_u64(0);
    let test_ppl = controller
        .train(&mut corpus, &mut group, &mut rng)
        .await
        .unwrap();
    group.leave().await.unwrap();
    coordinator_task.await.unwrap().unwrap();

    // No epoch completed, so no checkpoint, but the final evaluation still
    // runs on the untrained weights.
    assert!(test_ppl.is_finite());
    assert!(controller.state().best_val_ppl.is_none());
    assert!(!save.exists());
}
