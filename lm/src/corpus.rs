//! Vocabulary and corpus loading.
//!
//! Text is whitespace tokenized. The vocabulary comes from a `token count`
//! file; tokens under the frequency floor fold into `<unk>` so the count
//! mass (which feeds the noise distribution) is preserved.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use log::debug;
use rand::{Rng, seq::SliceRandom};

use crate::{LmErr, Result};

pub const UNK_TOKEN: &str = "<unk>";

#[derive(Debug, Clone)]
pub struct Vocab {
    index: HashMap<String, usize>,
    tokens: Vec<String>,
    counts: Vec<u64>,
    unk: usize,
}

impl Vocab {
    /// Builds the vocabulary from `(token, count)` entries.
    ///
    /// Entries with a count below `min_freq` are dropped and their counts
    /// added to `<unk>`, which is always present.
    pub fn from_entries<I>(entries: I, min_freq: u64) -> Self
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        let mut index = HashMap::new();
        let mut tokens = vec![UNK_TOKEN.to_string()];
        let mut counts = vec![0_u64];
        index.insert(UNK_TOKEN.to_string(), 0);

        for (token, count) in entries {
            if token == UNK_TOKEN || count < min_freq {
                counts[0] += count;
                continue;
            }

            index.insert(token.clone(), tokens.len());
            tokens.push(token);
            counts.push(count);
        }

        Self {
            index,
            tokens,
            counts,
            unk: 0,
        }
    }

    /// Reads a `token count` file, one entry per line.
    pub fn from_count_file(path: &Path, min_freq: u64) -> Result<Self> {
        let file = File::open(path).map_err(|source| LmErr::CorpusIo {
            path: path.to_path_buf(),
            source,
        })?;

        let mut entries = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| LmErr::CorpusIo {
                path: path.to_path_buf(),
                source,
            })?;

            if line.trim().is_empty() {
                continue;
            }

            let mut parts = line.split_whitespace();
            let entry = parts.next().zip(parts.next().and_then(|c| c.parse().ok()));
            match entry {
                Some((token, count)) => entries.push((token.to_string(), count)),
                None => {
                    return Err(LmErr::MalformedVocabLine {
                        path: path.to_path_buf(),
                        line: line_no + 1,
                    });
                }
            }
        }

        Ok(Self::from_entries(entries, min_freq))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Token id, falling back to `<unk>`.
    pub fn lookup(&self, token: &str) -> usize {
        self.index.get(token).copied().unwrap_or(self.unk)
    }

    pub fn token(&self, id: usize) -> &str {
        &self.tokens[id]
    }

    /// Per-id frequency counts, the input to the noise distribution.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }
}

/// One training batch: a group of token id sequences plus the number of
/// next-token predictions it yields (the non-padding token count used to
/// weight evaluation loss).
#[derive(Debug, Clone)]
pub struct Batch {
    pub sequences: Vec<Vec<usize>>,
    pub token_count: usize,
}

impl Batch {
    pub fn new(sequences: Vec<Vec<usize>>) -> Self {
        let token_count = sequences
            .iter()
            .map(|s| s.len().saturating_sub(1))
            .sum();
        Self {
            sequences,
            token_count,
        }
    }
}

/// Chunks a token id stream into `bptt + 1`-length sequences (each yields
/// `bptt` predictions) and groups them `batch_size` at a time. A short
/// tail is kept as long as it still contains a prediction.
pub fn batchify(ids: &[usize], bptt: usize, batch_size: usize) -> Vec<Batch> {
    let mut sequences = Vec::new();

    for chunk in ids.chunks(bptt + 1) {
        if chunk.len() >= 2 {
            sequences.push(chunk.to_vec());
        }
    }

    sequences
        .chunks(batch_size)
        .map(|group| Batch::new(group.to_vec()))
        .collect()
}

/// The train/valid/test streams plus their shared vocabulary.
#[derive(Debug)]
pub struct Corpus {
    pub vocab: Vocab,
    pub train: Vec<Batch>,
    pub valid: Vec<Batch>,
    pub test: Vec<Batch>,
}

impl Corpus {
    /// Loads `train.txt`, `valid.txt` and `test.txt` from `data_dir`,
    /// mapping tokens through the vocabulary at `vocab_path`.
    pub fn load(
        data_dir: &Path,
        vocab_path: &Path,
        min_freq: u64,
        batch_size: usize,
        bptt: usize,
    ) -> Result<Self> {
        let vocab = Vocab::from_count_file(vocab_path, min_freq)?;

        let read_split = |name: &str| -> Result<Vec<Batch>> {
            let path = data_dir.join(name);
            let ids = tokenize_file(&path, &vocab)?;
            debug!(split = name, tokens = ids.len(); "split tokenized");
            Ok(batchify(&ids, bptt, batch_size))
        };

        Ok(Self {
            train: read_split("train.txt")?,
            valid: read_split("valid.txt")?,
            test: read_split("test.txt")?,
            vocab,
        })
    }

    /// Reshuffles the training batches in place.
    pub fn shuffle_train<R: Rng>(&mut self, rng: &mut R) {
        self.train.shuffle(rng);
    }
}

fn tokenize_file(path: &Path, vocab: &Vocab) -> Result<Vec<usize>> {
    let file = File::open(path).map_err(|source| LmErr::CorpusIo {
        path: path.to_path_buf(),
        source,
    })?;

    let mut ids = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| LmErr::CorpusIo {
            path: path.to_path_buf(),
            source,
        })?;
        for token in line.split_whitespace() {
            ids.push(vocab.lookup(token));
        }
    }

    Ok(ids)
}
