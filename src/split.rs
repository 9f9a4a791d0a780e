use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;

use crate::error::{EngineError, Result};
use crate::layout::Layout;
use crate::types::Partition;
use crate::utils::write_atomic;

/// Absorbs floating point noise such as `10 * 0.7 = 6.999999999999999`.
const RATIO_EPSILON: f64 = 1e-9;

/// Ratio configuration for train/validation/test assignment. Train is the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.8,
            val: 0.2,
            test: 0.0,
        }
    }
}

impl SplitRatios {
    pub fn new(val: f64, test: f64) -> Result<Self> {
        if !(val > 0.0 && val < 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "validation size must be in (0, 1), got {}",
                val
            )));
        }
        if !(0.0..1.0).contains(&test) {
            return Err(EngineError::InvalidConfig(format!(
                "test size must be in [0, 1), got {}",
                test
            )));
        }
        let train = 1.0 - val - test;
        if train <= RATIO_EPSILON {
            return Err(EngineError::InvalidConfig(format!(
                "validation ({}) and test ({}) sizes leave nothing for training",
                val, test
            )));
        }
        Ok(Self { train, val, test })
    }

    /// Partitions with a non-zero share, train first.
    pub fn partitions(&self) -> Vec<Partition> {
        let mut partitions = vec![Partition::Train, Partition::Val];
        if self.test > 0.0 {
            partitions.push(Partition::Test);
        }
        partitions
    }

    fn ratio(&self, partition: Partition) -> f64 {
        match partition {
            Partition::Train => self.train,
            Partition::Val => self.val,
            Partition::Test => self.test,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitConfig {
    pub ratios: SplitRatios,
    pub seed: u64,
    /// Split each dominant-label group separately.
    pub stratified: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            ratios: SplitRatios::default(),
            seed: 42,
            stratified: false,
        }
    }
}

/// A key eligible for splitting and the group it is stratified by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitCandidate {
    pub key: String,
    pub stratum: Option<String>,
}

/// Partition of every candidate key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitAssignment {
    assignments: BTreeMap<String, Partition>,
}

impl SplitAssignment {
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn partition_of(&self, key: &str) -> Option<Partition> {
        self.assignments.get(key).copied()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Partition)> {
        self.assignments.iter().map(|(key, p)| (key.as_str(), *p))
    }

    /// Keys of one partition in key order.
    pub fn keys_in(&self, partition: Partition) -> Vec<&str> {
        self.iter()
            .filter(|(_, p)| *p == partition)
            .map(|(key, _)| key)
            .collect()
    }

    pub fn counts(&self) -> BTreeMap<Partition, usize> {
        let mut counts = BTreeMap::new();
        for partition in self.assignments.values() {
            *counts.entry(*partition).or_default() += 1;
        }
        counts
    }

    /// Partitions holding at least one key.
    pub fn partitions(&self) -> Vec<Partition> {
        self.counts().into_keys().collect()
    }

    /// Whether the assignment covers exactly these keys.
    pub fn covers_exactly(&self, candidates: &[SplitCandidate]) -> bool {
        let keys: BTreeSet<&str> = candidates.iter().map(|c| c.key.as_str()).collect();
        keys.len() == self.assignments.len()
            && keys.iter().all(|key| self.assignments.contains_key(*key))
    }

    fn insert_all<'a>(&mut self, keys: impl IntoIterator<Item = &'a String>, partition: Partition) {
        for key in keys {
            self.assignments.insert(key.clone(), partition);
        }
    }
}

/// Number of records per partition for a corpus of `n`.
///
/// Val and test get `floor(n * ratio)`, raised to one when their ratio is
/// positive; train receives the remainder and is never left empty.
pub fn partition_sizes(n: usize, ratios: &SplitRatios) -> Result<BTreeMap<Partition, usize>> {
    let partitions = ratios.partitions();
    if n < partitions.len() {
        return Err(EngineError::InsufficientData {
            available: n,
            requested: partitions.len(),
        });
    }

    let mut sizes: BTreeMap<Partition, usize> = BTreeMap::new();
    for partition in partitions.iter().copied().filter(|p| *p != Partition::Train) {
        let size = floor_share(n, ratios.ratio(partition)).max(1);
        sizes.insert(partition, size);
    }
    let mut others: usize = sizes.values().sum();
    while others >= n {
        // Take from the biggest non-train partition that can spare one
        let donor = sizes
            .iter()
            .filter(|(_, size)| **size > 1)
            .max_by_key(|(p, size)| (**size, std::cmp::Reverse(**p)))
            .map(|(p, _)| *p);
        match donor {
            Some(p) => {
                if let Some(size) = sizes.get_mut(&p) {
                    *size -= 1;
                }
                others -= 1;
            }
            None => break,
        }
    }
    sizes.insert(Partition::Train, n - others);
    Ok(sizes)
}

fn floor_share(n: usize, ratio: f64) -> usize {
    (n as f64 * ratio + RATIO_EPSILON).floor() as usize
}

/// Assign every candidate to a partition.
///
/// Keys are put in lexical order, permuted by a generator seeded with
/// `config.seed`, then sliced test, val, train. The same candidates and
/// config always give the same assignment.
pub fn split(candidates: &[SplitCandidate], config: &SplitConfig) -> Result<SplitAssignment> {
    let mut keys: Vec<&String> = candidates.iter().map(|c| &c.key).collect();
    keys.sort();
    keys.dedup();
    let sizes = partition_sizes(keys.len(), &config.ratios)?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut assignment = SplitAssignment::default();

    if config.stratified {
        let mut groups: BTreeMap<Option<&str>, Vec<&String>> = BTreeMap::new();
        for candidate in candidates {
            groups
                .entry(candidate.stratum.as_deref())
                .or_default()
                .push(&candidate.key);
        }
        for members in groups.values_mut() {
            members.sort();
            members.dedup();
            members.shuffle(&mut rng);
            let m = members.len();
            let test_n = floor_share(m, config.ratios.test);
            let val_n = floor_share(m, config.ratios.val).min(m - test_n);
            let (test, rest) = members.split_at(test_n);
            let (val, train) = rest.split_at(val_n);
            assignment.insert_all(test.iter().copied(), Partition::Test);
            assignment.insert_all(val.iter().copied(), Partition::Val);
            assignment.insert_all(train.iter().copied(), Partition::Train);
        }
        fill_empty_partitions(&mut assignment, &config.ratios);
    } else {
        keys.shuffle(&mut rng);
        let test_n = sizes.get(&Partition::Test).copied().unwrap_or(0);
        let val_n = sizes.get(&Partition::Val).copied().unwrap_or(0);
        let (test, rest) = keys.split_at(test_n);
        let (val, train) = rest.split_at(val_n);
        assignment.insert_all(test.iter().copied(), Partition::Test);
        assignment.insert_all(val.iter().copied(), Partition::Val);
        assignment.insert_all(train.iter().copied(), Partition::Train);
    }

    let counts = assignment.counts();
    info!(
        "Split created: {} train, {} val, {} test (seed {})",
        counts.get(&Partition::Train).unwrap_or(&0),
        counts.get(&Partition::Val).unwrap_or(&0),
        counts.get(&Partition::Test).unwrap_or(&0),
        config.seed
    );
    Ok(assignment)
}

/// Give each requested but empty partition one key, taken from train when it can spare one.
fn fill_empty_partitions(assignment: &mut SplitAssignment, ratios: &SplitRatios) {
    for partition in ratios.partitions() {
        if assignment.counts().contains_key(&partition) {
            continue;
        }
        let counts = assignment.counts();
        let donor = if counts.get(&Partition::Train).copied().unwrap_or(0) > 1 {
            Some(Partition::Train)
        } else {
            counts
                .iter()
                .filter(|(_, size)| **size > 1)
                .max_by_key(|(p, size)| (**size, std::cmp::Reverse(**p)))
                .map(|(p, _)| *p)
        };
        let moved = donor.and_then(|donor| assignment.keys_in(donor).last().map(|k| k.to_string()));
        if let Some(key) = moved {
            assignment.assignments.insert(key, partition);
        }
    }
}

/// On-disk form of a split, written next to the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSplit {
    pub seed: u64,
    pub ratios: SplitRatios,
    pub stratified: bool,
    pub total_count: usize,
    pub train: Vec<String>,
    pub val: Vec<String>,
    #[serde(default)]
    pub test: Vec<String>,
}

impl PersistedSplit {
    pub fn new(assignment: &SplitAssignment, config: &SplitConfig) -> Self {
        let owned = |p: Partition| -> Vec<String> {
            assignment
                .keys_in(p)
                .into_iter()
                .map(str::to_string)
                .collect()
        };
        Self {
            seed: config.seed,
            ratios: config.ratios,
            stratified: config.stratified,
            total_count: assignment.len(),
            train: owned(Partition::Train),
            val: owned(Partition::Val),
            test: owned(Partition::Test),
        }
    }

    pub fn to_assignment(&self) -> SplitAssignment {
        let mut assignment = SplitAssignment::default();
        assignment.insert_all(&self.train, Partition::Train);
        assignment.insert_all(&self.val, Partition::Val);
        assignment.insert_all(&self.test, Partition::Test);
        assignment
    }

    /// Same seed, ratios and stratification as `config`.
    pub fn matches_config(&self, config: &SplitConfig) -> bool {
        self.seed == config.seed
            && self.stratified == config.stratified
            && (self.ratios.val - config.ratios.val).abs() < RATIO_EPSILON
            && (self.ratios.test - config.ratios.test).abs() < RATIO_EPSILON
    }
}

/// Write the split to `train_val_split.json`.
pub fn save_split(layout: &Layout, assignment: &SplitAssignment, config: &SplitConfig) -> Result<()> {
    let persisted = PersistedSplit::new(assignment, config);
    let mut bytes = serde_json::to_vec_pretty(&persisted)?;
    bytes.push(b'\n');
    let path = layout.split_file();
    write_atomic(&path, &bytes)?;
    info!("Split info saved to: {}", path.display());
    Ok(())
}

/// Read the persisted split, if there is a readable one.
pub fn load_split(layout: &Layout) -> Result<Option<PersistedSplit>> {
    let path = layout.split_file();
    let content = match fs::read(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice(&content) {
        Ok(persisted) => Ok(Some(persisted)),
        Err(e) => {
            warn!("Ignoring unreadable split file {}: {}", path.display(), e);
            Ok(None)
        }
    }
}
