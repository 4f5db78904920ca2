//! Non-IID partitioning of a labeled dataset across clients.
//!
//! Rows are sorted by label and cut into equal contiguous shards, so most
//! shards hold a single label. Each client then receives a random set of
//! shards, which gives it a deliberately skewed label distribution.

use crate::core::{Error, Result};
use crate::data::{DataSource, Sample};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Smallest number of shards handed to each client.
pub const MIN_SHARDS_PER_CLIENT: usize = 3;

/// Smallest `k >= 3` such that `len` is a multiple of `k * num_clients`.
pub fn shards_per_client(len: usize, num_clients: usize) -> Result<usize> {
    if num_clients == 0 {
        return Err(Error::precondition("cannot partition across zero clients"));
    }
    let upper = len / num_clients;
    (MIN_SHARDS_PER_CLIENT..=upper)
        .find(|k| len % (k * num_clients) == 0)
        .ok_or_else(|| {
            Error::precondition(format!(
                "no shard count >= {MIN_SHARDS_PER_CLIENT} splits {len} rows evenly across {num_clients} clients"
            ))
        })
}

/// Immutable client -> row-index assignment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    assignments: BTreeMap<usize, Vec<usize>>,
    shards_per_client: usize,
    shard_size: usize,
}

impl Partition {
    /// Row indices of `client_id`, in shard order.
    pub fn client_indices(&self, client_id: usize) -> Option<&[usize]> {
        self.assignments.get(&client_id).map(Vec::as_slice)
    }

    pub fn num_clients(&self) -> usize {
        self.assignments.len()
    }

    pub fn shards_per_client(&self) -> usize {
        self.shards_per_client
    }

    pub fn shard_size(&self) -> usize {
        self.shard_size
    }

    /// Total assigned rows.
    pub fn total_rows(&self) -> usize {
        self.assignments.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[usize])> {
        self.assignments.iter().map(|(id, rows)| (*id, rows.as_slice()))
    }

    /// Copy every client's rows out of `source`, ordered by client id.
    pub fn materialize<D: DataSource + ?Sized>(&self, source: &D) -> Result<Vec<Vec<Sample>>> {
        self.assignments
            .values()
            .map(|rows| source.select(rows))
            .collect()
    }

    /// Label statistics for every client.
    pub fn stats<D: DataSource + ?Sized>(&self, source: &D) -> Vec<PartitionStats> {
        self.iter()
            .map(|(client_id, rows)| PartitionStats::compute(client_id, rows, source))
            .collect()
    }
}

/// Label distribution of one client's partition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionStats {
    /// Client ID
    pub client_id: usize,
    /// Number of rows
    pub rows: usize,
    /// Rows per label
    pub label_histogram: BTreeMap<usize, usize>,
    /// Share of rows carrying the most frequent label (1.0 = single label)
    pub dominant_share: f32,
}

impl PartitionStats {
    fn compute<D: DataSource + ?Sized>(client_id: usize, rows: &[usize], source: &D) -> Self {
        let mut label_histogram = BTreeMap::new();
        for &row in rows {
            *label_histogram.entry(source.label(row)).or_insert(0) += 1;
        }
        let dominant = label_histogram.values().max().cloned().unwrap_or(0);
        let dominant_share = if rows.is_empty() {
            0.0
        } else {
            dominant as f32 / rows.len() as f32
        };

        Self {
            client_id,
            rows: rows.len(),
            label_histogram,
            dominant_share,
        }
    }

    /// Check if the partition looks IID-like.
    pub fn is_iid_like(&self, num_classes: usize) -> bool {
        num_classes > 0 && self.dominant_share <= 1.5 / num_classes as f32
    }
}

/// Split `dataset` into `num_clients` label-skewed, disjoint, equally sized partitions.
pub fn partition<D, R>(dataset: &D, num_clients: usize, rng: &mut R) -> Result<Partition>
where
    D: DataSource + ?Sized,
    R: Rng + ?Sized,
{
    let len = dataset.len();
    let k = shards_per_client(len, num_clients)?;
    let num_shards = k * num_clients;
    let shard_size = len / num_shards;

    // Stable sort keeps same-label rows in index order inside their shard.
    let mut sorted: Vec<usize> = (0..num_shards * shard_size).collect();
    sorted.sort_by_key(|&i| dataset.label(i));

    let mut pool: Vec<usize> = (0..num_shards).collect();
    pool.shuffle(rng);

    let assignments = pool
        .chunks(k)
        .enumerate()
        .map(|(client_id, shards)| {
            let rows = shards
                .iter()
                .flat_map(|&s| sorted[s * shard_size..(s + 1) * shard_size].iter().copied())
                .collect();
            (client_id, rows)
        })
        .collect();

    Ok(Partition {
        assignments,
        shards_per_client: k,
        shard_size,
    })
}
