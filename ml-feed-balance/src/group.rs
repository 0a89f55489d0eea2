//! Per-group (basket) round robin balancer

use std::collections::HashMap;
use std::hash::Hash;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use ml_feed_core::{Error, IndexSampler, Result, SampleIndex};

use crate::epoch::{make_rng, Visited, PROGRESS_EVERY};

/// Options of a [`GroupBalancer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupOptions {
    /// Shuffle rows within each group whenever the group is restarted
    pub shuffle: bool,

    /// Shuffle the order in which groups are visited on every epoch
    pub shuffle_groups: bool,

    /// Report end of epoch once every row has been drawn, instead of rolling over
    pub raise_on_end: bool,

    /// Report end of epoch when the current group runs out, instead of restarting it
    pub raise_on_group_end: bool,

    /// Seed for reproducible permutations
    pub seed: Option<u64>,
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            shuffle: true,
            shuffle_groups: false,
            raise_on_end: false,
            raise_on_group_end: false,
            seed: None,
        }
    }
}

/// Round robin over groups; each group is walked through its own partition.
///
/// Two exhaustion signals exist: the whole epoch (every row drawn) and the
/// current group's partition running out. Each either fails with
/// [`Error::EndOfEpoch`] or restarts, per [`GroupOptions`].
#[derive(Debug)]
pub struct GroupBalancer {
    groups: Vec<Vec<usize>>,
    order: Vec<usize>,
    position: usize,
    cursors: Vec<usize>,
    visited: Visited,
    options: GroupOptions,
    rng: StdRng,
    exhausted_group: Option<usize>,
    draws: usize,
}

impl GroupBalancer {
    /// Partition rows by their group key; groups are numbered by first appearance
    pub fn from_assignment<K: Eq + Hash>(assignment: &[K], options: GroupOptions) -> Result<Self> {
        let mut ids: HashMap<&K, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (index, key) in assignment.iter().enumerate() {
            let next_id = ids.len();
            let id = *ids.entry(key).or_insert(next_id);
            if id == groups.len() {
                groups.push(Vec::new());
            }
            groups[id].push(index);
        }
        Self::from_partitions(groups, assignment.len(), options)
    }

    /// Use explicit partitions; together they must cover `[0, len)` exactly once
    pub fn from_partitions(groups: Vec<Vec<usize>>, len: usize, options: GroupOptions) -> Result<Self> {
        if groups.is_empty() {
            return Err(Error::Construction("at least one group is required".into()));
        }
        if let Some(empty) = groups.iter().position(Vec::is_empty) {
            return Err(Error::Construction(format!("group {empty} has no members")));
        }

        let mut seen = vec![false; len];
        for &index in groups.iter().flatten() {
            match seen.get_mut(index) {
                Some(seen) if !*seen => *seen = true,
                Some(_) => {
                    return Err(Error::Construction(format!("row {index} is in more than one group")))
                }
                None => {
                    return Err(Error::Construction(format!("row {index} is out of range for {len} rows")))
                }
            }
        }
        if let Some(missing) = seen.iter().position(|seen| !seen) {
            return Err(Error::Construction(format!("row {missing} is in no group")));
        }

        let mut balancer = Self {
            order: (0..groups.len()).collect(),
            cursors: vec![0; groups.len()],
            groups,
            position: 0,
            visited: Visited::new(len),
            options,
            rng: make_rng(options.seed),
            exhausted_group: None,
            draws: 0,
        };
        balancer.start_epoch();
        Ok(balancer)
    }

    /// Number of groups
    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Group whose exhaustion stopped the balancer, if any
    pub fn exhausted_group(&self) -> Option<usize> {
        self.exhausted_group
    }

    fn start_epoch(&mut self) {
        if self.options.shuffle {
            for group in &mut self.groups {
                group.shuffle(&mut self.rng);
            }
        }
        if self.options.shuffle_groups {
            self.order.shuffle(&mut self.rng);
        }
        self.cursors.iter_mut().for_each(|cursor| *cursor = 0);
        self.position = 0;
        self.visited.clear();
        self.exhausted_group = None;
    }

    fn restart_group(&mut self, group: usize) {
        if self.options.shuffle {
            self.groups[group].shuffle(&mut self.rng);
        }
        self.cursors[group] = 0;
    }
}

impl IndexSampler for GroupBalancer {
    fn next_index(&mut self) -> Result<SampleIndex> {
        if self.visited.is_complete() {
            if self.options.raise_on_end {
                return Err(Error::EndOfEpoch);
            }
            debug!("group balancer rolling over after {} draws", self.draws);
            self.start_epoch();
        }

        let group = self.order[self.position];
        if self.cursors[group] >= self.groups[group].len() {
            if self.options.raise_on_group_end {
                self.exhausted_group = Some(group);
                return Err(Error::EndOfEpoch);
            }
            trace!("group {} exhausted, restarting it", group);
            self.restart_group(group);
        }

        let index = self.groups[group][self.cursors[group]];
        self.cursors[group] += 1;
        self.position = (self.position + 1) % self.order.len();
        self.visited.insert(index);

        self.draws += 1;
        if self.draws % PROGRESS_EVERY == 0 {
            trace!("visited {} of {}", self.visited.count(), self.epoch_len());
        }
        Ok(SampleIndex::One(index))
    }

    fn reset(&mut self) {
        self.start_epoch();
        self.draws = 0;
    }

    fn visited_count(&self) -> usize {
        self.visited.count()
    }

    fn epoch_len(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }
}
