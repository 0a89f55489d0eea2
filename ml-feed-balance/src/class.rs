//! Per-class round robin balancer
//!
//! Rows are partitioned by class and classes are visited cyclically, one
//! draw each, so every class is drawn equally often regardless of how many
//! rows it has. Small classes wrap around while large ones are still being
//! walked; the epoch ends once every row has been drawn at least once.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use ml_feed_core::{Error, IndexSampler, Result, SampleIndex};

use crate::epoch::{make_rng, EpochOptions, Visited, PROGRESS_EVERY};

/// How a label row is mapped to its class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassAssignment {
    /// Exactly one entry of the row is `1`, the rest `0`
    #[default]
    OneHot,
    /// The class is the position of the largest score (first one on ties)
    Argmax,
}

impl ClassAssignment {
    fn classify(self, row: &[f32]) -> Option<usize> {
        match self {
            ClassAssignment::OneHot => {
                let mut hot = row.iter().enumerate().filter(|(_, &v)| v != 0.0);
                match (hot.next(), hot.next()) {
                    (Some((class, &v)), None) if (v - 1.0).abs() < f32::EPSILON => Some(class),
                    _ => None,
                }
            }
            ClassAssignment::Argmax => {
                let mut best: Option<(usize, f32)> = None;
                for (class, &score) in row.iter().enumerate() {
                    if score.is_nan() {
                        continue;
                    }
                    if best.map_or(true, |(_, top)| score > top) {
                        best = Some((class, score));
                    }
                }
                best.map(|(class, _)| class)
            }
        }
    }
}

/// Round robin over classes of a label matrix
#[derive(Debug)]
pub struct ClassBalancer {
    classes: Vec<usize>,
    num_classes: usize,
    options: EpochOptions,
    rng: StdRng,
    per_class: Vec<Vec<usize>>,
    cursors: Vec<usize>,
    current_class: usize,
    visited: Visited,
    draws: usize,
}

impl ClassBalancer {
    /// Build from a `(rows, classes)` label matrix
    pub fn new<R: AsRef<[f32]>>(
        matrix: &[R],
        assignment: ClassAssignment,
        options: EpochOptions,
    ) -> Result<Self> {
        let num_classes = matrix
            .first()
            .map(|row| row.as_ref().len())
            .ok_or_else(|| Error::Construction("label matrix has no rows".into()))?;

        let classes = matrix
            .iter()
            .enumerate()
            .map(|(index, row)| {
                let row = row.as_ref();
                if row.len() != num_classes {
                    return Err(Error::Construction(format!(
                        "label row {} has {} columns, expected {}",
                        index,
                        row.len(),
                        num_classes
                    )));
                }
                assignment.classify(row).ok_or_else(|| {
                    Error::Construction(format!("label row {index} does not name exactly one class"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_classes(classes, num_classes, options)
    }

    /// Build from one class id per row
    pub fn from_classes(classes: Vec<usize>, num_classes: usize, options: EpochOptions) -> Result<Self> {
        if num_classes == 0 {
            return Err(Error::Construction("at least one class is required".into()));
        }
        let mut counts = vec![0usize; num_classes];
        for (index, &class) in classes.iter().enumerate() {
            let count = counts.get_mut(class).ok_or_else(|| {
                Error::Construction(format!(
                    "row {index} has class {class}, only {num_classes} classes declared"
                ))
            })?;
            *count += 1;
        }
        if let Some(empty) = counts.iter().position(|&count| count == 0) {
            return Err(Error::Construction(format!("class {empty} has no members")));
        }

        let len = classes.len();
        let mut balancer = Self {
            classes,
            num_classes,
            options,
            rng: make_rng(options.seed),
            per_class: Vec::new(),
            cursors: Vec::new(),
            current_class: 0,
            visited: Visited::new(len),
            draws: 0,
        };
        balancer.start_epoch();
        Ok(balancer)
    }

    /// Number of classes
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Class the next draw will come from
    pub fn current_class(&self) -> usize {
        self.current_class
    }

    /// Repartition rows (in a fresh permutation when shuffling) and rewind cursors.
    ///
    /// The class pointer is left alone so the rotation is not disturbed.
    fn start_epoch(&mut self) {
        let mut perm: Vec<usize> = (0..self.classes.len()).collect();
        if self.options.shuffle {
            perm.shuffle(&mut self.rng);
        }

        self.per_class = vec![Vec::new(); self.num_classes];
        for index in perm {
            self.per_class[self.classes[index]].push(index);
        }
        self.cursors = vec![0; self.num_classes];
        self.visited.clear();
    }
}

impl IndexSampler for ClassBalancer {
    fn next_index(&mut self) -> Result<SampleIndex> {
        if self.visited.is_complete() {
            if self.options.raise_on_end {
                return Err(Error::EndOfEpoch);
            }
            debug!("class balancer rolling over after {} draws", self.draws);
            self.start_epoch();
        }

        let class = self.current_class;
        let members = &self.per_class[class];
        let index = members[self.cursors[class]];

        self.cursors[class] = (self.cursors[class] + 1) % members.len();
        self.current_class = (class + 1) % self.num_classes;
        self.visited.insert(index);

        self.draws += 1;
        if self.draws % PROGRESS_EVERY == 0 {
            trace!("visited {} of {}", self.visited.count(), self.classes.len());
        }
        Ok(SampleIndex::One(index))
    }

    fn reset(&mut self) {
        self.start_epoch();
        self.current_class = 0;
        self.draws = 0;
    }

    fn visited_count(&self) -> usize {
        self.visited.count()
    }

    fn epoch_len(&self) -> usize {
        self.classes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn one_hot(classes: &[usize], num_classes: usize) -> Vec<Vec<f32>> {
        classes
            .iter()
            .map(|&class| {
                let mut row = vec![0.0; num_classes];
                row[class] = 1.0;
                row
            })
            .collect()
    }

    fn skewed_classes(population: &[usize]) -> Vec<usize> {
        population
            .iter()
            .enumerate()
            .flat_map(|(class, &count)| std::iter::repeat(class).take(count))
            .collect()
    }

    #[test]
    fn test_skewed_population_is_balanced() {
        let classes = skewed_classes(&[2, 5, 1]);
        let matrix = one_hot(&classes, 3);
        let mut balancer = ClassBalancer::new(&matrix, ClassAssignment::OneHot, EpochOptions::default()).unwrap();

        let mut counts = [0; 3];
        for _ in 0..30 {
            let index = balancer.next_index().unwrap().as_one().unwrap();
            counts[classes[index]] += 1;
        }
        assert_eq!(counts, [10, 10, 10]);
    }

    #[test]
    fn test_alternates_classes_in_order() {
        let classes = vec![0, 0, 0, 1, 1, 1];
        let mut balancer =
            ClassBalancer::from_classes(classes.clone(), 2, EpochOptions::sequential()).unwrap();
        let drawn: Vec<usize> = (0..6)
            .map(|_| balancer.next_index().unwrap().as_one().unwrap())
            .collect();
        assert_eq!(drawn, vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_raise_on_end_after_all_rows_visited() {
        let options = EpochOptions::sequential().with_raise_on_end(true);
        let mut balancer = ClassBalancer::from_classes(vec![0, 1, 1, 1], 2, options).unwrap();
        for _ in 0..6 {
            balancer.next_index().unwrap();
        }
        assert_eq!(balancer.visited_count(), 4);
        assert!(balancer.next_index().unwrap_err().is_end_of_epoch());
        balancer.reset();
        assert_eq!(balancer.next_index().unwrap(), SampleIndex::One(0));
    }

    #[test]
    fn test_argmax_assignment() {
        let matrix = vec![vec![0.1, 0.7, 0.2], vec![0.9, 0.05, 0.05], vec![0.2, 0.2, 0.6]];
        let mut balancer = ClassBalancer::new(&matrix, ClassAssignment::Argmax, EpochOptions::sequential()).unwrap();
        let drawn: Vec<usize> = (0..3)
            .map(|_| balancer.next_index().unwrap().as_one().unwrap())
            .collect();
        assert_eq!(drawn, vec![1, 0, 2]);
    }

    #[test_case(vec![vec![1.0, 1.0]] ; "two hot entries")]
    #[test_case(vec![vec![0.0, 0.0]] ; "no hot entry")]
    #[test_case(vec![vec![1.0, 0.0], vec![1.0]] ; "ragged rows")]
    #[test_case(vec![vec![1.0, 0.0], vec![1.0, 0.0]] ; "empty class")]
    #[test_case(Vec::new() ; "no rows")]
    fn test_construction_errors(matrix: Vec<Vec<f32>>) {
        let err = ClassBalancer::new(&matrix, ClassAssignment::OneHot, EpochOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Construction(_)));
    }

    proptest! {
        #[test]
        fn prop_every_window_has_each_class(
            population in proptest::collection::vec(1usize..8, 1..6),
            seed: u64,
            start in 0usize..40,
        ) {
            let classes = skewed_classes(&population);
            let num_classes = population.len();
            let options = EpochOptions::default().with_seed(seed);
            let mut balancer = ClassBalancer::from_classes(classes.clone(), num_classes, options).unwrap();

            for _ in 0..start {
                balancer.next_index().unwrap();
            }
            let mut window: Vec<usize> = (0..num_classes)
                .map(|_| classes[balancer.next_index().unwrap().as_one().unwrap()])
                .collect();
            window.sort_unstable();
            prop_assert_eq!(window, (0..num_classes).collect::<Vec<_>>());
        }
    }
}
