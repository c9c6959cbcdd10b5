//! The generational layer: recombines simplexes between colony runs.
//!
//! [`Genetics`] exclusively owns a [`Colony`]; the colony exclusively owns
//! its workers. Between runs, `on_colony_finished` snapshots every worker's
//! vertices, ranks them by fitness, optionally shrinks the search box, and
//! reproduces a new generation of initial simplexes before restarting the
//! colony.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::colony::{Colony, ColonyState};
use crate::config::{FitnessMode, GeneticsConfig, MarriageMode, ReproductionMode, ShrinkMode};
use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::rng::get_rng;
use crate::vertex::Vertex;

/// Outcome of one `on_colony_finished` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneticsState {
    /// A new generation was seeded; restart the colony and keep running.
    Continuing,
    /// Termination condition met; `best_value`/`best_params` are final.
    Finished,
}

pub struct Genetics {
    colony: Colony,
    config: GeneticsConfig,
    rng: ChaCha8Rng,
    generation: u64,
    total_evaluations: u64,
    /// One entry per generation so far, each a snapshot of every worker's
    /// D+1 vertices at the moment the colony finished that generation.
    history: Vec<Vec<Vec<Vertex>>>,
    best: Option<(f64, Vec<f64>, usize)>,
}

impl Genetics {
    pub fn new(config: GeneticsConfig) -> Result<Self> {
        config.validate()?;
        let colony = Colony::create(
            config.population,
            config.lower.clone(),
            config.upper.clone(),
            config.simplex.clone(),
            config.seed,
            config.evaluation_chunk_size,
            config.lazy_workers,
        )?;
        Ok(Self {
            colony,
            rng: get_rng(config.seed.wrapping_add(0x9E37_79B9)),
            generation: 1,
            total_evaluations: 0,
            history: Vec::new(),
            best: None,
            config,
        })
    }

    pub fn colony(&self) -> &Colony {
        &self.colony
    }

    pub fn colony_mut(&mut self) -> &mut Colony {
        &mut self.colony
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn total_evaluations(&self) -> u64 {
        self.total_evaluations
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best.as_ref().map(|(v, _, _)| *v)
    }

    pub fn best_params(&self) -> Option<&[f64]> {
        self.best.as_ref().map(|(_, p, _)| p.as_slice())
    }

    pub fn best_worker(&self) -> Option<usize> {
        self.best.as_ref().map(|(_, _, w)| w)
    }

    /// Drives the colony to completion, calling `on_colony_finished` every
    /// time a generation completes, until the genetic layer terminates.
    pub fn run_to_completion<E: Evaluator>(&mut self, evaluator: &mut E) {
        self.colony.restart();
        loop {
            match self.colony.run() {
                ColonyState::NeedsEvaluation => {
                    let chunk = self.colony.chunk().to_vec();
                    let values = evaluator.evaluate(&chunk);
                    self.colony.submit(&values);
                }
                ColonyState::Finished => {
                    if self.on_colony_finished() == GeneticsState::Finished {
                        break;
                    }
                }
            }
        }
    }

    /// Snapshot -> termination check -> fitness -> (shrink | evolve) ->
    /// restart. The single outer transition the colony loop drives.
    #[tracing::instrument(skip(self))]
    pub fn on_colony_finished(&mut self) -> GeneticsState {
        self.snapshot();

        if self.generation > self.config.max_generations || self.total_evaluations >= self.config.max_evaluations {
            self.finalize_best();
            tracing::info!(
                generation = self.generation,
                evaluations = self.total_evaluations,
                best = self.best_value(),
                "genetics finished"
            );
            return GeneticsState::Finished;
        }

        let order = self.fitness_order();

        let shrink_due = self.config.shrink_per_generations > 0 && self.generation % self.config.shrink_per_generations == 0;
        if shrink_due {
            let king = order[0];
            let king_params = self.colony.workers()[king]
                .best_params()
                .expect("king has at least one evaluated vertex")
                .to_vec();
            self.shrink_boundaries(&king_params);

            if self.config.reset_on_shrink {
                self.generation += 1;
                for worker in self.colony.workers_mut() {
                    worker.initial_vectors_random();
                }
                self.colony.restart();
                return GeneticsState::Continuing;
            }
        }

        self.evolve(&order);
        self.colony.restart();
        GeneticsState::Continuing
    }

    fn snapshot(&mut self) {
        let generation: Vec<Vec<Vertex>> = self.colony.workers().iter().map(|w| w.vertices().to_vec()).collect();
        self.total_evaluations += self.colony.total_evaluations();
        self.history.push(generation);
    }

    fn current_snapshot(&self) -> &Vec<Vec<Vertex>> {
        self.history.last().expect("snapshot() runs before fitness ranking")
    }

    fn fitness_order(&self) -> Vec<usize> {
        let fitness: Vec<f64> = (0..self.config.population).map(|i| self.fitness(i)).collect();
        let mut order: Vec<usize> = (0..self.config.population).collect();
        order.sort_by(|&a, &b| fitness[a].partial_cmp(&fitness[b]).unwrap_or(std::cmp::Ordering::Equal));
        order
    }

    /// `Min`/`Average` read only the snapshot just taken. `Max` scans the
    /// worst vertex across every generation recorded so far (a documented
    /// asymmetry carried over unchanged, see DESIGN.md).
    fn fitness(&self, worker_idx: usize) -> f64 {
        match self.config.fitness {
            FitnessMode::Min => self.current_snapshot()[worker_idx][0].value.finite().unwrap_or(f64::INFINITY),
            FitnessMode::Max => self
                .history
                .iter()
                .filter_map(|generation| generation[worker_idx].last())
                .filter_map(|v| v.value.finite())
                .fold(f64::NEG_INFINITY, f64::max),
            FitnessMode::Average => {
                let snapshot = &self.current_snapshot()[worker_idx];
                let sum: f64 = snapshot.iter().filter_map(|v| v.value.finite()).sum();
                sum / snapshot.len() as f64
            }
        }
    }

    fn shrink_boundaries(&mut self, king_params: &[f64]) {
        let mut lower = self.config.lower.clone();
        let mut upper = self.config.upper.clone();
        match self.config.shrink_mode {
            ShrinkMode::ShrinkAround => {
                for i in 0..self.config.dim() {
                    let span = upper[i] - lower[i];
                    upper[i] = king_params[i] + span * self.config.shrink_factor_boundary;
                    lower[i] = king_params[i] - span * self.config.shrink_factor_boundary;
                }
            }
            ShrinkMode::ChangeLowerIfNeg => {
                for i in 0..self.config.dim() {
                    if lower[i] < 0.0 {
                        lower[i] = king_params[i];
                    }
                }
            }
        }
        tracing::debug!(?lower, ?upper, "boundaries shrunk around king");
        self.config.lower = lower.clone();
        self.config.upper = upper.clone();
        self.colony.set_bounds(lower, upper);
    }

    fn marriage_pairs(&mut self, order: &[usize]) -> Vec<(usize, usize)> {
        let n = order.len();
        let num_pairs = n.div_ceil(2);
        match self.config.marriage {
            MarriageMode::KingHenry => {
                let king = order[0];
                (0..num_pairs).map(|k| (king, order[(k + 1).min(n - 1)])).collect()
            }
            MarriageMode::Hierarchical => (0..num_pairs)
                .map(|k| {
                    let a = order[2 * k];
                    let b = if 2 * k + 1 < n { order[2 * k + 1] } else { order[0] };
                    (a, b)
                })
                .collect(),
            MarriageMode::BestWorst => (0..num_pairs)
                .map(|k| {
                    let a = order[k];
                    let opposite = n - 1 - k;
                    let b = if opposite != k { order[opposite] } else { order[0] };
                    (a, b)
                })
                .collect(),
            MarriageMode::Random => (0..num_pairs)
                .map(|_| {
                    if n == 1 {
                        return (order[0], order[0]);
                    }
                    let a = self.rng.random_range(0..n);
                    let mut b = self.rng.random_range(0..n);
                    while b == a {
                        b = self.rng.random_range(0..n);
                    }
                    (order[a], order[b])
                })
                .collect(),
            MarriageMode::RandomPreferable => (0..num_pairs)
                .map(|_| {
                    if n == 1 {
                        return (order[0], order[0]);
                    }
                    let a = Self::fitter_of_two(&mut self.rng, n);
                    let mut b = Self::fitter_of_two(&mut self.rng, n);
                    while b == a {
                        b = Self::fitter_of_two(&mut self.rng, n);
                    }
                    (order[a], order[b])
                })
                .collect(),
        }
    }

    fn fitter_of_two(rng: &mut ChaCha8Rng, n: usize) -> usize {
        let i = rng.random_range(0..n);
        let j = rng.random_range(0..n);
        i.min(j)
    }

    fn evolve(&mut self, order: &[usize]) {
        self.generation += 1;
        let generation = self.generation;
        let pairs = self.marriage_pairs(order);
        let population = self.config.population;

        for (k, (parent_a, parent_b)) in pairs.into_iter().enumerate() {
            let slot1 = 2 * k;
            let slot2 = 2 * k + 1;
            let has_second_child = slot2 < population;
            let (child1, child2) = self.reproduce_pair(parent_a, parent_b, has_second_child);

            let worker1 = &mut self.colony.workers_mut()[slot1];
            worker1.set_tag(format!("worker_{slot1}_G{generation}"));
            worker1.set_vertices(child1);

            if let Some(child2) = child2 {
                let worker2 = &mut self.colony.workers_mut()[slot2];
                worker2.set_tag(format!("worker_{slot2}_G{generation}"));
                worker2.set_vertices(child2);
            }
        }
    }

    /// Produces the vertex lists for up to two children of `(parent_a,
    /// parent_b)`. Per coordinate and vertex, a `reproduction_percent` gate
    /// decides whether crossover applies at all; below the gate both
    /// children simply inherit parent-0's coordinate.
    fn reproduce_pair(&mut self, parent_a: usize, parent_b: usize, has_second_child: bool) -> (Vec<Vertex>, Option<Vec<Vertex>>) {
        let dim = self.config.dim();
        let snapshot = self.current_snapshot();
        let vertices_a = snapshot[parent_a].clone();
        let vertices_b = snapshot[parent_b].clone();

        let effective_mode = match self.config.reproduction {
            ReproductionMode::RandomType => {
                if self.rng.random_bool(0.5) {
                    ReproductionMode::DiscreteMixing
                } else {
                    ReproductionMode::LinearCombination
                }
            }
            other => other,
        };

        let mut child1 = Vec::with_capacity(dim + 1);
        let mut child2 = Vec::with_capacity(dim + 1);

        for v in 0..=dim {
            let mut p1 = vec![0.0; dim];
            let mut p2 = vec![0.0; dim];
            for p in 0..dim {
                let a = vertices_a[v].params[p];
                let b = vertices_b[v].params[p];
                let gate: f64 = self.rng.random();
                if gate >= self.config.reproduction_percent {
                    p1[p] = a;
                    p2[p] = a;
                    continue;
                }
                match effective_mode {
                    ReproductionMode::DiscreteMixing => {
                        if self.rng.random_bool(0.5) {
                            p1[p] = a;
                            p2[p] = b;
                        } else {
                            p1[p] = b;
                            p2[p] = a;
                        }
                    }
                    ReproductionMode::LinearCombination => {
                        let m: f64 = 2.0 * self.rng.random::<f64>() - 0.5;
                        p1[p] = m * a + (1.0 - m) * b;
                        p2[p] = m * b + (1.0 - m) * a;
                    }
                    ReproductionMode::RandomType => unreachable!("resolved to a concrete mode above"),
                }
            }
            child1.push(Vertex::unevaluated(p1));
            child2.push(Vertex::unevaluated(p2));
        }

        if has_second_child {
            (child1, Some(child2))
        } else {
            (child1, None)
        }
    }

    fn finalize_best(&mut self) {
        let mut best: Option<(f64, Vec<f64>, usize)> = None;
        for generation in &self.history {
            for (worker_idx, vertices) in generation.iter().enumerate() {
                for vertex in vertices {
                    if let Some(value) = vertex.value.finite() {
                        if best.as_ref().map_or(true, |(best_value, _, _)| value < *best_value) {
                            best = Some((value, vertex.params.clone(), worker_idx));
                        }
                    }
                }
            }
        }
        self.best = best;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimplexConfig;
    use crate::evaluator::SequentialEvaluator;

    fn sphere_config(population: usize, dim: usize) -> GeneticsConfig {
        GeneticsConfig {
            population,
            upper: vec![10.0; dim],
            lower: vec![-10.0; dim],
            seed: 7,
            max_generations: 6,
            max_evaluations: 50_000,
            fitness: FitnessMode::Min,
            marriage: MarriageMode::KingHenry,
            reproduction: ReproductionMode::RandomType,
            reproduction_percent: 1.0,
            shrink_per_generations: 0,
            shrink_factor_boundary: 0.5,
            shrink_mode: ShrinkMode::ShrinkAround,
            reset_on_shrink: false,
            evaluation_chunk_size: population,
            lazy_workers: false,
            simplex: SimplexConfig { max_evaluations: 200, ..SimplexConfig::default() },
        }
    }

    #[test]
    fn converges_on_sphere_across_generations() {
        let mut genetics = Genetics::new(sphere_config(6, 3)).unwrap();
        let mut evaluator = SequentialEvaluator::new(|p: &[f64]| p.iter().map(|x| x * x).sum());
        genetics.run_to_completion(&mut evaluator);
        assert!(genetics.best_value().unwrap() <= 1.0, "best={:?}", genetics.best_value());
        assert!(genetics.generation() > 1);
    }

    #[test]
    fn shrinks_the_box_around_the_king_every_other_generation() {
        let mut config = sphere_config(4, 2);
        config.shrink_per_generations = 2;
        config.shrink_mode = ShrinkMode::ShrinkAround;
        config.max_generations = 3;
        let mut genetics = Genetics::new(config).unwrap();
        let original_span = genetics.colony.workers()[0].bounds().1[0] - genetics.colony.workers()[0].bounds().0[0];

        let mut evaluator = SequentialEvaluator::new(|p: &[f64]| p.iter().map(|x| x * x).sum());
        genetics.run_to_completion(&mut evaluator);

        let shrunk_span = genetics.config.upper[0] - genetics.config.lower[0];
        assert!(shrunk_span < original_span);
    }

    #[test]
    fn reset_on_shrink_skips_reproduction_but_still_advances_generation() {
        let mut config = sphere_config(4, 2);
        config.shrink_per_generations = 1;
        config.reset_on_shrink = true;
        config.max_generations = 2;
        let mut genetics = Genetics::new(config).unwrap();
        let mut evaluator = SequentialEvaluator::new(|p: &[f64]| p.iter().map(|x| x * x).sum());
        genetics.run_to_completion(&mut evaluator);
        assert!(genetics.generation() >= 2);
    }

    #[test]
    fn reproduced_workers_are_retagged_with_generation_suffix() {
        let mut genetics = Genetics::new(sphere_config(4, 2)).unwrap();
        let mut evaluator = SequentialEvaluator::new(|p: &[f64]| p.iter().map(|x| x * x).sum());
        genetics.run_to_completion(&mut evaluator);
        assert!(genetics.colony.workers().iter().any(|w| w.tag().contains("_G")));
    }

    #[test]
    fn odd_population_last_pair_produces_a_single_child() {
        let genetics = Genetics::new(sphere_config(5, 2)).unwrap();
        assert_eq!(genetics.colony.population(), 5);
    }
}
