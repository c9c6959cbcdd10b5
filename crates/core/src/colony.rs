//! The colony: a cooperative, single-threaded scheduler that multiplexes
//! N simplexes against one shared, bounded evaluation queue.
//!
//! There are no locks. The colony only ever touches its queues between
//! `run()` and `submit()` calls; the caller is responsible for handing the
//! chunk returned by `chunk()` to an [`crate::evaluator::Evaluator`] and
//! feeding the results back via `submit()` before calling `run()` again.

use std::collections::VecDeque;

use crate::config::SimplexConfig;
use crate::error::Result;
use crate::evaluator::{EvaluationChunk, EvaluationRequest, WorkerId};
use crate::simplex::{Simplex, SimplexStep};

/// What `run()` left the colony waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColonyState {
    /// `chunk()` holds a batch that needs evaluating; call `submit()` with
    /// the results, then `run()` again.
    NeedsEvaluation,
    /// Every worker has finished. `best_list`/worker state reflects the
    /// final run; call `restart()` to start another.
    Finished,
}

/// A generation's worth of Nelder-Mead simplexes, scheduled cooperatively.
pub struct Colony {
    workers: Vec<Simplex>,
    chunk_size: usize,
    lazy_workers: bool,

    task_queue: VecDeque<WorkerId>,
    eval_queue: VecDeque<EvaluationRequest>,
    outstanding_chunk: Option<EvaluationChunk>,

    started: Vec<bool>,
    expected_batch_len: Vec<usize>,
    pending_results: Vec<Vec<f64>>,
    finished: Vec<bool>,
    finished_count: usize,

    best_list: Vec<Vec<f64>>,
}

impl Colony {
    /// Allocates `population` simplexes of dimension `lower.len()`, with
    /// fresh identities `worker_0 ..= worker_{population-1}` and
    /// independent RNG streams derived from `seed`. Each worker starts with
    /// a random initial simplex; call `restart()` before the first `run()`.
    pub fn create(
        population: usize,
        lower: Vec<f64>,
        upper: Vec<f64>,
        config: SimplexConfig,
        seed: u64,
        chunk_size: usize,
        lazy_workers: bool,
    ) -> Result<Self> {
        let mut workers = Vec::with_capacity(population);
        for i in 0..population {
            let worker_seed = seed.wrapping_add(i as u64 + 1);
            let mut simplex = Simplex::new(format!("worker_{i}"), lower.clone(), upper.clone(), config.clone(), worker_seed)?;
            simplex.initial_vectors_random();
            workers.push(simplex);
        }
        Ok(Self::from_workers(workers, chunk_size, lazy_workers))
    }

    /// Builds a colony from already-constructed workers, e.g. ones with
    /// per-worker heterogeneous `SimplexConfig`s that `create()` (which
    /// applies one config to every worker) can't express.
    pub fn from_workers(workers: Vec<Simplex>, chunk_size: usize, lazy_workers: bool) -> Self {
        let n = workers.len();
        Self {
            workers,
            chunk_size: chunk_size.max(1),
            lazy_workers,
            task_queue: VecDeque::new(),
            eval_queue: VecDeque::new(),
            outstanding_chunk: None,
            started: vec![false; n],
            expected_batch_len: vec![0; n],
            pending_results: vec![Vec::new(); n],
            finished: vec![false; n],
            finished_count: 0,
            best_list: vec![Vec::new(); n],
        }
    }

    pub fn workers(&self) -> &[Simplex] {
        &self.workers
    }

    pub fn workers_mut(&mut self) -> &mut [Simplex] {
        &mut self.workers
    }

    pub fn population(&self) -> usize {
        self.workers.len()
    }

    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size.max(1);
    }

    /// Per-step best-value trace for every worker during the last run,
    /// padded to equal length by repeating each worker's last value.
    pub fn best_list(&self) -> &[Vec<f64>] {
        &self.best_list
    }

    pub fn total_evaluations(&self) -> u64 {
        self.workers.iter().map(|w| w.evaluation_count()).sum()
    }

    /// Applies new bounds to every worker (the colony-wide search box).
    pub fn set_bounds(&mut self, lower: Vec<f64>, upper: Vec<f64>) {
        for worker in &mut self.workers {
            worker.set_bounds(lower.clone(), upper.clone());
        }
    }

    /// Enqueues each simplex's `begin` operation on the task queue, ready
    /// for the next `run()`.
    #[tracing::instrument(skip(self))]
    pub fn restart(&mut self) {
        let n = self.workers.len();
        self.task_queue = (0..n).map(WorkerId).collect();
        self.eval_queue.clear();
        self.outstanding_chunk = None;
        self.started = vec![false; n];
        self.expected_batch_len = vec![0; n];
        self.pending_results = vec![Vec::new(); n];
        self.finished = vec![false; n];
        self.finished_count = 0;
        self.best_list = vec![Vec::new(); n];
    }

    /// The chunk `run()` most recently handed out; empty if none is
    /// outstanding.
    pub fn chunk(&self) -> &[EvaluationRequest] {
        self.outstanding_chunk.as_deref().unwrap_or(&[])
    }

    /// Feeds back one value per entry of the outstanding chunk, in order.
    pub fn submit(&mut self, values: &[f64]) {
        let chunk = self.outstanding_chunk.take().expect("submit() called with no chunk outstanding");
        debug_assert_eq!(values.len(), chunk.len());
        for (request, &value) in chunk.iter().zip(values) {
            let idx = request.worker.0;
            if self.finished[idx] {
                continue; // force-finished mid-flight by a lazy sibling; drop the stale result
            }
            self.pending_results[idx].push(value);
            if self.pending_results[idx].len() == self.expected_batch_len[idx] {
                self.task_queue.push_back(request.worker);
            }
        }
    }

    /// Drains the task queue until either a chunk is ready for evaluation
    /// or every worker has finished.
    #[tracing::instrument(skip(self))]
    pub fn run(&mut self) -> ColonyState {
        debug_assert!(self.outstanding_chunk.is_none(), "run() called with a chunk still outstanding");
        loop {
            if self.task_queue.is_empty() {
                if self.eval_queue.is_empty() {
                    self.pad_best_lists();
                    return ColonyState::Finished;
                }
                let chunk: EvaluationChunk = self.eval_queue.drain(..).collect();
                self.outstanding_chunk = Some(chunk);
                return ColonyState::NeedsEvaluation;
            }

            if let Some(chunk) = self.try_build_chunk() {
                self.outstanding_chunk = Some(chunk);
                return ColonyState::NeedsEvaluation;
            }

            self.execute_next_task();
        }
    }

    /// `chunk_ready()`, applied only when both queues are non-empty: packs
    /// the front task's own requests uncapped, then opportunistically tops
    /// up from other workers; otherwise packs exactly `chunk_size` entries
    /// in FIFO order (which may leave a worker's later requests for the
    /// next chunk).
    fn try_build_chunk(&mut self) -> Option<EvaluationChunk> {
        let front_task_worker = *self.task_queue.front()?;
        let front_eval_worker = self.eval_queue.front()?.worker;

        if front_eval_worker == front_task_worker {
            let mut chunk = Vec::new();
            while matches!(self.eval_queue.front(), Some(r) if r.worker == front_eval_worker) {
                chunk.push(self.eval_queue.pop_front().unwrap());
            }
            while chunk.len() < self.chunk_size {
                match self.eval_queue.pop_front() {
                    Some(req) => chunk.push(req),
                    None => break,
                }
            }
            Some(chunk)
        } else if self.eval_queue.len() >= self.chunk_size {
            Some(self.eval_queue.drain(..self.chunk_size).collect())
        } else {
            None
        }
    }

    fn execute_next_task(&mut self) {
        let worker_id = self.task_queue.pop_front().expect("caller checked task_queue non-empty");
        let idx = worker_id.0;
        if self.finished[idx] {
            return;
        }

        let step = if !self.started[idx] {
            self.started[idx] = true;
            SimplexStep::Request(self.workers[idx].begin())
        } else {
            let values = std::mem::take(&mut self.pending_results[idx]);
            self.workers[idx].advance(&values)
        };

        if let Some(best) = self.workers[idx].best_value() {
            self.best_list[idx].push(best);
        }

        match step {
            SimplexStep::Request(points) => {
                self.expected_batch_len[idx] = points.len();
                for params in points {
                    self.eval_queue.push_back(EvaluationRequest { worker: worker_id, params });
                }
            }
            SimplexStep::Finished => {
                self.finished[idx] = true;
                self.finished_count += 1;
                tracing::info!(worker = %self.workers[idx].tag(), "worker finished");
                if self.lazy_workers && self.workers.len() > 1 {
                    self.force_finish_all_others(worker_id);
                }
            }
        }
    }

    fn force_finish_all_others(&mut self, keep: WorkerId) {
        for (i, worker) in self.workers.iter_mut().enumerate() {
            if i != keep.0 && !self.finished[i] {
                worker.force_finish();
                self.finished[i] = true;
                self.finished_count += 1;
            }
        }
        self.task_queue.clear();
        self.eval_queue.clear();
    }

    fn pad_best_lists(&mut self) {
        let max_len = self.best_list.iter().map(|v| v.len()).max().unwrap_or(0);
        for list in &mut self.best_list {
            if let Some(&last) = list.last() {
                while list.len() < max_len {
                    list.push(last);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{Evaluator, SequentialEvaluator};

    fn sphere_colony(population: usize, dim: usize, chunk_size: usize, lazy_workers: bool) -> Colony {
        let config = SimplexConfig { max_evaluations: 300, ..SimplexConfig::default() };
        Colony::create(population, vec![-10.0; dim], vec![10.0; dim], config, 0, chunk_size, lazy_workers).unwrap()
    }

    fn run_to_completion(colony: &mut Colony, evaluator: &mut impl Evaluator) {
        colony.restart();
        loop {
            match colony.run() {
                ColonyState::Finished => break,
                ColonyState::NeedsEvaluation => {
                    let chunk = colony.chunk().to_vec();
                    let values = evaluator.evaluate(&chunk);
                    colony.submit(&values);
                }
            }
        }
    }

    #[test]
    fn restart_then_run_yields_a_chunk_before_finishing() {
        let mut colony = sphere_colony(3, 2, 1, false);
        colony.restart();
        assert_eq!(colony.run(), ColonyState::NeedsEvaluation);
        assert!(!colony.chunk().is_empty());
    }

    #[test]
    fn converges_with_sequential_evaluator_chunk_size_one() {
        let mut colony = sphere_colony(4, 2, 1, false);
        let mut evaluator = SequentialEvaluator::new(|p: &[f64]| p.iter().map(|x| x * x).sum());
        run_to_completion(&mut colony, &mut evaluator);
        let best = colony.workers().iter().filter_map(|w| w.best_value()).fold(f64::INFINITY, f64::min);
        assert!(best <= 1e-4, "best={best}");
    }

    #[test]
    fn converges_with_a_large_packing_chunk_size() {
        let mut colony = sphere_colony(6, 3, 16, false);
        let mut evaluator = SequentialEvaluator::new(|p: &[f64]| p.iter().map(|x| x * x).sum());
        run_to_completion(&mut colony, &mut evaluator);
        let best = colony.workers().iter().filter_map(|w| w.best_value()).fold(f64::INFINITY, f64::min);
        assert!(best <= 1e-3, "best={best}");
    }

    #[test]
    fn lazy_workers_stops_every_sibling_once_one_finishes() {
        // one worker with a tiny evaluation budget finishes almost
        // immediately and should force-finish the rest.
        let lower = vec![-10.0, -10.0];
        let upper = vec![10.0, 10.0];
        let mut fast = Simplex::new("worker_0", lower.clone(), upper.clone(), SimplexConfig { max_evaluations: 4, ..SimplexConfig::default() }, 1).unwrap();
        fast.initial_vectors_scalar(vec![0.0, 0.0], 1.0);
        let mut slow = Simplex::new("worker_1", lower, upper, SimplexConfig { max_evaluations: 5000, ..SimplexConfig::default() }, 2).unwrap();
        slow.initial_vectors_scalar(vec![5.0, 5.0], 1.0);

        let mut colony = Colony::from_workers(vec![fast, slow], 1, true);
        let mut evaluator = SequentialEvaluator::new(|p: &[f64]| p.iter().map(|x| x * x).sum());
        run_to_completion(&mut colony, &mut evaluator);

        assert!(colony.workers()[1].evaluation_count() < 5000);
        assert!(colony.finished.iter().all(|&f| f));
    }

    #[test]
    fn best_list_is_padded_to_equal_length_across_workers() {
        let mut colony = sphere_colony(3, 2, 1, false);
        let mut evaluator = SequentialEvaluator::new(|p: &[f64]| p.iter().map(|x| x * x).sum());
        run_to_completion(&mut colony, &mut evaluator);
        let lens: Vec<usize> = colony.best_list().iter().map(|l| l.len()).collect();
        assert!(lens.windows(2).all(|w| w[0] == w[1]), "{lens:?}");
    }
}
