//! The evaluator contract: the sole mandatory external interface.
//!
//! The colony never calls the objective function itself. It hands a batch
//! of `(worker, params)` records to an [`Evaluator`] and expects back, in
//! the same order, one value per record.

use rayon::prelude::*;

/// Stable identity of a worker (simplex) inside a [`crate::colony::Colony`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(pub usize);

/// One candidate point awaiting an objective value.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub worker: WorkerId,
    pub params: Vec<f64>,
}

/// A bounded batch of [`EvaluationRequest`]s, in the order they must be
/// answered.
pub type EvaluationChunk = Vec<EvaluationRequest>;

/// Computes objective values for a chunk of candidate points.
///
/// Implementations must return exactly one finite-or-not value per entry,
/// in the same order as the chunk (the batch must not be reordered). The
/// objective itself must be thread-safe if the implementation evaluates
/// entries concurrently; the colony has no internal locks because it is
/// single-threaded and only ever touches the chunk between `run()` calls.
pub trait Evaluator {
    fn evaluate(&mut self, chunk: &EvaluationChunk) -> Vec<f64>;
}

/// Evaluates a chunk one entry at a time, in order, via a plain closure.
///
/// Useful for deterministic tests and for objectives that are themselves
/// cheap enough that parallel dispatch isn't worth the overhead.
pub struct SequentialEvaluator<F>
where
    F: FnMut(&[f64]) -> f64,
{
    f: F,
}

impl<F> SequentialEvaluator<F>
where
    F: FnMut(&[f64]) -> f64,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Evaluator for SequentialEvaluator<F>
where
    F: FnMut(&[f64]) -> f64,
{
    fn evaluate(&mut self, chunk: &EvaluationChunk) -> Vec<f64> {
        chunk.iter().map(|req| (self.f)(&req.params)).collect()
    }
}

/// Evaluates a chunk with `rayon`'s `par_iter`, for objectives expensive
/// enough that parallel dispatch pays for itself. The closure must be
/// `Sync`: it may run concurrently across the chunk's entries.
pub struct RayonEvaluator<F>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    f: F,
}

impl<F> RayonEvaluator<F>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Evaluator for RayonEvaluator<F>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    fn evaluate(&mut self, chunk: &EvaluationChunk) -> Vec<f64> {
        chunk.par_iter().map(|req| (self.f)(&req.params)).collect()
    }
}
