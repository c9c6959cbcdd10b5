//! The per-simplex Nelder-Mead state machine.
//!
//! A [`Simplex`] never calls the objective function itself. `begin()` and
//! `advance()` hand back the candidate points that need evaluating; the
//! caller (the [`crate::colony::Colony`]) is responsible for getting them
//! evaluated and feeding the resulting values back into the next
//! `advance()` call, in the same order they were requested.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::boundary;
use crate::config::SimplexConfig;
use crate::error::{Error, Result};
use crate::rng::get_rng;
use crate::vertex::{compare_vertices, Value, Vertex};

/// What a [`Simplex`] handed back from its last `begin()`/`advance()` call.
#[derive(Debug, Clone)]
pub enum SimplexStep {
    /// Evaluate these candidate points, in order, and feed the results back
    /// into the next `advance()` call.
    Request(Vec<Vec<f64>>),
    /// The simplex has converged or exhausted its evaluation budget.
    Finished,
}

#[derive(Debug, Clone)]
enum Operation {
    /// No initial vectors have been supplied yet.
    Uninitialized,
    /// The D+1 initial vertices are out for evaluation.
    AwaitingInitial,
    /// The reflection point is out for evaluation. `best`/`second_worst`/
    /// `worst` are the pre-reflection vertex values this round started with.
    AwaitingReflect { reflection_point: Vec<f64>, best: f64, second_worst: f64, worst: f64 },
    /// The expansion point is out for evaluation.
    AwaitingExpand { reflection_value: f64, reflection_point: Vec<f64>, expansion_point: Vec<f64> },
    /// The contraction point is out for evaluation.
    AwaitingContract { contract_point: Vec<f64> },
    /// All D shrunk vertices (all but the best) are out for evaluation.
    AwaitingContractAll,
    /// Converged or budget-exhausted; no further requests will be made.
    Finished,
}

/// One Nelder-Mead polytope of `dim + 1` vertices.
pub struct Simplex {
    tag: String,
    dim: usize,
    vertices: Vec<Vertex>,
    p_sum: Vec<f64>,
    iteration_count: u64,
    evaluation_count: u64,
    lower: Vec<f64>,
    upper: Vec<f64>,
    config: SimplexConfig,
    rng: ChaCha8Rng,
    op: Operation,
}

impl Simplex {
    pub fn new(tag: impl Into<String>, lower: Vec<f64>, upper: Vec<f64>, config: SimplexConfig, seed: u64) -> Result<Self> {
        let dim = lower.len();
        if upper.len() != dim {
            return Err(Error::DimensionMismatch { expected: dim, actual: upper.len() });
        }
        for (i, (&lo, &up)) in lower.iter().zip(upper.iter()).enumerate() {
            if !(lo < up) {
                return Err(Error::InvertedBounds { index: i, lower: lo, upper: up });
            }
        }
        config.validate(dim)?;
        Ok(Self {
            tag: tag.into(),
            dim,
            vertices: Vec::new(),
            p_sum: vec![0.0; dim],
            iteration_count: 0,
            evaluation_count: 0,
            lower,
            upper,
            config,
            rng: get_rng(seed),
            op: Operation::Uninitialized,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.tag = tag.into();
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn iteration_count(&self) -> u64 {
        self.iteration_count
    }

    pub fn evaluation_count(&self) -> u64 {
        self.evaluation_count
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn bounds(&self) -> (&[f64], &[f64]) {
        (&self.lower, &self.upper)
    }

    pub fn set_bounds(&mut self, lower: Vec<f64>, upper: Vec<f64>) {
        debug_assert_eq!(lower.len(), self.dim);
        debug_assert_eq!(upper.len(), self.dim);
        self.lower = lower;
        self.upper = upper;
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.op, Operation::Finished)
    }

    pub fn best_value(&self) -> Option<f64> {
        self.vertices.first().and_then(|v| v.value.finite())
    }

    pub fn best_params(&self) -> Option<&[f64]> {
        self.vertices.first().map(|v| v.params.as_slice())
    }

    /// Mean of all D+1 vertices (the full centroid, not excluding the worst).
    pub fn center(&self) -> Vec<f64> {
        let sum = self.compute_psum();
        let n = self.dim as f64 + 1.0;
        sum.iter().map(|s| s / n).collect()
    }

    /// `(1/(D+1)) * sum_i |best[i] - center[i]| / (upper[i] - lower[i])`.
    pub fn relative_size(&self) -> f64 {
        let Some(best) = self.best_params() else { return f64::INFINITY };
        let center = self.center();
        let n = self.dim as f64 + 1.0;
        let sum: f64 = (0..self.dim)
            .map(|i| (best[i] - center[i]).abs() / (self.upper[i] - self.lower[i]))
            .sum();
        sum / n
    }

    /// Euclidean distance from the best vertex to the simplex's centroid.
    pub fn euclidean_size(&self) -> f64 {
        let Some(best) = self.best_params() else { return f64::INFINITY };
        let center = self.center();
        (0..self.dim).map(|i| (best[i] - center[i]).powi(2)).sum::<f64>().sqrt()
    }

    /// Seeds D+1 vertices: `point`, plus D points offset along each axis by
    /// `scale[i]`. Values start unevaluated.
    pub fn initial_vectors_axis(&mut self, point: Vec<f64>, scale: &[f64]) {
        debug_assert_eq!(point.len(), self.dim);
        debug_assert_eq!(scale.len(), self.dim);
        let mut vertices = Vec::with_capacity(self.dim + 1);
        vertices.push(Vertex::unevaluated(point.clone()));
        for i in 0..self.dim {
            let mut p = point.clone();
            p[i] += scale[i];
            vertices.push(Vertex::unevaluated(p));
        }
        self.vertices = vertices;
        self.reset_counters();
    }

    /// Seeds D+1 vertices: `point` plus D points offset by a single scalar
    /// applied to every axis.
    pub fn initial_vectors_scalar(&mut self, point: Vec<f64>, scale: f64) {
        let scales = vec![scale; self.dim];
        self.initial_vectors_axis(point, &scales);
    }

    /// Seeds D+1 vertices drawn uniformly from the box `[lower, upper]^D`.
    pub fn initial_vectors_random(&mut self) {
        let mut vertices = Vec::with_capacity(self.dim + 1);
        for _ in 0..=self.dim {
            let p: Vec<f64> = (0..self.dim)
                .map(|i| self.rng.random_range(self.lower[i]..=self.upper[i]))
                .collect();
            vertices.push(Vertex::unevaluated(p));
        }
        self.vertices = vertices;
        self.reset_counters();
    }

    /// Directly install a full vertex list (used by the genetic layer to
    /// seed a reproduced child). Values are reset to unevaluated.
    pub fn set_vertices(&mut self, mut vertices: Vec<Vertex>) {
        debug_assert_eq!(vertices.len(), self.dim + 1);
        for v in &mut vertices {
            v.value = Value::Unevaluated;
        }
        self.vertices = vertices;
        self.reset_counters();
    }

    /// A reproduced child or a freshly reseeded worker starts a new run
    /// from scratch: its budget and iteration count do not carry over.
    fn reset_counters(&mut self) {
        self.op = Operation::Uninitialized;
        self.iteration_count = 0;
        self.evaluation_count = 0;
    }

    /// Marks all current vertices unevaluated and returns them as the first
    /// evaluation batch. Requires `initial_vectors_*`/`set_vertices` to have
    /// been called first.
    pub fn begin(&mut self) -> Vec<Vec<f64>> {
        debug_assert!(!self.vertices.is_empty(), "begin() called with no initial vectors");
        for v in &mut self.vertices {
            v.value = Value::Unevaluated;
        }
        self.op = Operation::AwaitingInitial;
        self.vertices.iter().map(|v| v.params.clone()).collect()
    }

    /// Forcibly terminate, e.g. because `lazy_workers` caused a sibling to
    /// stop the whole colony. No further requests will be made.
    pub fn force_finish(&mut self) {
        tracing::debug!(worker = %self.tag, "force-finished by colony");
        self.op = Operation::Finished;
    }

    /// Consumes the values requested by the last `begin()`/`advance()` call,
    /// in order, and advances the state machine by one operation.
    #[tracing::instrument(skip(self, values), fields(worker = %self.tag))]
    pub fn advance(&mut self, values: &[f64]) -> SimplexStep {
        let op = std::mem::replace(&mut self.op, Operation::Finished);
        match op {
            Operation::Uninitialized => panic!("advance() called before begin()"),
            Operation::Finished => SimplexStep::Finished,

            Operation::AwaitingInitial => {
                debug_assert_eq!(values.len(), self.dim + 1);
                for (v, &val) in self.vertices.iter_mut().zip(values) {
                    v.value = Value::Evaluated(val);
                }
                self.evaluation_count += self.dim as u64 + 1;
                self.finish_round()
            }

            Operation::AwaitingReflect { reflection_point, best, second_worst, worst } => {
                debug_assert_eq!(values.len(), 1);
                let v_r = values[0];
                self.evaluation_count += 1;
                let worst_idx = self.dim;

                if v_r < worst {
                    self.replace_worst(v_r, reflection_point.clone());
                }

                // Strictly better than best, not merely tying it: a tie falls through to
                // the contract/shrink branches below instead, so a flat region of the
                // objective still drives relative_size down rather than expanding forever.
                if v_r < best {
                    let mut expansion_point = self.extrapolate(worst_idx, self.config.grow_factor);
                    self.apply_boundary(&mut expansion_point);
                    self.op = Operation::AwaitingExpand {
                        reflection_value: v_r,
                        reflection_point,
                        expansion_point: expansion_point.clone(),
                    };
                    SimplexStep::Request(vec![expansion_point])
                } else if v_r >= second_worst {
                    let mut contract_point = self.extrapolate(worst_idx, self.config.shrink_factor);
                    self.apply_boundary(&mut contract_point);
                    self.op = Operation::AwaitingContract { contract_point: contract_point.clone() };
                    SimplexStep::Request(vec![contract_point])
                } else {
                    self.iteration_count += 1;
                    self.finish_round()
                }
            }

            Operation::AwaitingExpand { reflection_value, reflection_point, expansion_point } => {
                debug_assert_eq!(values.len(), 1);
                let v_e = values[0];
                self.evaluation_count += 1;
                if v_e < reflection_value {
                    self.replace_worst(v_e, expansion_point);
                } else {
                    self.replace_worst(reflection_value, reflection_point);
                }
                self.iteration_count += 1;
                self.finish_round()
            }

            Operation::AwaitingContract { contract_point } => {
                debug_assert_eq!(values.len(), 1);
                let v_c = values[0];
                self.evaluation_count += 1;
                let worst_idx = self.dim;
                let current_worst = self.vertices[worst_idx].value.finite().unwrap_or(f64::INFINITY);
                if v_c < current_worst {
                    self.replace_worst(v_c, contract_point);
                    self.iteration_count += 1;
                    self.finish_round()
                } else {
                    self.begin_contract_all()
                }
            }

            Operation::AwaitingContractAll => {
                debug_assert_eq!(values.len(), self.dim);
                for (i, &val) in values.iter().enumerate() {
                    self.vertices[i + 1].value = Value::Evaluated(val);
                }
                self.evaluation_count += self.dim as u64;
                self.iteration_count += 1;
                self.finish_round()
            }
        }
    }

    /// Sum over ALL D+1 vertices, not just the D non-worst ones: the
    /// extrapolation formula below folds the "exclude the worst" average
    /// into the coefficients, so the running sum is always the full sum.
    fn compute_psum(&self) -> Vec<f64> {
        let mut sum = vec![0.0; self.dim];
        for v in &self.vertices {
            for i in 0..self.dim {
                sum[i] += v.params[i];
            }
        }
        sum
    }

    fn replace_worst(&mut self, value: f64, params: Vec<f64>) {
        let worst_idx = self.dim;
        for i in 0..self.dim {
            self.p_sum[i] += params[i] - self.vertices[worst_idx].params[i];
        }
        self.vertices[worst_idx] = Vertex::evaluated(value, params);
    }

    /// `trial[i] = pSum[i]*(1-factor)/D + vertices[index].params[i]*(factor - (1-factor)/D)`.
    fn extrapolate(&self, index: usize, factor: f64) -> Vec<f64> {
        let d = self.dim as f64;
        let a = (1.0 - factor) / d;
        (0..self.dim)
            .map(|i| self.p_sum[i] * a + self.vertices[index].params[i] * (factor - a))
            .collect()
    }

    fn apply_boundary(&mut self, params: &mut [f64]) {
        if self.config.force_boundary {
            boundary::apply(params, &self.lower, &self.upper, self.config.boundary_policy, &mut self.rng);
        }
    }

    fn begin_contract_all(&mut self) -> SimplexStep {
        let best_params = self.vertices[0].params.clone();
        let sigma = self.config.shrink_factor;
        let mut requests = Vec::with_capacity(self.dim);
        for i in 1..=self.dim {
            let mut p: Vec<f64> = self.vertices[i]
                .params
                .iter()
                .zip(best_params.iter())
                .map(|(&vi, &bi)| sigma * (vi + bi))
                .collect();
            self.apply_boundary(&mut p);
            requests.push(p);
        }
        self.op = Operation::AwaitingContractAll;
        SimplexStep::Request(requests)
    }

    /// Sorts the simplex (best first), refreshes the full centroid sum,
    /// checks the termination condition, and either emits the next
    /// reflection request or signals `Finished`.
    fn finish_round(&mut self) -> SimplexStep {
        self.vertices.sort_by(compare_vertices);
        self.p_sum = self.compute_psum();

        if self.evaluation_count >= self.config.max_evaluations || self.relative_size() <= self.config.min_relative_size {
            tracing::debug!(
                worker = %self.tag,
                evaluations = self.evaluation_count,
                relative_size = self.relative_size(),
                "simplex finished"
            );
            self.op = Operation::Finished;
            return SimplexStep::Finished;
        }
        self.begin_reflect()
    }

    fn begin_reflect(&mut self) -> SimplexStep {
        let worst_idx = self.dim;
        let mut reflection_point = self.extrapolate(worst_idx, -1.0);
        self.apply_boundary(&mut reflection_point);

        let best = self.vertices[0].value.finite().unwrap_or(f64::INFINITY);
        let second_worst = self.vertices[self.dim - 1].value.finite().unwrap_or(f64::INFINITY);
        let worst = self.vertices[worst_idx].value.finite().unwrap_or(f64::INFINITY);

        self.op = Operation::AwaitingReflect {
            reflection_point: reflection_point.clone(),
            best,
            second_worst,
            worst,
        };
        SimplexStep::Request(vec![reflection_point])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BoundaryPolicy, SimplexConfig};

    fn sphere(p: &[f64]) -> f64 {
        p.iter().map(|x| x * x).sum()
    }

    fn drive(simplex: &mut Simplex, mut f: impl FnMut(&[f64]) -> f64) -> Vec<Vec<f64>> {
        // Returns the trace of requested points whose batch size is 1
        // (reflection/expand/contract points), for inspection by tests.
        let mut single_point_trace = Vec::new();
        let mut step = SimplexStep::Request(simplex.begin());
        loop {
            match step {
                SimplexStep::Finished => break,
                SimplexStep::Request(points) => {
                    if points.len() == 1 {
                        single_point_trace.push(points[0].clone());
                    }
                    let values: Vec<f64> = points.iter().map(|p| f(p)).collect();
                    step = simplex.advance(&values);
                }
            }
        }
        single_point_trace
    }

    fn unit_simplex(dim: usize, max_evaluations: u64) -> Simplex {
        let lower = vec![-10.0; dim];
        let upper = vec![10.0; dim];
        let config = SimplexConfig { max_evaluations, ..SimplexConfig::default() };
        let mut s = Simplex::new("worker_0", lower, upper, config, 0).unwrap();
        s.initial_vectors_scalar(vec![1.0; dim], 0.5);
        s
    }

    #[test]
    fn vertex_count_invariant_holds_after_every_operation() {
        let mut s = unit_simplex(2, 200);
        let mut step = SimplexStep::Request(s.begin());
        loop {
            match step {
                SimplexStep::Finished => break,
                SimplexStep::Request(points) => {
                    let values: Vec<f64> = points.iter().map(|p| sphere(p)).collect();
                    step = s.advance(&values);
                    assert_eq!(s.vertices().len(), s.dim() + 1);
                }
            }
        }
    }

    #[test]
    fn converges_on_sphere() {
        let mut s = unit_simplex(2, 200);
        drive(&mut s, sphere);
        assert!(s.best_value().unwrap() <= 1e-6, "best={:?}", s.best_value());
    }

    #[test]
    fn evaluation_count_respects_fuzzy_budget() {
        let mut s = unit_simplex(3, 100);
        drive(&mut s, sphere);
        assert!(s.evaluation_count() <= 100 + 3);
    }

    #[test]
    fn constant_objective_terminates_by_relative_size() {
        let mut s = unit_simplex(2, 100_000);
        drive(&mut s, |_| 7.0);
        assert_eq!(s.best_value(), Some(7.0));
        assert!(s.relative_size() <= s_min_rel_size());
    }
    fn s_min_rel_size() -> f64 {
        SimplexConfig::default().min_relative_size
    }

    #[test]
    fn sticky_boundary_keeps_params_in_bounds_at_a_corner() {
        let config = SimplexConfig { boundary_policy: BoundaryPolicy::Sticky, max_evaluations: 400, ..SimplexConfig::default() };
        let mut s = Simplex::new("worker_0", vec![0.0, 0.0], vec![1.0, 1.0], config, 0).unwrap();
        s.initial_vectors_scalar(vec![0.9, 0.9], 0.05);
        let f = |p: &[f64]| -(p[0] + p[1]);

        let mut step = SimplexStep::Request(s.begin());
        loop {
            match step {
                SimplexStep::Finished => break,
                SimplexStep::Request(points) => {
                    for p in &points {
                        for &x in p {
                            assert!((0.0..=1.0).contains(&x), "param {x} escaped bounds");
                        }
                    }
                    let values: Vec<f64> = points.iter().map(|p| f(p)).collect();
                    step = s.advance(&values);
                }
            }
        }
        let best = s.best_params().unwrap();
        assert!((best[0] - 1.0).abs() < 0.05);
        assert!((best[1] - 1.0).abs() < 0.05);
    }

    #[test]
    fn psum_matches_coordinate_wise_vertex_sum_after_each_round() {
        let mut s = unit_simplex(2, 200);
        let mut step = SimplexStep::Request(s.begin());
        loop {
            match step {
                SimplexStep::Finished => break,
                SimplexStep::Request(points) => {
                    let values: Vec<f64> = points.iter().map(|p| sphere(p)).collect();
                    step = s.advance(&values);
                    let expected = s.compute_psum();
                    assert_eq!(s.p_sum, expected);
                }
            }
        }
    }

    #[test]
    fn deterministic_given_identical_seed() {
        let mut a = unit_simplex(3, 150);
        let mut b = unit_simplex(3, 150);
        drive(&mut a, sphere);
        drive(&mut b, sphere);
        assert_eq!(a.best_value(), b.best_value());
        assert_eq!(a.best_params(), b.best_params());
    }
}
