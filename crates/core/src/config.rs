//! Configuration surface: bounds, simplex coefficients, and the genetic
//! layer's fitness/marriage/reproduction/shrink policies.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How an out-of-bounds coordinate is brought back into `[lower, upper]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryPolicy {
    /// Clamp to the violated bound.
    Sticky,
    /// Resample uniformly within the bound.
    Random,
    /// Wrap by successive `+/-(upper - lower)` subtractions.
    Periodic,
    /// Fold by `2*bound - x`.
    Reflective,
}

/// Scalar fitness assigned to a simplex for ranking before marriage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitnessMode {
    /// The best (vertex 0) value of the current generation.
    Min,
    /// The worst value ever observed for the worker, taken from history.
    Max,
    /// The arithmetic mean of the worker's history values.
    Average,
}

/// How fitness-ranked workers are paired off for reproduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarriageMode {
    /// The king (fittest) is paired with every other worker.
    KingHenry,
    /// Uniform random pairing without self-pairing.
    Random,
    /// Tournament-of-two selection for both partners.
    RandomPreferable,
    /// Adjacent pairs in fitness order, wrapping the odd one out.
    Hierarchical,
    /// Best paired with worst, second-best with second-worst, etc.
    BestWorst,
}

/// How a pair of parent simplexes produces two children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReproductionMode {
    /// Per-coordinate coin flip swaps which parent each child inherits from.
    DiscreteMixing,
    /// Per-coordinate affine blend of both parents.
    LinearCombination,
    /// Pick `DiscreteMixing` or `LinearCombination` per pair, uniformly.
    RandomType,
}

/// How the box bounds are tightened around the king at a shrink generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShrinkMode {
    /// Recentre both bounds around the king, scaled by the shrink factor.
    ShrinkAround,
    /// Pull the lower bound up to the king wherever it is still negative.
    ChangeLowerIfNeg,
}

/// Per-simplex Nelder-Mead coefficients and stopping conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimplexConfig {
    #[serde(default = "default_grow_factor")]
    pub grow_factor: f64,
    #[serde(default = "default_shrink_factor")]
    pub shrink_factor: f64,
    #[serde(default)]
    pub boundary_policy: BoundaryPolicy,
    #[serde(default = "default_force_boundary")]
    pub force_boundary: bool,
    #[serde(default = "default_max_evaluations")]
    pub max_evaluations: u64,
    #[serde(default = "default_min_relative_size")]
    pub min_relative_size: f64,
}

fn default_grow_factor() -> f64 {
    2.0
}
fn default_shrink_factor() -> f64 {
    0.5
}
fn default_force_boundary() -> bool {
    true
}
fn default_max_evaluations() -> u64 {
    u64::MAX
}
fn default_min_relative_size() -> f64 {
    1e-8
}

impl Default for BoundaryPolicy {
    fn default() -> Self {
        BoundaryPolicy::Sticky
    }
}

impl Default for SimplexConfig {
    fn default() -> Self {
        Self {
            grow_factor: default_grow_factor(),
            shrink_factor: default_shrink_factor(),
            boundary_policy: BoundaryPolicy::default(),
            force_boundary: default_force_boundary(),
            max_evaluations: default_max_evaluations(),
            min_relative_size: default_min_relative_size(),
        }
    }
}

impl SimplexConfig {
    pub(crate) fn validate(&self, dim: usize) -> Result<()> {
        if !(self.grow_factor > 1.0) {
            return Err(Error::InvalidGrowFactor(self.grow_factor));
        }
        if !(self.shrink_factor > 0.0 && self.shrink_factor < 1.0) {
            return Err(Error::InvalidShrinkFactor(self.shrink_factor));
        }
        if self.min_relative_size < 0.0 {
            return Err(Error::InvalidMinRelativeSize(self.min_relative_size));
        }
        let min_required = (dim + 1) as u64;
        if self.max_evaluations <= min_required {
            return Err(Error::MaxEvaluationsTooLow {
                max_evaluations: self.max_evaluations,
                min_required,
            });
        }
        Ok(())
    }
}

/// Top-level configuration for the genetic layer and the colony it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticsConfig {
    pub population: usize,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
    pub seed: u64,

    #[serde(default = "default_max_generations")]
    pub max_generations: u64,
    #[serde(default = "default_max_evaluations")]
    pub max_evaluations: u64,

    #[serde(default)]
    pub fitness: FitnessMode,
    #[serde(default)]
    pub marriage: MarriageMode,
    #[serde(default)]
    pub reproduction: ReproductionMode,
    #[serde(default = "default_reproduction_percent")]
    pub reproduction_percent: f64,

    #[serde(default)]
    pub shrink_per_generations: u64,
    #[serde(default = "default_shrink_factor")]
    pub shrink_factor_boundary: f64,
    #[serde(default)]
    pub shrink_mode: ShrinkMode,
    #[serde(default)]
    pub reset_on_shrink: bool,

    #[serde(default = "default_chunk_size")]
    pub evaluation_chunk_size: usize,
    #[serde(default = "default_lazy_workers")]
    pub lazy_workers: bool,

    #[serde(default)]
    pub simplex: SimplexConfig,
}

fn default_max_generations() -> u64 {
    10
}
fn default_reproduction_percent() -> f64 {
    1.0
}
fn default_chunk_size() -> usize {
    1
}
fn default_lazy_workers() -> bool {
    true
}

impl Default for FitnessMode {
    fn default() -> Self {
        FitnessMode::Min
    }
}
impl Default for MarriageMode {
    fn default() -> Self {
        MarriageMode::KingHenry
    }
}
impl Default for ReproductionMode {
    fn default() -> Self {
        ReproductionMode::RandomType
    }
}
impl Default for ShrinkMode {
    fn default() -> Self {
        ShrinkMode::ShrinkAround
    }
}

impl GeneticsConfig {
    pub fn dim(&self) -> usize {
        self.upper.len()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.population == 0 {
            return Err(Error::InvalidPopulation(self.population));
        }
        if self.upper.len() != self.lower.len() {
            return Err(Error::DimensionMismatch {
                expected: self.upper.len(),
                actual: self.lower.len(),
            });
        }
        for (i, (&lo, &up)) in self.lower.iter().zip(self.upper.iter()).enumerate() {
            if !(lo < up) {
                return Err(Error::InvertedBounds { index: i, lower: lo, upper: up });
            }
        }
        if !(0.0..=1.0).contains(&self.reproduction_percent) {
            return Err(Error::InvalidReproductionPercent(self.reproduction_percent));
        }
        if self.evaluation_chunk_size == 0 {
            return Err(Error::InvalidChunkSize(self.evaluation_chunk_size));
        }
        self.simplex.validate(self.dim())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> GeneticsConfig {
        GeneticsConfig {
            population: 4,
            upper: vec![10.0, 10.0],
            lower: vec![-10.0, -10.0],
            seed: 0,
            max_generations: 10,
            max_evaluations: 10_000,
            fitness: FitnessMode::Min,
            marriage: MarriageMode::KingHenry,
            reproduction: ReproductionMode::RandomType,
            reproduction_percent: 1.0,
            shrink_per_generations: 0,
            shrink_factor_boundary: 0.5,
            shrink_mode: ShrinkMode::ShrinkAround,
            reset_on_shrink: false,
            evaluation_chunk_size: 4,
            lazy_workers: true,
            simplex: SimplexConfig::default(),
        }
    }

    #[test]
    fn rejects_inverted_bounds() {
        let mut cfg = base_config();
        cfg.upper[0] = -20.0;
        assert_eq!(
            cfg.validate(),
            Err(Error::InvertedBounds { index: 0, lower: -10.0, upper: -20.0 })
        );
    }

    #[test]
    fn rejects_mismatched_dimension() {
        let mut cfg = base_config();
        cfg.lower.push(-1.0);
        assert!(matches!(cfg.validate(), Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn rejects_reproduction_percent_out_of_range() {
        let mut cfg = base_config();
        cfg.reproduction_percent = 1.5;
        assert!(matches!(cfg.validate(), Err(Error::InvalidReproductionPercent(_))));
    }

    #[test]
    fn rejects_grow_factor_at_or_below_one() {
        let mut cfg = base_config();
        cfg.simplex.grow_factor = 1.0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidGrowFactor(_))));
    }

    #[test]
    fn rejects_max_evaluations_at_or_below_dim_plus_one() {
        let mut cfg = base_config();
        cfg.simplex.max_evaluations = 3; // dim=2, needs > 3
        assert!(matches!(cfg.validate(), Err(Error::MaxEvaluationsTooLow { .. })));
    }

    #[test]
    fn accepts_well_formed_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn survives_a_json_round_trip() {
        let cfg = base_config();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: GeneticsConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.population, cfg.population);
        assert_eq!(back.upper, cfg.upper);
        assert_eq!(back.marriage, cfg.marriage);
        assert_eq!(back.simplex.grow_factor, cfg.simplex.grow_factor);
    }

    #[test]
    fn missing_optional_fields_fall_back_to_defaults() {
        let minimal = serde_json::json!({
            "population": 4,
            "upper": [10.0, 10.0],
            "lower": [-10.0, -10.0],
            "seed": 0,
        });
        let cfg: GeneticsConfig = serde_json::from_value(minimal).unwrap();
        assert_eq!(cfg.max_generations, default_max_generations());
        assert_eq!(cfg.marriage, MarriageMode::KingHenry);
        assert_eq!(cfg.simplex.grow_factor, default_grow_factor());
    }
}
