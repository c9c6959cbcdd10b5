//! A colony of Nelder-Mead simplexes, recombined by a generational genetic
//! algorithm, evaluated through a batched evaluator boundary.
//!
//! The core state machines ([`simplex`], [`colony`], [`genetics`]) never
//! call an objective function directly; see [`evaluator`] for the
//! boundary every embedder implements.

pub mod boundary;
pub mod colony;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod genetics;
pub mod rng;
pub mod simplex;
pub mod vertex;

pub use colony::{Colony, ColonyState};
pub use config::GeneticsConfig;
pub use error::{Error, Result};
pub use evaluator::{EvaluationChunk, EvaluationRequest, Evaluator, RayonEvaluator, SequentialEvaluator, WorkerId};
pub use genetics::{Genetics, GeneticsState};
pub use simplex::{Simplex, SimplexStep};

// An embedder is free to move a `Genetics`/`Colony` across a thread boundary
// between `run()` calls (e.g. to hand it to a worker pool); nothing here may
// quietly grow a `Rc` or other non-`Send` field that would break that.
static_assertions::assert_impl_all!(Simplex: Send);
static_assertions::assert_impl_all!(Colony: Send);
static_assertions::assert_impl_all!(Genetics: Send);
