//! S.A.M. methodology: ANCHOR → INHERIT → COMPOUND → ARRIVE.
//!
//! - [`phase`]: the phase enum and its fixed order
//! - [`run`]: analysis run records, statuses and metrics
//! - [`machine`]: synchronous state transitions
//! - [`types`]: origins, propagations, authority markers and outcomes
//! - [`executor`]: drives a run through its phases

pub mod executor;
pub mod machine;
pub mod phase;
pub mod run;
pub mod types;

pub use executor::{PhaseEvent, PhasePlan, SamExecutor, ScheduledEngine};
pub use phase::SamPhase;
pub use run::{AnalysisRun, PhaseMetrics, PhaseTiming, RunOptions, RunStatus};
pub use types::{
    AuthorityMarker, AuthorityType, CausationChain, ClaimOrigin, FalsePremiseType, HarmLevel,
    MutationType, OriginType, Outcome, PhaseOutput, PhaseOutputs, PropagationRecord,
    PropagationType,
};
