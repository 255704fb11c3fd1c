//! Marathon subsystem (§4.F, §4.G, §4.H): long-running, multi-milestone
//! goals executed unattended with durable state, periodic planning,
//! approval gating, and a watchdog that restarts stalled runs.

pub mod executor;
pub mod planner;
pub mod store;
pub mod watchdog;

pub use executor::run_marathon;
pub use planner::{plan_goal, PlanError};
pub use store::MarathonStore;
