//! Chained hydrological procedures.
//!
//! A [`Plan`] runs an ordered list of [`Procedure`]s against a shared
//! [`Topology`](rhydro_core::topology::Topology). Each procedure reads its boundary series
//! from the topology, runs a transfer function from the
//! [`rhydro_procedures`] catalog, optionally calibrates its parameters with
//! [`rhydro_calibrate`], and writes its outputs back for the procedures after it.
//!
//! ```ignore
//! use rhydro::Plan;
//!
//! let mut plan = Plan::from_file("plan.toml")?;
//! let report = plan.execute()?;
//! for procedure in &report.procedures {
//!     println!("{}: {:?}", procedure.id, procedure.statistics);
//! }
//! ```

pub mod plan;
pub mod procedure;

pub use rhydro_calibrate as calibrate;
pub use rhydro_core as core;
pub use rhydro_procedures as procedures;

pub use plan::{ExecutionOrder, Plan, PlanConfig, PlanReport, ProcedureReport};
pub use procedure::{OutputStatistics, Procedure, ProcedureConfig};
