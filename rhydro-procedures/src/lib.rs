//! Transfer-function models that can be run by a procedure.
//!
//! Each module holds one model (or a closely related family) and its configuration. The
//! closed [`ProcedureFunction`] enum selects a model from the `type` key of a function
//! configuration.

pub mod balance;
pub mod catalog;
pub mod expression;
pub mod grp;
pub mod hecras;
pub mod junction;
pub mod linear_channel;
pub mod linear_combination;
pub mod muskingum;
pub mod polynomial;
pub mod sac_enkf;
pub mod sacramento;

pub use catalog::{FunctionConfig, ProcedureFunction};
