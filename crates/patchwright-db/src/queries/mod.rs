//! Query modules, one per table family.

pub mod builds;
pub mod candidate_files;
pub mod patches;
pub mod plans;
pub mod pull_requests;
pub mod tasks;
pub mod validations;
