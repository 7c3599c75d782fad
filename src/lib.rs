pub mod approval;
pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod convert;
pub mod errors;
pub mod job;
pub mod orchestrator;
pub mod plan;
pub mod registry;
pub mod run_id;
pub mod scope;
pub mod ui;
pub mod util;
