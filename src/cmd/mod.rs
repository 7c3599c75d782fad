//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled        |
//! |-----------|-------------------------|
//! | `run`     | `Run`, `Resume`         |
//! | `approve` | `Approve`, `Revoke`     |
//! | `revise`  | `Revise`                |
//! | `status`  | `Status`                |
//! | `jobs`    | `Jobs`                  |

pub mod approve;
pub mod jobs;
pub mod revise;
pub mod run;
pub mod status;

pub use approve::{cmd_approve, cmd_revoke};
pub use jobs::cmd_jobs;
pub use revise::cmd_revise;
pub use run::{cmd_resume, cmd_run};
pub use status::cmd_status;
