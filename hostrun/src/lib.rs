//! Parallel command runner for SSH host inventories.
//!
//! A YAML inventory names hosts and the credentials to reach them; hostrun runs
//! one shell command on every host through a bounded worker pool and reports
//! each host's outcome in inventory order. One unreachable or failing host
//! never affects the others. The crate is split the usual way:
//!
//! - **[`core`]**: Pure data and logic (results, report aggregation, the work
//!   queue). No I/O.
//! - **[`io`]**: Side-effecting pieces (inventory and settings files, the ssh
//!   client, host logs, stored reports). The [`io::transport::Transport`]
//!   seam lets tests replace ssh entirely.
//!
//! [`executor`] owns the worker pool; [`run`], [`show`] and [`logs`] implement
//! the CLI subcommands on top of it.

pub mod context;
pub mod core;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod logs;
pub mod progress;
pub mod run;
pub mod show;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
