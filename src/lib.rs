pub mod assistant;
pub mod ci;
pub mod clock;
pub mod config;
pub mod errors;
pub mod exec;
#[cfg(test)]
pub(crate) mod fakes;
pub mod gates;
pub mod gateways;
pub mod orchestrator;
pub mod review;
pub mod split;
pub mod ui;
pub mod util;
pub mod vcs;
pub mod workflow;
pub mod worktree;
