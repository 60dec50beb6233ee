//! Hook registry, work queue and the parse/compile pipeline

pub mod build;
mod compile;
pub mod error;
pub mod handler;
pub mod hooks;
mod parse;
pub mod queue;
pub mod runner;
pub mod timing;

#[cfg(test)]
pub mod tests;

pub use build::Build;
pub use error::RunnerError;
pub use handler::{BuildHandler, BuildHook, Done, FileHandler, FileHook, Handler, HookFuture};
pub use hooks::{BuildPhase, FilePhase, HookKey, HookTiming, Hooks};
pub use queue::Queue;
pub use runner::{DEFAULT_CONCURRENCY, Plugin, Runner, RunnerConfig};
pub use timing::Timing;
