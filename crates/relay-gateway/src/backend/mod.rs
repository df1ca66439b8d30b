//! llama-server process management
//!
//! - [`process`]: one spawned backend and how it is launched and stopped
//! - [`probe`]: readiness polling against `/health` and `/slots`
//! - [`supervisor`]: the lazily started single backend behind the proxy
//! - [`runner`]: several backends on a list of ports, run until cancelled

pub mod probe;
pub mod process;
pub mod runner;
pub mod supervisor;

pub use probe::{Readiness, ReadinessPolicy, ReadinessProbe};
pub use process::{BackendProcess, BackendStatus, CommandLauncher, LaunchSpec, Launcher, pump_lines};
pub use runner::{BackendLine, MultiBackendRunner, RunOutcome, RunnerConfig};
pub use supervisor::{BackendEndpoint, ProcessSupervisor};
