//! Build orchestration and execution of the external build tool.

pub mod command;
pub mod controller;
pub mod executor;
pub mod process;

pub use command::{CommandLine, HttpSecrets, ToolOptions};
pub use controller::{select_workspace_folder, BuildController, BuildControllerDeps};
pub use executor::{BuildExecutor, BuildRunner};
pub use process::{classify_exit, kill_process_tree, BuildPhase, ProcessOutcome, ProcessTracker};
