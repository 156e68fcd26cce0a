//! toaster-providers: the boundary to the external astronomy tool-chain.
//!
//! Every executable the pipeline depends on (`psrstat`, `psrplot`, `pam`,
//! `pat`, `git`, `psrchive --version`) is launched through a [`ToolRunner`].
//! The argv builders and stdout parsers for each tool live next to each other
//! so a change in a tool's output format stays local to one module.
//!
//! ```rust
//! use toaster_providers::{StubRunner, ToolCommand, ToolRunner};
//! let runner = StubRunner::new().reply("psrstat", "12.5\n");
//! let out = runner.run(&ToolCommand::new("psrstat").arg("-Qq")).unwrap();
//! assert_eq!(out.stdout.trim(), "12.5");
//! ```

mod errors;
pub mod git;
pub mod psrchive;
mod runner;
pub mod stubs;

pub use errors::ToolError;
pub use psrchive::ArchiveHeader;
pub use runner::{SystemRunner, ToolCommand, ToolExit, ToolOutput, ToolRunner};
pub use stubs::StubRunner;
