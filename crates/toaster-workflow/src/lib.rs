//! toaster-workflow: everything the pipeline does with the catalog and the
//! tool-chain.
//!
//! Built on a [`ToasterContext`] (configuration, catalog, tool runner):
//! ingestion of rawfiles, parfiles and templates, the plugin registries and
//! their runtimes, the TOA engine and the tim-file emitter.

mod context;
pub mod diagnose;
pub mod ingest;
pub mod manipulate;
pub mod pipeline;
pub mod plugins;
pub mod timfile;
pub mod toa_engine;
pub mod version;

pub use context::ToasterContext;
pub use diagnose::DiagnosticRuntime;
pub use ingest::{Ingested, Ingestor, LoadOptions};
pub use manipulate::ManipulatorRuntime;
pub use pipeline::{Pipeline, PipelineOptions, PipelineReport};
pub use timfile::TimEmitter;
pub use toa_engine::{ToaEngine, ToaOutcome, ToaRequest};
pub use version::VersionStamper;
