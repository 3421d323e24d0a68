//! inpage-sim - In-process notebook host for the inpage agent.
//!
//! Provides every seam the agent needs without a browser:
//!
//! - [`notebook_doc`]: Automerge-backed shared notebook document
//! - [`dom`]: element tree with CSS ([`selector`]) and XPath ([`xpath`]) queries
//! - [`notebook`]: notebook panel with cell views, selection and windowing
//! - [`kernel`]: scripted executions, including late-attaching widgets
//! - [`host`]: plugin and command registries tying it together

pub mod dom;
pub mod host;
pub mod kernel;
pub mod notebook;
pub mod notebook_doc;
pub mod selector;
pub mod xpath;

pub use host::{SimHost, SimPlugin};
pub use kernel::{CellScript, ScriptedOutput, SimKernel};
pub use notebook::SimNotebook;
pub use notebook_doc::NotebookDoc;
