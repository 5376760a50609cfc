//! Test orchestration for documents.
//!
//! A [`Suite`] owns one [`Template`] per discovered document; each template
//! owns the [`Case`]s parsed from the document's `#test` directives.
//! Progress is cooperative: the driver calls [`Suite::pump`] on an interval,
//! every unfinished template advances by one step, and a template in its
//! running phase advances each unfinished case by one step. Nothing blocks
//! between steps and nothing is spawned.
//!
//! # Components
//!
//! - [`Case`] - one assertion (compile check, execution end state, or
//!   operation end state)
//! - [`Template`] - the execution lifecycle for one document
//! - [`Suite`] - the set of templates for a test pass
//! - [`ShellReport`] - renders progress, errors and failures to a writer
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use skyrun_core::testing::{ShellReport, Suite};
//!
//! let mut suite = Suite::discover(Arc::new(client), "tests/**/*.cat.rb")?;
//! let mut report = ShellReport::new(std::io::stdout());
//! while suite.pump().await {
//!     report.progress(&suite)?;
//!     tokio::time::sleep(interval).await;
//! }
//! report.errors(&suite)?;
//! report.failures(&suite)?;
//! ```

mod case;
pub mod directives;
pub mod discover;
mod report;
mod suite;
mod template;

pub use case::{Case, CaseKind, CaseResult, Expectation, OperationSpec, OperationState, RunContext};
pub use directives::DirectiveError;
pub use report::ShellReport;
pub use suite::{Suite, SuiteError, Summary};
pub use template::{Template, TemplateState};

/// Remote calls whose last response a case or template keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiStep {
    ExecutionCreate,
    ExecutionShow,
    ExecutionDelete,
    TerminateOperationCreate,
    OperationCreate,
    OperationShow,
}
