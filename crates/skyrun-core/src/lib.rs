pub mod api;
pub mod config;
pub mod preprocess;
pub mod testing;

pub use api::{ApiError, ApiResponse, HttpClient, SelfService};
pub use config::{Config, ConfigError};
pub use preprocess::{preprocess, PreprocessError};
pub use testing::{Case, CaseKind, CaseResult, ShellReport, Suite, SuiteError, Template, TemplateState};
