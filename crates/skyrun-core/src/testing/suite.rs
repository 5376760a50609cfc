use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use super::case::CaseResult;
use super::directives::DirectiveError;
use super::discover::{find_documents, DiscoverError};
use super::template::Template;
use crate::api::SelfService;
use crate::preprocess::PreprocessError;

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error(transparent)]
    Discover(#[from] DiscoverError),

    #[error("Failed to preprocess {}: {source}", path.display())]
    Preprocess {
        path: PathBuf,
        #[source]
        source: PreprocessError,
    },

    #[error("Invalid test directives in {}: {source}", path.display())]
    Directive {
        path: PathBuf,
        #[source]
        source: DirectiveError,
    },
}

/// Case counts across a suite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub success: usize,
    pub fixed: usize,
    pub failed: usize,
    pub failed_expected: usize,
    pub error: usize,
    /// Cases that have not concluded.
    pub pending: usize,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.success + self.fixed + self.failed + self.failed_expected + self.error + self.pending
    }

    /// True when nothing failed, errored, or is still pending.
    pub fn is_green(&self) -> bool {
        self.failed == 0 && self.error == 0 && self.pending == 0
    }

    fn count(&mut self, result: Option<CaseResult>) {
        match result {
            Some(CaseResult::Success) => self.success += 1,
            Some(CaseResult::Fixed) => self.fixed += 1,
            Some(CaseResult::Failed) => self.failed += 1,
            Some(CaseResult::FailedExpected) => self.failed_expected += 1,
            Some(CaseResult::Error) => self.error += 1,
            None => self.pending += 1,
        }
    }
}

/// The templates of one test pass, driven together.
pub struct Suite {
    client: Arc<dyn SelfService>,
    templates: Vec<Template>,
}

impl Suite {
    /// Builds one template per document matching `pattern`.
    pub fn discover(client: Arc<dyn SelfService>, pattern: &str) -> Result<Self, SuiteError> {
        let documents = find_documents(pattern)?;
        info!(pattern, count = documents.len(), "discovered test documents");

        let templates = documents
            .iter()
            .map(Template::from_file)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_templates(client, templates))
    }

    pub fn from_templates(client: Arc<dyn SelfService>, templates: Vec<Template>) -> Self {
        Self { client, templates }
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn is_finished(&self) -> bool {
        self.templates.iter().all(Template::is_finished)
    }

    /// Advances every template by one step.
    ///
    /// Returns true while any template has not finished.
    pub async fn pump(&mut self) -> bool {
        let client = self.client.as_ref();
        for template in self.templates.iter_mut() {
            template.pump(client).await;
        }

        let unfinished = self.templates.iter().filter(|t| !t.is_finished()).count();
        debug!(unfinished, total = self.templates.len(), "suite pumped");
        unfinished > 0
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for case in self.templates.iter().flat_map(|t| t.cases()) {
            summary.count(case.result());
        }
        summary
    }
}
