use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use tracing::{debug, warn};

use super::case::{Case, CaseKind, RunContext};
use super::directives::{self, DirectiveError};
use super::suite::SuiteError;
use super::ApiStep;
use crate::api::{ApiResponse, SelfService};
use crate::preprocess::preprocess;

/// Lifecycle of a template run.
///
/// Runs move forward only:
/// `Initialized < Launching < {Running, Failed} < Terminating < Terminated < Finished`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TemplateState {
    Initialized,
    Launching,
    Running,
    Failed,
    Terminating,
    Terminated,
    Finished,
    /// A state name outside the lifecycle. Pumping it is an error that
    /// finishes the run.
    Observed(String),
}

impl TemplateState {
    /// Maps a status name, as reported remotely, onto the lifecycle.
    pub fn from_remote(status: &str) -> Self {
        match status {
            "initialized" => TemplateState::Initialized,
            "launching" => TemplateState::Launching,
            "running" => TemplateState::Running,
            "failed" => TemplateState::Failed,
            "terminating" => TemplateState::Terminating,
            "terminated" => TemplateState::Terminated,
            "finished" => TemplateState::Finished,
            other => TemplateState::Observed(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TemplateState::Initialized => "initialized",
            TemplateState::Launching => "launching",
            TemplateState::Running => "running",
            TemplateState::Failed => "failed",
            TemplateState::Terminating => "terminating",
            TemplateState::Terminated => "terminated",
            TemplateState::Finished => "finished",
            TemplateState::Observed(status) => status,
        }
    }

    /// Position in the lifecycle. `Running` and `Failed` share a rank.
    pub fn rank(&self) -> Option<u8> {
        match self {
            TemplateState::Initialized => Some(0),
            TemplateState::Launching => Some(1),
            TemplateState::Running | TemplateState::Failed => Some(2),
            TemplateState::Terminating => Some(3),
            TemplateState::Terminated => Some(4),
            TemplateState::Finished => Some(5),
            TemplateState::Observed(_) => None,
        }
    }
}

impl fmt::Display for TemplateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One testable document, its cases, and the execution launched from it.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    template_body: String,
    cases: Vec<Case>,
    state: TemplateState,
    errors: Vec<String>,
    api_responses: HashMap<ApiStep, ApiResponse>,
    remote_status: Option<String>,
}

impl Template {
    /// Builds a template from already preprocessed text.
    pub fn from_source(
        name: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, DirectiveError> {
        let body = body.into();
        let cases = directives::parse_cases(&body)?;
        Ok(Self::with_cases(name, body, cases))
    }

    /// Builds a template with an explicit list of cases.
    pub fn with_cases(name: impl Into<String>, body: impl Into<String>, cases: Vec<Case>) -> Self {
        Self {
            name: name.into(),
            template_body: body.into(),
            cases,
            state: TemplateState::Initialized,
            errors: Vec::new(),
            api_responses: HashMap::new(),
            remote_status: None,
        }
    }

    /// Reads, preprocesses, and parses a document file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SuiteError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let body = preprocess(path).map_err(|source| SuiteError::Preprocess {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_source(name, body).map_err(|source| SuiteError::Directive {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template_body(&self) -> &str {
        &self.template_body
    }

    pub fn cases(&self) -> &[Case] {
        &self.cases
    }

    pub fn state(&self) -> &TemplateState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == TemplateState::Finished
    }

    /// Errors of the template's own lifecycle steps, not of its cases.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Last status string reported for the execution.
    pub fn remote_status(&self) -> Option<&str> {
        self.remote_status.as_deref()
    }

    pub fn api_response(&self, step: ApiStep) -> Option<&ApiResponse> {
        self.api_responses.get(&step)
    }

    /// Id of the remote execution, once one was created.
    pub fn execution_id(&self) -> Option<String> {
        self.api_responses
            .get(&ApiStep::ExecutionCreate)
            .and_then(|r| r.resource_id().ok())
    }

    /// False when every case is compile-only: nothing needs to be launched.
    pub fn needs_execution(&self) -> bool {
        !self
            .cases
            .iter()
            .all(|c| matches!(c.kind(), CaseKind::CompileOnly))
    }

    fn transition(&mut self, next: TemplateState) {
        debug!(template = %self.name, from = %self.state, to = %next, "template transition");
        self.state = next;
    }

    /// Advances the run by one step.
    pub async fn pump(&mut self, client: &dyn SelfService) {
        match self.state {
            TemplateState::Initialized => self.launch(client).await,
            TemplateState::Launching | TemplateState::Terminating => {
                self.poll_execution(client).await
            }
            TemplateState::Running | TemplateState::Failed => self.pump_cases(client).await,
            TemplateState::Terminated => self.cleanup(client).await,
            TemplateState::Finished => {}
            TemplateState::Observed(ref status) => {
                let message = format!("unknown template state {}", status);
                self.errors.push(message);
                self.transition(TemplateState::Finished);
            }
        }
    }

    async fn launch(&mut self, client: &dyn SelfService) {
        if !self.needs_execution() {
            self.transition(TemplateState::Running);
            return;
        }

        let created = client
            .create_execution(&self.template_body)
            .await
            .and_then(|response| response.resource_id().map(|_| response));

        match created {
            Ok(response) => {
                self.api_responses.insert(ApiStep::ExecutionCreate, response);
                self.transition(TemplateState::Launching);
            }
            Err(e) => {
                self.errors.push(format!(
                    "Failed to create execution from template\n\n{}",
                    e.format()
                ));
                self.transition(TemplateState::Failed);
            }
        }
    }

    async fn poll_execution(&mut self, client: &dyn SelfService) {
        let Some(execution_id) = self.execution_id() else {
            return;
        };

        let polled = client
            .show_execution(&execution_id)
            .await
            .and_then(|response| response.execution_status().map(|status| (response, status)));

        match polled {
            Ok((response, status)) => {
                self.api_responses.insert(ApiStep::ExecutionShow, response);
                self.observe(status);
            }
            Err(e) => {
                warn!(template = %self.name, error = %e, "failed to check execution status");
                self.errors.push(format!(
                    "Failed to check execution status\n\n{}",
                    e.format()
                ));
            }
        }
    }

    /// Applies a remotely reported status. Only forward moves are taken.
    fn observe(&mut self, status: String) {
        let reported = TemplateState::from_remote(&status);
        self.remote_status = Some(status);

        match (self.state.clone(), reported) {
            (TemplateState::Launching, next @ (TemplateState::Running | TemplateState::Failed)) => {
                self.transition(next)
            }
            (TemplateState::Launching, TemplateState::Terminating | TemplateState::Terminated) => {
                self.errors.push(format!(
                    "Execution ended before it was running (status {})",
                    self.remote_status.as_deref().unwrap_or_default()
                ));
                self.transition(TemplateState::Failed);
            }
            (TemplateState::Terminating, TemplateState::Terminated) => {
                self.transition(TemplateState::Terminated)
            }
            // Still launching, or the terminate has not taken effect yet.
            _ => {}
        }
    }

    async fn pump_cases(&mut self, client: &dyn SelfService) {
        let execution_id = self.execution_id();
        let run = RunContext {
            body: &self.template_body,
            state: &self.state,
            execution_id: execution_id.as_deref(),
        };

        let mut unfinished = 0;
        for case in self.cases.iter_mut() {
            if case.pump(client, &run).await {
                unfinished += 1;
            }
        }

        if unfinished > 0 {
            return;
        }

        match execution_id {
            Some(id) => self.terminate(client, &id).await,
            None => self.transition(TemplateState::Terminated),
        }
    }

    async fn terminate(&mut self, client: &dyn SelfService, execution_id: &str) {
        match client
            .create_operation(execution_id, "terminate", &BTreeMap::new())
            .await
        {
            Ok(response) => {
                self.api_responses
                    .insert(ApiStep::TerminateOperationCreate, response);
                self.transition(TemplateState::Terminating);
            }
            Err(e) => {
                self.errors.push(format!(
                    "Failed to terminate execution {}\n\n{}",
                    execution_id,
                    e.format()
                ));
                self.transition(TemplateState::Terminated);
            }
        }
    }

    async fn cleanup(&mut self, client: &dyn SelfService) {
        if let Some(execution_id) = self.execution_id() {
            match client.delete_execution(&execution_id).await {
                Ok(response) => {
                    self.api_responses.insert(ApiStep::ExecutionDelete, response);
                }
                Err(e) => self.errors.push(format!(
                    "Failed to delete execution {}\n\n{}",
                    execution_id,
                    e.format()
                )),
            }
        }
        self.transition(TemplateState::Finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use async_trait::async_trait;

    /// Fails every call; a template in the states below never reaches it.
    struct Unreachable;

    #[async_trait]
    impl SelfService for Unreachable {
        async fn compile_template(&self, _: &str) -> Result<ApiResponse, ApiError> {
            Err(ApiError::Network("unexpected call".to_string()))
        }
        async fn create_execution(&self, _: &str) -> Result<ApiResponse, ApiError> {
            Err(ApiError::Network("unexpected call".to_string()))
        }
        async fn show_execution(&self, _: &str) -> Result<ApiResponse, ApiError> {
            Err(ApiError::Network("unexpected call".to_string()))
        }
        async fn delete_execution(&self, _: &str) -> Result<ApiResponse, ApiError> {
            Err(ApiError::Network("unexpected call".to_string()))
        }
        async fn create_operation(
            &self,
            _: &str,
            _: &str,
            _: &BTreeMap<String, String>,
        ) -> Result<ApiResponse, ApiError> {
            Err(ApiError::Network("unexpected call".to_string()))
        }
        async fn show_operation(&self, _: &str) -> Result<ApiResponse, ApiError> {
            Err(ApiError::Network("unexpected call".to_string()))
        }
    }

    #[test]
    fn test_rank_order() {
        let order = [
            TemplateState::Initialized,
            TemplateState::Launching,
            TemplateState::Running,
            TemplateState::Terminating,
            TemplateState::Terminated,
            TemplateState::Finished,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
        assert_eq!(TemplateState::Failed.rank(), TemplateState::Running.rank());
        assert_eq!(TemplateState::Observed("starting".to_string()).rank(), None);
    }

    #[test]
    fn test_from_remote() {
        assert_eq!(TemplateState::from_remote("running"), TemplateState::Running);
        assert_eq!(
            TemplateState::from_remote("starting"),
            TemplateState::Observed("starting".to_string())
        );
        assert_eq!(TemplateState::from_remote("starting").as_str(), "starting");
    }

    #[tokio::test]
    async fn test_unknown_state_finishes_with_error() {
        let mut template = Template::with_cases("odd.cat.rb", "", vec![Case::compile_only()]);
        template.state = TemplateState::Observed("bogus".to_string());

        template.pump(&Unreachable).await;

        assert_eq!(template.state(), &TemplateState::Finished);
        assert_eq!(template.errors(), ["unknown template state bogus".to_string()]);
    }

    #[tokio::test]
    async fn test_finished_is_idle() {
        let mut template = Template::with_cases("done.cat.rb", "", vec![Case::compile_only()]);
        template.state = TemplateState::Finished;

        template.pump(&Unreachable).await;
        template.pump(&Unreachable).await;

        assert_eq!(template.state(), &TemplateState::Finished);
        assert!(template.errors().is_empty());
    }

    #[test]
    fn test_observe_ignores_backward_moves() {
        let mut template = Template::with_cases("t.cat.rb", "", Vec::new());
        template.state = TemplateState::Terminating;

        template.observe("running".to_string());
        assert_eq!(template.state(), &TemplateState::Terminating);
        assert_eq!(template.remote_status(), Some("running"));

        template.observe("failed".to_string());
        assert_eq!(template.state(), &TemplateState::Terminating);
        assert!(template.errors().is_empty());

        template.observe("terminated".to_string());
        assert_eq!(template.state(), &TemplateState::Terminated);
    }

    #[test]
    fn test_observe_keeps_launching_on_intermediate_status() {
        let mut template = Template::with_cases("t.cat.rb", "", Vec::new());
        template.state = TemplateState::Launching;

        template.observe("starting".to_string());
        assert_eq!(template.state(), &TemplateState::Launching);

        template.observe("failed".to_string());
        assert_eq!(template.state(), &TemplateState::Failed);
    }
}
