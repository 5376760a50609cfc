use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::{debug, warn};

use super::template::TemplateState;
use super::ApiStep;
use crate::api::{ApiResponse, SelfService};

/// Outcome of a concluded [`Case`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaseResult {
    /// The expected state was observed.
    Success,
    /// The expected state was observed although an alternate (known broken)
    /// state was declared: the case has been fixed.
    Fixed,
    /// The assertion did not hold.
    Failed,
    /// The declared alternate state was observed.
    FailedExpected,
    /// The case could not be evaluated.
    Error,
}

impl CaseResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseResult::Success => "SUCCESS",
            CaseResult::Fixed => "FIXED",
            CaseResult::Failed => "FAILED",
            CaseResult::FailedExpected => "FAILED (EXPECTED)",
            CaseResult::Error => "ERROR",
        }
    }
}

impl fmt::Display for CaseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected end state, plus an optional state that is known to happen instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    pub state: String,
    pub alternate_state: Option<String>,
}

impl Expectation {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            alternate_state: None,
        }
    }

    pub fn with_alternate(mut self, state: impl Into<String>) -> Self {
        self.alternate_state = Some(state.into());
        self
    }

    /// Compares an observed state. The primary state wins over the alternate.
    ///
    /// Returns the result and, for [`CaseResult::Failed`], a failure message
    /// built from `subject` (e.g. "execution").
    pub fn evaluate(&self, observed: &str, subject: &str) -> (CaseResult, Option<String>) {
        if observed == self.state {
            if self.alternate_state.is_some() {
                (CaseResult::Fixed, None)
            } else {
                (CaseResult::Success, None)
            }
        } else if self.alternate_state.as_deref() == Some(observed) {
            (CaseResult::FailedExpected, None)
        } else {
            (
                CaseResult::Failed,
                Some(format!(
                    "Expected {subject} end state to be ({}) but got {subject} end state ({observed})",
                    self.state
                )),
            )
        }
    }
}

/// An operation to run against the execution, and what it should end as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSpec {
    pub name: String,
    pub expectation: Expectation,
    pub params: BTreeMap<String, String>,
}

impl OperationSpec {
    pub fn new(name: impl Into<String>, expectation: Expectation) -> Self {
        Self {
            name: name.into(),
            expectation,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// What a case asserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseKind {
    /// The document compiles.
    CompileOnly,
    /// The execution ends up in the expected state.
    Execution(Expectation),
    /// A named operation run against the execution ends up in the expected state.
    Operation(OperationSpec),
    /// A case type this engine does not know. Concludes as an error.
    Unsupported(String),
}

impl CaseKind {
    /// Short type name used in reports.
    pub fn type_name(&self) -> &str {
        match self {
            CaseKind::CompileOnly => "compile_only",
            CaseKind::Execution(_) => "execution",
            CaseKind::Operation(_) => "operation",
            CaseKind::Unsupported(name) => name,
        }
    }

    /// Operation name, for operation cases only.
    pub fn operation_name(&self) -> Option<&str> {
        match self {
            CaseKind::Operation(spec) => Some(&spec.name),
            _ => None,
        }
    }
}

/// Progress of an operation case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    /// Nothing sent yet.
    Initialized,
    /// Created remotely; being polled.
    Running,
    /// Any other status reported remotely. Final.
    Settled(String),
}

impl OperationState {
    /// Maps a remote status summary. Only `initialized` and `running` are
    /// in progress; everything else is treated as the final status.
    pub fn from_remote(status: &str) -> Self {
        match status {
            "initialized" | "running" => OperationState::Running,
            other => OperationState::Settled(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OperationState::Initialized => "initialized",
            OperationState::Running => "running",
            OperationState::Settled(status) => status,
        }
    }
}

/// What a case may see of the template it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    /// Preprocessed document text.
    pub body: &'a str,
    /// Current lifecycle state of the template.
    pub state: &'a TemplateState,
    /// Id of the remote execution, once one was created.
    pub execution_id: Option<&'a str>,
}

/// One assertion about a template.
#[derive(Debug, Clone)]
pub struct Case {
    kind: CaseKind,
    internal_state: OperationState,
    result: Option<CaseResult>,
    errors: Vec<String>,
    failures: Vec<String>,
    api_responses: HashMap<ApiStep, ApiResponse>,
}

impl Case {
    pub fn new(kind: CaseKind) -> Self {
        Self {
            kind,
            internal_state: OperationState::Initialized,
            result: None,
            errors: Vec::new(),
            failures: Vec::new(),
            api_responses: HashMap::new(),
        }
    }

    pub fn compile_only() -> Self {
        Self::new(CaseKind::CompileOnly)
    }

    pub fn execution(expectation: Expectation) -> Self {
        Self::new(CaseKind::Execution(expectation))
    }

    pub fn operation(spec: OperationSpec) -> Self {
        Self::new(CaseKind::Operation(spec))
    }

    pub fn kind(&self) -> &CaseKind {
        &self.kind
    }

    pub fn type_name(&self) -> &str {
        self.kind.type_name()
    }

    pub fn internal_state(&self) -> &OperationState {
        &self.internal_state
    }

    /// `None` until the case concludes; never changes afterwards.
    pub fn result(&self) -> Option<CaseResult> {
        self.result
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    /// Infrastructure problems: the case could not be evaluated.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Assertion failures: the case was evaluated and did not hold.
    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    pub fn api_response(&self, step: ApiStep) -> Option<&ApiResponse> {
        self.api_responses.get(&step)
    }

    fn conclude(&mut self, result: CaseResult) -> bool {
        debug!(case = self.type_name(), %result, "case concluded");
        self.result = Some(result);
        false
    }

    fn conclude_with(&mut self, (result, failure): (CaseResult, Option<String>)) -> bool {
        self.failures.extend(failure);
        self.conclude(result)
    }

    fn error(&mut self, message: String) -> bool {
        self.errors.push(message);
        self.conclude(CaseResult::Error)
    }

    /// Advances the case by one step.
    ///
    /// Returns true if the case needs to be pumped again. A concluded case
    /// returns false and touches nothing.
    pub async fn pump(&mut self, client: &dyn SelfService, run: &RunContext<'_>) -> bool {
        if self.is_finished() {
            return false;
        }

        match self.kind.clone() {
            CaseKind::CompileOnly => self.pump_compile(client, run).await,
            CaseKind::Execution(expectation) => {
                self.conclude_with(expectation.evaluate(run.state.as_str(), "execution"))
            }
            CaseKind::Operation(spec) => self.pump_operation(client, run, &spec).await,
            CaseKind::Unsupported(name) => self.error(format!("Unknown test case type ({})", name)),
        }
    }

    async fn pump_compile(&mut self, client: &dyn SelfService, run: &RunContext<'_>) -> bool {
        match client.compile_template(run.body).await {
            Ok(_) => self.conclude(CaseResult::Success),
            Err(e) if e.is_validation_failure() => {
                self.failures
                    .push(format!("Failed to compile template\n\n{}", e.format()));
                self.conclude(CaseResult::Failed)
            }
            Err(e) => self.error(e.format()),
        }
    }

    async fn pump_operation(
        &mut self,
        client: &dyn SelfService,
        run: &RunContext<'_>,
        spec: &OperationSpec,
    ) -> bool {
        match self.internal_state.clone() {
            OperationState::Initialized => match run.state {
                TemplateState::Failed => {
                    self.failures.push(format!(
                        "Execution never started, so operation ({}) was not run",
                        spec.name
                    ));
                    self.conclude(CaseResult::Failed)
                }
                TemplateState::Running => match run.execution_id {
                    Some(execution_id) => self.create_operation(client, execution_id, spec).await,
                    None => self.error(format!(
                        "No execution to run operation ({}) against",
                        spec.name
                    )),
                },
                // Not our turn yet.
                _ => true,
            },
            OperationState::Running => self.poll_operation(client, spec).await,
            OperationState::Settled(status) => self.conclude_with(
                spec.expectation
                    .evaluate(&status, &format!("operation ({})", spec.name)),
            ),
        }
    }

    async fn create_operation(
        &mut self,
        client: &dyn SelfService,
        execution_id: &str,
        spec: &OperationSpec,
    ) -> bool {
        debug!(operation = %spec.name, execution_id, "creating operation");
        let created = client
            .create_operation(execution_id, &spec.name, &spec.params)
            .await
            .and_then(|response| response.resource_id().map(|_| response));

        match created {
            Ok(response) => {
                self.api_responses.insert(ApiStep::OperationCreate, response);
                self.internal_state = OperationState::Running;
                true
            }
            Err(e) => self.error(format!(
                "Failed to create operation ({})\n\n{}",
                spec.name,
                e.format()
            )),
        }
    }

    async fn poll_operation(&mut self, client: &dyn SelfService, spec: &OperationSpec) -> bool {
        let operation_id = match self
            .api_responses
            .get(&ApiStep::OperationCreate)
            .map(ApiResponse::resource_id)
        {
            Some(Ok(id)) => id,
            Some(Err(e)) => return self.error(e.format()),
            None => {
                return self.error(format!(
                    "Operation ({}) is running but was never created",
                    spec.name
                ))
            }
        };

        let polled = client
            .show_operation(&operation_id)
            .await
            .and_then(|response| response.operation_status().map(|status| (response, status)));

        match polled {
            Ok((response, status)) => {
                debug!(operation = %spec.name, %status, "operation status");
                self.api_responses.insert(ApiStep::OperationShow, response);
                self.internal_state = OperationState::from_remote(&status);
            }
            Err(e) => {
                warn!(operation = %spec.name, error = %e, "failed to check operation status");
                self.errors.push(format!(
                    "Failed to check operation ({}) status\n\n{}",
                    spec.name,
                    e.format()
                ));
            }
        }
        true
    }
}
