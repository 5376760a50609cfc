#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use skyrun_core::{ApiError, ApiResponse, SelfService};

/// Remote calls the fake can be scripted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Compile,
    CreateExecution,
    ShowExecution,
    DeleteExecution,
    CreateOperation,
    ShowOperation,
}

/// A `SelfService` that replays queued results and records every call.
///
/// An unscripted call fails with a network error.
#[derive(Default)]
pub struct FakeService {
    scripts: Mutex<HashMap<Call, VecDeque<Result<ApiResponse, ApiError>>>>,
    log: Mutex<Vec<(Call, String)>>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, call: Call, result: Result<ApiResponse, ApiError>) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(call)
            .or_default()
            .push_back(result);
        self
    }

    pub fn ok(&self, call: Call, response: ApiResponse) -> &Self {
        self.push(call, Ok(response))
    }

    pub fn fail(&self, call: Call, status: u16, body: &str) -> &Self {
        self.push(call, Err(ApiError::http(status, body)))
    }

    /// Every call so far, with its main argument.
    pub fn calls(&self) -> Vec<(Call, String)> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, call: Call) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == call)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    fn next(&self, call: Call, argument: String) -> Result<ApiResponse, ApiError> {
        self.log.lock().unwrap().push((call, argument));
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&call)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(ApiError::Network(format!("unscripted {:?}", call))))
    }
}

#[async_trait]
impl SelfService for FakeService {
    async fn compile_template(&self, source: &str) -> Result<ApiResponse, ApiError> {
        self.next(Call::Compile, source.to_string())
    }

    async fn create_execution(&self, source: &str) -> Result<ApiResponse, ApiError> {
        self.next(Call::CreateExecution, source.to_string())
    }

    async fn show_execution(&self, id: &str) -> Result<ApiResponse, ApiError> {
        self.next(Call::ShowExecution, id.to_string())
    }

    async fn delete_execution(&self, id: &str) -> Result<ApiResponse, ApiError> {
        self.next(Call::DeleteExecution, id.to_string())
    }

    async fn create_operation(
        &self,
        execution_id: &str,
        name: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<ApiResponse, ApiError> {
        let params: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        self.next(
            Call::CreateOperation,
            format!("{} {} {}", execution_id, name, params.join(",")).trim_end().to_string(),
        )
    }

    async fn show_operation(&self, id: &str) -> Result<ApiResponse, ApiError> {
        self.next(Call::ShowOperation, id.to_string())
    }
}

pub fn execution_created(id: &str) -> ApiResponse {
    ApiResponse::created(format!("/api/manager/projects/1/executions/{}", id))
}

pub fn operation_created(id: &str) -> ApiResponse {
    ApiResponse::created(format!("/api/manager/projects/1/operations/{}", id))
}

pub fn execution_status(status: &str) -> ApiResponse {
    ApiResponse::with_body(200, format!(r#"{{"id":"e1","status":"{}"}}"#, status))
}

pub fn operation_status(summary: &str) -> ApiResponse {
    ApiResponse::with_body(
        200,
        format!(r#"{{"id":"o1","status":{{"summary":"{}"}}}}"#, summary),
    )
}

pub fn no_content() -> ApiResponse {
    ApiResponse::with_body(204, "")
}

/// A document with one execution case and one operation case.
pub const EXECUTION_DOC: &str = r#"name "launch"
#test:execution_state=running

#test_operation:execution_state=completed
#test_operation_param:size=large
operation "scale" do
  definition "scale"
end
"#;

pub const COMPILE_ONLY_DOC: &str = "name \"compile\"\n#test:compile_only=true\n";
