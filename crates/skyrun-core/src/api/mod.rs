mod error;
mod http;

pub use error::ApiError;
pub use http::HttpClient;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// A successful response from the Self Service API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// `Location` header, set by create calls.
    pub location: Option<String>,
    /// Raw response body.
    pub body: String,
}

impl ApiResponse {
    /// Creates a response carrying only a body.
    pub fn with_body(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            location: None,
            body: body.into(),
        }
    }

    /// Creates a body-less response pointing at a new resource.
    pub fn created(location: impl Into<String>) -> Self {
        Self {
            status: 201,
            location: Some(location.into()),
            body: String::new(),
        }
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::Parse(e.to_string()))
    }

    /// Id of the created resource, taken from the location reference.
    pub fn resource_id(&self) -> Result<String, ApiError> {
        self.location
            .as_deref()
            .and_then(resource_id_from_href)
            .ok_or(ApiError::MissingLocation)
    }

    /// Status of an execution, read from a show response.
    pub fn execution_status(&self) -> Result<String, ApiError> {
        #[derive(Deserialize)]
        struct Execution {
            status: String,
        }
        Ok(self.json::<Execution>()?.status)
    }

    /// Status summary of an operation, read from a show response.
    pub fn operation_status(&self) -> Result<String, ApiError> {
        #[derive(Deserialize)]
        struct Operation {
            status: Status,
        }
        #[derive(Deserialize)]
        struct Status {
            summary: String,
        }
        Ok(self.json::<Operation>()?.status.summary)
    }
}

/// Returns the trailing id of an href such as
/// `/api/manager/projects/1/executions/abc123`. A bare id is returned as-is.
pub fn resource_id_from_href(href: &str) -> Option<String> {
    href.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// The remote operations the client and the test engine rely on.
///
/// [`HttpClient`] talks to the real API; tests supply scripted fakes.
#[async_trait]
pub trait SelfService: Send + Sync {
    /// Validate a document without storing it.
    async fn compile_template(&self, source: &str) -> Result<ApiResponse, ApiError>;

    /// Launch an execution from a document. The response location points at it.
    async fn create_execution(&self, source: &str) -> Result<ApiResponse, ApiError>;

    /// Fetch an execution; the body carries its `status`.
    async fn show_execution(&self, id: &str) -> Result<ApiResponse, ApiError>;

    /// Delete an execution.
    async fn delete_execution(&self, id: &str) -> Result<ApiResponse, ApiError>;

    /// Run a named operation against an execution.
    async fn create_operation(
        &self,
        execution_id: &str,
        name: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<ApiResponse, ApiError>;

    /// Fetch an operation; the body carries its `status.summary`.
    async fn show_operation(&self, id: &str) -> Result<ApiResponse, ApiError>;
}

#[async_trait]
impl<T: SelfService + ?Sized> SelfService for Arc<T> {
    async fn compile_template(&self, source: &str) -> Result<ApiResponse, ApiError> {
        (**self).compile_template(source).await
    }

    async fn create_execution(&self, source: &str) -> Result<ApiResponse, ApiError> {
        (**self).create_execution(source).await
    }

    async fn show_execution(&self, id: &str) -> Result<ApiResponse, ApiError> {
        (**self).show_execution(id).await
    }

    async fn delete_execution(&self, id: &str) -> Result<ApiResponse, ApiError> {
        (**self).delete_execution(id).await
    }

    async fn create_operation(
        &self,
        execution_id: &str,
        name: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<ApiResponse, ApiError> {
        (**self).create_operation(execution_id, name, params).await
    }

    async fn show_operation(&self, id: &str) -> Result<ApiResponse, ApiError> {
        (**self).show_operation(id).await
    }
}
