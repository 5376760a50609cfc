use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{ApiError, ApiResponse, SelfService};
use crate::config::{ApiConfig, AuthConfig, DEFAULT_CM_API_VERSION, DEFAULT_USER_AGENT};

/// How each request proves who it is.
#[derive(Debug, Clone)]
enum Credential {
    Bearer(String),
    Cookie(String),
}

/// Self Service API client.
pub struct HttpClient {
    client: Client,
    base_url: String,
    account_id: String,
    api_version: String,
    credential: Credential,
}

impl HttpClient {
    /// Authenticates and opens a Self Service session.
    ///
    /// Login methods are tried in order: access token, refresh token,
    /// email and password.
    pub async fn connect(api: &ApiConfig, auth: &AuthConfig) -> Result<Self, ApiError> {
        let account_id = api
            .account_id
            .clone()
            .ok_or_else(|| ApiError::Auth("account_id is required".to_string()))?;

        let client = Client::builder().user_agent(DEFAULT_USER_AGENT).build()?;

        let credential = if let Some(token) = &auth.access_token {
            info!("Using pre-authenticated access token");
            Credential::Bearer(token.clone())
        } else if let Some(refresh) = &auth.refresh_token {
            info!("Logging into Cloud Management using OAuth @ {}", api.api_base());
            Credential::Bearer(exchange_refresh_token(&client, api.api_base(), refresh).await?)
        } else if let (Some(email), Some(password)) = (&auth.email, &auth.password) {
            info!("Logging into Cloud Management @ {}", api.api_base());
            Credential::Cookie(
                password_session(&client, api.api_base(), &account_id, email, password).await?,
            )
        } else {
            return Err(ApiError::MissingCredentials);
        };

        let this = Self {
            client,
            base_url: api.selfservice_base().to_string(),
            account_id,
            api_version: api.api_version.clone(),
            credential,
        };
        this.open_session().await?;
        Ok(this)
    }

    /// Builds a client around an existing access token without logging in.
    pub fn with_access_token(
        api: &ApiConfig,
        token: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let account_id = api
            .account_id
            .clone()
            .ok_or_else(|| ApiError::Auth("account_id is required".to_string()))?;
        Ok(Self {
            client: Client::builder().user_agent(DEFAULT_USER_AGENT).build()?,
            base_url: api.selfservice_base().to_string(),
            account_id,
            api_version: api.api_version.clone(),
            credential: Credential::Bearer(token.into()),
        })
    }

    async fn open_session(&self) -> Result<(), ApiError> {
        info!("Logging into self service @ {}", self.base_url);
        let url = format!(
            "{}/api/catalog/new_session?account_id={}",
            self.base_url, self.account_id
        );
        let response = self.authorize(self.client.get(&url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Auth(ApiError::http(status.as_u16(), body).format()));
        }
        Ok(())
    }

    /// Collection URL of executions for this account.
    pub fn executions_url(&self) -> String {
        format!(
            "{}/api/manager/projects/{}/executions",
            self.base_url, self.account_id
        )
    }

    /// Collection URL of operations for this account.
    pub fn operations_url(&self) -> String {
        format!(
            "{}/api/manager/projects/{}/operations",
            self.base_url, self.account_id
        )
    }

    /// URL of the compile action.
    pub fn compile_url(&self) -> String {
        format!(
            "{}/api/designer/collections/{}/templates/actions/compile",
            self.base_url, self.account_id
        )
    }

    /// Collection URL of designer templates for this account.
    pub fn templates_url(&self) -> String {
        format!(
            "{}/api/designer/collections/{}/templates",
            self.base_url, self.account_id
        )
    }

    /// Collection URL of published catalog applications.
    pub fn applications_url(&self) -> String {
        format!(
            "{}/api/catalog/catalogs/{}/applications",
            self.base_url, self.account_id
        )
    }

    /// Href of a designer template, as catalog applications refer to it.
    pub fn template_href(&self, id: &str) -> String {
        format!("/api/designer/collections/{}/templates/{}", self.account_id, id)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.credential {
            Credential::Bearer(token) => builder.bearer_auth(token),
            Credential::Cookie(cookie) => builder.header(reqwest::header::COOKIE, cookie),
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        debug!(%method, url, "self service request");
        self.authorize(self.client.request(method, url))
            .header("X-Api-Version", &self.api_version)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<ApiResponse, ApiError> {
        let response = builder.send().await?;
        into_api_response(response).await
    }
}

async fn into_api_response(response: Response) -> Result<ApiResponse, ApiError> {
    let status = response.status();
    let location = response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await?;

    if !status.is_success() {
        return Err(ApiError::http(status.as_u16(), body));
    }

    Ok(ApiResponse {
        status: status.as_u16(),
        location,
        body,
    })
}

async fn exchange_refresh_token(
    client: &Client,
    api_base: &str,
    refresh_token: &str,
) -> Result<String, ApiError> {
    #[derive(Deserialize)]
    struct TokenResponse {
        access_token: String,
    }

    let response = client
        .post(format!("{}/api/oauth2", api_base))
        .header("X-API-VERSION", DEFAULT_CM_API_VERSION)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .send()
        .await?;

    let response = into_api_response(response)
        .await
        .map_err(|e| ApiError::Auth(e.format()))?;
    Ok(response.json::<TokenResponse>()?.access_token)
}

async fn password_session(
    client: &Client,
    api_base: &str,
    account_id: &str,
    email: &str,
    password: &str,
) -> Result<String, ApiError> {
    let account_href = format!("/api/accounts/{}", account_id);
    let response = client
        .post(format!("{}/api/session", api_base))
        .header("X-API-VERSION", DEFAULT_CM_API_VERSION)
        .form(&[
            ("email", email),
            ("password", password),
            ("account_href", account_href.as_str()),
        ])
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Auth(ApiError::http(status, body).format()));
    }

    let cookie = response
        .cookies()
        .find(|c| c.name() == "rs_gbl")
        .map(|c| format!("rs_gbl={}", c.value()))
        .ok_or_else(|| ApiError::Auth("session response carried no rs_gbl cookie".to_string()));
    cookie
}

#[derive(Debug, Serialize)]
struct OperationRequest<'a> {
    execution_id: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    options: Vec<OperationOption<'a>>,
}

#[derive(Debug, Serialize)]
struct OperationOption<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

fn operation_request<'a>(
    execution_id: &'a str,
    name: &'a str,
    params: &'a BTreeMap<String, String>,
) -> OperationRequest<'a> {
    OperationRequest {
        execution_id,
        name,
        options: params
            .iter()
            .map(|(k, v)| OperationOption {
                name: k,
                kind: "string",
                value: v,
            })
            .collect(),
    }
}

#[async_trait]
impl SelfService for HttpClient {
    async fn compile_template(&self, source: &str) -> Result<ApiResponse, ApiError> {
        let url = self.compile_url();
        self.send(self.request(Method::POST, &url).form(&[("source", source)]))
            .await
    }

    async fn create_execution(&self, source: &str) -> Result<ApiResponse, ApiError> {
        let url = self.executions_url();
        self.send(self.request(Method::POST, &url).form(&[("source", source)]))
            .await
    }

    async fn show_execution(&self, id: &str) -> Result<ApiResponse, ApiError> {
        let url = format!("{}/{}", self.executions_url(), id);
        self.send(self.request(Method::GET, &url)).await
    }

    async fn delete_execution(&self, id: &str) -> Result<ApiResponse, ApiError> {
        let url = format!("{}/{}", self.executions_url(), id);
        self.send(self.request(Method::DELETE, &url)).await
    }

    async fn create_operation(
        &self,
        execution_id: &str,
        name: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.operations_url();
        let body = operation_request(execution_id, name, params);
        self.send(self.request(Method::POST, &url).json(&body)).await
    }

    async fn show_operation(&self, id: &str) -> Result<ApiResponse, ApiError> {
        let url = format!("{}/{}", self.operations_url(), id);
        self.send(self.request(Method::GET, &url)).await
    }
}

fn source_form(file_name: &str, source: &str) -> Form {
    Form::new().part(
        "source",
        Part::text(source.to_string()).file_name(file_name.to_string()),
    )
}

/// Calls used by the command line client only.
impl HttpClient {
    pub async fn list_templates(&self) -> Result<ApiResponse, ApiError> {
        let url = self.templates_url();
        self.send(self.request(Method::GET, &url)).await
    }

    /// Uploads a new template. The response location is its href.
    pub async fn create_template(
        &self,
        file_name: &str,
        source: &str,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.templates_url();
        let form = source_form(file_name, source);
        self.send(self.request(Method::POST, &url).multipart(form))
            .await
    }

    /// Replaces the source of an uploaded template.
    pub async fn update_template(
        &self,
        id: &str,
        file_name: &str,
        source: &str,
    ) -> Result<ApiResponse, ApiError> {
        let url = format!("{}/{}", self.templates_url(), id);
        let form = source_form(file_name, source);
        self.send(self.request(Method::PUT, &url).multipart(form))
            .await
    }

    /// Publishes a template to the catalog, optionally replacing an
    /// application already published from it.
    pub async fn publish_template(
        &self,
        id: &str,
        overridden_application_href: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let url = format!("{}/actions/publish", self.templates_url());
        let mut form = vec![("id", id)];
        if let Some(href) = overridden_application_href {
            form.push(("overridden_application_href", href));
        }
        self.send(self.request(Method::POST, &url).form(&form)).await
    }

    pub async fn list_applications(&self) -> Result<ApiResponse, ApiError> {
        let url = self.applications_url();
        self.send(self.request(Method::GET, &url)).await
    }

    pub async fn list_executions(&self) -> Result<ApiResponse, ApiError> {
        let url = self.executions_url();
        self.send(self.request(Method::GET, &url)).await
    }

    /// Shows an execution in one of the `default`, `expanded` or `source` views.
    pub async fn show_execution_view(&self, id: &str, view: &str) -> Result<ApiResponse, ApiError> {
        let url = format!("{}/{}", self.executions_url(), id);
        self.send(self.request(Method::GET, &url).query(&[("view", view)]))
            .await
    }

    /// Launches an execution with launch options given as raw JSON.
    pub async fn create_execution_with_options(
        &self,
        source: &str,
        options: &Value,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.executions_url();
        let body = json!({ "source": source, "options": options });
        self.send(self.request(Method::POST, &url).json(&body)).await
    }

    /// Lists operations, narrowed by filters such as `execution_id==<id>`.
    pub async fn list_operations(&self, filters: &[String]) -> Result<ApiResponse, ApiError> {
        let url = self.operations_url();
        let query: Vec<(&str, &str)> = filters.iter().map(|f| ("filter[]", f.as_str())).collect();
        self.send(self.request(Method::GET, &url).query(&query))
            .await
    }

    /// Runs an operation with options given as raw JSON.
    pub async fn create_operation_with_options(
        &self,
        execution_id: &str,
        name: &str,
        options: &Value,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.operations_url();
        let body = json!({ "execution_id": execution_id, "name": name, "options": options });
        self.send(self.request(Method::POST, &url).json(&body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_config() -> ApiConfig {
        ApiConfig {
            selfservice_url: "https://ss.example.com/".to_string(),
            account_id: Some("42".to_string()),
            ..ApiConfig::default()
        }
    }

    #[test]
    fn test_urls() {
        let client = HttpClient::with_access_token(&api_config(), "token").unwrap();
        assert_eq!(
            client.executions_url(),
            "https://ss.example.com/api/manager/projects/42/executions"
        );
        assert_eq!(
            client.operations_url(),
            "https://ss.example.com/api/manager/projects/42/operations"
        );
        assert_eq!(
            client.compile_url(),
            "https://ss.example.com/api/designer/collections/42/templates/actions/compile"
        );
    }

    #[test]
    fn test_template_urls() {
        let client = HttpClient::with_access_token(&api_config(), "token").unwrap();
        assert_eq!(
            client.templates_url(),
            "https://ss.example.com/api/designer/collections/42/templates"
        );
        assert_eq!(
            client.applications_url(),
            "https://ss.example.com/api/catalog/catalogs/42/applications"
        );
        assert_eq!(
            client.template_href("t1"),
            "/api/designer/collections/42/templates/t1"
        );
    }

    #[test]
    fn test_requires_account_id() {
        let api = ApiConfig::default();
        assert!(matches!(
            HttpClient::with_access_token(&api, "token"),
            Err(ApiError::Auth(_))
        ));
    }

    #[test]
    fn test_operation_request_body() {
        let mut params = BTreeMap::new();
        params.insert("size".to_string(), "large".to_string());
        let body = serde_json::to_value(operation_request("e1", "scale", &params)).unwrap();
        assert_eq!(body["execution_id"], "e1");
        assert_eq!(body["name"], "scale");
        assert_eq!(body["options"][0]["name"], "size");
        assert_eq!(body["options"][0]["type"], "string");
        assert_eq!(body["options"][0]["value"], "large");

        let empty = BTreeMap::new();
        let body = serde_json::to_value(operation_request("e1", "terminate", &empty)).unwrap();
        assert!(body.get("options").is_none());
    }

    #[tokio::test]
    async fn test_connect_without_credentials() {
        let result = HttpClient::connect(&api_config(), &AuthConfig::default()).await;
        assert!(matches!(result, Err(ApiError::MissingCredentials)));
    }
}
