use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::eyre::{eyre, Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use serde_json::Value;
use skyrun_core::api::resource_id_from_href;
use skyrun_core::config::DEFAULT_PREPROCESS_PREFIX;
use skyrun_core::preprocess::template_name;
use skyrun_core::{preprocess as expand, ApiError, Config, HttpClient, SelfService, ShellReport, Suite};

/// Loaded configuration, shared by every command.
pub struct Context {
    config: Config,
}

impl Context {
    pub fn new(config_file: Option<PathBuf>, auth_file: Option<PathBuf>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) => Config::from_file(&path)
                .wrap_err_with(|| format!("loading {}", path.display()))?,
            None => Config::load()?,
        };
        if let Some(path) = auth_file {
            config
                .merge_auth_file(&path)
                .wrap_err_with(|| format!("loading {}", path.display()))?;
        }
        Ok(Self { config })
    }

    async fn client(&self) -> Result<HttpClient> {
        self.config.validate()?;
        HttpClient::connect(&self.config.api, &self.config.auth)
            .await
            .map_err(api_error)
    }
}

fn api_error(e: ApiError) -> color_eyre::Report {
    eyre!(e.format())
}

/// Accepts an execution or operation id, or an href ending in one.
fn resource_id(reference: &str) -> Result<String> {
    resource_id_from_href(reference).ok_or_else(|| eyre!("not an id or href: {:?}", reference))
}

pub fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))
}

/// Pretty prints a JSON body, keeping only `properties` when any are given.
fn print_selected(body: &str, properties: &[String]) {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => {
            let value = select_properties(value, properties);
            println!(
                "{}",
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| body.to_string())
            )
        }
        Err(_) => println!("{}", body),
    }
}

/// Keeps only the named keys of an object, or of every object in an array.
fn select_properties(value: Value, properties: &[String]) -> Value {
    if properties.is_empty() {
        return value;
    }
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| select_properties(item, properties))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| properties.contains(key))
                .collect(),
        ),
        other => other,
    }
}

fn read_options(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).wrap_err_with(|| format!("parsing {}", path.display()))
}

/// Id of the template called `name` in a template index.
fn find_template_id(templates: &Value, name: &str) -> Option<String> {
    templates
        .as_array()?
        .iter()
        .find(|t| t["name"].as_str() == Some(name))
        .and_then(|t| t["id"].as_str())
        .map(str::to_string)
}

/// Href of the catalog application published from `template_href`.
fn find_application_href(applications: &Value, template_href: &str) -> Option<String> {
    applications
        .as_array()?
        .iter()
        .find(|a| a["template_info"]["href"].as_str() == Some(template_href))
        .and_then(|a| a["href"].as_str())
        .map(str::to_string)
}

pub fn preprocess(file: &Path, output: Option<&Path>) -> Result<()> {
    let expanded = expand(file)?;
    let output = match output {
        Some(path) => path.to_path_buf(),
        None => {
            let name = file
                .file_name()
                .ok_or_else(|| eyre!("{} is not a file", file.display()))?;
            file.with_file_name(format!(
                "{}{}",
                DEFAULT_PREPROCESS_PREFIX,
                name.to_string_lossy()
            ))
        }
    };
    std::fs::write(&output, expanded)
        .wrap_err_with(|| format!("writing {}", output.display()))?;
    println!("Preprocessed template written to {}", output.display());
    Ok(())
}

pub async fn compile(ctx: &Context, file: &Path) -> Result<()> {
    let source = expand(file)?;
    let client = ctx.client().await?;
    match client.compile_template(&source).await {
        Ok(_) => {
            println!("{} compiled successfully", file.display());
            Ok(())
        }
        Err(e) if e.is_validation_failure() => Err(eyre!(
            "{} failed to compile\n\n{}",
            file.display(),
            e.format()
        )),
        Err(e) => Err(api_error(e)),
    }
}

/// Creates the template named in `file`, or updates it if one with that
/// name is already uploaded. Returns the template href.
async fn upsert_template(client: &HttpClient, file: &Path) -> Result<String> {
    let source = expand(file)?;
    let name = template_name(&source)?
        .ok_or_else(|| eyre!("{} does not declare a template name", file.display()))?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.cat.rb", name));

    let templates: Value = client
        .list_templates()
        .await
        .and_then(|response| response.json())
        .map_err(api_error)?;

    let href = match find_template_id(&templates, &name) {
        Some(id) => {
            info!(template = %name, %id, "updating template");
            client
                .update_template(&id, &file_name, &source)
                .await
                .map_err(api_error)?;
            client.template_href(&id)
        }
        None => {
            info!(template = %name, "creating template");
            client
                .create_template(&file_name, &source)
                .await
                .map_err(api_error)?
                .location
                .ok_or_else(|| eyre!("template created without a location"))?
        }
    };
    Ok(href)
}

pub async fn upsert(ctx: &Context, file: &Path) -> Result<()> {
    let client = ctx.client().await?;
    let href = upsert_template(&client, file)
        .await
        .wrap_err("Failed to update or create template")?;
    println!("Template upserted: {}", href);
    Ok(())
}

pub async fn publish(ctx: &Context, file: &Path, override_existing: bool) -> Result<()> {
    let client = ctx.client().await?;
    let href = upsert_template(&client, file)
        .await
        .wrap_err("Failed to update or create template")?;
    let id = resource_id(&href)?;

    let response = match client.publish_template(&id, None).await {
        Ok(response) => response,
        Err(e) if e.status() == Some(409) && override_existing => {
            let applications: Value = client
                .list_applications()
                .await
                .and_then(|response| response.json())
                .map_err(api_error)?;
            let application = find_application_href(&applications, &href)
                .ok_or_else(|| eyre!("no catalog application is published from {}", href))?;
            info!(%application, "overriding published application");
            client
                .publish_template(&id, Some(&application))
                .await
                .map_err(api_error)
                .wrap_err("Failed to publish template")?
        }
        Err(e) => return Err(api_error(e).wrap_err("Failed to publish template")),
    };
    println!(
        "Template published: {}",
        response.location.as_deref().unwrap_or(&href)
    );
    Ok(())
}

pub async fn list_templates(ctx: &Context, properties: &[String]) -> Result<()> {
    let client = ctx.client().await?;
    let response = client.list_templates().await.map_err(api_error)?;
    print_selected(&response.body, properties);
    Ok(())
}

pub async fn execute(ctx: &Context, file: &Path, options_file: Option<&Path>) -> Result<()> {
    let source = expand(file)?;
    let client = ctx.client().await?;
    let response = match options_file {
        Some(path) => {
            let options = read_options(path)?;
            client.create_execution_with_options(&source, &options).await
        }
        None => client.create_execution(&source).await,
    }
    .map_err(api_error)?;
    let href = response.location.clone().unwrap_or_default();
    println!("Execution created: {}", href);
    Ok(())
}

pub async fn list_executions(ctx: &Context, properties: &[String]) -> Result<()> {
    let client = ctx.client().await?;
    let response = client.list_executions().await.map_err(api_error)?;
    print_selected(&response.body, properties);
    Ok(())
}

pub async fn show_execution(
    ctx: &Context,
    reference: &str,
    view: &str,
    properties: &[String],
) -> Result<()> {
    let id = resource_id(reference)?;
    let client = ctx.client().await?;
    let response = client
        .show_execution_view(&id, view)
        .await
        .map_err(api_error)?;
    print_selected(&response.body, properties);
    Ok(())
}

pub async fn delete_execution(ctx: &Context, reference: &str) -> Result<()> {
    let id = resource_id(reference)?;
    let client = ctx.client().await?;
    client.delete_execution(&id).await.map_err(api_error)?;
    println!("Execution {} deleted", id);
    Ok(())
}

pub async fn create_operation(
    ctx: &Context,
    name: &str,
    execution: &str,
    params: Vec<(String, String)>,
    options_file: Option<&Path>,
) -> Result<()> {
    let execution_id = resource_id(execution)?;
    let client = ctx.client().await?;
    let response = match options_file {
        Some(path) => {
            let options = read_options(path)?;
            client
                .create_operation_with_options(&execution_id, name, &options)
                .await
        }
        None => {
            let params: BTreeMap<String, String> = params.into_iter().collect();
            client.create_operation(&execution_id, name, &params).await
        }
    }
    .map_err(api_error)?;
    println!(
        "Operation {} created: {}",
        name,
        response.location.as_deref().unwrap_or_default()
    );
    Ok(())
}

pub async fn list_operations(
    ctx: &Context,
    filters: &[String],
    properties: &[String],
) -> Result<()> {
    let client = ctx.client().await?;
    let response = client.list_operations(filters).await.map_err(api_error)?;
    print_selected(&response.body, properties);
    Ok(())
}

/// Drives a suite until every template finishes or the timeout passes.
///
/// Returns false if any case failed or errored, or the run timed out.
pub async fn test(
    ctx: &Context,
    pattern: &str,
    interval: Option<u64>,
    timeout: Option<u64>,
) -> Result<bool> {
    let interval = interval
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or_else(|| ctx.config.test.poll_interval());
    let timeout = timeout
        .map(Duration::from_secs)
        .or_else(|| ctx.config.test.timeout());

    let client: Arc<dyn SelfService> = Arc::new(ctx.client().await?);
    let mut suite = Suite::discover(client, pattern)?;
    if suite.templates().is_empty() {
        warn!(pattern, "no templates matched");
        println!("No templates matched {}", pattern);
        return Ok(true);
    }
    info!(templates = suite.templates().len(), ?interval, "starting test run");

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} [{elapsed}] {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(120));

    let mut report = ShellReport::new(io::stdout());
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let started = Instant::now();
    let mut timed_out = false;

    loop {
        ticker.tick().await;
        let more = suite.pump().await;
        spinner.suspend(|| report.progress(&suite))?;

        let finished = suite.templates().iter().filter(|t| t.is_finished()).count();
        spinner.set_message(format!(
            "{}/{} templates finished",
            finished,
            suite.templates().len()
        ));

        if !more {
            break;
        }
        if timeout.is_some_and(|limit| started.elapsed() >= limit) {
            timed_out = true;
            break;
        }
    }
    spinner.finish_and_clear();

    report.errors(&suite)?;
    report.failures(&suite)?;
    report.summary(&suite)?;

    if timed_out {
        eprintln!(
            "Timed out after {}s. Unfinished templates may have left executions running:",
            started.elapsed().as_secs()
        );
        for template in suite.templates().iter().filter(|t| !t.is_finished()) {
            eprintln!(
                "  {}: {} (execution {})",
                template.name(),
                template.state(),
                template.execution_id().as_deref().unwrap_or("none")
            );
        }
        return Ok(false);
    }

    Ok(suite.summary().is_green())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("size=large").unwrap(),
            ("size".to_string(), "large".to_string())
        );
        assert_eq!(
            parse_param("query=a=b").unwrap(),
            ("query".to_string(), "a=b".to_string())
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_select_properties() {
        let value = serde_json::json!([
            {"id": "e1", "name": "web", "status": "running"},
            {"id": "e2", "name": "db", "status": "failed"}
        ]);
        let props = vec!["id".to_string(), "status".to_string()];
        assert_eq!(
            select_properties(value.clone(), &props),
            serde_json::json!([
                {"id": "e1", "status": "running"},
                {"id": "e2", "status": "failed"}
            ])
        );
        assert_eq!(select_properties(value.clone(), &[]), value);

        let single = serde_json::json!({"id": "e1", "name": "web"});
        assert_eq!(
            select_properties(single, &["name".to_string()]),
            serde_json::json!({"name": "web"})
        );
    }

    #[test]
    fn test_find_template_id_by_name() {
        let templates = serde_json::json!([
            {"id": "t1", "name": "Web Stack"},
            {"id": "t2", "name": "Database"}
        ]);
        assert_eq!(find_template_id(&templates, "Database").as_deref(), Some("t2"));
        assert_eq!(find_template_id(&templates, "Missing"), None);
        assert_eq!(find_template_id(&serde_json::json!({}), "Database"), None);
    }

    #[test]
    fn test_find_application_for_template() {
        let applications = serde_json::json!([
            {
                "href": "/api/catalog/catalogs/42/applications/a1",
                "template_info": {"href": "/api/designer/collections/42/templates/t1"}
            },
            {
                "href": "/api/catalog/catalogs/42/applications/a2",
                "template_info": {"href": "/api/designer/collections/42/templates/t2"}
            }
        ]);
        assert_eq!(
            find_application_href(&applications, "/api/designer/collections/42/templates/t2")
                .as_deref(),
            Some("/api/catalog/catalogs/42/applications/a2")
        );
        assert_eq!(
            find_application_href(&applications, "/api/designer/collections/42/templates/t9"),
            None
        );
    }

    #[test]
    fn test_read_options() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("options.json");
        std::fs::write(&path, r#"[{"name": "size", "type": "string", "value": "large"}]"#)
            .unwrap();
        let options = read_options(&path).unwrap();
        assert_eq!(options[0]["value"], "large");

        std::fs::write(&path, "not json").unwrap();
        assert!(read_options(&path).is_err());
        assert!(read_options(&temp.path().join("absent.json")).is_err());
    }

    #[test]
    fn test_resource_id_accepts_href() {
        assert_eq!(
            resource_id("/api/manager/projects/1/executions/abc").unwrap(),
            "abc"
        );
        assert_eq!(resource_id("abc").unwrap(), "abc");
        assert!(resource_id("").is_err());
    }
}
