use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use skyrun_core::config::DEFAULT_TEST_PATTERN;

mod commands;

#[derive(Parser)]
#[command(name = "skyrun")]
#[command(about = "Self Service client and template test runner", long_about = None)]
struct Cli {
    /// Log remote calls and state transitions
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of skyrun.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// YAML file with account id, endpoints and credentials
    #[arg(long, global = true)]
    auth_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Work with template documents
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },
    /// Inspect or remove executions
    Execution {
        #[command(subcommand)]
        action: ExecutionAction,
    },
    /// Run operations against executions
    Operation {
        #[command(subcommand)]
        action: OperationAction,
    },
    /// Run every template matching a pattern and report the results
    Test {
        /// Glob of templates to run
        #[arg(default_value = DEFAULT_TEST_PATTERN)]
        pattern: String,

        /// Seconds between status polls
        #[arg(long)]
        interval: Option<u64>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// Expand #include lines and write the result
    Preprocess {
        file: PathBuf,

        /// Output file. Defaults to processed-<name> next to the source
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check template syntax remotely
    Compile { file: PathBuf },
    /// Launch an execution from a template
    Execute {
        file: PathBuf,

        /// JSON file of launch options
        #[arg(long)]
        options_file: Option<PathBuf>,
    },
    /// Upload a template, replacing any template with the same name
    Upsert { file: PathBuf },
    /// Upsert a template and publish it to the catalog
    Publish {
        file: PathBuf,

        /// Replace the catalog application already published from this template
        #[arg(long = "override")]
        override_existing: bool,
    },
    /// List uploaded templates
    List {
        /// Only print these properties of each template
        #[arg(long = "property")]
        properties: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum View {
    Default,
    Expanded,
    Source,
}

impl View {
    fn as_str(self) -> &'static str {
        match self {
            View::Default => "default",
            View::Expanded => "expanded",
            View::Source => "source",
        }
    }
}

#[derive(Subcommand)]
enum ExecutionAction {
    /// List executions
    List {
        /// Only print these properties of each execution
        #[arg(long = "property")]
        properties: Vec<String>,
    },
    /// Print an execution
    Show {
        /// Execution id or href
        id: String,

        #[arg(long, value_enum, default_value_t = View::Default)]
        view: View,

        /// Only print these properties
        #[arg(long = "property")]
        properties: Vec<String>,
    },
    /// Delete an execution
    Delete {
        /// Execution id or href
        id: String,
    },
}

#[derive(Subcommand)]
enum OperationAction {
    /// Run a named operation
    Create {
        name: String,

        /// Execution id or href
        execution: String,

        /// Operation parameter as key=value
        #[arg(short, long = "param", value_parser = commands::parse_param)]
        params: Vec<(String, String)>,

        /// JSON file of operation options, instead of --param
        #[arg(long, conflicts_with = "params")]
        options_file: Option<PathBuf>,
    },
    /// List operations
    List {
        /// Filter such as execution_id==<id>
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Only print these properties of each operation
        #[arg(long = "property")]
        properties: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_log(cli.verbose);

    let ctx = commands::Context::new(cli.config, cli.auth_file)?;

    match cli.command {
        Commands::Template { action } => match action {
            TemplateAction::Preprocess { file, output } => {
                commands::preprocess(&file, output.as_deref())
            }
            TemplateAction::Compile { file } => commands::compile(&ctx, &file).await,
            TemplateAction::Execute { file, options_file } => {
                commands::execute(&ctx, &file, options_file.as_deref()).await
            }
            TemplateAction::Upsert { file } => commands::upsert(&ctx, &file).await,
            TemplateAction::Publish {
                file,
                override_existing,
            } => commands::publish(&ctx, &file, override_existing).await,
            TemplateAction::List { properties } => {
                commands::list_templates(&ctx, &properties).await
            }
        },
        Commands::Execution { action } => match action {
            ExecutionAction::List { properties } => {
                commands::list_executions(&ctx, &properties).await
            }
            ExecutionAction::Show {
                id,
                view,
                properties,
            } => commands::show_execution(&ctx, &id, view.as_str(), &properties).await,
            ExecutionAction::Delete { id } => commands::delete_execution(&ctx, &id).await,
        },
        Commands::Operation { action } => match action {
            OperationAction::Create {
                name,
                execution,
                params,
                options_file,
            } => {
                commands::create_operation(&ctx, &name, &execution, params, options_file.as_deref())
                    .await
            }
            OperationAction::List {
                filters,
                properties,
            } => commands::list_operations(&ctx, &filters, &properties).await,
        },
        Commands::Test {
            pattern,
            interval,
            timeout,
        } => {
            let passed = commands::test(&ctx, &pattern, interval, timeout).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn init_log(verbose: bool) {
    let default = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(default.into())
                .with_env_var("SKYRUN_LOG")
                .from_env_lossy(),
        )
        .init();
}
