//! vizqa CLI - Answer questions from a tabular query service
//!
//! Usage:
//!   vizqa ask <question> --dataset <luid> [--json]
//!   vizqa metadata --dataset <luid>
//!   vizqa validate <query.json> --dataset <luid>
//!   vizqa prompt <question> --dataset <luid>
//!
//! Examples:
//!   VIZQA_TOKEN=... vizqa ask "total sales by region" --dataset 7a3c-...
//!   vizqa validate query.json --dataset 7a3c-... --token "$TOKEN"
//!   RUST_LOG=vizqa=debug vizqa prompt "top 5 states by profit" --dataset 7a3c-...

use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vizqa::compiler::GroundingDocument;
use vizqa::config::Settings;
use vizqa::credential::Credential;
use vizqa::metadata::{DatasetMetadata, MetadataGrounder};
use vizqa::service::{query_request_body, HttpTabularService};
use vizqa::validation;
use vizqa::DatasourceQa;

#[derive(Parser)]
#[command(name = "vizqa")]
#[command(about = "vizqa - Natural-language questions over a tabular query service")]
#[command(version)]
struct Cli {
    /// Path to a vizqa.toml (defaults to the standard search path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Target {
    /// Dataset identifier (datasource LUID)
    #[arg(short, long)]
    dataset: String,

    /// Service credential token
    #[arg(short, long, env = "VIZQA_TOKEN", hide_env_values = true)]
    token: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question from a dataset
    Ask {
        /// The question, in plain language
        question: String,

        #[command(flatten)]
        target: Target,

        /// Print the full answer payload as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the grounded catalog of a dataset
    Metadata {
        #[command(flatten)]
        target: Target,
    },

    /// Check a hand-written query against a dataset without running it
    Validate {
        /// Path to the query JSON
        file: PathBuf,

        #[command(flatten)]
        target: Target,
    },

    /// Print the document the model would see for a question
    Prompt {
        /// The question, in plain language
        question: String,

        #[command(flatten)]
        target: Target,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let settings = match load_settings(cli.config.as_ref()) {
        Ok(s) => s,
        Err(code) => return code,
    };

    match cli.command {
        Commands::Ask {
            question,
            target,
            json,
        } => cmd_ask(&settings, &question, target, json).await,
        Commands::Metadata { target } => cmd_metadata(&settings, target).await,
        Commands::Validate { file, target } => cmd_validate(&settings, file, target).await,
        Commands::Prompt { question, target } => cmd_prompt(&settings, &question, target).await,
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vizqa=warn"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings, ExitCode> {
    let loaded = match path {
        Some(p) => Settings::from_file(p),
        None => Settings::load(),
    };
    loaded.map_err(|e| {
        eprintln!("Configuration error: {}", e);
        ExitCode::FAILURE
    })
}

async fn cmd_ask(settings: &Settings, question: &str, target: Target, json: bool) -> ExitCode {
    let qa = match DatasourceQa::from_settings(settings) {
        Ok(qa) => qa,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let answer = match qa
        .ask(question, &target.dataset, Credential::new(target.token))
        .await
    {
        Ok(answer) => answer,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if json {
        match serde_json::to_string_pretty(&answer) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                eprintln!("Error serializing answer: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", answer.rationale);
        println!();
        println!("{}", answer.formatted_table);
        println!();
        println!(
            "-- {} row(s) after {} attempt(s)",
            answer.row_count, answer.attempts
        );
    }
    ExitCode::SUCCESS
}

async fn cmd_metadata(settings: &Settings, target: Target) -> ExitCode {
    let metadata = match ground(settings, &target).await {
        Ok(m) => m,
        Err(code) => return code,
    };

    if let Some(info) = &metadata.datasource {
        println!("Datasource: {}", info.name);
        if let Some(owner) = &info.owner {
            println!("Owner: {}", owner);
        }
        println!();
    }

    println!("Fields:");
    for field in metadata.visible_fields() {
        print!("  - {} ({})", field.field_caption, field.data_type);
        if !field.sample_values.is_empty() {
            let samples: Vec<String> = field.sample_values.iter().map(|v| v.to_string()).collect();
            print!(" e.g. {}", samples.join(", "));
        }
        println!();
        if let Some(description) = &field.description {
            println!("      {}", description);
        }
    }

    let hidden = metadata.fields.iter().filter(|f| f.hidden).count();
    if hidden > 0 {
        println!();
        println!("{} hidden field(s) omitted", hidden);
    }
    ExitCode::SUCCESS
}

async fn cmd_validate(settings: &Settings, file: PathBuf, target: Target) -> ExitCode {
    let source = match fs::read_to_string(&file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let payload: serde_json::Value = match serde_json::from_str(&source) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error parsing '{}': {}", file.display(), e);
            return ExitCode::FAILURE;
        }
    };
    // Accept either a bare query or a full request body.
    let payload = payload.get("query").cloned().unwrap_or(payload);

    let metadata = match ground(settings, &target).await {
        Ok(m) => m,
        Err(code) => return code,
    };

    match validation::check(&payload, &metadata) {
        Ok(query) => {
            let body = query_request_body(&target.dataset, &query);
            match serde_json::to_string_pretty(&body) {
                Ok(s) => println!("{}", s),
                Err(e) => {
                    eprintln!("Error serializing query: {}", e);
                    return ExitCode::FAILURE;
                }
            }
            ExitCode::SUCCESS
        }
        Err(failure) => {
            eprintln!("Validation errors:");
            for error in &failure.errors {
                eprintln!("  {}", error);
            }
            ExitCode::FAILURE
        }
    }
}

async fn cmd_prompt(settings: &Settings, question: &str, target: Target) -> ExitCode {
    let metadata = match ground(settings, &target).await {
        Ok(m) => m,
        Err(code) => return code,
    };

    let catalog = vizqa::schema::SchemaCatalog::standard();
    let document = GroundingDocument::build(question, &metadata, &catalog, &[]);
    println!("{}", document.render());
    ExitCode::SUCCESS
}

async fn ground(settings: &Settings, target: &Target) -> Result<Arc<DatasetMetadata>, ExitCode> {
    let service = match HttpTabularService::from_settings(&settings.service) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    let grounder = MetadataGrounder::from_settings(Arc::new(service), &settings.metadata);
    let credential = Credential::new(target.token.clone());
    grounder
        .ground(&target.dataset, &credential)
        .await
        .map_err(|e| {
            eprintln!("Grounding error: {}", e);
            ExitCode::FAILURE
        })
}
