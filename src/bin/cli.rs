//! Binary entry point for the restmap command line tool.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use restmap::{
    client::{LocalTransport, Request, Transport},
    error::{ErrorBody, ErrorWithCode, MappingError},
    query::parse_query_string,
    store::Repository,
    types::{schema::SchemaFile, TypeGraph},
    wire::{JsonDeserializer, UncheckedContext},
    Config,
};
use serde_json::Value as Json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "restmap",
    version,
    about = "Inspect and run REST mapping queries",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, global = true, value_name = "FILE", help = "TOML configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Parse a query string and print the server-side plan")]
    Plan {
        #[arg(value_name = "QUERY")]
        query: String,
    },

    #[command(about = "Run a request against JSON data described by a schema")]
    Query {
        #[arg(long, value_name = "FILE", help = "TOML schema file")]
        schema: PathBuf,

        #[arg(long, value_name = "FILE", help = "JSON object mapping type names to item arrays")]
        data: PathBuf,

        #[arg(value_name = "PATH", help = "Collection or member path, e.g. critters or critters/5")]
        path: String,

        #[arg(value_name = "QUERY", default_value = "")]
        query: String,
    },

    #[command(about = "Print URI templates of resource types")]
    UriTemplate {
        #[arg(long, value_name = "FILE", help = "TOML schema file")]
        schema: PathBuf,

        #[arg(value_name = "TYPE", help = "Only this type")]
        type_name: Option<String>,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    install_tracing_subscriber();
    if let Err(err) = run() {
        match err.downcast_ref::<MappingError>() {
            Some(mapping) => eprintln!("error: {}", ErrorWithCode(mapping)),
            None => eprintln!("error: {err}"),
        }
        std::process::exit(1);
    }
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::Plan { query } => {
            let parsed = parse_query_string(&query, &config)?;
            let text = parsed.to_string();
            emit(cli.format, &Json::String(text.clone()), || print!("{text}"))?;
        }
        Command::Query {
            schema,
            data,
            path,
            query,
        } => {
            let graph = load_graph(&schema)?;
            let repo = Arc::new(Repository::new(Arc::clone(&graph)));
            let loaded = load_data(&graph, &repo, &data)?;
            info!(items = loaded, path = %path, "cli.query.loaded");

            let base = config.base_uri.trim_end_matches('/').to_owned();
            let transport = LocalTransport::new(graph, repo, config);
            let mut uri = format!("{base}/{}", path.trim_start_matches('/'));
            if !query.is_empty() {
                uri.push('?');
                uri.push_str(query.trim_start_matches('?'));
            }
            let response = transport.send(&Request::get(uri))?;
            if !response.is_success() {
                let body: ErrorBody = serde_json::from_str(&response.body)?;
                return Err(MappingError::from_code(&body.code, &body.message, response.status).into());
            }
            let json: Json = serde_json::from_str(&response.body)?;
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Command::UriTemplate { schema, type_name } => {
            let graph = load_graph(&schema)?;
            let mut rows = Vec::new();
            match type_name {
                Some(name) => {
                    let ty = graph.by_name(&name)?;
                    rows.push((ty.name.clone(), graph.uri_template(ty.id)?));
                }
                None => {
                    for ty in graph.resources() {
                        if ty.primary_id().is_some() {
                            rows.push((ty.name.clone(), graph.uri_template(ty.id)?));
                        }
                    }
                }
            }
            rows.sort();
            let json = Json::Object(
                rows.iter()
                    .map(|(name, template)| (name.clone(), Json::String(template.clone())))
                    .collect(),
            );
            emit(cli.format, &json, || {
                for (name, template) in &rows {
                    println!("{name:<20} {template}");
                }
            })?;
        }
    }
    Ok(())
}

fn load_graph(schema: &Path) -> Result<Arc<TypeGraph>, Box<dyn Error>> {
    let registry = SchemaFile::load(schema)?.into_registry()?;
    Ok(Arc::new(TypeGraph::new(registry)?))
}

fn load_data(graph: &TypeGraph, repo: &Repository, path: &Path) -> Result<usize, Box<dyn Error>> {
    let text = fs::read_to_string(path)
        .map_err(|err| format!("cannot read {}: {err}", path.display()))?;
    let doc: Json = serde_json::from_str(&text)?;
    let Json::Object(collections) = doc else {
        return Err("data file must be a JSON object keyed by type name".into());
    };
    let deserializer = JsonDeserializer::new(graph);
    let mut loaded = 0;
    for (type_name, items) in &collections {
        let ty = graph.by_name(type_name)?;
        let Json::Array(items) = items else {
            return Err(format!("items of '{type_name}' must be an array").into());
        };
        for item in items {
            let value = deserializer.deserialize(item, ty.id, &UncheckedContext, None)?;
            let Some(entity) = value.as_entity() else {
                return Err(format!("items of '{type_name}' must be objects").into());
            };
            repo.insert(entity.clone())?;
            loaded += 1;
        }
    }
    Ok(loaded)
}

fn emit<F>(format: OutputFormat, value: &Json, printer: F) -> Result<(), Box<dyn Error>>
where
    F: Fn(),
{
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => printer(),
    }
    Ok(())
}
