//! qbridge - run a portable query against a JSON dataset

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use log::info;
use qbridge::codec;
use qbridge::config::{ExecutionOptions, TypeAnnotationMode};
use qbridge::context::ExecutionContext;
use qbridge::dataset::{build_database, load_dataset, load_query, outcome_to_json};
use qbridge::executor::ExpressionExecutor;
use qbridge::types::TypeResolver;
use std::path::PathBuf;
use std::sync::Arc;

/// qbridge - translate and execute a portable query expression
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Dataset file (JSON types and tables)
    #[arg(short = 'D', long)]
    data: PathBuf,

    /// Query file (JSON, or bincode when it ends in .bin)
    #[arg(short, long)]
    query: PathBuf,

    /// Which record types carry type information in the output
    #[arg(short, long, value_enum, default_value_t = TypeAnnotationMode::Named)]
    annotate: TypeAnnotationMode,

    /// Disable folding of locally evaluable sub-expressions
    #[arg(long)]
    no_fold: bool,

    /// Print the translated native query and exit
    #[arg(short, long)]
    translate: bool,

    /// Also write the outcome as a bincode payload
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let dataset = load_dataset(&args.data)?;
    let database = build_database(&dataset).context("Failed to build dataset")?;
    let query = load_query(&args.query)?;

    let types: Arc<dyn TypeResolver> = database.type_registry().clone();
    let context = ExecutionContext::for_data_context(database)
        .type_resolver(types)
        .options(ExecutionOptions {
            type_annotation: args.annotate,
            fold_local_expressions: !args.no_fold,
        })
        .build();
    let executor = ExpressionExecutor::new(context);

    if args.translate {
        println!("{}", executor.translate(&query)?);
        return Ok(());
    }

    // Ctrl+C abandons the running query
    let cancel = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let outcome = executor.execute_async(query, cancel).await?;

    println!("{}", serde_json::to_string_pretty(&outcome_to_json(&outcome))?);

    if let Some(path) = &args.output {
        std::fs::write(path, codec::encode_outcome(&outcome)?)
            .with_context(|| format!("Failed to write outcome: {:?}", path))?;
        info!("Wrote outcome to {}", path.display());
    }

    Ok(())
}
