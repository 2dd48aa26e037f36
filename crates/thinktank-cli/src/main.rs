//! `thinktank` binary entry point.

mod audit_sink;
mod cli;
mod config;
mod duration;
mod exit_code;
mod logging;
mod prompt;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use thinktank_core::{
    AuditEntry, AuditEvent, AuditSink, NoopAuditSink, Orchestrator, OutputWriter, Registry, RegistrySource, RunConfig,
    RunContext,
};
use tracing::{error, info};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Models(args) => list_models(args),
    };

    match result {
        Ok(code) => ExitCode::from(code.clamp(0, 255).try_into().unwrap_or(255)),
        Err(e) => {
            error!(error = %e, "thinktank failed");
            ExitCode::from(1)
        }
    }
}

fn list_models(args: cli::ModelsArgs) -> anyhow::Result<i32> {
    let registry = config::load_registry(args.config)?;
    for model in registry.models() {
        println!("{}\t{}\t{}", model.alias, model.provider, model.provider_model_id);
    }
    Ok(0)
}

async fn run(args: cli::RunArgs) -> anyhow::Result<i32> {
    let audit: Arc<dyn AuditSink> = match &args.audit_log {
        Some(path) => audit_sink::FileAuditSink::new(path.clone()),
        None => Arc::new(NoopAuditSink),
    };
    let ctx = RunContext::new(args.timeout.as_deref().map(duration::parse_duration).transpose()?);

    let registry = config::load_registry(args.config.clone())?;
    audit
        .log(AuditEntry::new(
            ctx.correlation_id().clone(),
            AuditEvent::RegistryInitialized {
                source: registry_source_label(registry.source()).to_string(),
            },
        ))
        .await;
    let registry = Arc::new(registry);
    Registry::set_global(Arc::clone(&registry));

    let dir_perm = args.dir_perm.as_deref().map(cli::parse_octal_mode).transpose().map_err(anyhow::Error::msg)?;
    let file_perm = args.file_perm.as_deref().map(cli::parse_octal_mode).transpose().map_err(anyhow::Error::msg)?;

    let prompt = prompt::assemble_prompt(&args.instructions, &args.paths)?;

    let writer = OutputWriter::new(&args.output_dir, dir_perm, file_perm);
    let orchestrator = Orchestrator::new(Arc::clone(&registry), writer, Arc::clone(&audit), args.max_concurrent, args.rpm);

    let config = RunConfig {
        models: args.models.clone(),
        synthesis_model: args.synthesis_model.clone(),
        synthesis_prompt_template: default_synthesis_template(),
    };

    let report = orchestrator.run(&ctx, config, &prompt).await;

    info!(status = ?report.status, "run finished");
    for outcome in &report.outcomes {
        match outcome {
            thinktank_core::ModelOutcome::Success { model, output_path, .. } => {
                println!("{model}: ok -> {output_path}");
            }
            thinktank_core::ModelOutcome::Failure { model, category, message, .. } => {
                println!("{model}: failed ({category:?}) - {message}");
            }
        }
    }
    if let Some(synthesis_outcome) = &report.synthesis {
        match synthesis_outcome {
            thinktank_core::ModelOutcome::Success { output_path, .. } => {
                println!("synthesis: ok -> {output_path}");
            }
            thinktank_core::ModelOutcome::Failure { category, message, .. } => {
                println!("synthesis: failed ({category:?}) - {message}");
            }
        }
    }

    Ok(exit_code::exit_code_for(&report, args.partial_success_tolerant))
}

fn registry_source_label(source: RegistrySource) -> &'static str {
    match source {
        RegistrySource::File => "file",
        RegistrySource::Env => "env",
        RegistrySource::Defaults => "defaults",
    }
}

fn default_synthesis_template() -> String {
    "Synthesize the following independent model responses into a single, coherent answer:\n\n{outputs}".to_string()
}
