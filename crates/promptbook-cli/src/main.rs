//! CLI binary for validating, inspecting and running Promptbook pipelines.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use promptbook_pipeline::{
    compile, lint, render, validate_pipeline, ConsoleDialogTools, ExecutionSettings,
    ExecutionTools, Pipeline, PipelineExecutor, Severity, SimulatedLlmTools, ValidatedPipeline,
};
use promptbook_types::Parameters;

#[derive(Parser)]
#[command(name = "ptbk", version, about = "Markdown pipeline runner for LLM workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a pipeline for syntax and logic errors
    Validate {
        /// Path to the pipeline .ptbk.md file
        pipeline: PathBuf,
    },

    /// Compile a pipeline to JSON
    Compile {
        /// Path to the pipeline .ptbk.md file
        pipeline: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render a compiled JSON pipeline back to Markdown
    Render {
        /// Path to the compiled pipeline JSON
        json: PathBuf,
    },

    /// Show information about a pipeline
    Info {
        /// Path to the pipeline .ptbk.md file
        pipeline: PathBuf,
    },

    /// Execute a pipeline
    Run {
        /// Path to the pipeline .ptbk.md file
        pipeline: PathBuf,

        /// Input parameter as key=value, repeatable
        #[arg(short, long = "input", value_parser = parse_key_value)]
        inputs: Vec<(String, String)>,

        /// Answer prompt templates with the simulated model (no LLM calls)
        #[arg(long)]
        dry_run: bool,

        /// Attempts per template before giving up
        #[arg(long)]
        max_attempts: Option<usize>,

        /// JSON file with execution settings
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Write the Markdown execution report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got \"{s}\""))?;
    let key = key.trim().trim_start_matches('{').trim_end_matches('}');
    if key.is_empty() {
        return Err(format!("empty parameter name in \"{s}\""));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate { pipeline } => {
            cmd_validate(&pipeline)?;
        }
        Commands::Compile { pipeline, output } => {
            cmd_compile(&pipeline, output.as_deref())?;
        }
        Commands::Render { json } => {
            cmd_render(&json)?;
        }
        Commands::Info { pipeline } => {
            cmd_info(&pipeline)?;
        }
        Commands::Run {
            pipeline,
            inputs,
            dry_run,
            max_attempts,
            settings,
            report,
        } => {
            cmd_run(
                &pipeline,
                inputs,
                dry_run,
                max_attempts,
                settings.as_deref(),
                report.as_deref(),
            )
            .await?;
        }
    }

    Ok(())
}

fn load_pipeline(path: &Path) -> anyhow::Result<Pipeline> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let pipeline =
        compile(&source).with_context(|| format!("Failed to compile {}", path.display()))?;
    Ok(pipeline)
}

fn load_validated(path: &Path) -> anyhow::Result<ValidatedPipeline> {
    let pipeline = load_pipeline(path)?;
    let validated =
        validate_pipeline(pipeline).with_context(|| format!("{} is not valid", path.display()))?;
    Ok(validated)
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let pipeline = load_pipeline(path)?;
    let diagnostics = lint(&pipeline);

    if diagnostics.is_empty() {
        println!("Pipeline is valid");
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        println!("[{}] {}: {}", severity, diag.rule, diag.message);
        if let Some(fix) = &diag.fix {
            println!("        fix: {fix}");
        }
    }

    if has_error {
        std::process::exit(1);
    }
    println!("Pipeline is valid");
    Ok(())
}

fn cmd_compile(path: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let pipeline = load_validated(path)?;
    let json = serde_json::to_string_pretty(pipeline.pipeline())?;
    match output {
        Some(out) => {
            std::fs::write(out, json)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            println!("Compiled {} to {}", path.display(), out.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn cmd_render(path: &Path) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let pipeline: Pipeline = serde_json::from_str(&json)
        .with_context(|| format!("{} is not a compiled pipeline", path.display()))?;
    print!("{}", render(&pipeline));
    Ok(())
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let pipeline = load_validated(path)?;

    println!("Pipeline: {}", pipeline.title);
    if let Some(url) = &pipeline.pipeline_url {
        println!("URL: {url}");
    }
    println!("Promptbook version: {}", pipeline.promptbook_version);
    if let Some(description) = &pipeline.description {
        println!("Description: {description}");
    }

    println!("\nParameters:");
    for parameter in &pipeline.parameters {
        let role = match (parameter.is_input, parameter.is_output) {
            (true, _) => "input",
            (false, true) => "output",
            (false, false) => "intermediate",
        };
        match &parameter.description {
            Some(description) => println!("  {{{}}} [{role}] {description}", parameter.name),
            None => println!("  {{{}}} [{role}]", parameter.name),
        }
    }

    println!("\nTemplates:");
    for template in &pipeline.templates {
        let dependencies = template
            .dependent_parameter_names
            .iter()
            .map(|name| format!("{{{name}}}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  {} [{}] ({}) -> {{{}}}",
            template.name, template.execution_type, dependencies, template.resulting_parameter_name
        );
    }

    Ok(())
}

async fn cmd_run(
    path: &Path,
    inputs: Vec<(String, String)>,
    dry_run: bool,
    max_attempts: Option<usize>,
    settings_path: Option<&Path>,
    report_path: Option<&Path>,
) -> anyhow::Result<()> {
    let pipeline = load_validated(path)?;

    let mut settings = match settings_path {
        Some(p) => {
            let json = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read {}", p.display()))?;
            serde_json::from_str::<ExecutionSettings>(&json)
                .with_context(|| format!("Invalid settings in {}", p.display()))?
        }
        None => ExecutionSettings::default(),
    };
    if let Some(max) = max_attempts {
        settings.max_execution_attempts = max;
    }
    tracing::debug!(?settings, dry_run, "execution settings");

    println!("Running pipeline: {}", pipeline.title);
    if dry_run {
        println!("(dry run mode -- no LLM calls)");
    }

    let mut tools = ExecutionTools::new().with_user_interface(ConsoleDialogTools);
    if dry_run {
        tools = tools.with_llm(SimulatedLlmTools::new());
    }

    let input: Parameters = inputs.into_iter().collect();
    let executor = PipelineExecutor::new(Arc::new(pipeline), tools).with_settings(settings);
    let result = executor.execute(input).await;

    if let Some(out) = report_path {
        std::fs::write(out, result.execution_report.to_markdown())
            .with_context(|| format!("Failed to write {}", out.display()))?;
        println!("Report: {}", out.display());
    }

    if !result.is_successful {
        for error in &result.errors {
            eprintln!("Error: {error}");
        }
        std::process::exit(1);
    }

    println!("\nPipeline completed");
    for (name, value) in &result.output_parameters {
        println!("\n{{{name}}}:\n{value}");
    }
    if !result.usage.is_zero() {
        println!("\nTotal cost: ${:.4}", result.usage.price);
    }

    Ok(())
}
