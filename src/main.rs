use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use data_platform::schedule::ScheduleExpression;
use data_platform::{config, environment, outputs, platform, writer};

/// Provisioning plan and CloudFormation templates for the e-commerce data
/// platform. The target environment comes from the `ENVIRONMENT` variable.
#[derive(Parser)]
#[command(name = "data-platform", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Platform configuration file
    #[arg(short, long, global = true, default_value = config::DEFAULT_PATH)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the provisioning waves and each stack's resource creation order
    Plan,

    /// Write one template per stack and the manifest
    Synth {
        #[arg(short, long, default_value = "cdk.out")]
        out: PathBuf,
    },

    /// Fetch the outputs of the deployed stacks
    Outputs {
        #[arg(short, long, default_value = "outputs.json")]
        out: PathBuf,
    },

    /// Parse and describe a crawler schedule expression
    Schedule { expression: String },
}

fn assemble(config_path: &Path) -> Result<(config::Config, platform::Platform)> {
    let environment = environment::resolve().context("Failed to resolve the environment")?;
    let config = config::parse(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let platform =
        platform::assemble(environment, &config).context("Failed to assemble the platform")?;

    return Ok((config, platform));
}

fn print_plan(plan: &platform::Plan) {
    println!("Environment: {}", plan.environment);
    for (index, wave) in plan.waves.iter().enumerate() {
        println!("Wave {}: {}", index + 1, wave.join(", "));
    }
    for stack in plan.order() {
        println!();
        if stack.depends_on.is_empty() {
            println!("{}", stack.name);
        } else {
            println!("{} (after {})", stack.name, stack.depends_on.join(", "));
        }
        for (position, resource) in stack.resources.iter().enumerate() {
            println!("  {:>3}. {}", position + 1, resource);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "data_platform=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan => {
            let (_, platform) = assemble(&cli.config)?;
            let plan = platform.plan().context("Failed to resolve the plan")?;
            print_plan(&plan);
        }
        Commands::Synth { out } => {
            let (_, platform) = assemble(&cli.config)?;
            let plan = platform.plan().context("Failed to resolve the plan")?;
            let written = writer::write_assembly(&out, &platform, &plan)
                .with_context(|| format!("Failed to write the assembly to {}", out.display()))?;
            info!(files = written.len(), out = %out.display(), "synthesis finished");
        }
        Commands::Outputs { out } => {
            let (config, platform) = assemble(&cli.config)?;
            let plan = platform.plan().context("Failed to resolve the plan")?;
            let stack_names: Vec<String> =
                plan.order().map(|stack| stack.name.clone()).collect();

            let sdk_config = outputs::sdk_config(config.region.as_deref()).await;
            let fetched = outputs::fetch_all(&sdk_config, &stack_names)
                .await
                .context("Failed to fetch stack outputs")?;
            writer::write_outputs(&out, &fetched)
                .with_context(|| format!("Failed to write {}", out.display()))?;
        }
        Commands::Schedule { expression } => {
            let schedule: ScheduleExpression = expression
                .parse()
                .with_context(|| format!("Invalid schedule expression `{expression}`"))?;
            println!("{}: {}", schedule, schedule.describe());
        }
    }

    return Ok(());
}
