//! Caravel CLI - deploy component bundles to Kubernetes clusters

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use console::style;
use miette::{IntoDiagnostic, Result};

use caravel_core::{Config, Variables};
use caravel_engine::{ClusterSpec, Engine, RunMode};

#[derive(Parser)]
#[command(name = "caravel")]
#[command(version)]
#[command(about = "Deploy multi-component application bundles to Kubernetes", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a bundle to one or more clusters
    Deploy(RunArgs),

    /// Tear a deployed bundle down (children before parents)
    Delete(RunArgs),

    /// Write the component and task dependency graphs as DOT
    Graph(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Bundle definition file (.yaml or .json)
    definition: PathBuf,

    /// Cluster arguments: kubeconfig[:key=value,...]; empty means the
    /// ambient kubeconfig
    clusters: Vec<String>,

    /// Default namespace for namespaced resources
    #[arg(short, long, default_value = "default")]
    namespace: String,

    /// Only component names fully matching this pattern are deployed
    #[arg(long, default_value = ".*")]
    include: String,

    /// Component names fully matching this pattern are skipped
    #[arg(long, default_value = "^$")]
    exclude: String,

    /// Variables for ${...} expansion in the definition (key=value)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Manage a Namespace component for the run's namespace
    #[arg(long)]
    auto_namespace: bool,

    /// Treat failed API calls as success
    #[arg(long)]
    ignore_errors: bool,

    /// Abort unfinished work after this many seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Dependency graph file suffix (graph mode writes <root>-<dotfile>)
    #[arg(long, default_value = "deps.dot")]
    dotfile: String,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_panic_hook();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Deploy(args) => run(args, RunMode::Deploy).await,
        Commands::Delete(args) => run(args, RunMode::Delete).await,
        Commands::Graph(args) => run(args, RunMode::ShowDependencies).await,
    }
}

async fn run(args: RunArgs, mode: RunMode) -> Result<()> {
    let config = Config {
        namespace: args.namespace,
        include_filter: args.include,
        exclude_filter: args.exclude,
        auto_maintain_namespace: args.auto_namespace,
        dotfile: args.dotfile,
        variables: parse_set_variables(&args.set)?,
        ignore_errors: args.ignore_errors,
        timeout: args.timeout,
    };

    let clusters: Vec<ClusterSpec> = if args.clusters.is_empty() {
        vec![ClusterSpec::parse("")]
    } else {
        args.clusters.iter().map(|c| ClusterSpec::parse(c)).collect()
    };

    let verb = match mode {
        RunMode::Deploy => "Deploying",
        RunMode::Delete => "Deleting",
        RunMode::ShowDependencies => "Graphing",
    };
    println!(
        "{} {} {} on {} cluster(s)",
        style("→").blue().bold(),
        verb,
        style(args.definition.display()).cyan(),
        style(clusters.len()).yellow()
    );

    let engine = Engine::new(config, mode);
    let results = engine
        .run(&args.definition, clusters)
        .await
        .into_diagnostic()?;

    if mode == RunMode::ShowDependencies {
        println!("{} Dependency graphs written", style("✓").green().bold());
        return Ok(());
    }

    let mut failures = 0usize;
    for (cluster, result) in &results {
        match result {
            Ok(report) => {
                println!(
                    "{} {}: {} components, {} tasks in {:.2}s",
                    style("✓").green().bold(),
                    style(cluster).cyan(),
                    report.components,
                    report.tasks,
                    report.elapsed.unwrap_or(0.0)
                );
            }
            Err(e) => {
                failures += 1;
                println!("{} {}: {}", style("✗").red().bold(), style(cluster).cyan(), e);
            }
        }
    }

    if failures > 0 {
        miette::bail!("{failures} of {} cluster(s) failed", results.len());
    }
    Ok(())
}

/// Parse repeated `--set key=value` arguments
fn parse_set_variables(pairs: &[String]) -> Result<Variables> {
    let mut vars = Variables::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            miette::bail!("invalid --set '{pair}': expected KEY=VALUE");
        };
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_variables() {
        let vars = parse_set_variables(&["a=1".to_string(), "b=x=y".to_string()]).unwrap();
        assert_eq!(vars.get("a").unwrap(), "1");
        assert_eq!(vars.get("b").unwrap(), "x=y");
    }

    #[test]
    fn test_parse_set_rejects_missing_value() {
        assert!(parse_set_variables(&["oops".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_deploy() {
        let cli = Cli::try_parse_from([
            "caravel",
            "deploy",
            "bundle.yaml",
            "prod.conf:namespace=edge",
            "--set",
            "PORT=8080",
            "--timeout",
            "600",
        ])
        .unwrap();
        let Commands::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        assert_eq!(args.definition, PathBuf::from("bundle.yaml"));
        assert_eq!(args.clusters, vec!["prod.conf:namespace=edge"]);
        assert_eq!(args.set, vec!["PORT=8080"]);
        assert_eq!(args.timeout, Some(600));
    }

    #[test]
    fn test_cli_parses_graph_with_dotfile() {
        let cli = Cli::try_parse_from(["caravel", "graph", "bundle.yaml", "--dotfile", "g.dot"])
            .unwrap();
        let Commands::Graph(args) = cli.command else {
            panic!("expected graph");
        };
        assert_eq!(args.dotfile, "g.dot");
        assert!(args.clusters.is_empty());
    }
}
