use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use coordreg::TriState;
use metaupdate::cli::{Cli, Command, OutputFormat, get_log_path};
use metaupdate::config::Config;
use metaupdate::pipeline::FileArtifactStore;
use metaupdate::simulate::{SimulationOptions, SimulationReport, run_simulation};

fn setup_logging(cli_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let level = match cli_log_level.map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

fn colored_state(state: Option<TriState>) -> ColoredString {
    match state {
        Some(TriState::Updated) => state_name(state).green(),
        Some(TriState::Updating) => state_name(state).yellow(),
        Some(TriState::NeedsUpdate) => state_name(state).red(),
        None => state_name(state).dimmed(),
    }
}

fn state_name(state: Option<TriState>) -> String {
    state.map(|s| s.to_string()).unwrap_or_else(|| "UNSET".to_string())
}

fn print_report(report: &SimulationReport) {
    let verdict = if report.converged {
        "converged".green().bold()
    } else {
        "did not converge".red().bold()
    };
    println!(
        "Simulated {} nodes, {} invalidations: {}",
        report.nodes, report.invalidations, verdict
    );

    println!("\n{}", "Tables".bold());
    for table in &report.tables {
        let history: Vec<String> = table.history.iter().map(|s| s.to_string()).collect();
        println!("  {} {}", table.table.cyan(), colored_state(table.final_state));
        println!("    history:  {}", history.join(" -> ").dimmed());
        match &table.artifact {
            Some(artifact) => println!(
                "    artifact: {} ({} fields, written {})",
                artifact.path.display(),
                artifact.fields,
                artifact.written_at.to_rfc3339()
            ),
            None => println!("    artifact: {}", "none".dimmed()),
        }
    }

    println!("\n{}", "Nodes".bold());
    for node in &report.node_stats {
        let s = node.stats;
        println!(
            "  {:<8} triggers={} contended={} skipped={} recomputed={} failed={} abandoned={}",
            node.node, s.triggers, s.lock_contended, s.skipped, s.recomputed, s.failed, s.abandoned
        );
    }

    let r = &report.registry;
    println!("\n{}", "Registry".bold());
    println!(
        "  notifications={} lock-grants={} flags={} held-locks={}",
        r.notifications_sent, r.lock_grants, r.flags, r.held_locks
    );
}

async fn cmd_simulate(config: &Config, options: SimulationOptions, format: OutputFormat) -> Result<()> {
    debug!(?options, %format, "cmd_simulate: called");
    let report = run_simulation(config, options).await.context("Simulation failed")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }

    if !report.converged {
        return Err(eyre::eyre!("Not every table settled at UPDATED"));
    }
    Ok(())
}

async fn cmd_show(config: &Config, table: &str, format: OutputFormat) -> Result<()> {
    debug!(%table, %format, "cmd_show: called");
    let store = FileArtifactStore::new(&config.storage.artifact_dir);
    let Some(artifact) = store.load(table).await.context(format!("Failed to load artifact for {}", table))? else {
        return Err(eyre::eyre!("No artifact published for {} under {}", table, store.root().display()));
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&artifact)?),
        OutputFormat::Text => {
            println!(
                "{} written {}",
                artifact.table.cyan().bold(),
                artifact.written_at.to_rfc3339().dimmed()
            );
            for field in artifact.metadata.fields() {
                let mut per_type = Vec::new();
                for datatype in artifact.metadata.datatypes() {
                    if let Some(classes) = artifact.metadata.types_for(field, datatype) {
                        let classes: Vec<&str> = classes.iter().map(String::as_str).collect();
                        per_type.push(format!("{}=[{}]", datatype, classes.join(",")));
                    }
                }
                println!("  {:<20} {}", field.yellow(), per_type.join(" "));
            }
        }
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    print!("{}", serde_yaml::to_string(config).context("Failed to serialize configuration")?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!("metaupdate loaded config: tables={:?}", config.tables);

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Simulate {
            nodes,
            tables,
            invalidations,
            fail_first,
            format,
        }) => {
            debug!("main: matched Simulate command");
            let options = SimulationOptions {
                nodes,
                tables,
                invalidations,
                fail_first,
                settle_timeout: config.coordination.lock_timeout() * 3 + Duration::from_secs(5),
            };
            cmd_simulate(&config, options, format).await
        }
        Some(Command::Show { table, format }) => {
            debug!("main: matched Show command");
            cmd_show(&config, &table, format).await
        }
        Some(Command::Config) => {
            debug!("main: matched Config command");
            cmd_config(&config)
        }
        None => {
            debug!("main: no command, running default simulation");
            let options = SimulationOptions {
                settle_timeout: config.coordination.lock_timeout() * 3 + Duration::from_secs(5),
                ..SimulationOptions::default()
            };
            cmd_simulate(&config, options, OutputFormat::Text).await
        }
    }
}
