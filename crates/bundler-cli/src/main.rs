use anyhow::{Context, Result};
use async_trait::async_trait;
use bundler_core::prelude::*;
use bundler_core::CONFIG_FILE_NAME;
use bundler_scene::MemoryWorld;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("bundler")
        .version(bundler_core::VERSION)
        .about("Bundle the assets of a scene into size-bounded archives")
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("run")
                .about("Run the bundling pipeline on a world file")
                .arg(
                    Arg::new("world")
                        .long("world")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("World description (JSON)"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .default_value(CONFIG_FILE_NAME)
                        .value_parser(value_parser!(PathBuf))
                        .help("Bundler configuration (TOML)"),
                )
                .arg(
                    Arg::new("storage")
                        .long("storage")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory acting as remote storage"),
                )
                .arg(
                    Arg::new("scene-object")
                        .long("scene-object")
                        .required(true)
                        .help("Storage key of the scene, e.g. scenes/town.txml"),
                )
                .arg(
                    Arg::new("working-dir")
                        .long("working-dir")
                        .value_parser(value_parser!(PathBuf))
                        .help("Override the configured working directory"),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .value_parser(value_parser!(PathBuf))
                        .help("Save the rewritten world here"),
                )
                .arg(
                    Arg::new("summary")
                        .long("summary")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the run summary as JSON"),
                )
                .arg(
                    Arg::new("yes")
                        .long("yes")
                        .short('y')
                        .action(ArgAction::SetTrue)
                        .help("Answer yes to every confirmation"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print or write the default configuration")
                .arg(
                    Arg::new("write")
                        .long("write")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the defaults to this file instead of printing them"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));

    match matches.subcommand() {
        Some(("run", args)) => run(args).await,
        Some(("config", args)) => config(args).await,
        _ => {
            cli().print_help()?;
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(args: &ArgMatches) -> Result<()> {
    let world_path = args
        .get_one::<PathBuf>("world")
        .context("--world is required")?;
    let world = Arc::new(
        MemoryWorld::load(world_path)
            .await
            .with_context(|| format!("failed to load world {}", world_path.display()))?,
    );

    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) if path.exists() => PackagerConfig::load(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        other => {
            warn!(path = ?other, "config file not found, using defaults");
            PackagerConfig::default()
        }
    };
    if let Some(dir) = args.get_one::<PathBuf>("working-dir") {
        config.working_dir.clone_from(dir);
    }

    let storage_dir = args
        .get_one::<PathBuf>("storage")
        .context("--storage is required")?;
    let scene_object = args
        .get_one::<String>("scene-object")
        .context("--scene-object is required")?;
    let storage = Arc::new(LocalStorage::new(storage_dir, scene_object.as_str()));
    let host: Arc<dyn Host> = if args.get_flag("yes") {
        Arc::new(AutoConfirm)
    } else {
        Arc::new(TerminalHost)
    };

    let controller = Arc::new(PipelineController::new(
        world.clone(),
        world.clone(),
        storage,
        host,
        config,
    ));

    let stop = controller.stop_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !stop.request_stop() {
                eprintln!("Stop refused: nothing to stop or uploads have already started");
            }
        }
    });
    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let PipelineEvent::Progress {
                action,
                percent: Some(percent),
            } = event
            {
                debug!(percent, "{action}");
            }
        }
    });

    let result = controller.start().await;

    if let (Some(path), Some(summary)) =
        (args.get_one::<PathBuf>("summary"), controller.last_summary())
    {
        tokio::fs::write(path, summary.to_json()?)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    let summary = result.context("bundling failed")?;
    if let Some(output) = args.get_one::<PathBuf>("output") {
        world
            .save(output)
            .await
            .with_context(|| format!("failed to save world to {}", output.display()))?;
    }
    println!(
        "Converted {} references in {} archives",
        summary.counters.converted_refs,
        summary.archives.len()
    );
    Ok(())
}

async fn config(args: &ArgMatches) -> Result<()> {
    let defaults = PackagerConfig::default();
    match args.get_one::<PathBuf>("write") {
        Some(path) => {
            defaults
                .save(path)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => print!("{}", defaults.to_toml()?),
    }
    Ok(())
}

/// Asks on the terminal, defaulting to no
struct TerminalHost;

#[async_trait]
impl Host for TerminalHost {
    async fn confirm(&self, prompt: &ConfirmPrompt) -> bool {
        let question = match prompt {
            ConfirmPrompt::ClearWorkingDirectory { path } => format!(
                "Working directory {} is not empty. Delete its bundling output?",
                path.display()
            ),
            ConfirmPrompt::DisableTextureProcessing { tool } => format!(
                "Texture tool {} was not found. Continue without texture processing?",
                tool.display()
            ),
            ConfirmPrompt::UploadBundles { archives, existing } => {
                let mut text = format!("Upload {} archives?", archives.len());
                for name in archives {
                    let note = if existing.contains(name) {
                        " (overwrites existing)"
                    } else {
                        ""
                    };
                    text.push_str(&format!("\n  {name}{note}"));
                }
                text
            }
        };
        eprint!("{question} [y/N] ");
        let _ = std::io::stderr().flush();

        let mut line = String::new();
        match BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
            Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}
