//! Command line front end for beacon-validator
//!
//! ```bash
//! beacon-validator suite core --optional
//! beacon-validator run --suite spec --report report.json
//! beacon-validator configs import my-script.json
//! beacon-validator run --script "Lock Beacon"
//! ```
//!
//! Runs execute against the in-process simulated beacon network.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc::UnboundedReceiver;

use beacon_validator::ble::gatt::URL_CONFIG_SERVICE_UUID;
use beacon_validator::ble::simulated::SimBeaconNetwork;
use beacon_validator::ble::transport::GattTransport;
use beacon_validator::conformance::{
    suites, ChannelObserver, RunEvent, Scheduler, SchedulerHandle, Script, ScriptDefinition,
};
use beacon_validator::store::{self, ConfigStore, JsonFileStore};
use beacon_validator::ValidatorConfig;

#[derive(Parser)]
#[command(name = "beacon-validator")]
#[command(about = "Scripted GATT conformance runner for configurable beacons", long_about = None)]
struct Cli {
    /// Named configuration store
    #[arg(long, global = true, default_value = "beacon-configs.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the scripts of a built-in suite
    Suite {
        /// `core` or `spec`
        name: String,

        /// Include the lock and unlock scripts
        #[arg(long)]
        optional: bool,

        /// Print script definitions as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a suite or a stored script against simulated beacons
    Run {
        /// Built-in suite to run
        #[arg(long, conflicts_with = "script", default_value = "core")]
        suite: String,

        /// Stored script to run instead of a suite
        #[arg(long)]
        script: Option<String>,

        /// Include the lock and unlock scripts
        #[arg(long)]
        optional: bool,

        /// Number of simulated beacons in range
        #[arg(long, default_value = "1")]
        beacons: usize,

        /// Candidate to pick when several beacons answer
        #[arg(long)]
        choose: Option<usize>,

        /// Timing configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the run summary here as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Manage stored configurations
    #[command(subcommand)]
    Configs(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// List stored names
    List,

    /// Show one entry, decoded as a script when possible
    Show { name: String },

    /// Store a script definition from a JSON file
    Import { file: PathBuf },

    /// Remove an entry
    Delete { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Suite {
            name,
            optional,
            json,
        } => print_suite(&name, optional, json),
        Commands::Run {
            suite,
            script,
            optional,
            beacons,
            choose,
            config,
            report,
        } => {
            let scripts = match script {
                Some(name) => {
                    let store = JsonFileStore::open(&cli.store)?;
                    let script = store::load_script(&store, &name)?
                        .ok_or_else(|| anyhow!("No stored script named {}", name))?;
                    vec![script]
                }
                None => suite_scripts(&suite, optional)?,
            };
            let config = match config {
                Some(path) => ValidatorConfig::load(&path)?,
                None => ValidatorConfig::default(),
            };
            run(scripts, config, beacons, choose, report.as_deref()).await
        }
        Commands::Configs(command) => manage_configs(&cli.store, command),
    }
}

fn suite_scripts(name: &str, optional: bool) -> Result<Vec<Script>> {
    suites::by_name(name, optional).ok_or_else(|| anyhow!("Unknown suite {}", name))
}

fn print_suite(name: &str, optional: bool, json: bool) -> Result<()> {
    let scripts = suite_scripts(name, optional)?;
    if json {
        let definitions: Vec<ScriptDefinition> = scripts.iter().map(Script::definition).collect();
        println!("{}", serde_json::to_string_pretty(&definitions)?);
        return Ok(());
    }
    for (index, script) in scripts.iter().enumerate() {
        println!("{:>2}. {}", index + 1, script.name());
        if !script.reference().is_empty() {
            println!("    see {}", script.reference());
        }
        for action in script.steps().iter().filter(|a| !a.is_terminal()) {
            println!("    - {}", action);
        }
    }
    Ok(())
}

async fn run(
    scripts: Vec<Script>,
    config: ValidatorConfig,
    beacon_count: usize,
    choose: Option<usize>,
    report: Option<&Path>,
) -> Result<()> {
    if beacon_count == 0 {
        bail!("At least one simulated beacon is needed");
    }
    config.validate()?;
    log::info!("Running {} script(s) against {} simulated beacon(s)", scripts.len(), beacon_count);

    let network = SimBeaconNetwork::new();
    for _ in 0..beacon_count {
        network.add_beacon();
    }
    let central = network.central();
    let (observer, events) = ChannelObserver::new();
    let mut scheduler = Scheduler::new(
        central as Arc<dyn GattTransport>,
        URL_CONFIG_SERVICE_UUID,
        config,
        Arc::new(observer),
    );

    let handle = scheduler.handle();
    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, stopping the run");
            ctrl_c.stop();
        }
    });

    let (summary, ()) = tokio::join!(scheduler.run(scripts), print_progress(events, handle, choose));

    if let Some(path) = report {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        log::info!("Report written to {}", path.display());
    }

    let failed = summary.reports.iter().filter(|r| r.failed).count();
    println!(
        "{} of {} sessions passed{}",
        summary.reports.len() - failed,
        summary.reports.len(),
        if summary.stopped { " (stopped)" } else { "" }
    );
    if summary.any_failed {
        bail!("{} session(s) failed", failed);
    }
    Ok(())
}

async fn print_progress(
    mut events: UnboundedReceiver<RunEvent>,
    handle: SchedulerHandle,
    choose: Option<usize>,
) {
    while let Some(event) = events.recv().await {
        match event {
            RunEvent::SessionStarted { index, name } => println!("[{:>2}] {}", index + 1, name),
            RunEvent::Connected { device, .. } => println!("     connected to {}", device),
            RunEvent::DeviceAmbiguous { candidates, .. } => {
                println!("     {} beacons in range:", candidates.len());
                for (i, device) in candidates.iter().enumerate() {
                    println!("       {}: {}", i, device);
                }
                match choose {
                    Some(index) => handle.choose_device(index),
                    None => {
                        log::warn!("Several beacons found; pass --choose to pick one");
                        handle.cancel_device_choice();
                    }
                }
            }
            RunEvent::SessionCompleted { report, .. } => match &report.failure {
                Some(failure) => println!(
                    "     FAILED at step {} ({}): {}",
                    failure.index + 1,
                    failure.kind,
                    failure.reason
                ),
                None => println!("     passed"),
            },
            RunEvent::AllCompleted { .. } => break,
            RunEvent::ActionCompleted { .. } | RunEvent::WaitingForDevice { .. } => {}
        }
    }
}

fn manage_configs(path: &Path, command: ConfigCommands) -> Result<()> {
    let mut store = JsonFileStore::open(path)?;
    match command {
        ConfigCommands::List => {
            for name in store.list() {
                println!("{}", name);
            }
        }
        ConfigCommands::Show { name } => match store::load_script(&store, &name) {
            Ok(Some(script)) => {
                println!("{}", serde_json::to_string_pretty(&script.definition())?);
            }
            Ok(None) => bail!("No entry named {}", name),
            Err(e) => {
                log::debug!("{} is not a script: {}", name, e);
                let blob = store
                    .get(&name)?
                    .ok_or_else(|| anyhow!("No entry named {}", name))?;
                println!("{}", hex::encode(blob));
            }
        },
        ConfigCommands::Import { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let definition: ScriptDefinition = serde_json::from_str(&json)?;
            let script = Script::try_from(definition)?;
            store::save_script(&mut store, &script)?;
            println!("Stored {}", script.name());
        }
        ConfigCommands::Delete { name } => {
            if !store.delete(&name)? {
                bail!("No entry named {}", name);
            }
            println!("Deleted {}", name);
        }
    }
    Ok(())
}
