mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use duet_client::{
    transport::{Deployment, HttpConnector, TransportConnector},
    ConnectionSupervisor, MotionController, SimulatedMachine,
};
use station::{
    PulsedSonicator, SimulatedOutput, SonicateWellArgs, SonicationStation, WellIndex,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;

#[derive(Parser, Debug)]
#[command(about = "Drives the sonication station")]
struct Cli {
    /// Settings file; `station.toml` is read when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Run against an in-memory machine.
    #[arg(long)]
    simulated: bool,
    /// Reach the firmware over HTTP at this host.
    #[arg(long)]
    address: Option<String>,
    /// Deck configuration file.
    #[arg(long)]
    deck: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a JSON protocol file.
    Run {
        protocol: PathBuf,
        #[arg(long)]
        home: bool,
    },
    /// Sonicate a single well.
    Sonicate(SonicateCommand),
    /// Run the cleaning protocol.
    Clean {
        #[arg(long)]
        home: bool,
    },
    /// Print the deck configuration.
    ShowDeck,
    /// Home every axis and rise to idle height.
    Home,
}

#[derive(Args, Debug)]
struct SonicateCommand {
    deck_index: u32,
    /// Well label such as `B7`.
    well: String,
    #[arg(long)]
    plunge_depth: f64,
    #[arg(long)]
    seconds: f64,
    #[arg(long)]
    power: Option<f64>,
    #[arg(long)]
    pulse_duty_cycle: Option<f64>,
    #[arg(long)]
    pulse_interval: Option<f64>,
    #[arg(long)]
    no_autoclean: bool,
    #[arg(long)]
    home: bool,
}

impl SonicateCommand {
    fn well_args(&self) -> Result<SonicateWellArgs> {
        let well = WellIndex::from_label(&self.well)
            .with_context(|| format!("'{}' is not a well label", self.well))?;
        let Some(row_letter) = char::from_u32(u32::from('A') + well.row) else {
            bail!("'{}' is not a well label", self.well);
        };
        Ok(SonicateWellArgs {
            deck_index: self.deck_index,
            row_letter: row_letter.to_string(),
            column_index: well.column + 1,
            plunge_depth: self.plunge_depth,
            seconds: self.seconds,
            power: self.power,
            pulse_duty_cycle: self.pulse_duty_cycle,
            pulse_interval: self.pulse_interval,
            autoclean: !self.no_autoclean,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(address) = cli.address.clone() {
        settings.address = Some(address);
        settings.deployment = Deployment::Http;
    }
    if cli.simulated {
        settings.deployment = Deployment::Simulated;
    }
    if let Some(deck) = cli.deck.clone() {
        settings.deck_config_path = deck;
    }

    let mut station = build_station(&settings)?;
    if let Command::ShowDeck = cli.command {
        println!("{}", serde_json::to_string_pretty(station.deck())?);
        return Ok(());
    }

    station.connect().await.context("failed to connect to the machine")?;
    let outcome = run_command(&mut station, cli.command).await;
    if let Err(err) = station.shutdown().await {
        warn!(%err, "station did not shut down cleanly");
    }
    outcome
}

fn build_station(settings: &Settings) -> Result<SonicationStation> {
    let deployment = settings.deployment;
    let config = settings.supervisor_config();
    let motion = match deployment {
        Deployment::Simulated => {
            info!("using a simulated machine");
            MotionController::simulated(&SimulatedMachine::new(), config)
        }
        Deployment::Http | Deployment::Socket => {
            let connector = connector(deployment, settings)?;
            MotionController::new(ConnectionSupervisor::new(connector, config))
        }
    };
    if deployment != Deployment::Simulated {
        warn!("no transducer driver is linked; sonication output is simulated");
    }
    let sonicator = Box::new(PulsedSonicator::new(SimulatedOutput::default()));
    Ok(SonicationStation::with_deck_file(
        motion,
        sonicator,
        &settings.deck_config_path,
    ))
}

fn connector(deployment: Deployment, settings: &Settings) -> Result<Arc<dyn TransportConnector>> {
    let connect_timeout = settings.supervisor_config().connect_timeout;
    match deployment {
        Deployment::Http => {
            let address = settings
                .address
                .as_deref()
                .context("an http deployment needs an address")?;
            Ok(Arc::new(HttpConnector::new(address, connect_timeout)?))
        }
        #[cfg(unix)]
        Deployment::Socket => Ok(Arc::new(duet_client::transport::SocketConnector::new(
            settings.socket_path.clone(),
            connect_timeout,
        ))),
        #[cfg(not(unix))]
        Deployment::Socket => bail!("socket deployments need a unix host"),
        Deployment::Simulated => bail!("simulated deployments have no transport"),
    }
}

async fn run_command(station: &mut SonicationStation, command: Command) -> Result<()> {
    match command {
        Command::Run { protocol, home } => {
            if home {
                station.home_all().await?;
            }
            station
                .execute_protocol_from_file(&protocol)
                .await
                .with_context(|| format!("protocol '{}' failed", protocol.display()))?;
            info!(protocol = %protocol.display(), "protocol finished");
        }
        Command::Sonicate(command) => {
            let args = command.well_args()?;
            if command.home {
                station.home_all().await?;
            }
            station.sonicate_well(args).await?;
        }
        Command::Clean { home } => {
            if home {
                station.home_all().await?;
            }
            station.clean_sonicator().await?;
        }
        Command::Home => station.home_all().await?,
        Command::ShowDeck => {}
    }
    Ok(())
}
