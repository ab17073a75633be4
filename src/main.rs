//! # enroll
//!
//! Enrollment server binary plus a few client-side helpers for seeding data
//! and exercising the protocol from a terminal.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc::UnboundedReceiver;

use enroll_core::validation::{validate_entry, NO_COMPETITION};
use enroll_core::{select_competition, Credentials, ParticipantId};
use enroll_server::message_type as mt;
use enroll_server::{
    EnrollClient, EnrollServer, EnrollmentCoordinator, Envelope, Reply, ServerConfig,
};
use enroll_store::{seed_competitions, CompetitionRepo, Database, UserRepo};
use enroll_telemetry::{init_telemetry, TelemetryConfig};

const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "enroll", about = "Youth competition enrollment server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server until Ctrl-C.
    Serve {
        /// JSON config file; missing keys keep their defaults.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
        /// SQLite database file.
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Create the standard competitions that do not exist yet.
    Seed {
        #[arg(long, default_value = "enroll.db")]
        db: PathBuf,
    },
    /// Create a login for the desktop client.
    AddUser {
        #[arg(long)]
        user_name: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "enroll.db")]
        db: PathBuf,
    },
    /// Enroll an existing participant straight in the database, one
    /// competition per type, routed by their age. Connected clients are not
    /// notified.
    Assign {
        #[arg(long)]
        participant: i64,
        /// Competition type. Repeat for a second one.
        #[arg(long = "comp", required = true)]
        competitions: Vec<String>,
        #[arg(long, default_value = "enroll.db")]
        db: PathBuf,
    },
    /// Connect as a client and print every envelope the server pushes.
    Watch {
        #[arg(long, default_value = "127.0.0.1:5000")]
        addr: String,
    },
    /// Add a participant and enroll them by competition type.
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        age: i32,
        /// Competition type, e.g. "Drawing". Repeat for a second one.
        #[arg(long = "comp")]
        competitions: Vec<String>,
        #[arg(long, default_value = "127.0.0.1:5000")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            config,
            host,
            port,
            db,
        } => serve(config, host, port, db).await,
        Command::Seed { db } => {
            init_telemetry(&TelemetryConfig::default())?;
            let db = Database::open(&db).context("failed to open database")?;
            let created = seed_competitions(&CompetitionRepo::new(db))?;
            println!("created {created} competitions");
            Ok(())
        }
        Command::AddUser {
            user_name,
            password,
            db,
        } => {
            init_telemetry(&TelemetryConfig::default())?;
            let db = Database::open(&db).context("failed to open database")?;
            let user = UserRepo::new(db).add(&Credentials { user_name, password })?;
            println!("created user {} ({})", user.user_name, user.id);
            Ok(())
        }
        Command::Assign {
            participant,
            competitions,
            db,
        } => {
            init_telemetry(&TelemetryConfig::default())?;
            let db = Database::open(&db).context("failed to open database")?;
            let enrolled = EnrollmentCoordinator::new(db)
                .enroll_in_types(ParticipantId::new(participant), &competitions)?;
            for id in enrolled {
                println!("enrolled participant {participant} in competition {id}");
            }
            Ok(())
        }
        Command::Watch { addr } => watch(&addr).await,
        Command::Register {
            name,
            age,
            competitions,
            addr,
        } => register(&addr, &name, age, &competitions).await,
    }
}

async fn serve(
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    db: Option<PathBuf>,
) -> Result<()> {
    let mut config = ServerConfig::load(config_path.as_deref()).context("failed to load config")?;
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(db) = db {
        config.db_path = db;
    }

    init_telemetry(&config.telemetry()?)?;
    tracing::info!(db = %config.db_path.display(), "starting enrollment server");

    let db = Database::open(&config.db_path).context("failed to open database")?;
    let handle = EnrollServer::new(config, db)
        .start()
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port(), "enrollment server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

async fn watch(addr: &str) -> Result<()> {
    init_telemetry(&TelemetryConfig::default())?;
    let (client, mut rx) = EnrollClient::connect_with_channel(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    client.get_all_competitions().await?;

    loop {
        tokio::select! {
            envelope = rx.recv() => match envelope {
                Some(env) => println!("{} {}", env.message_type, env.payload),
                None => {
                    println!("server closed the connection");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    client.close().await?;
    Ok(())
}

async fn register(addr: &str, name: &str, age: i32, competitions: &[String]) -> Result<()> {
    init_telemetry(&TelemetryConfig::default())?;
    if competitions.len() > 2 {
        bail!("at most two competitions can be selected");
    }
    let first = competitions.first().map_or(NO_COMPETITION, String::as_str);
    let second = competitions.get(1).map_or(NO_COMPETITION, String::as_str);
    validate_entry(name, age, first, second)?;

    let (client, mut rx) = EnrollClient::connect_with_channel(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;

    client.add_participant(name, age).await?;
    let participant = match wait_for(&mut rx, &[mt::ADD_PARTICIPANT_REPLY]).await? {
        Reply::ParticipantAdded(p) => p,
        other => bail!("unexpected reply: {other:?}"),
    };
    println!("added participant {} ({})", participant.name, participant.id);

    client.get_all_competitions().await?;
    let all = match wait_for(&mut rx, &[mt::GET_ALL_COMPETITIONS_REPLY]).await? {
        Reply::AllCompetitions(list) => list,
        other => bail!("unexpected reply: {other:?}"),
    };

    for kind in competitions {
        let Some(competition) = select_competition(&all, age, kind) else {
            bail!("no {kind} competition for age {age}");
        };
        // Enrollment success has no reply of its own and any client's change
        // triggers an UPDATE. Requests on one connection are answered in
        // order, so an ERROR for the enroll arrives before this list.
        client.enroll(participant.id, competition.id).await?;
        client.get_participants_for_competition(competition.id).await?;
        let enrolled = match wait_for(&mut rx, &[mt::GET_PARTICIPANTS_FOR_COMP_REPLY]).await? {
            Reply::ParticipantsForCompetition(list) => list,
            other => bail!("unexpected reply: {other:?}"),
        };
        if !enrolled.iter().any(|p| p.id == participant.id) {
            bail!("enrollment in {kind} was not recorded");
        }
        println!("enrolled in {kind} ({})", competition.age_category);
    }

    client.close().await?;
    Ok(())
}

/// Wait for the next envelope of one of `kinds`, or an `ERROR`. Other
/// traffic is skipped.
async fn wait_for(rx: &mut UnboundedReceiver<Envelope>, kinds: &[&str]) -> Result<Reply> {
    loop {
        let env = tokio::time::timeout(REPLY_TIMEOUT, rx.recv())
            .await
            .context("timed out waiting for the server")?
            .context("server closed the connection")?;
        if env.message_type == mt::ERROR {
            bail!("server error: {}", env.payload);
        }
        if kinds.contains(&env.message_type.as_str()) {
            return Ok(Reply::decode(&env)?);
        }
    }
}
