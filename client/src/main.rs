use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{Command, Response, ScreenSettings};
use std::collections::BTreeMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(name = "loopwallctl")]
#[command(about = "Control the loopwall video wallpaper service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Loop a video on a monitor, replacing what plays there
    Play {
        /// Path to the video file
        path: String,

        /// Monitor index
        #[arg(short, long, default_value = "0")]
        screen: usize,

        /// Volume (0-100)
        #[arg(short, long, default_value = "0")]
        volume: u32,

        /// Pause while a maximized window covers the monitor
        #[arg(long)]
        pause_on_max: bool,

        /// Start paused
        #[arg(long)]
        paused: bool,
    },

    /// Stop the video on a monitor
    Stop {
        /// Monitor index
        #[arg(short, long, default_value = "0")]
        screen: usize,
    },

    /// Change settings of running players without restarting them
    Update {
        /// Monitor index, -1 for every player
        #[arg(short, long, allow_negative_numbers = true, conflicts_with = "all")]
        screen: Option<i64>,

        /// Apply to every running player
        #[arg(long)]
        all: bool,

        /// Per-monitor settings as JSON, e.g. '{"1":{"volume":50}}'
        #[arg(long)]
        per_screen: Option<String>,

        /// Volume (0-100)
        #[arg(short, long)]
        volume: Option<u32>,

        /// Pause (true) or resume (false)
        #[arg(long)]
        paused: Option<bool>,

        /// Pause while a maximized window covers the monitor
        #[arg(long)]
        pause_on_max: Option<bool>,

        /// Playback speed (0.25-2.5)
        #[arg(long)]
        speed: Option<f64>,
    },

    /// Show running players
    Status,

    /// Check if the service is running
    Ping,

    /// Stop every player and the service
    Quit,
}

fn build_command(command: Commands) -> Result<Command> {
    let command = match command {
        Commands::Play {
            path,
            screen,
            volume,
            pause_on_max,
            paused,
        } => {
            let path = std::path::absolute(&path)
                .map(|p| p.display().to_string())
                .unwrap_or(path);
            Command::Play {
                video_path: path,
                screen,
                pause_on_max,
                volume,
                paused,
            }
        }
        Commands::Stop { screen } => Command::Stop { screen },
        Commands::Update {
            screen,
            all,
            per_screen,
            volume,
            paused,
            pause_on_max,
            speed,
        } => {
            let per_screen = per_screen
                .map(|json| {
                    serde_json::from_str::<BTreeMap<String, ScreenSettings>>(&json)
                        .context("Invalid --per-screen JSON")
                })
                .transpose()?;
            Command::Update {
                screen: if all { Some(-1) } else { screen },
                per_screen,
                volume,
                paused,
                pause_on_max,
                speed,
            }
        }
        Commands::Status => Command::Status,
        Commands::Ping => Command::Ping,
        Commands::Quit => Command::Quit,
    };
    Ok(command)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = build_command(cli.command)?;

    match send_command(command).await {
        Ok(response) => {
            handle_response(response);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("\nIs the service running? Try starting it with: loopwall");
            std::process::exit(1);
        }
    }
}

async fn send_command(command: Command) -> Result<Response> {
    let socket_path = common::get_socket_path();

    let stream = UnixStream::connect(&socket_path).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // Send command
    let command_json = serde_json::to_string(&command)?;
    writer.write_all(command_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    // Read response
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await?;

    let response: Response = serde_json::from_str(&response_line)?;
    Ok(response)
}

fn handle_response(response: Response) {
    match response {
        Response::Ok => {
            println!("✓ Success");
        }
        Response::Dropped(reason) => {
            println!("- Skipped: {}", reason);
        }
        Response::Error(e) => {
            eprintln!("✗ Error: {}", e);
            std::process::exit(1);
        }
        Response::Status(status) => {
            println!("Service Status:");
            println!("  Version: {}", status.version);
            println!("  Uptime: {}s", status.uptime_secs);
            println!("  Players: {}", status.players_count);
            for player in status.players {
                println!(
                    "    [{}] {} -> {}",
                    player.screen_index,
                    player.screen_name.as_deref().unwrap_or("?"),
                    player.video_path
                );
                println!(
                    "        {}{}, volume {}, speed {:.2}",
                    player.phase,
                    if player.paused { " (paused)" } else { "" },
                    player.volume,
                    player.rate
                );
            }
        }
        Response::Pong => {
            println!("✓ Service is running");
        }
    }
}
