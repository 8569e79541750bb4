mod cache;
mod config;
mod engine;
mod instance;
mod ipc_server;
mod macros;
mod mirror;
mod monitors;
mod player;
mod process;
mod service;
mod shell;
mod store;
mod surface;
#[cfg(test)]
mod testing;
mod timers;
mod x11;

use anyhow::{Context, Result};
use clap::Parser;
use common::{Command, Response};
use config::Config;
use instance::Startup;
use mirror::{FfmpegSnapshotter, GsettingsBackground, Mirror};
use monitors::{MonitorInventory, NoTopology, TopologySource, XrandrSource};
use player::Backends;
use player::maximized::DesktopProbes;
use service::{Service, ServiceRequest};
use shell::GnomeShell;
use std::io::Write;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use store::ConfigStore;
use surface::{DetachedSurfaces, SurfaceFactory};
use tokio::sync::mpsc;
use x11::{RandrSource, X11Session, X11SurfaceFactory};

#[derive(Parser, Debug)]
#[command(name = "loopwall")]
#[command(about = "Looping video wallpapers, one per monitor", long_about = None)]
#[command(version)]
struct Cli {
    /// Video file to play
    video_path: Option<PathBuf>,

    /// Monitor index
    #[arg(long, default_value_t = 0)]
    screen: usize,

    /// Volume (0-100)
    #[arg(long, default_value_t = 0)]
    volume: u32,

    /// Pause while a maximized window covers the monitor
    #[arg(long)]
    pause_on_max: bool,

    /// Start paused
    #[arg(long)]
    paused: bool,

    /// Stop the wallpaper on --screen
    #[arg(long, conflicts_with = "quit_service")]
    stop: bool,

    /// Stop every wallpaper and the service
    #[arg(long)]
    quit_service: bool,

    /// Settings file (defaults to ~/.config/loopwall/config.toml)
    #[arg(long, env = "LOOPWALL_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    /// The IPC command this invocation stands for.
    fn command(&self) -> Command {
        if self.quit_service {
            Command::Quit
        } else if self.stop {
            Command::Stop {
                screen: self.screen,
            }
        } else if let Some(ref path) = self.video_path {
            let path = std::path::absolute(path).unwrap_or_else(|_| path.clone());
            Command::Play {
                video_path: path.display().to_string(),
                screen: self.screen,
                pause_on_max: self.pause_on_max,
                volume: common::clamp_volume(self.volume),
                paused: self.paused,
            }
        } else {
            Command::Ping
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = match cli.config {
        Some(ref path) => Config::load_from_path(path),
        None => Config::load(),
    };
    let (mut config, config_error) = match loaded {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    let ignored_env = config.apply_env();

    init_logging(&config);
    if let Some(e) = config_error {
        log::warn!("Failed to load config: {:#}. Using defaults.", e);
    }
    for message in ignored_env {
        log::warn!("{}", message);
    }

    let command = cli.command();
    let socket_path = common::get_socket_path();

    // Never start a service just to stop it
    if matches!(command, Command::Stop { .. } | Command::Quit) {
        match instance::forward(&command, &socket_path) {
            Ok(response) => report(&response),
            Err(_) => log::info!("No service running, nothing to stop"),
        }
        return Ok(());
    }

    let (listener, _lock) =
        match instance::acquire(&command, &socket_path, &common::get_lock_path())? {
            Startup::Forwarded(response) => {
                report(&response);
                return Ok(());
            }
            Startup::Primary { listener, lock } => (listener, lock),
        };

    log::info!("Starting loopwall service v{}", env!("CARGO_PKG_VERSION"));
    lower_priority();

    // Must happen before any other thread exists
    if let Some(path) = config.plugin_path() {
        log::info!("Engine plugin path: {}", path.display());
        unsafe { std::env::set_var("GST_PLUGIN_PATH", &path) };
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(run(config, listener, socket_path, command))
}

async fn run(
    config: Config,
    listener: UnixListener,
    socket_path: PathBuf,
    initial: Command,
) -> Result<()> {
    let (service_tx, service_rx) = mpsc::unbounded_channel();
    let shutdown = Arc::new(AtomicBool::new(false));

    if matches!(initial, Command::Play { .. }) {
        let _ = service_tx.send(ServiceRequest {
            command: initial,
            reply: None,
        });
    }

    // Start IPC server
    let ipc_shutdown = shutdown.clone();
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server::start(listener, socket_path, service_tx, ipc_shutdown).await {
            log::error!("IPC server error: {}", e);
        }
    });

    // Set up signal handlers
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let (Ok(mut sigterm), Ok(mut sigint)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) else {
            log::error!("Failed to set up signal handlers");
            return;
        };

        tokio::select! {
            _ = sigterm.recv() => {
                log::info!("Received SIGTERM, shutting down...");
            }
            _ = sigint.recv() => {
                log::info!("Received SIGINT, shutting down...");
            }
        }

        signal_shutdown.store(true, Ordering::SeqCst);
    });

    // The service owns non-Send X11 and D-Bus handles, so it is built on
    // the thread that runs it
    let service_shutdown = shutdown.clone();
    let service_handle = tokio::task::spawn_blocking(move || -> Result<()> {
        let service = build_service(config)?;
        service.run(service_rx, service_shutdown)
    });

    let result = service_handle.await.context("Service thread panicked")?;
    shutdown.store(true, Ordering::SeqCst);
    let _ = ipc_handle.await;

    log::info!("Service shutting down");
    result
}

fn build_service(config: Config) -> Result<Service> {
    let engines = engine::init(&config).context("No playback engine backend could be started")?;

    let session = match X11Session::connect(config.engine.force_x11) {
        Ok(session) => Some(session),
        Err(e) => {
            log::warn!("No usable X11 display, players will stay inert: {:#}", e);
            None
        }
    };

    let surfaces: Box<dyn SurfaceFactory> = match session.clone().map(X11SurfaceFactory::new) {
        Some(Ok(factory)) => Box::new(factory),
        Some(Err(e)) => {
            log::warn!("Desktop surfaces unavailable: {:#}", e);
            Box::new(DetachedSurfaces)
        }
        None => Box::new(DetachedSurfaces),
    };

    let native: Box<dyn TopologySource> = match session {
        Some(ref session) => Box::new(RandrSource::new(session.clone())),
        None => Box::new(NoTopology),
    };
    let inventory = MonitorInventory::new(
        Box::new(XrandrSource),
        native,
        Duration::from_millis(config.topology.inventory_ttl_ms),
    );

    let gnome = shell::is_gnome_session();
    let shell = if gnome {
        match GnomeShell::connect() {
            Ok(shell) => Some(Rc::new(shell)),
            Err(e) => {
                log::debug!("GNOME Shell not reachable: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let mirror = if config.mirror.enabled.unwrap_or(gnome) {
        Some(Mirror::new(
            config.mirror.clone(),
            Box::new(FfmpegSnapshotter::new(config.mirror.max_dimension)),
            Box::new(GsettingsBackground::new(shell.clone())),
            mirror::default_dir(),
        ))
    } else {
        None
    };

    let backends = Backends {
        engines,
        surfaces,
        probes: Box::new(DesktopProbes { shell, session }),
    };
    let store = ConfigStore::new(ConfigStore::default_path()?);

    Ok(Service::new(
        config,
        backends,
        inventory,
        store,
        mirror,
        Instant::now(),
    ))
}

/// Log lines go to stderr and are appended to the diagnostics file.
struct Tee {
    file: std::fs::File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let _ = self.file.write_all(buf);
        std::io::stderr().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let _ = self.file.flush();
        std::io::stderr().flush()
    }
}

fn init_logging(config: &Config) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.general.log_level.as_str()),
    );

    let path = config.log_file();
    let file_error = match open_log_file(&path) {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
            None
        }
        Err(e) => Some(e),
    };
    builder.init();

    if let Some(e) = file_error {
        log::warn!("Cannot write log file {}: {:#}", path.display(), e);
    }
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?)
}

fn lower_priority() {
    let ret = unsafe { libc::nice(19) };
    if ret == -1 {
        log::debug!("Could not lower scheduling priority");
    }
}

fn report(response: &Response) {
    match response {
        Response::Error(e) => log::error!("Service rejected the command: {}", e),
        Response::Dropped(reason) => log::warn!("Service dropped the command: {}", reason),
        Response::Status(status) => log::info!(
            "Service alive, {} player(s), up {}s",
            status.players_count,
            status.uptime_secs
        ),
        other => log::info!("Service replied: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(args: &[&str]) -> Command {
        Cli::try_parse_from(args).unwrap().command()
    }

    #[test]
    fn test_cli_play() {
        let cmd = command(&["loopwall", "/v/rain.mp4", "--screen", "1", "--volume", "150", "--paused"]);
        assert_eq!(
            cmd,
            Command::Play {
                video_path: "/v/rain.mp4".to_string(),
                screen: 1,
                pause_on_max: false,
                volume: 100,
                paused: true,
            }
        );
    }

    #[test]
    fn test_cli_stop_and_quit() {
        assert_eq!(
            command(&["loopwall", "--stop", "--screen", "2"]),
            Command::Stop { screen: 2 }
        );
        assert_eq!(command(&["loopwall", "--quit-service"]), Command::Quit);
        assert_eq!(command(&["loopwall"]), Command::Ping);
        assert!(Cli::try_parse_from(["loopwall", "--stop", "--quit-service"]).is_err());
    }

    #[test]
    fn test_relative_paths_are_made_absolute() {
        let Command::Play { video_path, .. } = command(&["loopwall", "clip.mp4"]) else {
            panic!("expected play");
        };
        assert!(Path::new(&video_path).is_absolute());
        assert!(video_path.ends_with("clip.mp4"));
    }
}
