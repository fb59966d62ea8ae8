// CLI entry point for the tandem session hub.
//
// Loads `ServerSettings` from an optional TOML file, applies command-line
// overrides, and runs the hub until `quit` is typed on stdin (or the process
// is killed). See `server.rs` for the networking architecture and `hub.rs`
// for the session logic.
//
// Console commands (one per line on stdin):
//   save          start an autosave now
//   kick <name>   disconnect a player
//   quit          shut down, notifying every peer

use std::io::BufRead;
use std::path::PathBuf;

use clap::Parser;
use tandem_hub::{FileStore, ServerSettings, start_server};

#[derive(Parser, Debug)]
#[command(name = "tandem-hub", about = "Lockstep multiplayer session hub")]
struct Cli {
    /// TOML settings file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Listen address, e.g. 0.0.0.0:30502.
    #[arg(long)]
    bind: Option<String>,
    /// Maximum non-arbiter players (0 = unlimited).
    #[arg(long)]
    max_players: Option<usize>,
    /// Directory for saved games and player maps.
    #[arg(long)]
    save_dir: Option<PathBuf>,
    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let mut settings = match &cli.config {
        Some(path) => match ServerSettings::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                log::error!("Failed to load {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => ServerSettings::default(),
    };
    if let Some(bind) = cli.bind {
        settings.address = bind;
    }
    if let Some(max_players) = cli.max_players {
        settings.max_players = max_players;
    }
    if let Some(save_dir) = cli.save_dir {
        settings.save_dir = save_dir;
    }

    let store = Box::new(FileStore::new(settings.save_dir.clone()));
    let (handle, addr) = match start_server(settings, store) {
        Ok(result) => result,
        Err(e) => {
            log::error!("Failed to start hub: {e}");
            std::process::exit(1);
        }
    };
    log::info!("Hub ready on {addr}; type `quit` to stop");

    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("quit"), _) => {
                handle.stop();
                return;
            }
            (Some("save"), _) => handle.enqueue(|hub| {
                hub.do_autosave();
            }),
            (Some("pause"), _) => handle.enqueue(|hub| hub.set_paused(true)),
            (Some("resume"), _) => handle.enqueue(|hub| hub.set_paused(false)),
            (Some("kick"), Some(name)) => {
                let name = name.to_string();
                handle.enqueue(move |hub| {
                    if !hub.kick(&name, "Kicked by server") {
                        log::warn!("No player named {name}");
                    }
                });
            }
            (None, _) => {}
            (Some(other), _) => log::warn!("Unknown command: {other}"),
        }
    }

    // stdin closed (running detached): serve until killed.
    loop {
        std::thread::park();
    }
}
