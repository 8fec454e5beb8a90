//! Terminal tic-tac-toe with an authenticated, encrypted LAN mode.

mod config;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tictactoe_core::{Board, BoardSource, Player};
use tictactoe_net::{ClientDialect, PacketKind, Role, SecurityMode, Session};
use tracing::{info, warn};

use crate::config::{NetConfig, DEFAULT_NETWORK_PATH};

#[derive(Parser, Debug)]
#[command(author, version, about = "Play tic-tac-toe over an encrypted LAN link", long_about = None)]
struct Cli {
    /// Network settings file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_NETWORK_PATH)]
    config: PathBuf,
    /// Write the effective settings (file plus flags) back to the config file
    #[arg(long, global = true)]
    save_config: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wait for an opponent; the host plays X
    Host {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        passphrase: Option<String>,
        /// Board edge length (3 to 5)
        #[arg(long, default_value_t = 3)]
        size: usize,
    },
    /// Join a waiting host; the joiner plays O
    Join {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        passphrase: Option<String>,
        /// Board edge length; must match the host
        #[arg(long, default_value_t = 3)]
        size: usize,
        /// Speak only the legacy handshake, as old builds do
        #[arg(long, conflicts_with = "modern_only")]
        legacy: bool,
        /// Refuse to fall back to the legacy handshake
        #[arg(long)]
        modern_only: bool,
    },
}

fn main() -> Result<()> {
    // Initialize tracing with WARN level by default (can be overridden via RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    info!("Starting tictactoe-cx v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let mut cfg = NetConfig::load_from_path(&cli.config);
    let mut session = Session::new();

    let mode = apply_overrides(&mut cfg, cli.command);
    if cli.save_config {
        cfg.save_to_path(&cli.config)
            .with_context(|| format!("failed to save {}", cli.config.display()))?;
        println!("Saved settings to {}", cli.config.display());
    }

    let size = match mode {
        Mode::Host { size } => {
            host_match(&mut session, &cfg)?;
            size
        }
        Mode::Join { size, dialect } => {
            join_match(&mut session, &cfg, dialect)?;
            size
        }
    };

    let board = Board::new(size).context("invalid board size")?;
    let result = play(&mut session, board, &cfg);
    session.close();
    result
}

enum Mode {
    Host { size: usize },
    Join { size: usize, dialect: ClientDialect },
}

/// Fold command-line flags into the loaded settings.
fn apply_overrides(cfg: &mut NetConfig, command: Command) -> Mode {
    match command {
        Command::Host {
            port,
            passphrase,
            size,
        } => {
            cfg.port = port.unwrap_or(cfg.port);
            if let Some(passphrase) = passphrase {
                cfg.passphrase = passphrase;
            }
            Mode::Host { size }
        }
        Command::Join {
            host,
            port,
            passphrase,
            size,
            legacy,
            modern_only,
        } => {
            if let Some(host) = host {
                cfg.host = host;
            }
            cfg.port = port.unwrap_or(cfg.port);
            if let Some(passphrase) = passphrase {
                cfg.passphrase = passphrase;
            }
            if modern_only {
                cfg.allow_legacy = false;
            }
            let dialect = if legacy {
                ClientDialect::LegacyOnly
            } else if cfg.allow_legacy {
                ClientDialect::ModernWithLegacyFallback
            } else {
                ClientDialect::ModernOnly
            };
            Mode::Join { size, dialect }
        }
    }
}

fn host_match(session: &mut Session, cfg: &NetConfig) -> Result<()> {
    session.set_passphrase(&cfg.passphrase);
    let addr = session
        .host(cfg.port)
        .with_context(|| format!("failed to listen on port {}", cfg.port))?;
    println!("Waiting for an opponent on {addr} ...");

    let peer = session
        .accept(cfg.accept_wait())
        .context("failed to accept opponent")?;
    let Some(peer) = peer else {
        bail!(
            "no opponent joined within {} seconds",
            cfg.accept_wait_secs
        );
    };
    println!("{peer} connected, securing the link ...");

    let mode = session
        .secure_handshake(cfg.handshake_timeout())
        .context("secure handshake failed")?;
    report_mode(mode);
    Ok(())
}

fn join_match(session: &mut Session, cfg: &NetConfig, dialect: ClientDialect) -> Result<()> {
    session.set_passphrase(&cfg.passphrase);
    session.set_client_dialect(dialect);
    let addr = session
        .connect(&cfg.host, cfg.port, cfg.handshake_timeout())
        .with_context(|| format!("failed to connect to {}:{}", cfg.host, cfg.port))?;
    println!("Connected to {addr}, securing the link ...");

    let mode = session
        .secure_handshake(cfg.handshake_timeout())
        .context("secure handshake failed")?;
    report_mode(mode);
    Ok(())
}

fn report_mode(mode: SecurityMode) {
    match mode {
        SecurityMode::Modern => println!("Secure link established."),
        SecurityMode::Legacy => {
            println!("Link established with the LEGACY cipher; the opponent runs an old build.")
        }
        SecurityMode::None => println!("Link is not secured."),
    }
}

enum Turn {
    Continue,
    Finished,
}

fn play(session: &mut Session, mut board: Board, cfg: &NetConfig) -> Result<()> {
    let me = match session.role() {
        Role::Host => Player::X,
        Role::Client => Player::O,
        Role::None => bail!("session is not connected"),
    };
    if me == Player::X {
        session
            .sync_board(&board)
            .context("failed to send opening board")?;
    }

    println!(
        "You are {}. Enter `row col` to move, `/say text` to chat, `/reset` or `/quit`.",
        me.symbol()
    );
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        println!("\n{}", board.render());
        if board.is_full() {
            println!("Board full.");
            return Ok(());
        }

        let turn = if board.current_player() == me {
            local_turn(session, &mut board, &mut lines)?
        } else {
            println!("Waiting for the opponent ...");
            remote_turn(session, &mut board, me, cfg)?
        };
        if let Turn::Finished = turn {
            return Ok(());
        }
    }
}

fn local_turn(
    session: &mut Session,
    board: &mut Board,
    lines: &mut impl Iterator<Item = io::Result<String>>,
) -> Result<Turn> {
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            session.send_control(PacketKind::Quit)?;
            return Ok(Turn::Finished);
        };
        let line = line?;
        let line = line.trim();

        if line == "/quit" {
            session.send_control(PacketKind::Quit)?;
            return Ok(Turn::Finished);
        }
        if line == "/reset" {
            *board = Board::new(board.size())?;
            session.send_control(PacketKind::Reset)?;
            return Ok(Turn::Continue);
        }
        if let Some(text) = line.strip_prefix("/say ") {
            session.send_chat(text).context("failed to send chat")?;
            continue;
        }

        let Some((row, col)) = parse_move(line) else {
            println!("Expected `row col`, e.g. `2 3`.");
            continue;
        };
        match board.place(row, col) {
            Ok(true) => {
                session
                    .send_move(row as u8, col as u8)
                    .context("failed to send move")?;
                return Ok(Turn::Continue);
            }
            Ok(false) => println!("That cell is taken."),
            Err(e) => println!("{e}"),
        }
    }
}

fn remote_turn(
    session: &mut Session,
    board: &mut Board,
    me: Player,
    cfg: &NetConfig,
) -> Result<Turn> {
    loop {
        let Some(packet) = session
            .receive_packet(cfg.move_timeout())
            .context("lost the opponent")?
        else {
            bail!(
                "opponent did not move within {} ms",
                cfg.move_timeout_ms
            );
        };

        match packet.kind {
            PacketKind::Move => {
                match board.place(usize::from(packet.row), usize::from(packet.col)) {
                    Ok(true) => return Ok(Turn::Continue),
                    other => {
                        warn!("Opponent sent an illegal move: {:?}", other);
                        bail!("opponent sent an illegal move");
                    }
                }
            }
            PacketKind::Sync => {
                board.apply_sync(packet.board, packet.current_player);
                if board.current_player() == me {
                    return Ok(Turn::Continue);
                }
            }
            PacketKind::Chat => println!("opponent: {}", packet.message),
            PacketKind::Reset => {
                println!("Opponent reset the board.");
                *board = Board::new(board.size())?;
                return Ok(Turn::Continue);
            }
            PacketKind::Quit => {
                println!("Opponent left.");
                return Ok(Turn::Finished);
            }
        }
    }
}

/// Parse a 1-based `row col` pair into 0-based coordinates.
fn parse_move(line: &str) -> Option<(usize, usize)> {
    let mut parts = line.split_whitespace();
    let row: usize = parts.next()?.parse().ok()?;
    let col: usize = parts.next()?.parse().ok()?;
    if parts.next().is_some() || row == 0 || col == 0 {
        return None;
    }
    Some((row - 1, col - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_move_is_one_based() {
        assert_eq!(parse_move("1 1"), Some((0, 0)));
        assert_eq!(parse_move(" 2   3 "), Some((1, 2)));
    }

    #[test]
    fn parse_move_rejects_garbage() {
        assert_eq!(parse_move(""), None);
        assert_eq!(parse_move("0 1"), None);
        assert_eq!(parse_move("1"), None);
        assert_eq!(parse_move("1 2 3"), None);
        assert_eq!(parse_move("a b"), None);
    }

    #[test]
    fn cli_parses_join_flags() {
        let cli = Cli::parse_from([
            "tictactoe-cx",
            "join",
            "--host",
            "10.0.0.2",
            "--legacy",
            "--passphrase",
            "swordfish",
        ]);
        match cli.command {
            Command::Join {
                host,
                legacy,
                passphrase,
                size,
                ..
            } => {
                assert_eq!(host.as_deref(), Some("10.0.0.2"));
                assert!(legacy);
                assert_eq!(passphrase.as_deref(), Some("swordfish"));
                assert_eq!(size, 3);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn flags_override_config_and_pick_dialect() {
        let cli = Cli::parse_from([
            "tictactoe-cx",
            "join",
            "--port",
            "40000",
            "--modern-only",
        ]);
        let mut cfg = NetConfig {
            passphrase: "from-file".to_string(),
            ..NetConfig::default()
        };

        match apply_overrides(&mut cfg, cli.command) {
            Mode::Join { dialect, .. } => assert_eq!(dialect, ClientDialect::ModernOnly),
            Mode::Host { .. } => panic!("expected join"),
        }
        assert_eq!(cfg.port, 40_000);
        assert_eq!(cfg.passphrase, "from-file");
        assert!(!cfg.allow_legacy);
    }

    #[test]
    fn save_config_flag_writes_effective_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.toml");
        let cli = Cli::parse_from([
            "tictactoe-cx",
            "--save-config",
            "--config",
            path.to_str().unwrap(),
            "host",
            "--port",
            "41000",
            "--passphrase",
            "swordfish",
        ]);
        assert!(cli.save_config);

        let mut cfg = NetConfig::load_from_path(&cli.config);
        apply_overrides(&mut cfg, cli.command);
        cfg.save_to_path(&cli.config).unwrap();

        let saved = NetConfig::load_from_path(&path);
        assert_eq!(saved.port, 41_000);
        assert_eq!(saved.passphrase, "swordfish");
    }

    #[test]
    fn cli_rejects_conflicting_dialects() {
        assert!(Cli::try_parse_from(["tictactoe-cx", "join", "--legacy", "--modern-only"]).is_err());
    }
}
