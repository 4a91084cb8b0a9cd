//! tune - 命令行播放器
//!
//! 按顺序播放给定的 MP3 文件。每帧轮询一次引擎状态，
//! 曲目结束后自动播放下一首，并从标准输入读取控制命令。

mod input;
mod playlist;

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::TryRecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tune_player::{EngineConfig, ErrorKind, OutputConfig, Player, StatusSnapshot};

use input::{spawn_stdin_reader, UserCommand};
use playlist::Playlist;

/// Command-line arguments for tune
#[derive(Parser, Debug)]
#[command(name = "tune")]
#[command(about = "Play MP3 files from the terminal")]
#[command(version)]
struct Args {
    /// MP3 files to play, in order
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Print every status change as a JSON line
    #[arg(long)]
    json: bool,

    /// Status poll interval in milliseconds
    #[arg(long, default_value_t = 16, env = "TUNE_FRAME_MS")]
    frame_ms: u64,

    /// Give up on a stalled output device after this many milliseconds
    #[arg(long, env = "TUNE_WRITE_TIMEOUT_MS")]
    write_timeout_ms: Option<u64>,

    /// Stop after the last track instead of starting over
    #[arg(long)]
    no_repeat: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tune=info,tune_player=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = EngineConfig {
        output: OutputConfig {
            write_timeout: args.write_timeout_ms.map(Duration::from_millis),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut player = Player::new(config).context("Failed to initialize playback engine")?;
    info!("Playback engine initialized");

    let mut playlist = Playlist::new(args.files, !args.no_repeat);
    let commands = spawn_stdin_reader();
    let mut stdin_open = true;
    let frame = Duration::from_millis(args.frame_ms.max(1));

    // 连续加载失败的曲目数，整张列表都失败时退出，避免无限重试
    let mut failed_loads = 0;
    let mut last_reported: Option<StatusSnapshot> = None;

    loop {
        let status = player.status();

        for err in &status.errors {
            error!("{err}");
            if matches!(
                err.kind,
                ErrorKind::FileRead | ErrorKind::DecodeHeader | ErrorKind::UnsupportedSampleRate
            ) {
                failed_loads += 1;
            }
        }
        if status.playing_file && status.current_file.is_some() {
            failed_loads = 0;
        }
        if failed_loads >= playlist.len() {
            warn!("No track in the playlist could be played");
            break;
        }

        report(&status, &mut last_reported, args.json)?;

        if !status.playing_file {
            match playlist.advance(1) {
                Some(path) => player.play(path),
                None => {
                    info!("Playlist finished");
                    break;
                }
            }
        }

        if stdin_open {
            match commands.try_recv() {
                Ok(Ok(UserCommand::Quit)) => break,
                Ok(Ok(command)) => apply(command, &player, &mut playlist),
                Ok(Err(e)) => warn!("{e}"),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => stdin_open = false,
            }
        }

        thread::sleep(frame);
    }

    player.shutdown();
    Ok(())
}

fn apply(command: UserCommand, player: &Player, playlist: &mut Playlist) {
    match command {
        UserCommand::TogglePause => player.toggle_pause(),
        UserCommand::Seek(fraction) => player.seek(fraction),
        UserCommand::Next => {
            if let Some(path) = playlist.advance(1) {
                player.play(path);
            }
        }
        UserCommand::Previous => {
            if let Some(path) = playlist.advance(-1) {
                player.play(path);
            }
        }
        UserCommand::Quit => {}
    }
}

/// 状态变化时输出一行
fn report(
    status: &StatusSnapshot,
    last: &mut Option<StatusSnapshot>,
    json: bool,
) -> Result<()> {
    let current = StatusSnapshot {
        errors: Vec::new(),
        ..status.clone()
    };
    let previous = last.replace(current.clone());

    if json {
        if previous.as_ref() != Some(&current) || !status.errors.is_empty() {
            println!("{}", serde_json::to_string(status)?);
        }
        return Ok(());
    }

    let previous = previous.unwrap_or_default();
    if current.current_file != previous.current_file {
        if let Some(path) = &current.current_file {
            info!("Now playing {}", path.display());
        }
    }
    if current.paused != previous.paused && current.playing_file {
        info!(
            "{} at {:.0}%",
            if current.paused { "Paused" } else { "Resumed" },
            current.fraction_played * 100.0
        );
    }
    Ok(())
}
