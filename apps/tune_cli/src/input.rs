//! 标准输入控制命令

use std::io::BufRead;
use std::str::FromStr;
use std::thread;

use crossbeam_channel::{unbounded, Receiver};

/// 用户命令
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UserCommand {
    TogglePause,
    Next,
    Previous,
    Seek(f64),
    Quit,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("Unknown command: {0} (expected p, n, b, s <fraction> or q)")]
    Unknown(String),
    #[error("Invalid seek fraction: {0}")]
    BadFraction(String),
}

impl FromStr for UserCommand {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, ParseError> {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default();
        match command {
            "p" | "pause" => Ok(UserCommand::TogglePause),
            "n" | "next" => Ok(UserCommand::Next),
            "b" | "back" => Ok(UserCommand::Previous),
            "q" | "quit" => Ok(UserCommand::Quit),
            "s" | "seek" => {
                let arg = words.next().unwrap_or_default();
                match arg.parse::<f64>() {
                    Ok(f) if (0.0..=1.0).contains(&f) => Ok(UserCommand::Seek(f)),
                    _ => Err(ParseError::BadFraction(arg.to_string())),
                }
            }
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

/// 在后台线程逐行读取标准输入，空行被忽略；输入结束时通道断开
pub fn spawn_stdin_reader() -> Receiver<Result<UserCommand, ParseError>> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            if tx.send(line.parse()).is_err() {
                break;
            }
        }
    });
    rx
}
