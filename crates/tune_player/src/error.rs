//! 错误类型

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::OutputError;

/// 引擎启动错误
///
/// 只有启动阶段的错误会直接返回给调用方，运行期错误都通过状态快照上报。
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Invalid output configuration: {0}")]
    InvalidConfig(String),
    #[error("Audio output error: {0}")]
    Output(#[from] OutputError),
    #[error("Failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Engine thread exited during startup")]
    WorkerExited,
}

/// 播放错误发生的环节
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FileRead,
    DecodeHeader,
    UnsupportedSampleRate,
    DecodeStream,
    Seek,
    SinkWrite,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::FileRead => "Failed to load mp3 file",
            ErrorKind::DecodeHeader => "Failed to decode mp3 header",
            ErrorKind::UnsupportedSampleRate => "Unsupported sample rate",
            ErrorKind::DecodeStream => "Failed to decode mp3 stream",
            ErrorKind::Seek => "Failed to move in mp3",
            ErrorKind::SinkWrite => "Failed to write data to sound system",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 运行期播放错误，不会终止引擎
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackError {
    pub kind: ErrorKind,
    /// 出错时正在处理的文件
    pub path: Option<PathBuf>,
    pub message: String,
}

impl PlaybackError {
    pub fn new(kind: ErrorKind, path: Option<&Path>, message: impl fmt::Display) -> Self {
        Self {
            kind,
            path: path.map(Path::to_path_buf),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.kind)?;
        if let Some(path) = &self.path {
            write!(f, "{}: ", path.display())?;
        }
        f.write_str(&self.message)
    }
}

impl std::error::Error for PlaybackError {}
