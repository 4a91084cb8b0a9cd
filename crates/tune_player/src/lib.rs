//! tune_player - 播放引擎
//!
//! 在独立线程中解码 MP3 并向音频设备推送 PCM，
//! UI 通过命令队列控制播放，并每帧轮询状态快照。

mod command;
mod config;
mod decoder;
mod engine;
mod error;
mod output;
mod status;

pub use config::*;
pub use decoder::*;
pub use engine::*;
pub use error::*;
pub use output::*;
pub use status::*;
