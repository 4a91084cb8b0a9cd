//! 状态快照
//!
//! 引擎线程是唯一的写入者，UI 每帧复制一份读取。快照之外没有任何跨线程共享的状态。

use std::path::PathBuf;
use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;
use serde::Serialize;

use crate::PlaybackError;

/// 引擎当前状态
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// 已加载文件且尚未播放结束或出错
    pub playing_file: bool,
    pub current_file: Option<PathBuf>,
    /// 已播放比例，范围 0.0 - 1.0
    pub fraction_played: f64,
    pub paused: bool,
    /// 自上次读取以来产生的错误，读取后清空
    pub errors: Vec<PlaybackError>,
}

/// 引擎与 UI 之间共享的快照
#[derive(Debug, Clone)]
pub(crate) struct SharedStatus {
    inner: Arc<Mutex<StatusSnapshot>>,
    max_errors: usize,
}

impl SharedStatus {
    pub fn new(max_errors: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatusSnapshot::default())),
            max_errors,
        }
    }

    /// 用引擎状态替换快照，`status.errors` 中的新错误被移入未读列表
    pub fn publish(&self, status: &mut StatusSnapshot) {
        let mut shared = self.inner.lock();
        let mut errors = std::mem::take(&mut shared.errors);
        errors.append(&mut status.errors);
        if errors.len() > self.max_errors {
            let dropped = errors.len() - self.max_errors;
            warn!("dropping {dropped} unread playback errors");
            errors.drain(..dropped);
        }
        *shared = StatusSnapshot {
            errors,
            ..status.clone()
        };
    }

    /// 复制当前快照，并清空共享快照中的错误列表
    pub fn read(&self) -> StatusSnapshot {
        let mut shared = self.inner.lock();
        let errors = std::mem::take(&mut shared.errors);
        StatusSnapshot {
            errors,
            ..shared.clone()
        }
    }

    pub fn mark_playing(&self) {
        self.inner.lock().playing_file = true;
    }
}
