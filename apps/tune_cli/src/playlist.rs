//! 播放列表

use std::path::PathBuf;

/// 内存中的播放列表，索引越界时按 `repeat` 决定是否回绕
#[derive(Debug, Clone)]
pub struct Playlist {
    items: Vec<PathBuf>,
    index: Option<usize>,
    repeat: bool,
}

impl Playlist {
    pub fn new(items: Vec<PathBuf>, repeat: bool) -> Self {
        Self {
            items,
            index: None,
            repeat,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// 相对当前曲目移动 `step` 首并返回新曲目
    ///
    /// 还没有播放过时，`advance(1)` 返回第一首。不回绕且越界时返回 `None`，
    /// 当前位置不变。
    pub fn advance(&mut self, step: isize) -> Option<PathBuf> {
        let n = self.items.len() as isize;
        if n == 0 {
            return None;
        }
        let target = self.index.map_or(-1, |i| i as isize) + step;
        let target = if self.repeat {
            target.rem_euclid(n)
        } else if (0..n).contains(&target) {
            target
        } else {
            return None;
        };

        let target = target as usize;
        self.index = Some(target);
        Some(self.items[target].clone())
    }
}
