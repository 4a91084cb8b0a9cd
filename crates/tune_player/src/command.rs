//! 播放命令定义

use std::path::PathBuf;

use crossbeam_channel::Sender;

/// 播放器命令（UI -> 引擎），按发送顺序逐条处理
#[derive(Debug)]
pub(crate) enum Command {
    /// 停止当前曲目并开始解码指定文件
    PlaySong(PathBuf),
    /// 跳转到总长度的指定比例
    SeekToFraction(f64),
    /// 切换暂停/播放
    TogglePause,
    /// 关闭引擎，释放设备与解码器后通过 ack 应答
    Shutdown(Sender<()>),
}
