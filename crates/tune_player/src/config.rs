//! 引擎配置

use std::time::Duration;

use crate::EngineError;

/// 输出设备采样率，解码结果必须与之一致
pub const SAMPLE_RATE: u32 = 44100;

/// 音频输出配置
#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: u16,
    /// 每次写入设备的 PCM 字节数
    pub buffer_bytes: usize,
    /// 设备前最多排队的缓冲区个数，写满后写入阻塞
    pub queued_buffers: usize,
    /// 写入等待上限，`None` 表示一直阻塞
    pub write_timeout: Option<Duration>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        let sample_rate = SAMPLE_RATE;
        let channels = 2;
        let bytes_per_sample = 2;
        Self {
            sample_rate,
            channels,
            bytes_per_sample,
            buffer_bytes: Self::sixteenth_second(sample_rate, channels, bytes_per_sample),
            queued_buffers: 2,
            write_timeout: None,
        }
    }
}

impl OutputConfig {
    /// 约 1/16 秒的缓冲区大小，向下对齐到帧边界
    pub fn sixteenth_second(sample_rate: u32, channels: u16, bytes_per_sample: u16) -> usize {
        let frame = channels as usize * bytes_per_sample as usize;
        if frame == 0 {
            return 0;
        }
        let bytes_per_second = sample_rate as usize * frame;
        bytes_per_second / 16 / frame * frame
    }

    /// 一帧（所有声道各一个采样）的字节数
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.bytes_per_sample as usize
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.frame_bytes()
    }

    /// 一个缓冲区对应的播放时长
    pub fn buffer_duration(&self) -> Duration {
        match self.bytes_per_second() {
            0 => Duration::ZERO,
            bps => Duration::from_secs_f64(self.buffer_bytes as f64 / bps as f64),
        }
    }
}

/// 播放引擎配置
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub output: OutputConfig,
    /// 未被读取的错误最多保留条数，超出时丢弃最旧的
    pub max_pending_errors: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output: OutputConfig::default(),
            max_pending_errors: 256,
        }
    }
}

impl EngineConfig {
    /// 解码器只输出 16 位立体声，其他 PCM 规格一律拒绝
    pub fn validate(&self) -> Result<(), EngineError> {
        let output = &self.output;
        if output.channels != 2 {
            return Err(EngineError::InvalidConfig(format!(
                "{} channels requested, only stereo is supported",
                output.channels
            )));
        }
        if output.bytes_per_sample != 2 {
            return Err(EngineError::InvalidConfig(format!(
                "{} bytes per sample requested, only 16-bit samples are supported",
                output.bytes_per_sample
            )));
        }
        if output.sample_rate == 0 {
            return Err(EngineError::InvalidConfig("sample rate must not be zero".into()));
        }
        if output.buffer_bytes == 0 || output.buffer_bytes % output.frame_bytes() != 0 {
            return Err(EngineError::InvalidConfig(format!(
                "buffer size {} is not a positive multiple of the {}-byte frame",
                output.buffer_bytes,
                output.frame_bytes()
            )));
        }
        if self.max_pending_errors == 0 {
            return Err(EngineError::InvalidConfig(
                "max_pending_errors must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
