//! 音频输出
//!
//! 使用 cpal 进行音频播放。写入方与设备回调之间是一个有界队列，
//! 队列写满时 `write` 阻塞，以此按实时速度驱动引擎。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig, StreamError};
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use log::{debug, error};

use crate::OutputConfig;

/// 音频输出错误
#[derive(thiserror::Error, Debug)]
pub enum OutputError {
    #[error("No output device available")]
    NoDevice,
    #[error("No supported config")]
    NoConfig,
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("Output is closed")]
    Closed,
    #[error("Output device did not accept audio within {0:?}")]
    Timeout(Duration),
}

/// 接收 PCM 缓冲区的输出端
pub trait AudioSink {
    /// 写入 16 位小端交错 PCM，设备来不及消费时阻塞
    fn write(&mut self, pcm: &[u8]) -> Result<(), OutputError>;

    /// 关闭设备，之后的写入都会失败
    fn close(&mut self);
}

/// 音频输出流
pub struct AudioOutput {
    stream: Option<Stream>,
    sample_tx: Option<Sender<Vec<i16>>>,
    device_lost: Arc<AtomicBool>,
    write_timeout: Option<Duration>,
}

impl AudioOutput {
    /// 打开默认输出设备
    pub fn open(config: &OutputConfig) -> Result<Self, OutputError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(OutputError::NoDevice)?;

        Self::with_device(&device, config)
    }

    /// 使用指定设备创建音频输出
    pub fn with_device(device: &Device, config: &OutputConfig) -> Result<Self, OutputError> {
        let candidates: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| OutputError::Stream(e.to_string()))?
            .filter(|c| {
                c.channels() == config.channels
                    && c.min_sample_rate().0 <= config.sample_rate
                    && c.max_sample_rate().0 >= config.sample_rate
            })
            .collect();

        // 优先 f32，其次 i16
        let supported_config = [SampleFormat::F32, SampleFormat::I16]
            .iter()
            .find_map(|format| candidates.iter().find(|c| c.sample_format() == *format))
            .cloned()
            .ok_or(OutputError::NoConfig)?;

        let sample_format = supported_config.sample_format();
        let stream_config: StreamConfig = supported_config
            .with_sample_rate(cpal::SampleRate(config.sample_rate))
            .into();

        let (sample_tx, sample_rx) = bounded::<Vec<i16>>(config.queued_buffers.max(1));
        let device_lost = Arc::new(AtomicBool::new(false));

        let stream = match sample_format {
            SampleFormat::I16 => {
                build_stream::<i16>(device, &stream_config, sample_rx, device_lost.clone())
            }
            _ => build_stream::<f32>(device, &stream_config, sample_rx, device_lost.clone()),
        }?;

        stream.play().map_err(|e| OutputError::Stream(e.to_string()))?;
        debug!(
            "audio output opened: {} Hz, {} channels, {:?}",
            config.sample_rate, config.channels, sample_format
        );

        Ok(Self {
            stream: Some(stream),
            sample_tx: Some(sample_tx),
            device_lost,
            write_timeout: config.write_timeout,
        })
    }
}

impl AudioSink for AudioOutput {
    fn write(&mut self, pcm: &[u8]) -> Result<(), OutputError> {
        if self.device_lost.load(Ordering::Relaxed) {
            return Err(OutputError::Stream(
                "output device is no longer available".into(),
            ));
        }
        let sample_tx = self.sample_tx.as_ref().ok_or(OutputError::Closed)?;
        let samples = pcm_to_samples(pcm);

        match self.write_timeout {
            None => sample_tx.send(samples).map_err(|_| OutputError::Closed),
            Some(timeout) => sample_tx.send_timeout(samples, timeout).map_err(|e| match e {
                SendTimeoutError::Timeout(_) => OutputError::Timeout(timeout),
                SendTimeoutError::Disconnected(_) => OutputError::Closed,
            }),
        }
    }

    fn close(&mut self) {
        self.sample_tx = None;
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                debug!("failed to pause output stream on close: {e}");
            }
        }
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    sample_rx: Receiver<Vec<i16>>,
    device_lost: Arc<AtomicBool>,
) -> Result<Stream, OutputError>
where
    T: SizedSample + FromSample<i16>,
{
    let mut feeder = Feeder::new(sample_rx);
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| feeder.fill(data),
            move |err| {
                error!("audio output error: {err}");
                if matches!(err, StreamError::DeviceNotAvailable) {
                    device_lost.store(true, Ordering::Relaxed);
                }
            },
            None,
        )
        .map_err(|e| OutputError::Stream(e.to_string()))
}

/// 设备回调侧：从队列取缓冲区填充输出
struct Feeder {
    sample_rx: Receiver<Vec<i16>>,
    current: Vec<i16>,
    offset: usize,
}

impl Feeder {
    fn new(sample_rx: Receiver<Vec<i16>>) -> Self {
        Self {
            sample_rx,
            current: Vec::new(),
            offset: 0,
        }
    }

    fn fill<T>(&mut self, data: &mut [T])
    where
        T: SizedSample + FromSample<i16>,
    {
        let mut written = 0;
        while written < data.len() {
            if self.offset >= self.current.len() {
                match self.sample_rx.try_recv() {
                    Ok(next) => {
                        self.current = next;
                        self.offset = 0;
                        continue;
                    }
                    Err(_) => break,
                }
            }
            let n = (self.current.len() - self.offset).min(data.len() - written);
            for (dst, src) in data[written..written + n]
                .iter_mut()
                .zip(&self.current[self.offset..self.offset + n])
            {
                *dst = T::from_sample(*src);
            }
            self.offset += n;
            written += n;
        }

        // 欠载时补静音
        for dst in &mut data[written..] {
            *dst = T::EQUILIBRIUM;
        }
    }
}

fn pcm_to_samples(pcm: &[u8]) -> Vec<i16> {
    let mut samples = vec![0i16; pcm.len() / 2];
    LittleEndian::read_i16_into(&pcm[..samples.len() * 2], &mut samples);
    samples
}
