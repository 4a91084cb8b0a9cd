//! 音频解码器
//!
//! 使用 symphonia 解码 MP3，输出 16 位小端立体声交错 PCM 字节流。
//! 位置、长度和跳转都以 PCM 字节为单位。

use std::io::Cursor;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo, SeekedTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// 输出帧大小：2 声道 × 2 字节
pub const FRAME_BYTES: usize = 4;

/// 解码器错误
#[derive(thiserror::Error, Debug)]
pub enum DecoderError {
    #[error("No supported audio track found")]
    NoTrack,
    #[error("Unsupported codec")]
    UnsupportedCodec,
    #[error("Stream does not declare a sample rate")]
    MissingSampleRate,
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Seek offset {offset} is beyond the stream length {length}")]
    SeekOutOfRange { offset: u64, length: u64 },
}

impl From<SymphoniaError> for DecoderError {
    fn from(e: SymphoniaError) -> Self {
        DecoderError::Decode(e.to_string())
    }
}

/// 可随机访问的 PCM 解码源
pub trait DecodeSource: Send {
    /// 尽量填满 `buf`，返回写入字节数；少于 `buf.len()` 表示流已结束
    ///
    /// 已填入部分数据后遇到解码错误时，先返回这部分数据，
    /// 错误在下一次调用时返回（`buf` 为空也一样）。
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DecoderError>;

    /// 跳转到 PCM 字节偏移，返回实际位置
    fn seek(&mut self, offset: u64) -> Result<u64, DecoderError>;

    /// PCM 总字节数
    fn length(&self) -> u64;

    /// 当前 PCM 字节位置
    fn position(&self) -> u64;

    fn sample_rate(&self) -> u32;
}

/// 从内存中的文件内容打开解码源
pub trait DecoderFactory: Send + 'static {
    type Source: DecodeSource;

    fn open(&self, bytes: Vec<u8>) -> Result<Self::Source, DecoderError>;
}

/// 默认的 MP3 解码器工厂
#[derive(Debug, Clone, Copy, Default)]
pub struct Mp3Decoders;

impl DecoderFactory for Mp3Decoders {
    type Source = Mp3Decoder;

    fn open(&self, bytes: Vec<u8>) -> Result<Mp3Decoder, DecoderError> {
        Mp3Decoder::new(bytes)
    }
}

/// MP3 解码器
pub struct Mp3Decoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    length: u64,
    position: u64,
    sample_buf: Option<SampleBuffer<i16>>,
    /// 已解码但尚未读出的 PCM
    pending: Vec<u8>,
    pending_pos: usize,
    /// 精确跳转后需要丢弃的帧数
    skip_frames: u64,
    finished: bool,
    /// 已读出部分数据时遇到的解码错误，下一次读取时返回
    deferred_error: Option<DecoderError>,
}

impl Mp3Decoder {
    pub fn new(bytes: Vec<u8>) -> Result<Self, DecoderError> {
        let data: Arc<[u8]> = bytes.into();
        let format = probe(&data)?;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecoderError::NoTrack)?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or(DecoderError::MissingSampleRate)?;

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|_| DecoderError::UnsupportedCodec)?;

        // 没有 Xing/Info 头时容器不声明帧数，只能扫一遍包头
        let frames = match codec_params.n_frames {
            Some(frames) => frames,
            None => count_frames(&data, track_id)?,
        };

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            length: frames * FRAME_BYTES as u64,
            position: 0,
            sample_buf: None,
            pending: Vec::new(),
            pending_pos: 0,
            skip_frames: 0,
            finished: false,
            deferred_error: None,
        })
    }

    /// 解码下一个包到 `pending`，流结束时返回 false
    fn decode_packet(&mut self) -> Result<bool, DecoderError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.finished = true;
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.finished = true;
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!("skipping corrupt mp3 frame: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            let needed = decoded.capacity() * channels;
            if self
                .sample_buf
                .as_ref()
                .is_some_and(|buf| buf.capacity() < needed)
            {
                self.sample_buf = None;
            }
            let sample_buf = self
                .sample_buf
                .get_or_insert_with(|| SampleBuffer::new(decoded.capacity() as u64, spec));
            sample_buf.copy_interleaved_ref(decoded);

            to_stereo_bytes(sample_buf.samples(), channels, &mut self.pending);

            let frames = (self.pending.len() / FRAME_BYTES) as u64;
            let skip = self.skip_frames.min(frames);
            self.skip_frames -= skip;
            self.pending_pos = skip as usize * FRAME_BYTES;

            if self.pending_pos < self.pending.len() {
                return Ok(true);
            }
        }
    }

    /// 容器跳转成功后才丢弃缓冲的 PCM，失败时保持原位置继续播放
    fn finish_seek(
        &mut self,
        seeked: Result<SeekedTo, SymphoniaError>,
    ) -> Result<u64, DecoderError> {
        let seeked = seeked?;

        self.discard_pending();
        self.decoder.reset();
        self.finished = false;
        self.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
        self.position = seeked.required_ts * FRAME_BYTES as u64;
        Ok(self.position)
    }

    fn discard_pending(&mut self) {
        self.pending.clear();
        self.pending_pos = 0;
        self.skip_frames = 0;
        self.deferred_error = None;
    }
}

impl DecodeSource for Mp3Decoder {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DecoderError> {
        if let Some(e) = self.deferred_error.take() {
            return Err(e);
        }
        let mut filled = 0;
        while filled < buf.len() {
            if self.pending_pos < self.pending.len() {
                let n = (self.pending.len() - self.pending_pos).min(buf.len() - filled);
                buf[filled..filled + n]
                    .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
                self.pending_pos += n;
                self.position += n as u64;
                filled += n;
                continue;
            }
            if self.finished {
                break;
            }
            match self.decode_packet() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) if filled > 0 => {
                    self.deferred_error = Some(e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn seek(&mut self, offset: u64) -> Result<u64, DecoderError> {
        if offset > self.length {
            return Err(DecoderError::SeekOutOfRange {
                offset,
                length: self.length,
            });
        }

        if offset == self.length {
            self.discard_pending();
            self.finished = true;
            self.position = self.length;
            return Ok(self.position);
        }

        let seeked = self.format.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: offset / FRAME_BYTES as u64,
                track_id: self.track_id,
            },
        );
        self.finish_seek(seeked)
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn probe(data: &Arc<[u8]>) -> Result<Box<dyn FormatReader>, DecoderError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(Arc::clone(data))), Default::default());

    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecoderError::Decode(e.to_string()))?;

    Ok(probed.format)
}

/// 只读包头统计总帧数，不做解码
fn count_frames(data: &Arc<[u8]>, track_id: u32) -> Result<u64, DecoderError> {
    let mut format = probe(data)?;
    let mut frames = 0;
    loop {
        match format.next_packet() {
            Ok(packet) if packet.track_id() == track_id => frames += packet.dur,
            Ok(_) => {}
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => {
                debug!("stopping frame count after {frames} frames: {e}");
                break;
            }
        }
    }
    Ok(frames)
}

/// 交错采样转为立体声小端字节，单声道复制到两个声道，多余声道丢弃
fn to_stereo_bytes(samples: &[i16], channels: usize, out: &mut Vec<u8>) {
    out.clear();
    if channels == 0 {
        return;
    }
    let frames = samples.len() / channels;
    out.resize(frames * FRAME_BYTES, 0);
    for (frame, dst) in samples
        .chunks_exact(channels)
        .zip(out.chunks_exact_mut(FRAME_BYTES))
    {
        let left = frame[0];
        let right = if channels > 1 { frame[1] } else { left };
        LittleEndian::write_i16(&mut dst[..2], left);
        LittleEndian::write_i16(&mut dst[2..], right);
    }
}
