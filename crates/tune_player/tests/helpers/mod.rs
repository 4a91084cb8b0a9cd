//! 引擎测试用的解码器、输出和文件生成工具

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tempfile::TempDir;
use tune_player::{
    AudioSink, DecodeSource, DecoderError, DecoderFactory, OutputConfig, OutputError,
    PlaybackError, Player, StatusSnapshot,
};

const MAGIC: &[u8; 4] = b"PCM!";
const WAIT_LIMIT: Duration = Duration::from_secs(10);

/// 在临时目录中生成测试曲目
///
/// 文件格式：`PCM!` + 采样率（u32 小端）+ 原始 PCM。PCM 每个字节都是 `tag`，
/// 用来在输出记录中区分曲目。
pub struct TrackDir {
    dir: TempDir,
}

impl TrackDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn track(&self, name: &str, sample_rate: u32, seconds: f64, tag: u8) -> PathBuf {
        assert_ne!(tag, 0, "tag 0 is indistinguishable from silence");
        let frames = (seconds * sample_rate as f64) as usize;
        let mut bytes = Vec::with_capacity(8 + frames * 4);
        bytes.extend_from_slice(MAGIC);
        let mut rate = [0u8; 4];
        LittleEndian::write_u32(&mut rate, sample_rate);
        bytes.extend_from_slice(&rate);
        bytes.resize(8 + frames * 4, tag);

        let path = self.path(name);
        fs::write(&path, bytes).expect("write track");
        path
    }

    pub fn garbage(&self, name: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, b"ID3 but not really".repeat(64)).expect("write garbage");
        path
    }
}

/// 解码 `TrackDir` 生成的文件，并统计打开的解码源
#[derive(Clone, Default)]
pub struct PcmDecoders {
    pub open_sources: Arc<AtomicUsize>,
    pub peak_sources: Arc<AtomicUsize>,
    pub seeks: Arc<Mutex<Vec<u64>>>,
    /// 读到该字节位置时报告解码错误
    pub fail_at: Option<u64>,
    pub fail_seeks: bool,
}

impl DecoderFactory for PcmDecoders {
    type Source = PcmSource;

    fn open(&self, bytes: Vec<u8>) -> Result<PcmSource, DecoderError> {
        if bytes.len() < 8 || &bytes[..4] != MAGIC {
            return Err(DecoderError::Decode("missing PCM header".into()));
        }
        let sample_rate = LittleEndian::read_u32(&bytes[4..8]);

        let open = self.open_sources.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_sources.fetch_max(open, Ordering::SeqCst);

        Ok(PcmSource {
            data: bytes[8..].to_vec(),
            position: 0,
            sample_rate,
            factory: self.clone(),
        })
    }
}

pub struct PcmSource {
    data: Vec<u8>,
    position: usize,
    sample_rate: u32,
    factory: PcmDecoders,
}

impl DecodeSource for PcmSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DecoderError> {
        if let Some(fail_at) = self.factory.fail_at {
            if self.position as u64 >= fail_at {
                return Err(DecoderError::Decode("corrupt frame".into()));
            }
        }
        let mut n = (self.data.len() - self.position).min(buf.len());
        if let Some(fail_at) = self.factory.fail_at {
            // 先交出出错位置之前的数据，下一次读取再报错
            n = n.min(fail_at as usize - self.position);
        }
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn seek(&mut self, offset: u64) -> Result<u64, DecoderError> {
        self.factory.seeks.lock().push(offset);
        if self.factory.fail_seeks {
            return Err(DecoderError::Decode("stream is not seekable".into()));
        }
        if offset > self.data.len() as u64 {
            return Err(DecoderError::SeekOutOfRange {
                offset,
                length: self.data.len() as u64,
            });
        }
        self.position = offset as usize;
        Ok(offset)
    }

    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for PcmSource {
    fn drop(&mut self) {
        self.factory.open_sources.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 输出端收到的数据
#[derive(Debug, Default)]
pub struct SinkLog {
    /// 非静音写入的首字节（即曲目 tag）
    pub tags: Vec<u8>,
    pub audio_bytes: usize,
    pub silent_writes: usize,
    pub closed: bool,
}

impl SinkLog {
    fn record(&mut self, pcm: &[u8]) {
        if pcm.iter().all(|&b| b == 0) {
            self.silent_writes += 1;
        } else {
            self.tags.push(pcm[0]);
            self.audio_bytes += pcm.len();
        }
    }
}

/// 每次写入后休眠 `pace` 的输出
pub struct RecordingSink {
    pub log: Arc<Mutex<SinkLog>>,
    pace: Duration,
    fail_audio: bool,
}

impl RecordingSink {
    pub fn new(pace: Duration) -> (Arc<Mutex<SinkLog>>, Self) {
        let log = Arc::new(Mutex::new(SinkLog::default()));
        let sink = Self {
            log: Arc::clone(&log),
            pace,
            fail_audio: false,
        };
        (log, sink)
    }

    /// 非静音数据一律写入失败
    pub fn unplugged(pace: Duration) -> (Arc<Mutex<SinkLog>>, Self) {
        let (log, mut sink) = Self::new(pace);
        sink.fail_audio = true;
        (log, sink)
    }
}

impl AudioSink for RecordingSink {
    fn write(&mut self, pcm: &[u8]) -> Result<(), OutputError> {
        let mut log = self.log.lock();
        if log.closed {
            return Err(OutputError::Closed);
        }
        if self.fail_audio && pcm.iter().any(|&b| b != 0) {
            return Err(OutputError::Stream("device unplugged".into()));
        }
        log.record(pcm);
        drop(log);
        thread::sleep(self.pace);
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().closed = true;
    }
}

/// 由测试逐次放行写入的输出
///
/// 每次写入先通知测试，再等待放行，测试因此能确定引擎线程停在哪一步。
pub struct ClockedSink {
    entered: Sender<()>,
    ticks: Receiver<()>,
    pub log: Arc<Mutex<SinkLog>>,
}

pub struct Clock {
    entered: Receiver<()>,
    ticks: Sender<()>,
}

impl Clock {
    /// 等到引擎线程阻塞在某次写入中
    pub fn hold(&self) {
        self.entered
            .recv_timeout(WAIT_LIMIT)
            .expect("engine never reached the sink");
    }

    /// 放行当前写入，并等到引擎阻塞在下一次写入中
    ///
    /// 返回时，放行前已发出的命令都已处理完毕。
    pub fn advance(&self) {
        self.ticks
            .send_timeout((), WAIT_LIMIT)
            .expect("engine is not writing");
        self.hold();
    }
}

pub fn clocked_sink() -> (Clock, Arc<Mutex<SinkLog>>, ClockedSink) {
    let (entered_tx, entered_rx) = unbounded();
    let (ticks_tx, ticks_rx) = bounded(0);
    let log = Arc::new(Mutex::new(SinkLog::default()));
    let sink = ClockedSink {
        entered: entered_tx,
        ticks: ticks_rx,
        log: Arc::clone(&log),
    };
    let clock = Clock {
        entered: entered_rx,
        ticks: ticks_tx,
    };
    (clock, log, sink)
}

impl AudioSink for ClockedSink {
    fn write(&mut self, pcm: &[u8]) -> Result<(), OutputError> {
        let _ = self.entered.send(());
        // 时钟丢弃后或超时都直接放行，避免测试失败时卡住
        let _ = self.ticks.recv_timeout(WAIT_LIMIT);
        self.log.lock().record(pcm);
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().closed = true;
    }
}

/// 使用测试解码器和输出启动引擎
pub fn start<S>(decoders: PcmDecoders, sink: S) -> Player
where
    S: AudioSink + Send + 'static,
{
    Player::with_backend(Default::default(), decoders, move |_: &OutputConfig| Ok(sink))
        .expect("start engine")
}

/// 轮询状态直到满足条件，期间读到的错误都收集到 `errors`
pub fn wait_until(
    player: &Player,
    errors: &mut Vec<PlaybackError>,
    mut done: impl FnMut(&StatusSnapshot) -> bool,
) -> StatusSnapshot {
    let started = Instant::now();
    loop {
        let status = player.status();
        errors.extend(status.errors.iter().cloned());
        if done(&status) {
            return status;
        }
        assert!(
            started.elapsed() < WAIT_LIMIT,
            "timed out waiting for engine, last status: {status:?}"
        );
        thread::sleep(Duration::from_millis(1));
    }
}

pub fn is_playing(path: &Path) -> impl FnMut(&StatusSnapshot) -> bool + '_ {
    move |status: &StatusSnapshot| status.playing_file && status.current_file.as_deref() == Some(path)
}
