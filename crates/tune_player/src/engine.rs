//! 播放引擎
//!
//! 引擎线程独占解码器和音频输出：空闲时每轮向输出写一个缓冲区的 PCM
//! （没有曲目或暂停时写静音），有命令时优先处理命令。
//! UI 线程只发送命令、读取状态快照。

use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use log::{debug, error, info, warn};

use crate::command::Command;
use crate::status::SharedStatus;
use crate::{
    AudioOutput, AudioSink, DecodeSource, DecoderFactory, EngineConfig, EngineError, ErrorKind,
    Mp3Decoders, OutputConfig, OutputError, PlaybackError, StatusSnapshot,
};

/// 播放引擎句柄
///
/// 丢弃句柄等同于调用 [`Player::shutdown`]。
pub struct Player {
    cmd_tx: Sender<Command>,
    status: SharedStatus,
    worker: Option<JoinHandle<()>>,
}

impl Player {
    /// 使用 MP3 解码器和默认输出设备启动引擎
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_backend(config, Mp3Decoders, AudioOutput::open)
    }

    /// 使用指定的解码器和输出启动引擎
    ///
    /// 输出在引擎线程内打开（设备流通常不能跨线程移动），
    /// 打开失败时本函数直接返回错误。
    pub fn with_backend<D, S, O>(
        config: EngineConfig,
        decoders: D,
        open_sink: O,
    ) -> Result<Self, EngineError>
    where
        D: DecoderFactory,
        S: AudioSink + 'static,
        O: FnOnce(&OutputConfig) -> Result<S, OutputError> + Send + 'static,
    {
        config.validate()?;

        let (cmd_tx, cmd_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded::<Result<(), OutputError>>(1);
        let status = SharedStatus::new(config.max_pending_errors);
        let worker_status = status.clone();

        let worker = thread::Builder::new()
            .name("tune-engine".into())
            .spawn(move || {
                let sink = match open_sink(&config.output) {
                    Ok(sink) => {
                        let _ = ready_tx.send(Ok(()));
                        sink
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                Engine::new(config.output, decoders, sink, worker_status).run(cmd_rx);
            })
            .map_err(EngineError::Spawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                cmd_tx,
                status,
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e.into())
            }
            Err(_) => {
                let _ = worker.join();
                Err(EngineError::WorkerExited)
            }
        }
    }

    /// 停止当前曲目并播放 `path`
    pub fn play(&self, path: impl Into<PathBuf>) {
        if self.worker.is_none() {
            debug!("engine is shut down, ignoring play");
            return;
        }
        // 打开和解码文件需要时间，先标记为正在播放，
        // 避免 UI 在引擎处理命令前看到“未播放”而重复请求。
        // 引擎处理完命令后会发布真实状态。
        self.status.mark_playing();
        self.send(Command::PlaySong(path.into()));
    }

    /// 跳转到曲目的 `fraction`（0.0 - 1.0）处，并取消暂停
    pub fn seek(&self, fraction: f64) {
        self.send(Command::SeekToFraction(fraction));
    }

    pub fn toggle_pause(&self) {
        self.send(Command::TogglePause);
    }

    /// 读取最新状态，返回的错误列表随之从共享状态中移除
    pub fn status(&self) -> StatusSnapshot {
        self.status.read()
    }

    /// 关闭引擎，返回时输出设备和解码器都已释放
    ///
    /// 重复调用直接返回；之后的 `play`/`seek`/`toggle_pause` 都被忽略。
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let (ack_tx, ack_rx) = bounded(1);
        if self.cmd_tx.send(Command::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
        if worker.join().is_err() {
            error!("playback engine thread panicked");
        }
    }

    fn send(&self, cmd: Command) {
        if self.worker.is_none() {
            debug!("engine is shut down, ignoring {cmd:?}");
            return;
        }
        if let Err(e) = self.cmd_tx.send(cmd) {
            debug!("engine is not running, dropping {:?}", e.into_inner());
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 计算跳转目标：向下取整，并对齐到帧边界，保证从左声道开始
pub fn seek_offset(fraction: f64, length: u64, frame_bytes: usize) -> u64 {
    let fraction = if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    };
    let offset = ((fraction * length as f64).floor() as u64).min(length);
    let frame_bytes = frame_bytes.max(1) as u64;
    offset - offset % frame_bytes
}

fn fraction_of(position: u64, length: u64) -> f64 {
    if length == 0 {
        return 0.0;
    }
    (position as f64 / length as f64).min(1.0)
}

struct Engine<D: DecoderFactory, S: AudioSink> {
    config: OutputConfig,
    decoders: D,
    sink: S,
    decoder: Option<D::Source>,
    /// 引擎侧状态，`errors` 保存尚未发布的错误
    status: StatusSnapshot,
    shared: SharedStatus,
    buf: Vec<u8>,
    silence: Vec<u8>,
}

impl<D: DecoderFactory, S: AudioSink> Engine<D, S> {
    fn new(config: OutputConfig, decoders: D, sink: S, shared: SharedStatus) -> Self {
        let buf = vec![0; config.buffer_bytes];
        let silence = vec![0; config.buffer_bytes];
        Self {
            config,
            decoders,
            sink,
            decoder: None,
            status: StatusSnapshot::default(),
            shared,
            buf,
            silence,
        }
    }

    fn run(mut self, cmd_rx: Receiver<Command>) {
        debug!("playback engine started");
        loop {
            // 命令优先，每轮最多处理一条
            match cmd_rx.try_recv() {
                Ok(cmd) => {
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                Err(TryRecvError::Empty) => self.pump(),
                Err(TryRecvError::Disconnected) => {
                    self.close();
                    break;
                }
            }
        }
        debug!("playback engine stopped");
    }

    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::PlaySong(path) => {
                self.load(path);
            }
            Command::SeekToFraction(fraction) => {
                self.seek(fraction);
            }
            Command::TogglePause => {
                self.status.paused = !self.status.paused;
                debug!("paused: {}", self.status.paused);
                self.publish();
            }
            Command::Shutdown(ack) => {
                self.close();
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn load(&mut self, path: PathBuf) {
        // 无论新文件能否打开，旧曲目都先停止
        self.decoder = None;
        self.status.playing_file = false;
        self.status.paused = false;
        self.status.fraction_played = 0.0;
        self.status.current_file = Some(path.clone());

        match self.open(&path) {
            Ok(source) => {
                info!("playing {}", path.display());
                self.decoder = Some(source);
                self.status.playing_file = true;
            }
            Err(err) => {
                self.record(err);
                self.status.current_file = None;
            }
        }
        self.publish();
    }

    fn open(&self, path: &Path) -> Result<D::Source, PlaybackError> {
        let bytes =
            fs::read(path).map_err(|e| PlaybackError::new(ErrorKind::FileRead, Some(path), e))?;

        let source = self
            .decoders
            .open(bytes)
            .map_err(|e| PlaybackError::new(ErrorKind::DecodeHeader, Some(path), e))?;

        if source.sample_rate() != self.config.sample_rate {
            return Err(PlaybackError::new(
                ErrorKind::UnsupportedSampleRate,
                Some(path),
                format!(
                    "sample rate is {}, only {} is supported",
                    source.sample_rate(),
                    self.config.sample_rate
                ),
            ));
        }
        Ok(source)
    }

    fn seek(&mut self, fraction: f64) {
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        self.status.paused = false;

        let length = decoder.length();
        let offset = seek_offset(fraction, length, self.config.frame_bytes());
        match decoder.seek(offset) {
            Ok(position) => {
                debug!("seeked to byte {position} of {length}");
                self.status.fraction_played = fraction_of(position, length);
            }
            // 跳转失败不影响继续播放
            Err(e) => self.record_for_current(ErrorKind::Seek, e),
        }
        self.publish();
    }

    /// 向输出写一个缓冲区
    fn pump(&mut self) {
        let decoder = match self.decoder.as_mut() {
            Some(decoder) if !self.status.paused => decoder,
            _ => {
                self.write_silence();
                return;
            }
        };

        let read = match decoder.read(&mut self.buf) {
            Ok(n) => n,
            Err(e) => {
                self.fail(ErrorKind::DecodeStream, e);
                return;
            }
        };

        if read > 0 {
            if let Err(e) = self.sink.write(&self.buf[..read]) {
                self.fail(ErrorKind::SinkWrite, e);
                return;
            }
        }

        if let Some(decoder) = &self.decoder {
            self.status.fraction_played = fraction_of(decoder.position(), decoder.length());
        }
        if read < self.buf.len() {
            // 短读也可能是解码出错前的最后一段数据，空读取出被推迟的错误
            if let Some(decoder) = self.decoder.as_mut() {
                if let Err(e) = decoder.read(&mut []) {
                    self.fail(ErrorKind::DecodeStream, e);
                    return;
                }
            }
            if let Some(path) = &self.status.current_file {
                info!("finished {}", path.display());
            }
            self.stop_track();
        }
        self.publish();
    }

    fn write_silence(&mut self) {
        if let Err(e) = self.sink.write(&self.silence) {
            // 设备坏掉时避免空转
            debug!("failed to write silence: {e}");
            thread::sleep(self.config.buffer_duration());
        }
    }

    /// 记录错误并像曲目播放完一样回到空闲状态
    fn fail(&mut self, kind: ErrorKind, err: impl std::fmt::Display) {
        self.record_for_current(kind, err);
        self.stop_track();
        self.publish();
    }

    fn stop_track(&mut self) {
        self.decoder = None;
        self.status.playing_file = false;
        self.status.current_file = None;
    }

    fn close(&mut self) {
        self.sink.close();
        self.stop_track();
        self.status.paused = false;
        self.publish();
    }

    fn record_for_current(&mut self, kind: ErrorKind, err: impl std::fmt::Display) {
        let err = PlaybackError::new(kind, self.status.current_file.as_deref(), err);
        self.record(err);
    }

    fn record(&mut self, err: PlaybackError) {
        warn!("{err}");
        self.status.errors.push(err);
    }

    fn publish(&mut self) {
        self.shared.publish(&mut self.status);
    }
}
