//! Camera - Frame Source Adapters
//!
//! ## Responsibilities
//!
//! - `CameraSource` contract consumed by the acquisition loop
//! - ffmpeg-backed source: V4L2 device index, network stream URL or video file
//! - Capture properties (size, buffer, fps, open/read timeouts)
//!
//! ffmpeg decodes to raw RGB24 on stdout; a reader thread slices it into
//! frames and hands them over through a bounded channel whose capacity is
//! the configured buffer size.

use crate::error::{Error, Result};
use crate::models::Frame;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Properties (re)applied every time the source is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureProperties {
    pub width: u32,
    pub height: u32,
    /// Frames buffered ahead of the reader
    pub buffer_size: usize,
    pub fps: u32,
    pub open_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for CaptureProperties {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            buffer_size: 1,
            fps: 15,
            open_timeout: Duration::from_millis(5000),
            read_timeout: Duration::from_millis(3000),
        }
    }
}

/// Frame source owned by the acquisition loop
pub trait CameraSource: Send {
    /// Open (or reopen) the source with `props`
    fn open(&mut self, props: &CaptureProperties) -> Result<()>;

    /// Next frame. `Ok(None)` means the source ended for good; `Err` is a
    /// failed read that may recover.
    fn read(&mut self) -> Result<Option<Frame>>;

    fn release(&mut self);

    fn is_open(&self) -> bool;
}

/// What `CAMERA_INDEX` points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSpec {
    /// `/dev/video<N>`
    Device(u32),
    /// http(s):// or rtsp:// stream
    Url(String),
    /// Finite video file
    File(PathBuf),
}

impl CameraSpec {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if let Ok(index) = value.parse::<u32>() {
            CameraSpec::Device(index)
        } else if value.contains("://") {
            CameraSpec::Url(value.to_string())
        } else {
            CameraSpec::File(PathBuf::from(value))
        }
    }

    pub fn is_finite(&self) -> bool {
        matches!(self, CameraSpec::File(_))
    }

    /// ffmpeg input arguments
    fn input_args(&self, props: &CaptureProperties) -> Vec<String> {
        match self {
            CameraSpec::Device(index) => vec![
                "-f".into(),
                "v4l2".into(),
                "-framerate".into(),
                props.fps.to_string(),
                "-video_size".into(),
                format!("{}x{}", props.width, props.height),
                "-i".into(),
                format!("/dev/video{}", index),
            ],
            CameraSpec::Url(url) => {
                let mut args = Vec::new();
                if url.starts_with("rtsp://") {
                    args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
                }
                args.extend(["-i".to_string(), url.clone()]);
                args
            }
            CameraSpec::File(path) => vec![
                "-re".into(),
                "-i".into(),
                path.display().to_string(),
            ],
        }
    }
}

enum ReadEvent {
    Frame(Frame),
    End,
    Failed(String),
}

struct Running {
    child: Child,
    frames: Receiver<ReadEvent>,
    props: CaptureProperties,
    awaiting_first: bool,
}

/// ffmpeg child process producing raw RGB24 frames
pub struct FfmpegCamera {
    spec: CameraSpec,
    running: Option<Running>,
}

impl FfmpegCamera {
    /// Create new FfmpegCamera (not opened yet)
    pub fn new(spec: CameraSpec) -> Self {
        Self {
            spec,
            running: None,
        }
    }

    pub fn spec(&self) -> &CameraSpec {
        &self.spec
    }

    fn command(&self, props: &CaptureProperties) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error"])
            .args(self.spec.input_args(props))
            .args([
                "-vf".to_string(),
                format!("scale={}:{},fps={}", props.width, props.height, props.fps),
                "-f".to_string(),
                "rawvideo".to_string(),
                "-pix_fmt".to_string(),
                "rgb24".to_string(),
                "pipe:1".to_string(),
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        cmd
    }
}

fn spawn_reader(mut stdout: impl Read + Send + 'static, width: u32, height: u32, buffer: usize) -> Receiver<ReadEvent> {
    let (tx, rx) = mpsc::sync_channel(buffer.max(1));
    let frame_len = width as usize * height as usize * 3;

    thread::spawn(move || loop {
        let mut buf = vec![0u8; frame_len];
        let event = match stdout.read_exact(&mut buf) {
            Ok(()) => match Frame::from_raw(width, height, buf) {
                Some(frame) => ReadEvent::Frame(frame),
                None => ReadEvent::Failed("frame buffer size mismatch".to_string()),
            },
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => ReadEvent::End,
            Err(e) => ReadEvent::Failed(e.to_string()),
        };
        let last = !matches!(event, ReadEvent::Frame(_));
        if tx.send(event).is_err() || last {
            break;
        }
    });
    rx
}

impl CameraSource for FfmpegCamera {
    fn open(&mut self, props: &CaptureProperties) -> Result<()> {
        self.release();

        let mut child = self
            .command(props)
            .spawn()
            .map_err(|e| Error::Camera(format!("ffmpeg spawn failed: {}", e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Camera("ffmpeg stdout unavailable".to_string()))?;

        let frames = spawn_reader(stdout, props.width, props.height, props.buffer_size);
        tracing::info!(
            source = ?self.spec,
            width = props.width,
            height = props.height,
            fps = props.fps,
            "Camera opened"
        );

        self.running = Some(Running {
            child,
            frames,
            props: props.clone(),
            awaiting_first: true,
        });
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        let finite = self.spec.is_finite();
        let running = self
            .running
            .as_mut()
            .ok_or_else(|| Error::Camera("camera not open".to_string()))?;

        let timeout = if running.awaiting_first {
            running.props.open_timeout
        } else {
            running.props.read_timeout
        };

        match running.frames.recv_timeout(timeout) {
            Ok(ReadEvent::Frame(frame)) => {
                running.awaiting_first = false;
                Ok(Some(frame))
            }
            Ok(ReadEvent::End) | Err(RecvTimeoutError::Disconnected) if finite => Ok(None),
            Ok(ReadEvent::End) | Err(RecvTimeoutError::Disconnected) => {
                Err(Error::Camera("stream ended".to_string()))
            }
            Ok(ReadEvent::Failed(msg)) => Err(Error::Camera(msg)),
            Err(RecvTimeoutError::Timeout) => Err(Error::Camera(format!(
                "no frame within {} ms",
                timeout.as_millis()
            ))),
        }
    }

    fn release(&mut self) {
        if let Some(mut running) = self.running.take() {
            let _ = running.child.kill();
            let _ = running.child.wait();
            tracing::info!(source = ?self.spec, "Camera released");
        }
    }

    fn is_open(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for FfmpegCamera {
    fn drop(&mut self) {
        self.release();
    }
}
