//! V4L2 capture devices.
//!
//! `V4l2Provider` maps a device index to `/dev/video{index}` (index `-1`
//! picks the lowest-numbered node present). Each opened device:
//! - negotiates RGB3 at the requested size, keeping whatever the driver settles on
//! - requests the target frame rate (best effort)
//! - starts a memory-mapped stream lazily on the first read
//! - converts RGB3/YUYV/MJPG buffers into RGB frames
//!
//! The device node is closed when the `CaptureDevice` is dropped.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::path::PathBuf;

use super::normalize::{to_frame, PixelFormat};
use super::{CaptureDevice, CaptureFormat, DeviceProvider, DEFAULT_DEVICE_INDEX};
use crate::frame::Frame;

const STREAM_BUFFERS: u32 = 4;

#[derive(Clone, Debug)]
pub struct V4l2Provider {
    dev_dir: PathBuf,
}

impl V4l2Provider {
    pub fn new() -> Self {
        Self {
            dev_dir: PathBuf::from("/dev"),
        }
    }

    fn device_path(&self, index: i32) -> Result<PathBuf> {
        if index == DEFAULT_DEVICE_INDEX {
            return self.first_video_node();
        }
        if index < 0 {
            return Err(anyhow!("invalid v4l2 device index {}", index));
        }
        Ok(self.dev_dir.join(format!("video{index}")))
    }

    fn first_video_node(&self) -> Result<PathBuf> {
        let entries = std::fs::read_dir(&self.dev_dir)
            .with_context(|| format!("list {}", self.dev_dir.display()))?;
        let mut numbers: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_prefix("video"))
                    .and_then(|n| n.parse().ok())
            })
            .collect();
        numbers.sort_unstable();
        numbers
            .first()
            .map(|n| self.dev_dir.join(format!("video{n}")))
            .ok_or_else(|| anyhow!("no video device nodes in {}", self.dev_dir.display()))
    }
}

impl Default for V4l2Provider {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for V4l2Provider {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn open(&mut self, index: i32) -> Result<Box<dyn CaptureDevice>> {
        let path = self.device_path(index)?;
        let device = v4l::Device::with_path(&path)
            .with_context(|| format!("open v4l2 device {}", path.display()))?;
        let mut opened = V4l2Device {
            path,
            device: Some(device),
            state: None,
            width: 0,
            height: 0,
            pixel_format: PixelFormat::Rgb24,
        };
        opened.read_active_format()?;
        Ok(Box::new(opened))
    }
}

#[self_referencing]
struct StreamState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Device {
    path: PathBuf,
    /// Present until streaming starts, then moved into `state`.
    device: Option<v4l::Device>,
    state: Option<StreamState>,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl V4l2Device {
    fn read_active_format(&mut self) -> Result<()> {
        use v4l::video::Capture;

        let device = self
            .device
            .as_ref()
            .context("v4l2 stream already started")?;
        let format = device.format().context("read v4l2 format")?;
        self.apply_format(&format)
    }

    fn apply_format(&mut self, format: &v4l::Format) -> Result<()> {
        self.pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "unsupported pixel format {} on {}",
                format.fourcc,
                self.path.display()
            )
        })?;
        self.width = format.width;
        self.height = format.height;
        Ok(())
    }

    fn ensure_streaming(&mut self) -> Result<&mut StreamState> {
        use v4l::buffer::Type;

        if self.state.is_none() {
            let device = self
                .device
                .take()
                .context("v4l2 device handle missing")?;
            let state = StreamStateBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                        .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
                },
            }
            .try_build()?;
            self.state = Some(state);
        }
        self.state.as_mut().context("v4l2 stream not started")
    }
}

impl CaptureDevice for V4l2Device {
    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn configure(&mut self, requested: &CaptureFormat) -> Result<()> {
        use v4l::video::Capture;

        let device = self
            .device
            .as_ref()
            .context("cannot reconfigure a streaming v4l2 device")?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = requested.width;
        format.height = requested.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let set_result = device.set_format(&format);
        if requested.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(requested.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("v4l2: failed to set fps on {}: {}", self.path.display(), err);
            }
        }

        match set_result {
            Ok(active) => {
                self.apply_format(&active)?;
                if active.width != requested.width || active.height != requested.height {
                    log::warn!(
                        "v4l2: {} settled on {}x{} instead of {}x{}",
                        self.path.display(),
                        active.width,
                        active.height,
                        requested.width,
                        requested.height
                    );
                }
                Ok(())
            }
            Err(err) => {
                self.read_active_format()?;
                Err(anyhow::Error::new(err).context("set v4l2 format"))
            }
        }
    }

    fn read_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (width, height, pixel_format) = (self.width, self.height, self.pixel_format);
        let state = self.ensure_streaming()?;
        state.with_mut(|fields| {
            let (buf, meta) = fields.stream.next().context("capture v4l2 frame")?;
            let used = (meta.bytesused as usize).min(buf.len());
            let payload = if used == 0 { buf } else { &buf[..used] };
            to_frame(payload, width, height, pixel_format)
        })
    }
}
