// =============================================================================
// FRAME CAPTURE - Copy presented frames out and encode them off-thread
// =============================================================================
//
// FLOW (per reused swapchain image):
// 1. Renderer copies the image into a host-visible linear image (readback)
// 2. Rows are read into the next record of the encoder ring
// 3. The record is moved to a worker thread which writes img<N>.bmp
// 4. After `frame_limit` captures the window is asked to close

pub mod encoder;
pub mod readback;

use anyhow::Result;
use std::sync::Arc;

pub use encoder::{BmpSink, CaptureFrame, EncoderPool, FrameSink};

use crate::config::CaptureConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureProgress {
    Continue,
    LimitReached,
}

pub struct FrameCapture {
    encoder: EncoderPool,
    captured: u64,
    limit: u64,
}

impl FrameCapture {
    /// Capture into BMP files under `config.output_dir`.
    pub fn new(config: &CaptureConfig) -> Result<Self> {
        let sink = BmpSink::new(&config.output_dir)?;
        log::info!(
            "Capturing up to {} frames into {:?} ({} encoder slots)",
            config.frame_limit,
            sink.dir(),
            config.pool_size
        );
        Ok(Self::with_sink(config, Arc::new(sink)))
    }

    pub fn with_sink(config: &CaptureConfig, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            encoder: EncoderPool::new(config.pool_size, sink),
            captured: 0,
            limit: config.frame_limit,
        }
    }

    pub fn captured(&self) -> u64 {
        self.captured
    }

    /// Fill the next record with `fill` and queue it for encoding.
    ///
    /// Nothing is recorded once the limit has been reached. A record whose
    /// fill fails goes back to the ring unsubmitted and is not counted.
    pub fn record<F>(&mut self, fill: F) -> Result<CaptureProgress>
    where
        F: FnOnce(&mut CaptureFrame) -> Result<()>,
    {
        if self.captured >= self.limit {
            return Ok(CaptureProgress::LimitReached);
        }

        let mut frame = self.encoder.next_frame();
        frame.index = self.captured;
        if let Err(e) = fill(&mut frame) {
            self.encoder.restore(frame);
            return Err(e);
        }
        self.encoder.submit(frame)?;

        self.captured += 1;
        if self.captured >= self.limit {
            log::info!("Captured {} frames, stopping", self.captured);
            Ok(CaptureProgress::LimitReached)
        } else {
            Ok(CaptureProgress::Continue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::encoder::ChannelOrder;
    use super::*;
    use std::path::PathBuf;

    fn config(dir: PathBuf, limit: u64) -> CaptureConfig {
        config_with_pool(dir, limit, 2)
    }

    fn config_with_pool(dir: PathBuf, limit: u64, pool_size: usize) -> CaptureConfig {
        CaptureConfig {
            enabled: true,
            pool_size,
            frame_limit: limit,
            output_dir: dir,
        }
    }

    #[test]
    fn limit_produces_sequential_files() {
        let dir = std::env::temp_dir().join(format!("frame-capture-{}", std::process::id()));
        let mut capture = FrameCapture::new(&config(dir.clone(), 5)).unwrap();

        let mut progress = Vec::new();
        for shade in 0..5u8 {
            progress.push(
                capture
                    .record(|frame| {
                        frame.prepare(4, 3, ChannelOrder::Bgra);
                        frame.pixels.fill(shade * 40);
                        Ok(())
                    })
                    .unwrap(),
            );
        }
        assert_eq!(capture.captured(), 5);
        assert_eq!(progress[3], CaptureProgress::Continue);
        assert_eq!(progress[4], CaptureProgress::LimitReached);

        // Dropping joins the outstanding workers
        drop(capture);

        for index in 0..5 {
            let path = dir.join(format!("img{}.bmp", index));
            let decoded = image::open(&path).unwrap().to_rgb8();
            assert_eq!(decoded.dimensions(), (4, 3));
        }
        assert!(!dir.join("img5.bmp").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn failed_fill_is_not_counted() {
        let dir = std::env::temp_dir().join(format!("frame-capture-err-{}", std::process::id()));
        let mut capture = FrameCapture::new(&config_with_pool(dir.clone(), 3, 1)).unwrap();

        let result = capture.record(|frame| {
            frame.prepare(4, 3, ChannelOrder::Rgba);
            anyhow::bail!("readback failed")
        });
        assert!(result.is_err());
        assert_eq!(capture.captured(), 0);

        // The single slot hands the same record back, storage intact
        let progress = capture
            .record(|frame| {
                assert_eq!(frame.pixels.len(), 4 * 3 * 4);
                assert_eq!(frame.index, 0);
                frame.prepare(4, 3, ChannelOrder::Rgba);
                Ok(())
            })
            .unwrap();
        assert_eq!(progress, CaptureProgress::Continue);
        assert_eq!(capture.captured(), 1);

        drop(capture);
        assert!(dir.join("img0.bmp").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn zero_limit_records_nothing() {
        let dir = std::env::temp_dir().join(format!("frame-capture-zero-{}", std::process::id()));
        let mut capture = FrameCapture::new(&config(dir.clone(), 0)).unwrap();

        let progress = capture
            .record(|_| panic!("no record should be filled"))
            .unwrap();
        assert_eq!(progress, CaptureProgress::LimitReached);
        assert_eq!(capture.captured(), 0);

        drop(capture);
        assert!(!dir.join("img0.bmp").exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
