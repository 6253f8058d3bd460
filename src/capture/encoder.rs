// Async frame encoder
//
// A fixed ring of capture records. Each record is handed to its own worker
// thread for encoding and comes back when that thread is joined, which only
// happens when the ring wraps around to the same slot again.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Byte order of the pixels as they were read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    #[default]
    Rgba,
    Bgra,
}

/// Host copy of one presented frame.
#[derive(Debug, Default)]
pub struct CaptureFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Sequence number, also used for the file name.
    pub index: u64,
    pub order: ChannelOrder,
}

impl CaptureFrame {
    /// Resize the pixel storage for a `width` x `height` RGBA-sized image,
    /// keeping the existing allocation when it is big enough.
    pub fn prepare(&mut self, width: u32, height: u32, order: ChannelOrder) {
        self.width = width;
        self.height = height;
        self.channels = 4;
        self.order = order;
        self.pixels
            .resize(width as usize * height as usize * self.channels as usize, 0);
    }

    /// Rewrite the pixels in RGBA order.
    pub fn normalize(&mut self) {
        if self.order == ChannelOrder::Bgra && self.channels == 4 {
            bgra_to_rgba(&mut self.pixels);
        }
        self.order = ChannelOrder::Rgba;
    }
}

/// Swap the red and blue channel of every 4-byte pixel.
pub fn bgra_to_rgba(pixels: &mut [u8]) {
    for pixel in pixels.chunks_exact_mut(4) {
        pixel.swap(0, 2);
    }
}

/// Destination for finished frames. Called from worker threads.
pub trait FrameSink: Send + Sync + 'static {
    fn write(&self, frame: &CaptureFrame) -> Result<()>;
}

/// Writes `<dir>/img<index>.bmp`.
pub struct BmpSink {
    dir: PathBuf,
}

impl BmpSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create capture directory {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, index: u64) -> PathBuf {
        self.dir.join(format!("img{}.bmp", index))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FrameSink for BmpSink {
    fn write(&self, frame: &CaptureFrame) -> Result<()> {
        let path = self.path_for(frame.index);
        image::save_buffer_with_format(
            &path,
            &frame.pixels,
            frame.width,
            frame.height,
            image::ColorType::Rgba8,
            image::ImageFormat::Bmp,
        )
        .with_context(|| format!("Failed to write {:?}", path))?;

        log::trace!("Wrote {:?}", path);
        Ok(())
    }
}

#[derive(Default)]
struct Slot {
    frame: Option<CaptureFrame>,
    worker: Option<JoinHandle<CaptureFrame>>,
}

impl Slot {
    /// Join the worker (if any) and take its record back.
    fn reclaim(&mut self) {
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(frame) => self.frame = Some(frame),
                Err(_) => log::error!("Encoder worker panicked, dropping its frame"),
            }
        }
    }
}

pub struct EncoderPool {
    slots: Vec<Slot>,
    cursor: usize,
    sink: Arc<dyn FrameSink>,
}

impl EncoderPool {
    pub fn new(size: usize, sink: Arc<dyn FrameSink>) -> Self {
        let size = size.max(1);
        Self {
            slots: (0..size).map(|_| Slot::default()).collect(),
            // First call to next_frame lands on slot 0
            cursor: size - 1,
            sink,
        }
    }

    /// Workers that have been spawned and not yet joined.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.worker.is_some()).count()
    }

    /// Move to the next slot and hand out its record, waiting for the worker
    /// that still owns it.
    pub fn next_frame(&mut self) -> CaptureFrame {
        self.cursor = (self.cursor + 1) % self.slots.len();
        let slot = &mut self.slots[self.cursor];
        slot.reclaim();
        slot.frame.take().unwrap_or_default()
    }

    /// Hand an unsubmitted record back to the current slot.
    pub fn restore(&mut self, frame: CaptureFrame) {
        let slot = &mut self.slots[self.cursor];
        slot.reclaim();
        slot.frame = Some(frame);
    }

    /// Encode `frame` on a new worker thread owning the current slot.
    pub fn submit(&mut self, frame: CaptureFrame) -> Result<()> {
        let cursor = self.cursor;
        let slot = &mut self.slots[cursor];
        // Only reachable if submit is called twice without next_frame
        slot.reclaim();

        let sink = Arc::clone(&self.sink);
        let worker = thread::Builder::new()
            .name(format!("encoder-{}", cursor))
            .spawn(move || {
                let mut frame = frame;
                frame.normalize();
                if let Err(e) = sink.write(&frame) {
                    log::error!("Failed to encode frame {}: {:#}", frame.index, e);
                }
                frame
            })
            .context("Failed to spawn encoder thread")?;

        slot.worker = Some(worker);
        Ok(())
    }

    /// Join every outstanding worker.
    pub fn flush(&mut self) {
        for slot in &mut self.slots {
            slot.reclaim();
        }
    }
}

impl Drop for EncoderPool {
    fn drop(&mut self) {
        let pending = self.in_flight();
        if pending > 0 {
            log::debug!("Waiting for {} encoder threads", pending);
        }
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records which frames were written and how many ran at once.
    #[derive(Default)]
    struct CountingSink {
        active: AtomicUsize,
        peak: AtomicUsize,
        written: Mutex<Vec<u64>>,
    }

    impl FrameSink for CountingSink {
        fn write(&self, frame: &CaptureFrame) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            self.written.lock().push(frame.index);
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}-{}", name, std::process::id()))
    }

    #[test]
    fn unjoined_workers_never_exceed_pool_size() {
        let sink = Arc::new(CountingSink::default());
        let mut pool = EncoderPool::new(3, sink.clone());

        for index in 0..20 {
            let mut frame = pool.next_frame();
            frame.prepare(2, 2, ChannelOrder::Rgba);
            frame.index = index;
            pool.submit(frame).unwrap();
            assert!(pool.in_flight() <= 3);
        }
        drop(pool);

        assert!(sink.peak.load(Ordering::SeqCst) <= 3);
        let mut written = sink.written.lock().clone();
        written.sort_unstable();
        assert_eq!(written, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn records_are_reused_round_robin() {
        let sink = Arc::new(CountingSink::default());
        let mut pool = EncoderPool::new(2, sink);

        let mut first = pool.next_frame();
        first.prepare(8, 8, ChannelOrder::Rgba);
        let ptr = first.pixels.as_ptr();
        pool.submit(first).unwrap();

        let mut second = pool.next_frame();
        second.prepare(8, 8, ChannelOrder::Rgba);
        pool.submit(second).unwrap();

        // Wrapped back to slot 0: same allocation comes back
        let third = pool.next_frame();
        assert_eq!(third.pixels.as_ptr(), ptr);
        assert_eq!(pool.in_flight(), 1);
    }

    #[test]
    fn restored_record_keeps_its_allocation() {
        let sink = Arc::new(CountingSink::default());
        let mut pool = EncoderPool::new(1, sink.clone());

        let mut frame = pool.next_frame();
        frame.prepare(16, 16, ChannelOrder::Rgba);
        let ptr = frame.pixels.as_ptr();
        pool.restore(frame);
        assert_eq!(pool.in_flight(), 0);

        let again = pool.next_frame();
        assert_eq!(again.pixels.as_ptr(), ptr);
        assert_eq!(again.pixels.len(), 16 * 16 * 4);
        drop(pool);
        assert!(sink.written.lock().is_empty());
    }

    #[test]
    fn bgra_is_normalized() {
        let mut frame = CaptureFrame {
            pixels: vec![1, 2, 3, 4, 5, 6, 7, 8],
            width: 2,
            height: 1,
            channels: 4,
            index: 0,
            order: ChannelOrder::Bgra,
        };
        frame.normalize();
        assert_eq!(frame.pixels, vec![3, 2, 1, 4, 7, 6, 5, 8]);
        assert_eq!(frame.order, ChannelOrder::Rgba);

        // Already RGBA: untouched
        frame.normalize();
        assert_eq!(frame.pixels, vec![3, 2, 1, 4, 7, 6, 5, 8]);
    }

    #[test]
    fn bmp_sink_writes_numbered_files() {
        let dir = temp_dir("bmp-sink");
        let sink = BmpSink::new(&dir).unwrap();

        let frame = CaptureFrame {
            pixels: vec![
                255, 0, 0, 255, 0, 255, 0, 255, //
                0, 0, 255, 255, 10, 20, 30, 255,
            ],
            width: 2,
            height: 2,
            channels: 4,
            index: 7,
            order: ChannelOrder::Rgba,
        };
        sink.write(&frame).unwrap();

        let path = dir.join("img7.bmp");
        assert_eq!(sink.path_for(7), path);
        let decoded = image::open(&path).unwrap().to_rgb8();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(decoded.dimensions(), (2, 2));
        assert_eq!(decoded.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(decoded.get_pixel(1, 1).0, [10, 20, 30]);
    }
}
