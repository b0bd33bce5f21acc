//! Live camera stream: a worker thread that keeps the latest frame.
//!
//! The worker owns the device for the lifetime of the [`CameraStream`].
//! Stopping (explicitly or by drop) sets the stop flag and joins the worker,
//! so the device is closed before `stop` returns.

use crate::camera::CameraError;
use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

/// Something that produces frames until asked to stop.
pub trait FrameSource: Send + 'static {
    /// Push frames into `publish` until `stop` becomes true or the device fails.
    fn stream(&mut self, stop: &AtomicBool, publish: &mut dyn FnMut(Frame)) -> Result<(), CameraError>;
}

/// Opens camera devices. One open source per physical device at a time.
pub trait CameraProvider: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError>;
}

#[derive(Default)]
struct Shared {
    latest: Option<Frame>,
    failure: Option<String>,
}

/// Handle to a running camera stream.
pub struct CameraStream {
    shared: Arc<Mutex<Shared>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CameraStream {
    /// Open a source through `provider` and start streaming.
    pub fn start(provider: &dyn CameraProvider) -> Result<Self, CameraError> {
        let source = provider.open()?;
        Self::spawn(source)
    }

    /// Start streaming from an already opened source.
    pub fn spawn(mut source: Box<dyn FrameSource>) -> Result<Self, CameraError> {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("likeness-camera".into())
                .spawn(move || {
                    tracing::debug!("camera worker started");
                    let result = source.stream(&stop, &mut |frame| {
                        lock(&shared).latest = Some(frame);
                    });
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "camera stream failed");
                        lock(&shared).failure = Some(e.to_string());
                    }
                    // `source` is dropped here, closing the device.
                    drop(source);
                    tracing::debug!("camera worker exiting");
                })
                .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn camera worker: {e}")))?
        };

        Ok(Self { shared, stop, worker: Some(worker) })
    }

    /// Most recent frame, `None` until the first one arrives.
    pub fn current_frame(&self) -> Result<Option<Frame>, CameraError> {
        let shared = lock(&self.shared);
        if let Some(reason) = &shared.failure {
            return Err(CameraError::CaptureFailed(reason.clone()));
        }
        Ok(shared.latest.clone())
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stop the worker and release the device.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("camera worker panicked");
            }
            tracing::info!("camera stream released");
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    struct Synthetic {
        produced: Arc<AtomicUsize>,
        fail_after: Option<usize>,
    }

    impl FrameSource for Synthetic {
        fn stream(&mut self, stop: &AtomicBool, publish: &mut dyn FnMut(Frame)) -> Result<(), CameraError> {
            let mut sequence = 0u32;
            while !stop.load(Ordering::SeqCst) {
                if self.fail_after == Some(sequence as usize) {
                    return Err(CameraError::CaptureFailed("unplugged".into()));
                }
                publish(Frame {
                    data: vec![100; 4 * 4 * 3],
                    width: 4,
                    height: 4,
                    timestamp: Instant::now(),
                    sequence,
                });
                sequence += 1;
                self.produced.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(2));
            }
            Ok(())
        }
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_stream_publishes_latest_frame() {
        let produced = Arc::new(AtomicUsize::new(0));
        let stream = CameraStream::spawn(Box::new(Synthetic { produced: produced.clone(), fail_after: None })).unwrap();
        wait_for(|| produced.load(Ordering::SeqCst) >= 3);

        let frame = stream.current_frame().unwrap().expect("frame");
        assert!(frame.sequence >= 2);
        stream.stop();
    }

    #[test]
    fn test_stop_joins_worker() {
        let produced = Arc::new(AtomicUsize::new(0));
        let stream = CameraStream::spawn(Box::new(Synthetic { produced: produced.clone(), fail_after: None })).unwrap();
        wait_for(|| produced.load(Ordering::SeqCst) >= 1);
        stream.stop();

        let after_stop = produced.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(produced.load(Ordering::SeqCst), after_stop, "worker kept running after stop");
    }

    #[test]
    fn test_failure_is_reported() {
        let stream = CameraStream::spawn(Box::new(Synthetic {
            produced: Arc::new(AtomicUsize::new(0)),
            fail_after: Some(1),
        }))
        .unwrap();
        wait_for(|| !stream.is_running());
        assert!(matches!(stream.current_frame(), Err(CameraError::CaptureFailed(_))));
    }
}
