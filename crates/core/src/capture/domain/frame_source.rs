use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use thiserror::Error;

use crate::capture::domain::camera_device::CameraDevice;
use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum OpenError {
    #[error("camera {index} could not be opened: {reason}")]
    Camera { index: i32, reason: String },
    #[error("no readable images in replay directory {0}")]
    EmptyReplay(PathBuf),
    #[error("failed to list replay directory {path}: {source}")]
    ReplayDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The device has stopped producing frames (disconnected, end of recording,
/// or released). A normal way for capture to end.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("end of stream")]
pub struct EndOfStream;

/// Exclusive reader of one camera device with a one-shot release.
///
/// Reading requires `&mut self`, so only the owner (the capture thread) can
/// pull frames. Releasing goes through [`ReleaseHandle`]s, which any thread
/// may hold; the first release wins and later ones are no-ops. A release
/// that races an in-flight read is completed by the reader as soon as the
/// read returns, so the device is never freed underneath a read.
pub struct FrameSource {
    shared: Arc<Session>,
}

/// Cloneable, thread-safe handle that releases a [`FrameSource`]'s device.
#[derive(Clone)]
pub struct ReleaseHandle {
    shared: Arc<Session>,
}

struct Session {
    label: String,
    released: AtomicBool,
    device: Mutex<Option<Box<dyn CameraDevice>>>,
}

impl FrameSource {
    pub fn new(device: Box<dyn CameraDevice>) -> Self {
        let label = device.describe();
        log::info!("Opened {label}");
        Self {
            shared: Arc::new(Session {
                label,
                released: AtomicBool::new(false),
                device: Mutex::new(Some(device)),
            }),
        }
    }

    /// Opens a device with `opener`. Failure is final: there is no retry.
    pub fn open<D, F>(index: i32, opener: F) -> Result<Self, OpenError>
    where
        D: CameraDevice + 'static,
        F: FnOnce(i32) -> Result<D, OpenError>,
    {
        match opener(index) {
            Ok(device) => Ok(Self::new(Box::new(device))),
            Err(e) => {
                log::error!("Could not open camera {index}: {e}");
                Err(e)
            }
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn read_next(&mut self) -> Result<Frame, EndOfStream> {
        if self.shared.is_released() {
            self.shared.finish_release();
            return Err(EndOfStream);
        }

        let outcome = {
            let mut slot = self.shared.lock_device();
            match slot.as_mut() {
                Some(device) => device.read(),
                None => Ok(None),
            }
        };

        // A release requested while the read was in flight is ours to finish.
        if self.shared.is_released() {
            self.shared.finish_release();
            return Err(EndOfStream);
        }

        match outcome {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => {
                log::info!("{} stopped producing frames", self.shared.label);
                Err(EndOfStream)
            }
            Err(e) => {
                log::warn!("{} read failed, ending stream: {e}", self.shared.label);
                Err(EndOfStream)
            }
        }
    }

    pub fn release(&self) {
        self.shared.release();
    }

    pub fn is_released(&self) -> bool {
        self.shared.is_released()
    }

    pub fn release_handle(&self) -> ReleaseHandle {
        ReleaseHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl ReleaseHandle {
    pub fn release(&self) {
        self.shared.release();
    }

    pub fn is_released(&self) -> bool {
        self.shared.is_released()
    }
}

impl Session {
    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn lock_device(&self) -> MutexGuard<'_, Option<Box<dyn CameraDevice>>> {
        self.device
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.device.try_lock() {
            Ok(mut slot) => release_device(&self.label, &mut slot),
            Err(TryLockError::Poisoned(poisoned)) => {
                release_device(&self.label, &mut poisoned.into_inner())
            }
            Err(TryLockError::WouldBlock) => {
                log::debug!("{} busy reading; release deferred to reader", self.label);
            }
        }
    }

    fn finish_release(&self) {
        release_device(&self.label, &mut self.lock_device());
    }
}

/// Takes the device out of its slot, so it can only ever be released once.
fn release_device(label: &str, slot: &mut Option<Box<dyn CameraDevice>>) {
    if let Some(mut device) = slot.take() {
        match device.release() {
            Ok(()) => log::info!("Released {label}"),
            Err(e) => log::error!("Failed to release {label}: {e}"),
        }
    }
}
