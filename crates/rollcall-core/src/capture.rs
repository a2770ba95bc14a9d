//! Frame source abstraction and the release guard around it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture source unavailable: {0}")]
    Unavailable(String),
    #[error("frame read failed: {0}")]
    Read(String),
    #[error("capture source already released")]
    Released,
}

/// An opened stream of frames. `release` frees the underlying device.
pub trait FrameSource {
    type Frame;

    fn next_frame(&mut self) -> Result<Self::Frame, CaptureError>;
    fn release(&mut self);
}

/// Something that can be opened into a [`FrameSource`] once per session.
pub trait CaptureDevice {
    type Frame: Clone;
    type Source: FrameSource<Frame = Self::Frame>;

    fn open(&mut self) -> Result<Self::Source, CaptureError>;
}

/// Owns an opened source and releases it exactly once when dropped.
pub struct SourceLease<S: FrameSource> {
    source: S,
}

impl<S: FrameSource> SourceLease<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn next_frame(&mut self) -> Result<S::Frame, CaptureError> {
        self.source.next_frame()
    }
}

impl<S: FrameSource> Drop for SourceLease<S> {
    fn drop(&mut self) {
        self.source.release();
        tracing::debug!("capture source released");
    }
}
