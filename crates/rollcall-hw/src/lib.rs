//! rollcall-hw — Classroom camera capture.
//!
//! Opens a V4L2 webcam, keeps one mmap stream alive for the length of a
//! session and converts every buffer to a grayscale [`Frame`].

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraDevice, CameraError, DeviceInfo};
pub use frame::{Frame, FrameError, PixelFormat};
