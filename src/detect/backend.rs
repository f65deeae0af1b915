use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// Every camera worker owns its own backend instance, so `detect` never runs
/// under a lock shared with other cameras.
///
/// Implementations treat the frame as read-only and ephemeral: no pixels are
/// retained past the call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// An error means "no detections this cycle"; the caller logs it and moves on.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
