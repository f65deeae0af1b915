mod backend;
mod backends;
mod filter;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::YoloBackend;
pub use filter::{DetectionFilter, DEFAULT_LABELS};
pub use registry::{BackendRegistry, DetectorFactory};
pub use result::{BoundingBox, Detection};
