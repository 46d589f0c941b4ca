mod backend;
pub mod backends;
mod decode;
mod preprocess;
mod result;
mod tensor;

pub use backend::{InferenceEngine, InputLayout, InputSpec};
pub use backends::StubEngine;
#[cfg(feature = "backend-tract")]
pub use backends::TractEngine;
pub use decode::{decode_detections, DecodeParams, DEFAULT_CONF_THRESHOLD, MIN_CANDIDATE_COLUMNS};
pub use preprocess::prepare_input;
pub use result::DetectionBox;
pub use tensor::Tensor;
