// Image classification — trait-based abstraction over the model.
//
// ImageClassifier is the interface; OnnxImageClassifier runs a local ONNX
// model. The explicit-content policy sits on top and turns probabilities
// into a flag.

pub mod download;
pub mod onnx;
pub mod policy;
pub mod traits;
