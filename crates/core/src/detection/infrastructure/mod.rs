pub mod execution_provider;
pub mod model_resolver;
pub mod onnx_face_model;
pub mod ort_backend;
