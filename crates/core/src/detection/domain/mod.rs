pub mod compute_backend;
pub mod face_model;
