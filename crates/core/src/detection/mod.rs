pub mod domain;
pub mod inference_stage;
pub mod infrastructure;
