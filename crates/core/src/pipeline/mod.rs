pub mod detection_cycle;
pub mod error;
pub mod pacing_scheduler;
pub mod pipeline_config;
pub mod pipeline_controller;
pub mod pipeline_logger;
pub mod pipeline_state;
pub mod refresh_signal;
