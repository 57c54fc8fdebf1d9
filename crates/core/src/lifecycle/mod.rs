pub mod buffer_tracker;
