pub const FACE_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const FACE_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx";

/// Display refresh rate assumed when the host does not supply its own signal.
pub const DEFAULT_REFRESH_HZ: u32 = 60;

/// Minimum delay between the start of one cycle and the start of the next.
pub const DEFAULT_MIN_CYCLE_DELAY_MS: u64 = 2;

/// Consecutive failed cycles tolerated before the loop halts.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

pub const DEFAULT_OUTPUT_WIDTH: u32 = 640;
pub const DEFAULT_OUTPUT_HEIGHT: u32 = 480;
pub const DEFAULT_OUTPUT_CHANNELS: u8 = 3;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
