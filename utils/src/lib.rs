pub mod audio;
pub mod transcode;

pub use transcode::{FfmpegTranscoder, Transcode, TranscodeError};
