//! Collaborator implementations bundled with the director binary

pub mod command_detector;
pub mod dry_run;
pub mod ffmpeg;
pub mod process;
pub mod tcp_chat;

pub use command_detector::CommandDetector;
pub use dry_run::{DryRunLog, DryRunSink};
pub use ffmpeg::FfmpegFrameSource;
pub use tcp_chat::{TcpChatConnector, TcpChatSession};
