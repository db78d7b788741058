//! Local capture and remote playback primitives.

pub mod devices;
pub mod stream;

pub use devices::{MediaConstraints, MediaDevices, StaticDevices, VideoInputInfo};
pub use stream::{LocalStream, LocalTrack, RemoteStream, TrackKind};
