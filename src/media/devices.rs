use crate::error::MediaError;
use crate::media::stream::{LocalStream, LocalTrack, TrackKind};
use crate::types::CallType;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// The canonical Opus silence frame, written while a synthetic microphone
/// track is live and enabled.
static OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];

const SILENCE_FRAME_INTERVAL: Duration = Duration::from_millis(20);

/// What to capture for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    /// Voice calls capture audio only; video calls capture both.
    pub fn for_call_type(call_type: CallType) -> Self {
        Self {
            audio: true,
            video: call_type.has_video(),
        }
    }
}

/// A selectable camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInputInfo {
    pub device_id: String,
    pub label: String,
}

/// Platform capture backend.
///
/// [`acquire`] opens the devices for a whole call in one go so the user sees
/// a single permission prompt; [`acquire_video_input`] opens one specific
/// camera, used when switching mid-call.
///
/// [`acquire`]: MediaDevices::acquire
/// [`acquire_video_input`]: MediaDevices::acquire_video_input
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalStream, MediaError>;

    async fn list_video_inputs(&self) -> Result<Vec<VideoInputInfo>, MediaError>;

    async fn acquire_video_input(&self, device_id: &str) -> Result<Arc<LocalTrack>, MediaError>;
}

/// [`MediaDevices`] backed by a fixed device list, for tests and demos.
///
/// Audio tracks are fed Opus silence frames so a connection carrying them
/// produces real RTP; video tracks negotiate and attach but stay empty.
pub struct StaticDevices {
    microphone_id: String,
    cameras: Vec<VideoInputInfo>,
    deny_permission: bool,
}

impl StaticDevices {
    /// One microphone and one camera.
    pub fn new() -> Self {
        Self::with_cameras(vec![VideoInputInfo {
            device_id: "camera-0".to_string(),
            label: "Built-in Camera".to_string(),
        }])
    }

    pub fn with_cameras(cameras: Vec<VideoInputInfo>) -> Self {
        Self {
            microphone_id: "microphone-0".to_string(),
            cameras,
            deny_permission: false,
        }
    }

    /// All capture attempts fail with [`MediaError::PermissionDenied`].
    pub fn denying_permission() -> Self {
        Self {
            deny_permission: true,
            ..Self::new()
        }
    }

    fn audio_track(&self, stream_id: &str) -> Arc<LocalTrack> {
        let inner = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            format!("audio-{}", Uuid::new_v4()),
            stream_id.to_string(),
        ));
        let track = Arc::new(LocalTrack::new(
            inner,
            TrackKind::Audio,
            self.microphone_id.clone(),
        ));
        spawn_silence_feeder(track.clone());
        track
    }

    fn video_track(&self, camera: &VideoInputInfo, stream_id: &str) -> Arc<LocalTrack> {
        let inner = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90_000,
                ..Default::default()
            },
            format!("video-{}", Uuid::new_v4()),
            stream_id.to_string(),
        ));
        Arc::new(LocalTrack::new(
            inner,
            TrackKind::Video,
            camera.device_id.clone(),
        ))
    }
}

impl Default for StaticDevices {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes a silence frame every 20ms until the track is stopped.
///
/// Writes while the track is unbound are dropped by the sample writer, so the
/// feeder can start before negotiation attaches the track. Disabled tracks
/// skip the write, which reads as muted on the remote side.
fn spawn_silence_feeder(track: Arc<LocalTrack>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SILENCE_FRAME_INTERVAL);
        loop {
            ticker.tick().await;
            if track.is_stopped() {
                break;
            }
            if !track.is_enabled() {
                continue;
            }
            let sample = Sample {
                data: Bytes::from_static(&OPUS_SILENCE),
                duration: SILENCE_FRAME_INTERVAL,
                ..Default::default()
            };
            if track.write_sample(&sample).await.is_err() {
                break;
            }
        }
    });
}

#[async_trait]
impl MediaDevices for StaticDevices {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalStream, MediaError> {
        if self.deny_permission {
            let device = if constraints.video {
                "camera"
            } else {
                "microphone"
            };
            return Err(MediaError::PermissionDenied(device));
        }

        let stream_id = format!("stream-{}", Uuid::new_v4());
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(self.audio_track(&stream_id));
        }
        if constraints.video {
            let camera = self
                .cameras
                .first()
                .ok_or(MediaError::NoDevice("video"))?;
            tracks.push(self.video_track(camera, &stream_id));
        }
        Ok(LocalStream::new(tracks))
    }

    async fn list_video_inputs(&self) -> Result<Vec<VideoInputInfo>, MediaError> {
        Ok(self.cameras.clone())
    }

    async fn acquire_video_input(&self, device_id: &str) -> Result<Arc<LocalTrack>, MediaError> {
        if self.deny_permission {
            return Err(MediaError::PermissionDenied("camera"));
        }
        let camera = self
            .cameras
            .iter()
            .find(|c| c.device_id == device_id)
            .ok_or(MediaError::NoDevice("video"))?;
        let stream_id = format!("stream-{}", Uuid::new_v4());
        Ok(self.video_track(camera, &stream_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn voice_constraints_capture_audio_only() {
        let devices = StaticDevices::new();
        let stream = devices
            .acquire(&MediaConstraints::for_call_type(CallType::Voice))
            .await
            .unwrap();
        assert_eq!(stream.audio_tracks().count(), 1);
        assert_eq!(stream.video_tracks().count(), 0);
    }

    #[tokio::test]
    async fn video_constraints_capture_both_kinds() {
        let devices = StaticDevices::new();
        let stream = devices
            .acquire(&MediaConstraints::for_call_type(CallType::Video))
            .await
            .unwrap();
        assert_eq!(stream.audio_tracks().count(), 1);
        assert_eq!(stream.video_tracks().count(), 1);
    }

    #[tokio::test]
    async fn denied_permission_surfaces_as_media_error() {
        let devices = StaticDevices::denying_permission();
        let err = devices
            .acquire(&MediaConstraints::for_call_type(CallType::Voice))
            .await;
        assert!(matches!(err, Err(MediaError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn video_call_without_camera_reports_no_device() {
        let devices = StaticDevices::with_cameras(vec![]);
        let err = devices
            .acquire(&MediaConstraints::for_call_type(CallType::Video))
            .await;
        assert!(matches!(err, Err(MediaError::NoDevice("video"))));
    }

    #[tokio::test]
    async fn acquire_video_input_requires_known_device() {
        let devices = StaticDevices::new();
        assert!(devices.acquire_video_input("camera-0").await.is_ok());
        assert!(matches!(
            devices.acquire_video_input("nope").await,
            Err(MediaError::NoDevice("video"))
        ));
    }
}
