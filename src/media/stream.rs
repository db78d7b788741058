use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use webrtc::media::Sample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// A locally captured track plus its mute and lifecycle flags.
///
/// The sample producer owns feeding `inner`; it must check [`is_enabled`]
/// before writing (a disabled track goes silent or black, mirroring a muted
/// microphone or covered camera) and stop entirely once [`is_stopped`].
///
/// [`is_enabled`]: LocalTrack::is_enabled
/// [`is_stopped`]: LocalTrack::is_stopped
pub struct LocalTrack {
    inner: Arc<TrackLocalStaticSample>,
    kind: TrackKind,
    device_id: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl LocalTrack {
    pub fn new(inner: Arc<TrackLocalStaticSample>, kind: TrackKind, device_id: String) -> Self {
        Self {
            inner,
            kind,
            device_id,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Id of the capture device this track came from.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Permanently stops the track. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Feeds one media sample into the track. A no-op until the track is
    /// bound to a connection.
    pub async fn write_sample(&self, sample: &Sample) -> Result<(), webrtc::Error> {
        self.inner.write_sample(sample).await
    }

    /// The track in the form the peer connection wants it.
    pub fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.clone()
    }
}

/// The set of local tracks going into a call.
///
/// Cloning is shallow; clones share the underlying tracks, so mute and stop
/// flags stay in sync across snapshots.
#[derive(Clone, Default)]
pub struct LocalStream {
    tracks: Vec<Arc<LocalTrack>>,
}

impl LocalStream {
    pub fn new(tracks: Vec<Arc<LocalTrack>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    /// Swaps the first video track for `new`, returning the one it replaced.
    /// Appends when the stream had no video track.
    pub fn replace_video_track(&mut self, new: Arc<LocalTrack>) -> Option<Arc<LocalTrack>> {
        match self.tracks.iter().position(|t| t.kind() == TrackKind::Video) {
            Some(idx) => Some(std::mem::replace(&mut self.tracks[idx], new)),
            None => {
                self.tracks.push(new);
                None
            }
        }
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Media arriving from the remote peer, grouped by the peer's stream id.
pub struct RemoteStream {
    id: String,
    tracks: Mutex<Vec<Arc<TrackRemote>>>,
    volume: RwLock<f64>,
}

impl RemoteStream {
    pub(crate) fn new(id: String) -> Self {
        Self {
            id,
            tracks: Mutex::new(Vec::new()),
            volume: RwLock::new(1.0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn add_track(&self, track: Arc<TrackRemote>) {
        if let Ok(mut tracks) = self.tracks.lock() {
            tracks.push(track);
        }
    }

    pub fn tracks(&self) -> Vec<Arc<TrackRemote>> {
        self.tracks.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Playback volume for this stream, `0.0` muted to `1.0` full.
    pub fn volume(&self) -> f64 {
        self.volume.read().map(|v| *v).unwrap_or(1.0)
    }

    pub fn set_volume(&self, volume: f64) {
        if let Ok(mut v) = self.volume.write() {
            *v = volume.clamp(0.0, 1.0);
        }
    }
}
