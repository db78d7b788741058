use chrono::Utc;
use clap::Parser;
use gourounaki_calls::{
    CallEvents, CallRole, CallServices, CallSessionController, CallType, ConnectionState,
    MemoryBus, MemoryCallLogStore, RemoteStream, RtcConfig, StaticAuth, StaticDevices,
    VideoInputInfo,
};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

// Runs both ends of a call inside one process: two sessions share the
// in-memory bus, the in-memory call log and a fixed device list, negotiate
// over loopback and then hang up.
//
// Usage:
//   cargo run                                # voice call
//   cargo run -- --call-type video           # video call
//   cargo run -- --call-type video --switch-camera

#[derive(Parser, Debug)]
#[command(name = "call-demo", about = "Loopback call demo over in-memory backends")]
struct Args {
    /// Kind of call to place: voice or video
    #[arg(long, default_value = "voice")]
    call_type: CallType,

    /// Switch cameras mid-call (video calls only)
    #[arg(long)]
    switch_camera: bool,

    /// Seconds to wait for the peers to reach the connected state
    #[arg(long, default_value_t = 10)]
    connect_timeout_secs: u64,
}

struct LogEvents {
    name: &'static str,
}

#[async_trait::async_trait]
impl CallEvents for LogEvents {
    async fn on_remote_stream(&self, stream: Arc<RemoteStream>) {
        info!("[{}] remote stream {} attached", self.name, stream.id());
    }

    async fn on_connection_state(&self, state: ConnectionState) {
        info!("[{}] connection state: {state}", self.name);
    }

    async fn on_call_ended(&self) {
        info!("[{}] call ended", self.name);
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Utc::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let args = Args::parse();

    let bus = Arc::new(MemoryBus::new());
    let call_logs = Arc::new(MemoryCallLogStore::new());
    let devices = Arc::new(StaticDevices::with_cameras(vec![
        VideoInputInfo {
            device_id: "camera-front".to_string(),
            label: "Front Camera".to_string(),
        },
        VideoInputInfo {
            device_id: "camera-back".to_string(),
            label: "Back Camera".to_string(),
        },
    ]));

    let services_for = |user: &'static str| CallServices {
        auth: Arc::new(StaticAuth::new(user)),
        call_logs: call_logs.clone(),
        bus: bus.clone(),
        devices: devices.clone(),
        rtc: RtcConfig::without_ice_servers(),
    };

    // The callee subscribes first so the opening offer finds it listening.
    let callee = CallSessionController::start(
        services_for("bob"),
        "alice",
        args.call_type,
        CallRole::Callee,
        Arc::new(LogEvents { name: "bob" }),
    )
    .await?;
    let caller = CallSessionController::start(
        services_for("alice"),
        "bob",
        args.call_type,
        CallRole::Caller,
        Arc::new(LogEvents { name: "alice" }),
    )
    .await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.connect_timeout_secs);
    let connected = loop {
        if caller.connection_state().is_connected() && callee.connection_state().is_connected() {
            break true;
        }
        if tokio::time::Instant::now() >= deadline {
            break false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    };
    if connected {
        info!("Both peers connected");
    } else {
        warn!("Peers did not reach connected state; continuing with controls anyway");
    }

    info!("Muted: {}", caller.toggle_mute());
    info!("Muted: {}", caller.toggle_mute());
    info!("Speaker on: {}", callee.toggle_speaker());
    info!("Speaker on: {}", callee.toggle_speaker());
    if args.call_type.has_video() {
        info!("Camera off: {}", caller.toggle_camera());
        info!("Camera off: {}", caller.toggle_camera());
        if args.switch_camera {
            caller.switch_camera().await;
            let camera = caller
                .local_stream()
                .video_tracks()
                .next()
                .map(|t| t.device_id().to_string())
                .unwrap_or_default();
            info!("Now capturing from {camera}");
        }
    }

    caller.end_call().await;
    callee.end_call().await;

    for entry in call_logs.entries().await {
        info!(
            "Call log: {} -> {} ({}) started {} ended {}",
            entry.caller_id,
            entry.receiver_id,
            entry.call_type,
            entry.started_at.format("%H:%M:%S%.3f"),
            entry
                .ended_at
                .map(|t| t.format("%H:%M:%S%.3f").to_string())
                .unwrap_or_else(|| "never".to_string()),
        );
    }

    Ok(())
}
