//! Choreographer Headless Driver
//!
//! Drives the playback scheduler against a synthetic rig with no renderer
//! attached, printing scheduler events as they happen. Useful for watching
//! the lookahead, queue and composite paths without a 3D front end.
//!
//! # Usage
//!
//! ```bash
//! # Ten seconds at 60 fps, intro first
//! choreographer-headless
//!
//! # JSON lines, for piping into other tools
//! CHOREOGRAPHER_JSON=1 choreographer-headless
//!
//! # Verbose scheduler logging
//! RUST_LOG=choreographer_core=debug choreographer-headless
//! ```
//!
//! # Environment Variables
//!
//! - `CHOREOGRAPHER_FRAMES`: frames to run (default: 600)
//! - `CHOREOGRAPHER_FPS`: tick rate (default: 60)
//! - `CHOREOGRAPHER_JSON`: "1" or "true" to print events as JSON lines
//! - `CHOREOGRAPHER_SKIP_INTRO`: "1" or "true" to start in idle
//! - `CHOREOGRAPHER_SPEAK`: text to speak at frame 240
//! - `RUST_LOG`: log filter (trace, debug, info, warn, error)

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{info, warn};

use choreographer_core::{
    load_config, AudioFlag, BlinkOverlay, BoneProperty, Channel, ChannelTarget, ChannelValue,
    ChoreographerConfig, Clip, ClipCatalog, ClipId, ClipStore, Keyframe, MemoryClipSource,
    PlaybackMode, PlaybackScheduler, PrimarySource, SchedulerEvent, Timeline,
};

/// Frame at which the demo speech is queued
const SPEAK_AT_FRAME: u64 = 240;

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

fn env_number(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ============================================================================
// Synthetic rig
// ============================================================================

fn scalar(target: ChannelTarget, keys: &[(f64, f32)]) -> Channel {
    Channel::new(
        target,
        keys.iter()
            .map(|&(t, v)| Keyframe::new(t, ChannelValue::Scalar(v)))
            .collect(),
    )
}

fn root_path(root: &str, keys: &[(f64, [f32; 3])]) -> Channel {
    Channel::new(
        ChannelTarget::bone(root, BoneProperty::Position),
        keys.iter()
            .map(|&(t, p)| Keyframe::new(t, ChannelValue::Vec3(p)))
            .collect(),
    )
}

fn sway(id: &str, root: &str, length: f64, amount: f32) -> Clip {
    Clip::new(id, length)
        .with_channel(root_path(
            root,
            &[
                (0.0, [0.0, 0.0, 0.0]),
                (length / 2.0, [amount, 0.0, 0.0]),
                (length, [0.0, 0.0, 0.0]),
            ],
        ))
        .with_channel(scalar(
            ChannelTarget::morph("smile"),
            &[(0.0, 0.2), (length, 0.2)],
        ))
}

fn synthetic_clips(root: &str) -> Vec<Clip> {
    vec![
        sway("idle_breathe", root, 120.0, 0.02),
        sway("idle_sway", root, 150.0, 0.05),
        sway("busy_tap", root, 90.0, 0.01),
        sway("celebrate_jump", root, 80.0, 0.3),
        sway("hold_nod", root, 40.0, 0.01),
        sway("gesture_open", root, 60.0, 0.04),
        sway("gesture_point", root, 60.0, 0.06),
        sway("gesture_shrug", root, 45.0, 0.03),
        Clip::new("intro_walk", 100.0).with_channel(root_path(
            root,
            &[(0.0, [0.0, 0.0, -2.0]), (100.0, [0.0, 0.0, 0.0])],
        )),
        Clip::new("line_hello", 130.0).with_channel(scalar(
            ChannelTarget::morph("viseme_aa"),
            &[(0.0, 0.0), (20.0, 0.8), (40.0, 0.1), (90.0, 0.7), (130.0, 0.0)],
        )),
        Clip::new("blink", 8.0).with_channel(scalar(
            ChannelTarget::morph("eyes_closed"),
            &[(0.0, 0.0), (4.0, 1.0), (8.0, 0.0)],
        )),
    ]
}

fn synthetic_catalog() -> ClipCatalog {
    ClipCatalog::new()
        .with_weighted_clip("idle", "idle_breathe", 70)
        .with_weighted_clip("idle", "idle_sway", 30)
        .with_clip("busy", "busy_tap")
        .with_clip("speaking", "gesture_open")
        .with_clip("hold", "hold_nod")
        .with_clip("celebrate", "celebrate_jump")
        .with_clip("intro", "intro_walk")
        .with_clip("talk_fill", "gesture_open")
        .with_clip("talk_fill", "gesture_point")
        .with_clip("talk_fill", "gesture_shrug")
}

fn print_event(event: &SchedulerEvent, frame: u64, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "Failed to serialize event"),
        }
    } else {
        println!("[{frame:>5}] {event:?}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("choreographer_headless=info".parse()?)
                .add_directive("choreographer_core=info".parse()?),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config().unwrap_or_else(|e| {
        warn!(error = %e, "Config unusable, using defaults");
        ChoreographerConfig::default()
    });
    info!(source = %config.source(), "Configuration loaded");

    let frames = env_number("CHOREOGRAPHER_FRAMES", 600);
    let fps = env_number("CHOREOGRAPHER_FPS", 60).max(1);
    let json = env_flag("CHOREOGRAPHER_JSON");
    let speech = std::env::var("CHOREOGRAPHER_SPEAK").unwrap_or_else(|_| "Hello there!".into());

    let root_bone = config.scheduler.root_bone.clone();
    let source = Arc::new(MemoryClipSource::with_clips(synthetic_clips(&root_bone)));
    let store = Arc::new(ClipStore::new(source));
    let blink = BlinkOverlay::with_settings(
        store.load(&ClipId::from("blink")).await?,
        &config.scheduler.blink,
    );

    let audio = AudioFlag::new();
    let mut scheduler = PlaybackScheduler::new(
        Timeline::new(),
        Arc::clone(&store),
        Arc::new(synthetic_catalog()),
        config.scheduler.clone(),
    )
    .with_states(config.states.clone())
    .with_audio(Arc::new(audio.clone()));
    let mut events = scheduler.subscribe();

    scheduler
        .initialize(!env_flag("CHOREOGRAPHER_SKIP_INTRO"))
        .await?;

    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));
    info!(frames, fps, "Driving scheduler");

    for frame in 0..frames {
        tokio::select! {
            _ = interval.tick() => {}
            _ = signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let now = frame as f64;

        if frame == SPEAK_AT_FRAME {
            audio.set(true);
            if let Err(e) = scheduler
                .queue_speak(&speech, PrimarySource::Id(ClipId::from("line_hello")), "talk_fill", false)
                .await
            {
                warn!(error = %e, "Speech failed");
            }
        }
        if frame == SPEAK_AT_FRAME + 200 {
            audio.set(false);
            if let Err(e) = scheduler
                .queue_simple(ClipId::from("celebrate_jump"), PlaybackMode::Once, false)
                .await
            {
                warn!(error = %e, "Celebration failed");
            }
        }

        scheduler.tick(now).await;

        let mut pose = scheduler.evaluate(now);
        blink.apply(now, scheduler.animation_start().unwrap_or(0.0), &mut pose);

        while let Ok(event) = events.try_recv() {
            print_event(&event, frame, json);
        }
    }

    scheduler.dispose();
    while let Ok(event) = events.try_recv() {
        print_event(&event, frames, json);
    }
    info!(
        spans = scheduler.compositor().spans().count(),
        "Headless run finished"
    );
    Ok(())
}
