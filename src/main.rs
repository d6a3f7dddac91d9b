// Entry point: runs the particle simulation headless on a simulated clock,
// optionally rendering the sonification to WAV.
mod cli;

use std::error::Error;
use std::path::PathBuf;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use clap::Parser;
use crossbeam_channel::bounded;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gradflow::audio::writer::{CHANNELS, WavOutput};
use gradflow::config::AppConfig;
use gradflow::core::db::amp_to_db;
use gradflow::core::timebase::Timebase;
use gradflow::life::rate_history::RateHistory;
use gradflow::life::{Simulation, Stats};
use gradflow::synth::FmSynth;

use cli::Args;

/// Blocks in flight between the tick loop and the WAV thread.
const WAV_QUEUE_DEPTH: usize = 64;

#[derive(Serialize)]
struct RunSummary<'a> {
    landscape: String,
    frames: u64,
    simulated_sec: f64,
    interrupted: bool,
    stats: Stats,
    min_loss: Option<f64>,
    history: &'a RateHistory,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut cfg = AppConfig::load_or_default(&args.config);
    if let Some(landscape) = args.landscape {
        cfg.simulation.landscape = landscape;
    }
    if let Some(duration) = args.duration {
        cfg.run.duration_sec = duration;
    }
    if args.seed.is_some() {
        cfg.simulation.seed = args.seed;
    }
    let audio_on = cfg.audio.enabled && !args.mute;

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_for_ctrlc = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_for_ctrlc.store(true, Ordering::SeqCst);
    })?;

    let timebase = Timebase {
        fs: cfg.audio.sample_rate as f32,
        frame_rate: cfg.run.frame_rate,
    };
    let mut synth = FmSynth::new(timebase.fs)?;
    synth.set_master_gain_db(cfg.audio.master_gain_db);

    let mut sim = Simulation::new(
        cfg.simulation.controls(),
        cfg.physics.clone(),
        cfg.simulation.viewport(),
        cfg.simulation.seed,
    );
    sim.set_audio_enabled(&mut synth, audio_on, 0.0);
    info!(
        "Running {} on {}x{} for {:.1}s at {} fps (audio {})",
        cfg.simulation.landscape,
        cfg.simulation.width,
        cfg.simulation.height,
        cfg.run.duration_sec,
        cfg.run.frame_rate,
        if audio_on { "on" } else { "off" }
    );

    let wav = args.wav.as_ref().map(|path| {
        let (tx, rx) = bounded::<Arc<[f32]>>(WAV_QUEUE_DEPTH);
        let handle = WavOutput::run(rx, PathBuf::from(path), cfg.audio.sample_rate);
        (tx, handle)
    });

    if let Some((x, y)) = args.pointer {
        sim.pointer_down(&mut synth, x, y);
    }

    let total_frames = timebase.frames_for_duration(cfg.run.duration_sec);
    let frames_per_report = (cfg.run.frame_rate.round() as u64).max(1);
    let mut frames_run = 0u64;
    let mut interrupted = false;
    let mut peak = 0.0f32;

    for frame in 0..total_frames {
        if stop_flag.load(Ordering::SeqCst) {
            interrupted = true;
            info!("Interrupted after {frame} frames");
            break;
        }
        let now_ms = timebase.frame_to_ms(frame);
        sim.tick(&mut synth, now_ms);

        if let Some((tx, _)) = &wav {
            let n = timebase.samples_in_frame(frame) * CHANNELS as usize;
            let mut block = vec![0.0f32; n];
            synth.render(&mut block);
            peak = block.iter().fold(peak, |m, s| m.max(s.abs()));
            tx.send(block.into())?;
        }

        frames_run = frame + 1;
        if frames_run % frames_per_report == 0 {
            let stats = sim.stats();
            info!(
                "t={:.1}s active={} converged={} expired={} voices={} min_loss={} peak={:.1}dBFS",
                now_ms / 1000.0,
                stats.active,
                stats.converged,
                stats.expired,
                sim.voices().active_count(),
                sim.min_loss()
                    .map_or_else(|| "-".to_string(), |l| format!("{l:.4}")),
                amp_to_db(peak)
            );
            peak = 0.0;
        }
    }

    if let Some((tx, handle)) = wav {
        drop(tx);
        let frames = handle.join().map_err(|_| "wav writer thread panicked")??;
        info!("WAV: {frames} frames written");
    }
    synth.shutdown();

    let stats = sim.stats();
    info!(
        "Done: {} frames, converged={} expired={} active={}",
        frames_run, stats.converged, stats.expired, stats.active
    );

    if let Some(path) = &args.stats_json {
        let summary = RunSummary {
            landscape: cfg.simulation.landscape.to_string(),
            frames: frames_run,
            simulated_sec: timebase.frame_to_ms(frames_run) / 1000.0,
            interrupted,
            stats,
            min_loss: sim.min_loss(),
            history: sim.history(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&summary)?)?;
        info!("Summary written to {path}");
    }
    Ok(())
}
