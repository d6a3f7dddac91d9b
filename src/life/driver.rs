//! Per-frame orchestration: spawning, physics, sonification, counters and
//! rate history, in that order, once per tick.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::landscape::{LossFunction, LossRange, Viewport};
use crate::core::timebase::Millis;
use crate::life::audio::{Backend, VoiceManager};
use crate::life::particle::{DeathReason, ParticleId, ParticleSnapshot, PhysicsParams, StepContext};
use crate::life::population::Population;
use crate::life::rate_history::RateHistory;

/// Ticks between automatic spawns.
pub const AUTO_SPAWN_INTERVAL: u32 = 70;
/// Ticks between spawns while the pointer is held.
pub const DRAG_SPAWN_INTERVAL: u32 = 3;
pub const SPAWN_BATCH: usize = 2;
pub const POINTER_DOWN_BATCH: usize = 5;
pub const BURST_SPAWNS: usize = 5;
pub const BURST_BATCH: usize = 3;
/// A particle is offered a voice once it is older than this.
pub const SONIFY_MIN_AGE: u32 = 5;

pub const LEARNING_RATE_RANGE: (f64, f64) = (0.1, 2.5);
pub const MOMENTUM_RANGE: (f64, f64) = (0.0, 0.98);

/// Optimizer knobs exposed to the user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Controls {
    pub landscape: LossFunction,
    pub learning_rate: f64,
    pub momentum: f64,
    pub normalize_gradient: bool,
    pub auto_spawn: bool,
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            landscape: LossFunction::Rastrigin,
            learning_rate: 0.8,
            momentum: 0.85,
            normalize_gradient: true,
            auto_spawn: true,
        }
    }
}

impl Controls {
    pub fn clamped(mut self) -> Self {
        self.learning_rate = clamp_or(self.learning_rate, LEARNING_RATE_RANGE, 0.8);
        self.momentum = clamp_or(self.momentum, MOMENTUM_RANGE, 0.85);
        self
    }
}

fn clamp_or(v: f64, (lo, hi): (f64, f64), fallback: f64) -> f64 {
    if v.is_nan() { fallback } else { v.clamp(lo, hi) }
}

/// Aggregate counters. `converged` and `expired` are running totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub active: usize,
    pub converged: u64,
    pub expired: u64,
}

/// What one call to [`Simulation::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub spawned: usize,
    pub converged: usize,
    pub expired: usize,
    pub sampled: bool,
}

#[derive(Debug)]
pub struct Simulation {
    controls: Controls,
    physics: PhysicsParams,
    viewport: Viewport,
    range: LossRange,
    population: Population,
    voices: VoiceManager,
    history: RateHistory,
    converged: u64,
    expired: u64,
    min_loss: Option<f64>,
    rng: StdRng,
    spawn_timer: u32,
    drag_timer: u32,
    pointer: Option<(f64, f64)>,
    paused: bool,
    audio_enabled: bool,
}

impl Simulation {
    pub fn new(controls: Controls, physics: PhysicsParams, viewport: Viewport, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let controls = controls.clamped();
        let range = LossRange::scan(controls.landscape, viewport);
        debug!(
            "Landscape {} over {}x{}: loss range [{:.4}, {:.4}]",
            controls.landscape, viewport.width, viewport.height, range.min, range.max
        );
        Self {
            controls,
            physics,
            viewport,
            range,
            population: Population::new(),
            voices: VoiceManager::new(),
            history: RateHistory::new(),
            converged: 0,
            expired: 0,
            min_loss: None,
            rng,
            spawn_timer: 0,
            drag_timer: 0,
            pointer: None,
            paused: false,
            audio_enabled: true,
        }
    }

    pub fn controls(&self) -> Controls {
        self.controls
    }

    pub fn physics(&self) -> &PhysicsParams {
        &self.physics
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn loss_range(&self) -> LossRange {
        self.range
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn voices(&self) -> &VoiceManager {
        &self.voices
    }

    pub fn history(&self) -> &RateHistory {
        &self.history
    }

    pub fn min_loss(&self) -> Option<f64> {
        self.min_loss
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn stats(&self) -> Stats {
        Stats {
            active: self.population.len(),
            converged: self.converged,
            expired: self.expired,
        }
    }

    pub fn snapshots(&self) -> Vec<ParticleSnapshot> {
        self.population.snapshots()
    }

    pub fn set_landscape(&mut self, landscape: LossFunction) {
        if landscape == self.controls.landscape {
            return;
        }
        self.controls.landscape = landscape;
        self.rescan();
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        if viewport == self.viewport {
            return;
        }
        self.viewport = viewport;
        self.rescan();
    }

    fn rescan(&mut self) {
        self.range = LossRange::scan(self.controls.landscape, self.viewport);
        debug!(
            "Landscape {} over {}x{}: loss range [{:.4}, {:.4}]",
            self.controls.landscape,
            self.viewport.width,
            self.viewport.height,
            self.range.min,
            self.range.max
        );
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.controls.learning_rate = clamp_or(lr, LEARNING_RATE_RANGE, self.controls.learning_rate);
    }

    pub fn set_momentum(&mut self, momentum: f64) {
        self.controls.momentum = clamp_or(momentum, MOMENTUM_RANGE, self.controls.momentum);
    }

    pub fn set_normalize_gradient(&mut self, on: bool) {
        self.controls.normalize_gradient = on;
    }

    pub fn set_auto_spawn(&mut self, on: bool) {
        self.controls.auto_spawn = on;
    }

    /// Turning audio on brings up a backend that is not ready yet. Turning
    /// it off releases every voice and forgets which particles were
    /// sonified; they are offered voices again once audio returns.
    pub fn set_audio_enabled<B: Backend + ?Sized>(&mut self, backend: &mut B, enabled: bool, now_ms: Millis) {
        if enabled && !backend.is_ready() {
            if let Err(err) = backend.init() {
                warn!("Audio backend failed to start: {err}");
            }
        }
        if self.audio_enabled && !enabled {
            self.silence(backend, now_ms);
        }
        self.audio_enabled = enabled;
    }

    /// Pausing freezes the particles but not the audio teardown queue.
    pub fn set_paused<B: Backend + ?Sized>(&mut self, backend: &mut B, paused: bool, now_ms: Millis) {
        if paused && !self.paused && self.audio_enabled {
            self.silence(backend, now_ms);
        }
        self.paused = paused;
    }

    fn silence<B: Backend + ?Sized>(&mut self, backend: &mut B, now_ms: Millis) {
        self.voices.stop_all(backend, now_ms);
        for p in self.population.iter_mut() {
            p.set_sonified(false);
        }
    }

    /// Stop every voice, drop every particle and start the statistics over.
    pub fn clear<B: Backend + ?Sized>(&mut self, backend: &mut B, now_ms: Millis) {
        let sonified: Vec<ParticleId> = self
            .population
            .iter()
            .filter(|p| p.is_sonified())
            .map(|p| p.id())
            .collect();
        for id in sonified {
            self.voices.stop_voice(backend, id, now_ms);
        }
        self.population.clear();
        self.history.reset();
        self.converged = 0;
        self.expired = 0;
        self.min_loss = None;
    }

    /// Spawn around `(cx, cy)`. Ignored while paused or while the viewport
    /// is empty. A request that created at least one particle plays the
    /// spawn blip.
    pub fn spawn<B: Backend + ?Sized>(&mut self, backend: &mut B, cx: f64, cy: f64, count: usize) -> Vec<ParticleId> {
        if self.paused || self.viewport.is_empty() {
            return Vec::new();
        }
        let ids = self
            .population
            .spawn(cx, cy, count, &self.physics, &mut self.rng);
        if !ids.is_empty() && self.audio_enabled {
            self.voices.play_spawn_blip(backend, cy / self.viewport.height);
        }
        ids
    }

    fn spawn_random<B: Backend + ?Sized>(&mut self, backend: &mut B, count: usize) -> usize {
        let x = self.rng.random::<f64>() * self.viewport.width;
        let y = self.rng.random::<f64>() * self.viewport.height;
        self.spawn(backend, x, y, count).len()
    }

    /// Scatter a handful of batches over the viewport.
    pub fn burst<B: Backend + ?Sized>(&mut self, backend: &mut B) -> usize {
        if self.paused {
            return 0;
        }
        (0..BURST_SPAWNS)
            .map(|_| self.spawn_random(backend, BURST_BATCH))
            .sum()
    }

    /// Press: spawn a batch now and keep spawning while held.
    pub fn pointer_down<B: Backend + ?Sized>(&mut self, backend: &mut B, x: f64, y: f64) -> usize {
        if self.paused {
            return 0;
        }
        self.pointer = Some((x, y));
        self.drag_timer = 0;
        self.spawn(backend, x, y, POINTER_DOWN_BATCH).len()
    }

    pub fn pointer_move(&mut self, x: f64, y: f64) {
        if let Some(p) = self.pointer.as_mut() {
            *p = (x, y);
        }
    }

    pub fn pointer_up(&mut self) {
        self.pointer = None;
    }

    fn run_spawn_timers<B: Backend + ?Sized>(&mut self, backend: &mut B) -> usize {
        let mut spawned = 0;
        if self.controls.auto_spawn && self.population.remaining() > 0 {
            self.spawn_timer += 1;
            if self.spawn_timer >= AUTO_SPAWN_INTERVAL {
                self.spawn_timer = 0;
                spawned += self.spawn_random(backend, SPAWN_BATCH);
            }
        }
        if let Some((x, y)) = self.pointer {
            self.drag_timer += 1;
            if self.drag_timer >= DRAG_SPAWN_INTERVAL {
                self.drag_timer = 0;
                spawned += self.spawn(backend, x, y, SPAWN_BATCH).len();
            }
        }
        spawned
    }

    /// Advance one frame at simulated time `now_ms`.
    ///
    /// All particle physics completes before any voice command is issued,
    /// and voices of survivors are updated before the dead are stopped.
    /// Deferred audio work is pumped even while paused. An empty viewport
    /// freezes the particles the same way pausing does, without touching
    /// their voices.
    pub fn tick<B: Backend + ?Sized>(&mut self, backend: &mut B, now_ms: Millis) -> TickReport {
        let mut report = TickReport::default();
        if !self.paused && !self.viewport.is_empty() {
            report.spawned = self.run_spawn_timers(backend);

            let ctx = StepContext {
                surface: self.controls.landscape,
                range: self.range,
                viewport: self.viewport,
                learning_rate: self.controls.learning_rate,
                momentum: self.controls.momentum,
                normalize: self.controls.normalize_gradient,
                physics: &self.physics,
            };
            let departed = self.population.tick(&ctx, &mut self.rng);

            if self.audio_enabled && backend.is_ready() {
                let width = self.viewport.width;
                for p in self.population.iter_mut() {
                    let norm_x = p.position().0 / width;
                    if !p.is_sonified() && p.age() > SONIFY_MIN_AGE {
                        let started =
                            self.voices
                                .start_voice(backend, p.id(), norm_x, p.normalized_loss());
                        p.set_sonified(started);
                    }
                    if p.is_sonified() {
                        self.voices.update_voice(
                            backend,
                            p.id(),
                            norm_x,
                            p.normalized_loss(),
                            p.speed(),
                            p.gradient_mag(),
                        );
                    }
                }
            }

            for d in departed.iter().filter(|d| d.sonified) {
                self.voices.stop_voice(backend, d.id, now_ms);
            }

            for d in &departed {
                match d.reason {
                    DeathReason::Converged => {
                        self.converged += 1;
                        report.converged += 1;
                        if self.audio_enabled {
                            self.voices.play_converge_chord(backend, now_ms);
                        }
                    }
                    DeathReason::Expired => {
                        self.expired += 1;
                        report.expired += 1;
                    }
                }
            }

            self.min_loss = self.population.min_loss();
            report.sampled = self.history.sample_if_due(
                now_ms,
                self.population.len(),
                self.converged,
                self.expired,
            );
        }
        self.voices.pump(backend, now_ms);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::life::audio::MAX_VOICES;
    use crate::synth::FmSynth;

    fn synth() -> FmSynth {
        let mut synth = FmSynth::new(8_000.0).expect("synth");
        synth.start();
        synth
    }

    fn quiet_sim(physics: PhysicsParams) -> Simulation {
        let controls = Controls {
            auto_spawn: false,
            ..Controls::default()
        };
        Simulation::new(controls, physics, Viewport::new(400.0, 300.0), Some(7))
    }

    fn short_lived() -> PhysicsParams {
        PhysicsParams {
            min_life: 10.0,
            max_life_bonus: 0.0,
            ..PhysicsParams::default()
        }
    }

    #[test]
    fn controls_are_clamped() {
        let mut sim = quiet_sim(PhysicsParams::default());
        sim.set_learning_rate(9.0);
        sim.set_momentum(-1.0);
        assert_eq!(sim.controls().learning_rate, 2.5);
        assert_eq!(sim.controls().momentum, 0.0);
        sim.set_learning_rate(f64::NAN);
        assert_eq!(sim.controls().learning_rate, 2.5);

        let wild = Controls {
            learning_rate: 0.0,
            momentum: 1.5,
            ..Controls::default()
        };
        let sim = Simulation::new(wild, PhysicsParams::default(), Viewport::new(100.0, 100.0), Some(1));
        assert_eq!(sim.controls().learning_rate, 0.1);
        assert_eq!(sim.controls().momentum, 0.98);
    }

    #[test]
    fn auto_spawn_fires_every_seventieth_tick() {
        let mut synth = synth();
        let mut sim = Simulation::new(
            Controls::default(),
            PhysicsParams::default(),
            Viewport::new(400.0, 300.0),
            Some(3),
        );
        for frame in 1..70u64 {
            sim.tick(&mut synth, frame as f64 * 16.0);
        }
        assert!(sim.population().is_empty());
        let report = sim.tick(&mut synth, 70.0 * 16.0);
        assert_eq!(report.spawned, 2);
        assert_eq!(sim.population().len(), 2);
        assert_eq!(synth.one_shots(), 1);
    }

    #[test]
    fn drag_spawns_every_third_tick_while_held() {
        let mut synth = synth();
        let mut sim = quiet_sim(PhysicsParams::default());
        assert_eq!(sim.pointer_down(&mut synth, 200.0, 150.0), POINTER_DOWN_BATCH);
        sim.pointer_move(100.0, 100.0);
        let spawned: usize = (1..=6).map(|i| sim.tick(&mut synth, i as f64 * 16.0).spawned).sum();
        assert_eq!(spawned, 4);
        sim.pointer_up();
        let spawned: usize = (7..=12).map(|i| sim.tick(&mut synth, i as f64 * 16.0).spawned).sum();
        assert_eq!(spawned, 0);
        assert_eq!(sim.population().len(), 9);
    }

    #[test]
    fn voices_start_only_after_age_five() {
        let mut synth = synth();
        let mut sim = quiet_sim(PhysicsParams::default());
        let ids = sim.spawn(&mut synth, 200.0, 150.0, 1);
        for i in 1..=5 {
            sim.tick(&mut synth, i as f64 * 16.0);
        }
        assert!(!sim.voices().has_voice(ids[0]));
        sim.tick(&mut synth, 6.0 * 16.0);
        assert!(sim.voices().has_voice(ids[0]));
        assert!(sim.population().get(ids[0]).is_some_and(|p| p.is_sonified()));
    }

    #[test]
    fn voice_pool_never_exceeds_capacity() {
        let mut synth = synth();
        let mut sim = quiet_sim(PhysicsParams::default());
        for _ in 0..12 {
            sim.spawn(&mut synth, 200.0, 150.0, 5);
        }
        assert_eq!(sim.population().len(), 60);
        for i in 1..=20 {
            sim.tick(&mut synth, i as f64 * 16.0);
            assert!(sim.voices().active_count() <= MAX_VOICES);
        }
        assert_eq!(sim.voices().active_count(), MAX_VOICES);
        let sonified = sim.population().iter().filter(|p| p.is_sonified()).count();
        assert_eq!(sonified, MAX_VOICES);
    }

    #[test]
    fn expiry_is_counted_and_stops_voices() {
        let mut synth = synth();
        let mut sim = quiet_sim(short_lived());
        sim.spawn(&mut synth, 200.0, 150.0, 3);
        let mut expired = 0;
        for i in 1..=10 {
            expired += sim.tick(&mut synth, i as f64 * 16.0).expired;
        }
        assert_eq!(expired, 3);
        assert!(sim.population().is_empty());
        assert_eq!(sim.stats(), Stats { active: 0, converged: 0, expired: 3 });
        assert_eq!(sim.voices().active_count(), 0);
        assert_eq!(sim.voices().pending_teardowns(), 3);
        assert_eq!(sim.min_loss(), None);

        sim.tick(&mut synth, 10.0 * 16.0 + 1200.0);
        assert_eq!(sim.voices().pending_teardowns(), 0);
    }

    #[test]
    fn pause_releases_voices_and_freezes_particles() {
        let mut synth = synth();
        let mut sim = quiet_sim(PhysicsParams::default());
        sim.spawn(&mut synth, 200.0, 150.0, 4);
        for i in 1..=8 {
            sim.tick(&mut synth, i as f64 * 16.0);
        }
        assert_eq!(sim.voices().active_count(), 4);

        sim.set_paused(&mut synth, true, 200.0);
        assert_eq!(sim.voices().active_count(), 0);
        assert!(sim.population().iter().all(|p| !p.is_sonified()));
        let before = sim.snapshots();
        let report = sim.tick(&mut synth, 300.0);
        assert_eq!(report, TickReport::default());
        assert_eq!(sim.snapshots(), before);
        assert!(sim.spawn(&mut synth, 10.0, 10.0, 3).is_empty());

        sim.tick(&mut synth, 1500.0);
        assert_eq!(sim.voices().pending_teardowns(), 0);

        sim.set_paused(&mut synth, false, 1500.0);
        sim.tick(&mut synth, 1516.0);
        assert_eq!(sim.voices().active_count(), 4);
    }

    #[test]
    fn muted_simulation_issues_no_voices() {
        let mut synth = synth();
        let mut sim = quiet_sim(PhysicsParams::default());
        sim.set_audio_enabled(&mut synth, false, 0.0);
        sim.spawn(&mut synth, 200.0, 150.0, 3);
        for i in 1..=10 {
            sim.tick(&mut synth, i as f64 * 16.0);
        }
        assert_eq!(sim.voices().active_count(), 0);
        assert_eq!(synth.one_shots(), 0);
    }

    #[test]
    fn disabling_audio_forgets_sonified_flags() {
        let mut synth = synth();
        let mut sim = quiet_sim(PhysicsParams::default());
        sim.spawn(&mut synth, 200.0, 150.0, 2);
        for i in 1..=7 {
            sim.tick(&mut synth, i as f64 * 16.0);
        }
        assert_eq!(sim.voices().active_count(), 2);
        sim.set_audio_enabled(&mut synth, false, 120.0);
        assert_eq!(sim.voices().active_count(), 0);
        assert!(sim.population().iter().all(|p| !p.is_sonified()));
    }

    #[test]
    fn clear_resets_everything() {
        let mut synth = synth();
        let mut sim = quiet_sim(short_lived());
        sim.spawn(&mut synth, 200.0, 150.0, 2);
        for i in 1..=10 {
            sim.tick(&mut synth, i as f64 * 50.0);
        }
        sim.spawn(&mut synth, 200.0, 150.0, 3);
        for i in 11..=17 {
            sim.tick(&mut synth, i as f64 * 50.0);
        }
        assert!(!sim.history().is_empty());
        assert_eq!(sim.stats().expired, 2);

        sim.clear(&mut synth, 900.0);
        assert!(sim.population().is_empty());
        assert_eq!(sim.stats(), Stats::default());
        assert!(sim.history().is_empty());
        assert_eq!(sim.voices().active_count(), 0);
        assert_eq!(sim.spawn(&mut synth, 50.0, 50.0, 1), vec![0]);
    }

    #[test]
    fn history_samples_on_interval() {
        let mut synth = synth();
        let mut sim = quiet_sim(PhysicsParams::default());
        let sampled = (1..=30)
            .filter(|&i| sim.tick(&mut synth, i as f64 * 1000.0 / 60.0).sampled)
            .count();
        assert_eq!(sampled, sim.history().len());
        assert!((9..=10).contains(&sampled));
    }

    #[test]
    fn empty_viewport_freezes_particles_until_restored() {
        let mut synth = synth();
        let mut sim = quiet_sim(PhysicsParams::default());
        sim.spawn(&mut synth, 200.0, 150.0, 3);
        sim.tick(&mut synth, 16.0);

        sim.set_viewport(Viewport::new(0.0, 0.0));
        let before = sim.snapshots();
        assert_eq!(sim.tick(&mut synth, 32.0), TickReport::default());
        assert_eq!(sim.snapshots(), before);
        assert!(sim.spawn(&mut synth, 10.0, 10.0, 2).is_empty());
        assert_eq!(sim.burst(&mut synth), 0);

        sim.set_viewport(Viewport::new(400.0, 300.0));
        for i in 3..=50 {
            sim.tick(&mut synth, i as f64 * 16.0);
        }
        assert_eq!(sim.population().len(), 3);
        for p in sim.population().iter() {
            let (x, y) = p.position();
            assert!((0.0..=400.0).contains(&x) && (0.0..=300.0).contains(&y), "({x}, {y})");
            assert!(p.normalized_loss().is_finite());
        }
    }

    #[test]
    fn enabling_audio_starts_an_idle_backend() {
        let mut synth = FmSynth::new(8_000.0).expect("synth");
        let mut sim = quiet_sim(PhysicsParams::default());
        sim.set_audio_enabled(&mut synth, false, 0.0);
        sim.spawn(&mut synth, 200.0, 150.0, 3);
        sim.set_audio_enabled(&mut synth, true, 0.0);
        for i in 1..=19 {
            sim.tick(&mut synth, i as f64 * 16.0);
        }
        assert!(synth.is_ready());
        assert_eq!(sim.voices().active_count(), 3);
    }

    #[test]
    fn landscape_change_rescans_range() {
        let mut sim = quiet_sim(PhysicsParams::default());
        let before = sim.loss_range();
        sim.set_landscape(LossFunction::Himmelblau);
        assert_ne!(sim.loss_range(), before);
        assert!(sim.loss_range().max > 500.0);
    }
}
