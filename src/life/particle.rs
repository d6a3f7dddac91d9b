use std::collections::VecDeque;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::landscape::{LossFunction, LossRange, Viewport};

pub type ParticleId = u64;

/// Positions kept for the trail, oldest evicted first.
pub const TRAIL_LEN: usize = 50;
/// Normalized-loss samples kept for the convergence test.
pub const LOSS_WINDOW: usize = 30;

pub const CONVERGE_MIN_AGE: u32 = 60;
pub const CONVERGE_CHECK_INTERVAL: u32 = 10;
pub const CONVERGE_MAX_VARIANCE: f64 = 0.001;
pub const CONVERGE_MAX_MEAN_LOSS: f64 = 0.20;

/// Added to |grad| before normalizing, so a zero gradient stays finite.
const NORMALIZE_EPS: f64 = 1e-4;
/// Velocity damping applied on wall contact (sign flip included).
const WALL_RESTITUTION: f64 = -0.5;

/// Tuning constants of the per-tick update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhysicsParams {
    #[serde(default = "PhysicsParams::default_base_noise_scale")]
    pub base_noise_scale: f64,
    #[serde(default = "PhysicsParams::default_noise_decay_ticks")]
    pub noise_decay_ticks: f64,
    #[serde(default = "PhysicsParams::default_min_noise_factor")]
    pub min_noise_factor: f64,
    #[serde(default = "PhysicsParams::default_gradient_step")]
    pub gradient_step: f64,
    #[serde(default = "PhysicsParams::default_max_gradient")]
    pub max_gradient: f64,
    #[serde(default = "PhysicsParams::default_max_vel_normalized")]
    pub max_vel_normalized: f64,
    #[serde(default = "PhysicsParams::default_max_vel_standard")]
    pub max_vel_standard: f64,
    #[serde(default = "PhysicsParams::default_min_life")]
    pub min_life: f64,
    #[serde(default = "PhysicsParams::default_max_life_bonus")]
    pub max_life_bonus: f64,
}

impl PhysicsParams {
    fn default_base_noise_scale() -> f64 {
        0.06
    }
    fn default_noise_decay_ticks() -> f64 {
        200.0
    }
    fn default_min_noise_factor() -> f64 {
        0.1
    }
    fn default_gradient_step() -> f64 {
        0.01
    }
    fn default_max_gradient() -> f64 {
        10.0
    }
    fn default_max_vel_normalized() -> f64 {
        8.0
    }
    fn default_max_vel_standard() -> f64 {
        15.0
    }
    fn default_min_life() -> f64 {
        600.0
    }
    fn default_max_life_bonus() -> f64 {
        400.0
    }

    /// Per-axis noise amplitude at `age`: decays like an annealing schedule,
    /// floored at `min_noise_factor` of the base.
    pub fn noise_scale(&self, age: u32) -> f64 {
        let decay = (-(age as f64) / self.noise_decay_ticks).exp();
        self.base_noise_scale * decay.max(self.min_noise_factor)
    }
}

impl Default for PhysicsParams {
    fn default() -> Self {
        Self {
            base_noise_scale: Self::default_base_noise_scale(),
            noise_decay_ticks: Self::default_noise_decay_ticks(),
            min_noise_factor: Self::default_min_noise_factor(),
            gradient_step: Self::default_gradient_step(),
            max_gradient: Self::default_max_gradient(),
            max_vel_normalized: Self::default_max_vel_normalized(),
            max_vel_standard: Self::default_max_vel_standard(),
            min_life: Self::default_min_life(),
            max_life_bonus: Self::default_max_life_bonus(),
        }
    }
}

/// Everything one tick needs besides the particle itself.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub surface: LossFunction,
    pub range: LossRange,
    pub viewport: Viewport,
    pub learning_rate: f64,
    pub momentum: f64,
    pub normalize: bool,
    pub physics: &'a PhysicsParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathReason {
    Converged,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Cyan at low loss, magenta-ish at high loss. `t` must be in [0, 1].
    pub fn from_normalized_loss(t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self {
            r: (255.0 * t).floor() as u8,
            g: (255.0 * (1.0 - t * 0.6)).floor() as u8,
            b: (242.0 - 70.0 * t).floor() as u8,
        }
    }
}

/// Read-only view handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticleSnapshot {
    pub id: ParticleId,
    pub x: f64,
    pub y: f64,
    pub size: f64,
    pub color: Rgb,
    pub life: f64,
    pub trail: Vec<(f64, f64)>,
    pub sonified: bool,
    pub converged: bool,
}

#[derive(Debug, Clone)]
pub struct Particle {
    id: ParticleId,
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
    age: u32,
    max_life: f64,
    life: f64,
    size: f64,
    trail: VecDeque<(f64, f64)>,
    recent_losses: VecDeque<f64>,
    speed: f64,
    gradient_mag: f64,
    current_loss: f64,
    normalized_loss: f64,
    color: Rgb,
    sonified: bool,
    converged: bool,
    death_reason: Option<DeathReason>,
}

impl Particle {
    /// A fresh particle at rest. Lifespan and render size are drawn once here.
    pub fn new<R: Rng + ?Sized>(
        id: ParticleId,
        x: f64,
        y: f64,
        physics: &PhysicsParams,
        rng: &mut R,
    ) -> Self {
        let max_life = physics.min_life + rng.random::<f64>() * physics.max_life_bonus;
        let size = 3.0 + rng.random::<f64>() * 2.0;
        Self::with_lifespan(id, x, y, max_life, size)
    }

    pub fn with_lifespan(id: ParticleId, x: f64, y: f64, max_life: f64, size: f64) -> Self {
        Self {
            id,
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            age: 0,
            max_life: max_life.max(1.0),
            life: 1.0,
            size,
            trail: VecDeque::with_capacity(TRAIL_LEN + 1),
            recent_losses: VecDeque::with_capacity(LOSS_WINDOW + 1),
            speed: 0.0,
            gradient_mag: 0.0,
            current_loss: 0.0,
            normalized_loss: 0.0,
            color: Rgb { r: 0, g: 255, b: 242 },
            sonified: false,
            converged: false,
            death_reason: None,
        }
    }

    pub fn id(&self) -> ParticleId {
        self.id
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn velocity(&self) -> (f64, f64) {
        (self.vx, self.vy)
    }

    /// Velocity magnitude after clamping in the last update.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    pub fn max_life(&self) -> f64 {
        self.max_life
    }

    pub fn life(&self) -> f64 {
        self.life
    }

    pub fn is_alive(&self) -> bool {
        self.life > 0.0
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn trail(&self) -> impl ExactSizeIterator<Item = &(f64, f64)> + '_ {
        self.trail.iter()
    }

    pub fn recent_losses(&self) -> impl ExactSizeIterator<Item = &f64> + '_ {
        self.recent_losses.iter()
    }

    pub fn gradient_mag(&self) -> f64 {
        self.gradient_mag
    }

    pub fn current_loss(&self) -> f64 {
        self.current_loss
    }

    pub fn normalized_loss(&self) -> f64 {
        self.normalized_loss
    }

    pub fn color(&self) -> Rgb {
        self.color
    }

    pub fn is_sonified(&self) -> bool {
        self.sonified
    }

    pub fn set_sonified(&mut self, sonified: bool) {
        self.sonified = sonified;
    }

    pub fn is_converged(&self) -> bool {
        self.converged
    }

    pub fn death_reason(&self) -> Option<DeathReason> {
        self.death_reason
    }

    pub fn snapshot(&self) -> ParticleSnapshot {
        ParticleSnapshot {
            id: self.id,
            x: self.x,
            y: self.y,
            size: self.size,
            color: self.color,
            life: self.life,
            trail: self.trail.iter().copied().collect(),
            sonified: self.sonified,
            converged: self.converged,
        }
    }

    /// Advance one tick. Returns whether the particle is still alive.
    pub fn update<R: Rng + ?Sized>(&mut self, ctx: &StepContext<'_>, rng: &mut R) -> bool {
        let physics = ctx.physics;
        let vp = ctx.viewport;

        let (step_x, step_y) = self.descent_step(ctx);

        let noise = physics.noise_scale(self.age);
        let noise_x = (rng.random::<f64>() - 0.5) * noise;
        let noise_y = (rng.random::<f64>() - 0.5) * noise;

        let pixel_scale = vp.pixel_scale();
        self.vx = ctx.momentum * self.vx - ctx.learning_rate * (step_x + noise_x) * pixel_scale;
        self.vy = ctx.momentum * self.vy - ctx.learning_rate * (step_y + noise_y) * pixel_scale;

        let max_vel = if ctx.normalize {
            physics.max_vel_normalized
        } else {
            physics.max_vel_standard
        };
        self.speed = self.vx.hypot(self.vy);
        if self.speed > max_vel {
            let scale = max_vel / self.speed;
            self.vx *= scale;
            self.vy *= scale;
            self.speed = max_vel;
        }

        self.trail.push_back((self.x, self.y));
        if self.trail.len() > TRAIL_LEN {
            self.trail.pop_front();
        }

        self.x += self.vx;
        self.y += self.vy;
        self.reflect_off_walls(vp);

        self.current_loss = ctx.surface.eval_at(vp, self.x, self.y);
        self.normalized_loss = ctx.range.normalize(self.current_loss);
        self.color = Rgb::from_normalized_loss(self.normalized_loss);

        self.recent_losses.push_back(self.normalized_loss);
        if self.recent_losses.len() > LOSS_WINDOW {
            self.recent_losses.pop_front();
        }

        if self.convergence_check_due() {
            let (mean, variance) = self.loss_window_stats();
            if variance < CONVERGE_MAX_VARIANCE && mean < CONVERGE_MAX_MEAN_LOSS {
                self.converged = true;
                self.set_death_reason(DeathReason::Converged);
            }
        }

        self.age += 1;
        self.life = (1.0 - self.age as f64 / self.max_life).max(0.0);
        if self.life <= 0.0 {
            self.set_death_reason(DeathReason::Expired);
        }

        self.life > 0.0
    }

    /// Central-difference gradient, then either normalized to unit length or
    /// clipped to `max_gradient`.
    fn descent_step(&mut self, ctx: &StepContext<'_>) -> (f64, f64) {
        let p = ctx.viewport.to_domain(self.x, self.y);
        let h = ctx.physics.gradient_step;
        let f = |x: f64, y: f64| ctx.surface.eval(x, y);
        let dfdx = (f(p.x + h, p.y) - f(p.x - h, p.y)) / (2.0 * h);
        let dfdy = (f(p.x, p.y + h) - f(p.x, p.y - h)) / (2.0 * h);
        self.gradient_mag = dfdx.hypot(dfdy);

        if ctx.normalize {
            let n = self.gradient_mag + NORMALIZE_EPS;
            (dfdx / n, dfdy / n)
        } else if self.gradient_mag > ctx.physics.max_gradient {
            let scale = ctx.physics.max_gradient / self.gradient_mag;
            (dfdx * scale, dfdy * scale)
        } else {
            (dfdx, dfdy)
        }
    }

    fn reflect_off_walls(&mut self, vp: Viewport) {
        if self.x < 0.0 || self.x > vp.width {
            self.vx *= WALL_RESTITUTION;
            self.x = self.x.clamp(0.0, vp.width);
        }
        if self.y < 0.0 || self.y > vp.height {
            self.vy *= WALL_RESTITUTION;
            self.y = self.y.clamp(0.0, vp.height);
        }
    }

    fn convergence_check_due(&self) -> bool {
        !self.converged
            && self.age > CONVERGE_MIN_AGE
            && self.age % CONVERGE_CHECK_INTERVAL == 0
            && self.recent_losses.len() == LOSS_WINDOW
    }

    /// Population mean and variance of the loss window.
    fn loss_window_stats(&self) -> (f64, f64) {
        let n = self.recent_losses.len().max(1) as f64;
        let mean = self.recent_losses.iter().sum::<f64>() / n;
        let variance = self
            .recent_losses
            .iter()
            .map(|l| (l - mean) * (l - mean))
            .sum::<f64>()
            / n;
        (mean, variance)
    }

    /// First reason wins; later calls are ignored.
    fn set_death_reason(&mut self, reason: DeathReason) {
        if self.death_reason.is_none() {
            self.death_reason = Some(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn quiet_physics() -> PhysicsParams {
        PhysicsParams {
            base_noise_scale: 0.0,
            ..PhysicsParams::default()
        }
    }

    fn ctx<'a>(physics: &'a PhysicsParams, surface: LossFunction, normalize: bool) -> StepContext<'a> {
        let viewport = Viewport::new(200.0, 200.0);
        StepContext {
            surface,
            range: LossRange::scan(surface, viewport),
            viewport,
            learning_rate: 0.8,
            momentum: 0.85,
            normalize,
            physics,
        }
    }

    #[test]
    fn color_ramp_endpoints() {
        assert_eq!(Rgb::from_normalized_loss(0.0), Rgb { r: 0, g: 255, b: 242 });
        assert_eq!(Rgb::from_normalized_loss(1.0), Rgb { r: 255, g: 102, b: 172 });
        assert_eq!(Rgb::from_normalized_loss(0.5), Rgb { r: 127, g: 178, b: 207 });
    }

    #[test]
    fn noise_decays_to_floor() {
        let p = PhysicsParams::default();
        assert_abs_diff_eq!(p.noise_scale(0), 0.06, epsilon = 1e-12);
        assert_abs_diff_eq!(p.noise_scale(10_000), 0.006, epsilon = 1e-12);
        assert!(p.noise_scale(100) < p.noise_scale(50));
    }

    #[test]
    fn trail_and_window_are_bounded() {
        let physics = PhysicsParams::default();
        let c = ctx(&physics, LossFunction::Rastrigin, true);
        let mut rng = StdRng::seed_from_u64(7);
        let mut p = Particle::with_lifespan(0, 37.0, 151.0, 10_000.0, 4.0);
        for _ in 0..120 {
            p.update(&c, &mut rng);
            assert!(p.trail().len() <= TRAIL_LEN);
            assert!(p.recent_losses().len() <= LOSS_WINDOW);
        }
        assert_eq!(p.trail().len(), TRAIL_LEN);
        assert_eq!(p.recent_losses().len(), LOSS_WINDOW);
    }

    #[test]
    fn trail_records_pre_move_position() {
        let physics = quiet_physics();
        let c = ctx(&physics, LossFunction::Rastrigin, true);
        let mut rng = StdRng::seed_from_u64(1);
        let mut p = Particle::with_lifespan(0, 37.0, 151.0, 10_000.0, 4.0);
        p.update(&c, &mut rng);
        assert_eq!(p.trail().next().copied(), Some((37.0, 151.0)));
        assert_ne!(p.position(), (37.0, 151.0));
    }

    #[test]
    fn velocity_is_clamped_per_mode() {
        let physics = quiet_physics();
        let mut rng = StdRng::seed_from_u64(3);
        for (normalize, cap) in [(true, 8.0), (false, 15.0)] {
            let c = ctx(&physics, LossFunction::Himmelblau, normalize);
            let mut p = Particle::with_lifespan(0, 20.0, 20.0, 10_000.0, 4.0);
            for _ in 0..30 {
                p.update(&c, &mut rng);
                let (vx, vy) = p.velocity();
                assert!(vx.hypot(vy) <= cap + 1e-9);
            }
        }
    }

    #[test]
    fn wall_contact_flips_and_halves_velocity() {
        let vp = Viewport::new(200.0, 100.0);
        let mut p = Particle::with_lifespan(0, 199.0, 1.0, 10_000.0, 4.0);
        p.vx = 6.0;
        p.vy = -4.0;
        p.x += p.vx;
        p.y += p.vy;
        p.reflect_off_walls(vp);
        assert_eq!(p.position(), (200.0, 0.0));
        assert_eq!(p.velocity(), (-3.0, 2.0));

        let mut inside = Particle::with_lifespan(1, 50.0, 50.0, 10_000.0, 4.0);
        inside.vx = 3.0;
        inside.reflect_off_walls(vp);
        assert_eq!(inside.velocity(), (3.0, 0.0));
    }

    #[test]
    fn life_runs_down_and_expires_once() {
        let physics = PhysicsParams::default();
        let c = ctx(&physics, LossFunction::Rastrigin, true);
        let mut rng = StdRng::seed_from_u64(11);
        let mut p = Particle::with_lifespan(0, 10.0, 10.0, 5.0, 4.0);
        let mut alive_ticks = 0;
        while p.update(&c, &mut rng) {
            alive_ticks += 1;
            assert!(p.life() > 0.0 && p.life() <= 1.0);
            assert!(p.death_reason().is_none());
        }
        assert_eq!(alive_ticks, 4);
        assert_eq!(p.life(), 0.0);
        assert_eq!(p.death_reason(), Some(DeathReason::Expired));
    }

    #[test]
    fn death_reason_is_never_overwritten() {
        let mut p = Particle::with_lifespan(0, 10.0, 10.0, 5.0, 4.0);
        p.set_death_reason(DeathReason::Converged);
        p.set_death_reason(DeathReason::Expired);
        assert_eq!(p.death_reason(), Some(DeathReason::Converged));
    }

    fn primed_at_minimum(age: u32) -> Particle {
        // (160, 140) is Himmelblau's minimum at (3, 2) in a 200x200 viewport.
        let mut p = Particle::with_lifespan(0, 160.0, 140.0, 10_000.0, 4.0);
        p.age = age;
        p.recent_losses.extend(std::iter::repeat_n(0.0, LOSS_WINDOW));
        p
    }

    #[test]
    fn no_convergence_check_at_or_below_min_age() {
        let physics = quiet_physics();
        let c = ctx(&physics, LossFunction::Himmelblau, false);
        let mut rng = StdRng::seed_from_u64(5);
        for age in [50, 59, 60] {
            let mut p = primed_at_minimum(age);
            assert!(p.update(&c, &mut rng));
            assert!(!p.is_converged(), "converged at age {age}");
        }
    }

    #[test]
    fn convergence_only_on_check_interval() {
        let physics = quiet_physics();
        let c = ctx(&physics, LossFunction::Himmelblau, false);
        let mut rng = StdRng::seed_from_u64(5);
        let mut p = primed_at_minimum(71);
        assert!(p.update(&c, &mut rng));
        assert!(!p.is_converged());

        let mut p = primed_at_minimum(70);
        assert!(p.update(&c, &mut rng));
        assert!(p.is_converged());
        assert_eq!(p.death_reason(), Some(DeathReason::Converged));
        assert!(p.life() > 0.0);
    }

    #[test]
    fn short_window_blocks_convergence() {
        let physics = quiet_physics();
        let c = ctx(&physics, LossFunction::Himmelblau, false);
        let mut rng = StdRng::seed_from_u64(5);
        let mut p = Particle::with_lifespan(0, 160.0, 140.0, 10_000.0, 4.0);
        p.age = 80;
        p.recent_losses.extend(std::iter::repeat_n(0.0, LOSS_WINDOW - 2));
        assert!(p.update(&c, &mut rng));
        assert!(!p.is_converged());
    }
}
