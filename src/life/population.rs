use std::f64::consts::TAU;

use rand::Rng;
use tracing::debug;

use super::particle::{
    DeathReason, Particle, ParticleId, ParticleSnapshot, PhysicsParams, StepContext,
};

/// Hard cap on live particles.
pub const MAX_PARTICLES: usize = 60;
/// Spawns are scattered uniformly in angle within this radius of the request.
pub const SPAWN_JITTER_RADIUS: f64 = 20.0;

/// A particle removed during the last tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Departure {
    pub id: ParticleId,
    pub reason: DeathReason,
    pub sonified: bool,
}

/// Sole owner of every particle. Iteration order is spawn order.
#[derive(Debug)]
pub struct Population {
    particles: Vec<Particle>,
    capacity: usize,
    next_id: ParticleId,
}

impl Default for Population {
    fn default() -> Self {
        Self::new()
    }
}

impl Population {
    pub fn new() -> Self {
        Self::with_capacity(MAX_PARTICLES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            particles: Vec::with_capacity(capacity),
            capacity,
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.particles.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Particle> {
        self.particles.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Particle> {
        self.particles.iter_mut()
    }

    pub fn get(&self, id: ParticleId) -> Option<&Particle> {
        self.particles.iter().find(|p| p.id() == id)
    }

    fn allocate_id(&mut self) -> ParticleId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Spawn up to `count` particles around `(cx, cy)`, clamped to the
    /// remaining capacity. Returns the ids actually created.
    pub fn spawn<R: Rng + ?Sized>(
        &mut self,
        cx: f64,
        cy: f64,
        count: usize,
        physics: &PhysicsParams,
        rng: &mut R,
    ) -> Vec<ParticleId> {
        let to_spawn = count.min(self.remaining());
        let mut ids = Vec::with_capacity(to_spawn);
        for _ in 0..to_spawn {
            let angle = rng.random::<f64>() * TAU;
            let radius = rng.random::<f64>() * SPAWN_JITTER_RADIUS;
            let x = cx + angle.cos() * radius;
            let y = cy + angle.sin() * radius;
            let id = self.allocate_id();
            self.particles.push(Particle::new(id, x, y, physics, rng));
            ids.push(id);
        }
        ids
    }

    /// Spawn one particle exactly at `(x, y)`, without jitter.
    pub fn spawn_exact<R: Rng + ?Sized>(
        &mut self,
        x: f64,
        y: f64,
        physics: &PhysicsParams,
        rng: &mut R,
    ) -> Option<ParticleId> {
        if self.remaining() == 0 {
            return None;
        }
        let id = self.allocate_id();
        self.particles.push(Particle::new(id, x, y, physics, rng));
        Some(id)
    }

    /// Advance every particle, drop the ones that died this tick and report them.
    /// Survivors keep their relative order.
    pub fn tick<R: Rng + ?Sized>(
        &mut self,
        ctx: &StepContext<'_>,
        rng: &mut R,
    ) -> Vec<Departure> {
        let mut departed = Vec::new();
        self.particles.retain_mut(|p| {
            if p.update(ctx, rng) {
                return true;
            }
            departed.push(Departure {
                id: p.id(),
                reason: p.death_reason().unwrap_or(DeathReason::Expired),
                sonified: p.is_sonified(),
            });
            false
        });

        if !departed.is_empty() {
            debug!(
                "Culled {} particles. Remaining: {}",
                departed.len(),
                self.particles.len()
            );
        }
        departed
    }

    /// Lowest raw loss among live particles.
    pub fn min_loss(&self) -> Option<f64> {
        self.particles
            .iter()
            .map(|p| p.current_loss())
            .min_by(|a, b| a.total_cmp(b))
    }

    pub fn snapshots(&self) -> Vec<ParticleSnapshot> {
        self.particles.iter().map(Particle::snapshot).collect()
    }

    /// Drop every particle and restart ids from zero.
    pub fn clear(&mut self) {
        self.particles.clear();
        self.next_id = 0;
    }
}
