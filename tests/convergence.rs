use approx::assert_abs_diff_eq;
use gradflow::core::landscape::{LossFunction, LossRange, Viewport};
use gradflow::life::particle::{
    CONVERGE_CHECK_INTERVAL, CONVERGE_MIN_AGE, DeathReason, LOSS_WINDOW, PhysicsParams, StepContext,
};
use gradflow::life::population::Population;
use rand::SeedableRng;
use rand::rngs::StdRng;

fn himmelblau_ctx<'a>(viewport: Viewport, normalize: bool, physics: &'a PhysicsParams) -> StepContext<'a> {
    StepContext {
        surface: LossFunction::Himmelblau,
        range: LossRange::scan(LossFunction::Himmelblau, viewport),
        viewport,
        learning_rate: 0.8,
        momentum: 0.85,
        normalize,
        physics,
    }
}

#[test]
fn particle_at_himmelblau_minimum_converges_at_first_check() {
    let viewport = Viewport::new(200.0, 200.0);
    let (px, py) = viewport.to_pixel(3.0, 2.0);
    assert_abs_diff_eq!(px, 160.0, epsilon = 1e-9);
    assert_abs_diff_eq!(py, 140.0, epsilon = 1e-9);

    let physics = PhysicsParams {
        base_noise_scale: 0.0,
        ..PhysicsParams::default()
    };
    for normalize in [true, false] {
        let mut rng = StdRng::seed_from_u64(0);
        let ctx = himmelblau_ctx(viewport, normalize, &physics);
        let mut pop = Population::new();
        let id = pop.spawn_exact(px, py, &physics, &mut rng).expect("room");

        let mut converged_at = None;
        for _ in 0..100 {
            let checked_at = pop.get(id).expect("alive").age();
            let departed = pop.tick(&ctx, &mut rng);
            assert!(departed.is_empty(), "particle died early");
            let p = pop.get(id).expect("alive");
            if p.is_converged() && converged_at.is_none() {
                converged_at = Some(checked_at);
                assert_eq!(p.death_reason(), Some(DeathReason::Converged));
                assert!(p.life() > 0.0);
            }
        }
        assert_eq!(converged_at, Some(70), "normalize={normalize}");
    }
}

#[test]
fn converged_particle_reports_converged_when_it_finally_dies() {
    let viewport = Viewport::new(200.0, 200.0);
    let physics = PhysicsParams {
        base_noise_scale: 0.0,
        min_life: 90.0,
        max_life_bonus: 0.0,
        ..PhysicsParams::default()
    };
    let ctx = himmelblau_ctx(viewport, true, &physics);
    let mut rng = StdRng::seed_from_u64(0);
    let mut pop = Population::new();
    pop.spawn_exact(160.0, 140.0, &physics, &mut rng);

    let mut departures = Vec::new();
    for _ in 0..90 {
        departures.extend(pop.tick(&ctx, &mut rng));
    }
    assert!(pop.is_empty());
    assert_eq!(departures.len(), 1);
    assert_eq!(departures[0].reason, DeathReason::Converged);
}

#[test]
fn convergence_only_fires_on_check_ticks() {
    let viewport = Viewport::new(320.0, 240.0);
    let physics = PhysicsParams::default();
    for func in LossFunction::ALL {
        let ctx = StepContext {
            surface: func,
            range: LossRange::scan(func, viewport),
            viewport,
            learning_rate: 1.2,
            momentum: 0.9,
            normalize: false,
            physics: &physics,
        };
        let mut rng = StdRng::seed_from_u64(99);
        let mut pop = Population::new();
        for i in 0..6 {
            pop.spawn(40.0 + i as f64 * 50.0, 120.0, 10, &physics, &mut rng);
        }
        let mut seen = std::collections::HashSet::new();
        for _ in 0..400 {
            pop.tick(&ctx, &mut rng);
            for p in pop.iter() {
                if p.is_converged() && seen.insert(p.id()) {
                    // Age is bumped after the check, so the check ran one tick earlier.
                    let checked_at = p.age() - 1;
                    assert!(checked_at > CONVERGE_MIN_AGE, "{func}: converged at {checked_at}");
                    assert_eq!(checked_at % CONVERGE_CHECK_INTERVAL, 0);
                    assert_eq!(p.recent_losses().len(), LOSS_WINDOW);
                }
            }
        }
    }
}

#[test]
fn first_step_at_minimum_follows_finite_difference_residual() {
    // The central difference at an exact minimum is not zero, so the
    // particle drifts by -lr * g * pixel_scale on its first tick.
    let viewport = Viewport::new(200.0, 200.0);
    let physics = PhysicsParams {
        base_noise_scale: 0.0,
        ..PhysicsParams::default()
    };
    let ctx = himmelblau_ctx(viewport, false, &physics);
    let h = physics.gradient_step;
    let f = |x: f64, y: f64| LossFunction::Himmelblau.eval(x, y);
    let gx = (f(3.0 + h, 2.0) - f(3.0 - h, 2.0)) / (2.0 * h);
    let gy = (f(3.0, 2.0 + h) - f(3.0, 2.0 - h)) / (2.0 * h);
    assert!(gx.hypot(gy) > 0.0 && gx.hypot(gy) < physics.max_gradient);

    let mut rng = StdRng::seed_from_u64(0);
    let mut pop = Population::new();
    let id = pop.spawn_exact(160.0, 140.0, &physics, &mut rng).expect("room");
    pop.tick(&ctx, &mut rng);
    let (vx, vy) = pop.get(id).expect("alive").velocity();
    let scale = viewport.pixel_scale();
    assert_abs_diff_eq!(vx, -0.8 * gx * scale, epsilon = 1e-9);
    assert_abs_diff_eq!(vy, -0.8 * gy * scale, epsilon = 1e-9);
}
