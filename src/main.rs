#![warn(clippy::unwrap_used, clippy::pedantic)]
#![allow(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::doc_markdown
)]
use std::{env, fs, path::Path};

use color_eyre::eyre::{self, OptionExt, WrapErr};
use itertools::Itertools;
use orbtk::{
    bodies::{BodyId, BodyKind},
    generation::PlanetarySystemConfig,
    kepler::Orbit,
    maneuver::Maneuver,
    persistence::OrbitalState,
    OrbitEvent, OrbitalBody, OrbitalMechanics,
};
use scenario::{ProbeSettings, Scenario};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod scenario;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let scenario = match env::args().nth(1) {
        Some(path) => {
            let text = fs::read_to_string(&path).wrap_err_with(|| format!("reading {path}"))?;
            toml::from_str::<Scenario>(&text).wrap_err_with(|| format!("parsing {path}"))?
        }
        None => {
            warn!("no scenario given; running the default");
            Scenario::default()
        }
    };

    let mut sim = OrbitalMechanics::new(scenario.sim.clone());
    let probe = match &scenario.run.load {
        Some(path) => {
            load(&mut sim, path)?;
            None
        }
        None => generate(&mut sim, &scenario)?,
    };
    run(&mut sim, &scenario, probe)?;

    if let Some(path) = &scenario.run.save {
        let state = ron::ser::to_string_pretty(
            &sim.save_orbital_state(),
            ron::ser::PrettyConfig::default(),
        )?;
        fs::write(path, state).wrap_err_with(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "saved orbital state");
    }
    Ok(())
}

fn load(sim: &mut OrbitalMechanics, path: &Path) -> eyre::Result<()> {
    let text = fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    let state: OrbitalState = ron::from_str(&text)?;
    sim.load_orbital_state(state)?;
    Ok(())
}

/// Build the universe described by the scenario, returning the probe if
/// one was launched.
fn generate(sim: &mut OrbitalMechanics, scenario: &Scenario) -> eyre::Result<Option<BodyId>> {
    let ids = sim.generate_star_system(&scenario.star_system)?;
    let planets = ids.iter().skip(1).copied().collect_vec();
    for (n, &planet) in planets.iter().enumerate() {
        let moons = PlanetarySystemConfig {
            seed: scenario.moons.seed.wrapping_add(n as u64),
            ..scenario.moons.clone()
        };
        sim.generate_planetary_system(planet, &moons)?;
    }

    if let &[first, second, ..] = planets.as_slice() {
        let transfer = sim.calculate_hohmann_transfer(first, second)?;
        info!(
            %first,
            %second,
            dv1 = transfer.delta_v1,
            dv2 = transfer.delta_v2,
            days = transfer.transfer_time / 86_400.0,
            "hohmann transfer between the inner planets"
        );
        match sim.calculate_transfer_window(first, second) {
            Ok(window) => info!(departure = %window.departure, wait_days = window.wait / 86_400.0, "next window"),
            Err(err) => warn!(%err, "no transfer window"),
        }
    }

    scenario
        .probe
        .as_ref()
        .map(|settings| launch_probe(sim, &planets, settings))
        .transpose()
}

fn launch_probe(sim: &mut OrbitalMechanics, planets: &[BodyId], settings: &ProbeSettings) -> eyre::Result<BodyId> {
    let planet = *planets
        .get(settings.planet)
        .ok_or_eyre("probe planet index is out of range")?;
    let body = sim.get_body(planet).ok_or_eyre("planet vanished")?;
    let orbit = Orbit::circular(body.mu(), body.radius + settings.altitude, 0.0).map_err(|e| eyre::eyre!(e))?;
    let probe = sim.register_body(
        OrbitalBody::new(settings.name.clone(), BodyKind::Spacecraft, 1.0e3, 0.01).with_elements(planet, orbit),
    )?;
    info!(%probe, %planet, period = orbit.period, "probe launched");
    Ok(probe)
}

fn run(sim: &mut OrbitalMechanics, scenario: &Scenario, probe: Option<BodyId>) -> eyre::Result<()> {
    let run = &scenario.run;
    for n in 1..=run.ticks {
        let report = sim.tick(run.tick);
        if report.failures > 0 {
            warn!(failures = report.failures, "bodies kept their last valid state");
        }
        if n == 1 {
            if let (Some(probe), Some(settings)) = (probe, &scenario.probe) {
                let dv = sim.execute_maneuver(probe, &Maneuver::prograde(settings.burn))?;
                info!(%probe, dv = dv.norm(), "probe burn");
            }
        }
        for event in sim.drain_events() {
            match event {
                OrbitEvent::SoiTransition { body, from, to } => info!(%body, %from, %to, epoch = %sim.epoch(), "SOI change"),
                OrbitEvent::Collision { a, b } => warn!(%a, %b, epoch = %sim.epoch(), "collision"),
                other => info!(?other, epoch = %sim.epoch(), "event"),
            }
        }
        if run.report_every > 0 && n % run.report_every == 0 {
            info!(epoch = %sim.epoch(), bodies = sim.body_count(), substeps = report.substeps, "status");
        }
    }
    Ok(())
}
