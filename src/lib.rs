pub mod combat;
pub mod config;
pub mod entities;
pub mod error;
pub mod persistence;
pub mod telemetry;
pub mod world;

use std::sync::Arc;
use std::time::Instant;

use crate::combat::rules::CombatRules;
use crate::config::{AppConfig, SimConfig};
use crate::entities::creature::MapInstanceId;
use crate::persistence::templates::{TemplateSource, YamlTemplateSource};
use crate::world::grid::{AstarPathfinder, CachedPathfinder};
use crate::world::map_instance::{InstanceDeps, InstanceSettings};
use crate::world::registry::{TickIntervals, World};
use crate::world::scheduler::{ServerControl, TickScheduler};

pub use crate::error::{Result, SimError};

pub fn load_world<S: TemplateSource + ?Sized>(
    sim: &SimConfig,
    source: &S,
    control: Arc<ServerControl>,
    now: Instant,
) -> Result<World> {
    let intervals = TickIntervals {
        entity: sim.entity_tick(),
        instance: sim.instance_tick(),
    };
    let world = World::new(Arc::new(TickScheduler::new(control)), intervals);
    let rules = Arc::new(CombatRules::default());

    for (index, map) in sim.maps.iter().copied().enumerate() {
        let data = source.load_map(map)?;
        let definition = data.definition;
        let grid = Arc::new(data.grid);
        let pathfinder = CachedPathfinder::new(
            AstarPathfinder::new(Arc::clone(&grid)),
            sim.path_cache_capacity,
        );
        let deps = InstanceDeps {
            templates: source.load_templates_for_map(map)?,
            grid,
            pathfinder: Arc::new(pathfinder),
            rules: Arc::clone(&rules),
        };

        let id = MapInstanceId(index as u32 + 1);
        let mut settings = InstanceSettings::new(id, map, definition.kind);
        settings.pvp = definition.pvp;
        settings.rates = sim.rates;
        settings.xp_rate = definition.xp_rate;
        settings.drop_rate = definition.drop_rate;
        settings.max_level = sim.max_level;
        settings.sleep_grace = sim.sleep_grace();
        settings.drop_ttl = sim.drop_ttl();
        settings.proc_summon = sim.proc_summon;
        settings.seed = sim.seed;

        let instance = world.create_instance(settings, deps, now);
        let spawns = source.load_static_spawns(map)?;
        let spawned = instance.spawn_entities(&spawns, now);
        for wave in definition.waves {
            instance.add_wave(wave, now)?;
        }
        if !definition.on_cleared.is_empty() {
            instance.on_cleared(definition.on_cleared)?;
        }
        for portal in definition.portals {
            instance.add_portal(portal)?;
        }
        tracing::info!(instance = %id, %map, spawned = spawned.len(), "map loaded");
    }
    Ok(world)
}

pub fn run(args: &[String]) -> Result<()> {
    let config = AppConfig::from_args(args)?;
    let _log_guard = telemetry::logging::init(&config.root)?;
    tracing::info!(
        root = %config.root.display(),
        config = ?config.config_path,
        workers = config.sim.workers,
        maps = config.sim.maps.len(),
        "starting simulation"
    );

    let control = Arc::new(ServerControl::new());
    let source = YamlTemplateSource::new(&config.root);
    let world = load_world(&config.sim, &source, Arc::clone(&control), Instant::now())?;
    let workers = world.scheduler().run_workers(config.sim.workers)?;

    if let Some(duration) = config.sim.run_duration() {
        std::thread::sleep(duration);
        world.scheduler().shutdown();
    }
    for worker in workers {
        if worker.join().is_err() {
            tracing::error!("tick worker panicked");
        }
    }

    for instance in world.instances() {
        let tally = instance.tally();
        tracing::info!(
            instance = %instance.id(),
            entities = instance.entity_count(),
            killed = tally.monsters_killed,
            bonus_combo = tally.bonus_combo,
            "instance summary"
        );
        instance.dispose();
    }
    tracing::info!("simulation stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::creature::MapId;
    use std::fs;

    #[test]
    fn maps_become_populated_instances() {
        let root = std::env::temp_dir().join(format!("mapsim-world-{}", std::process::id()));
        fs::create_dir_all(root.join("templates")).unwrap();
        fs::create_dir_all(root.join("maps")).unwrap();
        fs::write(
            root.join("templates").join("all.yaml"),
            "templates:\n  - id: 1\n    level: 5\n    max_hp: 50\n    hostile: true\n",
        )
        .unwrap();
        fs::write(
            root.join("maps").join("2.yaml"),
            "map: 2\nkind: raid\nrows: ['.....', '.....', '.....']\nspawns:\n  - template: 1\n  - template: 1\n    cell: { x: 4, y: 2 }\n  - template: 77\n",
        )
        .unwrap();

        let sim = SimConfig {
            maps: vec![MapId(2)],
            ..SimConfig::default()
        };
        let control = Arc::new(ServerControl::new());
        let world = load_world(&sim, &YamlTemplateSource::new(&root), control, Instant::now()).unwrap();
        let instance = world.instance(MapInstanceId(1)).unwrap();
        assert_eq!(instance.map_id(), MapId(2));
        assert_eq!(instance.entity_count(), 2);
        assert_eq!(instance.live_monster_count(), 2);
        // housekeeping plus one job per entity
        assert_eq!(world.scheduler().len(), 3);
        let _ = fs::remove_dir_all(&root);
    }
}
