use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::entities::creature::{CharacterId, EntityId, MapInstanceId, TemplateId};
use crate::entities::entity::Entity;
use crate::entities::hit::HitRequest;
use crate::entities::player::PlayerSession;
use crate::error::{Result, SimError};
use crate::world::events::{ServerEvent, SpawnSpec};
use crate::world::map_instance::{InstanceDeps, InstanceSettings, MapInstance};
use crate::world::position::Cell;
use crate::world::scheduler::{InstanceJob, TickScheduler};

pub trait WorldLookup {
    fn session(&self, character: CharacterId) -> Option<Arc<PlayerSession>>;
    fn current_instance(&self, character: CharacterId) -> Option<Arc<MapInstance>>;
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<CharacterId, Arc<PlayerSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<PlayerSession>) -> Option<Arc<PlayerSession>> {
        self.sessions.insert(session.id(), session)
    }

    pub fn remove(&self, character: CharacterId) -> Option<Arc<PlayerSession>> {
        self.sessions.remove(&character).map(|(_, session)| session)
    }

    pub fn get(&self, character: CharacterId) -> Option<Arc<PlayerSession>> {
        self.sessions
            .get(&character)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TickIntervals {
    pub entity: Duration,
    pub instance: Duration,
}

impl Default for TickIntervals {
    fn default() -> Self {
        Self {
            entity: Duration::from_millis(400),
            instance: Duration::from_secs(1),
        }
    }
}

pub struct World {
    instances: DashMap<MapInstanceId, Arc<MapInstance>>,
    sessions: SessionRegistry,
    scheduler: Arc<TickScheduler>,
    intervals: TickIntervals,
}

impl World {
    pub fn new(scheduler: Arc<TickScheduler>, intervals: TickIntervals) -> Self {
        Self {
            instances: DashMap::new(),
            sessions: SessionRegistry::new(),
            scheduler,
            intervals,
        }
    }

    pub fn scheduler(&self) -> &Arc<TickScheduler> {
        &self.scheduler
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn create_instance(
        &self,
        settings: InstanceSettings,
        deps: InstanceDeps,
        now: Instant,
    ) -> Arc<MapInstance> {
        let instance = MapInstance::new(settings, deps, now);
        instance.attach_scheduler(&self.scheduler, self.intervals.entity);
        self.scheduler.schedule(
            Arc::new(InstanceJob::new(&instance)),
            self.intervals.instance,
            now + self.intervals.instance,
        );
        self.instances.insert(instance.id(), Arc::clone(&instance));
        tracing::info!(instance = %instance.id(), map = %instance.map_id(), kind = ?instance.kind(), "instance created");
        instance
    }

    pub fn instance(&self, id: MapInstanceId) -> Result<Arc<MapInstance>> {
        self.instances
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(SimError::UnknownMapInstance(id))
    }

    pub fn instances(&self) -> Vec<Arc<MapInstance>> {
        self.instances
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn dispose_instance(&self, id: MapInstanceId) -> Result<()> {
        let (_, instance) = self
            .instances
            .remove(&id)
            .ok_or(SimError::UnknownMapInstance(id))?;
        for (session, fallback) in instance.dispose() {
            let Some(fallback) = fallback else {
                tracing::warn!(character = %session.id(), instance = %id, "no fallback after dispose");
                continue;
            };
            let moved = self
                .instance(fallback.instance)
                .and_then(|target| target.register_player(session, fallback.cell));
            if let Err(err) = moved {
                tracing::warn!(instance = %id, error = %err, "relocation failed");
            }
        }
        Ok(())
    }

    pub fn connect(&self, session: Arc<PlayerSession>) {
        tracing::debug!(character = %session.id(), "session connected");
        self.sessions.insert(session);
    }

    pub fn disconnect(&self, character: CharacterId, now: Instant) -> Option<Arc<PlayerSession>> {
        let instance = self.current_instance(character);
        let session = self.sessions.remove(character)?;
        session.disconnect();
        if let Some(instance) = instance {
            instance.unregister_player(character, now);
        }
        tracing::debug!(%character, "session disconnected");
        Some(session)
    }

    pub fn move_player(
        &self,
        character: CharacterId,
        destination: MapInstanceId,
        cell: Cell,
        now: Instant,
    ) -> Result<()> {
        let session = self
            .sessions
            .get(character)
            .ok_or(SimError::UnknownCharacter(character))?;
        let target = self.instance(destination)?;
        if let Some(current) = self.current_instance(character) {
            current.unregister_player(character, now);
        }
        target.register_player(session, cell)
    }

    /// Routes a character attack to the entity on the attacker's instance.
    pub fn enqueue_hit(&self, target: EntityId, request: HitRequest) -> bool {
        match self.current_instance(request.attacker.id()) {
            Some(instance) => instance.enqueue_hit(target, request),
            None => {
                request
                    .attacker
                    .send(ServerEvent::HitCancelled { entity: target });
                false
            }
        }
    }

    pub fn spawn_entities(
        &self,
        instance: MapInstanceId,
        template: TemplateId,
        count: usize,
        options: &SpawnSpec,
        now: Instant,
    ) -> Result<Vec<EntityId>> {
        let instance = self.instance(instance)?;
        let specs: Vec<SpawnSpec> = (0..count)
            .map(|_| SpawnSpec {
                template,
                ..options.clone()
            })
            .collect();
        Ok(instance.spawn_entities(&specs, now))
    }

    pub fn despawn_entity(
        &self,
        instance: MapInstanceId,
        entity: EntityId,
        now: Instant,
    ) -> Result<bool> {
        Ok(self.instance(instance)?.despawn_entity(entity, now))
    }

    pub fn broadcast(&self, instance: MapInstanceId, event: ServerEvent) -> Result<()> {
        self.instance(instance)?.broadcast(event);
        Ok(())
    }

    pub fn get_entity(&self, instance: MapInstanceId, entity: EntityId) -> Result<Arc<Entity>> {
        self.instance(instance)?
            .entity(entity)
            .ok_or(SimError::UnknownEntity(entity))
    }

    pub fn entities_in_range(
        &self,
        instance: MapInstanceId,
        center: Cell,
        radius: u8,
    ) -> Result<Vec<Arc<Entity>>> {
        Ok(self.instance(instance)?.entities_in_range(center, radius))
    }
}

impl WorldLookup for World {
    fn session(&self, character: CharacterId) -> Option<Arc<PlayerSession>> {
        self.sessions.get(character)
    }

    fn current_instance(&self, character: CharacterId) -> Option<Arc<MapInstance>> {
        let session = self.sessions.get(character)?;
        let id = session.with_state(|state| state.instance).ok().flatten()?;
        self.instance(id).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::damage::DamageClass;
    use crate::combat::rules::CombatRules;
    use crate::entities::creature::{AbilityId, MapId, MapInstanceKind};
    use crate::entities::player::Fallback;
    use crate::entities::template::AbilityTemplate;
    use crate::world::grid::{AstarPathfinder, WalkGrid};
    use crate::world::map_instance::fixtures::{session, templates, STURDY};
    use crate::world::scheduler::ServerControl;

    fn deps() -> InstanceDeps {
        let grid = Arc::new(WalkGrid::open(20, 20));
        InstanceDeps {
            templates: Arc::new(templates()),
            pathfinder: Arc::new(AstarPathfinder::new(Arc::clone(&grid))),
            grid,
            rules: Arc::new(CombatRules::default()),
        }
    }

    fn world_with(ids: &[u32], now: Instant) -> World {
        let scheduler = Arc::new(TickScheduler::new(Arc::new(ServerControl::new())));
        let world = World::new(scheduler, TickIntervals::default());
        for id in ids {
            let settings =
                InstanceSettings::new(MapInstanceId(*id), MapId(1), MapInstanceKind::Base);
            world.create_instance(settings, deps(), now);
        }
        world
    }

    fn bolt() -> Arc<AbilityTemplate> {
        Arc::new(AbilityTemplate::new(AbilityId(1), DamageClass::Magic))
    }

    #[test]
    fn hits_without_a_target_are_cancelled() {
        let now = Instant::now();
        let world = world_with(&[1], now);
        let player = session(1, Cell::new(0, 0));
        world.connect(Arc::clone(&player));

        assert!(!world.enqueue_hit(EntityId(9), HitRequest::single(Arc::clone(&player), bolt())));
        assert_eq!(
            player.drain_outbox(),
            vec![ServerEvent::HitCancelled { entity: EntityId(9) }]
        );

        world.move_player(CharacterId(1), MapInstanceId(1), Cell::new(2, 2), now).unwrap();
        assert!(!world.enqueue_hit(EntityId(9), HitRequest::single(Arc::clone(&player), bolt())));
        assert_eq!(
            player.drain_outbox(),
            vec![ServerEvent::HitCancelled { entity: EntityId(9) }]
        );

        let ids = world
            .spawn_entities(MapInstanceId(1), STURDY, 1, &SpawnSpec::at(STURDY, Cell::new(4, 4)), now)
            .unwrap();
        assert!(world.enqueue_hit(ids[0], HitRequest::single(Arc::clone(&player), bolt())));
        assert_eq!(world.get_entity(MapInstanceId(1), ids[0]).unwrap().queued_hits(), 1);
    }

    #[test]
    fn instance_creation_schedules_housekeeping_and_spawns() {
        let now = Instant::now();
        let world = world_with(&[1], now);
        assert_eq!(world.scheduler().len(), 1);
        let ids = world
            .spawn_entities(MapInstanceId(1), STURDY, 3, &SpawnSpec::at(STURDY, Cell::new(4, 4)), now)
            .unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(world.scheduler().len(), 4);
        assert_eq!(
            world
                .entities_in_range(MapInstanceId(1), Cell::new(4, 4), 1)
                .unwrap()
                .len(),
            3
        );
        assert!(world.despawn_entity(MapInstanceId(1), ids[0], now).unwrap());
        assert!(matches!(
            world.get_entity(MapInstanceId(1), ids[0]),
            Err(SimError::UnknownEntity(_))
        ));
        assert!(matches!(
            world.instance(MapInstanceId(7)),
            Err(SimError::UnknownMapInstance(_))
        ));
    }

    #[test]
    fn moving_between_instances_updates_both_rosters() {
        let now = Instant::now();
        let world = world_with(&[1, 2], now);
        world.connect(session(1, Cell::new(0, 0)));
        world.move_player(CharacterId(1), MapInstanceId(1), Cell::new(1, 1), now).unwrap();
        world.move_player(CharacterId(1), MapInstanceId(2), Cell::new(3, 3), now).unwrap();

        assert_eq!(world.instance(MapInstanceId(1)).unwrap().player_count(), 0);
        assert_eq!(world.instance(MapInstanceId(2)).unwrap().player_count(), 1);
        assert_eq!(
            world.current_instance(CharacterId(1)).map(|instance| instance.id()),
            Some(MapInstanceId(2))
        );
        assert!(matches!(
            world.move_player(CharacterId(5), MapInstanceId(1), Cell::new(0, 0), now),
            Err(SimError::UnknownCharacter(_))
        ));
    }

    #[test]
    fn disposing_relocates_players_to_their_fallback() {
        let now = Instant::now();
        let world = world_with(&[1, 2], now);
        let player = session(1, Cell::new(0, 0));
        player
            .with_state(|state| {
                state.fallback = Some(Fallback {
                    instance: MapInstanceId(1),
                    cell: Cell::new(6, 6),
                })
            })
            .unwrap();
        world.connect(Arc::clone(&player));
        world.move_player(CharacterId(1), MapInstanceId(2), Cell::new(3, 3), now).unwrap();

        world.dispose_instance(MapInstanceId(2)).unwrap();
        assert!(world.instance(MapInstanceId(2)).is_err());
        assert_eq!(
            player.with_state(|state| (state.instance, state.cell)).unwrap(),
            (Some(MapInstanceId(1)), Cell::new(6, 6))
        );
        assert!(world.dispose_instance(MapInstanceId(2)).is_err());
    }

    #[test]
    fn disconnect_leaves_the_instance() {
        let now = Instant::now();
        let world = world_with(&[1], now);
        world.connect(session(1, Cell::new(0, 0)));
        world.move_player(CharacterId(1), MapInstanceId(1), Cell::new(1, 1), now).unwrap();

        let gone = world.disconnect(CharacterId(1), now).unwrap();
        assert!(!gone.is_connected());
        assert!(world.sessions().is_empty());
        assert_eq!(world.instance(MapInstanceId(1)).unwrap().player_count(), 0);
        assert!(world.disconnect(CharacterId(1), now).is_none());
    }
}
