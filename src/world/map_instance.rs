use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::combat::rules::CombatRules;
use crate::entities::creature::{
    CharacterId, DropId, EntityId, EntityKind, ItemId, MapId, MapInstanceId, MapInstanceKind,
    TemplateId,
};
use crate::entities::entity::{DeathReport, Entity, Transition};
use crate::entities::hit::HitRequest;
use crate::entities::player::{Fallback, PlayerSession};
use crate::entities::template::TemplateIndex;
use crate::error::{Result, SimError};
use crate::world::events::{InstanceEvent, Portal, ServerEvent, SpawnSpec, WaveEvent};
use crate::world::grid::{Pathfinder, WalkGrid};
use crate::world::loot::{self, Rates, GOLD_ITEM};
use crate::world::position::Cell;
use crate::world::scheduler::{EntityJob, TickScheduler};

const SPAWN_ATTEMPTS: usize = 100;
const THROW_RADIUS: u8 = 10;

#[derive(Debug, Clone)]
pub struct InstanceSettings {
    pub id: MapInstanceId,
    pub map: MapId,
    pub kind: MapInstanceKind,
    pub pvp: bool,
    pub rates: Rates,
    /// Multiplied with the global xp rate.
    pub xp_rate: f64,
    /// Multiplied with the global drop rate.
    pub drop_rate: f64,
    pub max_level: u16,
    pub sleep_grace: Duration,
    pub drop_ttl: Duration,
    pub proc_summon: TemplateId,
    pub seed: u64,
}

impl InstanceSettings {
    pub fn new(id: MapInstanceId, map: MapId, kind: MapInstanceKind) -> Self {
        Self {
            id,
            map,
            kind,
            pvp: false,
            rates: Rates::default(),
            xp_rate: 1.0,
            drop_rate: 1.0,
            max_level: 99,
            sleep_grace: Duration::from_secs(30),
            drop_ttl: Duration::from_secs(180),
            proc_summon: TemplateId(2371),
            seed: 0,
        }
    }
}

#[derive(Clone)]
pub struct InstanceDeps {
    pub templates: Arc<TemplateIndex>,
    pub grid: Arc<WalkGrid>,
    pub pathfinder: Arc<dyn Pathfinder>,
    pub rules: Arc<CombatRules>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedItem {
    pub id: DropId,
    pub item: ItemId,
    pub amount: u32,
    pub cell: Cell,
    pub owner: Option<CharacterId>,
    pub created: Instant,
}

impl DroppedItem {
    fn appearance(&self) -> ServerEvent {
        ServerEvent::DropAppeared {
            drop: self.id,
            item: self.item,
            amount: self.amount,
            cell: self.cell,
            owner: self.owner,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceTally {
    pub monsters_killed: u32,
    pub bonus_combo: u32,
}

#[derive(Debug)]
struct WaveState {
    wave: WaveEvent,
    remaining_offset: u8,
    last_start: Instant,
}

#[derive(Debug, Default)]
struct SleepState {
    requested: bool,
    empty_since: Option<Instant>,
    asleep: bool,
}

struct EntityScheduling {
    scheduler: Weak<TickScheduler>,
    interval: Duration,
}

pub struct MapInstance {
    settings: InstanceSettings,
    deps: InstanceDeps,
    self_ref: Weak<MapInstance>,
    entities: DashMap<EntityId, Arc<Entity>>,
    drops: DashMap<DropId, DroppedItem>,
    players: DashMap<CharacterId, Arc<PlayerSession>>,
    portals: Mutex<Vec<Portal>>,
    waves: Mutex<Vec<WaveState>>,
    clear_hooks: Mutex<Vec<InstanceEvent>>,
    clear_armed: AtomicBool,
    sleep: Mutex<SleepState>,
    monsters_killed: AtomicU32,
    bonus_combo: AtomicU32,
    last_entity: AtomicU32,
    last_drop: AtomicU64,
    disposed: AtomicBool,
    rng: Mutex<StdRng>,
    scheduling: OnceLock<EntityScheduling>,
}

impl MapInstance {
    pub fn new(settings: InstanceSettings, deps: InstanceDeps, now: Instant) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| {
            let rng = StdRng::seed_from_u64(settings.seed ^ u64::from(settings.id.0));
            Self {
                deps,
                self_ref: self_ref.clone(),
                entities: DashMap::new(),
                drops: DashMap::new(),
                players: DashMap::new(),
                portals: Mutex::new(Vec::new()),
                waves: Mutex::new(Vec::new()),
                clear_hooks: Mutex::new(Vec::new()),
                clear_armed: AtomicBool::new(false),
                // Fresh instances have nobody in them; the grace period starts now.
                sleep: Mutex::new(SleepState {
                    requested: true,
                    empty_since: Some(now),
                    asleep: false,
                }),
                monsters_killed: AtomicU32::new(0),
                bonus_combo: AtomicU32::new(0),
                last_entity: AtomicU32::new(0),
                last_drop: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                rng: Mutex::new(rng),
                scheduling: OnceLock::new(),
                settings,
            }
        })
    }

    pub fn id(&self) -> MapInstanceId {
        self.settings.id
    }

    pub fn map_id(&self) -> MapId {
        self.settings.map
    }

    pub fn kind(&self) -> MapInstanceKind {
        self.settings.kind
    }

    pub fn is_pvp(&self) -> bool {
        self.settings.pvp
    }

    pub fn rates(&self) -> Rates {
        self.settings.rates
    }

    pub fn xp_rate(&self) -> f64 {
        self.settings.rates.xp * self.settings.xp_rate
    }

    pub fn drop_rate(&self) -> f64 {
        self.settings.rates.drop * self.settings.drop_rate
    }

    pub fn max_level(&self) -> u16 {
        self.settings.max_level
    }

    pub fn proc_summon(&self) -> TemplateId {
        self.settings.proc_summon
    }

    pub fn templates(&self) -> &TemplateIndex {
        &self.deps.templates
    }

    pub fn rules(&self) -> &CombatRules {
        &self.deps.rules
    }

    pub fn grid(&self) -> &WalkGrid {
        &self.deps.grid
    }

    pub fn pathfinder(&self) -> &dyn Pathfinder {
        self.deps.pathfinder.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Runtime spawns get their own entity job on `scheduler`.
    pub fn attach_scheduler(&self, scheduler: &Arc<TickScheduler>, interval: Duration) {
        let attached = self.scheduling.set(EntityScheduling {
            scheduler: Arc::downgrade(scheduler),
            interval,
        });
        if attached.is_err() {
            tracing::warn!(instance = %self.id(), "scheduler already attached");
        }
    }

    pub fn with_rng<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut rng)
    }

    // ---- sleep ----

    /// Sleeping instances skip entity AI and drop expiry. Hit processing never sleeps.
    pub fn is_sleeping(&self, now: Instant) -> bool {
        let Ok(state) = self.sleep.lock() else {
            return false;
        };
        state.requested
            && self.players.is_empty()
            && state
                .empty_since
                .is_some_and(|since| now.saturating_duration_since(since) >= self.settings.sleep_grace)
    }

    fn wake(&self) {
        if let Ok(mut state) = self.sleep.lock() {
            state.requested = false;
            state.empty_since = None;
            if state.asleep {
                state.asleep = false;
                tracing::debug!(instance = %self.id(), "instance woke up");
            }
        }
    }

    fn request_sleep(&self, now: Instant) {
        if let Ok(mut state) = self.sleep.lock() {
            state.requested = true;
            state.empty_since = Some(now);
        }
    }

    fn note_sleep_state(&self, now: Instant) -> bool {
        let sleeping = self.is_sleeping(now);
        if let Ok(mut state) = self.sleep.lock() {
            if sleeping && !state.asleep {
                tracing::debug!(instance = %self.id(), "instance went to sleep");
            }
            state.asleep = sleeping;
        }
        sleeping
    }

    // ---- players ----

    pub fn register_player(&self, session: Arc<PlayerSession>, cell: Cell) -> Result<()> {
        let id = self.id();
        session.with_state(|state| {
            state.instance = Some(id);
            state.cell = cell;
        })?;
        self.wake();
        for entity in self.entities() {
            let alive = entity.with_body(|body| body.life.is_alive())?;
            if alive {
                session.send(entity.appearance(true)?);
            }
        }
        for drop in self.drops.iter() {
            session.send(drop.appearance());
        }
        for portal in self.portals()? {
            session.send(portal_event(&portal));
        }
        let character = session.id();
        self.players.insert(character, session);
        tracing::debug!(instance = %id, %character, "player registered");
        Ok(())
    }

    pub fn unregister_player(&self, character: CharacterId, now: Instant) -> Option<Arc<PlayerSession>> {
        let (_, session) = self.players.remove(&character)?;
        for entity in self.entities() {
            let cleared = entity.with_body(|body| {
                if body.life.target() == Some(character) {
                    body.transition(Transition::TargetLost);
                    body.path.clear();
                    body.path_goal = None;
                }
            });
            if let Err(err) = cleared {
                tracing::warn!(entity = %entity.id(), error = %err, "target not cleared");
            }
        }
        if self.players.is_empty() {
            self.request_sleep(now);
        }
        tracing::debug!(instance = %self.id(), %character, "player unregistered");
        Some(session)
    }

    pub fn player(&self, character: CharacterId) -> Option<Arc<PlayerSession>> {
        self.players.get(&character).map(|entry| Arc::clone(entry.value()))
    }

    pub fn players(&self) -> Vec<Arc<PlayerSession>> {
        self.players.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn characters_in_range(&self, center: Cell, radius: u8) -> Vec<Arc<PlayerSession>> {
        self.players()
            .into_iter()
            .filter(|session| {
                session
                    .with_state(|state| state.cell.in_range(center, u32::from(radius)))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn broadcast(&self, event: ServerEvent) {
        for entry in self.players.iter() {
            entry.value().send(event.clone());
        }
    }

    pub fn send_to(&self, character: CharacterId, event: ServerEvent) -> bool {
        match self.players.get(&character) {
            Some(entry) => {
                entry.value().send(event);
                true
            }
            None => false,
        }
    }

    // ---- entities ----

    pub fn entity(&self, id: EntityId) -> Option<Arc<Entity>> {
        self.entities.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn entities(&self) -> Vec<Arc<Entity>> {
        self.entities.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entities_in_range(&self, center: Cell, radius: u8) -> Vec<Arc<Entity>> {
        self.entities()
            .into_iter()
            .filter(|entity| {
                entity
                    .with_body(|body| {
                        body.life.is_alive() && body.cell.in_range(center, u32::from(radius))
                    })
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn enqueue_hit(&self, target: EntityId, request: HitRequest) -> bool {
        match self.entity(target) {
            Some(entity) => entity.enqueue_hit(request),
            None => {
                request
                    .attacker
                    .send(ServerEvent::HitCancelled { entity: target });
                false
            }
        }
    }

    fn next_entity_id(&self) -> EntityId {
        EntityId(self.last_entity.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
    }

    /// Creates entities from `specs`. A spec with an unknown template or no
    /// free cell is skipped; the rest of the batch still spawns.
    pub fn spawn_entities(&self, specs: &[SpawnSpec], now: Instant) -> Vec<EntityId> {
        if self.is_disposed() {
            return Vec::new();
        }
        let mut spawned = Vec::with_capacity(specs.len());
        for spec in specs {
            let template = match self.templates().template(spec.template) {
                Ok(template) => template,
                Err(err) => {
                    tracing::warn!(instance = %self.id(), error = %err, "spawn skipped");
                    continue;
                }
            };
            let (cell, seed) = self.with_rng(|rng| {
                let cell = spec
                    .cell
                    .or_else(|| self.grid().random_walkable_cell(rng, SPAWN_ATTEMPTS));
                (cell, rng.gen::<u64>())
            });
            let Some(cell) = cell else {
                tracing::warn!(instance = %self.id(), template = %template.id, "no free cell for spawn");
                continue;
            };
            let abilities = self.templates().abilities_of(&template);
            let id = self.next_entity_id();
            let entity = Arc::new(Entity::spawn(
                id,
                template,
                abilities,
                spec,
                cell,
                self.templates(),
                seed,
                now,
            ));
            match entity.appearance(false) {
                Ok(event) => self.broadcast(event),
                Err(err) => tracing::warn!(entity = %id, error = %err, "appearance not sent"),
            }
            self.entities.insert(id, Arc::clone(&entity));
            self.schedule_entity(entity, now);
            spawned.push(id);
        }
        if !spawned.is_empty() {
            tracing::debug!(instance = %self.id(), count = spawned.len(), "entities spawned");
        }
        spawned
    }

    fn schedule_entity(&self, entity: Arc<Entity>, now: Instant) {
        let Some(scheduling) = self.scheduling.get() else {
            return;
        };
        if let Some(scheduler) = scheduling.scheduler.upgrade() {
            let job = EntityJob::new(self.self_ref.clone(), entity);
            scheduler.schedule(Arc::new(job), scheduling.interval, now + scheduling.interval);
        }
    }

    pub fn despawn_entity(&self, id: EntityId, now: Instant) -> bool {
        let Some((_, entity)) = self.entities.remove(&id) else {
            return false;
        };
        let result = entity.with_body(|body| {
            body.transition(Transition::Killed(now));
            body.resources.deplete();
            body.path.clear();
            body.take_summons()
        });
        entity.retire();
        self.broadcast(ServerEvent::EntityRemoved { entity: id });
        match result {
            Ok(summons) => self.despawn_summons(summons, now),
            Err(err) => tracing::warn!(entity = %id, error = %err, "despawned entity body unavailable"),
        }
        true
    }

    pub fn despawn_summons(&self, summons: Vec<EntityId>, now: Instant) {
        for summon in summons {
            self.despawn_entity(summon, now);
        }
    }

    pub fn despawn_by_template(&self, template: TemplateId, now: Instant) -> usize {
        let matching: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|entry| entry.value().template().id == template)
            .map(|entry| *entry.key())
            .collect();
        matching
            .into_iter()
            .filter(|id| self.despawn_entity(*id, now))
            .count()
    }

    /// Drops a dead, non-respawning entity from the registry without a broadcast.
    fn remove_entity(&self, id: EntityId, now: Instant) {
        let Some((_, entity)) = self.entities.remove(&id) else {
            return;
        };
        entity.retire();
        match entity.with_body(|body| body.take_summons()) {
            Ok(summons) => self.despawn_summons(summons, now),
            Err(err) => tracing::warn!(entity = %id, error = %err, "removed entity body unavailable"),
        }
    }

    pub fn handle_death(&self, report: DeathReport, now: Instant) {
        if report.template.kind == EntityKind::Monster {
            self.monsters_killed.fetch_add(1, Ordering::AcqRel);
            if report.is_bonus {
                self.bonus_combo.fetch_add(1, Ordering::AcqRel);
            } else {
                self.bonus_combo.store(0, Ordering::Release);
            }
        }
        loot::grant_rewards(self, &report, now);
        if let Err(err) = self.run_events(&report.on_death, now) {
            tracing::error!(instance = %self.id(), entity = %report.entity, error = %err, "death hook failed");
        }
        if !report.respawns {
            self.remove_entity(report.entity, now);
        }
        tracing::debug!(instance = %self.id(), entity = %report.entity, template = %report.template.id, "entity died");
    }

    pub fn tally(&self) -> InstanceTally {
        InstanceTally {
            monsters_killed: self.monsters_killed.load(Ordering::Acquire),
            bonus_combo: self.bonus_combo.load(Ordering::Acquire),
        }
    }

    pub fn live_monster_count(&self) -> usize {
        self.entities()
            .into_iter()
            .filter(|entity| entity.template().kind == EntityKind::Monster)
            .filter(|entity| {
                entity
                    .with_body(|body| body.hostile && body.life.is_alive())
                    .unwrap_or(false)
            })
            .count()
    }

    // ---- drops ----

    pub fn drops(&self) -> Vec<DroppedItem> {
        self.drops.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn drop_item(
        &self,
        item: ItemId,
        amount: u32,
        cell: Cell,
        owner: Option<CharacterId>,
        now: Instant,
    ) -> DropId {
        let id = DropId(self.last_drop.fetch_add(1, Ordering::AcqRel).wrapping_add(1));
        let drop = DroppedItem {
            id,
            item,
            amount,
            cell,
            owner,
            created: now,
        };
        self.broadcast(drop.appearance());
        self.drops.insert(id, drop);
        id
    }

    /// Drops on the first walkable cell of the shuffled 3x3 around `center`.
    pub fn drop_near(
        &self,
        center: Cell,
        item: ItemId,
        amount: u32,
        owner: Option<CharacterId>,
        now: Instant,
    ) -> DropId {
        let mut cells: Vec<Cell> = (-1..=1)
            .flat_map(|dy| (-1..=1).map(move |dx| center.offset(dx, dy)))
            .collect();
        self.with_rng(|rng| cells.shuffle(rng));
        let cell = cells
            .into_iter()
            .find(|cell| self.grid().is_walkable(*cell))
            .unwrap_or(center);
        self.drop_item(item, amount, cell, owner, now)
    }

    pub fn remove_drop(&self, id: DropId) -> Option<DroppedItem> {
        let (_, drop) = self.drops.remove(&id)?;
        self.broadcast(ServerEvent::DropRemoved { drop: id });
        Some(drop)
    }

    fn expire_drops(&self, now: Instant) -> usize {
        let ttl = self.settings.drop_ttl;
        let expired: Vec<DropId> = self
            .drops
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.value().created) >= ttl)
            .map(|entry| *entry.key())
            .collect();
        expired
            .into_iter()
            .filter(|id| self.remove_drop(*id).is_some())
            .count()
    }

    /// Scatters `count` drops from `around` to random cells within ten cells.
    pub fn throw_items(
        &self,
        around: EntityId,
        item: ItemId,
        count: u8,
        min_amount: u32,
        max_amount: u32,
        now: Instant,
    ) -> Result<usize> {
        let entity = self.entity(around).ok_or(SimError::UnknownEntity(around))?;
        let origin = entity.with_body(|body| body.cell)?;
        let gold = item == GOLD_ITEM;
        let gold_rate = self.settings.rates.gold;
        let mut thrown = 0;
        for _ in 0..count {
            let (target, amount) = self.with_rng(|rng| {
                let target = self
                    .grid()
                    .random_free_cell_near(origin, THROW_RADIUS, THROW_RADIUS, rng);
                let amount = rng.gen_range(min_amount..=max_amount.max(min_amount));
                (target, amount)
            });
            let Some(target) = target else {
                continue;
            };
            let amount = if gold {
                (f64::from(amount) * gold_rate) as u32
            } else {
                amount
            };
            let drop = self.drop_item(item, amount, target, None, now);
            self.broadcast(ServerEvent::ItemThrown {
                drop,
                item,
                amount,
                from: origin,
                to: target,
            });
            thrown += 1;
        }
        Ok(thrown)
    }

    // ---- portals, waves, hooks ----

    pub fn add_portal(&self, portal: Portal) -> Result<()> {
        self.portals
            .lock()
            .map_err(|_| SimError::Poisoned("portals"))?
            .push(portal);
        self.broadcast(portal_event(&portal));
        Ok(())
    }

    pub fn portals(&self) -> Result<Vec<Portal>> {
        Ok(self
            .portals
            .lock()
            .map_err(|_| SimError::Poisoned("portals"))?
            .clone())
    }

    pub fn add_wave(&self, wave: WaveEvent, now: Instant) -> Result<()> {
        let remaining_offset = wave.offset;
        self.waves
            .lock()
            .map_err(|_| SimError::Poisoned("waves"))?
            .push(WaveState {
                wave,
                remaining_offset,
                last_start: now,
            });
        Ok(())
    }

    /// Hooks run each time the last hostile monster dies.
    pub fn on_cleared(&self, events: Vec<InstanceEvent>) -> Result<()> {
        self.clear_hooks
            .lock()
            .map_err(|_| SimError::Poisoned("clear hooks"))?
            .extend(events);
        Ok(())
    }

    pub fn run_events(&self, events: &[InstanceEvent], now: Instant) -> Result<()> {
        for event in events {
            match event {
                InstanceEvent::Spawn(specs) => {
                    self.spawn_entities(specs, now);
                }
                InstanceEvent::DespawnTemplate(template) => {
                    self.despawn_by_template(*template, now);
                }
                InstanceEvent::Message(text) => {
                    self.broadcast(ServerEvent::Message { text: text.clone() });
                }
                InstanceEvent::ThrowItems {
                    around,
                    item,
                    count,
                    min_amount,
                    max_amount,
                } => {
                    self.throw_items(*around, *item, *count, *min_amount, *max_amount, now)?;
                }
            }
        }
        Ok(())
    }

    fn run_waves(&self, now: Instant) -> Result<()> {
        let due: Vec<Vec<InstanceEvent>> = {
            let mut waves = self.waves.lock().map_err(|_| SimError::Poisoned("waves"))?;
            waves
                .iter_mut()
                .filter(|state| state.last_start + state.wave.delay <= now)
                .filter_map(|state| {
                    state.last_start = now;
                    if state.remaining_offset > 0 {
                        state.remaining_offset -= 1;
                        None
                    } else {
                        Some(state.wave.events.clone())
                    }
                })
                .collect()
        };
        for events in due {
            self.run_events(&events, now)?;
        }
        Ok(())
    }

    /// Fires clear hooks on the edge where the last hostile monster died.
    fn check_cleared(&self, now: Instant) -> Result<()> {
        if self.live_monster_count() > 0 {
            self.clear_armed.store(true, Ordering::Release);
            return Ok(());
        }
        if !self.clear_armed.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let hooks = self
            .clear_hooks
            .lock()
            .map_err(|_| SimError::Poisoned("clear hooks"))?
            .clone();
        tracing::info!(instance = %self.id(), hooks = hooks.len(), "instance cleared");
        self.run_events(&hooks, now)
    }

    /// Instance housekeeping. Failures are logged and the next tick runs normally.
    pub fn tick(&self, now: Instant) {
        if self.is_disposed() {
            return;
        }
        let sleeping = self.note_sleep_state(now);
        self.expire_character_buffs(now);
        if let Err(err) = self.run_waves(now) {
            tracing::error!(instance = %self.id(), error = %err, "wave events failed");
        }
        if let Err(err) = self.check_cleared(now) {
            tracing::error!(instance = %self.id(), error = %err, "clear hooks failed");
        }
        if !sleeping {
            let expired = self.expire_drops(now);
            if expired > 0 {
                tracing::trace!(instance = %self.id(), expired, "drops expired");
            }
        }
    }

    fn expire_character_buffs(&self, now: Instant) {
        for session in self.players() {
            let result = session.with_state(|state| {
                self.with_rng(|rng| state.buffs.expire_due(now, self.templates(), rng))
            });
            match result {
                Ok(expired) if !expired.is_empty() => {
                    tracing::trace!(instance = %self.id(), character = %session.id(), count = expired.len(), "character buffs expired");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(instance = %self.id(), character = %session.id(), error = %err, "character buffs not expired");
                }
            }
        }
    }

    pub fn dispose(&self) -> Vec<(Arc<PlayerSession>, Option<Fallback>)> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }
        for entity in self.entities() {
            entity.retire();
        }
        self.entities.clear();
        self.drops.clear();
        let players: Vec<CharacterId> = self.players.iter().map(|entry| *entry.key()).collect();
        let relocations = players
            .into_iter()
            .filter_map(|id| self.players.remove(&id))
            .map(|(_, session)| {
                let fallback = session
                    .with_state(|state| {
                        state.instance = None;
                        state.fallback
                    })
                    .ok()
                    .flatten();
                (session, fallback)
            })
            .collect::<Vec<_>>();
        tracing::info!(instance = %self.id(), relocated = relocations.len(), "instance disposed");
        relocations
    }
}

fn portal_event(portal: &Portal) -> ServerEvent {
    ServerEvent::PortalOpened {
        source: portal.source,
        destination: portal.destination,
        destination_cell: portal.destination_cell,
    }
}
