use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::combat::buffs::{BuffCatalog, BuffSet};
use crate::combat::damage::CombatSide;
use crate::combat::modifiers::ModifierSnapshot;
use crate::combat::resolver::{AttackerSnapshot, DefenderSnapshot};
use crate::entities::creature::{AbilityId, CharacterId, EntityId, TemplateId};
use crate::entities::hit::HitRequest;
use crate::entities::stats::Resources;
use crate::entities::template::{AbilityTemplate, EntityTemplate};
use crate::error::Result;
use crate::world::cron::TimerQueue;
use crate::world::events::{InstanceEvent, RespawnMode, ServerEvent, SpawnSpec};
use crate::world::position::Cell;

const WANDER_MIN_MS: u64 = 400;
const WANDER_MAX_MS: u64 = 3_200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeState {
    Spawning,
    Idle,
    Aggroed { target: CharacterId },
    Attacking { target: CharacterId },
    Dead { since: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Spawned,
    Noticed(CharacterId),
    Engaged,
    TargetLost,
    Killed(Instant),
    Respawned,
}

impl LifeState {
    /// The only way a life state changes. Transitions that make no sense for
    /// the current state leave it untouched.
    pub fn apply(self, transition: Transition) -> LifeState {
        use LifeState::*;
        match (self, transition) {
            (Dead { .. }, Transition::Respawned) => Idle,
            (dead @ Dead { .. }, _) => dead,
            (_, Transition::Killed(since)) => Dead { since },
            (Spawning, Transition::Spawned) => Idle,
            (Spawning, _) => Spawning,
            (_, Transition::Noticed(target)) => Aggroed { target },
            (Aggroed { target } | Attacking { target }, Transition::Engaged) => {
                Attacking { target }
            }
            (Aggroed { .. } | Attacking { .. }, Transition::TargetLost) => Idle,
            (state, _) => state,
        }
    }

    pub fn is_alive(self) -> bool {
        matches!(
            self,
            LifeState::Idle | LifeState::Aggroed { .. } | LifeState::Attacking { .. }
        )
    }

    pub fn target(self) -> Option<CharacterId> {
        match self {
            LifeState::Aggroed { target } | LifeState::Attacking { target } => Some(target),
            _ => None,
        }
    }
}

/// Damage per attacker, in order of first contribution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DamageLedger {
    entries: Vec<(CharacterId, u64)>,
}

impl DamageLedger {
    pub fn record(&mut self, character: CharacterId, damage: i32) {
        let damage = u64::try_from(damage).unwrap_or(0);
        match self.entries.iter_mut().find(|(id, _)| *id == character) {
            Some((_, total)) => *total = total.saturating_add(damage),
            None => self.entries.push((character, damage)),
        }
    }

    pub fn first(&self) -> Option<CharacterId> {
        self.entries.first().map(|(id, _)| *id)
    }

    pub fn get(&self, character: CharacterId) -> Option<u64> {
        self.entries
            .iter()
            .find(|(id, _)| *id == character)
            .map(|(_, total)| *total)
    }

    pub fn entries(&self) -> &[(CharacterId, u64)] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DelayedKey {
    SummonStrike(EntityId),
    CastHit,
    ReviveOffer(CharacterId),
}

#[derive(Debug, Clone)]
pub enum DelayedEffect {
    SummonStrike {
        summon: EntityId,
        owner: CharacterId,
        damage: i32,
    },
    /// Only lands if the entity is still in the life `epoch` that started the cast.
    CastHit {
        target: CharacterId,
        ability: Option<Arc<AbilityTemplate>>,
        epoch: u32,
    },
    ReviveOffer {
        character: CharacterId,
    },
}

#[derive(Debug, Clone)]
pub struct DeathReport {
    pub entity: EntityId,
    pub template: Arc<EntityTemplate>,
    pub cell: Cell,
    pub ledger: DamageLedger,
    pub on_death: Vec<InstanceEvent>,
    pub respawns: bool,
    pub is_bonus: bool,
}

#[derive(Debug)]
pub struct EntityBody {
    pub life: LifeState,
    /// Bumped on every death and respawn.
    pub epoch: u32,
    pub resources: Resources,
    pub cell: Cell,
    pub origin: Cell,
    pub respawns: bool,
    pub hostile: bool,
    pub moving: bool,
    pub notice_range: u8,
    pub is_boss: bool,
    pub is_bonus: bool,
    pub is_target: bool,
    pub buffs: BuffSet,
    pub ledger: DamageLedger,
    pub path: VecDeque<Cell>,
    pub path_goal: Option<Cell>,
    pub on_death: Vec<InstanceEvent>,
    pub on_notice: Vec<InstanceEvent>,
    pub delayed: TimerQueue<DelayedKey, DelayedEffect>,
    pub cooldowns: HashMap<AbilityId, Instant>,
    pub basic_ready_at: Instant,
    pub moving_until: Instant,
    pub next_wander: Instant,
    pub wander_interval: Duration,
    pub last_aggro_effect: Option<Instant>,
    pub rng: StdRng,
}

impl EntityBody {
    pub fn modifiers(&self, template: &EntityTemplate, now: Instant) -> ModifierSnapshot {
        let mut snapshot = ModifierSnapshot::from_modifiers(&template.modifiers, template.level);
        self.buffs.contribute(&mut snapshot, now);
        snapshot
    }

    pub fn defender_snapshot(&self, template: &EntityTemplate, now: Instant) -> DefenderSnapshot {
        DefenderSnapshot {
            level: template.level,
            defense: template.defense,
            element: template.element,
            resistances: template.resistances,
            cell: self.cell,
            modifiers: self.modifiers(template, now),
        }
    }

    pub fn attacker_snapshot(
        &self,
        template: &EntityTemplate,
        ability: Option<&AbilityTemplate>,
        now: Instant,
    ) -> AttackerSnapshot {
        let mut modifiers = self.modifiers(template, now);
        if let Some(ability) = ability {
            modifiers = modifiers.with_transient(&ability.modifiers, template.level);
        }
        AttackerSnapshot {
            side: CombatSide::Monster,
            level: template.level,
            profile: template.attack_profile(),
            element: template.element,
            element_rate: template.element_rate,
            base_bonus: 0,
            god_mode: false,
            cell: self.cell,
            modifiers,
        }
    }

    pub fn appearance(&self, id: EntityId, template: TemplateId, quiet: bool) -> ServerEvent {
        ServerEvent::EntityAppeared {
            entity: id,
            template,
            cell: self.cell,
            hp_percent: self.resources.hp_percent(),
            mp_percent: self.resources.mp_percent(),
            quiet,
        }
    }

    pub fn cooldown_ready(&self, ability: AbilityId, now: Instant) -> bool {
        self.cooldowns.get(&ability).map_or(true, |ready| now >= *ready)
    }

    pub fn transition(&mut self, transition: Transition) {
        self.life = self.life.apply(transition);
    }

    fn apply_cards<C: BuffCatalog + ?Sized>(
        &mut self,
        template: &EntityTemplate,
        catalog: &C,
        now: Instant,
    ) {
        for id in &template.cards {
            match catalog.buff_card(*id) {
                Some(card) => self.buffs.apply(card, template.level, now),
                None => tracing::warn!(template = %template.id, buff = %id, "template card missing"),
            }
        }
    }

    pub fn kill(&mut self, id: EntityId, template: &Arc<EntityTemplate>, now: Instant) -> DeathReport {
        self.transition(Transition::Killed(now));
        self.epoch = self.epoch.wrapping_add(1);
        self.path.clear();
        self.path_goal = None;
        self.delayed.stop(DelayedKey::CastHit);
        DeathReport {
            entity: id,
            template: Arc::clone(template),
            cell: self.cell,
            ledger: self.ledger.clone(),
            on_death: self.on_death.clone(),
            respawns: self.respawns,
            is_bonus: self.is_bonus,
        }
    }

    pub fn pending_summons(&self) -> Vec<EntityId> {
        self.delayed
            .keys()
            .filter_map(|key| match key {
                DelayedKey::SummonStrike(summon) => Some(summon),
                _ => None,
            })
            .collect()
    }

    pub fn take_summons(&mut self) -> Vec<EntityId> {
        let summons = self.pending_summons();
        for summon in &summons {
            self.delayed.stop(DelayedKey::SummonStrike(*summon));
        }
        summons
    }

    pub fn try_respawn<C: BuffCatalog + ?Sized>(
        &mut self,
        template: &EntityTemplate,
        catalog: &C,
        now: Instant,
    ) -> bool {
        let LifeState::Dead { since } = self.life else {
            return false;
        };
        if !self.respawns || now < since + template.respawn_delay() {
            return false;
        }
        self.transition(Transition::Respawned);
        self.epoch = self.epoch.wrapping_add(1);
        self.resources.restore_full();
        self.cell = self.origin;
        self.ledger.clear();
        self.path.clear();
        self.path_goal = None;
        self.delayed.clear();
        self.cooldowns.clear();
        self.buffs.clear();
        self.apply_cards(template, catalog, now);
        true
    }
}

#[derive(Debug)]
pub struct Entity {
    id: EntityId,
    template: Arc<EntityTemplate>,
    abilities: Vec<Arc<AbilityTemplate>>,
    hit_queue: SegQueue<HitRequest>,
    body: Mutex<EntityBody>,
    retired: AtomicBool,
}

impl Entity {
    pub fn spawn<C: BuffCatalog + ?Sized>(
        id: EntityId,
        template: Arc<EntityTemplate>,
        abilities: Vec<Arc<AbilityTemplate>>,
        spec: &SpawnSpec,
        cell: Cell,
        catalog: &C,
        seed: u64,
        now: Instant,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let wander_interval = Duration::from_millis(rng.gen_range(WANDER_MIN_MS..WANDER_MAX_MS));
        let respawns = match spec.respawn {
            RespawnMode::Inherit => template.respawn_time > 0,
            RespawnMode::Always => true,
            RespawnMode::Never => false,
        };
        let mut body = EntityBody {
            life: LifeState::Spawning,
            epoch: 0,
            resources: Resources::full(template.max_hp, template.max_mp),
            cell,
            origin: cell,
            respawns,
            hostile: spec.hostile.unwrap_or(template.hostile),
            moving: spec.moving.unwrap_or(template.can_walk),
            notice_range: spec.notice_range.unwrap_or(template.notice_range),
            is_boss: spec.is_boss,
            is_bonus: spec.is_bonus,
            is_target: spec.is_target,
            buffs: BuffSet::new(),
            ledger: DamageLedger::default(),
            path: VecDeque::new(),
            path_goal: None,
            on_death: spec.on_death.clone(),
            on_notice: spec.on_notice.clone(),
            delayed: TimerQueue::new(),
            cooldowns: HashMap::new(),
            basic_ready_at: now,
            moving_until: now,
            next_wander: now + wander_interval,
            wander_interval,
            last_aggro_effect: None,
            rng,
        };
        body.apply_cards(&template, catalog, now);
        body.transition(Transition::Spawned);
        if let Some(target) = spec.target {
            body.transition(Transition::Noticed(target));
        }
        Self {
            id,
            template,
            abilities,
            hit_queue: SegQueue::new(),
            body: Mutex::new(body),
            retired: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn template(&self) -> &Arc<EntityTemplate> {
        &self.template
    }

    pub fn abilities(&self) -> &[Arc<AbilityTemplate>] {
        &self.abilities
    }

    /// A body left poisoned by a panicking tick is taken over as is, so the
    /// entity keeps draining its queue on the next tick.
    pub fn with_body<R>(&self, f: impl FnOnce(&mut EntityBody) -> R) -> Result<R> {
        let mut body = match self.body.lock() {
            Ok(body) => body,
            Err(poisoned) => {
                tracing::warn!(entity = %self.id, "recovering poisoned entity body");
                self.body.clear_poison();
                poisoned.into_inner()
            }
        };
        Ok(f(&mut body))
    }

    /// Queues a character attack for the next tick. Requests that race with
    /// retirement are answered with a cancellation instead.
    pub fn enqueue_hit(&self, request: HitRequest) -> bool {
        if self.is_retired() {
            cancel(self.id, &request);
            return false;
        }
        self.hit_queue.push(request);
        if self.is_retired() {
            self.cancel_pending();
        }
        true
    }

    pub fn pop_hit(&self) -> Option<HitRequest> {
        self.hit_queue.pop()
    }

    pub fn queued_hits(&self) -> usize {
        self.hit_queue.len()
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        self.cancel_pending();
    }

    pub fn cancel_pending(&self) -> usize {
        let mut cancelled = 0;
        while let Some(request) = self.hit_queue.pop() {
            cancel(self.id, &request);
            cancelled += 1;
        }
        cancelled
    }

    pub fn appearance(&self, quiet: bool) -> Result<ServerEvent> {
        self.with_body(|body| body.appearance(self.id, self.template.id, quiet))
    }
}

fn cancel(entity: EntityId, request: &HitRequest) {
    request.attacker.send(ServerEvent::HitCancelled { entity });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::buffs::{BuffCard, BuffId};
    use crate::combat::damage::DamageClass;
    use crate::entities::player::{CharacterState, ClassType, PlayerSession};
    use std::collections::HashMap as Catalog;

    fn template(respawn_time: u32) -> Arc<EntityTemplate> {
        let mut template = EntityTemplate::new(TemplateId(1), 10, 100);
        template.respawn_time = respawn_time;
        template.cards = vec![BuffId(1)];
        Arc::new(template)
    }

    fn catalog() -> Catalog<BuffId, Arc<BuffCard>> {
        let card = BuffCard {
            id: BuffId(1),
            name: String::new(),
            duration_ms: 0,
            delay_ms: 0,
            modifiers: Vec::new(),
            timeout_buff: None,
            timeout_chance: 0,
        };
        Catalog::from([(BuffId(1), Arc::new(card))])
    }

    fn spawn(template: Arc<EntityTemplate>, spec: &SpawnSpec, now: Instant) -> Entity {
        Entity::spawn(
            EntityId(1),
            template,
            Vec::new(),
            spec,
            Cell::new(4, 4),
            &catalog(),
            7,
            now,
        )
    }

    #[test]
    fn transitions_keep_dead_entities_untargeted() {
        let now = Instant::now();
        let target = CharacterId(9);
        let state = LifeState::Idle.apply(Transition::Noticed(target));
        assert_eq!(state.target(), Some(target));
        let state = state.apply(Transition::Engaged);
        assert_eq!(state, LifeState::Attacking { target });
        let dead = state.apply(Transition::Killed(now));
        assert_eq!(dead.target(), None);
        assert_eq!(dead.apply(Transition::Noticed(target)), dead);
        assert_eq!(dead.apply(Transition::Engaged), dead);
        assert_eq!(dead.apply(Transition::Respawned), LifeState::Idle);
        assert_eq!(LifeState::Spawning.apply(Transition::Noticed(target)), LifeState::Spawning);
        assert_eq!(LifeState::Idle.apply(Transition::TargetLost), LifeState::Idle);
    }

    #[test]
    fn ledger_keeps_first_contribution_order() {
        let mut ledger = DamageLedger::default();
        ledger.record(CharacterId(2), 30);
        ledger.record(CharacterId(1), 50);
        ledger.record(CharacterId(2), 5);
        ledger.record(CharacterId(1), -4);
        assert_eq!(ledger.first(), Some(CharacterId(2)));
        assert_eq!(
            ledger.entries(),
            &[(CharacterId(2), 35), (CharacterId(1), 50)]
        );
    }

    #[test]
    fn respawn_waits_for_the_delay_and_happens_once() {
        let now = Instant::now();
        let template = template(50);
        let spec = SpawnSpec::at(template.id, Cell::new(4, 4));
        let entity = spawn(Arc::clone(&template), &spec, now);
        let catalog = catalog();

        entity
            .with_body(|body| {
                assert!(body.buffs.contains(BuffId(1)));
                body.cell = Cell::new(8, 8);
                body.resources.apply_damage(100);
                body.ledger.record(CharacterId(3), 100);
                body.kill(EntityId(1), &template, now);
                assert!(!body.try_respawn(&template, &catalog, now + Duration::from_secs(4)));
                assert!(body.try_respawn(&template, &catalog, now + Duration::from_secs(5)));
                assert!(!body.try_respawn(&template, &catalog, now + Duration::from_secs(6)));
                assert_eq!(body.cell, Cell::new(4, 4));
                assert_eq!(body.resources.hp, 100);
                assert!(body.ledger.is_empty());
                assert_eq!(body.life, LifeState::Idle);
                assert_eq!(body.epoch, 2);
                assert!(body.buffs.contains(BuffId(1)));
            })
            .unwrap();
    }

    #[test]
    fn inherited_respawn_follows_the_template() {
        let now = Instant::now();
        let spec = SpawnSpec::at(TemplateId(1), Cell::new(4, 4));
        let entity = spawn(template(0), &spec, now);
        assert!(!entity.with_body(|body| body.respawns).unwrap());
        let entity = spawn(template(10), &spec.clone().summoned(), now);
        assert!(!entity.with_body(|body| body.respawns).unwrap());
        let mut always = spec;
        always.respawn = RespawnMode::Always;
        let entity = spawn(template(0), &always, now);
        assert!(entity.with_body(|body| body.respawns).unwrap());
    }

    #[test]
    fn retired_entities_cancel_queued_hits() {
        let now = Instant::now();
        let entity = spawn(template(0), &SpawnSpec::at(TemplateId(1), Cell::new(4, 4)), now);
        let attacker = Arc::new(PlayerSession::new(CharacterState::new(
            CharacterId(5),
            "p",
            ClassType::Swordsman,
            10,
        )));
        let ability = Arc::new(AbilityTemplate::new(AbilityId(1), DamageClass::Melee));
        assert!(entity.enqueue_hit(HitRequest::single(Arc::clone(&attacker), Arc::clone(&ability))));
        assert!(entity.enqueue_hit(HitRequest::single(Arc::clone(&attacker), Arc::clone(&ability))));
        entity.retire();
        assert!(!entity.enqueue_hit(HitRequest::single(Arc::clone(&attacker), ability)));
        assert_eq!(entity.queued_hits(), 0);
        let cancelled = attacker
            .drain_outbox()
            .into_iter()
            .filter(|event| matches!(event, ServerEvent::HitCancelled { entity } if *entity == EntityId(1)))
            .count();
        assert_eq!(cancelled, 3);
    }
}
