use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::combat::buffs::BuffCatalog;
use crate::combat::damage::HitMode;
use crate::combat::modifiers::{sub, CardKind};
use crate::combat::resolver::{resolve, AbilityProfile, AttackerSnapshot, DamageOutcome};
use crate::entities::creature::{CharacterId, EntityId};
use crate::entities::entity::{DeathReport, DelayedEffect, DelayedKey, Entity, EntityBody, Transition};
use crate::entities::hit::HitRequest;
use crate::entities::player::PlayerSession;
use crate::entities::template::AbilityTemplate;
use crate::world::events::{Actor, InstanceEvent, ServerEvent, SpawnSpec};
use crate::world::map_instance::MapInstance;
use crate::world::position::Cell;

const MAX_STEP_TIME: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct SummonRequest {
    owner: CharacterId,
    cell: Cell,
    damage: i32,
}

/// Follow-up work of one tick that must run without the body lock.
#[derive(Debug, Default)]
pub struct TickReport {
    deaths: Vec<DeathReport>,
    hooks: Vec<InstanceEvent>,
    summons: Vec<SummonRequest>,
    despawns: Vec<EntityId>,
}

pub fn tick_entity(instance: &MapInstance, entity: &Entity, now: Instant) -> bool {
    if entity.is_retired() || instance.is_disposed() {
        entity.cancel_pending();
        return false;
    }
    let report = match entity.with_body(|body| run_tick(instance, entity, body, now)) {
        Ok(report) => report,
        Err(err) => {
            tracing::error!(instance = %instance.id(), entity = %entity.id(), error = %err, "entity tick failed");
            return true;
        }
    };

    for summon in report.summons {
        spawn_summon(instance, entity, summon, now);
    }
    for death in report.deaths {
        instance.handle_death(death, now);
    }
    if !report.hooks.is_empty() {
        if let Err(err) = instance.run_events(&report.hooks, now) {
            tracing::error!(instance = %instance.id(), entity = %entity.id(), error = %err, "notice hook failed");
        }
    }
    instance.despawn_summons(report.despawns, now);
    !entity.is_retired()
}

fn run_tick(instance: &MapInstance, entity: &Entity, body: &mut EntityBody, now: Instant) -> TickReport {
    let mut report = TickReport::default();
    let template = entity.template();

    // Only what was queued when the tick started; later requests wait a tick.
    for _ in 0..entity.queued_hits() {
        let Some(request) = entity.pop_hit() else {
            break;
        };
        apply_player_hit(instance, entity, body, request, now, &mut report);
    }

    while let Some((_, effect)) = body.delayed.pop_ready(now) {
        run_delayed(instance, entity, body, effect, now, &mut report);
    }

    let expired = body.buffs.expire_due(now, instance.templates(), &mut body.rng);
    if !expired.is_empty() {
        tracing::trace!(entity = %entity.id(), count = expired.len(), "buffs expired");
    }

    if !body.life.is_alive() {
        let summons = body.pending_summons();
        if body.try_respawn(template, instance.templates(), now) {
            report.despawns.extend(summons);
            instance.broadcast(body.appearance(entity.id(), template.id, false));
            tracing::debug!(instance = %instance.id(), entity = %entity.id(), "entity respawned");
        }
        return report;
    }

    if instance.is_sleeping(now) {
        return report;
    }

    advance_movement(instance, entity, body, now);
    if body.hostile && body.life.target().is_none() {
        acquire_target(instance, entity, body, now, &mut report);
    }
    if let Some(target) = body.life.target() {
        pursue(instance, entity, body, target, now);
    }
    report
}

fn cancel(entity: EntityId, request: &HitRequest) {
    request.attacker.send(ServerEvent::HitCancelled { entity });
}

fn apply_player_hit(
    instance: &MapInstance,
    entity: &Entity,
    body: &mut EntityBody,
    request: HitRequest,
    now: Instant,
    report: &mut TickReport,
) {
    let id = entity.id();
    let template = entity.template();
    if !body.life.is_alive() || !request.attacker.is_connected() {
        cancel(id, &request);
        return;
    }
    let rules = instance.rules();
    let snapshot = request.attacker.with_state(|state| {
        state
            .is_alive()
            .then(|| (state.attacker_snapshot(&request.ability, rules, now), state.level))
    });
    let Ok(Some((attacker, attacker_level))) = snapshot else {
        cancel(id, &request);
        return;
    };
    let attacker_id = request.attacker.id();

    let defender = body.defender_snapshot(template, now);
    let mut outcome = resolve(
        &attacker,
        &defender,
        &request.ability.profile(),
        rules,
        &mut body.rng,
    );
    if request.kind.is_area() {
        outcome.hit_mode = outcome.hit_mode.for_area();
    }
    body.resources.apply_damage(outcome.damage);
    body.ledger.record(attacker_id, outcome.damage);

    let alive = !body.resources.is_depleted();
    // a killing blow leaves nothing for the summon to strike
    if alive && outcome.special_proc && !outcome.hit_mode.is_miss() {
        report.summons.push(SummonRequest {
            owner: attacker_id,
            cell: attacker.cell.offset(2, 2),
            damage: outcome.damage / 2,
        });
    }

    if alive && body.life.target().is_none() {
        if let Some(target) = nearest_contributor(instance, body) {
            body.transition(Transition::Noticed(target));
        }
    }

    let (animation, effect) = request.visuals();
    instance.broadcast(ServerEvent::Hit {
        attacker: Actor::Character(attacker_id),
        target: Actor::Entity(id),
        ability: Some(request.ability.id),
        cooldown: request.ability.cooldown,
        animation,
        effect,
        cell: request.target_cell.unwrap_or(body.cell),
        target_alive: alive,
        hp_percent: body.resources.hp_percent(),
        damage: outcome.damage,
        hit_mode: outcome.hit_mode.code(),
    });

    if !alive {
        report.deaths.push(body.kill(id, template, now));
        return;
    }
    if body.is_boss {
        instance.broadcast(ServerEvent::BossHealth {
            entity: id,
            hp: body.resources.hp,
            max_hp: body.resources.max_hp,
        });
    } else {
        for buff in &request.ability.buffs {
            if let Some(card) = instance.templates().buff_card(*buff) {
                body.buffs.apply(card, attacker_level, now);
            }
        }
    }
}

/// Closest contributor still on the instance, ledger order breaking ties.
fn nearest_contributor(instance: &MapInstance, body: &EntityBody) -> Option<CharacterId> {
    let limit = instance.rules().retarget_distance;
    let mut best: Option<(u32, CharacterId)> = None;
    for &(character, _) in body.ledger.entries() {
        let Some(session) = instance.player(character) else {
            continue;
        };
        let Ok(Some(cell)) = session.with_state(|state| state.is_targetable().then_some(state.cell))
        else {
            continue;
        };
        let distance = body.cell.distance(cell);
        if distance < limit && best.map_or(true, |(closest, _)| distance < closest) {
            best = Some((distance, character));
        }
    }
    best.map(|(_, character)| character)
}

fn run_delayed(
    instance: &MapInstance,
    entity: &Entity,
    body: &mut EntityBody,
    effect: DelayedEffect,
    now: Instant,
    report: &mut TickReport,
) {
    match effect {
        DelayedEffect::SummonStrike {
            summon,
            owner,
            damage,
        } => {
            report.despawns.push(summon);
            if !body.life.is_alive() {
                return;
            }
            body.resources.apply_damage(damage);
            body.ledger.record(owner, damage);
            let alive = !body.resources.is_depleted();
            instance.broadcast(ServerEvent::Hit {
                attacker: Actor::Entity(summon),
                target: Actor::Entity(entity.id()),
                ability: None,
                cooldown: 0,
                animation: 0,
                effect: 0,
                cell: body.cell,
                target_alive: alive,
                hp_percent: body.resources.hp_percent(),
                damage,
                hit_mode: HitMode::Normal.code(),
            });
            if !alive {
                report.deaths.push(body.kill(entity.id(), entity.template(), now));
            }
        }
        DelayedEffect::CastHit {
            target,
            ability,
            epoch,
        } => {
            if epoch == body.epoch && body.life.is_alive() {
                land_attack(instance, entity, body, target, ability.as_deref(), now);
            }
        }
        DelayedEffect::ReviveOffer { character } => {
            instance.send_to(character, ServerEvent::ReviveOffer { character });
        }
    }
}

fn spawn_summon(instance: &MapInstance, entity: &Entity, summon: SummonRequest, now: Instant) {
    let mut spec = SpawnSpec::at(instance.proc_summon(), summon.cell).summoned();
    spec.hostile = Some(false);
    spec.moving = Some(false);
    let Some(&summon_id) = instance.spawn_entities(&[spec], now).first() else {
        return;
    };
    instance.broadcast(ServerEvent::SummonAppeared {
        owner: summon.owner,
        cell: summon.cell,
    });
    let due = now + instance.rules().summon_strike_delay;
    let scheduled = entity.with_body(|body| {
        body.delayed.set(
            DelayedKey::SummonStrike(summon_id),
            due,
            DelayedEffect::SummonStrike {
                summon: summon_id,
                owner: summon.owner,
                damage: summon.damage,
            },
        );
    });
    if let Err(err) = scheduled {
        tracing::warn!(entity = %entity.id(), error = %err, "summon strike not scheduled");
        instance.despawn_entity(summon_id, now);
    }
}

fn travel_time(distance: u32, speed: u8) -> Duration {
    Duration::from_millis(u64::from(distance) * 1_000 / u64::from(speed.max(1))).min(MAX_STEP_TIME)
}

fn advance_movement(instance: &MapInstance, entity: &Entity, body: &mut EntityBody, now: Instant) {
    let template = entity.template();
    if !body.moving || template.speed == 0 || now < body.moving_until {
        return;
    }
    if body
        .modifiers(template, now)
        .has(CardKind::Move, sub::movement::IMPOSSIBLE)
    {
        return;
    }

    if !body.path.is_empty() {
        let start = body.cell;
        let steps = (template.speed / 2).max(1);
        for _ in 0..steps {
            match body.path.pop_front() {
                Some(next) => body.cell = next,
                None => break,
            }
        }
        body.moving_until = now + travel_time(start.distance(body.cell), template.speed);
        instance.broadcast(ServerEvent::EntityMoved {
            entity: entity.id(),
            cell: body.cell,
            speed: template.speed,
        });
        return;
    }

    if body.life.target().is_some() || now < body.next_wander {
        return;
    }
    body.next_wander = now + body.wander_interval;
    let origin = body.origin;
    let radius = body.rng.gen_range(0..=1u8);
    let Some(cell) = instance
        .grid()
        .random_free_cell_near(origin, radius, radius, &mut body.rng)
    else {
        return;
    };
    let distance = u64::from(body.cell.distance(cell));
    body.cell = cell;
    body.moving_until =
        now + Duration::from_millis(1_000 * distance / (2 * u64::from(template.speed)));
    instance.broadcast(ServerEvent::EntityMoved {
        entity: entity.id(),
        cell,
        speed: template.speed,
    });
}

fn acquire_target(
    instance: &MapInstance,
    entity: &Entity,
    body: &mut EntityBody,
    now: Instant,
    report: &mut TickReport,
) {
    let template = entity.template();
    let candidate = instance
        .characters_in_range(body.cell, body.notice_range)
        .into_iter()
        .find(|session| {
            session.is_connected()
                && session
                    .with_state(|state| {
                        state.is_targetable()
                            && !state.god_mode
                            && template.faction.can_engage(state.faction)
                    })
                    .unwrap_or(false)
        });
    let Some(session) = candidate else {
        return;
    };

    if !body.on_notice.is_empty() {
        report.hooks.append(&mut body.on_notice);
        return;
    }

    body.transition(Transition::Noticed(session.id()));
    body.path.clear();
    body.path_goal = None;
    tracing::trace!(entity = %entity.id(), character = %session.id(), "target acquired");

    let rules = instance.rules();
    let cue_due = body
        .last_aggro_effect
        .map_or(true, |last| now.saturating_duration_since(last) >= rules.aggro_effect_interval);
    if !template.no_aggro_icon && cue_due {
        body.last_aggro_effect = Some(now);
        instance.broadcast(ServerEvent::Effect {
            actor: Actor::Entity(entity.id()),
            effect: rules.aggro_effect_id,
        });
    }
}

fn lose_target(instance: &MapInstance, body: &mut EntityBody) {
    body.transition(Transition::TargetLost);
    body.path.clear();
    body.path_goal = None;
    if !body.moving || body.cell == body.origin {
        return;
    }
    match instance.pathfinder().find_path(body.cell, body.origin) {
        Ok(path) => {
            body.path = path.into();
            body.path_goal = Some(body.origin);
        }
        Err(err) => tracing::trace!(error = %err, "no way back to origin"),
    }
}

fn pursue(
    instance: &MapInstance,
    entity: &Entity,
    body: &mut EntityBody,
    target: CharacterId,
    now: Instant,
) {
    let template = entity.template();
    let session = instance.player(target).filter(|session| session.is_connected());
    let target_cell = session.as_ref().and_then(|session| {
        session
            .with_state(|state| {
                (state.is_targetable() && state.instance == Some(instance.id())).then_some(state.cell)
            })
            .ok()
            .flatten()
    });
    let (Some(session), Some(target_cell)) = (session, target_cell) else {
        lose_target(instance, body);
        return;
    };
    let distance = body.cell.distance(target_cell);

    let ability = if body.rng.gen_range(0..=10u32) > instance.rules().skill_roll_threshold {
        let ready: Vec<&Arc<AbilityTemplate>> = entity
            .abilities()
            .iter()
            .filter(|ability| body.cooldown_ready(ability.id, now))
            .collect();
        ready.choose(&mut body.rng).map(|ability| Arc::clone(ability))
    } else {
        None
    };
    if let Some(ability) = ability {
        let in_range = ability.casts_immediately() || distance < u32::from(ability.range);
        if in_range && body.resources.mp >= ability.mp_cost {
            start_attack(instance, entity, body, &session, Some(ability), now);
            return;
        }
    }

    if distance <= u32::from(template.basic_range) {
        start_attack(instance, entity, body, &session, None, now);
        return;
    }
    if !body.moving {
        return;
    }
    if body.path.is_empty() || body.path_goal != Some(target_cell) {
        match instance.pathfinder().find_path(body.cell, target_cell) {
            Ok(mut path) => {
                // stop next to the target, not on it
                path.pop();
                body.path = path.into();
                body.path_goal = Some(target_cell);
            }
            Err(err) => {
                tracing::debug!(entity = %entity.id(), character = %target, error = %err, "lost path to target");
                lose_target(instance, body);
            }
        }
    }
}

fn start_attack(
    instance: &MapInstance,
    entity: &Entity,
    body: &mut EntityBody,
    session: &Arc<PlayerSession>,
    ability: Option<Arc<AbilityTemplate>>,
    now: Instant,
) {
    let template = entity.template();
    let rules = instance.rules();
    if body.delayed.contains(DelayedKey::CastHit)
        || body
            .modifiers(template, now)
            .has(CardKind::SpecialAttack, sub::special_attack::NO_ATTACK)
    {
        return;
    }
    let target = session.id();
    let delay = match &ability {
        Some(ability) => {
            if !body.resources.spend_mp(ability.mp_cost) {
                return;
            }
            body.cooldowns
                .insert(ability.id, now + rules.ability_cooldown(ability.cooldown));
            instance.broadcast(ServerEvent::CastStarted {
                caster: Actor::Entity(entity.id()),
                target: Actor::Character(target),
                ability: ability.id,
                animation: ability.cast_animation,
                effect: ability.cast_effect,
            });
            rules.cast_delay(ability.cast_time)
        }
        None => {
            if now < body.basic_ready_at {
                return;
            }
            body.basic_ready_at = now + rules.basic_attack_cooldown(template.basic_cooldown);
            Duration::ZERO
        }
    };
    body.transition(Transition::Engaged);
    body.path.clear();
    body.path_goal = None;

    if delay.is_zero() {
        land_attack(instance, entity, body, target, ability.as_deref(), now);
    } else {
        let epoch = body.epoch;
        body.delayed.set(
            DelayedKey::CastHit,
            now + delay,
            DelayedEffect::CastHit {
                target,
                ability,
                epoch,
            },
        );
    }
}

fn land_attack(
    instance: &MapInstance,
    entity: &Entity,
    body: &mut EntityBody,
    target: CharacterId,
    ability: Option<&AbilityTemplate>,
    now: Instant,
) {
    let Some(session) = instance.player(target) else {
        return;
    };
    let template = entity.template();
    let attacker = body.attacker_snapshot(template, ability, now);
    let profile = ability.map_or_else(|| template.basic_ability(), AbilityTemplate::profile);
    let struck = strike_character(
        instance, entity, body, &attacker, &profile, &session, ability, false, now,
    );
    let Some(target_cell) = struck else {
        return;
    };

    let Some(ability) = ability.filter(|ability| ability.is_area()) else {
        return;
    };
    let (center, radius) = if ability.target_range == 0 {
        (body.cell, ability.range)
    } else {
        (target_cell, ability.target_range)
    };
    for other in instance.characters_in_range(center, radius) {
        if other.id() == target {
            continue;
        }
        let eligible = other
            .with_state(|state| state.is_alive() && !state.gm_invisible)
            .unwrap_or(false);
        if eligible {
            strike_character(
                instance,
                entity,
                body,
                &attacker,
                &profile,
                &other,
                Some(ability),
                true,
                now,
            );
        }
    }
}

/// Applies one entity hit to a character. Returns the character's cell when
/// the hit landed.
#[allow(clippy::too_many_arguments)]
fn strike_character(
    instance: &MapInstance,
    entity: &Entity,
    body: &mut EntityBody,
    attacker: &AttackerSnapshot,
    profile: &AbilityProfile,
    session: &Arc<PlayerSession>,
    ability: Option<&AbilityTemplate>,
    area: bool,
    now: Instant,
) -> Option<Cell> {
    let template = entity.template();
    let rules = instance.rules();
    let instance_id = instance.id();
    let rng = &mut body.rng;
    let struck = session
        .with_state(|state| {
            if !state.is_alive() || state.instance != Some(instance_id) {
                return None;
            }
            let mut outcome = if state.god_mode {
                DamageOutcome::MISSED
            } else {
                resolve(attacker, &state.defender_snapshot(now), profile, rules, rng)
            };
            if area {
                outcome.hit_mode = outcome.hit_mode.for_area();
            }
            state.resources.apply_damage(outcome.damage);
            let stood_up = std::mem::replace(&mut state.sitting, false);
            for buff in ability.map(|ability| ability.buffs.as_slice()).unwrap_or_default() {
                if let Some(card) = instance.templates().buff_card(*buff) {
                    state.buffs.apply(card, template.level, now);
                }
            }
            Some((
                outcome,
                stood_up,
                state.is_alive(),
                state.resources.hp_percent(),
                state.stat_update(),
                state.cell,
            ))
        })
        .ok()
        .flatten()?;
    let (outcome, stood_up, alive, hp_percent, stats, cell) = struck;
    let character = session.id();

    if stood_up {
        instance.broadcast(ServerEvent::StoodUp { character });
    }
    session.send(stats);
    instance.broadcast(ServerEvent::Hit {
        attacker: Actor::Entity(entity.id()),
        target: Actor::Character(character),
        ability: ability.map(|ability| ability.id),
        cooldown: ability.map_or(template.basic_cooldown, |ability| ability.cooldown),
        animation: ability.map_or(0, |ability| ability.attack_animation),
        effect: ability.map_or(template.basic_effect, |ability| ability.effect),
        cell,
        target_alive: alive,
        hp_percent,
        damage: outcome.damage,
        hit_mode: outcome.hit_mode.code(),
    });

    if !alive {
        if body.life.target() == Some(character) {
            body.transition(Transition::TargetLost);
            body.path.clear();
            body.path_goal = None;
        }
        body.delayed.set(
            DelayedKey::ReviveOffer(character),
            now + rules.revive_offer_delay,
            DelayedEffect::ReviveOffer { character },
        );
        tracing::debug!(entity = %entity.id(), %character, "character knocked out");
    }
    Some(cell)
}
