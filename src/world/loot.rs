use std::time::Instant;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::combat::modifiers::{sub, CardKind};
use crate::entities::creature::{ItemId, MapInstanceKind, MonsterType};
use crate::entities::entity::DeathReport;
use crate::entities::template::EntityTemplate;
use crate::world::events::ServerEvent;
use crate::world::map_instance::MapInstance;

pub const GOLD_ITEM: ItemId = ItemId(1046);
const MAX_DROPS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rates {
    pub xp: f64,
    pub drop: f64,
    pub gold: f64,
    pub gold_drop: f64,
}

impl Default for Rates {
    fn default() -> Self {
        Self {
            xp: 1.0,
            drop: 1.0,
            gold: 1.0,
            gold_drop: 1.0,
        }
    }
}

pub fn experience_reward(
    template: &EntityTemplate,
    character_level: u16,
    xp_rate: f64,
    item_bonus: i32,
    first_hit: bool,
    max_level: u16,
) -> u64 {
    if character_level >= max_level {
        return 0;
    }
    let difference = i32::from(character_level) - i32::from(template.level);
    let base = if difference < 5 {
        template.xp
    } else {
        template.xp / 3 * 2
    };
    let mut xp = (base as f64 * xp_rate).round() as u64;
    if difference < -20 {
        xp /= 10;
    }
    if character_level <= 5 && difference < -4 {
        xp += xp / 2;
    }
    if template.level >= 75 {
        xp *= 2;
    }
    if template.level >= 100 {
        xp *= 2;
        if character_level < 96 {
            xp = 1;
        }
    }
    let share = if first_hit { xp as f64 } else { xp as f64 / 3.0 };
    (share * (1.0 + f64::from(item_bonus) / 100.0)).max(0.0) as u64
}

pub fn roll_drops<R: Rng + ?Sized>(
    template: &EntityTemplate,
    kind: MapInstanceKind,
    drop_rate: f64,
    rng: &mut R,
) -> Vec<(ItemId, u32)> {
    let mut entries: Vec<_> = template
        .loot
        .iter()
        .filter(|entry| entry.allowed_on(kind))
        .collect();
    entries.shuffle(rng);
    let mut drops = Vec::new();
    for entry in entries {
        if drops.len() >= MAX_DROPS {
            break;
        }
        let roll = f64::from(rng.gen_range(0..100u32)) * rng.gen::<f64>();
        if roll <= f64::from(entry.chance) * drop_rate / 5_000.0 {
            drops.push((entry.item, entry.amount));
        }
    }
    drops
}

pub fn roll_gold<R: Rng + ?Sized>(
    level: u16,
    kind: MapInstanceKind,
    rates: &Rates,
    rng: &mut R,
) -> Option<u32> {
    if !kind.drops_gold() {
        return None;
    }
    let roll = f64::from(rng.gen_range(0..100u32)) * rng.gen::<f64>();
    if roll > rates.gold_drop * 10.0 {
        return None;
    }
    let low = 6 * u32::from(level);
    let high = (12 * u32::from(level)).max(low + 1);
    let amount = (f64::from(rng.gen_range(low..high)) * rates.gold) as u32;
    (amount > 0).then_some(amount)
}

/// Pays out experience to every contributor still on the instance and
/// places drops owned by the first contributor.
pub fn grant_rewards(instance: &MapInstance, report: &DeathReport, now: Instant) {
    let Some(first) = report.ledger.first() else {
        return;
    };
    let template = &report.template;

    if template.monster_type != MonsterType::Special {
        let kind = instance.kind();
        let drop_rate = instance.drop_rate();
        let rates = instance.rates();
        let (drops, gold) = instance.with_rng(|rng| {
            (
                roll_drops(template, kind, drop_rate, rng),
                roll_gold(template.level, kind, &rates, rng),
            )
        });
        for (item, amount) in drops {
            instance.drop_near(report.cell, item, amount, Some(first), now);
        }
        if let Some(amount) = gold {
            instance.drop_near(report.cell, GOLD_ITEM, amount, Some(first), now);
        }
    }

    let xp_rate = instance.xp_rate();
    let max_level = instance.max_level();
    for &(character, _) in report.ledger.entries() {
        let Some(session) = instance.player(character) else {
            continue;
        };
        let first_hit = character == first;
        let gained = session.with_state(|state| {
            if !state.is_alive() {
                return None;
            }
            let bonus = state
                .modifiers(now)
                .value(CardKind::Item, sub::item::EXP_INCREASED);
            let amount =
                experience_reward(template, state.level, xp_rate, bonus, first_hit, max_level);
            state.experience = state.experience.saturating_add(amount);
            Some(amount)
        });
        match gained {
            Ok(Some(amount)) => {
                if !first_hit {
                    session.send(ServerEvent::NotFirstHit { character });
                }
                session.send(ServerEvent::ExperienceGained { character, amount });
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(%character, error = %err, "experience not granted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::creature::TemplateId;
    use crate::entities::template::LootEntry;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn template(level: u16, xp: u64) -> EntityTemplate {
        let mut template = EntityTemplate::new(TemplateId(1), level, 100);
        template.xp = xp;
        template
    }

    #[test]
    fn experience_scales_with_level_gap() {
        let even = template(20, 300);
        assert_eq!(experience_reward(&even, 20, 1.0, 0, true, 99), 300);
        assert_eq!(experience_reward(&even, 20, 1.0, 0, false, 99), 100);
        assert_eq!(experience_reward(&even, 25, 1.0, 0, true, 99), 200);
        assert_eq!(experience_reward(&even, 20, 2.0, 50, true, 99), 900);
        assert_eq!(experience_reward(&template(50, 300), 20, 1.0, 0, true, 99), 30);
        assert_eq!(experience_reward(&template(10, 100), 3, 1.0, 0, true, 99), 150);
        assert_eq!(experience_reward(&template(80, 100), 80, 1.0, 0, true, 99), 200);
        assert_eq!(experience_reward(&template(100, 100), 90, 1.0, 0, true, 99), 1);
        assert_eq!(experience_reward(&template(100, 100), 97, 1.0, 0, true, 99), 400);
        assert_eq!(experience_reward(&even, 99, 1.0, 0, true, 99), 0);
    }

    #[test]
    fn drops_respect_map_kind_and_cap() {
        let mut template = template(10, 0);
        for item in 0..8 {
            template.loot.push(LootEntry {
                item: ItemId(item),
                amount: 1,
                chance: 1_000_000,
                map_kinds: Vec::new(),
            });
        }
        template.loot.push(LootEntry {
            item: ItemId(99),
            amount: 1,
            chance: 1_000_000,
            map_kinds: vec![MapInstanceKind::Raid],
        });
        let mut rng = StdRng::seed_from_u64(1);
        let drops = roll_drops(&template, MapInstanceKind::Base, 1.0, &mut rng);
        assert_eq!(drops.len(), 4);
        assert!(drops.iter().all(|(item, _)| *item != ItemId(99)));

        template.loot.clear();
        assert!(roll_drops(&template, MapInstanceKind::Base, 1.0, &mut rng).is_empty());
    }

    #[test]
    fn gold_only_on_gold_maps() {
        let rates = Rates {
            gold_drop: 100.0,
            ..Rates::default()
        };
        let mut rng = StdRng::seed_from_u64(2);
        assert!(roll_gold(10, MapInstanceKind::Raid, &rates, &mut rng).is_none());
        let amount = roll_gold(10, MapInstanceKind::Base, &rates, &mut rng).expect("gold");
        assert!((60..120).contains(&amount));
    }
}
