use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::combat::damage::{
    attack_level_modifier, defense_level_modifier, dodge_chance, element_boost,
    monster_level_bonus, remap_unelemented, CombatSide, DamageClass, Element, HitMode,
};
use crate::combat::modifiers::{sub, CardKind, ModifierSnapshot};
use crate::combat::rules::CombatRules;
use crate::world::position::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttackProfile {
    pub min_hit: i32,
    pub max_hit: i32,
    pub hit_rate: i32,
    pub crit_chance: i32,
    pub crit_rate: i32,
    #[serde(default)]
    pub upgrade: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DefenseProfile {
    pub melee: i32,
    pub ranged: i32,
    pub magic: i32,
    pub melee_dodge: i32,
    pub ranged_dodge: i32,
    #[serde(default)]
    pub upgrade: i32,
}

impl DefenseProfile {
    pub fn defense(&self, class: DamageClass) -> i32 {
        match class {
            DamageClass::Melee => self.melee,
            DamageClass::Ranged => self.ranged,
            DamageClass::Magic => self.magic,
        }
    }

    pub fn dodge(&self, class: DamageClass) -> i32 {
        match class {
            DamageClass::Melee => self.melee_dodge,
            DamageClass::Ranged => self.ranged_dodge,
            DamageClass::Magic => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementResistances {
    pub fire: i32,
    pub water: i32,
    pub light: i32,
    pub dark: i32,
}

impl ElementResistances {
    pub fn against(&self, element: Element) -> i32 {
        match element {
            Element::None => 0,
            Element::Fire => self.fire,
            Element::Water => self.water,
            Element::Light => self.light,
            Element::Dark => self.dark,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttackerSnapshot {
    pub side: CombatSide,
    pub level: u16,
    pub profile: AttackProfile,
    pub element: Element,
    pub element_rate: i32,
    /// Flat damage added after the base roll (class bonuses).
    pub base_bonus: i32,
    pub god_mode: bool,
    pub cell: Cell,
    pub modifiers: ModifierSnapshot,
}

#[derive(Debug, Clone)]
pub struct DefenderSnapshot {
    pub level: u16,
    pub defense: DefenseProfile,
    pub element: Element,
    pub resistances: ElementResistances,
    pub cell: Cell,
    pub modifiers: ModifierSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AbilityProfile {
    pub class: DamageClass,
    pub element: Element,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DamageOutcome {
    pub damage: i32,
    pub hit_mode: HitMode,
    pub special_proc: bool,
}

impl DamageOutcome {
    pub const MISSED: Self = Self {
        damage: 0,
        hit_mode: HitMode::Miss,
        special_proc: false,
    };
}

fn class_pair(class: DamageClass, melee: (u8, u8), ranged: (u8, u8), magic: (u8, u8)) -> (u8, u8) {
    match class {
        DamageClass::Melee => melee,
        DamageClass::Ranged => ranged,
        DamageClass::Magic => magic,
    }
}

fn element_pair(element: Element) -> Option<(u8, u8)> {
    use sub::element::*;
    match element {
        Element::None => None,
        Element::Fire => Some((FIRE_INCREASED, FIRE_DECREASED)),
        Element::Water => Some((WATER_INCREASED, WATER_DECREASED)),
        Element::Light => Some((LIGHT_INCREASED, LIGHT_DECREASED)),
        Element::Dark => Some((DARK_INCREASED, DARK_DECREASED)),
    }
}

fn morale(level: u16, modifiers: &ModifierSnapshot) -> i32 {
    i32::from(level)
        + modifiers.net(
            CardKind::Morale,
            sub::morale::INCREASED,
            sub::morale::DECREASED,
        )
}

fn scale_percent(value: i32, percent: i32) -> i32 {
    (f64::from(value) * (1.0 + f64::from(percent) / 100.0)) as i32
}

fn scale_fraction(value: i32, fraction: f64) -> i32 {
    value.saturating_add((f64::from(value) * fraction) as i32)
}

pub fn resolve<R: Rng + ?Sized>(
    attacker: &AttackerSnapshot,
    defender: &DefenderSnapshot,
    ability: &AbilityProfile,
    rules: &CombatRules,
    rng: &mut R,
) -> DamageOutcome {
    let class = ability.class;
    let att = &attacker.modifiers;
    let def = &defender.modifiers;

    let (atk_inc, atk_dec) = class_pair(
        class,
        (sub::attack_power::MELEE_INCREASED, sub::attack_power::MELEE_DECREASED),
        (sub::attack_power::RANGED_INCREASED, sub::attack_power::RANGED_DECREASED),
        (sub::attack_power::MAGIC_INCREASED, sub::attack_power::MAGIC_DECREASED),
    );
    let flat_boost = att.net(
        CardKind::AttackPower,
        sub::attack_power::ALL_INCREASED,
        sub::attack_power::ALL_DECREASED,
    ) + att.net(CardKind::AttackPower, atk_inc, atk_dec);

    let (dmg_inc, dmg_dec) = class_pair(
        class,
        (sub::damage::MELEE_INCREASED, sub::damage::MELEE_DECREASED),
        (sub::damage::RANGED_INCREASED, sub::damage::RANGED_DECREASED),
        (sub::damage::MAGIC_INCREASED, sub::damage::MAGIC_DECREASED),
    );
    let percent_boost = att.net(
        CardKind::Damage,
        sub::damage::ALL_INCREASED,
        sub::damage::ALL_DECREASED,
    ) + att.net(CardKind::Damage, dmg_inc, dmg_dec);

    let profile = attacker.profile;
    let min_hit = scale_percent(profile.min_hit + flat_boost, percent_boost);
    let max_hit = scale_percent(profile.max_hit + flat_boost, percent_boost).max(min_hit);

    let (def_inc, def_dec) = class_pair(
        class,
        (sub::defence::MELEE_INCREASED, sub::defence::MELEE_DECREASED),
        (sub::defence::RANGED_INCREASED, sub::defence::RANGED_DECREASED),
        (sub::defence::MAGIC_INCREASED, sub::defence::MAGIC_DECREASED),
    );
    let mut defense = scale_percent(
        defender.defense.defense(class)
            + def.net(
                CardKind::Defence,
                sub::defence::ALL_INCREASED,
                sub::defence::ALL_DECREASED,
            ),
        def.net(CardKind::Defence, def_inc, def_dec),
    );
    let dodge = defender.defense.dodge(class)
        + def.net(
            CardKind::DodgeAndDefencePercent,
            sub::dodge::DODGE_INCREASED,
            sub::dodge::DODGE_DECREASED,
        );
    let defense_upgrade = defender.defense.upgrade
        + def.net(
            CardKind::Defence,
            sub::defence::LEVEL_INCREASED,
            sub::defence::LEVEL_DECREASED,
        );
    let upgrade = (profile.upgrade - defense_upgrade).clamp(-10, 10);

    let crit_chance = profile.crit_chance
        + att.net(
            CardKind::Critical,
            sub::critical::INFLICTING_INCREASED,
            sub::critical::INFLICTING_REDUCED,
        )
        + def.net(
            CardKind::Critical,
            sub::critical::RECEIVING_INCREASED,
            sub::critical::RECEIVING_DECREASED,
        );
    let crit_rate = profile.crit_rate
        + att.net(
            CardKind::Critical,
            sub::critical::DAMAGE_INCREASED,
            sub::critical::DAMAGE_REDUCED,
        );
    let crit_rate = (f64::from(crit_rate) / 100.0
        * f64::from(
            100 + def.net(
                CardKind::Critical,
                sub::critical::DAMAGE_FROM_CRITICAL_INCREASED,
                sub::critical::DAMAGE_FROM_CRITICAL_DECREASED,
            ),
        )) as i32;

    // 1. dodge
    if class.can_miss() && !attacker.god_mode {
        let chance = dodge_chance(dodge, profile.hit_rate);
        if f64::from(rng.gen_range(0..100)) <= chance {
            return DamageOutcome::MISSED;
        }
    }

    // 2. base damage
    let mut base = rng.gen_range(min_hit..=max_hit);
    base += morale(attacker.level, att) - morale(defender.level, def);
    base += attacker.base_bonus;
    defense = scale_fraction(defense, defense_level_modifier(upgrade));
    base = scale_fraction(base, attack_level_modifier(upgrade));
    if def.has(CardKind::SpecialDefence, sub::special_defence::ALL_NULLIFIED) {
        defense = 0;
    }
    base -= defense;
    if class == DamageClass::Ranged
        && attacker.cell.distance(defender.cell) < rules.close_range_distance
    {
        base = (f64::from(base) * rules.close_range_factor) as i32;
    }

    // 3. elemental
    let mut flat_elemental = att.net(
        CardKind::Element,
        sub::element::ALL_INCREASED,
        sub::element::ALL_DECREASED,
    );
    let mut bonus_resistance = def.net(
        CardKind::ElementResistance,
        sub::element::ALL_INCREASED,
        sub::element::ALL_DECREASED,
    );
    if let Some((inc, dec)) = element_pair(attacker.element) {
        flat_elemental += att.net(CardKind::Element, inc, dec);
        bonus_resistance += def.net(CardKind::ElementResistance, inc, dec);
    }
    let resistance = defender.resistances.against(attacker.element);
    let mut boost = element_boost(attacker.element, defender.element);
    if ability.element == Element::None {
        boost = remap_unelemented(boost, attacker.side);
    } else if ability.element != attacker.element {
        boost = 0.0;
    }
    let raw = f64::from(flat_elemental)
        + f64::from(base + 100) * f64::from(attacker.element_rate) / 100.0;
    let elemental = ((raw / 100.0 * f64::from(100 - resistance - bonus_resistance) * boost)
        as i32)
        .max(0);

    // 4. critical
    let mut hit_mode = HitMode::Normal;
    if class.can_crit() && rng.gen_range(0..100) < crit_chance {
        let multiplier = (f64::from(crit_rate) / 100.0).min(rules.crit_multiplier_cap);
        base = scale_fraction(base, multiplier);
        hit_mode = HitMode::Critical;
    }

    // 5. item and probabilistic flat bonuses
    base *= 1 + att.value(CardKind::Item, sub::item::ATTACK_INCREASED) / 100;
    let increase = att.get(CardKind::IncreaseDamage, sub::increase_damage::PROBABILITY);
    if increase.first > 0 && increase.first > rng.gen_range(0..100) {
        base += increase.second;
    }

    // 6. total
    let mut total = base.saturating_add(elemental);
    if total < rules.damage_floor {
        total = rng.gen_range(1..=rules.damage_floor.max(1));
    }
    if attacker.side == CombatSide::Monster {
        total = total.saturating_add(monster_level_bonus(attacker.level));
    }
    let damage = total.clamp(0, i32::from(i16::MAX));

    let proc_chance = att.value(CardKind::StealBuff, sub::steal_buff::CHANCE_SUMMON_DRAGON);
    let special_proc = proc_chance > 0 && proc_chance > rng.gen_range(0..100);

    DamageOutcome {
        damage,
        hit_mode,
        special_proc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::modifiers::Modifier;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn attacker(min_hit: i32, max_hit: i32) -> AttackerSnapshot {
        AttackerSnapshot {
            side: CombatSide::Character,
            level: 10,
            profile: AttackProfile {
                min_hit,
                max_hit,
                hit_rate: 50,
                crit_chance: 0,
                crit_rate: 0,
                upgrade: 0,
            },
            element: Element::None,
            element_rate: 0,
            base_bonus: 0,
            god_mode: false,
            cell: Cell::new(0, 0),
            modifiers: ModifierSnapshot::new(),
        }
    }

    fn defender(defense: i32) -> DefenderSnapshot {
        DefenderSnapshot {
            level: 10,
            defense: DefenseProfile {
                melee: defense,
                ranged: defense,
                magic: defense,
                melee_dodge: 0,
                ranged_dodge: 0,
                upgrade: 0,
            },
            element: Element::None,
            resistances: ElementResistances::default(),
            cell: Cell::new(1, 0),
            modifiers: ModifierSnapshot::new(),
        }
    }

    const MAGIC: AbilityProfile = AbilityProfile {
        class: DamageClass::Magic,
        element: Element::None,
    };

    #[test]
    fn seeded_damage_matches_the_formula() {
        let rules = CombatRules::default();
        for seed in 0..64 {
            let mut expected_rng = StdRng::seed_from_u64(seed);
            let expected = expected_rng.gen_range(50..=80) - 20;

            let mut rng = StdRng::seed_from_u64(seed);
            let outcome = resolve(&attacker(50, 80), &defender(20), &MAGIC, &rules, &mut rng);
            assert_eq!(outcome.damage, expected, "seed {seed}");
            assert!((30..=60).contains(&outcome.damage));
            assert_eq!(outcome.hit_mode, HitMode::Normal);
            assert!(!outcome.special_proc);
        }
    }

    #[test]
    fn tiny_totals_are_redrawn_into_the_floor_range() {
        let rules = CombatRules::default();
        let mut seen = std::collections::HashSet::new();
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let outcome = resolve(&attacker(1, 1), &defender(500), &MAGIC, &rules, &mut rng);
            assert!((1..=5).contains(&outcome.damage), "seed {seed}");
            seen.insert(outcome.damage);
        }
        assert!(seen.len() > 1);
    }

    #[test]
    fn nullified_defense_is_ignored() {
        let rules = CombatRules::default();
        let mut target = defender(1_000);
        target.modifiers = ModifierSnapshot::from_modifiers(
            &[Modifier::new(
                CardKind::SpecialDefence,
                sub::special_defence::ALL_NULLIFIED,
                0,
            )],
            1,
        );
        let mut rng = StdRng::seed_from_u64(3);
        let outcome = resolve(&attacker(100, 100), &target, &MAGIC, &rules, &mut rng);
        assert_eq!(outcome.damage, 100);
    }

    #[test]
    fn god_mode_never_misses() {
        let rules = CombatRules::default();
        let melee = AbilityProfile {
            class: DamageClass::Melee,
            element: Element::None,
        };
        let mut target = defender(0);
        target.defense.melee_dodge = 10_000;
        let mut source = attacker(100, 100);
        source.profile.hit_rate = 0;

        let mut rng = StdRng::seed_from_u64(11);
        let missed = (0..50)
            .filter(|_| resolve(&source, &target, &melee, &rules, &mut rng).hit_mode == HitMode::Miss)
            .count();
        assert!(missed > 30);

        source.god_mode = true;
        for _ in 0..50 {
            let outcome = resolve(&source, &target, &melee, &rules, &mut rng);
            assert_ne!(outcome.hit_mode, HitMode::Miss);
        }
    }

    #[test]
    fn guaranteed_crit_is_capped_at_triple_bonus() {
        let rules = CombatRules::default();
        let melee = AbilityProfile {
            class: DamageClass::Melee,
            element: Element::None,
        };
        let mut source = attacker(100, 100);
        source.profile.crit_chance = 100;
        source.profile.crit_rate = 1_000;
        source.profile.hit_rate = 10_000;

        let mut rng = StdRng::seed_from_u64(5);
        let mut crits = 0;
        for _ in 0..20 {
            let outcome = resolve(&source, &defender(0), &melee, &rules, &mut rng);
            if outcome.hit_mode == HitMode::Critical {
                crits += 1;
                assert_eq!(outcome.damage, 400);
            }
        }
        assert!(crits > 0);
    }

    #[test]
    fn monster_side_adds_level_bonus_after_the_floor() {
        let rules = CombatRules::default();
        let mut source = attacker(1, 1);
        source.side = CombatSide::Monster;
        source.level = 50;
        let mut target = defender(500);
        target.level = 50;
        let mut rng = StdRng::seed_from_u64(8);
        let outcome = resolve(&source, &target, &MAGIC, &rules, &mut rng);
        assert!((51..=55).contains(&outcome.damage));
    }

    #[test]
    fn elemental_component_uses_the_matchup_table() {
        let rules = CombatRules::default();
        let fire = AbilityProfile {
            class: DamageClass::Magic,
            element: Element::Fire,
        };
        let mut source = attacker(100, 100);
        source.element = Element::Fire;
        source.element_rate = 100;
        let mut target = defender(0);
        target.element = Element::Water;

        let mut rng = StdRng::seed_from_u64(1);
        let outcome = resolve(&source, &target, &fire, &rules, &mut rng);
        // base 100, elemental (100 + 100) * 100% = 200, doubled against water
        assert_eq!(outcome.damage, 500);

        let water = AbilityProfile {
            class: DamageClass::Magic,
            element: Element::Water,
        };
        let outcome = resolve(&source, &target, &water, &rules, &mut rng);
        assert_eq!(outcome.damage, 100);
    }

    #[test]
    fn damage_is_clamped_to_sixteen_bits() {
        let rules = CombatRules::default();
        let mut rng = StdRng::seed_from_u64(2);
        let outcome = resolve(
            &attacker(1_000_000, 1_000_000),
            &defender(0),
            &MAGIC,
            &rules,
            &mut rng,
        );
        assert_eq!(outcome.damage, i32::from(i16::MAX));
    }

    #[test]
    fn special_proc_rolls_only_with_the_modifier() {
        let rules = CombatRules::default();
        let mut source = attacker(100, 100);
        source.modifiers = ModifierSnapshot::from_modifiers(
            &[Modifier::new(
                CardKind::StealBuff,
                sub::steal_buff::CHANCE_SUMMON_DRAGON,
                100,
            )],
            1,
        );
        let mut rng = StdRng::seed_from_u64(4);
        assert!(resolve(&source, &defender(0), &MAGIC, &rules, &mut rng).special_proc);
        assert!(!resolve(&attacker(100, 100), &defender(0), &MAGIC, &rules, &mut rng).special_proc);
    }
}
