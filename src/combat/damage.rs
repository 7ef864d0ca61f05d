use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageClass {
    #[default]
    Melee,
    Ranged,
    Magic,
}

impl DamageClass {
    pub fn can_miss(self) -> bool {
        self != DamageClass::Magic
    }

    pub fn can_crit(self) -> bool {
        self != DamageClass::Magic
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Element {
    #[default]
    None,
    Fire,
    Water,
    Light,
    Dark,
}

impl Element {
    pub const ALL: [Element; 5] = [
        Element::None,
        Element::Fire,
        Element::Water,
        Element::Light,
        Element::Dark,
    ];

    pub fn index(self) -> usize {
        match self {
            Element::None => 0,
            Element::Fire => 1,
            Element::Water => 2,
            Element::Light => 3,
            Element::Dark => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HitMode {
    #[default]
    Normal,
    Miss,
    Critical,
    AreaMiss,
    AreaNormal,
    AreaCritical,
}

impl HitMode {
    pub fn code(self) -> u8 {
        match self {
            HitMode::Normal => 0,
            HitMode::Miss => 1,
            HitMode::Critical => 3,
            HitMode::AreaMiss => 4,
            HitMode::AreaNormal => 5,
            HitMode::AreaCritical => 6,
        }
    }

    /// Area deliveries report misses and crits with their own codes.
    pub fn for_area(self) -> HitMode {
        match self {
            HitMode::Miss | HitMode::AreaMiss => HitMode::AreaMiss,
            HitMode::Critical | HitMode::AreaCritical => HitMode::AreaCritical,
            HitMode::Normal | HitMode::AreaNormal => HitMode::AreaNormal,
        }
    }

    pub fn is_miss(self) -> bool {
        matches!(self, HitMode::Miss | HitMode::AreaMiss)
    }
}

/// Row: attacker element, column: defender element.
const ELEMENT_TABLE: [[f64; 5]; 5] = [
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [1.3, 1.0, 2.0, 1.0, 1.5],
    [1.3, 2.0, 1.0, 1.5, 1.0],
    [1.3, 1.5, 1.0, 1.0, 3.0],
    [1.3, 1.0, 1.5, 3.0, 1.0],
];

pub fn element_boost(attacker: Element, defender: Element) -> f64 {
    ELEMENT_TABLE[attacker.index()][defender.index()]
}

/// Side of the resolver an attack comes from. The remap differs on one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombatSide {
    Character,
    Monster,
}

/// Boost used when the ability itself carries no element.
pub fn remap_unelemented(boost: f64, side: CombatSide) -> f64 {
    const EPSILON: f64 = 1e-9;
    let is = |value: f64| (boost - value).abs() < EPSILON;
    if is(0.5) {
        0.0
    } else if is(1.0) {
        0.05
    } else if is(1.3) {
        match side {
            CombatSide::Character => 0.15,
            CombatSide::Monster => 0.0,
        }
    } else if is(1.5) {
        0.15
    } else if is(2.0) || is(3.0) {
        0.2
    } else {
        boost
    }
}

const UPGRADE_MODS: [f64; 10] = [0.1, 0.15, 0.22, 0.32, 0.43, 0.54, 0.65, 0.9, 1.2, 2.0];

pub fn attack_level_modifier(upgrade: i32) -> f64 {
    match upgrade {
        1..=10 => UPGRADE_MODS[(upgrade - 1) as usize],
        _ => 0.0,
    }
}

pub fn defense_level_modifier(upgrade: i32) -> f64 {
    match upgrade {
        -10..=-1 => UPGRADE_MODS[(-upgrade - 1) as usize],
        _ => 0.0,
    }
}

pub fn dodge_chance(dodge: i32, hit_rate: i32) -> f64 {
    let ratio = (f64::from(dodge) / f64::from(hit_rate.saturating_add(1).max(1))).min(5.0);
    let chance = -0.25 * ratio.powi(3) - 0.57 * ratio.powi(2) + 25.3 * ratio - 1.41;
    chance.max(1.0)
}

pub fn monster_level_bonus(level: u16) -> i32 {
    let level = i32::from(level);
    match level {
        0..=44 => 0,
        45..=54 => level,
        55..=59 => level * 2,
        60..=64 => level * 3,
        65..=69 => level * 4,
        _ => level * 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_table_matches_every_pairing() {
        use Element::*;
        let expected = [
            (Fire, [1.3, 1.0, 2.0, 1.0, 1.5]),
            (Water, [1.3, 2.0, 1.0, 1.5, 1.0]),
            (Light, [1.3, 1.5, 1.0, 1.0, 3.0]),
            (Dark, [1.3, 1.0, 1.5, 3.0, 1.0]),
            (None, [0.0; 5]),
        ];
        for (attacker, row) in expected {
            for (defender, value) in Element::ALL.into_iter().zip(row) {
                assert_eq!(element_boost(attacker, defender), value, "{attacker:?} vs {defender:?}");
            }
        }
    }

    #[test]
    fn remap_keeps_the_literal_tiers() {
        assert_eq!(remap_unelemented(1.0, CombatSide::Character), 0.05);
        assert_eq!(remap_unelemented(1.3, CombatSide::Character), 0.15);
        assert_eq!(remap_unelemented(1.3, CombatSide::Monster), 0.0);
        assert_eq!(remap_unelemented(1.5, CombatSide::Monster), 0.15);
        assert_eq!(remap_unelemented(2.0, CombatSide::Character), 0.2);
        assert_eq!(remap_unelemented(3.0, CombatSide::Character), 0.2);
        assert_eq!(remap_unelemented(0.5, CombatSide::Character), 0.0);
        assert_eq!(remap_unelemented(0.0, CombatSide::Character), 0.0);
    }

    #[test]
    fn upgrade_modifiers_are_signed_mirrors() {
        assert_eq!(attack_level_modifier(0), 0.0);
        assert_eq!(attack_level_modifier(1), 0.1);
        assert_eq!(attack_level_modifier(10), 2.0);
        assert_eq!(attack_level_modifier(11), 0.0);
        assert_eq!(attack_level_modifier(-3), 0.0);
        assert_eq!(defense_level_modifier(-3), 0.22);
        assert_eq!(defense_level_modifier(-10), 2.0);
        assert_eq!(defense_level_modifier(4), 0.0);
    }

    #[test]
    fn dodge_chance_is_monotonic_and_capped() {
        let mut previous = 0.0;
        for dodge in 0..2000 {
            let chance = dodge_chance(dodge, 99);
            assert!(chance >= previous, "dodge {dodge}");
            assert!((1.0..=100.0).contains(&chance));
            previous = chance;
        }
        assert_eq!(dodge_chance(10_000, 9), dodge_chance(50, 9));
        assert_eq!(dodge_chance(0, 50), 1.0);
    }

    #[test]
    fn level_bonus_steps() {
        assert_eq!(monster_level_bonus(44), 0);
        assert_eq!(monster_level_bonus(45), 45);
        assert_eq!(monster_level_bonus(55), 110);
        assert_eq!(monster_level_bonus(60), 180);
        assert_eq!(monster_level_bonus(65), 260);
        assert_eq!(monster_level_bonus(70), 350);
    }

    #[test]
    fn area_hit_modes_use_their_own_codes() {
        assert_eq!(HitMode::Miss.for_area().code(), 4);
        assert_eq!(HitMode::Normal.for_area().code(), 5);
        assert_eq!(HitMode::Critical.for_area().code(), 6);
    }
}
