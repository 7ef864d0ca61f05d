use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CombatRules {
    pub damage_floor: i32,
    pub crit_multiplier_cap: f64,
    pub close_range_distance: u32,
    pub close_range_factor: f64,
    pub adventurer_bonus: i32,
    pub basic_attack_base: Duration,
    pub basic_attack_step: Duration,
    pub cooldown_unit: Duration,
    pub cast_time_unit: Duration,
    pub aggro_effect_interval: Duration,
    pub aggro_effect_id: u16,
    pub revive_offer_delay: Duration,
    pub summon_strike_delay: Duration,
    pub retarget_distance: u32,
    /// Out of 10; the entity only considers abilities when `rng(0..=10)` exceeds this.
    pub skill_roll_threshold: u32,
}

impl Default for CombatRules {
    fn default() -> Self {
        Self {
            damage_floor: 5,
            crit_multiplier_cap: 3.0,
            close_range_distance: 4,
            close_range_factor: 0.85,
            adventurer_bonus: 20,
            basic_attack_base: Duration::from_millis(1_000),
            basic_attack_step: Duration::from_millis(200),
            cooldown_unit: Duration::from_millis(100),
            cast_time_unit: Duration::from_millis(100),
            aggro_effect_interval: Duration::from_secs(5),
            aggro_effect_id: 5000,
            revive_offer_delay: Duration::from_secs(1),
            summon_strike_delay: Duration::from_millis(350),
            retarget_distance: 100,
            skill_roll_threshold: 8,
        }
    }
}

impl CombatRules {
    pub fn basic_attack_cooldown(&self, basic_cooldown: u16) -> Duration {
        self.basic_attack_base + self.basic_attack_step * u32::from(basic_cooldown)
    }

    pub fn ability_cooldown(&self, cooldown: u16) -> Duration {
        self.cooldown_unit * u32::from(cooldown)
    }

    pub fn cast_delay(&self, cast_time: u16) -> Duration {
        self.cast_time_unit * u32::from(cast_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldowns_scale_with_template_units() {
        let rules = CombatRules::default();
        assert_eq!(rules.basic_attack_cooldown(0), Duration::from_millis(1_000));
        assert_eq!(rules.basic_attack_cooldown(4), Duration::from_millis(1_800));
        assert_eq!(rules.ability_cooldown(25), Duration::from_millis(2_500));
        assert_eq!(rules.cast_delay(3), Duration::from_millis(300));
    }
}
