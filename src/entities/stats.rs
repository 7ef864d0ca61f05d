#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resources {
    pub hp: i32,
    pub max_hp: i32,
    pub mp: i32,
    pub max_mp: i32,
}

impl Resources {
    pub fn full(max_hp: i32, max_mp: i32) -> Self {
        let max_hp = max_hp.max(0);
        let max_mp = max_mp.max(0);
        Self {
            hp: max_hp,
            max_hp,
            mp: max_mp,
            max_mp,
        }
    }

    /// Returns the amount actually removed. Negative damage is ignored.
    pub fn apply_damage(&mut self, amount: i32) -> i32 {
        let applied = amount.max(0).min(self.hp);
        self.hp -= applied;
        applied
    }

    pub fn apply_heal(&mut self, amount: i32) -> i32 {
        if self.max_hp <= 0 {
            return 0;
        }
        let before = self.hp;
        self.hp = before.saturating_add(amount.max(0)).min(self.max_hp);
        self.hp - before
    }

    pub fn spend_mp(&mut self, cost: i32) -> bool {
        if self.mp < cost {
            return false;
        }
        self.mp -= cost.max(0);
        true
    }

    pub fn restore_full(&mut self) {
        self.hp = self.max_hp;
        self.mp = self.max_mp;
    }

    pub fn deplete(&mut self) {
        self.hp = 0;
        self.mp = 0;
    }

    pub fn is_depleted(&self) -> bool {
        self.hp <= 0
    }

    pub fn hp_percent(&self) -> u8 {
        percent(self.hp, self.max_hp)
    }

    pub fn mp_percent(&self) -> u8 {
        percent(self.mp, self.max_mp)
    }
}

fn percent(value: i32, max: i32) -> u8 {
    if max <= 0 {
        return 0;
    }
    (i64::from(value.clamp(0, max)) * 100 / i64::from(max)) as u8
}
