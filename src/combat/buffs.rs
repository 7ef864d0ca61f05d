use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::combat::modifiers::{Modifier, ModifierSnapshot};
use crate::world::cron::TimerQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuffId(pub u16);

impl fmt::Display for BuffId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buff#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuffCard {
    pub id: BuffId,
    #[serde(default)]
    pub name: String,
    /// Zero keeps the buff until it is removed or replaced.
    #[serde(default)]
    pub duration_ms: u64,
    /// Activation delay for modifiers flagged `delayed`.
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    /// Applied when this buff runs out, with `timeout_chance` percent probability.
    #[serde(default)]
    pub timeout_buff: Option<BuffId>,
    #[serde(default)]
    pub timeout_chance: u8,
}

impl BuffCard {
    pub fn duration(&self) -> Option<Duration> {
        (self.duration_ms > 0).then(|| Duration::from_millis(self.duration_ms))
    }
}

pub trait BuffCatalog {
    fn buff_card(&self, id: BuffId) -> Option<Arc<BuffCard>>;
}

impl BuffCatalog for HashMap<BuffId, Arc<BuffCard>> {
    fn buff_card(&self, id: BuffId) -> Option<Arc<BuffCard>> {
        self.get(&id).cloned()
    }
}

#[derive(Debug, Clone)]
pub struct ActiveBuff {
    pub card: Arc<BuffCard>,
    pub level: u16,
    pub started: Instant,
}

impl ActiveBuff {
    fn delay_elapsed(&self, now: Instant) -> bool {
        now >= self.started + Duration::from_millis(self.card.delay_ms)
    }

    fn ran_out(&self, now: Instant) -> bool {
        self.card
            .duration()
            .is_some_and(|duration| now >= self.started + duration)
    }
}

/// Buffs currently held by one entity or character.
///
/// Reapplying a card replaces the previous instance and its expiry; the
/// superseded timer never fires.
#[derive(Debug, Default)]
pub struct BuffSet {
    active: HashMap<BuffId, ActiveBuff>,
    expiry: TimerQueue<BuffId, ()>,
}

impl BuffSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, card: Arc<BuffCard>, level: u16, now: Instant) {
        let id = card.id;
        match card.duration() {
            Some(duration) => self.expiry.set(id, now + duration, ()),
            None => {
                self.expiry.stop(id);
            }
        }
        self.active.insert(
            id,
            ActiveBuff {
                card,
                level,
                started: now,
            },
        );
    }

    pub fn remove(&mut self, id: BuffId) -> Option<ActiveBuff> {
        self.expiry.stop(id);
        self.active.remove(&id)
    }

    /// Removes every buff whose duration has run out and rolls its timeout chain.
    pub fn expire_due<C, R>(&mut self, now: Instant, catalog: &C, rng: &mut R) -> Vec<BuffId>
    where
        C: BuffCatalog + ?Sized,
        R: Rng + ?Sized,
    {
        let mut expired = Vec::new();
        while let Some((id, ())) = self.expiry.pop_ready(now) {
            let Some(buff) = self.active.remove(&id) else {
                continue;
            };
            expired.push(id);
            let Some(next) = buff.card.timeout_buff else {
                continue;
            };
            if rng.gen_range(0..100) >= u32::from(buff.card.timeout_chance) {
                continue;
            }
            match catalog.buff_card(next) {
                Some(card) => self.apply(card, buff.level, now),
                None => tracing::warn!(buff = %id, next = %next, "timeout buff missing from catalog"),
            }
        }
        expired
    }

    /// Folds every active modifier into `snapshot`, skipping delayed ones still
    /// pending and buffs whose duration has run out but were not expired yet.
    pub fn contribute(&self, snapshot: &mut ModifierSnapshot, now: Instant) {
        for buff in self.active.values().filter(|buff| !buff.ran_out(now)) {
            let ready = buff.delay_elapsed(now);
            for modifier in &buff.card.modifiers {
                if modifier.delayed && !ready {
                    continue;
                }
                snapshot.add(modifier, buff.level);
            }
        }
    }

    pub fn contains(&self, id: BuffId) -> bool {
        self.active.contains_key(&id)
    }

    pub fn remaining(&self, id: BuffId, now: Instant) -> Option<Duration> {
        self.expiry.remaining(id, now)
    }

    pub fn ids(&self) -> impl Iterator<Item = BuffId> + '_ {
        self.active.keys().copied()
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.expiry.clear();
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
