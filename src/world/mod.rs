pub mod ai;
pub mod cron;
pub mod events;
pub mod grid;
pub mod loot;
pub mod map_instance;
pub mod position;
pub mod registry;
pub mod scheduler;
