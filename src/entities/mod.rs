pub mod creature;
pub mod entity;
pub mod hit;
pub mod player;
pub mod stats;
pub mod template;
