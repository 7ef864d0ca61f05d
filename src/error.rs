use std::path::PathBuf;

use thiserror::Error;

use crate::entities::creature::{CharacterId, EntityId, MapInstanceId, TemplateId};
use crate::world::position::Cell;

pub type Result<T> = std::result::Result<T, SimError>;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("usage: {0}")]
    Usage(String),

    #[error("unknown entity template {0}")]
    UnknownTemplate(TemplateId),

    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    #[error("unknown map instance {0}")]
    UnknownMapInstance(MapInstanceId),

    #[error("unknown character {0}")]
    UnknownCharacter(CharacterId),

    #[error("no path from {from} to {to}")]
    NoPath { from: Cell, to: Cell },

    #[error("{0} lock poisoned")]
    Poisoned(&'static str),

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to start thread {name}")]
    Thread {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid grid data: {0}")]
    InvalidGrid(String),

    #[error("logging setup failed: {0}")]
    Logging(String),
}

impl SimError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn yaml(path: impl Into<PathBuf>, source: serde_yaml::Error) -> Self {
        Self::Yaml {
            path: path.into(),
            source,
        }
    }
}
