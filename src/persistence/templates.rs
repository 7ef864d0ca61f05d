use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use crate::combat::buffs::BuffCard;
use crate::entities::creature::{MapId, MapInstanceKind};
use crate::entities::template::{AbilityTemplate, EntityTemplate, TemplateIndex};
use crate::error::{Result, SimError};
use crate::world::events::{InstanceEvent, Portal, SpawnSpec, WaveEvent};
use crate::world::grid::WalkGrid;

pub trait TemplateSource {
    fn load_templates_for_map(&self, map: MapId) -> Result<Arc<TemplateIndex>>;
    fn load_static_spawns(&self, map: MapId) -> Result<Vec<SpawnSpec>>;
    fn load_map(&self, map: MapId) -> Result<MapData>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogFile {
    templates: Vec<EntityTemplate>,
    abilities: Vec<AbilityTemplate>,
    buffs: Vec<BuffCard>,
}

fn one() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MapDefinition {
    pub map: MapId,
    #[serde(default)]
    pub kind: MapInstanceKind,
    #[serde(default)]
    pub pvp: bool,
    /// `.` walkable, `#` blocked. Ignored when `layout` is set.
    #[serde(default)]
    pub rows: Vec<String>,
    #[serde(default)]
    pub layout: Option<PathBuf>,
    #[serde(default)]
    pub spawns: Vec<SpawnSpec>,
    #[serde(default)]
    pub waves: Vec<WaveEvent>,
    #[serde(default)]
    pub on_cleared: Vec<InstanceEvent>,
    #[serde(default)]
    pub portals: Vec<Portal>,
    #[serde(default = "one")]
    pub xp_rate: f64,
    #[serde(default = "one")]
    pub drop_rate: f64,
}

#[derive(Debug, Clone)]
pub struct MapData {
    pub definition: MapDefinition,
    pub grid: WalkGrid,
}

/// Reads `templates/*.yaml` and `maps/<id>.yaml` under `root`.
#[derive(Debug)]
pub struct YamlTemplateSource {
    root: PathBuf,
    catalog: Mutex<Option<Arc<TemplateIndex>>>,
}

impl YamlTemplateSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            catalog: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn map_path(&self, map: MapId) -> PathBuf {
        self.root.join("maps").join(format!("{}.yaml", map.0))
    }

    fn read_catalog(&self) -> Result<TemplateIndex> {
        let dir = self.root.join("templates");
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)
            .map_err(|err| SimError::io(&dir, err))?
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(err) => {
                    tracing::warn!(dir = %dir.display(), error = %err, "unreadable template entry");
                    None
                }
            })
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml"))
            })
            .collect();
        // later files override earlier ones on id clashes
        files.sort();

        let mut index = TemplateIndex::new();
        for path in files {
            let catalog: CatalogFile = read_yaml(&path)?;
            tracing::debug!(
                file = %path.display(),
                templates = catalog.templates.len(),
                abilities = catalog.abilities.len(),
                buffs = catalog.buffs.len(),
                "template file loaded"
            );
            catalog
                .templates
                .into_iter()
                .for_each(|template| index.insert_template(template));
            catalog
                .abilities
                .into_iter()
                .for_each(|ability| index.insert_ability(ability));
            catalog.buffs.into_iter().for_each(|card| index.insert_buff(card));
        }
        Ok(index)
    }

    fn read_definition(&self, map: MapId) -> Result<MapDefinition> {
        let path = self.map_path(map);
        let definition: MapDefinition = read_yaml(&path)?;
        if definition.map != map {
            tracing::warn!(file = %path.display(), declared = %definition.map, %map, "map id mismatch");
        }
        Ok(definition)
    }

    fn read_grid(&self, definition: &MapDefinition) -> Result<WalkGrid> {
        match &definition.layout {
            Some(layout) => {
                let path = self.root.join("maps").join(layout);
                let data = fs::read(&path).map_err(|err| SimError::io(&path, err))?;
                WalkGrid::from_bytes(&data)
            }
            None => WalkGrid::from_rows(&definition.rows),
        }
    }
}

impl TemplateSource for YamlTemplateSource {
    /// Every map shares one catalog; it is read once and handed out again.
    fn load_templates_for_map(&self, map: MapId) -> Result<Arc<TemplateIndex>> {
        let mut cached = self
            .catalog
            .lock()
            .map_err(|_| SimError::Poisoned("template catalog"))?;
        if let Some(index) = cached.as_ref() {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(self.read_catalog()?);
        tracing::info!(
            %map,
            templates = index.template_count(),
            abilities = index.ability_count(),
            buffs = index.buff_count(),
            "template catalog loaded"
        );
        *cached = Some(Arc::clone(&index));
        Ok(index)
    }

    fn load_static_spawns(&self, map: MapId) -> Result<Vec<SpawnSpec>> {
        Ok(self.read_definition(map)?.spawns)
    }

    fn load_map(&self, map: MapId) -> Result<MapData> {
        let definition = self.read_definition(map)?;
        let grid = self.read_grid(&definition)?;
        Ok(MapData { definition, grid })
    }
}

fn read_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|err| SimError::io(path, err))?;
    serde_yaml::from_str(&text).map_err(|err| SimError::yaml(path, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::creature::TemplateId;
    use crate::world::position::Cell;

    fn data_root(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("mapsim-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(root.join("templates")).unwrap();
        fs::create_dir_all(root.join("maps")).unwrap();
        root
    }

    const CATALOG: &str = "
templates:
  - id: 10
    name: slime
    level: 3
    max_hp: 120
    xp: 40
    hostile: true
    abilities: [5]
abilities:
  - id: 5
    class: magic
    range: 4
    cooldown: 20
buffs:
  - id: 7
    duration_ms: 5000
";

    const MAP: &str = "
map: 3
kind: raid
rows:
  - '....'
  - '.##.'
  - '....'
spawns:
  - template: 10
    cell: { x: 0, y: 0 }
  - template: 10
    respawn: never
waves:
  - delay: 30
    events:
      - message: more are coming
portals:
  - source: { x: 3, y: 2 }
    destination: 1
    destination_cell: { x: 5, y: 5 }
xp_rate: 2.0
";

    #[test]
    fn catalog_is_read_once_and_shared() {
        let root = data_root("catalog");
        fs::write(root.join("templates").join("base.yaml"), CATALOG).unwrap();
        fs::write(root.join("templates").join("notes.txt"), "ignored").unwrap();
        let source = YamlTemplateSource::new(&root);

        let index = source.load_templates_for_map(MapId(3)).unwrap();
        let slime = index.template(TemplateId(10)).unwrap();
        assert_eq!(slime.name, "slime");
        assert!(slime.can_walk);
        assert_eq!(slime.basic_range, 1);
        assert_eq!(index.abilities_of(&slime).len(), 1);
        assert_eq!(index.buff_count(), 1);

        let again = source.load_templates_for_map(MapId(4)).unwrap();
        assert!(Arc::ptr_eq(&index, &again));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn map_definition_carries_grid_and_hooks() {
        let root = data_root("map");
        fs::write(root.join("maps").join("3.yaml"), MAP).unwrap();
        let source = YamlTemplateSource::new(&root);

        let data = source.load_map(MapId(3)).unwrap();
        assert_eq!(data.definition.kind, MapInstanceKind::Raid);
        assert_eq!((data.grid.width(), data.grid.height()), (4, 3));
        assert!(!data.grid.is_walkable(Cell::new(1, 1)));
        assert_eq!(data.definition.waves.len(), 1);
        assert_eq!(data.definition.portals[0].destination_cell, Cell::new(5, 5));
        assert_eq!(data.definition.xp_rate, 2.0);
        assert_eq!(data.definition.drop_rate, 1.0);

        let spawns = source.load_static_spawns(MapId(3)).unwrap();
        assert_eq!(spawns.len(), 2);
        assert_eq!(spawns[0].cell, Some(Cell::new(0, 0)));
        assert_eq!(spawns[1].cell, None);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn binary_layout_replaces_rows() {
        let root = data_root("layout");
        let mut layout = vec![2, 0, 2, 0];
        layout.extend_from_slice(&[0, 1, 0, 0]);
        fs::write(root.join("maps").join("8.bin"), layout).unwrap();
        fs::write(root.join("maps").join("8.yaml"), "map: 8\nlayout: 8.bin\n").unwrap();

        let data = YamlTemplateSource::new(&root).load_map(MapId(8)).unwrap();
        assert_eq!(data.definition.kind, MapInstanceKind::default());
        assert!(data.grid.is_walkable(Cell::new(0, 0)));
        assert!(!data.grid.is_walkable(Cell::new(1, 0)));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_and_malformed_files_are_reported_with_their_path() {
        let root = data_root("errors");
        let source = YamlTemplateSource::new(&root);
        assert!(matches!(source.load_map(MapId(9)), Err(SimError::Io { .. })));

        fs::write(root.join("maps").join("9.yaml"), "map: [not an id").unwrap();
        match source.load_map(MapId(9)) {
            Err(SimError::Yaml { path, .. }) => assert!(path.ends_with("9.yaml")),
            other => panic!("unexpected {other:?}"),
        }
        let _ = fs::remove_dir_all(&root);
    }
}
