use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use pathfinding::prelude::astar;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Result, SimError};
use crate::world::position::Cell;

const STRAIGHT_COST: u32 = 10;
const DIAGONAL_COST: u32 = 14;

/// Static walkability of one map. Out-of-bounds cells are blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkGrid {
    width: u16,
    height: u16,
    blocked: Vec<bool>,
}

impl WalkGrid {
    pub fn open(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            blocked: vec![false; usize::from(width) * usize::from(height)],
        }
    }

    /// Rows of `.` (walkable) and `#` (blocked), top row first.
    pub fn from_rows<S: AsRef<str>>(rows: &[S]) -> Result<Self> {
        let height = u16::try_from(rows.len())
            .map_err(|_| SimError::InvalidGrid(format!("{} rows", rows.len())))?;
        let width = rows.first().map(|row| row.as_ref().chars().count()).unwrap_or(0);
        let width = u16::try_from(width)
            .map_err(|_| SimError::InvalidGrid(format!("row width {width}")))?;
        let mut blocked = Vec::with_capacity(usize::from(width) * usize::from(height));
        for (y, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.chars().count() != usize::from(width) {
                return Err(SimError::InvalidGrid(format!(
                    "row {y} has {} cells, expected {width}",
                    row.chars().count()
                )));
            }
            for (x, ch) in row.chars().enumerate() {
                match ch {
                    '.' => blocked.push(false),
                    '#' => blocked.push(true),
                    other => {
                        return Err(SimError::InvalidGrid(format!(
                            "unexpected '{other}' at ({x}, {y})"
                        )))
                    }
                }
            }
        }
        Ok(Self {
            width,
            height,
            blocked,
        })
    }

    /// Binary layout: little-endian width and height, then one byte per cell row by row.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(SimError::InvalidGrid("header truncated".to_string()));
        }
        let width = u16::from_le_bytes([data[0], data[1]]);
        let height = u16::from_le_bytes([data[2], data[3]]);
        let expected = usize::from(width) * usize::from(height);
        let cells = &data[4..];
        if cells.len() < expected {
            return Err(SimError::InvalidGrid(format!(
                "expected {expected} cells, found {}",
                cells.len()
            )));
        }
        Ok(Self {
            width,
            height,
            blocked: cells[..expected].iter().map(|value| *value != 0).collect(),
        })
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    fn index(&self, cell: Cell) -> Option<usize> {
        if cell.x < 0 || cell.y < 0 {
            return None;
        }
        let (x, y) = (cell.x as usize, cell.y as usize);
        if x >= usize::from(self.width) || y >= usize::from(self.height) {
            return None;
        }
        Some(y * usize::from(self.width) + x)
    }

    pub fn is_walkable(&self, cell: Cell) -> bool {
        self.index(cell)
            .map(|index| !self.blocked[index])
            .unwrap_or(false)
    }

    pub fn set_blocked(&mut self, cell: Cell, blocked: bool) {
        if let Some(index) = self.index(cell) {
            self.blocked[index] = blocked;
        }
    }

    /// Walks x first along the start row, then y along the start column.
    pub fn line_blocked(&self, from: Cell, to: Cell) -> bool {
        let dx = i32::from(to.x) - i32::from(from.x);
        let dy = i32::from(to.y) - i32::from(from.y);
        let x_blocked = (1..=dx.abs()).any(|step| {
            !self.is_walkable(from.offset((dx.signum() * step) as i16, 0))
        });
        if x_blocked {
            return true;
        }
        (1..=dy.abs()).any(|step| !self.is_walkable(from.offset(0, (dy.signum() * step) as i16)))
    }

    /// A random walkable cell within `max_dx`/`max_dy` of `center`, other than
    /// `center` itself, reachable by an unblocked straight line.
    pub fn random_free_cell_near<R: Rng + ?Sized>(
        &self,
        center: Cell,
        max_dx: u8,
        max_dy: u8,
        rng: &mut R,
    ) -> Option<Cell> {
        let (max_dx, max_dy) = (i16::from(max_dx), i16::from(max_dy));
        let mut candidates: Vec<Cell> = (-max_dy..=max_dy)
            .flat_map(|dy| (-max_dx..=max_dx).map(move |dx| (dx, dy)))
            .filter(|&(dx, dy)| dx != 0 || dy != 0)
            .map(|(dx, dy)| center.offset(dx, dy))
            .collect();
        candidates.shuffle(rng);
        candidates
            .into_iter()
            .find(|cell| self.is_walkable(*cell) && !self.line_blocked(center, *cell))
    }

    pub fn random_walkable_cell<R: Rng + ?Sized>(&self, rng: &mut R, attempts: usize) -> Option<Cell> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        (0..attempts)
            .map(|_| {
                Cell::new(
                    rng.gen_range(0..self.width) as i16,
                    rng.gen_range(0..self.height) as i16,
                )
            })
            .find(|cell| self.is_walkable(*cell))
    }

    fn successors(&self, cell: Cell) -> Vec<(Cell, u32)> {
        cell.neighbors()
            .filter(|(next, _)| self.is_walkable(*next))
            .filter(|(next, direction)| {
                // no corner cutting
                !direction.is_diagonal()
                    || (self.is_walkable(Cell::new(next.x, cell.y))
                        && self.is_walkable(Cell::new(cell.x, next.y)))
            })
            .map(|(next, direction)| {
                let cost = if direction.is_diagonal() {
                    DIAGONAL_COST
                } else {
                    STRAIGHT_COST
                };
                (next, cost)
            })
            .collect()
    }
}

fn octile_estimate(from: Cell, to: Cell) -> u32 {
    let dx = (i32::from(from.x) - i32::from(to.x)).unsigned_abs();
    let dy = (i32::from(from.y) - i32::from(to.y)).unsigned_abs();
    STRAIGHT_COST * dx.max(dy) + (DIAGONAL_COST - STRAIGHT_COST) * dx.min(dy)
}

pub trait Pathfinder: Send + Sync {
    fn find_path(&self, start: Cell, goal: Cell) -> Result<Vec<Cell>>;
}

pub struct AstarPathfinder {
    grid: Arc<WalkGrid>,
}

impl AstarPathfinder {
    pub fn new(grid: Arc<WalkGrid>) -> Self {
        Self { grid }
    }
}

impl Pathfinder for AstarPathfinder {
    fn find_path(&self, start: Cell, goal: Cell) -> Result<Vec<Cell>> {
        if start == goal {
            return Ok(Vec::new());
        }
        if !self.grid.is_walkable(goal) {
            return Err(SimError::NoPath {
                from: start,
                to: goal,
            });
        }
        let (mut path, _cost) = astar(
            &start,
            |cell| self.grid.successors(*cell),
            |cell| octile_estimate(*cell, goal),
            |cell| *cell == goal,
        )
        .ok_or(SimError::NoPath {
            from: start,
            to: goal,
        })?;
        path.remove(0);
        Ok(path)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathCacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl PathCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct PathCacheInner {
    paths: LruCache<(Cell, Cell), Arc<Vec<Cell>>>,
    stats: PathCacheStats,
}

/// LRU memo in front of another pathfinder. Failed searches are not cached.
pub struct CachedPathfinder<P> {
    inner: P,
    cache: Mutex<PathCacheInner>,
}

impl<P: Pathfinder> CachedPathfinder<P> {
    pub fn new(inner: P, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(PathCacheInner {
                paths: LruCache::new(capacity),
                stats: PathCacheStats::default(),
            }),
        }
    }

    pub fn stats(&self) -> PathCacheStats {
        self.cache
            .lock()
            .map(|cache| cache.stats)
            .unwrap_or_default()
    }
}

impl<P: Pathfinder> Pathfinder for CachedPathfinder<P> {
    fn find_path(&self, start: Cell, goal: Cell) -> Result<Vec<Cell>> {
        {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| SimError::Poisoned("path cache"))?;
            if let Some(path) = cache.paths.get(&(start, goal)).cloned() {
                cache.stats.hits += 1;
                return Ok(path.as_ref().clone());
            }
            cache.stats.misses += 1;
        }
        let path = self.inner.find_path(start, goal)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.paths.put((start, goal), Arc::new(path.clone()));
        }
        Ok(path)
    }
}
