//! Procedural Layout
//!
//! Randomized backtracking carve over a `width x height` grid, followed by
//! room template placement. Only the authority runs the generator; the
//! finished [`DungeonLayout`] is what gets replicated.

use std::collections::VecDeque;

use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::config::{DungeonConfig, RoomRule};
use crate::core::hash::{StateHash, StateHasher};
use crate::core::rng::DeterministicRng;
use crate::MAX_CARVE_STEPS;

// =============================================================================
// GRID TYPES
// =============================================================================

/// Grid coordinate. `y` grows downwards (towards `Direction::Down`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridPos {
    /// Column
    pub x: u32,
    /// Row
    pub y: u32,
}

impl GridPos {
    /// Create a new grid position.
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Position of a row-major cell index.
    pub fn from_index(index: u32, width: u32) -> Self {
        Self { x: index % width, y: index / width }
    }

    /// Row-major cell index.
    pub fn index(self, width: u32) -> u32 {
        self.x + self.y * width
    }
}

/// Door slot of a room.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    /// Towards `y - 1`
    Up = 0,
    /// Towards `y + 1`
    Down = 1,
    /// Towards `x + 1`
    Right = 2,
    /// Towards `x - 1`
    Left = 3,
}

impl Direction {
    /// All directions in door-index order.
    pub const ALL: [Direction; 4] = [Direction::Up, Direction::Down, Direction::Right, Direction::Left];

    /// Door index (0..4).
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Direction for a door index.
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Door on the other side of a shared wall.
    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Right => Direction::Left,
            Direction::Left => Direction::Right,
        }
    }

    /// Neighbouring cell in this direction, if inside the grid.
    pub fn step(self, pos: GridPos, width: u32, height: u32) -> Option<GridPos> {
        match self {
            Direction::Up if pos.y > 0 => Some(GridPos::new(pos.x, pos.y - 1)),
            Direction::Down if pos.y + 1 < height => Some(GridPos::new(pos.x, pos.y + 1)),
            Direction::Right if pos.x + 1 < width => Some(GridPos::new(pos.x + 1, pos.y)),
            Direction::Left if pos.x > 0 => Some(GridPos::new(pos.x - 1, pos.y)),
            _ => None,
        }
    }
}

/// Open doors of a cell, one bit per [`Direction`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DoorMask(pub u8);

impl DoorMask {
    /// No doors open.
    pub const CLOSED: Self = Self(0);

    /// Is the door in `dir` open?
    #[inline]
    pub fn is_open(self, dir: Direction) -> bool {
        self.0 & (1 << dir.index()) != 0
    }

    /// Open the door in `dir`.
    #[inline]
    pub fn open(&mut self, dir: Direction) {
        self.0 |= 1 << dir.index();
    }

    /// Number of open doors.
    pub fn count(self) -> u32 {
        (self.0 & 0x0F).count_ones()
    }

    /// Iterate open directions in door-index order.
    pub fn iter(self) -> impl Iterator<Item = Direction> {
        Direction::ALL.into_iter().filter(move |d| self.is_open(*d))
    }
}

/// What a room does when entered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomKind {
    /// Spawns an enemy batch on first entry.
    #[default]
    Normal,
    /// Where players start; never locks.
    Spawn,
    /// Spawns the boss.
    Boss,
}

// =============================================================================
// LAYOUT
// =============================================================================

/// Template placed on a carved cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedRoom {
    /// Index into the room rules.
    pub template: u16,
    /// Kind of the chosen template.
    pub kind: RoomKind,
}

/// One grid cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutCell {
    /// Open doors. Always closed when there is no room.
    pub doors: DoorMask,
    /// Room on this cell, present iff the carve visited it.
    pub room: Option<PlacedRoom>,
}

/// A generated dungeon.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DungeonLayout {
    /// Cells along X.
    pub width: u32,
    /// Cells along Y.
    pub height: u32,
    /// Start cell index.
    pub start_cell: u32,
    /// Row-major cells.
    pub cells: Vec<LayoutCell>,
}

impl DungeonLayout {
    /// Start cell position.
    pub fn start(&self) -> GridPos {
        GridPos::from_index(self.start_cell, self.width)
    }

    /// Cell at `pos`.
    pub fn cell(&self, pos: GridPos) -> Option<&LayoutCell> {
        if pos.x >= self.width || pos.y >= self.height {
            return None;
        }
        self.cells.get(pos.index(self.width) as usize)
    }

    /// Room at `pos`, if any.
    pub fn room(&self, pos: GridPos) -> Option<PlacedRoom> {
        self.cell(pos).and_then(|c| c.room)
    }

    /// Room positions in row-major order.
    pub fn rooms(&self) -> impl Iterator<Item = (GridPos, PlacedRoom)> + '_ {
        let width = self.width;
        self.cells.iter().enumerate().filter_map(move |(i, c)| {
            c.room.map(|r| (GridPos::from_index(i as u32, width), r))
        })
    }

    /// Number of rooms.
    pub fn room_count(&self) -> usize {
        self.cells.iter().filter(|c| c.room.is_some()).count()
    }

    /// Room across an open door.
    pub fn neighbor(&self, pos: GridPos, dir: Direction) -> Option<GridPos> {
        let cell = self.cell(pos)?;
        if !cell.doors.is_open(dir) {
            return None;
        }
        let next = dir.step(pos, self.width, self.height)?;
        self.room(next).map(|_| next)
    }

    /// First room of the given kind in row-major order.
    pub fn find_kind(&self, kind: RoomKind) -> Option<GridPos> {
        self.rooms().find(|(_, r)| r.kind == kind).map(|(p, _)| p)
    }

    /// Where players appear: the spawn room, or the start cell.
    pub fn spawn_room(&self) -> GridPos {
        self.find_kind(RoomKind::Spawn).unwrap_or_else(|| self.start())
    }

    /// Does every open door have a matching open door on the other side?
    pub fn doors_consistent(&self) -> bool {
        for (i, cell) in self.cells.iter().enumerate() {
            let pos = GridPos::from_index(i as u32, self.width);
            for dir in cell.doors.iter() {
                let Some(next) = dir.step(pos, self.width, self.height) else {
                    return false;
                };
                match self.cell(next) {
                    Some(other) if other.doors.is_open(dir.opposite()) => {}
                    _ => return false,
                }
            }
        }
        true
    }

    /// Rooms not reachable from the start cell through open doors.
    pub fn unreachable_rooms(&self) -> Vec<GridPos> {
        let mut seen = vec![false; self.cells.len()];
        let mut queue = VecDeque::new();

        let start = self.start();
        if self.room(start).is_some() {
            seen[self.start_cell as usize] = true;
            queue.push_back(start);
        }

        while let Some(pos) = queue.pop_front() {
            for dir in Direction::ALL {
                if let Some(next) = self.neighbor(pos, dir) {
                    let idx = next.index(self.width) as usize;
                    if !seen[idx] {
                        seen[idx] = true;
                        queue.push_back(next);
                    }
                }
            }
        }

        self.rooms()
            .filter(|(p, _)| !seen[p.index(self.width) as usize])
            .map(|(p, _)| p)
            .collect()
    }

    /// Digest every peer recomputes before applying a received layout.
    pub fn digest(&self) -> StateHash {
        let mut hasher = StateHasher::for_layout();
        hasher.update_u32(self.width);
        hasher.update_u32(self.height);
        hasher.update_u32(self.start_cell);
        for cell in &self.cells {
            hasher.update_u8(cell.doors.0);
            match cell.room {
                Some(room) => {
                    hasher.update_bool(true);
                    hasher.update_u32(room.template as u32);
                    hasher.update_u8(room.kind as u8);
                }
                None => hasher.update_bool(false),
            }
        }
        hasher.finalize()
    }

    /// Structural sanity of a layout received from the network.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.cells.len() as u64 == self.width as u64 * self.height as u64
            && (self.start_cell as u64) < self.width as u64 * self.height as u64
            && self.cells.iter().all(|c| c.room.is_some() || c.doors == DoorMask::CLOSED)
    }
}

// =============================================================================
// GENERATION
// =============================================================================

/// Raw carve output.
#[derive(Clone, Debug)]
pub struct CarveResult {
    /// Visited flag per cell.
    pub visited: Vec<bool>,
    /// Door mask per cell.
    pub doors: Vec<DoorMask>,
    /// Loop iterations used.
    pub steps: u32,
}

/// Randomized depth-first carve.
///
/// Stops when the last cell is reached, the backtrack stack empties, or
/// after [`MAX_CARVE_STEPS`] iterations. An empty grid or a start outside
/// it carves nothing.
pub fn carve(width: u32, height: u32, start_cell: u32, rng: &mut DeterministicRng) -> CarveResult {
    let count = (width as usize).saturating_mul(height as usize);
    if start_cell as usize >= count {
        warn!(width, height, start_cell, "Start cell outside grid");
        return CarveResult { visited: vec![false; count], doors: vec![DoorMask::CLOSED; count], steps: 0 };
    }
    let mut visited = vec![false; count];
    let mut doors = vec![DoorMask::CLOSED; count];
    let mut stack: Vec<u32> = Vec::new();
    let mut current = start_cell;
    let mut steps = 0;

    while steps < MAX_CARVE_STEPS {
        steps += 1;
        visited[current as usize] = true;

        if current as usize == count - 1 {
            break;
        }

        let pos = GridPos::from_index(current, width);
        let neighbors: Vec<(Direction, GridPos)> = Direction::ALL
            .into_iter()
            .filter_map(|dir| dir.step(pos, width, height).map(|next| (dir, next)))
            .filter(|(_, next)| !visited[next.index(width) as usize])
            .collect();

        match rng.choose(&neighbors) {
            None => match stack.pop() {
                Some(prev) => current = prev,
                None => break,
            },
            Some(&(dir, next)) => {
                stack.push(current);
                let next_index = next.index(width);
                doors[current as usize].open(dir);
                doors[next_index as usize].open(dir.opposite());
                current = next_index;
            }
        }
    }

    CarveResult { visited, doors, steps }
}

/// Pick a template for a cell: first obligatory rule, else a random
/// applicable rule, else rule 0.
pub fn choose_template(rules: &[RoomRule], pos: GridPos, rng: &mut DeterministicRng) -> u16 {
    let mut available = Vec::new();
    for (i, rule) in rules.iter().enumerate() {
        match rule.placement_score(pos) {
            2 => return i as u16,
            1 => available.push(i as u16),
            _ => {}
        }
    }
    rng.choose(&available).copied().unwrap_or(0)
}

/// Generate a complete layout.
pub fn generate_layout(config: &DungeonConfig, rng: &mut DeterministicRng) -> DungeonLayout {
    let CarveResult { visited, doors, steps } =
        carve(config.width, config.height, config.start_cell, rng);

    let cells = visited
        .iter()
        .zip(doors)
        .enumerate()
        .map(|(i, (&was_visited, doors))| {
            if !was_visited {
                return LayoutCell::default();
            }
            let pos = GridPos::from_index(i as u32, config.width);
            let template = choose_template(&config.rules, pos, rng);
            let kind = config
                .rules
                .get(template as usize)
                .map(|r| r.kind)
                .unwrap_or_default();
            LayoutCell { doors, room: Some(PlacedRoom { template, kind }) }
        })
        .collect();

    let layout = DungeonLayout {
        width: config.width,
        height: config.height,
        start_cell: config.start_cell,
        cells,
    };

    debug!(
        steps,
        rooms = layout.room_count(),
        "Carved {}x{} dungeon", config.width, config.height
    );

    let unreachable = layout.unreachable_rooms();
    if !unreachable.is_empty() {
        warn!(?unreachable, "Generated layout has unreachable rooms");
    }

    layout
}

// =============================================================================
// TESTS
// =============================================================================
