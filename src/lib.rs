use rand::rngs::StdRng;
use rand::{thread_rng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_wasm_bindgen::{from_value, to_value};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;

pub const WIDTH: usize = 14;
pub const HEIGHT: usize = 30;
const SPAWN_X: i32 = WIDTH as i32 / 2 - 2;
const HIGH_SCORE_KEY: &str = "tetrisHighScore";

#[wasm_bindgen(start)]
pub fn bootstrap() {
    console_error_panic_hook::set_once();
}

fn log(msg: &str) {
    #[cfg(target_arch = "wasm32")]
    web_sys::console::log_1(&JsValue::from_str(msg));
    #[cfg(not(target_arch = "wasm32"))]
    eprintln!("{msg}");
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Tetromino {
    O,
    I,
    T,
    S,
    Z,
    L,
    J,
}

impl Tetromino {
    pub fn all() -> [Tetromino; 7] {
        [
            Tetromino::O,
            Tetromino::I,
            Tetromino::T,
            Tetromino::S,
            Tetromino::Z,
            Tetromino::L,
            Tetromino::J,
        ]
    }

    /// Canonical spawn orientation.
    pub fn shape(self) -> Shape {
        let rows: &[&[u8]] = match self {
            Tetromino::O => &[&[1, 1], &[1, 1]],
            Tetromino::I => &[&[1, 1, 1, 1]],
            Tetromino::T => &[&[1, 1, 1], &[0, 1, 0]],
            Tetromino::S => &[&[1, 0], &[1, 1], &[0, 1]],
            Tetromino::Z => &[&[0, 1], &[1, 1], &[1, 0]],
            Tetromino::L => &[&[1, 0], &[1, 0], &[1, 1]],
            Tetromino::J => &[&[0, 1], &[0, 1], &[1, 1]],
        };
        Shape::from_rows(rows)
    }

    pub fn color(self) -> &'static str {
        match self {
            Tetromino::O => "cyan",
            Tetromino::I => "yellow",
            Tetromino::T => "purple",
            Tetromino::S => "green",
            Tetromino::Z => "red",
            Tetromino::L => "blue",
            Tetromino::J => "orange",
        }
    }

    pub fn color_id(self) -> u8 {
        match self {
            Tetromino::O => 1,
            Tetromino::I => 2,
            Tetromino::T => 3,
            Tetromino::S => 4,
            Tetromino::Z => 5,
            Tetromino::L => 6,
            Tetromino::J => 7,
        }
    }
}

/// Row-major occupancy grid. Never mutated once built; rotation yields a new shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shape {
    width: usize,
    height: usize,
    cells: Vec<bool>,
}

impl Shape {
    /// Short rows are padded with empty cells up to the widest row.
    pub fn from_rows(rows: &[&[u8]]) -> Self {
        let height = rows.len();
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        let cells = rows
            .iter()
            .flat_map(|row| (0..width).map(move |x| row.get(x).is_some_and(|&v| v != 0)))
            .collect();
        Self {
            width,
            height,
            cells,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_filled(&self, dx: usize, dy: usize) -> bool {
        dx < self.width && dy < self.height && self.cells[dy * self.width + dx]
    }

    /// Offsets `(dx, dy)` of the occupied cells, top row first.
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|&(_, &filled)| filled)
            .map(move |(i, _)| ((i % self.width) as i32, (i / self.width) as i32))
    }

    pub fn cell_count(&self) -> u32 {
        self.cells.iter().filter(|&&c| c).count() as u32
    }

    /// Clockwise quarter turn: transpose, then reverse each row.
    pub fn rotated_cw(&self) -> Shape {
        let mut cells = Vec::with_capacity(self.cells.len());
        for col in 0..self.width {
            for row in (0..self.height).rev() {
                cells.push(self.is_filled(col, row));
            }
        }
        Shape {
            width: self.height,
            height: self.width,
            cells,
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Occupied,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Board {
    rows: Vec<[Cell; WIDTH]>,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    pub fn new() -> Self {
        Self {
            rows: vec![[Cell::Empty; WIDTH]; HEIGHT],
        }
    }

    pub fn width(&self) -> usize {
        WIDTH
    }

    pub fn height(&self) -> usize {
        HEIGHT
    }

    /// `None` outside the grid, including any row above the top.
    pub fn get(&self, x: i32, y: i32) -> Option<Cell> {
        if x < 0 || y < 0 {
            return None;
        }
        self.rows
            .get(y as usize)
            .and_then(|row| row.get(x as usize))
            .copied()
    }

    pub fn set(&mut self, x: i32, y: i32, cell: Cell) -> bool {
        if x < 0 || y < 0 || x >= WIDTH as i32 || y >= HEIGHT as i32 {
            return false;
        }
        self.rows[y as usize][x as usize] = cell;
        true
    }

    pub fn is_occupied(&self, x: i32, y: i32) -> bool {
        self.get(x, y) == Some(Cell::Occupied)
    }

    pub fn is_row_full(&self, y: usize) -> bool {
        self.rows
            .get(y)
            .is_some_and(|row| row.iter().all(|&c| c == Cell::Occupied))
    }

    pub fn rows(&self) -> &[[Cell; WIDTH]] {
        &self.rows
    }

    /// Writes every occupied cell of `shape` at `position` and returns how many
    /// cells were written. The caller has already checked for collisions.
    pub fn lock(&mut self, shape: &Shape, position: Point) -> u32 {
        let mut count = 0;
        for (dx, dy) in shape.cells() {
            self.set(position.x + dx, position.y + dy, Cell::Occupied);
            count += 1;
        }
        count
    }

    /// Removes every full row, inserting an empty row at the top for each one.
    pub fn clear_full_rows(&mut self) -> u32 {
        let mut cleared = 0;
        for y in 0..HEIGHT {
            if self.is_row_full(y) {
                // rows above y slide down into the gap; row y now holds an already-checked row
                self.rows.remove(y);
                self.rows.insert(0, [Cell::Empty; WIDTH]);
                cleared += 1;
            }
        }
        cleared
    }

    pub fn reset(&mut self) {
        for row in self.rows.iter_mut() {
            *row = [Cell::Empty; WIDTH];
        }
    }
}

/// True when any occupied cell of `shape` placed at `position` leaves the board
/// or overlaps an occupied board cell.
pub fn collides(board: &Board, shape: &Shape, position: Point) -> bool {
    shape.cells().any(|(dx, dy)| {
        let x = position.x + dx;
        let y = position.y + dy;
        if x < 0 || x >= WIDTH as i32 || y >= HEIGHT as i32 {
            return true;
        }
        board.get(x, y) != Some(Cell::Empty)
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivePiece {
    pub kind: Tetromino,
    pub shape: Shape,
    pub position: Point,
}

impl ActivePiece {
    pub fn new(kind: Tetromino) -> Self {
        Self {
            kind,
            shape: kind.shape(),
            position: Point { x: SPAWN_X, y: 0 },
        }
    }

    pub fn cells_at(&self, position: Point) -> Vec<Point> {
        self.shape
            .cells()
            .map(|(dx, dy)| Point {
                x: position.x + dx,
                y: position.y + dy,
            })
            .collect()
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub enum RandomizerKind {
    #[default]
    TrueRandom,
    Seeded {
        seed: u64,
    },
    SinglePiece {
        piece: Tetromino,
    },
}

trait Randomizer {
    fn next(&mut self) -> Tetromino;
}

struct TrueRandom;

impl Randomizer for TrueRandom {
    fn next(&mut self) -> Tetromino {
        let all = Tetromino::all();
        all[thread_rng().gen_range(0..all.len())]
    }
}

struct Seeded {
    rng: StdRng,
}

impl Randomizer for Seeded {
    fn next(&mut self) -> Tetromino {
        let all = Tetromino::all();
        all[self.rng.gen_range(0..all.len())]
    }
}

struct SinglePiece {
    piece: Tetromino,
}

impl Randomizer for SinglePiece {
    fn next(&mut self) -> Tetromino {
        self.piece
    }
}

fn randomizer_from_kind(kind: RandomizerKind) -> Box<dyn Randomizer> {
    match kind {
        RandomizerKind::TrueRandom => Box::new(TrueRandom),
        RandomizerKind::Seeded { seed } => Box::new(Seeded {
            rng: StdRng::seed_from_u64(seed),
        }),
        RandomizerKind::SinglePiece { piece } => Box::new(SinglePiece { piece }),
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AudioCue {
    PiecePlaced,
    RowsRemoved,
    GameOver,
    MusicPlay,
    MusicPause,
    MusicStop,
    VolumeChanged,
}

impl AudioCue {
    /// Cues that make a sound; the rest only pause, rewind or retune playback.
    pub fn is_audible(self) -> bool {
        matches!(
            self,
            AudioCue::PiecePlaced | AudioCue::RowsRemoved | AudioCue::GameOver | AudioCue::MusicPlay
        )
    }
}

/// Fire-and-forget sound notifications. Mute and volume belong to the sink.
pub trait AudioSink {
    fn play(&mut self, cue: AudioCue);
}

pub struct NullAudio;

impl AudioSink for NullAudio {
    fn play(&mut self, _cue: AudioCue) {}
}

/// A single persisted integer slot.
pub trait HighScoreStore {
    /// Returns 0 when nothing has been stored yet.
    fn load(&self) -> u32;
    fn save(&mut self, score: u32) -> Result<(), String>;
}

/// In-memory slot; clones share the same value.
#[derive(Clone, Default)]
pub struct MemoryStore {
    slot: Rc<RefCell<Option<u32>>>,
}

impl MemoryStore {
    pub fn with_value(score: u32) -> Self {
        Self {
            slot: Rc::new(RefCell::new(Some(score))),
        }
    }

    pub fn value(&self) -> Option<u32> {
        *self.slot.borrow()
    }
}

impl HighScoreStore for MemoryStore {
    fn load(&self) -> u32 {
        self.value().unwrap_or(0)
    }

    fn save(&mut self, score: u32) -> Result<(), String> {
        *self.slot.borrow_mut() = Some(score);
        Ok(())
    }
}

/// Browser `localStorage` slot.
pub struct LocalStorageStore {
    key: String,
}

impl LocalStorageStore {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }

    fn storage() -> Result<web_sys::Storage, String> {
        web_sys::window()
            .ok_or("no window")?
            .local_storage()
            .map_err(|_| "localStorage unavailable")?
            .ok_or_else(|| "localStorage disabled".to_string())
    }
}

impl HighScoreStore for LocalStorageStore {
    fn load(&self) -> u32 {
        let stored = Self::storage().and_then(|s| {
            s.get_item(&self.key)
                .map_err(|_| "failed to read high score".to_string())
        });
        match stored {
            Ok(Some(raw)) => raw.trim().parse().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                log(&e);
                0
            }
        }
    }

    fn save(&mut self, score: u32) -> Result<(), String> {
        Self::storage()?
            .set_item(&self.key, &score.to_string())
            .map_err(|_| "failed to write high score".to_string())
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    MoveLeft,
    MoveRight,
    SoftDrop,
    Rotate,
    HardDrop,
    Start,
    TogglePause,
    Restart,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ControlBindings {
    pub move_left: String,
    pub move_right: String,
    pub soft_drop: String,
    pub rotate: String,
    pub hard_drop: String,
}

impl Default for ControlBindings {
    fn default() -> Self {
        Self {
            move_left: "ArrowLeft".to_string(),
            move_right: "ArrowRight".to_string(),
            soft_drop: "ArrowDown".to_string(),
            rotate: "ArrowUp".to_string(),
            hard_drop: "Space".to_string(),
        }
    }
}

impl ControlBindings {
    pub fn command_for(&self, key: &str) -> Option<Command> {
        if key == self.move_left {
            Some(Command::MoveLeft)
        } else if key == self.move_right {
            Some(Command::MoveRight)
        } else if key == self.soft_drop {
            Some(Command::SoftDrop)
        } else if key == self.rotate {
            Some(Command::Rotate)
        } else if key == self.hard_drop {
            Some(Command::HardDrop)
        } else {
            None
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct GameSettings {
    pub drop_interval_ms: f32,
    pub row_bonus: u32,
    pub ghost_enabled: bool,
    pub randomizer: RandomizerKind,
    pub controls: ControlBindings,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            drop_interval_ms: 400.0,
            row_bonus: 14,
            ghost_enabled: true,
            randomizer: RandomizerKind::TrueRandom,
            controls: ControlBindings::default(),
        }
    }
}

impl GameSettings {
    /// Replaces a drop interval that could never elapse (NaN, infinite, zero or negative).
    fn sanitized(mut self) -> Self {
        if !self.drop_interval_ms.is_finite() || self.drop_interval_ms <= 0.0 {
            log(&format!(
                "ignoring drop interval {}, using default",
                self.drop_interval_ms
            ));
            self.drop_interval_ms = GameSettings::default().drop_interval_ms;
        }
        self
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    Running,
    Paused,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FrameView {
    pub width: usize,
    pub height: usize,
    pub field: Vec<u8>,
    pub active: Vec<Point>,
    pub active_color: Option<&'static str>,
    pub active_color_id: Option<u8>,
    pub ghost: Vec<Point>,
    pub score: u32,
    pub high_score: u32,
    pub phase: Phase,
    pub game_over: bool,
}

pub struct Game {
    board: Board,
    active: Option<ActivePiece>,
    phase: Phase,
    score: u32,
    high_score: u32,
    drop_accum: f32,
    game_over: bool,
    settings: GameSettings,
    randomizer: Box<dyn Randomizer>,
    audio: Box<dyn AudioSink>,
    store: Box<dyn HighScoreStore>,
}

impl Game {
    pub fn new(
        settings: GameSettings,
        audio: Box<dyn AudioSink>,
        store: Box<dyn HighScoreStore>,
    ) -> Self {
        let settings = settings.sanitized();
        let high_score = store.load();
        Self {
            board: Board::new(),
            active: None,
            phase: Phase::Idle,
            score: 0,
            high_score,
            drop_accum: 0.0,
            game_over: false,
            randomizer: randomizer_from_kind(settings.randomizer.clone()),
            settings,
            audio,
            store,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn active(&self) -> Option<&ActivePiece> {
        self.active.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn running(&self) -> bool {
        self.phase != Phase::Idle
    }

    pub fn paused(&self) -> bool {
        self.phase == Phase::Paused
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn high_score(&self) -> u32 {
        self.high_score
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub fn handle(&mut self, command: Command) {
        match command {
            Command::MoveLeft => {
                self.move_left();
            }
            Command::MoveRight => {
                self.move_right();
            }
            Command::SoftDrop => {
                self.soft_drop();
            }
            Command::Rotate => {
                self.rotate();
            }
            Command::HardDrop => self.hard_drop(),
            Command::Start => self.start(),
            Command::TogglePause => self.toggle_pause(),
            Command::Restart => self.restart(),
        }
    }

    pub fn start(&mut self) {
        if self.phase != Phase::Idle {
            return;
        }
        self.phase = Phase::Running;
        self.drop_accum = 0.0;
        self.game_over = false;
        self.audio.play(AudioCue::MusicPlay);
        if !self.spawn() {
            self.end_session();
        }
    }

    pub fn pause(&mut self) {
        if self.phase == Phase::Running {
            self.phase = Phase::Paused;
            self.audio.play(AudioCue::MusicPause);
        }
    }

    pub fn resume(&mut self) {
        if self.phase == Phase::Paused {
            self.phase = Phase::Running;
            self.audio.play(AudioCue::MusicPlay);
        }
    }

    pub fn toggle_pause(&mut self) {
        match self.phase {
            Phase::Running => self.pause(),
            Phase::Paused => self.resume(),
            Phase::Idle => {}
        }
    }

    pub fn restart(&mut self) {
        self.board.reset();
        self.score = 0;
        self.drop_accum = 0.0;
        self.game_over = false;
        self.active = None;
        self.audio.play(AudioCue::MusicStop);
        self.phase = Phase::Running;
        self.audio.play(AudioCue::MusicPlay);
        if !self.spawn() {
            self.end_session();
        }
    }

    /// Advances the drop timer; a no-op unless running and unpaused.
    pub fn tick(&mut self, dt_ms: f32) {
        if self.phase != Phase::Running {
            return;
        }
        self.drop_accum += dt_ms.max(0.0);
        if self.drop_accum > self.settings.drop_interval_ms {
            if !self.try_move(0, 1) {
                self.resolve_lock();
            }
            self.drop_accum = 0.0;
        }
    }

    pub fn move_left(&mut self) -> bool {
        self.accepts_input() && self.try_move(-1, 0)
    }

    pub fn move_right(&mut self) -> bool {
        self.accepts_input() && self.try_move(1, 0)
    }

    /// Returns whether the piece moved; a rejected step locks it in place.
    pub fn soft_drop(&mut self) -> bool {
        if !self.accepts_input() {
            return false;
        }
        if self.try_move(0, 1) {
            return true;
        }
        self.resolve_lock();
        false
    }

    /// Clockwise turn with no wall kicks; a colliding rotation is discarded.
    pub fn rotate(&mut self) -> bool {
        if !self.accepts_input() {
            return false;
        }
        let Some(piece) = self.active.as_mut() else {
            return false;
        };
        let rotated = piece.shape.rotated_cw();
        if collides(&self.board, &rotated, piece.position) {
            return false;
        }
        piece.shape = rotated;
        true
    }

    pub fn hard_drop(&mut self) {
        if !self.accepts_input() {
            return;
        }
        while self.try_move(0, 1) {}
        self.resolve_lock();
    }

    /// Suspends or resumes the music only; the drop timer keeps its own state.
    pub fn visibility_changed(&mut self, hidden: bool) {
        if hidden {
            if self.running() {
                self.audio.play(AudioCue::MusicPause);
            }
        } else if self.phase == Phase::Running {
            self.audio.play(AudioCue::MusicPlay);
        }
    }

    /// Where the active piece would land if dropped straight down.
    pub fn ghost_position(&self) -> Option<Point> {
        let piece = self.active.as_ref()?;
        let mut ghost = piece.position;
        while !collides(
            &self.board,
            &piece.shape,
            Point {
                x: ghost.x,
                y: ghost.y + 1,
            },
        ) {
            ghost.y += 1;
        }
        Some(ghost)
    }

    pub fn snapshot(&self) -> FrameView {
        let field = self
            .board
            .rows()
            .iter()
            .flat_map(|row| row.iter().map(|&c| (c == Cell::Occupied) as u8))
            .collect();
        let active = self
            .active
            .as_ref()
            .map(|p| p.cells_at(p.position))
            .unwrap_or_default();
        let ghost = match (self.settings.ghost_enabled, self.active.as_ref()) {
            (true, Some(piece)) => self
                .ghost_position()
                .map(|at| piece.cells_at(at))
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        FrameView {
            width: WIDTH,
            height: HEIGHT,
            field,
            active,
            active_color: self.active.as_ref().map(|p| p.kind.color()),
            active_color_id: self.active.as_ref().map(|p| p.kind.color_id()),
            ghost,
            score: self.score,
            high_score: self.high_score,
            phase: self.phase,
            game_over: self.game_over,
        }
    }

    fn accepts_input(&self) -> bool {
        self.phase == Phase::Running
    }

    fn try_move(&mut self, dx: i32, dy: i32) -> bool {
        let Some(piece) = self.active.as_mut() else {
            return false;
        };
        let next = Point {
            x: piece.position.x + dx,
            y: piece.position.y + dy,
        };
        if collides(&self.board, &piece.shape, next) {
            return false;
        }
        piece.position = next;
        true
    }

    /// Returns false when the new piece does not fit.
    fn spawn(&mut self) -> bool {
        let piece = ActivePiece::new(self.randomizer.next());
        let fits = !collides(&self.board, &piece.shape, piece.position);
        self.active = Some(piece);
        fits
    }

    fn resolve_lock(&mut self) {
        let Some(piece) = self.active.take() else {
            return;
        };
        let locked = self.board.lock(&piece.shape, piece.position);
        self.score = self.score.saturating_add(locked);
        self.record_high_score();

        let cleared = self.board.clear_full_rows();
        if cleared > 0 {
            self.score = self
                .score
                .saturating_add(cleared.saturating_mul(self.settings.row_bonus));
            self.record_high_score();
            self.audio.play(AudioCue::RowsRemoved);
        }

        if self.spawn() {
            self.audio.play(AudioCue::PiecePlaced);
        } else {
            self.end_session();
        }
    }

    fn record_high_score(&mut self) {
        if self.score <= self.high_score {
            return;
        }
        self.high_score = self.score;
        if let Err(e) = self.store.save(self.high_score) {
            log(&format!("could not persist high score: {e}"));
        }
    }

    fn end_session(&mut self) {
        log(&format!(
            "Game over at score {} (high score {})",
            self.score, self.high_score
        ));
        self.phase = Phase::Idle;
        self.active = None;
        self.score = 0;
        self.drop_accum = 0.0;
        self.game_over = true;
        self.board.reset();
        self.audio.play(AudioCue::GameOver);
        self.audio.play(AudioCue::MusicStop);
    }
}

type CueHandler = Box<dyn Fn(AudioCue, f64)>;

struct AudioMixer {
    handler: Option<CueHandler>,
    muted: bool,
    volume: f64,
    music_wanted: bool,
}

impl Default for AudioMixer {
    fn default() -> Self {
        Self {
            handler: None,
            muted: false,
            volume: 0.1,
            music_wanted: false,
        }
    }
}

impl AudioMixer {
    fn emit(&self, cue: AudioCue) {
        if let Some(handler) = self.handler.as_ref() {
            handler(cue, self.volume);
        }
    }

    /// Silent cues pass through while muted so stop still rewinds the music.
    fn forward(&mut self, cue: AudioCue) {
        match cue {
            AudioCue::MusicPlay => self.music_wanted = true,
            AudioCue::MusicPause | AudioCue::MusicStop => self.music_wanted = false,
            _ => {}
        }
        if !self.muted || !cue.is_audible() {
            self.emit(cue);
        }
    }

    fn set_muted(&mut self, muted: bool) {
        if muted == self.muted {
            return;
        }
        if muted {
            if self.music_wanted {
                self.emit(AudioCue::MusicPause);
            }
            self.muted = true;
        } else {
            self.muted = false;
            if self.music_wanted {
                self.emit(AudioCue::MusicPlay);
            }
        }
    }

    fn set_volume(&mut self, volume: f64) {
        self.volume = volume.clamp(0.0, 1.0);
        self.emit(AudioCue::VolumeChanged);
    }
}

/// Wraps a page callback `handler(cueName, volume)`.
fn js_cue_handler(handler: js_sys::Function) -> CueHandler {
    Box::new(move |cue: AudioCue, volume: f64| {
        let name = match to_value(&cue) {
            Ok(name) => name,
            Err(e) => {
                log(&format!("could not encode audio cue {cue:?}: {e}"));
                return;
            }
        };
        if let Err(e) = handler.call2(&JsValue::NULL, &name, &JsValue::from_f64(volume)) {
            log(&format!("audio handler failed: {e:?}"));
        }
    })
}

#[derive(Clone, Default)]
struct JsAudio {
    mixer: Rc<RefCell<AudioMixer>>,
}

impl AudioSink for JsAudio {
    fn play(&mut self, cue: AudioCue) {
        self.mixer.borrow_mut().forward(cue);
    }
}


#[wasm_bindgen]
pub struct GameClient {
    game: Game,
    mixer: Rc<RefCell<AudioMixer>>,
}

#[wasm_bindgen]
impl GameClient {
    #[wasm_bindgen(constructor)]
    pub fn new(settings: JsValue) -> Result<GameClient, JsValue> {
        let settings: GameSettings = from_value(settings).unwrap_or_default();
        let audio = JsAudio::default();
        let mixer = audio.mixer.clone();
        let game = Game::new(
            settings,
            Box::new(audio),
            Box::new(LocalStorageStore::new(HIGH_SCORE_KEY)),
        );
        Ok(Self { game, mixer })
    }

    #[wasm_bindgen(js_name = tick)]
    pub fn tick(&mut self, dt_ms: f32) -> Result<JsValue, JsValue> {
        self.game.tick(dt_ms);
        self.snapshot()
    }

    /// Returns false for keys with no binding so the page can let them through.
    #[wasm_bindgen(js_name = keyDown)]
    pub fn key_down(&mut self, key: &str) -> bool {
        match self.game.settings().controls.command_for(key) {
            Some(command) => {
                self.game.handle(command);
                true
            }
            None => false,
        }
    }

    #[wasm_bindgen(js_name = command)]
    pub fn command(&mut self, name: JsValue) -> Result<(), JsValue> {
        let command: Command = from_value(name).map_err(|e| {
            log(&format!("unknown command: {e}"));
            JsValue::from(e)
        })?;
        self.game.handle(command);
        Ok(())
    }

    #[wasm_bindgen(js_name = start)]
    pub fn start(&mut self) {
        self.game.start();
    }

    #[wasm_bindgen(js_name = togglePause)]
    pub fn toggle_pause(&mut self) -> bool {
        self.game.toggle_pause();
        self.game.paused()
    }

    #[wasm_bindgen(js_name = restart)]
    pub fn restart(&mut self) {
        self.game.restart();
    }

    #[wasm_bindgen(js_name = setVisibility)]
    pub fn set_visibility(&mut self, hidden: bool) {
        self.game.visibility_changed(hidden);
    }

    #[wasm_bindgen(js_name = setMuted)]
    pub fn set_muted(&mut self, muted: bool) {
        self.mixer.borrow_mut().set_muted(muted);
    }

    #[wasm_bindgen(js_name = setVolume)]
    pub fn set_volume(&mut self, volume: f64) {
        self.mixer.borrow_mut().set_volume(volume);
    }

    /// `handler(cueName, volume)`; sounds are held back while muted, stop and pause are not.
    #[wasm_bindgen(js_name = setAudioHandler)]
    pub fn set_audio_handler(&mut self, handler: js_sys::Function) {
        self.mixer.borrow_mut().handler = Some(js_cue_handler(handler));
    }

    #[wasm_bindgen(js_name = snapshot)]
    pub fn snapshot(&self) -> Result<JsValue, JsValue> {
        to_value(&self.game.snapshot()).map_err(|e| e.into())
    }

    #[wasm_bindgen(js_name = snapshotJson)]
    pub fn snapshot_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.game.snapshot()).map_err(|e| JsValue::from_str(&e.to_string()))
    }
}
