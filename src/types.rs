use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex},
};

use crate::desk::RaceDesk;

// ── Constants ──────────────────────────────────────────────────────────

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:17880";
pub const DEFAULT_INITIAL_ROUNDS: u32 = 3;
/// Qualification needs at least this many distinct initial rounds.
pub const MIN_POOL_ROUNDS: usize = 3;
pub const MAX_PROGRESSION_PASSES: usize = 8;
pub const SEED_LIST_SIZES: [usize; 7] = [8, 16, 32, 36, 48, 52, 64];
pub const DEFAULT_EVENT_NAME: &str = "XCE race";
pub const DEFAULT_CATEGORY: &str = "Open";

// ── Ids & shared state ─────────────────────────────────────────────────

pub type ParticipantId = u64;
pub type EventId = u64;
pub type HeatId = u64;

pub type SharedDesk = Arc<Mutex<RaceDesk>>;

// ── Config ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub bind_addr: String,
    pub data_path: String,
    pub static_dir: String,
    pub log_dir: String,
    pub shuffle_seed: Option<u64>,
    /// 0 means unset; the desk falls back to `DEFAULT_INITIAL_ROUNDS`.
    pub initial_rounds: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: String::new(),
            data_path: String::new(),
            static_dir: String::new(),
            log_dir: String::new(),
            shuffle_seed: None,
            initial_rounds: 0,
        }
    }
}

// ── Domain records ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bracket {
    Initial,
    Winners,
    Losers,
}

impl Bracket {
    pub const KNOCKOUT: [Bracket; 2] = [Bracket::Winners, Bracket::Losers];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bracket::Initial => "initial",
            Bracket::Winners => "winners",
            Bracket::Losers => "losers",
        }
    }

    pub fn is_knockout(&self) -> bool {
        !matches!(self, Bracket::Initial)
    }
}

impl fmt::Display for Bracket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub bib: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub name: String,
    pub category: String,
    pub total_rounds: u32,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    /// Roster in draw order.
    pub participant_ids: Vec<ParticipantId>,
    #[serde(default)]
    pub points: BTreeMap<ParticipantId, u32>,
}

/// Seeding carried into a qualification heat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedHint {
    pub pool_rank: u32,
    pub points: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub time_ms: Option<u64>,
    pub time_text: Option<String>,
}

impl TimeEntry {
    pub fn is_recorded(&self) -> bool {
        self.time_ms.is_some() || self.time_text.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEntry {
    pub position: u32,
    pub points: u32,
    pub time_ms: Option<u64>,
    pub time_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heat {
    pub id: HeatId,
    pub event_id: EventId,
    pub round: u32,
    pub bracket: Bracket,
    pub stage_tier: u32,
    pub heat_index: u32,
    pub participant_ids: Vec<ParticipantId>,
    #[serde(default)]
    pub seed: BTreeMap<ParticipantId, SeedHint>,
    #[serde(default)]
    pub times: BTreeMap<ParticipantId, TimeEntry>,
    #[serde(default)]
    pub results: BTreeMap<ParticipantId, ResultEntry>,
}

impl Heat {
    pub fn slots(&self) -> usize {
        self.participant_ids.len()
    }

    /// Every runner in the heat has a usable time or time text.
    pub fn has_all_times(&self) -> bool {
        self.participant_ids
            .iter()
            .all(|pid| self.times.get(pid).is_some_and(TimeEntry::is_recorded))
    }
}

// ── Store query rows ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillStatus {
    pub heat_id: HeatId,
    pub round: u32,
    pub slots: usize,
    pub filled: usize,
}

impl FillStatus {
    pub fn is_filled(&self) -> bool {
        self.filled == self.slots
    }
}

/// One participant's standing in one initial heat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolRow {
    pub round: u32,
    pub heat_index: u32,
    pub participant_id: ParticipantId,
    pub bib: Option<u32>,
    pub name: String,
    pub position: Option<u32>,
    pub points: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRow {
    pub stage_tier: u32,
    pub heat_index: u32,
    pub heat_id: HeatId,
    pub heat_size: usize,
    pub participant_id: ParticipantId,
    pub bib: Option<u32>,
    pub position: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketHeatRow {
    pub heat_id: HeatId,
    pub round: u32,
    pub bracket: Bracket,
    pub heat_index: u32,
    pub slots: usize,
    pub filled: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalRankingRow {
    pub participant_id: ParticipantId,
    pub name: String,
    pub bracket: Bracket,
    pub round: u32,
    pub stage_tier: u32,
    pub position: u32,
    pub event_points: u32,
}

// ── Views ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatParticipant {
    pub participant_id: ParticipantId,
    pub name: String,
    pub bib: Option<u32>,
    /// Timing order inside the heat: bib then id.
    pub chrono_order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatCard {
    pub id: HeatId,
    pub round: u32,
    pub bracket: Bracket,
    pub stage_tier: u32,
    pub heat_index: u32,
    pub participants: Vec<HeatParticipant>,
    pub seed: BTreeMap<ParticipantId, SeedHint>,
    pub times: BTreeMap<ParticipantId, TimeEntry>,
    pub results: BTreeMap<ParticipantId, ResultEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketSlot {
    pub participant_id: ParticipantId,
    pub name: String,
    pub position: Option<u32>,
    pub points: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketHeatCard {
    /// None for a qualification preview that is not stored yet.
    pub heat_id: Option<HeatId>,
    pub stage_tier: u32,
    pub heat_index: u32,
    pub participants: Vec<BracketSlot>,
}

pub type RoundColumns = BTreeMap<u32, Vec<BracketHeatCard>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketView {
    pub initial: RoundColumns,
    pub winners: RoundColumns,
    pub losers: RoundColumns,
}

impl BracketView {
    pub fn column_mut(&mut self, bracket: Bracket) -> &mut RoundColumns {
        match bracket {
            Bracket::Initial => &mut self.initial,
            Bracket::Winners => &mut self.winners,
            Bracket::Losers => &mut self.losers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub place: u32,
    pub participant_id: ParticipantId,
    pub name: String,
    pub bracket: Bracket,
    pub stage_tier: u32,
    pub round: u32,
    pub position: u32,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRow {
    pub participant_id: ParticipantId,
    pub name: String,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChronoRow {
    pub participant_id: ParticipantId,
    pub name: String,
    pub bib: Option<u32>,
    pub best_ms: Option<u64>,
    pub best_text: Option<String>,
    pub rank: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeskView {
    pub active_event: Option<Event>,
    pub latest_event: Option<Event>,
    pub participants: Vec<Participant>,
    pub current_round: Option<u32>,
    pub heats: Vec<HeatCard>,
    pub brackets: BracketView,
    pub leaderboard: Vec<LeaderboardRow>,
    pub final_ranking: Vec<Placement>,
    pub chrono_board: Vec<ChronoRow>,
    pub chronos_done: bool,
    pub current_round_participants: BTreeMap<ParticipantId, String>,
}
