use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use tracing::{debug, info};

use crate::bracket::{build_pools_qualification, BracketEngine};
use crate::chrono_codec::parse_chrono;
use crate::error::{DeskError, Result};
use crate::grouping::{chunk_by_sizes, split_3_or_4};
use crate::ranking::{bib_key, points_for_position};
use crate::rng::DeskRng;
use crate::standings::{self, recalc_event_points, sorted_participants};
use crate::store::{HeatStore, MemoryStore};
use crate::types::*;

/// Times keyed by participant, as typed by the timekeeper.
pub type TimesPayload = BTreeMap<ParticipantId, String>;
/// Finishing positions keyed by heat, then participant.
pub type ResultsPayload = BTreeMap<HeatId, BTreeMap<ParticipantId, i64>>;

/// RaceDesk is the front of the tournament: the participant registry, event
/// lifecycle and result entry, with bracket generation triggered behind
/// every submission.
pub struct RaceDesk {
    store: MemoryStore,
    rng: DeskRng,
    initial_rounds: u32,
    /// Set whenever the store changed since the last `take_dirty`.
    dirty: bool,
}

impl RaceDesk {
    pub fn new(store: MemoryStore, config: &AppConfig) -> Self {
        let rng = match config.shuffle_seed {
            Some(seed) => DeskRng::new(seed),
            None => DeskRng::from_clock(),
        };
        RaceDesk {
            store,
            rng,
            initial_rounds: match config.initial_rounds {
                0 => DEFAULT_INITIAL_ROUNDS,
                n => n,
            },
            dirty: false,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Re-arm the flag after a snapshot write failed.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    // ── Participants ────────────────────────────────────────────────────

    pub fn list_participants(&self) -> Vec<Participant> {
        sorted_participants(&self.store)
    }

    /// Register a runner with the next free bib. A name already on the list
    /// returns the existing record untouched.
    pub fn add_participant(&mut self, name: &str) -> Result<Participant> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DeskError::InvalidName);
        }
        if let Some(existing) = self.store.participant_by_name(trimmed) {
            return Ok(existing.clone());
        }
        let bib = self.store.max_bib() + 1;
        let participant = self.store.insert_participant(trimmed.to_string(), Some(bib));
        self.dirty = true;
        info!("participant {} registered with bib {bib}", participant.name);
        Ok(participant)
    }

    /// Wipe everything and register a demo roster of `count` runners.
    pub fn seed_participants(&mut self, count: usize) -> Result<Vec<Participant>> {
        if !SEED_LIST_SIZES.contains(&count) {
            return Err(DeskError::InvalidSeedCount(count));
        }
        self.store.clear();
        for i in 1..=count {
            self.store.insert_participant(format!("Runner {i:02}"), Some(i as u32));
        }
        self.dirty = true;
        info!("seeded {count} participants");
        Ok(self.list_participants())
    }

    pub fn delete_participant(&mut self, id: ParticipantId) -> bool {
        if id == 0 {
            return false;
        }
        let removed = self.store.remove_participant(id);
        if removed {
            self.dirty = true;
            info!("participant {id} deleted");
        }
        removed
    }

    pub fn delete_all_participants(&mut self) {
        self.store.clear();
        self.dirty = true;
        info!("all participants and events cleared");
    }

    // ── Events ──────────────────────────────────────────────────────────

    /// Draw the roster (even ids then odd ids, each shuffled), split it into
    /// pools and lay out the same pools for every initial round.
    pub fn start_event(
        &mut self,
        name: Option<&str>,
        total_rounds: Option<u32>,
        category: Option<&str>,
    ) -> Result<EventId> {
        let ids: Vec<ParticipantId> = self.list_participants().iter().map(|p| p.id).collect();
        if ids.len() < 2 {
            return Err(DeskError::NotEnoughParticipants(ids.len()));
        }
        let (mut evens, mut odds): (Vec<ParticipantId>, Vec<ParticipantId>) =
            ids.into_iter().partition(|id| id % 2 == 0);
        self.rng.shuffle(&mut evens);
        self.rng.shuffle(&mut odds);
        let ordered: Vec<ParticipantId> = evens.into_iter().chain(odds).collect();
        let sizes = split_3_or_4(ordered.len())?;
        let pools = chunk_by_sizes(&ordered, &sizes);

        let rounds = total_rounds.filter(|r| *r > 0).unwrap_or(self.initial_rounds);
        let name = name
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_EVENT_NAME)
            .to_string();
        let category = category
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_CATEGORY)
            .to_string();

        let event_id = self.store.transaction(|tx| {
            tx.archive_active_events();
            let event_id = tx.insert_event(Event {
                id: 0,
                name,
                category,
                total_rounds: rounds,
                status: EventStatus::Active,
                created_at: Utc::now(),
                points: ordered.iter().map(|id| (*id, 0)).collect(),
                participant_ids: ordered.clone(),
            });
            for round in 1..=rounds {
                for (idx, pool) in pools.iter().enumerate() {
                    let heat_id = tx.insert_heat(event_id, round, Bracket::Initial, 0, idx as u32 + 1);
                    for pid in pool {
                        tx.insert_heat_participant(heat_id, *pid);
                    }
                }
            }
            Ok(event_id)
        })?;
        self.dirty = true;
        info!(
            "event {event_id} started: {} participants in {} pools over {rounds} rounds",
            ordered.len(),
            pools.len()
        );
        Ok(event_id)
    }

    pub fn close_event(&mut self, event_id: EventId) -> bool {
        let Some(event) = self.store.event_mut(event_id) else {
            return false;
        };
        event.status = EventStatus::Archived;
        self.dirty = true;
        info!("event {event_id} closed");
        true
    }

    /// Run qualification and bracket progression for an event. Safe to call
    /// any time; it only writes what is missing.
    pub fn catch_up(&mut self, event_id: EventId) -> bool {
        let mut engine = BracketEngine::new(&mut self.store, event_id);
        let qualified = engine.ensure_qualification_generated();
        let advanced = engine.ensure_bracket_progression();
        let changed = qualified || advanced;
        if changed {
            self.dirty = true;
        }
        changed
    }

    /// First round that still has missing results, after catching up.
    pub fn round_to_play(&mut self, event_id: EventId) -> Result<Option<u32>> {
        self.store.require_event(event_id)?;
        self.catch_up(event_id);
        let store = &self.store;
        Ok(store.list_event_rounds(event_id).into_iter().find(|round| {
            let status = store.list_round_fill_status(event_id, *round);
            status.is_empty() || !status.iter().all(|s| s.is_filled())
        }))
    }

    pub fn heats(&self, event_id: EventId, round: u32) -> Result<Vec<HeatCard>> {
        self.store.require_event(event_id)?;
        let mut heats: Vec<&Heat> = self.store.round_heats(event_id, round).collect();
        heats.sort_by(|a, b| {
            a.bracket
                .cmp(&b.bracket)
                .then(a.stage_tier.cmp(&b.stage_tier))
                .then(a.heat_index.cmp(&b.heat_index))
        });
        Ok(heats.into_iter().map(|heat| self.heat_card(heat)).collect())
    }

    fn heat_card(&self, heat: &Heat) -> HeatCard {
        let rows: Vec<&Participant> = heat
            .participant_ids
            .iter()
            .filter_map(|pid| self.store.participant(*pid))
            .collect();
        let mut timing: Vec<&Participant> = rows.clone();
        timing.sort_by(|a, b| bib_key(a.bib).cmp(&bib_key(b.bib)).then(a.id.cmp(&b.id)));
        let participants = rows
            .iter()
            .map(|p| HeatParticipant {
                participant_id: p.id,
                name: p.name.clone(),
                bib: p.bib,
                chrono_order: timing
                    .iter()
                    .position(|t| t.id == p.id)
                    .map(|idx| idx as u32 + 1)
                    .unwrap_or(0),
            })
            .collect();
        HeatCard {
            id: heat.id,
            round: heat.round,
            bracket: heat.bracket,
            stage_tier: heat.stage_tier,
            heat_index: heat.heat_index,
            participants,
            seed: heat.seed.clone(),
            times: heat.times.clone(),
            results: heat.results.clone(),
        }
    }

    pub fn times_complete(&self, event_id: EventId, round: u32) -> bool {
        let mut heats = self.store.round_heats(event_id, round).peekable();
        heats.peek().is_some() && heats.all(|h| h.has_all_times())
    }

    /// Store typed times against the heat each participant races in this
    /// round. Participants not racing are skipped and a blank time clears the
    /// participant's entry. Returns how many were kept.
    pub fn save_times(&mut self, event_id: EventId, round: u32, times: &TimesPayload) -> Result<usize> {
        self.store.require_event(event_id)?;
        if times.is_empty() {
            return Err(DeskError::EmptySubmission("times"));
        }
        let saved = self.store.transaction(|tx| {
            let mut saved = 0usize;
            for (pid, raw) in times {
                let parsed = parse_chrono(raw);
                let Some(heat) = tx
                    .round_heats_mut(event_id, round)
                    .find(|h| h.participant_ids.contains(pid))
                else {
                    debug!("event {event_id} round {round}: no heat for participant {pid}, time skipped");
                    continue;
                };
                let entry = TimeEntry {
                    time_ms: parsed.time_ms,
                    time_text: parsed.time_text,
                };
                if !entry.is_recorded() {
                    heat.times.remove(pid);
                    continue;
                }
                heat.times.insert(*pid, entry);
                saved += 1;
            }
            Ok(saved)
        })?;
        self.dirty = true;
        Ok(saved)
    }

    /// Commit finishing positions for heats of `round`, then recompute points
    /// and generate whatever the new results unlock. All or nothing.
    pub fn save_results(&mut self, event_id: EventId, round: u32, results: &ResultsPayload) -> Result<usize> {
        self.store.require_event(event_id)?;
        if results.is_empty() {
            return Err(DeskError::EmptySubmission("results"));
        }
        let applied = self.store.transaction(|tx| {
            let mut applied = 0usize;
            for (heat_id, by_participant) in results {
                if *heat_id == 0 {
                    continue;
                }
                let (entries, slots) = match tx.heat(*heat_id) {
                    Some(heat) if heat.event_id == event_id && heat.round == round && heat.slots() > 0 => {
                        let entries: Vec<(ParticipantId, i64)> = by_participant
                            .iter()
                            .filter(|(pid, _)| heat.participant_ids.contains(*pid))
                            .map(|(pid, pos)| (*pid, *pos))
                            .collect();
                        (entries, heat.slots())
                    }
                    _ => {
                        debug!("event {event_id} round {round}: heat {heat_id} skipped");
                        continue;
                    }
                };
                if entries.is_empty() {
                    continue;
                }
                check_positions(*heat_id, &entries, slots)?;

                let Some(heat) = tx.heat_mut(*heat_id) else {
                    continue;
                };
                let mut committed = BTreeMap::new();
                for (pid, pos) in entries {
                    let position = pos as u32;
                    let time = heat.times.get(&pid).cloned().unwrap_or_default();
                    committed.insert(
                        pid,
                        ResultEntry {
                            position,
                            points: points_for_position(position),
                            time_ms: time.time_ms,
                            time_text: time.time_text,
                        },
                    );
                }
                heat.results = committed;
                heat.times.clear();
                applied += 1;
            }

            recalc_event_points(tx, event_id);
            let mut engine = BracketEngine::new(tx, event_id);
            engine.ensure_qualification_generated();
            engine.ensure_bracket_progression();
            Ok(applied)
        })?;
        self.dirty = true;
        info!("event {event_id} round {round}: results saved for {applied} heats");
        Ok(applied)
    }

    // ── Views ───────────────────────────────────────────────────────────

    pub fn bracket_view(&self, event_id: EventId) -> Result<BracketView> {
        self.store.require_event(event_id)?;
        let mut view = BracketView::default();
        let mut heats: Vec<&Heat> = self.store.event_heats(event_id).collect();
        heats.sort_by(|a, b| {
            a.round
                .cmp(&b.round)
                .then(a.stage_tier.cmp(&b.stage_tier))
                .then(a.heat_index.cmp(&b.heat_index))
        });
        for heat in heats {
            let participants = heat
                .participant_ids
                .iter()
                .map(|pid| {
                    let result = heat.results.get(pid);
                    let seed = heat.seed.get(pid);
                    BracketSlot {
                        participant_id: *pid,
                        name: self.participant_name(*pid),
                        position: result.map(|r| r.position).or(seed.map(|s| s.pool_rank)),
                        points: result.map(|r| r.points).or(seed.map(|s| s.points)),
                    }
                })
                .collect();
            view.column_mut(heat.bracket)
                .entry(heat.round)
                .or_default()
                .push(BracketHeatCard {
                    heat_id: Some(heat.id),
                    stage_tier: heat.stage_tier,
                    heat_index: heat.heat_index,
                    participants,
                });
        }

        if self.store.count_bracket_heats(event_id) == 0 {
            if let Some(qualification) = build_pools_qualification(&self.store, event_id) {
                for planned in qualification.heats() {
                    let participants = planned
                        .entrants
                        .iter()
                        .map(|(pid, seed)| BracketSlot {
                            participant_id: *pid,
                            name: self.participant_name(*pid),
                            position: Some(seed.pool_rank),
                            points: Some(seed.points),
                        })
                        .collect();
                    view.column_mut(planned.bracket)
                        .entry(qualification.round)
                        .or_default()
                        .push(BracketHeatCard {
                            heat_id: None,
                            stage_tier: planned.stage_tier,
                            heat_index: planned.heat_index,
                            participants,
                        });
                }
            }
        }
        Ok(view)
    }

    fn participant_name(&self, id: ParticipantId) -> String {
        self.store
            .participant(id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| format!("Participant {id}"))
    }

    pub fn leaderboard(&self, event_id: EventId) -> Result<Vec<LeaderboardRow>> {
        self.store.require_event(event_id)?;
        Ok(standings::leaderboard(&self.store, event_id))
    }

    pub fn final_ranking(&self, event_id: EventId) -> Result<Vec<Placement>> {
        self.store.require_event(event_id)?;
        Ok(standings::final_ranking(&self.store, event_id))
    }

    pub fn chrono_board(&self, event_id: EventId) -> Result<Vec<ChronoRow>> {
        self.store.require_event(event_id)?;
        Ok(standings::chrono_board(&self.store, Some(event_id)))
    }

    /// Everything the desk screen shows in one read.
    pub fn desk_view(&mut self) -> DeskView {
        let active_id = self.store.active_event().map(|e| e.id);
        let current_round = match active_id {
            Some(id) => self.round_to_play(id).ok().flatten(),
            None => None,
        };
        let active_event = active_id.and_then(|id| self.store.event(id).cloned());
        let latest_event = active_event.clone().or_else(|| self.store.latest_event().cloned());
        let latest_id = latest_event.as_ref().map(|e| e.id);

        let (heats, chronos_done) = match (active_id, current_round) {
            (Some(id), Some(round)) => (
                self.heats(id, round).unwrap_or_default(),
                round > 1 || self.times_complete(id, round),
            ),
            _ => (Vec::new(), false),
        };
        let current_round_participants = heats
            .iter()
            .flat_map(|heat| heat.participants.iter())
            .map(|p| (p.participant_id, p.name.clone()))
            .collect();

        DeskView {
            participants: self.list_participants(),
            brackets: latest_id
                .and_then(|id| self.bracket_view(id).ok())
                .unwrap_or_default(),
            leaderboard: latest_id
                .map(|id| standings::leaderboard(&self.store, id))
                .unwrap_or_default(),
            final_ranking: latest_id
                .map(|id| standings::final_ranking(&self.store, id))
                .unwrap_or_default(),
            chrono_board: standings::chrono_board(&self.store, latest_id),
            active_event,
            latest_event,
            current_round,
            heats,
            chronos_done,
            current_round_participants,
        }
    }
}

fn check_positions(heat_id: HeatId, entries: &[(ParticipantId, i64)], slots: usize) -> Result<()> {
    let mut seen = HashSet::new();
    for (_, pos) in entries {
        if !seen.insert(*pos) {
            return Err(DeskError::DuplicatePosition { heat_id });
        }
    }
    for (_, pos) in entries {
        if *pos < 1 || *pos > slots as i64 {
            return Err(DeskError::InvalidPosition {
                heat_id,
                position: *pos,
                slots,
            });
        }
    }
    Ok(())
}
