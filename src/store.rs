use crate::error::{DeskError, Result};
use crate::ranking::bib_key;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Queries and writes the bracket engine needs. Implementations must apply a
/// caller's whole unit of work atomically; `MemoryStore::transaction` does.
pub trait HeatStore {
  fn list_round_fill_status(&self, event_id: EventId, round: u32) -> Vec<FillStatus>;
  fn list_bracket_round_fill_status(&self, event_id: EventId, round: u32, bracket: Bracket) -> Vec<FillStatus>;
  fn list_initial_fill_status(&self, event_id: EventId) -> Vec<FillStatus>;
  fn list_pool_rows(&self, event_id: EventId) -> Vec<PoolRow>;
  fn list_transition_rows(&self, event_id: EventId, round: u32, bracket: Bracket) -> Vec<TransitionRow>;
  fn list_bracket_heat_rows(&self, event_id: EventId) -> Vec<BracketHeatRow>;
  fn list_final_ranking_rows(&self, event_id: EventId) -> Vec<FinalRankingRow>;
  fn list_event_rounds(&self, event_id: EventId) -> Vec<u32>;

  fn insert_heat(&mut self, event_id: EventId, round: u32, bracket: Bracket, stage_tier: u32, heat_index: u32) -> HeatId;
  fn insert_heat_participant(&mut self, heat_id: HeatId, participant_id: ParticipantId);
  fn set_heat_seed(&mut self, heat_id: HeatId, participant_id: ParticipantId, seed: SeedHint);
  fn delete_bracket_heats(&mut self, event_id: EventId);
  fn count_bracket_heats(&self, event_id: EventId) -> usize;
  fn count_bracket_round_heats(&self, event_id: EventId, round: u32, bracket: Bracket) -> usize;
  fn max_bracket_round(&self, event_id: EventId, bracket: Bracket) -> Option<u32>;
  fn raise_total_rounds(&mut self, event_id: EventId, round: u32);
}

/// Arena store: records live in vectors, addressed through id -> slot maps
/// rebuilt by `reindex`. Serializes as the desk snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryStore {
  next_participant_id: ParticipantId,
  next_event_id: EventId,
  next_heat_id: HeatId,
  participants: Vec<Participant>,
  events: Vec<Event>,
  heats: Vec<Heat>,
  #[serde(skip)]
  participant_index: HashMap<ParticipantId, usize>,
  #[serde(skip)]
  event_index: HashMap<EventId, usize>,
  #[serde(skip)]
  heat_index: HashMap<HeatId, usize>,
}

impl Default for MemoryStore {
  fn default() -> Self {
    MemoryStore {
      next_participant_id: 1,
      next_event_id: 1,
      next_heat_id: 1,
      participants: Vec::new(),
      events: Vec::new(),
      heats: Vec::new(),
      participant_index: HashMap::new(),
      event_index: HashMap::new(),
      heat_index: HashMap::new(),
    }
  }
}

impl MemoryStore {
  pub fn new() -> Self {
    MemoryStore::default()
  }

  /// Run `f` against a working copy and keep it only when `f` succeeds.
  pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
  where
    F: FnOnce(&mut MemoryStore) -> Result<T>,
  {
    let mut next = self.clone();
    let out = f(&mut next)?;
    *self = next;
    Ok(out)
  }

  pub fn reindex(&mut self) {
    self.participant_index = self
      .participants
      .iter()
      .enumerate()
      .map(|(idx, p)| (p.id, idx))
      .collect();
    self.event_index = self
      .events
      .iter()
      .enumerate()
      .map(|(idx, e)| (e.id, idx))
      .collect();
    self.heat_index = self
      .heats
      .iter()
      .enumerate()
      .map(|(idx, h)| (h.id, idx))
      .collect();
  }

  /// Bring id sequences above every stored id. Snapshots written by hand or by
  /// older builds can carry stale counters.
  pub fn repair_sequences(&mut self) {
    let max_participant = self.participants.iter().map(|p| p.id).max().unwrap_or(0);
    let max_event = self.events.iter().map(|e| e.id).max().unwrap_or(0);
    let max_heat = self.heats.iter().map(|h| h.id).max().unwrap_or(0);
    self.next_participant_id = self.next_participant_id.max(max_participant + 1).max(1);
    self.next_event_id = self.next_event_id.max(max_event + 1).max(1);
    self.next_heat_id = self.next_heat_id.max(max_heat + 1).max(1);
  }

  pub fn clear(&mut self) {
    *self = MemoryStore::default();
  }

  // ── Participants ────────────────────────────────────────────────────

  pub fn participants(&self) -> &[Participant] {
    &self.participants
  }

  pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
    self.participant_index.get(&id).and_then(|idx| self.participants.get(*idx))
  }

  pub fn participant_by_name(&self, name: &str) -> Option<&Participant> {
    self.participants.iter().find(|p| p.name == name)
  }

  pub fn max_bib(&self) -> u32 {
    self.participants.iter().filter_map(|p| p.bib).max().unwrap_or(0)
  }

  pub fn insert_participant(&mut self, name: String, bib: Option<u32>) -> Participant {
    let participant = Participant {
      id: self.next_participant_id,
      name,
      bib,
    };
    self.next_participant_id += 1;
    self.participant_index.insert(participant.id, self.participants.len());
    self.participants.push(participant.clone());
    participant
  }

  /// Remove a participant and every reference to them.
  pub fn remove_participant(&mut self, id: ParticipantId) -> bool {
    let before = self.participants.len();
    self.participants.retain(|p| p.id != id);
    if self.participants.len() == before {
      return false;
    }
    for event in self.events.iter_mut() {
      event.participant_ids.retain(|pid| *pid != id);
      event.points.remove(&id);
    }
    for heat in self.heats.iter_mut() {
      heat.participant_ids.retain(|pid| *pid != id);
      heat.seed.remove(&id);
      heat.times.remove(&id);
      heat.results.remove(&id);
    }
    self.reindex();
    true
  }

  // ── Events ──────────────────────────────────────────────────────────

  pub fn events(&self) -> &[Event] {
    &self.events
  }

  pub fn event(&self, id: EventId) -> Option<&Event> {
    self.event_index.get(&id).and_then(|idx| self.events.get(*idx))
  }

  pub fn event_mut(&mut self, id: EventId) -> Option<&mut Event> {
    let idx = *self.event_index.get(&id)?;
    self.events.get_mut(idx)
  }

  pub fn require_event(&self, id: EventId) -> Result<&Event> {
    self
      .event(id)
      .ok_or_else(|| DeskError::MissingEntity(format!("event {id}")))
  }

  pub fn active_event(&self) -> Option<&Event> {
    self.events.iter().find(|e| e.status == EventStatus::Active)
  }

  pub fn latest_event(&self) -> Option<&Event> {
    self.events.iter().max_by_key(|e| e.id)
  }

  pub fn archive_active_events(&mut self) {
    for event in self.events.iter_mut() {
      if event.status == EventStatus::Active {
        event.status = EventStatus::Archived;
      }
    }
  }

  pub fn insert_event(&mut self, mut event: Event) -> EventId {
    event.id = self.next_event_id;
    self.next_event_id += 1;
    let id = event.id;
    self.event_index.insert(id, self.events.len());
    self.events.push(event);
    id
  }

  // ── Heats ───────────────────────────────────────────────────────────

  pub fn heat(&self, id: HeatId) -> Option<&Heat> {
    self.heat_index.get(&id).and_then(|idx| self.heats.get(*idx))
  }

  pub fn heat_mut(&mut self, id: HeatId) -> Option<&mut Heat> {
    let idx = *self.heat_index.get(&id)?;
    self.heats.get_mut(idx)
  }

  pub fn event_heats(&self, event_id: EventId) -> impl Iterator<Item = &Heat> {
    self.heats.iter().filter(move |h| h.event_id == event_id)
  }

  pub fn round_heats(&self, event_id: EventId, round: u32) -> impl Iterator<Item = &Heat> {
    self.event_heats(event_id).filter(move |h| h.round == round)
  }

  pub fn round_heats_mut(&mut self, event_id: EventId, round: u32) -> impl Iterator<Item = &mut Heat> {
    self
      .heats
      .iter_mut()
      .filter(move |h| h.event_id == event_id && h.round == round)
  }

  fn fill_status(heat: &Heat) -> FillStatus {
    FillStatus {
      heat_id: heat.id,
      round: heat.round,
      slots: heat.slots(),
      filled: heat.results.len(),
    }
  }
}

impl HeatStore for MemoryStore {
  fn list_round_fill_status(&self, event_id: EventId, round: u32) -> Vec<FillStatus> {
    self.round_heats(event_id, round).map(MemoryStore::fill_status).collect()
  }

  fn list_bracket_round_fill_status(&self, event_id: EventId, round: u32, bracket: Bracket) -> Vec<FillStatus> {
    self
      .round_heats(event_id, round)
      .filter(|h| h.bracket == bracket)
      .map(MemoryStore::fill_status)
      .collect()
  }

  fn list_initial_fill_status(&self, event_id: EventId) -> Vec<FillStatus> {
    self
      .event_heats(event_id)
      .filter(|h| h.bracket == Bracket::Initial)
      .map(MemoryStore::fill_status)
      .collect()
  }

  fn list_pool_rows(&self, event_id: EventId) -> Vec<PoolRow> {
    let mut rows = Vec::new();
    for heat in self.event_heats(event_id).filter(|h| h.bracket == Bracket::Initial) {
      for pid in &heat.participant_ids {
        let Some(participant) = self.participant(*pid) else {
          continue;
        };
        let result = heat.results.get(pid);
        rows.push(PoolRow {
          round: heat.round,
          heat_index: heat.heat_index,
          participant_id: *pid,
          bib: participant.bib,
          name: participant.name.clone(),
          position: result.map(|r| r.position),
          points: result.map(|r| r.points),
        });
      }
    }
    rows.sort_by(|a, b| {
      a.heat_index
        .cmp(&b.heat_index)
        .then(a.round.cmp(&b.round))
        .then(a.participant_id.cmp(&b.participant_id))
    });
    rows
  }

  fn list_transition_rows(&self, event_id: EventId, round: u32, bracket: Bracket) -> Vec<TransitionRow> {
    let mut rows = Vec::new();
    for heat in self.round_heats(event_id, round).filter(|h| h.bracket == bracket) {
      for pid in &heat.participant_ids {
        rows.push(TransitionRow {
          stage_tier: heat.stage_tier,
          heat_index: heat.heat_index,
          heat_id: heat.id,
          heat_size: heat.slots(),
          participant_id: *pid,
          bib: self.participant(*pid).and_then(|p| p.bib),
          position: heat.results.get(pid).map(|r| r.position),
        });
      }
    }
    rows.sort_by(|a, b| {
      a.stage_tier
        .cmp(&b.stage_tier)
        .then(a.heat_index.cmp(&b.heat_index))
        .then(a.position.unwrap_or(u32::MAX).cmp(&b.position.unwrap_or(u32::MAX)))
        .then(bib_key(a.bib).cmp(&bib_key(b.bib)))
        .then(a.participant_id.cmp(&b.participant_id))
    });
    rows
  }

  fn list_bracket_heat_rows(&self, event_id: EventId) -> Vec<BracketHeatRow> {
    self
      .event_heats(event_id)
      .filter(|h| h.bracket.is_knockout())
      .map(|h| BracketHeatRow {
        heat_id: h.id,
        round: h.round,
        bracket: h.bracket,
        heat_index: h.heat_index,
        slots: h.slots(),
        filled: h.results.len(),
      })
      .collect()
  }

  fn list_final_ranking_rows(&self, event_id: EventId) -> Vec<FinalRankingRow> {
    let points = self.event(event_id).map(|e| &e.points);
    let mut rows = Vec::new();
    for heat in self.event_heats(event_id).filter(|h| h.bracket.is_knockout()) {
      for (pid, result) in &heat.results {
        let name = self
          .participant(*pid)
          .map(|p| p.name.clone())
          .unwrap_or_else(|| format!("Participant {pid}"));
        rows.push(FinalRankingRow {
          participant_id: *pid,
          name,
          bracket: heat.bracket,
          round: heat.round,
          stage_tier: heat.stage_tier,
          position: result.position,
          event_points: points.and_then(|p| p.get(pid)).copied().unwrap_or(0),
        });
      }
    }
    rows
  }

  fn list_event_rounds(&self, event_id: EventId) -> Vec<u32> {
    self
      .event_heats(event_id)
      .map(|h| h.round)
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect()
  }

  fn insert_heat(&mut self, event_id: EventId, round: u32, bracket: Bracket, stage_tier: u32, heat_index: u32) -> HeatId {
    let id = self.next_heat_id;
    self.next_heat_id += 1;
    self.heat_index.insert(id, self.heats.len());
    self.heats.push(Heat {
      id,
      event_id,
      round,
      bracket,
      stage_tier,
      heat_index,
      participant_ids: Vec::new(),
      seed: Default::default(),
      times: Default::default(),
      results: Default::default(),
    });
    id
  }

  fn insert_heat_participant(&mut self, heat_id: HeatId, participant_id: ParticipantId) {
    if let Some(heat) = self.heat_mut(heat_id) {
      if !heat.participant_ids.contains(&participant_id) {
        heat.participant_ids.push(participant_id);
      }
    }
  }

  fn set_heat_seed(&mut self, heat_id: HeatId, participant_id: ParticipantId, seed: SeedHint) {
    if let Some(heat) = self.heat_mut(heat_id) {
      heat.seed.insert(participant_id, seed);
    }
  }

  fn delete_bracket_heats(&mut self, event_id: EventId) {
    self
      .heats
      .retain(|h| !(h.event_id == event_id && h.bracket.is_knockout()));
    self.reindex();
  }

  fn count_bracket_heats(&self, event_id: EventId) -> usize {
    self.event_heats(event_id).filter(|h| h.bracket.is_knockout()).count()
  }

  fn count_bracket_round_heats(&self, event_id: EventId, round: u32, bracket: Bracket) -> usize {
    self
      .round_heats(event_id, round)
      .filter(|h| h.bracket == bracket)
      .count()
  }

  fn max_bracket_round(&self, event_id: EventId, bracket: Bracket) -> Option<u32> {
    self
      .event_heats(event_id)
      .filter(|h| h.bracket == bracket)
      .map(|h| h.round)
      .max()
  }

  fn raise_total_rounds(&mut self, event_id: EventId, round: u32) {
    if let Some(event) = self.event_mut(event_id) {
      event.total_rounds = event.total_rounds.max(round);
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use chrono::Utc;

  /// Store with `count` bibbed runners and one active event holding them all.
  pub(crate) fn make_test_store(count: usize) -> (MemoryStore, EventId) {
    let mut store = MemoryStore::new();
    let mut ids = Vec::new();
    for i in 1..=count {
      ids.push(store.insert_participant(format!("Runner {i:02}"), Some(i as u32)).id);
    }
    let event_id = store.insert_event(Event {
      id: 0,
      name: "Test race".to_string(),
      category: "Open".to_string(),
      total_rounds: 3,
      status: EventStatus::Active,
      created_at: Utc::now(),
      participant_ids: ids,
      points: Default::default(),
    });
    (store, event_id)
  }

  pub(crate) fn add_heat(
    store: &mut MemoryStore,
    event_id: EventId,
    round: u32,
    bracket: Bracket,
    tier: u32,
    index: u32,
    ids: &[ParticipantId],
  ) -> HeatId {
    let heat_id = store.insert_heat(event_id, round, bracket, tier, index);
    for pid in ids {
      store.insert_heat_participant(heat_id, *pid);
    }
    heat_id
  }

  /// Record positions in roster order: first id finishes 1st.
  pub(crate) fn finish_in_order(store: &mut MemoryStore, heat_id: HeatId) {
    let heat = store.heat_mut(heat_id).unwrap();
    let ids = heat.participant_ids.clone();
    for (idx, pid) in ids.iter().enumerate() {
      let position = idx as u32 + 1;
      heat.results.insert(
        *pid,
        ResultEntry {
          position,
          points: crate::ranking::points_for_position(position),
          time_ms: None,
          time_text: None,
        },
      );
    }
  }

  #[test]
  fn test_insert_heat_and_fill_status() {
    let (mut store, event_id) = make_test_store(4);
    let heat_id = add_heat(&mut store, event_id, 1, Bracket::Initial, 0, 1, &[1, 2, 3, 4]);

    let status = store.list_round_fill_status(event_id, 1);
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].slots, 4);
    assert_eq!(status[0].filled, 0);

    finish_in_order(&mut store, heat_id);
    assert!(store.list_round_fill_status(event_id, 1)[0].is_filled());
  }

  #[test]
  fn test_transaction_rolls_back_on_error() {
    let (mut store, event_id) = make_test_store(4);
    let out: Result<()> = store.transaction(|tx| {
      tx.insert_heat(event_id, 1, Bracket::Initial, 0, 1);
      Err(DeskError::EmptySubmission("results"))
    });
    assert!(out.is_err());
    assert_eq!(store.event_heats(event_id).count(), 0);

    store
      .transaction(|tx| {
        tx.insert_heat(event_id, 1, Bracket::Initial, 0, 1);
        Ok(())
      })
      .unwrap();
    assert_eq!(store.event_heats(event_id).count(), 1);
  }

  #[test]
  fn test_remove_participant_cascades() {
    let (mut store, event_id) = make_test_store(4);
    let heat_id = add_heat(&mut store, event_id, 1, Bracket::Initial, 0, 1, &[1, 2, 3, 4]);
    finish_in_order(&mut store, heat_id);

    assert!(store.remove_participant(2));
    assert!(store.participant(2).is_none());
    let heat = store.heat(heat_id).unwrap();
    assert_eq!(heat.participant_ids, vec![1, 3, 4]);
    assert!(!heat.results.contains_key(&2));
    assert!(!store.event(event_id).unwrap().participant_ids.contains(&2));
    // later ids are still addressable after the arena shifted
    assert_eq!(store.participant(4).unwrap().name, "Runner 04");
    assert!(!store.remove_participant(99));
  }

  #[test]
  fn test_transition_rows_order() {
    let (mut store, event_id) = make_test_store(8);
    let h2 = add_heat(&mut store, event_id, 4, Bracket::Winners, 0, 2, &[5, 6, 7, 8]);
    let h1 = add_heat(&mut store, event_id, 4, Bracket::Winners, 0, 1, &[4, 3, 2, 1]);
    finish_in_order(&mut store, h1);
    finish_in_order(&mut store, h2);

    let rows = store.list_transition_rows(event_id, 4, Bracket::Winners);
    let ids: Vec<ParticipantId> = rows.iter().map(|r| r.participant_id).collect();
    assert_eq!(ids, vec![4, 3, 2, 1, 5, 6, 7, 8]);
  }

  #[test]
  fn test_delete_bracket_heats_keeps_initial() {
    let (mut store, event_id) = make_test_store(4);
    let initial = add_heat(&mut store, event_id, 1, Bracket::Initial, 0, 1, &[1, 2, 3, 4]);
    add_heat(&mut store, event_id, 4, Bracket::Winners, 0, 1, &[1, 2]);
    add_heat(&mut store, event_id, 4, Bracket::Losers, 0, 1, &[3, 4]);

    assert_eq!(store.count_bracket_heats(event_id), 2);
    store.delete_bracket_heats(event_id);
    assert_eq!(store.count_bracket_heats(event_id), 0);
    assert!(store.heat(initial).is_some());
  }

  #[test]
  fn test_repair_sequences() {
    let (mut store, _) = make_test_store(3);
    store.next_participant_id = 1;
    store.next_event_id = 0;
    store.repair_sequences();
    assert_eq!(store.insert_participant("Late".to_string(), None).id, 4);
    assert_eq!(store.next_event_id, 2);
  }

  #[test]
  fn test_raise_total_rounds_never_lowers() {
    let (mut store, event_id) = make_test_store(3);
    store.raise_total_rounds(event_id, 5);
    store.raise_total_rounds(event_id, 4);
    assert_eq!(store.event(event_id).unwrap().total_rounds, 5);
  }
}
