use crate::chrono_codec::{format_chrono, parse_chrono};
use crate::ranking::bib_key;
use crate::store::{HeatStore, MemoryStore};
use crate::types::*;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Every round of the event has heats and all of them have full results.
pub fn event_complete<S: HeatStore + ?Sized>(store: &S, event_id: EventId) -> bool {
  let rounds = store.list_event_rounds(event_id);
  !rounds.is_empty()
    && rounds.iter().all(|round| {
      let status = store.list_round_fill_status(event_id, *round);
      !status.is_empty() && status.iter().all(|s| s.is_filled())
    })
}

/// Later round wins, then the lower tier, then the better position.
fn is_later(candidate: &FinalRankingRow, current: &FinalRankingRow) -> bool {
  candidate
    .round
    .cmp(&current.round)
    .then(current.stage_tier.cmp(&candidate.stage_tier))
    .then(current.position.cmp(&candidate.position))
    == Ordering::Greater
}

fn compare_placement(a: &FinalRankingRow, b: &FinalRankingRow) -> Ordering {
  let side = |row: &FinalRankingRow| if row.bracket == Bracket::Winners { 0 } else { 1 };
  side(a)
    .cmp(&side(b))
    .then(a.stage_tier.cmp(&b.stage_tier))
    .then(b.round.cmp(&a.round))
    .then(a.position.cmp(&b.position))
    .then(b.event_points.cmp(&a.event_points))
    .then(a.name.cmp(&b.name))
}

/// Final placements once the whole bracket has been run. Empty before that.
pub fn final_ranking<S: HeatStore + ?Sized>(store: &S, event_id: EventId) -> Vec<Placement> {
  let rows = store.list_final_ranking_rows(event_id);
  if rows.is_empty() || !event_complete(store, event_id) {
    return Vec::new();
  }

  let mut latest: HashMap<ParticipantId, FinalRankingRow> = HashMap::new();
  for row in rows {
    match latest.get(&row.participant_id) {
      Some(current) if !is_later(&row, current) => {}
      _ => {
        latest.insert(row.participant_id, row);
      }
    }
  }

  let mut ordered: Vec<FinalRankingRow> = latest.into_values().collect();
  ordered.sort_by(compare_placement);
  ordered
    .into_iter()
    .enumerate()
    .map(|(idx, row)| Placement {
      place: idx as u32 + 1,
      participant_id: row.participant_id,
      name: row.name,
      bracket: row.bracket,
      stage_tier: row.stage_tier,
      round: row.round,
      position: row.position,
      points: row.event_points,
    })
    .collect()
}

/// Accumulated points for the event roster, best first.
pub fn leaderboard(store: &MemoryStore, event_id: EventId) -> Vec<LeaderboardRow> {
  let Some(event) = store.event(event_id) else {
    return Vec::new();
  };
  let mut rows: Vec<LeaderboardRow> = event
    .participant_ids
    .iter()
    .filter_map(|pid| store.participant(*pid))
    .map(|p| LeaderboardRow {
      participant_id: p.id,
      name: p.name.clone(),
      points: event.points.get(&p.id).copied().unwrap_or(0),
    })
    .collect();
  rows.sort_by(|a, b| b.points.cmp(&a.points).then(a.name.cmp(&b.name)));
  rows
}

/// Sum result points per roster member. Members without results stay at zero.
pub fn recalc_event_points(store: &mut MemoryStore, event_id: EventId) {
  let mut totals: BTreeMap<ParticipantId, u32> = match store.event(event_id) {
    Some(event) => event.participant_ids.iter().map(|pid| (*pid, 0)).collect(),
    None => return,
  };
  for heat in store.event_heats(event_id) {
    for (pid, result) in &heat.results {
      *totals.entry(*pid).or_insert(0) += result.points;
    }
  }
  if let Some(event) = store.event_mut(event_id) {
    event.points = totals;
  }
}

fn timing_ms(time_ms: Option<u64>, time_text: Option<&str>) -> Option<u64> {
  time_ms.or_else(|| time_text.and_then(|text| parse_chrono(text).time_ms))
}

/// Best time of every registered participant over the event, dense-ranked.
/// Runners with only unparsable text keep it as `best_text` and stay unranked.
/// Without an event the board lists everyone untimed.
pub fn chrono_board(store: &MemoryStore, event_id: Option<EventId>) -> Vec<ChronoRow> {
  let mut best: HashMap<ParticipantId, (Option<u64>, Option<String>)> = HashMap::new();
  if let Some(event_id) = event_id {
    for heat in store.event_heats(event_id) {
      let pending = heat
        .times
        .iter()
        .map(|(pid, t)| (*pid, t.time_ms, t.time_text.as_deref()));
      let committed = heat
        .results
        .iter()
        .map(|(pid, r)| (*pid, r.time_ms, r.time_text.as_deref()));
      for (pid, ms, text) in pending.chain(committed) {
        let entry = best.entry(pid).or_insert((None, None));
        match timing_ms(ms, text) {
          Some(ms) => {
            if entry.0.map(|current| ms < current).unwrap_or(true) {
              *entry = (Some(ms), Some(text.map(str::to_string).unwrap_or_else(|| format_chrono(ms))));
            }
          }
          // unparsable text (DNF, DSQ) shows until a real time turns up
          None => {
            if entry.0.is_none() && entry.1.is_none() {
              entry.1 = text.map(str::to_string);
            }
          }
        }
      }
    }
  }

  let mut rows: Vec<ChronoRow> = store
    .participants()
    .iter()
    .map(|p| {
      let (best_ms, best_text) = best.remove(&p.id).unwrap_or((None, None));
      ChronoRow {
        participant_id: p.id,
        name: p.name.clone(),
        bib: p.bib,
        best_ms,
        best_text,
        rank: None,
      }
    })
    .collect();

  rows.sort_by(|a, b| match (a.best_ms, b.best_ms) {
    (Some(x), Some(y)) => x.cmp(&y).then(a.name.cmp(&b.name)),
    (Some(_), None) => Ordering::Less,
    (None, Some(_)) => Ordering::Greater,
    (None, None) => a.name.cmp(&b.name),
  });

  let mut rank = 0u32;
  let mut last: Option<u64> = None;
  for row in rows.iter_mut() {
    let Some(ms) = row.best_ms else {
      continue;
    };
    if last != Some(ms) {
      rank += 1;
      last = Some(ms);
    }
    row.rank = Some(rank);
  }
  rows
}

/// Participants sorted for display: bib then name.
pub fn sorted_participants(store: &MemoryStore) -> Vec<Participant> {
  let mut rows = store.participants().to_vec();
  rows.sort_by(|a, b| bib_key(a.bib).cmp(&bib_key(b.bib)).then(a.name.cmp(&b.name)));
  rows
}
