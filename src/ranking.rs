use serde::Serialize;
use std::cmp::Ordering;

/// Bib used for ordering when a participant has none.
pub const NO_BIB: u32 = 999_999;

/// Points awarded by finishing position; every position past the table earns the last value.
pub const POSITION_POINTS: [u32; 4] = [4, 3, 2, 1];

pub fn points_for_position(position: u32) -> u32 {
  let idx = position.saturating_sub(1) as usize;
  POSITION_POINTS
    .get(idx)
    .copied()
    .unwrap_or(POSITION_POINTS[POSITION_POINTS.len() - 1])
}

pub fn bib_key(bib: Option<u32>) -> u32 {
  bib.unwrap_or(NO_BIB)
}

/// Aggregated results of one participant inside one pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
  pub participant_id: u64,
  pub name: String,
  pub bib: Option<u32>,
  pub points: u32,
  pub position_sum: u32,
  pub best_position: Option<u32>,
}

impl PoolStats {
  pub fn new(participant_id: u64, name: impl Into<String>, bib: Option<u32>) -> Self {
    PoolStats {
      participant_id,
      name: name.into(),
      bib,
      points: 0,
      position_sum: 0,
      best_position: None,
    }
  }

  pub fn record(&mut self, position: u32, points: u32) {
    self.points += points;
    self.position_sum += position;
    self.best_position = Some(match self.best_position {
      Some(best) => best.min(position),
      None => position,
    });
  }
}

/// Pool order: points desc, position sum asc, best position asc (none last),
/// bib asc, name asc.
pub fn compare_pool(a: &PoolStats, b: &PoolStats) -> Ordering {
  b.points
    .cmp(&a.points)
    .then(a.position_sum.cmp(&b.position_sum))
    .then(best_key(a.best_position).cmp(&best_key(b.best_position)))
    .then(bib_key(a.bib).cmp(&bib_key(b.bib)))
    .then(a.name.cmp(&b.name))
}

fn best_key(best: Option<u32>) -> u32 {
  best.unwrap_or(u32::MAX)
}

pub fn rank_pool(mut stats: Vec<PoolStats>) -> Vec<PoolStats> {
  stats.sort_by(compare_pool);
  stats
}

/// A pool entrant promoted into a bracket cohort.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualifiedEntry {
  pub stats: PoolStats,
  pub pool_index: u32,
  pub pool_rank: u32,
}

/// Cohort order: pool rank asc, points desc, position sum asc, bib asc, name asc.
pub fn compare_qualified(a: &QualifiedEntry, b: &QualifiedEntry) -> Ordering {
  a.pool_rank
    .cmp(&b.pool_rank)
    .then(b.stats.points.cmp(&a.stats.points))
    .then(a.stats.position_sum.cmp(&b.stats.position_sum))
    .then(bib_key(a.stats.bib).cmp(&bib_key(b.stats.bib)))
    .then(a.stats.name.cmp(&b.stats.name))
}
