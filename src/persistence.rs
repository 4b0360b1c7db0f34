use crate::error::Result;
use crate::store::MemoryStore;
use std::{
  fs::{self, File},
  io::Write,
  path::Path,
};
use tracing::{info, warn};

/// Load the desk snapshot. A missing file is an empty desk; ids are reindexed
/// and sequences repaired on every load.
pub fn load_snapshot(path: &Path) -> Result<MemoryStore> {
  if !path.is_file() {
    info!("no snapshot at {}, starting empty", path.display());
    return Ok(MemoryStore::new());
  }
  let data = fs::read_to_string(path)?;
  if data.trim().is_empty() {
    warn!("snapshot {} is empty, starting empty", path.display());
    return Ok(MemoryStore::new());
  }
  let mut store: MemoryStore = serde_json::from_str(&data)?;
  store.reindex();
  store.repair_sequences();
  info!(
    "snapshot loaded from {}: {} participants, {} events",
    path.display(),
    store.participants().len(),
    store.events().len()
  );
  Ok(store)
}

/// Write through a synced sibling temp file and rename, so readers never see
/// a half-written snapshot.
pub fn save_snapshot(path: &Path, store: &MemoryStore) -> Result<()> {
  let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
  if let Some(parent) = parent {
    fs::create_dir_all(parent)?;
  }
  let payload = serde_json::to_string_pretty(store)?;
  let tmp = path.with_extension("json.tmp");
  let mut file = File::create(&tmp)?;
  file.write_all(payload.as_bytes())?;
  file.sync_all()?;
  fs::rename(&tmp, path)?;
  // directory fsync makes the rename durable; not every platform allows it
  if let Some(parent) = parent {
    if let Ok(dir) = File::open(parent) {
      let _ = dir.sync_all();
    }
  }
  Ok(())
}
