use crate::error::{DeskError, Result};
use crate::types::*;
use std::{
  env, fs,
  path::{Path, PathBuf},
  time::{SystemTime, UNIX_EPOCH},
};

pub fn repo_root() -> PathBuf {
  env::var("XCE_ROOT")
    .ok()
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")))
}

pub fn resolve_repo_path(raw: &str) -> PathBuf {
  let path = PathBuf::from(raw);
  if path.is_absolute() {
    path
  } else {
    repo_root().join(path)
  }
}

pub fn config_path() -> PathBuf {
  repo_root().join("config.json")
}

pub fn env_default(key: &str) -> Option<String> {
  env::var(key)
    .ok()
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
  env_default(key).and_then(|value| value.parse::<T>().ok())
}

pub fn apply_env_defaults(mut config: AppConfig) -> AppConfig {
  if config.bind_addr.trim().is_empty() {
    config.bind_addr = env_default("XCE_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
  }
  if config.data_path.trim().is_empty() {
    if let Some(value) = env_default("XCE_DATA_PATH") {
      config.data_path = value;
    }
  }
  if config.static_dir.trim().is_empty() {
    if let Some(value) = env_default("XCE_STATIC_DIR") {
      config.static_dir = value;
    }
  }
  if config.log_dir.trim().is_empty() {
    if let Some(value) = env_default("XCE_LOG_DIR") {
      config.log_dir = value;
    }
  }
  if config.shuffle_seed.is_none() {
    config.shuffle_seed = env_parsed("XCE_SHUFFLE_SEED");
  }
  if config.initial_rounds == 0 {
    config.initial_rounds = env_parsed("XCE_INITIAL_ROUNDS").unwrap_or(DEFAULT_INITIAL_ROUNDS);
  }
  config
}

pub fn load_config_from(path: &Path) -> Result<AppConfig> {
  if !path.is_file() {
    return Ok(apply_env_defaults(AppConfig::default()));
  }
  let data = fs::read_to_string(path).map_err(|e| DeskError::Config(format!("read config {}: {e}", path.display())))?;
  let config = serde_json::from_str::<AppConfig>(&data)
    .map_err(|e| DeskError::Config(format!("parse config {}: {e}", path.display())))?;
  Ok(apply_env_defaults(config))
}

pub fn load_config_inner() -> Result<AppConfig> {
  load_config_from(&config_path())
}

pub fn data_path(config: &AppConfig) -> PathBuf {
  if config.data_path.trim().is_empty() {
    repo_root().join("data").join("race-desk.json")
  } else {
    resolve_repo_path(config.data_path.trim())
  }
}

pub fn log_dir(config: &AppConfig) -> PathBuf {
  if config.log_dir.trim().is_empty() {
    repo_root().join("logs")
  } else {
    resolve_repo_path(config.log_dir.trim())
  }
}

pub fn static_dir(config: &AppConfig) -> Option<PathBuf> {
  let raw = config.static_dir.trim();
  if raw.is_empty() {
    None
  } else {
    Some(resolve_repo_path(raw))
  }
}

pub fn load_env_file() {
  let env_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(".env");
  if !env_path.is_file() {
    return;
  }
  let contents = match fs::read_to_string(&env_path) {
    Ok(data) => data,
    Err(_) => return,
  };
  for line in contents.lines() {
    if let Some((key, value)) = parse_env_line(line) {
      if env::var_os(&key).is_none() {
        env::set_var(key, value);
      }
    }
  }
}

pub fn parse_env_line(line: &str) -> Option<(String, String)> {
  let trimmed = line.trim();
  if trimmed.is_empty() || trimmed.starts_with('#') {
    return None;
  }
  let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
  let (key, raw_value) = trimmed.split_once('=')?;
  let key = key.trim();
  if key.is_empty() {
    return None;
  }
  let mut value = raw_value.trim();
  if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
    value = &value[1..value.len() - 1];
  } else if value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2 {
    value = &value[1..value.len() - 1];
  } else if let Some(idx) = value.find('#') {
    value = value[..idx].trim_end();
  }
  Some((key.to_string(), value.to_string()))
}

pub fn now_ms() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_millis() as u64
}
