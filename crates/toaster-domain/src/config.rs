// config.rs
//
// Process-wide settings, read once at start-up and passed by reference to the
// components that need them. Nothing mutates a config after construction.
use crate::errors::ToasterError;
use serde::Serialize;
use std::path::PathBuf;

pub const DEFAULT_DB_URL: &str = "toaster.db";
pub const DEFAULT_DATA_DIR: &str = "./toaster-data";
pub const DEFAULT_ARCHIVE_LAYOUT: &str = "{pulsar}/{obssys}";
pub const DEFAULT_FIT_METHOD: &str = "FDM";

/// Debug categories that can be switched on independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DebugFlags {
  /// Log every external command before it runs.
  pub syscalls: bool,
  /// Allow running from a pipeline checkout with uncommitted changes.
  pub gittest: bool,
  /// Keep manipulator scratch directories and log their location.
  pub manipulator: bool,
  /// Log each parsed TOA line.
  pub toa: bool,
}

impl DebugFlags {
  pub const CATEGORIES: [&'static str; 4] = ["syscalls", "gittest", "manipulator", "toa"];

  /// Parses a comma separated list such as `syscalls,toa`. `all` turns every
  /// category on.
  pub fn parse(list: &str) -> Result<Self, ToasterError> {
    let mut flags = DebugFlags::default();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
      flags = flags.with(name)?;
    }
    Ok(flags)
  }

  pub fn with(mut self, category: &str) -> Result<Self, ToasterError> {
    match category.to_ascii_lowercase().as_str() {
      "syscalls" => self.syscalls = true,
      "gittest" => self.gittest = true,
      "manipulator" => self.manipulator = true,
      "toa" => self.toa = true,
      "all" => {
        self = DebugFlags { syscalls: true, gittest: true, manipulator: true, toa: true };
      }
      other => {
        return Err(ToasterError::UnrecognizedValue(format!("unknown debug category '{}' (available: {})",
                                                           other,
                                                           Self::CATEGORIES.join(", "))))
      }
    }
    Ok(self)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToasterConfig {
  pub db_url: String,
  pub data_dir: PathBuf,
  /// Sub-directory template under `data_dir`; `{pulsar}` and `{obssys}` are
  /// substituted.
  pub archive_layout: String,
  pub fit_method: String,
  /// Git checkout the pipeline itself runs from.
  pub repo_dir: PathBuf,
  pub psrchive_dir: Option<PathBuf>,
  pub tempo2_revision: Option<String>,
  pub user_name: String,
  pub debug: DebugFlags,
  /// Remove ingested source files once they are in the store.
  pub move_ingested: bool,
}

impl ToasterConfig {
  /// Settings with defaults everywhere except the database and data paths.
  pub fn new(db_url: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
    Self { db_url: db_url.into(),
           data_dir: data_dir.into(),
           archive_layout: DEFAULT_ARCHIVE_LAYOUT.to_string(),
           fit_method: DEFAULT_FIT_METHOD.to_string(),
           repo_dir: PathBuf::from("."),
           psrchive_dir: None,
           tempo2_revision: None,
           user_name: "toaster".to_string(),
           debug: DebugFlags::default(),
           move_ingested: false }
  }

  /// Loads `.env` if present, then reads the `TOASTER_*` variables.
  pub fn from_env() -> Result<Self, ToasterError> {
    dotenvy::dotenv().ok();
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Builds the config from an arbitrary variable source.
  pub fn from_lookup<F>(lookup: F) -> Result<Self, ToasterError>
    where F: Fn(&str) -> Option<String>
  {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let db_url = get("TOASTER_DB_URL").or_else(|| get("DATABASE_URL")).unwrap_or_else(|| DEFAULT_DB_URL.to_string());
    let data_dir = get("TOASTER_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
    let mut cfg = Self::new(db_url, data_dir);
    if let Some(layout) = get("TOASTER_ARCHIVE_LAYOUT") {
      cfg.archive_layout = layout;
    }
    if let Some(method) = get("TOASTER_FIT_METHOD") {
      cfg.fit_method = method;
    }
    if let Some(dir) = get("TOASTER_REPO_DIR") {
      cfg.repo_dir = PathBuf::from(dir);
    }
    cfg.psrchive_dir = get("PSRCHIVE_DIR").map(PathBuf::from);
    cfg.tempo2_revision = get("TEMPO2_REVISION");
    if let Some(user) = get("TOASTER_USER").or_else(|| get("USER")) {
      cfg.user_name = user;
    }
    if let Some(list) = get("TOASTER_DEBUG") {
      cfg.debug = DebugFlags::parse(&list)?;
    }
    cfg.move_ingested = matches!(get("TOASTER_MOVE_INGESTED").as_deref(), Some("1") | Some("true") | Some("yes"));
    Ok(cfg)
  }

  pub fn with_debug(&self, debug: DebugFlags) -> Self {
    Self { debug, ..self.clone() }
  }
}
