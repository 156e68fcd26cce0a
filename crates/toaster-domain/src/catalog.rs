use crate::errors::ToasterError;
use crate::models::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Callback run by [`Catalog::relocate_file`] while the row update is still
/// uncommitted. It receives the current path of the file.
pub type RelocateOp<'a> = &'a mut dyn FnMut(&Path) -> Result<(), ToasterError>;

/// Relational model of the pipeline.
///
/// Every method is atomic: an operation that touches several rows either
/// applies all of its changes or none. Lookups by name are case-sensitive
/// unless stated otherwise.
pub trait Catalog: Send + Sync {
  // Pulsars

  /// Inserts a pulsar and its aliases. The canonical name is always one of
  /// the aliases. Any name already used as an alias is a `BadInput` error.
  fn add_pulsar(&self, name: &str, aliases: &[String]) -> Result<i64, ToasterError>;
  fn get_pulsar(&self, id: i64) -> Result<Option<Pulsar>, ToasterError>;
  /// Resolves a canonical name or alias. Several matching pulsars is an
  /// `InconsistentDatabase` error.
  fn pulsar_id(&self, name_or_alias: &str) -> Result<Option<i64>, ToasterError>;
  fn aliases(&self, pulsar_id: i64) -> Result<Vec<String>, ToasterError>;
  /// Moves everything that references `src` onto `dest`, then deletes `src`.
  fn merge_pulsar(&self, src: i64, dest: i64) -> Result<(), ToasterError>;

  // Telescopes and observing systems

  fn add_telescope(&self, telescope: NewTelescope) -> Result<i64, ToasterError>;
  fn get_telescope(&self, id: i64) -> Result<Option<Telescope>, ToasterError>;
  fn add_obssystem(&self, system: NewObsSystem) -> Result<i64, ToasterError>;
  fn get_obssystem(&self, id: i64) -> Result<Option<ObsSystem>, ToasterError>;
  /// Case-insensitive lookup by observing-system name.
  fn obssystem_by_name(&self, name: &str) -> Result<Option<ObsSystem>, ToasterError>;
  /// Case-insensitive lookup; `telescope` may be the name, abbreviation or
  /// observatory code.
  fn find_obssystem(&self, telescope: &str, frontend: &str, backend: &str)
                    -> Result<Option<ObsSystem>, ToasterError>;

  // Managed files

  fn parfile_by_md5(&self, md5: &str) -> Result<Option<i64>, ToasterError>;
  fn insert_parfile(&self, parfile: NewParfile) -> Result<i64, ToasterError>;
  fn get_parfile(&self, id: i64) -> Result<Option<Parfile>, ToasterError>;
  fn parfiles_for_pulsar(&self, pulsar_id: i64) -> Result<Vec<Parfile>, ToasterError>;
  /// Refused with `BadInput` while a process or TOA references the row.
  fn delete_parfile(&self, id: i64) -> Result<(), ToasterError>;

  fn template_by_md5(&self, md5: &str) -> Result<Option<i64>, ToasterError>;
  fn insert_template(&self, template: NewTemplate) -> Result<i64, ToasterError>;
  fn get_template(&self, id: i64) -> Result<Option<Template>, ToasterError>;
  fn templates_for_pulsar(&self, pulsar_id: i64) -> Result<Vec<Template>, ToasterError>;
  fn delete_template(&self, id: i64) -> Result<(), ToasterError>;

  fn rawfile_by_md5(&self, md5: &str) -> Result<Option<i64>, ToasterError>;
  fn insert_rawfile(&self, rawfile: NewRawfile) -> Result<i64, ToasterError>;
  fn get_rawfile(&self, id: i64) -> Result<Option<Rawfile>, ToasterError>;
  fn rawfiles_for_pulsar(&self, pulsar_id: i64) -> Result<Vec<Rawfile>, ToasterError>;

  /// Points the row of a managed file at `new_path` and runs `op` before the
  /// change is made durable; an error from `op` leaves the row untouched.
  /// Returns the previous path.
  fn relocate_file(&self, kind: FileKind, id: i64, new_path: &Path, op: RelocateOp<'_>)
                   -> Result<PathBuf, ToasterError>;

  // Master designations

  fn set_master_parfile(&self, pulsar_id: i64, parfile_id: i64) -> Result<(), ToasterError>;
  fn master_parfile(&self, pulsar_id: i64) -> Result<Option<i64>, ToasterError>;
  fn set_master_template(&self, pulsar_id: i64, obssystem_id: i64, template_id: i64) -> Result<(), ToasterError>;
  fn master_template(&self, pulsar_id: i64, obssystem_id: i64) -> Result<Option<i64>, ToasterError>;

  // Processing

  /// Id of the version row for `stamp`, inserting it when new.
  fn version_id(&self, stamp: &VersionStamp) -> Result<i64, ToasterError>;
  fn toas_exist_for(&self, key: &ProcessKey) -> Result<bool, ToasterError>;
  fn get_version(&self, id: i64) -> Result<Option<VersionStamp>, ToasterError>;
  /// Inserts the version (when new), the process and its TOAs together.
  /// `toas` may be empty. Unless `allow_conflicts` is set, existing TOAs for
  /// the same [`ProcessKey`] abort the whole insert with `ConflictingToas`.
  fn record_toas(&self, process: NewProcess, version: &VersionStamp, provenance: ToaProvenance,
                 toas: Vec<ToaMeasurement>, allow_conflicts: bool)
                 -> Result<(i64, Vec<i64>), ToasterError>;
  fn processes_for_rawfile(&self, rawfile_id: i64) -> Result<Vec<Process>, ToasterError>;
  fn get_toa(&self, id: i64) -> Result<Option<Toa>, ToasterError>;
  fn toas_for_process(&self, process_id: i64) -> Result<Vec<Toa>, ToasterError>;
  /// TOAs matching `filter`, ordered by pulsar name then MJD.
  fn select_toas(&self, filter: &ToaFilter) -> Result<Vec<TimToa>, ToasterError>;

  // Diagnostics

  /// Stores a diagnostic, replacing an earlier one for the same
  /// (rawfile, plugin).
  fn replace_diagnostic(&self, diagnostic: NewDiagnostic) -> Result<i64, ToasterError>;
  fn diagnostics_for_rawfile(&self, rawfile_id: i64) -> Result<Vec<Diagnostic>, ToasterError>;

  // Users and curation

  fn add_user(&self, user: NewUser) -> Result<i64, ToasterError>;
  fn user_id(&self, user_name: &str) -> Result<Option<i64>, ToasterError>;
  fn add_curator(&self, pulsar_id: i64, user_id: i64) -> Result<(), ToasterError>;
  fn curators(&self, pulsar_id: i64) -> Result<Vec<i64>, ToasterError>;
  /// An existing opinion of the same user on the same TOA is only replaced
  /// with `force`.
  fn set_opinion(&self, opinion: Opinion, force: bool) -> Result<(), ToasterError>;
  fn opinion(&self, user_id: i64, toa_id: i64) -> Result<Option<Opinion>, ToasterError>;

  // Timfiles

  fn record_timfile(&self, timfile: NewTimfile, toa_ids: &[i64]) -> Result<i64, ToasterError>;
  fn timfiles_for_pulsar(&self, pulsar_id: i64) -> Result<Vec<Timfile>, ToasterError>;
}

/// Inclusive numeric range used by [`ToaFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
  pub lo: f64,
  pub hi: f64,
}

impl Range {
  pub fn new(lo: f64, hi: f64) -> Self {
    Self { lo, hi }
  }

  pub fn contains(&self, v: f64) -> bool {
    v >= self.lo && v <= self.hi
  }

  fn validate(&self, what: &str) -> Result<(), ToasterError> {
    if self.lo > self.hi {
      return Err(ToasterError::BadInput(format!("Bad {} range: the first argument ({}) is larger than the second ({})",
                                                what, self.lo, self.hi)));
    }
    if self.lo <= 0.0 || self.hi <= 0.0 {
      return Err(ToasterError::BadInput(format!("Bad {} range: both limits must be positive (got {} {})",
                                                what, self.lo, self.hi)));
    }
    Ok(())
  }
}

/// Composable TOA selection. Empty collections and `None` mean "no
/// restriction".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToaFilter {
  pub pulsar_name: Option<String>,
  pub obs_codes: Vec<String>,
  pub mjd: Option<Range>,
  /// Range of TOA uncertainties, in microseconds.
  pub mjd_err: Option<Range>,
  pub freq: Option<Range>,
  pub toa_ids: Vec<i64>,
}

impl ToaFilter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn pulsar(mut self, name: impl Into<String>) -> Self {
    self.pulsar_name = Some(name.into());
    self
  }

  pub fn observatories<I, S>(mut self, codes: I) -> Self
    where I: IntoIterator<Item = S>,
          S: Into<String>
  {
    self.obs_codes.extend(codes.into_iter().map(Into::into));
    self
  }

  pub fn mjd_range(mut self, lo: f64, hi: f64) -> Self {
    self.mjd = Some(Range::new(lo, hi));
    self
  }

  pub fn mjd_err_range(mut self, lo: f64, hi: f64) -> Self {
    self.mjd_err = Some(Range::new(lo, hi));
    self
  }

  pub fn freq_range(mut self, lo: f64, hi: f64) -> Self {
    self.freq = Some(Range::new(lo, hi));
    self
  }

  pub fn toa_ids<I: IntoIterator<Item = i64>>(mut self, ids: I) -> Self {
    self.toa_ids.extend(ids);
    self
  }

  /// Argument checks that do not need the database.
  pub fn validate(&self) -> Result<(), ToasterError> {
    if let Some(r) = &self.mjd {
      r.validate("MJD")?;
    }
    if let Some(r) = &self.mjd_err {
      r.validate("MJD error")?;
    }
    if let Some(r) = &self.freq {
      r.validate("frequency")?;
    }
    if let Some(bad) = self.toa_ids.iter().find(|id| **id < 1) {
      return Err(ToasterError::BadInput(format!("TOA ids must be positive integers (got {})", bad)));
    }
    Ok(())
  }

  pub fn matches(&self, toa: &TimToa) -> bool {
    self.pulsar_name.as_ref().map_or(true, |n| *n == toa.pulsar_name)
    && (self.obs_codes.is_empty() || self.obs_codes.iter().any(|c| c.eq_ignore_ascii_case(&toa.obscode)))
    && self.mjd.map_or(true, |r| r.contains(toa.mjd()))
    && self.mjd_err.map_or(true, |r| r.contains(toa.toa_unc_us))
    && self.freq.map_or(true, |r| r.contains(toa.freq))
    && (self.toa_ids.is_empty() || self.toa_ids.contains(&toa.toa_id))
  }
}

/// Orders `.tim` rows by pulsar name, then MJD.
pub fn sort_tim_toas(toas: &mut [TimToa]) {
  toas.sort_by(|a, b| {
        a.pulsar_name
         .cmp(&b.pulsar_name)
         .then(a.imjd.cmp(&b.imjd))
         .then(a.fmjd.total_cmp(&b.fmjd))
         .then(a.toa_id.cmp(&b.toa_id))
      });
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tim(id: i64, psr: &str, imjd: i32, fmjd: f64, freq: f64, obs: &str) -> TimToa {
    TimToa { toa_id: id,
             pulsar_name: psr.into(),
             rawfile_name: format!("f{}.ar", id),
             obscode: obs.into(),
             freq,
             imjd,
             fmjd,
             toa_unc_us: 1.5 }
  }

  #[test]
  fn reversed_range_is_rejected_before_anything_else() {
    let err = ToaFilter::new().pulsar("J1909-3744").mjd_range(55000.0, 54000.0).validate().unwrap_err();
    assert_eq!(err.kind(), "BadInputError");
    assert!(err.to_string().contains("larger than the second"));
  }

  #[test]
  fn negative_limits_and_ids_are_rejected() {
    assert!(ToaFilter::new().freq_range(-10.0, 1400.0).validate().is_err());
    assert!(ToaFilter::new().toa_ids([3, 0]).validate().is_err());
    assert!(ToaFilter::new().freq_range(800.0, 1400.0).toa_ids([1]).validate().is_ok());
  }

  #[test]
  fn predicates_compose() {
    let f = ToaFilter::new().pulsar("J1909-3744").observatories(["ao"]).mjd_range(55000.0, 55001.0);
    assert!(f.matches(&tim(1, "J1909-3744", 55000, 0.5, 1400.0, "AO")));
    assert!(!f.matches(&tim(2, "J1909-3744", 55000, 0.5, 1400.0, "GB")));
    assert!(!f.matches(&tim(3, "J1909-3744", 55002, 0.5, 1400.0, "AO")));
    assert!(!f.matches(&tim(4, "J0437-4715", 55000, 0.5, 1400.0, "AO")));
  }

  #[test]
  fn sort_is_by_pulsar_then_mjd() {
    let mut rows = vec![tim(1, "J1909-3744", 55001, 0.1, 1400.0, "AO"),
                        tim(2, "J0437-4715", 55003, 0.1, 1400.0, "AO"),
                        tim(3, "J1909-3744", 55000, 0.9, 1400.0, "AO")];
    sort_tim_toas(&mut rows);
    let ids: Vec<i64> = rows.iter().map(|t| t.toa_id).collect();
    assert_eq!(ids, [2, 3, 1]);
  }
}
