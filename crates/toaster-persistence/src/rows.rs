// rows.rs
//
// Diesel row structs and their conversions to the domain types.
use crate::schema::*;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use indexmap::IndexMap;
use std::path::PathBuf;
use toaster_domain::{Diagnostic, DiagnosticValue, NewDiagnostic, NewObsSystem, NewParfile, NewProcess, NewRawfile,
                     NewTelescope, NewTemplate, ObsSystem, Opinion, Parfile, Process, Rawfile, StoredPath, Telescope,
                     Template, Toa, ToaMeasurement, ToaProvenance, ToasterError};
use toaster_providers::ArchiveHeader;

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = pulsars)]
pub(crate) struct PulsarRow {
  pub id: i64,
  pub pulsar_name: String,
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = telescopes)]
pub(crate) struct TelescopeRow {
  pub id: i64,
  pub telescope_name: String,
  pub telescope_abbrev: String,
  pub telescope_code: String,
  pub itrf_x: f64,
  pub itrf_y: f64,
  pub itrf_z: f64,
  pub latitude: Option<f64>,
  pub longitude: Option<f64>,
  pub datum: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = telescopes)]
pub(crate) struct NewTelescopeRow<'a> {
  pub telescope_name: &'a str,
  pub telescope_abbrev: &'a str,
  pub telescope_code: &'a str,
  pub itrf_x: f64,
  pub itrf_y: f64,
  pub itrf_z: f64,
  pub latitude: Option<f64>,
  pub longitude: Option<f64>,
  pub datum: Option<&'a str>,
}

impl<'a> From<&'a NewTelescope> for NewTelescopeRow<'a> {
  fn from(t: &'a NewTelescope) -> Self {
    Self { telescope_name: &t.name,
           telescope_abbrev: &t.abbrev,
           telescope_code: &t.code,
           itrf_x: t.itrf_x,
           itrf_y: t.itrf_y,
           itrf_z: t.itrf_z,
           latitude: t.latitude,
           longitude: t.longitude,
           datum: t.datum.as_deref() }
  }
}

impl From<TelescopeRow> for Telescope {
  fn from(r: TelescopeRow) -> Self {
    Telescope { id: r.id,
                telescope: NewTelescope { name: r.telescope_name,
                                          abbrev: r.telescope_abbrev,
                                          code: r.telescope_code,
                                          itrf_x: r.itrf_x,
                                          itrf_y: r.itrf_y,
                                          itrf_z: r.itrf_z,
                                          latitude: r.latitude,
                                          longitude: r.longitude,
                                          datum: r.datum } }
  }
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = obssystems)]
pub(crate) struct ObsSystemRow {
  pub id: i64,
  pub name: String,
  pub telescope_id: i64,
  pub frontend: String,
  pub backend: String,
  pub band_descriptor: Option<String>,
  pub clock: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = obssystems)]
pub(crate) struct NewObsSystemRow<'a> {
  pub name: &'a str,
  pub telescope_id: i64,
  pub frontend: &'a str,
  pub backend: &'a str,
  pub band_descriptor: Option<&'a str>,
  pub clock: Option<&'a str>,
}

impl<'a> From<&'a NewObsSystem> for NewObsSystemRow<'a> {
  fn from(o: &'a NewObsSystem) -> Self {
    Self { name: &o.name,
           telescope_id: o.telescope_id,
           frontend: &o.frontend,
           backend: &o.backend,
           band_descriptor: o.band_descriptor.as_deref(),
           clock: o.clock.as_deref() }
  }
}

impl From<ObsSystemRow> for ObsSystem {
  fn from(r: ObsSystemRow) -> Self {
    ObsSystem { id: r.id,
                system: NewObsSystem { name: r.name,
                                       telescope_id: r.telescope_id,
                                       frontend: r.frontend,
                                       backend: r.backend,
                                       band_descriptor: r.band_descriptor,
                                       clock: r.clock } }
  }
}

// One column per recognized ephemeris parameter. The list must stay in step
// with `toaster_domain::parfile::RECOGNIZED_PARAMS`.
macro_rules! parfile_rows {
  ($($col:ident => $key:literal),* $(,)?) => {
    #[cfg(test)]
    pub(crate) const PARAM_COLUMNS: &[&str] = &[$($key),*];

    #[derive(Debug, Queryable, Selectable)]
    #[diesel(table_name = parfiles)]
    pub(crate) struct ParfileRow {
      pub id: i64,
      pub filepath: String,
      pub filename: String,
      pub md5: String,
      pub pulsar_id: i64,
      pub add_time: NaiveDateTime,
      pub comments: Option<String>,
      pub extra_params: String,
      $(pub $col: Option<String>,)*
    }

    #[derive(Debug, Insertable)]
    #[diesel(table_name = parfiles)]
    pub(crate) struct NewParfileRow {
      pub filepath: String,
      pub filename: String,
      pub md5: String,
      pub pulsar_id: i64,
      pub add_time: NaiveDateTime,
      pub comments: Option<String>,
      pub extra_params: String,
      $(pub $col: Option<String>,)*
    }

    impl NewParfileRow {
      pub fn from_parfile(p: &NewParfile) -> Result<Self, ToasterError> {
        Ok(Self { filepath: p.location.filepath.clone(),
                  filename: p.location.filename.clone(),
                  md5: p.md5.clone(),
                  pulsar_id: p.pulsar_id,
                  add_time: p.add_time,
                  comments: p.comments.clone(),
                  extra_params: serde_json::to_string(&p.extra_params)?,
                  $($col: p.params.get($key).cloned(),)* })
      }
    }

    impl ParfileRow {
      fn params(&self) -> IndexMap<String, String> {
        let mut params = IndexMap::new();
        $(
          if let Some(v) = &self.$col {
            params.insert($key.to_string(), v.clone());
          }
        )*
        params
      }
    }
  };
}

parfile_rows! {
  psrj => "PSRJ",
  raj => "RAJ",
  decj => "DECJ",
  pmra => "PMRA",
  pmdec => "PMDEC",
  px => "PX",
  f0 => "F0",
  f1 => "F1",
  pepoch => "PEPOCH",
  posepoch => "POSEPOCH",
  dm => "DM",
  dmepoch => "DMEPOCH",
  binary_model => "BINARY_MODEL",
  pb => "PB",
  a1 => "A1",
  ecc => "ECC",
  t0 => "T0",
  om => "OM",
  tasc => "TASC",
  eps1 => "EPS1",
  eps2 => "EPS2",
  ephem => "EPHEM",
}

impl ParfileRow {
  pub fn into_parfile(self) -> Result<Parfile, ToasterError> {
    let params = self.params();
    let extra_params: IndexMap<String, String> = serde_json::from_str(&self.extra_params).map_err(|e| {
                                                   ToasterError::InconsistentDatabase(format!("parfile {} has malformed \
                                                                                               extra_params: {}",
                                                                                              self.id, e))
                                                 })?;
    Ok(Parfile { id: self.id,
                 parfile: NewParfile { location: StoredPath { filepath: self.filepath, filename: self.filename },
                                       md5: self.md5,
                                       pulsar_id: self.pulsar_id,
                                       add_time: self.add_time,
                                       comments: self.comments,
                                       params,
                                       extra_params } })
  }
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = templates)]
pub(crate) struct TemplateRow {
  pub id: i64,
  pub filepath: String,
  pub filename: String,
  pub md5: String,
  pub pulsar_id: i64,
  pub obssystem_id: i64,
  pub add_time: NaiveDateTime,
  pub comments: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = templates)]
pub(crate) struct NewTemplateRow<'a> {
  pub filepath: &'a str,
  pub filename: &'a str,
  pub md5: &'a str,
  pub pulsar_id: i64,
  pub obssystem_id: i64,
  pub add_time: NaiveDateTime,
  pub comments: Option<&'a str>,
}

impl<'a> From<&'a NewTemplate> for NewTemplateRow<'a> {
  fn from(t: &'a NewTemplate) -> Self {
    Self { filepath: &t.location.filepath,
           filename: &t.location.filename,
           md5: &t.md5,
           pulsar_id: t.pulsar_id,
           obssystem_id: t.obssystem_id,
           add_time: t.add_time,
           comments: t.comments.as_deref() }
  }
}

impl From<TemplateRow> for Template {
  fn from(r: TemplateRow) -> Self {
    Template { id: r.id,
               template: NewTemplate { location: StoredPath { filepath: r.filepath, filename: r.filename },
                                       md5: r.md5,
                                       pulsar_id: r.pulsar_id,
                                       obssystem_id: r.obssystem_id,
                                       add_time: r.add_time,
                                       comments: r.comments } }
  }
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = rawfiles)]
pub(crate) struct RawfileRow {
  pub id: i64,
  pub filepath: String,
  pub filename: String,
  pub md5: String,
  pub pulsar_id: i64,
  pub obssystem_id: i64,
  pub add_time: NaiveDateTime,
  pub filesize: i64,
  pub source_name: String,
  pub telescop: String,
  pub frontend: String,
  pub backend: String,
  pub nbin: i32,
  pub nchan: i32,
  pub npol: i32,
  pub nsub: i32,
  pub bw: f64,
  pub freq: f64,
  pub length: f64,
  pub mjd: f64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = rawfiles)]
pub(crate) struct NewRawfileRow<'a> {
  pub filepath: &'a str,
  pub filename: &'a str,
  pub md5: &'a str,
  pub pulsar_id: i64,
  pub obssystem_id: i64,
  pub add_time: NaiveDateTime,
  pub filesize: i64,
  pub source_name: &'a str,
  pub telescop: &'a str,
  pub frontend: &'a str,
  pub backend: &'a str,
  pub nbin: i32,
  pub nchan: i32,
  pub npol: i32,
  pub nsub: i32,
  pub bw: f64,
  pub freq: f64,
  pub length: f64,
  pub mjd: f64,
}

impl<'a> From<&'a NewRawfile> for NewRawfileRow<'a> {
  fn from(r: &'a NewRawfile) -> Self {
    let h = &r.header;
    Self { filepath: &r.location.filepath,
           filename: &r.location.filename,
           md5: &r.md5,
           pulsar_id: r.pulsar_id,
           obssystem_id: r.obssystem_id,
           add_time: r.add_time,
           filesize: r.filesize,
           source_name: &h.source,
           telescop: &h.telescope,
           frontend: &h.frontend,
           backend: &h.backend,
           nbin: h.nbin,
           nchan: h.nchan,
           npol: h.npol,
           nsub: h.nsub,
           bw: h.bw,
           freq: h.freq,
           length: h.length,
           mjd: h.mjd }
  }
}

impl From<RawfileRow> for Rawfile {
  fn from(r: RawfileRow) -> Self {
    Rawfile { id: r.id,
              rawfile: NewRawfile { location: StoredPath { filepath: r.filepath, filename: r.filename },
                                    md5: r.md5,
                                    pulsar_id: r.pulsar_id,
                                    obssystem_id: r.obssystem_id,
                                    add_time: r.add_time,
                                    filesize: r.filesize,
                                    header: ArchiveHeader { source: r.source_name,
                                                            telescope: r.telescop,
                                                            frontend: r.frontend,
                                                            backend: r.backend,
                                                            nbin: r.nbin,
                                                            nchan: r.nchan,
                                                            npol: r.npol,
                                                            nsub: r.nsub,
                                                            bw: r.bw,
                                                            freq: r.freq,
                                                            length: r.length,
                                                            mjd: r.mjd } } }
  }
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = processes)]
pub(crate) struct ProcessRow {
  pub id: i64,
  pub rawfile_id: i64,
  pub parfile_id: i64,
  pub template_id: i64,
  pub version_id: i64,
  pub user_name: String,
  pub manipulator: String,
  pub manipulator_args: String,
  pub start_time: NaiveDateTime,
  pub end_time: NaiveDateTime,
  pub status: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = processes)]
pub(crate) struct NewProcessRow<'a> {
  pub rawfile_id: i64,
  pub parfile_id: i64,
  pub template_id: i64,
  pub version_id: i64,
  pub user_name: &'a str,
  pub manipulator: &'a str,
  pub manipulator_args: &'a str,
  pub start_time: NaiveDateTime,
  pub end_time: NaiveDateTime,
  pub status: &'a str,
}

impl<'a> NewProcessRow<'a> {
  pub fn new(p: &'a NewProcess, version_id: i64) -> Self {
    Self { rawfile_id: p.rawfile_id,
           parfile_id: p.parfile_id,
           template_id: p.template_id,
           version_id,
           user_name: &p.user_name,
           manipulator: &p.manipulator,
           manipulator_args: &p.manipulator_args,
           start_time: p.start_time,
           end_time: p.end_time,
           status: &p.status }
  }
}

impl From<ProcessRow> for Process {
  fn from(r: ProcessRow) -> Self {
    Process { id: r.id,
              version_id: r.version_id,
              process: NewProcess { rawfile_id: r.rawfile_id,
                                    parfile_id: r.parfile_id,
                                    template_id: r.template_id,
                                    user_name: r.user_name,
                                    manipulator: r.manipulator,
                                    manipulator_args: r.manipulator_args,
                                    start_time: r.start_time,
                                    end_time: r.end_time,
                                    status: r.status } }
  }
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = toas)]
pub(crate) struct ToaRow {
  pub id: i64,
  pub process_id: i64,
  pub rawfile_id: i64,
  pub parfile_id: i64,
  pub template_id: i64,
  pub pulsar_id: i64,
  pub obssystem_id: i64,
  pub freq: f64,
  pub imjd: i32,
  pub fmjd: f64,
  pub toa_unc_us: f64,
  pub goodness_of_fit: Option<f64>,
  pub bw: Option<f64>,
  pub length: Option<f64>,
  pub nbin: Option<i32>,
  pub flags: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = toas)]
pub(crate) struct NewToaRow {
  pub process_id: i64,
  pub rawfile_id: i64,
  pub parfile_id: i64,
  pub template_id: i64,
  pub pulsar_id: i64,
  pub obssystem_id: i64,
  pub freq: f64,
  pub imjd: i32,
  pub fmjd: f64,
  pub toa_unc_us: f64,
  pub goodness_of_fit: Option<f64>,
  pub bw: Option<f64>,
  pub length: Option<f64>,
  pub nbin: Option<i32>,
  pub flags: String,
}

impl NewToaRow {
  pub fn new(process_id: i64, prov: &ToaProvenance, m: &ToaMeasurement) -> Result<Self, ToasterError> {
    Ok(Self { process_id,
              rawfile_id: prov.rawfile_id,
              parfile_id: prov.parfile_id,
              template_id: prov.template_id,
              pulsar_id: prov.pulsar_id,
              obssystem_id: prov.obssystem_id,
              freq: m.freq,
              imjd: m.imjd,
              fmjd: m.fmjd,
              toa_unc_us: m.toa_unc_us,
              goodness_of_fit: m.goodness_of_fit,
              bw: m.bw,
              length: m.length,
              nbin: m.nbin,
              flags: serde_json::to_string(&m.flags)? })
  }
}

impl ToaRow {
  pub fn into_toa(self) -> Result<Toa, ToasterError> {
    let flags: IndexMap<String, String> = serde_json::from_str(&self.flags).map_err(|e| {
                                            ToasterError::InconsistentDatabase(format!("TOA {} has malformed flags: {}",
                                                                                       self.id, e))
                                          })?;
    Ok(Toa { id: self.id,
             process_id: self.process_id,
             provenance: ToaProvenance { rawfile_id: self.rawfile_id,
                                         parfile_id: self.parfile_id,
                                         template_id: self.template_id,
                                         pulsar_id: self.pulsar_id,
                                         obssystem_id: self.obssystem_id },
             measurement: ToaMeasurement { freq: self.freq,
                                           imjd: self.imjd,
                                           fmjd: self.fmjd,
                                           toa_unc_us: self.toa_unc_us,
                                           goodness_of_fit: self.goodness_of_fit,
                                           bw: self.bw,
                                           length: self.length,
                                           nbin: self.nbin,
                                           flags } })
  }
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = diagnostics)]
pub(crate) struct DiagnosticRow {
  pub id: i64,
  pub rawfile_id: i64,
  pub plugin: String,
  pub kind: String,
  pub float_value: Option<f64>,
  pub filepath: Option<String>,
  pub array_value: Option<String>,
  pub add_time: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = diagnostics)]
pub(crate) struct NewDiagnosticRow {
  pub rawfile_id: i64,
  pub plugin: String,
  pub kind: String,
  pub float_value: Option<f64>,
  pub filepath: Option<String>,
  pub array_value: Option<String>,
  pub add_time: NaiveDateTime,
}

impl NewDiagnosticRow {
  pub fn from_diagnostic(d: &NewDiagnostic) -> Result<Self, ToasterError> {
    let (float_value, filepath, array_value) = match &d.value {
      DiagnosticValue::Float(v) => (Some(*v), None, None),
      DiagnosticValue::Plot(p) => (None, Some(p.to_string_lossy().into_owned()), None),
      DiagnosticValue::FloatArray(vs) => (None, None, Some(serde_json::to_string(vs)?)),
    };
    Ok(Self { rawfile_id: d.rawfile_id,
              plugin: d.plugin.clone(),
              kind: d.value.kind().as_str().to_string(),
              float_value,
              filepath,
              array_value,
              add_time: d.add_time })
  }
}

impl DiagnosticRow {
  pub fn into_diagnostic(self) -> Result<Diagnostic, ToasterError> {
    let bad = |what: &str| {
      ToasterError::InconsistentDatabase(format!("diagnostic {} ({}) has no {} value", self.id, self.kind, what))
    };
    let value = match self.kind.as_str() {
      "float" => DiagnosticValue::Float(self.float_value.ok_or_else(|| bad("float"))?),
      "plot" => DiagnosticValue::Plot(PathBuf::from(self.filepath.clone().ok_or_else(|| bad("plot"))?)),
      "float-array" => {
        let raw = self.array_value.as_deref().ok_or_else(|| bad("array"))?;
        DiagnosticValue::FloatArray(serde_json::from_str(raw).map_err(|_| bad("array"))?)
      }
      other => {
        return Err(ToasterError::InconsistentDatabase(format!("diagnostic {} has unknown kind '{}'", self.id, other)))
      }
    };
    Ok(Diagnostic { id: self.id,
                    diagnostic: NewDiagnostic { rawfile_id: self.rawfile_id,
                                                plugin: self.plugin,
                                                value,
                                                add_time: self.add_time } })
  }
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = opinions)]
pub(crate) struct OpinionRow {
  pub user_id: i64,
  pub toa_id: i64,
  pub is_bad: Option<bool>,
  pub comments: Option<String>,
}

impl From<OpinionRow> for Opinion {
  fn from(r: OpinionRow) -> Self {
    Opinion { user_id: r.user_id, toa_id: r.toa_id, is_bad: r.is_bad, comments: r.comments }
  }
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = timfiles)]
pub(crate) struct TimfileRow {
  pub id: i64,
  pub pulsar_id: i64,
  pub user_id: Option<i64>,
  pub version_id: i64,
  pub comments: Option<String>,
  pub add_time: NaiveDateTime,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parfile_columns_cover_recognized_params() {
    assert_eq!(PARAM_COLUMNS, &toaster_domain::parfile::RECOGNIZED_PARAMS[..]);
  }
}
