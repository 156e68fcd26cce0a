// timfile.rs
//
// Writes selected TOAs as a tempo2 "FORMAT 1" tim file and optionally
// records which TOAs went into it.
use crate::context::ToasterContext;
use crate::version::VersionStamper;
use chrono::Utc;
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use toaster_domain::{NewTimfile, TimToa, ToaFilter, ToasterError};

/// `%5d` of the integer day followed by the point and 15 digits of the
/// fractional day. A fraction that rounds up to a whole day carries into the
/// integer part.
pub fn format_mjd(imjd: i32, fmjd: f64) -> String {
  let frac = format!("{:.15}", fmjd);
  let imjd = if frac.starts_with("1.") { imjd + 1 } else { imjd };
  let digits = frac.find('.').map(|i| &frac[i..]).unwrap_or(".000000000000000");
  format!("{:5}{}", imjd, digits)
}

pub fn format_tim_line(toa: &TimToa) -> String {
  format!(" {}  {:.2}  {}  {:.4}  {}\n",
          toa.rawfile_name,
          toa.freq,
          format_mjd(toa.imjd, toa.fmjd),
          toa.toa_unc_us,
          toa.obscode)
}

pub fn write_tim<W: Write>(out: &mut W, toas: &[TimToa]) -> std::io::Result<()> {
  out.write_all(b"FORMAT 1\n\n")?;
  for toa in toas {
    out.write_all(format_tim_line(toa).as_bytes())?;
  }
  out.flush()
}

pub struct TimEmitter<'a> {
  ctx: &'a ToasterContext,
}

impl<'a> TimEmitter<'a> {
  pub fn new(ctx: &'a ToasterContext) -> Self {
    Self { ctx }
  }

  /// Validates `filter`, resolves a pulsar alias to its name and returns the
  /// matching TOAs ordered by pulsar then MJD. Invalid filters fail before
  /// the catalog is queried.
  pub fn select(&self, filter: &ToaFilter) -> Result<Vec<TimToa>, ToasterError> {
    filter.validate()?;
    let mut filter = filter.clone();
    if let Some(name) = &filter.pulsar_name {
      let catalog = self.ctx.catalog();
      let id = catalog.pulsar_id(name)?
                      .ok_or_else(|| ToasterError::UnrecognizedValue(format!("unknown pulsar name or alias '{}'",
                                                                             name)))?;
      let pulsar = catalog.get_pulsar(id)?
                          .ok_or_else(|| ToasterError::InconsistentDatabase(format!("alias {} points at no pulsar",
                                                                                    name)))?;
      filter.pulsar_name = Some(pulsar.name);
    }
    self.ctx.catalog().select_toas(&filter)
  }

  /// Writes the selection to `out`. Returns what was written.
  pub fn emit<W: Write>(&self, filter: &ToaFilter, out: &mut W) -> Result<Vec<TimToa>, ToasterError> {
    let toas = self.select(filter)?;
    write_tim(out, &toas)?;
    Ok(toas)
  }

  /// Writes the selection to a file. The file is only created once the
  /// selection succeeded.
  pub fn emit_to_path(&self, filter: &ToaFilter, path: &Path) -> Result<Vec<TimToa>, ToasterError> {
    let toas = self.select(filter)?;
    let file =
      File::create(path).map_err(|e| ToasterError::File(format!("cannot create {}: {}", path.display(), e)))?;
    write_tim(&mut BufWriter::new(file), &toas)?;
    info!("wrote {} TOA(s) to {}", toas.len(), path.display());
    Ok(toas)
  }

  /// Stores a timfile row linking `toas` to the current user and version.
  pub fn record(&self, filter: &ToaFilter, toas: &[TimToa], comments: Option<String>)
                -> Result<i64, ToasterError> {
    let catalog = self.ctx.catalog();
    let name = filter.pulsar_name
                     .as_deref()
                     .ok_or_else(|| ToasterError::BadInput("recording a timfile requires a pulsar".to_string()))?;
    let pulsar_id =
      catalog.pulsar_id(name)?
             .ok_or_else(|| ToasterError::UnrecognizedValue(format!("unknown pulsar name or alias '{}'", name)))?;
    let version_id = VersionStamper::new(self.ctx.runner(), &self.ctx.config).current_version_id(catalog)?;
    let user_id = catalog.user_id(&self.ctx.config.user_name)?;
    let toa_ids: Vec<i64> = toas.iter().map(|t| t.toa_id).collect();
    let id = catalog.record_timfile(NewTimfile { pulsar_id,
                                                 user_id,
                                                 version_id,
                                                 comments,
                                                 add_time: Utc::now().naive_utc() },
                                    &toa_ids)?;
    info!("recorded timfile {} with {} TOA(s)", id, toa_ids.len());
    Ok(id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tim(imjd: i32, fmjd: f64) -> TimToa {
    TimToa { toa_id: 1,
             pulsar_name: "J1909-3744".into(),
             rawfile_name: "guppi_55000.ar".into(),
             obscode: "GB".into(),
             freq: 1400.123,
             imjd,
             fmjd,
             toa_unc_us: 0.51234 }
  }

  #[test]
  fn mjd_keeps_fifteen_fractional_digits() {
    assert_eq!(format_mjd(55000, 0.123456789012345), "55000.123456789012345");
    assert_eq!(format_mjd(999, 0.5), "  999.500000000000000");
  }

  #[test]
  fn fraction_rounding_to_one_carries() {
    assert_eq!(format_mjd(55000, 0.9999999999999999), "55001.000000000000000");
  }

  #[test]
  fn line_layout() {
    assert_eq!(format_tim_line(&tim(55000, 0.25)),
               " guppi_55000.ar  1400.12  55000.250000000000000  0.5123  GB\n");
  }

  #[test]
  fn header_precedes_lines() {
    let mut out = Vec::new();
    write_tim(&mut out, &[tim(55000, 0.25)]).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("FORMAT 1\n\n guppi_55000.ar"));
    assert_eq!(text.lines().count(), 3);
  }
}
