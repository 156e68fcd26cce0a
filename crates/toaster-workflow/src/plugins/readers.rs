// readers.rs
//
// Parser for tempo2-format TOA lines, as written by `pat -f tempo2` and by
// the tim-file emitter:
//
//   <archive> <freq> <imjd>.<frac> <unc_us> <site> [-flag value]...
use super::{ToaReader, ToaRecord};
use indexmap::IndexMap;
use log::trace;
use toaster_domain::{ToaMeasurement, ToasterError};

/// Reader for tempo2 "FORMAT 1" TOA lines.
pub struct Tempo2Reader;

/// Splits an MJD string on its decimal point so the fractional day keeps
/// every digit tempo2 printed.
pub fn split_mjd(text: &str) -> Result<(i32, f64), ToasterError> {
  let bad = || ToasterError::Toaster(format!("bad MJD '{}'", text));
  let (int_part, frac_part) = text.split_once('.').unwrap_or((text, "0"));
  let imjd = int_part.parse::<i32>().map_err(|_| bad())?;
  if !frac_part.chars().all(|c| c.is_ascii_digit()) {
    return Err(bad());
  }
  let fmjd = format!("0.{}", frac_part).parse::<f64>().map_err(|_| bad())?;
  Ok((imjd, fmjd))
}

fn parse_line(line: &str) -> Result<ToaRecord, ToasterError> {
  let tokens: Vec<&str> = line.split_whitespace().collect();
  if tokens.len() < 5 {
    return Err(ToasterError::Toaster(format!("TOA line has {} fields, expected at least 5: {}", tokens.len(), line)));
  }
  let number = |what: &str, s: &str| {
    s.parse::<f64>().map_err(|_| ToasterError::Toaster(format!("bad {} '{}' in TOA line: {}", what, s, line)))
  };
  let freq = number("frequency", tokens[1])?;
  let (imjd, fmjd) = split_mjd(tokens[2])?;
  let toa_unc_us = number("uncertainty", tokens[3])?;

  let mut flags = IndexMap::new();
  let mut rest = tokens[5..].iter();
  while let Some(flag) = rest.next() {
    let name = flag.strip_prefix('-')
                   .ok_or_else(|| ToasterError::Toaster(format!("expected a -flag, got '{}' in: {}", flag, line)))?;
    let value =
      rest.next().ok_or_else(|| ToasterError::Toaster(format!("flag -{} has no value in: {}", name, line)))?;
    flags.insert(name.to_string(), value.to_string());
  }

  let goodness_of_fit = match flags.get("gof").map(String::as_str) {
    None | Some("*error*") => None,
    Some(v) => Some(number("gof", v)?),
  };
  let optional = |key: &str| flags.get(key).map(|v| number(key, v)).transpose();
  let nchan = optional("nchan")?;
  let nsubint = optional("nsubint")?;
  let bw = optional("bw")?.map(|bw| match nchan {
                              Some(n) if n > 0.0 => bw / n,
                              _ => bw,
                            });
  let length = optional("length")?.map(|len| match nsubint {
                                       Some(n) if n > 0.0 => len / n,
                                       _ => len,
                                     });
  let nbin = flags.get("nbin")
                  .map(|v| v.parse::<i32>().map_err(|_| ToasterError::Toaster(format!("bad nbin '{}' in: {}", v, line))))
                  .transpose()?;

  Ok(ToaRecord { archive: tokens[0].to_string(),
                 obscode: tokens[4].to_string(),
                 measurement: ToaMeasurement { freq,
                                               imjd,
                                               fmjd,
                                               toa_unc_us,
                                               goodness_of_fit,
                                               bw,
                                               length,
                                               nbin,
                                               flags } })
}

impl ToaReader for Tempo2Reader {
  fn name(&self) -> &'static str {
    "tempo2"
  }

  fn description(&self) -> &'static str {
    "tempo2 FORMAT 1 TOA lines with -flag value pairs"
  }

  fn parse(&self, stdout: &str) -> Result<Vec<ToaRecord>, ToasterError> {
    let mut out = Vec::new();
    for line in stdout.lines() {
      let trimmed = line.trim();
      if trimmed.is_empty() || trimmed.starts_with("FORMAT") || trimmed.starts_with('#') || trimmed.starts_with("C ") {
        continue;
      }
      let record = parse_line(trimmed)?;
      let m = &record.measurement;
      trace!("TOA {} mjd {} + {} at {}", record.archive, m.imjd, m.fmjd, record.obscode);
      out.push(record);
    }
    Ok(out)
  }
}
