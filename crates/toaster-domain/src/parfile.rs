//! Parameter-file (ephemeris) parsing.
//!
//! A parfile is a list of `KEY value [fit-flag] [uncertainty]` lines. Keys
//! listed in [`RECOGNIZED_PARAMS`] have their own catalog column and keep only
//! the value token; every other key keeps the remainder of its line and ends
//! up in the side JSON column.

use crate::errors::ToasterError;
use indexmap::IndexMap;
use std::path::Path;

/// Parameters stored in dedicated columns, in column order.
pub const RECOGNIZED_PARAMS: [&str; 22] = ["PSRJ",
                                           "RAJ",
                                           "DECJ",
                                           "PMRA",
                                           "PMDEC",
                                           "PX",
                                           "F0",
                                           "F1",
                                           "PEPOCH",
                                           "POSEPOCH",
                                           "DM",
                                           "DMEPOCH",
                                           "BINARY_MODEL",
                                           "PB",
                                           "A1",
                                           "ECC",
                                           "T0",
                                           "OM",
                                           "TASC",
                                           "EPS1",
                                           "EPS2",
                                           "EPHEM"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedParfile {
  pub params: IndexMap<String, String>,
  pub extra_params: IndexMap<String, String>,
}

impl ParsedParfile {
  /// Pulsar named by the file: `PSRJ`, then `PSR`, then `PSRB`.
  pub fn pulsar_name(&self) -> Option<&str> {
    self.params
        .get("PSRJ")
        .or_else(|| self.extra_params.get("PSR"))
        .or_else(|| self.extra_params.get("PSRB"))
        .map(String::as_str)
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.params.get(key).or_else(|| self.extra_params.get(key)).map(String::as_str)
  }
}

pub fn is_recognized(key: &str) -> bool {
  RECOGNIZED_PARAMS.contains(&key)
}

/// Parses parfile text. Comment lines (`#`, `C `) and blank lines are
/// skipped; `BINARY` is stored as `BINARY_MODEL`.
pub fn parse_parfile(text: &str) -> ParsedParfile {
  let mut parsed = ParsedParfile::default();
  for line in text.lines() {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("C ") {
      continue;
    }
    let mut tokens = trimmed.split_whitespace();
    let Some(raw_key) = tokens.next() else { continue };
    let mut key = raw_key.to_ascii_uppercase();
    if key == "BINARY" {
      key = "BINARY_MODEL".to_string();
    }
    let rest: Vec<&str> = tokens.collect();
    if is_recognized(&key) {
      let value = rest.first().copied().unwrap_or_default().to_string();
      parsed.params.entry(key).or_insert(value);
    } else {
      let value = rest.join(" ");
      // Repeated keys (JUMP, ...) are kept in order, separated by "; ".
      parsed.extra_params
            .entry(key)
            .and_modify(|v: &mut String| {
              v.push_str("; ");
              v.push_str(&value);
            })
            .or_insert(value);
    }
  }
  parsed
}

pub fn read_parfile(path: &Path) -> Result<ParsedParfile, ToasterError> {
  let text = std::fs::read_to_string(path)
    .map_err(|e| ToasterError::File(format!("cannot read parfile {}: {}", path.display(), e)))?;
  Ok(parse_parfile(&text))
}

#[cfg(test)]
mod tests {
  use super::*;

  const PAR: &str = "PSRJ           J1909-3744\n\
                     RAJ            19:09:47.4335737  1  0.0000005\n\
                     F0             339.31568732018   1  3.2e-12\n\
                     # a comment\n\
                     DM             10.3932\n\
                     BINARY         ELL1\n\
                     JUMP -fe Rcvr1_2 0.0001 1\n\
                     JUMP -fe Rcvr_800 0.0002 1\n\
                     \n\
                     TZRSITE        1\n";

  #[test]
  fn recognized_params_keep_value_token_only() {
    let p = parse_parfile(PAR);
    assert_eq!(p.pulsar_name(), Some("J1909-3744"));
    assert_eq!(p.params["RAJ"], "19:09:47.4335737");
    assert_eq!(p.params["F0"], "339.31568732018");
    assert_eq!(p.params["BINARY_MODEL"], "ELL1");
    assert!(!p.params.contains_key("BINARY"));
  }

  #[test]
  fn unknown_keys_are_preserved_in_order() {
    let p = parse_parfile(PAR);
    let keys: Vec<&str> = p.extra_params.keys().map(String::as_str).collect();
    assert_eq!(keys, ["JUMP", "TZRSITE"]);
    assert_eq!(p.extra_params["JUMP"], "-fe Rcvr1_2 0.0001 1; -fe Rcvr_800 0.0002 1");
  }

  #[test]
  fn psr_is_a_fallback_name() {
    let p = parse_parfile("PSR 1937+21\nF0 641.9\n");
    assert_eq!(p.pulsar_name(), Some("1937+21"));
    assert_eq!(p.get("F0"), Some("641.9"));
  }
}
