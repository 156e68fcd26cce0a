//! Argument vectors and output parsers for the psrchive executables
//! (`psrstat`, `pam`, `psrplot`) and for `pat`.
//!
//! Builders return a [`ToolCommand`]; nothing here launches a process except
//! the `read_*` helpers, which take the runner explicitly.

use crate::errors::ToolError;
use crate::runner::{ToolCommand, ToolRunner};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// `psrstat` keys queried when ingesting an archive, in output order.
pub const HEADER_KEYS: [&str; 12] =
  ["name", "telescop", "rcvr:name", "be:name", "nbin", "nchan", "npol", "nsubint", "bw", "freq", "length", "int[0]:mjd"];

/// Flags `pat` is asked to append to every TOA line.
pub const PAT_FLAGS: &str = "gof length bw nbin nchan nsubint";

/// Header attributes of an archive as reported by `psrstat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveHeader {
  pub source: String,
  pub telescope: String,
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

pub fn header_command(archive: &Path) -> ToolCommand {
  ToolCommand::new("psrstat").arg("-Qq").arg("-c").arg(HEADER_KEYS.join(",")).path_arg(archive)
}

/// Parses the whitespace separated values printed for [`HEADER_KEYS`]. A
/// leading filename column is tolerated.
pub fn parse_header(stdout: &str) -> Result<ArchiveHeader, ToolError> {
  let tokens: Vec<&str> = stdout.split_whitespace().collect();
  let values = match tokens.len() {
    n if n == HEADER_KEYS.len() => &tokens[..],
    n if n == HEADER_KEYS.len() + 1 => &tokens[1..],
    n => {
      return Err(ToolError::parse("psrstat",
                                  format!("expected {} header values, got {}", HEADER_KEYS.len(), n)))
    }
  };
  let int = |i: usize| {
    values[i].parse::<i32>()
             .map_err(|_| ToolError::parse("psrstat", format!("{} is not an integer: {}", HEADER_KEYS[i], values[i])))
  };
  let float = |i: usize| {
    values[i].parse::<f64>()
             .map_err(|_| ToolError::parse("psrstat", format!("{} is not a number: {}", HEADER_KEYS[i], values[i])))
  };
  Ok(ArchiveHeader { source: values[0].to_string(),
                     telescope: values[1].to_string(),
                     frontend: values[2].to_string(),
                     backend: values[3].to_string(),
                     nbin: int(4)?,
                     nchan: int(5)?,
                     npol: int(6)?,
                     nsub: int(7)?,
                     bw: float(8)?,
                     freq: float(9)?,
                     length: float(10)?,
                     mjd: float(11)? })
}

pub fn read_header(runner: &dyn ToolRunner, archive: &Path) -> Result<ArchiveHeader, ToolError> {
  let out = runner.run(&header_command(archive))?;
  parse_header(&out.stdout)
}

/// `psrstat -Qq -j DTFp -c snr <ar>`
pub fn snr_command(archive: &Path) -> ToolCommand {
  ToolCommand::new("psrstat").args(["-Qq", "-j", "DTFp", "-c", "snr"]).path_arg(archive)
}

/// `psrstat <ar> -c int:wt -Qq`
pub fn weights_command(archive: &Path) -> ToolCommand {
  ToolCommand::new("psrstat").path_arg(archive).args(["-c", "int:wt", "-Qq"])
}

/// Reads a single number: the last token of the first non-empty line.
pub fn parse_scalar(command: &str, stdout: &str) -> Result<f64, ToolError> {
  let token = stdout.lines()
                    .find(|l| !l.trim().is_empty())
                    .and_then(|l| l.split_whitespace().last())
                    .ok_or_else(|| ToolError::parse(command, "empty output"))?;
  token.parse::<f64>().map_err(|_| ToolError::parse(command, format!("not a number: {}", token)))
}

/// Reads comma (or whitespace) separated floats, possibly over several lines.
pub fn parse_float_list(command: &str, stdout: &str) -> Result<Vec<f64>, ToolError> {
  stdout.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<f64>().map_err(|_| ToolError::parse(command, format!("not a number: {}", t))))
        .collect()
}

/// In-place reduction performed by `pam -m`.
#[derive(Debug, Clone, PartialEq)]
pub struct PamReduction {
  pub nsub: u32,
  pub nchan: u32,
  pub nbin: Option<u32>,
  pub ephem: Option<PathBuf>,
  pub update_dm: bool,
}

/// `pam -m --setnchn N --setnsub M [--setnbin B] [-E ephem [--update-dm]] <file>`
pub fn pam_reduce_command(archive: &Path, reduction: &PamReduction) -> ToolCommand {
  let mut cmd = ToolCommand::new("pam").args(["-m".to_string(),
                                              "--setnchn".to_string(),
                                              reduction.nchan.to_string(),
                                              "--setnsub".to_string(),
                                              reduction.nsub.to_string()]);
  if let Some(nbin) = reduction.nbin {
    cmd = cmd.arg("--setnbin").arg(nbin.to_string());
  }
  if let Some(ephem) = &reduction.ephem {
    cmd = cmd.arg("-E").path_arg(ephem);
    if reduction.update_dm {
      cmd = cmd.arg("--update-dm");
    }
  }
  cmd.path_arg(archive)
}

/// A single `pam -m <flags...> <file>` invocation. Used when operations must
/// be applied in a fixed order, one process per operation.
pub fn pam_step_command<I, S>(archive: &Path, flags: I) -> ToolCommand
  where I: IntoIterator<Item = S>,
        S: Into<String>
{
  ToolCommand::new("pam").arg("-m").args(flags).path_arg(archive)
}

/// `psredit -m -c <key>=<value> <file>`, editing one header field in place.
pub fn psredit_command(archive: &Path, key: &str, value: &str) -> ToolCommand {
  ToolCommand::new("psredit").args(["-m", "-c"]).arg(format!("{}={}", key, value)).path_arg(archive)
}

/// `pat -A <method> -f tempo2 -C "<flags>" -s <template> <archive>`
pub fn pat_command(template: &Path, archive: &Path, fit_method: &str) -> ToolCommand {
  ToolCommand::new("pat").args(["-A", fit_method, "-f", "tempo2", "-C", PAT_FLAGS, "-s"])
                         .path_arg(template)
                         .path_arg(archive)
}

/// One panel of a `psrplot` figure: plot kind plus its view options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlotPanel {
  pub kind: &'static str,
  pub options: &'static str,
}

/// `psrplot -O -j D -c above:c=<title> <ar> -D <device>/PNG [-p kind -c opts]...`
pub fn psrplot_command(archive: &Path, device: &Path, panels: &[PlotPanel]) -> ToolCommand {
  let title = archive.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
  let mut cmd = ToolCommand::new("psrplot").args(["-O", "-j", "D", "-c"])
                                           .arg(format!("above:c={}", title))
                                           .path_arg(archive)
                                           .arg("-D")
                                           .arg(format!("{}/PNG", device.display()));
  for panel in panels {
    cmd = cmd.args(["-p", panel.kind, "-c", panel.options]);
  }
  cmd
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::stubs::StubRunner;

  const HEADER_LINE: &str = "J1909-3744 GBT Rcvr1_2 GUPPI 1024 64 4 12 -800 1500.0 1800.5 55000.5";

  #[test]
  fn header_parses_with_and_without_filename() {
    let h = parse_header(HEADER_LINE).expect("header");
    assert_eq!(h.source, "J1909-3744");
    assert_eq!(h.telescope, "GBT");
    assert_eq!((h.nbin, h.nchan, h.npol, h.nsub), (1024, 64, 4, 12));
    assert_eq!(h.bw, -800.0);
    let with_name = format!("guppi_55000.ar {}", HEADER_LINE);
    assert_eq!(parse_header(&with_name).expect("header"), h);
  }

  #[test]
  fn header_rejects_short_output() {
    assert!(matches!(parse_header("J1909-3744 GBT"), Err(ToolError::Parse { .. })));
  }

  #[test]
  fn read_header_uses_psrstat_key_list() {
    let runner = StubRunner::new().reply("psrstat", HEADER_LINE);
    read_header(&runner, Path::new("/data/a.ar")).expect("header");
    let argv = &runner.calls()[0];
    assert_eq!(argv[..3], ["psrstat".to_string(), "-Qq".into(), "-c".into()]);
    assert!(argv[3].starts_with("name,telescop,"));
    assert_eq!(argv[4], "/data/a.ar");
  }

  #[test]
  fn scalars_and_lists() {
    assert_eq!(parse_scalar("psrstat", "\n  42.5\n").unwrap(), 42.5);
    assert!(parse_scalar("psrstat", "").is_err());
    assert_eq!(parse_float_list("psrstat", "1,0,1\n0.5,1").unwrap(), vec![1.0, 0.0, 1.0, 0.5, 1.0]);
  }

  #[test]
  fn pam_reduction_argv() {
    let r = PamReduction { nsub: 1, nchan: 4, nbin: Some(256), ephem: Some("/eph/J1909.par".into()), update_dm: true };
    let argv = pam_reduce_command(Path::new("x.ar"), &r).argv();
    assert_eq!(argv,
               ["pam", "-m", "--setnchn", "4", "--setnsub", "1", "--setnbin", "256", "-E", "/eph/J1909.par", "--update-dm",
                "x.ar"]);
    let plain = PamReduction { nsub: 1, nchan: 1, nbin: None, ephem: None, update_dm: true };
    assert_eq!(pam_reduce_command(Path::new("x.ar"), &plain).argv(),
               ["pam", "-m", "--setnchn", "1", "--setnsub", "1", "x.ar"]);
  }

  #[test]
  fn pat_argv_passes_flag_list_as_one_argument() {
    let argv = pat_command(Path::new("t.std"), Path::new("x.ar"), "FDM").argv();
    assert_eq!(argv, ["pat", "-A", "FDM", "-f", "tempo2", "-C", PAT_FLAGS, "-s", "t.std", "x.ar"]);
  }
}
