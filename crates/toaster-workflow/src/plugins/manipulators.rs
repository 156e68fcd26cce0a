// manipulators.rs
//
// Built-in manipulators. Both copy their input to the output path first and
// then edit the copy in place with psrchive tools.
use super::{canonical, first_input, typed_args, Manipulator, PluginArg};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};
use toaster_domain::ToasterError;
use toaster_providers::psrchive::{pam_reduce_command, pam_step_command, psredit_command, PamReduction};
use toaster_providers::ToolRunner;

fn default_one() -> u32 {
  1
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PamitArgs {
  #[serde(default = "default_one")]
  pub nsub: u32,
  #[serde(default = "default_one")]
  pub nchan: u32,
  #[serde(default)]
  pub nbin: Option<u32>,
  #[serde(default)]
  pub ephem: Option<PathBuf>,
  #[serde(default = "default_true")]
  pub update_dm: bool,
}

impl Default for PamitArgs {
  fn default() -> Self {
    Self { nsub: 1, nchan: 1, nbin: None, ephem: None, update_dm: true }
  }
}

/// Reduces an archive to the requested number of sub-integrations, channels
/// and bins, optionally installing a new ephemeris.
pub struct Pamit;

const PAMIT_ARGS: &[PluginArg] =
  &[PluginArg { name: "nsub", help: "number of sub-integrations to keep (default 1)" },
    PluginArg { name: "nchan", help: "number of channels to keep (default 1)" },
    PluginArg { name: "nbin", help: "number of phase bins to keep (default: unchanged)" },
    PluginArg { name: "ephem", help: "ephemeris to install" },
    PluginArg { name: "update_dm", help: "refresh DM from the installed ephemeris (default true)" }];

impl Pamit {
  fn parse(&self, args: &JsonValue) -> Result<PamitArgs, ToasterError> {
    let parsed: PamitArgs = typed_args(self.name(), args)?;
    if parsed.nsub == 0 || parsed.nchan == 0 || parsed.nbin == Some(0) {
      return Err(ToasterError::BadInput("pamit: nsub, nchan and nbin must be positive".into()));
    }
    Ok(parsed)
  }
}

impl Manipulator for Pamit {
  fn name(&self) -> &'static str {
    "pamit"
  }

  fn description(&self) -> &'static str {
    "Scrunch to the requested number of sub-integrations, channels and bins"
  }

  fn arguments(&self) -> &'static [PluginArg] {
    PAMIT_ARGS
  }

  fn canonical_args(&self, args: &JsonValue) -> Result<String, ToasterError> {
    canonical(&self.parse(args)?)
  }

  fn manipulate(&self, runner: &dyn ToolRunner, inputs: &[PathBuf], output: &Path, args: &JsonValue)
                -> Result<(), ToasterError> {
    let args = self.parse(args)?;
    let input = first_input(self.name(), inputs)?;
    fs::copy(input, output)?;
    let reduction = PamReduction { nsub: args.nsub,
                                   nchan: args.nchan,
                                   nbin: args.nbin,
                                   ephem: args.ephem,
                                   update_dm: args.update_dm };
    runner.run(&pam_reduce_command(output, &reduction))?;
    debug!("pamit reduced {} into {}", input.display(), output.display());
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DdFixFreqArgs {
  pub ctrfreq: f64,
  #[serde(default)]
  pub dm: Option<f64>,
}

/// Forces the centre frequency, optionally sets the DM, then scrunches and
/// dedisperses to a single profile.
pub struct DdFixFreq;

const DDFIXFREQ_ARGS: &[PluginArg] =
  &[PluginArg { name: "ctrfreq", help: "centre frequency to write into the archive, in MHz (required)" },
    PluginArg { name: "dm", help: "dispersion measure to set before dedispersing" }];

// Dedispersion has to happen before the frequency scrunch.
const DDFIXFREQ_STEPS: [&str; 4] = ["-p", "-T", "-D", "-F"];

impl DdFixFreq {
  fn parse(&self, args: &JsonValue) -> Result<DdFixFreqArgs, ToasterError> {
    let parsed: DdFixFreqArgs = typed_args(self.name(), args)?;
    if !(parsed.ctrfreq.is_finite() && parsed.ctrfreq > 0.0) {
      return Err(ToasterError::BadInput(format!("ddfixfreq: bad centre frequency {}", parsed.ctrfreq)));
    }
    Ok(parsed)
  }
}

impl Manipulator for DdFixFreq {
  fn name(&self) -> &'static str {
    "ddfixfreq"
  }

  fn description(&self) -> &'static str {
    "Set the centre frequency (and DM), then pscrunch, tscrunch, dedisperse and fscrunch"
  }

  fn arguments(&self) -> &'static [PluginArg] {
    DDFIXFREQ_ARGS
  }

  fn canonical_args(&self, args: &JsonValue) -> Result<String, ToasterError> {
    canonical(&self.parse(args)?)
  }

  fn manipulate(&self, runner: &dyn ToolRunner, inputs: &[PathBuf], output: &Path, args: &JsonValue)
                -> Result<(), ToasterError> {
    let args = self.parse(args)?;
    let input = first_input(self.name(), inputs)?;
    fs::copy(input, output)?;
    runner.run(&psredit_command(output, "freq", &args.ctrfreq.to_string()))?;
    if let Some(dm) = args.dm {
      runner.run(&pam_step_command(output, ["-d".to_string(), dm.to_string()]))?;
    }
    for flag in DDFIXFREQ_STEPS {
      runner.run(&pam_step_command(output, [flag]))?;
    }
    Ok(())
  }
}
