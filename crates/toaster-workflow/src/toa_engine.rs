// toa_engine.rs
//
// Rawfile in, TOAs out. Resolves the ephemeris and template, reduces the
// archive with a manipulator, runs `pat` and records the version, the process
// and its TOAs in one catalog transaction.
use crate::context::ToasterContext;
use crate::manipulate::ManipulatorRuntime;
use crate::plugins;
use crate::version::VersionStamper;
use chrono::Utc;
use log::{debug, info, warn};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use toaster_domain::{NewProcess, ProcessKey, ToaMeasurement, ToaProvenance, ToasterError};
use toaster_providers::psrchive::{pam_step_command, pat_command};

pub const DEFAULT_MANIPULATOR: &str = "pamit";
pub const TOA_READER: &str = "tempo2";

/// Fitting method whose goodness-of-fit values are meaningful.
const GOF_FIT_METHOD: &str = "FDM";

#[derive(Debug, Clone, PartialEq)]
pub struct ToaRequest {
  pub rawfile_id: i64,
  /// Overrides the pulsar's master parfile.
  pub parfile_id: Option<i64>,
  /// Overrides the master template of the pulsar and observing system.
  pub template_id: Option<i64>,
  pub manipulator: String,
  pub manipulator_args: JsonValue,
  pub allow_conflicts: bool,
}

impl ToaRequest {
  pub fn new(rawfile_id: i64) -> Self {
    Self { rawfile_id,
           parfile_id: None,
           template_id: None,
           manipulator: DEFAULT_MANIPULATOR.to_string(),
           manipulator_args: JsonValue::Null,
           allow_conflicts: false }
  }

  pub fn parfile(mut self, id: i64) -> Self {
    self.parfile_id = Some(id);
    self
  }

  pub fn template(mut self, id: i64) -> Self {
    self.template_id = Some(id);
    self
  }

  pub fn manipulator(mut self, name: impl Into<String>, args: JsonValue) -> Self {
    self.manipulator = name.into();
    self.manipulator_args = args;
    self
  }

  pub fn allow_conflicts(mut self, allow: bool) -> Self {
    self.allow_conflicts = allow;
    self
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToaOutcome {
  pub process_id: i64,
  pub toa_ids: Vec<i64>,
}

pub struct ToaEngine<'a> {
  ctx: &'a ToasterContext,
  scratch_root: Option<PathBuf>,
}

impl<'a> ToaEngine<'a> {
  pub fn new(ctx: &'a ToasterContext) -> Self {
    Self { ctx, scratch_root: None }
  }

  pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
    self.scratch_root = Some(root.into());
    self
  }

  pub fn run(&self, req: &ToaRequest) -> Result<ToaOutcome, ToasterError> {
    let catalog = self.ctx.catalog();
    let config = &self.ctx.config;
    let rawfile = catalog.get_rawfile(req.rawfile_id)?
                         .ok_or_else(|| ToasterError::UnrecognizedValue(format!("no rawfile with id {}",
                                                                                req.rawfile_id)))?;
    let pulsar_id = rawfile.rawfile.pulsar_id;
    let obssystem_id = rawfile.rawfile.obssystem_id;
    let pulsar = catalog.get_pulsar(pulsar_id)?.ok_or_else(|| {
                   ToasterError::InconsistentDatabase(format!("rawfile {} refers to missing pulsar {}",
                                                              req.rawfile_id, pulsar_id))
                 })?;

    let parfile_id = match req.parfile_id {
      Some(id) => id,
      None => catalog.master_parfile(pulsar_id)?
                     .ok_or_else(|| ToasterError::NoMaster(format!("no master parfile for pulsar {}", pulsar.name)))?,
    };
    let parfile = catalog.get_parfile(parfile_id)?
                         .ok_or_else(|| ToasterError::UnrecognizedValue(format!("no parfile with id {}", parfile_id)))?;
    let template_id = match req.template_id {
      Some(id) => id,
      None => catalog.master_template(pulsar_id, obssystem_id)?.ok_or_else(|| {
                ToasterError::NoMaster(format!("no master template for pulsar {} and observing system {}",
                                               pulsar.name, obssystem_id))
              })?,
    };
    let template = catalog.get_template(template_id)?
                          .ok_or_else(|| ToasterError::UnrecognizedValue(format!("no template with id {}",
                                                                                 template_id)))?;

    let manipulator = plugins::manipulator(&req.manipulator)?;
    let canonical_args = manipulator.canonical_args(&req.manipulator_args)?;
    let key = ProcessKey { rawfile_id: req.rawfile_id,
                           parfile_id,
                           template_id,
                           manipulator: manipulator.name().to_string(),
                           manipulator_args: canonical_args.clone() };
    if !req.allow_conflicts && catalog.toas_exist_for(&key)? {
      return Err(ToasterError::ConflictingToas(format!("rawfile {} already has TOAs for parfile {}, template {} \
                                                        and {} {}",
                                                       req.rawfile_id, parfile_id, template_id, key.manipulator,
                                                       key.manipulator_args)));
    }

    // Stored together with the process.
    let version = VersionStamper::new(self.ctx.runner(), config).stamp()?;
    let start_time = Utc::now().naive_utc();

    let scratch = self.scratch()?;
    let raw_path = rawfile.rawfile.location.path();
    let reduced = scratch.path().join(format!("{}.{}", rawfile.rawfile.location.filename, manipulator.name()));
    let mut runtime = ManipulatorRuntime::new(self.ctx.runner(), config.debug);
    if let Some(root) = &self.scratch_root {
      runtime = runtime.with_scratch_root(root);
    }
    runtime.run(manipulator.as_ref(), &[raw_path], &req.manipulator_args, &reduced)?;

    let parfile_path = parfile.parfile.location.path();
    self.ctx.runner().run(&pam_step_command(&reduced,
                                            ["-E".to_string(),
                                             parfile_path.display().to_string(),
                                             "--update-dm".to_string()]))?;
    let pat = self.ctx
                  .runner()
                  .run(&pat_command(&template.template.location.path(), &reduced, &config.fit_method))?;
    let records = plugins::toa_reader(TOA_READER)?.parse(&pat.stdout)?;
    if records.is_empty() {
      warn!("pat produced no TOAs for rawfile {}", req.rawfile_id);
    }
    let keep_gof = config.fit_method.eq_ignore_ascii_case(GOF_FIT_METHOD);
    let toas: Vec<ToaMeasurement> = records.into_iter()
                                           .map(|r| {
                                             let mut m = r.measurement;
                                             if !keep_gof {
                                               m.goodness_of_fit = None;
                                             }
                                             m
                                           })
                                           .collect();
    if config.debug.toa {
      for m in &toas {
        debug!("TOA {} {:.15} {:.4}us at {:.2} MHz", m.imjd, m.fmjd, m.toa_unc_us, m.freq);
      }
    }

    let process = NewProcess { rawfile_id: req.rawfile_id,
                               parfile_id,
                               template_id,
                               user_name: config.user_name.clone(),
                               manipulator: key.manipulator,
                               manipulator_args: canonical_args,
                               start_time,
                               end_time: Utc::now().naive_utc(),
                               status: "success".to_string() };
    let provenance = ToaProvenance { rawfile_id: req.rawfile_id, parfile_id, template_id, pulsar_id, obssystem_id };
    let (process_id, toa_ids) = catalog.record_toas(process, &version, provenance, toas, req.allow_conflicts)?;
    info!("rawfile {}: process {} recorded {} TOA(s)", req.rawfile_id, process_id, toa_ids.len());
    Ok(ToaOutcome { process_id, toa_ids })
  }

  fn scratch(&self) -> Result<tempfile::TempDir, ToasterError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("toaster-toas-");
    let dir = match &self.scratch_root {
      Some(root) => builder.tempdir_in(root),
      None => builder.tempdir(),
    };
    dir.map_err(|e| ToasterError::File(format!("cannot create scratch directory: {}", e)))
  }
}
