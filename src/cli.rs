// cli.rs
//
// Command-line surface of the pipeline. Every subcommand is a thin wrapper
// over toaster-workflow; argument problems surface as `BadInput`.
use clap::{ArgAction, Args, Parser, Subcommand};
use log::info;
use serde_json::Value as JsonValue;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use toaster_domain::{move_file, Catalog, DebugFlags, FileKind, NewObsSystem, NewTelescope, NewUser, ToaFilter,
                     ToasterConfig, ToasterError};
use toaster_persistence::DieselCatalog;
use toaster_providers::{SystemRunner, ToolRunner};
use toaster_workflow::ingest::collect_files;
use toaster_workflow::pipeline::DEFAULT_DIAGNOSTICS;
use toaster_workflow::toa_engine::DEFAULT_MANIPULATOR;
use toaster_workflow::{plugins, DiagnosticRuntime, Ingested, Ingestor, LoadOptions, ManipulatorRuntime, Pipeline,
                       PipelineOptions, TimEmitter, ToaEngine, ToaRequest, ToasterContext};

#[derive(Debug, Parser)]
#[command(name = "toaster", version, about = "Pulsar timing pipeline: from folded archives to tim files")]
#[command(disable_help_subcommand = true)]
#[command(propagate_version = true)]
pub struct Toaster {
  /// Increase log verbosity (-v debug, -vv trace).
  #[arg(short, long, action = ArgAction::Count, global = true)]
  verbose: u8,

  /// Debug categories to switch on (syscalls, gittest, manipulator, toa,
  /// all). Adds to TOASTER_DEBUG.
  #[arg(long, value_delimiter = ',', global = true)]
  debug: Vec<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Debug, Subcommand)]
#[command(arg_required_else_help = true)]
enum Command {
  /// Run a manipulator over one or more archives.
  Manipulate(ManipulateArgs),

  /// Compute a diagnostic for an archive.
  Diagnose {
    /// Diagnostic plugin name.
    name: String,
    archive: PathBuf,
    /// Also store the result against this rawfile.
    #[arg(long)]
    rawfile_id: Option<i64>,
  },

  /// Load raw archives into the database. Directories are expanded.
  #[command(alias = "load_rawfile")]
  LoadRawfile {
    #[arg(required = true)]
    files: Vec<PathBuf>,
  },

  /// Load ephemerides.
  #[command(alias = "load_ephem")]
  LoadEphem {
    #[command(flatten)]
    load: LoadArgs,
    #[arg(required = true)]
    parfiles: Vec<PathBuf>,
  },

  /// Load a standard profile.
  #[command(alias = "load_template")]
  LoadTemplate {
    #[command(flatten)]
    load: LoadArgs,
    #[arg(long)]
    pulsar: String,
    #[arg(long)]
    obssys: String,
    file: PathBuf,
  },

  /// Generate TOAs for a loaded rawfile.
  #[command(alias = "make_toas")]
  MakeToas {
    rawfile_id: i64,
    /// Use this parfile instead of the pulsar's master.
    #[arg(long)]
    parfile_id: Option<i64>,
    /// Use this template instead of the master one.
    #[arg(long)]
    template_id: Option<i64>,
    #[command(flatten)]
    toa: ToaArgs,
  },

  /// Load rawfiles, run diagnostics and generate TOAs.
  #[command(alias = "run_pipeline")]
  RunPipeline {
    /// Diagnostics to run on every file.
    #[arg(long = "diagnostic", default_values = DEFAULT_DIAGNOSTICS)]
    diagnostics: Vec<String>,
    #[command(flatten)]
    toa: ToaArgs,
    #[arg(required = true)]
    files: Vec<PathBuf>,
  },

  /// Write TOAs as a tempo2 tim file.
  #[command(alias = "create_tim")]
  CreateTim(CreateTimArgs),

  #[command(alias = "add_pulsar")]
  AddPulsar {
    name: String,
    #[arg(long = "alias")]
    aliases: Vec<String>,
  },

  /// Fold one pulsar into another. Aliases, files, TOAs and curators move
  /// to the destination.
  #[command(alias = "merge_pulsar")]
  MergePulsar {
    /// Name or alias of the pulsar that disappears.
    src: String,
    /// Name or alias of the pulsar that remains.
    dest: String,
  },

  #[command(alias = "add_telescope")]
  AddTelescope {
    #[arg(long)]
    name: String,
    #[arg(long)]
    abbrev: String,
    /// Observatory code written into tim files.
    #[arg(long)]
    code: String,
    /// ITRF coordinates in metres.
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true, required = true)]
    itrf: Vec<f64>,
    #[arg(long, allow_negative_numbers = true)]
    lat: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    lon: Option<f64>,
    #[arg(long)]
    datum: Option<String>,
  },

  #[command(alias = "add_obssys")]
  AddObssys {
    #[arg(long)]
    name: String,
    #[arg(long)]
    telescope_id: i64,
    #[arg(long)]
    frontend: String,
    #[arg(long)]
    backend: String,
    #[arg(long)]
    band: Option<String>,
    #[arg(long)]
    clock: Option<String>,
  },

  #[command(alias = "add_user")]
  AddUser {
    user_name: String,
    #[arg(long)]
    real_name: String,
    #[arg(long)]
    email: String,
    /// Make the user a curator of these pulsars.
    #[arg(long = "curator-of")]
    curator_of: Vec<String>,
  },

  /// Move a managed file, keeping its database row in step.
  #[command(alias = "move_file")]
  MoveFile {
    #[arg(value_parser = parse_file_kind)]
    kind: FileKind,
    id: i64,
    new_path: PathBuf,
  },

  /// List registered manipulators, diagnostics and TOA readers.
  Plugins,
}

#[derive(Debug, Args)]
struct ManipulateArgs {
  /// Manipulator plugin name.
  name: String,
  /// Plugin arguments as a JSON object.
  #[arg(long, default_value = "{}")]
  args: String,
  /// Output archive. Defaults to `<first input>.<manipulator>`.
  #[arg(short, long)]
  outfile: Option<PathBuf>,
  #[arg(required = true)]
  infiles: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct LoadArgs {
  /// Make the loaded file the master.
  #[arg(long)]
  master: bool,
  #[arg(long)]
  comments: Option<String>,
}

#[derive(Debug, Args)]
struct ToaArgs {
  #[arg(long, default_value = DEFAULT_MANIPULATOR)]
  manipulator: String,
  /// Manipulator arguments as a JSON object.
  #[arg(long = "manipulator-args", default_value = "{}")]
  manipulator_args: String,
  /// Record TOAs even when the same computation already produced some.
  #[arg(long)]
  allow_conflicts: bool,
}

#[derive(Debug, Args)]
struct CreateTimArgs {
  /// Pulsar name or alias.
  #[arg(long)]
  psr: Option<String>,
  /// Observatory codes to keep.
  #[arg(long = "obs", num_args = 1..)]
  obs: Vec<String>,
  #[arg(long, num_args = 2, value_names = ["LO", "HI"], allow_negative_numbers = true)]
  mjd: Option<Vec<f64>>,
  /// TOA uncertainty range in microseconds.
  #[arg(long, num_args = 2, value_names = ["LO", "HI"], allow_negative_numbers = true)]
  mjderr: Option<Vec<f64>>,
  /// Frequency range in MHz.
  #[arg(long, num_args = 2, value_names = ["LO", "HI"], allow_negative_numbers = true)]
  freq: Option<Vec<f64>>,
  #[arg(long = "toa-id", alias = "toa_id", num_args = 1.., allow_negative_numbers = true)]
  toa_ids: Vec<i64>,
  /// Write here instead of stdout.
  #[arg(long)]
  outfile: Option<PathBuf>,
  /// Store the tim file and its TOAs in the database.
  #[arg(long)]
  record: bool,
  #[arg(long)]
  comments: Option<String>,
}

fn parse_file_kind(s: &str) -> Result<FileKind, String> {
  match s {
    "rawfile" => Ok(FileKind::Rawfile),
    "parfile" => Ok(FileKind::Parfile),
    "template" => Ok(FileKind::Template),
    other => Err(format!("expected rawfile, parfile or template, got '{}'", other)),
  }
}

fn json_args(text: &str) -> Result<JsonValue, ToasterError> {
  let value: JsonValue = serde_json::from_str(text)?;
  if !value.is_object() {
    return Err(ToasterError::BadInput(format!("plugin arguments must be a JSON object, got {}", text)));
  }
  Ok(value)
}

fn range(what: &str, values: &Option<Vec<f64>>) -> Result<Option<(f64, f64)>, ToasterError> {
  match values.as_deref() {
    None => Ok(None),
    Some([lo, hi]) => Ok(Some((*lo, *hi))),
    Some(_) => Err(ToasterError::BadInput(format!("--{} takes exactly two values", what))),
  }
}

impl CreateTimArgs {
  fn filter(&self) -> Result<ToaFilter, ToasterError> {
    let mut filter = ToaFilter::new().observatories(self.obs.iter().cloned()).toa_ids(self.toa_ids.iter().copied());
    if let Some(psr) = &self.psr {
      filter = filter.pulsar(psr.clone());
    }
    if let Some((lo, hi)) = range("mjd", &self.mjd)? {
      filter = filter.mjd_range(lo, hi);
    }
    if let Some((lo, hi)) = range("mjderr", &self.mjderr)? {
      filter = filter.mjd_err_range(lo, hi);
    }
    if let Some((lo, hi)) = range("freq", &self.freq)? {
      filter = filter.freq_range(lo, hi);
    }
    Ok(filter)
  }
}

pub fn setup_logging(verbosity: u8) {
  let mut builder = env_logger::Builder::from_default_env();
  builder.target(env_logger::Target::Stderr);
  builder.format_target(false);
  builder.filter_level(match verbosity {
                         0 => log::LevelFilter::Info,
                         1 => log::LevelFilter::Debug,
                         _ => log::LevelFilter::Trace,
                       });
  // A logger installed earlier (tests) wins.
  builder.try_init().ok();
}

fn open_catalog(config: &ToasterConfig) -> Result<Arc<dyn Catalog>, ToasterError> {
  Ok(Arc::new(DieselCatalog::from_config(config)?))
}

fn resolve_pulsar(catalog: &dyn Catalog, name: &str) -> Result<i64, ToasterError> {
  catalog.pulsar_id(name)?
         .ok_or_else(|| ToasterError::UnrecognizedValue(format!("unknown pulsar name or alias '{}'", name)))
}

fn report_load(path: &std::path::Path, ingested: Ingested) {
  match ingested {
    Ingested::New(id) => println!("{}: loaded as id {}", path.display(), id),
    Ingested::Existing(id) => println!("{}: already loaded as id {}", path.display(), id),
  }
}

impl Toaster {
  pub fn verbosity(&self) -> u8 {
    self.verbose
  }

  pub fn run(self) -> Result<(), ToasterError> {
    let mut config = ToasterConfig::from_env()?;
    let mut debug: DebugFlags = config.debug;
    for category in &self.debug {
      debug = debug.with(category)?;
    }
    config = config.with_debug(debug);
    info!("toaster {} as {}", env!("CARGO_PKG_VERSION"), config.user_name);
    let config = Arc::new(config);
    let context = || -> Result<ToasterContext, ToasterError> {
      Ok(ToasterContext::with_system_runner(config.clone(), open_catalog(&config)?))
    };

    match self.command {
      Command::Manipulate(args) => {
        let manipulator = plugins::manipulator(&args.name)?;
        let plugin_args = json_args(&args.args)?;
        manipulator.canonical_args(&plugin_args)?;
        let first = args.infiles.first().cloned().unwrap_or_default();
        let outfile = args.outfile.unwrap_or_else(|| {
                                    let name = first.file_name().map(|n| n.to_string_lossy().into_owned())
                                                    .unwrap_or_default();
                                    first.with_file_name(format!("{}.{}", name, manipulator.name()))
                                  });
        let runner = SystemRunner::new(config.debug.syscalls);
        let written =
          ManipulatorRuntime::new(&runner, config.debug).run(manipulator.as_ref(), &args.infiles, &plugin_args,
                                                             &outfile)?;
        println!("{}", written.display());
      }
      Command::Diagnose { name, archive, rawfile_id } => {
        let diagnostic = plugins::diagnostic(&name)?;
        match rawfile_id {
          Some(id) => {
            let ctx = context()?;
            let stored = DiagnosticRuntime::new(ctx.runner()).run_for_rawfile(ctx.catalog(), diagnostic.as_ref(), id)?;
            println!("{}: {}", name, stored.diagnostic.value);
          }
          None => {
            let runner = SystemRunner::new(config.debug.syscalls);
            let value = DiagnosticRuntime::new(&runner as &dyn ToolRunner).compute(diagnostic.as_ref(), &archive)?;
            println!("{}: {}", name, value);
          }
        }
      }
      Command::LoadRawfile { files } => {
        let ctx = context()?;
        let ingest = Ingestor::new(&ctx);
        for file in collect_files(&files)? {
          report_load(&file, ingest.add_rawfile(&file)?);
        }
      }
      Command::LoadEphem { load, parfiles } => {
        let ctx = context()?;
        let ingest = Ingestor::new(&ctx);
        let opts = LoadOptions { comments: load.comments, master: load.master };
        for file in collect_files(&parfiles)? {
          report_load(&file, ingest.add_parfile(&file, &opts)?);
        }
      }
      Command::LoadTemplate { load, pulsar, obssys, file } => {
        let ctx = context()?;
        let opts = LoadOptions { comments: load.comments, master: load.master };
        report_load(&file, Ingestor::new(&ctx).add_template(&file, &pulsar, &obssys, &opts)?);
      }
      Command::MakeToas { rawfile_id, parfile_id, template_id, toa } => {
        let mut request = ToaRequest::new(rawfile_id).manipulator(toa.manipulator, json_args(&toa.manipulator_args)?)
                                                     .allow_conflicts(toa.allow_conflicts);
        if let Some(id) = parfile_id {
          request = request.parfile(id);
        }
        if let Some(id) = template_id {
          request = request.template(id);
        }
        let ctx = context()?;
        let outcome = ToaEngine::new(&ctx).run(&request)?;
        println!("process {}: {} TOA(s)", outcome.process_id, outcome.toa_ids.len());
      }
      Command::RunPipeline { diagnostics, toa, files } => {
        let options = PipelineOptions { diagnostics,
                                        manipulator: toa.manipulator,
                                        manipulator_args: json_args(&toa.manipulator_args)?,
                                        allow_conflicts: toa.allow_conflicts };
        let ctx = context()?;
        let files = collect_files(&files)?;
        let report = Pipeline::new(&ctx, options).run(&files)?;
        for file in &report.files {
          match &file.result {
            Ok(done) => println!("{}: rawfile {}, {} TOA(s)", file.path.display(), done.ingested.id(),
                                 done.toas.toa_ids.len()),
            Err(e) => println!("{}: failed ({})", file.path.display(), e.kind()),
          }
        }
        if !report.all_succeeded() {
          return Err(ToasterError::Toaster(format!("{} of {} file(s) failed", report.failures(), report.files.len())));
        }
      }
      Command::CreateTim(args) => {
        let filter = args.filter()?;
        filter.validate()?;
        if args.record && filter.pulsar_name.is_none() {
          return Err(ToasterError::BadInput("--record requires --psr".to_string()));
        }
        let ctx = context()?;
        let emitter = TimEmitter::new(&ctx);
        let toas = match &args.outfile {
          Some(path) => emitter.emit_to_path(&filter, path)?,
          None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            let toas = emitter.emit(&filter, &mut lock)?;
            lock.flush()?;
            toas
          }
        };
        if args.record {
          let id = emitter.record(&filter, &toas, args.comments)?;
          info!("timfile recorded as id {}", id);
        }
      }
      Command::AddPulsar { name, aliases } => {
        let catalog = open_catalog(&config)?;
        let id = catalog.add_pulsar(&name, &aliases)?;
        println!("{}: id {}", name, id);
      }
      Command::MergePulsar { src, dest } => {
        let catalog = open_catalog(&config)?;
        let src_id = resolve_pulsar(catalog.as_ref(), &src)?;
        let dest_id = resolve_pulsar(catalog.as_ref(), &dest)?;
        catalog.merge_pulsar(src_id, dest_id)?;
        println!("merged pulsar {} into {}", src_id, dest_id);
      }
      Command::AddTelescope { name, abbrev, code, itrf, lat, lon, datum } => {
        let [x, y, z] = itrf.as_slice() else {
          return Err(ToasterError::BadInput("--itrf takes exactly three values".to_string()));
        };
        let catalog = open_catalog(&config)?;
        let id = catalog.add_telescope(NewTelescope { name: name.clone(),
                                                      abbrev,
                                                      code,
                                                      itrf_x: *x,
                                                      itrf_y: *y,
                                                      itrf_z: *z,
                                                      latitude: lat,
                                                      longitude: lon,
                                                      datum })?;
        println!("{}: id {}", name, id);
      }
      Command::AddObssys { name, telescope_id, frontend, backend, band, clock } => {
        let catalog = open_catalog(&config)?;
        let id = catalog.add_obssystem(NewObsSystem { name: name.clone(),
                                                      telescope_id,
                                                      frontend,
                                                      backend,
                                                      band_descriptor: band,
                                                      clock })?;
        println!("{}: id {}", name, id);
      }
      Command::AddUser { user_name, real_name, email, curator_of } => {
        let catalog = open_catalog(&config)?;
        let pulsars = curator_of.iter()
                                .map(|p| resolve_pulsar(catalog.as_ref(), p))
                                .collect::<Result<Vec<_>, _>>()?;
        let id = catalog.add_user(NewUser { user_name: user_name.clone(), real_name, email })?;
        for pulsar_id in pulsars {
          catalog.add_curator(pulsar_id, id)?;
        }
        println!("{}: id {}", user_name, id);
      }
      Command::MoveFile { kind, id, new_path } => {
        let catalog = open_catalog(&config)?;
        move_file(catalog.as_ref(), kind, id, &new_path)?;
        println!("{} {} -> {}", kind, id, new_path.display());
      }
      Command::Plugins => print_plugins(),
    }
    Ok(())
  }
}

fn print_plugins() {
  println!("Manipulators:");
  for m in plugins::manipulators() {
    println!("  {:<12} {}", m.name(), m.description());
    for arg in m.arguments() {
      println!("      {:<10} {}", arg.name, arg.help);
    }
  }
  println!("Diagnostics:");
  for d in plugins::diagnostics() {
    println!("  {:<12} {} ({})", d.name(), d.description(), d.kind().as_str());
  }
  println!("TOA readers:");
  for r in plugins::toa_readers() {
    println!("  {:<12} {}", r.name(), r.description());
  }
}
