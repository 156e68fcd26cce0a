// ingest.rs
//
// Loading rawfiles, parfiles and templates into the content store and the
// catalog. Every loader is idempotent by md5: a file whose checksum is
// already catalogued is neither copied nor inserted again.
use crate::context::ToasterContext;
use chrono::Utc;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use toaster_domain::parfile::read_parfile;
use toaster_domain::{md5_file, NewParfile, NewRawfile, NewTemplate, StoredPath, ToasterError,
                     ToasterWarning};
use toaster_providers::psrchive::read_header;

/// Outcome of loading one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
  New(i64),
  /// Same content was already catalogued under this id.
  Existing(i64),
}

impl Ingested {
  pub fn id(self) -> i64 {
    match self {
      Ingested::New(id) | Ingested::Existing(id) => id,
    }
  }
}

/// Optional attributes of a parfile or template load.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
  pub comments: Option<String>,
  /// Make the loaded file the master for its pulsar (and obssystem).
  pub master: bool,
}

pub struct Ingestor<'a> {
  ctx: &'a ToasterContext,
}

impl<'a> Ingestor<'a> {
  pub fn new(ctx: &'a ToasterContext) -> Self {
    Self { ctx }
  }

  fn duplicate(path: &Path, existing_id: i64) -> Ingested {
    ToasterWarning::DuplicateFile { path: path.display().to_string(), existing_id }.emit();
    Ingested::Existing(existing_id)
  }

  fn resolve_pulsar(&self, name: &str) -> Result<(i64, String), ToasterError> {
    let catalog = self.ctx.catalog();
    let id = catalog.pulsar_id(name)?
                    .ok_or_else(|| ToasterError::UnrecognizedValue(format!("unknown pulsar name or alias '{}'", name)))?;
    let pulsar = catalog.get_pulsar(id)?
                        .ok_or_else(|| ToasterError::InconsistentDatabase(format!("alias {} points at no pulsar", name)))?;
    Ok((id, pulsar.name))
  }

  /// Copies (or moves, with `move_ingested`) `src` into `dir`, runs `insert`
  /// and undoes the placement when the insert fails.
  fn place_and_insert<F>(&self, src: &Path, dir: &Path, insert: F) -> Result<Ingested, ToasterError>
    where F: FnOnce(StoredPath) -> Result<i64, ToasterError>
  {
    let moving = self.ctx.config.move_ingested;
    let dest = self.ctx.store().place(src, dir, moving)?;
    match insert(StoredPath::from_path(&dest)) {
      Ok(id) => {
        info!("loaded {} as id {} at {}", src.display(), id, dest.display());
        Ok(Ingested::New(id))
      }
      Err(e) => {
        let undo = if moving {
          self.ctx.store().place_at(&dest, src, true).map(|_| ())
        } else {
          fs::remove_file(&dest).map_err(ToasterError::from)
        };
        if let Err(u) = undo {
          warn!("could not undo placement of {}: {}", dest.display(), u);
        }
        Err(e)
      }
    }
  }

  /// Loads a raw archive. Its pulsar and observing system must already be
  /// known.
  pub fn add_rawfile(&self, path: &Path) -> Result<Ingested, ToasterError> {
    let catalog = self.ctx.catalog();
    let md5 = md5_file(path)?;
    if let Some(existing) = catalog.rawfile_by_md5(&md5)? {
      return Ok(Self::duplicate(path, existing));
    }
    let header = read_header(self.ctx.runner(), path)?;
    let (pulsar_id, pulsar_name) = self.resolve_pulsar(&header.source)?;
    let system = catalog.find_obssystem(&header.telescope, &header.frontend, &header.backend)?
                        .ok_or_else(|| {
                          ToasterError::UnrecognizedValue(format!("no observing system for telescope {}, frontend {}, \
                                                                   backend {}",
                                                                  header.telescope, header.frontend, header.backend))
                        })?;
    let filesize = fs::metadata(path)?.len() as i64;
    let dir = self.ctx.store().destination_dir(&pulsar_name, system.name());
    self.place_and_insert(path, &dir, |location| {
          catalog.insert_rawfile(NewRawfile { location,
                                              md5,
                                              pulsar_id,
                                              obssystem_id: system.id,
                                              add_time: Utc::now().naive_utc(),
                                              filesize,
                                              header })
        })
  }

  /// Loads an ephemeris. An unknown pulsar gets a stub entry.
  pub fn add_parfile(&self, path: &Path, opts: &LoadOptions) -> Result<Ingested, ToasterError> {
    let catalog = self.ctx.catalog();
    let md5 = md5_file(path)?;
    if let Some(existing) = catalog.parfile_by_md5(&md5)? {
      let ingested = Self::duplicate(path, existing);
      if opts.master {
        let parfile = catalog.get_parfile(existing)?
                             .ok_or_else(|| ToasterError::InconsistentDatabase(format!("parfile {} vanished", existing)))?;
        catalog.set_master_parfile(parfile.parfile.pulsar_id, existing)?;
      }
      return Ok(ingested);
    }
    let parsed = read_parfile(path)?;
    for key in parsed.extra_params.keys() {
      ToasterWarning::UnknownParfileKey { file: path.display().to_string(), key: key.clone() }.emit();
    }
    let name = parsed.pulsar_name()
                     .ok_or_else(|| ToasterError::BadInput(format!("{} has no PSRJ/PSR line", path.display())))?
                     .to_string();
    let (pulsar_id, canonical) = match catalog.pulsar_id(&name)? {
      Some(_) => self.resolve_pulsar(&name)?,
      None => {
        let id = catalog.add_pulsar(&name, &[])?;
        ToasterWarning::StubPulsarCreated { name: name.clone() }.emit();
        (id, name.clone())
      }
    };
    let dir = self.ctx.store().root().join("parfiles").join(&canonical);
    let ingested = self.place_and_insert(path, &dir, |location| {
                         catalog.insert_parfile(NewParfile { location,
                                                             md5,
                                                             pulsar_id,
                                                             add_time: Utc::now().naive_utc(),
                                                             comments: opts.comments.clone(),
                                                             params: parsed.params,
                                                             extra_params: parsed.extra_params })
                       })?;
    if opts.master {
      catalog.set_master_parfile(pulsar_id, ingested.id())?;
    }
    Ok(ingested)
  }

  /// Loads a template for a known pulsar and observing system.
  pub fn add_template(&self, path: &Path, pulsar: &str, obssys: &str, opts: &LoadOptions)
                      -> Result<Ingested, ToasterError> {
    let catalog = self.ctx.catalog();
    let (pulsar_id, canonical) = self.resolve_pulsar(pulsar)?;
    let system = catalog.obssystem_by_name(obssys)?
                        .ok_or_else(|| ToasterError::UnrecognizedValue(format!("unknown observing system '{}'", obssys)))?;
    let md5 = md5_file(path)?;
    let ingested = match catalog.template_by_md5(&md5)? {
      Some(existing) => Self::duplicate(path, existing),
      None => {
        let dir = self.ctx.store().destination_dir(&canonical, system.name()).join("templates");
        self.place_and_insert(path, &dir, |location| {
              catalog.insert_template(NewTemplate { location,
                                                    md5,
                                                    pulsar_id,
                                                    obssystem_id: system.id,
                                                    add_time: Utc::now().naive_utc(),
                                                    comments: opts.comments.clone() })
            })?
      }
    };
    if opts.master {
      catalog.set_master_template(pulsar_id, system.id, ingested.id())?;
    }
    Ok(ingested)
  }
}

/// Expands the arguments of a load command into files.
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, ToasterError> {
  let mut out = Vec::new();
  for p in paths {
    if p.is_dir() {
      let mut entries: Vec<PathBuf> = fs::read_dir(p)?.filter_map(|e| e.ok().map(|e| e.path()))
                                                      .filter(|p| p.is_file())
                                                      .collect();
      entries.sort();
      out.extend(entries);
    } else if p.is_file() {
      out.push(p.clone());
    } else {
      return Err(ToasterError::File(format!("{} does not exist", p.display())));
    }
  }
  Ok(out)
}
