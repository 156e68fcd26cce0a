use crate::catalog::{sort_tim_toas, Catalog, RelocateOp, ToaFilter};
use crate::errors::ToasterError;
use crate::models::*;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
  sequences: HashMap<&'static str, i64>,
  pulsars: BTreeMap<i64, Pulsar>,
  /// (alias, pulsar_id)
  aliases: Vec<(String, i64)>,
  telescopes: BTreeMap<i64, Telescope>,
  obssystems: BTreeMap<i64, ObsSystem>,
  parfiles: BTreeMap<i64, Parfile>,
  templates: BTreeMap<i64, Template>,
  rawfiles: BTreeMap<i64, Rawfile>,
  /// (pulsar_id, obssystem_id) -> template_id
  master_templates: BTreeMap<(i64, i64), i64>,
  versions: BTreeMap<i64, VersionStamp>,
  processes: BTreeMap<i64, Process>,
  toas: BTreeMap<i64, Toa>,
  diagnostics: BTreeMap<i64, Diagnostic>,
  users: BTreeMap<i64, NewUser>,
  /// (pulsar_id, user_id)
  curators: Vec<(i64, i64)>,
  opinions: Vec<Opinion>,
  timfiles: BTreeMap<i64, Timfile>,
}

impl State {
  fn next_id(&mut self, table: &'static str) -> i64 {
    let seq = self.sequences.entry(table).or_insert(0);
    *seq += 1;
    *seq
  }

  fn version_id_for(&mut self, stamp: &VersionStamp) -> i64 {
    if let Some((id, _)) = self.versions.iter().find(|(_, v)| *v == stamp) {
      return *id;
    }
    let id = self.next_id("versions");
    self.versions.insert(id, stamp.clone());
    id
  }

  fn require_pulsar(&self, id: i64) -> Result<&Pulsar, ToasterError> {
    self.pulsars.get(&id).ok_or_else(|| ToasterError::UnrecognizedValue(format!("no pulsar with id {}", id)))
  }

  fn alias_owner(&self, alias: &str) -> Option<i64> {
    self.aliases.iter().find(|(a, _)| a == alias).map(|(_, p)| *p)
  }

  fn location_mut(&mut self, kind: FileKind, id: i64) -> Option<&mut StoredPath> {
    match kind {
      FileKind::Rawfile => self.rawfiles.get_mut(&id).map(|r| &mut r.rawfile.location),
      FileKind::Parfile => self.parfiles.get_mut(&id).map(|p| &mut p.parfile.location),
      FileKind::Template => self.templates.get_mut(&id).map(|t| &mut t.template.location),
    }
  }

  fn tim_toa(&self, toa: &Toa) -> Result<TimToa, ToasterError> {
    let missing = |what: &str, id: i64| {
      ToasterError::InconsistentDatabase(format!("TOA {} references missing {} {}", toa.id, what, id))
    };
    let prov = &toa.provenance;
    let pulsar = self.pulsars.get(&prov.pulsar_id).ok_or_else(|| missing("pulsar", prov.pulsar_id))?;
    let rawfile = self.rawfiles.get(&prov.rawfile_id).ok_or_else(|| missing("rawfile", prov.rawfile_id))?;
    let system = self.obssystems.get(&prov.obssystem_id).ok_or_else(|| missing("obssystem", prov.obssystem_id))?;
    let telescope = self.telescopes
                        .get(&system.system.telescope_id)
                        .ok_or_else(|| missing("telescope", system.system.telescope_id))?;
    let m = &toa.measurement;
    Ok(TimToa { toa_id: toa.id,
                pulsar_name: pulsar.name.clone(),
                rawfile_name: rawfile.rawfile.location.filename.clone(),
                obscode: telescope.telescope.code.clone(),
                freq: m.freq,
                imjd: m.imjd,
                fmjd: m.fmjd,
                toa_unc_us: m.toa_unc_us })
  }

  fn has_toas_for(&self, key: &ProcessKey) -> bool {
    self.processes
        .values()
        .filter(|p| p.process.key() == *key)
        .any(|p| self.toas.values().any(|t| t.process_id == p.id))
  }
}

/// [`Catalog`] kept in process memory. A single mutex guards the whole
/// state, so each call is atomic with respect to the others.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
  state: Mutex<State>,
}

impl InMemoryCatalog {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, State>, ToasterError> {
    self.state.lock().map_err(|e| ToasterError::Database(format!("catalog mutex poisoned: {}", e)))
  }
}

impl Catalog for InMemoryCatalog {
  fn add_pulsar(&self, name: &str, aliases: &[String]) -> Result<i64, ToasterError> {
    let mut st = self.lock()?;
    let mut all: Vec<String> = vec![name.to_string()];
    for a in aliases {
      if !all.contains(a) {
        all.push(a.clone());
      }
    }
    if let Some(taken) = all.iter().find(|a| st.alias_owner(a).is_some()) {
      return Err(ToasterError::BadInput(format!("pulsar name or alias '{}' is already in use", taken)));
    }
    let id = st.next_id("pulsars");
    st.pulsars.insert(id, Pulsar { id, name: name.to_string(), master_parfile_id: None });
    st.aliases.extend(all.into_iter().map(|a| (a, id)));
    Ok(id)
  }

  fn get_pulsar(&self, id: i64) -> Result<Option<Pulsar>, ToasterError> {
    Ok(self.lock()?.pulsars.get(&id).cloned())
  }

  fn pulsar_id(&self, name_or_alias: &str) -> Result<Option<i64>, ToasterError> {
    let st = self.lock()?;
    let mut ids: Vec<i64> = st.pulsars.values().filter(|p| p.name == name_or_alias).map(|p| p.id).collect();
    ids.extend(st.aliases.iter().filter(|(a, _)| a == name_or_alias).map(|(_, p)| *p));
    ids.sort_unstable();
    ids.dedup();
    match ids.as_slice() {
      [] => Ok(None),
      [id] => Ok(Some(*id)),
      many => Err(ToasterError::InconsistentDatabase(format!("'{}' matches {} pulsars", name_or_alias, many.len()))),
    }
  }

  fn aliases(&self, pulsar_id: i64) -> Result<Vec<String>, ToasterError> {
    let st = self.lock()?;
    Ok(st.aliases.iter().filter(|(_, p)| *p == pulsar_id).map(|(a, _)| a.clone()).collect())
  }

  fn merge_pulsar(&self, src: i64, dest: i64) -> Result<(), ToasterError> {
    if src == dest {
      return Err(ToasterError::BadInput(format!("cannot merge pulsar {} into itself", src)));
    }
    let mut st = self.lock()?;
    let src_master = st.require_pulsar(src)?.master_parfile_id;
    st.require_pulsar(dest)?;

    for (_, owner) in st.aliases.iter_mut().filter(|(_, p)| *p == src) {
      *owner = dest;
    }
    for t in st.timfiles.values_mut().filter(|t| t.timfile.pulsar_id == src) {
      t.timfile.pulsar_id = dest;
    }
    for r in st.rawfiles.values_mut().filter(|r| r.rawfile.pulsar_id == src) {
      r.rawfile.pulsar_id = dest;
    }
    for t in st.templates.values_mut().filter(|t| t.template.pulsar_id == src) {
      t.template.pulsar_id = dest;
    }
    for p in st.parfiles.values_mut().filter(|p| p.parfile.pulsar_id == src) {
      p.parfile.pulsar_id = dest;
    }
    for t in st.toas.values_mut().filter(|t| t.provenance.pulsar_id == src) {
      t.provenance.pulsar_id = dest;
    }
    // Existing designations of the destination win.
    let moved: Vec<((i64, i64), i64)> =
      st.master_templates.iter().filter(|((p, _), _)| *p == src).map(|(k, v)| (*k, *v)).collect();
    for ((_, obs), template) in moved {
      st.master_templates.remove(&(src, obs));
      st.master_templates.entry((dest, obs)).or_insert(template);
    }
    if let Some(dest_row) = st.pulsars.get_mut(&dest) {
      if dest_row.master_parfile_id.is_none() {
        dest_row.master_parfile_id = src_master;
      }
    }
    let mut curators: Vec<(i64, i64)> =
      st.curators.iter().map(|(p, u)| if *p == src { (dest, *u) } else { (*p, *u) }).collect();
    let mut seen = Vec::new();
    curators.retain(|c| {
              if seen.contains(c) {
                false
              } else {
                seen.push(*c);
                true
              }
            });
    st.curators = curators;
    st.pulsars.remove(&src);
    Ok(())
  }

  fn add_telescope(&self, telescope: NewTelescope) -> Result<i64, ToasterError> {
    let mut st = self.lock()?;
    if st.telescopes.values().any(|t| t.telescope.name.eq_ignore_ascii_case(&telescope.name)) {
      return Err(ToasterError::BadInput(format!("telescope '{}' already exists", telescope.name)));
    }
    let id = st.next_id("telescopes");
    st.telescopes.insert(id, Telescope { id, telescope });
    Ok(id)
  }

  fn get_telescope(&self, id: i64) -> Result<Option<Telescope>, ToasterError> {
    Ok(self.lock()?.telescopes.get(&id).cloned())
  }

  fn add_obssystem(&self, system: NewObsSystem) -> Result<i64, ToasterError> {
    let mut st = self.lock()?;
    if !st.telescopes.contains_key(&system.telescope_id) {
      return Err(ToasterError::UnrecognizedValue(format!("no telescope with id {}", system.telescope_id)));
    }
    let clash = st.obssystems.values().any(|o| {
                                        o.system.name.eq_ignore_ascii_case(&system.name)
                                        || (o.system.telescope_id == system.telescope_id
                                            && o.system.frontend.eq_ignore_ascii_case(&system.frontend)
                                            && o.system.backend.eq_ignore_ascii_case(&system.backend))
                                      });
    if clash {
      return Err(ToasterError::BadInput(format!("observing system '{}' already exists", system.name)));
    }
    let id = st.next_id("obssystems");
    st.obssystems.insert(id, ObsSystem { id, system });
    Ok(id)
  }

  fn get_obssystem(&self, id: i64) -> Result<Option<ObsSystem>, ToasterError> {
    Ok(self.lock()?.obssystems.get(&id).cloned())
  }

  fn obssystem_by_name(&self, name: &str) -> Result<Option<ObsSystem>, ToasterError> {
    Ok(self.lock()?.obssystems.values().find(|o| o.system.name.eq_ignore_ascii_case(name)).cloned())
  }

  fn find_obssystem(&self, telescope: &str, frontend: &str, backend: &str)
                    -> Result<Option<ObsSystem>, ToasterError> {
    let st = self.lock()?;
    let scopes: Vec<i64> = st.telescopes
                             .values()
                             .filter(|t| {
                               let t = &t.telescope;
                               t.name.eq_ignore_ascii_case(telescope)
                               || t.abbrev.eq_ignore_ascii_case(telescope)
                               || t.code.eq_ignore_ascii_case(telescope)
                             })
                             .map(|t| t.id)
                             .collect();
    let found: Vec<&ObsSystem> = st.obssystems
                                   .values()
                                   .filter(|o| {
                                     scopes.contains(&o.system.telescope_id)
                                     && o.system.frontend.eq_ignore_ascii_case(frontend)
                                     && o.system.backend.eq_ignore_ascii_case(backend)
                                   })
                                   .collect();
    match found.as_slice() {
      [] => Ok(None),
      [one] => Ok(Some((*one).clone())),
      _ => Err(ToasterError::InconsistentDatabase(format!("several observing systems match ({}, {}, {})",
                                                          telescope, frontend, backend))),
    }
  }

  fn parfile_by_md5(&self, md5: &str) -> Result<Option<i64>, ToasterError> {
    Ok(self.lock()?.parfiles.values().find(|p| p.parfile.md5 == md5).map(|p| p.id))
  }

  fn insert_parfile(&self, parfile: NewParfile) -> Result<i64, ToasterError> {
    let mut st = self.lock()?;
    st.require_pulsar(parfile.pulsar_id)?;
    if st.parfiles.values().any(|p| p.parfile.md5 == parfile.md5) {
      return Err(ToasterError::Database(format!("duplicate parfile md5 {}", parfile.md5)));
    }
    let id = st.next_id("parfiles");
    st.parfiles.insert(id, Parfile { id, parfile });
    Ok(id)
  }

  fn get_parfile(&self, id: i64) -> Result<Option<Parfile>, ToasterError> {
    Ok(self.lock()?.parfiles.get(&id).cloned())
  }

  fn parfiles_for_pulsar(&self, pulsar_id: i64) -> Result<Vec<Parfile>, ToasterError> {
    Ok(self.lock()?.parfiles.values().filter(|p| p.parfile.pulsar_id == pulsar_id).cloned().collect())
  }

  fn delete_parfile(&self, id: i64) -> Result<(), ToasterError> {
    let mut st = self.lock()?;
    if !st.parfiles.contains_key(&id) {
      return Err(ToasterError::UnrecognizedValue(format!("no parfile with id {}", id)));
    }
    let referenced = st.processes.values().any(|p| p.process.parfile_id == id)
                     || st.toas.values().any(|t| t.provenance.parfile_id == id);
    if referenced {
      return Err(ToasterError::BadInput(format!("parfile {} is referenced by processes or TOAs", id)));
    }
    for p in st.pulsars.values_mut().filter(|p| p.master_parfile_id == Some(id)) {
      p.master_parfile_id = None;
    }
    st.parfiles.remove(&id);
    Ok(())
  }

  fn template_by_md5(&self, md5: &str) -> Result<Option<i64>, ToasterError> {
    Ok(self.lock()?.templates.values().find(|t| t.template.md5 == md5).map(|t| t.id))
  }

  fn insert_template(&self, template: NewTemplate) -> Result<i64, ToasterError> {
    let mut st = self.lock()?;
    st.require_pulsar(template.pulsar_id)?;
    if st.templates.values().any(|t| t.template.md5 == template.md5) {
      return Err(ToasterError::Database(format!("duplicate template md5 {}", template.md5)));
    }
    let id = st.next_id("templates");
    st.templates.insert(id, Template { id, template });
    Ok(id)
  }

  fn get_template(&self, id: i64) -> Result<Option<Template>, ToasterError> {
    Ok(self.lock()?.templates.get(&id).cloned())
  }

  fn templates_for_pulsar(&self, pulsar_id: i64) -> Result<Vec<Template>, ToasterError> {
    Ok(self.lock()?.templates.values().filter(|t| t.template.pulsar_id == pulsar_id).cloned().collect())
  }

  fn delete_template(&self, id: i64) -> Result<(), ToasterError> {
    let mut st = self.lock()?;
    if !st.templates.contains_key(&id) {
      return Err(ToasterError::UnrecognizedValue(format!("no template with id {}", id)));
    }
    let referenced = st.processes.values().any(|p| p.process.template_id == id)
                     || st.toas.values().any(|t| t.provenance.template_id == id);
    if referenced {
      return Err(ToasterError::BadInput(format!("template {} is referenced by processes or TOAs", id)));
    }
    st.master_templates.retain(|_, t| *t != id);
    st.templates.remove(&id);
    Ok(())
  }

  fn rawfile_by_md5(&self, md5: &str) -> Result<Option<i64>, ToasterError> {
    Ok(self.lock()?.rawfiles.values().find(|r| r.rawfile.md5 == md5).map(|r| r.id))
  }

  fn insert_rawfile(&self, rawfile: NewRawfile) -> Result<i64, ToasterError> {
    let mut st = self.lock()?;
    st.require_pulsar(rawfile.pulsar_id)?;
    if st.rawfiles.values().any(|r| r.rawfile.md5 == rawfile.md5) {
      return Err(ToasterError::Database(format!("duplicate rawfile md5 {}", rawfile.md5)));
    }
    let id = st.next_id("rawfiles");
    st.rawfiles.insert(id, Rawfile { id, rawfile });
    Ok(id)
  }

  fn get_rawfile(&self, id: i64) -> Result<Option<Rawfile>, ToasterError> {
    Ok(self.lock()?.rawfiles.get(&id).cloned())
  }

  fn rawfiles_for_pulsar(&self, pulsar_id: i64) -> Result<Vec<Rawfile>, ToasterError> {
    Ok(self.lock()?.rawfiles.values().filter(|r| r.rawfile.pulsar_id == pulsar_id).cloned().collect())
  }

  fn relocate_file(&self, kind: FileKind, id: i64, new_path: &Path, op: RelocateOp<'_>)
                   -> Result<PathBuf, ToasterError> {
    let mut st = self.lock()?;
    let location =
      st.location_mut(kind, id).ok_or_else(|| ToasterError::UnrecognizedValue(format!("no {} with id {}", kind, id)))?;
    let old = location.path();
    op(&old)?;
    *location = StoredPath::from_path(new_path);
    Ok(old)
  }

  fn set_master_parfile(&self, pulsar_id: i64, parfile_id: i64) -> Result<(), ToasterError> {
    let mut st = self.lock()?;
    let owner = st.parfiles
                  .get(&parfile_id)
                  .map(|p| p.parfile.pulsar_id)
                  .ok_or_else(|| ToasterError::UnrecognizedValue(format!("no parfile with id {}", parfile_id)))?;
    if owner != pulsar_id {
      return Err(ToasterError::BadInput(format!("parfile {} belongs to pulsar {}, not {}", parfile_id, owner, pulsar_id)));
    }
    let pulsar = st.pulsars
                   .get_mut(&pulsar_id)
                   .ok_or_else(|| ToasterError::UnrecognizedValue(format!("no pulsar with id {}", pulsar_id)))?;
    pulsar.master_parfile_id = Some(parfile_id);
    Ok(())
  }

  fn master_parfile(&self, pulsar_id: i64) -> Result<Option<i64>, ToasterError> {
    Ok(self.lock()?.pulsars.get(&pulsar_id).and_then(|p| p.master_parfile_id))
  }

  fn set_master_template(&self, pulsar_id: i64, obssystem_id: i64, template_id: i64) -> Result<(), ToasterError> {
    let mut st = self.lock()?;
    st.require_pulsar(pulsar_id)?;
    let template = st.templates
                     .get(&template_id)
                     .ok_or_else(|| ToasterError::UnrecognizedValue(format!("no template with id {}", template_id)))?;
    if template.template.pulsar_id != pulsar_id || template.template.obssystem_id != obssystem_id {
      return Err(ToasterError::BadInput(format!("template {} is not for pulsar {} and obssystem {}",
                                                template_id, pulsar_id, obssystem_id)));
    }
    st.master_templates.insert((pulsar_id, obssystem_id), template_id);
    Ok(())
  }

  fn master_template(&self, pulsar_id: i64, obssystem_id: i64) -> Result<Option<i64>, ToasterError> {
    Ok(self.lock()?.master_templates.get(&(pulsar_id, obssystem_id)).copied())
  }

  fn version_id(&self, stamp: &VersionStamp) -> Result<i64, ToasterError> {
    Ok(self.lock()?.version_id_for(stamp))
  }

  fn get_version(&self, id: i64) -> Result<Option<VersionStamp>, ToasterError> {
    Ok(self.lock()?.versions.get(&id).cloned())
  }

  fn toas_exist_for(&self, key: &ProcessKey) -> Result<bool, ToasterError> {
    Ok(self.lock()?.has_toas_for(key))
  }

  fn record_toas(&self, process: NewProcess, version: &VersionStamp, provenance: ToaProvenance,
                 toas: Vec<ToaMeasurement>, allow_conflicts: bool)
                 -> Result<(i64, Vec<i64>), ToasterError> {
    let mut st = self.lock()?;
    if !st.rawfiles.contains_key(&process.rawfile_id)
       || !st.parfiles.contains_key(&process.parfile_id)
       || !st.templates.contains_key(&process.template_id)
    {
      return Err(ToasterError::Database("process references a missing rawfile, parfile or template".into()));
    }
    if !allow_conflicts && st.has_toas_for(&process.key()) {
      return Err(ToasterError::ConflictingToas(format!("TOAs already exist for rawfile {} with parfile {}, template {} \
                                                        and manipulator {} {}",
                                                       process.rawfile_id,
                                                       process.parfile_id,
                                                       process.template_id,
                                                       process.manipulator,
                                                       process.manipulator_args)));
    }
    let version_id = st.version_id_for(version);
    let process_id = st.next_id("processes");
    st.processes.insert(process_id, Process { id: process_id, version_id, process });
    let mut ids = Vec::with_capacity(toas.len());
    for measurement in toas {
      let id = st.next_id("toas");
      st.toas.insert(id, Toa { id, process_id, provenance, measurement });
      ids.push(id);
    }
    Ok((process_id, ids))
  }

  fn processes_for_rawfile(&self, rawfile_id: i64) -> Result<Vec<Process>, ToasterError> {
    Ok(self.lock()?.processes.values().filter(|p| p.process.rawfile_id == rawfile_id).cloned().collect())
  }

  fn get_toa(&self, id: i64) -> Result<Option<Toa>, ToasterError> {
    Ok(self.lock()?.toas.get(&id).cloned())
  }

  fn toas_for_process(&self, process_id: i64) -> Result<Vec<Toa>, ToasterError> {
    Ok(self.lock()?.toas.values().filter(|t| t.process_id == process_id).cloned().collect())
  }

  fn select_toas(&self, filter: &ToaFilter) -> Result<Vec<TimToa>, ToasterError> {
    let st = self.lock()?;
    let mut out = Vec::new();
    for toa in st.toas.values() {
      let row = st.tim_toa(toa)?;
      if filter.matches(&row) {
        out.push(row);
      }
    }
    sort_tim_toas(&mut out);
    Ok(out)
  }

  fn replace_diagnostic(&self, diagnostic: NewDiagnostic) -> Result<i64, ToasterError> {
    let mut st = self.lock()?;
    if !st.rawfiles.contains_key(&diagnostic.rawfile_id) {
      return Err(ToasterError::UnrecognizedValue(format!("no rawfile with id {}", diagnostic.rawfile_id)));
    }
    st.diagnostics
      .retain(|_, d| !(d.diagnostic.rawfile_id == diagnostic.rawfile_id && d.diagnostic.plugin == diagnostic.plugin));
    let id = st.next_id("diagnostics");
    st.diagnostics.insert(id, Diagnostic { id, diagnostic });
    Ok(id)
  }

  fn diagnostics_for_rawfile(&self, rawfile_id: i64) -> Result<Vec<Diagnostic>, ToasterError> {
    Ok(self.lock()?.diagnostics.values().filter(|d| d.diagnostic.rawfile_id == rawfile_id).cloned().collect())
  }

  fn add_user(&self, user: NewUser) -> Result<i64, ToasterError> {
    let mut st = self.lock()?;
    if st.users.values().any(|u| u.user_name == user.user_name) {
      return Err(ToasterError::BadInput(format!("user '{}' already exists", user.user_name)));
    }
    let id = st.next_id("users");
    st.users.insert(id, user);
    Ok(id)
  }

  fn user_id(&self, user_name: &str) -> Result<Option<i64>, ToasterError> {
    Ok(self.lock()?.users.iter().find(|(_, u)| u.user_name == user_name).map(|(id, _)| *id))
  }

  fn add_curator(&self, pulsar_id: i64, user_id: i64) -> Result<(), ToasterError> {
    let mut st = self.lock()?;
    st.require_pulsar(pulsar_id)?;
    if !st.users.contains_key(&user_id) {
      return Err(ToasterError::UnrecognizedValue(format!("no user with id {}", user_id)));
    }
    if !st.curators.contains(&(pulsar_id, user_id)) {
      st.curators.push((pulsar_id, user_id));
    }
    Ok(())
  }

  fn curators(&self, pulsar_id: i64) -> Result<Vec<i64>, ToasterError> {
    Ok(self.lock()?.curators.iter().filter(|(p, _)| *p == pulsar_id).map(|(_, u)| *u).collect())
  }

  fn set_opinion(&self, opinion: Opinion, force: bool) -> Result<(), ToasterError> {
    let mut st = self.lock()?;
    if !st.toas.contains_key(&opinion.toa_id) {
      return Err(ToasterError::UnrecognizedValue(format!("no TOA with id {}", opinion.toa_id)));
    }
    let existing = st.opinions.iter().position(|o| o.user_id == opinion.user_id && o.toa_id == opinion.toa_id);
    match existing {
      Some(_) if !force => Err(ToasterError::BadInput(format!("user {} already has an opinion on TOA {}; use force \
                                                               to replace it",
                                                              opinion.user_id, opinion.toa_id))),
      Some(i) => {
        st.opinions[i] = opinion;
        Ok(())
      }
      None => {
        st.opinions.push(opinion);
        Ok(())
      }
    }
  }

  fn opinion(&self, user_id: i64, toa_id: i64) -> Result<Option<Opinion>, ToasterError> {
    Ok(self.lock()?.opinions.iter().find(|o| o.user_id == user_id && o.toa_id == toa_id).cloned())
  }

  fn record_timfile(&self, timfile: NewTimfile, toa_ids: &[i64]) -> Result<i64, ToasterError> {
    let mut st = self.lock()?;
    st.require_pulsar(timfile.pulsar_id)?;
    if let Some(missing) = toa_ids.iter().find(|id| !st.toas.contains_key(*id)) {
      return Err(ToasterError::UnrecognizedValue(format!("no TOA with id {}", missing)));
    }
    let id = st.next_id("timfiles");
    st.timfiles.insert(id, Timfile { id, timfile, toa_ids: toa_ids.to_vec() });
    Ok(id)
  }

  fn timfiles_for_pulsar(&self, pulsar_id: i64) -> Result<Vec<Timfile>, ToasterError> {
    Ok(self.lock()?.timfiles.values().filter(|t| t.timfile.pulsar_id == pulsar_id).cloned().collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn canonical_name_is_an_alias_and_aliases_are_unique() {
    let cat = InMemoryCatalog::new();
    let id = cat.add_pulsar("J1909-3744", &["1909-3744".to_string()]).unwrap();
    assert_eq!(cat.pulsar_id("1909-3744").unwrap(), Some(id));
    assert_eq!(cat.aliases(id).unwrap(), ["J1909-3744", "1909-3744"]);
    let err = cat.add_pulsar("J1910-0000", &["1909-3744".to_string()]).unwrap_err();
    assert_eq!(err.kind(), "BadInputError");
  }

  #[test]
  fn self_merge_is_bad_input() {
    let cat = InMemoryCatalog::new();
    let id = cat.add_pulsar("J0437-4715", &[]).unwrap();
    assert_eq!(cat.merge_pulsar(id, id).unwrap_err().kind(), "BadInputError");
  }

  #[test]
  fn relocate_keeps_row_when_op_fails() {
    let cat = crate::DomainStubs::sample_catalog();
    let rid = crate::DomainStubs::sample_rawfile(&cat, "abc").unwrap();
    let before = cat.get_rawfile(rid).unwrap().unwrap().rawfile.location;
    let err = cat.relocate_file(FileKind::Rawfile, rid, Path::new("/elsewhere/x.ar"), &mut |_: &Path| {
                   Err(ToasterError::File("disk full".into()))
                 })
                 .unwrap_err();
    assert_eq!(err.kind(), "FileError");
    assert_eq!(cat.get_rawfile(rid).unwrap().unwrap().rawfile.location, before);
  }
}
