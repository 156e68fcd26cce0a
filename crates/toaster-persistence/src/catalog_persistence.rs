use crate::rows::*;
use crate::schema::*;
use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sql_types::BigInt;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, info};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use toaster_domain::{sort_tim_toas, Catalog, Diagnostic, FileKind, NewDiagnostic, NewObsSystem, NewParfile,
                     NewProcess, NewRawfile, NewTelescope, NewTemplate, NewTimfile, NewUser, ObsSystem, Opinion,
                     Parfile, Process, ProcessKey, Pulsar, Rawfile, RelocateOp, StoredPath, Telescope, Template,
                     TimToa, Timfile, Toa, ToaFilter, ToaMeasurement, ToaProvenance, ToasterConfig, ToasterError,
                     VersionStamp};

#[cfg(feature = "mysql")]
pub type DbConnection = diesel::mysql::MysqlConnection;
#[cfg(not(feature = "mysql"))]
pub type DbConnection = diesel::sqlite::SqliteConnection;

#[cfg(feature = "mysql")]
type DbBackend = diesel::mysql::Mysql;
#[cfg(not(feature = "mysql"))]
type DbBackend = diesel::sqlite::Sqlite;

type DbPool = Pool<ConnectionManager<DbConnection>>;

#[cfg(feature = "mysql")]
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/mysql");
#[cfg(not(feature = "mysql"))]
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/sqlite");

#[cfg(feature = "mysql")]
const LAST_ID_SQL: &str = "CAST(LAST_INSERT_ID() AS SIGNED)";
#[cfg(not(feature = "mysql"))]
const LAST_ID_SQL: &str = "last_insert_rowid()";

/// Upper bound on the number of values bound into one `IN (...)` list.
const IN_CHUNK: usize = 500;

fn last_insert_id(conn: &mut DbConnection) -> QueryResult<i64> {
  diesel::select(sql::<BigInt>(LAST_ID_SQL)).get_result(conn)
}

/// Row lock on a pulsar for the rest of the transaction. SQLite serializes
/// writers on its own, so only MySQL needs it.
#[cfg(feature = "mysql")]
fn lock_pulsar(conn: &mut DbConnection, id: i64) -> QueryResult<()> {
  pulsars::table.find(id).select(pulsars::id).for_update().load::<i64>(conn).map(|_| ())
}

#[cfg(not(feature = "mysql"))]
fn lock_pulsar(_conn: &mut DbConnection, _id: i64) -> QueryResult<()> {
  Ok(())
}

#[cfg(not(feature = "mysql"))]
#[derive(Debug)]
struct SqlitePragmas;

#[cfg(not(feature = "mysql"))]
impl diesel::r2d2::CustomizeConnection<DbConnection, diesel::r2d2::Error> for SqlitePragmas {
  fn on_acquire(&self, conn: &mut DbConnection) -> Result<(), diesel::r2d2::Error> {
    use diesel::connection::SimpleConnection;
    conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
        .map_err(diesel::r2d2::Error::QueryError)
  }
}

fn missing(what: &str, id: i64) -> ToasterError {
  ToasterError::UnrecognizedValue(format!("no {} with id {}", what, id))
}

fn require_pulsar(conn: &mut DbConnection, id: i64) -> Result<(), ToasterError> {
  let found = pulsars::table.find(id).select(pulsars::id).first::<i64>(conn).optional()?;
  found.map(|_| ()).ok_or_else(|| missing("pulsar", id))
}

/// Id of the version row for `stamp`, inserted when new. Runs on the
/// caller's connection so it joins the caller's transaction.
fn resolve_version(conn: &mut DbConnection, stamp: &VersionStamp) -> QueryResult<i64> {
  let tempo2 = stamp.tempo2_revision.clone().unwrap_or_default();
  let existing = versions::table.filter(versions::pipeline_hash.eq(&stamp.pipeline_hash))
                                .filter(versions::library_hash.eq(&stamp.library_hash))
                                .filter(versions::tempo2_revision.eq(&tempo2))
                                .select(versions::id)
                                .first::<i64>(conn)
                                .optional()?;
  if let Some(id) = existing {
    return Ok(id);
  }
  diesel::insert_into(versions::table).values((versions::pipeline_hash.eq(&stamp.pipeline_hash),
                                               versions::library_hash.eq(&stamp.library_hash),
                                               versions::tempo2_revision.eq(&tempo2)))
                                      .execute(conn)?;
  let id = last_insert_id(conn)?;
  debug!("new version row {} for {:?}", id, stamp);
  Ok(id)
}

fn has_toas_for(conn: &mut DbConnection, key: &ProcessKey) -> QueryResult<bool> {
  let process_ids: Vec<i64> = processes::table.filter(processes::rawfile_id.eq(key.rawfile_id))
                                              .filter(processes::parfile_id.eq(key.parfile_id))
                                              .filter(processes::template_id.eq(key.template_id))
                                              .filter(processes::manipulator.eq(&key.manipulator))
                                              .filter(processes::manipulator_args.eq(&key.manipulator_args))
                                              .select(processes::id)
                                              .load(conn)?;
  if process_ids.is_empty() {
    return Ok(false);
  }
  let n: i64 = toas::table.filter(toas::process_id.eq_any(&process_ids)).count().get_result(conn)?;
  Ok(n > 0)
}

/// Current (filepath, filename) of a managed file.
fn stored_location(conn: &mut DbConnection, kind: FileKind, id: i64) -> QueryResult<Option<(String, String)>> {
  match kind {
    FileKind::Rawfile => {
      rawfiles::table.find(id).select((rawfiles::filepath, rawfiles::filename)).first(conn).optional()
    }
    FileKind::Parfile => {
      parfiles::table.find(id).select((parfiles::filepath, parfiles::filename)).first(conn).optional()
    }
    FileKind::Template => {
      templates::table.find(id).select((templates::filepath, templates::filename)).first(conn).optional()
    }
  }
}

fn set_location(conn: &mut DbConnection, kind: FileKind, id: i64, loc: &StoredPath) -> QueryResult<usize> {
  match kind {
    FileKind::Rawfile => diesel::update(rawfiles::table.find(id)).set((rawfiles::filepath.eq(&loc.filepath),
                                                                        rawfiles::filename.eq(&loc.filename)))
                                                                  .execute(conn),
    FileKind::Parfile => diesel::update(parfiles::table.find(id)).set((parfiles::filepath.eq(&loc.filepath),
                                                                        parfiles::filename.eq(&loc.filename)))
                                                                  .execute(conn),
    FileKind::Template => diesel::update(templates::table.find(id)).set((templates::filepath.eq(&loc.filepath),
                                                                          templates::filename.eq(&loc.filename)))
                                                                    .execute(conn),
  }
}

/// Rewrites `pulsar_id` from `src` to `dest` in one table.
macro_rules! repoint_pulsar {
  ($conn:expr, $table:ident, $src:expr, $dest:expr) => {
    diesel::update($table::table.filter($table::pulsar_id.eq($src))).set($table::pulsar_id.eq($dest))
                                                                     .execute($conn)?
  };
}

/// Catalog stored in a relational database through diesel.
pub struct DieselCatalog {
  pool: DbPool,
}

impl DieselCatalog {
  /// Opens a pool on `database_url` and applies pending migrations.
  pub fn connect(database_url: &str) -> Result<Self, ToasterError> {
    let manager = ConnectionManager::<DbConnection>::new(database_url);
    let builder = Pool::builder().max_size(4);
    #[cfg(not(feature = "mysql"))]
    let builder = builder.connection_customizer(Box::new(SqlitePragmas));
    let pool = builder.build(manager).map_err(|e| ToasterError::Database(format!("pool: {}", e)))?;
    let catalog = Self { pool };
    catalog.run_migrations()?;
    info!("catalog ready at {}", database_url);
    Ok(catalog)
  }

  pub fn from_config(cfg: &ToasterConfig) -> Result<Self, ToasterError> {
    Self::connect(&cfg.db_url)
  }

  fn conn(&self) -> Result<PooledConnection<ConnectionManager<DbConnection>>, ToasterError> {
    self.pool.get().map_err(|e| ToasterError::Database(format!("pool: {}", e)))
  }

  fn run_migrations(&self) -> Result<(), ToasterError> {
    let mut conn = self.conn()?;
    let applied =
      conn.run_pending_migrations(MIGRATIONS).map_err(|e| ToasterError::Database(format!("migrations: {}", e)))?;
    if !applied.is_empty() {
      info!("applied {} catalog migration(s)", applied.len());
    }
    Ok(())
  }
}

/// Builds a catalog from `TOASTER_DB_URL` / `DATABASE_URL` (after loading
/// `.env`).
pub fn new_from_env() -> Result<DieselCatalog, ToasterError> {
  let cfg = ToasterConfig::from_env()?;
  DieselCatalog::from_config(&cfg)
}

/// Catalog backed by a fresh SQLite file, for tests.
#[cfg(not(feature = "mysql"))]
pub fn new_sqlite_for_test(path: &Path) -> Result<DieselCatalog, ToasterError> {
  DieselCatalog::connect(&path.to_string_lossy())
}

impl Catalog for DieselCatalog {
  fn add_pulsar(&self, name: &str, aliases: &[String]) -> Result<i64, ToasterError> {
    let mut all: Vec<String> = vec![name.to_string()];
    for a in aliases {
      if !all.contains(a) {
        all.push(a.clone());
      }
    }
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          let taken: Vec<String> = pulsar_aliases::table.filter(pulsar_aliases::pulsar_alias.eq_any(&all))
                                                        .select(pulsar_aliases::pulsar_alias)
                                                        .load(conn)?;
          if let Some(t) = taken.first() {
            return Err(ToasterError::BadInput(format!("pulsar name or alias '{}' is already in use", t)));
          }
          diesel::insert_into(pulsars::table).values(pulsars::pulsar_name.eq(name)).execute(conn)?;
          let id = last_insert_id(conn)?;
          for alias in &all {
            diesel::insert_into(pulsar_aliases::table).values((pulsar_aliases::pulsar_id.eq(id),
                                                               pulsar_aliases::pulsar_alias.eq(alias)))
                                                      .execute(conn)?;
          }
          debug!("added pulsar {} ({}) with {} alias(es)", name, id, all.len());
          Ok(id)
        })
  }

  fn get_pulsar(&self, id: i64) -> Result<Option<Pulsar>, ToasterError> {
    let mut conn = self.conn()?;
    let row = pulsars::table.find(id).select(PulsarRow::as_select()).first(&mut conn).optional()?;
    let Some(row) = row else { return Ok(None) };
    let master = master_parfiles::table.filter(master_parfiles::pulsar_id.eq(id))
                                       .select(master_parfiles::parfile_id)
                                       .first::<i64>(&mut conn)
                                       .optional()?;
    Ok(Some(Pulsar { id: row.id, name: row.pulsar_name, master_parfile_id: master }))
  }

  fn pulsar_id(&self, name_or_alias: &str) -> Result<Option<i64>, ToasterError> {
    let mut conn = self.conn()?;
    let mut ids: Vec<i64> =
      pulsars::table.filter(pulsars::pulsar_name.eq(name_or_alias)).select(pulsars::id).load(&mut conn)?;
    ids.extend(pulsar_aliases::table.filter(pulsar_aliases::pulsar_alias.eq(name_or_alias))
                                    .select(pulsar_aliases::pulsar_id)
                                    .load::<i64>(&mut conn)?);
    ids.sort_unstable();
    ids.dedup();
    match ids.as_slice() {
      [] => Ok(None),
      [id] => Ok(Some(*id)),
      many => Err(ToasterError::InconsistentDatabase(format!("'{}' matches {} pulsars", name_or_alias, many.len()))),
    }
  }

  fn aliases(&self, pulsar_id: i64) -> Result<Vec<String>, ToasterError> {
    let mut conn = self.conn()?;
    Ok(pulsar_aliases::table.filter(pulsar_aliases::pulsar_id.eq(pulsar_id))
                            .order(pulsar_aliases::id)
                            .select(pulsar_aliases::pulsar_alias)
                            .load(&mut conn)?)
  }

  fn merge_pulsar(&self, src: i64, dest: i64) -> Result<(), ToasterError> {
    if src == dest {
      return Err(ToasterError::BadInput(format!("cannot merge pulsar {} into itself", src)));
    }
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          lock_pulsar(conn, src)?;
          lock_pulsar(conn, dest)?;
          require_pulsar(conn, src)?;
          require_pulsar(conn, dest)?;

          repoint_pulsar!(conn, pulsar_aliases, src, dest);
          repoint_pulsar!(conn, timfiles, src, dest);
          repoint_pulsar!(conn, rawfiles, src, dest);
          repoint_pulsar!(conn, templates, src, dest);
          repoint_pulsar!(conn, parfiles, src, dest);
          repoint_pulsar!(conn, toas, src, dest);

          // Designations already held by the destination win.
          let dest_has_master = master_parfiles::table.filter(master_parfiles::pulsar_id.eq(dest))
                                                      .select(master_parfiles::id)
                                                      .first::<i64>(conn)
                                                      .optional()?
                                                      .is_some();
          if dest_has_master {
            diesel::delete(master_parfiles::table.filter(master_parfiles::pulsar_id.eq(src))).execute(conn)?;
          } else {
            repoint_pulsar!(conn, master_parfiles, src, dest);
          }

          let dest_systems: Vec<i64> = master_templates::table.filter(master_templates::pulsar_id.eq(dest))
                                                              .select(master_templates::obssystem_id)
                                                              .load(conn)?;
          let src_masters: Vec<(i64, i64)> = master_templates::table.filter(master_templates::pulsar_id.eq(src))
                                                                    .select((master_templates::id,
                                                                             master_templates::obssystem_id))
                                                                    .load(conn)?;
          for (row_id, obs) in src_masters {
            if dest_systems.contains(&obs) {
              diesel::delete(master_templates::table.find(row_id)).execute(conn)?;
            } else {
              diesel::update(master_templates::table.find(row_id)).set(master_templates::pulsar_id.eq(dest))
                                                                  .execute(conn)?;
            }
          }

          let dest_users: Vec<i64> =
            curators::table.filter(curators::pulsar_id.eq(dest)).select(curators::user_id).load(conn)?;
          let src_curators: Vec<(i64, i64)> =
            curators::table.filter(curators::pulsar_id.eq(src)).select((curators::id, curators::user_id)).load(conn)?;
          for (row_id, user) in src_curators {
            if dest_users.contains(&user) {
              diesel::delete(curators::table.find(row_id)).execute(conn)?;
            } else {
              diesel::update(curators::table.find(row_id)).set(curators::pulsar_id.eq(dest)).execute(conn)?;
            }
          }

          diesel::delete(pulsars::table.find(src)).execute(conn)?;
          info!("merged pulsar {} into {}", src, dest);
          Ok(())
        })
  }

  fn add_telescope(&self, telescope: NewTelescope) -> Result<i64, ToasterError> {
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          let names: Vec<String> = telescopes::table.select(telescopes::telescope_name).load(conn)?;
          if names.iter().any(|n| n.eq_ignore_ascii_case(&telescope.name)) {
            return Err(ToasterError::BadInput(format!("telescope '{}' already exists", telescope.name)));
          }
          diesel::insert_into(telescopes::table).values(NewTelescopeRow::from(&telescope)).execute(conn)?;
          Ok(last_insert_id(conn)?)
        })
  }

  fn get_telescope(&self, id: i64) -> Result<Option<Telescope>, ToasterError> {
    let mut conn = self.conn()?;
    let row = telescopes::table.find(id).select(TelescopeRow::as_select()).first(&mut conn).optional()?;
    Ok(row.map(Telescope::from))
  }

  fn add_obssystem(&self, system: NewObsSystem) -> Result<i64, ToasterError> {
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          let scope = telescopes::table.find(system.telescope_id).select(telescopes::id).first::<i64>(conn).optional()?;
          if scope.is_none() {
            return Err(missing("telescope", system.telescope_id));
          }
          let existing: Vec<ObsSystemRow> = obssystems::table.select(ObsSystemRow::as_select()).load(conn)?;
          let clash = existing.iter().any(|o| {
                                       o.name.eq_ignore_ascii_case(&system.name)
                                       || (o.telescope_id == system.telescope_id
                                           && o.frontend.eq_ignore_ascii_case(&system.frontend)
                                           && o.backend.eq_ignore_ascii_case(&system.backend))
                                     });
          if clash {
            return Err(ToasterError::BadInput(format!("observing system '{}' already exists", system.name)));
          }
          diesel::insert_into(obssystems::table).values(NewObsSystemRow::from(&system)).execute(conn)?;
          Ok(last_insert_id(conn)?)
        })
  }

  fn get_obssystem(&self, id: i64) -> Result<Option<ObsSystem>, ToasterError> {
    let mut conn = self.conn()?;
    let row = obssystems::table.find(id).select(ObsSystemRow::as_select()).first(&mut conn).optional()?;
    Ok(row.map(ObsSystem::from))
  }

  fn obssystem_by_name(&self, name: &str) -> Result<Option<ObsSystem>, ToasterError> {
    let mut conn = self.conn()?;
    let rows: Vec<ObsSystemRow> = obssystems::table.select(ObsSystemRow::as_select()).load(&mut conn)?;
    Ok(rows.into_iter().find(|o| o.name.eq_ignore_ascii_case(name)).map(ObsSystem::from))
  }

  fn find_obssystem(&self, telescope: &str, frontend: &str, backend: &str)
                    -> Result<Option<ObsSystem>, ToasterError> {
    let mut conn = self.conn()?;
    let scopes: Vec<i64> = telescopes::table.select(TelescopeRow::as_select())
                                            .load(&mut conn)?
                                            .into_iter()
                                            .filter(|t| {
                                              t.telescope_name.eq_ignore_ascii_case(telescope)
                                              || t.telescope_abbrev.eq_ignore_ascii_case(telescope)
                                              || t.telescope_code.eq_ignore_ascii_case(telescope)
                                            })
                                            .map(|t| t.id)
                                            .collect();
    if scopes.is_empty() {
      return Ok(None);
    }
    let mut found: Vec<ObsSystemRow> = obssystems::table.filter(obssystems::telescope_id.eq_any(&scopes))
                                                        .select(ObsSystemRow::as_select())
                                                        .load(&mut conn)?
                                                        .into_iter()
                                                        .filter(|o| {
                                                          o.frontend.eq_ignore_ascii_case(frontend)
                                                          && o.backend.eq_ignore_ascii_case(backend)
                                                        })
                                                        .collect();
    match found.len() {
      0 => Ok(None),
      1 => Ok(found.pop().map(ObsSystem::from)),
      _ => Err(ToasterError::InconsistentDatabase(format!("several observing systems match ({}, {}, {})",
                                                          telescope, frontend, backend))),
    }
  }

  fn parfile_by_md5(&self, md5: &str) -> Result<Option<i64>, ToasterError> {
    let mut conn = self.conn()?;
    Ok(parfiles::table.filter(parfiles::md5.eq(md5)).select(parfiles::id).first(&mut conn).optional()?)
  }

  fn insert_parfile(&self, parfile: NewParfile) -> Result<i64, ToasterError> {
    let row = NewParfileRow::from_parfile(&parfile)?;
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          require_pulsar(conn, parfile.pulsar_id)?;
          diesel::insert_into(parfiles::table).values(&row).execute(conn)?;
          Ok(last_insert_id(conn)?)
        })
  }

  fn get_parfile(&self, id: i64) -> Result<Option<Parfile>, ToasterError> {
    let mut conn = self.conn()?;
    let row = parfiles::table.find(id).select(ParfileRow::as_select()).first(&mut conn).optional()?;
    row.map(ParfileRow::into_parfile).transpose()
  }

  fn parfiles_for_pulsar(&self, pulsar_id: i64) -> Result<Vec<Parfile>, ToasterError> {
    let mut conn = self.conn()?;
    let rows: Vec<ParfileRow> = parfiles::table.filter(parfiles::pulsar_id.eq(pulsar_id))
                                               .order(parfiles::id)
                                               .select(ParfileRow::as_select())
                                               .load(&mut conn)?;
    rows.into_iter().map(ParfileRow::into_parfile).collect()
  }

  fn delete_parfile(&self, id: i64) -> Result<(), ToasterError> {
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          let exists = parfiles::table.find(id).select(parfiles::id).first::<i64>(conn).optional()?;
          if exists.is_none() {
            return Err(missing("parfile", id));
          }
          let procs: i64 = processes::table.filter(processes::parfile_id.eq(id)).count().get_result(conn)?;
          let toa_refs: i64 = toas::table.filter(toas::parfile_id.eq(id)).count().get_result(conn)?;
          if procs + toa_refs > 0 {
            return Err(ToasterError::BadInput(format!("parfile {} is referenced by processes or TOAs", id)));
          }
          diesel::delete(master_parfiles::table.filter(master_parfiles::parfile_id.eq(id))).execute(conn)?;
          diesel::delete(parfiles::table.find(id)).execute(conn)?;
          Ok(())
        })
  }

  fn template_by_md5(&self, md5: &str) -> Result<Option<i64>, ToasterError> {
    let mut conn = self.conn()?;
    Ok(templates::table.filter(templates::md5.eq(md5)).select(templates::id).first(&mut conn).optional()?)
  }

  fn insert_template(&self, template: NewTemplate) -> Result<i64, ToasterError> {
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          require_pulsar(conn, template.pulsar_id)?;
          diesel::insert_into(templates::table).values(NewTemplateRow::from(&template)).execute(conn)?;
          Ok(last_insert_id(conn)?)
        })
  }

  fn get_template(&self, id: i64) -> Result<Option<Template>, ToasterError> {
    let mut conn = self.conn()?;
    let row = templates::table.find(id).select(TemplateRow::as_select()).first(&mut conn).optional()?;
    Ok(row.map(Template::from))
  }

  fn templates_for_pulsar(&self, pulsar_id: i64) -> Result<Vec<Template>, ToasterError> {
    let mut conn = self.conn()?;
    let rows: Vec<TemplateRow> = templates::table.filter(templates::pulsar_id.eq(pulsar_id))
                                                 .order(templates::id)
                                                 .select(TemplateRow::as_select())
                                                 .load(&mut conn)?;
    Ok(rows.into_iter().map(Template::from).collect())
  }

  fn delete_template(&self, id: i64) -> Result<(), ToasterError> {
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          let exists = templates::table.find(id).select(templates::id).first::<i64>(conn).optional()?;
          if exists.is_none() {
            return Err(missing("template", id));
          }
          let procs: i64 = processes::table.filter(processes::template_id.eq(id)).count().get_result(conn)?;
          let toa_refs: i64 = toas::table.filter(toas::template_id.eq(id)).count().get_result(conn)?;
          if procs + toa_refs > 0 {
            return Err(ToasterError::BadInput(format!("template {} is referenced by processes or TOAs", id)));
          }
          diesel::delete(master_templates::table.filter(master_templates::template_id.eq(id))).execute(conn)?;
          diesel::delete(templates::table.find(id)).execute(conn)?;
          Ok(())
        })
  }

  fn rawfile_by_md5(&self, md5: &str) -> Result<Option<i64>, ToasterError> {
    let mut conn = self.conn()?;
    Ok(rawfiles::table.filter(rawfiles::md5.eq(md5)).select(rawfiles::id).first(&mut conn).optional()?)
  }

  fn insert_rawfile(&self, rawfile: NewRawfile) -> Result<i64, ToasterError> {
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          require_pulsar(conn, rawfile.pulsar_id)?;
          diesel::insert_into(rawfiles::table).values(NewRawfileRow::from(&rawfile)).execute(conn)?;
          Ok(last_insert_id(conn)?)
        })
  }

  fn get_rawfile(&self, id: i64) -> Result<Option<Rawfile>, ToasterError> {
    let mut conn = self.conn()?;
    let row = rawfiles::table.find(id).select(RawfileRow::as_select()).first(&mut conn).optional()?;
    Ok(row.map(Rawfile::from))
  }

  fn rawfiles_for_pulsar(&self, pulsar_id: i64) -> Result<Vec<Rawfile>, ToasterError> {
    let mut conn = self.conn()?;
    let rows: Vec<RawfileRow> = rawfiles::table.filter(rawfiles::pulsar_id.eq(pulsar_id))
                                               .order(rawfiles::id)
                                               .select(RawfileRow::as_select())
                                               .load(&mut conn)?;
    Ok(rows.into_iter().map(Rawfile::from).collect())
  }

  fn relocate_file(&self, kind: FileKind, id: i64, new_path: &Path, op: RelocateOp<'_>)
                   -> Result<PathBuf, ToasterError> {
    let new_loc = StoredPath::from_path(new_path);
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          let (filepath, filename) = stored_location(conn, kind, id)?.ok_or_else(|| missing(&kind.to_string(), id))?;
          let old = StoredPath { filepath, filename }.path();
          set_location(conn, kind, id, &new_loc)?;
          op(&old)?;
          Ok(old)
        })
  }

  fn set_master_parfile(&self, pulsar_id: i64, parfile_id: i64) -> Result<(), ToasterError> {
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          lock_pulsar(conn, pulsar_id)?;
          require_pulsar(conn, pulsar_id)?;
          let owner = parfiles::table.find(parfile_id)
                                     .select(parfiles::pulsar_id)
                                     .first::<i64>(conn)
                                     .optional()?
                                     .ok_or_else(|| missing("parfile", parfile_id))?;
          if owner != pulsar_id {
            return Err(ToasterError::BadInput(format!("parfile {} belongs to pulsar {}, not {}",
                                                      parfile_id, owner, pulsar_id)));
          }
          diesel::delete(master_parfiles::table.filter(master_parfiles::pulsar_id.eq(pulsar_id))).execute(conn)?;
          diesel::insert_into(master_parfiles::table).values((master_parfiles::pulsar_id.eq(pulsar_id),
                                                              master_parfiles::parfile_id.eq(parfile_id)))
                                                     .execute(conn)?;
          info!("parfile {} is now the master for pulsar {}", parfile_id, pulsar_id);
          Ok(())
        })
  }

  fn master_parfile(&self, pulsar_id: i64) -> Result<Option<i64>, ToasterError> {
    let mut conn = self.conn()?;
    Ok(master_parfiles::table.filter(master_parfiles::pulsar_id.eq(pulsar_id))
                             .select(master_parfiles::parfile_id)
                             .first(&mut conn)
                             .optional()?)
  }

  fn set_master_template(&self, pulsar_id: i64, obssystem_id: i64, template_id: i64) -> Result<(), ToasterError> {
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          lock_pulsar(conn, pulsar_id)?;
          require_pulsar(conn, pulsar_id)?;
          let (owner, system) = templates::table.find(template_id)
                                                .select((templates::pulsar_id, templates::obssystem_id))
                                                .first::<(i64, i64)>(conn)
                                                .optional()?
                                                .ok_or_else(|| missing("template", template_id))?;
          if owner != pulsar_id || system != obssystem_id {
            return Err(ToasterError::BadInput(format!("template {} is not for pulsar {} and obssystem {}",
                                                      template_id, pulsar_id, obssystem_id)));
          }
          diesel::delete(master_templates::table.filter(master_templates::pulsar_id.eq(pulsar_id))
                                                .filter(master_templates::obssystem_id.eq(obssystem_id)))
                                                .execute(conn)?;
          diesel::insert_into(master_templates::table).values((master_templates::pulsar_id.eq(pulsar_id),
                                                               master_templates::obssystem_id.eq(obssystem_id),
                                                               master_templates::template_id.eq(template_id)))
                                                      .execute(conn)?;
          info!("template {} is now the master for pulsar {} / obssystem {}", template_id, pulsar_id, obssystem_id);
          Ok(())
        })
  }

  fn master_template(&self, pulsar_id: i64, obssystem_id: i64) -> Result<Option<i64>, ToasterError> {
    let mut conn = self.conn()?;
    Ok(master_templates::table.filter(master_templates::pulsar_id.eq(pulsar_id))
                              .filter(master_templates::obssystem_id.eq(obssystem_id))
                              .select(master_templates::template_id)
                              .first(&mut conn)
                              .optional()?)
  }

  fn version_id(&self, stamp: &VersionStamp) -> Result<i64, ToasterError> {
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| Ok(resolve_version(conn, stamp)?))
  }

  fn get_version(&self, id: i64) -> Result<Option<VersionStamp>, ToasterError> {
    let mut conn = self.conn()?;
    let row = versions::table.find(id)
                             .select((versions::pipeline_hash, versions::library_hash, versions::tempo2_revision))
                             .first::<(String, String, String)>(&mut conn)
                             .optional()?;
    Ok(row.map(|(pipeline_hash, library_hash, tempo2)| {
            let tempo2_revision = if tempo2.is_empty() { None } else { Some(tempo2) };
            VersionStamp { pipeline_hash, library_hash, tempo2_revision }
          }))
  }

  fn toas_exist_for(&self, key: &ProcessKey) -> Result<bool, ToasterError> {
    let mut conn = self.conn()?;
    Ok(has_toas_for(&mut conn, key)?)
  }

  fn record_toas(&self, process: NewProcess, version: &VersionStamp, provenance: ToaProvenance,
                 toas: Vec<ToaMeasurement>, allow_conflicts: bool)
                 -> Result<(i64, Vec<i64>), ToasterError> {
    let rows: Vec<NewToaRow> = toas.iter().map(|m| NewToaRow::new(0, &provenance, m)).collect::<Result<_, _>>()?;
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          let version_id = resolve_version(conn, version)?;
          if !allow_conflicts && has_toas_for(conn, &process.key())? {
            return Err(ToasterError::ConflictingToas(format!("TOAs already exist for rawfile {} with parfile {}, \
                                                              template {} and manipulator {} {}",
                                                             process.rawfile_id,
                                                             process.parfile_id,
                                                             process.template_id,
                                                             process.manipulator,
                                                             process.manipulator_args)));
          }
          diesel::insert_into(processes::table).values(NewProcessRow::new(&process, version_id)).execute(conn)?;
          let process_id = last_insert_id(conn)?;
          let mut ids = Vec::with_capacity(rows.len());
          // One statement per TOA: the id of each row is needed and MySQL
          // only reports the first id of a multi-row insert.
          for mut row in rows {
            row.process_id = process_id;
            diesel::insert_into(toas::table).values(&row).execute(conn)?;
            ids.push(last_insert_id(conn)?);
          }
          info!("process {} recorded {} TOA(s) for rawfile {}", process_id, ids.len(), process.rawfile_id);
          Ok((process_id, ids))
        })
  }

  fn processes_for_rawfile(&self, rawfile_id: i64) -> Result<Vec<Process>, ToasterError> {
    let mut conn = self.conn()?;
    let rows: Vec<ProcessRow> = processes::table.filter(processes::rawfile_id.eq(rawfile_id))
                                                .order(processes::id)
                                                .select(ProcessRow::as_select())
                                                .load(&mut conn)?;
    Ok(rows.into_iter().map(Process::from).collect())
  }

  fn get_toa(&self, id: i64) -> Result<Option<Toa>, ToasterError> {
    let mut conn = self.conn()?;
    let row = toas::table.find(id).select(ToaRow::as_select()).first(&mut conn).optional()?;
    row.map(ToaRow::into_toa).transpose()
  }

  fn toas_for_process(&self, process_id: i64) -> Result<Vec<Toa>, ToasterError> {
    let mut conn = self.conn()?;
    let rows: Vec<ToaRow> = toas::table.filter(toas::process_id.eq(process_id))
                                       .order(toas::id)
                                       .select(ToaRow::as_select())
                                       .load(&mut conn)?;
    rows.into_iter().map(ToaRow::into_toa).collect()
  }

  fn select_toas(&self, filter: &ToaFilter) -> Result<Vec<TimToa>, ToasterError> {
    let mut conn = self.conn()?;
    let conn = &mut *conn;
    let mut query = toas::table.select(ToaRow::as_select()).into_boxed::<DbBackend>();

    if let Some(name) = &filter.pulsar_name {
      let ids: Vec<i64> = pulsars::table.filter(pulsars::pulsar_name.eq(name)).select(pulsars::id).load(conn)?;
      if ids.is_empty() {
        return Ok(Vec::new());
      }
      query = query.filter(toas::pulsar_id.eq_any(ids));
    }
    if !filter.obs_codes.is_empty() {
      let scopes: Vec<i64> = telescopes::table.select((telescopes::id, telescopes::telescope_code))
                                              .load::<(i64, String)>(conn)?
                                              .into_iter()
                                              .filter(|(_, code)| filter.obs_codes.iter().any(|c| c.eq_ignore_ascii_case(code)))
                                              .map(|(id, _)| id)
                                              .collect();
      let systems: Vec<i64> = if scopes.is_empty() {
        Vec::new()
      } else {
        obssystems::table.filter(obssystems::telescope_id.eq_any(&scopes)).select(obssystems::id).load(conn)?
      };
      if systems.is_empty() {
        return Ok(Vec::new());
      }
      query = query.filter(toas::obssystem_id.eq_any(systems));
    }
    if let Some(r) = filter.mjd {
      // Coarse cut on the integer day; the exact bound is applied below.
      query = query.filter(toas::imjd.ge(r.lo.floor() as i32)).filter(toas::imjd.le(r.hi.floor() as i32));
    }
    if let Some(r) = filter.mjd_err {
      query = query.filter(toas::toa_unc_us.ge(r.lo)).filter(toas::toa_unc_us.le(r.hi));
    }
    if let Some(r) = filter.freq {
      query = query.filter(toas::freq.ge(r.lo)).filter(toas::freq.le(r.hi));
    }
    if !filter.toa_ids.is_empty() {
      query = query.filter(toas::id.eq_any(filter.toa_ids.clone()));
    }
    let rows: Vec<ToaRow> = query.load(conn)?;
    if rows.is_empty() {
      return Ok(Vec::new());
    }

    let pulsar_names: HashMap<i64, String> =
      pulsars::table.select((pulsars::id, pulsars::pulsar_name)).load::<(i64, String)>(conn)?.into_iter().collect();
    let codes: HashMap<i64, String> = telescopes::table.select((telescopes::id, telescopes::telescope_code))
                                                       .load::<(i64, String)>(conn)?
                                                       .into_iter()
                                                       .collect();
    let system_scope: HashMap<i64, i64> = obssystems::table.select((obssystems::id, obssystems::telescope_id))
                                                           .load::<(i64, i64)>(conn)?
                                                           .into_iter()
                                                           .collect();
    let mut raw_ids: Vec<i64> = rows.iter().map(|r| r.rawfile_id).collect();
    raw_ids.sort_unstable();
    raw_ids.dedup();
    let mut raw_names: HashMap<i64, String> = HashMap::new();
    for chunk in raw_ids.chunks(IN_CHUNK) {
      raw_names.extend(rawfiles::table.filter(rawfiles::id.eq_any(chunk))
                                      .select((rawfiles::id, rawfiles::filename))
                                      .load::<(i64, String)>(conn)?);
    }

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
      let inconsistent = |what: &str, id: i64| {
        ToasterError::InconsistentDatabase(format!("TOA {} references missing {} {}", row.id, what, id))
      };
      let pulsar_name = pulsar_names.get(&row.pulsar_id).ok_or_else(|| inconsistent("pulsar", row.pulsar_id))?;
      let rawfile_name = raw_names.get(&row.rawfile_id).ok_or_else(|| inconsistent("rawfile", row.rawfile_id))?;
      let obscode = system_scope.get(&row.obssystem_id)
                                .and_then(|t| codes.get(t))
                                .ok_or_else(|| inconsistent("obssystem", row.obssystem_id))?;
      let tim = TimToa { toa_id: row.id,
                         pulsar_name: pulsar_name.clone(),
                         rawfile_name: rawfile_name.clone(),
                         obscode: obscode.clone(),
                         freq: row.freq,
                         imjd: row.imjd,
                         fmjd: row.fmjd,
                         toa_unc_us: row.toa_unc_us };
      if filter.matches(&tim) {
        out.push(tim);
      }
    }
    sort_tim_toas(&mut out);
    Ok(out)
  }

  fn replace_diagnostic(&self, diagnostic: NewDiagnostic) -> Result<i64, ToasterError> {
    let row = NewDiagnosticRow::from_diagnostic(&diagnostic)?;
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          let raw = rawfiles::table.find(row.rawfile_id).select(rawfiles::id).first::<i64>(conn).optional()?;
          if raw.is_none() {
            return Err(missing("rawfile", row.rawfile_id));
          }
          diesel::delete(diagnostics::table.filter(diagnostics::rawfile_id.eq(row.rawfile_id))
                                           .filter(diagnostics::plugin.eq(&row.plugin)))
                                           .execute(conn)?;
          diesel::insert_into(diagnostics::table).values(&row).execute(conn)?;
          Ok(last_insert_id(conn)?)
        })
  }

  fn diagnostics_for_rawfile(&self, rawfile_id: i64) -> Result<Vec<Diagnostic>, ToasterError> {
    let mut conn = self.conn()?;
    let rows: Vec<DiagnosticRow> = diagnostics::table.filter(diagnostics::rawfile_id.eq(rawfile_id))
                                                     .order(diagnostics::id)
                                                     .select(DiagnosticRow::as_select())
                                                     .load(&mut conn)?;
    rows.into_iter().map(DiagnosticRow::into_diagnostic).collect()
  }

  fn add_user(&self, user: NewUser) -> Result<i64, ToasterError> {
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          let existing =
            users::table.filter(users::user_name.eq(&user.user_name)).select(users::id).first::<i64>(conn).optional()?;
          if existing.is_some() {
            return Err(ToasterError::BadInput(format!("user '{}' already exists", user.user_name)));
          }
          diesel::insert_into(users::table).values((users::user_name.eq(&user.user_name),
                                                    users::real_name.eq(&user.real_name),
                                                    users::email.eq(&user.email)))
                                           .execute(conn)?;
          Ok(last_insert_id(conn)?)
        })
  }

  fn user_id(&self, user_name: &str) -> Result<Option<i64>, ToasterError> {
    let mut conn = self.conn()?;
    Ok(users::table.filter(users::user_name.eq(user_name)).select(users::id).first(&mut conn).optional()?)
  }

  fn add_curator(&self, pulsar_id: i64, user_id: i64) -> Result<(), ToasterError> {
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          require_pulsar(conn, pulsar_id)?;
          let user = users::table.find(user_id).select(users::id).first::<i64>(conn).optional()?;
          if user.is_none() {
            return Err(missing("user", user_id));
          }
          let already: i64 = curators::table.filter(curators::pulsar_id.eq(pulsar_id))
                                            .filter(curators::user_id.eq(user_id))
                                            .count()
                                            .get_result(conn)?;
          if already == 0 {
            diesel::insert_into(curators::table).values((curators::pulsar_id.eq(pulsar_id),
                                                         curators::user_id.eq(user_id)))
                                                .execute(conn)?;
          }
          Ok(())
        })
  }

  fn curators(&self, pulsar_id: i64) -> Result<Vec<i64>, ToasterError> {
    let mut conn = self.conn()?;
    Ok(curators::table.filter(curators::pulsar_id.eq(pulsar_id))
                      .order(curators::id)
                      .select(curators::user_id)
                      .load(&mut conn)?)
  }

  fn set_opinion(&self, opinion: Opinion, force: bool) -> Result<(), ToasterError> {
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          let toa = toas::table.find(opinion.toa_id).select(toas::id).first::<i64>(conn).optional()?;
          if toa.is_none() {
            return Err(missing("TOA", opinion.toa_id));
          }
          let existing = opinions::table.filter(opinions::user_id.eq(opinion.user_id))
                                        .filter(opinions::toa_id.eq(opinion.toa_id))
                                        .select(opinions::id)
                                        .first::<i64>(conn)
                                        .optional()?;
          match existing {
            Some(_) if !force => Err(ToasterError::BadInput(format!("user {} already has an opinion on TOA {}; use \
                                                                     force to replace it",
                                                                    opinion.user_id, opinion.toa_id))),
            Some(id) => {
              diesel::update(opinions::table.find(id)).set((opinions::is_bad.eq(opinion.is_bad),
                                                            opinions::comments.eq(&opinion.comments)))
                                                      .execute(conn)?;
              Ok(())
            }
            None => {
              diesel::insert_into(opinions::table).values((opinions::user_id.eq(opinion.user_id),
                                                            opinions::toa_id.eq(opinion.toa_id),
                                                            opinions::is_bad.eq(opinion.is_bad),
                                                            opinions::comments.eq(&opinion.comments)))
                                                  .execute(conn)?;
              Ok(())
            }
          }
        })
  }

  fn opinion(&self, user_id: i64, toa_id: i64) -> Result<Option<Opinion>, ToasterError> {
    let mut conn = self.conn()?;
    let row = opinions::table.filter(opinions::user_id.eq(user_id))
                             .filter(opinions::toa_id.eq(toa_id))
                             .select(OpinionRow::as_select())
                             .first(&mut conn)
                             .optional()?;
    Ok(row.map(Opinion::from))
  }

  fn record_timfile(&self, timfile: NewTimfile, toa_ids: &[i64]) -> Result<i64, ToasterError> {
    let mut wanted = toa_ids.to_vec();
    wanted.sort_unstable();
    wanted.dedup();
    let mut conn = self.conn()?;
    conn.transaction::<_, ToasterError, _>(|conn| {
          require_pulsar(conn, timfile.pulsar_id)?;
          let mut found = 0i64;
          for chunk in wanted.chunks(IN_CHUNK) {
            found += toas::table.filter(toas::id.eq_any(chunk)).count().get_result::<i64>(conn)?;
          }
          if found != wanted.len() as i64 {
            return Err(ToasterError::UnrecognizedValue("timfile references TOAs that do not exist".into()));
          }
          diesel::insert_into(timfiles::table).values((timfiles::pulsar_id.eq(timfile.pulsar_id),
                                                       timfiles::user_id.eq(timfile.user_id),
                                                       timfiles::version_id.eq(timfile.version_id),
                                                       timfiles::comments.eq(&timfile.comments),
                                                       timfiles::add_time.eq(timfile.add_time)))
                                              .execute(conn)?;
          let id = last_insert_id(conn)?;
          for toa_id in toa_ids {
            diesel::insert_into(toa_tim::table).values((toa_tim::timfile_id.eq(id), toa_tim::toa_id.eq(toa_id)))
                                               .execute(conn)?;
          }
          info!("timfile {} recorded with {} TOA(s)", id, toa_ids.len());
          Ok(id)
        })
  }

  fn timfiles_for_pulsar(&self, pulsar_id: i64) -> Result<Vec<Timfile>, ToasterError> {
    let mut conn = self.conn()?;
    let rows: Vec<TimfileRow> = timfiles::table.filter(timfiles::pulsar_id.eq(pulsar_id))
                                               .order(timfiles::id)
                                               .select(TimfileRow::as_select())
                                               .load(&mut conn)?;
    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
      let toa_ids: Vec<i64> = toa_tim::table.filter(toa_tim::timfile_id.eq(r.id))
                                            .order(toa_tim::id)
                                            .select(toa_tim::toa_id)
                                            .load(&mut conn)?;
      out.push(Timfile { id: r.id,
                         timfile: NewTimfile { pulsar_id: r.pulsar_id,
                                               user_id: r.user_id,
                                               version_id: r.version_id,
                                               comments: r.comments,
                                               add_time: r.add_time },
                         toa_ids });
    }
    Ok(out)
  }
}
