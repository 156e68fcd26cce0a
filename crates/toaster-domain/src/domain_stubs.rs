use crate::catalog::Catalog;
use crate::catalog_memory::InMemoryCatalog;
use crate::errors::ToasterError;
use crate::models::*;
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use toaster_providers::ArchiveHeader;

/// Ready-made fixtures for tests and dry runs.
pub struct DomainStubs;

impl DomainStubs {
  pub const PULSAR: &'static str = "J1909-3744";
  pub const TELESCOPE: &'static str = "Green Bank";
  pub const OBSSYSTEM: &'static str = "GBT_GUPPI_L";

  /// Fixed timestamp so fixtures compare equal across runs.
  pub fn epoch() -> NaiveDateTime {
    chrono::DateTime::from_timestamp(1_300_000_000, 0).map(|d| d.naive_utc()).unwrap_or_default()
  }

  pub fn gbt() -> NewTelescope {
    NewTelescope { name: Self::TELESCOPE.to_string(),
                   abbrev: "GBT".to_string(),
                   code: "GB".to_string(),
                   itrf_x: 882589.65,
                   itrf_y: -4924872.32,
                   itrf_z: 3943729.348,
                   latitude: Some(38.433),
                   longitude: Some(-79.84),
                   datum: Some("ITRF".to_string()) }
  }

  pub fn header(pulsar: &str) -> ArchiveHeader {
    ArchiveHeader { source: pulsar.to_string(),
                    telescope: "GBT".to_string(),
                    frontend: "Rcvr1_2".to_string(),
                    backend: "GUPPI".to_string(),
                    nbin: 2048,
                    nchan: 512,
                    npol: 4,
                    nsub: 10,
                    bw: -800.0,
                    freq: 1500.0,
                    length: 600.0,
                    mjd: 55000.25 }
  }

  /// An in-memory catalog holding one telescope (GBT), one observing system
  /// (GUPPI behind the L-band receiver) and pulsar J1909-3744.
  pub fn sample_catalog() -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    let seeded = Self::seed(&catalog);
    debug_assert!(seeded.is_ok(), "seeding an empty catalog cannot fail");
    catalog
  }

  /// Inserts the sample telescope, observing system and pulsar into any
  /// catalog. Returns (pulsar_id, obssystem_id).
  pub fn seed(catalog: &dyn Catalog) -> Result<(i64, i64), ToasterError> {
    let telescope_id = catalog.add_telescope(Self::gbt())?;
    let obssystem_id = catalog.add_obssystem(NewObsSystem { name: Self::OBSSYSTEM.to_string(),
                                                            telescope_id,
                                                            frontend: "Rcvr1_2".to_string(),
                                                            backend: "GUPPI".to_string(),
                                                            band_descriptor: Some("L-band".to_string()),
                                                            clock: None })?;
    let pulsar_id = catalog.add_pulsar(Self::PULSAR, &["1909-3744".to_string()])?;
    Ok((pulsar_id, obssystem_id))
  }

  /// Inserts a rawfile row (no file on disk) for the sample pulsar.
  pub fn sample_rawfile(catalog: &dyn Catalog, md5: &str) -> Result<i64, ToasterError> {
    let pulsar_id = Self::sample_pulsar_id(catalog)?;
    let system = catalog.obssystem_by_name(Self::OBSSYSTEM)?
                        .ok_or_else(|| ToasterError::UnrecognizedValue(Self::OBSSYSTEM.to_string()))?;
    catalog.insert_rawfile(NewRawfile { location: StoredPath { filepath: "/data/J1909-3744".to_string(),
                                                               filename: format!("guppi_{}.ar", md5) },
                                        md5: md5.to_string(),
                                        pulsar_id,
                                        obssystem_id: system.id,
                                        add_time: Self::epoch(),
                                        filesize: 1024,
                                        header: Self::header(Self::PULSAR) })
  }

  /// Inserts a parfile row for the sample pulsar and makes it the master.
  pub fn sample_master_parfile(catalog: &dyn Catalog, md5: &str) -> Result<i64, ToasterError> {
    let pulsar_id = Self::sample_pulsar_id(catalog)?;
    let mut params = IndexMap::new();
    params.insert("PSRJ".to_string(), Self::PULSAR.to_string());
    params.insert("F0".to_string(), "339.31568732018".to_string());
    let id = catalog.insert_parfile(NewParfile { location: StoredPath { filepath: "/data/parfiles".to_string(),
                                                                        filename: format!("{}.par", md5) },
                                                 md5: md5.to_string(),
                                                 pulsar_id,
                                                 add_time: Self::epoch(),
                                                 comments: None,
                                                 params,
                                                 extra_params: IndexMap::new() })?;
    catalog.set_master_parfile(pulsar_id, id)?;
    Ok(id)
  }

  /// Inserts a template row for the sample pulsar/obssystem and makes it the
  /// master.
  pub fn sample_master_template(catalog: &dyn Catalog, md5: &str) -> Result<i64, ToasterError> {
    let pulsar_id = Self::sample_pulsar_id(catalog)?;
    let system = catalog.obssystem_by_name(Self::OBSSYSTEM)?
                        .ok_or_else(|| ToasterError::UnrecognizedValue(Self::OBSSYSTEM.to_string()))?;
    let id = catalog.insert_template(NewTemplate { location: StoredPath { filepath: "/data/templates".to_string(),
                                                                          filename: format!("{}.std", md5) },
                                                   md5: md5.to_string(),
                                                   pulsar_id,
                                                   obssystem_id: system.id,
                                                   add_time: Self::epoch(),
                                                   comments: None })?;
    catalog.set_master_template(pulsar_id, system.id, id)?;
    Ok(id)
  }

  fn sample_pulsar_id(catalog: &dyn Catalog) -> Result<i64, ToasterError> {
    catalog.pulsar_id(Self::PULSAR)?.ok_or_else(|| ToasterError::UnrecognizedValue(Self::PULSAR.to_string()))
  }
}
