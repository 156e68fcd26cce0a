use indexmap::IndexMap;
use std::fs;
use tempfile::TempDir;
use toaster_domain::parfile::parse_parfile;
use toaster_domain::*;
use toaster_persistence::{new_sqlite_for_test, DieselCatalog};

fn setup() -> (TempDir, DieselCatalog) {
  let dir = tempfile::tempdir().expect("tempdir");
  let cat = new_sqlite_for_test(&dir.path().join("toaster.db")).expect("catalog");
  DomainStubs::seed(&cat).expect("seed");
  (dir, cat)
}

fn stamp() -> VersionStamp {
  VersionStamp { pipeline_hash: "a".repeat(40), library_hash: "b".repeat(40), tempo2_revision: Some("1.2".into()) }
}

fn process(raw: i64, par: i64, tmp: i64, args: &str) -> NewProcess {
  NewProcess { rawfile_id: raw,
               parfile_id: par,
               template_id: tmp,
               user_name: "tester".into(),
               manipulator: "pamit".into(),
               manipulator_args: args.into(),
               start_time: DomainStubs::epoch(),
               end_time: DomainStubs::epoch(),
               status: "success".into() }
}

fn measurement(imjd: i32, fmjd: f64, freq: f64) -> ToaMeasurement {
  let mut flags = IndexMap::new();
  flags.insert("fe".to_string(), "Rcvr1_2".to_string());
  ToaMeasurement { freq,
                   imjd,
                   fmjd,
                   toa_unc_us: 0.5,
                   goodness_of_fit: Some(1.1),
                   bw: Some(200.0),
                   length: Some(600.0),
                   nbin: Some(2048),
                   flags }
}

/// Rawfile, master parfile, master template and version of the sample pulsar.
fn fixtures(cat: &DieselCatalog) -> (i64, i64, i64, i64, ToaProvenance) {
  let raw = DomainStubs::sample_rawfile(cat, "raw1").unwrap();
  let par = DomainStubs::sample_master_parfile(cat, "par1").unwrap();
  let tmp = DomainStubs::sample_master_template(cat, "tmp1").unwrap();
  let version = cat.version_id(&stamp()).unwrap();
  let r = cat.get_rawfile(raw).unwrap().unwrap().rawfile;
  let prov = ToaProvenance { rawfile_id: raw,
                             parfile_id: par,
                             template_id: tmp,
                             pulsar_id: r.pulsar_id,
                             obssystem_id: r.obssystem_id };
  (raw, par, tmp, version, prov)
}

#[test]
fn migrations_seed_and_lookups() {
  let (_dir, cat) = setup();
  let id = cat.pulsar_id("J1909-3744").unwrap().unwrap();
  assert_eq!(cat.pulsar_id("1909-3744").unwrap(), Some(id));
  assert_eq!(cat.pulsar_id("J0000+0000").unwrap(), None);
  assert_eq!(cat.aliases(id).unwrap(), ["J1909-3744", "1909-3744"]);

  let sys = cat.find_obssystem("gbt", "rcvr1_2", "guppi").unwrap().unwrap();
  assert_eq!(sys.system.name, DomainStubs::OBSSYSTEM);
  assert_eq!(cat.obssystem_by_name("gbt_guppi_l").unwrap().unwrap().id, sys.id);
  assert!(cat.find_obssystem("Arecibo", "L-wide", "PUPPI").unwrap().is_none());

  let err = cat.add_pulsar("J1910-0000", &["1909-3744".to_string()]).unwrap_err();
  assert_eq!(err.kind(), "BadInputError");
  assert_eq!(cat.add_telescope(DomainStubs::gbt()).unwrap_err().kind(), "BadInputError");
}

#[test]
fn parfile_parameters_survive_storage() {
  let (_dir, cat) = setup();
  let pulsar = cat.pulsar_id(DomainStubs::PULSAR).unwrap().unwrap();
  let parsed = parse_parfile("PSRJ J1909-3744\nF0 339.315 1 0.0001\nBINARY ELL1\nJUMP -fe L-wide 0.1\n");
  let id = cat.insert_parfile(NewParfile { location: StoredPath { filepath: "/data".into(), filename: "a.par".into() },
                                           md5: "abc".into(),
                                           pulsar_id: pulsar,
                                           add_time: DomainStubs::epoch(),
                                           comments: Some("initial".into()),
                                           params: parsed.params.clone(),
                                           extra_params: parsed.extra_params.clone() })
               .unwrap();
  let stored = cat.get_parfile(id).unwrap().unwrap().parfile;
  assert_eq!(stored.params.get("BINARY_MODEL").map(String::as_str), Some("ELL1"));
  assert_eq!(stored.params.get("F0").map(String::as_str), Some("339.315"));
  assert_eq!(stored.extra_params, parsed.extra_params);
  assert_eq!(cat.parfile_by_md5("abc").unwrap(), Some(id));
  assert_eq!(cat.parfile_by_md5("zzz").unwrap(), None);
}

#[test]
fn record_toas_is_atomic_and_detects_conflicts() {
  let (_dir, cat) = setup();
  let (raw, par, tmp, version, prov) = fixtures(&cat);
  assert_eq!(cat.version_id(&stamp()).unwrap(), version);

  let args = r#"{"nchan":1,"nsub":1}"#;
  let (pid, ids) = cat.record_toas(process(raw, par, tmp, args),
                                   &stamp(),
                                   prov,
                                   vec![measurement(55000, 0.25, 1400.0), measurement(55000, 0.75, 1500.0)],
                                   false)
                      .unwrap();
  assert_eq!(ids.len(), 2);
  let toa = cat.get_toa(ids[1]).unwrap().unwrap();
  assert_eq!(toa.process_id, pid);
  assert_eq!(toa.measurement.flags.get("fe").map(String::as_str), Some("Rcvr1_2"));
  assert!(cat.toas_exist_for(&process(raw, par, tmp, args).key()).unwrap());

  let err = cat.record_toas(process(raw, par, tmp, args), &stamp(), prov, vec![measurement(55001, 0.1, 1400.0)], false)
               .unwrap_err();
  assert_eq!(err.kind(), "ConflictingToasError");
  assert_eq!(cat.processes_for_rawfile(raw).unwrap().len(), 1);
  assert_eq!(cat.toas_for_process(pid).unwrap().len(), 2);
  assert_eq!(cat.processes_for_rawfile(raw).unwrap()[0].version_id, version);
  assert_eq!(cat.get_version(version).unwrap(), Some(stamp()));

  cat.record_toas(process(raw, par, tmp, args), &stamp(), prov, vec![measurement(55001, 0.1, 1400.0)], true).unwrap();
  assert_eq!(cat.processes_for_rawfile(raw).unwrap().len(), 2);

  assert_eq!(cat.delete_parfile(par).unwrap_err().kind(), "BadInputError");
  assert_eq!(cat.delete_template(tmp).unwrap_err().kind(), "BadInputError");
}

#[test]
fn version_is_written_with_the_process() {
  let (_dir, cat) = setup();
  let (raw, par, tmp, version, prov) = fixtures(&cat);
  let newer = VersionStamp { pipeline_hash: "c".repeat(40), ..stamp() };
  cat.record_toas(process(raw, par, tmp, "{}"), &stamp(), prov, vec![measurement(55000, 0.5, 1400.0)], false)
     .unwrap();

  // A conflicting insert leaves no version row behind.
  let err = cat.record_toas(process(raw, par, tmp, "{}"), &newer, prov, vec![], false).unwrap_err();
  assert_eq!(err.kind(), "ConflictingToasError");
  assert_eq!(cat.get_version(version + 1).unwrap(), None);

  // A process may carry no TOAs at all.
  let (pid, ids) = cat.record_toas(process(raw, par, tmp, r#"{"nsub":2}"#), &newer, prov, vec![], false).unwrap();
  assert!(ids.is_empty());
  let stored = cat.processes_for_rawfile(raw).unwrap();
  let process = stored.iter().find(|p| p.id == pid).unwrap();
  assert_eq!(cat.get_version(process.version_id).unwrap(), Some(newer));
  assert!(cat.toas_for_process(pid).unwrap().is_empty());
}

#[test]
fn merge_repoints_everything_and_drops_the_source() {
  let (_dir, cat) = setup();
  let dest = cat.pulsar_id(DomainStubs::PULSAR).unwrap().unwrap();
  let (raw, par, tmp, _, _) = fixtures(&cat);
  let obs = cat.obssystem_by_name(DomainStubs::OBSSYSTEM).unwrap().unwrap().id;

  let src = cat.add_pulsar("J1909-3744B", &["B1906-37".to_string()]).unwrap();
  let src_par = cat.insert_parfile(NewParfile { location: StoredPath { filepath: "/p".into(), filename: "b.par".into() },
                                                md5: "p2".into(),
                                                pulsar_id: src,
                                                add_time: DomainStubs::epoch(),
                                                comments: None,
                                                params: IndexMap::new(),
                                                extra_params: IndexMap::new() })
                   .unwrap();
  cat.set_master_parfile(src, src_par).unwrap();
  let src_raw = cat.insert_rawfile(NewRawfile { location: StoredPath { filepath: "/r".into(), filename: "b.ar".into() },
                                                md5: "r2".into(),
                                                pulsar_id: src,
                                                obssystem_id: obs,
                                                add_time: DomainStubs::epoch(),
                                                filesize: 10,
                                                header: DomainStubs::header("J1909-3744B") })
                   .unwrap();
  let prov = ToaProvenance { rawfile_id: src_raw,
                             parfile_id: par,
                             template_id: tmp,
                             pulsar_id: src,
                             obssystem_id: obs };
  let (_, ids) =
    cat.record_toas(process(src_raw, par, tmp, "{}"), &stamp(), prov, vec![measurement(55002, 0.5, 1400.0)], false)
       .unwrap();
  let user = cat.add_user(NewUser { user_name: "curator".into(), real_name: "C".into(), email: "c@x".into() })
                .unwrap();
  cat.add_curator(src, user).unwrap();
  cat.add_curator(dest, user).unwrap();

  cat.merge_pulsar(src, dest).unwrap();

  assert!(cat.get_pulsar(src).unwrap().is_none());
  assert_eq!(cat.pulsar_id("B1906-37").unwrap(), Some(dest));
  assert_eq!(cat.pulsar_id("J1909-3744B").unwrap(), Some(dest));
  assert_eq!(cat.get_rawfile(src_raw).unwrap().unwrap().rawfile.pulsar_id, dest);
  assert_eq!(cat.get_parfile(src_par).unwrap().unwrap().parfile.pulsar_id, dest);
  assert_eq!(cat.get_toa(ids[0]).unwrap().unwrap().provenance.pulsar_id, dest);
  // The destination already had a master parfile, which wins.
  assert_eq!(cat.master_parfile(dest).unwrap(), Some(par));
  assert_eq!(cat.curators(dest).unwrap(), [user]);
  assert_eq!(cat.rawfiles_for_pulsar(dest).unwrap().iter().map(|r| r.id).collect::<Vec<_>>(), [raw, src_raw]);

  assert_eq!(cat.merge_pulsar(dest, dest).unwrap_err().kind(), "BadInputError");
  assert_eq!(cat.merge_pulsar(src, dest).unwrap_err().kind(), "UnrecognizedValueError");
}

#[test]
fn select_toas_filters_in_sql_and_in_memory() {
  let (_dir, cat) = setup();
  let (raw, par, tmp, _, prov) = fixtures(&cat);
  let (_, ids) = cat.record_toas(process(raw, par, tmp, "{}"),
                                 &stamp(),
                                 prov,
                                 vec![measurement(55003, 0.1, 820.0),
                                      measurement(55000, 0.9, 1400.0),
                                      measurement(55001, 0.5, 1400.0)],
                                 false)
                    .unwrap();

  let all = cat.select_toas(&ToaFilter::new().pulsar("J1909-3744")).unwrap();
  assert_eq!(all.iter().map(|t| t.imjd).collect::<Vec<_>>(), [55000, 55001, 55003]);
  assert!(all.iter().all(|t| t.obscode == "GB" && t.rawfile_name == "guppi_raw1.ar"));

  let window = cat.select_toas(&ToaFilter::new().mjd_range(55000.95, 55003.05)).unwrap();
  assert_eq!(window.iter().map(|t| t.imjd).collect::<Vec<_>>(), [55001]);

  let low = cat.select_toas(&ToaFilter::new().freq_range(700.0, 900.0).observatories(["gb"])).unwrap();
  assert_eq!(low.len(), 1);
  assert_eq!(low[0].toa_id, ids[0]);

  assert!(cat.select_toas(&ToaFilter::new().observatories(["AO"])).unwrap().is_empty());
  assert!(cat.select_toas(&ToaFilter::new().pulsar("J0000+0000")).unwrap().is_empty());
  assert_eq!(cat.select_toas(&ToaFilter::new().toa_ids([ids[2]])).unwrap().len(), 1);
}

#[test]
fn diagnostics_replace_per_plugin() {
  let (_dir, cat) = setup();
  let raw = DomainStubs::sample_rawfile(&cat, "raw1").unwrap();
  let diag = |value| NewDiagnostic { rawfile_id: raw, plugin: "snr".into(), value, add_time: DomainStubs::epoch() };
  cat.replace_diagnostic(diag(DiagnosticValue::Float(12.5))).unwrap();
  cat.replace_diagnostic(diag(DiagnosticValue::Float(13.0))).unwrap();
  cat.replace_diagnostic(NewDiagnostic { plugin: "weights".into(),
                                         ..diag(DiagnosticValue::FloatArray(vec![1.0, 0.0, 1.0])) })
     .unwrap();
  let stored = cat.diagnostics_for_rawfile(raw).unwrap();
  assert_eq!(stored.len(), 2);
  assert_eq!(stored[0].diagnostic.value, DiagnosticValue::Float(13.0));
  assert_eq!(stored[1].diagnostic.value, DiagnosticValue::FloatArray(vec![1.0, 0.0, 1.0]));
}

#[test]
fn timfiles_and_opinions_round_trip() {
  let (_dir, cat) = setup();
  let (raw, par, tmp, version, prov) = fixtures(&cat);
  let (_, ids) = cat.record_toas(process(raw, par, tmp, "{}"),
                                 &stamp(),
                                 prov,
                                 vec![measurement(55000, 0.1, 1400.0), measurement(55001, 0.2, 1400.0)],
                                 false)
                    .unwrap();
  let user = cat.add_user(NewUser { user_name: "plazar".into(), real_name: "P".into(), email: "p@x".into() }).unwrap();
  let tim = NewTimfile { pulsar_id: prov.pulsar_id,
                         user_id: Some(user),
                         version_id: version,
                         comments: Some("first cut".into()),
                         add_time: DomainStubs::epoch() };
  let tid = cat.record_timfile(tim.clone(), &ids).unwrap();
  let stored = cat.timfiles_for_pulsar(prov.pulsar_id).unwrap();
  assert_eq!(stored.len(), 1);
  assert_eq!(stored[0].id, tid);
  assert_eq!(stored[0].toa_ids, ids);
  assert_eq!(cat.record_timfile(tim, &[ids[0], 9999]).unwrap_err().kind(), "UnrecognizedValueError");

  let op = Opinion { user_id: user, toa_id: ids[0], is_bad: Some(true), comments: None };
  cat.set_opinion(op.clone(), false).unwrap();
  assert_eq!(cat.set_opinion(op.clone(), false).unwrap_err().kind(), "BadInputError");
  let flipped = Opinion { is_bad: Some(false), ..op };
  cat.set_opinion(flipped.clone(), true).unwrap();
  assert_eq!(cat.opinion(user, ids[0]).unwrap(), Some(flipped));
}

#[test]
fn move_file_keeps_row_and_disk_in_step() {
  let (dir, cat) = setup();
  let raw = DomainStubs::sample_rawfile(&cat, "raw1").unwrap();
  let old = dir.path().join("incoming").join("guppi.ar");
  fs::create_dir_all(old.parent().unwrap()).unwrap();
  fs::write(&old, b"archive").unwrap();
  cat.relocate_file(FileKind::Rawfile, raw, &old, &mut |_: &std::path::Path| Ok(())).unwrap();

  let new = dir.path().join("archive").join("guppi.ar");
  move_file(&cat, FileKind::Rawfile, raw, &new).unwrap();
  assert!(new.exists() && !old.exists());
  assert_eq!(cat.get_rawfile(raw).unwrap().unwrap().rawfile.location.path(), new);

  // A failing operation rolls the row back.
  let err = cat.relocate_file(FileKind::Rawfile, raw, &old, &mut |_: &std::path::Path| {
                 Err(ToasterError::File("disk full".into()))
               })
               .unwrap_err();
  assert_eq!(err.kind(), "FileError");
  assert_eq!(cat.get_rawfile(raw).unwrap().unwrap().rawfile.location.path(), new);
}
