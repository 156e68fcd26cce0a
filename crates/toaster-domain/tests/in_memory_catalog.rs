use indexmap::IndexMap;
use std::fs;
use toaster_domain::*;

fn process(rawfile_id: i64, parfile_id: i64, template_id: i64, args: &str) -> NewProcess {
  NewProcess { rawfile_id,
               parfile_id,
               template_id,
               user_name: "tester".into(),
               manipulator: "pamit".into(),
               manipulator_args: args.into(),
               start_time: DomainStubs::epoch(),
               end_time: DomainStubs::epoch(),
               status: "success".into() }
}

fn measurement(imjd: i32, fmjd: f64) -> ToaMeasurement {
  ToaMeasurement { freq: 1400.0,
                   imjd,
                   fmjd,
                   toa_unc_us: 0.75,
                   goodness_of_fit: Some(1.02),
                   bw: Some(800.0),
                   length: Some(600.0),
                   nbin: Some(2048),
                   flags: IndexMap::new() }
}

fn stamp() -> VersionStamp {
  VersionStamp { pipeline_hash: "a".repeat(40), library_hash: "b".repeat(40), tempo2_revision: None }
}

#[test]
fn merge_moves_every_reference_onto_the_destination() {
  let cat = DomainStubs::sample_catalog();
  let (dest, obs) = (cat.pulsar_id(DomainStubs::PULSAR).unwrap().unwrap(),
                     cat.obssystem_by_name(DomainStubs::OBSSYSTEM).unwrap().unwrap().id);
  let src = cat.add_pulsar("J1909-3744X", &["B1909-37".to_string()]).unwrap();
  let par = cat.insert_parfile(NewParfile { location: StoredPath { filepath: "/p".into(), filename: "x.par".into() },
                                            md5: "p1".into(),
                                            pulsar_id: src,
                                            add_time: DomainStubs::epoch(),
                                            comments: None,
                                            params: IndexMap::new(),
                                            extra_params: IndexMap::new() })
               .unwrap();
  cat.set_master_parfile(src, par).unwrap();
  let raw = cat.insert_rawfile(NewRawfile { location: StoredPath { filepath: "/r".into(), filename: "x.ar".into() },
                                            md5: "r1".into(),
                                            pulsar_id: src,
                                            obssystem_id: obs,
                                            add_time: DomainStubs::epoch(),
                                            filesize: 10,
                                            header: DomainStubs::header("J1909-3744X") })
               .unwrap();

  cat.merge_pulsar(src, dest).unwrap();

  assert!(cat.get_pulsar(src).unwrap().is_none());
  assert_eq!(cat.get_parfile(par).unwrap().unwrap().parfile.pulsar_id, dest);
  assert_eq!(cat.get_rawfile(raw).unwrap().unwrap().rawfile.pulsar_id, dest);
  let aliases = cat.aliases(dest).unwrap();
  assert!(aliases.contains(&"J1909-3744X".to_string()));
  assert!(aliases.contains(&"B1909-37".to_string()));
  assert_eq!(cat.master_parfile(dest).unwrap(), Some(par));
  assert!(cat.parfiles_for_pulsar(src).unwrap().is_empty());
  assert!(cat.rawfiles_for_pulsar(src).unwrap().is_empty());
}

#[test]
fn record_toas_refuses_conflicts_unless_allowed() {
  let cat = DomainStubs::sample_catalog();
  let raw = DomainStubs::sample_rawfile(&cat, "raw1").unwrap();
  let par = DomainStubs::sample_master_parfile(&cat, "par1").unwrap();
  let tmp = DomainStubs::sample_master_template(&cat, "tmp1").unwrap();
  let version = cat.version_id(&stamp()).unwrap();
  assert_eq!(cat.version_id(&stamp()).unwrap(), version);
  let rawfile = cat.get_rawfile(raw).unwrap().unwrap();
  let prov = ToaProvenance { rawfile_id: raw,
                             parfile_id: par,
                             template_id: tmp,
                             pulsar_id: rawfile.rawfile.pulsar_id,
                             obssystem_id: rawfile.rawfile.obssystem_id };
  let args = r#"{"nchan":1,"nsub":1}"#;

  let (pid, ids) =
    cat.record_toas(process(raw, par, tmp, args), &stamp(), prov, vec![measurement(55000, 0.25), measurement(55000, 0.5)], false)
       .unwrap();
  assert_eq!(ids.len(), 2);
  for id in &ids {
    let toa = cat.get_toa(*id).unwrap().unwrap();
    assert_eq!(toa.process_id, pid);
    assert_eq!(toa.provenance.pulsar_id, rawfile.rawfile.pulsar_id);
  }
  // Parsed order is kept.
  let stored: Vec<f64> = cat.toas_for_process(pid).unwrap().iter().map(|t| t.measurement.fmjd).collect();
  assert_eq!(stored, [0.25, 0.5]);

  let err = cat.record_toas(process(raw, par, tmp, args), &stamp(), prov, vec![measurement(55000, 0.25)], false)
               .unwrap_err();
  assert_eq!(err.kind(), "ConflictingToasError");
  assert_eq!(cat.processes_for_rawfile(raw).unwrap().len(), 1);
  assert_eq!(cat.processes_for_rawfile(raw).unwrap()[0].version_id, version);

  // Different manipulator arguments are a different computation.
  cat.record_toas(process(raw, par, tmp, r#"{"nchan":4,"nsub":1}"#), &stamp(), prov, vec![measurement(55000, 0.3)], false)
     .unwrap();
  cat.record_toas(process(raw, par, tmp, args), &stamp(), prov, vec![measurement(55000, 0.25)], true).unwrap();
  assert_eq!(cat.processes_for_rawfile(raw).unwrap().len(), 3);

  // Referenced parfiles and templates cannot be deleted.
  assert_eq!(cat.delete_parfile(par).unwrap_err().kind(), "BadInputError");
  assert_eq!(cat.delete_template(tmp).unwrap_err().kind(), "BadInputError");
}

#[test]
fn unreferenced_master_parfile_can_be_deleted_and_clears_designation() {
  let cat = DomainStubs::sample_catalog();
  let par = DomainStubs::sample_master_parfile(&cat, "par1").unwrap();
  let pulsar = cat.pulsar_id(DomainStubs::PULSAR).unwrap().unwrap();
  cat.delete_parfile(par).unwrap();
  assert_eq!(cat.master_parfile(pulsar).unwrap(), None);
}

#[test]
fn select_toas_filters_and_orders() {
  let cat = DomainStubs::sample_catalog();
  let raw = DomainStubs::sample_rawfile(&cat, "raw1").unwrap();
  let par = DomainStubs::sample_master_parfile(&cat, "par1").unwrap();
  let tmp = DomainStubs::sample_master_template(&cat, "tmp1").unwrap();
  let r = cat.get_rawfile(raw).unwrap().unwrap().rawfile;
  let prov = ToaProvenance { rawfile_id: raw,
                             parfile_id: par,
                             template_id: tmp,
                             pulsar_id: r.pulsar_id,
                             obssystem_id: r.obssystem_id };
  cat.record_toas(process(raw, par, tmp, "{}"),
                  &stamp(),
                  prov,
                  vec![measurement(55002, 0.1), measurement(55000, 0.9), measurement(55001, 0.5)],
                  false)
     .unwrap();

  let all = cat.select_toas(&ToaFilter::new().pulsar(DomainStubs::PULSAR)).unwrap();
  let mjds: Vec<i32> = all.iter().map(|t| t.imjd).collect();
  assert_eq!(mjds, [55000, 55001, 55002]);
  assert!(all.iter().all(|t| t.obscode == "GB" && t.rawfile_name == "guppi_raw1.ar"));

  let some = cat.select_toas(&ToaFilter::new().mjd_range(55000.5, 55001.9)).unwrap();
  assert_eq!(some.len(), 2);
  assert!(cat.select_toas(&ToaFilter::new().observatories(["AO"])).unwrap().is_empty());
}

#[test]
fn opinions_need_force_to_be_replaced() {
  let cat = DomainStubs::sample_catalog();
  let raw = DomainStubs::sample_rawfile(&cat, "raw1").unwrap();
  let par = DomainStubs::sample_master_parfile(&cat, "par1").unwrap();
  let tmp = DomainStubs::sample_master_template(&cat, "tmp1").unwrap();
  let r = cat.get_rawfile(raw).unwrap().unwrap().rawfile;
  let prov = ToaProvenance { rawfile_id: raw,
                             parfile_id: par,
                             template_id: tmp,
                             pulsar_id: r.pulsar_id,
                             obssystem_id: r.obssystem_id };
  let (_, ids) = cat.record_toas(process(raw, par, tmp, "{}"), &stamp(), prov, vec![measurement(55000, 0.1)], false)
                    .unwrap();
  let user = cat.add_user(NewUser { user_name: "plazar".into(),
                                    real_name: "P. Lazarus".into(),
                                    email: "p@example.org".into() })
                .unwrap();
  let bad = Opinion { user_id: user, toa_id: ids[0], is_bad: Some(true), comments: Some("RFI".into()) };
  cat.set_opinion(bad.clone(), false).unwrap();
  let good = Opinion { is_bad: Some(false), comments: None, ..bad };
  assert_eq!(cat.set_opinion(good.clone(), false).unwrap_err().kind(), "BadInputError");
  cat.set_opinion(good.clone(), true).unwrap();
  assert_eq!(cat.opinion(user, ids[0]).unwrap(), Some(good));
}

#[test]
fn move_file_updates_row_and_disk_together() {
  let dir = tempfile::tempdir().unwrap();
  let cat = DomainStubs::sample_catalog();
  let raw = DomainStubs::sample_rawfile(&cat, "raw1").unwrap();
  let old = dir.path().join("old").join("guppi.ar");
  fs::create_dir_all(old.parent().unwrap()).unwrap();
  fs::write(&old, b"data").unwrap();
  cat.relocate_file(FileKind::Rawfile, raw, &old, &mut |_: &std::path::Path| Ok(())).unwrap();

  let new = dir.path().join("new").join("guppi.ar");
  move_file(&cat, FileKind::Rawfile, raw, &new).unwrap();
  assert!(new.exists());
  assert!(!old.exists());
  assert_eq!(cat.get_rawfile(raw).unwrap().unwrap().rawfile.location.path(), new);

  // Destination taken: nothing changes.
  fs::write(&old, b"other").unwrap();
  let err = move_file(&cat, FileKind::Rawfile, raw, &old).unwrap_err();
  assert_eq!(err.kind(), "FileError");
  assert_eq!(cat.get_rawfile(raw).unwrap().unwrap().rawfile.location.path(), new);
  assert!(new.exists());
}

#[test]
fn move_file_with_missing_source_leaves_row_untouched() {
  let dir = tempfile::tempdir().unwrap();
  let cat = DomainStubs::sample_catalog();
  let raw = DomainStubs::sample_rawfile(&cat, "raw1").unwrap();
  let before = cat.get_rawfile(raw).unwrap().unwrap().rawfile.location;
  let new = dir.path().join("guppi.ar");
  assert_eq!(move_file(&cat, FileKind::Rawfile, raw, &new).unwrap_err().kind(), "FileError");
  assert!(!new.exists());
  assert_eq!(cat.get_rawfile(raw).unwrap().unwrap().rawfile.location, before);
}
