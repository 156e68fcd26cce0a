// version.rs
//
// Records which code produced a result: the pipeline checkout, the psrchive
// build and the tempo2 revision.
use log::{debug, warn};
use std::path::Path;
use toaster_domain::{Catalog, ToasterConfig, ToasterError, ToasterWarning, VersionStamp};
use toaster_providers::git::{head_commit, is_clean, psrchive_version};
use toaster_providers::ToolRunner;

pub struct VersionStamper<'a> {
  runner: &'a dyn ToolRunner,
  config: &'a ToasterConfig,
}

impl<'a> VersionStamper<'a> {
  pub fn new(runner: &'a dyn ToolRunner, config: &'a ToasterConfig) -> Self {
    Self { runner, config }
  }

  /// Hash of the pipeline checkout. A checkout with uncommitted changes is
  /// refused unless the `gittest` debug category is on.
  pub fn pipeline_hash(&self) -> Result<String, ToasterError> {
    let repo = &self.config.repo_dir;
    if !is_clean(self.runner, repo)? {
      if !self.config.debug.gittest {
        return Err(ToasterError::Toaster(format!("pipeline repository {} has uncommitted changes; commit them \
                                                  or enable the 'gittest' debug category",
                                                 repo.display())));
      }
      warn!("pipeline repository {} is dirty, continuing because gittest is on", repo.display());
    }
    Ok(head_commit(self.runner, repo)?)
  }

  /// Hash of the psrchive checkout, or its `--version` string when there is
  /// no usable checkout.
  pub fn library_hash(&self) -> Result<String, ToasterError> {
    if let Some(dir) = &self.config.psrchive_dir {
      match self.library_commit(dir) {
        Ok(hash) => return Ok(hash),
        Err(e) => debug!("{} is not a usable git checkout: {}", dir.display(), e),
      }
    }
    let version = psrchive_version(self.runner)?;
    ToasterWarning::LibraryVersionFallback { version: version.clone() }.emit();
    Ok(version)
  }

  fn library_commit(&self, dir: &Path) -> Result<String, ToasterError> {
    let hash = head_commit(self.runner, dir)?;
    if !is_clean(self.runner, dir)? {
      ToasterWarning::DirtyLibraryRepo { path: dir.display().to_string() }.emit();
    }
    Ok(hash)
  }

  pub fn stamp(&self) -> Result<VersionStamp, ToasterError> {
    Ok(VersionStamp { pipeline_hash: self.pipeline_hash()?,
                      library_hash: self.library_hash()?,
                      tempo2_revision: self.config.tempo2_revision.clone() })
  }

  /// Id of the version row for the current code, inserted when new.
  pub fn current_version_id(&self, catalog: &dyn Catalog) -> Result<i64, ToasterError> {
    let stamp = self.stamp()?;
    let id = catalog.version_id(&stamp)?;
    debug!("running as version {} ({})", id, stamp.pipeline_hash);
    Ok(id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use toaster_domain::{DebugFlags, InMemoryCatalog};
  use toaster_providers::{StubRunner, ToolExit};

  const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

  /// `git diff --quiet` answers `diff_code`, everything else prints HASH.
  fn git(diff_code: i32) -> StubRunner {
    StubRunner::new().respond("git", move |cmd| {
                       if cmd.get_args().iter().any(|a| a == "diff") {
                         Ok(ToolExit { code: diff_code, ..Default::default() })
                       } else {
                         Ok(ToolExit { code: 0, stdout: format!("{}\n", HASH), stderr: String::new() })
                       }
                     })
  }

  #[test]
  fn clean_checkout_yields_a_stable_version_row() {
    let runner = git(0).reply("psrchive", "psrchive 2012-12+\n");
    let cfg = ToasterConfig::new("unused", "/tmp");
    let cat = InMemoryCatalog::new();
    let stamper = VersionStamper::new(&runner, &cfg);
    let id = stamper.current_version_id(&cat).unwrap();
    assert_eq!(stamper.current_version_id(&cat).unwrap(), id);
    let stamp = stamper.stamp().unwrap();
    assert_eq!(stamp.pipeline_hash, HASH);
    assert_eq!(stamp.library_hash, "psrchive 2012-12+");
  }

  #[test]
  fn dirty_checkout_needs_gittest() {
    let runner = git(1);
    let cfg = ToasterConfig::new("unused", "/tmp");
    let err = VersionStamper::new(&runner, &cfg).pipeline_hash().unwrap_err();
    assert_eq!(err.kind(), "ToasterError");

    let cfg = cfg.with_debug(DebugFlags::parse("gittest").unwrap());
    assert_eq!(VersionStamper::new(&runner, &cfg).pipeline_hash().unwrap(), HASH);
  }

  #[test]
  fn library_checkout_hash_is_preferred() {
    let runner = git(0);
    let mut cfg = ToasterConfig::new("unused", "/tmp");
    cfg.psrchive_dir = Some("/opt/psrchive".into());
    assert_eq!(VersionStamper::new(&runner, &cfg).library_hash().unwrap(), HASH);
    assert!(runner.calls_to("psrchive").is_empty());
  }
}
