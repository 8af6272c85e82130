//! Keystore provisioning for a list of services.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bundle;
use crate::cert::{Identity, SubjectTemplate};
use crate::workdir::WorkDir;

/// Password used when nothing else is configured.
pub const DEFAULT_PASSWORD: &str = "changeit";

/// One keystore to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySpec {
    /// Common name of the certificate, also the keystore alias.
    pub common_name: String,
    /// Where the keystore is written, relative to the work directory.
    pub output_path: PathBuf,
}

impl IdentitySpec {
    pub fn new(common_name: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            common_name: common_name.into(),
            output_path: output_path.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStatus {
    /// A new keystore was written.
    Generated,
    /// The keystore already existed and was left alone.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub common_name: String,
    pub path: PathBuf,
    pub status: ProvisionStatus,
}

#[allow(clippy::duplicated_attributes)]
#[derive(Clone, Debug, bon::Builder)]
#[builder(on(String, into))]
#[builder(on(PathBuf, into))]
pub struct ProvisionConfig {
    identities: Vec<IdentitySpec>,
    password: String,
    #[builder(default)]
    subject: SubjectTemplate,
    #[builder(default = PathBuf::from("."))]
    workdir: PathBuf,
    #[builder(default = false)]
    skip_existing: bool,
}

impl ProvisionConfig {
    /// Generate every configured keystore in order and collect the outcomes.
    pub fn provision(&self) -> Result<Vec<ProvisionOutcome>> {
        let mut outcomes = Vec::with_capacity(self.identities.len());
        self.provision_each(|outcome| outcomes.push(outcome.clone()))?;
        Ok(outcomes)
    }

    /// Generate every configured keystore in order, reporting each one as soon
    /// as it is on disk.
    ///
    /// Stops at the first failure. Keystores written before it are kept.
    pub fn provision_each(&self, mut report: impl FnMut(&ProvisionOutcome)) -> Result<()> {
        let workdir = WorkDir::new(&self.workdir);
        for spec in &self.identities {
            let outcome = self
                .provision_one(&workdir, spec)
                .with_context(|| format!("Failed to provision keystore for {}", spec.common_name))?;
            report(&outcome);
        }
        Ok(())
    }

    fn provision_one(&self, workdir: &WorkDir, spec: &IdentitySpec) -> Result<ProvisionOutcome> {
        let path = workdir.resolve(&spec.output_path);
        if self.skip_existing && path.exists() {
            info!(
                "keystore for {} already exists at {}, skipping",
                spec.common_name,
                path.display()
            );
            return Ok(ProvisionOutcome {
                common_name: spec.common_name.clone(),
                path,
                status: ProvisionStatus::Skipped,
            });
        }
        let identity = Identity::generate(&spec.common_name, &self.subject)?;
        let der = bundle::seal(&identity, &spec.common_name, &self.password)?;
        write_bundle(&path, &der)?;
        info!(
            "generated keystore for {} at {}",
            spec.common_name,
            path.display()
        );
        Ok(ProvisionOutcome {
            common_name: spec.common_name.clone(),
            path,
            status: ProvisionStatus::Generated,
        })
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create keystore directory")?;
    }
    Ok(())
}

/// Write bundle bytes to `path`, replacing whatever was there.
pub fn write_bundle(path: &Path, der: &[u8]) -> Result<()> {
    ensure_parent_dir(path)?;
    fs::write(path, der).context("Failed to write keystore")?;
    Ok(())
}
