//! Job files: a pipeline document plus where records come from and where
//! each destination id is written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _};
use munger_pipeline::{PipelineSpec, WriteErrorPolicy};
use munger_types::DestinationId;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub pipeline: PipelineSpec,
    /// Input CSV. Overridden by `--input`.
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub destinations: BTreeMap<DestinationId, DestinationConfig>,
    #[serde(default)]
    pub on_write_error: WriteErrorPolicy,
}

/// One output file. Exactly one of `path` or `suffix` is set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Derive the file name from the source: `<stem>-<suffix>.<ext>`.
    #[serde(default)]
    pub suffix: Option<String>,
    /// Column list. Defaults to the fields of the first record written.
    #[serde(default)]
    pub fieldnames: Option<Vec<String>>,
    /// Append a `ValidationErrors` column with the record's diagnostics.
    #[serde(default)]
    pub include_errors: bool,
}

/// A destination with its file path worked out.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDestination {
    pub path: PathBuf,
    pub fieldnames: Option<Vec<String>>,
    pub include_errors: bool,
}

impl JobConfig {
    /// Read a job file. Relative paths inside it are taken relative to the
    /// job file's directory.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("reading job file {}", path.display()))?;
        let mut job: JobConfig = serde_json::from_str(&source)
            .with_context(|| format!("parsing job file {}", path.display()))?;
        if let Some(base) = path.parent() {
            job.rebase(base);
        }
        Ok(job)
    }

    fn rebase(&mut self, base: &Path) {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(source) = self.source.as_mut() {
            rebase(source);
        }
        for dest in self.destinations.values_mut() {
            if let Some(path) = dest.path.as_mut() {
                rebase(path);
            }
        }
    }

    /// Fail if a hook names a destination this job does not configure.
    pub fn check_destinations<'a>(&self, referenced: impl IntoIterator<Item = &'a str>) -> anyhow::Result<()> {
        let missing: Vec<&str> = referenced
            .into_iter()
            .filter(|d| !self.destinations.contains_key(*d))
            .collect();
        if !missing.is_empty() {
            bail!("hooks reference undeclared destination(s): {}", missing.join(", "));
        }
        Ok(())
    }

    /// Work out every destination's file path against the input file.
    pub fn resolve_destinations(
        &self,
        source: Option<&Path>,
    ) -> anyhow::Result<BTreeMap<DestinationId, ResolvedDestination>> {
        self.destinations
            .iter()
            .map(|(id, dest)| Ok((id.clone(), dest.resolve(id, source)?)))
            .collect()
    }
}

impl DestinationConfig {
    pub fn resolve(&self, id: &str, source: Option<&Path>) -> anyhow::Result<ResolvedDestination> {
        let path = match (&self.path, &self.suffix) {
            (Some(path), None) => path.clone(),
            (None, Some(suffix)) => {
                let source = source.with_context(|| {
                    format!("destination '{id}' uses a suffix but the job has no source file")
                })?;
                suffixed_path(source, suffix)
            }
            (Some(_), Some(_)) => bail!("destination '{id}' sets both path and suffix"),
            (None, None) => bail!("destination '{id}' needs a path or a suffix"),
        };
        Ok(ResolvedDestination {
            path,
            fieldnames: self.fieldnames.clone(),
            include_errors: self.include_errors,
        })
    }
}

/// `dir/input.csv` + `errors` -> `dir/input-errors.csv`.
pub fn suffixed_path(source: &Path, suffix: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = source
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());
    source.with_file_name(format!("{stem}-{suffix}.{ext}"))
}
