use std::path::{Path, PathBuf};

use crate::testing::TestPaths;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Refusing to use '{0}' as {1}: it would wipe '{2}'")]
    WouldWipe(PathBuf, &'static str, PathBuf),

    #[error("Scratch dir '{0}' and failure dir '{1}' must not contain one another")]
    Overlap(PathBuf, PathBuf),

    #[error(transparent)]
    Fs(#[from] fsutil::Error),
}

/// Scratch and failure-artifact directories of one run.
///
/// Both are emptied on [`Workdir::prepare`]. The scratch dir is removed again when the
/// value is closed or dropped, so it also goes away on early return and on interruption.
/// The failure dir is kept for inspection.
#[derive(Debug)]
pub struct Workdir {
    scratch_dir: PathBuf,
    failure_dir: PathBuf,
    keep_scratch: bool,
}

impl Workdir {
    /// `protected` are paths that must survive the wipe, e.g. the testcase dir.
    pub fn prepare(
        scratch_dir: impl Into<PathBuf>,
        failure_dir: impl Into<PathBuf>,
        protected: &[&Path],
    ) -> Result<Self, LifecycleError> {
        let scratch_dir = fsutil::normalize_path(scratch_dir.into());
        let failure_dir = fsutil::normalize_path(failure_dir.into());

        if scratch_dir.starts_with(&failure_dir) || failure_dir.starts_with(&scratch_dir) {
            return Err(LifecycleError::Overlap(scratch_dir, failure_dir));
        }
        for (dir, role) in [(&scratch_dir, "scratch dir"), (&failure_dir, "failure dir")] {
            if let Some(p) = protected
                .iter()
                .map(|p| fsutil::normalize_path(p))
                .find(|p| p.starts_with(dir))
            {
                return Err(LifecycleError::WouldWipe(dir.clone(), role, p));
            }
        }

        fsutil::mkdir_empty(&scratch_dir)?;
        fsutil::mkdir_empty(&failure_dir)?;
        fsutil::mkdir_all(failure_dir.join(TestPaths::ACTUAL_OUTPUT_SUBDIR))?;
        log::debug!(
            "Prepared scratch dir {:?} and failure dir {:?}",
            scratch_dir,
            failure_dir
        );

        Ok(Self {
            scratch_dir,
            failure_dir,
            keep_scratch: false,
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn failure_dir(&self) -> &Path {
        &self.failure_dir
    }

    /// Removes the scratch dir now, reporting the error instead of only logging it.
    pub fn close(mut self) -> fsutil::Result<()> {
        self.keep_scratch = true;
        fsutil::remove_dir_all(&self.scratch_dir)
    }
}

impl Drop for Workdir {
    fn drop(&mut self) {
        if self.keep_scratch {
            return;
        }
        if let Err(e) = fsutil::remove_dir_all(&self.scratch_dir) {
            log::warn!("{}", e);
        }
    }
}
