//! Writing the files the daemon loads.

use std::future::Future;
use std::path::PathBuf;

use tokio::task::JoinSet;

use crate::reload::error::{ReloadError, ReloadResult};
use crate::reload::types::ReloadConfig;

/// Produces every unit's `dest_path` before the daemon is asked to load it.
pub trait ArtifactWriter: Send + Sync {
    fn write(&self, config: &ReloadConfig) -> impl Future<Output = ReloadResult<()>> + Send;
}

/// Copies each unit's source file to its destination verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyArtifacts;

impl CopyArtifacts {
    async fn copy(source: PathBuf, dest: PathBuf) -> ReloadResult<()> {
        let failed = |source| ReloadError::Artifacts {
            path: dest.display().to_string(),
            source,
        };
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(failed)?;
        }
        tokio::fs::copy(&source, &dest).await.map_err(failed)?;
        Ok(())
    }
}

impl ArtifactWriter for CopyArtifacts {
    async fn write(&self, config: &ReloadConfig) -> ReloadResult<()> {
        let mut copies = JoinSet::new();
        for unit in config.units() {
            if unit.source_path() == unit.dest_path() {
                continue;
            }
            copies.spawn(Self::copy(
                unit.source_path().clone(),
                unit.dest_path().clone(),
            ));
        }

        let mut first_error = None;
        while let Some(joined) = copies.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(ReloadError::Artifacts {
                    path: String::from("<copy task>"),
                    source: std::io::Error::other(e),
                })
            });
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::debug!(units = config.units().len(), "VCL files written");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reload::types::VclUnit;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn copies_sources_into_nested_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("default.vcl");
        std::fs::write(&src, "vcl 4.1;\n").unwrap();
        let dest = dir.path().join("out/nested/default.vcl");

        let unit = VclUnit::new("default", &src, &dest, true).unwrap();
        let config = ReloadConfig::new(vec![unit], BTreeMap::new(), false).unwrap();
        CopyArtifacts.write(&config).await.unwrap();

        assert_eq!(std::fs::read_to_string(dest).unwrap(), "vcl 4.1;\n");
    }

    #[tokio::test]
    async fn missing_source_names_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("default.vcl");
        let unit = VclUnit::new("default", dir.path().join("missing.vcl"), &dest, true).unwrap();
        let config = ReloadConfig::new(vec![unit], BTreeMap::new(), false).unwrap();

        let err = CopyArtifacts.write(&config).await.unwrap_err();
        match err {
            ReloadError::Artifacts { path, .. } => assert_eq!(path, dest.display().to_string()),
            other => panic!("unexpected error: {other}"),
        }
    }
}
