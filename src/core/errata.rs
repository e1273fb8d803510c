//! Errata detection
//!
//! A resource re-published in the same week under the same id with a newer
//! `created_at` is a correction of the copy already on disk. That copy is moved
//! into `.archive/<week>/.superseded/` and the corrected file is downloaded again.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::layout::{parse_week_dir_name, DownloadLayout};
use crate::core::models::{DownloadJob, JobStatus, Resource, ResourceId, WeekIdentifier};

/// A resource file present in the work directory
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFile {
    pub resource_id: ResourceId,
    pub week: WeekIdentifier,
    pub path: PathBuf,
    pub downloaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrataChange {
    pub resource: Resource,
    pub old_file: LocalFile,
}

/// Local copies of `resources`.
///
/// The path and download time come from the completed job when this session
/// downloaded the file, otherwise from the expected path and its modification time.
pub fn local_files(
    layout: &DownloadLayout,
    resources: &[Resource],
    jobs: &[DownloadJob],
) -> Vec<LocalFile> {
    resources
        .iter()
        .filter_map(|resource| {
            let completed = jobs.iter().find(|job| {
                job.resource_id == resource.id && job.status == JobStatus::Completed
            });
            let from_job = completed.and_then(|job| {
                let path = job.local_path.clone().filter(|p| p.is_file())?;
                Some((path, job.completed_at))
            });
            let (path, completed_at) = match from_job {
                Some(found) => found,
                None => (layout.existing_file(resource)?, None),
            };
            let downloaded_at = completed_at.or_else(|| modified_at(&path))?;
            Some(LocalFile {
                resource_id: resource.id,
                week: week_of(layout, &path).unwrap_or_else(|| resource.week()),
                path,
                downloaded_at,
            })
        })
        .collect()
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Week directory a file lives under, if any.
fn week_of(layout: &DownloadLayout, path: &Path) -> Option<WeekIdentifier> {
    let relative = path.strip_prefix(layout.work_dir()).ok()?;
    let first = relative.components().next()?;
    parse_week_dir_name(first.as_os_str().to_str()?)
}

/// Remote resources that replace an older local copy from the same week.
pub fn detect_errata(local: &[LocalFile], remote: &[Resource]) -> Vec<ErrataChange> {
    remote
        .iter()
        .filter_map(|resource| {
            local
                .iter()
                .find(|file| file.resource_id == resource.id && file.week == resource.week())
                .filter(|file| file.downloaded_at < resource.created_at)
                .map(|file| ErrataChange {
                    resource: resource.clone(),
                    old_file: file.clone(),
                })
        })
        .collect()
}

/// Move an outdated copy into the week's superseded directory. Returns its new path.
pub async fn supersede(layout: &DownloadLayout, file: &LocalFile) -> std::io::Result<PathBuf> {
    let dir = layout.superseded_dir(file.week);
    tokio::fs::create_dir_all(&dir).await?;

    let name = file
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("resource-{}", file.resource_id));
    let target = dir.join(format!(
        "{}-{}",
        file.downloaded_at.format("%Y%m%dT%H%M%SZ"),
        name
    ));

    tokio::fs::rename(&file.path, &target).await?;
    debug!("Moved {:?} to {:?}", file.path, target);
    Ok(target)
}
