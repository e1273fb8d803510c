//! On-disk layout: `<work_dir>/<YYYY-Www>/<category>/<file>`

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::core::models::{Resource, WeekIdentifier};
use crate::utils::file_utils::{extract_filename_from_url, partial_path_for, sanitize_filename};

/// Last successful manifest, kept so the list survives an offline restart
pub const RESOURCE_CACHE_FILE: &str = ".resource-cache.json";

/// Root for files moved out of the week directories
pub const ARCHIVE_DIR: &str = ".archive";

const SUPERSEDED_DIR: &str = ".superseded";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLayout {
    work_dir: PathBuf,
}

impl DownloadLayout {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn week_dir(&self, week: WeekIdentifier) -> PathBuf {
        self.work_dir.join(week.as_dir_name())
    }

    pub fn category_dir(&self, resource: &Resource) -> PathBuf {
        let category = sanitize_filename(&resource.category);
        let category = if category.is_empty() {
            "uncategorized".to_string()
        } else {
            category
        };
        self.week_dir(resource.week()).join(category)
    }

    pub fn final_path(&self, resource: &Resource, prefer_optimized: bool) -> PathBuf {
        self.category_dir(resource)
            .join(file_name_for(resource, prefer_optimized))
    }

    pub fn partial_path(&self, resource: &Resource, prefer_optimized: bool) -> PathBuf {
        partial_path_for(&self.final_path(resource, prefer_optimized))
    }

    /// Final file already on disk, under either the original or the optimized name.
    pub fn existing_file(&self, resource: &Resource) -> Option<PathBuf> {
        [false, true]
            .into_iter()
            .map(|prefer_optimized| self.final_path(resource, prefer_optimized))
            .find(|path| path.is_file())
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.work_dir.join(ARCHIVE_DIR)
    }

    /// Where outdated copies replaced by a correction are kept
    pub fn superseded_dir(&self, week: WeekIdentifier) -> PathBuf {
        self.archive_dir().join(week.as_dir_name()).join(SUPERSEDED_DIR)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.work_dir.join(RESOURCE_CACHE_FILE)
    }

    /// Week directories other than `current`, newest first.
    pub fn archived_weeks(&self, current: WeekIdentifier) -> std::io::Result<Vec<WeekIdentifier>> {
        if !self.work_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut weeks = Vec::new();
        for entry in std::fs::read_dir(&self.work_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(week) = entry.file_name().to_str().and_then(parse_week_dir_name) {
                if week != current {
                    weeks.push(week);
                }
            }
        }
        weeks.sort_unstable_by(|a, b| b.cmp(a));
        Ok(weeks)
    }
}

fn title_stem(resource: &Resource) -> String {
    let stem = sanitize_filename(&resource.title);
    if stem.is_empty() {
        format!("resource-{}", resource.id)
    } else {
        stem
    }
}

/// File name a resource is stored under.
pub fn file_name_for(resource: &Resource, prefer_optimized: bool) -> String {
    if resource.is_shortcut() {
        return shortcut_file_name(&title_stem(resource));
    }
    if let Some(name) = extract_filename_from_url(resource.source_url(prefer_optimized)) {
        return name;
    }
    let stem = title_stem(resource);
    match resource.file_type.as_deref().map(str::trim) {
        Some(ext) if !ext.is_empty() && !stem.ends_with(&format!(".{}", ext)) => {
            format!("{}.{}", stem, ext.trim_start_matches('.'))
        }
        _ => stem,
    }
}

/// Parse `YYYY-Www` back into a week, rejecting week numbers outside 1..=53.
pub fn parse_week_dir_name(name: &str) -> Option<WeekIdentifier> {
    static WEEK_DIR: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = WEEK_DIR
        .get_or_init(|| Regex::new(r"^(\d{4})-W(\d{2})$").ok())
        .as_ref()?;
    let captures = pattern.captures(name)?;
    let year = captures.get(1)?.as_str().parse::<i32>().ok()?;
    let week = captures.get(2)?.as_str().parse::<u32>().ok()?;
    (1..=53)
        .contains(&week)
        .then(|| WeekIdentifier::new(year, week))
}

#[cfg(target_os = "windows")]
pub fn shortcut_file_name(stem: &str) -> String {
    format!("{}.url", stem)
}

#[cfg(target_os = "windows")]
pub fn shortcut_contents(_name: &str, url: &str) -> String {
    format!("[InternetShortcut]\r\nURL={}\r\n", url)
}

#[cfg(target_os = "macos")]
pub fn shortcut_file_name(stem: &str) -> String {
    format!("{}.webloc", stem)
}

#[cfg(target_os = "macos")]
pub fn shortcut_contents(_name: &str, url: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>URL</key>
    <string>{}</string>
</dict>
</plist>
"#,
        url
    )
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub fn shortcut_file_name(stem: &str) -> String {
    format!("{}.desktop", stem)
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub fn shortcut_contents(name: &str, url: &str) -> String {
    format!(
        "[Desktop Entry]\nType=Link\nName={}\nURL={}\nIcon=video-x-generic\n",
        name, url
    )
}
