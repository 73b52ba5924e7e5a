//! Batch mode: the same pipeline over a folder of boundaries.
//!
//! Projects run one after another with no shared state; a failing or
//! panicking project is recorded in its report entry and the batch moves on.

use crate::config::PipelineConfig;
use crate::run::{run_project, ProjectRun};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use zonestats_cloud::{LayerResolver, Session};
use zonestats_core::vector::load_boundary;
use zonestats_core::{Error, ErrorKind, Result};

/// Boundary file extensions picked up by [`discover`].
const BOUNDARY_EXTENSIONS: [&str; 3] = ["geojson", "json", "shp"];

/// A boundary file and the project it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProjectSource {
    pub project: String,
    pub path: PathBuf,
}

impl ProjectSource {
    /// Project named after the file stem.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let project = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { project, path }
    }
}

/// Outcome of one project
#[derive(Debug)]
pub enum ProjectStatus {
    Complete(ProjectRun),
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug)]
pub struct ProjectReport {
    /// Boundary file stem
    pub project: String,
    pub source: PathBuf,
    pub status: ProjectStatus,
    pub elapsed: Duration,
}

impl ProjectReport {
    pub fn run(&self) -> Option<&ProjectRun> {
        match &self.status {
            ProjectStatus::Complete(run) => Some(run),
            ProjectStatus::Failed { .. } => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.status, ProjectStatus::Complete(_))
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub projects: Vec<ProjectReport>,
}

impl BatchReport {
    pub fn completed(&self) -> impl Iterator<Item = &ProjectReport> {
        self.projects.iter().filter(|p| p.is_complete())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ProjectReport> {
        self.projects.iter().filter(|p| !p.is_complete())
    }
}

fn is_boundary_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| BOUNDARY_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

fn is_shapefile(path: &Path) -> bool {
    path.extension().map_or(false, |e| e.eq_ignore_ascii_case("shp"))
}

/// Boundaries under `dir`, sorted by project.
///
/// Boundary files directly in `dir` are named after their stem. Each
/// subfolder is a project holding shapefiles: a single `.shp` takes the
/// folder's name, several are named `<folder>-<stem>`.
pub fn discover(dir: impl AsRef<Path>) -> Result<Vec<ProjectSource>> {
    let mut sources = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        if is_boundary_file(&path) {
            sources.push(ProjectSource::from_file(path));
        } else if path.is_dir() {
            let folder = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut shapefiles: Vec<PathBuf> = std::fs::read_dir(&path)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_shapefile(p))
                .collect();
            shapefiles.sort();
            if let [only] = shapefiles.as_slice() {
                sources.push(ProjectSource {
                    project: folder,
                    path: only.clone(),
                });
            } else {
                sources.extend(shapefiles.into_iter().map(|p| {
                    let mut source = ProjectSource::from_file(p);
                    source.project = format!("{}-{}", folder, source.project);
                    source
                }));
            }
        }
    }
    sources.sort();
    Ok(sources)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn run_one(source: &ProjectSource, config: &PipelineConfig, resolver: &LayerResolver, session: &Session) -> Result<ProjectRun> {
    let mut boundary = load_boundary(&source.path, &config.loader)?;
    boundary.id = source.project.clone();
    run_project(&boundary, config, resolver, session)
}

/// Run every project in `sources`. `on_done` is called after each project.
pub fn run_batch<F>(
    sources: &[ProjectSource],
    config: &PipelineConfig,
    resolver: &LayerResolver,
    session: &Session,
    mut on_done: F,
) -> BatchReport
where
    F: FnMut(&ProjectReport),
{
    let mut report = BatchReport::default();
    for source in sources {
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| run_one(source, config, resolver, session)))
            .unwrap_or_else(|payload| Err(Error::Other(format!("panicked: {}", panic_message(&*payload)))));

        let status = match result {
            Ok(run) => ProjectStatus::Complete(run),
            Err(e) => {
                warn!(path = %source.path.display(), kind = %e.kind(), error = %e, "project failed");
                ProjectStatus::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        };
        let project = ProjectReport {
            project: source.project.clone(),
            source: source.path.clone(),
            status,
            elapsed: start.elapsed(),
        };
        on_done(&project);
        report.projects.push(project);
    }
    info!(
        total = report.projects.len(),
        failed = report.failed().count(),
        "batch done"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use zonestats_cloud::Result as CloudResult;
    use zonestats_cloud::{BBox, DatasetInfo, LayerBackend, LayerCatalog, TimeSlice};
    use zonestats_core::Raster;

    #[test]
    fn test_discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.geojson", "a.GeoJSON", "notes.txt", "c.json", "d.shp"] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.geojson")).unwrap();
        let names: Vec<String> = discover(dir.path())
            .unwrap()
            .iter()
            .map(|s| s.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.GeoJSON", "b.geojson", "c.json", "d.shp"]);
    }

    #[test]
    fn test_discover_project_folders() {
        let dir = tempfile::tempdir().unwrap();
        for (folder, files) in [
            ("ACR-10", vec!["boundary.shp", "boundary.dbf", "boundary.prj"]),
            ("ACR-20", vec!["north.shp", "south.shp"]),
            ("empty", vec!["readme.txt"]),
        ] {
            std::fs::create_dir(dir.path().join(folder)).unwrap();
            for file in files {
                std::fs::write(dir.path().join(folder).join(file), "").unwrap();
            }
        }
        std::fs::write(dir.path().join("VCS-1.geojson"), "{}").unwrap();

        let sources = discover(dir.path()).unwrap();
        let projects: Vec<&str> = sources.iter().map(|s| s.project.as_str()).collect();
        assert_eq!(projects, vec!["ACR-10", "ACR-20-north", "ACR-20-south", "VCS-1"]);
        assert!(sources[0].path.ends_with("ACR-10/boundary.shp"));
    }

    struct Exploding;

    impl LayerBackend for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn datasets(&self, _session: &Session) -> CloudResult<Vec<DatasetInfo>> {
            panic!("catalog listing blew up");
        }

        fn fetch(
            &self,
            _session: &Session,
            _dataset: &DatasetInfo,
            _slice: &TimeSlice,
            _bbox: &BBox,
        ) -> CloudResult<Arc<Raster<f64>>> {
            unreachable!()
        }
    }

    #[test]
    fn test_panicking_project_is_recorded_and_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        let mut sources = Vec::new();
        for name in ["a", "b"] {
            let path = dir.path().join(format!("{name}.geojson"));
            std::fs::write(
                &path,
                r#"{"type": "Polygon", "coordinates": [[[20.0,0.5],[20.009,0.5],[20.009,0.509],[20.0,0.509],[20.0,0.5]]]}"#,
            )
            .unwrap();
            sources.push(ProjectSource::from_file(path));
        }
        let config = PipelineConfig::from_toml_str(
            r#"
            layers = ["ESA_CCI_AGB"]
            years = { start = 2018, end = 2018 }
            "#,
        )
        .unwrap();
        let resolver = LayerResolver::new(LayerCatalog::builtin()).with_backend(Arc::new(Exploding));

        let mut done = 0;
        let report = run_batch(&sources, &config, &resolver, &Session::new(), |_| done += 1);
        assert_eq!(done, 2);
        assert_eq!(report.failed().count(), 2);
        for project in &report.projects {
            match &project.status {
                ProjectStatus::Failed { kind, message } => {
                    assert_eq!(*kind, ErrorKind::Internal);
                    assert!(message.contains("catalog listing blew up"), "{message}");
                }
                ProjectStatus::Complete(_) => panic!("{} should have failed", project.project),
            }
        }
    }
}
