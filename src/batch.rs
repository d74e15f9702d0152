use std::collections::hash_map::{Entry, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::error::{RegistrationError, Result};
use crate::image_format::ImageFormat;
use crate::kml::{read_kml_file, GroundOverlay};
use crate::kmz::KmzArchive;
use crate::model::BoundingBox;
use crate::registrar::{GeoRegistrar, Registration};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlaySource {
    /// A KML document whose images sit on disk next to it.
    Kml(PathBuf),
    Kmz(PathBuf),
}

impl OverlaySource {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "kml" => Some(Self::Kml(path.to_path_buf())),
            "kmz" => Some(Self::Kmz(path.to_path_buf())),
            _ => None,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Kml(path) | Self::Kmz(path) => path,
        }
    }
}

#[derive(Debug)]
pub struct BatchFailure {
    /// The image when it is known, otherwise the KML/KMZ it came from.
    pub path: PathBuf,
    pub error: RegistrationError,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.error)
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub registered: Vec<Registration>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    fn failed(path: &Path, error: RegistrationError) -> Self {
        warn!("Skipping {:?}: {}", path, error);
        Self {
            registered: Vec::new(),
            failures: vec![BatchFailure {
                path: path.to_path_buf(),
                error,
            }],
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.registered.extend(other.registered);
        self.failures.extend(other.failures);
        self
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Recursively collects `.kml`/`.kmz` files under `dir`, sorted by path.
pub fn collect_overlay_sources(dir: &Path) -> Result<Vec<OverlaySource>> {
    let mut sources = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| RegistrationError::io(dir, e))?;

    for entry in entries {
        let path = entry.map_err(|e| RegistrationError::io(dir, e))?.path();
        if path.is_dir() {
            sources.extend(collect_overlay_sources(&path)?);
        } else if let Some(source) = OverlaySource::from_path(&path) {
            sources.push(source);
        }
    }

    sources.sort_by(|a, b| a.path().cmp(b.path()));
    Ok(sources)
}

/// Output directory of one source: its path relative to `input_root`,
/// without the extension, under `out_dir`. `a/site.kmz` -> `out/a/site`.
pub fn source_output_dir(source: &Path, input_root: &Path, out_dir: &Path) -> PathBuf {
    let relative = match source.strip_prefix(input_root) {
        Ok(relative) if !relative.as_os_str().is_empty() => relative.with_extension(""),
        _ => PathBuf::from(source.file_stem().unwrap_or_default()),
    };
    out_dir.join(relative)
}

/// Registers every overlay of every source in parallel. Each source writes
/// into its own directory (see [`source_output_dir`]). A failing image or
/// source is recorded in the report and never stops its siblings.
pub fn register_sources(
    sources: &[OverlaySource],
    input_root: &Path,
    out_dir: &Path,
    registrar: &GeoRegistrar,
) -> BatchReport {
    let mut claimed: HashMap<PathBuf, &Path> = HashMap::new();
    let mut jobs = Vec::new();
    let mut report = BatchReport::default();

    // 出力先が重なるソースは上書きせず失敗として扱う
    for source in sources {
        let dir = source_output_dir(source.path(), input_root, out_dir);
        match claimed.entry(dir) {
            Entry::Occupied(first) => {
                let error = RegistrationError::invalid(
                    "output",
                    format!("{:?} is already used by {:?}", first.key(), first.get()),
                );
                report = report.merge(BatchReport::failed(source.path(), error));
            }
            Entry::Vacant(slot) => {
                jobs.push((source, slot.key().clone()));
                slot.insert(source.path());
            }
        }
    }

    let registered = jobs
        .par_iter()
        .map(|(source, dir)| register_source(source, dir, registrar))
        .reduce(BatchReport::default, BatchReport::merge);
    report.merge(registered)
}

/// Registers the overlays of one source into `out_dir`.
pub fn register_source(
    source: &OverlaySource,
    out_dir: &Path,
    registrar: &GeoRegistrar,
) -> BatchReport {
    info!("Processing overlay source: {:?}", source.path());

    let overlays = match source {
        OverlaySource::Kml(path) => read_kml_file(path),
        OverlaySource::Kmz(path) => KmzArchive::new(path).overlays(),
    };
    let overlays = match overlays {
        Ok(overlays) => overlays,
        Err(e) => return BatchReport::failed(source.path(), e),
    };

    if overlays.is_empty() {
        warn!("No ground overlays found in {:?}", source.path());
    }

    let (jobs, report) = plan_overlays(source, &overlays, out_dir);
    if jobs.is_empty() {
        return report;
    }
    if let Err(e) = fs::create_dir_all(out_dir) {
        return report.merge(BatchReport::failed(source.path(), RegistrationError::io(out_dir, e)));
    }

    let registered = jobs
        .par_iter()
        .map(|job| match register_overlay(source, job, out_dir, registrar) {
            Ok(registration) => BatchReport {
                registered: vec![registration],
                failures: Vec::new(),
            },
            Err(e) => BatchReport::failed(&job.label, e),
        })
        .reduce(BatchReport::default, BatchReport::merge);
    report.merge(registered)
}

/// One overlay that passed validation, with the image path it will own.
struct OverlayJob<'a> {
    href: &'a str,
    /// Where the image comes from, used in failure reports.
    label: PathBuf,
    bbox: BoundingBox,
    target: PathBuf,
}

/// Validates overlays before anything is written and gives each image a
/// distinct target in `out_dir`.
fn plan_overlays<'a>(
    source: &OverlaySource,
    overlays: &'a [GroundOverlay],
    out_dir: &Path,
) -> (Vec<OverlayJob<'a>>, BatchReport) {
    let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
    let mut jobs = Vec::new();
    let mut report = BatchReport::default();

    for overlay in overlays {
        let href = match overlay.image_href() {
            Ok(href) => href,
            Err(e) => {
                report = report.merge(BatchReport::failed(source.path(), e));
                continue;
            }
        };

        // 画像ごとのエラーは画像の場所で報告する
        let label = image_label(source, href);
        let planned = overlay.bounding_box().and_then(|bbox| {
            ImageFormat::from_path(Path::new(href))?;
            let file_name = Path::new(href).file_name().ok_or_else(|| {
                RegistrationError::invalid("href", format!("'{}' has no file name", href))
            })?;
            Ok((bbox, out_dir.join(file_name)))
        });
        let (bbox, target) = match planned {
            Ok(planned) => planned,
            Err(e) => {
                report = report.merge(BatchReport::failed(&label, e));
                continue;
            }
        };

        match claimed.entry(target.clone()) {
            Entry::Occupied(first) => {
                let error = RegistrationError::invalid(
                    "href",
                    format!("{:?} is already registered from {:?}", target, first.get()),
                );
                report = report.merge(BatchReport::failed(&label, error));
            }
            Entry::Vacant(slot) => {
                slot.insert(label.clone());
                jobs.push(OverlayJob {
                    href,
                    label,
                    bbox,
                    target,
                });
            }
        }
    }

    (jobs, report)
}

/// `<dir>/<href>` for KML, `<archive>!/<href>` for KMZ.
fn image_label(source: &OverlaySource, href: &str) -> PathBuf {
    match source {
        OverlaySource::Kml(path) => path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(href),
        OverlaySource::Kmz(path) => PathBuf::from(format!("{}!/{}", path.display(), href)),
    }
}

fn register_overlay(
    source: &OverlaySource,
    job: &OverlayJob<'_>,
    out_dir: &Path,
    registrar: &GeoRegistrar,
) -> Result<Registration> {
    // 出力先へ画像を配置してから登録する
    let image = match source {
        OverlaySource::Kml(_) => stage_image(&job.label, &job.target)?,
        OverlaySource::Kmz(path) => KmzArchive::new(path).extract_image(job.href, out_dir)?,
    };

    registrar.register(&image, &job.bbox)
}

/// Copies an image to `target` unless it already lives there.
fn stage_image(image: &Path, target: &Path) -> Result<PathBuf> {
    let same_file = match (fs::canonicalize(image), fs::canonicalize(target)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if !same_file {
        fs::copy(image, target).map_err(|e| RegistrationError::io(image, e))?;
    }

    Ok(target.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    #[test]
    fn test_overlay_source_dispatch() {
        assert_eq!(
            OverlaySource::from_path(Path::new("a/site.KMZ")),
            Some(OverlaySource::Kmz(PathBuf::from("a/site.KMZ")))
        );
        assert_eq!(
            OverlaySource::from_path(Path::new("site.kml")),
            Some(OverlaySource::Kml(PathBuf::from("site.kml")))
        );
        assert_eq!(OverlaySource::from_path(Path::new("site.png")), None);
    }

    #[test]
    fn test_collect_sources_recursively() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("north").join("ridge");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp_dir.path().join("b.kml"), "<kml/>").unwrap();
        fs::write(nested.join("a.kmz"), "").unwrap();
        fs::write(nested.join("a.png"), "").unwrap();

        let sources = collect_overlay_sources(temp_dir.path()).unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources.contains(&OverlaySource::Kml(temp_dir.path().join("b.kml"))));
        assert!(sources.contains(&OverlaySource::Kmz(nested.join("a.kmz"))));
    }

    #[test]
    fn test_bad_overlays_do_not_stop_siblings() {
        let temp_dir = TempDir::new().unwrap();
        let kml = temp_dir.path().join("sites.kml");
        fs::write(
            &kml,
            r#"<kml>
              <GroundOverlay>
                <Icon><href>missing_south.png</href></Icon>
                <LatLonBox><north>1</north><east>2</east><west>1</west></LatLonBox>
              </GroundOverlay>
              <GroundOverlay>
                <Icon><href>site.bmp</href></Icon>
                <LatLonBox><north>1</north><south>0</south><east>2</east><west>1</west></LatLonBox>
              </GroundOverlay>
            </kml>"#,
        )
        .unwrap();
        fs::write(temp_dir.path().join("site.bmp"), "").unwrap();

        let out_dir = temp_dir.path().join("out");
        fs::create_dir_all(&out_dir).unwrap();

        let report = register_sources(
            &[
                OverlaySource::Kml(kml),
                OverlaySource::Kml(temp_dir.path().join("absent.kml")),
            ],
            temp_dir.path(),
            &out_dir,
            &GeoRegistrar::default(),
        );

        assert!(!report.is_success());
        assert!(report.registered.is_empty());
        assert_eq!(report.failures.len(), 3);

        let messages: Vec<String> = report.failures.iter().map(|f| f.to_string()).collect();
        assert!(messages.iter().any(|m| m.contains("missing_south.png") && m.contains("south")));
        assert!(messages.iter().any(|m| m.contains("site.bmp") && m.contains("unsupported")));
        assert!(messages.iter().any(|m| m.contains("absent.kml")));

        // 不正な画像の出力は作られない
        assert_eq!(fs::read_dir(&out_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_source_output_dirs_mirror_input_tree() {
        let root = Path::new("/data/splat");
        let out = Path::new("/data/out");

        let a = source_output_dir(&root.join("a").join("site.kmz"), root, out);
        let b = source_output_dir(&root.join("b").join("site.kmz"), root, out);
        assert_eq!(a, out.join("a").join("site"));
        assert_eq!(b, out.join("b").join("site"));

        // ルート外のソースはファイル名の語幹を使う
        assert_eq!(
            source_output_dir(Path::new("/elsewhere/tower.kml"), root, out),
            out.join("tower")
        );
    }

    #[test]
    fn test_sources_sharing_an_output_dir_fail_instead_of_overwriting() {
        let temp_dir = TempDir::new().unwrap();
        let out_dir = temp_dir.path().join("out");

        let report = register_sources(
            &[
                OverlaySource::Kml(temp_dir.path().join("site.kml")),
                OverlaySource::Kmz(temp_dir.path().join("site.kmz")),
            ],
            temp_dir.path(),
            &out_dir,
            &GeoRegistrar::default(),
        );

        assert_eq!(report.failures.len(), 2);
        let collision = report
            .failures
            .iter()
            .find(|f| matches!(f.error, RegistrationError::InvalidInput { field: "output", .. }))
            .expect("output collision not reported");
        assert_eq!(collision.path, temp_dir.path().join("site.kmz"));
    }

    #[test]
    fn test_overlays_sharing_an_image_name_are_not_overwritten() {
        let temp_dir = TempDir::new().unwrap();
        let kml = temp_dir.path().join("towers.kml");
        fs::write(
            &kml,
            r#"<kml>
              <GroundOverlay>
                <Icon><href>north/coverage.png</href></Icon>
                <LatLonBox><north>1</north><south>0</south><east>2</east><west>1</west></LatLonBox>
              </GroundOverlay>
              <GroundOverlay>
                <Icon><href>south/coverage.png</href></Icon>
                <LatLonBox><north>-1</north><south>-2</south><east>2</east><west>1</west></LatLonBox>
              </GroundOverlay>
            </kml>"#,
        )
        .unwrap();

        let overlays = read_kml_file(&kml).unwrap();
        let out_dir = temp_dir.path().join("out");
        let (jobs, report) = plan_overlays(&OverlaySource::Kml(kml.clone()), &overlays, &out_dir);

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].target, out_dir.join("coverage.png"));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0].path,
            temp_dir.path().join("south/coverage.png")
        );
        assert!(report.failures[0].to_string().contains("already registered"));
    }

    #[test]
    fn test_kmz_failures_name_the_archive_entry() {
        let temp_dir = TempDir::new().unwrap();
        let kmz = temp_dir.path().join("site.kmz");
        let mut zip = ZipWriter::new(File::create(&kmz).unwrap());
        zip.start_file("doc.kml", SimpleFileOptions::default()).unwrap();
        zip.write_all(
            br#"<kml><GroundOverlay>
                <Icon><href>coverage.png</href></Icon>
                <LatLonBox><north>1</north><east>2</east><west>1</west></LatLonBox>
            </GroundOverlay></kml>"#,
        )
        .unwrap();
        zip.finish().unwrap();

        let out_dir = temp_dir.path().join("out");
        let report = register_sources(
            &[OverlaySource::Kmz(kmz.clone())],
            temp_dir.path(),
            &out_dir,
            &GeoRegistrar::default(),
        );

        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0].path,
            PathBuf::from(format!("{}!/coverage.png", kmz.display()))
        );
        assert!(!out_dir.exists());
    }
}
