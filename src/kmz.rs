use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zip::ZipArchive;

use crate::atomic::write_atomic;
use crate::error::{RegistrationError, Result};
use crate::kml::{parse_ground_overlays, GroundOverlay};

/// A KMZ archive: a zip holding one KML document and the images it
/// references.
pub struct KmzArchive {
    path: PathBuf,
}

impl KmzArchive {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<ZipArchive<File>> {
        let file = File::open(&self.path).map_err(|e| RegistrationError::io(&self.path, e))?;
        ZipArchive::new(file).map_err(|e| self.archive_error(e))
    }

    fn archive_error(&self, source: zip::result::ZipError) -> RegistrationError {
        RegistrationError::Archive {
            path: self.path.clone(),
            source,
        }
    }

    /// `doc.kml` by convention, otherwise the first `.kml` entry.
    pub fn document_name(&self) -> Result<String> {
        let archive = self.open()?;
        let names: Vec<&str> = archive.file_names().collect();

        if let Some(doc) = names.iter().find(|n| n.eq_ignore_ascii_case("doc.kml")) {
            return Ok(doc.to_string());
        }

        let mut kml_names: Vec<&str> = names
            .into_iter()
            .filter(|n| n.to_ascii_lowercase().ends_with(".kml"))
            .collect();
        kml_names.sort_unstable();

        kml_names
            .first()
            .map(|n| n.to_string())
            .ok_or_else(|| RegistrationError::Kml {
                path: self.path.clone(),
                message: "archive contains no .kml document".to_string(),
            })
    }

    fn read_entry(&self, name: &str) -> Result<Vec<u8>> {
        let mut archive = self.open()?;
        let mut entry = archive.by_name(name).map_err(|e| self.archive_error(e))?;

        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| RegistrationError::io(&self.path, e))?;
        Ok(bytes)
    }

    pub fn overlays(&self) -> Result<Vec<GroundOverlay>> {
        let document = self.document_name()?;
        debug!("Reading {} from {:?}", document, self.path);

        let bytes = self.read_entry(&document)?;
        let xml = String::from_utf8(bytes).map_err(|e| RegistrationError::Kml {
            path: self.path.clone(),
            message: format!("{} is not UTF-8: {}", document, e),
        })?;

        parse_ground_overlays(&xml, &self.path)
    }

    /// Extracts the image an overlay points at into `out_dir`, keeping only
    /// its file name.
    pub fn extract_image(&self, href: &str, out_dir: &Path) -> Result<PathBuf> {
        let entry_name = self.resolve_href(href)?;
        let file_name = Path::new(&entry_name)
            .file_name()
            .ok_or_else(|| RegistrationError::invalid("href", format!("'{}' has no file name", href)))?;

        let bytes = self.read_entry(&entry_name)?;
        let output_path = out_dir.join(file_name);
        write_atomic(&output_path, &bytes)?;

        info!("Extracted {} -> {:?}", entry_name, output_path);
        Ok(output_path)
    }

    /// Hrefs are relative to the KML document inside the archive.
    fn resolve_href(&self, href: &str) -> Result<String> {
        let document = self.document_name()?;
        let href = href.trim_start_matches("./");

        Ok(match document.rsplit_once('/') {
            Some((dir, _)) => format!("{}/{}", dir, href),
            None => href.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const KML: &str = r#"<kml><GroundOverlay>
        <Icon><href>site.png</href></Icon>
        <LatLonBox><north>-36</north><south>-37</south><east>175</east><west>174</west></LatLonBox>
    </GroundOverlay></kml>"#;

    fn build_kmz(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_reads_doc_kml_and_extracts_image() {
        let temp_dir = TempDir::new().unwrap();
        let kmz_path = temp_dir.path().join("site.kmz");
        build_kmz(
            &kmz_path,
            &[("doc.kml", KML.as_bytes()), ("site.png", b"not really a png")],
        );

        let kmz = KmzArchive::new(&kmz_path);
        let overlays = kmz.overlays().unwrap();
        assert_eq!(overlays.len(), 1);

        let out_dir = temp_dir.path().join("out");
        std::fs::create_dir_all(&out_dir).unwrap();
        let image = kmz
            .extract_image(overlays[0].image_href().unwrap(), &out_dir)
            .unwrap();

        assert_eq!(image, out_dir.join("site.png"));
        assert_eq!(std::fs::read(&image).unwrap(), b"not really a png");
    }

    #[test]
    fn test_nested_document_resolves_relative_hrefs() {
        let temp_dir = TempDir::new().unwrap();
        let kmz_path = temp_dir.path().join("nested.kmz");
        build_kmz(
            &kmz_path,
            &[("files/coverage.kml", KML.as_bytes()), ("files/site.png", b"png")],
        );

        let kmz = KmzArchive::new(&kmz_path);
        assert_eq!(kmz.document_name().unwrap(), "files/coverage.kml");

        let image = kmz.extract_image("site.png", temp_dir.path()).unwrap();
        assert_eq!(std::fs::read(image).unwrap(), b"png");
    }

    #[test]
    fn test_missing_image_entry() {
        let temp_dir = TempDir::new().unwrap();
        let kmz_path = temp_dir.path().join("broken.kmz");
        build_kmz(&kmz_path, &[("doc.kml", KML.as_bytes())]);

        let err = KmzArchive::new(&kmz_path)
            .extract_image("site.png", temp_dir.path())
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Archive { .. }));
    }

    #[test]
    fn test_archive_without_kml() {
        let temp_dir = TempDir::new().unwrap();
        let kmz_path = temp_dir.path().join("empty.kmz");
        build_kmz(&kmz_path, &[("readme.txt", b"hello")]);

        assert!(matches!(
            KmzArchive::new(&kmz_path).overlays(),
            Err(RegistrationError::Kml { .. })
        ));
    }
}
