use std::path::{Path, PathBuf};

use crate::error::{RegistrationError, Result};

/// Raster formats that have a world file convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Tiff,
    Png,
    Gif,
}

impl ImageFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "jpg" => Some(Self::Jpeg),
            "tif" | "tiff" => Some(Self::Tiff),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("");

        Self::from_extension(extension).ok_or_else(|| RegistrationError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: extension.to_string(),
        })
    }

    pub fn world_file_extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jgw",
            Self::Tiff => "tfw",
            Self::Png => "pgw",
            Self::Gif => "gfw",
        }
    }

    /// `photo.JPG` -> `photo.jgw`, next to the image.
    pub fn world_file_path(self, image_path: &Path) -> PathBuf {
        image_path.with_extension(self.world_file_extension())
    }
}

/// `coverage.png` -> `coverage.png.aux.xml`
pub fn aux_xml_path(image_path: &Path) -> PathBuf {
    let mut name = image_path.as_os_str().to_os_string();
    name.push(".aux.xml");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_file_extension_dispatch() {
        let cases = [
            ("a.jpg", "a.jgw"),
            ("a.JPG", "a.jgw"),
            ("a.tif", "a.tfw"),
            ("a.TIFF", "a.tfw"),
            ("a.png", "a.pgw"),
            ("a.PNG", "a.pgw"),
            ("a.gif", "a.gfw"),
            ("a.Gif", "a.gfw"),
            ("dir/site-01.png", "dir/site-01.pgw"),
        ];

        for (image, expected) in cases {
            let format = ImageFormat::from_path(Path::new(image)).unwrap();
            assert_eq!(format.world_file_path(Path::new(image)), PathBuf::from(expected));
        }
    }

    #[test]
    fn test_unsupported_extensions_are_rejected() {
        for image in ["a.bmp", "a.ppm", "a.jpeg2", "noextension"] {
            let err = ImageFormat::from_path(Path::new(image)).unwrap_err();
            assert!(
                matches!(err, RegistrationError::UnsupportedFormat { .. }),
                "{} should be unsupported",
                image
            );
        }
    }

    #[test]
    fn test_aux_xml_path_appends_suffix() {
        assert_eq!(
            aux_xml_path(Path::new("out/site.png")),
            PathBuf::from("out/site.png.aux.xml")
        );
    }
}
