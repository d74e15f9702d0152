use std::path::{Path, PathBuf};

use tracing::info;

use crate::aux_xml::write_spatial_reference_sidecar;
use crate::error::Result;
use crate::image_format::{aux_xml_path, ImageFormat};
use crate::model::{AffineTransform, BoundingBox, ImageDimensions};
use crate::raster::read_image_dimensions;
use crate::transform::compute_transform;
use crate::world_file::{write_world_file, DEFAULT_PRECISION};
use crate::writer::GeoTiffWriter;

#[derive(Debug, Clone)]
pub struct RegistrationOptions {
    /// Mantissa digits written per world file coefficient.
    pub precision: usize,
    pub write_aux_xml: bool,
    pub write_geotiff: bool,
    pub nodata: Option<f64>,
}

impl Default for RegistrationOptions {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            write_aux_xml: true,
            write_geotiff: false,
            nodata: None,
        }
    }
}

/// Files produced for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub image: PathBuf,
    pub dimensions: ImageDimensions,
    pub transform: AffineTransform,
    pub world_file: PathBuf,
    pub aux_xml: Option<PathBuf>,
    pub geotiff: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct GeoRegistrar {
    options: RegistrationOptions,
}

impl GeoRegistrar {
    pub fn new(options: RegistrationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RegistrationOptions {
        &self.options
    }

    /// Reads the pixel size of `image` with GDAL and registers it.
    pub fn register(&self, image: &Path, bbox: &BoundingBox) -> Result<Registration> {
        // 拡張子を先に確認し、読めない形式ではGDALを呼ばない
        ImageFormat::from_path(image)?;
        let dimensions = read_image_dimensions(image)?;
        self.register_with_dimensions(image, bbox, dimensions)
    }

    /// Writes the world file (and the enabled sidecars) next to `image`.
    /// Nothing is written when the extension or the inputs are invalid.
    pub fn register_with_dimensions(
        &self,
        image: &Path,
        bbox: &BoundingBox,
        dimensions: ImageDimensions,
    ) -> Result<Registration> {
        let format = ImageFormat::from_path(image)?;
        let transform = compute_transform(bbox, dimensions)?;

        let world_file = format.world_file_path(image);
        write_world_file(&world_file, &transform, self.options.precision)?;
        info!("Written world file: {:?}", world_file);

        let aux_xml = if self.options.write_aux_xml {
            let path = aux_xml_path(image);
            write_spatial_reference_sidecar(&path)?;
            info!("Written spatial reference: {:?}", path);
            Some(path)
        } else {
            None
        };

        let geotiff = if self.options.write_geotiff {
            let path = geotiff_path(image);
            GeoTiffWriter::with_nodata(self.options.nodata).write(image, &transform, &path)?;
            info!("Written GeoTIFF: {:?}", path);
            Some(path)
        } else {
            None
        };

        Ok(Registration {
            image: image.to_path_buf(),
            dimensions,
            transform,
            world_file,
            aux_xml,
            geotiff,
        })
    }
}

/// `site.png` -> `site.geo.tif`; never the source path, even for TIFF input.
pub fn geotiff_path(image: &Path) -> PathBuf {
    image.with_extension("geo.tif")
}
