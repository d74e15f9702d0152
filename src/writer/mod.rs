use gdal::raster::{Buffer, ColorInterpretation, GdalDataType};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager, Metadata};
use std::path::Path;
use tempfile::Builder;

use crate::atomic::{parent_dir, set_output_permissions};
use crate::error::{RegistrationError, Result};
use crate::model::AffineTransform;

const WGS84_EPSG: u32 = 4326;

/// Copies a registered overlay image into a GeoTIFF that carries the
/// transform and WGS84 projection internally.
#[derive(Debug, Clone, Default)]
pub struct GeoTiffWriter {
    nodata: Option<f64>,
}

impl GeoTiffWriter {
    pub fn with_nodata(nodata: Option<f64>) -> Self {
        Self { nodata }
    }

    /// Writes next to `output_path` under a temp name and renames on
    /// success, so a failed conversion never leaves a partial GeoTIFF.
    pub fn write(
        &self,
        source_image: &Path,
        transform: &AffineTransform,
        output_path: &Path,
    ) -> Result<()> {
        let source = Dataset::open(source_image)?;
        check_band_types(&source, source_image)?;

        let staged = Builder::new()
            .prefix(".")
            .suffix(".geo.tif")
            .tempfile_in(parent_dir(output_path))
            .map_err(|e| RegistrationError::io(output_path, e))?
            .into_temp_path();

        self.write_dataset(&source, source_image, transform, &staged)?;

        set_output_permissions(&staged).map_err(|e| RegistrationError::io(output_path, e))?;
        staged
            .persist(output_path)
            .map_err(|e| RegistrationError::io(output_path, e.error))?;

        Ok(())
    }

    fn write_dataset(
        &self,
        source: &Dataset,
        source_image: &Path,
        transform: &AffineTransform,
        path: &Path,
    ) -> Result<()> {
        let (cols, rows) = source.raster_size();
        let band_count = source.raster_count();

        tracing::info!(
            "Converting overlay to GeoTIFF: {} x {} pixels, {} band(s)",
            cols,
            rows,
            band_count
        );

        // GTiffドライバーを取得
        let driver = DriverManager::get_driver_by_name("GTiff")?;

        let mut dataset = driver.create_with_band_type::<u8, _>(path, cols, rows, band_count)?;

        // ジオトランスフォームを設定
        dataset.set_geo_transform(&transform.to_gdal())?;

        // 座標系を設定
        let srs = SpatialRef::from_epsg(WGS84_EPSG)?;
        dataset.set_projection(&srs.to_wkt()?)?;

        // 色の解釈はデータ書き込み前に設定する（PHOTOMETRICが決まるため）
        for index in 1..=band_count {
            let source_band = source.rasterband(index)?;
            let mut band = dataset.rasterband(index)?;

            let interpretation = source_band.color_interpretation();
            if interpretation != ColorInterpretation::Undefined {
                band.set_color_interpretation(interpretation)?;
            }
            if let Some(color_table) = source_band.color_table() {
                band.set_color_table(&color_table);
            }
            if self.nodata.is_some() {
                band.set_no_data_value(self.nodata)?;
            }
        }

        // バンドをコピー
        for index in 1..=band_count {
            let source_band = source.rasterband(index)?;
            let mut buffer: Buffer<u8> =
                source_band.read_as::<u8>((0, 0), (cols, rows), (cols, rows), None)?;

            let mut band = dataset.rasterband(index)?;
            band.write((0, 0), (cols, rows), &mut buffer)?;
        }

        let source_name = source_image
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        dataset.set_metadata_item("SOURCE_OVERLAY", source_name, "")?;

        Ok(())
    }
}

/// Overlays are 8-bit images; anything wider would be truncated by the copy.
fn check_band_types(source: &Dataset, source_image: &Path) -> Result<()> {
    for index in 1..=source.raster_count() {
        let band_type = source.rasterband(index)?.band_type();
        if band_type != GdalDataType::UInt8 {
            return Err(RegistrationError::invalid(
                "band type",
                format!(
                    "band {} of {:?} is {:?}, only 8-bit overlays can be converted",
                    index, source_image, band_type
                ),
            ));
        }
    }
    Ok(())
}
