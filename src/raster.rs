use std::path::Path;

use gdal::Dataset;

use crate::error::Result;
use crate::model::ImageDimensions;

/// Reads the pixel size of any raster GDAL can open.
pub fn read_image_dimensions(path: &Path) -> Result<ImageDimensions> {
    let dataset = Dataset::open(path)?;
    let (width, height) = dataset.raster_size();
    Ok(ImageDimensions::new(width, height))
}
