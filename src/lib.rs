mod atomic;
pub mod aux_xml;
pub mod batch;
pub mod error;
pub mod image_format;
pub mod kml;
pub mod kmz;
pub mod model;
pub mod raster;
pub mod registrar;
pub mod transform;
pub mod world_file;
pub mod writer;

pub use batch::{
    collect_overlay_sources, register_sources, source_output_dir, BatchReport, OverlaySource,
};
pub use error::{RegistrationError, Result};
pub use image_format::ImageFormat;
pub use kml::GroundOverlay;
pub use kmz::KmzArchive;
pub use model::{AffineTransform, BoundingBox, ImageDimensions};
pub use registrar::{GeoRegistrar, Registration, RegistrationOptions};
pub use transform::compute_transform;
pub use writer::GeoTiffWriter;
