use crate::error::{RegistrationError, Result};
use crate::model::{AffineTransform, BoundingBox, ImageDimensions};

/// Derives the world file transform for an image of `dims` pixels that
/// covers `bbox` exactly.
pub fn compute_transform(bbox: &BoundingBox, dims: ImageDimensions) -> Result<AffineTransform> {
    validate(bbox, dims)?;

    let east = if bbox.crosses_antimeridian() {
        bbox.east + 360.0
    } else {
        bbox.east
    };

    let dim_x = (east - bbox.west) / dims.width as f64;
    let dim_y = (bbox.south - bbox.north) / dims.height as f64;
    if !dim_x.is_finite() || !dim_y.is_finite() || dim_x == 0.0 || dim_y == 0.0 {
        return Err(RegistrationError::invalid(
            "bbox",
            format!("pixel size ({}, {}) is not representable", dim_x, dim_y),
        ));
    }

    Ok(AffineTransform {
        a: dim_x,
        b: 0.0,
        c: bbox.west + dim_x / 2.0,
        d: 0.0,
        e: dim_y,
        f: bbox.north + dim_y / 2.0,
    })
}

fn validate(bbox: &BoundingBox, dims: ImageDimensions) -> Result<()> {
    if dims.width == 0 {
        return Err(RegistrationError::invalid("width", "image width must be positive"));
    }
    if dims.height == 0 {
        return Err(RegistrationError::invalid("height", "image height must be positive"));
    }

    for (field, value) in [
        ("north", bbox.north),
        ("south", bbox.south),
        ("east", bbox.east),
        ("west", bbox.west),
    ] {
        if !value.is_finite() {
            return Err(RegistrationError::invalid(field, format!("{} is not a finite number", value)));
        }
    }

    for (field, value, limit) in [
        ("north", bbox.north, 90.0),
        ("south", bbox.south, 90.0),
        ("east", bbox.east, 180.0),
        ("west", bbox.west, 180.0),
    ] {
        if value.abs() > limit {
            return Err(RegistrationError::invalid(
                field,
                format!("{} is outside [-{}, {}]", value, limit, limit),
            ));
        }
    }

    if bbox.north <= bbox.south {
        return Err(RegistrationError::invalid(
            "north",
            format!("north ({}) must be greater than south ({})", bbox.north, bbox.south),
        ));
    }
    if bbox.east == bbox.west {
        return Err(RegistrationError::invalid(
            "east",
            format!("east and west are both {}", bbox.east),
        ));
    }

    Ok(())
}
