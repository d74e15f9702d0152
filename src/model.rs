/// Geographic extent of an overlay image, in decimal degrees (WGS84).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundingBox {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
        }
    }

    /// KML allows `east < west` for boxes that cross the antimeridian.
    pub fn crosses_antimeridian(&self) -> bool {
        self.east < self.west
    }
}

/// Pixel size of a raster image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: usize,
    pub height: usize,
}

impl ImageDimensions {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned pixel-to-geographic transform.
///
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
///
/// `c`/`f` locate the centre of pixel (0, 0), which is the world file
/// convention. GDAL geotransforms use the pixel corner instead, see
/// [`AffineTransform::to_gdal`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    /// Coefficients in world file line order: A, D, B, E, C, F.
    pub fn world_file_order(&self) -> [f64; 6] {
        [self.a, self.d, self.b, self.e, self.c, self.f]
    }

    pub fn from_world_file_order(values: [f64; 6]) -> Self {
        let [a, d, b, e, c, f] = values;
        Self { a, b, c, d, e, f }
    }

    /// GDAL geotransform: `[ulx, xres, xrot, uly, yrot, yres]` with the
    /// origin at the outer corner of the top-left pixel.
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.c - self.a / 2.0,
            self.a,
            self.b,
            self.f - self.e / 2.0,
            self.d,
            self.e,
        ]
    }

    /// Reconstructs the outer edges of an image of `dims` pixels.
    pub fn bounding_box(&self, dims: ImageDimensions) -> BoundingBox {
        let west = self.c - self.a / 2.0;
        let north = self.f - self.e / 2.0;
        BoundingBox {
            north,
            south: north + self.e * dims.height as f64,
            east: west + self.a * dims.width as f64,
            west,
        }
    }
}
