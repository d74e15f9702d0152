use std::io;
use std::path::Path;

use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::debug;

use crate::atomic::write_atomic;
use crate::error::{RegistrationError, Result};

pub const WGS84_WKT: &str = concat!(
    r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,"#,
    r#"AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],"#,
    r#"PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],"#,
    r#"UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],"#,
    r#"AXIS["Latitude",NORTH],AXIS["Longitude",EAST],AUTHORITY["EPSG","4326"]]"#
);

/// GDAL PAM sidecar declaring WGS84 plus the static image-structure hints.
pub fn render_aux_xml() -> io::Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    let mut srs = BytesStart::new("SRS");
    // 経度・緯度の順で軸を解釈させる
    srs.push_attribute(("dataAxisToSRSAxisMapping", "2,1"));

    let mut structure = BytesStart::new("Metadata");
    structure.push_attribute(("domain", "IMAGE_STRUCTURE"));
    let mut interleave = BytesStart::new("MDI");
    interleave.push_attribute(("key", "INTERLEAVE"));

    let mut area_or_point = BytesStart::new("MDI");
    area_or_point.push_attribute(("key", "AREA_OR_POINT"));
    let mut resampling = BytesStart::new("MDI");
    resampling.push_attribute(("key", "RESAMPLING"));

    let events = [
        Event::Start(BytesStart::new("PAMDataset")),
        Event::Start(srs),
        Event::Text(BytesText::from_escaped(partial_escape(WGS84_WKT))),
        Event::End(BytesEnd::new("SRS")),
        Event::Start(structure),
        Event::Start(interleave),
        Event::Text(BytesText::new("PIXEL")),
        Event::End(BytesEnd::new("MDI")),
        Event::End(BytesEnd::new("Metadata")),
        Event::Start(BytesStart::new("Metadata")),
        Event::Start(area_or_point),
        Event::Text(BytesText::new("Area")),
        Event::End(BytesEnd::new("MDI")),
        Event::Start(resampling),
        Event::Text(BytesText::new("NEAREST")),
        Event::End(BytesEnd::new("MDI")),
        Event::End(BytesEnd::new("Metadata")),
        Event::End(BytesEnd::new("PAMDataset")),
    ];

    for event in events {
        writer.write_event(event).map_err(io::Error::other)?;
    }

    let mut xml = String::from_utf8(writer.into_inner())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    xml.push('\n');
    Ok(xml)
}

pub fn write_spatial_reference_sidecar(path: &Path) -> Result<()> {
    debug!("Writing spatial reference sidecar: {:?}", path);
    let xml = render_aux_xml().map_err(|e| RegistrationError::io(path, e))?;
    write_atomic(path, xml.as_bytes())
}
