use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

use crate::error::{RegistrationError, Result};
use crate::model::BoundingBox;

/// Raw `<LatLonBox>` text. Values are kept as written so that errors can
/// quote the offending field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatLonBox {
    pub north: Option<String>,
    pub south: Option<String>,
    pub east: Option<String>,
    pub west: Option<String>,
    pub rotation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundOverlay {
    pub name: Option<String>,
    pub href: Option<String>,
    pub lat_lon_box: LatLonBox,
}

impl GroundOverlay {
    pub fn image_href(&self) -> Result<&str> {
        match self.href.as_deref().map(str::trim) {
            Some(href) if !href.is_empty() => Ok(href),
            _ => Err(RegistrationError::invalid("href", "ground overlay has no <Icon><href>")),
        }
    }

    pub fn bounding_box(&self) -> Result<BoundingBox> {
        let llb = &self.lat_lon_box;

        if let Some(raw) = &llb.rotation {
            let rotation = parse_degrees("rotation", raw)?;
            if rotation != 0.0 {
                return Err(RegistrationError::invalid(
                    "rotation",
                    format!("rotated overlays are not supported (rotation {})", rotation),
                ));
            }
        }

        Ok(BoundingBox {
            north: coordinate("north", &llb.north)?,
            south: coordinate("south", &llb.south)?,
            east: coordinate("east", &llb.east)?,
            west: coordinate("west", &llb.west)?,
        })
    }
}

fn coordinate(field: &'static str, raw: &Option<String>) -> Result<f64> {
    match raw {
        Some(raw) => parse_degrees(field, raw),
        None => Err(RegistrationError::invalid(field, "missing from <LatLonBox>")),
    }
}

fn parse_degrees(field: &'static str, raw: &str) -> Result<f64> {
    raw.trim().parse::<f64>().map_err(|_| {
        RegistrationError::invalid(field, format!("'{}' is not a decimal degree value", raw.trim()))
    })
}

/// Collects every `<GroundOverlay>` in a KML document. Only malformed XML
/// fails here; missing fields surface later from [`GroundOverlay::bounding_box`].
pub fn parse_ground_overlays(xml: &str, source: &Path) -> Result<Vec<GroundOverlay>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let kml_error = |message: String| RegistrationError::Kml {
        path: source.to_path_buf(),
        message,
    };

    let mut overlays = Vec::new();
    let mut current: Option<GroundOverlay> = None;
    let mut stack: Vec<String> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| kml_error(format!("at position {}: {}", reader.buffer_position(), e)))?;

        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "GroundOverlay" {
                    current = Some(GroundOverlay::default());
                }
                stack.push(name);
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack.pop();
                if name == "GroundOverlay" {
                    if let Some(overlay) = current.take() {
                        debug!("Parsed ground overlay: {:?}", overlay);
                        overlays.push(overlay);
                    }
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| kml_error(e.to_string()))?;
                if let Some(overlay) = current.as_mut() {
                    assign_text(overlay, &stack, &text);
                }
            }
            Event::CData(c) => {
                let bytes = c.into_inner();
                let text = String::from_utf8_lossy(&bytes);
                if let Some(overlay) = current.as_mut() {
                    assign_text(overlay, &stack, &text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(overlays)
}

fn assign_text(overlay: &mut GroundOverlay, stack: &[String], text: &str) {
    let (element, parent) = match stack {
        [.., parent, element] => (element.as_str(), parent.as_str()),
        _ => return,
    };

    let slot = match (parent, element) {
        ("GroundOverlay", "name") => &mut overlay.name,
        ("Icon", "href") => &mut overlay.href,
        ("LatLonBox", "north") => &mut overlay.lat_lon_box.north,
        ("LatLonBox", "south") => &mut overlay.lat_lon_box.south,
        ("LatLonBox", "east") => &mut overlay.lat_lon_box.east,
        ("LatLonBox", "west") => &mut overlay.lat_lon_box.west,
        ("LatLonBox", "rotation") => &mut overlay.lat_lon_box.rotation,
        _ => return,
    };

    slot.get_or_insert_with(String::new).push_str(text);
}

pub fn read_kml_file(path: &Path) -> Result<Vec<GroundOverlay>> {
    let xml = std::fs::read_to_string(path).map_err(|e| RegistrationError::io(path, e))?;
    parse_ground_overlays(&xml, path)
}
