// This file is part of Xenon.
//
// Xenon is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Xenon is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Xenon.  If not, see <http://www.gnu.org/licenses/>.

//! Pure parsers for the pyramid manifests: DeepZoom `.dzi` and Zoomify
//! `ImageProperties.xml` (XML), IIIF `info.json` and tarzoom `.tzi` (JSON).
//! All of them reduce to image dimensions, tiling parameters and, for the
//! archive formats, a byte-offset table.

use crate::LayoutError;
use quick_xml::{events::Event, Reader};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageDims {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub overlap: u32,
    pub format: String,
}

/// Byte-offset table of a tarzoom archive. `offsets` has one entry per
/// stored segment plus a trailing end offset; segment i occupies
/// [offsets[i], offsets[i+1]). Interleaved archives store `channels`
/// consecutive segments per tile.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArchiveIndex {
    pub dims: ImageDims,
    pub channels: u32,
    pub offsets: Vec<u64>,
}

fn attr_u32(value: &[u8]) -> Option<u32> {
    std::str::from_utf8(value).ok()?.trim().parse().ok()
}

/// DeepZoom descriptor:
/// `<Image TileSize="256" Overlap="1" Format="jpeg"><Size Width="w" Height="h"/></Image>`
pub fn parse_dzi(xml: &str) -> Result<ImageDims, LayoutError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut tile_size = None;
    let mut overlap = None;
    let mut format = "jpg".to_owned();
    let mut width = None;
    let mut height = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                // DZI files may carry a namespace prefix; match on the tail.
                let name = e.name();
                let local = name.as_ref().rsplit(|&b| b == b':').next().unwrap_or(b"");
                match local {
                    b"Image" => {
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"TileSize" => tile_size = attr_u32(&attr.value),
                                b"Overlap" => overlap = attr_u32(&attr.value),
                                b"Format" => {
                                    format = String::from_utf8_lossy(&attr.value).into_owned()
                                }
                                _ => {}
                            }
                        }
                    }
                    b"Size" => {
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"Width" => width = attr_u32(&attr.value),
                                b"Height" => height = attr_u32(&attr.value),
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(LayoutError::Manifest(format!("dzi: {}", err))),
            _ => {}
        }
    }
    match (width, height, tile_size) {
        (Some(width), Some(height), Some(tile_size)) if width > 0 && height > 0 => Ok(ImageDims {
            width,
            height,
            tile_size,
            overlap: overlap.unwrap_or(0),
            format,
        }),
        _ => Err(LayoutError::Manifest(
            "dzi: missing Size or TileSize".to_owned(),
        )),
    }
}

/// Zoomify descriptor:
/// `<IMAGE_PROPERTIES WIDTH="w" HEIGHT="h" NUMTILES="n" VERSION="1.8" TILESIZE="256"/>`
pub fn parse_zoomify(xml: &str) -> Result<ImageDims, LayoutError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"IMAGE_PROPERTIES" {
                    let mut width = None;
                    let mut height = None;
                    let mut tile_size = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"WIDTH" => width = attr_u32(&attr.value),
                            b"HEIGHT" => height = attr_u32(&attr.value),
                            b"TILESIZE" => tile_size = attr_u32(&attr.value),
                            _ => {}
                        }
                    }
                    return match (width, height, tile_size) {
                        (Some(width), Some(height), Some(tile_size)) => Ok(ImageDims {
                            width,
                            height,
                            tile_size,
                            overlap: 0,
                            format: "jpg".to_owned(),
                        }),
                        _ => Err(LayoutError::Manifest(
                            "zoomify: missing WIDTH/HEIGHT/TILESIZE".to_owned(),
                        )),
                    };
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(LayoutError::Manifest(format!("zoomify: {}", err))),
            _ => {}
        }
    }
    Err(LayoutError::Manifest(
        "zoomify: no IMAGE_PROPERTIES element".to_owned(),
    ))
}

/// IIIF Image API `info.json`, level-0 or better.
pub fn parse_iiif_info(text: &str) -> Result<ImageDims, LayoutError> {
    let value =
        json::parse(text).map_err(|err| LayoutError::Manifest(format!("info.json: {}", err)))?;
    let width = value["width"]
        .as_u32()
        .ok_or_else(|| LayoutError::Manifest("info.json: missing width".to_owned()))?;
    let height = value["height"]
        .as_u32()
        .ok_or_else(|| LayoutError::Manifest("info.json: missing height".to_owned()))?;
    let tile_size = value["tiles"][0]["width"].as_u32().unwrap_or(256);
    Ok(ImageDims {
        width,
        height,
        tile_size,
        overlap: 0,
        format: "jpg".to_owned(),
    })
}

/// Tarzoom index. Per-channel archives carry one segment per tile;
/// interleaved archives declare `channels` and store that many consecutive
/// segments per tile.
pub fn parse_tzi(text: &str) -> Result<ArchiveIndex, LayoutError> {
    let value = json::parse(text).map_err(|err| LayoutError::Manifest(format!("tzi: {}", err)))?;
    let width = value["width"]
        .as_u32()
        .ok_or_else(|| LayoutError::Manifest("tzi: missing width".to_owned()))?;
    let height = value["height"]
        .as_u32()
        .ok_or_else(|| LayoutError::Manifest("tzi: missing height".to_owned()))?;
    let tile_size = value["tilesize"]
        .as_u32()
        .ok_or_else(|| LayoutError::Manifest("tzi: missing tilesize".to_owned()))?;
    let overlap = value["overlap"].as_u32().unwrap_or(0);
    let format = value["format"].as_str().unwrap_or("jpg").to_owned();
    let channels = value["channels"].as_u32().unwrap_or(1);
    let mut offsets = Vec::with_capacity(value["offsets"].len());
    for member in value["offsets"].members() {
        offsets.push(
            member
                .as_u64()
                .ok_or_else(|| LayoutError::Manifest("tzi: non-integer offset".to_owned()))?,
        );
    }
    if offsets.len() < 2 || offsets.windows(2).any(|w| w[1] < w[0]) {
        return Err(LayoutError::Manifest(
            "tzi: offsets must be a non-decreasing list".to_owned(),
        ));
    }
    Ok(ArchiveIndex {
        dims: ImageDims {
            width,
            height,
            tile_size,
            overlap,
            format,
        },
        channels,
        offsets,
    })
}

impl ArchiveIndex {
    /// Byte span of flat segment `i`.
    pub fn segment(&self, i: usize) -> Option<(u64, u64)> {
        if i + 1 < self.offsets.len() {
            Some((self.offsets[i], self.offsets[i + 1]))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const DZI: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
       TileSize="256" Overlap="1" Format="jpeg">
  <Size Width="13920" Height="10200"/>
</Image>"#;

    #[test]
    fn test_parse_dzi() {
        let dims = parse_dzi(DZI).unwrap();
        assert_eq!(dims.width, 13920);
        assert_eq!(dims.height, 10200);
        assert_eq!(dims.tile_size, 256);
        assert_eq!(dims.overlap, 1);
        assert_eq!(dims.format, "jpeg");
    }

    #[test]
    fn test_parse_dzi_rejects_empty() {
        assert!(parse_dzi("<Image TileSize=\"256\"/>").is_err());
    }

    #[test]
    fn test_parse_zoomify() {
        let xml = r#"<IMAGE_PROPERTIES WIDTH="8000" HEIGHT="6000" NUMTILES="861"
            NUMIMAGES="1" VERSION="1.8" TILESIZE="256"/>"#;
        let dims = parse_zoomify(xml).unwrap();
        assert_eq!(dims.width, 8000);
        assert_eq!(dims.height, 6000);
        assert_eq!(dims.tile_size, 256);
    }

    #[test]
    fn test_parse_iiif() {
        let text = r#"{
            "@context": "http://iiif.io/api/image/3/context.json",
            "width": 4096, "height": 3072,
            "tiles": [{"width": 512, "scaleFactors": [1, 2, 4, 8]}]
        }"#;
        let dims = parse_iiif_info(text).unwrap();
        assert_eq!(dims.width, 4096);
        assert_eq!(dims.height, 3072);
        assert_eq!(dims.tile_size, 512);
    }

    #[test]
    fn test_parse_tzi_interleaved() {
        let text = r#"{
            "width": 512, "height": 512, "tilesize": 256, "overlap": 0,
            "format": "jpg", "channels": 3,
            "offsets": [0, 10, 25, 40, 100, 130, 150, 200, 220, 240, 280, 300, 340, 400, 430, 450]
        }"#;
        let index = parse_tzi(text).unwrap();
        assert_eq!(index.channels, 3);
        assert_eq!(index.segment(0), Some((0, 10)));
        assert_eq!(index.segment(2), Some((25, 40)));
        assert_eq!(index.segment(14), Some((430, 450)));
        assert_eq!(index.segment(15), None);
    }

    #[test]
    fn test_parse_tzi_rejects_shuffled_offsets() {
        let text = r#"{"width": 256, "height": 256, "tilesize": 256,
                       "offsets": [0, 50, 20]}"#;
        assert!(parse_tzi(text).is_err());
    }
}
