//! Annotation/score join producing per-tile records.
//!
//! Annotation files are Halo XML: every `Region` outside the `Layer 1`
//! tissue outline is one tile, numbered from 1 in document order, located
//! at its first vertex. Scores come from a summary CSV keyed by image tag
//! and `Tile <n>` analysis region.

use crate::model::{Score, SubjectDescriptor, TileRecord};
use crate::prelude::{StepError, StepResult};
use crate::telemetry::log::LogManager;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const OUTLINE_LAYER: &str = "Layer 1";
const TILE_PREFIX: &str = "Tile";
const IMAGE_TAG_COLUMN: &str = "Image Tag";
const REGION_COLUMN: &str = "Analysis Region";

/// Composite join key shared by both sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub subject: String,
    pub slice: String,
    pub tile: u32,
}

/// A tile as read from the annotation file, still in pixel units.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationTile {
    pub index: u32,
    pub layer: String,
    pub x: f64,
    pub y: f64,
}

pub fn tile_label(index: u32) -> String {
    format!("{} {}", TILE_PREFIX, index)
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, String> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        if attr.key.as_ref() == name {
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn coordinate(element: &BytesStart<'_>, name: &[u8]) -> Result<f64, String> {
    let label = String::from_utf8_lossy(name).into_owned();
    let raw = attribute(element, name)?.ok_or_else(|| format!("vertex without {}", label))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|e| format!("vertex {}=`{}`: {}", label, raw, e))
}

/// Parses tiles from annotation XML. Regions without vertices consume their
/// ordinal but yield no tile, so the numbering stays aligned with the scores.
pub fn parse_annotations(xml: &str, logger: &LogManager) -> Result<Vec<AnnotationTile>, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut tiles = Vec::new();
    let mut layer: Option<String> = None;
    let mut ordinal = 0u32;
    let mut region: Option<(u32, Option<(f64, f64)>)> = None;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            format!("XML error at byte {}: {}", reader.buffer_position(), e)
        })?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let empty = matches!(event, Event::Empty(_));
                match e.name().as_ref() {
                    b"Annotation" => {
                        layer = Some(attribute(e, b"Name")?.unwrap_or_default());
                    }
                    b"Region" if layer.as_deref().map_or(false, |l| l != OUTLINE_LAYER) => {
                        ordinal += 1;
                        if empty {
                            let label = tile_label(ordinal);
                            logger.warn(&format!("{} has no vertices; dropped", label));
                        } else {
                            region = Some((ordinal, None));
                        }
                    }
                    b"V" => {
                        if let Some((_, first @ None)) = region.as_mut() {
                            *first = Some((coordinate(e, b"X")?, coordinate(e, b"Y")?));
                        }
                    }
                    _ => {}
                }
            }
            Event::End(ref e) => match e.name().as_ref() {
                b"Region" => {
                    if let Some((index, first)) = region.take() {
                        match first {
                            Some((x, y)) => tiles.push(AnnotationTile {
                                index,
                                layer: layer.clone().unwrap_or_default(),
                                x,
                                y,
                            }),
                            None => logger
                                .warn(&format!("{} has no vertices; dropped", tile_label(index))),
                        }
                    }
                }
                b"Annotation" => layer = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(tiles)
}

/// Latin-1 maps each byte to the code point of the same value.
fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// `6966-A1-AT8.svs` yields subject `6966` and slice `A1`.
fn parse_image_tag(tag: &str) -> Option<(&str, &str)> {
    let mut tokens = tag.trim().split('-');
    let subject = tokens.next()?.trim();
    let slice = tokens.next()?.trim();
    (!subject.is_empty() && !slice.is_empty()).then_some((subject, slice))
}

fn parse_tile_region(region: &str) -> Option<u32> {
    region
        .trim()
        .strip_prefix(TILE_PREFIX)?
        .trim()
        .parse()
        .ok()
}

/// Reads the score table rows belonging to `subject`.
pub fn parse_scores(
    bytes: &[u8],
    score_column: &str,
    subject: &str,
    logger: &LogManager,
) -> Result<HashMap<TileKey, f32>, String> {
    let text = decode_latin1(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|e| e.to_string())?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| format!("score table has no `{}` column", name))
    };
    let tag_idx = column(IMAGE_TAG_COLUMN)?;
    let region_idx = column(REGION_COLUMN)?;
    let score_idx = column(score_column)?;

    let mut scores = HashMap::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| e.to_string())?;
        let tag = record.get(tag_idx).unwrap_or_default();
        let (tag_subject, slice) = match parse_image_tag(tag) {
            Some(parts) => parts,
            None => continue,
        };
        if tag_subject != subject {
            continue;
        }
        let tile = match record.get(region_idx).and_then(parse_tile_region) {
            Some(tile) => tile,
            None => continue,
        };
        let raw = record.get(score_idx).unwrap_or_default().trim();
        let value = match raw.parse::<f32>() {
            Ok(value) => value,
            Err(_) => {
                logger.warn(&format!("row {}: unreadable score `{}`; skipped", row + 2, raw));
                continue;
            }
        };
        let key = TileKey {
            subject: tag_subject.to_string(),
            slice: slice.to_string(),
            tile,
        };
        if scores.contains_key(&key) {
            logger.warn(&format!(
                "row {}: duplicate score for {}; keeping the first",
                row + 2,
                tile_label(tile)
            ));
            continue;
        }
        scores.insert(key, value);
    }
    Ok(scores)
}

pub struct CoordinateExtractor {
    pixel_scale: f64,
    score_table: PathBuf,
    score_column: String,
    logger: LogManager,
}

impl CoordinateExtractor {
    pub fn new(
        pixel_scale: f64,
        score_table: impl Into<PathBuf>,
        score_column: impl Into<String>,
    ) -> Self {
        Self {
            pixel_scale,
            score_table: score_table.into(),
            score_column: score_column.into(),
            logger: LogManager::new(),
        }
    }

    pub fn for_subject(mut self, subject: &str) -> Self {
        self.logger = LogManager::scoped(subject, "extract");
        self
    }

    pub fn score_table(&self) -> &Path {
        &self.score_table
    }

    pub fn extract(&self, subject: &SubjectDescriptor) -> StepResult<Vec<TileRecord>> {
        let xml = fs::read_to_string(&subject.annotation_path)
            .map_err(|e| StepError::io(&subject.annotation_path, e))?;
        let tiles = parse_annotations(&xml, &self.logger)
            .map_err(|e| StepError::parse(&subject.annotation_path, e))?;
        self.logger.record(&format!(
            "read {} tiles from {}",
            tiles.len(),
            subject.annotation_path.display()
        ));

        let bytes = fs::read(&self.score_table).map_err(|e| StepError::io(&self.score_table, e))?;
        let scores = parse_scores(&bytes, &self.score_column, &subject.id, &self.logger)
            .map_err(|e| StepError::parse(&self.score_table, e))?;

        let records = self.join(subject, &tiles, &scores);
        if records.is_empty() {
            return Err(StepError::Validation(format!(
                "no tile of {} matched a score in {}",
                subject.annotation_path.display(),
                self.score_table.display()
            )));
        }
        self.logger.record(&format!("joined {} of {} tiles", records.len(), tiles.len()));
        Ok(records)
    }

    /// Matches tiles to scores and converts pixels with `pixel_scale`.
    pub fn join(
        &self,
        subject: &SubjectDescriptor,
        tiles: &[AnnotationTile],
        scores: &HashMap<TileKey, f32>,
    ) -> Vec<TileRecord> {
        let mut records = Vec::with_capacity(tiles.len());
        for tile in tiles {
            let key = TileKey {
                subject: subject.id.clone(),
                slice: subject.slice_marker.clone(),
                tile: tile.index,
            };
            let label = tile_label(tile.index);
            let value = match scores.get(&key) {
                Some(&value) => value,
                None => {
                    self.logger.warn(&format!("{} has no score; dropped", label));
                    continue;
                }
            };
            let score = match Score::new(value) {
                Some(score) => score,
                None => {
                    self.logger
                        .warn(&format!("{} score {} outside [0, 100]; dropped", label, value));
                    continue;
                }
            };
            records.push(TileRecord {
                tile: label,
                x: tile.x * self.pixel_scale,
                y: tile.y * self.pixel_scale,
                score,
            });
        }
        records
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Annotations>
  <Annotation Name="Layer 1">
    <Regions>
      <Region Id="1"><Vertices><V X="0" Y="0"/><V X="9000" Y="9000"/></Vertices></Region>
    </Regions>
  </Annotation>
  <Annotation Name="Tiles">
    <Regions>
      <Region Id="1"><Vertices><V X="10000" Y="20000"/><V X="11000" Y="20000"/><V X="11000" Y="21000"/><V X="10000" Y="21000"/><V X="10000" Y="20000"/></Vertices></Region>
      <Region Id="2"><Vertices><V X="12000" Y="20000"/><V X="13000" Y="20000"/></Vertices></Region>
      <Region Id="3"/>
      <Region Id="4"><Vertices><V X="14000" Y="22500"/></Vertices></Region>
    </Regions>
  </Annotation>
</Annotations>
"#;

#[cfg(test)]
pub(crate) fn sample_scores(subject: &str) -> Vec<u8> {
    let mut bytes = b"Image Tag,Analysis Region,% AT8 Positive Tissue\n".to_vec();
    bytes.extend_from_slice(format!("{0}-A1-AT8.svs,Layer 1,4.2\n", subject).as_bytes());
    bytes.extend_from_slice(format!("{0}-A1-AT8.svs,Tile 1,30\n", subject).as_bytes());
    bytes.extend_from_slice(format!("{0}-A1-AT8.svs,Tile 2,70\n", subject).as_bytes());
    bytes.extend_from_slice(format!("{0}-A1-AT8.svs,Tile 3,15\n", subject).as_bytes());
    bytes.extend_from_slice(b"9999-A1-AT8.svs,Tile 4,99\n");
    // Latin-1 degree sign in a free-text cell.
    bytes.extend_from_slice(format!("{}-B2-AT8 ", subject).as_bytes());
    bytes.push(0xb0);
    bytes.extend_from_slice(b",Tile 4,50\n");
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::subject::fixture;

    #[test]
    fn outline_layer_is_skipped_and_first_vertex_used() {
        let tiles = parse_annotations(SAMPLE_XML, &LogManager::new()).unwrap();
        let indices: Vec<u32> = tiles.iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![1, 2, 4]);
        assert_eq!((tiles[0].x, tiles[0].y), (10000.0, 20000.0));
        assert_eq!((tiles[2].x, tiles[2].y), (14000.0, 22500.0));
        assert!(tiles.iter().all(|t| t.layer == "Tiles"));
    }

    #[test]
    fn malformed_vertex_is_a_parse_error() {
        let xml = concat!(
            r#"<Annotations><Annotation Name="T"><Regions><Region>"#,
            r#"<Vertices><V X="abc" Y="1"/></Vertices>"#,
            r#"</Region></Regions></Annotation></Annotations>"#,
        );
        assert!(parse_annotations(xml, &LogManager::new()).is_err());
    }

    #[test]
    fn scores_are_keyed_by_subject_slice_and_tile() {
        let scores = parse_scores(
            &sample_scores("6966"),
            "% AT8 Positive Tissue",
            "6966",
            &LogManager::new(),
        )
        .unwrap();
        assert_eq!(scores.len(), 4);
        let key = |slice: &str, tile| TileKey {
            subject: "6966".into(),
            slice: slice.into(),
            tile,
        };
        assert_eq!(scores[&key("A1", 2)], 70.0);
        assert_eq!(scores[&key("B2", 4)], 50.0);
        assert!(!scores.contains_key(&key("A1", 4)));
    }

    #[test]
    fn missing_score_column_is_reported() {
        let err = parse_scores(
            &sample_scores("6966"),
            "% Tau Positive Tissue",
            "6966",
            &LogManager::new(),
        )
        .unwrap_err();
        assert!(err.contains("% Tau Positive Tissue"));
    }

    #[test]
    fn unmatched_tiles_are_dropped_and_pixels_scaled() {
        let subject = fixture("6966", Path::new("/unused"));
        let extractor = CoordinateExtractor::new(0.001, "/unused.csv", "% AT8 Positive Tissue");
        let tiles = parse_annotations(SAMPLE_XML, &LogManager::new()).unwrap();
        let scores = parse_scores(
            &sample_scores("6966"),
            "% AT8 Positive Tissue",
            "6966",
            &LogManager::new(),
        )
        .unwrap();

        let records = extractor.join(&subject, &tiles, &scores);
        // Tile 4 on slice A1 has no score (only B2 does).
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tile, "Tile 1");
        assert_eq!((records[0].x, records[0].y), (10.0, 20.0));
        assert_eq!(records[1].score.value(), 70.0);
    }

    #[test]
    fn out_of_range_scores_are_dropped() {
        let subject = fixture("6966", Path::new("/unused"));
        let extractor = CoordinateExtractor::new(1.0, "/unused.csv", "s");
        let tiles = vec![AnnotationTile { index: 1, layer: "T".into(), x: 1.0, y: 1.0 }];
        let mut scores = HashMap::new();
        scores.insert(TileKey { subject: "6966".into(), slice: "A1".into(), tile: 1 }, 120.0);
        assert!(extractor.join(&subject, &tiles, &scores).is_empty());
    }

    #[test]
    fn extract_with_no_matches_is_a_validation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let subject = fixture("7038", dir.path());
        fs::create_dir_all(subject.annotation_path.parent().unwrap()).unwrap();
        fs::write(&subject.annotation_path, SAMPLE_XML).unwrap();
        let table = dir.path().join("summary.csv");
        fs::write(&table, sample_scores("6966")).unwrap();

        let extractor =
            CoordinateExtractor::new(0.001, &table, "% AT8 Positive Tissue").for_subject("7038");
        let err = extractor.extract(&subject).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn extract_reads_both_sources() {
        let dir = tempfile::tempdir().unwrap();
        let subject = fixture("6966", dir.path());
        fs::create_dir_all(subject.annotation_path.parent().unwrap()).unwrap();
        fs::write(&subject.annotation_path, SAMPLE_XML).unwrap();
        let table = dir.path().join("summary.csv");
        fs::write(&table, sample_scores("6966")).unwrap();

        let extractor = CoordinateExtractor::new(0.001, &table, "% AT8 Positive Tissue");
        let records = extractor.extract(&subject).unwrap();
        assert_eq!(records.len(), 2);
    }
}
