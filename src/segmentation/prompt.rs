//! Prompt annotations and their flattening into decoder point/label arrays.

use super::error::{Result, SegmentationError};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Label the decoder reads as the top-left corner of a box
pub const BOX_TOP_LEFT_LABEL: f32 = 2.0;
/// Label the decoder reads as the bottom-right corner of a box
pub const BOX_BOTTOM_RIGHT_LABEL: f32 = 3.0;
/// Label of the trailing padding point
pub const PADDING_LABEL: f32 = -1.0;

const KNOWN_TYPES: [&str; 2] = ["point", "rectangle"];

/// One user annotation, in original-image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Annotation {
    /// Click at `(x, y)`; label 1 is foreground, 0 background
    Point { coord: [f32; 2], label: i32 },
    /// Box given as `(x1, y1, x2, y2)`
    Rectangle { coord: [f32; 4] },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireAnnotation {
    Point {
        #[serde(alias = "coord")]
        data: [f32; 2],
        #[serde(deserialize_with = "whole_number")]
        label: i32,
    },
    Rectangle {
        #[serde(alias = "coord")]
        data: [f32; 4],
    },
}

/// Labels arrive as any JSON number; `1` and `1.0` are the same label
fn whole_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i32, D::Error> {
    let value = f64::deserialize(deserializer)?;
    if value.fract() != 0.0 || value < f64::from(i32::MIN) || value > f64::from(i32::MAX) {
        return Err(serde::de::Error::custom(format!(
            "label must be a whole number, got {value}"
        )));
    }
    Ok(value as i32)
}

impl From<WireAnnotation> for Annotation {
    fn from(wire: WireAnnotation) -> Self {
        match wire {
            WireAnnotation::Point { data, label } => Annotation::Point { coord: data, label },
            WireAnnotation::Rectangle { data } => Annotation::Rectangle { coord: data },
        }
    }
}

/// Ordered annotations for one decode.
///
/// Order is preserved all the way into the decoder, so the same annotations in
/// a different order can give different masks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    entries: Vec<Annotation>,
}

impl Prompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn point(mut self, x: f32, y: f32, label: i32) -> Self {
        self.entries.push(Annotation::Point { coord: [x, y], label });
        self
    }

    pub fn rectangle(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.entries.push(Annotation::Rectangle {
            coord: [x1, y1, x2, y2],
        });
        self
    }

    pub fn push(&mut self, annotation: Annotation) {
        self.entries.push(annotation);
    }

    pub fn entries(&self) -> &[Annotation] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse `[{"type": "point", "data": [x, y], "label": 1}, {"type": "rectangle", "data": [x1, y1, x2, y2]}]`
    pub fn from_json(json: &str) -> Result<Self> {
        let values: Vec<Value> = serde_json::from_str(json)?;
        Self::from_values(values)
    }

    /// Build from already-parsed JSON entries, rejecting unknown types
    pub fn from_values(values: Vec<Value>) -> Result<Self> {
        let entries = values
            .into_iter()
            .enumerate()
            .map(|(index, value)| parse_entry(index, value))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }
}

impl FromIterator<Annotation> for Prompt {
    fn from_iter<I: IntoIterator<Item = Annotation>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

fn parse_entry(index: usize, value: Value) -> Result<Annotation> {
    let type_name = match value.get("type") {
        Some(Value::String(name)) => name.clone(),
        Some(other) => {
            return Err(SegmentationError::MalformedPrompt {
                index,
                reason: format!("\"type\" must be a string, got {other}"),
            })
        }
        None => {
            return Err(SegmentationError::MalformedPrompt {
                index,
                reason: "missing \"type\" field".to_string(),
            })
        }
    };

    if !KNOWN_TYPES.contains(&type_name.as_str()) {
        return Err(SegmentationError::UnrecognizedPromptType { index, type_name });
    }

    serde_json::from_value::<WireAnnotation>(value)
        .map(Annotation::from)
        .map_err(|e| SegmentationError::MalformedPrompt {
            index,
            reason: e.to_string(),
        })
}

/// Parallel point and label arrays, padding point included
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPrompt {
    pub points: Vec<[f32; 2]>,
    pub labels: Vec<f32>,
}

impl EncodedPrompt {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Flatten annotations in order: a point emits itself, a rectangle emits its
/// two corners labelled 2 then 3. A `(0, 0)` point labelled -1 is always
/// appended.
pub fn encode_prompt(prompt: &Prompt) -> EncodedPrompt {
    let mut points = Vec::with_capacity(prompt.len() * 2 + 1);
    let mut labels = Vec::with_capacity(prompt.len() * 2 + 1);

    for annotation in prompt.entries() {
        match *annotation {
            Annotation::Point { coord, label } => {
                points.push(coord);
                labels.push(label as f32);
            }
            Annotation::Rectangle {
                coord: [x1, y1, x2, y2],
            } => {
                points.push([x1, y1]);
                labels.push(BOX_TOP_LEFT_LABEL);
                points.push([x2, y2]);
                labels.push(BOX_BOTTOM_RIGHT_LABEL);
            }
        }
    }

    points.push([0.0, 0.0]);
    labels.push(PADDING_LABEL);

    EncodedPrompt { points, labels }
}
