//! Haar cascade model and its loader.
//!
//! Models are read from OpenCV's `opencv-cascade-classifier` XML format
//! (HAAR features, BOOST stages of decision stumps), which is what the stock
//! `haarcascade_frontalface_*.xml` files use. Tilted features and deeper trees
//! are rejected at load time.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Weighted rectangle of a Haar feature, in window coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HaarRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HaarFeature {
    pub rects: Vec<HaarRect>,
}

/// Decision stump: `feature < threshold` picks `left`, otherwise `right`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeakClassifier {
    pub feature: usize,
    pub threshold: f32,
    pub left: f32,
    pub right: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stage {
    pub threshold: f32,
    pub classifiers: Vec<WeakClassifier>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

impl Cascade {
    pub fn new(
        window_width: u32,
        window_height: u32,
        stages: Vec<Stage>,
        features: Vec<HaarFeature>,
    ) -> Result<Self> {
        if window_width == 0 || window_height == 0 {
            return Err(anyhow!("cascade window must be non-empty"));
        }
        if stages.is_empty() {
            return Err(anyhow!("cascade has no stages"));
        }
        for (i, feature) in features.iter().enumerate() {
            if feature.rects.is_empty() {
                return Err(anyhow!("feature {} has no rectangles", i));
            }
            for r in &feature.rects {
                let inside = |start: u32, len: u32, limit: u32| {
                    start.checked_add(len).is_some_and(|end| end <= limit)
                };
                if !inside(r.x, r.width, window_width) || !inside(r.y, r.height, window_height) {
                    return Err(anyhow!("feature {} extends outside the detection window", i));
                }
            }
        }
        for (s, stage) in stages.iter().enumerate() {
            for weak in &stage.classifiers {
                if weak.feature >= features.len() {
                    return Err(anyhow!(
                        "stage {} references missing feature {}",
                        s,
                        weak.feature
                    ));
                }
            }
        }
        Ok(Self {
            window_width,
            window_height,
            stages,
            features,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let xml = std::fs::read_to_string(path)
            .with_context(|| format!("read cascade file {}", path.display()))?;
        Self::parse_opencv_xml(&xml).with_context(|| format!("parse cascade {}", path.display()))
    }

    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn features(&self) -> &[HaarFeature] {
        &self.features
    }

    pub fn parse_opencv_xml(xml: &str) -> Result<Self> {
        let re = patterns();

        if let Some(kind) = re.feature_type.captures(xml) {
            if !kind[1].eq_ignore_ascii_case("HAAR") {
                return Err(anyhow!("unsupported feature type {}", &kind[1]));
            }
        }
        let window_width = parse_tag_u32(&re.width, xml, "width")?;
        let window_height = parse_tag_u32(&re.height, xml, "height")?;

        let stages_xml = section(xml, "stages")?;
        let mut stages: Vec<Stage> = Vec::new();
        for cap in re.stage_token.captures_iter(stages_xml) {
            if let Some(threshold) = cap.get(1) {
                stages.push(Stage {
                    threshold: parse_f32(threshold.as_str())?,
                    classifiers: Vec::new(),
                });
                continue;
            }
            let (Some(nodes), Some(leaves)) = (cap.get(2), cap.get(3)) else {
                continue;
            };
            let stage = stages
                .last_mut()
                .ok_or_else(|| anyhow!("weak classifier before any stage threshold"))?;
            stage.classifiers.push(parse_stump(nodes.as_str(), leaves.as_str())?);
        }

        let features_xml = section(xml, "features")?;
        let mut features = Vec::new();
        for cap in re.feature.captures_iter(features_xml) {
            if cap.get(2).is_some_and(|t| t.as_str() != "0") {
                return Err(anyhow!("tilted haar features are not supported"));
            }
            let rects = re
                .rect
                .captures_iter(&cap[1])
                .map(|r| parse_rect(&r[1]))
                .collect::<Result<Vec<_>>>()?;
            features.push(HaarFeature { rects });
        }

        Self::new(window_width, window_height, stages, features)
    }
}

struct Patterns {
    feature_type: Regex,
    width: Regex,
    height: Regex,
    stage_token: Regex,
    feature: Regex,
    rect: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        feature_type: Regex::new(r"<featureType>\s*(\w+)\s*</featureType>").unwrap(),
        width: Regex::new(r"<width>\s*(\d+)\s*</width>").unwrap(),
        height: Regex::new(r"<height>\s*(\d+)\s*</height>").unwrap(),
        stage_token: Regex::new(
            r"(?s)<stageThreshold>\s*([^<]+?)\s*</stageThreshold>|<internalNodes>\s*([^<]+?)\s*</internalNodes>\s*<leafValues>\s*([^<]+?)\s*</leafValues>",
        )
        .unwrap(),
        feature: Regex::new(r"(?s)<rects>(.*?)</rects>(?:\s*<tilted>\s*(\d)\s*</tilted>)?").unwrap(),
        rect: Regex::new(r"<_>\s*([^<]+?)\s*</_>").unwrap(),
    })
}

fn section<'a>(xml: &'a str, tag: &str) -> Result<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml
        .find(&open)
        .ok_or_else(|| anyhow!("missing <{}> section", tag))?
        + open.len();
    let len = xml[start..]
        .find(&close)
        .ok_or_else(|| anyhow!("unterminated <{}> section", tag))?;
    Ok(&xml[start..start + len])
}

fn parse_tag_u32(re: &Regex, xml: &str, tag: &str) -> Result<u32> {
    let cap = re
        .captures(xml)
        .ok_or_else(|| anyhow!("missing <{}>", tag))?;
    cap[1]
        .parse()
        .map_err(|_| anyhow!("invalid <{}> value {}", tag, &cap[1]))
}

fn parse_f32(value: &str) -> Result<f32> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("invalid number {}", value))
}

fn parse_stump(nodes: &str, leaves: &str) -> Result<WeakClassifier> {
    let nodes: Vec<&str> = nodes.split_whitespace().collect();
    if nodes.len() != 4 {
        return Err(anyhow!(
            "only single-node trees are supported, got {} node values",
            nodes.len()
        ));
    }
    let feature: usize = nodes[2]
        .parse()
        .map_err(|_| anyhow!("invalid feature index {}", nodes[2]))?;
    let threshold = parse_f32(nodes[3])?;
    let leaves = leaves
        .split_whitespace()
        .map(parse_f32)
        .collect::<Result<Vec<_>>>()?;
    let [left, right] = leaves[..] else {
        return Err(anyhow!("stump needs exactly two leaf values"));
    };
    Ok(WeakClassifier {
        feature,
        threshold,
        left,
        right,
    })
}

fn parse_rect(value: &str) -> Result<HaarRect> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 5 {
        return Err(anyhow!("haar rect needs 5 values, got '{}'", value));
    }
    let coord = |s: &str| -> Result<u32> {
        s.parse()
            .map_err(|_| anyhow!("invalid rect coordinate {}", s))
    };
    Ok(HaarRect {
        x: coord(parts[0])?,
        y: coord(parts[1])?,
        width: coord(parts[2])?,
        height: coord(parts[3])?,
        weight: parse_f32(parts[4])?,
    })
}
