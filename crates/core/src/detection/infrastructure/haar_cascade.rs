use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array2;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use crate::detection::infrastructure::rect_grouping::group_rectangles;
use crate::shared::region::Region;

/// Stage thresholds are loosened by this much when loaded, as OpenCV does.
const STAGE_THRESHOLD_EPS: f64 = 1e-5;

/// Relative tolerance used when merging overlapping raw detections.
const GROUP_EPS: f64 = 0.2;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("failed to read cascade {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed cascade XML: {0}")]
    Xml(String),
    #[error("invalid cascade: {0}")]
    Format(String),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
}

/// Multi-scale search settings, matching `detectMultiScale`'s defaults.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionParams {
    scale_factor: f64,
    min_neighbors: usize,
    min_size: (u32, u32),
}

impl DetectionParams {
    pub fn new(scale_factor: f64, min_neighbors: usize) -> Result<Self, &'static str> {
        if scale_factor.is_nan() || scale_factor <= 1.0 {
            return Err("scale_factor must be > 1.0");
        }
        Ok(Self {
            scale_factor,
            min_neighbors,
            min_size: (0, 0),
        })
    }

    /// Ignore detection windows smaller than `width` x `height`.
    pub fn with_min_size(mut self, width: u32, height: u32) -> Self {
        self.min_size = (width, height);
        self
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    pub fn min_neighbors(&self) -> usize {
        self.min_neighbors
    }
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: (0, 0),
        }
    }
}

/// A boosted cascade of Haar-like features in OpenCV's XML format.
///
/// Only the current `<cascade>` layout with upright HAAR features is read;
/// LBP/HOG cascades and tilted features are rejected at load time.
#[derive(Debug)]
pub struct HaarCascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<Feature>,
}

#[derive(Debug)]
struct Stage {
    threshold: f64,
    classifiers: Vec<WeakClassifier>,
}

#[derive(Debug)]
struct WeakClassifier {
    nodes: Vec<Node>,
    leaves: Vec<f64>,
}

/// Child links `<= 0` point at leaf `-link`.
#[derive(Debug)]
struct Node {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug)]
struct Feature {
    rects: Vec<WeightedRect>,
}

#[derive(Debug)]
struct WeightedRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

impl HaarCascade {
    pub fn load(path: &Path) -> Result<Self, CascadeError> {
        let xml = std::fs::read_to_string(path).map_err(|source| CascadeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cascade = Self::parse(&xml)?;
        log::debug!(
            "Loaded cascade {} ({}x{} window, {} stages, {} features)",
            path.display(),
            cascade.window_width,
            cascade.window_height,
            cascade.stages.len(),
            cascade.features.len()
        );
        Ok(cascade)
    }

    pub fn parse(xml: &str) -> Result<Self, CascadeError> {
        let document = parse_tree(xml)?;
        let root = document
            .find("cascade")
            .ok_or_else(|| CascadeError::Format("missing <cascade> element".into()))?;

        if let Some(kind) = root.child("featureType") {
            if kind.text != "HAAR" {
                return Err(CascadeError::Unsupported(format!(
                    "{} features",
                    kind.text
                )));
            }
        }

        let window_width: u32 = root.required("width")?.number("width")?;
        let window_height: u32 = root.required("height")?.number("height")?;
        if window_width < 3 || window_height < 3 {
            return Err(CascadeError::Format(format!(
                "window {window_width}x{window_height} is too small"
            )));
        }

        let features = root
            .required("features")?
            .items()
            .map(parse_feature)
            .collect::<Result<Vec<_>, _>>()?;

        let stages = root
            .required("stages")?
            .items()
            .map(|stage| parse_stage(stage, features.len()))
            .collect::<Result<Vec<_>, _>>()?;
        if stages.is_empty() {
            return Err(CascadeError::Format("cascade has no stages".into()));
        }

        for feature in &features {
            for r in &feature.rects {
                if r.x + r.width > window_width || r.y + r.height > window_height {
                    return Err(CascadeError::Format(format!(
                        "feature rect {} {} {} {} exceeds the {}x{} window",
                        r.x, r.y, r.width, r.height, window_width, window_height
                    )));
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

    pub fn window(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    /// Objects found in `image`, merged across overlapping windows and scales.
    pub fn detect(&self, image: &GrayImage, params: &DetectionParams) -> Vec<Region> {
        let raw = self.scan(image, params);
        group_rectangles(&raw, params.min_neighbors, GROUP_EPS)
    }

    /// Every window position and scale the cascade accepts, ungrouped.
    fn scan(&self, image: &GrayImage, params: &DetectionParams) -> Vec<Region> {
        let (width, height) = image.dimensions();
        let mut hits = Vec::new();
        let mut factor = 1.0f64;

        loop {
            let scaled_w = (width as f64 / factor).round() as u32;
            let scaled_h = (height as f64 / factor).round() as u32;
            if scaled_w < self.window_width || scaled_h < self.window_height {
                break;
            }
            let win_w = (self.window_width as f64 * factor).round() as u32;
            let win_h = (self.window_height as f64 * factor).round() as u32;

            if win_w >= params.min_size.0 && win_h >= params.min_size.1 {
                let resized;
                let level = if scaled_w == width && scaled_h == height {
                    image
                } else {
                    resized = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);
                    &resized
                };
                let integral = IntegralImage::new(level);
                let step = if factor > 2.0 { 1 } else { 2 };

                for y in (0..=scaled_h - self.window_height).step_by(step) {
                    for x in (0..=scaled_w - self.window_width).step_by(step) {
                        if !self.accepts(&integral, x, y) {
                            continue;
                        }
                        let hit = Region::clamped(
                            (x as f64 * factor).round() as i64,
                            (y as f64 * factor).round() as i64,
                            win_w as i64,
                            win_h as i64,
                            width,
                            height,
                        );
                        hits.extend(hit);
                    }
                }
            }

            factor *= params.scale_factor;
        }
        hits
    }

    /// Runs every stage on the window whose top-left corner is `(x, y)`.
    fn accepts(&self, integral: &IntegralImage, x: u32, y: u32) -> bool {
        let (nw, nh) = (self.window_width - 2, self.window_height - 2);
        let area = (nw * nh) as f64;
        let sum = integral.sum(x + 1, y + 1, nw, nh);
        let sqsum = integral.sqsum(x + 1, y + 1, nw, nh);
        let variance = area * sqsum - sum * sum;
        let norm = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        self.stages.iter().all(|stage| {
            let total: f64 = stage
                .classifiers
                .iter()
                .map(|weak| weak.predict(|idx| self.features[idx].value(integral, x, y) / norm))
                .sum();
            total >= stage.threshold
        })
    }
}

impl WeakClassifier {
    fn predict(&self, mut feature_value: impl FnMut(usize) -> f64) -> f64 {
        let mut idx = 0i32;
        loop {
            let node = &self.nodes[idx as usize];
            idx = if feature_value(node.feature) < node.threshold {
                node.left
            } else {
                node.right
            };
            if idx <= 0 {
                return self.leaves[(-idx) as usize];
            }
        }
    }
}

impl Feature {
    fn value(&self, integral: &IntegralImage, x: u32, y: u32) -> f64 {
        self.rects
            .iter()
            .map(|r| r.weight * integral.sum(x + r.x, y + r.y, r.width, r.height))
            .sum()
    }
}

/// Summed-area tables of pixel values and squared pixel values.
struct IntegralImage {
    sum: Array2<f64>,
    sqsum: Array2<f64>,
}

impl IntegralImage {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let mut sum = Array2::<f64>::zeros((h + 1, w + 1));
        let mut sqsum = Array2::<f64>::zeros((h + 1, w + 1));
        for y in 0..h {
            let (mut row, mut row_sq) = (0.0, 0.0);
            for x in 0..w {
                let v = image.get_pixel(x as u32, y as u32).0[0] as f64;
                row += v;
                row_sq += v * v;
                sum[[y + 1, x + 1]] = sum[[y, x + 1]] + row;
                sqsum[[y + 1, x + 1]] = sqsum[[y, x + 1]] + row_sq;
            }
        }
        Self { sum, sqsum }
    }

    fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        rect_total(&self.sum, x, y, w, h)
    }

    fn sqsum(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        rect_total(&self.sqsum, x, y, w, h)
    }
}

fn rect_total(table: &Array2<f64>, x: u32, y: u32, w: u32, h: u32) -> f64 {
    let (x0, y0) = (x as usize, y as usize);
    let (x1, y1) = (x0 + w as usize, y0 + h as usize);
    table[[y1, x1]] - table[[y0, x1]] - table[[y1, x0]] + table[[y0, x0]]
}

fn parse_stage(node: &XmlNode, feature_count: usize) -> Result<Stage, CascadeError> {
    let threshold: f64 = node.required("stageThreshold")?.number("stageThreshold")?;
    let classifiers = node
        .required("weakClassifiers")?
        .items()
        .map(|weak| parse_weak_classifier(weak, feature_count))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Stage {
        threshold: threshold - STAGE_THRESHOLD_EPS,
        classifiers,
    })
}

fn parse_weak_classifier(
    node: &XmlNode,
    feature_count: usize,
) -> Result<WeakClassifier, CascadeError> {
    let raw: Vec<f64> = node.required("internalNodes")?.numbers("internalNodes")?;
    let leaves: Vec<f64> = node.required("leafValues")?.numbers("leafValues")?;
    if raw.is_empty() || raw.len() % 4 != 0 {
        return Err(CascadeError::Format(format!(
            "internalNodes has {} values, expected groups of 4",
            raw.len()
        )));
    }

    let nodes: Vec<Node> = raw
        .chunks_exact(4)
        .map(|c| Node {
            left: c[0] as i32,
            right: c[1] as i32,
            feature: c[2] as usize,
            threshold: c[3],
        })
        .collect();

    for node in &nodes {
        if node.feature >= feature_count {
            return Err(CascadeError::Format(format!(
                "feature index {} out of range ({feature_count} features)",
                node.feature
            )));
        }
        for link in [node.left, node.right] {
            let in_range = if link > 0 {
                (link as usize) < nodes.len()
            } else {
                ((-link) as usize) < leaves.len()
            };
            if !in_range {
                return Err(CascadeError::Format(format!("tree link {link} out of range")));
            }
        }
    }

    Ok(WeakClassifier { nodes, leaves })
}

fn parse_feature(node: &XmlNode) -> Result<Feature, CascadeError> {
    if node.child("tilted").is_some_and(|t| t.text.trim() != "0") {
        return Err(CascadeError::Unsupported("tilted Haar features".into()));
    }
    let rects = node
        .required("rects")?
        .items()
        .map(|rect| {
            let v: Vec<f64> = rect.numbers("rects")?;
            if v.len() != 5 || v[..4].iter().any(|n| *n < 0.0) {
                return Err(CascadeError::Format(format!(
                    "feature rect {:?} is not \"x y w h weight\"",
                    rect.text
                )));
            }
            Ok(WeightedRect {
                x: v[0] as u32,
                y: v[1] as u32,
                width: v[2] as u32,
                height: v[3] as u32,
                weight: v[4],
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if rects.is_empty() {
        return Err(CascadeError::Format("feature without rects".into()));
    }
    Ok(Feature { rects })
}

/// Minimal element tree; cascades use no attributes we care about.
#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn named(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn required(&self, name: &str) -> Result<&XmlNode, CascadeError> {
        self.child(name).ok_or_else(|| {
            CascadeError::Format(format!("<{}> is missing <{name}>", self.name))
        })
    }

    /// Depth-first search for the first element called `name`.
    fn find(&self, name: &str) -> Option<&XmlNode> {
        self.children
            .iter()
            .find_map(|c| if c.name == name { Some(c) } else { c.find(name) })
    }

    /// Anonymous `<_>` list entries.
    fn items(&self) -> impl Iterator<Item = &XmlNode> {
        self.children.iter().filter(|c| c.name == "_")
    }

    fn number<T: std::str::FromStr>(&self, what: &str) -> Result<T, CascadeError> {
        self.text
            .trim()
            .parse()
            .map_err(|_| CascadeError::Format(format!("bad number {:?} in <{what}>", self.text)))
    }

    fn numbers<T: std::str::FromStr>(&self, what: &str) -> Result<Vec<T>, CascadeError> {
        self.text
            .split_whitespace()
            .map(|tok| {
                tok.parse()
                    .map_err(|_| CascadeError::Format(format!("bad number {tok:?} in <{what}>")))
            })
            .collect()
    }
}

fn parse_tree(xml: &str) -> Result<XmlNode, CascadeError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut stack = vec![XmlNode::named("#document".into())];

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                stack.push(XmlNode::named(name));
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(XmlNode::named(name));
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| CascadeError::Xml(e.to_string()))?;
                if let Some(current) = stack.last_mut() {
                    if !current.text.is_empty() {
                        current.text.push(' ');
                    }
                    current.text.push_str(text.trim());
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(CascadeError::Xml("unexpected closing tag".into()));
                }
                if let Some(done) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(done);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(CascadeError::Xml(e.to_string())),
        }
    }

    if stack.len() != 1 {
        return Err(CascadeError::Xml("unclosed element at end of input".into()));
    }
    stack
        .pop()
        .ok_or_else(|| CascadeError::Xml("empty document".into()))
}
