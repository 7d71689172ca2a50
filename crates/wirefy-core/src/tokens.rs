//! Design token extraction
//!
//! Walks a Figma document node and collects the visual constants a
//! developer needs to rebuild it: colors, typography, spacing, corner
//! radii, text content and the root frame size.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Nodes deeper than this are ignored
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorToken {
    /// `#RRGGBB` or `#RRGGBBAA` when translucent
    pub hex: String,
    /// How many fills/strokes use this color
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypographyToken {
    pub font_family: String,
    pub font_size: f64,
    pub font_weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_height: Option<f64>,
}

/// Visual constants extracted from a node tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesignTokens {
    pub colors: Vec<ColorToken>,
    pub typography: Vec<TypographyToken>,
    pub spacing: Vec<f64>,
    pub radii: Vec<f64>,
    pub texts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

impl DesignTokens {
    /// Collect tokens from a Figma `document` node
    pub fn from_node(node: &Value) -> Self {
        let mut tokens = DesignTokens::default();
        let mut color_counts: HashMap<String, u32> = HashMap::new();

        if let Some(bbox) = node.get("absoluteBoundingBox") {
            tokens.width = bbox.get("width").and_then(Value::as_f64);
            tokens.height = bbox.get("height").and_then(Value::as_f64);
        }

        walk(node, 0, &mut tokens, &mut color_counts);

        let mut colors: Vec<ColorToken> = color_counts
            .into_iter()
            .map(|(hex, count)| ColorToken { hex, count })
            .collect();
        colors.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.hex.cmp(&b.hex)));
        tokens.colors = colors;

        sort_dedup(&mut tokens.spacing);
        sort_dedup(&mut tokens.radii);
        tokens
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
            && self.typography.is_empty()
            && self.spacing.is_empty()
            && self.radii.is_empty()
            && self.texts.is_empty()
            && self.width.is_none()
    }

    /// Render the tokens as markdown tables
    pub fn to_markdown(&self) -> String {
        if self.is_empty() {
            return "_No design tokens found._\n".to_string();
        }

        let mut out = String::new();

        if let (Some(w), Some(h)) = (self.width, self.height) {
            out.push_str(&format!("**Frame size**: {} × {}\n\n", px(w), px(h)));
        }

        if !self.colors.is_empty() {
            out.push_str("### Colors\n\n| Token | Value | Uses |\n|---|---|---|\n");
            for (i, c) in self.colors.iter().enumerate() {
                out.push_str(&format!("| color-{} | `{}` | {} |\n", i + 1, c.hex, c.count));
            }
            out.push('\n');
        }

        if !self.typography.is_empty() {
            out.push_str(
                "### Typography\n\n| Token | Family | Size | Weight | Line height |\n|---|---|---|---|---|\n",
            );
            for (i, t) in self.typography.iter().enumerate() {
                let line_height = t.line_height.map(px).unwrap_or_else(|| "-".to_string());
                out.push_str(&format!(
                    "| text-{} | {} | {} | {} | {} |\n",
                    i + 1,
                    t.font_family,
                    px(t.font_size),
                    number(t.font_weight),
                    line_height
                ));
            }
            out.push('\n');
        }

        if !self.spacing.is_empty() {
            out.push_str("### Spacing\n\n| Token | Value |\n|---|---|\n");
            for (i, s) in self.spacing.iter().enumerate() {
                out.push_str(&format!("| space-{} | {} |\n", i + 1, px(*s)));
            }
            out.push('\n');
        }

        if !self.radii.is_empty() {
            out.push_str("### Corner radius\n\n| Token | Value |\n|---|---|\n");
            for (i, r) in self.radii.iter().enumerate() {
                out.push_str(&format!("| radius-{} | {} |\n", i + 1, px(*r)));
            }
            out.push('\n');
        }

        if !self.texts.is_empty() {
            out.push_str("### Text content\n\n");
            for text in &self.texts {
                out.push_str(&format!("- \"{}\"\n", text.replace('\n', " ")));
            }
            out.push('\n');
        }

        out
    }
}

fn walk(node: &Value, depth: usize, tokens: &mut DesignTokens, colors: &mut HashMap<String, u32>) {
    if depth > MAX_DEPTH || node.get("visible").and_then(Value::as_bool) == Some(false) {
        return;
    }

    for key in ["fills", "strokes"] {
        if let Some(paints) = node.get(key).and_then(Value::as_array) {
            for paint in paints {
                if let Some(hex) = solid_paint_hex(paint) {
                    *colors.entry(hex).or_insert(0) += 1;
                }
            }
        }
    }

    let node_type = node.get("type").and_then(Value::as_str).unwrap_or_default();
    if node_type == "TEXT" {
        if let Some(style) = node.get("style") {
            if let Some(token) = typography_from_style(style) {
                if !tokens.typography.contains(&token) {
                    tokens.typography.push(token);
                }
            }
        }
        if let Some(chars) = node.get("characters").and_then(Value::as_str) {
            let chars = chars.trim();
            if !chars.is_empty() {
                tokens.texts.push(chars.to_string());
            }
        }
    }

    for key in ["paddingLeft", "paddingRight", "paddingTop", "paddingBottom", "itemSpacing"] {
        if let Some(v) = node.get(key).and_then(Value::as_f64) {
            if v > 0.0 {
                tokens.spacing.push(v);
            }
        }
    }

    if let Some(r) = node.get("cornerRadius").and_then(Value::as_f64) {
        if r > 0.0 {
            tokens.radii.push(r);
        }
    }

    if let Some(children) = node.get("children").and_then(Value::as_array) {
        for child in children {
            walk(child, depth + 1, tokens, colors);
        }
    }
}

fn solid_paint_hex(paint: &Value) -> Option<String> {
    if paint.get("type").and_then(Value::as_str) != Some("SOLID")
        || paint.get("visible").and_then(Value::as_bool) == Some(false)
    {
        return None;
    }
    let color = paint.get("color")?;
    let channel = |k: &str| color.get(k).and_then(Value::as_f64);
    let (r, g, b) = (channel("r")?, channel("g")?, channel("b")?);
    let alpha = channel("a").unwrap_or(1.0) * paint.get("opacity").and_then(Value::as_f64).unwrap_or(1.0);
    Some(to_hex(r, g, b, alpha))
}

/// Convert Figma's 0..1 float channels to a hex string
pub fn to_hex(r: f64, g: f64, b: f64, alpha: f64) -> String {
    let byte = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let a = byte(alpha);
    if a < u8::MAX {
        format!("#{:02X}{:02X}{:02X}{a:02X}", byte(r), byte(g), byte(b))
    } else {
        format!("#{:02X}{:02X}{:02X}", byte(r), byte(g), byte(b))
    }
}

fn typography_from_style(style: &Value) -> Option<TypographyToken> {
    Some(TypographyToken {
        font_family: style.get("fontFamily")?.as_str()?.to_string(),
        font_size: style.get("fontSize")?.as_f64()?,
        font_weight: style.get("fontWeight").and_then(Value::as_f64).unwrap_or(400.0),
        line_height: style.get("lineHeightPx").and_then(Value::as_f64),
    })
}

fn sort_dedup(values: &mut Vec<f64>) {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    values.dedup();
}

fn number(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        let s = format!("{v:.2}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn px(v: f64) -> String {
    format!("{}px", number(v))
}
