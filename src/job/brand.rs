use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const MAX_COLORS: usize = 5;
const MAX_TAGLINE_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrandTone {
    #[default]
    Professional,
    Casual,
    Playful,
    Luxury,
    Technical,
}

impl fmt::Display for BrandTone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BrandTone::Professional => "professional",
            BrandTone::Casual => "casual",
            BrandTone::Playful => "playful",
            BrandTone::Luxury => "luxury",
            BrandTone::Technical => "technical",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorUsage {
    Primary,
    Accent,
    Background,
    #[default]
    General,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandColor {
    /// Six hex digits, no leading `#`.
    pub hex_code: String,
    pub name: String,
    #[serde(default)]
    pub usage: ColorUsage,
}

/// Brand guide applied to every generated asset of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandStyle {
    #[serde(default)]
    pub tone: BrandTone,
    pub colors: Vec<BrandColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagline: Option<String>,
}

impl BrandStyle {
    pub fn new(tone: BrandTone) -> Self {
        Self {
            tone,
            colors: Vec::new(),
            tagline: None,
        }
    }

    pub fn with_color(mut self, hex_code: impl Into<String>, name: impl Into<String>, usage: ColorUsage) -> Self {
        self.colors.push(BrandColor {
            hex_code: hex_code.into(),
            name: name.into(),
            usage,
        });
        self
    }

    pub fn with_tagline(mut self, tagline: impl Into<String>) -> Self {
        self.tagline = Some(tagline.into());
        self
    }

    /// The color marked primary, else the first one.
    pub fn primary(&self) -> Option<&BrandColor> {
        self.colors
            .iter()
            .find(|c| c.usage == ColorUsage::Primary)
            .or_else(|| self.colors.first())
    }

    /// Prompt fragment naming the primary color and up to two others.
    pub fn palette(&self) -> Option<String> {
        let primary = self.primary()?;
        let mut text = format!("Primary color: {} (#{})", primary.name, primary.hex_code);
        let others: Vec<String> = self
            .colors
            .iter()
            .take(3)
            .filter(|c| *c != primary)
            .map(|c| format!("{} (#{})", c.name, c.hex_code))
            .collect();
        if !others.is_empty() {
            text.push_str(". Additional colors: ");
            text.push_str(&others.join(", "));
        }
        Some(text)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.colors.is_empty() || self.colors.len() > MAX_COLORS {
            return Err(ValidationError::new(format!(
                "brand_style.colors must list between 1 and {MAX_COLORS} colors, got {}",
                self.colors.len()
            )));
        }
        for color in &self.colors {
            if color.hex_code.len() != 6 || !color.hex_code.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ValidationError::new(format!(
                    "brand_style color {:?} needs a six-digit hex code without '#', got {:?}",
                    color.name, color.hex_code
                )));
            }
        }
        let primaries = self.colors.iter().filter(|c| c.usage == ColorUsage::Primary).count();
        if primaries > 1 {
            return Err(ValidationError::new("only one brand color can be marked primary"));
        }
        if let Some(tagline) = &self.tagline {
            if tagline.chars().count() > MAX_TAGLINE_CHARS {
                return Err(ValidationError::new(format!(
                    "brand_style.tagline exceeds {MAX_TAGLINE_CHARS} characters"
                )));
            }
            if tagline.contains('<') || tagline.contains('>') {
                return Err(ValidationError::new("brand_style.tagline must not contain HTML tags"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style() -> BrandStyle {
        BrandStyle::new(BrandTone::Luxury)
            .with_color("F5F5F5", "Ivory", ColorUsage::Background)
            .with_color("1A1A1A", "Charcoal", ColorUsage::Primary)
            .with_color("C9A227", "Gold", ColorUsage::Accent)
            .with_tagline("Elevate your experience")
    }

    #[test]
    fn palette_leads_with_primary() {
        assert_eq!(
            style().palette().unwrap(),
            "Primary color: Charcoal (#1A1A1A). Additional colors: Ivory (#F5F5F5), Gold (#C9A227)"
        );
        let plain = BrandStyle::new(BrandTone::Casual).with_color("000000", "Black", ColorUsage::General);
        assert_eq!(plain.palette().unwrap(), "Primary color: Black (#000000)");
        assert!(BrandStyle::new(BrandTone::Casual).palette().is_none());
    }

    #[test]
    fn tone_defaults_to_professional() {
        let s: BrandStyle = serde_json::from_str(r#"{"colors":[{"hex_code":"000000","name":"Black"}]}"#).unwrap();
        assert_eq!(s.tone, BrandTone::Professional);
        assert_eq!(s.colors[0].usage, ColorUsage::General);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn validation_rules() {
        assert!(style().validate().is_ok());
        assert!(BrandStyle::new(BrandTone::Playful).validate().is_err());

        let hashed = BrandStyle::new(BrandTone::Casual).with_color("#FF5733", "Red", ColorUsage::General);
        assert!(hashed.validate().is_err());

        let two_primaries = BrandStyle::new(BrandTone::Casual)
            .with_color("FF0000", "Red", ColorUsage::Primary)
            .with_color("0000FF", "Blue", ColorUsage::Primary);
        assert!(two_primaries.validate().is_err());

        let html = style().with_tagline("<script>alert(1)</script>");
        assert!(html.validate().unwrap_err().to_string().contains("HTML"));
        assert!(style().with_tagline("x".repeat(101)).validate().is_err());

        let mut six = BrandStyle::new(BrandTone::Technical);
        for i in 0..6 {
            six = six.with_color(format!("{i:02}0000"), format!("Color {i}"), ColorUsage::General);
        }
        assert!(six.validate().is_err());
    }
}
