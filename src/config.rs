//! Runtime configuration

use anyhow::{bail, Context, Result};

pub const DEFAULT_BACKGROUND: &str = "292828";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// X display name, `None` for `$DISPLAY`
    pub display: Option<String>,
    pub vsync: bool,
    /// Tolerate another window manager on the same display
    pub coexist: bool,
    pub background: [f32; 3],
}

impl Default for Config {
    fn default() -> Self {
        Self {
            display: None,
            vsync: true,
            coexist: false,
            background: [41.0 / 255.0, 40.0 / 255.0, 40.0 / 255.0],
        }
    }
}

/// Parse an `RRGGBB` colour, with or without a leading `#`
pub fn parse_colour(value: &str) -> Result<[f32; 3]> {
    let hex = value.strip_prefix('#').unwrap_or(value);
    if hex.len() != 6 || !hex.is_ascii() {
        bail!("expected RRGGBB, got {value:?}");
    }

    let channel = |range: std::ops::Range<usize>| -> Result<f32> {
        let byte = u8::from_str_radix(&hex[range], 16)
            .with_context(|| format!("invalid colour {value:?}"))?;
        Ok(byte as f32 / 255.0)
    };

    Ok([channel(0..2)?, channel(2..4)?, channel(4..6)?])
}
