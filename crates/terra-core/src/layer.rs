use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TerraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Height,
    Ortho,
    Vector,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Height, Layer::Ortho, Layer::Vector];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Height => "height",
            Self::Ortho => "ortho",
            Self::Vector => "vector",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Self::Height => 1,
            Self::Ortho => 1 << 1,
            Self::Vector => 1 << 2,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = TerraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "height" | "dem" | "elevation" => Ok(Self::Height),
            "ortho" | "imagery" => Ok(Self::Ortho),
            "vector" | "labels" => Ok(Self::Vector),
            other => Err(TerraError::invalid_input(format!("unknown layer `{other}`"))),
        }
    }
}

/// Small copyable set of layer kinds.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerSet(u8);

impl LayerSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Layer::ALL.into_iter().collect()
    }

    pub fn with(mut self, layer: Layer) -> Self {
        self.insert(layer);
        self
    }

    pub fn insert(&mut self, layer: Layer) {
        self.0 |= layer.bit();
    }

    pub fn remove(&mut self, layer: Layer) {
        self.0 &= !layer.bit();
    }

    pub fn contains(&self, layer: Layer) -> bool {
        self.0 & layer.bit() != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Layer> + '_ {
        Layer::ALL.into_iter().filter(|layer| self.contains(*layer))
    }

    /// Parses a comma separated list such as `height,ortho`. An empty string
    /// is the empty set.
    pub fn parse(value: &str) -> Result<Self, TerraError> {
        value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Layer::from_str)
            .collect()
    }
}

impl FromIterator<Layer> for LayerSet {
    fn from_iter<I: IntoIterator<Item = Layer>>(iter: I) -> Self {
        let mut set = Self::empty();
        for layer in iter {
            set.insert(layer);
        }
        set
    }
}

impl fmt::Display for LayerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Layer::as_str).collect();
        f.write_str(&names.join(","))
    }
}

impl fmt::Debug for LayerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn parses_layer_lists() {
        let set = LayerSet::parse("height, Ortho").unwrap();
        assert!(set.contains(Layer::Height));
        assert!(set.contains(Layer::Ortho));
        assert!(!set.contains(Layer::Vector));
        assert_eq!(set.to_string(), "height,ortho");
        assert!(LayerSet::parse("").unwrap().is_empty());
    }

    #[test]
    fn unknown_layer_is_invalid_input() {
        let err = LayerSet::parse("height,clouds").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err.message.contains("clouds"));
    }
}
