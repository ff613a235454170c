//! Feature schema and feature vectors.
//!
//! A [`FeatureSchema`] describes the features a tree is allowed to test:
//! their names, their [`FeatureKind`], and for discrete kinds the table of
//! value names. Features are always ordered byte-valued first, then
//! short-valued, then continuous; a [`FeatureVector`] follows the same
//! layout and is indexed by the schema's global feature index.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while building a schema or resolving names against it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown feature: {0}")]
    UnknownFeature(String),
    #[error("feature index {0} out of range")]
    IndexOutOfRange(usize),
    #[error("illegal value '{value}' for feature {feature}")]
    UnknownValue { feature: String, value: String },
    #[error("ordinal {ordinal} out of range for feature {feature}")]
    OrdinalOutOfRange { feature: String, ordinal: i32 },
    #[error("feature {feature} is {actual}, expected {expected}")]
    WrongKind {
        feature: String,
        expected: FeatureKind,
        actual: FeatureKind,
    },
    #[error("duplicate feature name: {0}")]
    DuplicateFeature(String),
    #[error("feature {feature} declares {count} values, at most {max} allowed")]
    TooManyValues {
        feature: String,
        count: usize,
        max: usize,
    },
    #[error("feature vector shape mismatch: expected {expected:?}, got {actual:?}")]
    VectorShape {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },
    #[error("invalid number '{value}' for feature {feature}")]
    InvalidNumber { feature: String, value: String },
}

// =============================================================================
// FeatureKind
// =============================================================================

/// Storage class of a feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureKind {
    /// Small discrete feature, at most 255 values, stored as `u8` ordinals.
    Byte,
    /// Large discrete feature, stored as `i16` ordinals.
    Short,
    /// Continuous feature, stored as `f32`.
    Continuous,
}

impl FeatureKind {
    /// Maximum number of values a discrete feature of this kind can declare.
    pub fn max_values(self) -> usize {
        match self {
            FeatureKind::Byte => u8::MAX as usize,
            FeatureKind::Short => i16::MAX as usize,
            FeatureKind::Continuous => 0,
        }
    }

    /// Returns true for byte- and short-valued features.
    #[inline]
    pub fn is_discrete(self) -> bool {
        !matches!(self, FeatureKind::Continuous)
    }

    fn rank(self) -> u8 {
        match self {
            FeatureKind::Byte => 0,
            FeatureKind::Short => 1,
            FeatureKind::Continuous => 2,
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeatureKind::Byte => "byte-valued",
            FeatureKind::Short => "short-valued",
            FeatureKind::Continuous => "continuous",
        };
        f.write_str(name)
    }
}

// =============================================================================
// FeatureMeta
// =============================================================================

/// Metadata for a single feature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureMeta {
    /// Feature name, unique within a schema.
    pub name: String,

    /// Storage class.
    pub kind: FeatureKind,

    /// Value names indexed by ordinal. Empty for continuous features.
    #[serde(default)]
    pub values: Vec<String>,

    /// Relative weight used by distance-based consumers.
    #[serde(default)]
    pub weight: f32,

    /// Weighting function name for continuous features.
    #[serde(default)]
    pub weight_function: Option<String>,
}

impl FeatureMeta {
    /// Create metadata for a byte-valued feature.
    pub fn byte<S: Into<String>>(name: impl Into<String>, values: impl IntoIterator<Item = S>) -> Self {
        Self::discrete(name, FeatureKind::Byte, values)
    }

    /// Create metadata for a short-valued feature.
    pub fn short<S: Into<String>>(name: impl Into<String>, values: impl IntoIterator<Item = S>) -> Self {
        Self::discrete(name, FeatureKind::Short, values)
    }

    /// Create metadata for a continuous feature.
    pub fn continuous(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::Continuous,
            values: Vec::new(),
            weight: 0.0,
            weight_function: None,
        }
    }

    /// Set the feature weight.
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// Set the weighting function (continuous features only).
    pub fn with_weight_function(mut self, function: impl Into<String>) -> Self {
        self.weight_function = Some(function.into());
        self
    }

    fn discrete<S: Into<String>>(
        name: impl Into<String>,
        kind: FeatureKind,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            values: values.into_iter().map(Into::into).collect(),
            weight: 0.0,
            weight_function: None,
        }
    }
}

// =============================================================================
// FeatureSchema
// =============================================================================

/// Immutable description of the features a tree can test.
///
/// Shared read-only between trees, usually behind an `Arc`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "Vec<FeatureMeta>", into = "Vec<FeatureMeta>")]
pub struct FeatureSchema {
    features: Vec<FeatureMeta>,
    n_byte: usize,
    n_short: usize,
    name_index: HashMap<String, u32>,
    value_index: Vec<HashMap<String, u32>>,
}

impl PartialEq for FeatureSchema {
    fn eq(&self, other: &Self) -> bool {
        self.features == other.features
    }
}

impl FeatureSchema {
    /// Build a schema from feature metadata.
    ///
    /// Features are stably reordered so that byte-valued features come first,
    /// then short-valued, then continuous ones.
    pub fn new(mut features: Vec<FeatureMeta>) -> Result<Self, SchemaError> {
        features.sort_by_key(|f| f.kind.rank());

        let mut name_index = HashMap::with_capacity(features.len());
        let mut value_index = Vec::with_capacity(features.len());
        for (i, meta) in features.iter().enumerate() {
            if name_index.insert(meta.name.clone(), i as u32).is_some() {
                return Err(SchemaError::DuplicateFeature(meta.name.clone()));
            }
            if meta.kind.is_discrete() && meta.values.len() > meta.kind.max_values() {
                return Err(SchemaError::TooManyValues {
                    feature: meta.name.clone(),
                    count: meta.values.len(),
                    max: meta.kind.max_values(),
                });
            }
            let mut values = HashMap::with_capacity(meta.values.len());
            for (ordinal, value) in meta.values.iter().enumerate() {
                // First occurrence wins, matching ordinal lookup order.
                values.entry(value.clone()).or_insert(ordinal as u32);
            }
            value_index.push(values);
        }

        let n_byte = features.iter().filter(|f| f.kind == FeatureKind::Byte).count();
        let n_short = features.iter().filter(|f| f.kind == FeatureKind::Short).count();

        Ok(Self {
            features,
            n_byte,
            n_short,
            name_index,
            value_index,
        })
    }

    /// Create an empty schema.
    pub fn empty() -> Self {
        Self {
            features: Vec::new(),
            n_byte: 0,
            n_short: 0,
            name_index: HashMap::new(),
            value_index: Vec::new(),
        }
    }

    /// Number of features in the schema.
    pub fn n_features(&self) -> usize {
        self.features.len()
    }

    /// Number of byte-valued features.
    pub fn n_byte_features(&self) -> usize {
        self.n_byte
    }

    /// Number of short-valued features.
    pub fn n_short_features(&self) -> usize {
        self.n_short
    }

    /// Number of continuous features.
    pub fn n_continuous_features(&self) -> usize {
        self.features.len() - self.n_byte - self.n_short
    }

    /// Get metadata for a feature by index.
    pub fn get(&self, index: usize) -> Option<&FeatureMeta> {
        self.features.get(index)
    }

    /// Get an iterator over feature metadata in schema order.
    pub fn iter(&self) -> impl Iterator<Item = &FeatureMeta> {
        self.features.iter()
    }

    /// Get feature index by name.
    pub fn feature_index(&self, name: &str) -> Result<u32, SchemaError> {
        self.name_index
            .get(name)
            .copied()
            .ok_or_else(|| SchemaError::UnknownFeature(name.to_string()))
    }

    /// Check whether a feature with this name exists.
    pub fn has_feature(&self, name: &str) -> bool {
        self.name_index.contains_key(name)
    }

    /// Name of the feature at `index`.
    pub fn feature_name(&self, index: usize) -> Result<&str, SchemaError> {
        self.meta(index).map(|m| m.name.as_str())
    }

    /// Kind of the feature at `index`.
    pub fn kind(&self, index: usize) -> Result<FeatureKind, SchemaError> {
        self.meta(index).map(|m| m.kind)
    }

    #[inline]
    pub fn is_byte_feature(&self, index: usize) -> bool {
        index < self.n_byte
    }

    #[inline]
    pub fn is_short_feature(&self, index: usize) -> bool {
        index >= self.n_byte && index < self.n_byte + self.n_short
    }

    #[inline]
    pub fn is_continuous_feature(&self, index: usize) -> bool {
        index >= self.n_byte + self.n_short && index < self.features.len()
    }

    /// Number of declared values of a discrete feature (0 for continuous).
    pub fn n_values(&self, index: usize) -> Result<usize, SchemaError> {
        self.meta(index).map(|m| m.values.len())
    }

    /// Value names of a discrete feature.
    pub fn values(&self, index: usize) -> Result<&[String], SchemaError> {
        self.meta(index).map(|m| m.values.as_slice())
    }

    /// Translate an ordinal of a discrete feature to its value name.
    pub fn value_name(&self, index: usize, ordinal: i32) -> Result<&str, SchemaError> {
        let meta = self.discrete_meta(index)?;
        usize::try_from(ordinal)
            .ok()
            .and_then(|o| meta.values.get(o))
            .map(String::as_str)
            .ok_or_else(|| SchemaError::OrdinalOutOfRange {
                feature: meta.name.clone(),
                ordinal,
            })
    }

    /// Translate a value name of a discrete feature to its ordinal.
    pub fn value_ordinal(&self, index: usize, value: &str) -> Result<u32, SchemaError> {
        let meta = self.discrete_meta(index)?;
        self.value_index[index]
            .get(value)
            .copied()
            .ok_or_else(|| SchemaError::UnknownValue {
                feature: meta.name.clone(),
                value: value.to_string(),
            })
    }

    /// Translate a value name of a byte-valued feature to its ordinal.
    pub fn byte_value(&self, index: usize, value: &str) -> Result<u8, SchemaError> {
        self.expect_kind(index, FeatureKind::Byte)?;
        // Byte features hold at most 255 values, so the ordinal always fits.
        self.value_ordinal(index, value).map(|o| o as u8)
    }

    /// Translate a value name of a short-valued feature to its ordinal.
    pub fn short_value(&self, index: usize, value: &str) -> Result<i16, SchemaError> {
        self.expect_kind(index, FeatureKind::Short)?;
        self.value_ordinal(index, value).map(|o| o as i16)
    }

    /// Build a feature vector, checking its shape against the schema.
    pub fn vector(
        &self,
        unit_index: u32,
        bytes: Vec<u8>,
        shorts: Vec<i16>,
        floats: Vec<f32>,
    ) -> Result<FeatureVector, SchemaError> {
        let expected = (self.n_byte, self.n_short, self.n_continuous_features());
        let actual = (bytes.len(), shorts.len(), floats.len());
        if expected != actual {
            return Err(SchemaError::VectorShape { expected, actual });
        }
        Ok(FeatureVector::new(unit_index, bytes, shorts, floats))
    }

    /// Parse a whitespace-separated line of numeric feature values.
    ///
    /// Discrete features are given as ordinals, continuous ones as floats.
    pub fn parse_vector(&self, unit_index: u32, line: &str) -> Result<FeatureVector, SchemaError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != self.features.len() {
            return Err(SchemaError::VectorShape {
                expected: (self.n_byte, self.n_short, self.n_continuous_features()),
                actual: (tokens.len(), 0, 0),
            });
        }
        let mut bytes = Vec::with_capacity(self.n_byte);
        let mut shorts = Vec::with_capacity(self.n_short);
        let mut floats = Vec::with_capacity(self.n_continuous_features());
        for (meta, token) in self.features.iter().zip(tokens) {
            let invalid = || SchemaError::InvalidNumber {
                feature: meta.name.clone(),
                value: token.to_string(),
            };
            match meta.kind {
                FeatureKind::Byte => bytes.push(token.parse().map_err(|_| invalid())?),
                FeatureKind::Short => shorts.push(token.parse().map_err(|_| invalid())?),
                FeatureKind::Continuous => floats.push(token.parse().map_err(|_| invalid())?),
            }
        }
        Ok(FeatureVector::new(unit_index, bytes, shorts, floats))
    }

    /// Encode a feature vector from one value per feature, in schema order.
    ///
    /// Discrete features take value names, continuous features take numbers.
    pub fn encode(&self, unit_index: u32, values: &[&str]) -> Result<FeatureVector, SchemaError> {
        if values.len() != self.features.len() {
            return Err(SchemaError::VectorShape {
                expected: (self.n_byte, self.n_short, self.n_continuous_features()),
                actual: (values.len(), 0, 0),
            });
        }
        let mut bytes = Vec::with_capacity(self.n_byte);
        let mut shorts = Vec::with_capacity(self.n_short);
        let mut floats = Vec::with_capacity(self.n_continuous_features());
        for (i, value) in values.iter().enumerate() {
            match self.features[i].kind {
                FeatureKind::Byte => bytes.push(self.byte_value(i, value)?),
                FeatureKind::Short => shorts.push(self.short_value(i, value)?),
                FeatureKind::Continuous => {
                    floats.push(value.parse().map_err(|_| SchemaError::InvalidNumber {
                        feature: self.features[i].name.clone(),
                        value: value.to_string(),
                    })?)
                }
            }
        }
        Ok(FeatureVector::new(unit_index, bytes, shorts, floats))
    }

    /// Render a feature value of `vector` as text: value name or number.
    pub fn format_value(&self, vector: &FeatureVector, index: usize) -> Result<String, SchemaError> {
        let meta = self.meta(index)?;
        match meta.kind {
            FeatureKind::Continuous => Ok(vector.continuous_feature(index).to_string()),
            _ => self
                .value_name(index, vector.feature_as_int(index))
                .map(str::to_string),
        }
    }

    fn meta(&self, index: usize) -> Result<&FeatureMeta, SchemaError> {
        self.features
            .get(index)
            .ok_or(SchemaError::IndexOutOfRange(index))
    }

    fn discrete_meta(&self, index: usize) -> Result<&FeatureMeta, SchemaError> {
        let meta = self.meta(index)?;
        if !meta.kind.is_discrete() {
            return Err(SchemaError::WrongKind {
                feature: meta.name.clone(),
                expected: FeatureKind::Byte,
                actual: meta.kind,
            });
        }
        Ok(meta)
    }

    fn expect_kind(&self, index: usize, expected: FeatureKind) -> Result<(), SchemaError> {
        let meta = self.meta(index)?;
        if meta.kind != expected {
            return Err(SchemaError::WrongKind {
                feature: meta.name.clone(),
                expected,
                actual: meta.kind,
            });
        }
        Ok(())
    }
}

impl TryFrom<Vec<FeatureMeta>> for FeatureSchema {
    type Error = SchemaError;

    fn try_from(features: Vec<FeatureMeta>) -> Result<Self, Self::Error> {
        Self::new(features)
    }
}

impl From<FeatureSchema> for Vec<FeatureMeta> {
    fn from(schema: FeatureSchema) -> Self {
        schema.features
    }
}

// =============================================================================
// FeatureVector
// =============================================================================

/// One typed value per schema feature, plus the unit it describes.
///
/// Values are addressed by the schema's global feature index: short
/// features start after the byte features, continuous features after both.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    unit_index: u32,
    bytes: Vec<u8>,
    shorts: Vec<i16>,
    floats: Vec<f32>,
}

impl FeatureVector {
    /// Create a feature vector without checking it against a schema.
    pub fn new(unit_index: u32, bytes: Vec<u8>, shorts: Vec<i16>, floats: Vec<f32>) -> Self {
        Self {
            unit_index,
            bytes,
            shorts,
            floats,
        }
    }

    /// Index of the unit this vector describes.
    pub fn unit_index(&self) -> u32 {
        self.unit_index
    }

    /// Total number of features.
    pub fn n_features(&self) -> usize {
        self.bytes.len() + self.shorts.len() + self.floats.len()
    }

    /// Whether the global `index` addresses a byte-valued feature.
    #[inline]
    pub fn is_byte_feature(&self, index: usize) -> bool {
        index < self.bytes.len()
    }

    /// Whether the global `index` addresses a short-valued feature.
    #[inline]
    pub fn is_short_feature(&self, index: usize) -> bool {
        index >= self.bytes.len() && index < self.bytes.len() + self.shorts.len()
    }

    /// Byte-valued feature at global `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not address a byte-valued feature.
    #[inline]
    pub fn byte_feature(&self, index: usize) -> u8 {
        self.bytes[index]
    }

    /// Short-valued feature at global `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not address a short-valued feature.
    #[inline]
    pub fn short_feature(&self, index: usize) -> i16 {
        self.shorts[index - self.bytes.len()]
    }

    /// Continuous feature at global `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not address a continuous feature.
    #[inline]
    pub fn continuous_feature(&self, index: usize) -> f32 {
        self.floats[index - self.bytes.len() - self.shorts.len()]
    }

    /// Discrete feature at global `index` as an ordinal.
    #[inline]
    pub fn feature_as_int(&self, index: usize) -> i32 {
        if self.is_byte_feature(index) {
            i32::from(self.byte_feature(index))
        } else {
            i32::from(self.short_feature(index))
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn shorts(&self) -> &[i16] {
        &self.shorts
    }

    pub fn floats(&self) -> &[f32] {
        &self.floats
    }
}
