//! Feature schema codecs: the binary block embedded in tree files and the
//! sectioned text form used by feature files.

use std::fmt::Write as _;
use std::io::{Read, Write};

use tracing::trace;

use crate::schema::{FeatureKind, FeatureMeta, FeatureSchema};

use super::data::{DataReader, DataWriter};
use super::FormatError;

pub const BYTE_SECTION: &str = "ByteValuedFeatureProcessors";
pub const SHORT_SECTION: &str = "ShortValuedFeatureProcessors";
pub const CONTINUOUS_SECTION: &str = "ContinuousFeatureProcessors";
const SIMILARITY_SECTION: &str = "FeatureSimilarity";
const WEIGHT_SEPARATOR: char = '|';

// ============================================================================
// Binary
// ============================================================================

/// Read the binary schema block.
///
/// Three sections follow each other, each an int count then one record per
/// feature: byte-valued (weight, name, unsigned byte value count, values),
/// short-valued (weight, name, short value count, values), continuous
/// (weight, weighting function, name).
pub fn read_schema<R: Read>(reader: &mut DataReader<R>) -> Result<FeatureSchema, FormatError> {
    let mut features = Vec::new();

    let n_byte = reader.read_count("byte feature count")?;
    for _ in 0..n_byte {
        let weight = reader.read_f32()?;
        let name = reader.read_utf()?;
        let n_values = usize::from(reader.read_u8()?);
        let values = (0..n_values)
            .map(|_| reader.read_utf())
            .collect::<Result<Vec<_>, _>>()?;
        features.push(FeatureMeta::byte(name, values).with_weight(weight));
    }

    let n_short = reader.read_count("short feature count")?;
    for _ in 0..n_short {
        let weight = reader.read_f32()?;
        let name = reader.read_utf()?;
        let n_values = reader.read_i16()?;
        let n_values = usize::try_from(n_values)
            .map_err(|_| FormatError::value("short feature value count", n_values.to_string()))?;
        let values = (0..n_values)
            .map(|_| reader.read_utf())
            .collect::<Result<Vec<_>, _>>()?;
        features.push(FeatureMeta::short(name, values).with_weight(weight));
    }

    let n_continuous = reader.read_count("continuous feature count")?;
    for _ in 0..n_continuous {
        let weight = reader.read_f32()?;
        let function = reader.read_utf()?;
        let name = reader.read_utf()?;
        let mut meta = FeatureMeta::continuous(name).with_weight(weight);
        if !function.is_empty() {
            meta = meta.with_weight_function(function);
        }
        features.push(meta);
    }

    trace!(n_byte, n_short, n_continuous, "read feature schema");
    Ok(FeatureSchema::new(features)?)
}

/// Write the binary schema block.
pub fn write_schema<W: Write>(
    writer: &mut DataWriter<W>,
    schema: &FeatureSchema,
) -> std::io::Result<()> {
    let section = |kind: FeatureKind| schema.iter().filter(move |m| m.kind == kind);

    writer.write_len(schema.n_byte_features())?;
    for meta in section(FeatureKind::Byte) {
        writer.write_f32(meta.weight)?;
        writer.write_utf(&meta.name)?;
        // values.len() <= 255 is enforced by the schema
        writer.write_u8(meta.values.len() as u8)?;
        for value in &meta.values {
            writer.write_utf(value)?;
        }
    }

    writer.write_len(schema.n_short_features())?;
    for meta in section(FeatureKind::Short) {
        writer.write_f32(meta.weight)?;
        writer.write_utf(&meta.name)?;
        writer.write_i16(meta.values.len() as i16)?;
        for value in &meta.values {
            writer.write_utf(value)?;
        }
    }

    writer.write_len(schema.n_continuous_features())?;
    for meta in section(FeatureKind::Continuous) {
        writer.write_f32(meta.weight)?;
        writer.write_utf(meta.weight_function.as_deref().unwrap_or(""))?;
        writer.write_utf(&meta.name)?;
    }
    Ok(())
}

// ============================================================================
// Text
// ============================================================================

/// Parse the sectioned text form.
///
/// With `read_weights`, every feature line carries a `weight |` prefix
/// (continuous features: `weight function |`) and the weights are
/// normalized to sum to one.
pub fn parse_schema_text(text: &str, read_weights: bool) -> Result<FeatureSchema, FormatError> {
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l.trim()));

    let first = lines
        .by_ref()
        .find(|(_, l)| !l.is_empty() && !l.starts_with('#'))
        .ok_or(FormatError::Truncated("schema text"))?;
    if first.1 != BYTE_SECTION {
        return Err(FormatError::line(
            first.0,
            format!("expected '{BYTE_SECTION}', read '{}'", first.1),
        ));
    }

    let mut byte_lines = Vec::new();
    let mut short_lines = Vec::new();
    let mut continuous_lines = Vec::new();
    let mut section = FeatureKind::Byte;
    for (number, line) in lines {
        match (section, line) {
            (FeatureKind::Byte, SHORT_SECTION) => section = FeatureKind::Short,
            (FeatureKind::Short, CONTINUOUS_SECTION) => section = FeatureKind::Continuous,
            (FeatureKind::Continuous, "" | SIMILARITY_SECTION) => break,
            (_, l) if l.is_empty() || l.starts_with('#') => {}
            (FeatureKind::Byte, l) => byte_lines.push((number, l)),
            (FeatureKind::Short, l) => short_lines.push((number, l)),
            (FeatureKind::Continuous, l) => continuous_lines.push((number, l)),
        }
    }
    if section != FeatureKind::Continuous {
        return Err(FormatError::Truncated("schema text sections"));
    }

    let mut features = Vec::new();
    for (kind, lines) in [
        (FeatureKind::Byte, byte_lines),
        (FeatureKind::Short, short_lines),
        (FeatureKind::Continuous, continuous_lines),
    ] {
        for (number, line) in lines {
            features.push(parse_feature_line(number, line, kind, read_weights)?);
        }
    }

    if read_weights {
        let total: f32 = features.iter().map(|f| f.weight).sum();
        if total > 0.0 {
            for f in &mut features {
                f.weight /= total;
            }
        }
    }
    Ok(FeatureSchema::new(features)?)
}

fn parse_feature_line(
    number: usize,
    line: &str,
    kind: FeatureKind,
    read_weights: bool,
) -> Result<FeatureMeta, FormatError> {
    let (weight, function, definition) = if read_weights {
        let (weight_def, definition) = line.split_once(WEIGHT_SEPARATOR).ok_or_else(|| {
            FormatError::line(number, format!("weight separator '{WEIGHT_SEPARATOR}' not found"))
        })?;
        let mut parts = weight_def.split_whitespace();
        let raw = parts.next().unwrap_or_default();
        let weight: f32 = raw
            .parse()
            .map_err(|_| FormatError::value("feature weight", raw))?;
        if weight < 0.0 {
            return Err(FormatError::line(number, format!("negative weight {weight}")));
        }
        let function = parts.collect::<Vec<_>>().join(" ");
        (weight, function, definition.trim())
    } else {
        (0.0, String::new(), line)
    };

    let mut tokens = definition.split_whitespace();
    let name = tokens
        .next()
        .ok_or_else(|| FormatError::line(number, "missing feature name"))?;
    let meta = match kind {
        FeatureKind::Byte => FeatureMeta::byte(name, tokens),
        FeatureKind::Short => FeatureMeta::short(name, tokens),
        // a trailing "float" marker is dropped
        FeatureKind::Continuous => {
            let meta = FeatureMeta::continuous(name);
            if function.is_empty() {
                meta
            } else {
                meta.with_weight_function(function)
            }
        }
    };
    Ok(meta.with_weight(weight))
}

/// Render the sectioned text form.
pub fn format_schema_text(schema: &FeatureSchema, write_weights: bool) -> String {
    let mut out = String::new();
    for (kind, header) in [
        (FeatureKind::Byte, BYTE_SECTION),
        (FeatureKind::Short, SHORT_SECTION),
        (FeatureKind::Continuous, CONTINUOUS_SECTION),
    ] {
        out.push_str(header);
        out.push('\n');
        for meta in schema.iter().filter(|m| m.kind == kind) {
            if write_weights {
                let _ = write!(out, "{}", meta.weight);
                if let Some(function) = meta.weight_function.as_deref() {
                    let _ = write!(out, " {function}");
                }
                out.push_str(" | ");
            }
            out.push_str(&meta.name);
            for value in &meta.values {
                out.push(' ');
                out.push_str(value);
            }
            out.push('\n');
        }
    }
    out
}
