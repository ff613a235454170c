//! Leaf statistics for HTS trees.
//!
//! Every table starts with three ints (MSD flag, stream count, vector
//! size), followed by the per-state pdf counts and big-endian float data:
//!
//! | format            | states | per pdf                                  |
//! |-------------------|--------|------------------------------------------|
//! | `dur`, `join`     | 1      | (mean, variance) per stream              |
//! | `lf0`             | n      | (mean, variance, voiced, unvoiced) per stream |
//! | `mgc`, `str`, `mag` | n    | (mean, variance) per vector element      |

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::debug;

use crate::repr::PdfLeaf;

use super::data::DataReader;
use super::FormatError;

/// Accepted range for voiced + unvoiced weights of a log-F0 stream.
const WEIGHT_SUM_RANGE: std::ops::RangeInclusive<f64> = 0.99..=1.01;

/// Layout of a pdf table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PdfFormat {
    Dur,
    Join,
    Lf0,
    Mgc,
    Str,
    Mag,
}

impl PdfFormat {
    /// Parse the conventional lowercase name (`dur`, `lf0`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "dur" => Some(Self::Dur),
            "join" => Some(Self::Join),
            "lf0" => Some(Self::Lf0),
            "mgc" => Some(Self::Mgc),
            "str" => Some(Self::Str),
            "mag" => Some(Self::Mag),
            _ => None,
        }
    }
}

/// Pdf statistics per state, indexed by 1-based leaf id.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfTables {
    format: PdfFormat,
    vector_size: usize,
    states: Vec<Vec<PdfLeaf>>,
}

impl PdfTables {
    pub fn load(path: impl AsRef<Path>, format: PdfFormat, num_states: usize) -> Result<Self, FormatError> {
        let file = File::open(path)?;
        Self::read(BufReader::new(file), format, num_states)
    }

    /// Read a table. `num_states` is ignored by the single-state formats.
    pub fn read<R: Read>(reader: R, format: PdfFormat, num_states: usize) -> Result<Self, FormatError> {
        let mut reader = DataReader::new(reader);
        let _msd_flag = reader.read_i32()?;
        let n_streams = reader.read_count("stream count")?;
        let vector_size = reader.read_count("vector size")?;

        let states = match format {
            PdfFormat::Dur | PdfFormat::Join => {
                let n_pdfs = reader.read_count("pdf count")?;
                let pdfs = (0..n_pdfs)
                    .map(|j| read_interleaved(&mut reader, j, n_streams))
                    .collect::<Result<Vec<_>, _>>()?;
                vec![pdfs]
            }
            PdfFormat::Lf0 => {
                let counts = read_counts(&mut reader, num_states)?;
                let mut states = Vec::with_capacity(num_states);
                for n_pdfs in counts {
                    let pdfs = (0..n_pdfs)
                        .map(|j| read_lf0(&mut reader, j, n_streams))
                        .collect::<Result<Vec<_>, _>>()?;
                    states.push(pdfs);
                }
                states
            }
            PdfFormat::Mgc | PdfFormat::Str | PdfFormat::Mag => {
                let counts = read_counts(&mut reader, num_states)?;
                let mut states = Vec::with_capacity(num_states);
                for n_pdfs in counts {
                    let pdfs = (0..n_pdfs)
                        .map(|j| read_interleaved(&mut reader, j, vector_size))
                        .collect::<Result<Vec<_>, _>>()?;
                    states.push(pdfs);
                }
                states
            }
        };
        debug!(
            ?format,
            vector_size,
            states = states.len(),
            pdfs = states.iter().map(Vec::len).sum::<usize>(),
            "loaded pdf table"
        );
        Ok(Self {
            format,
            vector_size,
            states,
        })
    }

    pub fn format(&self) -> PdfFormat {
        self.format
    }

    /// Vector size declared in the table header.
    pub fn vector_size(&self) -> usize {
        self.vector_size
    }

    pub fn n_states(&self) -> usize {
        self.states.len()
    }

    pub fn n_pdfs(&self, state: usize) -> usize {
        self.states.get(state).map_or(0, Vec::len)
    }

    /// Statistics of leaf `id` (1-based) in `state` (0-based).
    pub fn leaf(&self, state: usize, id: u32) -> Option<&PdfLeaf> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.states.get(state)?.get(index)
    }
}

fn read_counts<R: Read>(reader: &mut DataReader<R>, num_states: usize) -> Result<Vec<usize>, FormatError> {
    (0..num_states).map(|_| reader.read_count("pdf count")).collect()
}

/// `n` (mean, variance) pairs.
fn read_interleaved<R: Read>(reader: &mut DataReader<R>, index: usize, n: usize) -> Result<PdfLeaf, FormatError> {
    let mut mean = Vec::with_capacity(n);
    let mut variance = Vec::with_capacity(n);
    for _ in 0..n {
        mean.push(f64::from(reader.read_f32()?));
        variance.push(f64::from(reader.read_f32()?));
    }
    Ok(PdfLeaf {
        id: index as u32 + 1,
        mean,
        variance,
        voiced_weight: None,
    })
}

fn read_lf0<R: Read>(reader: &mut DataReader<R>, index: usize, n_streams: usize) -> Result<PdfLeaf, FormatError> {
    let mut mean = Vec::with_capacity(n_streams);
    let mut variance = Vec::with_capacity(n_streams);
    let mut voiced_weight = None;
    for _ in 0..n_streams {
        mean.push(f64::from(reader.read_f32()?));
        variance.push(f64::from(reader.read_f32()?));
        let voiced = f64::from(reader.read_f32()?);
        let unvoiced = f64::from(reader.read_f32()?);
        if voiced < 0.0 || unvoiced < 0.0 || !WEIGHT_SUM_RANGE.contains(&(voiced + unvoiced)) {
            return Err(FormatError::value(
                "voiced/unvoiced weights",
                format!("{voiced} + {unvoiced}"),
            ));
        }
        if voiced_weight.is_none() {
            voiced_weight = Some(voiced);
        }
    }
    Ok(PdfLeaf {
        id: index as u32 + 1,
        mean,
        variance,
        voiced_weight,
    })
}
