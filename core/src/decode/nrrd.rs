use super::{ras_to_lps, to_label, VolumeDecoder};
use crate::error::{DicomSegError, Result};
use crate::types::{Geometry, LabelVolume, Matrix3, IDENTITY};
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use flate2::read::GzDecoder;
use log::debug;
use ndarray::Array3;
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

/// Decodes attached-header NRRD label maps (`.nrrd`, `.seg.nrrd`)
///
/// Supports `raw` and `gzip` encodings, integer and float scalar types and
/// the LPS and RAS patient spaces. Detached headers (`.nhdr`) are rejected.
#[derive(Debug, Default, Clone)]
pub struct NrrdDecoder;

impl NrrdDecoder {
    /// Creates a new NrrdDecoder
    pub fn new() -> Self {
        Self
    }
}

/// Scalar type of the NRRD payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
}

impl ScalarType {
    fn parse(value: &str) -> Option<Self> {
        let scalar = match value {
            "signed char" | "int8" | "int8_t" => ScalarType::Int8,
            "uchar" | "unsigned char" | "uint8" | "uint8_t" => ScalarType::UInt8,
            "short" | "short int" | "signed short" | "signed short int" | "int16" | "int16_t" => {
                ScalarType::Int16
            }
            "ushort" | "unsigned short" | "unsigned short int" | "uint16" | "uint16_t" => {
                ScalarType::UInt16
            }
            "int" | "signed int" | "int32" | "int32_t" => ScalarType::Int32,
            "uint" | "unsigned int" | "uint32" | "uint32_t" => ScalarType::UInt32,
            "longlong" | "long long" | "long long int" | "signed long long"
            | "signed long long int" | "int64" | "int64_t" => ScalarType::Int64,
            "ulonglong" | "unsigned long long" | "unsigned long long int" | "uint64"
            | "uint64_t" => ScalarType::UInt64,
            "float" => ScalarType::Float,
            "double" => ScalarType::Double,
            _ => return None,
        };
        Some(scalar)
    }

    fn byte_size(self) -> usize {
        match self {
            ScalarType::Int8 | ScalarType::UInt8 => 1,
            ScalarType::Int16 | ScalarType::UInt16 => 2,
            ScalarType::Int32 | ScalarType::UInt32 | ScalarType::Float => 4,
            ScalarType::Int64 | ScalarType::UInt64 | ScalarType::Double => 8,
        }
    }

    fn read<B: ByteOrder>(self, reader: &mut Cursor<&[u8]>) -> std::io::Result<f64> {
        Ok(match self {
            ScalarType::Int8 => reader.read_i8()? as f64,
            ScalarType::UInt8 => reader.read_u8()? as f64,
            ScalarType::Int16 => reader.read_i16::<B>()? as f64,
            ScalarType::UInt16 => reader.read_u16::<B>()? as f64,
            ScalarType::Int32 => reader.read_i32::<B>()? as f64,
            ScalarType::UInt32 => reader.read_u32::<B>()? as f64,
            ScalarType::Int64 => reader.read_i64::<B>()? as f64,
            ScalarType::UInt64 => reader.read_u64::<B>()? as f64,
            ScalarType::Float => reader.read_f32::<B>()? as f64,
            ScalarType::Double => reader.read_f64::<B>()?,
        })
    }
}

/// Parsed NRRD header fields, keyed by lowercase field name
struct NrrdHeader {
    fields: HashMap<String, String>,
}

impl NrrdHeader {
    /// Splits a file into its header and the byte offset of the payload
    fn parse(bytes: &[u8]) -> std::result::Result<(Self, usize), String> {
        if !bytes.starts_with(b"NRRD000") {
            return Err("missing NRRD magic".to_string());
        }
        let mut fields = HashMap::new();
        let mut offset = 0;
        let mut first = true;
        loop {
            let end = bytes[offset..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|p| offset + p)
                .ok_or("header is not terminated by an empty line")?;
            let line = String::from_utf8_lossy(&bytes[offset..end]);
            let line = line.trim_end_matches('\r');
            offset = end + 1;

            if first {
                first = false;
                continue;
            }
            if line.is_empty() {
                break;
            }
            if line.starts_with('#') || line.contains(":=") {
                continue;
            }
            if let Some((key, value)) = line.split_once(": ") {
                fields.insert(key.trim().to_lowercase(), value.trim().to_string());
            }
        }
        Ok((Self { fields }, offset))
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|v| v.as_str())
    }

    fn require(&self, key: &str) -> std::result::Result<&str, String> {
        self.get(key)
            .ok_or_else(|| format!("missing required field '{}'", key))
    }
}

impl VolumeDecoder for NrrdDecoder {
    fn decode_volume(&self, path: &Path) -> Result<LabelVolume> {
        let bytes = fs::read(path).map_err(|e| DicomSegError::decode(path, e))?;
        let (geometry, values) =
            decode_bytes(&bytes).map_err(|message| DicomSegError::decode(path, message))?;
        debug!("{}: {}", path.display(), geometry);

        let labels = values
            .into_iter()
            .map(|v| to_label(v, path))
            .collect::<Result<Vec<u16>>>()?;
        let [nx, ny, nz] = geometry.size;
        let data = Array3::from_shape_vec((nz, ny, nx), labels)
            .map_err(|e| DicomSegError::decode(path, e))?;
        LabelVolume::new(data, geometry).map_err(|message| DicomSegError::decode(path, message))
    }
}

fn decode_bytes(bytes: &[u8]) -> std::result::Result<(Geometry, Vec<f64>), String> {
    let (header, offset) = NrrdHeader::parse(bytes)?;

    if header.get("data file").or(header.get("datafile")).is_some() {
        return Err("detached NRRD headers are not supported".to_string());
    }

    let scalar = ScalarType::parse(header.require("type")?)
        .ok_or_else(|| format!("unsupported type '{}'", header.get("type").unwrap_or("")))?;
    let dimension: usize = header
        .require("dimension")?
        .parse()
        .map_err(|_| "invalid dimension".to_string())?;
    let sizes = header
        .require("sizes")?
        .split_whitespace()
        .map(|s| s.parse::<usize>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| "invalid sizes".to_string())?;
    if sizes.len() != dimension || !(2..=3).contains(&dimension) {
        return Err(format!(
            "only 2D and 3D label maps are supported, got sizes {:?}",
            sizes
        ));
    }
    let size = [sizes[0], sizes[1], sizes.get(2).copied().unwrap_or(1)];
    let count = size
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .and_then(|count| count.checked_mul(scalar.byte_size()).map(|_| count))
        .ok_or_else(|| format!("sizes {:?} exceed the addressable voxel count", sizes))?;

    let geometry = grid(&header, size, dimension)?;

    let payload = &bytes[offset..];
    let payload = match header.get("encoding").unwrap_or("raw") {
        "raw" => payload.to_vec(),
        "gzip" | "gz" => {
            let mut decoded = Vec::new();
            GzDecoder::new(payload)
                .read_to_end(&mut decoded)
                .map_err(|e| format!("gzip payload: {}", e))?;
            decoded
        }
        other => return Err(format!("unsupported encoding '{}'", other)),
    };

    let expected = count * scalar.byte_size();
    if payload.len() < expected {
        return Err(format!(
            "payload holds {} bytes, {} expected",
            payload.len(),
            expected
        ));
    }
    // A byte skip of -1 means the data sits at the end of the payload
    let start = match header.get("byte skip") {
        Some("-1") => payload.len() - expected,
        Some(skip) => skip
            .parse::<usize>()
            .map_err(|_| format!("invalid byte skip '{}'", skip))?,
        None => 0,
    };
    let data = payload
        .get(start..start + expected)
        .ok_or("byte skip points past the payload")?;

    let big_endian = header.get("endian") == Some("big") && scalar.byte_size() > 1;
    let mut reader = Cursor::new(data);
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let value = if big_endian {
            scalar.read::<BigEndian>(&mut reader)
        } else {
            scalar.read::<LittleEndian>(&mut reader)
        }
        .map_err(|e| format!("payload: {}", e))?;
        values.push(value);
    }
    Ok((geometry, values))
}

/// Parses a vector written as `(x,y,z)`
fn parse_vector(text: &str) -> Option<[f64; 3]> {
    let inner = text.trim().strip_prefix('(')?.strip_suffix(')')?;
    let values = inner
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .ok()?;
    match values.as_slice() {
        [x, y, z] => Some([*x, *y, *z]),
        _ => None,
    }
}

/// Builds the LPS grid from the space fields
fn grid(
    header: &NrrdHeader,
    size: [usize; 3],
    dimension: usize,
) -> std::result::Result<Geometry, String> {
    let is_ras = match header.get("space") {
        None => false,
        Some("left-posterior-superior") | Some("LPS") => false,
        Some("right-anterior-superior") | Some("RAS") => true,
        Some(other) => return Err(format!("unsupported space '{}'", other)),
    };
    let to_lps = |v: [f64; 3]| if is_ras { ras_to_lps(v) } else { v };

    let mut spacing = [1.0; 3];
    let mut direction: Matrix3 = IDENTITY;

    if let Some(directions) = header.get("space directions") {
        let vectors: Vec<&str> = directions.split_whitespace().collect();
        if vectors.len() != dimension || vectors.contains(&"none") {
            return Err(format!(
                "space directions '{}' do not describe {} spatial axes",
                directions, dimension
            ));
        }
        for (axis, text) in vectors.iter().enumerate() {
            let vector = to_lps(
                parse_vector(text).ok_or_else(|| format!("invalid space direction '{}'", text))?,
            );
            let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm <= 0.0 {
                return Err(format!("zero space direction for axis {}", axis));
            }
            spacing[axis] = norm;
            for (row, value) in direction.iter_mut().zip(vector) {
                row[axis] = value / norm;
            }
        }
    } else if let Some(spacings) = header.get("spacings") {
        for (axis, value) in spacings.split_whitespace().enumerate().take(3) {
            if let Ok(value) = value.parse::<f64>() {
                if value.is_finite() && value > 0.0 {
                    spacing[axis] = value;
                }
            }
        }
    }

    let origin = match header.get("space origin") {
        Some(text) => {
            to_lps(parse_vector(text).ok_or_else(|| format!("invalid space origin '{}'", text))?)
        }
        None => [0.0; 3],
    };
    Ok(Geometry::new(origin, spacing, direction, size))
}
