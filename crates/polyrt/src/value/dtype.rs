//! Data Type - DLPack-Compatible `(code, bits, lanes)` Triple

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, RtError};

/// DLPack data type codes, including the float8 extensions.
pub mod code {
    pub const INT: u8 = 0;
    pub const UINT: u8 = 1;
    pub const FLOAT: u8 = 2;
    pub const OPAQUE_HANDLE: u8 = 3;
    pub const BFLOAT: u8 = 4;
    pub const COMPLEX: u8 = 5;
    pub const BOOL: u8 = 6;
    pub const FLOAT8_E4M3FN: u8 = 10;
    pub const FLOAT8_E5M2: u8 = 12;
}

/// Scalar (or short-vector) element type.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType {
    pub code: u8,
    pub bits: u8,
    pub lanes: u16,
}

pub const DTYPE_F32: DataType = DataType { code: code::FLOAT, bits: 32, lanes: 1 };
pub const DTYPE_F64: DataType = DataType { code: code::FLOAT, bits: 64, lanes: 1 };
pub const DTYPE_I64: DataType = DataType { code: code::INT, bits: 64, lanes: 1 };

impl DataType {
    pub const fn new(code: u8, bits: u8, lanes: u16) -> DataType {
        DataType { code, bits, lanes }
    }

    /// Bytes per element (lanes included), rounded up to whole bytes.
    pub fn size(&self) -> usize {
        (self.bits as usize * self.lanes as usize + 7) / 8
    }

    /// Pack into a stable bit pattern for hashing.
    pub fn to_bits(&self) -> u64 {
        (self.code as u64) | ((self.bits as u64) << 8) | ((self.lanes as u64) << 16)
    }

    fn code_str(code: u8) -> &'static str {
        match code {
            code::INT => "int",
            code::UINT => "uint",
            code::FLOAT => "float",
            code::OPAQUE_HANDLE => "ptr",
            code::BFLOAT => "bfloat",
            code::COMPLEX => "complex",
            code::BOOL => "bool",
            code::FLOAT8_E4M3FN => "float8_e4m3fn",
            code::FLOAT8_E5M2 => "float8_e5m2",
            _ => "unknown",
        }
    }

    fn preset(source: &str) -> Option<DataType> {
        Some(match source {
            "void" => DataType::new(code::OPAQUE_HANDLE, 0, 0),
            "bool" => DataType::new(code::UINT, 1, 1),
            "int4" => DataType::new(code::INT, 4, 1),
            "int8" => DataType::new(code::INT, 8, 1),
            "int16" => DataType::new(code::INT, 16, 1),
            "int32" => DataType::new(code::INT, 32, 1),
            "int64" => DataType::new(code::INT, 64, 1),
            "uint4" => DataType::new(code::UINT, 4, 1),
            "uint8" => DataType::new(code::UINT, 8, 1),
            "uint16" => DataType::new(code::UINT, 16, 1),
            "uint32" => DataType::new(code::UINT, 32, 1),
            "uint64" => DataType::new(code::UINT, 64, 1),
            "float8_e4m3fn" => DataType::new(code::FLOAT8_E4M3FN, 8, 1),
            "float8_e5m2" => DataType::new(code::FLOAT8_E5M2, 8, 1),
            "float16" => DataType::new(code::FLOAT, 16, 1),
            "float32" => DataType::new(code::FLOAT, 32, 1),
            "float64" => DataType::new(code::FLOAT, 64, 1),
            "bfloat16" => DataType::new(code::BFLOAT, 16, 1),
            _ => return None,
        })
    }

    pub fn parse(source: &str) -> Result<DataType> {
        if let Some(dtype) = DataType::preset(source) {
            return Ok(dtype);
        }
        let fail = || RtError::value_error(format!("Cannot convert to `dtype` from string: {source}"));
        let (base, lanes) = match source.rfind('x') {
            Some(pos) => {
                let lanes: u16 = source[pos + 1..].parse().map_err(|_| fail())?;
                (&source[..pos], lanes)
            }
            None => (source, 1u16),
        };
        if base == "float8_e4m3fn" {
            return Ok(DataType::new(code::FLOAT8_E4M3FN, 8, lanes));
        }
        if base == "float8_e5m2" {
            return Ok(DataType::new(code::FLOAT8_E5M2, 8, lanes));
        }
        for (prefix, code) in [
            ("bfloat", code::BFLOAT),
            ("complex", code::COMPLEX),
            ("float", code::FLOAT),
            ("uint", code::UINT),
            ("int", code::INT),
            ("ptr", code::OPAQUE_HANDLE),
        ] {
            if let Some(rest) = base.strip_prefix(prefix) {
                let bits: u8 = rest.parse().map_err(|_| fail())?;
                return Ok(DataType::new(code, bits, lanes));
            }
        }
        Err(fail())
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code == code::UINT && self.bits == 1 && self.lanes == 1 {
            return write!(f, "bool");
        }
        if self.code == code::OPAQUE_HANDLE && self.bits == 0 && self.lanes == 0 {
            return write!(f, "void");
        }
        write!(f, "{}", DataType::code_str(self.code))?;
        if self.code != code::FLOAT8_E4M3FN && self.code != code::FLOAT8_E5M2 {
            write!(f, "{}", self.bits)?;
        }
        if self.lanes != 1 {
            write!(f, "x{}", self.lanes)?;
        }
        Ok(())
    }
}

impl FromStr for DataType {
    type Err = RtError;
    fn from_str(s: &str) -> Result<DataType> {
        DataType::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(std::mem::size_of::<DataType>(), 4);
    }

    #[test]
    fn test_parse_presets() {
        assert_eq!(DataType::parse("float32").unwrap(), DTYPE_F32);
        assert_eq!(DataType::parse("bool").unwrap(), DataType::new(code::UINT, 1, 1));
        assert_eq!(DataType::parse("void").unwrap(), DataType::new(code::OPAQUE_HANDLE, 0, 0));
    }

    #[test]
    fn test_parse_vectorized() {
        let dt = DataType::parse("float32x4").unwrap();
        assert_eq!(dt, DataType::new(code::FLOAT, 32, 4));
        assert_eq!(dt.to_string(), "float32x4");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(DataType::parse("floaty").is_err());
        assert!(DataType::parse("").is_err());
        assert_eq!(DataType::parse("qint8").unwrap_err().kind, "ValueError");
    }

    #[test]
    fn test_display_roundtrip() {
        for s in ["int64", "uint8", "float16", "bfloat16", "float8_e5m2"] {
            assert_eq!(DataType::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_element_size() {
        assert_eq!(DTYPE_F32.size(), 4);
        assert_eq!(DTYPE_F64.size(), 8);
        assert_eq!(DataType::new(code::UINT, 1, 1).size(), 1);
        assert_eq!(DataType::new(code::FLOAT, 32, 4).size(), 16);
    }
}
