//! Type registry: semantic type declarations to canonical Arrow types
//!
//! Pure functions mapping a type name plus optional precision/scale/timezone
//! to a single canonical `DataType`. The name set is a closed enum so an
//! unmapped declaration is a hard `UnknownType` error rather than a silent
//! degrade.

use std::str::FromStr;
use std::sync::Arc;

use arrow::datatypes::{DataType, TimeUnit};

use crate::error::{CoreError, Result};

/// Largest declared length for which text/binary columns use the regular
/// (32-bit offset) variant; longer or undeclared lengths use the large
/// variant.
pub const VARLEN_INLINE_MAX: i64 = 42_000;

/// Integer width from a decimal digit count.
pub fn integer_type(precision: u8) -> DataType {
    match precision {
        0..=3 => DataType::Int8,
        4..=5 => DataType::Int16,
        6..=10 => DataType::Int32,
        _ => DataType::Int64,
    }
}

/// Float width from a binary mantissa precision.
pub fn float_type(precision: u8) -> DataType {
    if precision < 25 {
        DataType::Float32
    } else {
        DataType::Float64
    }
}

/// Decimal representation by precision: beyond 38 digits the 128-bit
/// representation cannot hold the value.
pub fn decimal_type(precision: u8, scale: i8) -> DataType {
    if precision > 38 {
        DataType::Decimal256(precision, scale)
    } else {
        DataType::Decimal128(precision, scale)
    }
}

/// Temporal unit from a numeric precision code (fractional digits).
pub fn time_unit(precision: Option<i64>) -> TimeUnit {
    match precision {
        Some(0) => TimeUnit::Second,
        Some(1..=3) => TimeUnit::Millisecond,
        Some(4..=6) => TimeUnit::Microsecond,
        _ => TimeUnit::Nanosecond,
    }
}

/// Text type from a declared length.
pub fn text_type(precision: Option<i64>) -> DataType {
    match precision {
        Some(p) if p > 0 && p <= VARLEN_INLINE_MAX => DataType::Utf8,
        _ => DataType::LargeUtf8,
    }
}

/// Binary type from a declared length.
pub fn binary_type(precision: Option<i64>) -> DataType {
    match precision {
        Some(p) if p > 0 && p <= VARLEN_INLINE_MAX => DataType::Binary,
        _ => DataType::LargeBinary,
    }
}

/// Closed set of semantic type names the registry understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlTypeName {
    Boolean,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Real,
    Double,
    Decimal,
    Numeric,
    Char,
    Varchar,
    Text,
    Binary,
    Date,
    Time,
    Timestamp,
}

impl FromStr for SqlTypeName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "boolean" => Ok(Self::Boolean),
            "tinyint" => Ok(Self::TinyInt),
            "smallint" => Ok(Self::SmallInt),
            "int" | "integer" => Ok(Self::Int),
            "bigint" => Ok(Self::BigInt),
            "float" => Ok(Self::Float),
            "real" => Ok(Self::Real),
            "double" => Ok(Self::Double),
            "decimal" => Ok(Self::Decimal),
            "numeric" => Ok(Self::Numeric),
            "char" => Ok(Self::Char),
            "varchar" => Ok(Self::Varchar),
            "string" => Ok(Self::Text),
            "binary" => Ok(Self::Binary),
            "date" => Ok(Self::Date),
            "time" => Ok(Self::Time),
            "timestamp" => Ok(Self::Timestamp),
            _ => Err(CoreError::UnknownType {
                name: s.to_string(),
            }),
        }
    }
}

/// Resolve a semantic type declaration to its canonical Arrow type.
pub fn resolve_type(
    name: &str,
    precision: Option<i64>,
    scale: Option<i64>,
    tz: Option<&str>,
) -> Result<DataType> {
    let name: SqlTypeName = name.parse()?;
    Ok(match name {
        SqlTypeName::Boolean => DataType::Boolean,
        SqlTypeName::TinyInt => DataType::Int8,
        SqlTypeName::SmallInt => DataType::Int16,
        SqlTypeName::Int => DataType::Int32,
        SqlTypeName::BigInt => DataType::Int64,
        SqlTypeName::Float | SqlTypeName::Real => DataType::Float32,
        SqlTypeName::Double => DataType::Float64,
        SqlTypeName::Decimal | SqlTypeName::Numeric => {
            decimal_type(precision.unwrap_or(38) as u8, scale.unwrap_or(18) as i8)
        }
        SqlTypeName::Char | SqlTypeName::Varchar | SqlTypeName::Text => text_type(precision),
        SqlTypeName::Binary => binary_type(precision),
        SqlTypeName::Date => DataType::Date32,
        SqlTypeName::Time => match time_unit(precision) {
            unit @ (TimeUnit::Second | TimeUnit::Millisecond) => DataType::Time32(unit),
            unit => DataType::Time64(unit),
        },
        SqlTypeName::Timestamp => {
            DataType::Timestamp(time_unit(precision), tz.map(Arc::from))
        }
    })
}

/// Parse a textual type declaration such as `decimal(38,18)`, `varchar(255)`
/// or `timestamp(3, UTC)` and resolve it.
pub fn parse_type_decl(decl: &str) -> Result<DataType> {
    let decl = decl.trim();
    let Some((name, args)) = decl.split_once('(') else {
        return resolve_type(decl, None, None, None);
    };
    let args = args.trim_end_matches(')');

    let mut precision = None;
    let mut scale = None;
    let mut tz = None;
    for arg in args.split(',') {
        let arg = arg.trim();
        if arg.is_empty() {
            continue;
        }
        match arg.parse::<i64>() {
            Ok(n) if precision.is_none() => precision = Some(n),
            Ok(n) => scale = Some(n),
            Err(_) => tz = Some(arg),
        }
    }
    resolve_type(name.trim(), precision, scale, tz)
}
