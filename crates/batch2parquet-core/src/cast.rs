//! Cast engine: column conversion under a safety policy
//!
//! `safe` here means "fail rather than lose data". Arrow's own cast options
//! use the opposite convention (`safe: true` turns errors into nulls), so the
//! flag is inverted at the boundary: under the safe policy kernel failures
//! surface as errors, under the unsafe policy unrepresentable values degrade
//! to null.
//!
//! Dispatch is a single ordered match over (source type, target type); the
//! first arm that applies wins, and everything unmatched falls through to
//! Arrow's generic cast kernel.

use std::sync::Arc;

use arrow::array::{
    cast::AsArray, Array, ArrayRef, GenericStringArray, OffsetSizeTrait, TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray,
};
use arrow::compute::kernels::arity::unary;
use arrow::compute::{cast_with_options, CastOptions};
use arrow::datatypes::{
    DataType, Field, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    TimeUnit, TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType,
};
use arrow::error::ArrowError;
use arrow::util::display::FormatOptions;
use chrono::offset::LocalResult;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{CoreError, Result};

/// Cast a column to the type of `target`, wrapping any handler failure with
/// the field name, target type and safety flag.
pub fn cast_column(column: &ArrayRef, target: &Field, safe: bool) -> Result<ArrayRef> {
    if column.data_type() == target.data_type() {
        return Ok(column.clone());
    }
    dispatch(column, target.data_type(), safe).map_err(|source| CoreError::Cast {
        field: target.name().clone(),
        target: target.data_type().clone(),
        safe,
        source,
    })
}

fn dispatch(array: &ArrayRef, target: &DataType, safe: bool) -> ArrowResult<ArrayRef> {
    use DataType::*;
    match (array.data_type(), target) {
        (Utf8 | LargeUtf8, Int8 | Int16 | Int32 | Int64) => utf8_to_integer(array, target, safe),
        (Utf8 | LargeUtf8, Decimal128(_, _) | Decimal256(_, _)) => {
            utf8_to_decimal(array, target, safe)
        }
        (Utf8 | LargeUtf8, Timestamp(_, _)) => utf8_to_timestamp(array, target, safe),
        (Utf8 | LargeUtf8, Date32) => utf8_to_date(array, safe),
        (Utf8 | LargeUtf8, Time32(_) | Time64(_)) => utf8_to_time(array, target, safe),
        (Timestamp(_, _), Timestamp(_, _)) => timestamp_to_timestamp(array, target, safe),
        _ => cast_with_options(array, target, &cast_options(safe)),
    }
}

type ArrowResult<T> = std::result::Result<T, ArrowError>;

fn cast_options(safe: bool) -> CastOptions<'static> {
    CastOptions {
        safe: !safe,
        format_options: FormatOptions::new(),
    }
}

/// Strict options: parse/conversion failures always surface as errors, so a
/// fallback path can observe them.
fn strict_options() -> CastOptions<'static> {
    CastOptions {
        safe: false,
        format_options: FormatOptions::new(),
    }
}

/// Text to integer: parse as float (narrow intermediate for narrow targets),
/// round half away from zero, then narrow to the target width. Safe narrowing
/// fails on overflow; unsafe narrowing wraps to the target's low bits, so
/// "300" becomes 44 as an Int8. Unparseable text is null under either policy
/// that reaches the narrow step.
fn utf8_to_integer(array: &ArrayRef, target: &DataType, safe: bool) -> ArrowResult<ArrayRef> {
    if safe {
        let rounded: ArrayRef = match target {
            DataType::Int8 | DataType::Int16 => {
                let parsed = cast_with_options(array, &DataType::Float32, &cast_options(safe))?;
                Arc::new(unary::<Float32Type, _, Float32Type>(
                    parsed.as_primitive::<Float32Type>(),
                    |v| v.round(),
                ))
            }
            _ => {
                let parsed = cast_with_options(array, &DataType::Float64, &cast_options(safe))?;
                Arc::new(unary::<Float64Type, _, Float64Type>(
                    parsed.as_primitive::<Float64Type>(),
                    |v| v.round(),
                ))
            }
        };
        return cast_with_options(&rounded, target, &cast_options(safe));
    }
    // The `as i64` intermediate saturates at 64-bit bounds; the final `as`
    // keeps the low bits.
    Ok(match target {
        DataType::Int8 => {
            let parsed = cast_with_options(array, &DataType::Float32, &cast_options(false))?;
            Arc::new(unary::<Float32Type, _, Int8Type>(
                parsed.as_primitive::<Float32Type>(),
                |v| v.round() as i64 as i8,
            ))
        }
        DataType::Int16 => {
            let parsed = cast_with_options(array, &DataType::Float32, &cast_options(false))?;
            Arc::new(unary::<Float32Type, _, Int16Type>(
                parsed.as_primitive::<Float32Type>(),
                |v| v.round() as i64 as i16,
            ))
        }
        DataType::Int32 => {
            let parsed = cast_with_options(array, &DataType::Float64, &cast_options(false))?;
            Arc::new(unary::<Float64Type, _, Int32Type>(
                parsed.as_primitive::<Float64Type>(),
                |v| v.round() as i64 as i32,
            ))
        }
        _ => {
            let parsed = cast_with_options(array, &DataType::Float64, &cast_options(false))?;
            Arc::new(unary::<Float64Type, _, Int64Type>(
                parsed.as_primitive::<Float64Type>(),
                |v| v.round() as i64,
            ))
        }
    })
}

/// Text to decimal through a 64-bit float intermediate. The intermediate is
/// lossy beyond 15-16 significant digits; that matches the documented
/// behavior of this path.
fn utf8_to_decimal(array: &ArrayRef, target: &DataType, safe: bool) -> ArrowResult<ArrayRef> {
    let doubles = cast_with_options(array, &DataType::Float64, &cast_options(safe))?;
    cast_with_options(&doubles, target, &cast_options(safe))
}

fn utf8_to_timestamp(array: &ArrayRef, target: &DataType, safe: bool) -> ArrowResult<ArrayRef> {
    match cast_with_options(array, target, &strict_options()) {
        Ok(out) => Ok(out),
        Err(e) if safe => Err(e),
        Err(_) => {
            // Permissive fallback: per-value multi-format parse, then hand
            // the naive result to the timestamp localization path.
            let unit = match target {
                DataType::Timestamp(unit, _) => *unit,
                _ => unreachable!("dispatch guarantees a timestamp target"),
            };
            let naive = parse_timestamps_lenient(array, unit)?;
            match target {
                DataType::Timestamp(_, Some(_)) => timestamp_to_timestamp(&naive, target, false),
                _ => Ok(naive),
            }
        }
    }
}

fn utf8_to_date(array: &ArrayRef, safe: bool) -> ArrowResult<ArrayRef> {
    if safe {
        // ISO calendar dates only; anything else is an error.
        cast_with_options(array, &DataType::Date32, &strict_options())
    } else {
        let ts = utf8_to_timestamp(
            array,
            &DataType::Timestamp(TimeUnit::Nanosecond, None),
            false,
        )?;
        cast_with_options(&ts, &DataType::Date32, &cast_options(false))
    }
}

/// Text to time-of-day through an intermediate timestamp of the target unit.
fn utf8_to_time(array: &ArrayRef, target: &DataType, safe: bool) -> ArrowResult<ArrayRef> {
    let unit = match target {
        DataType::Time32(unit) | DataType::Time64(unit) => *unit,
        _ => unreachable!("dispatch guarantees a time target"),
    };
    let ts = utf8_to_timestamp(array, &DataType::Timestamp(unit, None), safe)?;
    cast_with_options(&ts, target, &cast_options(safe))
}

fn timestamp_to_timestamp(array: &ArrayRef, target: &DataType, safe: bool) -> ArrowResult<ArrayRef> {
    let (src_unit, src_tz) = match array.data_type() {
        DataType::Timestamp(unit, tz) => (*unit, tz.clone()),
        other => {
            return Err(ArrowError::CastError(format!(
                "expected a timestamp source, got {other}"
            )))
        }
    };
    let (dst_unit, dst_tz) = match target {
        DataType::Timestamp(unit, tz) => (*unit, tz.clone()),
        other => {
            return Err(ArrowError::CastError(format!(
                "expected a timestamp target, got {other}"
            )))
        }
    };

    if src_tz.is_some() {
        // Already zoned; Arrow converts between zones directly.
        return cast_with_options(array, target, &cast_options(safe));
    }
    match dst_tz.as_deref() {
        // Naive to naive, or naive reinterpreted as UTC wall time.
        None | Some("UTC") | Some("GMT") => cast_with_options(array, target, &cast_options(safe)),
        Some(tz) => localize_naive(array, src_unit, dst_unit, tz, safe),
    }
}

/// Interpret naive timestamps as wall-clock times in `tz`. Safe mode raises
/// on ambiguous or nonexistent local times at DST transitions; unsafe mode
/// resolves to the earliest valid interpretation.
fn localize_naive(
    array: &ArrayRef,
    src_unit: TimeUnit,
    dst_unit: TimeUnit,
    tz: &str,
    safe: bool,
) -> ArrowResult<ArrayRef> {
    let zone: Tz = tz
        .parse()
        .map_err(|_| ArrowError::CastError(format!("invalid timezone '{tz}'")))?;

    let mut localized = Vec::with_capacity(array.len());
    for value in timestamp_values(array, src_unit) {
        let Some(value) = value else {
            localized.push(None);
            continue;
        };
        let naive = epoch_to_naive(value, src_unit).ok_or_else(|| {
            ArrowError::CastError(format!("timestamp {value} out of range for unit {src_unit:?}"))
        })?;
        let resolved = match zone.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(earliest, _) if !safe => earliest,
            LocalResult::Ambiguous(_, _) => {
                return Err(ArrowError::CastError(format!(
                    "local time {naive} is ambiguous in {tz}"
                )))
            }
            LocalResult::None if !safe => {
                // DST gap; the earliest valid interpretation is one hour on.
                zone.from_local_datetime(&(naive + Duration::hours(1)))
                    .earliest()
                    .ok_or_else(|| {
                        ArrowError::CastError(format!(
                            "local time {naive} does not exist in {tz}"
                        ))
                    })?
            }
            LocalResult::None => {
                return Err(ArrowError::CastError(format!(
                    "local time {naive} does not exist in {tz}"
                )))
            }
        };
        localized.push(Some(utc_epoch(&resolved.with_timezone(&Utc), dst_unit)?));
    }
    Ok(timestamp_array(localized, dst_unit, Some(Arc::from(tz))))
}

fn timestamp_values(array: &ArrayRef, unit: TimeUnit) -> Vec<Option<i64>> {
    match unit {
        TimeUnit::Second => array.as_primitive::<TimestampSecondType>().iter().collect(),
        TimeUnit::Millisecond => array
            .as_primitive::<TimestampMillisecondType>()
            .iter()
            .collect(),
        TimeUnit::Microsecond => array
            .as_primitive::<TimestampMicrosecondType>()
            .iter()
            .collect(),
        TimeUnit::Nanosecond => array
            .as_primitive::<TimestampNanosecondType>()
            .iter()
            .collect(),
    }
}

fn timestamp_array(values: Vec<Option<i64>>, unit: TimeUnit, tz: Option<Arc<str>>) -> ArrayRef {
    match unit {
        TimeUnit::Second => Arc::new(TimestampSecondArray::from(values).with_timezone_opt(tz)),
        TimeUnit::Millisecond => {
            Arc::new(TimestampMillisecondArray::from(values).with_timezone_opt(tz))
        }
        TimeUnit::Microsecond => {
            Arc::new(TimestampMicrosecondArray::from(values).with_timezone_opt(tz))
        }
        TimeUnit::Nanosecond => {
            Arc::new(TimestampNanosecondArray::from(values).with_timezone_opt(tz))
        }
    }
}

fn epoch_to_naive(value: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let dt = match unit {
        TimeUnit::Second => DateTime::from_timestamp(value, 0)?,
        TimeUnit::Millisecond => DateTime::from_timestamp_millis(value)?,
        TimeUnit::Microsecond => DateTime::from_timestamp_micros(value)?,
        TimeUnit::Nanosecond => DateTime::from_timestamp_nanos(value),
    };
    Some(dt.naive_utc())
}

fn utc_epoch(dt: &DateTime<Utc>, unit: TimeUnit) -> ArrowResult<i64> {
    match unit {
        TimeUnit::Second => Ok(dt.timestamp()),
        TimeUnit::Millisecond => Ok(dt.timestamp_millis()),
        TimeUnit::Microsecond => Ok(dt.timestamp_micros()),
        TimeUnit::Nanosecond => dt.timestamp_nanos_opt().ok_or_else(|| {
            ArrowError::CastError(format!("{dt} out of range for nanosecond timestamps"))
        }),
    }
}

fn parse_timestamps_lenient(array: &ArrayRef, unit: TimeUnit) -> ArrowResult<ArrayRef> {
    match array.data_type() {
        DataType::Utf8 => lenient_parse_array(array.as_string::<i32>(), unit),
        DataType::LargeUtf8 => lenient_parse_array(array.as_string::<i64>(), unit),
        other => Err(ArrowError::CastError(format!(
            "cannot parse {other} as timestamps"
        ))),
    }
}

fn lenient_parse_array<O: OffsetSizeTrait>(
    array: &GenericStringArray<O>,
    unit: TimeUnit,
) -> ArrowResult<ArrayRef> {
    let mut values = Vec::with_capacity(array.len());
    for value in array.iter() {
        values.push(match value {
            None => None,
            Some(s) => match parse_datetime_lenient(s.trim()) {
                // Unparseable values degrade to null; this path only runs
                // under the unsafe policy.
                None => None,
                Some(dt) => Some(utc_epoch(&dt.and_utc(), unit)?),
            },
        });
    }
    Ok(timestamp_array(values, unit, None))
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y%m%d%H%M%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d", "%m/%d/%Y"];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

fn parse_datetime_lenient(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    for format in TIME_FORMATS {
        if let Ok(time) = NaiveTime::parse_from_str(s, format) {
            return Some(NaiveDateTime::new(NaiveDate::from_ymd_opt(1970, 1, 1)?, time));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Date32Array, Int8Array, Int32Array, StringArray};

    fn utf8(values: &[&str]) -> ArrayRef {
        Arc::new(StringArray::from(values.to_vec()))
    }

    fn field(dt: DataType) -> Field {
        Field::new("col", dt, true)
    }

    #[test]
    fn test_noop_when_types_equal() {
        let arr = utf8(&["a", "b"]);
        let out = cast_column(&arr, &field(DataType::Utf8), true).unwrap();
        assert_eq!(out.to_data(), arr.to_data());
    }

    #[test]
    fn test_text_to_wide_decimal_safe() {
        let arr = utf8(&["123.456"]);
        let out = cast_column(&arr, &field(DataType::Decimal128(38, 18)), true).unwrap();
        assert_eq!(out.data_type(), &DataType::Decimal128(38, 18));
        assert_eq!(out.null_count(), 0);
    }

    #[test]
    fn test_text_to_int8_overflow_fails_safe() {
        let arr = utf8(&["300"]);
        let err = cast_column(&arr, &field(DataType::Int8), true).unwrap_err();
        match err {
            CoreError::Cast { field, target, safe, .. } => {
                assert_eq!(field, "col");
                assert_eq!(target, DataType::Int8);
                assert!(safe);
            }
            other => panic!("expected a cast error, got {other:?}"),
        }
    }

    #[test]
    fn test_text_to_int8_overflow_wraps_unsafe() {
        // 300 = 0x12C keeps its low byte, 0x2C = 44
        let arr = utf8(&["300", "12", "nonsense"]);
        let out = cast_column(&arr, &field(DataType::Int8), false).unwrap();
        let out = out.as_any().downcast_ref::<Int8Array>().unwrap();
        assert_eq!(out.value(0), 44);
        assert_eq!(out.value(1), 12);
        assert!(out.is_null(2));
    }

    #[test]
    fn test_text_to_int32_overflow_wraps_unsafe() {
        let arr = utf8(&["4294967296"]); // 2^32 wraps to 0
        let out = cast_column(&arr, &field(DataType::Int32), false).unwrap();
        let out = out.as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(out.value(0), 0);
    }

    #[test]
    fn test_text_to_integer_rounds_to_nearest() {
        let arr = utf8(&["123.6", "-2.5"]);
        let out = cast_column(&arr, &field(DataType::Int32), true).unwrap();
        let out = out.as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(out.value(0), 124);
        assert_eq!(out.value(1), -3);
    }

    #[test]
    fn test_text_to_date_iso_safe() {
        let arr = utf8(&["2024-01-15"]);
        let out = cast_column(&arr, &field(DataType::Date32), true).unwrap();
        let out = out.as_any().downcast_ref::<Date32Array>().unwrap();
        // days since epoch for 2024-01-15
        assert_eq!(out.value(0), 19737);
    }

    #[test]
    fn test_text_to_date_via_timestamp_unsafe() {
        let arr = utf8(&["2024/01/15 10:30:00"]);
        let out = cast_column(&arr, &field(DataType::Date32), false).unwrap();
        let out = out.as_any().downcast_ref::<Date32Array>().unwrap();
        assert_eq!(out.value(0), 19737);
    }

    #[test]
    fn test_text_to_timestamp_lenient_fallback() {
        let ty = DataType::Timestamp(TimeUnit::Millisecond, None);
        let arr = utf8(&["20240115103000", "garbage"]);
        assert!(cast_column(&arr, &field(ty.clone()), true).is_err());

        let out = cast_column(&arr, &field(ty), false).unwrap();
        let out = out
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .unwrap();
        assert_eq!(out.value(0), 1_705_314_600_000);
        assert!(out.is_null(1));
    }

    #[test]
    fn test_naive_timestamp_reinterpreted_as_utc() {
        let naive: ArrayRef = Arc::new(TimestampSecondArray::from(vec![Some(1_700_000_000)]));
        let ty = DataType::Timestamp(TimeUnit::Second, Some("UTC".into()));
        let out = cast_column(&naive, &field(ty.clone()), true).unwrap();
        assert_eq!(out.data_type(), &ty);
        let out = out.as_primitive::<TimestampSecondType>();
        assert_eq!(out.value(0), 1_700_000_000);
    }

    #[test]
    fn test_naive_timestamp_localized_to_zone() {
        // 2024-01-15 12:00:00 naive, read as Europe/Berlin (UTC+1 in winter)
        let wall = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp();
        let naive: ArrayRef = Arc::new(TimestampSecondArray::from(vec![Some(wall)]));
        let ty = DataType::Timestamp(TimeUnit::Second, Some("Europe/Berlin".into()));
        let out = cast_column(&naive, &field(ty), true).unwrap();
        let out = out.as_primitive::<TimestampSecondType>();
        assert_eq!(out.value(0), wall - 3600);
    }

    #[test]
    fn test_ambiguous_local_time_dst_edge() {
        // 2024-10-27 02:30:00 occurs twice in Europe/Berlin
        let wall = NaiveDate::from_ymd_opt(2024, 10, 27)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap()
            .and_utc()
            .timestamp();
        let naive: ArrayRef = Arc::new(TimestampSecondArray::from(vec![Some(wall)]));
        let ty = DataType::Timestamp(TimeUnit::Second, Some("Europe/Berlin".into()));

        let err = cast_column(&naive, &field(ty.clone()), true).unwrap_err();
        assert!(matches!(err, CoreError::Cast { .. }));

        // earliest interpretation is CEST, UTC+2
        let out = cast_column(&naive, &field(ty), false).unwrap();
        let out = out.as_primitive::<TimestampSecondType>();
        assert_eq!(out.value(0), wall - 7200);
    }

    #[test]
    fn test_generic_fallback_numeric_widening() {
        let arr: ArrayRef = Arc::new(Int32Array::from(vec![1, 2, 3]));
        let out = cast_column(&arr, &field(DataType::Int64), true).unwrap();
        assert_eq!(out.data_type(), &DataType::Int64);
    }
}
