//! PostgreSQL COPY BINARY frame encoding.
//!
//! Frame layout: 11-byte signature + flags (4) + extension length (4),
//! then per row a field count (2) and per field a byte length (4, -1 for
//! NULL) followed by the payload, then a -1 field count as trailer.
//!
//! Values are validated against the column type before any bytes are
//! written, so a failed cell leaves the buffer untouched and the caller
//! can substitute a NULL.

use bytes::{BufMut, BytesMut};
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::schema::DataType;
use crate::value::SqlValue;

/// COPY binary header signature.
const COPY_SIGNATURE: &[u8] = b"PGCOPY\n\xff\r\n\0";

/// Microseconds between the Unix epoch and 2000-01-01, the Postgres epoch.
const PG_EPOCH_MICROS: i64 = 946_684_800_000_000;

/// Cell-level encoding failure; the buffer is unchanged when this returns.
#[derive(Debug)]
pub struct EncodeError {
    pub message: String,
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EncodeError {}

fn mismatch(expected: DataType, value: &SqlValue) -> EncodeError {
    EncodeError {
        message: format!(
            "cannot encode {} value into {} column",
            value.kind(),
            expected.postgres()
        ),
    }
}

/// Write the stream header.
pub fn write_header(buf: &mut BytesMut) {
    buf.put_slice(COPY_SIGNATURE);
    buf.put_i32(0); // flags
    buf.put_i32(0); // extension area length
}

/// Write the stream trailer.
pub fn write_trailer(buf: &mut BytesMut) {
    buf.put_i16(-1);
}

/// Write the field count opening a row.
pub fn write_row_header(buf: &mut BytesMut, fields: usize) {
    buf.put_i16(fields as i16);
}

/// Write a NULL cell.
pub fn write_null(buf: &mut BytesMut) {
    buf.put_i32(-1);
}

/// Write one cell. The value must match the column type; a mismatch fails
/// before anything is written.
pub fn write_value(
    buf: &mut BytesMut,
    value: &SqlValue,
    expected: DataType,
) -> Result<(), EncodeError> {
    match (expected, value) {
        (_, SqlValue::Null(_)) => {
            write_null(buf);
            Ok(())
        }
        (DataType::Uuid, SqlValue::Uuid(v)) => {
            buf.put_i32(16);
            buf.put_slice(v.as_bytes());
            Ok(())
        }
        (DataType::Text, SqlValue::Text(v)) => {
            let bytes = v.as_bytes();
            buf.put_i32(bytes.len() as i32);
            buf.put_slice(bytes);
            Ok(())
        }
        (DataType::Boolean, SqlValue::Bool(v)) => {
            buf.put_i32(1);
            buf.put_u8(u8::from(*v));
            Ok(())
        }
        (DataType::Integer, SqlValue::I32(v)) => {
            buf.put_i32(4);
            buf.put_i32(*v);
            Ok(())
        }
        (DataType::BigInt, SqlValue::I64(v)) => {
            buf.put_i32(8);
            buf.put_i64(*v);
            Ok(())
        }
        (DataType::BigInt, SqlValue::I32(v)) => {
            buf.put_i32(8);
            buf.put_i64(i64::from(*v));
            Ok(())
        }
        (DataType::Timestamptz, SqlValue::Timestamptz(v)) => {
            let micros = v.timestamp_micros() - PG_EPOCH_MICROS;
            buf.put_i32(8);
            buf.put_i64(micros);
            Ok(())
        }
        (DataType::Date, SqlValue::Date(v)) => {
            let epoch = NaiveDate::from_ymd_opt(2000, 1, 1).expect("fixed date");
            let days = (*v - epoch).num_days() as i32;
            buf.put_i32(4);
            buf.put_i32(days);
            Ok(())
        }
        (DataType::Numeric, SqlValue::Decimal(v)) => {
            write_numeric(buf, v);
            Ok(())
        }
        (DataType::Jsonb, SqlValue::Json(v)) => {
            let text = v.to_string();
            // jsonb payload carries a version byte before the document.
            buf.put_i32(1 + text.len() as i32);
            buf.put_u8(1);
            buf.put_slice(text.as_bytes());
            Ok(())
        }
        (expected, value) => Err(mismatch(expected, value)),
    }
}

/// Encode a decimal into the NUMERIC wire format: four i16 header fields
/// (ndigits, weight, sign, dscale) followed by base-10000 digit groups,
/// most significant first.
fn write_numeric(buf: &mut BytesMut, value: &Decimal) {
    const NUMERIC_POS: i16 = 0x0000;
    const NUMERIC_NEG: i16 = 0x4000;

    let dscale = value.scale() as i16;

    if value.is_zero() {
        buf.put_i32(8);
        buf.put_i16(0); // ndigits
        buf.put_i16(0); // weight
        buf.put_i16(NUMERIC_POS);
        buf.put_i16(dscale);
        return;
    }

    let sign = if value.is_sign_negative() {
        NUMERIC_NEG
    } else {
        NUMERIC_POS
    };

    // Group the decimal digits into base-10000 words around the decimal
    // point: the integer part pads on the left, the fraction on the right.
    let text = value.abs().to_string();
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, f),
        None => (text.as_str(), ""),
    };

    let mut digits: Vec<i16> = Vec::new();

    let int_trimmed = int_part.trim_start_matches('0');
    if !int_trimmed.is_empty() {
        let padded = format!("{:0>width$}", int_trimmed, width = int_trimmed.len().div_ceil(4) * 4);
        for chunk in padded.as_bytes().chunks(4) {
            digits.push(
                std::str::from_utf8(chunk)
                    .expect("ascii digits")
                    .parse()
                    .expect("four decimal digits"),
            );
        }
    }
    let int_groups = digits.len() as i16;

    if !frac_part.is_empty() {
        let mut padded = frac_part.to_string();
        while padded.len() % 4 != 0 {
            padded.push('0');
        }
        for chunk in padded.as_bytes().chunks(4) {
            digits.push(
                std::str::from_utf8(chunk)
                    .expect("ascii digits")
                    .parse()
                    .expect("four decimal digits"),
            );
        }
    }

    // Weight is the base-10000 exponent of the first digit group. A pure
    // fraction counts its leading zero groups downward from -1.
    let weight = if int_groups > 0 {
        int_groups - 1
    } else {
        let leading_zero_groups = digits.iter().take_while(|d| **d == 0).count() as i16;
        -(leading_zero_groups + 1)
    };

    while digits.len() > 1 && digits.last() == Some(&0) {
        digits.pop();
    }
    while digits.len() > 1 && digits.first() == Some(&0) {
        digits.remove(0);
    }

    let ndigits = digits.len() as i16;
    buf.put_i32(8 + i32::from(ndigits) * 2);
    buf.put_i16(ndigits);
    buf.put_i16(weight);
    buf.put_i16(sign);
    buf.put_i16(dscale);
    for digit in digits {
        buf.put_i16(digit);
    }
}
