//! Conversions between Sluice values and PostgreSQL wire types

use std::error::Error;

use bytes::BytesMut;
use postgres_types::{FromSql, IsNull, Kind, ToSql, Type, to_sql_checked};
use sluice_core::Value;
use tokio_postgres::Row as PgRow;

#[cfg(test)]
mod tests;

type BoxError = Box<dyn Error + Sync + Send>;

/// An owned parameter, narrowed to the type the prepared statement expects
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PgValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
    DateTimeUtc(chrono::DateTime<chrono::Utc>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    DateTime(chrono::NaiveDateTime),
    Array(Vec<PgValue>),
}

impl PgValue {
    /// Bind `values` against the parameter types of a prepared statement
    pub(crate) fn bind_all(values: &[Value], types: &[Type]) -> Vec<PgValue> {
        values
            .iter()
            .enumerate()
            .map(|(i, value)| match types.get(i) {
                Some(ty) => Self::for_type(value, ty),
                None => Self::from_value(value),
            })
            .collect()
    }

    pub(crate) fn for_type(value: &Value, target: &Type) -> Self {
        match value {
            Value::Int16(v) => Self::coerce_int(i64::from(*v), target),
            Value::Int32(v) => Self::coerce_int(i64::from(*v), target),
            Value::Int64(v) => Self::coerce_int(*v, target),
            Value::Float32(v) if *target == Type::FLOAT8 => PgValue::Float64(f64::from(*v)),
            Value::Float64(v) if *target == Type::FLOAT4 => PgValue::Float32(*v as f32),
            Value::String(v) => Self::coerce_string(v, target),
            Value::Array(items) => match target.kind() {
                Kind::Array(member) => {
                    PgValue::Array(items.iter().map(|v| Self::for_type(v, member)).collect())
                }
                _ => PgValue::String(value.to_string()),
            },
            other => Self::from_value(other),
        }
    }

    fn coerce_int(value: i64, target: &Type) -> Self {
        match *target {
            Type::INT2 => PgValue::Int16(value as i16),
            Type::INT4 => PgValue::Int32(value as i32),
            Type::FLOAT4 => PgValue::Float32(value as f32),
            Type::FLOAT8 => PgValue::Float64(value as f64),
            Type::TEXT | Type::VARCHAR | Type::NUMERIC => PgValue::String(value.to_string()),
            _ => PgValue::Int64(value),
        }
    }

    /// Strings bound to typed columns are parsed where the format is unambiguous
    fn coerce_string(value: &str, target: &Type) -> Self {
        let fallback = || PgValue::String(value.to_string());
        match *target {
            Type::JSON | Type::JSONB => serde_json::from_str(value)
                .map(PgValue::Json)
                .unwrap_or_else(|_| fallback()),
            Type::UUID => uuid::Uuid::parse_str(value)
                .map(PgValue::Uuid)
                .unwrap_or_else(|_| fallback()),
            Type::DATE => chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(PgValue::Date)
                .unwrap_or_else(|_| fallback()),
            Type::TIME => chrono::NaiveTime::parse_from_str(value, "%H:%M:%S%.f")
                .map(PgValue::Time)
                .unwrap_or_else(|_| fallback()),
            Type::TIMESTAMP => parse_naive_timestamp(value)
                .map(PgValue::DateTime)
                .unwrap_or_else(fallback),
            Type::TIMESTAMPTZ => chrono::DateTime::parse_from_rfc3339(value)
                .map(|ts| ts.with_timezone(&chrono::Utc))
                .ok()
                .or_else(|| parse_naive_timestamp(value).map(|ts| ts.and_utc()))
                .map(PgValue::DateTimeUtc)
                .unwrap_or_else(fallback),
            _ => fallback(),
        }
    }

    /// Used when the server did not report a parameter type
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => PgValue::Null,
            Value::Bool(v) => PgValue::Bool(*v),
            Value::Int16(v) => PgValue::Int16(*v),
            Value::Int32(v) => PgValue::Int32(*v),
            Value::Int64(v) => PgValue::Int64(*v),
            Value::Float32(v) => PgValue::Float32(*v),
            Value::Float64(v) => PgValue::Float64(*v),
            Value::Decimal(v) | Value::String(v) => PgValue::String(v.clone()),
            Value::Bytes(v) => PgValue::Bytes(v.clone()),
            Value::Uuid(v) => PgValue::Uuid(*v),
            Value::Json(v) => PgValue::Json(v.clone()),
            Value::DateTimeUtc(v) => PgValue::DateTimeUtc(*v),
            Value::Date(v) => PgValue::Date(*v),
            Value::Time(v) => PgValue::Time(*v),
            Value::DateTime(v) => PgValue::DateTime(*v),
            Value::Array(items) => PgValue::Array(items.iter().map(Self::from_value).collect()),
        }
    }
}

fn parse_naive_timestamp(value: &str) -> Option<chrono::NaiveDateTime> {
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .or_else(|| chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").ok())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

impl ToSql for PgValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            PgValue::Null => Ok(IsNull::Yes),
            PgValue::Bool(v) => v.to_sql(ty, out),
            PgValue::Int16(v) => v.to_sql(ty, out),
            PgValue::Int32(v) => v.to_sql(ty, out),
            PgValue::Int64(v) => v.to_sql(ty, out),
            PgValue::Float32(v) => v.to_sql(ty, out),
            PgValue::Float64(v) => v.to_sql(ty, out),
            PgValue::String(v) => v.to_sql(ty, out),
            PgValue::Bytes(v) => v.to_sql(ty, out),
            PgValue::Uuid(v) => v.to_sql(ty, out),
            PgValue::Json(v) => v.to_sql(ty, out),
            PgValue::DateTimeUtc(v) => v.to_sql(ty, out),
            PgValue::Date(v) => v.to_sql(ty, out),
            PgValue::Time(v) => v.to_sql(ty, out),
            PgValue::DateTime(v) => v.to_sql(ty, out),
            PgValue::Array(items) => items.to_sql(ty, out),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// NUMERIC decoded to its exact decimal text
#[derive(Debug)]
pub(crate) struct PgNumericString(pub(crate) String);

impl PgNumericString {
    /// Decode the binary NUMERIC format: header of four i16/u16 fields
    /// (ndigits, weight, sign, dscale) followed by base-10000 digit groups
    pub(crate) fn parse(raw: &[u8]) -> Result<String, BoxError> {
        if raw.len() < 8 {
            return Err("invalid NUMERIC payload: too short".into());
        }
        let ndigits = i16::from_be_bytes([raw[0], raw[1]]).max(0) as usize;
        let weight = i16::from_be_bytes([raw[2], raw[3]]);
        let sign = u16::from_be_bytes([raw[4], raw[5]]);
        let dscale = i16::from_be_bytes([raw[6], raw[7]]).max(0) as usize;

        if sign == 0xC000 {
            return Ok("NaN".to_string());
        }
        if raw.len() < 8 + ndigits * 2 {
            return Err("invalid NUMERIC payload: truncated digits".into());
        }

        let digits: Vec<u16> = raw[8..8 + ndigits * 2]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        if digits.iter().any(|group| *group > 9999) {
            return Err("invalid NUMERIC payload: group out of range".into());
        }
        if digits.is_empty() {
            return Ok(match dscale {
                0 => "0".to_string(),
                scale => format!("0.{}", "0".repeat(scale)),
            });
        }

        let integer_groups = if weight >= 0 { weight as usize + 1 } else { 0 };
        let mut integer = String::new();
        for index in 0..integer_groups {
            let group = digits.get(index).copied().unwrap_or(0);
            if index == 0 {
                integer.push_str(&group.to_string());
            } else {
                integer.push_str(&format!("{group:04}"));
            }
        }
        if integer.is_empty() {
            integer.push('0');
        }

        let mut fraction = String::new();
        if dscale > 0 {
            // Negative weights put leading zero groups before the first digit.
            let leading_zero_groups = if weight < 0 { (-(weight as i32) - 1) as usize } else { 0 };
            fraction.push_str(&"0000".repeat(leading_zero_groups));
            for group in digits.iter().skip(integer_groups.min(digits.len())) {
                fraction.push_str(&format!("{group:04}"));
            }
            if fraction.len() < dscale {
                fraction.push_str(&"0".repeat(dscale - fraction.len()));
            } else {
                fraction.truncate(dscale);
            }
        }

        // Rendered with exactly dscale fraction digits, as Postgres prints it.
        let mut output = String::new();
        let nonzero = integer != "0" || fraction.bytes().any(|digit| digit != b'0');
        if sign == 0x4000 && nonzero {
            output.push('-');
        }
        output.push_str(&integer);
        if !fraction.is_empty() {
            output.push('.');
            output.push_str(&fraction);
        }
        Ok(output)
    }
}

impl<'a> FromSql<'a> for PgNumericString {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(Self(Self::parse(raw)?))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Raw UTF-8 payload of a type we have no mapping for (enums, domains)
#[derive(Debug)]
struct PgFallbackString(String);

impl<'a> FromSql<'a> for PgFallbackString {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(Self(String::from_utf8(raw.to_vec())?))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn get<'a, T: FromSql<'a>>(row: &'a PgRow, idx: usize) -> Option<T> {
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

fn array<'a, T: FromSql<'a>>(row: &'a PgRow, idx: usize, wrap: fn(T) -> Value) -> Option<Value> {
    get::<Vec<T>>(row, idx).map(|items| Value::Array(items.into_iter().map(wrap).collect()))
}

/// Decode column `idx` of a result row
pub(crate) fn postgres_to_value(row: &PgRow, idx: usize) -> Value {
    let type_name = row.columns()[idx].type_().name();
    let value = match type_name {
        "bool" => get(row, idx).map(Value::Bool),
        "int2" => get(row, idx).map(Value::Int16),
        "int4" => get(row, idx).map(Value::Int32),
        "int8" => get(row, idx).map(Value::Int64),
        "float4" => get(row, idx).map(Value::Float32),
        "float8" => get(row, idx).map(Value::Float64),
        "numeric" => get::<PgNumericString>(row, idx).map(|n| Value::Decimal(n.0)),
        "text" | "varchar" | "bpchar" | "name" | "char" => get(row, idx).map(Value::String),
        "bytea" => get(row, idx).map(Value::Bytes),
        "uuid" => get(row, idx).map(Value::Uuid),
        "json" | "jsonb" => get(row, idx).map(Value::Json),
        "date" => get(row, idx).map(Value::Date),
        "time" => get(row, idx).map(Value::Time),
        "timestamp" => get(row, idx).map(Value::DateTime),
        "timestamptz" => get(row, idx).map(Value::DateTimeUtc),
        "_bool" => array(row, idx, Value::Bool),
        "_int2" => array(row, idx, Value::Int16),
        "_int4" => array(row, idx, Value::Int32),
        "_int8" => array(row, idx, Value::Int64),
        "_float8" => array(row, idx, Value::Float64),
        "_text" | "_varchar" | "_bpchar" | "_name" => array(row, idx, Value::String),
        "_uuid" => array(row, idx, Value::Uuid),
        _ => get::<PgFallbackString>(row, idx).map(|s| Value::String(s.0)),
    };
    value.unwrap_or(Value::Null)
}
