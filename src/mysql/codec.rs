//! Conversions between the crate [`Value`] model and the `mysql_async` wire
//! value enum.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql_async::Value as MyValue;

use crate::value::Value;

pub fn from_mysql(v: MyValue) -> Value {
    match v {
        MyValue::NULL => Value::Null,
        MyValue::Int(i) => Value::I64(i),
        MyValue::UInt(u) => Value::U64(u),
        MyValue::Float(f) => Value::F64(f as f64),
        MyValue::Double(d) => Value::F64(d),
        MyValue::Bytes(b) => Value::Bytes(b),
        MyValue::Date(y, mo, d, h, mi, s, micro) => decode_date(y, mo, d, h, mi, s, micro),
        MyValue::Time(neg, days, h, mi, s, micro) => decode_time(neg, days, h, mi, s, micro),
    }
}

fn decode_date(y: u16, mo: u8, d: u8, h: u8, mi: u8, s: u8, micro: u32) -> Value {
    let Some(date) = NaiveDate::from_ymd_opt(y as i32, mo as u32, d as u32) else {
        // Zero-dates and other values chrono cannot represent.
        return Value::Str(format!("{y:04}-{mo:02}-{d:02}"));
    };
    if h == 0 && mi == 0 && s == 0 && micro == 0 {
        return Value::Date(date);
    }
    match date.and_hms_micro_opt(h as u32, mi as u32, s as u32, micro) {
        Some(dt) => Value::DateTime(dt),
        None => Value::Str(format!("{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}")),
    }
}

fn decode_time(neg: bool, days: u32, h: u8, mi: u8, s: u8, micro: u32) -> Value {
    let hours = days * 24 + h as u32;
    match NaiveTime::from_hms_micro_opt(hours, mi as u32, s as u32, micro) {
        Some(t) if !neg => Value::Time(t),
        // Negative or >24h durations have no NaiveTime form.
        _ => Value::Str(format!(
            "{}{hours:02}:{mi:02}:{s:02}",
            if neg { "-" } else { "" }
        )),
    }
}

pub fn to_mysql(v: &Value) -> MyValue {
    match v {
        Value::Null => MyValue::NULL,
        Value::Bool(b) => MyValue::Int(i64::from(*b)),
        Value::I64(i) => MyValue::Int(*i),
        Value::U64(u) => MyValue::UInt(*u),
        Value::F64(f) => MyValue::Double(*f),
        Value::Str(s) => MyValue::Bytes(s.clone().into_bytes()),
        Value::Bytes(b) => MyValue::Bytes(b.clone()),
        Value::Date(d) => encode_datetime(*d, NaiveTime::MIN, 0),
        Value::Time(t) => MyValue::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
        Value::DateTime(dt) => encode_naive(*dt),
        Value::DateTimeUtc(dt) => encode_naive(dt.naive_utc()),
        Value::Decimal(d) => MyValue::Bytes(d.to_string().into_bytes()),
    }
}

fn encode_naive(dt: NaiveDateTime) -> MyValue {
    encode_datetime(dt.date(), dt.time(), dt.and_utc().timestamp_subsec_micros())
}

fn encode_datetime(d: NaiveDate, t: NaiveTime, micro: u32) -> MyValue {
    MyValue::Date(
        d.year() as u16,
        d.month() as u8,
        d.day() as u8,
        t.hour() as u8,
        t.minute() as u8,
        t.second() as u8,
        micro,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_only_decodes_as_date() {
        let v = from_mysql(MyValue::Date(2024, 3, 9, 0, 0, 0, 0));
        assert_eq!(
            v,
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 9).expect("valid date"))
        );
    }

    #[test]
    fn datetime_round_trips() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 9)
            .expect("valid date")
            .and_hms_micro_opt(12, 30, 45, 250)
            .expect("valid time");
        let encoded = to_mysql(&Value::DateTime(dt));
        assert_eq!(from_mysql(encoded), Value::DateTime(dt));
    }

    #[test]
    fn unsigned_is_preserved() {
        assert_eq!(from_mysql(MyValue::UInt(u64::MAX)), Value::U64(u64::MAX));
    }

    #[test]
    fn zero_date_falls_back_to_text() {
        assert_eq!(
            from_mysql(MyValue::Date(0, 0, 0, 0, 0, 0, 0)),
            Value::Str("0000-00-00".into())
        );
    }
}
