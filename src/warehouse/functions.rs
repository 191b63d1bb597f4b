//! Lenient coercion functions registered on every warehouse session.
//!
//! `TRY_TO_DOUBLE` and `TRY_TO_DATE` never fail on bad input: anything that does not parse
//! strictly becomes NULL. Only an invalid *format* argument is an error, because that is a
//! defect in the statement rather than in the data.

use chrono::NaiveDate;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::Connection;

/// Default date format used when `TRY_TO_DATE` is called with one argument.
pub const DEFAULT_DATE_FORMAT: &str = "YYYY-MM-DD";

/// Register `TRY_TO_DOUBLE(x)` and `TRY_TO_DATE(x [, fmt])` on `conn`.
pub fn register(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("TRY_TO_DOUBLE", 1, flags, |ctx| {
        Ok(try_to_double(ctx.get_raw(0)))
    })?;
    conn.create_scalar_function("TRY_TO_DATE", 1, flags, |ctx| {
        try_to_date_sql(ctx, DEFAULT_DATE_FORMAT)
    })?;
    conn.create_scalar_function("TRY_TO_DATE", 2, flags, |ctx| {
        let format = match ctx.get_raw(1) {
            ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
            _ => {
                return Err(rusqlite::Error::UserFunctionError(
                    "TRY_TO_DATE format must be a text literal".into(),
                ));
            }
        };
        try_to_date_sql(ctx, &format)
    })?;
    Ok(())
}

fn try_to_date_sql(ctx: &Context<'_>, format: &str) -> rusqlite::Result<Option<String>> {
    let pattern = chrono_pattern(format)
        .map_err(|message| rusqlite::Error::UserFunctionError(message.into()))?;
    let out = match ctx.get_raw(0) {
        ValueRef::Text(t) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| parse_date_strict(s, &pattern))
            .map(|d| d.format("%Y-%m-%d").to_string()),
        _ => None,
    };
    Ok(out)
}

/// Strict numeric coercion. Surrounding whitespace is ignored; non-finite values are rejected.
pub fn try_to_double(value: ValueRef<'_>) -> Option<f64> {
    match value {
        ValueRef::Integer(n) => Some(n as f64),
        ValueRef::Real(f) if f.is_finite() => Some(f),
        ValueRef::Text(t) => std::str::from_utf8(t).ok().and_then(parse_double_strict),
        _ => None,
    }
}

/// Parse a decimal number, rejecting empty input, `inf`/`NaN` and trailing garbage.
pub fn parse_double_strict(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse `raw` against a chrono pattern; the date must render back to exactly the trimmed
/// input, so `2024-1-5` does not satisfy `YYYY-MM-DD`.
pub fn parse_date_strict(raw: &str, chrono_pattern: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let date = NaiveDate::parse_from_str(trimmed, chrono_pattern).ok()?;
    (date.format(chrono_pattern).to_string() == trimmed).then_some(date)
}

/// Translate a warehouse date format (`YYYY`, `MM`, `DD` plus literal separators) into a
/// chrono pattern.
pub fn chrono_pattern(format: &str) -> Result<String, String> {
    let mut out = String::with_capacity(format.len());
    let mut rest = format;
    while !rest.is_empty() {
        let upper = rest.to_ascii_uppercase();
        if upper.starts_with("YYYY") {
            out.push_str("%Y");
            rest = &rest[4..];
        } else if upper.starts_with("MM") {
            out.push_str("%m");
            rest = &rest[2..];
        } else if upper.starts_with("DD") {
            out.push_str("%d");
            rest = &rest[2..];
        } else {
            let ch = rest.chars().next().unwrap_or_default();
            if ch.is_ascii_alphanumeric() {
                return Err(format!("unsupported date format '{format}'"));
            }
            if ch == '%' {
                out.push_str("%%");
            } else {
                out.push(ch);
            }
            rest = &rest[ch.len_utf8()..];
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_parses_signed_decimals() {
        assert_eq!(parse_double_strict("-5.00"), Some(-5.0));
        assert_eq!(parse_double_strict(" 1250.75 "), Some(1250.75));
        assert_eq!(parse_double_strict("1e3"), Some(1000.0));
    }

    #[test]
    fn double_rejects_garbage() {
        assert_eq!(parse_double_strict("N/A"), None);
        assert_eq!(parse_double_strict(""), None);
        assert_eq!(parse_double_strict("12.5 USD"), None);
        assert_eq!(parse_double_strict("NaN"), None);
        assert_eq!(parse_double_strict("inf"), None);
    }

    #[test]
    fn date_format_translation() {
        assert_eq!(chrono_pattern("YYYY-MM-DD").unwrap(), "%Y-%m-%d");
        assert_eq!(chrono_pattern("DD/MM/YYYY").unwrap(), "%d/%m/%Y");
        assert!(chrono_pattern("YYYY-MON-DD").is_err());
    }

    #[test]
    fn date_parse_is_strict() {
        let p = chrono_pattern(DEFAULT_DATE_FORMAT).unwrap();
        assert_eq!(
            parse_date_strict("2024-03-09", &p),
            NaiveDate::from_ymd_opt(2024, 3, 9)
        );
        assert_eq!(parse_date_strict("2024/13/40", &p), None);
        assert_eq!(parse_date_strict("2024-02-30", &p), None);
        assert_eq!(parse_date_strict("2024-3-9", &p), None);
        assert_eq!(parse_date_strict("yesterday", &p), None);
    }

    #[test]
    fn registered_functions_return_null_on_bad_input() {
        let conn = Connection::open_in_memory().unwrap();
        register(&conn).unwrap();

        let (amount, bad_amount): (Option<f64>, Option<f64>) = conn
            .query_row("SELECT TRY_TO_DOUBLE('-5.00'), TRY_TO_DOUBLE('N/A')", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(amount, Some(-5.0));
        assert_eq!(bad_amount, None);

        let (date, bad_date): (Option<String>, Option<String>) = conn
            .query_row(
                "SELECT TRY_TO_DATE('2024-01-31', 'YYYY-MM-DD'), TRY_TO_DATE('2024/13/40')",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(date.as_deref(), Some("2024-01-31"));
        assert_eq!(bad_date, None);
    }

    #[test]
    fn unsupported_format_fails_the_statement() {
        let conn = Connection::open_in_memory().unwrap();
        register(&conn).unwrap();
        let err = conn
            .query_row("SELECT TRY_TO_DATE('2024-01-31', 'YYYY-MON-DD')", [], |r| {
                r.get::<_, Option<String>>(0)
            })
            .unwrap_err();
        assert!(err.to_string().contains("unsupported date format"));
    }
}
