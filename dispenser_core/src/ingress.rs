//! Inbound command parsing.
//!
//! Two payload shapes are accepted:
//!
//! - a JSON object `{"ml": <volume>, "direction": <sign>}` where both values
//!   may be numbers or strings holding numbers, and `direction` defaults to 1;
//! - a bare decimal volume (`7.5`, optionally JSON-quoted), always a push.
use serde_json::Value;
use tracing::debug;

use crate::error::ParseError;
use crate::types::{DispenseRequest, Direction};

#[derive(Debug, Clone, Default)]
pub struct CommandIngress {
    max_ml: Option<f64>,
}

impl CommandIngress {
    pub fn new(max_ml: Option<f64>) -> Self {
        Self { max_ml }
    }

    pub fn parse(&self, raw: &[u8]) -> Result<DispenseRequest, ParseError> {
        let text = std::str::from_utf8(raw).map_err(|_| ParseError::Encoding)?;
        let trimmed = text.trim();
        let (ml, direction) = match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => {
                let ml = match map.get("ml") {
                    None | Some(Value::Null) => 0.0,
                    Some(v) => coerce_volume(v)?,
                };
                let direction = match map.get("direction") {
                    None | Some(Value::Null) => Direction::Push,
                    Some(v) => coerce_direction(v)?,
                };
                (ml, direction)
            }
            Ok(Value::Number(n)) => (number(&n)?, Direction::Push),
            Ok(Value::String(s)) => (parse_decimal(&s)?, Direction::Push),
            Ok(other) => return Err(ParseError::Malformed(summarize(&other.to_string()))),
            Err(_) => (parse_decimal(trimmed)?, Direction::Push),
        };
        self.validate(ml, direction)
    }

    fn validate(&self, ml: f64, direction: Direction) -> Result<DispenseRequest, ParseError> {
        if let Some(max) = self.max_ml
            && ml > max
        {
            return Err(ParseError::TooLarge { ml, max });
        }
        let req =
            DispenseRequest::new(ml, direction).map_err(|_| ParseError::InvalidVolume(ml))?;
        debug!(ml, direction = direction.as_str(), "command parsed");
        Ok(req)
    }
}

fn number(n: &serde_json::Number) -> Result<f64, ParseError> {
    n.as_f64()
        .ok_or_else(|| ParseError::Malformed(summarize(&n.to_string())))
}

fn parse_decimal(s: &str) -> Result<f64, ParseError> {
    s.trim()
        .parse::<f64>()
        .map_err(|_| ParseError::Malformed(summarize(s)))
}

fn coerce_volume(v: &Value) -> Result<f64, ParseError> {
    match v {
        Value::Number(n) => number(n),
        Value::String(s) => parse_decimal(s),
        other => Err(ParseError::Malformed(format!(
            "ml: {}",
            summarize(&other.to_string())
        ))),
    }
}

fn coerce_direction(v: &Value) -> Result<Direction, ParseError> {
    let sign = match v {
        Value::Number(n) => number(n)?.trunc(),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| ParseError::Malformed(format!("direction: {}", summarize(s))))?
            as f64,
        other => {
            return Err(ParseError::Malformed(format!(
                "direction: {}",
                summarize(&other.to_string())
            )));
        }
    };
    Ok(if sign < 0.0 {
        Direction::Pull
    } else {
        Direction::Push
    })
}

/// First 64 characters, for log-friendly error messages.
fn summarize(s: &str) -> String {
    const MAX: usize = 64;
    match s.char_indices().nth(MAX) {
        Some((i, _)) => format!("{}…", &s[..i]),
        None => s.to_string(),
    }
}
