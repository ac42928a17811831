//! Runtime parameter binding.

use chrono::{DateTime, NaiveDate};
use serde_json::{Number, Value};

use crate::domain::{ParameterDecl, ParameterType, Parameters};
use crate::error::{CoreResult, ReportError};

/// Bind supplied values against the declarations.
///
/// Defaults fill missing values, required parameters without a value are
/// rejected and declared values are coerced to their type. Undeclared values
/// pass through untouched.
pub fn bind_parameters(declarations: &[ParameterDecl], supplied: &Parameters) -> CoreResult<Parameters> {
    let mut bound = supplied.clone();

    for decl in declarations {
        let value = supplied
            .get(&decl.name)
            .filter(|v| !v.is_null())
            .or(decl.default.as_ref())
            .cloned();

        match value {
            Some(value) => {
                let coerced = coerce(decl, value)?;
                bound.insert(decl.name.clone(), coerced);
            }
            None if decl.required => {
                return Err(ReportError::validation(format!(
                    "parameter '{}' is required",
                    decl.name
                )));
            }
            None => {}
        }
    }

    Ok(bound)
}

fn mismatch(decl: &ParameterDecl, value: &Value) -> ReportError {
    ReportError::validation(format!(
        "parameter '{}' expects {:?}, got {value}",
        decl.name, decl.kind
    ))
}

fn coerce(decl: &ParameterDecl, value: Value) -> CoreResult<Value> {
    match (decl.kind, value) {
        (ParameterType::String, Value::String(s)) => Ok(Value::String(s)),
        (ParameterType::String, v @ (Value::Number(_) | Value::Bool(_))) => {
            Ok(Value::String(v.to_string()))
        }

        (ParameterType::Number, v @ Value::Number(_)) => Ok(v),
        (ParameterType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| mismatch(decl, &Value::String(s))),

        (ParameterType::Integer, Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                return Ok(Value::from(i));
            }
            match n.as_f64() {
                #[allow(clippy::cast_possible_truncation, reason = "fract() == 0 checked")]
                Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Ok(Value::from(f as i64)),
                _ => Err(mismatch(decl, &Value::Number(n))),
            }
        }
        (ParameterType::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_e| mismatch(decl, &Value::String(s.clone()))),

        (ParameterType::Boolean, v @ Value::Bool(_)) => Ok(v),
        (ParameterType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "no" => Ok(Value::Bool(false)),
            _ => Err(mismatch(decl, &Value::String(s))),
        },

        (ParameterType::Date, Value::String(s)) => {
            let trimmed = s.trim();
            let valid = DateTime::parse_from_rfc3339(trimmed).is_ok()
                || NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").is_ok();
            if valid {
                Ok(Value::String(trimmed.to_string()))
            } else {
                Err(mismatch(decl, &Value::String(s)))
            }
        }

        (ParameterType::List, v @ Value::Array(_)) => Ok(v),
        (ParameterType::List, Value::String(s)) => Ok(Value::Array(
            s.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_string()))
                .collect(),
        )),
        (ParameterType::List, v @ (Value::Number(_) | Value::Bool(_))) => Ok(Value::Array(vec![v])),

        (_, other) => Err(mismatch(decl, &other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Parameters {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_defaults_and_required() {
        let decls = vec![
            ParameterDecl::new("region", ParameterType::String).with_default(json!("North")),
            ParameterDecl::new("year", ParameterType::Integer).required(),
        ];

        let err = bind_parameters(&decls, &Parameters::new()).unwrap_err();
        assert!(err.to_string().contains("year"));

        let bound = bind_parameters(&decls, &params(json!({"year": "2024"}))).unwrap();
        assert_eq!(bound["region"], json!("North"));
        assert_eq!(bound["year"], json!(2024));
    }

    #[test]
    fn test_coercions() {
        let decls = vec![
            ParameterDecl::new("ratio", ParameterType::Number),
            ParameterDecl::new("active", ParameterType::Boolean),
            ParameterDecl::new("regions", ParameterType::List),
            ParameterDecl::new("from", ParameterType::Date),
            ParameterDecl::new("code", ParameterType::String),
        ];
        let bound = bind_parameters(
            &decls,
            &params(json!({
                "ratio": "0.5",
                "active": "yes",
                "regions": "North, South",
                "from": "2024-01-01",
                "code": 42,
                "extra": {"kept": true}
            })),
        )
        .unwrap();

        assert_eq!(bound["ratio"], json!(0.5));
        assert_eq!(bound["active"], json!(true));
        assert_eq!(bound["regions"], json!(["North", "South"]));
        assert_eq!(bound["from"], json!("2024-01-01"));
        assert_eq!(bound["code"], json!("42"));
        assert_eq!(bound["extra"], json!({"kept": true}));
    }

    #[test]
    fn test_type_mismatch_is_validation_error() {
        let decls = vec![ParameterDecl::new("year", ParameterType::Integer)];
        let err = bind_parameters(&decls, &params(json!({"year": 2024.5}))).unwrap_err();
        assert!(err.is_validation());

        let decls = vec![ParameterDecl::new("from", ParameterType::Date)];
        assert!(bind_parameters(&decls, &params(json!({"from": "yesterday"}))).is_err());
    }
}
