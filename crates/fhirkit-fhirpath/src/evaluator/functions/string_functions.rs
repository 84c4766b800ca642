//! String functions.
//!
//! Inputs that are not a singleton string resolve to empty, matching the
//! tolerant runtime typing of the language.

use super::{arg_value, singleton, FunctionRegistry};
use crate::model::{Collection, FhirPathValue};
use regex::Regex;

pub fn register(registry: &mut FunctionRegistry) {
    registry.register("length", |_, input, _| {
        Ok(with_string(input, |s| {
            vec![FhirPathValue::Integer(s.chars().count() as i64)]
        }))
    });

    registry.register("upper", |_, input, _| {
        Ok(with_string(input, |s| {
            vec![FhirPathValue::String(s.to_uppercase())]
        }))
    });
    registry.register("lower", |_, input, _| {
        Ok(with_string(input, |s| {
            vec![FhirPathValue::String(s.to_lowercase())]
        }))
    });
    registry.register("trim", |_, input, _| {
        Ok(with_string(input, |s| {
            vec![FhirPathValue::String(s.trim().to_string())]
        }))
    });

    registry.register("substring", |_, input, args| {
        let Some(s) = input_string(input) else {
            return Ok(Vec::new());
        };
        let Some(start) = arg_value(args, 0).and_then(|v| v.as_integer()) else {
            return Ok(Vec::new());
        };
        let chars: Vec<char> = s.chars().collect();
        if start < 0 || start as usize >= chars.len() {
            return Ok(Vec::new());
        }
        let start = start as usize;
        let end = match arg_value(args, 1).and_then(|v| v.as_integer()) {
            Some(len) if len >= 0 => (start + len as usize).min(chars.len()),
            Some(_) => return Ok(Vec::new()),
            None => chars.len(),
        };
        Ok(vec![FhirPathValue::String(chars[start..end].iter().collect())])
    });

    registry.register("indexOf", |_, input, args| {
        Ok(string_and_arg(input, args, |s, sub| {
            let index = s
                .find(sub)
                .map(|byte| s[..byte].chars().count() as i64)
                .unwrap_or(-1);
            vec![FhirPathValue::Integer(index)]
        }))
    });

    registry.register("contains", |_, input, args| {
        Ok(string_and_arg(input, args, |s, sub| {
            vec![FhirPathValue::Boolean(s.contains(sub))]
        }))
    });
    registry.register("startsWith", |_, input, args| {
        Ok(string_and_arg(input, args, |s, prefix| {
            vec![FhirPathValue::Boolean(s.starts_with(prefix))]
        }))
    });
    registry.register("endsWith", |_, input, args| {
        Ok(string_and_arg(input, args, |s, suffix| {
            vec![FhirPathValue::Boolean(s.ends_with(suffix))]
        }))
    });

    registry.register("replace", |_, input, args| {
        let Some(s) = input_string(input) else {
            return Ok(Vec::new());
        };
        let (Some(pattern), Some(substitution)) = (string_arg(args, 0), string_arg(args, 1))
        else {
            return Ok(Vec::new());
        };
        Ok(vec![FhirPathValue::String(s.replace(&pattern, &substitution))])
    });

    registry.register("matches", |_, input, args| {
        Ok(string_and_arg(input, args, |s, pattern| {
            match Regex::new(pattern) {
                Ok(re) => vec![FhirPathValue::Boolean(re.is_match(s))],
                Err(_) => Vec::new(),
            }
        }))
    });

    registry.register("replaceMatches", |_, input, args| {
        let Some(s) = input_string(input) else {
            return Ok(Vec::new());
        };
        let (Some(pattern), Some(substitution)) = (string_arg(args, 0), string_arg(args, 1))
        else {
            return Ok(Vec::new());
        };
        match Regex::new(&pattern) {
            Ok(re) => Ok(vec![FhirPathValue::String(
                re.replace_all(&s, substitution.as_str()).into_owned(),
            )]),
            Err(_) => Ok(Vec::new()),
        }
    });

    registry.register("toChars", |_, input, _| {
        Ok(with_string(input, |s| {
            s.chars()
                .map(|c| FhirPathValue::String(c.to_string()))
                .collect()
        }))
    });

    registry.register("split", |_, input, args| {
        let Some(s) = input_string(input) else {
            return Ok(Vec::new());
        };
        let Some(separator) = string_arg(args, 0) else {
            return Ok(Vec::new());
        };
        Ok(s.split(separator.as_str())
            .map(|part| FhirPathValue::String(part.to_string()))
            .collect())
    });

    registry.register("join", |_, input, args| {
        let separator = string_arg(args, 0).unwrap_or_default();
        let joined = input
            .iter()
            .map(|v| v.display_value())
            .collect::<Vec<_>>()
            .join(&separator);
        Ok(vec![FhirPathValue::String(joined)])
    });
}

fn input_string(input: &Collection) -> Option<String> {
    singleton(input).and_then(|v| v.as_str()).map(str::to_string)
}

fn string_arg(arguments: &[Collection], index: usize) -> Option<String> {
    arg_value(arguments, index)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn with_string(input: &Collection, f: impl FnOnce(&str) -> Collection) -> Collection {
    match input_string(input) {
        Some(s) => f(&s),
        None => Vec::new(),
    }
}

fn string_and_arg(
    input: &Collection,
    arguments: &[Collection],
    f: impl FnOnce(&str, &str) -> Collection,
) -> Collection {
    match (input_string(input), string_arg(arguments, 0)) {
        (Some(s), Some(arg)) => f(&s, &arg),
        _ => Vec::new(),
    }
}
