//! Shape checks applied while parsing operators, stages and accumulators.
//!
//! `path` arguments are relative to the frame being parsed; an empty path points at the frame
//! itself.

use super::expression::{ExpressionRef, ParseFrame};
use super::factory::guess;
use super::variables::SystemVariable;
use crate::errors::Result;
use bson::{Bson, Document};
use regex::{Regex, RegexBuilder};
use std::fmt;

/// What is being parsed, as it appears in error reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Noun {
    Operator,
    Stage,
    Accumulator,
}

impl fmt::Display for Noun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Noun::Operator => "Operator",
            Noun::Stage => "Stage",
            Noun::Accumulator => "Accumulator",
        })
    }
}

pub fn value_must_be_object<'v>(
    frame: &ParseFrame<'_>,
    noun: Noun,
    name: &str,
    value: &'v Bson,
    path: &str,
) -> Result<&'v Document> {
    match value {
        Bson::Document(doc) => Ok(doc),
        _ => Err(frame.error_at(path, format!("{noun} {name} expects an object."))),
    }
}

pub fn value_must_be_object_with_substance<'v>(
    frame: &ParseFrame<'_>,
    noun: Noun,
    name: &str,
    value: &'v Bson,
    path: &str,
) -> Result<&'v Document> {
    match value {
        Bson::Document(doc) if !doc.is_empty() => Ok(doc),
        _ => Err(frame.error_at(path, format!("{noun} {name} expects an object with properties."))),
    }
}

/// User variables are plain names: no `$`, no dots and not a system variable.
pub fn must_be_user_variable_format(
    frame: &ParseFrame<'_>,
    noun: Noun,
    name: &str,
    value: &str,
    path: &str,
) -> Result<()> {
    let head = value.split('.').next().unwrap_or_default();
    if SystemVariable::from_key(head).is_some() || SystemVariable::from_key(&format!("$${head}")).is_some() {
        return Err(frame.error_at(
            path,
            format!("{noun} {name} user variable cannot be a system variable ({head})."),
        ));
    }
    if head != value || value.is_empty() || value.contains('$') {
        return Err(frame.error_at(path, format!("{noun} {name} user variable cannot contain $ and must have length.")));
    }
    Ok(())
}

pub fn must_be_array<'v>(frame: &ParseFrame<'_>, name: &str, value: &'v Bson, path: &str) -> Result<&'v [Bson]> {
    match value {
        Bson::Array(items) => Ok(items),
        _ => Err(frame.error_at(path, format!("{name} requires an array."))),
    }
}

pub fn array_of_size<'v>(frame: &ParseFrame<'_>, name: &str, value: &'v Bson, size: usize) -> Result<&'v [Bson]> {
    match value {
        Bson::Array(items) if items.len() == size => Ok(items),
        _ => Err(frame.error(format!("{name} requires an array with exactly {size} elements."))),
    }
}

pub fn array_of_at_least<'v>(frame: &ParseFrame<'_>, name: &str, value: &'v Bson, size: usize) -> Result<&'v [Bson]> {
    match value {
        Bson::Array(items) if items.len() >= size => Ok(items),
        _ => Err(frame.error(format!("{name} requires an array with at least {size} elements."))),
    }
}

pub fn array_of_length_between<'v>(
    frame: &ParseFrame<'_>,
    name: &str,
    value: &'v Bson,
    min: usize,
    max: usize,
) -> Result<&'v [Bson]> {
    match value {
        Bson::Array(items) if (min..=max).contains(&items.len()) => Ok(items),
        _ => Err(frame.error(format!("{name} requires an array with {min} to {max} elements."))),
    }
}

/// Parses `{ name: expr, ... }` found at `path`, optionally registering every name on `frame`
/// before the expressions are parsed so they can refer to each other.
pub fn parse_user_variables(
    frame: &ParseFrame<'_>,
    name: &str,
    value: &Bson,
    path: &str,
    register: bool,
) -> Result<Vec<(String, ExpressionRef)>> {
    let doc = value_must_be_object(frame, Noun::Operator, name, value, path)?;
    for key in doc.keys() {
        must_be_user_variable_format(frame, Noun::Operator, name, key, path)?;
        if register {
            frame.register(key.as_str());
        }
    }
    doc.iter()
        .map(|(key, raw)| Ok((key.clone(), guess(raw, frame, &format!("{path}.{key}"))?)))
        .collect()
}

/// Compiles a `/pattern/flags` string or a bare pattern.
pub fn validate_regexp(frame: &ParseFrame<'_>, pattern: &str, path: &str) -> Result<Regex> {
    let max = frame.options().max_regexp_length;
    let length = pattern.chars().count();
    if length == 0 || length > max {
        return Err(frame.error_at(
            path,
            format!("Pattern ({pattern}) for $regex must be a string between 1 and {max} characters."),
        ));
    }
    let invalid = || frame.error_at(path, format!("Invalid operator $regex pattern: {pattern}"));
    let (source, flags) = match pattern.strip_prefix('/') {
        Some(body) => body.rsplit_once('/').ok_or_else(invalid)?,
        None => (pattern, ""),
    };
    let mut builder = RegexBuilder::new(source);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            'g' | 'u' | 'y' => &mut builder,
            _ => return Err(invalid()),
        };
    }
    builder.build().map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::expression::ParseOptions;
    use bson::bson;

    #[test]
    fn object_rules() {
        let frame = ParseFrame::root(ParseOptions::default());
        let err = value_must_be_object(&frame, Noun::Operator, "$let", &bson!(1), "vars").unwrap_err();
        assert_eq!(err.reason(), "Operator $let expects an object.");
        assert_eq!(err.path(), Some("vars"));
        assert!(value_must_be_object_with_substance(&frame, Noun::Stage, "$group", &bson!({}), "").is_err());
    }

    #[test]
    fn user_variable_names() {
        let frame = ParseFrame::root(ParseOptions::default());
        assert!(must_be_user_variable_format(&frame, Noun::Stage, "$group", "total", "").is_ok());
        assert!(must_be_user_variable_format(&frame, Noun::Stage, "$group", "a.b", "").is_err());
        assert!(must_be_user_variable_format(&frame, Noun::Stage, "$group", "$x", "").is_err());
        assert!(must_be_user_variable_format(&frame, Noun::Stage, "$group", "", "").is_err());
        let err = must_be_user_variable_format(&frame, Noun::Stage, "$group", "ROOT", "").unwrap_err();
        assert!(err.reason().contains("system variable"));
    }

    #[test]
    fn array_rules() {
        let frame = ParseFrame::root(ParseOptions::default());
        let err = array_of_size(&frame, "$join", &bson!([1]), 2).unwrap_err();
        assert_eq!(err.reason(), "$join requires an array with exactly 2 elements.");
        assert!(array_of_at_least(&frame, "$concat", &bson!([]), 1).is_err());
        assert_eq!(array_of_length_between(&frame, "$x", &bson!([1, 2]), 1, 3).unwrap().len(), 2);
        assert!(must_be_array(&frame, "$x", &bson!("a"), "").is_err());
    }

    #[test]
    fn regexps() {
        let frame = ParseFrame::root(ParseOptions::default());
        let re = validate_regexp(&frame, "/^ab/i", "regex").unwrap();
        assert!(re.is_match("ABc"));
        assert!(validate_regexp(&frame, "^ja", "regex").unwrap().is_match("james"));
        assert!(validate_regexp(&frame, "/ab", "regex").is_err());
        assert!(validate_regexp(&frame, "/(/", "regex").is_err());
        assert!(validate_regexp(&frame, "/a/q", "regex").is_err());
        let long = format!("/{}/", "a".repeat(60));
        assert!(validate_regexp(&frame, &long, "regex").unwrap_err().reason().contains("between 1 and 40"));
    }
}
