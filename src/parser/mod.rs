//! DSL Parser Module
//!
//! Unified S-expression syntax shared by every domain. The nom parser in
//! [`idiomatic_parser`] is the primary path; [`extract`] finds verb forms
//! embedded in free text and holds the regex recovery path.

pub mod extract;
pub mod idiomatic_parser;

pub use extract::{extract_calls, extract_verbs_fallback};
pub use idiomatic_parser::{parse_form, parse_value, parse_verb_call};

use dsl_types::SourceLocation;
use nom::error::{VerboseError, VerboseErrorKind};
use nom::Finish;

use crate::ast::{Form, Program, VerbCall};
use crate::error::ParseError;

/// Parse a complete DSL document
pub fn parse_program(input: &str) -> Result<Program, ParseError> {
    let (remaining, program) = idiomatic_parser::program_internal(input)
        .finish()
        .map_err(|e| convert_error(input, e))?;

    if !remaining.trim().is_empty() {
        // Re-run the form parser at the stopping point to surface the real cause
        return Err(match parse_form(remaining).finish() {
            Err(e) => convert_error(input, e),
            Ok(_) => ParseError::TrailingInput {
                location: location_of(input, remaining),
            },
        });
    }

    Ok(program)
}

/// Parse exactly one verb form (comments allowed around it)
pub fn parse_single_call(input: &str) -> Result<VerbCall, ParseError> {
    let mut calls: Vec<VerbCall> = parse_program(input)?
        .into_iter()
        .filter_map(|form| match form {
            Form::Call(call) => Some(call),
            Form::Comment(_) => None,
        })
        .collect();

    match calls.len() {
        0 => Err(ParseError::Empty),
        1 => Ok(calls.remove(0)),
        count => Err(ParseError::MultipleForms { count }),
    }
}

fn location_of(source: &str, remaining: &str) -> SourceLocation {
    SourceLocation::from_offset(source, source.len().saturating_sub(remaining.len()))
}

/// Map nom's `VerboseError` to a located `ParseError`
fn convert_error(source: &str, error: VerboseError<&str>) -> ParseError {
    let Some((remaining, _)) = error.errors.first() else {
        return ParseError::Syntax {
            location: SourceLocation::from_offset(source, 0),
            message: "unknown parsing error".to_string(),
        };
    };

    let expected = error
        .errors
        .iter()
        .find_map(|(_, kind)| match kind {
            VerboseErrorKind::Context(label) => Some(format!("expected {}", label)),
            _ => None,
        })
        .unwrap_or_else(|| match &error.errors[0].1 {
            VerboseErrorKind::Char(c) => format!("expected '{}'", c),
            VerboseErrorKind::Nom(kind) => format!("unexpected input ({:?})", kind),
            VerboseErrorKind::Context(label) => format!("expected {}", label),
        });

    let found: String = remaining.chars().take(12).collect();
    let message = if found.is_empty() {
        format!("{} at end of input", expected)
    } else {
        format!("{} near '{}'", expected, found)
    };

    ParseError::Syntax {
        location: location_of(source, remaining),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_program_multiple_forms() {
        let program = parse_program("(kyc.begin)\n(kyc.screen :provider \"acme\")").unwrap();
        assert_eq!(program.len(), 2);
    }

    #[test]
    fn test_empty_program() {
        assert!(parse_program("  \n ").unwrap().is_empty());
        assert_eq!(parse_single_call(";; nothing here"), Err(ParseError::Empty));
    }

    #[test]
    fn test_single_call_rejects_many() {
        let err = parse_single_call("(kyc.begin) (kyc.screen)").unwrap_err();
        assert_eq!(err, ParseError::MultipleForms { count: 2 });
    }

    #[test]
    fn test_error_has_line_and_column() {
        let err = parse_program("(kyc.begin)\n(kyc.screen :provider )").unwrap_err();
        match err {
            ParseError::Syntax { location, message } => {
                assert_eq!(location.line, 2);
                assert!(message.contains("argument value"), "{}", message);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_unclosed_form() {
        let err = parse_program("(kyc.begin :level ENHANCED").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn test_render_then_parse_is_stable() {
        let text = r#"(subscribe.request :investor "u1" :amount 100.50 :currency "USD")"#;
        let call = parse_single_call(text).unwrap();
        assert_eq!(call.to_string(), text);
    }
}
