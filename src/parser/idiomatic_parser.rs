//! Idiomatic nom-based parser for the lifecycle DSL
//!
//! Standalone parser functions built from nom combinators over `&str`, with
//! `VerboseError` so failures can be mapped back to a line and column.

use chrono::NaiveDate;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1, take_while_m_n},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, none_of, not_line_ending, satisfy},
    combinator::{cut, map, map_res, not, opt, recognize, value},
    error::{context, VerboseError, VerboseErrorKind},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

use crate::ast::{ArgKey, Argument, Form, Program, Value, VerbCall};

/// Parser error type with context information
pub type NomParseError<'a> = VerboseError<&'a str>;
pub type ParseResult<'a, T> = IResult<&'a str, T, NomParseError<'a>>;

/// Parse program: multiple forms separated by whitespace
pub(crate) fn program_internal(input: &str) -> ParseResult<'_, Program> {
    let (input, _) = multispace0(input)?;
    many0(terminated(parse_form, multispace0))(input)
}

/// Parse a form: (verb :key value ...) or a comment
pub fn parse_form(input: &str) -> ParseResult<'_, Form> {
    alt((
        map(parse_comment, Form::Comment),
        map(parse_verb_call, Form::Call),
    ))(input)
}

/// Parse a comment (;; ...) up to the end of the line
fn parse_comment(input: &str) -> ParseResult<'_, String> {
    let (input, _) = tag(";;")(input)?;
    let (input, text) = not_line_ending(input)?;
    Ok((input, text.to_string()))
}

enum Element {
    Arg(Argument),
    Child(VerbCall),
}

/// Parse a verb call: (verb :key value ... (child ...))
pub fn parse_verb_call(input: &str) -> ParseResult<'_, VerbCall> {
    let (input, _) = char('(')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, verb) = context("verb name", parse_identifier)(input)?;

    let (input, elements) = many0(preceded(
        multispace0,
        alt((
            map(parse_argument, Element::Arg),
            map(parse_verb_call, Element::Child),
        )),
    ))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = context("closing ')'", char(')'))(input)?;

    let mut call = VerbCall::new(verb);
    for element in elements {
        match element {
            Element::Arg(arg) => call.args.push(arg),
            Element::Child(child) => call.children.push(child),
        }
    }
    Ok((input, call))
}

/// Parse `:key value` or `@attr{uuid} = value`
fn parse_argument(input: &str) -> ParseResult<'_, Argument> {
    alt((parse_keyword_argument, parse_attribute_argument))(input)
}

fn parse_keyword_argument(input: &str) -> ParseResult<'_, Argument> {
    let (input, key) = preceded(char(':'), parse_key)(input)?;
    let (input, _) = multispace0(input)?;
    let (input, value) = cut(context("argument value", parse_value))(input)?;
    Ok((
        input,
        Argument {
            key: ArgKey::Keyword(key),
            value,
        },
    ))
}

fn parse_attribute_argument(input: &str) -> ParseResult<'_, Argument> {
    let (input, attribute_id) = parse_attr_ref(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = cut(context("'=' after attribute", char('=')))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, value) = cut(context("attribute value", parse_value))(input)?;
    Ok((
        input,
        Argument {
            key: ArgKey::Attribute(attribute_id),
            value,
        },
    ))
}

/// Parse an attribute reference: @attr{uuid} or @attr{"uuid"}
pub fn parse_attr_ref(input: &str) -> ParseResult<'_, Uuid> {
    let (input, _) = tag("@attr{")(input)?;
    cut(context(
        "attribute uuid",
        terminated(
            map_res(
                delimited(
                    opt(char('"')),
                    take_while1(|c: char| c.is_ascii_hexdigit() || c == '-'),
                    opt(char('"')),
                ),
                Uuid::parse_str,
            ),
            char('}'),
        ),
    ))(input)
}

/// Parse a value: string | date | number | boolean | list | identifier
pub fn parse_value(input: &str) -> ParseResult<'_, Value> {
    alt((
        map(parse_string_literal, Value::String),
        map(parse_date_literal, Value::Date),
        map(parse_number_literal, Value::Number),
        map(parse_boolean_literal, Value::Boolean),
        parse_list_value,
        map(parse_identifier, Value::Identifier),
    ))(input)
}

/// Parse string literals with proper escaping.
pub fn parse_string_literal(input: &str) -> ParseResult<'_, String> {
    delimited(
        char('"'),
        map(
            many0(alt((
                value('\n', tag("\\n")),
                value('\r', tag("\\r")),
                value('\t', tag("\\t")),
                value('\\', tag("\\\\")),
                value('"', tag("\\\"")),
                none_of("\"\\"),
            ))),
            |chars| chars.into_iter().collect(),
        ),
        context("closing '\"'", char('"')),
    )(input)
}

/// Parse bare ISO dates (YYYY-MM-DD); a date-shaped token that is not a
/// calendar date is a hard failure rather than a number.
fn parse_date_literal(input: &str) -> ParseResult<'_, NaiveDate> {
    let (rest, text) = terminated(
        recognize(tuple((
            take_while_m_n(4, 4, |c: char| c.is_ascii_digit()),
            char('-'),
            take_while_m_n(2, 2, |c: char| c.is_ascii_digit()),
            char('-'),
            take_while_m_n(2, 2, |c: char| c.is_ascii_digit()),
        ))),
        not(satisfy(is_identifier_char)),
    )(input)?;

    match NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        Ok(date) => Ok((rest, date)),
        Err(_) => Err(nom::Err::Failure(VerboseError {
            errors: vec![(input, VerboseErrorKind::Context("valid calendar date"))],
        })),
    }
}

/// Parse decimal literals without going through floating point
fn parse_number_literal(input: &str) -> ParseResult<'_, Decimal> {
    map_res(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
        ))),
        Decimal::from_str,
    )(input)
}

/// Parse boolean literal values (but not identifiers that start with them)
fn parse_boolean_literal(input: &str) -> ParseResult<'_, bool> {
    terminated(
        alt((value(true, tag("true")), value(false, tag("false")))),
        not(satisfy(is_identifier_char)),
    )(input)
}

/// Parse list values: [item1 item2] or [item1, item2]
pub fn parse_list_value(input: &str) -> ParseResult<'_, Value> {
    let (input, _) = char('[')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, items) = many0(terminated(
        parse_value,
        tuple((multispace0, opt(char(',')), multispace0)),
    ))(input)?;
    let (input, _) = context("closing ']'", char(']'))(input)?;
    Ok((input, Value::List(items)))
}

/// Parse identifiers: alphanumeric with underscore, dash, dot
pub fn parse_identifier(input: &str) -> ParseResult<'_, String> {
    let (input, id) = recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_"), tag("-"), tag(".")))),
    ))(input)?;
    Ok((input, id.to_string()))
}

/// Parse argument keys: like identifiers but without dots
fn parse_key(input: &str) -> ParseResult<'_, String> {
    let (input, id) = recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_"), tag("-")))),
    ))(input)?;
    Ok((input, id.to_string()))
}

pub(crate) fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}
