//! Verb extraction from free text
//!
//! Instructions often embed a DSL form inside prose ("please run (kyc.begin)
//! for this client"). [`extract_calls`] finds every well-formed form with the
//! nom parser; [`extract_verbs_fallback`] recovers verb names with a regex when
//! the embedded form does not parse.

use regex::Regex;
use std::sync::OnceLock;

use super::idiomatic_parser::parse_verb_call;
use crate::ast::VerbCall;

fn verb_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\(\s*([A-Za-z_][A-Za-z0-9_-]*\.[A-Za-z0-9_.-]*[A-Za-z0-9_-])")
            .expect("verb extraction pattern is valid")
    })
}

/// Every top-level verb form that parses cleanly, in order of appearance
pub fn extract_calls(text: &str) -> Vec<VerbCall> {
    let mut calls = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find('(') {
        let start = cursor + offset;
        match parse_verb_call(&text[start..]) {
            Ok((rest, call)) => {
                calls.push(call);
                cursor = text.len() - rest.len();
            }
            Err(_) => cursor = start + 1,
        }
    }

    calls
}

/// Namespaced verb names following an opening parenthesis, deduplicated
pub fn extract_verbs_fallback(text: &str) -> Vec<String> {
    let mut verbs: Vec<String> = Vec::new();
    for capture in verb_pattern().captures_iter(text) {
        let verb = capture[1].to_string();
        if !verbs.contains(&verb) {
            verbs.push(verb);
        }
    }
    verbs
}
