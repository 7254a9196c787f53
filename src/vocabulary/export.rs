//! Vocabulary export for generator prompts.
//!
//! Produces a serializable description of every verb, and a markdown
//! rendering suitable for LLM context.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{DefaultValue, StateTransition, Vocabulary};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentExport {
    pub name: String,
    #[serde(rename = "type")]
    pub arg_type: String,
    pub required: bool,
    pub constraints: Vec<String>,
    pub default: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerbExport {
    pub name: String,
    pub category: String,
    pub description: String,
    pub args: Vec<ArgumentExport>,
    pub transition: Option<StateTransition>,
    pub guards: Vec<String>,
    pub constraints: Vec<String>,
    pub produces: Option<String>,
    pub sets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyExport {
    pub domain: String,
    pub version: String,
    pub states: Vec<String>,
    pub categories: BTreeMap<String, Vec<String>>,
    pub verbs: Vec<VerbExport>,
}

impl Vocabulary {
    /// Export verb definitions for generator context.
    pub fn export(&self) -> VocabularyExport {
        VocabularyExport {
            domain: self.domain().to_string(),
            version: self.version().to_string(),
            states: self.states().to_vec(),
            categories: self.categories().clone(),
            verbs: self
                .verbs()
                .iter()
                .map(|verb| VerbExport {
                    name: verb.name.clone(),
                    category: verb.category.clone(),
                    description: verb.description.clone(),
                    args: verb
                        .args
                        .iter()
                        .map(|arg| ArgumentExport {
                            name: arg.name.clone(),
                            arg_type: arg.arg_type.to_string(),
                            required: arg.required,
                            constraints: arg.constraints.iter().map(|c| c.rule()).collect(),
                            default: arg.default.as_ref().map(|d| match d {
                                DefaultValue::Literal(value) => value.to_string(),
                                DefaultValue::FromContext(key) => format!("from context: {}", key),
                            }),
                            description: arg.description.clone(),
                        })
                        .collect(),
                    transition: verb.transition.clone(),
                    guards: verb.guards.clone(),
                    constraints: verb.constraints.iter().map(|c| c.rule()).collect(),
                    produces: verb.produces.clone(),
                    sets: verb
                        .sets
                        .iter()
                        .map(|(key, value)| format!("{} = {}", key, value))
                        .collect(),
                })
                .collect(),
        }
    }
}

impl VocabularyExport {
    /// Markdown verb reference for LLM prompts
    pub fn to_prompt_context(&self) -> String {
        let mut out = format!("# {} Domain (v{})\n\n", self.domain.to_uppercase(), self.version);

        for verb in &self.verbs {
            out += &format!("## {}\n\n", verb.name);
            if !verb.description.is_empty() {
                out += &format!("{}\n\n", verb.description);
            }

            if !verb.args.is_empty() {
                out += "### Arguments\n\n";
                for arg in &verb.args {
                    let req = if arg.required { "**required**" } else { "optional" };
                    out += &format!("- `:{}` ({}) [{}]\n", arg.name, arg.arg_type, req);
                    for rule in &arg.constraints {
                        out += &format!("  - {}\n", rule);
                    }
                    if let Some(default) = &arg.default {
                        out += &format!("  - Default: {}\n", default);
                    }
                }
            }

            if !verb.constraints.is_empty() {
                out += "\n### Constraints\n\n";
                for rule in &verb.constraints {
                    out += &format!("- {}\n", rule);
                }
            }

            if let Some(transition) = &verb.transition {
                let from: Vec<&str> = transition.from_states.iter().map(String::as_str).collect();
                out += &format!(
                    "\n### Transition\n\n- {} -> {}\n",
                    from.join(" | "),
                    transition.to_state
                );
            }

            out += "\n---\n\n";
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocabulary::{ArgType, ArgumentSpec, VerbDefinition};
    use rust_decimal::Decimal;

    #[test]
    fn test_export_describes_constraints_and_transitions() {
        let vocab = Vocabulary::builder("investor", "1.0.0")
            .states(&["PROSPECT", "SUBSCRIPTION_PENDING"])
            .verb(
                VerbDefinition::new("subscribe.request", "subscription")
                    .transition(&["PROSPECT"], "SUBSCRIPTION_PENDING")
                    .arg(ArgumentSpec::required("amount", ArgType::Decimal).greater_than(Decimal::ZERO)),
            )
            .build()
            .unwrap();

        let export = vocab.export();
        assert_eq!(export.verbs.len(), 1);
        assert_eq!(export.verbs[0].args[0].constraints, vec!["must be > 0"]);

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["verbs"][0]["args"][0]["type"], "decimal");

        let prompt = export.to_prompt_context();
        assert!(prompt.contains("## subscribe.request"));
        assert!(prompt.contains("PROSPECT -> SUBSCRIPTION_PENDING"));
    }
}
