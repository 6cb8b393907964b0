//! Represents strings with embedded variable references, e.g.
//! `cc $in -o $out`, and mechanisms for expanding those into plain strings.

use crate::smallmap::SmallMap;
use std::{borrow::Cow, collections::HashMap};

/// An environment providing a mapping of variable name to variable value.
/// A given EvalString may be expanded with multiple environments as possible
/// context.  Lookup is read-only; a variable not found in any environment
/// expands to the empty string.
pub trait Env {
    fn get_var(&self, var: &str) -> Option<Cow<str>>;
}

/// One token within an EvalString, either literal text or a variable reference.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalPart<T: AsRef<str>> {
    Literal(T),
    VarRef(T),
}

/// A parsed but unexpanded variable-reference string, e.g. "cc $in -o $out".
/// This is generic to support EvalString<&str>, which borrows from parser
/// input for immediately-expanded evals, and EvalString<String>, which is
/// used for delayed evals like rule bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalString<T: AsRef<str>>(Vec<EvalPart<T>>);

impl<T: AsRef<str>> EvalString<T> {
    pub fn new(parts: Vec<EvalPart<T>>) -> Self {
        EvalString(parts)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn evaluate(&self, envs: &[&dyn Env]) -> String {
        let mut val = String::new();
        for part in &self.0 {
            match part {
                EvalPart::Literal(s) => val.push_str(s.as_ref()),
                EvalPart::VarRef(v) => {
                    for env in envs {
                        if let Some(v) = env.get_var(v.as_ref()) {
                            val.push_str(&v);
                            break;
                        }
                    }
                }
            }
        }
        val
    }
}

impl<'text> EvalString<&'text str> {
    /// Parse a template string into its tokens.  A variable reference starts
    /// with '$' and is either "$$" (a literal dollar), "${name}", or "$name"
    /// where the name is the longest run of [A-Za-z0-9_].  The only possible
    /// failure is an unterminated "${".
    pub fn parse(text: &'text str) -> Result<Self, String> {
        let mut parts = Vec::new();
        let mut rest = text;
        while !rest.is_empty() {
            match rest.find('$') {
                None => {
                    parts.push(EvalPart::Literal(rest));
                    break;
                }
                Some(ofs) => {
                    if ofs > 0 {
                        parts.push(EvalPart::Literal(&rest[..ofs]));
                    }
                    rest = &rest[ofs + 1..];
                    match rest.as_bytes().first() {
                        Some(b'$') => {
                            parts.push(EvalPart::Literal(&rest[..1]));
                            rest = &rest[1..];
                        }
                        Some(b'{') => {
                            let close = rest
                                .find('}')
                                .ok_or_else(|| format!("unterminated ${{ in {:?}", text))?;
                            parts.push(EvalPart::VarRef(&rest[1..close]));
                            rest = &rest[close + 1..];
                        }
                        _ => {
                            let len = rest
                                .bytes()
                                .position(|c| !(c.is_ascii_alphanumeric() || c == b'_'))
                                .unwrap_or(rest.len());
                            parts.push(EvalPart::VarRef(&rest[..len]));
                            rest = &rest[len..];
                        }
                    }
                }
            }
        }
        Ok(EvalString(parts))
    }

    pub fn into_owned(self) -> EvalString<String> {
        EvalString(
            self.0
                .into_iter()
                .map(|part| match part {
                    EvalPart::Literal(s) => EvalPart::Literal(s.to_owned()),
                    EvalPart::VarRef(s) => EvalPart::VarRef(s.to_owned()),
                })
                .collect(),
        )
    }
}

/// A single scope's worth of variable definitions.
#[derive(Debug, Default)]
pub struct Vars<'text>(HashMap<&'text str, String>);

impl<'text> Vars<'text> {
    pub fn insert(&mut self, key: &'text str, val: String) {
        self.0.insert(key, val);
    }
    pub fn get(&self, key: &'text str) -> Option<&String> {
        self.0.get(key)
    }
    pub fn iter(&self) -> impl Iterator<Item = (&'text str, &String)> {
        self.0.iter().map(|(&k, v)| (k, v))
    }
}

impl<'text> Env for Vars<'text> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        self.0.get(var).map(|str| Cow::Borrowed(str.as_str()))
    }
}

// Impl for the variables attached to an edge.
impl Env for SmallMap<String, String> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        self.get(var).map(|val| Cow::Borrowed(val.as_str()))
    }
}
