//! Rule dispatch.
//!
//! Rules are compiled once from the pipeline description. For a module,
//! matching `pre` rules run first, then normal rules in declaration order;
//! a `oneOf` group contributes at most its first matching member.

use super::chain::StepRegistry;
use super::graph::ModuleKind;
use crate::config::{Enforce, RuleConfig, StepSpec};
use crate::error::BuildError;
use regex_lite::Regex;

/// A compiled rule bound to a chain.
#[derive(Debug)]
pub struct Rule {
    /// Position in declaration order, counting group members.
    pub index: usize,
    test: Option<Regex>,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    kind: Option<ModuleKind>,
    pub enforce_pre: bool,
    pub advisory: bool,
    pub chain: Vec<StepSpec>,
}

impl Rule {
    /// Whether this rule applies to the module at root-relative `path`.
    #[must_use]
    pub fn matches(&self, path: &str, kind: ModuleKind) -> bool {
        if self.kind.is_some_and(|k| k != kind) {
            return false;
        }
        if self.test.as_ref().is_some_and(|re| !re.is_match(path)) {
            return false;
        }
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(path)) {
            return false;
        }
        !self.exclude.iter().any(|re| re.is_match(path))
    }

    /// Names of the chain's steps, in execution order.
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.chain.iter().map(|s| s.step.as_str())
    }
}

#[derive(Debug)]
enum Node {
    Single(Rule),
    OneOf(Vec<Rule>),
}

/// Immutable set of compiled rules.
#[derive(Debug, Default)]
pub struct RuleSet {
    nodes: Vec<Node>,
}

impl RuleSet {
    /// Compile rule descriptions, checking every step name against `registry`.
    pub fn compile(rules: &[RuleConfig], registry: &StepRegistry) -> Result<Self, BuildError> {
        let mut next_index = 0usize;
        let mut nodes = Vec::with_capacity(rules.len());

        for (position, config) in rules.iter().enumerate() {
            if config.one_of.is_empty() {
                nodes.push(Node::Single(compile_rule(config, &mut next_index, registry)?));
                continue;
            }
            if !config.steps.is_empty() {
                return Err(BuildError::config(format!(
                    "rule {position} declares both 'use' and 'oneOf'"
                )));
            }
            let mut members = Vec::with_capacity(config.one_of.len());
            for member in &config.one_of {
                if !member.one_of.is_empty() {
                    return Err(BuildError::config(format!(
                        "rule {position}: nested 'oneOf' groups are not supported"
                    )));
                }
                let mut rule = compile_rule(member, &mut next_index, registry)?;
                // Conditions on the group apply to every member.
                rule.include.extend(compile_patterns(&config.include)?);
                rule.exclude.extend(compile_patterns(&config.exclude)?);
                members.push(rule);
            }
            nodes.push(Node::OneOf(members));
        }

        Ok(Self { nodes })
    }

    /// Rules applying to a module, in execution order.
    ///
    /// Fails when only `pre` rules (or none) match.
    pub fn match_module(&self, path: &str, kind: ModuleKind) -> Result<Vec<&Rule>, BuildError> {
        let mut pre = Vec::new();
        let mut normal = Vec::new();

        for node in &self.nodes {
            match node {
                Node::Single(rule) if rule.matches(path, kind) => {
                    if rule.enforce_pre {
                        pre.push(rule);
                    } else {
                        normal.push(rule);
                    }
                }
                Node::Single(_) => {}
                Node::OneOf(members) => {
                    if let Some(rule) = members.iter().find(|r| r.matches(path, kind)) {
                        if rule.enforce_pre {
                            pre.push(rule);
                        } else {
                            normal.push(rule);
                        }
                    }
                }
            }
        }

        if normal.is_empty() {
            return Err(BuildError::UnresolvedModuleType {
                path: path.to_string(),
            });
        }
        pre.extend(normal);
        Ok(pre)
    }
}

fn compile_rule(
    config: &RuleConfig,
    next_index: &mut usize,
    registry: &StepRegistry,
) -> Result<Rule, BuildError> {
    if config.steps.is_empty() {
        return Err(BuildError::config(format!(
            "rule {} has no steps",
            config.test.as_deref().unwrap_or("<any>")
        )));
    }
    for spec in &config.steps {
        if registry.get(&spec.step).is_none() {
            return Err(BuildError::config(format!("unknown step '{}'", spec.step)));
        }
    }
    let index = *next_index;
    *next_index += 1;
    Ok(Rule {
        index,
        test: config.test.as_deref().map(compile_regex).transpose()?,
        include: compile_patterns(&config.include)?,
        exclude: compile_patterns(&config.exclude)?,
        kind: config.kind,
        enforce_pre: config.enforce == Some(Enforce::Pre),
        advisory: config.advisory,
        chain: config.steps.clone(),
    })
}

/// Plain directory names (`src`, `node_modules/pkg`) match as path prefixes;
/// anything else is a regular expression over the root-relative path.
fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, BuildError> {
    patterns
        .iter()
        .map(|p| {
            if is_plain_dir(p) {
                compile_regex(&format!("(^|/){}(/|$)", regex_lite::escape(p.trim_matches('/'))))
            } else {
                compile_regex(p)
            }
        })
        .collect()
}

fn is_plain_dir(pattern: &str) -> bool {
    !pattern.is_empty()
        && pattern
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'/' | b'@'))
}

fn compile_regex(pattern: &str) -> Result<Regex, BuildError> {
    Regex::new(pattern)
        .map_err(|e| BuildError::config(format!("invalid rule pattern '{pattern}': {e}")))
}
