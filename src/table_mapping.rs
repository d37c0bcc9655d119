use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Table mapping needs at least one selection rule")]
    Empty,

    #[error("Rule {0} has an empty schema or table pattern")]
    EmptyPattern(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Include,
    Exclude,
}

/// Name pattern where `%` (or `*`) matches any run of characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pattern(String);

impl Pattern {
    pub fn new(raw: &str) -> Self {
        return Self(raw.replace('*', "%"));
    }

    pub fn as_str(&self) -> &str {
        return &self.0;
    }

    pub fn matches(&self, name: &str) -> bool {
        let pattern: Vec<char> = self.0.chars().collect();
        let name: Vec<char> = name.chars().collect();
        let (mut p, mut n) = (0, 0);
        let mut backtrack: Option<(usize, usize)> = None;

        while n < name.len() {
            if p < pattern.len() && pattern[p] == '%' {
                backtrack = Some((p, n));
                p += 1;
            } else if p < pattern.len() && pattern[p] == name[n] {
                p += 1;
                n += 1;
            } else if let Some((star, matched)) = backtrack {
                p = star + 1;
                n = matched + 1;
                backtrack = Some((star, matched + 1));
            } else {
                return false;
            }
        }

        return pattern[p..].iter().all(|c| *c == '%');
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ObjectLocator {
    pub schema_name: Pattern,
    pub table_name: Pattern,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SelectionRule {
    pub rule_type: &'static str,
    pub rule_id: String,
    pub rule_name: String,
    pub object_locator: ObjectLocator,
    pub rule_action: RuleAction,
    pub filters: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub schema: String,
    pub table: String,
    pub action: RuleAction,
}

impl RuleConfig {
    /// Every table of every schema.
    pub fn catch_all() -> Self {
        return Self {
            schema: String::from("%"),
            table: String::from("%"),
            action: RuleAction::Include,
        };
    }
}

fn selection_rule(id: usize, rule: &RuleConfig) -> SelectionRule {
    return SelectionRule {
        rule_type: "selection",
        rule_id: id.to_string(),
        rule_name: id.to_string(),
        object_locator: ObjectLocator {
            schema_name: Pattern::new(&rule.schema),
            table_name: Pattern::new(&rule.table),
        },
        rule_action: rule.action,
        filters: Vec::new(),
    };
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableMappings {
    pub rules: Vec<SelectionRule>,
}

impl TableMappings {
    pub fn catch_all() -> Self {
        return Self {
            rules: vec![selection_rule(1, &RuleConfig::catch_all())],
        };
    }

    pub fn from_rules(rules: &[RuleConfig]) -> Result<Self, Error> {
        if rules.is_empty() {
            return Err(Error::Empty);
        }

        let mut selection = Vec::with_capacity(rules.len());
        for (index, rule) in rules.iter().enumerate() {
            if rule.schema.is_empty() || rule.table.is_empty() {
                return Err(Error::EmptyPattern(index + 1));
            }
            selection.push(selection_rule(index + 1, rule));
        }

        return Ok(Self { rules: selection });
    }

    /// Action applied to `schema.table`; exclusions win over inclusions and a
    /// table no rule matches is not replicated.
    pub fn select(&self, schema: &str, table: &str) -> Option<RuleAction> {
        let mut selected = None;
        for rule in &self.rules {
            let locator = &rule.object_locator;
            if !locator.schema_name.matches(schema) || !locator.table_name.matches(table) {
                continue;
            }
            match rule.rule_action {
                RuleAction::Exclude => return Some(RuleAction::Exclude),
                RuleAction::Include => selected = Some(RuleAction::Include),
            }
        }

        return selected;
    }

    pub fn to_document(&self) -> Result<String, serde_json::Error> {
        return serde_json::to_string(self);
    }
}
