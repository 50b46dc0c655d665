use serde::{Deserialize, Serialize};

use super::OpSys;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Disallow,
}

/// Outcome of one rule for one OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleResult {
    Allow,
    Disallow,
    /// The rule does not speak about this OS.
    Defer,
}

impl From<RuleAction> for RuleResult {
    fn from(action: RuleAction) -> Self {
        match action {
            RuleAction::Allow => RuleResult::Allow,
            RuleAction::Disallow => RuleResult::Disallow,
        }
    }
}

/// OS constraint of a rule. Only the name is evaluated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<OsRule>,
}

impl Rule {
    pub fn allow() -> Self {
        Self {
            action: RuleAction::Allow,
            os: None,
        }
    }

    pub fn disallow() -> Self {
        Self {
            action: RuleAction::Disallow,
            os: None,
        }
    }

    /// Restrict the rule to `os`.
    pub fn on(mut self, os: OpSys) -> Self {
        self.os = Some(OsRule {
            name: Some(os.name().to_string()),
            ..OsRule::default()
        });
        self
    }

    pub fn apply(&self, os: OpSys) -> RuleResult {
        let applies = match self.os.as_ref().and_then(|o| o.name.as_deref()) {
            None => true,
            Some(name) => name.parse::<OpSys>().map(|n| n == os).unwrap_or(false),
        };
        if applies {
            self.action.into()
        } else {
            RuleResult::Defer
        }
    }
}

/// Fold `rules` for `os`: the last non-deferring rule wins. No rules at all
/// means Allow; rules that all defer mean Disallow.
pub fn fold_rules(rules: &[Rule], os: OpSys) -> RuleAction {
    if rules.is_empty() {
        return RuleAction::Allow;
    }
    rules
        .iter()
        .fold(RuleAction::Disallow, |current, rule| match rule.apply(os) {
            RuleResult::Allow => RuleAction::Allow,
            RuleResult::Disallow => RuleAction::Disallow,
            RuleResult::Defer => current,
        })
}
