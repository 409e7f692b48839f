//! Rule definitions and the rule catalog

use crate::diagnostic::{Priority, Severity};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Errors raised while building a catalog
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Duplicate rule id: {0}")]
    DuplicateId(String),

    #[error("Rule '{id}' has an invalid pattern: {source}")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },

    #[error("Rule '{id}' has impact score {score} outside 0..=1")]
    InvalidImpact { id: String, score: f64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How a fix is synthesized for a rule's matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixStrategy {
    /// No automatic fix; findings are advisory
    #[default]
    None,
    /// Expand the rule's `fix_template` against the pattern captures
    Substitute,
    /// Expand field-init shorthand `{ x, y }` into `{ x: x, y: y }`
    Shorthand,
    /// Rewrite an interpolated string literal as concatenation
    Interpolation,
    /// Replace an `auto` annotation with an inferred type
    InferType,
}

impl fmt::Display for FixStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixStrategy::None => write!(f, "none"),
            FixStrategy::Substitute => write!(f, "substitute"),
            FixStrategy::Shorthand => write!(f, "shorthand"),
            FixStrategy::Interpolation => write!(f, "interpolation"),
            FixStrategy::InferType => write!(f, "infer-type"),
        }
    }
}

fn default_impact() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

/// A cataloged detection pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Unique rule identifier
    pub id: String,

    /// Fix family used for `--fix <category>`
    pub category: String,

    /// Short title
    #[serde(default)]
    pub title: String,

    /// Longer explanation
    #[serde(default)]
    pub description: String,

    /// Guidance for automated agents applying the fix
    #[serde(default)]
    pub ai_guidance: String,

    /// Default severity of findings
    #[serde(default = "default_severity")]
    pub severity: Severity,

    /// Detection regex, evaluated per line
    pub pattern: String,

    /// Lines matching this regex are not checked by the rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,

    /// Replacement template for the substitute strategy (`$1`, `${name}`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_template: Option<String>,

    /// Fix synthesis strategy
    #[serde(default)]
    pub fix: FixStrategy,

    /// Weight of a finding in impact statistics (0..=1)
    #[serde(default = "default_impact")]
    pub impact_score: f64,

    /// Whether fixes for this rule may be applied automatically
    #[serde(default)]
    pub auto_fixable: bool,

    /// Whether the rule is active
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_severity() -> Severity {
    Severity::Priority(Priority::Medium)
}

impl RuleDefinition {
    pub fn new(id: &str, category: &str, severity: impl Into<Severity>, pattern: &str) -> Self {
        Self {
            id: id.to_string(),
            category: category.to_string(),
            title: String::new(),
            description: String::new(),
            ai_guidance: String::new(),
            severity: severity.into(),
            pattern: pattern.to_string(),
            exclude: None,
            fix_template: None,
            fix: FixStrategy::None,
            impact_score: default_impact(),
            auto_fixable: false,
            enabled: true,
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_guidance(mut self, guidance: &str) -> Self {
        self.ai_guidance = guidance.to_string();
        self
    }

    pub fn with_exclude(mut self, exclude: &str) -> Self {
        self.exclude = Some(exclude.to_string());
        self
    }

    /// Use the substitute strategy with the given template
    pub fn with_template(mut self, template: &str) -> Self {
        self.fix_template = Some(template.to_string());
        self.fix = FixStrategy::Substitute;
        self.auto_fixable = true;
        self
    }

    pub fn with_strategy(mut self, strategy: FixStrategy) -> Self {
        self.fix = strategy;
        self.auto_fixable = strategy != FixStrategy::None;
        self
    }

    pub fn with_impact(mut self, impact_score: f64) -> Self {
        self.impact_score = impact_score;
        self
    }

    /// Title, or the id when no title is set
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            &self.id
        } else {
            &self.title
        }
    }
}

/// A rule with its patterns compiled
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub def: RuleDefinition,
    regex: Regex,
    exclude: Option<Regex>,
}

impl CompiledRule {
    pub fn compile(mut def: RuleDefinition) -> Result<Self, RuleError> {
        // A template without an explicit strategy means substitution
        if def.fix == FixStrategy::None && def.fix_template.is_some() {
            def.fix = FixStrategy::Substitute;
        }
        if !(0.0..=1.0).contains(&def.impact_score) {
            return Err(RuleError::InvalidImpact {
                id: def.id.clone(),
                score: def.impact_score,
            });
        }
        let regex = Regex::new(&def.pattern).map_err(|source| RuleError::InvalidPattern {
            id: def.id.clone(),
            source,
        })?;
        let exclude = match &def.exclude {
            Some(pattern) => Some(Regex::new(pattern).map_err(|source| {
                RuleError::InvalidPattern {
                    id: def.id.clone(),
                    source,
                }
            })?),
            None => None,
        };
        Ok(Self {
            def,
            regex,
            exclude,
        })
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Whether the rule should look at this line
    pub fn applies_to(&self, line: &str) -> bool {
        self.def.enabled && !self.exclude.as_ref().is_some_and(|re| re.is_match(line))
    }
}

/// Rule file layout: either a bare list or `{ rules: [...] }`
#[derive(Deserialize)]
#[serde(untagged)]
enum RuleFile {
    List(Vec<RuleDefinition>),
    Wrapped { rules: Vec<RuleDefinition> },
}

/// Ordered set of rules with unique ids
#[derive(Debug, Clone, Default)]
pub struct RuleCatalog {
    rules: Vec<CompiledRule>,
}

impl RuleCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in rules
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for def in builtin_rules() {
            // Built-in definitions are covered by tests; skip rather than panic.
            if let Err(e) = catalog.add(def) {
                log::error!("built-in rule rejected: {}", e);
            }
        }
        catalog
    }

    /// Build a catalog from definitions
    pub fn from_definitions(defs: Vec<RuleDefinition>) -> Result<Self, RuleError> {
        let mut catalog = Self::new();
        for def in defs {
            catalog.add(def)?;
        }
        Ok(catalog)
    }

    /// Add a rule, rejecting duplicate ids and bad patterns
    pub fn add(&mut self, def: RuleDefinition) -> Result<(), RuleError> {
        if self.get(&def.id).is_some() {
            return Err(RuleError::DuplicateId(def.id));
        }
        self.rules.push(CompiledRule::compile(def)?);
        Ok(())
    }

    /// Load definitions from a YAML or JSON file (chosen by extension)
    pub fn load_definitions(path: &Path) -> Result<Vec<RuleDefinition>, RuleError> {
        let content = std::fs::read_to_string(path)?;
        let file: RuleFile = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        Ok(match file {
            RuleFile::List(rules) | RuleFile::Wrapped { rules } => rules,
        })
    }

    /// Merge rules from a file into this catalog
    pub fn extend_from_file(&mut self, path: &Path) -> Result<usize, RuleError> {
        let defs = Self::load_definitions(path)?;
        let count = defs.len();
        for def in defs {
            self.add(def)?;
        }
        log::debug!("loaded {} rules from {}", count, path.display());
        Ok(count)
    }

    /// Disable rules by id; unknown ids are ignored
    pub fn disable(&mut self, ids: &[String]) {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        for rule in &mut self.rules {
            if ids.contains(rule.def.id.as_str()) {
                rule.def.enabled = false;
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|r| r.def.id == id)
    }

    /// All rules, in insertion order
    pub fn rules(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }

    /// Enabled rules only
    pub fn enabled(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter().filter(|r| r.def.enabled)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.rules.iter().map(|r| &r.def)
    }

    /// Distinct categories, sorted
    pub fn categories(&self) -> BTreeSet<&str> {
        self.rules.iter().map(|r| r.def.category.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Rules shipped with the tool
pub fn builtin_rules() -> Vec<RuleDefinition> {
    vec![
        RuleDefinition::new(
            "empty-params",
            "empty_params",
            Priority::High,
            r"fn\s+(\w+)\s*\(\s*\)\s*->",
        )
        .with_title("Empty parameter list")
        .with_description("Functions without parameters must declare `none` explicitly.")
        .with_guidance("Insert `none` between the parentheses; nothing else changes.")
        .with_template("fn ${1}(none) ->")
        .with_impact(0.8),
        RuleDefinition::new(
            "void-params",
            "void_semantics",
            Priority::High,
            r"fn\s+(\w+)\s*\(\s*void\s*\)",
        )
        .with_title("void in parameter list")
        .with_description("`void` is only a return type; an empty parameter list is `none`.")
        .with_guidance("Replace `void` inside the parameter list with `none`.")
        .with_template("fn ${1}(none)")
        .with_impact(0.7),
        RuleDefinition::new(
            "empty-struct-void",
            "empty_struct_void",
            Priority::High,
            r"struct\s+(\w+)(\s*<[^>]*>)?\s*\{\s*void\s*\}",
        )
        .with_title("void as struct body")
        .with_description("Empty structs are written `{ none }`.")
        .with_guidance("Replace the `void` body with `none`, keeping generic parameters.")
        .with_template("struct ${1}${2} { none }")
        .with_impact(0.7),
        RuleDefinition::new(
            "empty-enum-void",
            "void_semantics",
            Priority::Medium,
            r"enum\s+(\w+)(\s*<[^>]*>)?\s*\{\s*void\s*\}",
        )
        .with_title("void as enum body")
        .with_description("Empty enums are written `{ none }`.")
        .with_guidance("Replace the `void` body with `none`, keeping generic parameters.")
        .with_template("enum ${1}${2} { none }")
        .with_impact(0.6),
        RuleDefinition::new(
            "void-array-element",
            "void_semantics",
            Priority::Low,
            r"\[\s*void\s*\]",
        )
        .with_title("void array element type")
        .with_description("Array element types use `none` for the empty type.")
        .with_guidance("Replace `[void]` with `[none]`.")
        .with_template("[none]")
        .with_impact(0.4),
        RuleDefinition::new(
            "void-call-args",
            "void_semantics",
            Priority::Medium,
            r"\b(\w+)\s*\(\s*void\s*\)",
        )
        .with_title("void as call argument")
        .with_description("Calls without arguments pass `none`, not `void`.")
        .with_guidance("Replace the `void` argument with `none`.")
        .with_exclude(r"\bfn\b|#\[")
        .with_template("${1}(none)")
        .with_impact(0.5),
        RuleDefinition::new(
            "void-annotation",
            "void_semantics",
            Priority::Low,
            r"#\[(\w+)\(\s*void\s*\)\]",
        )
        .with_title("void as annotation argument")
        .with_description("Annotation arguments use `none` for the empty value.")
        .with_guidance("Replace the `void` argument with `none`.")
        .with_template("#[${1}(none)]")
        .with_impact(0.3),
        RuleDefinition::new(
            "string-interpolation",
            "string_interpolation",
            Priority::Critical,
            r#""[^"]*\{[^}]+\}[^"]*""#,
        )
        .with_title("String interpolation")
        .with_description("Interpolated string literals are not supported; build the string with `+`.")
        .with_guidance(
            "Split the literal at each `{expr}` and join the text parts and expressions with `+`. \
             Review expressions that are not plain identifiers.",
        )
        .with_strategy(FixStrategy::Interpolation)
        .with_impact(0.9),
        RuleDefinition::new(
            "auto-type",
            "auto_type",
            Priority::Medium,
            r"let\s+(\w+)\s*:\s*auto\s*=",
        )
        .with_title("auto type annotation")
        .with_description("Bindings must declare an explicit type instead of `auto`.")
        .with_guidance(
            "Replace `auto` with the type of the initializer. Leave it for a human when the \
             type cannot be read off a literal or a known call.",
        )
        .with_strategy(FixStrategy::InferType)
        .with_impact(0.5),
        RuleDefinition::new(
            "return-void",
            "return_void",
            Priority::Low,
            r"return\s+void\s*;",
        )
        .with_title("return void")
        .with_description("Returning from a `void` function is a bare `return;`.")
        .with_guidance("Drop the `void` operand.")
        .with_template("return;")
        .with_impact(0.3),
        RuleDefinition::new(
            "field-shorthand",
            "field_shorthand",
            Priority::Medium,
            r"\b[A-Z]\w*\s*\{(?:\s*\w+\s*:\s*[^,{}]+,)*\s*\w+\s*(?:,[^{}]*)?\}",
        )
        .with_title("Field init shorthand")
        .with_description("Struct literals must name every field explicitly (`x: x`).")
        .with_guidance("Expand each bare field `x` into `x: x`; explicit fields stay as they are.")
        .with_exclude(r"^\s*(?:pub\s+)?(?:struct|enum|union|impl|trait)\b")
        .with_strategy(FixStrategy::Shorthand)
        .with_impact(0.4),
    ]
}
