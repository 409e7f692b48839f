//! Fix synthesis
//!
//! Each rule names a [`FixStrategy`]; the generator turns a finding into at most
//! one [`Suggestion`] with a confidence level:
//!
//! - substitution and shorthand expansion are purely syntactic: high
//! - interpolation rewrites are medium, or low once an expression is more than
//!   an identifier
//! - type inference is medium when a heuristic matches; otherwise the finding
//!   gets a low, span-less suggestion flagged for manual review

use crate::diagnostic::{Confidence, Diagnostic, Metadata, Span, Suggestion};
use crate::rule::{CompiledRule, FixStrategy, RuleCatalog};
use regex::Regex;
use std::sync::{Arc, LazyLock};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_]\w*$").unwrap());

static INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+$").unwrap());

static FLOAT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+\.\d+$").unwrap());

static CHAR_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^'(?:[^'\\]|\\.)'$").unwrap());

static CONSTRUCTOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]\w*(?:<[^>]*>)?)(?:::|\.)new\s*\(").unwrap());

static STRUCT_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]\w*(?:<[^>]*>)?)\s*\{").unwrap());

static MATCH_SUBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^match\s+(\w+)").unwrap());

static LEN_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\.len\s*\(\s*\)|\b\w*_len\s*\(|\blen\s*\()").unwrap());

static AUTO_ANNOTATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":\s*auto\b").unwrap());

/// Builds suggestions for findings using the catalog's strategies
#[derive(Clone)]
pub struct FixGenerator {
    catalog: Arc<RuleCatalog>,
}

impl FixGenerator {
    pub fn new(catalog: Arc<RuleCatalog>) -> Self {
        Self { catalog }
    }

    /// Attach a suggestion to every finding that gets one
    pub fn attach(&self, diagnostics: &mut [Diagnostic], content: &str) {
        let lines: Vec<&str> = content.lines().collect();

        for diag in diagnostics.iter_mut() {
            let line = diag
                .primary_span()
                .and_then(|s| s.start_line.checked_sub(1))
                .and_then(|i| lines.get(i).copied())
                .unwrap_or("");

            let Some((suggestion, inferred)) = self.synthesize(diag, line) else {
                continue;
            };

            if let Some(ty) = inferred {
                diag.metadata
                    .get_or_insert_with(Metadata::default)
                    .inferred_types
                    .push(ty);
            }
            if let Err(e) = diag.add_suggestion(suggestion) {
                log::warn!("dropping suggestion for {}: {}", diag.rule_id, e);
            }
        }
    }

    /// The suggestion for one finding, given the text of its primary line
    pub fn suggest(&self, diagnostic: &Diagnostic, line: &str) -> Option<Suggestion> {
        self.synthesize(diagnostic, line).map(|(s, _)| s)
    }

    fn synthesize(&self, diagnostic: &Diagnostic, line: &str) -> Option<(Suggestion, Option<String>)> {
        let rule = self.catalog.get(&diagnostic.rule_id)?;
        let span = diagnostic.primary_span()?;
        let original = match &span.snippet {
            Some(snippet) => snippet.clone(),
            None => slice_columns(line, span.start_column, span.end_column)?,
        };

        let mut inferred = None;
        let suggestion = match rule.def.fix {
            FixStrategy::None => return None,
            FixStrategy::Substitute => substitute(rule, span, &original)?,
            FixStrategy::Shorthand => {
                let text = expand_shorthand(&original);
                Suggestion::replace(
                    span.clone(),
                    &text,
                    Confidence::High,
                    "name every field explicitly",
                )
            }
            FixStrategy::Interpolation => {
                let (text, confidence) = rewrite_interpolation(&original)?;
                let rationale = if confidence == Confidence::Low {
                    "concatenate instead of interpolating; check the expressions convert to strings"
                } else {
                    "concatenate instead of interpolating"
                };
                Suggestion::replace(span.clone(), &text, confidence, rationale)
            }
            FixStrategy::InferType => {
                let (suggestion, ty) = infer_annotation(rule, span, &original, line)?;
                inferred = ty;
                suggestion
            }
        };

        if suggestion.is_applicable() && suggestion.text == original {
            return None;
        }
        Some((suggestion, inferred))
    }
}

/// Characters `[start, end)` of a line, 1-based columns
fn slice_columns(line: &str, start: usize, end: usize) -> Option<String> {
    let text: String = line
        .chars()
        .skip(start.checked_sub(1)?)
        .take(end.checked_sub(start)?)
        .collect();
    (!text.is_empty()).then_some(text)
}

fn substitute(rule: &CompiledRule, span: &Span, original: &str) -> Option<Suggestion> {
    let template = rule.def.fix_template.as_deref()?;
    if !rule.regex().is_match(original) {
        return None;
    }
    let text = rule.regex().replace(original, template).into_owned();
    Some(Suggestion::replace(
        span.clone(),
        &text,
        Confidence::High,
        &format!("replace `{}` with `{}`", original.trim(), text.trim()),
    ))
}

/// Expand field-init shorthand in a struct literal
///
/// `Point { x, y }` becomes `Point { x: x, y: y }`. Fields that already name a
/// value are kept, and a literal with nothing to expand is returned unchanged.
pub fn expand_shorthand(literal: &str) -> String {
    let (Some(open), Some(close)) = (literal.find('{'), literal.rfind('}')) else {
        return literal.to_string();
    };
    if close < open {
        return literal.to_string();
    }

    let fields: Vec<&str> = literal[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect();
    if !fields.iter().any(|f| IDENTIFIER.is_match(f)) {
        return literal.to_string();
    }

    let expanded: Vec<String> = fields
        .iter()
        .map(|f| {
            if IDENTIFIER.is_match(f) {
                format!("{}: {}", f, f)
            } else {
                f.to_string()
            }
        })
        .collect();

    format!(
        "{}{{ {} }}{}",
        &literal[..open],
        expanded.join(", "),
        &literal[close + 1..]
    )
}

/// Rewrite an interpolated string literal (quotes included) as concatenation
///
/// Returns `None` when the literal has no `{expr}` segment. Empty text segments
/// are dropped, so `"{a}{b}"` becomes `a + b`.
pub fn rewrite_interpolation(literal: &str) -> Option<(String, Confidence)> {
    let inner = literal.strip_prefix('"')?.strip_suffix('"')?;

    let mut parts: Vec<String> = Vec::new();
    let mut confidence = Confidence::Medium;
    let mut has_expression = false;
    let mut rest = inner;

    while let Some(open) = rest.find('{') {
        let Some(len) = rest[open + 1..].find('}') else {
            break;
        };
        let text = &rest[..open];
        let expr = rest[open + 1..open + 1 + len].trim();

        if !text.is_empty() {
            parts.push(format!("\"{}\"", text));
        }
        if !expr.is_empty() {
            if !IDENTIFIER.is_match(expr) {
                confidence = Confidence::Low;
            }
            parts.push(expr.to_string());
            has_expression = true;
        }
        rest = &rest[open + 1 + len + 1..];
    }
    if !rest.is_empty() {
        parts.push(format!("\"{}\"", rest));
    }

    if !has_expression {
        return None;
    }
    Some((parts.join(" + "), confidence))
}

/// Type of a binding from its initializer, with the heuristic that matched
pub fn infer_type(name: &str, value: &str) -> Option<(String, &'static str)> {
    let value = value.trim().trim_end_matches(';').trim_end();

    if value.starts_with("match ") && value.contains('{') {
        let subject = MATCH_SUBJECT.captures(value)?.get(1)?.as_str();
        return infer_from_name(&format!("{} {}", name, subject))
            .map(|ty| (ty.to_string(), "match subject name"));
    }

    const JSON_CALLS: [(&str, &str); 8] = [
        ("json::parse(", "Result<json::JSONValue, json::JSONError>"),
        ("json::as_bool(", "Result<bool, json::JSONError>"),
        ("json::as_number(", "Result<f64, json::JSONError>"),
        ("json::as_string(", "Result<string, json::JSONError>"),
        ("json::as_array(", "Result<json::JSONArray, json::JSONError>"),
        ("json::as_object(", "Result<json::JSONObject, json::JSONError>"),
        ("json::array_get(", "Result<json::JSONValue, json::JSONError>"),
        ("json::object_get(", "Result<json::JSONValue, json::JSONError>"),
    ];
    if let Some((_, ty)) = JSON_CALLS.iter().find(|(call, _)| value.contains(call)) {
        return Some((ty.to_string(), "known library call"));
    }
    if LEN_CALL.is_match(value) {
        return Some(("usize".to_string(), "length call"));
    }

    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        return Some(("string".to_string(), "string literal"));
    }
    if CHAR_LITERAL.is_match(value) {
        return Some(("char".to_string(), "char literal"));
    }
    if INTEGER.is_match(value) {
        return Some(("i32".to_string(), "integer literal"));
    }
    if FLOAT.is_match(value) {
        return Some(("f64".to_string(), "float literal"));
    }
    if value == "true" || value == "false" {
        return Some(("bool".to_string(), "bool literal"));
    }
    if let Some(caps) = CONSTRUCTOR.captures(value) {
        return Some((caps[1].to_string(), "constructor call"));
    }
    if let Some(caps) = STRUCT_LITERAL.captures(value) {
        return Some((caps[1].to_string(), "struct literal"));
    }
    None
}

/// Type guessed from naming conventions
fn infer_from_name(names: &str) -> Option<&'static str> {
    let names = names.to_lowercase();
    let has = |keys: &[&str]| keys.iter().any(|k| names.contains(k));

    if has(&["bool"]) {
        Some("bool")
    } else if has(&["num", "int", "float"]) {
        Some("f64")
    } else if has(&["str", "text"]) {
        Some("string")
    } else if has(&["array", "list"]) {
        Some("json::JSONArray")
    } else if has(&["obj"]) {
        Some("json::JSONObject")
    } else if has(&["element", "value", "item"]) {
        Some("json::JSONValue")
    } else {
        None
    }
}

fn infer_annotation(
    rule: &CompiledRule,
    span: &Span,
    original: &str,
    line: &str,
) -> Option<(Suggestion, Option<String>)> {
    let name = rule.regex().captures(original)?.get(1)?.as_str().to_string();
    let value: String = line.chars().skip(span.end_column.saturating_sub(1)).collect();

    match infer_type(&name, &value) {
        Some((ty, reason)) => {
            let text = AUTO_ANNOTATION
                .replace(original, format!(": {}", ty).as_str())
                .into_owned();
            let suggestion = Suggestion::replace(
                span.clone(),
                &text,
                Confidence::Medium,
                &format!("`{}` inferred from {}", ty, reason),
            );
            Some((suggestion, Some(ty)))
        }
        None => {
            let suggestion = Suggestion::advisory(
                "auto",
                Confidence::Low,
                &format!(
                    "manual review: cannot infer the type of `{}` from `{}`",
                    name,
                    value.trim().trim_end_matches(';').trim_end()
                ),
            );
            Some((suggestion, None))
        }
    }
}

/// Normalized edit-distance similarity in `0.0..=1.0`
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    1.0 - prev[b.len()] as f64 / longest as f64
}

/// Candidates similar to `name` (similarity >= 0.4), best first
pub fn rank_similar<'a, I>(name: &str, candidates: I, limit: usize) -> Vec<(String, Confidence)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut scored: Vec<(f64, &str)> = candidates
        .into_iter()
        .map(|c| (similarity(name, c), c))
        .filter(|(score, _)| *score >= 0.4)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    scored
        .into_iter()
        .take(limit)
        .map(|(score, c)| {
            let confidence = if score >= 0.8 {
                Confidence::High
            } else if score >= 0.6 {
                Confidence::Medium
            } else {
                Confidence::Low
            };
            (c.to_string(), confidence)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::scan_source;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn generate(src: &str) -> Vec<Diagnostic> {
        let catalog = Arc::new(RuleCatalog::builtin());
        let mut diags = scan_source(Path::new("t.asthra"), src, &catalog);
        FixGenerator::new(catalog).attach(&mut diags, src);
        diags
    }

    fn only<'a>(diags: &'a [Diagnostic], rule: &str) -> &'a Diagnostic {
        let found: Vec<_> = diags.iter().filter(|d| d.rule_id == rule).collect();
        assert_eq!(found.len(), 1, "expected one {} finding", rule);
        found[0]
    }

    #[test]
    fn test_rule_file_template_implies_substitution() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"rules:
  - id: no-todo-return
    category: return_void
    severity: low
    pattern: 'return\s+todo\s*;'
    fix_template: "return;"
    auto_fixable: true
"#,
        )
        .unwrap();

        let defs = RuleCatalog::load_definitions(file.path()).unwrap();
        let catalog = Arc::new(RuleCatalog::from_definitions(defs).unwrap());
        assert_eq!(catalog.get("no-todo-return").unwrap().def.fix, FixStrategy::Substitute);

        let src = "fn f(none) -> void {\n    return todo;\n}\n";
        let mut diags = scan_source(Path::new("t.asthra"), src, &catalog);
        FixGenerator::new(Arc::clone(&catalog)).attach(&mut diags, src);

        let s = only(&diags, "no-todo-return").best_suggestion().unwrap();
        assert_eq!(s.text, "return;");
        assert_eq!(s.confidence, Confidence::High);
        assert!(s.is_applicable());
    }

    #[test]
    fn test_expand_shorthand() {
        assert_eq!(expand_shorthand("Point { x, y }"), "Point { x: x, y: y }");
        assert_eq!(expand_shorthand("Point { x: px, y: _ }"), "Point { x: px, y: _ }");
        assert_eq!(expand_shorthand("Point { x: 1, y }"), "Point { x: 1, y: y }");
        assert_eq!(expand_shorthand("Point{x,}"), "Point{ x: x }");
    }

    #[test]
    fn test_rewrite_interpolation() {
        assert_eq!(
            rewrite_interpolation(r#""Hello {name}!""#),
            Some((r#""Hello " + name + "!""#.to_string(), Confidence::Medium))
        );
        assert_eq!(
            rewrite_interpolation(r#""{a}{b}""#),
            Some(("a + b".to_string(), Confidence::Medium))
        );
        assert_eq!(
            rewrite_interpolation(r#""len={items.len()}""#),
            Some((r#""len=" + items.len()"#.to_string(), Confidence::Low))
        );
        assert_eq!(rewrite_interpolation(r#""plain""#), None);
        assert_eq!(rewrite_interpolation("no quotes"), None);
    }

    #[test]
    fn test_infer_type_literals_and_calls() {
        assert_eq!(infer_type("n", " 42;").unwrap().0, "i32");
        assert_eq!(infer_type("n", "3.5").unwrap().0, "f64");
        assert_eq!(infer_type("b", "true;").unwrap().0, "bool");
        assert_eq!(infer_type("s", "\"hi\";").unwrap().0, "string");
        assert_eq!(infer_type("c", "'x'").unwrap().0, "char");
        assert_eq!(
            infer_type("doc", "json::parse(text);").unwrap().0,
            "Result<json::JSONValue, json::JSONError>"
        );
        assert_eq!(
            infer_type("v", "json::object_get(obj, \"k\")").unwrap().0,
            "Result<json::JSONValue, json::JSONError>"
        );
        assert_eq!(infer_type("n", "json::array_len(arr)").unwrap().0, "usize");
        assert_eq!(infer_type("n", "items.len();").unwrap().0, "usize");
        assert_eq!(infer_type("m", "HashMap::new();").unwrap().0, "HashMap");
        assert_eq!(infer_type("p", "Point { x: 1, y: 2 };").unwrap().0, "Point");
        assert_eq!(
            infer_type("flag_bool", "match result {").unwrap().0,
            "bool"
        );
        assert!(infer_type("xs", "[1, 2, 3];").is_none());
        assert!(infer_type("r", "compute(a, b);").is_none());
    }

    #[test]
    fn test_substitution_is_high_confidence() {
        let diags = generate("fn main() -> void {\n    return void;\n}\n");
        let empty = only(&diags, "empty-params");
        let suggestion = &empty.suggestions[0];
        assert_eq!(suggestion.text, "fn main(none) ->");
        assert_eq!(suggestion.confidence, Confidence::High);
        assert!(suggestion.is_applicable());

        let ret = only(&diags, "return-void");
        assert_eq!(ret.suggestions[0].text, "return;");
    }

    #[test]
    fn test_generic_struct_void() {
        let diags = generate("struct Box<T> { void }\n");
        assert_eq!(
            only(&diags, "empty-struct-void").suggestions[0].text,
            "struct Box<T> { none }"
        );
    }

    #[test]
    fn test_shorthand_suggestion() {
        let diags = generate("let p: Point = Point { x, y };\n");
        let d = only(&diags, "field-shorthand");
        assert_eq!(d.suggestions[0].text, "Point { x: x, y: y }");
        assert_eq!(d.suggestions[0].confidence, Confidence::High);
    }

    #[test]
    fn test_interpolation_suggestion() {
        let diags = generate("log(\"Hello {name}!\");\n");
        let d = only(&diags, "string-interpolation");
        assert_eq!(d.suggestions[0].text, r#""Hello " + name + "!""#);
        assert_eq!(d.suggestions[0].confidence, Confidence::Medium);
    }

    #[test]
    fn test_infer_suggestion_records_metadata() {
        let diags = generate("let count: auto = 10;\n");
        let d = only(&diags, "auto-type");
        assert_eq!(d.suggestions[0].text, "let count: i32 =");
        assert_eq!(d.suggestions[0].confidence, Confidence::Medium);
        assert_eq!(
            d.metadata.as_ref().unwrap().inferred_types,
            vec!["i32".to_string()]
        );
    }

    #[test]
    fn test_unknown_type_is_advisory() {
        let diags = generate("let r: auto = compute(a, b);\n");
        let d = only(&diags, "auto-type");
        let s = &d.suggestions[0];
        assert_eq!(s.confidence, Confidence::Low);
        assert!(!s.is_applicable());
        assert!(s.rationale.starts_with("manual review"));
    }

    #[test]
    fn test_similarity() {
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert!((similarity("kitten", "sitting") - (1.0 - 3.0 / 7.0)).abs() < 1e-9);

        let ranked = rank_similar(
            "retrun-void",
            ["return-void", "auto-type", "void-params"],
            3,
        );
        assert_eq!(ranked[0].0, "return-void");
        assert_eq!(ranked[0].1, Confidence::High);
        assert!(ranked.iter().all(|(c, _)| c != "auto-type"));
    }
}
