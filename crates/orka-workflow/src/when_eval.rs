use std::collections::HashMap;

use serde_json::Value;

/// Minimal `when` expression grammar over the workflow context map: `key`,
/// `!key` (truthy/falsy), or `key == literal` / `key != literal` where
/// `literal` is a quoted string, `true`/`false`, or a number. Absent `when`
/// is always true.
pub fn evaluate(expr: Option<&str>, context: &HashMap<String, Value>) -> bool {
    let Some(expr) = expr else { return true };
    let expr = expr.trim();
    if expr.is_empty() {
        return true;
    }

    if let Some((left, right)) = expr.split_once("==") {
        return lookup(left.trim(), context) == Some(parse_literal(right.trim()));
    }
    if let Some((left, right)) = expr.split_once("!=") {
        return lookup(left.trim(), context) != Some(parse_literal(right.trim()));
    }
    if let Some(key) = expr.strip_prefix('!') {
        return !is_truthy(lookup(key.trim(), context));
    }
    is_truthy(lookup(expr, context))
}

fn lookup(key: &str, context: &HashMap<String, Value>) -> Option<Value> {
    context.get(key).cloned()
}

fn is_truthy(value: Option<Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

fn parse_literal(raw: &str) -> Value {
    if let Some(inner) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Value::String(inner.to_string());
    }
    if let Some(inner) = raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return Value::String(inner.to_string());
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_when_is_always_true() {
        assert!(evaluate(None, &HashMap::new()));
    }

    #[test]
    fn equality_against_string_literal() {
        let mut ctx = HashMap::new();
        ctx.insert("region".to_string(), json!("us-east"));
        assert!(evaluate(Some("region == \"us-east\""), &ctx));
        assert!(!evaluate(Some("region == \"eu-west\""), &ctx));
    }

    #[test]
    fn negation_checks_falsiness() {
        let mut ctx = HashMap::new();
        ctx.insert("skip".to_string(), json!(false));
        assert!(evaluate(Some("!skip"), &ctx));
    }

    #[test]
    fn bare_key_checks_truthiness() {
        let mut ctx = HashMap::new();
        ctx.insert("ready".to_string(), json!(true));
        assert!(evaluate(Some("ready"), &ctx));
        assert!(!evaluate(Some("missing"), &ctx));
    }
}
