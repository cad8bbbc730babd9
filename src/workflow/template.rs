//! {{key}} 模板替换
//!
//! 每个占位符的所有出现都会被替换；变量不存在时渲染为空串，而不是保留字面量。
//! 花括号之间的任意键名都算占位符（两端空白会被去掉）。

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::workflow::Variables;

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder() -> &'static Regex {
    // 字面量正则，编译不会失败
    PLACEHOLDER_RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").unwrap_or_else(|e| unreachable!("{e}"))
    })
}

/// 渲染字符串模板
pub fn render(template: &str, variables: &Variables) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures| {
            variables.get(&caps[1]).map(value_text).unwrap_or_default()
        })
        .into_owned()
}

/// 递归渲染 JSON 值中的所有字符串
pub fn render_value(value: &Value, variables: &Variables) -> Value {
    match value {
        Value::String(s) => Value::String(render(s, variables)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, variables)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// 变量的文本形式：字符串原样，null 为空，其他取 JSON 表示
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Variables {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_missing_key_renders_empty() {
        let v = vars(json!({"x": "a"}));
        assert_eq!(render("{{x}} and {{y}}", &v), "a and ");
    }

    #[test]
    fn test_replaces_every_occurrence() {
        let v = vars(json!({"x": "a", "n": 3}));
        assert_eq!(render("{{x}}{{ x }}-{{n}}", &v), "aa-3");
        assert_eq!(render("no placeholders", &v), "no placeholders");
    }

    #[test]
    fn test_render_value_nested() {
        let v = vars(json!({"q": "rust"}));
        let args = json!({"query": "about {{q}}", "opts": ["{{q}}", 1]});
        assert_eq!(
            render_value(&args, &v),
            json!({"query": "about rust", "opts": ["rust", 1]})
        );
    }

    #[test]
    fn test_any_key_shape_is_a_placeholder() {
        let v = vars(json!({"a:b": "colon", "user name": "spaced"}));
        assert_eq!(render("{{a:b}}/{{ user name }}", &v), "colon/spaced");
        assert_eq!(render("[{{a/b}}][{{ who? }}]", &v), "[][]");
    }
}
