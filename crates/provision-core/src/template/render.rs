use std::collections::HashMap;
use std::sync::OnceLock;

use gtmpl::{Context, Template, Value};
use regex::Regex;

use super::{BuildInfo, TemplateError};

static ACTION_RE: OnceLock<Regex> = OnceLock::new();
static STRING_RE: OnceLock<Regex> = OnceLock::new();
static FIELD_RE: OnceLock<Regex> = OnceLock::new();

fn action_re() -> &'static Regex {
    ACTION_RE.get_or_init(|| Regex::new(r"(?s)\{\{(.*?)\}\}").unwrap())
}

fn string_re() -> &'static Regex {
    STRING_RE.get_or_init(|| Regex::new(r#""(?:[^"\\]|\\.)*"|`[^`]*`"#).unwrap())
}

fn field_re() -> &'static Regex {
    FIELD_RE.get_or_init(|| Regex::new(r"(?:^|[\s(|,])\.([A-Za-z_][A-Za-z0-9_]*)").unwrap())
}

fn context(info: &BuildInfo) -> Context {
    let fields: HashMap<String, Value> = BuildInfo::FIELDS
        .iter()
        .filter_map(|name| info.get(name).map(|v| (name.to_string(), Value::String(v.to_string()))))
        .collect();
    Context::from(Value::Object(fields))
}

/// First top-level field reference that `BuildInfo` does not provide.
fn undefined_field(src: &str) -> Option<String> {
    for action in action_re().captures_iter(src) {
        let body = action[1].trim_start_matches('-').trim();
        if body.starts_with("/*") {
            continue;
        }
        let body = string_re().replace_all(body, "\"\"");
        for field in field_re().captures_iter(&body) {
            if !BuildInfo::FIELDS.contains(&&field[1]) {
                return Some(field[1].to_string());
            }
        }
    }
    None
}

/// Render `src` as a Go `text/template` with `info` as dot.
pub fn render(src: &str, info: &BuildInfo) -> Result<String, TemplateError> {
    let mut tmpl = Template::default();
    tmpl.parse(src).map_err(|e| TemplateError::Parse(e.to_string()))?;
    if let Some(field) = undefined_field(src) {
        return Err(TemplateError::UndefinedField(field));
    }
    tmpl.render(&context(info))
        .map_err(|e| TemplateError::Render(e.to_string()))
}
