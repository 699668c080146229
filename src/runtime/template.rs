/// Placeholder substitution for node text fields
///
/// Replaces `{{ name }}` (or `{{ .name }}`) with the display form of the named
/// variable. Names may contain letters, digits, `_`, `.` and `-`; a name not
/// found verbatim is resolved as a dotted path into object/list values, so
/// `{{response.items.0.id}}` works against a JSON response. Unknown names render
/// as the empty string.
///
/// Rendering fails open: a template with an unterminated or malformed
/// placeholder is returned unchanged.

use super::scope::{display_value, Scope};
use serde_json::{Map, Value};
use tracing::debug;

enum Segment<'t> {
    Literal(&'t str),
    Placeholder(&'t str),
}

/// Render `template` against the scope, with `extra` taking precedence
pub fn render(template: &str, scope: &Scope, extra: Option<&Map<String, Value>>) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    let segments = match parse(template) {
        Some(segments) => segments,
        None => {
            debug!("🔍 Template left unrendered (malformed placeholder): {}", template);
            return template.to_string();
        }
    };

    let mut rendered = String::with_capacity(template.len());
    for segment in segments {
        match segment {
            Segment::Literal(text) => rendered.push_str(text),
            Segment::Placeholder(name) => {
                if let Some(value) = resolve(name, scope, extra) {
                    rendered.push_str(&display_value(value));
                }
            }
        }
    }
    rendered
}

fn parse(template: &str) -> Option<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        if open > 0 {
            segments.push(Segment::Literal(&rest[..open]));
        }
        let after_open = &rest[open + 2..];
        let close = after_open.find("}}")?;
        segments.push(Segment::Placeholder(placeholder_name(&after_open[..close])?));
        rest = &after_open[close + 2..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    Some(segments)
}

fn placeholder_name(inner: &str) -> Option<&str> {
    let trimmed = inner.trim();
    let name = trimmed.strip_prefix('.').unwrap_or(trimmed);
    let legal = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    legal.then_some(name)
}

fn lookup<'v>(key: &str, scope: &'v Scope, extra: Option<&'v Map<String, Value>>) -> Option<&'v Value> {
    extra.and_then(|map| map.get(key)).or_else(|| scope.get(key))
}

/// Exact name first, then the longest variable prefix followed by a path walk
fn resolve<'v>(name: &str, scope: &'v Scope, extra: Option<&'v Map<String, Value>>) -> Option<&'v Value> {
    if let Some(value) = lookup(name, scope, extra) {
        return Some(value);
    }

    let mut split_points: Vec<usize> = name.match_indices('.').map(|(i, _)| i).collect();
    split_points.reverse();

    for split in split_points {
        let Some(root) = lookup(&name[..split], scope, extra) else {
            continue;
        };
        if let Some(value) = walk(root, &name[split + 1..]) {
            return Some(value);
        }
    }
    None
}

fn walk<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Scope {
        let mut scope = Scope::new();
        scope.set("name", json!("Ada")).unwrap();
        scope.set("count", json!(3.0)).unwrap();
        scope.set("api.body", json!({"items": [{"id": 7}]})).unwrap();
        scope
    }

    #[test]
    fn substitutes_known_names() {
        assert_eq!(render("Hello {{name}}!", &scope(), None), "Hello Ada!");
        assert_eq!(render("{{ .name }}/{{count}}", &scope(), None), "Ada/3");
    }

    #[test]
    fn unknown_names_render_empty() {
        assert_eq!(render("[{{missing}}]", &scope(), None), "[]");
    }

    #[test]
    fn malformed_templates_are_returned_unchanged() {
        let s = scope();
        assert_eq!(render("Hello {{name", &s, None), "Hello {{name");
        assert_eq!(render("{{ name | upper }}", &s, None), "{{ name | upper }}");
        assert_eq!(render("{{}} {{name}}", &s, None), "{{}} {{name}}");
    }

    #[test]
    fn text_without_placeholders_is_untouched() {
        assert_eq!(render("plain }} text", &scope(), None), "plain }} text");
    }

    #[test]
    fn dotted_paths_walk_into_json() {
        assert_eq!(render("{{api.body.items.0.id}}", &scope(), None), "7");
        assert_eq!(
            render("{{api.body}}", &scope(), None),
            "{\"items\":[{\"id\":7}]}"
        );
    }

    #[test]
    fn extra_fields_shadow_the_scope() {
        let mut extra = Map::new();
        extra.insert("name".to_string(), json!("Grace"));
        extra.insert("value".to_string(), json!(1));
        assert_eq!(
            render("{{name}}:{{value}}:{{count}}", &scope(), Some(&extra)),
            "Grace:1:3"
        );
    }
}
