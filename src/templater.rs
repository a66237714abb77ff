//! The command templater: `:::DOTTED.PATH:::` / `:::DOTTED.PATH|DEFAULT:::`
//! token substitution against the client settings tree.

use serde_json::Value;

use crate::settings::Settings;

/// The result of substituting tokens into a command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub command: String,
    pub unmatched: Vec<String>,
}

/// Substitute every `:::path:::` / `:::path|default:::` token in `template`
/// against `settings`. Tokens with no default and no resolvable path are
/// left untouched in the output and reported in `unmatched`.
pub fn substitute(template: &str, settings: &Settings) -> Substitution {
    let mut output = String::with_capacity(template.len());
    let mut unmatched = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find(":::") {
        let (before, after_start) = rest.split_at(start);
        output.push_str(before);
        let after_start = &after_start[3..];
        let Some(end) = after_start.find(":::") else {
            // Unterminated token marker: treat the rest as literal text.
            output.push_str(":::");
            output.push_str(after_start);
            rest = "";
            break;
        };
        let token_body = &after_start[..end];
        rest = &after_start[end + 3..];

        let (path, default) = match token_body.split_once('|') {
            Some((p, d)) => (p, Some(d)),
            None => (token_body, None),
        };

        match settings.get_path(path) {
            Some(value) => output.push_str(&value_to_token_string(value)),
            None => match default {
                Some(d) => output.push_str(d),
                None => {
                    unmatched.push(path.to_string());
                    output.push_str(":::");
                    output.push_str(token_body);
                    output.push_str(":::");
                }
            },
        }
    }
    output.push_str(rest);

    Substitution {
        command: output,
        unmatched,
    }
}

fn value_to_token_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
