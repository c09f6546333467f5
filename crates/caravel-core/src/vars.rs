//! Variable expansion over raw definition text
//!
//! Expansion runs before the definition is parsed, so tokens can appear
//! anywhere in the file. Syntax: `${name}` or `${name,default}`. A backslash
//! escapes a literal `$`. Lookup order: variable map, then process
//! environment, then the default, then the empty string. A default of the
//! form `$ENVVAR` is itself resolved from the environment.

use std::collections::BTreeMap;

use crate::error::{CoreError, Result};

/// Variables handed to the expander, e.g. from cluster arguments or `--set`
pub type Variables = BTreeMap<String, String>;

/// Resolve a single variable
fn lookup(name: &str, vars: &Variables, default: Option<&str>) -> String {
    if let Some(v) = vars.get(name) {
        return v.clone();
    }
    if let Ok(v) = std::env::var(name) {
        return v;
    }
    default.unwrap_or_default().to_string()
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '.' || ch == '_'
}

/// Expand every `${name[,default]}` token in `text`.
///
/// The output contains no `${` sequences the expander recognizes, so a
/// second pass over the result is a no-op.
pub fn expand_variables(text: &str, vars: &Variables) -> Result<String> {
    enum State {
        Copy,
        Backslash,
        Dollar,
        ScanName,
        ScanDefault,
    }

    let mut out = String::with_capacity(text.len());
    let mut state = State::Copy;
    let mut name = String::new();
    let mut default: Option<String> = None;

    for ch in text.chars() {
        match state {
            State::Copy => match ch {
                '\\' => state = State::Backslash,
                '$' => state = State::Dollar,
                _ => out.push(ch),
            },
            State::Backslash => {
                if ch != '$' {
                    out.push('\\');
                }
                out.push(ch);
                state = State::Copy;
            }
            State::Dollar => {
                if ch == '{' {
                    name.clear();
                    default = None;
                    state = State::ScanName;
                } else {
                    out.push('$');
                    out.push(ch);
                    state = State::Copy;
                }
            }
            State::ScanName => {
                if is_name_char(ch) {
                    name.push(ch);
                } else if ch == ',' {
                    default = Some(String::new());
                    state = State::ScanDefault;
                } else if ch == '}' {
                    out.push_str(&commit(&name, vars, default.take()));
                    state = State::Copy;
                } else {
                    return Err(CoreError::VariableExpansion(format!(
                        "illegal character '{ch}' in variable name starting with '{name}'"
                    )));
                }
            }
            State::ScanDefault => {
                if ch == '}' {
                    out.push_str(&commit(&name, vars, default.take()));
                    state = State::Copy;
                } else {
                    let d = default.get_or_insert_with(String::new);
                    // The surrounding text is JSON/YAML; keep quotes intact.
                    if ch == '"' {
                        d.push('\\');
                    }
                    d.push(ch);
                }
            }
        }
    }

    match state {
        State::Copy => Ok(out),
        State::Backslash => {
            out.push('\\');
            Ok(out)
        }
        State::Dollar => {
            out.push('$');
            Ok(out)
        }
        _ => Err(CoreError::VariableExpansion(format!(
            "variable '{name}' not terminated with '}}'"
        ))),
    }
}

fn commit(name: &str, vars: &Variables, mut default: Option<String>) -> String {
    // A `$ENVVAR` default is resolved from the environment.
    if let Some(d) = &default {
        if let Some(envname) = d.strip_prefix('$') {
            if let Ok(v) = std::env::var(envname) {
                default = Some(v);
            }
        }
    }
    lookup(name, vars, default.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_expand_from_map() {
        let v = vars(&[("PORT", "9090")]);
        assert_eq!(expand_variables("port: ${PORT,8080}", &v).unwrap(), "port: 9090");
    }

    #[test]
    fn test_expand_default() {
        let v = Variables::new();
        assert_eq!(
            expand_variables("port: ${CARAVEL_TEST_UNSET_PORT,8080}", &v).unwrap(),
            "port: 8080"
        );
    }

    #[test]
    fn test_expand_missing_is_empty() {
        let v = Variables::new();
        assert_eq!(expand_variables("x${CARAVEL_TEST_UNSET_X}y", &v).unwrap(), "xy");
    }

    #[test]
    fn test_expand_env_default() {
        // The variable name is namespaced to avoid cross-test collisions.
        std::env::set_var("CARAVEL_TEST_FALLBACK", "from-env");
        let v = Variables::new();
        assert_eq!(
            expand_variables("${CARAVEL_TEST_UNSET_A,$CARAVEL_TEST_FALLBACK}", &v).unwrap(),
            "from-env"
        );
    }

    #[test]
    fn test_backslash_escapes_dollar() {
        let v = vars(&[("X", "1")]);
        assert_eq!(expand_variables(r"\${X}", &v).unwrap(), "${X}");
        // A backslash before anything else stays literal.
        assert_eq!(expand_variables(r"a\nb", &v).unwrap(), r"a\nb");
    }

    #[test]
    fn test_idempotent_when_no_tokens_remain() {
        let v = vars(&[("NAME", "web")]);
        let once = expand_variables("app: ${NAME}", &v).unwrap();
        let twice = expand_variables(&once, &v).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unterminated_token() {
        let v = Variables::new();
        let err = expand_variables("${OPEN", &v).unwrap_err();
        assert!(err.to_string().contains("not terminated"));
    }

    #[test]
    fn test_illegal_name_character() {
        let v = Variables::new();
        let err = expand_variables("${BAD NAME}", &v).unwrap_err();
        assert!(err.to_string().contains("illegal character"));
    }

    #[test]
    fn test_quote_in_default_is_escaped() {
        let v = Variables::new();
        assert_eq!(
            expand_variables(r#"${CARAVEL_TEST_UNSET_B,a"b}"#, &v).unwrap(),
            r#"a\"b"#
        );
    }
}
