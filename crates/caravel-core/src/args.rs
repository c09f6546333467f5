//! Per-component argument resolution
//!
//! A component's configuration is a flat string map. Local `args` always win;
//! ancestor `defaultArgs` fill in what is absent, walking from the component
//! up to the root. Two keys accumulate instead: `pod.args` and `pod.env`
//! concatenate every occurrence along the path, local value first.

use std::collections::BTreeMap;

use crate::error::{CoreError, Result};

/// A flat key/value argument map, ordered for stable output
pub type ArgMap = BTreeMap<String, String>;

/// Keys whose values accumulate along the path to the root
const ACCUMULATING_KEYS: [&str; 2] = ["pod.args", "pod.env"];

/// Merge a component's local args with the `defaultArgs` of its ancestors.
///
/// `ancestors` must be ordered nearest-first (parent before grandparent).
pub fn merge_args<'a>(local: &ArgMap, ancestors: impl Iterator<Item = &'a ArgMap>) -> ArgMap {
    let mut merged = local.clone();
    for defaults in ancestors {
        for (k, v) in defaults {
            if ACCUMULATING_KEYS.contains(&k.as_str()) {
                let slot = merged.entry(k.clone()).or_default();
                if !slot.is_empty() {
                    slot.push(' ');
                }
                slot.push_str(v);
            } else {
                merged.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
    }
    merged
}

/// Resolved arguments with typed accessors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveArgs(ArgMap);

impl EffectiveArgs {
    pub fn new(map: ArgMap) -> Self {
        Self(map)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw value, if present
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Raw value with a default
    pub fn get_or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or(default).to_string()
    }

    /// Boolean: accepts 1/0, true/false, yes/no
    pub fn get_bool(&self, name: &str) -> Result<Option<bool>> {
        match self.get(name) {
            None => Ok(None),
            Some("true") | Some("yes") | Some("1") => Ok(Some(true)),
            Some("false") | Some("no") | Some("0") => Ok(Some(false)),
            Some(other) => Err(CoreError::InvalidArgument {
                name: name.to_string(),
                value: other.to_string(),
                expected: "1|0|true|false|yes|no",
            }),
        }
    }

    /// Signed integer; empty values fall back to the default
    pub fn get_int(&self, name: &str, default: i64) -> Result<i64> {
        match self.get(name) {
            None | Some("") => Ok(default),
            Some(v) => v.parse().map_err(|_| CoreError::InvalidArgument {
                name: name.to_string(),
                value: v.to_string(),
                expected: "an integer",
            }),
        }
    }

    /// Unsigned size; empty values fall back to the default
    pub fn get_size(&self, name: &str, default: u64) -> Result<u64> {
        match self.get(name) {
            None | Some("") => Ok(default),
            Some(v) => v.parse().map_err(|_| CoreError::InvalidArgument {
                name: name.to_string(),
                value: v.to_string(),
                expected: "an unsigned integer",
            }),
        }
    }

    /// Whitespace-separated token list; single quotes protect a token
    pub fn get_string_list(&self, name: &str) -> Vec<String> {
        self.get(name).map(split_tokens).unwrap_or_default()
    }

    /// `NAME=value` / bare `NAME` tokens as ordered pairs; empty names dropped
    pub fn get_env_list(&self, name: &str) -> Vec<(String, String)> {
        self.get(name)
            .map(split_tokens)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tok| {
                let (n, v) = match tok.split_once('=') {
                    Some((n, v)) => (n.to_string(), v.to_string()),
                    None => (tok, String::new()),
                };
                (!n.is_empty()).then_some((n, v))
            })
            .collect()
    }

    /// Same tokens as a map; duplicates overwrite, empty keys dropped
    pub fn get_kv_map(&self, name: &str) -> BTreeMap<String, String> {
        self.get_env_list(name).into_iter().collect()
    }
}

/// Split a value into whitespace-separated tokens.
///
/// A single quote opens a token in which whitespace is literal; only a
/// closing quote terminates it. Whitespace only terminates unquoted tokens.
/// An unterminated quote is closed at end of input.
pub fn split_tokens(value: &str) -> Vec<String> {
    enum State {
        Skipping,
        InToken,
        InQuoted,
    }

    let mut out = Vec::new();
    let mut current = String::new();
    let mut state = State::Skipping;

    for ch in value.chars() {
        match state {
            State::Skipping => {
                if ch.is_whitespace() {
                    continue;
                }
                if ch == '\'' {
                    state = State::InQuoted;
                    continue;
                }
                state = State::InToken;
                current.push(ch);
            }
            State::InToken => {
                if ch.is_whitespace() {
                    out.push(std::mem::take(&mut current));
                    state = State::Skipping;
                    continue;
                }
                current.push(ch);
            }
            State::InQuoted => {
                if ch == '\'' {
                    out.push(std::mem::take(&mut current));
                    state = State::Skipping;
                    continue;
                }
                current.push(ch);
            }
        }
    }

    if !current.is_empty() {
        out.push(current);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> ArgMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_fill_if_absent() {
        let local = map(&[("image", "nginx")]);
        let parent = map(&[("image", "busybox"), ("replicas", "3")]);
        let root = map(&[("replicas", "5"), ("port", "80")]);

        let merged = merge_args(&local, [&parent, &root].into_iter());

        // Local wins; nearest ancestor wins over farther ones.
        assert_eq!(merged.get("image").unwrap(), "nginx");
        assert_eq!(merged.get("replicas").unwrap(), "3");
        assert_eq!(merged.get("port").unwrap(), "80");
    }

    #[test]
    fn test_merge_accumulates_pod_args() {
        let local = map(&[("pod.args", "--verbose")]);
        let parent = map(&[("pod.args", "--color")]);
        let root = map(&[("pod.args", "--log=json"), ("pod.env", "MODE=prod")]);

        let merged = merge_args(&local, [&parent, &root].into_iter());

        assert_eq!(merged.get("pod.args").unwrap(), "--verbose --color --log=json");
        assert_eq!(merged.get("pod.env").unwrap(), "MODE=prod");
    }

    #[test]
    fn test_merge_accumulation_without_local() {
        let local = ArgMap::new();
        let root = map(&[("pod.env", "A=1")]);
        let merged = merge_args(&local, [&root].into_iter());
        assert_eq!(merged.get("pod.env").unwrap(), "A=1");
    }

    #[test]
    fn test_get_bool() {
        let args = EffectiveArgs::new(map(&[
            ("a", "true"),
            ("b", "no"),
            ("c", "1"),
            ("d", "maybe"),
        ]));
        assert_eq!(args.get_bool("a").unwrap(), Some(true));
        assert_eq!(args.get_bool("b").unwrap(), Some(false));
        assert_eq!(args.get_bool("c").unwrap(), Some(true));
        assert_eq!(args.get_bool("missing").unwrap(), None);
        assert!(args.get_bool("d").is_err());
    }

    #[test]
    fn test_get_int() {
        let args = EffectiveArgs::new(map(&[("n", "42"), ("bad", "x"), ("empty", "")]));
        assert_eq!(args.get_int("n", 0).unwrap(), 42);
        assert_eq!(args.get_int("missing", 7).unwrap(), 7);
        assert_eq!(args.get_int("empty", 7).unwrap(), 7);
        assert!(args.get_int("bad", 0).is_err());
    }

    #[test]
    fn test_split_tokens_plain() {
        assert_eq!(split_tokens("a b  c"), vec!["a", "b", "c"]);
        assert_eq!(split_tokens("  a\tb\n"), vec!["a", "b"]);
        assert!(split_tokens("").is_empty());
    }

    #[test]
    fn test_split_tokens_quoted() {
        assert_eq!(split_tokens("'a b' c"), vec!["a b", "c"]);
        // A quote only terminates a quoted token; whitespace inside stays.
        assert_eq!(split_tokens("x 'hello world'"), vec!["x", "hello world"]);
        // Unterminated quote closes at end of input.
        assert_eq!(split_tokens("'open end"), vec!["open end"]);
    }

    #[test]
    fn test_env_list() {
        let args = EffectiveArgs::new(map(&[("pod.env", "A=1 B C=x=y =bad")]));
        let env = args.get_env_list("pod.env");
        assert_eq!(
            env,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), String::new()),
                ("C".to_string(), "x=y".to_string()),
            ]
        );
    }

    #[test]
    fn test_kv_map_duplicates_overwrite() {
        let args = EffectiveArgs::new(map(&[("labels", "a=1 a=2 b=3")]));
        let kv = args.get_kv_map("labels");
        assert_eq!(kv.get("a").unwrap(), "2");
        assert_eq!(kv.get("b").unwrap(), "3");
    }
}
