//! # Named-argument mapping.
//!
//! Commands are called by name (`key=value`), but handlers receive their arguments
//! positionally in declaration order. [`map_named_args`] bridges the two.
//!
//! ## Rules
//! - Output order follows the declared order, never the map's order.
//! - Missing names become `None` (absent); the handler validates what it requires.
//! - Names the handler does not declare are dropped.

use serde_json::{Map, Value};

/// Named arguments supplied per invocation.
pub type NamedArgs = Map<String, Value>;

/// Invocation options (output preferences, log level, ...) visible through [`Context`](crate::Context).
pub type Options = Map<String, Value>;

/// Positional arguments; `None` marks an absent value.
pub type Positional = Vec<Option<Value>>;

/// Maps `named` onto the declared parameter `order`.
///
/// Never fails.
///
/// # Example
/// ```
/// use cmdvisor::map_named_args;
/// use serde_json::json;
///
/// let named = json!({"a": 1, "b": 2});
/// let args = map_named_args(named.as_object().unwrap(), &["b", "a"]);
/// assert_eq!(args, vec![Some(json!(2)), Some(json!(1))]);
///
/// let named = json!({"a": 1});
/// let args = map_named_args(named.as_object().unwrap(), &["a", "b"]);
/// assert_eq!(args, vec![Some(json!(1)), None]);
/// ```
pub fn map_named_args<S: AsRef<str>>(named: &NamedArgs, order: &[S]) -> Positional {
    order
        .iter()
        .map(|name| named.get(name.as_ref()).cloned())
        .collect()
}

/// Builds [`NamedArgs`] from `name=value` words.
///
/// The value is everything after the first `=` and stays a string. A word without
/// `=` maps its name to `null`. Later words win over earlier ones.
pub fn parse_named_args<I, S>(words: I) -> NamedArgs
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut named = NamedArgs::new();
    for word in words {
        let word = word.as_ref();
        match word.split_once('=') {
            Some((name, value)) => {
                named.insert(name.to_string(), Value::String(value.to_string()));
            }
            None => {
                named.insert(word.to_string(), Value::Null);
            }
        }
    }
    named
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn named(v: Value) -> NamedArgs {
        match v {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[test]
    fn follows_declared_order() {
        let args = map_named_args(&named(json!({"a": 1, "b": 2})), &["b", "a"]);
        assert_eq!(args, vec![Some(json!(2)), Some(json!(1))]);
    }

    #[test]
    fn missing_names_are_absent() {
        let args = map_named_args(&named(json!({"a": 1})), &["a", "b"]);
        assert_eq!(args, vec![Some(json!(1)), None]);
    }

    #[test]
    fn extra_names_are_dropped() {
        let args = map_named_args(&named(json!({"a": 1, "zzz": true})), &["a"]);
        assert_eq!(args, vec![Some(json!(1))]);
    }

    #[test]
    fn explicit_null_is_not_absent() {
        let args = map_named_args(&named(json!({"a": null})), &["a"]);
        assert_eq!(args, vec![Some(Value::Null)]);
    }

    #[test]
    fn empty_order_yields_nothing() {
        let order: [&str; 0] = [];
        assert!(map_named_args(&named(json!({"a": 1})), &order).is_empty());
    }

    #[test]
    fn parses_name_value_words() {
        let args = parse_named_args(["user=ada", "filter=a=b", "verbose", "user=grace"]);
        assert_eq!(args.get("user"), Some(&json!("grace")));
        assert_eq!(args.get("filter"), Some(&json!("a=b")));
        assert_eq!(args.get("verbose"), Some(&Value::Null));
        assert_eq!(args.len(), 3);
    }
}
