//! Response normalization and structural JSON diffing

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a diff segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    /// Present in both renderings
    Unchanged,
    /// Present only on the right side
    Added,
    /// Present only on the left side
    Removed,
}

/// One run of consecutive lines sharing a kind.
///
/// `value` holds the lines joined with `\n`, no trailing newline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSegment {
    /// Segment kind
    pub kind: DiffKind,
    /// Segment text
    pub value: String,
}

/// Strip ignored fields from a JSON value, at any depth.
///
/// Objects lose keys named in `ignore_fields`, arrays recurse element-wise
/// and scalars pass through. The input is never modified; applying the
/// result again is a no-op.
#[must_use]
pub fn normalize(value: &Value, ignore_fields: &[String]) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, val) in map {
                if ignore_fields.iter().any(|f| f == key) {
                    continue;
                }
                out.insert(key.clone(), normalize(val, ignore_fields));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| normalize(v, ignore_fields)).collect())
        }
        other => other.clone(),
    }
}

/// Structural diff of two JSON values.
///
/// Both values are rendered as canonical pretty-printed JSON (object keys
/// sort, so key order never produces a difference) and the line sequences
/// are compared. Two identical values yield exactly one `Unchanged`
/// segment, never an empty list.
#[must_use]
pub fn diff(left: &Value, right: &Value) -> Vec<DiffSegment> {
    let left_lines = canonical_lines(left);
    let right_lines = canonical_lines(right);

    merge_segments(diff_lines(&left_lines, &right_lines))
}

/// Whether a segment list contains any added or removed segment.
///
/// This is the match test: a single `Unchanged` segment means the values
/// were identical, so the test is on segment kinds, not segment count.
#[must_use]
pub fn has_changes(segments: &[DiffSegment]) -> bool {
    segments.iter().any(|s| s.kind != DiffKind::Unchanged)
}

/// Parse a response body as JSON.
///
/// A body that is not valid JSON is treated as one opaque string value, so
/// plain-text responses still compare byte-for-byte.
#[must_use]
pub fn parse_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Canonical pretty-printed rendering, one line per element.
///
/// serde_json object maps iterate in key order, which makes the rendering
/// deterministic.
fn canonical_lines(value: &Value) -> Vec<String> {
    let text = serde_json::to_string_pretty(value).unwrap_or_default();
    text.lines().map(ToString::to_string).collect()
}

/// Line-level LCS diff with removed-before-added ordering inside a hunk
fn diff_lines(left: &[String], right: &[String]) -> Vec<(DiffKind, String)> {
    // Trim the common prefix and suffix before the quadratic part
    let mut prefix = 0;
    while prefix < left.len() && prefix < right.len() && left[prefix] == right[prefix] {
        prefix += 1;
    }

    let mut suffix = 0;
    while suffix < left.len() - prefix
        && suffix < right.len() - prefix
        && left[left.len() - 1 - suffix] == right[right.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let l = &left[prefix..left.len() - suffix];
    let r = &right[prefix..right.len() - suffix];

    let mut ops = Vec::with_capacity(left.len() + right.len());
    for line in &left[..prefix] {
        ops.push((DiffKind::Unchanged, line.clone()));
    }
    ops.extend(diff_middle(l, r));
    for line in &left[left.len() - suffix..] {
        ops.push((DiffKind::Unchanged, line.clone()));
    }

    ops
}

/// LCS table and backtrack over the non-common middle
fn diff_middle(l: &[String], r: &[String]) -> Vec<(DiffKind, String)> {
    let mut table = vec![vec![0usize; r.len() + 1]; l.len() + 1];
    for i in 1..=l.len() {
        for j in 1..=r.len() {
            table[i][j] = if l[i - 1] == r[j - 1] {
                table[i - 1][j - 1] + 1
            } else {
                table[i - 1][j].max(table[i][j - 1])
            };
        }
    }

    // Collected back-to-front, reversed at the end. Consuming the added
    // side first here puts removals before additions in the output.
    let mut ops = Vec::with_capacity(l.len() + r.len());
    let (mut i, mut j) = (l.len(), r.len());

    while i > 0 && j > 0 {
        if l[i - 1] == r[j - 1] {
            ops.push((DiffKind::Unchanged, l[i - 1].clone()));
            i -= 1;
            j -= 1;
        } else if table[i][j - 1] >= table[i - 1][j] {
            ops.push((DiffKind::Added, r[j - 1].clone()));
            j -= 1;
        } else {
            ops.push((DiffKind::Removed, l[i - 1].clone()));
            i -= 1;
        }
    }
    while j > 0 {
        ops.push((DiffKind::Added, r[j - 1].clone()));
        j -= 1;
    }
    while i > 0 {
        ops.push((DiffKind::Removed, l[i - 1].clone()));
        i -= 1;
    }

    ops.reverse();
    ops
}

/// Merge consecutive lines of the same kind into segments
fn merge_segments(ops: Vec<(DiffKind, String)>) -> Vec<DiffSegment> {
    let mut segments: Vec<DiffSegment> = Vec::new();

    for (kind, line) in ops {
        match segments.last_mut() {
            Some(last) if last.kind == kind => {
                last.value.push('\n');
                last.value.push_str(&line);
            }
            _ => segments.push(DiffSegment { kind, value: line }),
        }
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    fn contains_key(value: &Value, key: &str) -> bool {
        match value {
            Value::Object(map) => {
                map.contains_key(key) || map.values().any(|v| contains_key(v, key))
            }
            Value::Array(items) => items.iter().any(|v| contains_key(v, key)),
            _ => false,
        }
    }

    #[test]
    fn test_normalize_strips_top_level() {
        let value = json!({"id": 1, "name": "a", "updatedAt": "2024-01-01"});
        let normalized = normalize(&value, &fields(&["updatedAt"]));

        assert_eq!(normalized, json!({"id": 1, "name": "a"}));
    }

    #[test]
    fn test_normalize_strips_nested() {
        let value = json!({
            "items": [
                {"id": 1, "meta": {"ts": 100, "source": "x"}},
                {"id": 2, "meta": {"ts": 200, "source": "y"}}
            ],
            "ts": 300
        });
        let normalized = normalize(&value, &fields(&["ts"]));

        assert!(!contains_key(&normalized, "ts"));
        assert!(contains_key(&normalized, "source"));
        assert_eq!(normalized["items"][0]["id"], json!(1));
    }

    #[test]
    fn test_normalize_scalars_pass_through() {
        let ignore = fields(&["anything"]);
        assert_eq!(normalize(&json!(42), &ignore), json!(42));
        assert_eq!(normalize(&json!("text"), &ignore), json!("text"));
        assert_eq!(normalize(&json!(null), &ignore), json!(null));
        assert_eq!(normalize(&json!([1, 2]), &ignore), json!([1, 2]));
    }

    #[test]
    fn test_normalize_does_not_mutate_input() {
        let value = json!({"keep": 1, "drop": 2});
        let before = value.clone();

        let _ = normalize(&value, &fields(&["drop"]));

        assert_eq!(value, before);
    }

    #[test]
    fn test_normalize_empty_ignore_is_identity() {
        let value = json!({"a": [{"b": {"c": 3}}]});
        assert_eq!(normalize(&value, &[]), value);
    }

    #[test]
    fn test_diff_identical_single_unchanged() {
        let value = json!({"a": 1, "b": [1, 2, 3]});
        let segments = diff(&value, &value);

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].kind, DiffKind::Unchanged);
        assert!(!has_changes(&segments));
    }

    #[test]
    fn test_diff_key_order_insensitive() {
        let left: Value = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        let right: Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();

        let segments = diff(&left, &right);

        assert!(!has_changes(&segments));
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn test_diff_changed_value() {
        let left = json!({"a": 1, "b": 2});
        let right = json!({"a": 1, "b": 3});

        let segments = diff(&left, &right);

        assert!(has_changes(&segments));
        assert!(segments.iter().any(|s| s.kind == DiffKind::Removed));
        assert!(segments.iter().any(|s| s.kind == DiffKind::Added));

        let removed: Vec<_> = segments
            .iter()
            .filter(|s| s.kind == DiffKind::Removed)
            .collect();
        assert!(removed[0].value.contains("\"b\": 2"));
    }

    #[test]
    fn test_diff_added_field_only() {
        let left = json!({"a": 1});
        let right = json!({"a": 1, "b": 2});

        let segments = diff(&left, &right);

        assert!(has_changes(&segments));
        assert!(segments.iter().any(|s| s.kind == DiffKind::Added));
    }

    #[test]
    fn test_diff_removed_before_added_in_hunk() {
        let left = json!({"x": "old"});
        let right = json!({"x": "new"});

        let segments = diff(&left, &right);
        let kinds: Vec<DiffKind> = segments.iter().map(|s| s.kind).collect();

        let removed_pos = kinds.iter().position(|k| *k == DiffKind::Removed).unwrap();
        let added_pos = kinds.iter().position(|k| *k == DiffKind::Added).unwrap();
        assert!(removed_pos < added_pos);
    }

    #[test]
    fn test_diff_merges_consecutive_lines() {
        let left = json!({"a": 1});
        let right = json!({"b": {"c": 2, "d": 3}});

        let segments = diff(&left, &right);

        // Multi-line additions collapse into single segments
        let added: Vec<_> = segments
            .iter()
            .filter(|s| s.kind == DiffKind::Added)
            .collect();
        assert!(added.iter().any(|s| s.value.contains('\n')));
    }

    #[test]
    fn test_diff_ignored_field_then_match() {
        let left = json!({"data": [1, 2], "requestId": "aaa"});
        let right = json!({"data": [1, 2], "requestId": "bbb"});
        let ignore = fields(&["requestId"]);

        let raw = diff(&left, &right);
        assert!(has_changes(&raw));

        let segments = diff(&normalize(&left, &ignore), &normalize(&right, &ignore));
        assert!(!has_changes(&segments));
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(parse_body("[1,2]"), json!([1, 2]));
        assert_eq!(parse_body("plain text"), json!("plain text"));
        assert_eq!(parse_body(""), json!(""));
    }

    #[test]
    fn test_segment_wire_format() {
        let segment = DiffSegment {
            kind: DiffKind::Added,
            value: "+line".to_string(),
        };
        let json = serde_json::to_string(&segment).unwrap();

        assert_eq!(json, r#"{"kind":"added","value":"+line"}"#);
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| Value::Number(n.into())),
            "[a-z0-9]{0,8}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_normalize_idempotent(
            value in arb_json(),
            ignore in prop::collection::vec("[a-z]{1,6}", 0..3),
        ) {
            let once = normalize(&value, &ignore);
            let twice = normalize(&once, &ignore);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_normalize_strips_injected_key(value in arb_json()) {
            // "stripped" cannot be generated by arb_json (too long), so
            // the only occurrence is the injected one
            let wrapped = json!({"keep": value, "stripped": true});
            let normalized = normalize(&wrapped, &fields(&["stripped"]));
            prop_assert!(!contains_key(&normalized, "stripped"));
            prop_assert!(normalized.get("keep").is_some());
        }

        #[test]
        fn prop_diff_identical_is_single_segment(value in arb_json()) {
            let segments = diff(&value, &value);
            prop_assert_eq!(segments.len(), 1);
            prop_assert!(!has_changes(&segments));
        }

        #[test]
        fn prop_diff_reconstructs_both_sides(a in arb_json(), b in arb_json()) {
            let segments = diff(&a, &b);

            let left: Vec<String> = segments
                .iter()
                .filter(|s| s.kind != DiffKind::Added)
                .flat_map(|s| s.value.split('\n').map(ToString::to_string))
                .collect();
            let right: Vec<String> = segments
                .iter()
                .filter(|s| s.kind != DiffKind::Removed)
                .flat_map(|s| s.value.split('\n').map(ToString::to_string))
                .collect();

            prop_assert_eq!(left, canonical_lines(&a));
            prop_assert_eq!(right, canonical_lines(&b));
        }
    }
}
