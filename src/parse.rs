//! Textual instance format.
//!
//! One line per chain position. Fields are separated by tabs or spaces; the
//! first field is the label and every following field is `key` or
//! `key:value` (the value defaults to 1.0). Inside a key, `\:` stands for a
//! colon and `\\` for a backslash. A blank line terminates an instance.

use crate::errors::{HashCrfError, Result};
use crate::store::Item;

fn parse_value(s: &str, line: usize) -> Result<f32> {
    let value: f32 = s
        .parse()
        .map_err(|_| HashCrfError::invalid_format(line, format!("invalid value: {s}")))?;
    if !value.is_finite() {
        return Err(HashCrfError::invalid_format(
            line,
            format!("non-finite value: {s}"),
        ));
    }
    if value == 0.0 && value.is_sign_negative() {
        return Err(HashCrfError::invalid_format(line, "negative zero"));
    }
    Ok(value)
}

/// Parses one `key` or `key:value` field.
///
/// `line` is the 1-based line number reported in errors.
///
/// # Errors
///
/// Returns [`HashCrfError::InvalidFormat`] for an empty key, a dangling or
/// unknown escape, or a value that is not a finite number other than `-0`.
pub fn parse_field(field: &str, line: usize) -> Result<(String, f32)> {
    let mut key = String::with_capacity(field.len());
    let mut chars = field.char_indices();
    let mut value = None;
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, c @ (':' | '\\'))) => key.push(c),
                Some((_, c)) => {
                    return Err(HashCrfError::invalid_format(
                        line,
                        format!("unknown escape: \\{c}"),
                    ))
                }
                None => return Err(HashCrfError::invalid_format(line, "dangling escape")),
            },
            ':' => {
                value = Some(&field[i + 1..]);
                break;
            }
            c => key.push(c),
        }
    }
    if key.is_empty() {
        return Err(HashCrfError::invalid_format(line, "empty key"));
    }
    let value = match value {
        Some(s) => parse_value(s, line)?,
        None => 1.0,
    };
    Ok((key, value))
}

/// Parses a whole document into instances of labeled items.
///
/// A trailing instance without a terminating blank line is kept.
///
/// # Errors
///
/// See [`parse_field`].
pub fn parse_instances(text: &str) -> Result<Vec<Vec<Item>>> {
    let mut instances = vec![];
    let mut items = vec![];
    for (i, line) in text.lines().enumerate() {
        let mut fields = line.split([' ', '\t']).filter(|f| !f.is_empty());
        let Some(label) = fields.next() else {
            if !items.is_empty() {
                instances.push(core::mem::take(&mut items));
            }
            continue;
        };
        let mut keys = vec![];
        let mut values = vec![];
        for field in fields {
            let (key, value) = parse_field(field, i + 1)?;
            keys.push(key);
            values.push(value);
        }
        items.push(Item::new(Some(label), keys, values));
    }
    if !items.is_empty() {
        instances.push(items);
    }
    Ok(instances)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_utils::item;

    #[test]
    fn test_parse_field() {
        assert_eq!(("w".to_string(), 1.0), parse_field("w", 1).unwrap());
        assert_eq!(("w".to_string(), 0.25), parse_field("w:0.25", 1).unwrap());
        assert_eq!(("a:b".to_string(), 2.0), parse_field("a\\:b:2", 1).unwrap());
        assert_eq!(("a\\".to_string(), 1.0), parse_field("a\\\\", 1).unwrap());
        assert_eq!(("x".to_string(), -3.0), parse_field("x:-3", 1).unwrap());
    }

    #[test]
    fn test_parse_field_rejects_bad_values() {
        for field in ["w:NaN", "w:inf", "w:-inf", "w:-0", "w:-0.0", "w:abc", "w:", ":1", "a\\", "a\\x"] {
            assert!(
                matches!(parse_field(field, 3), Err(HashCrfError::InvalidFormat(_))),
                "{field}"
            );
        }
        assert_eq!(
            "InvalidFormatError: line 3: negative zero",
            parse_field("w:-0", 3).unwrap_err().to_string()
        );
        assert_eq!(0.0, parse_field("w:0", 1).unwrap().1);
    }

    #[test]
    fn test_parse_instances() {
        let instances = parse_instances("A w=1\nB w=1\n\nC\tx:2  y\n").unwrap();
        assert_eq!(2, instances.len());
        assert_eq!(vec![item("A", &[("w=1", 1.0)]), item("B", &[("w=1", 1.0)])], instances[0]);
        assert_eq!(vec![item("C", &[("x", 2.0), ("y", 1.0)])], instances[1]);
    }

    #[test]
    fn test_parse_instances_blank_lines() {
        let instances = parse_instances("\n\nA\n  \n\nB\r\n").unwrap();
        assert_eq!(vec![vec![item("A", &[])], vec![item("B", &[])]], instances);
        assert!(parse_instances("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_instances_line_number() {
        let err = parse_instances("A w\n\nB w:NaN\n").unwrap_err();
        assert_eq!(
            "InvalidFormatError: line 3: non-finite value: NaN",
            err.to_string()
        );
    }
}
