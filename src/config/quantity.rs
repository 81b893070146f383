/*!
 * Quantity Parsing
 * Byte quantities ("1G", "512M") and command-line splitting for `args`
 */

use crate::core::types::Bytes;

/// Parse a byte quantity.
///
/// Plain integers are bytes. `K`, `M` and `G` suffixes are binary multiples
/// and may be followed by `B` or `iB`; case is ignored. Zero is rejected.
pub fn parse_byte_quantity(input: &str) -> Result<Bytes, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("empty quantity".to_string());
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split);
    if digits.is_empty() {
        return Err(format!("`{}` does not start with a number", trimmed));
    }

    let value: Bytes = digits
        .parse()
        .map_err(|_| format!("`{}` is out of range", digits))?;

    let suffix = suffix.trim().to_ascii_lowercase();
    let unit = suffix
        .strip_suffix("ib")
        .or_else(|| suffix.strip_suffix('b'))
        .unwrap_or(&suffix);

    let multiplier: Bytes = match unit {
        "" => 1,
        "k" => 1 << 10,
        "m" => 1 << 20,
        "g" => 1 << 30,
        _ => return Err(format!("unknown unit `{}` (use K, M or G)", suffix)),
    };

    let bytes = value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("`{}` overflows", trimmed))?;

    if bytes == 0 {
        return Err("quantity must be greater than zero".to_string());
    }

    Ok(bytes)
}

/// Split a command line into arguments.
///
/// Whitespace separates arguments; single and double quotes group text.
/// No escapes or expansion, nothing is handed to a shell.
pub fn split_command_line(line: &str) -> Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_arg = true;
            }
            None if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            None => {
                current.push(c);
                in_arg = true;
            }
        }
    }

    if let Some(q) = quote {
        return Err(format!("unterminated {} quote", q));
    }
    if in_arg {
        args.push(current);
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_suffixes() {
        assert_eq!(parse_byte_quantity("1G"), Ok(1 << 30));
        assert_eq!(parse_byte_quantity("512M"), Ok(512 << 20));
        assert_eq!(parse_byte_quantity("200k"), Ok(200 << 10));
        assert_eq!(parse_byte_quantity("2GB"), Ok(2 << 30));
        assert_eq!(parse_byte_quantity("3MiB"), Ok(3 << 20));
        assert_eq!(parse_byte_quantity("4096"), Ok(4096));
        assert_eq!(parse_byte_quantity(" 1 G "), Ok(1 << 30));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_byte_quantity("").is_err());
        assert!(parse_byte_quantity("G").is_err());
        assert!(parse_byte_quantity("1T").is_err());
        assert!(parse_byte_quantity("0M").is_err());
        assert!(parse_byte_quantity("-1G").is_err());
        assert!(parse_byte_quantity("99999999999999999999G").is_err());
    }

    #[test]
    fn test_split_plain() {
        assert_eq!(split_command_line("start").unwrap(), vec!["start"]);
        assert_eq!(
            split_command_line("  run   build --prod ").unwrap(),
            vec!["run", "build", "--prod"]
        );
        assert!(split_command_line("   ").unwrap().is_empty());
    }

    #[test]
    fn test_split_quotes() {
        assert_eq!(
            split_command_line(r#"--name "my app" --tag 'a b' """#).unwrap(),
            vec!["--name", "my app", "--tag", "a b", ""]
        );
        assert!(split_command_line("\"open").is_err());
    }

    proptest! {
        #[test]
        fn prop_megabytes_scale(n in 1u64..1_000_000) {
            prop_assert_eq!(parse_byte_quantity(&format!("{}M", n)), Ok(n * 1024 * 1024));
            prop_assert_eq!(parse_byte_quantity(&format!("{}m", n)), Ok(n * 1024 * 1024));
        }

        #[test]
        fn prop_split_words_roundtrip(words in proptest::collection::vec("[a-z0-9_-]{1,8}", 0..6)) {
            let line = words.join(" ");
            prop_assert_eq!(split_command_line(&line).unwrap(), words);
        }
    }
}
