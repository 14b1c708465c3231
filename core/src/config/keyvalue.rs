use super::ConfigError;

/// One `key=value` line with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub line: usize,
    pub key: String,
    pub value: String,
}

/// Splits text into entries, skipping blank lines and `#` comments.
pub fn parse_entries(text: &str) -> Result<Vec<Entry>, ConfigError> {
    let mut entries = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Malformed {
            line: idx + 1,
            text: line.to_string(),
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::Malformed {
                line: idx + 1,
                text: line.to_string(),
            });
        }
        entries.push(Entry {
            line: idx + 1,
            key: key.to_string(),
            value: value.trim().to_string(),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let entries = parse_entries("# header\n\n block_radius = 3 \n#x=1\nout=a=b\n").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "block_radius");
        assert_eq!(entries[0].value, "3");
        assert_eq!(entries[0].line, 3);
        assert_eq!(entries[1].value, "a=b");
    }

    #[test]
    fn line_without_separator_is_rejected_with_line_number() {
        let err = parse_entries("a=1\nnonsense\n").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { line: 2, .. }));
    }
}
