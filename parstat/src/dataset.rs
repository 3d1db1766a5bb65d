//! Dataset file ingestion.
//!
//! One sample per line; when a line carries several whitespace-separated
//! columns, the last column is the sample. Blank lines and `#` comment
//! lines are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};

pub fn load(path: &Path) -> Result<Vec<f32>> {
    let file =
        File::open(path).with_context(|| format!("failed to open dataset {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut values = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read dataset {}", path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some(token) = trimmed.split_whitespace().last() else {
            continue;
        };
        let value: f32 = token.parse().with_context(|| {
            format!("{}:{}: not a number: '{}'", path.display(), idx + 1, token)
        })?;
        values.push(value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn takes_the_last_column_and_skips_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# timestamp value").unwrap();
        writeln!(file, "17:00:01 1.5").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "17:00:02 -2.25").unwrap();
        writeln!(file, "42").unwrap();
        file.flush().unwrap();

        let values = load(file.path()).unwrap();
        assert_eq!(values, vec![1.5, -2.25, 42.0]);
    }

    #[test]
    fn reports_the_offending_line_on_parse_failure() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1.0").unwrap();
        writeln!(file, "abc").unwrap();
        file.flush().unwrap();

        let err = load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains(":2:"));
    }
}
