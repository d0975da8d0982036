//! Configuration loading: a TOML document describing the watch set.
//!
//! Grammar is intentionally minimal: one `[[watch]]` table per watch, deserialized directly into
//! `Watch`. Beyond deserialization, the module's only job is enforcing the invariants the core
//! requires (non-empty name, non-empty `start`, unique names).

use crate::error::SupervisorError;
use crate::watch::Watch;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize)]
struct Document {
    #[serde(default, rename = "watch")]
    watches: Vec<Watch>,
}

pub fn load(path: &Path) -> Result<Vec<Watch>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("{}: failed to read config", path.display()))?;
    let doc: Document = toml::from_str(&text)
        .with_context(|| format!("{}: failed to parse config", path.display()))?;

    for watch in &doc.watches {
        watch.validate().map_err(|e: SupervisorError| anyhow::anyhow!(e))?;
    }

    let mut seen = std::collections::HashSet::new();
    for watch in &doc.watches {
        if !seen.insert(watch.name.clone()) {
            return Err(anyhow::anyhow!(SupervisorError::DuplicateWatch(
                watch.name.clone()
            )));
        }
    }

    Ok(doc.watches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_a_minimal_watch() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[watch]]
            name = "w"
            start = ["/bin/sleep", "60"]
            "#
        )
        .unwrap();

        let watches = load(file.path()).unwrap();
        assert_eq!(watches.len(), 1);
        assert_eq!(watches[0].name, "w");
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[watch]]
            name = "w"
            start = ["/bin/true"]

            [[watch]]
            name = "w"
            start = ["/bin/false"]
            "#
        )
        .unwrap();

        assert!(load(file.path()).is_err());
    }

    #[test]
    fn rejects_empty_start() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[watch]]
            name = "w"
            start = []
            "#
        )
        .unwrap();

        assert!(load(file.path()).is_err());
    }
}
