//! Catalog loading from JSON or TLE files

use crate::{LoaderError, Result};
use orbital_mechanics::OrbitalElementSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Load a catalog, picking the parser from the first non-blank character.
pub fn load_catalog(path: impl AsRef<Path>) -> Result<Vec<OrbitalElementSet>> {
    let path = path.as_ref();
    info!("Loading catalog from {:?}", path);

    let text = fs::read_to_string(path)?;
    let catalog = match text.trim_start().chars().next() {
        Some('[') | Some('{') => parse_json_catalog(&text)?,
        Some(_) => parse_tle_catalog(&text),
        None => return Err(LoaderError::EmptyCatalog),
    };

    if catalog.is_empty() {
        return Err(LoaderError::EmptyCatalog);
    }
    info!("Loaded {} element sets", catalog.len());
    Ok(catalog)
}

/// JSON catalog: a bare array of element sets, or an object with a
/// `satellites` array.
pub fn parse_json_catalog(json: &str) -> Result<Vec<OrbitalElementSet>> {
    let raw: serde_json::Value = serde_json::from_str(json)?;

    if let Some(satellites) = raw.get("satellites") {
        Ok(serde_json::from_value(satellites.clone())?)
    } else if raw.is_array() {
        Ok(serde_json::from_value(raw)?)
    } else {
        Err(LoaderError::UnknownLayout(
            "expected an array or an object with a `satellites` field".to_string(),
        ))
    }
}

/// TLE text. Groups without a name line are accepted; sets the `sgp4` crate
/// rejects are skipped with a warning.
pub fn parse_tle_catalog(text: &str) -> Vec<OrbitalElementSet> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect();

    let mut catalog = Vec::new();
    let mut skipped = 0;
    let mut i = 0;

    while i < lines.len() {
        let (name, line1, line2, consumed) = if is_tle_line(lines[i], '1') {
            match lines.get(i + 1) {
                Some(l2) => (None, lines[i], *l2, 2),
                None => break,
            }
        } else {
            match (lines.get(i + 1), lines.get(i + 2)) {
                (Some(l1), Some(l2)) => (Some(tle_name(lines[i])), *l1, *l2, 3),
                _ => break,
            }
        };

        if !is_tle_line(line1, '1') || !is_tle_line(line2, '2') {
            warn!("Malformed TLE group at line {}, resynchronizing", i + 1);
            skipped += 1;
            i += 1;
            continue;
        }

        match OrbitalElementSet::from_tle(name, line1, line2) {
            Ok(elements) => {
                debug!("Parsed {} ({})", elements.name, elements.id);
                catalog.push(elements);
            }
            Err(e) => {
                warn!("Skipping TLE at line {}: {}", i + 1, e);
                skipped += 1;
            }
        }
        i += consumed;
    }

    if skipped > 0 {
        warn!("{} TLE groups skipped", skipped);
    }
    catalog
}

fn is_tle_line(line: &str, number: char) -> bool {
    let mut chars = line.chars();
    chars.next() == Some(number) && chars.next() == Some(' ')
}

/// Name line, with the optional "0 " prefix some catalogs use.
fn tle_name(line: &str) -> String {
    line.strip_prefix("0 ").unwrap_or(line).trim().to_string()
}
