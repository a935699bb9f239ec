use std::path::Path;

use anyhow::{anyhow, bail, Context};
use toml::Value;

use crate::config::{AppConfig, DetectedSettings, ResolvedIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Get,
    Set,
    List,
    Reset,
    Validate,
}

/// Look up a dotted key such as `github.board.project_id`.
pub fn get_key<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.')
        .try_fold(root, |value, part| value.as_table()?.get(part))
}

/// Parse a command-line value as TOML, falling back to a plain string.
pub fn parse_value(raw: &str) -> Value {
    toml::from_str::<toml::Table>(&format!("v = {raw}"))
        .ok()
        .and_then(|mut table| table.remove("v"))
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

/// Set a dotted key, creating intermediate tables.
pub fn set_key(root: &mut Value, key: &str, value: Value) -> anyhow::Result<()> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        bail!("Invalid key: {key:?}");
    }
    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| anyhow!("Empty key"))?;

    let mut current = root;
    for part in parents {
        let table = current
            .as_table_mut()
            .ok_or_else(|| anyhow!("{key}: a parent of this key is not a table"))?;
        current = table
            .entry(part.to_string())
            .or_insert_with(|| Value::Table(toml::Table::new()));
    }
    current
        .as_table_mut()
        .ok_or_else(|| anyhow!("{key}: a parent of this key is not a table"))?
        .insert(last.to_string(), value);
    Ok(())
}

/// Every leaf as `key = value`, in key order.
pub fn flatten(root: &Value) -> Vec<(String, String)> {
    fn walk(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
        match value {
            Value::Table(table) => {
                for (k, v) in table {
                    let key = if prefix.is_empty() {
                        k.clone()
                    } else {
                        format!("{prefix}.{k}")
                    };
                    walk(&key, v, out);
                }
            }
            other => out.push((prefix.to_string(), other.to_string())),
        }
    }
    let mut out = Vec::new();
    walk("", root, &mut out);
    out.sort();
    out
}

/// Defaults everywhere except the project identity of `current`.
pub fn reset(current: &AppConfig) -> AppConfig {
    let identity = ResolvedIdentity::resolve(Some(current), &DetectedSettings::default());
    identity.apply(None)
}

fn read_document(path: &Path) -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("No configuration at {} (run `spindle init`)", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("{} is not valid TOML", path.display()))
}

pub fn run(path: &Path, mode: Mode, key: Option<&str>, value: Option<&str>) -> anyhow::Result<()> {
    match mode {
        Mode::List => {
            for (k, v) in flatten(&read_document(path)?) {
                println!("{k} = {v}");
            }
        }
        Mode::Get => {
            let key = key.ok_or_else(|| anyhow!("Missing key"))?;
            let document = read_document(path)?;
            let value = get_key(&document, key).ok_or_else(|| anyhow!("{key} is not set"))?;
            match value {
                Value::String(s) => println!("{s}"),
                other => println!("{other}"),
            }
        }
        Mode::Set => {
            let key = key.ok_or_else(|| anyhow!("Missing key"))?;
            let value = value.ok_or_else(|| anyhow!("Missing value"))?;
            let mut document = read_document(path)?;
            set_key(&mut document, key, parse_value(value))?;

            let rendered = toml::to_string_pretty(&document)?;
            AppConfig::from_toml_str(&rendered)
                .with_context(|| format!("Refusing to write: {key} = {value} breaks the configuration"))?;
            std::fs::write(path, rendered)?;
            println!("{key} = {value}");
        }
        Mode::Reset => {
            let current = AppConfig::from_toml_str(&std::fs::read_to_string(path)?)?;
            reset(&current).save(path)?;
            println!("Reset {} to defaults (project identity kept)", path.display());
        }
        Mode::Validate => {
            let config = AppConfig::load(Some(path))?;
            let problems = config.validate();
            if !problems.is_empty() {
                for problem in &problems {
                    println!("  - {problem}");
                }
                bail!("{} problem(s) in {}", problems.len(), path.display());
            }
            println!("{} is valid", path.display());
        }
    }
    Ok(())
}
