use std::collections::HashMap;

use super::CliError;

/// `--key value` options and bare `--flag` switches following a command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedArgs {
    values: HashMap<String, String>,
    flags: Vec<String>,
}

const SWITCHES: &[&str] = &["json"];

impl ParsedArgs {
    pub fn parse(argv: &[String]) -> Result<Self, CliError> {
        let mut parsed = Self::default();
        let mut iter = argv.iter();
        while let Some(raw) = iter.next() {
            let Some(name) = raw.strip_prefix("--") else {
                return Err(CliError::Input(format!("unexpected argument `{raw}`")));
            };
            if let Some((key, value)) = name.split_once('=') {
                parsed.values.insert(key.to_string(), value.to_string());
            } else if SWITCHES.contains(&name) {
                parsed.flags.push(name.to_string());
            } else {
                let value = iter
                    .next()
                    .ok_or_else(|| CliError::Input(format!("--{name} needs a value")))?;
                parsed.values.insert(name.to_string(), value.clone());
            }
        }
        Ok(parsed)
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn required(&self, key: &str) -> Result<&str, CliError> {
        self.value(key)
            .ok_or_else(|| CliError::Input(format!("missing --{key}")))
    }

    pub fn flag(&self, name: &str) -> bool {
        self.flags.iter().any(|flag| flag == name)
    }
}
