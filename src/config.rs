use std::{collections::BTreeMap, fs, io, path::Path};

use crate::error::ConfigError;

/// Parameters read from a `NAME = VALUE` configuration file.
#[derive(Debug, Default)]
pub struct Config {
    params: BTreeMap<String, String>,
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'
}

impl Config {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Config::parse(&text, &path.display().to_string())
    }

    pub fn parse(text: &str, path: &str) -> Result<Self, ConfigError> {
        let mut params = BTreeMap::new();
        let mut duplicate: Option<String> = None;
        let syntax_error = |line| ConfigError::Syntax {
            path: path.to_owned(),
            line,
        };

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let body = raw.split('#').next().unwrap_or("").trim();
            if body.is_empty() {
                continue;
            }

            let name_len = body.find(|ch: char| !is_name_char(ch)).unwrap_or(body.len());
            let (name, rest) = body.split_at(name_len);
            // A name has to be followed by whitespace or '='
            if name.is_empty() || !rest.starts_with(|ch: char| ch.is_whitespace() || ch == '=') {
                return Err(syntax_error(line));
            }
            if !name.starts_with(|ch: char| ch.is_ascii_alphabetic() || ch == '_') {
                return Err(syntax_error(line));
            }
            let Some(value) = rest.trim_start().strip_prefix('=') else {
                return Err(syntax_error(line));
            };

            if params.contains_key(name) {
                duplicate.get_or_insert_with(|| name.to_owned());
                continue;
            }
            params.insert(name.to_owned(), value.trim().to_owned());
        }

        if let Some(name) = duplicate {
            return Err(ConfigError::Duplicate {
                path: path.to_owned(),
                name,
            });
        }
        Ok(Config { params })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// `Ok(None)` when the parameter is absent, `Err` when it is not a
    /// decimal integer.
    pub fn get_int(&self, name: &str) -> Result<Option<i32>, std::num::ParseIntError> {
        self.get(name).map(str::parse).transpose()
    }

    /// Looks up a parameter that must be present.
    pub fn require(&self, prefix: Option<&str>, name: &str) -> Result<&str, ConfigError> {
        let full = param_name(prefix, name);
        self.get(&full).ok_or(ConfigError::Undefined(full))
    }

    /// Looks up a required integer parameter and checks it with `valid`.
    pub fn require_int(
        &self,
        prefix: Option<&str>,
        name: &str,
        valid: impl FnOnce(i32) -> bool,
    ) -> Result<i32, ConfigError> {
        let full = param_name(prefix, name);
        match self.get_int(&full) {
            Ok(Some(value)) if valid(value) => Ok(value),
            Ok(Some(_)) | Err(_) => Err(ConfigError::Invalid(full)),
            Ok(None) => Err(ConfigError::Undefined(full)),
        }
    }

    pub fn print(&self, out: &mut dyn io::Write) -> io::Result<()> {
        for (name, value) in &self.params {
            writeln!(out, "{name} = \"{value}\"")?;
        }
        Ok(())
    }
}

pub fn param_name(prefix: Option<&str>, name: &str) -> String {
    format!("{}{}", prefix.unwrap_or(""), name)
}
