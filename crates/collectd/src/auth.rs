use crate::PasswordLookup;
use std::collections::HashMap;
use std::path::Path;

/// Password lookup backed by a collectd auth file: one `username: password`
/// per line, `#` comments. The file is read once at service open.
pub struct AuthFile {
    entries: HashMap<String, String>,
}

impl AuthFile {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let (username, password) = line.split_once(':')?;
                Some((username.trim().to_string(), password.trim().to_string()))
            })
            .collect();

        Self { entries }
    }
}

impl PasswordLookup for AuthFile {
    fn password(&self, username: &str) -> Option<String> {
        self.entries.get(username).cloned()
    }
}
