//! Splitting of command arguments into positional and named options.

use std::collections::HashMap;

/// Arguments of a command line.
///
/// `key=value` tokens become named options and are removed before the
/// rest is split into positional options on whitespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandArgs {
    pub positional: Vec<String>,
    pub named: HashMap<String, String>,
}

impl CommandArgs {
    pub fn parse(raw: &str) -> Self {
        let mut args = CommandArgs::default();

        for token in raw.split_whitespace() {
            match named_option(token) {
                Some((key, value)) => {
                    args.named.insert(key.to_string(), value.to_string());
                }
                None => args.positional.push(token.to_string()),
            }
        }
        args
    }

    /// Positional option at `index`.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.positional.get(index).map(String::as_str)
    }

    /// Positional options from `index` on, joined by single spaces.
    pub fn rest(&self, index: usize) -> String {
        self.positional
            .get(index..)
            .map(|rest| rest.join(" "))
            .unwrap_or_default()
    }

    pub fn named(&self, key: &str) -> Option<&str> {
        self.named.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

fn named_option(token: &str) -> Option<(&str, &str)> {
    let (key, value) = token.split_once('=')?;
    let is_word = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_');
    if is_word(key) && is_word(value) {
        Some((key, value))
    } else {
        None
    }
}

/// Split a prefixed command line into `(name, raw arguments)`.
///
/// Returns `None` when the line does not start with `prefix` or has no name.
pub fn split_command_line(text: &str, prefix: char) -> Option<(&str, &str)> {
    let body = text.strip_prefix(prefix)?;
    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body.trim_end(), ""),
    };
    if name.is_empty() {
        None
    } else {
        Some((name, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_only() {
        let args = CommandArgs::parse("paris  tomorrow");
        assert_eq!(args.positional, vec!["paris", "tomorrow"]);
        assert!(args.named.is_empty());
    }

    #[test]
    fn test_named_options_are_stripped() {
        let args = CommandArgs::parse("100 eur usd precision=2");
        assert_eq!(args.positional, vec!["100", "eur", "usd"]);
        assert_eq!(args.named("precision"), Some("2"));
    }

    #[test]
    fn test_non_word_equals_stays_positional() {
        let args = CommandArgs::parse("1+1=2 a= =b");
        assert_eq!(args.positional, vec!["1+1=2", "a=", "=b"]);
        assert!(args.named.is_empty());
    }

    #[test]
    fn test_rest_joins_tail() {
        let args = CommandArgs::parse("#chan hello   there world");
        assert_eq!(args.get(0), Some("#chan"));
        assert_eq!(args.rest(1), "hello there world");
        assert_eq!(args.rest(10), "");
    }

    #[test]
    fn test_split_command_line() {
        assert_eq!(split_command_line("!help", '!'), Some(("help", "")));
        assert_eq!(split_command_line("!msg #c hi all", '!'), Some(("msg", "#c hi all")));
        assert_eq!(split_command_line("! help", '!'), None);
        assert_eq!(split_command_line("!", '!'), None);
        assert_eq!(split_command_line("help", '!'), None);
    }
}
