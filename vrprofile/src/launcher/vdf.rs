//! Valve's text key/value format, as used by `localconfig.vdf`.
//!
//! Parsing keeps entry order, duplicate keys and `[$WIN32]`-style
//! conditionals. [`Object::write`] renders untouched strings as they were
//! written, so parse-then-write only changes what was edited.

use std::fmt::Write as _;

use anyhow::Context;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    String(String),
    Object(Object),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Value,
    /// Platform conditional such as `$WIN32`, without brackets
    pub condition: Option<String>,
    /// A string value as read, with its escaped text
    raw: Option<(String, String)>,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            condition: None,
            raw: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Object {
    pub entries: Vec<Entry>,
}

impl Object {
    /// Child object by key, compared case-insensitively like Steam does.
    pub fn object(&self, key: &str) -> Option<&Object> {
        self.entries.iter().find_map(|e| match &e.value {
            Value::Object(o) if e.key.eq_ignore_ascii_case(key) => Some(o),
            _ => None,
        })
    }

    pub fn object_mut(&mut self, key: &str) -> Option<&mut Object> {
        self.entries.iter_mut().find_map(|e| match &mut e.value {
            Value::Object(o) if e.key.eq_ignore_ascii_case(key) => Some(o),
            _ => None,
        })
    }

    /// Child objects with their keys, in file order.
    pub fn objects(&self) -> impl Iterator<Item = (&str, &Object)> {
        self.entries.iter().filter_map(|e| match &e.value {
            Value::Object(o) => Some((e.key.as_str(), o)),
            Value::String(_) => None,
        })
    }

    /// Walks nested objects along `path`.
    pub fn path_mut(&mut self, path: &[&str]) -> Option<&mut Object> {
        path.iter()
            .try_fold(self, |object, key| object.object_mut(key))
    }

    pub fn path(&self, path: &[&str]) -> Option<&Object> {
        path.iter().try_fold(self, |object, key| object.object(key))
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.entries.iter().find_map(|e| match &e.value {
            Value::String(s) if e.key.eq_ignore_ascii_case(key) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Replaces the first string entry named `key`, appending it if missing.
    pub fn set_string(&mut self, key: &str, value: String) {
        for entry in self.entries.iter_mut() {
            if let Value::String(s) = &mut entry.value
                && entry.key.eq_ignore_ascii_case(key)
            {
                *s = value;
                return;
            }
        }
        self.entries.push(Entry::new(key, Value::String(value)));
    }

    pub fn write(&self) -> String {
        let mut out = String::new();
        write_object(&mut out, self, 0);
        out
    }
}

fn write_object(out: &mut String, object: &Object, depth: usize) {
    let indent = "\t".repeat(depth);
    for entry in &object.entries {
        let condition = entry
            .condition
            .as_ref()
            .map(|c| format!(" [{c}]"))
            .unwrap_or_default();
        match &entry.value {
            Value::String(s) => {
                let text = match &entry.raw {
                    Some((read, raw)) if read == s => raw.clone(),
                    _ => escape(s),
                };
                let _ = writeln!(
                    out,
                    "{indent}\"{}\"\t\t\"{text}\"{condition}",
                    escape(&entry.key)
                );
            }
            Value::Object(child) => {
                let _ = writeln!(out, "{indent}\"{}\"{condition}", escape(&entry.key));
                let _ = writeln!(out, "{indent}{{");
                write_object(out, child, depth + 1);
                let _ = writeln!(out, "{indent}}}");
            }
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Text { text: String, raw: String },
    Condition(String),
    Open,
    Close,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    peeked: Option<Token>,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            peeked: None,
            line: 1,
        }
    }

    fn next_token(&mut self) -> anyhow::Result<Option<Token>> {
        match self.peeked.take() {
            Some(token) => Ok(Some(token)),
            None => self.lex(),
        }
    }

    /// Consumes a conditional if one comes next.
    fn condition(&mut self) -> anyhow::Result<Option<String>> {
        if self.peeked.is_none() {
            self.peeked = self.lex()?;
        }
        match self.peeked.take() {
            Some(Token::Condition(c)) => Ok(Some(c)),
            other => {
                self.peeked = other;
                Ok(None)
            }
        }
    }

    fn lex(&mut self) -> anyhow::Result<Option<Token>> {
        loop {
            let Some(&(_, c)) = self.chars.peek() else {
                return Ok(None);
            };
            match c {
                '\n' => {
                    self.line += 1;
                    self.chars.next();
                }
                c if c.is_whitespace() || c == '\u{feff}' => {
                    self.chars.next();
                }
                '/' => {
                    self.chars.next();
                    match self.chars.next() {
                        Some((_, '/')) => self.skip_line(),
                        _ => anyhow::bail!("line {}: stray '/'", self.line),
                    }
                }
                '[' => {
                    self.chars.next();
                    let mut condition = String::new();
                    loop {
                        match self.chars.next() {
                            Some((_, ']')) => break,
                            Some((_, '\n')) | None => {
                                anyhow::bail!("line {}: unterminated conditional", self.line)
                            }
                            Some((_, c)) => condition.push(c),
                        }
                    }
                    return Ok(Some(Token::Condition(condition)));
                }
                '{' => {
                    self.chars.next();
                    return Ok(Some(Token::Open));
                }
                '}' => {
                    self.chars.next();
                    return Ok(Some(Token::Close));
                }
                '"' => {
                    self.chars.next();
                    return self.quoted().map(Some);
                }
                _ => return Ok(Some(self.bare())),
            }
        }
    }

    fn skip_line(&mut self) {
        for (_, c) in self.chars.by_ref() {
            if c == '\n' {
                self.line += 1;
                break;
            }
        }
    }

    fn quoted(&mut self) -> anyhow::Result<Token> {
        let start = self.line;
        let mut text = String::new();
        let mut raw = String::new();
        loop {
            match self.chars.next() {
                None => anyhow::bail!("line {start}: unterminated string"),
                Some((_, '"')) => return Ok(Token::Text { text, raw }),
                Some((_, '\\')) => {
                    let Some((_, escaped)) = self.chars.next() else {
                        anyhow::bail!("line {start}: unterminated string");
                    };
                    raw.push('\\');
                    raw.push(escaped);
                    match escaped {
                        'n' => text.push('\n'),
                        't' => text.push('\t'),
                        '\\' | '"' => text.push(escaped),
                        other => {
                            text.push('\\');
                            text.push(other);
                        }
                    }
                }
                Some((_, c)) => {
                    if c == '\n' {
                        self.line += 1;
                    }
                    text.push(c);
                    raw.push(c);
                }
            }
        }
    }

    fn bare(&mut self) -> Token {
        let mut text = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_whitespace() || matches!(c, '{' | '}' | '"' | '[') {
                break;
            }
            text.push(c);
            self.chars.next();
        }
        Token::Text {
            raw: escape(&text),
            text,
        }
    }
}

pub fn parse(input: &str) -> anyhow::Result<Object> {
    let mut lexer = Lexer::new(input);
    let root = parse_entries(&mut lexer, false)?;
    if root.entries.is_empty() {
        anyhow::bail!("no key/value entries found");
    }
    Ok(root)
}

fn parse_entries(lexer: &mut Lexer, nested: bool) -> anyhow::Result<Object> {
    let mut object = Object::default();
    loop {
        let key = match lexer.next_token()? {
            Some(Token::Text { text, .. }) => text,
            Some(Token::Close) if nested => return Ok(object),
            Some(Token::Close) => anyhow::bail!("line {}: unexpected '}}'", lexer.line),
            Some(Token::Open) => anyhow::bail!("line {}: '{{' without a key", lexer.line),
            Some(Token::Condition(_)) => {
                anyhow::bail!("line {}: conditional without a key", lexer.line)
            }
            None if nested => anyhow::bail!("line {}: missing '}}'", lexer.line),
            None => return Ok(object),
        };
        let line = lexer.line;
        let key_condition = lexer.condition()?;
        let mut entry = match lexer
            .next_token()?
            .with_context(|| format!("line {line}: key {key:?} has no value"))?
        {
            Token::Text { text, raw } => {
                let mut entry = Entry::new(key, Value::String(text.clone()));
                entry.raw = Some((text, raw));
                entry
            }
            Token::Open => Entry::new(key, Value::Object(parse_entries(lexer, true)?)),
            Token::Close | Token::Condition(_) => {
                anyhow::bail!("line {line}: key {key:?} has no value")
            }
        };
        entry.condition = match key_condition {
            Some(c) => Some(c),
            None => lexer.condition()?,
        };
        object.entries.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"// written by Steam
"UserLocalConfigStore"
{
	"Software"
	{
		"valve"
		{
			"Steam"
			{
				"apps"
				{
					"2519830"
					{
						"LaunchOptions"		"-Screen \"big\" %command%"
						"Playtime"		"12"
					}
				}
			}
		}
	}
	"friends" [$WIN32]
	{
		"name"		"c:\\users\\me"
	}
}
"#;

    #[test]
    fn parses_nested_objects_and_escapes() {
        let root = parse(SAMPLE).unwrap();
        let app = root
            .path(&["UserLocalConfigStore", "Software", "Valve", "Steam", "apps", "2519830"])
            .unwrap();
        assert_eq!(app.string("launchoptions"), Some("-Screen \"big\" %command%"));
        let friends = root.path(&["UserLocalConfigStore", "friends"]).unwrap();
        assert_eq!(friends.string("name"), Some("c:\\users\\me"));
    }

    #[test]
    fn write_is_stable() {
        let first = parse(SAMPLE).unwrap().write();
        let second = parse(&first).unwrap().write();
        assert_eq!(first, second);
        assert!(first.contains("\t\t\t\t\t\t\"LaunchOptions\"\t\t\"-Screen \\\"big\\\" %command%\"\n"));
    }

    #[test]
    fn conditionals_and_unknown_escapes_survive_rewrite() {
        let input = "\"root\"\n{\n\t\"name\"\t\t\"caf\\u00e9 \\q\"\n\t\"font\"\t\t\"Tahoma\" [$WIN32]\n\t\"font\"\t\t\"Helvetica\" [$OSX]\n}\n";
        let root = parse(input).unwrap();
        assert_eq!(root.write(), input);

        let inner = root.object("root").unwrap();
        assert_eq!(inner.entries[1].condition.as_deref(), Some("$WIN32"));
        assert_eq!(inner.entries[2].condition.as_deref(), Some("$OSX"));

        let friends = parse(SAMPLE).unwrap().write();
        assert!(friends.contains("\t\"friends\" [$WIN32]\n\t{\n"));
    }

    #[test]
    fn edited_strings_are_escaped() {
        let mut root = parse("\"a\" { \"k\" \"x\\qy\" }").unwrap();
        let a = root.object_mut("a").unwrap();
        a.set_string("k", "new \"quoted\" \\path".to_string());
        assert!(root.write().contains("\"k\"\t\t\"new \\\"quoted\\\" \\\\path\""));
    }

    #[test]
    fn set_string_replaces_or_appends() {
        let mut object = parse("\"a\" { \"k\" \"1\" }").unwrap();
        let a = object.object_mut("A").unwrap();
        a.set_string("K", "2".to_string());
        a.set_string("other", "3".to_string());
        assert_eq!(a.string("k"), Some("2"));
        assert_eq!(a.entries.len(), 2);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("").is_err());
        assert!(parse("\"a\" { \"k\" \"v\"").is_err());
        assert!(parse("\"a\" \"unterminated").is_err());
        assert!(parse("}").is_err());
        assert!(parse("<html>").is_err());
    }
}
