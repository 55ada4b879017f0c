//! Editing a Steam launch option string without disturbing user flags.

/// Launch options split into shell-like words, quotes kept as written
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    tokens: Vec<String>,
}

impl LaunchOptions {
    pub fn parse(text: &str) -> Self {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        for c in text.chars() {
            match c {
                '"' => {
                    quoted = !quoted;
                    current.push(c);
                }
                c if c.is_whitespace() && !quoted => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
        Self { tokens }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    fn position(&self, flag: &str) -> Option<usize> {
        self.tokens.iter().position(|t| t.eq_ignore_ascii_case(flag))
    }

    /// Value following `flag`, without surrounding quotes.
    pub fn flag_value(&self, flag: &str) -> Option<String> {
        let index = self.position(flag)?;
        self.tokens
            .get(index + 1)
            .filter(|v| !is_flag(v))
            .map(|v| unquote(v).to_string())
    }

    /// Sets `flag` to `value` in place, or removes it together with its
    /// value when `value` is `None`. New flags are appended, which puts
    /// them among the game's arguments after `%command%`.
    pub fn set_flag(&mut self, flag: &str, value: Option<&str>) {
        match (self.position(flag), value) {
            (Some(index), Some(value)) => {
                let rendered = quote(value);
                match self.tokens.get(index + 1) {
                    Some(next) if !is_flag(next) => self.tokens[index + 1] = rendered,
                    _ => self.tokens.insert(index + 1, rendered),
                }
            }
            (Some(index), None) => {
                let end = match self.tokens.get(index + 1) {
                    Some(next) if !is_flag(next) => index + 2,
                    _ => index + 1,
                };
                self.tokens.drain(index..end);
            }
            (None, Some(value)) => {
                self.tokens.push(flag.to_string());
                self.tokens.push(quote(value));
            }
            (None, None) => {}
        }
    }

    /// Appends every token of `extra` that is not already present.
    pub fn ensure_tokens(&mut self, extra: &str) {
        for token in LaunchOptions::parse(extra).tokens {
            if !self.tokens.iter().any(|t| t == &token) {
                self.tokens.push(token);
            }
        }
    }

    pub fn render(&self) -> String {
        self.tokens.join(" ")
    }
}

fn is_flag(token: &str) -> bool {
    token.starts_with('-') || token.eq_ignore_ascii_case("%command%")
}

fn quote(value: &str) -> String {
    format!("\"{value}\"")
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
