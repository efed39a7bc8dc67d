//! Connection targets and proxy command templates.

use std::fmt;

use crate::config::ProxyConfig;

/// Where the client ultimately wants to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

const SUBSTITUTIONS: [&str; 6] = ["proxyhost", "proxyport", "host", "port", "user", "pass"];

/// Expand a proxy command template for `target`.
///
/// `%host`, `%port`, `%proxyhost`, `%proxyport`, `%user` and `%pass` are
/// replaced; `%%` is a literal percent. Backslash escapes `\\`, `\%`, `\n`,
/// `\r`, `\t` and `\xHH` are decoded. `\xHH` only decodes ASCII values,
/// since the result is a command line string. Anything else is copied
/// unchanged.
pub fn format_command(template: &str, target: &Target, config: &ProxyConfig) -> String {
    let mut out = String::with_capacity(template.len() + target.host.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['%', '\\']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix('%') {
            if let Some(after) = after.strip_prefix('%') {
                out.push('%');
                rest = after;
                continue;
            }
            let name = SUBSTITUTIONS
                .iter()
                .find(|name| after.starts_with(**name));
            match name {
                Some(&name) => {
                    match name {
                        "host" => out.push_str(&target.host),
                        "port" => out.push_str(&target.port.to_string()),
                        "proxyhost" => out.push_str(&config.proxy_host),
                        "proxyport" => out.push_str(&config.proxy_port.to_string()),
                        "user" => out.push_str(&config.username),
                        _ => out.push_str(&config.password),
                    }
                    rest = &after[name.len()..];
                }
                None => {
                    out.push('%');
                    rest = after;
                }
            }
            continue;
        }

        let after = &tail[1..];
        let mut chars = after.chars();
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('%') => out.push('%'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('x') => {
                let hex: String = after[1..]
                    .chars()
                    .take(2)
                    .take_while(char::is_ascii_hexdigit)
                    .collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(byte) if hex.len() == 2 && byte.is_ascii() => {
                        out.push(char::from(byte));
                        rest = &after[3..];
                        continue;
                    }
                    _ => {
                        out.push_str("\\x");
                        rest = &after[1..];
                        continue;
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => {
                out.push('\\');
                rest = after;
                continue;
            }
        }
        rest = chars.as_str();
    }

    out.push_str(rest);
    out
}
