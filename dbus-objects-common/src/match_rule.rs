use std::fmt::{self, Display};

use crate::{Error, Result};

/// Signal match rule. Rendered as comma-separated `key='value'` pairs,
/// e.g. `type='signal',sender=':1.4',interface='com.example',path='/'`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MatchRule {
    pub msg_type: Option<String>,
    pub sender: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub path: Option<String>,
}

impl MatchRule {
    /// A rule matching every signal
    pub fn signal() -> Self {
        Self {
            msg_type: Some("signal".into()),
            ..Default::default()
        }
    }

    pub fn sender(mut self, sender: &str) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn interface(mut self, interface: &str) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn member(mut self, member: &str) -> Self {
        self.member = Some(member.into());
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn parse(rule: &str) -> Result<Self> {
        let mut result = MatchRule::default();
        let mut remaining = rule.trim();

        while !remaining.is_empty() {
            let eq_pos = remaining.find('=').ok_or_else(|| {
                Error::InvalidArgs(format!("Missing '=' in match rule: {remaining}"))
            })?;

            let key = remaining[..eq_pos].trim();
            remaining = remaining[eq_pos + 1..].trim_start();

            let value = if let Some(quoted) = remaining.strip_prefix('\'') {
                let end = quoted.find('\'').ok_or_else(|| {
                    Error::InvalidArgs(format!("Unclosed quote in match rule: {rule}"))
                })?;

                remaining = &quoted[end + 1..];
                quoted[..end].to_owned()
            } else {
                let end = remaining.find(',').unwrap_or(remaining.len());
                let value = remaining[..end].trim().to_owned();

                remaining = &remaining[end..];
                value
            };

            match key {
                "type" => result.msg_type = Some(value),
                "sender" => result.sender = Some(value),
                "interface" => result.interface = Some(value),
                "member" => result.member = Some(value),
                "path" => result.path = Some(value),
                other => {
                    return Err(Error::InvalidArgs(format!(
                        "Unsupported match rule key: {other}"
                    )))
                }
            }

            remaining = remaining.trim_start();
            if let Some(rest) = remaining.strip_prefix(',') {
                remaining = rest.trim_start();
            }
        }

        Ok(result)
    }

    /// Check if a signal matches the rule. `senders` contains every name the emitter owns
    pub fn matches_signal(
        &self,
        senders: &[&str],
        path: &str,
        interface: &str,
        member: &str,
    ) -> bool {
        if let Some(msg_type) = &self.msg_type {
            if msg_type != "signal" {
                return false;
            }
        }

        if let Some(sender) = &self.sender {
            if !senders.contains(&sender.as_str()) {
                return false;
            }
        }

        self.interface.as_deref().map_or(true, |i| i == interface)
            && self.member.as_deref().map_or(true, |m| m == member)
            && self.path.as_deref().map_or(true, |p| p == path)
    }
}

impl Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs = [
            ("type", &self.msg_type),
            ("sender", &self.sender),
            ("interface", &self.interface),
            ("member", &self.member),
            ("path", &self.path),
        ];

        let mut first = true;
        for (key, value) in pairs {
            if let Some(value) = value {
                if !first {
                    f.write_str(",")?;
                }

                write!(f, "{key}='{value}'")?;
                first = false;
            }
        }

        Ok(())
    }
}
