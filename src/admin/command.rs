//! Admin command lines.

use std::fmt;
use std::path::Path;

use crate::admin::error::{AdminError, AdminResult};

/// One command line sent to the admin socket, without its trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(String);

impl Command {
    /// Wrap a raw command line. Embedded line breaks are rejected since they
    /// would split the command into several requests.
    pub fn new(line: impl Into<String>) -> AdminResult<Self> {
        let line = line.into();
        if line.contains(['\n', '\r']) {
            return Err(AdminError::Protocol(format!(
                "command contains a line break: {line:?}"
            )));
        }
        if line.trim().is_empty() {
            return Err(AdminError::Protocol("command is empty".into()));
        }
        Ok(Self(line))
    }

    fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let line = words
            .into_iter()
            .map(|w| quote_arg(w.as_ref()))
            .collect::<Vec<_>>()
            .join(" ");
        Self(line)
    }

    pub fn ping() -> Self {
        Self::from_words(["ping"])
    }

    /// `vcl.list -j`
    pub fn vcl_list_json() -> Self {
        Self::from_words(["vcl.list", "-j"])
    }

    pub fn vcl_load(id: &str, path: &Path) -> Self {
        Self::from_words(["vcl.load", id, &path.to_string_lossy()])
    }

    pub fn vcl_label(label: &str, id: &str) -> Self {
        Self::from_words(["vcl.label", label, id])
    }

    pub fn vcl_use(id: &str) -> Self {
        Self::from_words(["vcl.use", id])
    }

    pub fn vcl_discard(name: &str) -> Self {
        Self::from_words(["vcl.discard", name])
    }

    pub fn param_set(name: &str, value: &str) -> Self {
        Self::from_words(["param.set", name, value])
    }

    pub fn start() -> Self {
        Self::from_words(["start"])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Quote an argument for the admin CLI tokenizer when it is not a bare word.
fn quote_arg(arg: &str) -> String {
    let bare = !arg.is_empty()
        && !arg
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\');
    if bare {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn command_shapes() {
        assert_eq!(Command::vcl_list_json().as_str(), "vcl.list -j");
        assert_eq!(
            Command::vcl_load("default_200", &PathBuf::from("/path/default.vcl")).as_str(),
            "vcl.load default_200 /path/default.vcl"
        );
        assert_eq!(
            Command::vcl_label("extra", "extra_200").as_str(),
            "vcl.label extra extra_200"
        );
        assert_eq!(Command::vcl_use("default_200").as_str(), "vcl.use default_200");
        assert_eq!(
            Command::vcl_discard("default_100").as_str(),
            "vcl.discard default_100"
        );
        assert_eq!(
            Command::param_set("feature", "+http2,+esi_disable_xml_check").as_str(),
            "param.set feature +http2,+esi_disable_xml_check"
        );
        assert_eq!(Command::start().as_str(), "start");
    }

    #[test]
    fn quotes_arguments_with_spaces() {
        assert_eq!(
            Command::param_set("cc_command", "exec cc -o \"%o\"").as_str(),
            r#"param.set cc_command "exec cc -o \"%o\"""#
        );
        assert_eq!(Command::param_set("x", "").as_str(), r#"param.set x """#);
    }

    #[test]
    fn rejects_line_breaks() {
        assert!(Command::new("ping\nstart").is_err());
        assert!(Command::new("  ").is_err());
        assert_eq!(Command::new("status").unwrap().to_string(), "status");
    }
}
