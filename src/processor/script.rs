//! Builder for the bash scripts that drive external tools.

use std::fmt;
use std::path::Path;

/// Rendered, ordered command script ready to be written to disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalCodeBlock {
    statements: Vec<String>,
}

impl ExternalCodeBlock {
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Full script text, including the interpreter line and strict mode
    pub fn render(&self) -> String {
        let mut script = String::from("#!/bin/bash\nset -eo pipefail\n");
        for statement in &self.statements {
            script.push_str(statement);
            script.push('\n');
        }
        script
    }
}

impl fmt::Display for ExternalCodeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Quote `value` for bash; plain words are left untouched
pub fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Accumulates script statements in order
#[derive(Debug, Default)]
pub struct ScriptWriter {
    statements: Vec<String>,
}

impl ScriptWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw statement
    pub fn add(&mut self, statement: impl Into<String>) -> &mut Self {
        self.statements.push(statement.into());
        self
    }

    pub fn export_var(&mut self, name: &str, value: &str) -> &mut Self {
        self.add(format!("export {name}={}", shell_quote(value)))
    }

    /// Point DISPLAY at `port`, optionally starting a virtual framebuffer that is torn down on exit
    pub fn set_display_port(&mut self, port: u16, start_xvfb: bool) -> &mut Self {
        if start_xvfb {
            self.add(format!(
                "Xvfb :{port} -screen 0 1280x1024x24 -nolisten tcp > /dev/null 2>&1 &"
            ));
            self.add("XVFB_PID=$!");
            self.add("trap 'kill ${XVFB_PID} 2> /dev/null || true' EXIT");
        }
        self.export_var(crate::constants::env_vars::DISPLAY, &format!(":{port}"))
    }

    pub fn create_directories<P: AsRef<Path>>(&mut self, dirs: &[P]) -> &mut Self {
        if dirs.is_empty() {
            return self;
        }
        let quoted: Vec<String> = dirs
            .iter()
            .map(|d| shell_quote(&d.as_ref().to_string_lossy()))
            .collect();
        self.add(format!("mkdir -p {}", quoted.join(" ")))
    }

    /// Start a command line for `executable`; finish it with [`CommandLine::end_args`]
    pub fn add_with_args(&mut self, executable: &str) -> CommandLine<'_> {
        CommandLine {
            parts: vec![shell_quote(executable)],
            writer: self,
        }
    }

    pub fn close(self) -> ExternalCodeBlock {
        ExternalCodeBlock {
            statements: self.statements,
        }
    }
}

/// One command invocation under construction
#[must_use = "call end_args() to append the command to the script"]
#[derive(Debug)]
pub struct CommandLine<'a> {
    writer: &'a mut ScriptWriter,
    parts: Vec<String>,
}

impl<'a> CommandLine<'a> {
    pub fn add_arg(mut self, value: impl AsRef<str>) -> Self {
        self.parts.push(shell_quote(value.as_ref()));
        self
    }

    pub fn add_args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.parts
            .extend(values.into_iter().map(|v| shell_quote(v.as_ref())));
        self
    }

    /// Append `flag value`, skipping the pair entirely when the value is missing or blank
    pub fn add_arg_flag(self, flag: &str, value: Option<&str>) -> Self {
        match value.filter(|v| !v.trim().is_empty()) {
            Some(v) => self.add_arg(flag).add_arg(v),
            None => self,
        }
    }

    pub fn add_bool_flag(self, flag: &str, enabled: bool) -> Self {
        if enabled {
            self.add_arg(flag)
        } else {
            self
        }
    }

    pub fn redirect_stdout(mut self, target: impl AsRef<Path>) -> Self {
        self.parts.push(format!(
            "> {}",
            shell_quote(&target.as_ref().to_string_lossy())
        ));
        self
    }

    pub fn end_args(self) -> &'a mut ScriptWriter {
        let line = self.parts.join(" ");
        self.writer.add(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/data/a.lsm"), "/data/a.lsm");
        assert_eq!(shell_quote("my file"), "'my file'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
    }

    #[test]
    fn test_chained_statements() {
        let mut writer = ScriptWriter::new();
        writer.set_display_port(5, false);
        writer.create_directories(&["/out dir"]);
        writer
            .add_with_args("vaa3d")
            .add_arg("-x")
            .add_arg("blend_multiscan")
            .add_arg_flag("-p", Some("  "))
            .add_arg_flag("-o", Some("/out dir/merged.v3draw"))
            .add_bool_flag("-v", false)
            .end_args();
        let block = writer.close();

        assert_eq!(
            block.statements(),
            [
                "export DISPLAY=:5".to_string(),
                "mkdir -p '/out dir'".to_string(),
                "vaa3d -x blend_multiscan -o '/out dir/merged.v3draw'".to_string(),
            ]
        );
        assert!(block.render().starts_with("#!/bin/bash\nset -eo pipefail\n"));
    }

    #[test]
    fn test_redirect_and_xvfb() {
        let mut writer = ScriptWriter::new();
        writer.set_display_port(42, true);
        writer
            .add_with_args("perl")
            .add_arg("/opt/lsm_json_dump.pl")
            .add_arg("/data/a.lsm")
            .redirect_stdout("/data/a.json.partial")
            .end_args();
        let rendered = writer.close().render();

        assert!(rendered.contains("Xvfb :42"));
        assert!(rendered.contains("export DISPLAY=:42"));
        assert!(rendered.contains("perl /opt/lsm_json_dump.pl /data/a.lsm > /data/a.json.partial"));
    }
}
