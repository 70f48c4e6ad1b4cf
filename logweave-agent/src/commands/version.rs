//! `logweave version`

use std::io::Write;

use crate::error::AgentError;

/// Version string printed by the `version` subcommand.
pub fn version_line() -> String {
    format!("logweave v{}", env!("CARGO_PKG_VERSION"))
}

pub fn execute(out: &mut dyn Write) -> Result<(), AgentError> {
    writeln!(out, "{}", version_line())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_package_version() {
        let mut buf = Vec::new();
        execute(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.trim_end(), format!("logweave v{}", env!("CARGO_PKG_VERSION")));
    }
}
