//! `logweave graph`: print the operator graph in DOT format.

use std::io::Write;

use logweave_core::config::AgentConfig;

use crate::error::AgentError;

/// Build the pipeline without starting it and write its DOT rendering.
pub fn execute(config: &AgentConfig, out: &mut dyn Write) -> Result<(), AgentError> {
    let pipeline = super::build(config)?;
    out.write_all(pipeline.render_dot().as_bytes())?;
    out.flush()?;
    Ok(())
}
