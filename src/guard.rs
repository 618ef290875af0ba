use crate::engine::{CloneRequest, Engine};
use ansi_term::Colour::Yellow;
use anyhow::Result;
use log::warn;

/// Whether a clone may start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Proceed,
    MissingSource,
    /// Sessions that would make the copy inconsistent or fail
    ActiveConnections { source: u64, target: u64 },
}

/// Check the source exists and neither the source nor an already existing
/// target has active sessions. Blocking sessions are reported with the
/// commands to terminate them.
pub fn check(engine: &mut dyn Engine, request: &CloneRequest, cooldown_seconds: u64) -> Result<Verdict> {
    if !engine.database_exists(&request.source)? {
        warn!(
            "{}: source database {} does not exist, skipping",
            Yellow.paint("Warning"),
            request.source
        );
        return Ok(Verdict::MissingSource);
    }

    let source = engine.active_connections(&request.source)?;
    let target = if engine.database_exists(&request.target)? {
        engine.active_connections(&request.target)?
    } else {
        0
    };

    if source == 0 && target == 0 {
        return Ok(Verdict::Proceed);
    }

    for (name, count) in [(&request.source, source), (&request.target, target)] {
        if count == 0 {
            continue;
        }

        warn!(
            "{}: {} active connection(s) on {}, not cloning",
            Yellow.paint("Warning"),
            count,
            name
        );
        warn!("  Inspect and terminate them with:");
        for command in engine.termination_hint(name) {
            warn!("    {}", command);
        }
    }
    warn!("  then retry in {}s", cooldown_seconds);

    Ok(Verdict::ActiveConnections { source, target })
}
