//! Connection status report.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;

use hubsync_core::{ConnectionStatus, ThingFactory};

use crate::cli::{GlobalOpts, StatusArgs};
use crate::error::CliError;
use crate::output::{self, Painter};

#[derive(Serialize)]
struct StatusReport {
    #[serde(flatten)]
    status: ConnectionStatus,
    things: usize,
    token_valid_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<BTreeMap<String, String>>,
}

pub fn handle(
    factory: &ThingFactory,
    args: &StatusArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let report = StatusReport {
        status: factory.connection_status(),
        things: factory.thing_store().len(),
        token_valid_secs: factory.token_validity_secs(),
        diagnostics: args
            .diagnostics
            .then(|| factory.bus_diagnostics().into_iter().collect()),
    };

    let painter = Painter::new(&global.color);
    let out = output::render_single(
        &global.output,
        &report,
        |r| render_report(r, painter),
        |r| r.status.state.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

fn render_report(report: &StatusReport, painter: Painter) -> String {
    let status = &report.status;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}  {}",
        painter.name(status.account_id.as_deref().unwrap_or("-")),
        status.state
    );
    let _ = writeln!(out, "  Authenticated: {}", painter.flag(status.authenticated));
    if !status.auth_status_message.is_empty() {
        let _ = writeln!(out, "  Auth status:   {}", status.auth_status_message);
    }
    let _ = writeln!(out, "  Directory:     {}", painter.flag(status.directory));
    let _ = writeln!(out, "  Bus connected: {}", painter.flag(status.connected));
    let _ = writeln!(out, "  Things:        {}", report.things);
    let _ = writeln!(out, "  Token valid:   {}s", report.token_valid_secs);
    let _ = write!(out, "  Status:        {}", status.status_message);

    if let Some(ref diagnostics) = report.diagnostics {
        for (topic, value) in diagnostics {
            let _ = write!(out, "\n  {} {value}", painter.dim(topic));
        }
    }
    out
}
