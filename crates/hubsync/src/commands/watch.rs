//! Watch a Thing: print each property change and event as it arrives.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use hubsync_core::{ChangeListener, ConsumedThing, InteractionOutput};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output::{self, Painter};

use super::util;

#[derive(Debug, Clone, Copy)]
enum Kind {
    Property,
    Event,
}

impl Kind {
    fn label(self) -> &'static str {
        match self {
            Self::Property => "property",
            Self::Event => "event",
        }
    }
}

struct Change {
    kind: Kind,
    name: String,
    output: InteractionOutput,
}

pub async fn handle(
    factory: &hubsync_core::ThingFactory,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let thing = util::consume(factory, &args.id)?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let names = register_listeners(&thing, &tx)?;
    drop(tx);

    if !global.quiet {
        eprintln!(
            "watching {} ({} names), Ctrl-C to stop",
            thing.id(),
            names.len()
        );
    }

    let painter = Painter::new(&global.color);
    let deadline = args.duration.map(Duration::from_secs);
    let stream = async {
        while let Some(change) = rx.recv().await {
            let line = format_change(&change, &global.output, painter)?;
            output::print_output(&line, global.quiet);
        }
        Ok::<(), CliError>(())
    };

    let result = tokio::select! {
        res = stream => res,
        _ = tokio::signal::ctrl_c() => Ok(()),
        () = sleep_or_forever(deadline) => Ok(()),
    };

    for (kind, name) in &names {
        match kind {
            Kind::Property => thing.unobserve_property(name),
            Kind::Event => thing.unsubscribe_event(name),
        };
    }
    result
}

/// Observe every declared property and subscribe to every declared event.
fn register_listeners(
    thing: &Arc<ConsumedThing>,
    tx: &mpsc::UnboundedSender<Change>,
) -> Result<Vec<(Kind, String)>, CliError> {
    let td = thing.description();
    let mut names = Vec::new();

    for name in td.property_names() {
        thing.observe_property(name, forwarder(Kind::Property, tx.clone()))?;
        names.push((Kind::Property, name.to_owned()));
    }
    for name in td.event_names() {
        thing.subscribe_event(name, forwarder(Kind::Event, tx.clone()))?;
        names.push((Kind::Event, name.to_owned()));
    }
    Ok(names)
}

fn forwarder(kind: Kind, tx: mpsc::UnboundedSender<Change>) -> ChangeListener {
    Arc::new(move |name: &str, output: &InteractionOutput| {
        let _ = tx.send(Change {
            kind,
            name: name.to_owned(),
            output: output.clone(),
        });
    })
}

async fn sleep_or_forever(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

fn format_change(
    change: &Change,
    format: &OutputFormat,
    painter: Painter,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Table | OutputFormat::Plain => Ok(format!(
            "{} {:<8} {} = {}",
            painter.dim(&change.output.updated_short_text()),
            change.kind.label(),
            painter.name(&change.name),
            change.output.value_text(),
        )),
        OutputFormat::Json | OutputFormat::JsonCompact | OutputFormat::Yaml => {
            let record = json!({
                "kind": change.kind.label(),
                "name": change.name,
                "value": change.output.value(),
                "updated": change.output.updated(),
            });
            output::render_json(&record, true)
        }
    }
}
