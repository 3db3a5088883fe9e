//! Thing directory command handlers.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tabled::Tabled;

use hubsync_core::{ConsumedThing, InteractionOutput, ThingDescription, ThingFactory};

use crate::cli::{GlobalOpts, ThingsArgs, ThingsCommand};
use crate::error::CliError;
use crate::output::{self, Painter};

use super::util;

// ── Rows ─────────────────────────────────────────────────────────────

#[derive(Tabled)]
struct ThingRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Type")]
    device_type: String,
    #[tabled(rename = "Publisher")]
    publisher: String,
    #[tabled(rename = "Props")]
    properties: usize,
    #[tabled(rename = "Actions")]
    actions: usize,
    #[tabled(rename = "Events")]
    events: usize,
}

impl ThingRow {
    fn new(td: &Arc<ThingDescription>) -> Self {
        Self {
            id: td.id.clone(),
            title: td.title.clone().unwrap_or_default(),
            device_type: td.device_type.clone(),
            publisher: td.publisher.clone(),
            properties: td.properties.as_ref().map_or(0, |p| p.len()),
            actions: td.actions.as_ref().map_or(0, |a| a.len()),
            events: td.events.as_ref().map_or(0, |e| e.len()),
        }
    }
}

/// Detail view of one consumed Thing.
#[derive(Serialize)]
struct ThingDetail {
    description: Arc<ThingDescription>,
    properties_loaded: bool,
    values: Vec<ValueEntry>,
}

#[derive(Serialize, Tabled)]
struct ValueEntry {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Updated")]
    updated: String,
    #[tabled(rename = "Age")]
    age: String,
}

impl ThingDetail {
    fn from_thing(thing: &ConsumedThing) -> Self {
        let now = Utc::now();
        let mut values: Vec<ValueEntry> = thing
            .properties()
            .into_iter()
            .map(|(name, io)| ValueEntry::new(name, &io, now))
            .collect();
        values.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            description: thing.description(),
            properties_loaded: thing.has_properties(),
            values,
        }
    }
}

impl ValueEntry {
    fn new(name: String, io: &InteractionOutput, now: chrono::DateTime<Utc>) -> Self {
        Self {
            name,
            value: io.value_text(),
            updated: io.updated_short_text(),
            age: io.age_text(now),
        }
    }
}

// ── Handler ──────────────────────────────────────────────────────────

pub async fn handle(
    factory: &ThingFactory,
    args: ThingsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        ThingsCommand::List {
            publisher,
            device_type,
        } => {
            let store = factory.thing_store();
            let mut things: Vec<_> = store
                .all()
                .into_iter()
                .filter(|td| publisher.as_deref().is_none_or(|p| td.publisher == p))
                .filter(|td| device_type.as_deref().is_none_or(|t| td.device_type == t))
                .collect();
            things.sort_by(|a, b| a.id.cmp(&b.id));

            let out = output::render_list(&global.output, &things, ThingRow::new, |td| {
                td.id.clone()
            })?;
            output::print_output(&out, global.quiet);

            let status = factory.connection_status();
            if status.directory_truncated && !global.quiet {
                eprintln!("warning: directory listing was truncated");
            }
            Ok(())
        }

        ThingsCommand::Show { id, wait } => {
            let thing = util::consume(factory, &id)?;
            if !util::wait_for_properties(&thing, Duration::from_secs(wait)).await
                && !global.quiet
            {
                eprintln!("warning: property values not loaded within {wait}s");
            }

            let detail = ThingDetail::from_thing(&thing);
            let painter = Painter::new(&global.color);
            let out = output::render_single(
                &global.output,
                &detail,
                |d| render_detail(d, painter),
                |d| d.description.id.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}

fn render_detail(detail: &ThingDetail, painter: Painter) -> String {
    let td = &detail.description;
    let mut out = String::new();
    let _ = writeln!(out, "{}", painter.name(&td.id));
    if let Some(ref title) = td.title {
        let _ = writeln!(out, "  Title:       {title}");
    }
    if let Some(ref description) = td.description {
        let _ = writeln!(out, "  Description: {description}");
    }
    if !td.device_type.is_empty() {
        let _ = writeln!(out, "  Type:        {}", td.device_type);
    }
    if !td.publisher.is_empty() {
        let _ = writeln!(out, "  Publisher:   {}", td.publisher);
    }
    if let Some(ref modified) = td.modified {
        let _ = writeln!(out, "  Modified:    {modified}");
    }

    let actions: Vec<&str> = td.action_names().collect();
    if !actions.is_empty() {
        let _ = writeln!(out, "  Actions:     {}", actions.join(", "));
    }
    let events: Vec<&str> = td.event_names().collect();
    if !events.is_empty() {
        let _ = writeln!(out, "  Events:      {}", events.join(", "));
    }

    if detail.values.is_empty() {
        let _ = write!(out, "{}", painter.dim("  (no property values)"));
    } else {
        out.push_str(&output::render_table(&detail.values));
    }
    out
}
