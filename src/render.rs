use comfy_table::{modifiers, presets, ContentArrangement, Table};
use terminal_size::{terminal_size, Width};
use yansi::Paint;

use crate::command::{Verb, VERB_NAMES, VERB_SPECS};
use crate::dispatcher::{CommandError, Output};
use crate::error::Error;
use crate::models::{Instance, InstanceStatus};

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL);
    table.apply_modifier(modifiers::UTF8_ROUND_CORNERS);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    if let Some((Width(w), _)) = terminal_size() {
        table.set_width(w.saturating_sub(4));
    }
    table
}

fn paint_status(status: InstanceStatus) -> String {
    let text = status.as_str();
    match status {
        InstanceStatus::Active => Paint::new(text).green().to_string(),
        InstanceStatus::Building => Paint::new(text).cyan().to_string(),
        InstanceStatus::Paused | InstanceStatus::Suspended | InstanceStatus::Stopped => {
            Paint::new(text).yellow().to_string()
        }
        InstanceStatus::Error => Paint::new(text).red().bold().to_string(),
        InstanceStatus::Deleted | InstanceStatus::Unknown => Paint::new(text).dim().to_string(),
    }
}

pub fn instance_table(instances: &[Instance]) -> String {
    if instances.is_empty() {
        return "(no instances)".into();
    }
    let mut table = new_table();
    table.set_header(vec!["ID", "Name", "Status", "Addresses"]);
    for i in instances {
        table.add_row(vec![
            i.id.clone(),
            i.name.clone(),
            paint_status(i.status),
            i.addresses_display(),
        ]);
    }
    format!(
        "{table}\n{}",
        Paint::new(format!("{} instance(s)", instances.len())).dim()
    )
}

pub fn instance_detail(instance: &Instance) -> String {
    let mut table = new_table();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec!["ID".to_string(), instance.id.clone()]);
    table.add_row(vec!["Name".to_string(), instance.name.clone()]);
    table.add_row(vec!["Status".to_string(), paint_status(instance.status)]);
    table.add_row(vec![
        "Host".to_string(),
        instance.host.clone().unwrap_or_else(|| "—".into()),
    ]);
    let addresses = if instance.addresses.is_empty() {
        "—".to_string()
    } else {
        instance
            .addresses
            .iter()
            .map(|a| match &a.kind {
                Some(kind) => format!("{}: {} (IPv{}, {})", a.network, a.addr, a.version, kind),
                None => format!("{}: {} (IPv{})", a.network, a.addr, a.version),
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    table.add_row(vec!["Addresses".to_string(), addresses]);
    table.add_row(vec![
        "Flavor".to_string(),
        instance.flavor.clone().unwrap_or_else(|| "—".into()),
    ]);
    table.add_row(vec![
        "Image".to_string(),
        instance.image.clone().unwrap_or_else(|| "—".into()),
    ]);
    table.add_row(vec![
        "Created".to_string(),
        instance
            .created
            .map(|c| c.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "—".into()),
    ]);
    table.to_string()
}

pub fn help_text(topic: Option<Verb>) -> String {
    if let Some(verb) = topic {
        let spec = verb.spec();
        let mut out = format!("{}\n  {}\n", Paint::new(spec.usage).bold(), spec.summary);
        let aliases: Vec<&str> = VERB_NAMES
            .iter()
            .filter(|(n, v)| *v == verb && *n != verb.name())
            .map(|(n, _)| *n)
            .collect();
        if !aliases.is_empty() {
            out.push_str(&format!("  aliases: {}\n", aliases.join(", ")));
        }
        for flag in spec.flags {
            let name = if flag.takes_value {
                format!("--{} <value>", flag.name)
            } else {
                format!("--{}", flag.name)
            };
            out.push_str(&format!("  {:<18} {}\n", name, flag.help));
        }
        return out.trim_end().to_string();
    }

    let mut out = String::from("Commands:\n");
    for spec in VERB_SPECS {
        out.push_str(&format!("  {:<36} {}\n", spec.usage, spec.summary));
    }
    out.push_str("\nInstances can be named by id or by exact name. Type 'help <command>' for options.");
    out
}

pub fn render(output: &Output) -> String {
    match output {
        Output::Instances(list) => instance_table(list),
        Output::Instance(instance) => instance_detail(instance),
        Output::Accepted { verb, target, id } => {
            let what = match verb {
                Verb::Start => "start",
                Verb::Stop => "stop",
                Verb::Reboot => "reboot",
                Verb::Delete => "delete",
                _ => "request",
            };
            let name = if target == id {
                id.clone()
            } else {
                format!("{} ({})", target, id)
            };
            format!(
                "{} {} {}; use 'show {}' to follow progress",
                Paint::new("Accepted").green(),
                what,
                name,
                target
            )
        }
        Output::Console { target, access } => format!(
            "{} console for {}: {}",
            access.console_type,
            target,
            Paint::new(&access.url).cyan().underline()
        ),
        Output::Help(topic) => help_text(*topic),
        Output::Quit => String::new(),
    }
}

pub fn render_error(err: &CommandError) -> String {
    Paint::new(err.to_string()).red().to_string()
}

/// For input that never became a command.
pub fn render_input_error(err: &Error) -> String {
    Paint::new(format!("error: {}", err)).red().to_string()
}
