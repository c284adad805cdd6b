//! `hostrun show`: print a validated inventory.

use std::fmt::Write as _;
use std::path::Path;

use crate::core::types::Step;
use crate::io::inventory::Inventory;

/// The inventory-wide default: `command`, or the summary of `commands`.
fn default_command(inventory: &Inventory) -> Option<String> {
    inventory.command.clone().or_else(|| {
        (!inventory.steps.is_empty()).then(|| {
            inventory
                .steps
                .iter()
                .map(Step::label)
                .collect::<Vec<_>>()
                .join("; ")
        })
    })
}

/// Hosts with their resolved user, masked auth and command.
pub fn render_inventory(name: &str, path: &Path, inventory: &Inventory) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Inventory '{name}' ({})", path.display());
    let default = default_command(inventory);
    let _ = writeln!(
        out,
        "Default command: {}",
        default.as_deref().unwrap_or("(none)")
    );
    for (index, step) in inventory.steps.iter().enumerate() {
        let timeout = step
            .timeout
            .map(|t| format!(" (timeout {}s)", t.as_secs()))
            .unwrap_or_default();
        let _ = writeln!(out, "  {}. {}{timeout}", index + 1, step.label());
    }
    out.push('\n');

    let rows: Vec<[String; 5]> = inventory
        .hosts
        .iter()
        .map(|host| {
            let (user, auth) = inventory
                .credential_for(host)
                .map(|cred| (cred.username.clone(), cred.auth.describe()))
                .unwrap_or_default();
            let command = match (&host.command, &default) {
                (Some(own), _) => own.clone(),
                (None, Some(default)) => format!("{default} (default)"),
                (None, None) => "-".to_string(),
            };
            [host.address.clone(), host.port.to_string(), user, auth, command]
        })
        .collect();

    let header = ["ADDRESS", "PORT", "USER", "AUTH"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }
    let _ = writeln!(
        out,
        "{:<w0$}  {:<w1$}  {:<w2$}  {:<w3$}  COMMAND",
        header[0],
        header[1],
        header[2],
        header[3],
        w0 = widths[0],
        w1 = widths[1],
        w2 = widths[2],
        w3 = widths[3],
    );
    for [address, port, user, auth, command] in &rows {
        let _ = writeln!(
            out,
            "{address:<w0$}  {port:<w1$}  {user:<w2$}  {auth:<w3$}  {command}",
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2],
            w3 = widths[3],
        );
    }
    out
}
