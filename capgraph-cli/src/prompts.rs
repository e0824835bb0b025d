use anyhow::Result;
use inquire::{Select, Text};

use capgraph_core::{
    CapabilityData, DocumentEntry, DocumentKind, EnablerData, Identifier, DEFAULT_PRIORITY,
};

const PRIORITY_OPTIONS: [&str; 4] = ["Critical", "High", "Medium", "Low"];

fn prompt_priority() -> Result<String> {
    let default = PRIORITY_OPTIONS
        .iter()
        .position(|p| *p == DEFAULT_PRIORITY)
        .unwrap_or(0);
    let priority = Select::new("Priority:", PRIORITY_OPTIONS.to_vec())
        .with_starting_cursor(default)
        .prompt()?;
    Ok(priority.to_string())
}

/// Prompts the user for a new capability
pub fn prompt_new_capability(id: Identifier) -> Result<CapabilityData> {
    let name = Text::new("Name:").prompt()?;

    // Use the Editor type for multiline input
    let description = inquire::Editor::new("Description:").prompt()?;

    let mut data = CapabilityData::new(id, name);
    data.description = description.trim().to_string();
    data.priority = prompt_priority()?;

    Ok(data)
}

/// Prompts the user for a new enabler, offering the known capabilities as parents
pub fn prompt_new_enabler(id: Identifier, entries: &[DocumentEntry]) -> Result<EnablerData> {
    let name = Text::new("Name:").prompt()?;
    let description = inquire::Editor::new("Description:").prompt()?;

    let mut data = EnablerData::new(id, name);
    data.description = description.trim().to_string();
    data.priority = prompt_priority()?;

    let owner = Text::new("Owner:").prompt()?;
    data.owner = Some(owner).filter(|o| !o.trim().is_empty());

    // Offer every capability, plus an option for none
    let no_parent = "(no parent)".to_string();
    let mut parent_options = vec![no_parent.clone()];
    parent_options.extend(
        entries
            .iter()
            .filter(|e| e.kind == Some(DocumentKind::Capability))
            .filter_map(|e| {
                let id = e.id?;
                Some(format!("{} {}", id, e.name.clone().unwrap_or_default()))
            }),
    );

    let selection = Select::new("Capability:", parent_options).prompt()?;
    if selection != no_parent {
        data.capability_id = selection
            .split_whitespace()
            .next()
            .and_then(|id| id.parse().ok());
    }

    Ok(data)
}
