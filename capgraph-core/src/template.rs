//! Document templates for newly created capabilities and enablers

use crate::codec::render_row;
use crate::models::{
    CapabilityData, DependencyEdge, EnablerData, DOWNSTREAM_HEADING, ENABLERS_HEADING,
    METADATA_HEADING, UPSTREAM_HEADING,
};

/// Column titles of a capability's enabler table
pub const ENABLER_TABLE_COLUMNS: [&str; 6] =
    ["Enabler ID", "Name", "Description", "Status", "Approval", "Priority"];

/// Column titles of both dependency tables
pub const DEPENDENCY_TABLE_COLUMNS: [&str; 2] = ["Capability ID", "Description"];

fn table_header(columns: &[&str]) -> String {
    let rule: Vec<String> = columns.iter().map(|c| "-".repeat(c.len() + 2)).collect();
    format!("| {} |\n|{}|\n", columns.join(" | "), rule.join("|"))
}

fn edge_rows(edges: &[DependencyEdge]) -> String {
    edges
        .iter()
        .map(|edge| format!("{}\n", render_row(&edge.capability_id.to_string(), &[edge.description.clone()])))
        .collect()
}

/// Full text of a new Capability document
pub fn render_capability(data: &CapabilityData) -> String {
    let mut output = String::new();

    output.push_str(&format!("# {}\n\n", data.name));
    output.push_str(&format!("## {}\n", METADATA_HEADING));
    output.push_str(&format!("- **Name**: {}\n", data.name));
    output.push_str("- **Type**: Capability\n");
    output.push_str(&format!("- **ID**: {}\n", data.id));
    output.push_str(&format!("- **Status**: {}\n", data.status));
    output.push_str(&format!("- **Approval**: {}\n", data.approval));
    output.push_str(&format!("- **Priority**: {}\n", data.priority));
    output.push_str(&format!("- **Description**: {}\n\n", data.description));

    output.push_str(&format!("## {}\n", ENABLERS_HEADING));
    output.push_str(&table_header(&ENABLER_TABLE_COLUMNS));
    output.push('\n');

    output.push_str("## Dependencies\n\n");
    output.push_str(&format!("### {}\n", UPSTREAM_HEADING));
    output.push_str(&table_header(&DEPENDENCY_TABLE_COLUMNS));
    output.push_str(&edge_rows(&data.upstream));
    output.push('\n');
    output.push_str(&format!("### {}\n", DOWNSTREAM_HEADING));
    output.push_str(&table_header(&DEPENDENCY_TABLE_COLUMNS));
    output.push_str(&edge_rows(&data.downstream));

    output
}

/// Full text of a new Enabler document
pub fn render_enabler(data: &EnablerData) -> String {
    let mut output = String::new();

    output.push_str(&format!("# {}\n\n", data.name));
    output.push_str(&format!("## {}\n", METADATA_HEADING));
    output.push_str(&format!("- **Name**: {}\n", data.name));
    output.push_str("- **Type**: Enabler\n");
    output.push_str(&format!("- **ID**: {}\n", data.id));
    output.push_str(&format!(
        "- **Capability ID**: {}\n",
        data.capability_id.map(|id| id.to_string()).unwrap_or_default()
    ));
    output.push_str(&format!("- **Status**: {}\n", data.status));
    output.push_str(&format!("- **Approval**: {}\n", data.approval));
    output.push_str(&format!("- **Priority**: {}\n", data.priority));
    output.push_str(&format!("- **Description**: {}\n", data.description));
    if let Some(owner) = &data.owner {
        output.push_str(&format!("- **Owner**: {}\n", owner));
    }
    if let Some(developer) = &data.developer {
        output.push_str(&format!("- **Developer**: {}\n", developer));
    }

    output.push_str("\n## Technical Specifications\n\n");
    output.push_str("## Functional Requirements\n");
    output.push_str(&table_header(&["ID", "Name", "Requirement", "Status", "Priority"]));
    output.push_str("\n## Non-Functional Requirements\n");
    output.push_str(&table_header(&["ID", "Name", "Requirement", "Status", "Priority"]));

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{extract_field, extract_table, extract_table_header};
    use crate::models::{CapabilityData, EnablerData, Identifier};

    fn id(s: &str) -> Identifier {
        s.parse().unwrap()
    }

    #[test]
    fn test_capability_template_parses_back() {
        let mut data = CapabilityData::new(id("CAP-100001"), "Payments");
        data.description = "Accept payments".to_string();
        data.downstream = vec![DependencyEdge::new(id("CAP-100002"), "feeds data")];
        let text = render_capability(&data);

        assert!(text.contains("| Capability ID | Description |\n|---------------|-------------|\n"));
        assert_eq!(CapabilityData::from_document(&text).unwrap(), data);
        assert!(extract_table(&text, ENABLERS_HEADING).unwrap().is_empty());
        assert_eq!(
            extract_table_header(&text, ENABLERS_HEADING).unwrap(),
            ENABLER_TABLE_COLUMNS.to_vec()
        );
    }

    #[test]
    fn test_enabler_template_parses_back() {
        let mut data = EnablerData::new(id("ENB-654321"), "Card gateway");
        data.capability_id = Some(id("CAP-100001"));
        data.owner = Some("Ada".to_string());
        let text = render_enabler(&data);

        assert_eq!(EnablerData::from_document(&text).unwrap(), data);
        assert_eq!(extract_field(&text, "Type").as_deref(), Some("Enabler"));
    }

    #[test]
    fn test_enabler_template_without_parent() {
        let data = EnablerData::new(id("ENB-000001"), "Orphan");
        let text = render_enabler(&data);
        assert_eq!(extract_field(&text, "Capability ID").as_deref(), Some(""));
        assert_eq!(EnablerData::from_document(&text).unwrap().capability_id, None);
    }
}
