//! Scan summary rendering

use prettytable::{format, Cell, Row, Table};
use crate::module::ScanModule;
use crate::scan::ScanSummary;

/// Format a compact table with headers and rows using prettytable-rs clean format
pub fn format_compact_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_CLEAN);
    table.add_row(Row::new(headers.iter().map(|header| Cell::new(header)).collect()));
    for row in rows {
        table.add_row(Row::new(row.iter().map(|cell| Cell::new(cell)).collect()));
    }

    // 2-space indent
    table
        .to_string()
        .lines()
        .map(|line| format!("  {line}\n"))
        .collect()
}

/// One-paragraph text summary of a finished scan
pub fn format_summary(summary: &ScanSummary) -> String {
    format!(
        "Scan {} {}: {} events emitted, {} distributed, {} modules",
        summary.scan_id,
        summary.status,
        summary.events_emitted,
        summary.events_distributed,
        summary.modules.len()
    )
}

/// Per-module status table
pub fn format_module_status(summary: &ScanSummary) -> String {
    let rows: Vec<Vec<String>> = summary
        .modules
        .iter()
        .map(|(name, status)| {
            vec![
                name.clone(),
                status.events.incoming.to_string(),
                status.events.outgoing.to_string(),
                status.tasks.total.to_string(),
                if status.errored { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect();
    format_compact_table(&["MODULE", "INCOMING", "OUTGOING", "TASKS", "ERRORED"], &rows)
}

/// Table describing the available modules
pub fn format_module_list(modules: &[std::sync::Arc<dyn ScanModule>]) -> String {
    let rows: Vec<Vec<String>> = modules
        .iter()
        .map(|module| {
            let info = module.info();
            vec![
                info.name.clone(),
                module.settings().module_type.to_string(),
                info.watched_events.join(","),
                info.produced_events.join(","),
                info.description.clone(),
            ]
        })
        .collect();
    format_compact_table(&["MODULE", "TYPE", "WATCHES", "PRODUCES", "DESCRIPTION"], &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use crate::module::{builtin, EventCounts, ModuleStatus};
    use crate::scan::ScanStatus;

    fn summary() -> ScanSummary {
        let mut modules = BTreeMap::new();
        modules.insert(
            "speculate".to_string(),
            ModuleStatus::new(EventCounts { incoming: 0, outgoing: 0 }, 0, 0, false),
        );
        modules.insert(
            "stdout".to_string(),
            ModuleStatus::new(EventCounts { incoming: 2, outgoing: 0 }, 0, 1, true),
        );
        ScanSummary {
            scan_id: "SCAN:test".to_string(),
            status: ScanStatus::Finished,
            events_emitted: 7,
            events_distributed: 5,
            modules,
        }
    }

    #[test]
    fn test_format_compact_table_empty() {
        assert!(format_compact_table(&["A"], &[]).is_empty());
    }

    #[test]
    fn test_format_summary() {
        assert_eq!(
            format_summary(&summary()),
            "Scan SCAN:test FINISHED: 7 events emitted, 5 distributed, 2 modules"
        );
    }

    #[test]
    fn test_format_module_status() {
        let table = format_module_status(&summary());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("MODULE") && lines[0].contains("ERRORED"));
        assert!(lines[1].contains("speculate") && lines[1].trim_end().ends_with("no"));
        assert!(lines[2].contains("stdout") && lines[2].trim_end().ends_with("yes"));
        assert!(lines.iter().all(|line| line.starts_with("  ")));
    }

    #[test]
    fn test_format_module_list() {
        let modules: Vec<_> = builtin::AVAILABLE
            .iter()
            .filter_map(|name| builtin::load(name))
            .collect();
        let table = format_module_list(&modules);
        assert!(table.contains("speculate"));
        assert!(table.contains("IP_RANGE,URL"));
        assert!(table.contains("output"));
    }
}
