use crate::error::{CloudError, Result};

/// Output format for listed rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

/// Render rows (JSON objects with identical keys) in the requested format.
pub fn format_rows(rows: &[serde_json::Value], format: OutputFormat) -> Result<String> {
    if rows.is_empty() {
        return Ok(match format {
            OutputFormat::Json => "[]".to_string(),
            _ => "No results.".to_string(),
        });
    }

    match format {
        OutputFormat::Table => format_table(rows),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(rows)?),
        OutputFormat::Csv => format_csv(rows),
    }
}

fn columns_of(rows: &[serde_json::Value]) -> Result<Vec<String>> {
    rows[0]
        .as_object()
        .map(|first| first.keys().cloned().collect())
        .ok_or_else(|| CloudError::general("rows must be JSON objects"))
}

fn format_table(rows: &[serde_json::Value]) -> Result<String> {
    let columns = columns_of(rows)?;

    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    for row in rows {
        if let Some(obj) = row.as_object() {
            for (i, col) in columns.iter().enumerate() {
                let val = obj.get(col).map(value_to_display).unwrap_or_default();
                widths[i] = widths[i].max(val.len());
            }
        }
    }

    let mut output = String::new();

    let header: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:width$}", c.to_uppercase(), width = widths[i]))
        .collect();
    output.push_str(&header.join(" | "));
    output.push('\n');

    let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&sep.join("-+-"));
    output.push('\n');

    for row in rows {
        if let Some(obj) = row.as_object() {
            let vals: Vec<String> = columns
                .iter()
                .enumerate()
                .map(|(i, col)| {
                    let val = obj.get(col).map(value_to_display).unwrap_or_default();
                    format!("{:width$}", val, width = widths[i])
                })
                .collect();
            output.push_str(&vals.join(" | "));
            output.push('\n');
        }
    }

    output.push_str(&format!("\n({} rows)", rows.len()));
    Ok(output)
}

fn format_csv(rows: &[serde_json::Value]) -> Result<String> {
    let columns = columns_of(rows)?;

    let mut output = String::new();
    output.push_str(&columns.join(","));
    output.push('\n');

    for row in rows {
        if let Some(obj) = row.as_object() {
            let vals: Vec<String> = columns
                .iter()
                .map(|col| {
                    let val = obj.get(col).map(value_to_display).unwrap_or_default();
                    if val.contains(',') || val.contains('"') || val.contains('\n') {
                        format!("\"{}\"", val.replace('"', "\"\""))
                    } else {
                        val
                    }
                })
                .collect();
            output.push_str(&vals.join(","));
            output.push('\n');
        }
    }

    Ok(output)
}

fn value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "-".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
