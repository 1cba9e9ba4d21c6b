//! Diagnostic rendering (§7): turns raw compiler/auto-import output into
//! structured records with cell-coordinate context, an HTML card for the
//! notebook, and a plain-text caret-annotated traceback for terminals.

use std::sync::LazyLock;

use regex::Regex;

use crate::parser::LineMap;

static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?P<path>[^\s:]+):(?P<line>\d+):(?P<col>\d+):").unwrap());

/// One diagnostic line, mapped back to the cell that produced the offending
/// file line, if the file-line map covers it.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub path: String,
    pub file_line: usize,
    pub column: usize,
    pub message: String,
    pub cell_id: Option<String>,
    pub cell_line: Option<i64>,
    /// `context_lines` lines of source surrounding `file_line`, 0-indexed
    /// from the first context line.
    pub context: Vec<String>,
    pub highlighted_index: usize,
}

/// Parse raw compiler/auto-import combined output into structured
/// diagnostics, one per line that matches `<path>:(\d+):(\d+):`.
pub fn parse_diagnostics(output: &str, rendered_source: &str, line_map: &LineMap, context_lines: usize) -> Vec<Diagnostic> {
    let source_lines: Vec<&str> = rendered_source.lines().collect();
    let mut out = Vec::new();

    for raw_line in output.lines() {
        let Some(caps) = LOCATION_RE.captures(raw_line) else { continue };
        let path = caps["path"].to_string();
        let Ok(file_line_1based) = caps["line"].parse::<usize>() else { continue };
        let Ok(column) = caps["col"].parse::<usize>() else { continue };
        let file_line = file_line_1based.saturating_sub(1);
        let message = raw_line[caps.get(0).unwrap().end()..].trim_start_matches(' ').to_string();

        let (cell_id, cell_line) = line_map
            .get(file_line)
            .map(|(id, l)| (Some(id.clone()).filter(|s| !s.is_empty()), if *l >= 0 { Some(*l) } else { None }))
            .unwrap_or((None, None));

        let start = file_line.saturating_sub(context_lines);
        let end = (file_line + context_lines + 1).min(source_lines.len());
        let context: Vec<String> = source_lines.get(start..end).map(|s| s.iter().map(|l| l.to_string()).collect()).unwrap_or_default();
        let highlighted_index = file_line.saturating_sub(start);

        out.push(Diagnostic { path, file_line, column, message, cell_id, cell_line, context, highlighted_index });
    }

    out
}

fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Render a diagnostic as an HTML card: a location/context-on-mouseover
/// block with the offending line highlighted.
pub fn render_html(diag: &Diagnostic) -> String {
    let mut html = String::new();
    html.push_str("<div class=\"gokernel-diagnostic\">\n");
    html.push_str(&format!("  <div class=\"location\">{}:{}:{}</div>\n", html_escape(&diag.path), diag.file_line + 1, diag.column));
    if let (Some(cell_id), Some(cell_line)) = (&diag.cell_id, diag.cell_line) {
        html.push_str(&format!("  <div class=\"cell-info\" title=\"cell {cell_id} line {cell_line}\">cell {cell_id}:{cell_line}</div>\n"));
    }
    html.push_str("  <pre class=\"context\">\n");
    for (i, line) in diag.context.iter().enumerate() {
        if i == diag.highlighted_index {
            html.push_str(&format!("<span class=\"highlight\">{}</span>\n", html_escape(line)));
        } else {
            html.push_str(&format!("{}\n", html_escape(line)));
        }
    }
    html.push_str("  </pre>\n");
    html.push_str(&format!("  <div class=\"message\">{}</div>\n", html_escape(&diag.message)));
    html.push_str("</div>\n");
    html
}

/// Render a diagnostic as a plain-text traceback entry with a caret
/// indicating the column.
pub fn render_plain_text(diag: &Diagnostic) -> String {
    let mut text = format!("{}:{}:{}: {}\n", diag.path, diag.file_line + 1, diag.column, diag.message);
    if let Some(line) = diag.context.get(diag.highlighted_index) {
        text.push_str(line);
        text.push('\n');
        let caret_col = diag.column.saturating_sub(1);
        text.push_str(&" ".repeat(caret_col));
        text.push_str("^\n");
    }
    text
}

/// Rewrite a stack-trace line referencing the generated source file to
/// prepend an inverse-video cell coordinate, using raw ANSI invert/reset
/// sequences (`\x1b[7m` / `\x1b[0m`) as the notebook stream expects them
/// emitted verbatim.
pub fn rewrite_stack_line(line: &str, rendered_path: &str, line_map: &LineMap) -> String {
    let Some(caps) = LOCATION_RE.captures(line) else { return line.to_string() };
    if &caps["path"] != rendered_path {
        return line.to_string();
    }
    let Ok(file_line_1based) = caps["line"].parse::<usize>() else { return line.to_string() };
    let file_line = file_line_1based.saturating_sub(1);
    let Some((cell_id, cell_line)) = line_map.get(file_line) else { return line.to_string() };
    if cell_line < &0 || cell_id.is_empty() {
        return line.to_string();
    }
    format!("\x1b[7mcell {cell_id}:{cell_line}\x1b[0m {line}")
}

/// The conventional interrupt marker prefixed to the final error when a
/// running program is killed mid-execution.
pub const INTERRUPT_MARKER: &str = "KeyboardInterrupt";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_location_prefixed_lines() {
        let line_map: LineMap = vec![("cell-1".to_string(), 0), ("cell-1".to_string(), 1), ("cell-1".to_string(), 2)];
        let output = "main.go:2:5: undefined: foo\nsome other line without location\n";
        let diags = parse_diagnostics(output, "package main\nfoo()\nmore\n", &line_map, 1);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].file_line, 1);
        assert_eq!(diags[0].column, 5);
        assert_eq!(diags[0].cell_line, Some(1));
    }

    #[test]
    fn html_escapes_context_lines() {
        let diag = Diagnostic {
            path: "main.go".into(),
            file_line: 0,
            column: 1,
            message: "<bad>".into(),
            cell_id: None,
            cell_line: None,
            context: vec!["a < b".to_string()],
            highlighted_index: 0,
        };
        let html = render_html(&diag);
        assert!(html.contains("a &lt; b"));
        assert!(html.contains("&lt;bad&gt;"));
    }

    #[test]
    fn plain_text_caret_points_at_column() {
        let diag = Diagnostic {
            path: "main.go".into(),
            file_line: 0,
            column: 3,
            message: "oops".into(),
            cell_id: None,
            cell_line: None,
            context: vec!["abcdef".to_string()],
            highlighted_index: 0,
        };
        let text = render_plain_text(&diag);
        let caret_line = text.lines().nth(2).unwrap();
        assert_eq!(caret_line, "  ^");
    }

    #[test]
    fn stack_line_rewrite_only_targets_rendered_path() {
        let line_map: LineMap = vec![("cell-1".to_string(), 4)];
        let rewritten = rewrite_stack_line("main.go:1:2: panic", "main.go", &line_map);
        assert!(rewritten.starts_with("\x1b[7m"));
        let unchanged = rewrite_stack_line("other.go:1:2: panic", "main.go", &line_map);
        assert_eq!(unchanged, "other.go:1:2: panic");
    }
}
