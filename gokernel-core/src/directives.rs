//! Cell command processor (C9): recognizes `%` kernel directives and `!`
//! shell escapes at the start of a line, strips them (and their
//! continuations) from the text handed to the compiler, and parses their
//! quoted-argument grammar.

/// One parsed directive line (and any continuation lines already joined
/// into it).
#[derive(Clone, Debug, PartialEq)]
pub enum Directive {
    Reset { reinit_manifest_only: bool },
    List,
    Remove(Vec<String>),
    Args(Vec<String>),
    AutoGet(bool),
    Env { name: String, value: String },
    Cd(Option<String>),
    Track(Option<String>),
    Untrack { targets: Vec<String>, prefix: bool },
    GoWorkFix,
    GoFlags(Vec<String>),
    WithInputs,
    WithPassword,
    MainMarker,
    ShellEscape { command: String, in_workspace: bool },
}

/// Result of stripping directives from a cell: the remaining compiler
/// source lines (directive lines removed, each remaining line still
/// mapped to its original cell-line index) plus the directives found, in
/// order, and whether a `%%`/`%main` marker was seen.
pub struct ProcessedCell {
    pub code_lines: Vec<(usize, String)>,
    pub directives: Vec<Directive>,
    pub has_main_marker: bool,
}

/// Split cell text into directive lines and ordinary code lines, joining
/// `\`-continued directive lines with a single space before parsing.
pub fn process_cell(text: &str) -> ProcessedCell {
    let raw_lines: Vec<&str> = text.lines().collect();
    let mut code_lines = Vec::new();
    let mut directives = Vec::new();
    let mut has_main_marker = false;

    let mut i = 0;
    while i < raw_lines.len() {
        let line = raw_lines[i];
        let trimmed = line.trim_start();

        if trimmed.starts_with('%') || trimmed.starts_with('!') {
            let mut joined = trimmed.trim_end_matches('\\').trim_end().to_string();
            let mut continued = trimmed.ends_with('\\');
            while continued && i + 1 < raw_lines.len() {
                i += 1;
                let next = raw_lines[i].trim();
                continued = next.ends_with('\\');
                let next_stripped = next.trim_end_matches('\\').trim_end();
                joined.push(' ');
                joined.push_str(next_stripped);
            }

            if let Some(directive) = parse_directive(&joined) {
                if matches!(directive, Directive::MainMarker) {
                    has_main_marker = true;
                }
                directives.push(directive);
            }
        } else {
            code_lines.push((i, line.to_string()));
        }
        i += 1;
    }

    ProcessedCell { code_lines, directives, has_main_marker }
}

fn parse_directive(line: &str) -> Option<Directive> {
    if let Some(rest) = line.strip_prefix("!*") {
        return Some(Directive::ShellEscape { command: rest.trim().to_string(), in_workspace: true });
    }
    if let Some(rest) = line.strip_prefix('!') {
        return Some(Directive::ShellEscape { command: rest.trim().to_string(), in_workspace: false });
    }

    let body = line.strip_prefix('%')?.trim();
    if body.is_empty() || body == "%" {
        return Some(Directive::MainMarker);
    }
    if body == "main" {
        return Some(Directive::MainMarker);
    }

    let args = tokenize_quoted(body);
    let (command, rest) = args.split_first()?;

    match command.as_str() {
        "reset" => Some(Directive::Reset { reinit_manifest_only: rest.first().map(|s| s == "manifest").unwrap_or(false) }),
        "list" | "ls" => Some(Directive::List),
        "remove" | "rm" => Some(Directive::Remove(rest.to_vec())),
        "args" => Some(Directive::Args(rest.to_vec())),
        "autoget" => Some(Directive::AutoGet(true)),
        "noautoget" => Some(Directive::AutoGet(false)),
        "env" => {
            let name = rest.first()?.clone();
            let value = rest.get(1..).map(|v| v.join(" ")).unwrap_or_default();
            Some(Directive::Env { name, value })
        }
        "cd" => Some(Directive::Cd(rest.first().cloned())),
        "track" => Some(Directive::Track(rest.first().cloned())),
        "untrack" => {
            let prefix = rest.last().map(|s| s == "...").unwrap_or(false);
            let targets = if prefix { rest[..rest.len() - 1].to_vec() } else { rest.to_vec() };
            Some(Directive::Untrack { targets, prefix })
        }
        "goworkfix" => Some(Directive::GoWorkFix),
        "goflags" => Some(Directive::GoFlags(rest.to_vec())),
        "with_inputs" => Some(Directive::WithInputs),
        "with_password" => Some(Directive::WithPassword),
        _ => None,
    }
}

/// A minimal quoted-argument tokenizer: splits on whitespace outside
/// double quotes, and recognizes `\n`, `\t`, `\"`, `\\` escapes inside
/// quotes.
fn tokenize_quoted(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_current = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_current = true;
            }
            '\\' if in_quotes => match chars.next() {
                Some('n') => current.push('\n'),
                Some('t') => current.push('\t'),
                Some('"') => current.push('"'),
                Some('\\') => current.push('\\'),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => current.push('\\'),
            },
            c if c.is_whitespace() && !in_quotes => {
                if has_current {
                    tokens.push(std::mem::take(&mut current));
                    has_current = false;
                }
            }
            c => {
                current.push(c);
                has_current = true;
            }
        }
    }
    if has_current {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_directive_lines_from_code() {
        let processed = process_cell("%ls\nfmt.Println(\"hi\")\n");
        assert_eq!(processed.code_lines.len(), 1);
        assert_eq!(processed.directives.len(), 1);
        assert_eq!(processed.directives[0], Directive::List);
    }

    #[test]
    fn joins_continuation_lines() {
        let processed = process_cell("%env FOO \\\nbar\n");
        assert_eq!(processed.directives[0], Directive::Env { name: "FOO".into(), value: "bar".into() });
    }

    #[test]
    fn recognizes_main_marker() {
        let processed = process_cell("%%\nfmt.Println(\"hi\")\n");
        assert!(processed.has_main_marker);
    }

    #[test]
    fn untrack_with_ellipsis_is_prefix() {
        let processed = process_cell("%untrack ../foo ...\n");
        assert_eq!(processed.directives[0], Directive::Untrack { targets: vec!["../foo".to_string()], prefix: true });
    }

    #[test]
    fn shell_escape_in_workspace_variant() {
        let processed = process_cell("!*ls -la\n");
        assert_eq!(processed.directives[0], Directive::ShellEscape { command: "ls -la".into(), in_workspace: true });
    }

    #[test]
    fn quoted_args_support_escapes() {
        let tokens = tokenize_quoted(r#"remove "a b" c\d"#);
        assert_eq!(tokens, vec!["remove".to_string(), "a b".to_string(), "c\\d".to_string()]);
    }
}
