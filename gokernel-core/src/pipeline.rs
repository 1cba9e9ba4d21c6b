//! Execution pipeline (C7): parse -> merge -> auto-import -> dependency
//! fetch -> compile for one cell. Execution of the resulting binary (C8)
//! is handed off to the caller via [`CompileOutcome::Ready`] — the
//! multiplexer needs the wire-protocol and widget machinery that lives in
//! the `gokernel` binary crate, so it is not duplicated here.
//!
//! Callers are expected to drive cells one at a time through a single
//! consumer loop (e.g. draining a channel), which is what keeps execution
//! serialized per §5; this module does not itself own that channel.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::Config;
use crate::diagnostics::{self, Diagnostic};
use crate::directives::{process_cell, Directive, ProcessedCell};
use crate::parser::{self, LineMap, SourceParser};
use crate::renderer::SourceRenderer;
use crate::store::{Cursor, DeclStore, SYNTHESIZED_LINE};
use crate::tracker::FileTracker;
use crate::workspace::{CellMode, Workspace};

/// One `!`/`!*` shell escape resolved against any `%with_inputs`/
/// `%with_password` directive immediately preceding it in the same cell.
#[derive(Clone, Debug, PartialEq)]
pub struct ShellEscapeRequest {
    pub command: String,
    pub in_workspace: bool,
    pub interactive: bool,
    pub password: bool,
}

pub struct ExecutionRequest {
    pub cell_id: String,
    pub text: String,
    pub cursor: Cursor,
    pub test_mode: bool,
    pub wasm_mode: bool,
}

/// Outcome of everything through "compile"; [`Ready`](CompileOutcome::Ready)
/// hands the produced binary to the caller to run (C8).
pub enum CompileOutcome {
    /// Cell contained only directives/shell-escapes and produced no
    /// compilable code; `directive_output` carries any text directives
    /// like `%ls`/`%remove` want published immediately, and
    /// `shell_escapes` any `!`/`!*` lines the caller still needs to run.
    NoCompileNeeded { directive_output: Vec<String>, shell_escapes: Vec<ShellEscapeRequest> },
    ParseFailed(String),
    CompilerDiagnostics(Vec<Diagnostic>),
    Ready {
        binary_path: PathBuf,
        rendered_source: String,
        line_map: LineMap,
        args: Vec<String>,
        wasm_mode: bool,
        shell_escapes: Vec<ShellEscapeRequest>,
    },
}

/// Mutable per-kernel state the pipeline threads a cell through: the
/// canonical declaration store, process-wide environment, and working
/// directory, none of which change mid-execution (§9).
pub struct KernelState {
    pub store: DeclStore,
    pub env: HashMap<String, String>,
    pub cwd: PathBuf,
    pub argv: Vec<String>,
    pub auto_get: bool,
    pub goflags: Vec<String>,
}

impl KernelState {
    pub fn new(cwd: PathBuf) -> Self {
        Self { store: DeclStore::new(), env: HashMap::new(), cwd, argv: Vec::new(), auto_get: true, goflags: Vec::new() }
    }
}

pub struct Pipeline {
    pub workspace: Workspace,
    pub tracker: FileTracker,
    pub config: Config,
    pub package_name: &'static str,
    next_execution_id: u64,
}

impl Pipeline {
    pub fn new(workspace: Workspace, tracker: FileTracker, config: Config) -> Self {
        Self { workspace, tracker, config, package_name: "main", next_execution_id: 0 }
    }

    pub fn next_execution_id(&mut self) -> u64 {
        self.next_execution_id += 1;
        self.next_execution_id
    }

    /// Run steps 1-8 of the pipeline for one cell. Does not mutate
    /// `state.store` except on the final, separate [`Self::commit`] call —
    /// callers that get [`CompileOutcome::Ready`] must still run the
    /// binary (C8) and call [`Self::commit`] only after that run observably
    /// succeeds in the caller's judgment (the compile having succeeded is
    /// itself sufficient per §4.7 step 9, which this function implements;
    /// `commit` is a thin promote-the-copy step kept separate so the caller
    /// controls exactly when it happens relative to execution).
    pub async fn run(&mut self, state: &mut KernelState, request: ExecutionRequest) -> crate::errors::Result<(CompileOutcome, DeclStore)> {
        self.tracker.enumerate_updated(|_path| {
            tracing::debug!("tracked dependency changed; language server will be notified on next request");
        });

        let ProcessedCell { code_lines, directives, has_main_marker } = process_cell(&request.text);
        apply_pre_compile_directives(state, &mut self.tracker, &directives);

        let mut directive_output = render_directive_output(state, &directives);
        let shell_escapes = resolve_shell_escapes(&directives);

        if directives.iter().any(|d| matches!(d, Directive::GoWorkFix)) {
            match self.apply_goworkfix() {
                Ok(applied) => directive_output.extend(applied),
                Err(e) => directive_output.push(format!("goworkfix failed: {e}")),
            }
        }

        if code_lines.is_empty() {
            return Ok((CompileOutcome::NoCompileNeeded { directive_output, shell_escapes }, state.store.clone()));
        }

        let mode = if request.test_mode && request.wasm_mode {
            return Err(crate::errors::Error::Workspace("cell cannot request both test mode and wasm mode".into()));
        } else if request.test_mode {
            CellMode::Test
        } else if request.wasm_mode {
            CellMode::Wasm
        } else {
            CellMode::Normal
        };

        let (written_text, line_map, main_body) = write_cell_source(&request.cell_id, &code_lines, has_main_marker);
        let write_path = self.workspace.source_path(mode);
        tokio::fs::write(&write_path, &written_text).await?;

        let mut parser = SourceParser::new();
        let parsed = match parser.parse_str(&written_text, &write_path, request.cursor, Some(&line_map)) {
            Ok(store) => store,
            Err(crate::errors::Error::Parse(e)) => return Ok((CompileOutcome::ParseFailed(e.to_string()), state.store.clone())),
            Err(e) => return Err(e),
        };

        let mut merged = state.store.copy();
        merged.merge(&parsed);
        merged.drop_func_init();

        let renderer = SourceRenderer::new(self.package_name, self.config.init_prefix.clone());
        let rendered = renderer.render(&merged, main_body.as_deref(), request.cursor);

        let primary_path = self.workspace.source_path(CellMode::Normal);
        tokio::fs::write(&primary_path, &rendered.source).await?;

        if let Err(diags) = self.run_autoimport(&primary_path, &rendered.line_map).await? {
            return Ok((CompileOutcome::CompilerDiagnostics(diags), state.store.clone()));
        }
        self.drop_unused_imports(&primary_path, &mut merged)?;

        if state.auto_get {
            if let Err(message) = self.run_dependency_fetch().await {
                return Err(crate::errors::Error::DependencyFetchFailure { message });
            }
        }

        match self.run_compile(mode, &state.env, &state.cwd, &state.goflags).await? {
            Some(diags) => Ok((CompileOutcome::CompilerDiagnostics(diags), state.store.clone())),
            None => {
                let outcome = CompileOutcome::Ready {
                    binary_path: self.workspace.binary_path(),
                    rendered_source: rendered.source,
                    line_map: rendered.line_map,
                    args: state.argv.clone(),
                    wasm_mode: request.wasm_mode,
                    shell_escapes,
                };
                Ok((outcome, merged))
            }
        }
    }

    /// Promote a tentative merge to canonical, called by the caller once a
    /// compile has succeeded (and, for non-WASM cells, once C8 has finished
    /// running the binary).
    pub fn commit(&self, state: &mut KernelState, merged: DeclStore) {
        state.store = merged;
    }

    async fn run_autoimport(&self, path: &std::path::Path, _line_map: &LineMap) -> crate::errors::Result<std::result::Result<(), Vec<Diagnostic>>> {
        let output = Command::new(&self.config.autoimport_binary)
            .arg("-w")
            .arg(path)
            .current_dir(self.workspace.root())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if output.status.success() {
            Ok(Ok(()))
        } else {
            let combined = format!("{}{}", String::from_utf8_lossy(&output.stdout), String::from_utf8_lossy(&output.stderr));
            let rendered = tokio::fs::read_to_string(path).await.unwrap_or_default();
            let line_map = vec![(String::new(), SYNTHESIZED_LINE); rendered.lines().count()];
            Ok(Err(diagnostics::parse_diagnostics(&combined, &rendered, &line_map, self.config.diagnostic_context_lines)))
        }
    }

    /// Re-parse the auto-imported file to identify imports the tool
    /// retained (used) and drop all memorized imports it deemed unused.
    fn drop_unused_imports(&self, path: &std::path::Path, merged: &mut DeclStore) -> crate::errors::Result<()> {
        let text = std::fs::read_to_string(path)?;
        let retained = parser::parse_in_memory(&text)?;
        merged.imports.retain(|key, _| retained.imports.contains_key(key));
        Ok(())
    }

    async fn run_dependency_fetch(&self) -> std::result::Result<(), String> {
        let output = Command::new(&self.config.compiler_binary)
            .args(["get", "./..."])
            .current_dir(self.workspace.root())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| e.to_string())?;

        if output.status.success() {
            return Ok(());
        }

        let combined = format!("{}{}", String::from_utf8_lossy(&output.stdout), String::from_utf8_lossy(&output.stderr));
        const WORKSPACE_MANIFEST_MARKER: &str = "cannot query module";
        if combined.contains(WORKSPACE_MANIFEST_MARKER) {
            Err(format!("{combined}\nhint: this may be a go.work replace issue; try the %goworkfix directive"))
        } else {
            Err(combined)
        }
    }

    async fn run_compile(
        &self,
        mode: CellMode,
        env: &HashMap<String, String>,
        cwd: &std::path::Path,
        goflags: &[String],
    ) -> crate::errors::Result<Option<Vec<Diagnostic>>> {
        let mut command = Command::new(&self.config.compiler_binary);
        let binary_path = self.workspace.binary_path();

        match mode {
            CellMode::Test => {
                command.args(["test", "-c"]).args(goflags).arg("-o").arg(&binary_path);
            }
            CellMode::Wasm => {
                command.args(["build"]).args(goflags).arg("-o").arg(&binary_path).env("GOOS", "js").env("GOARCH", "wasm");
            }
            CellMode::Normal => {
                command.args(["build"]).args(goflags).arg("-o").arg(&binary_path);
            }
        }

        command.current_dir(&self.workspace.root()).envs(env).current_dir(cwd.join(self.workspace.root())).stdout(Stdio::piped()).stderr(Stdio::piped());
        // current_dir called twice intentionally chooses workspace.root(); cwd
        // is process-wide and affects *child program* execution, not the build.
        command.current_dir(self.workspace.root());

        let output = command.output().await?;
        if output.status.success() {
            return Ok(None);
        }

        let combined = format!("{}{}", String::from_utf8_lossy(&output.stdout), String::from_utf8_lossy(&output.stderr));
        let rendered_path = self.workspace.source_path(CellMode::Normal);
        let rendered = tokio::fs::read_to_string(&rendered_path).await.unwrap_or_default();
        let line_map = vec![(String::new(), SYNTHESIZED_LINE); rendered.lines().count()];
        Ok(Some(diagnostics::parse_diagnostics(&combined, &rendered, &line_map, self.config.diagnostic_context_lines)))
    }

    /// `%goworkfix` (§4.9): resolve each local `use` entry in `go.work`
    /// against its own module name and add (or refresh) a matching
    /// `replace` directive in the primary `go.mod`, which is what actually
    /// makes `go get`/`go build` see those modules without the workspace
    /// file in play. Returns the replace lines it wrote, for `%`-output.
    fn apply_goworkfix(&self) -> crate::errors::Result<Vec<String>> {
        let Ok(work_text) = std::fs::read_to_string(self.workspace.go_work_path()) else {
            return Ok(Vec::new());
        };
        let mut go_mod_text = std::fs::read_to_string(self.workspace.go_mod_path())?;
        let mut applied = Vec::new();

        for dir in workspace_use_targets(&work_text) {
            let target = self.workspace.root().join(&dir);
            let Ok(target_manifest) = std::fs::read_to_string(target.join("go.mod")) else { continue };
            let Some(module_name) = module_name_from_manifest(&target_manifest) else { continue };
            let replace_line = format!("replace {} => {}", module_name, target.display());
            go_mod_text = upsert_replace_line(&go_mod_text, &module_name, &replace_line);
            applied.push(replace_line);
        }

        std::fs::write(self.workspace.go_mod_path(), go_mod_text)?;
        Ok(applied)
    }
}

/// Every `use <dir>` (or `use (...)` block) entry in a `go.work` file.
fn workspace_use_targets(work_text: &str) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut in_use_block = false;
    for raw_line in work_text.lines() {
        let line = raw_line.trim();
        if in_use_block {
            if line == ")" {
                in_use_block = false;
            } else if !line.is_empty() {
                out.push(PathBuf::from(line));
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("use ") {
            let rest = rest.trim();
            if rest == "(" {
                in_use_block = true;
            } else if !rest.is_empty() {
                out.push(PathBuf::from(rest));
            }
        }
    }
    out
}

/// The module name declared by a `go.mod`'s leading `module <name>` line.
fn module_name_from_manifest(manifest_text: &str) -> Option<String> {
    manifest_text.lines().find_map(|line| line.trim().strip_prefix("module ").map(|name| name.trim().to_string()))
}

/// Replace an existing `replace <module_name> => ...` line in `go_mod_text`
/// with `replace_line`, or append it if no such line exists yet.
fn upsert_replace_line(go_mod_text: &str, module_name: &str, replace_line: &str) -> String {
    let prefix = format!("replace {module_name} =>");
    let mut found = false;
    let mut lines: Vec<String> = go_mod_text
        .lines()
        .map(|line| {
            if line.trim_start().starts_with(&prefix) {
                found = true;
                replace_line.to_string()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !found {
        lines.push(replace_line.to_string());
    }
    lines.join("\n") + "\n"
}

/// Pair each `!`/`!*` shell escape with any `%with_inputs`/`%with_password`
/// directive immediately preceding it in source order.
fn resolve_shell_escapes(directives: &[Directive]) -> Vec<ShellEscapeRequest> {
    let mut out = Vec::new();
    let mut interactive = false;
    let mut password = false;
    for directive in directives {
        match directive {
            Directive::WithInputs => interactive = true,
            Directive::WithPassword => password = true,
            Directive::ShellEscape { command, in_workspace } => {
                out.push(ShellEscapeRequest { command: command.clone(), in_workspace: *in_workspace, interactive, password });
                interactive = false;
                password = false;
            }
            _ => {}
        }
    }
    out
}

fn apply_pre_compile_directives(state: &mut KernelState, tracker: &mut FileTracker, directives: &[Directive]) {
    for directive in directives {
        match directive {
            Directive::Reset { reinit_manifest_only } => {
                if !reinit_manifest_only {
                    state.store.clear();
                }
            }
            Directive::Remove(keys) => {
                state.store.remove_keys(keys);
            }
            Directive::Args(args) => state.argv = args.clone(),
            Directive::AutoGet(on) => state.auto_get = *on,
            Directive::GoFlags(flags) => state.goflags = flags.clone(),
            Directive::Env { name, value } => {
                state.env.insert(name.clone(), value.clone());
            }
            Directive::Cd(Some(dir)) => state.cwd = state.cwd.join(dir),
            Directive::Track(Some(path)) => {
                let _ = tracker.track(std::path::Path::new(path));
            }
            Directive::Untrack { targets, prefix } => {
                for target in targets {
                    tracker.untrack(std::path::Path::new(target), *prefix);
                }
            }
            _ => {}
        }
    }
}

fn render_directive_output(state: &KernelState, directives: &[Directive]) -> Vec<String> {
    let mut out = Vec::new();
    for directive in directives {
        match directive {
            Directive::List => out.push(render_store_listing(&state.store)),
            Directive::Remove(keys) => out.push(format!("removed: {}", keys.join(", "))),
            _ => {}
        }
    }
    out
}

fn render_store_listing(store: &DeclStore) -> String {
    let mut html = String::from("<div class=\"gokernel-declarations\">\n");
    for (label, keys) in [
        ("imports", store.imports.keys().collect::<Vec<_>>()),
        ("types", store.types.keys().collect()),
        ("constants", store.constants.keys().collect()),
        ("variables", store.variables.keys().collect()),
        ("functions", store.functions.keys().collect()),
    ] {
        let mut sorted: Vec<&String> = keys;
        sorted.sort();
        html.push_str(&format!("  <div class=\"section\"><b>{label}</b>: {}</div>\n", sorted.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")));
    }
    html.push_str("</div>\n");
    html
}

/// Write cell lines into the written source, wrapping code after a
/// `%%`/`%main` marker into a synthesized `main` body. Returns the written
/// text (a bare snippet, parsed only to extract declarations — not itself
/// the rendered compilable file), the file-line map, and any extracted
/// `main` body text.
fn write_cell_source(cell_id: &str, code_lines: &[(usize, String)], has_main_marker: bool) -> (String, LineMap, Option<String>) {
    let mut text = String::from("package main\n\n");
    let mut line_map: LineMap = vec![(String::new(), SYNTHESIZED_LINE), (String::new(), SYNTHESIZED_LINE)];

    let mut main_lines = Vec::new();

    if has_main_marker {
        text.push_str("func main() {\n");
        line_map.push((String::new(), SYNTHESIZED_LINE));
        for (cell_line, content) in code_lines {
            text.push('\t');
            text.push_str(content);
            text.push('\n');
            line_map.push((cell_id.to_string(), *cell_line as i64));
            main_lines.push(content.clone());
        }
        text.push_str("}\n");
        line_map.push((String::new(), SYNTHESIZED_LINE));
    } else {
        for (cell_line, content) in code_lines {
            text.push_str(content);
            text.push('\n');
            line_map.push((cell_id.to_string(), *cell_line as i64));
        }
    }

    let main_body = has_main_marker.then(|| format!("func main() {{\n{}\n}}", main_lines.iter().map(|l| format!("\t{l}")).collect::<Vec<_>>().join("\n")));

    (text, line_map, main_body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_main_wrapper_when_marked() {
        let lines = vec![(2usize, "fmt.Println(\"hi\")".to_string())];
        let (text, line_map, main_body) = write_cell_source("cell-1", &lines, true);
        assert!(text.contains("func main()"));
        assert!(main_body.unwrap().contains("fmt.Println"));
        assert!(line_map.iter().any(|(id, l)| id == "cell-1" && *l == 2));
    }

    #[test]
    fn top_level_declarations_are_written_bare() {
        let lines = vec![(0usize, "func incr(x int) int { return x + 1 }".to_string())];
        let (text, _map, main_body) = write_cell_source("cell-1", &lines, false);
        assert!(text.contains("func incr"));
        assert!(main_body.is_none());
    }

    #[test]
    fn resolve_shell_escapes_pairs_with_preceding_with_inputs() {
        let processed = process_cell("%with_inputs\n!read -r name\n!echo bare\n");
        let resolved = resolve_shell_escapes(&processed.directives);
        assert_eq!(resolved.len(), 2);
        assert!(resolved[0].interactive);
        assert!(!resolved[0].password);
        assert!(!resolved[1].interactive);
    }

    #[test]
    fn resolve_shell_escapes_tracks_in_workspace_flag() {
        let processed = process_cell("!*ls -la\n");
        let resolved = resolve_shell_escapes(&processed.directives);
        assert_eq!(resolved, vec![ShellEscapeRequest { command: "ls -la".into(), in_workspace: true, interactive: false, password: false }]);
    }

    #[test]
    fn workspace_use_targets_parses_single_line_and_block_forms() {
        let single = workspace_use_targets("go 1.22\n\nuse ./sibling\n");
        assert_eq!(single, vec![PathBuf::from("./sibling")]);

        let block = workspace_use_targets("go 1.22\n\nuse (\n\t./a\n\t./b\n)\n");
        assert_eq!(block, vec![PathBuf::from("./a"), PathBuf::from("./b")]);
    }

    #[test]
    fn module_name_from_manifest_reads_leading_module_line() {
        assert_eq!(module_name_from_manifest("module example.com/sibling\n\ngo 1.22\n"), Some("example.com/sibling".to_string()));
        assert_eq!(module_name_from_manifest("go 1.22\n"), None);
    }

    #[test]
    fn upsert_replace_line_appends_when_absent() {
        let original = "module gokernel_cell\n\ngo 1.22\n";
        let updated = upsert_replace_line(original, "example.com/sibling", "replace example.com/sibling => /tmp/sibling");
        assert!(updated.contains("replace example.com/sibling => /tmp/sibling"));
    }

    #[test]
    fn upsert_replace_line_replaces_existing_entry() {
        let original = "module gokernel_cell\n\nreplace example.com/sibling => /old/path\n";
        let updated = upsert_replace_line(original, "example.com/sibling", "replace example.com/sibling => /new/path");
        assert!(updated.contains("/new/path"));
        assert!(!updated.contains("/old/path"));
        assert_eq!(updated.matches("replace example.com/sibling").count(), 1);
    }
}
