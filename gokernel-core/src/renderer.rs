//! Source renderer (C4): emits one compilable `.go` file from a
//! [`DeclStore`] plus a `main` body, threading a (line, cursor) pair so the
//! returned cursor tracks whichever rendered line carries it, and building
//! the file-line -> (cell-id, cell-line) map the parser consumes on the
//! next pass.

use crate::parser::LineMap;
use crate::store::{Cursor, DeclStore, Declaration, SYNTHESIZED_LINE};

/// Result of a render pass.
pub struct Rendered {
    pub source: String,
    pub cursor: Cursor,
    pub line_map: LineMap,
}

/// Source renderer: stateless aside from configuration, mirroring
/// [`crate::parser::SourceParser`]'s shape.
pub struct SourceRenderer {
    package_name: String,
    init_prefix: String,
}

impl SourceRenderer {
    pub fn new(package_name: impl Into<String>, init_prefix: impl Into<String>) -> Self {
        Self { package_name: package_name.into(), init_prefix: init_prefix.into() }
    }

    /// Render `store` plus an optional verbatim `main` function body (the
    /// text of `func main() { ... }` extracted from the current cell, or
    /// `None` to synthesize a linkable stub).
    pub fn render(&self, store: &DeclStore, main: Option<&str>, input_cursor: Cursor) -> Rendered {
        let mut out = Writer::new(input_cursor);

        out.push_line(format!("package {}", self.package_name), None);
        out.push_line(String::new(), None);

        self.render_imports(store, &mut out);
        self.render_section(&store.types, &mut out);
        self.render_constants(store, &mut out);
        self.render_section(&store.variables, &mut out);
        self.render_functions(store, &mut out);
        self.render_main(main, &mut out);

        Rendered { source: out.text, cursor: out.found_cursor, line_map: out.line_map }
    }

    fn render_imports(&self, store: &DeclStore, out: &mut Writer) {
        if store.imports.is_empty() {
            return;
        }
        out.push_line("import (".to_string(), None);
        let mut keys: Vec<&String> = store.imports.keys().collect();
        keys.sort();
        for key in keys {
            let decl = &store.imports[key];
            out.push_decl_text(&format!("\t{}", decl.text.trim()), decl);
        }
        out.push_line(")".to_string(), None);
        out.push_line(String::new(), None);
    }

    fn render_section(&self, table: &std::collections::HashMap<String, Declaration>, out: &mut Writer) {
        if table.is_empty() {
            return;
        }
        let mut keys: Vec<&String> = table.keys().collect();
        keys.sort();
        for key in keys {
            let decl = &table[key];
            out.push_decl_text(decl.text.trim_end(), decl);
            out.push_line(String::new(), None);
        }
    }

    /// Constants render ordered by head-of-chain (the record whose `prev`
    /// is `None`) and then walked via `next`, falling back to plain
    /// lexicographic order for any key whose chain metadata is absent.
    fn render_constants(&self, store: &DeclStore, out: &mut Writer) {
        if store.constants.is_empty() {
            return;
        }

        let mut keys: Vec<&String> = store.constants.keys().collect();
        keys.sort();

        let mut emitted = std::collections::HashSet::new();
        for key in keys {
            if emitted.contains(key) {
                continue;
            }
            let decl = &store.constants[key];
            let Some(chain) = &decl.const_chain else {
                out.push_decl_text(decl.text.trim_end(), decl);
                out.push_line(String::new(), None);
                emitted.insert(key.clone());
                continue;
            };
            if chain.prev.is_some() {
                continue; // not a head; will be emitted when we reach its head.
            }

            // Walk the chain from this head by index, looking up each
            // subsequent record by matching const_chain.index.
            let mut index = Some(chain.index);
            while let Some(i) = index {
                if let Some((k, d)) = store.constants.iter().find(|(_, d)| {
                    d.const_chain.as_ref().map(|c| c.index) == Some(i)
                }) {
                    out.push_decl_text(d.text.trim_end(), d);
                    emitted.insert(k.clone());
                    index = d.const_chain.as_ref().and_then(|c| c.next);
                } else {
                    break;
                }
            }
            out.push_line(String::new(), None);
        }

        // Anything never reached by a chain walk (orphaned by a partial
        // re-merge) still must render so it is not silently dropped.
        let mut remaining: Vec<&String> = store.constants.keys().filter(|k| !emitted.contains(*k)).collect();
        remaining.sort();
        for key in remaining {
            let decl = &store.constants[key];
            out.push_decl_text(decl.text.trim_end(), decl);
            out.push_line(String::new(), None);
        }
    }

    fn render_functions(&self, store: &DeclStore, out: &mut Writer) {
        if store.functions.is_empty() {
            return;
        }
        let mut keys: Vec<&String> = store.functions.keys().collect();
        keys.sort();
        for key in keys {
            let decl = &store.functions[key];
            let text = self.rewrite_init(key, &decl.text);
            out.push_decl_text(&text, decl);
            out.push_line(String::new(), None);
        }
    }

    /// Rewrite a memorized `init_<suffix>` function's name back to the
    /// language's `init` hook, matching only at the `func ` keyword
    /// boundary (an incidental `init_` substring inside a doc comment or
    /// string literal earlier in the text must not trigger a rewrite).
    fn rewrite_init(&self, key: &str, text: &str) -> String {
        if !key.starts_with(&self.init_prefix) {
            return text.to_string();
        }
        let marker = format!("func {key}(");
        if let Some(pos) = text.find(&marker) {
            let mut out = String::with_capacity(text.len());
            out.push_str(&text[..pos]);
            out.push_str("func init(");
            out.push_str(&text[pos + marker.len()..]);
            out
        } else {
            text.to_string()
        }
    }

    fn render_main(&self, main: Option<&str>, out: &mut Writer) {
        match main {
            Some(body) => out.push_decl_text(body.trim_end(), &Declaration::default()),
            None => out.push_line("func main() {\n\tflag.Parse()\n}".to_string(), None),
        }
    }
}

/// Threads the (line, cursor) pair and accumulates the file-line map while
/// writing section text.
struct Writer {
    text: String,
    line: usize,
    input_cursor: Cursor,
    found_cursor: Cursor,
    line_map: LineMap,
}

impl Writer {
    fn new(input_cursor: Cursor) -> Self {
        Self { text: String::new(), line: 0, input_cursor, found_cursor: Cursor::NONE, line_map: Vec::new() }
    }

    fn push_line(&mut self, line: String, cell: Option<(&str, i64)>) {
        self.text.push_str(&line);
        self.text.push('\n');
        match cell {
            Some((id, l)) => self.line_map.push((id.to_string(), l)),
            None => self.line_map.push((String::new(), SYNTHESIZED_LINE)),
        }
        self.line += 1;
    }

    /// Push possibly-multi-line declaration text, propagating its
    /// `CellLines` and carrying the cursor across the render if the
    /// declaration's relative cursor falls on one of its lines.
    fn push_decl_text(&mut self, text: &str, decl: &Declaration) {
        for (i, raw_line) in text.split('\n').enumerate() {
            let cell_line = decl.cell_lines.lines.get(i).copied().unwrap_or(SYNTHESIZED_LINE);
            let cell = if cell_line == SYNTHESIZED_LINE { None } else { Some((decl.cell_lines.cell_id.as_str(), cell_line)) };
            self.push_line(raw_line.to_string(), cell);

            if !decl.cursor.is_none() && decl.cursor.line == i {
                self.found_cursor = Cursor::new(self.line - 1, decl.cursor.column);
            }
        }
        let _ = self.input_cursor; // retained for symmetry with a future absolute-cursor mode.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ConstChain, DeclKind};

    #[test]
    fn renders_section_order() {
        let mut store = DeclStore::new();
        store.functions.insert("f".into(), Declaration::new(DeclKind::Function, "func f() {}"));
        store.types.insert("T".into(), Declaration::new(DeclKind::Type, "type T int"));
        store.imports.insert("fmt".into(), Declaration::new(DeclKind::Import, "\"fmt\""));

        let renderer = SourceRenderer::new("main", "init_");
        let rendered = renderer.render(&store, None, Cursor::NONE);

        let import_pos = rendered.source.find("import").unwrap();
        let type_pos = rendered.source.find("type T").unwrap();
        let func_pos = rendered.source.find("func f").unwrap();
        assert!(import_pos < type_pos);
        assert!(type_pos < func_pos);
    }

    #[test]
    fn rewrites_init_prefix_at_keyword_boundary_only() {
        let mut store = DeclStore::new();
        store.functions.insert(
            "init_a".into(),
            Declaration::new(DeclKind::Function, "// mentions init_ in a comment\nfunc init_a() {}"),
        );
        let renderer = SourceRenderer::new("main", "init_");
        let rendered = renderer.render(&store, None, Cursor::NONE);
        assert!(rendered.source.contains("func init("));
        assert!(rendered.source.contains("// mentions init_ in a comment"));
    }

    #[test]
    fn no_main_renders_stub() {
        let store = DeclStore::new();
        let renderer = SourceRenderer::new("main", "init_");
        let rendered = renderer.render(&store, None, Cursor::NONE);
        assert!(rendered.source.contains("flag.Parse()"));
    }

    #[test]
    fn const_chain_preserves_block_order() {
        let mut store = DeclStore::new();
        let mut a = Declaration::new(DeclKind::Constant, "A = iota");
        a.const_chain = Some(ConstChain { prev: None, next: Some(1), index: 0 });
        let mut b = Declaration::new(DeclKind::Constant, "B");
        b.const_chain = Some(ConstChain { prev: Some(0), next: None, index: 1 });
        store.constants.insert("A".into(), a);
        store.constants.insert("B".into(), b);

        let renderer = SourceRenderer::new("main", "init_");
        let rendered = renderer.render(&store, None, Cursor::NONE);
        assert!(rendered.source.find("A = iota").unwrap() < rendered.source.find('B').unwrap());
    }

    #[test]
    fn cursor_on_surviving_line_is_preserved() {
        let mut store = DeclStore::new();
        let mut decl = Declaration::new(DeclKind::Function, "func f() {\n\treturn\n}");
        decl.cursor = Cursor::new(1, 2);
        store.functions.insert("f".into(), decl);

        let renderer = SourceRenderer::new("main", "init_");
        let rendered = renderer.render(&store, None, Cursor::NONE);
        assert!(!rendered.cursor.is_none());
        let rendered_line = rendered.source.lines().nth(rendered.cursor.line).unwrap();
        assert_eq!(rendered_line.trim(), "return");
    }
}
