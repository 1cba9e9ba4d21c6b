//! Source parser (C3): turns a generated `.go` file into a fresh
//! [`DeclStore`], using the Go grammar's own AST rather than hand-rolled
//! text scanning — the Rust-idiomatic equivalent of walking `go/ast`.
//!
//! Grounded in the same `tree-sitter` + `tree-sitter-go` combination used
//! for Go source analysis elsewhere in the ecosystem: a single static
//! [`Language`], and queries matching named node kinds rather than brittle
//! numeric offsets.

use std::path::Path;
use std::sync::LazyLock;

use tree_sitter::{Language, Node, Parser, Tree};

use crate::errors::{ParseError, Result};
use crate::store::{
    self, CellLines, ConstChain, Cursor, DeclKind, DeclStore, Declaration, TupleLink, SYNTHESIZED_LINE,
};

static LANGUAGE: LazyLock<Language> = LazyLock::new(|| tree_sitter_go::LANGUAGE.into());

fn new_parser() -> Parser {
    let mut parser = Parser::new();
    parser.set_language(&LANGUAGE).expect("bundled tree-sitter-go grammar must load");
    parser
}

/// A file-line (0-based) -> (cell-id, cell-line) map, as produced by the
/// renderer or by the cell writer before the first ever parse.
pub type LineMap = Vec<(String, i64)>;

/// Parse a primary source file (and, if memorized declarations must remain
/// visible to the language server despite an unparseable current cell, an
/// alternative file) into a fresh [`DeclStore`].
pub struct SourceParser {
    parser: Parser,
}

impl Default for SourceParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser {
    pub fn new() -> Self {
        Self { parser: new_parser() }
    }

    /// Parse the file at `path`. `cursor` is a byte-offset (line, column)
    /// cursor in the file being parsed, if any; `line_map` maps each file
    /// line back to its originating `(cell_id, cell_line)` for propagation
    /// into [`CellLines`].
    pub fn parse_file(&mut self, path: &Path, cursor: Cursor, line_map: Option<&LineMap>) -> Result<DeclStore> {
        let text = std::fs::read_to_string(path).map_err(ParseError::Read)?;
        self.parse_str(&text, path, cursor, line_map)
    }

    pub fn parse_str(
        &mut self,
        text: &str,
        path: &Path,
        cursor: Cursor,
        line_map: Option<&LineMap>,
    ) -> Result<DeclStore> {
        let tree = self
            .parser
            .parse(text, None)
            .ok_or_else(|| ParseError::Rejected { path: path.to_path_buf(), detail: "grammar returned no tree".into() })?;

        if tree.root_node().has_error() {
            return Err(ParseError::Rejected { path: path.to_path_buf(), detail: "syntax error in generated source".into() }.into());
        }

        Ok(extract(&tree, text, cursor, line_map))
    }
}

fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn line_range(node: Node) -> (usize, usize) {
    (node.start_position().row, node.end_position().row)
}

/// Compute a cursor relative to a declaration's first line, and the
/// corresponding column, if `cursor` (file-absolute, byte offsets) falls
/// within `node`'s line range.
fn relative_cursor(node: Node, cursor: Cursor) -> Cursor {
    if cursor.is_none() {
        return Cursor::NONE;
    }
    let (start, end) = line_range(node);
    if cursor.line >= start && cursor.line <= end {
        Cursor::new(cursor.line - start, cursor.column)
    } else {
        Cursor::NONE
    }
}

fn cell_lines_for(node: Node, cell_id_and_lines: Option<&LineMap>) -> CellLines {
    let Some(map) = cell_id_and_lines else {
        return CellLines::default();
    };
    let (start, end) = line_range(node);
    let cell_id = map.get(start).map(|(id, _)| id.clone()).unwrap_or_default();
    let lines: Vec<i64> =
        (start..=end).map(|row| map.get(row).map(|(_, l)| *l).unwrap_or(SYNTHESIZED_LINE)).collect();
    CellLines::new(cell_id, lines)
}

fn extract(tree: &Tree, source: &str, cursor: Cursor, line_map: Option<&LineMap>) -> DeclStore {
    let mut decl_store = DeclStore::new();
    let root = tree.root_node();
    let mut walk = root.walk();

    for child in root.children(&mut walk) {
        match child.kind() {
            "import_declaration" => extract_imports(child, source, cursor, line_map, &mut decl_store),
            "function_declaration" => extract_function(child, source, cursor, line_map, &mut decl_store, None),
            "method_declaration" => extract_method(child, source, cursor, line_map, &mut decl_store),
            "const_declaration" => extract_const_block(child, source, cursor, line_map, &mut decl_store),
            "var_declaration" => extract_var_block(child, source, cursor, line_map, &mut decl_store),
            "type_declaration" => extract_type_block(child, source, cursor, line_map, &mut decl_store),
            _ => {}
        }
    }

    decl_store
}

fn extract_imports(node: Node, source: &str, cursor: Cursor, line_map: Option<&LineMap>, store: &mut DeclStore) {
    let mut cursor_walk = node.walk();
    for spec in node.children(&mut cursor_walk) {
        if spec.kind() != "import_spec" {
            continue;
        }
        let path_node = spec.child_by_field_name("path");
        let Some(path_node) = path_node else { continue };
        let raw_path = node_text(path_node, source).trim_matches(|c| c == '"' || c == '`');
        let alias = spec.child_by_field_name("name").map(|n| node_text(n, source).to_string());

        let key = store::import_key(raw_path, alias.as_deref());
        let mut decl = Declaration::new(DeclKind::Import, node_text(spec, source));
        decl.cursor = relative_cursor(spec, cursor);
        decl.cell_lines = cell_lines_for(spec, line_map);
        store.imports.insert(key, decl);
    }
}

fn extract_function(
    node: Node,
    source: &str,
    cursor: Cursor,
    line_map: Option<&LineMap>,
    store: &mut DeclStore,
    receiver_type: Option<String>,
) {
    let Some(name_node) = node.child_by_field_name("name") else { return };
    let name = node_text(name_node, source);
    if name == "main" {
        return; // main is never memorized (C7 extracts it separately).
    }

    let key = store::function_key(name, receiver_type.as_deref());
    let mut decl = Declaration::new(DeclKind::Function, node_text(node, source));
    decl.cursor = relative_cursor(node, cursor);
    decl.cell_lines = cell_lines_for(node, line_map);
    store.functions.insert(key, decl);
}

fn extract_method(node: Node, source: &str, cursor: Cursor, line_map: Option<&LineMap>, store: &mut DeclStore) {
    let receiver_type = node
        .child_by_field_name("receiver")
        .and_then(|recv| {
            let mut w = recv.walk();
            recv.children(&mut w).find(|c| c.kind() == "parameter_declaration")
        })
        .and_then(|param| param.child_by_field_name("type"))
        .map(|t| {
            let mut text = node_text(t, source).to_string();
            if let Some(stripped) = text.strip_prefix('*') {
                text = stripped.to_string();
            }
            text
        });

    extract_function(node, source, cursor, line_map, store, receiver_type);
}

fn extract_type_block(node: Node, source: &str, cursor: Cursor, line_map: Option<&LineMap>, store: &mut DeclStore) {
    let mut walk = node.walk();
    for spec in node.children(&mut walk) {
        if spec.kind() != "type_spec" && spec.kind() != "type_alias" {
            continue;
        }
        let Some(name_node) = spec.child_by_field_name("name") else { continue };
        let key = node_text(name_node, source).to_string();
        let mut decl = Declaration::new(DeclKind::Type, node_text(spec, source));
        decl.cursor = relative_cursor(spec, cursor);
        decl.cell_lines = cell_lines_for(spec, line_map);
        store.types.insert(key, decl);
    }
}

fn extract_const_block(node: Node, source: &str, cursor: Cursor, line_map: Option<&LineMap>, store: &mut DeclStore) {
    let mut walk = node.walk();
    let specs: Vec<Node> = node.children(&mut walk).filter(|c| c.kind() == "const_spec").collect();

    for (index, spec) in specs.iter().enumerate() {
        let name_nodes = spec_name_nodes(*spec);
        for name_node in name_nodes {
            let key = node_text(name_node, source).to_string();
            let chain = ConstChain {
                prev: if index == 0 { None } else { Some(index - 1) },
                next: if index + 1 < specs.len() { Some(index + 1) } else { None },
                index,
            };
            let mut decl = Declaration::new(DeclKind::Constant, node_text(*spec, source));
            decl.cursor = relative_cursor(*spec, cursor);
            decl.cell_lines = cell_lines_for(*spec, line_map);
            decl.const_chain = Some(chain);
            store.constants.insert(key, decl);
        }
    }
}

/// `const_spec`/`var_spec` may bind more than one name (`a, b = 1, 2`); the
/// grammar exposes these as a sequence of `identifier` children rather than
/// a single `name` field once there is more than one.
fn spec_name_nodes(spec: Node) -> Vec<Node> {
    let mut walk = spec.walk();
    let mut names = Vec::new();
    for child in spec.children(&mut walk) {
        if child.kind() == "identifier" {
            names.push(child);
        } else if child.kind() == "=" || child.kind() == "expression_list" {
            break;
        }
    }
    names
}

fn extract_var_block(node: Node, source: &str, cursor: Cursor, line_map: Option<&LineMap>, store: &mut DeclStore) {
    let mut walk = node.walk();
    for spec in node.children(&mut walk) {
        if spec.kind() != "var_spec" {
            continue;
        }
        let names = spec_name_nodes(spec);
        let values_len = spec
            .child_by_field_name("value")
            .map(|v| {
                let mut w = v.walk();
                if v.kind() == "expression_list" {
                    v.children(&mut w).filter(|c| c.is_named()).count()
                } else {
                    1
                }
            })
            .unwrap_or(0);

        let is_tuple = names.len() > 1 && values_len == 1;
        let keys: Vec<String> = names.iter().map(|n| store::variable_key(node_text(*n, source))).collect();

        for key in &keys {
            let mut decl = Declaration::new(DeclKind::Variable, node_text(spec, source));
            decl.cursor = relative_cursor(spec, cursor);
            decl.cell_lines = cell_lines_for(spec, line_map);
            if is_tuple {
                decl.tuple = Some(TupleLink { siblings: keys.clone() });
            }
            store.variables.insert(key.clone(), decl);
        }
    }
}

/// Convenience entry point used by the execution pipeline: parse a single
/// in-memory snippet without touching disk (used for e.g. re-parsing the
/// auto-imported file to diff retained imports).
pub fn parse_in_memory(text: &str) -> Result<DeclStore> {
    let mut parser = SourceParser::new();
    parser.parse_str(text, Path::new("<memory>"), Cursor::NONE, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> DeclStore {
        let mut p = SourceParser::new();
        p.parse_str(src, Path::new("main.go"), Cursor::NONE, None).expect("parses")
    }

    #[test]
    fn extracts_function_by_name() {
        let store = parse("package main\n\nfunc incr(x int) int { return x + 1 }\n");
        assert!(store.functions.contains_key("incr"));
        assert!(store.functions["incr"].text.contains("return x + 1"));
    }

    #[test]
    fn extracts_method_with_receiver_key() {
        let store = parse("package main\n\ntype Foo struct{}\n\nfunc (f *Foo) Bar() {}\n");
        assert!(store.functions.contains_key("Foo~Bar"));
        assert!(store.types.contains_key("Foo"));
    }

    #[test]
    fn main_is_never_memorized() {
        let store = parse("package main\n\nfunc main() { println(\"hi\") }\n");
        assert!(!store.functions.contains_key("main"));
    }

    #[test]
    fn extracts_imports_with_alias_and_dot() {
        let store = parse(
            "package main\n\nimport (\n\t\"fmt\"\n\tf \"fmt\"\n\t. \"fmt\"\n)\n",
        );
        assert!(store.imports.contains_key("fmt"));
        assert!(store.imports.contains_key("f"));
        assert!(store.imports.contains_key(".~fmt"));
    }

    #[test]
    fn extracts_tuple_variable_binding() {
        let store = parse("package main\n\nvar a, b = incr(1)\n");
        assert!(store.variables["a"].tuple.is_some());
        assert_eq!(store.variables["a"].tuple.as_ref().unwrap().siblings, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn rejects_unbalanced_source() {
        let mut p = SourceParser::new();
        let err = p.parse_str("package main\n\nfunc broken( {\n", Path::new("main.go"), Cursor::NONE, None);
        assert!(err.is_err());
    }
}
