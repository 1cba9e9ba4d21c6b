//! The declaration store (C2): an in-memory, keyed registry of the
//! top-level declarations memorized across cells, plus the data model
//! types (`Cursor`, `CellLines`) shared by the parser and renderer.

use std::collections::HashMap;

use uuid::Uuid;

/// A (line, column) position in byte offsets over a UTF-8 buffer.
///
/// `Cursor::NONE` is the sentinel meaning "no cursor was supplied or it did
/// not survive the operation".
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Cursor {
    pub line: usize,
    pub column: usize,
}

impl Cursor {
    pub const NONE: Cursor = Cursor { line: usize::MAX, column: usize::MAX };

    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

/// Sentinel cell-line value for a synthesized (non-cell-authored) output
/// line, e.g. a rendered blank line between sections or a stub `main`.
pub const SYNTHESIZED_LINE: i64 = -1;

/// Per-declaration mapping of rendered file line -> originating cell line.
///
/// `lines[i]` is the cell line that produced the declaration's *i*-th line
/// in the file it was parsed from, or [`SYNTHESIZED_LINE`] if that line was
/// synthesized rather than copied verbatim from a cell.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CellLines {
    pub cell_id: String,
    pub lines: Vec<i64>,
}

impl CellLines {
    pub fn new(cell_id: impl Into<String>, lines: Vec<i64>) -> Self {
        Self { cell_id: cell_id.into(), lines }
    }
}

/// Which of the five declaration tables a key belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DeclKind {
    Import,
    Type,
    Constant,
    Variable,
    Function,
}

/// A back-reference linking sibling members of a multi-value tuple binding
/// (`a, b := f()`) so that redefining one drops all of them together.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TupleLink {
    /// Keys of every name bound by the same right-hand-side expression,
    /// including this record's own key.
    pub siblings: Vec<String>,
}

/// A doubly linked position inside a `const (...)` block, modeled as an
/// index into the per-cell const-block array (not an owning reference —
/// ownership of the record stays with the map). `None` at either end.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ConstChain {
    pub prev: Option<usize>,
    pub next: Option<usize>,
    /// Index of this record's own position in the chain it was parsed in.
    pub index: usize,
}

/// One memorized top-level declaration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Declaration {
    pub kind: Option<DeclKind>,
    /// Verbatim source text of the declaration, byte-range extracted from
    /// the file it was parsed from (preserves formatting/comments/generics).
    pub text: String,
    /// Cursor relative to the declaration's first line, if one fell within
    /// this declaration's line range at parse time.
    pub cursor: Cursor,
    pub cell_lines: CellLines,
    pub tuple: Option<TupleLink>,
    pub const_chain: Option<ConstChain>,
}

impl Declaration {
    pub fn new(kind: DeclKind, text: impl Into<String>) -> Self {
        Self { kind: Some(kind), text: text.into(), ..Default::default() }
    }
}

/// The per-kernel registry of memorized declarations: five keyed tables.
#[derive(Clone, Debug, Default)]
pub struct DeclStore {
    pub imports: HashMap<String, Declaration>,
    pub types: HashMap<String, Declaration>,
    pub constants: HashMap<String, Declaration>,
    pub variables: HashMap<String, Declaration>,
    pub functions: HashMap<String, Declaration>,
}

impl DeclStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep copy so tentative merges can be discarded without touching the
    /// canonical store on a failed compile.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    fn table_mut(&mut self, kind: DeclKind) -> &mut HashMap<String, Declaration> {
        match kind {
            DeclKind::Import => &mut self.imports,
            DeclKind::Type => &mut self.types,
            DeclKind::Constant => &mut self.constants,
            DeclKind::Variable => &mut self.variables,
            DeclKind::Function => &mut self.functions,
        }
    }

    fn table(&self, kind: DeclKind) -> &HashMap<String, Declaration> {
        match kind {
            DeclKind::Import => &self.imports,
            DeclKind::Type => &self.types,
            DeclKind::Constant => &self.constants,
            DeclKind::Variable => &self.variables,
            DeclKind::Function => &self.functions,
        }
    }

    /// Set-union `other` into `self` with last-writer-wins semantics at cell
    /// granularity, applying the tuple-variable sibling deletion policy:
    /// redefining any member of a tuple removes every previously co-defined
    /// sibling from the *canonical* table first.
    pub fn merge(&mut self, other: &DeclStore) {
        for kind in [
            DeclKind::Import,
            DeclKind::Type,
            DeclKind::Constant,
            DeclKind::Variable,
            DeclKind::Function,
        ] {
            let incoming = other.table(kind).clone();
            for (key, decl) in incoming {
                if kind == DeclKind::Variable {
                    if let Some(existing) = self.variables.get(&key) {
                        if let Some(tuple) = existing.tuple.clone() {
                            for sibling in &tuple.siblings {
                                if sibling != &key {
                                    self.variables.remove(sibling);
                                }
                            }
                        }
                    }
                }
                self.table_mut(kind).insert(key, decl);
            }
        }
    }

    /// Reset every record's cursor to [`Cursor::NONE`].
    pub fn clear_cursor(&mut self) {
        for table in
            [&mut self.imports, &mut self.types, &mut self.constants, &mut self.variables, &mut self.functions]
        {
            for decl in table.values_mut() {
                decl.cursor = Cursor::NONE;
            }
        }
    }

    /// Drop a memorized `"init"` function key, used after re-parsing
    /// generator output where the language's bare `func init()` must never
    /// be memorized verbatim (see [`crate::config::Config::init_prefix`]).
    pub fn drop_func_init(&mut self) {
        self.functions.remove("init");
    }

    /// Remove the given keys from whichever of the five tables they appear
    /// in (the `remove`/`rm` directive may name keys from any table).
    pub fn remove_keys(&mut self, keys: &[String]) -> Vec<String> {
        let mut removed = Vec::new();
        for key in keys {
            let mut hit = false;
            for table in
                [&mut self.imports, &mut self.types, &mut self.constants, &mut self.variables, &mut self.functions]
            {
                if table.remove(key).is_some() {
                    hit = true;
                }
            }
            if hit {
                removed.push(key.clone());
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        *self = DeclStore::new();
    }
}

/// Generate a unique random key for an unnamed (`_`) import or variable.
pub fn random_key(prefix: &str) -> String {
    format!("_~{prefix}~{}", Uuid::new_v4().simple())
}

/// Key an import spec: alias if present, else the last path segment; dot
/// imports are keyed `.~<full path>` so multiple may coexist; `_` gets a
/// unique random key.
pub fn import_key(path: &str, alias: Option<&str>) -> String {
    match alias {
        Some(".") => format!(".~{path}"),
        Some("_") => random_key("import"),
        Some(alias) => alias.to_string(),
        None => path.rsplit('/').next().unwrap_or(path).to_string(),
    }
}

/// Key a function declaration: the bare name, or `Type~Name` when a
/// receiver type `T`/`*T` is present.
pub fn function_key(name: &str, receiver_type: Option<&str>) -> String {
    match receiver_type {
        Some(recv) => format!("{}~{name}", recv.trim_start_matches('*')),
        None => name.to_string(),
    }
}

/// Key a variable name; `_` gets a unique random key.
pub fn variable_key(name: &str) -> String {
    if name == "_" {
        random_key("var")
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_key_rules() {
        assert_eq!(import_key("fmt", None), "fmt");
        assert_eq!(import_key("encoding/json", None), "json");
        assert_eq!(import_key("fmt", Some("f")), "f");
        assert_eq!(import_key("fmt", Some(".")), ".~fmt");
        assert!(import_key("fmt", Some("_")).starts_with("_~import~"));
    }

    #[test]
    fn function_key_rules() {
        assert_eq!(function_key("Foo", None), "Foo");
        assert_eq!(function_key("Foo", Some("Bar")), "Bar~Foo");
        assert_eq!(function_key("Foo", Some("*Bar")), "Bar~Foo");
    }

    #[test]
    fn merge_is_last_writer_wins() {
        let mut store = DeclStore::new();
        store.functions.insert("f".into(), Declaration::new(DeclKind::Function, "func f() {}"));
        let mut incoming = DeclStore::new();
        incoming.functions.insert("f".into(), Declaration::new(DeclKind::Function, "func f() { /* v2 */ }"));
        store.merge(&incoming);
        assert_eq!(store.functions["f"].text, "func f() { /* v2 */ }");
    }

    #[test]
    fn merge_drops_tuple_siblings_on_redefine() {
        let mut store = DeclStore::new();
        let tuple = TupleLink { siblings: vec!["a".into(), "b".into()] };
        let mut decl_a = Declaration::new(DeclKind::Variable, "a");
        decl_a.tuple = Some(tuple.clone());
        let mut decl_b = Declaration::new(DeclKind::Variable, "b");
        decl_b.tuple = Some(tuple);
        store.variables.insert("a".into(), decl_a);
        store.variables.insert("b".into(), decl_b);

        let mut incoming = DeclStore::new();
        incoming.variables.insert("a".into(), Declaration::new(DeclKind::Variable, "a2"));
        store.merge(&incoming);

        assert!(store.variables.contains_key("a"));
        assert!(!store.variables.contains_key("b"));
    }

    #[test]
    fn drop_func_init_removes_only_bare_init() {
        let mut store = DeclStore::new();
        store.functions.insert("init".into(), Declaration::new(DeclKind::Function, "func init() {}"));
        store.functions.insert("init_a".into(), Declaration::new(DeclKind::Function, "func init_a() {}"));
        store.drop_func_init();
        assert!(!store.functions.contains_key("init"));
        assert!(store.functions.contains_key("init_a"));
    }

    #[test]
    fn remove_keys_reports_hits_across_tables() {
        let mut store = DeclStore::new();
        store.functions.insert("init_a".into(), Declaration::new(DeclKind::Function, "func init_a() {}"));
        store.types.insert("T".into(), Declaration::new(DeclKind::Type, "type T int"));
        let removed = store.remove_keys(&["init_a".to_string(), "missing".to_string(), "T".to_string()]);
        assert_eq!(removed, vec!["init_a".to_string(), "T".to_string()]);
    }
}
