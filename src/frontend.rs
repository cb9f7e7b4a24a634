//! Python front end
//!
//! Parses source text with tree-sitter-python and builds the [`crate::ast`] model. Any
//! syntax error rejects the whole file; syntax that parses but has no structured form in the
//! model becomes an `Other` statement or expression so later passes can report it.

use std::path::Path;

use tracing::debug;
use tree_sitter::{Node, Parser};

use crate::ast::{
    BinOp, BoolOp, Class, CmpOp, Decl, Expr, ExprKind, FStringPart, Field, Function, Handler,
    Import, ImportName, Keyword, Location, Module, Param, ParamKind, Stmt, StmtKind, UnaryOp,
    Variable,
};
use crate::error::{Result, TranspileError};

/// Parse one Python source file into a validated module
pub fn parse_source(source: &str, path: &str) -> Result<Module> {
    let mut frontend = PythonFrontend::new()?;
    frontend.parse(source, path)
}

/// Module name derived from a file path: the stem, made into an identifier
pub fn module_name_from_path(path: &str) -> String {
    let stem = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("module");
    let mut name: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

pub struct PythonFrontend {
    parser: Parser,
}

impl PythonFrontend {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::language())
            .map_err(|e| TranspileError::ParseInput {
                path: "<grammar>".to_string(),
                message: format!("failed to load the Python grammar: {}", e),
            })?;
        Ok(Self { parser })
    }

    pub fn parse(&mut self, source: &str, path: &str) -> Result<Module> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| TranspileError::ParseInput {
                path: path.to_string(),
                message: "parser produced no tree".to_string(),
            })?;
        let root = tree.root_node();
        if root.has_error() {
            let at = first_error(root).map(location).unwrap_or_default();
            return Err(TranspileError::ParseInput {
                path: path.to_string(),
                message: format!("syntax error at {}", at),
            });
        }

        let builder = Builder { source };
        let mut module = builder.module(root, path);
        module.assign_expr_ids();
        module.validate()?;
        debug!(
            "Parsed {} into {} top-level declarations",
            path,
            module.body.len()
        );
        Ok(module)
    }
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|c| c.has_error() || c.is_missing())
        .find_map(first_error)
}

fn location(node: Node<'_>) -> Location {
    let p = node.start_position();
    Location::new(p.row as u32 + 1, p.column as u32 + 1)
}

fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    let out: Vec<Node> = node
        .named_children(&mut cursor)
        .filter(|c| c.kind() != "comment")
        .collect();
    out
}

fn all_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    let out: Vec<Node> = node.children(&mut cursor).collect();
    out
}

fn field_children<'t>(node: Node<'t>, field: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    let out: Vec<Node> = node.children_by_field_name(field, &mut cursor).collect();
    out
}

/// Human-readable name for a syntax kind without a structured form
fn describe(kind: &str) -> String {
    match kind {
        "function_definition" | "decorated_definition" => "nested function definition".into(),
        "class_definition" => "nested class definition".into(),
        "import_statement" | "import_from_statement" => "local import".into(),
        "delete_statement" => "del statement".into(),
        other => other.replace('_', " "),
    }
}

/// Nodes that only group expressions; `Other` expressions collect through them
const CLAUSE_KINDS: &[&str] = &[
    "for_in_clause",
    "if_clause",
    "pair",
    "keyword_argument",
    "argument_list",
    "dictionary_splat",
    "as_pattern_target",
];

struct Builder<'s> {
    source: &'s str,
}

impl<'s> Builder<'s> {
    fn text(&self, node: Node<'_>) -> &'s str {
        &self.source[node.byte_range()]
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    fn module(&self, root: Node<'_>, path: &str) -> Module {
        let mut children = named_children(root);
        let doc = children.first().and_then(|c| self.docstring(*c));
        if doc.is_some() {
            children.remove(0);
        }
        let body = children.into_iter().flat_map(|c| self.decls(c)).collect();
        Module {
            name: module_name_from_path(path),
            path: path.to_string(),
            doc,
            body,
        }
    }

    fn docstring(&self, node: Node<'_>) -> Option<String> {
        if node.kind() != "expression_statement" {
            return None;
        }
        match named_children(node).as_slice() {
            [single] if single.kind() == "string" => match self.expr(*single).kind {
                ExprKind::Str(text) => Some(text),
                _ => None,
            },
            _ => None,
        }
    }

    fn decls(&self, node: Node<'_>) -> Vec<Decl> {
        match node.kind() {
            "function_definition" => vec![Decl::Function(self.function(node, Vec::new()))],
            "class_definition" => vec![Decl::Class(self.class(node, Vec::new()))],
            "decorated_definition" => {
                let (decorators, definition) = self.decorated(node);
                match definition {
                    Some(def) if def.kind() == "function_definition" => {
                        vec![Decl::Function(self.function(def, decorators))]
                    }
                    Some(def) if def.kind() == "class_definition" => {
                        vec![Decl::Class(self.class(def, decorators))]
                    }
                    _ => vec![Decl::Statement(self.stmt(node))],
                }
            }
            "import_statement" => self.imports(node).into_iter().map(Decl::Import).collect(),
            "import_from_statement" | "future_import_statement" => {
                vec![Decl::Import(self.import_from(node))]
            }
            "expression_statement" => match self.variable(node) {
                Some(var) => vec![Decl::Variable(var)],
                None => vec![Decl::Statement(self.stmt(node))],
            },
            _ => vec![Decl::Statement(self.stmt(node))],
        }
    }

    fn decorated<'t>(&self, node: Node<'t>) -> (Vec<Expr>, Option<Node<'t>>) {
        let decorators = named_children(node)
            .into_iter()
            .filter(|c| c.kind() == "decorator")
            .filter_map(|d| named_children(d).first().map(|e| self.expr(*e)))
            .collect();
        (decorators, node.child_by_field_name("definition"))
    }

    /// Module-level `NAME[: T] = value`
    fn variable(&self, node: Node<'_>) -> Option<Variable> {
        let children = named_children(node);
        let [assign] = children.as_slice() else {
            return None;
        };
        if assign.kind() != "assignment" {
            return None;
        }
        let left = assign.child_by_field_name("left")?;
        if left.kind() != "identifier" {
            return None;
        }
        let right = assign.child_by_field_name("right");
        if right.is_some_and(|r| r.kind() == "assignment") {
            return None;
        }
        Some(Variable {
            target: self.text(left).to_string(),
            annotation: assign.child_by_field_name("type").map(|t| self.expr(t)),
            value: right.map(|r| self.expr(r)),
            loc: location(node),
        })
    }

    fn imports(&self, node: Node<'_>) -> Vec<Import> {
        field_children(node, "name")
            .into_iter()
            .map(|name| {
                let (module, alias) = self.aliased(name);
                Import {
                    module,
                    alias,
                    names: Vec::new(),
                    is_from: false,
                    level: 0,
                    loc: location(node),
                }
            })
            .collect()
    }

    fn aliased(&self, node: Node<'_>) -> (String, Option<String>) {
        if node.kind() == "aliased_import" {
            let name = node
                .child_by_field_name("name")
                .map(|n| self.text(n).to_string())
                .unwrap_or_default();
            let alias = node
                .child_by_field_name("alias")
                .map(|a| self.text(a).to_string());
            (name, alias)
        } else {
            (self.text(node).to_string(), None)
        }
    }

    fn import_from(&self, node: Node<'_>) -> Import {
        let (module, level) = if node.kind() == "future_import_statement" {
            ("__future__".to_string(), 0)
        } else {
            match node.child_by_field_name("module_name") {
                Some(m) if m.kind() == "relative_import" => {
                    let mut level = 0;
                    let mut module = String::new();
                    for child in named_children(m) {
                        match child.kind() {
                            "import_prefix" => level = self.text(child).len() as u32,
                            _ => module = self.text(child).to_string(),
                        }
                    }
                    (module, level)
                }
                Some(m) => (self.text(m).to_string(), 0),
                None => (String::new(), 0),
            }
        };

        let mut names: Vec<ImportName> = field_children(node, "name")
            .into_iter()
            .map(|n| {
                let (name, alias) = self.aliased(n);
                ImportName { name, alias }
            })
            .collect();
        if named_children(node)
            .iter()
            .any(|c| c.kind() == "wildcard_import")
        {
            names.push(ImportName {
                name: "*".to_string(),
                alias: None,
            });
        }

        Import {
            module,
            alias: None,
            names,
            is_from: true,
            level,
            loc: location(node),
        }
    }

    fn function(&self, node: Node<'_>, decorators: Vec<Expr>) -> Function {
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_default();
        let params = node
            .child_by_field_name("parameters")
            .map(|p| self.params(p))
            .unwrap_or_default();
        let returns = node.child_by_field_name("return_type").map(|r| self.expr(r));
        let is_async = node.child(0).is_some_and(|c| c.kind() == "async");

        let mut body_nodes = node
            .child_by_field_name("body")
            .map(named_children)
            .unwrap_or_default();
        let doc = body_nodes.first().and_then(|c| self.docstring(*c));
        let mut body = Vec::new();
        if doc.is_some() {
            let docstring = body_nodes.remove(0);
            if body_nodes.is_empty() {
                body.push(Stmt::new(StmtKind::Pass, location(docstring)));
            }
        }
        body.extend(body_nodes.into_iter().map(|c| self.stmt(c)));

        Function {
            name,
            params,
            returns,
            body,
            decorators,
            is_async,
            doc,
            loc: location(node),
        }
    }

    fn params(&self, node: Node<'_>) -> Vec<Param> {
        let mut params = Vec::new();
        let mut keyword_only = false;
        let plain = |keyword_only: bool| {
            if keyword_only {
                ParamKind::KeywordOnly
            } else {
                ParamKind::Positional
            }
        };

        for child in named_children(node) {
            let loc = location(child);
            let param = match child.kind() {
                "identifier" => Param {
                    name: self.text(child).to_string(),
                    annotation: None,
                    default: None,
                    kind: plain(keyword_only),
                    loc,
                },
                "typed_parameter" => {
                    let inner = named_children(child)
                        .into_iter()
                        .find(|c| c.kind() != "type");
                    let (name, kind) = match inner {
                        Some(n) if n.kind() == "list_splat_pattern" => {
                            keyword_only = true;
                            (self.splat_name(n), ParamKind::VarArgs)
                        }
                        Some(n) if n.kind() == "dictionary_splat_pattern" => {
                            (self.splat_name(n), ParamKind::KwArgs)
                        }
                        Some(n) => (self.text(n).to_string(), plain(keyword_only)),
                        None => continue,
                    };
                    Param {
                        name,
                        annotation: child.child_by_field_name("type").map(|t| self.expr(t)),
                        default: None,
                        kind,
                        loc,
                    }
                }
                "default_parameter" | "typed_default_parameter" => Param {
                    name: child
                        .child_by_field_name("name")
                        .map(|n| self.text(n).to_string())
                        .unwrap_or_default(),
                    annotation: child.child_by_field_name("type").map(|t| self.expr(t)),
                    default: child.child_by_field_name("value").map(|v| self.expr(v)),
                    kind: plain(keyword_only),
                    loc,
                },
                "list_splat_pattern" => {
                    keyword_only = true;
                    Param {
                        name: self.splat_name(child),
                        annotation: None,
                        default: None,
                        kind: ParamKind::VarArgs,
                        loc,
                    }
                }
                "dictionary_splat_pattern" => Param {
                    name: self.splat_name(child),
                    annotation: None,
                    default: None,
                    kind: ParamKind::KwArgs,
                    loc,
                },
                "keyword_separator" => {
                    keyword_only = true;
                    continue;
                }
                _ => continue,
            };
            params.push(param);
        }
        params
    }

    fn splat_name(&self, node: Node<'_>) -> String {
        named_children(node)
            .first()
            .map(|n| self.text(*n).to_string())
            .unwrap_or_default()
    }

    fn class(&self, node: Node<'_>, decorators: Vec<Expr>) -> Class {
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_default();

        let mut bases = Vec::new();
        let mut other = Vec::new();
        if let Some(superclasses) = node.child_by_field_name("superclasses") {
            for base in named_children(superclasses) {
                if base.kind() == "keyword_argument" {
                    other.push(Stmt::new(
                        StmtKind::Other {
                            kind: "class keyword argument".to_string(),
                            exprs: Vec::new(),
                        },
                        location(base),
                    ));
                } else {
                    bases.push(self.expr(base));
                }
            }
        }

        let mut body_nodes = node
            .child_by_field_name("body")
            .map(named_children)
            .unwrap_or_default();
        let doc = body_nodes.first().and_then(|c| self.docstring(*c));
        if doc.is_some() {
            body_nodes.remove(0);
        }

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        for child in body_nodes {
            match child.kind() {
                "function_definition" => methods.push(self.function(child, Vec::new())),
                "decorated_definition" => {
                    let (decos, definition) = self.decorated(child);
                    match definition {
                        Some(def) if def.kind() == "function_definition" => {
                            methods.push(self.function(def, decos))
                        }
                        _ => other.push(self.stmt(child)),
                    }
                }
                "pass_statement" => {}
                "expression_statement" => match self.variable(child) {
                    Some(var) => fields.push(Field {
                        name: var.target,
                        annotation: var.annotation,
                        default: var.value,
                        from_init: false,
                        loc: var.loc,
                    }),
                    None => {
                        let stmt = self.stmt(child);
                        if stmt.kind != StmtKind::Pass {
                            other.push(stmt);
                        }
                    }
                },
                _ => other.push(self.stmt(child)),
            }
        }

        if let Some(init) = methods.iter().find(|m| m.name == "__init__") {
            fields.extend(init_fields(init, &fields));
        }

        Class {
            name,
            bases,
            decorators,
            fields,
            methods,
            other,
            doc,
            loc: location(node),
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn block(&self, node: Option<Node<'_>>) -> Vec<Stmt> {
        node.map(|n| named_children(n).into_iter().map(|c| self.stmt(c)).collect())
            .unwrap_or_default()
    }

    fn stmt(&self, node: Node<'_>) -> Stmt {
        let loc = location(node);
        let kind = match node.kind() {
            "expression_statement" => self.expression_statement(node),
            "return_statement" => {
                StmtKind::Return(named_children(node).first().map(|c| self.expr(*c)))
            }
            "pass_statement" => StmtKind::Pass,
            "break_statement" => StmtKind::Break,
            "continue_statement" => StmtKind::Continue,
            "if_statement" => self.if_statement(node),
            "for_statement" if node.child(0).is_some_and(|c| c.kind() == "async") => {
                self.other_stmt("async for")
            }
            "for_statement" => StmtKind::For {
                target: self.required(node, "left"),
                iter: self.required(node, "right"),
                body: self.block(node.child_by_field_name("body")),
                orelse: self.else_block(node),
            },
            "while_statement" => StmtKind::While {
                test: self.required(node, "condition"),
                body: self.block(node.child_by_field_name("body")),
                orelse: self.else_block(node),
            },
            "try_statement" => self.try_statement(node),
            "raise_statement" => {
                let cause = node.child_by_field_name("cause");
                let exc = named_children(node)
                    .into_iter()
                    .find(|c| cause.map_or(true, |cause| cause.id() != c.id()));
                StmtKind::Raise {
                    exc: exc.map(|e| self.expr(e)),
                    cause: cause.map(|c| self.expr(c)),
                }
            }
            "assert_statement" => {
                let mut parts = named_children(node).into_iter().map(|c| self.expr(c));
                match parts.next() {
                    Some(test) => StmtKind::Assert {
                        test,
                        msg: parts.next(),
                    },
                    None => self.other_stmt("assert"),
                }
            }
            "global_statement" => StmtKind::Global(self.identifiers(node)),
            "nonlocal_statement" => StmtKind::Nonlocal(self.identifiers(node)),
            other => self.other_stmt(&describe(other)),
        };
        Stmt::new(kind, loc)
    }

    fn other_stmt(&self, kind: &str) -> StmtKind {
        StmtKind::Other {
            kind: kind.to_string(),
            exprs: Vec::new(),
        }
    }

    fn identifiers(&self, node: Node<'_>) -> Vec<String> {
        named_children(node)
            .into_iter()
            .map(|c| self.text(c).to_string())
            .collect()
    }

    fn else_block(&self, node: Node<'_>) -> Vec<Stmt> {
        self.block(
            node.child_by_field_name("alternative")
                .and_then(|alt| alt.child_by_field_name("body")),
        )
    }

    fn expression_statement(&self, node: Node<'_>) -> StmtKind {
        let children = named_children(node);
        match children.as_slice() {
            [single] if single.kind() == "assignment" => self.assignment(*single),
            [single] if single.kind() == "augmented_assignment" => {
                let op = single
                    .child_by_field_name("operator")
                    .and_then(|o| BinOp::from_python(self.text(o)));
                match op {
                    Some(op) => StmtKind::AugAssign {
                        target: self.required(*single, "left"),
                        op,
                        value: self.required(*single, "right"),
                    },
                    None => self.other_stmt("augmented assignment"),
                }
            }
            [single] if single.kind() == "ellipsis" => StmtKind::Pass,
            [single] => StmtKind::Expr(self.expr(*single)),
            [] => StmtKind::Pass,
            many => StmtKind::Expr(Expr::new(
                ExprKind::Tuple(many.iter().map(|c| self.expr(*c)).collect()),
                location(node),
            )),
        }
    }

    fn assignment(&self, node: Node<'_>) -> StmtKind {
        let mut targets = Vec::new();
        let mut value = None;
        let mut current = node;
        loop {
            if let Some(left) = current.child_by_field_name("left") {
                targets.push(self.expr(left));
            }
            match current.child_by_field_name("right") {
                Some(right) if right.kind() == "assignment" => current = right,
                Some(right) => {
                    value = Some(self.expr(right));
                    break;
                }
                None => break,
            }
        }

        match (node.child_by_field_name("type"), value) {
            (Some(ty), value) if targets.len() == 1 => StmtKind::AnnAssign {
                target: targets.remove(0),
                annotation: self.expr(ty),
                value,
            },
            (None, Some(value)) if !targets.is_empty() => StmtKind::Assign { targets, value },
            _ => self.other_stmt("assignment"),
        }
    }

    fn if_statement(&self, node: Node<'_>) -> StmtKind {
        let mut orelse = Vec::new();
        for alt in field_children(node, "alternative").into_iter().rev() {
            match alt.kind() {
                "else_clause" => orelse = self.block(alt.child_by_field_name("body")),
                "elif_clause" => {
                    let nested = StmtKind::If {
                        test: self.required(alt, "condition"),
                        body: self.block(alt.child_by_field_name("consequence")),
                        orelse: std::mem::take(&mut orelse),
                    };
                    orelse = vec![Stmt::new(nested, location(alt))];
                }
                _ => {}
            }
        }
        StmtKind::If {
            test: self.required(node, "condition"),
            body: self.block(node.child_by_field_name("consequence")),
            orelse,
        }
    }

    fn try_statement(&self, node: Node<'_>) -> StmtKind {
        let mut handlers = Vec::new();
        let mut orelse = Vec::new();
        let mut finalbody = Vec::new();
        for child in named_children(node) {
            match child.kind() {
                "except_clause" | "except_group_clause" => handlers.push(self.handler(child)),
                "else_clause" => orelse = self.block(child.child_by_field_name("body")),
                "finally_clause" => {
                    let block = named_children(child)
                        .into_iter()
                        .find(|c| c.kind() == "block");
                    finalbody = self.block(block);
                }
                _ => {}
            }
        }
        StmtKind::Try {
            body: self.block(node.child_by_field_name("body")),
            handlers,
            orelse,
            finalbody,
        }
    }

    fn handler(&self, node: Node<'_>) -> Handler {
        let children = named_children(node);
        let block = children.iter().copied().find(|c| c.kind() == "block");
        let heads: Vec<Node> = children
            .iter()
            .copied()
            .filter(|c| c.kind() != "block")
            .collect();

        let (exc_type, name) = match heads.as_slice() {
            [] => (None, None),
            [pattern] if pattern.kind() == "as_pattern" => {
                let parts = named_children(*pattern);
                let ty = parts.first().map(|t| self.expr(*t));
                let alias = pattern
                    .child_by_field_name("alias")
                    .or_else(|| parts.get(1).copied())
                    .map(|a| self.text(a).trim().to_string());
                (ty, alias)
            }
            [ty] => (Some(self.expr(*ty)), None),
            [ty, alias, ..] => (Some(self.expr(*ty)), Some(self.text(*alias).to_string())),
        };

        Handler {
            exc_type,
            name,
            body: self.block(block),
            loc: location(node),
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn required(&self, node: Node<'_>, field: &str) -> Expr {
        match node.child_by_field_name(field) {
            Some(child) => self.expr(child),
            None => Expr::new(
                ExprKind::Other {
                    kind: format!("missing {}", field),
                    children: Vec::new(),
                },
                location(node),
            ),
        }
    }

    fn boxed(&self, node: Node<'_>, field: &str) -> Box<Expr> {
        Box::new(self.required(node, field))
    }

    fn other(&self, node: Node<'_>, kind: &str) -> ExprKind {
        ExprKind::Other {
            kind: kind.to_string(),
            children: self.sub_expressions(node),
        }
    }

    fn sub_expressions(&self, node: Node<'_>) -> Vec<Expr> {
        let mut out = Vec::new();
        for child in named_children(node) {
            if child.kind() == "keyword_argument" {
                out.extend(child.child_by_field_name("value").map(|v| self.expr(v)));
            } else if CLAUSE_KINDS.contains(&child.kind()) {
                out.extend(self.sub_expressions(child));
            } else {
                out.push(self.expr(child));
            }
        }
        out
    }

    fn expr(&self, node: Node<'_>) -> Expr {
        let loc = location(node);
        let kind = match node.kind() {
            "identifier" => ExprKind::Name(self.text(node).to_string()),
            "integer" => self.integer(node),
            "float" => {
                let raw = self.text(node).replace('_', "");
                if raw.ends_with(['j', 'J']) {
                    self.other(node, "complex literal")
                } else {
                    match raw.parse::<f64>() {
                        Ok(v) => ExprKind::Float(v),
                        Err(_) => self.other(node, "float literal"),
                    }
                }
            }
            "true" => ExprKind::Bool(true),
            "false" => ExprKind::Bool(false),
            "none" => ExprKind::NoneLit,
            "string" => self.string(node),
            "concatenated_string" => self.concatenated(node),
            "binary_operator" => {
                let op = node
                    .child_by_field_name("operator")
                    .and_then(|o| BinOp::from_python(self.text(o)));
                match op {
                    Some(op) => ExprKind::BinOp {
                        op,
                        left: self.boxed(node, "left"),
                        right: self.boxed(node, "right"),
                    },
                    None => self.other(node, "binary operator"),
                }
            }
            "unary_operator" => {
                let op = match node.child_by_field_name("operator").map(|o| self.text(o)) {
                    Some("-") => UnaryOp::Neg,
                    Some("+") => UnaryOp::Pos,
                    _ => UnaryOp::Invert,
                };
                ExprKind::UnaryOp {
                    op,
                    operand: self.boxed(node, "argument"),
                }
            }
            "not_operator" => ExprKind::UnaryOp {
                op: UnaryOp::Not,
                operand: self.boxed(node, "argument"),
            },
            "boolean_operator" => {
                let op = match node.child_by_field_name("operator").map(|o| self.text(o)) {
                    Some("or") => BoolOp::Or,
                    _ => BoolOp::And,
                };
                ExprKind::BoolOp {
                    op,
                    left: self.boxed(node, "left"),
                    right: self.boxed(node, "right"),
                }
            }
            "comparison_operator" => self.comparison(node),
            "call" => self.call(node),
            "attribute" => ExprKind::Attribute {
                value: self.boxed(node, "object"),
                attr: node
                    .child_by_field_name("attribute")
                    .map(|a| self.text(a).to_string())
                    .unwrap_or_default(),
            },
            "subscript" => {
                let indices = field_children(node, "subscript");
                let index = match indices.as_slice() {
                    [single] => self.expr(*single),
                    [first, ..] => Expr::new(
                        ExprKind::Tuple(indices.iter().map(|i| self.expr(*i)).collect()),
                        location(*first),
                    ),
                    [] => Expr::new(self.other(node, "empty subscript"), loc),
                };
                ExprKind::Subscript {
                    value: self.boxed(node, "value"),
                    index: Box::new(index),
                }
            }
            "slice" => self.slice(node),
            "list" | "list_pattern" => ExprKind::List(self.items(node)),
            "tuple" | "expression_list" | "pattern_list" | "tuple_pattern" => {
                ExprKind::Tuple(self.items(node))
            }
            "set" => ExprKind::Set(self.items(node)),
            "dictionary" => self.dictionary(node),
            "parenthesized_expression" | "type" => match named_children(node).first() {
                Some(inner) => return self.expr(*inner),
                None => self.other(node, "empty parentheses"),
            },
            "list_splat" | "list_splat_pattern" => match named_children(node).first() {
                Some(inner) => ExprKind::Starred(Box::new(self.expr(*inner))),
                None => self.other(node, "splat"),
            },
            "lambda" => ExprKind::Lambda {
                params: node
                    .child_by_field_name("parameters")
                    .map(|p| self.params(p))
                    .unwrap_or_default(),
                body: self.boxed(node, "body"),
            },
            "conditional_expression" => {
                let parts = named_children(node);
                match parts.as_slice() {
                    [body, test, orelse] => ExprKind::IfExp {
                        test: Box::new(self.expr(*test)),
                        body: Box::new(self.expr(*body)),
                        orelse: Box::new(self.expr(*orelse)),
                    },
                    _ => self.other(node, "conditional expression"),
                }
            }
            "list_comprehension" => self.list_comprehension(node),
            "generic_type" => {
                let parts = named_children(node);
                match parts.as_slice() {
                    [base, params] => {
                        let args: Vec<Expr> =
                            named_children(*params).into_iter().map(|p| self.expr(p)).collect();
                        let index = if args.len() == 1 {
                            args.into_iter().next()
                        } else {
                            Some(Expr::new(ExprKind::Tuple(args), location(*params)))
                        };
                        match index {
                            Some(index) => ExprKind::Subscript {
                                value: Box::new(self.expr(*base)),
                                index: Box::new(index),
                            },
                            None => self.other(node, "generic type"),
                        }
                    }
                    _ => self.other(node, "generic type"),
                }
            }
            "union_type" => {
                let parts = named_children(node);
                match parts.as_slice() {
                    [left, right] => ExprKind::BinOp {
                        op: BinOp::BitOr,
                        left: Box::new(self.expr(*left)),
                        right: Box::new(self.expr(*right)),
                    },
                    _ => self.other(node, "union type"),
                }
            }
            "member_type" => {
                let parts = named_children(node);
                match parts.as_slice() {
                    [value, attr] => ExprKind::Attribute {
                        value: Box::new(self.expr(*value)),
                        attr: self.text(*attr).to_string(),
                    },
                    _ => self.other(node, "member type"),
                }
            }
            "ellipsis" => ExprKind::Other {
                kind: "ellipsis".to_string(),
                children: Vec::new(),
            },
            "await" => self.other(node, "await"),
            "yield" => {
                let kind = if self.text(node).starts_with("yield from") {
                    "yield_from"
                } else {
                    "yield"
                };
                self.other(node, kind)
            }
            "generator_expression" => self.other(node, "generator expression"),
            "set_comprehension" => self.other(node, "set comprehension"),
            "dictionary_comprehension" => self.other(node, "dict comprehension"),
            "named_expression" => self.other(node, "assignment expression"),
            other => self.other(node, &describe(other)),
        };
        Expr::new(kind, loc)
    }

    fn items(&self, node: Node<'_>) -> Vec<Expr> {
        named_children(node)
            .into_iter()
            .map(|c| self.expr(c))
            .collect()
    }

    fn integer(&self, node: Node<'_>) -> ExprKind {
        let raw = self.text(node).replace('_', "");
        let lower = raw.to_ascii_lowercase();
        if lower.ends_with('j') {
            return self.other(node, "complex literal");
        }
        let parsed = if let Some(hex) = lower.strip_prefix("0x") {
            i64::from_str_radix(hex, 16)
        } else if let Some(oct) = lower.strip_prefix("0o") {
            i64::from_str_radix(oct, 8)
        } else if let Some(bin) = lower.strip_prefix("0b") {
            i64::from_str_radix(bin, 2)
        } else {
            lower.parse::<i64>()
        };
        match parsed {
            Ok(v) => ExprKind::Int(v),
            Err(_) => ExprKind::BigInt(raw),
        }
    }

    fn comparison(&self, node: Node<'_>) -> ExprKind {
        let operands: Vec<Expr> = self.items(node);
        let ops: Vec<CmpOp> = field_children(node, "operators")
            .into_iter()
            .filter_map(|c| CmpOp::from_python(self.text(c)))
            .collect();
        if operands.len() < 2 || ops.len() != operands.len() - 1 {
            return self.other(node, "comparison");
        }
        let mut operands = operands.into_iter();
        match operands.next() {
            Some(left) => ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators: operands.collect(),
            },
            None => self.other(node, "comparison"),
        }
    }

    fn call(&self, node: Node<'_>) -> ExprKind {
        let func = self.boxed(node, "function");
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        match node.child_by_field_name("arguments") {
            Some(arguments) if arguments.kind() == "generator_expression" => {
                args.push(self.expr(arguments));
            }
            Some(arguments) => {
                for child in named_children(arguments) {
                    match child.kind() {
                        "keyword_argument" => keywords.push(Keyword {
                            name: child
                                .child_by_field_name("name")
                                .map(|n| self.text(n).to_string()),
                            value: self.required(child, "value"),
                        }),
                        "dictionary_splat" => {
                            if let Some(inner) = named_children(child).first() {
                                keywords.push(Keyword {
                                    name: None,
                                    value: self.expr(*inner),
                                });
                            }
                        }
                        _ => args.push(self.expr(child)),
                    }
                }
            }
            None => {}
        }
        ExprKind::Call {
            func,
            args,
            keywords,
        }
    }

    fn slice(&self, node: Node<'_>) -> ExprKind {
        let mut parts: [Option<Box<Expr>>; 3] = [None, None, None];
        let mut slot = 0;
        for child in all_children(node) {
            if child.kind() == ":" {
                slot += 1;
            } else if child.is_named() && child.kind() != "comment" && slot < 3 {
                parts[slot] = Some(Box::new(self.expr(child)));
            }
        }
        let [lower, upper, step] = parts;
        ExprKind::Slice { lower, upper, step }
    }

    fn dictionary(&self, node: Node<'_>) -> ExprKind {
        let mut pairs = Vec::new();
        for child in named_children(node) {
            if child.kind() != "pair" {
                return self.other(node, "dict unpacking");
            }
            pairs.push((self.required(child, "key"), self.required(child, "value")));
        }
        ExprKind::Dict(pairs)
    }

    fn list_comprehension(&self, node: Node<'_>) -> ExprKind {
        let clauses = named_children(node);
        let fors: Vec<Node> = clauses
            .iter()
            .copied()
            .filter(|c| c.kind() == "for_in_clause")
            .collect();
        let ifs: Vec<Node> = clauses
            .iter()
            .copied()
            .filter(|c| c.kind() == "if_clause")
            .collect();
        let simple = fors.len() == 1
            && ifs.len() <= 1
            && !fors[0].child(0).is_some_and(|c| c.kind() == "async");
        if !simple {
            return self.other(node, "nested comprehension");
        }
        ExprKind::ListComp {
            element: self.boxed(node, "body"),
            target: self.boxed(fors[0], "left"),
            iter: self.boxed(fors[0], "right"),
            condition: ifs
                .first()
                .and_then(|c| named_children(*c).first().map(|e| Box::new(self.expr(*e)))),
        }
    }

    // ========================================================================
    // Strings
    // ========================================================================

    fn string_prefix(text: &str) -> &str {
        let end = text
            .find(|c: char| c == '"' || c == '\'')
            .unwrap_or(0);
        &text[..end]
    }

    fn string(&self, node: Node<'_>) -> ExprKind {
        let text = self.text(node);
        let prefix = Self::string_prefix(text).to_ascii_lowercase();
        if prefix.contains('b') {
            return self.other(node, "bytes literal");
        }
        if prefix.contains('f') {
            return ExprKind::FString(self.fstring_parts(node, prefix.contains('r')));
        }
        let body = unquote(&text[prefix.len()..]);
        if prefix.contains('r') {
            ExprKind::Str(body.to_string())
        } else {
            ExprKind::Str(unescape(body))
        }
    }

    fn fstring_parts(&self, node: Node<'_>, raw: bool) -> Vec<FStringPart> {
        fn push_literal(parts: &mut Vec<FStringPart>, text: String) {
            if let Some(FStringPart::Literal(last)) = parts.last_mut() {
                last.push_str(&text);
            } else if !text.is_empty() {
                parts.push(FStringPart::Literal(text));
            }
        }

        let mut parts: Vec<FStringPart> = Vec::new();

        for child in named_children(node) {
            match child.kind() {
                "string_content" | "escape_sequence" => {
                    let text = self.text(child);
                    let text = if raw { text.to_string() } else { unescape(text) };
                    push_literal(&mut parts, text.replace("{{", "{").replace("}}", "}"));
                }
                "escape_interpolation" => {
                    let brace = self.text(child).chars().next().unwrap_or('{');
                    push_literal(&mut parts, brace.to_string());
                }
                "interpolation" => {
                    let value = child
                        .child_by_field_name("expression")
                        .or_else(|| {
                            named_children(child).into_iter().find(|c| {
                                !matches!(c.kind(), "type_conversion" | "format_specifier")
                            })
                        })
                        .map(|e| self.expr(e));
                    let Some(value) = value else { continue };
                    let spec = named_children(child)
                        .into_iter()
                        .find(|c| c.kind() == "format_specifier")
                        .map(|s| self.text(s).trim_start_matches(':').to_string());
                    let conversion = named_children(child)
                        .into_iter()
                        .find(|c| c.kind() == "type_conversion")
                        .and_then(|c| self.text(c).trim_start_matches('!').chars().next());
                    parts.push(FStringPart::Value {
                        value,
                        spec,
                        conversion,
                    });
                }
                _ => {}
            }
        }
        parts
    }

    fn concatenated(&self, node: Node<'_>) -> ExprKind {
        let pieces: Vec<ExprKind> = named_children(node)
            .into_iter()
            .map(|c| self.expr(c).kind)
            .collect();
        if pieces.iter().all(|p| matches!(p, ExprKind::Str(_))) {
            let joined = pieces
                .into_iter()
                .filter_map(|p| match p {
                    ExprKind::Str(s) => Some(s),
                    _ => None,
                })
                .collect();
            return ExprKind::Str(joined);
        }
        let mut parts = Vec::new();
        for piece in pieces {
            match piece {
                ExprKind::Str(s) => parts.push(FStringPart::Literal(s)),
                ExprKind::FString(inner) => parts.extend(inner),
                _ => return self.other(node, "concatenated string"),
            }
        }
        ExprKind::FString(parts)
    }
}

/// Fields assigned as `self.name = ...` in the straight-line body of `__init__`
fn init_fields(init: &Function, declared: &[Field]) -> Vec<Field> {
    let mut out: Vec<Field> = Vec::new();
    for stmt in &init.body {
        let (target, annotation, value) = match &stmt.kind {
            StmtKind::Assign { targets, value } if targets.len() == 1 => {
                (&targets[0], None, Some(value))
            }
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
            } => (target, Some(annotation), value.as_ref()),
            _ => continue,
        };
        let Some(name) = target.self_attribute() else {
            continue;
        };
        if declared.iter().chain(out.iter()).any(|f| f.name == name) {
            continue;
        }
        // `self.x = x` inherits the parameter's annotation
        let annotation = annotation.cloned().or_else(|| {
            let param_name = value.and_then(Expr::as_name)?;
            init.params
                .iter()
                .find(|p| p.name == param_name)
                .and_then(|p| p.annotation.clone())
        });
        out.push(Field {
            name: name.to_string(),
            annotation,
            default: value.cloned(),
            from_init: true,
            loc: target.loc,
        });
    }
    out
}

fn unquote(body: &str) -> &str {
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if body.len() >= 2 * quote.len() {
            if let Some(inner) = body
                .strip_prefix(quote)
                .and_then(|b| b.strip_suffix(quote))
            {
                return inner;
            }
        }
    }
    body
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('\n') => {}
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => {
                        out.push_str("\\x");
                        out.push_str(&hex);
                    }
                }
            }
            Some(u @ ('u' | 'U')) => {
                let width = if u == 'u' { 4 } else { 8 };
                let hex: String = chars.by_ref().take(width).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => {
                        out.push('\\');
                        out.push(u);
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Module {
        parse_source(src, "sample.py").unwrap()
    }

    #[test]
    fn test_module_name_from_path() {
        assert_eq!(module_name_from_path("src/calc.py"), "calc");
        assert_eq!(module_name_from_path("my-module.py"), "my_module");
        assert_eq!(module_name_from_path("3d.py"), "_3d");
    }

    #[test]
    fn test_function_with_annotations() {
        let module = parse("def add(a: int, b: int = 2) -> int:\n    return a + b\n");
        let func = module.function("add").unwrap();
        assert_eq!(func.params.len(), 2);
        assert!(func.params[0].annotation.is_some());
        assert!(func.params[1].default.is_some());
        assert!(func.returns.is_some());
        assert!(matches!(func.body[0].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn test_docstrings_are_kept() {
        let module = parse(
            "\"\"\"Module doc.\"\"\"\n\ndef f():\n    \"\"\"Say hi.\"\"\"\n\nclass C:\n    \"\"\"A class.\"\"\"\n    x: int = 0\n",
        );
        assert_eq!(module.doc.as_deref(), Some("Module doc."));
        let func = module.function("f").unwrap();
        assert_eq!(func.doc.as_deref(), Some("Say hi."));
        assert_eq!(func.body[0].kind, StmtKind::Pass);
        assert_eq!(module.class("C").unwrap().doc.as_deref(), Some("A class."));
    }

    #[test]
    fn test_class_fields_from_body_and_init() {
        let module = parse(
            "class Point:\n    label: str = \"p\"\n\n    def __init__(self, x: float, y):\n        self.x = x\n        self.y = y\n        if x > 0:\n            self.z = 1\n",
        );
        let class = module.class("Point").unwrap();
        let names: Vec<&str> = class.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["label", "x", "y"]);
        assert!(class.field("x").unwrap().from_init);
        assert!(class.field("x").unwrap().annotation.is_some());
        assert!(class.field("y").unwrap().annotation.is_none());
    }

    #[test]
    fn test_imports() {
        let module = parse("import numpy as np, os\nfrom ..pkg import a as b, c\n");
        let imports: Vec<&Import> = module
            .body
            .iter()
            .filter_map(|d| match d {
                Decl::Import(i) => Some(i),
                _ => None,
            })
            .collect();
        assert_eq!(imports.len(), 3);
        assert_eq!(imports[0].module, "numpy");
        assert_eq!(imports[0].alias.as_deref(), Some("np"));
        assert_eq!(imports[1].module, "os");
        assert_eq!(imports[2].level, 2);
        assert_eq!(imports[2].module, "pkg");
        assert_eq!(imports[2].names.len(), 2);
        assert_eq!(imports[2].names[0].alias.as_deref(), Some("b"));
    }

    #[test]
    fn test_module_variables_and_statements() {
        let module = parse("LIMIT = 10\nsquare = lambda x: x * x\nprint(LIMIT)\n");
        assert!(matches!(&module.body[0], Decl::Variable(v) if v.target == "LIMIT"));
        match &module.body[1] {
            Decl::Variable(v) => {
                assert!(matches!(
                    v.value.as_ref().map(|e| &e.kind),
                    Some(ExprKind::Lambda { .. })
                ));
            }
            other => panic!("expected variable, got {:?}", other),
        }
        assert!(matches!(&module.body[2], Decl::Statement(_)));
    }

    #[test]
    fn test_elif_chain_nests() {
        let module = parse(
            "def sign(n):\n    if n > 0:\n        return 1\n    elif n < 0:\n        return -1\n    else:\n        return 0\n",
        );
        let func = module.function("sign").unwrap();
        let StmtKind::If { orelse, .. } = &func.body[0].kind else {
            panic!("expected if");
        };
        let StmtKind::If { orelse: inner, .. } = &orelse[0].kind else {
            panic!("expected nested if");
        };
        assert!(matches!(inner[0].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn test_try_except_handlers() {
        let module = parse(
            "def f(s):\n    try:\n        return int(s)\n    except ValueError as e:\n        return 0\n    finally:\n        pass\n",
        );
        let StmtKind::Try {
            handlers,
            finalbody,
            ..
        } = &module.function("f").unwrap().body[0].kind
        else {
            panic!("expected try");
        };
        assert_eq!(handlers.len(), 1);
        assert_eq!(
            handlers[0].exc_type.as_ref().and_then(Expr::as_name),
            Some("ValueError")
        );
        assert_eq!(handlers[0].name.as_deref(), Some("e"));
        assert_eq!(finalbody.len(), 1);
    }

    #[test]
    fn test_fstring_parts() {
        let module = parse("def greet(name: str) -> str:\n    return f\"Hello, {name}!\"\n");
        let StmtKind::Return(Some(expr)) = &module.function("greet").unwrap().body[0].kind else {
            panic!("expected return");
        };
        let ExprKind::FString(parts) = &expr.kind else {
            panic!("expected f-string, got {:?}", expr.kind);
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], FStringPart::Literal("Hello, ".to_string()));
        assert!(matches!(&parts[1], FStringPart::Value { value, .. } if value.as_name() == Some("name")));
    }

    #[test]
    fn test_literals() {
        let module = parse("A = 0x10\nB = 1_000\nC = 99999999999999999999\nD = 'a\\tb'\nE = 2.5\n");
        let values: Vec<ExprKind> = module
            .body
            .iter()
            .filter_map(|d| match d {
                Decl::Variable(v) => v.value.clone().map(|e| e.kind),
                _ => None,
            })
            .collect();
        assert_eq!(values[0], ExprKind::Int(16));
        assert_eq!(values[1], ExprKind::Int(1000));
        assert!(matches!(values[2], ExprKind::BigInt(_)));
        assert_eq!(values[3], ExprKind::Str("a\tb".to_string()));
        assert_eq!(values[4], ExprKind::Float(2.5));
    }

    #[test]
    fn test_comparison_chain() {
        let module = parse("def f(x):\n    return 0 < x not in (1, 2)\n");
        let StmtKind::Return(Some(expr)) = &module.function("f").unwrap().body[0].kind else {
            panic!("expected return");
        };
        let ExprKind::Compare { ops, .. } = &expr.kind else {
            panic!("expected comparison");
        };
        assert_eq!(ops, &vec![CmpOp::Lt, CmpOp::NotIn]);
    }

    #[test]
    fn test_unsupported_syntax_becomes_other() {
        let module = parse("def f(path):\n    with open(path) as fh:\n        return fh.read()\n");
        assert!(matches!(
            &module.function("f").unwrap().body[0].kind,
            StmtKind::Other { kind, .. } if kind == "with statement"
        ));
    }

    #[test]
    fn test_variadic_and_keyword_only_params() {
        let module = parse("def f(a, *args, key=1, **kw):\n    pass\n");
        let kinds: Vec<ParamKind> = module
            .function("f")
            .unwrap()
            .params
            .iter()
            .map(|p| p.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                ParamKind::Positional,
                ParamKind::VarArgs,
                ParamKind::KeywordOnly,
                ParamKind::KwArgs
            ]
        );
    }

    #[test]
    fn test_syntax_error_is_parse_input() {
        let err = parse_source("def broken(:\n    pass\n", "bad.py").unwrap_err();
        match err {
            TranspileError::ParseInput { path, message } => {
                assert_eq!(path, "bad.py");
                assert!(message.contains("syntax error"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_decorators_collected() {
        let module = parse(
            "class C:\n    @staticmethod\n    def make():\n        return C()\n\n@cache\ndef g():\n    return 1\n",
        );
        let class = module.class("C").unwrap();
        assert!(class.methods[0].has_decorator("staticmethod"));
        assert!(module.function("g").unwrap().has_decorator("cache"));
    }
}
