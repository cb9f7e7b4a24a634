//! Classes: structs, constructors, error types and capability traits

use std::collections::{BTreeMap, BTreeSet};

use crate::analyzer::rule;
use crate::ast::{Class, Expr, ExprKind, Function, Location, Stmt, StmtKind};
use crate::diagnostics::ConstructKind;
use crate::inference::ownership::Usage;
use crate::types::{FunctionSig, Ownership, Type};

use super::function::{Binding, Body, FnCtx, FnShape, Receiver};
use super::{rust_ident, Lowerer, RustWriter, UnitCtx, Unsupported, PLACEHOLDER_MARKER};

/// One field of a generated struct
#[derive(Debug, Clone)]
pub(crate) struct StructField {
    pub name: String,
    pub ty: Type,
    pub loc: Location,
}

/// How the constructor body writes one field
#[derive(Debug, Default)]
struct FieldWrites<'s> {
    count: usize,
    first_depth: usize,
    first_value: Option<&'s Expr>,
    /// Written through (`self.f.append(x)`, `self.f[k] = v`)
    mutated: bool,
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// Methods a base contributes to its capability trait
fn trait_methods(class: &Class) -> impl Iterator<Item = &Function> {
    class
        .methods
        .iter()
        .filter(|m| m.takes_receiver() && !m.has_decorator("classmethod") && !is_dunder(&m.name))
}

fn short_name(base: &str) -> &str {
    base.rsplit('.').next().unwrap_or(base)
}

/// Writes to `self.<field>` in a constructor body
fn field_writes(body: &[Stmt]) -> BTreeMap<String, FieldWrites<'_>> {
    fn record<'s>(
        out: &mut BTreeMap<String, FieldWrites<'s>>,
        field: &str,
        depth: usize,
        value: Option<&'s Expr>,
    ) {
        let entry = out.entry(field.to_string()).or_default();
        if entry.count == 0 {
            entry.first_depth = depth;
            entry.first_value = value;
        }
        entry.count += 1;
    }

    fn visit<'s>(body: &'s [Stmt], depth: usize, out: &mut BTreeMap<String, FieldWrites<'s>>) {
        for stmt in body {
            match &stmt.kind {
                StmtKind::Assign { targets, value } => {
                    for target in targets {
                        if let Some(field) = target.self_attribute() {
                            record(out, field, depth, Some(value));
                        }
                    }
                }
                StmtKind::AnnAssign {
                    target,
                    value: Some(value),
                    ..
                } => {
                    if let Some(field) = target.self_attribute() {
                        record(out, field, depth, Some(value));
                    }
                }
                StmtKind::AugAssign { target, .. } => {
                    if let Some(field) = target.self_attribute() {
                        record(out, field, depth, None);
                    }
                }
                _ => {}
            }
            for block in stmt.blocks() {
                visit(block, depth + 1, out);
            }
        }
    }

    let mut out = BTreeMap::new();
    visit(body, 0, &mut out);

    let mut through: BTreeSet<String> = BTreeSet::new();
    for stmt in body {
        stmt.walk(&mut |s: &Stmt| {
            if let StmtKind::Assign { targets, .. } = &s.kind {
                for target in targets {
                    if let ExprKind::Subscript { value, .. } | ExprKind::Attribute { value, .. } = &target.kind {
                        if let Some(field) = value.self_attribute() {
                            through.insert(field.to_string());
                        }
                    }
                }
            }
        });
        stmt.walk_exprs(&mut |e: &Expr| {
            if let ExprKind::Call { func, .. } = &e.kind {
                if let ExprKind::Attribute { value, .. } = &func.kind {
                    if let Some(field) = value.self_attribute() {
                        through.insert(field.to_string());
                    }
                }
            }
        });
    }
    for field in through {
        out.entry(field).or_default().mutated = true;
    }
    out
}

impl<'a> Lowerer<'a> {
    pub(super) fn class(&self, w: &mut RustWriter, unit: &mut UnitCtx, class: &Class, capabilities: &mut BTreeSet<String>) {
        if self.exceptions.contains(&class.name) {
            self.exception_class(w, unit, class);
            return;
        }
        let bases = class.effective_bases();
        if bases.len() > 1 {
            self.multiple_inheritance(w, unit, class, &bases, capabilities);
            return;
        }
        if let Some(base) = bases.first() {
            if self.module.class(base).is_none() {
                let reference = unit
                    .findings
                    .iter()
                    .find(|f| f.kind == ConstructKind::ExternalBaseClass && f.location == class.loc)
                    .map(|f| f.reference());
                match reference {
                    Some(r) => w.comment(format!("`{}` extends `{}`, which is not part of this module, see {}", class.name, base, r)),
                    None => w.comment(format!("`{}` extends `{}`, which is not part of this module", class.name, base)),
                }
            }
        }

        let fields = self.struct_fields(&[class.name.as_str()]);
        self.struct_decl(w, unit, class, &fields);
        w.blank();

        w.open(format!("impl {}", rust_ident(&class.name)));
        self.constructor(w, unit, class, &fields);
        for method in class.methods.iter().filter(|m| m.name != "__init__") {
            w.blank();
            self.method(w, unit, class, method);
        }
        for (owner, method) in self.inherited_methods(class) {
            w.blank();
            self.method(w, unit, owner, method);
        }
        w.close();

        self.display_impl(w, &class.name);
    }

    /// `Owner.__str__` when it produces a string
    pub(super) fn display_owner(&self, class: &str) -> Option<String> {
        let owner = self.inference.method_owner(class, "__str__")?;
        self.inference
            .signature(&owner)
            .filter(|sig| sig.ret.is_str())
            .map(|_| owner)
    }

    /// In-module base chain of `class`, nearest first
    fn base_chain(&self, class: &str) -> Vec<&'a Class> {
        let mut chain = Vec::new();
        let mut current = self.inference.bases.get(class);
        while let Some(name) = current {
            let Some(base) = self.module.class(name) else { break };
            if chain.iter().any(|c: &&Class| c.name == base.name) {
                break;
            }
            chain.push(base);
            current = self.inference.bases.get(name);
        }
        chain
    }

    /// Base methods the class does not override, nearest base first
    fn inherited_methods(&self, class: &Class) -> Vec<(&'a Class, &'a Function)> {
        let mut seen: BTreeSet<&str> = class.methods.iter().map(|m| m.name.as_str()).collect();
        let mut out = Vec::new();
        for base in self.base_chain(&class.name) {
            for method in &base.methods {
                if method.name == "__init__" || !seen.insert(method.name.as_str()) {
                    continue;
                }
                out.push((base, method));
            }
        }
        out
    }

    /// Fields of the given classes and their in-module bases, root fields first
    fn struct_fields(&self, classes: &[&str]) -> Vec<StructField> {
        let mut out: Vec<StructField> = Vec::new();
        for name in classes {
            let mut chain: Vec<&str> = self.base_chain(name).iter().map(|c| c.name.as_str()).collect();
            chain.reverse();
            chain.push(*name);
            for owner in chain {
                let Some(declared) = self.inference.fields.get(owner) else {
                    continue;
                };
                for (field, ty) in declared {
                    let loc = self
                        .module
                        .class(owner)
                        .and_then(|c| c.field(field))
                        .map(|f| f.loc)
                        .unwrap_or_default();
                    match out.iter_mut().find(|f| f.name == *field) {
                        Some(existing) => existing.ty = ty.clone(),
                        None => out.push(StructField {
                            name: field.clone(),
                            ty: ty.clone(),
                            loc,
                        }),
                    }
                }
            }
        }
        out
    }

    fn struct_decl(&self, w: &mut RustWriter, unit: &mut UnitCtx, class: &Class, fields: &[StructField]) {
        w.doc(class.doc.as_deref());
        let opaque: Vec<&StructField> = fields.iter().filter(|f| f.ty.to_rust().is_none()).collect();
        for field in &opaque {
            unit.placeholder_item(
                w,
                &Unsupported::new(field.loc, format!("type of field `{}.{}`", class.name, field.name)),
            );
        }
        w.line(if opaque.is_empty() {
            "#[derive(Debug, Clone)]"
        } else {
            "#[derive(Debug)]"
        });
        w.open(format!("pub struct {}", rust_ident(&class.name)));
        for field in fields {
            let ty = field
                .ty
                .to_rust()
                .unwrap_or_else(|| "Box<dyn std::any::Any>".to_string());
            w.line(format!("pub {}: {},", rust_ident(&field.name), ty));
        }
        w.close();
    }

    /// One method inside an `impl` block
    fn method(&self, w: &mut RustWriter, unit: &mut UnitCtx, owner: &Class, method: &Function) {
        let qualified = format!("{}.{}", owner.name, method.name);
        let Some(sig) = self.inference.signature(&qualified) else {
            return;
        };
        let receiver = self.receiver(method, &qualified);
        let mut shape = FnShape::of(method, qualified.clone(), receiver, "pub ");
        if method.has_decorator("classmethod") {
            shape.blocker = Some(Unsupported::new(method.loc, format!("class method `{}`", qualified)));
        }
        let mut ctx = FnCtx::new(self, unit, qualified);
        ctx.class = Some(owner);
        ctx.emit_function(w, &shape, sig, Body::Block(&method.body));
    }

    fn receiver(&self, method: &Function, qualified: &str) -> Receiver {
        if !method.takes_receiver() {
            Receiver::None
        } else if self.inference.mutating.contains(qualified) {
            Receiver::Mutable
        } else {
            Receiver::Shared
        }
    }

    fn display_impl(&self, w: &mut RustWriter, class: &str) {
        let Some(owner) = self.display_owner(class) else {
            return;
        };
        w.blank();
        w.open(format!("impl std::fmt::Display for {}", rust_ident(class)));
        w.open("fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result");
        if self.inference.is_fallible(&owner) {
            w.line("f.write_str(&self.display_text().map_err(|_| std::fmt::Error)?)");
        } else {
            w.line("f.write_str(&self.display_text())");
        }
        w.close();
        w.close();
    }

    // ========================================================================
    // Constructors
    // ========================================================================

    /// Body the constructor runs: the class's own `__init__` or the nearest inherited one
    fn init_source<'c>(&'c self, class: &'c Class) -> Option<(&'c Class, &'c Function)> {
        if let Some(init) = class.method("__init__") {
            return Some((class, init));
        }
        if class.is_dataclass() {
            return None;
        }
        self.base_chain(&class.name)
            .into_iter()
            .find_map(|base| base.method("__init__").map(|init| (base, init)))
    }

    fn constructor(&self, w: &mut RustWriter, unit: &mut UnitCtx, class: &Class, fields: &[StructField]) {
        let key = format!("{}.__init__", class.name);
        let Some(sig) = self.inference.signature(&key) else {
            return;
        };
        let source = self.init_source(class);
        let scope = match source {
            Some((owner, _)) => format!("{}.__init__", owner.name),
            None => key.clone(),
        };
        let init = source.map(|(_, f)| f);
        let shape = FnShape {
            name: "new".to_string(),
            qualified: key,
            params: init.and_then(|f| f.params.get(1..)).unwrap_or(&[]),
            decorators: &[],
            doc: init.and_then(|f| f.doc.as_deref()),
            receiver: Receiver::None,
            vis: "pub ",
            is_async: init.is_some_and(|f| f.is_async),
            loc: init.map(|f| f.loc).unwrap_or(class.loc),
            blocker: None,
        };
        let body: &[Stmt] = init.map(|f| &f.body[..]).unwrap_or(&[]);

        let mut lineage: Vec<&Class> = self.base_chain(&class.name);
        lineage.reverse();
        lineage.push(class);
        let mut defaults: BTreeMap<&str, &Expr> = BTreeMap::new();
        for owner in lineage {
            for field in owner.fields.iter().filter(|f| !f.from_init) {
                if let Some(default) = &field.default {
                    defaults.insert(field.name.as_str(), default);
                }
            }
        }

        let mut ctx = FnCtx::new(self, unit, scope);
        ctx.class = Some(class);
        ctx.emit_constructor(w, &shape, sig, body, fields, &defaults);
    }

    // ========================================================================
    // Exceptions
    // ========================================================================

    fn exception_class(&self, w: &mut RustWriter, unit: &mut UnitCtx, class: &Class) {
        let name = rust_ident(&class.name);
        w.doc(class.doc.as_deref());
        if !class.methods.is_empty() || !class.fields.is_empty() {
            unit.placeholder_item(
                w,
                &Unsupported::new(class.loc, format!("custom behaviour of exception `{}`", class.name)),
            );
        }
        w.line("#[derive(Debug, Clone)]");
        w.open(format!("pub struct {}", name));
        w.line("pub message: String,");
        w.close();
        w.blank();
        w.open(format!("impl {}", name));
        w.open("pub fn new(message: impl Into<String>) -> Self");
        w.line("Self { message: message.into() }");
        w.close();
        w.close();
        w.blank();
        w.open(format!("impl std::fmt::Display for {}", name));
        w.open("fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result");
        w.line("f.write_str(&self.message)");
        w.close();
        w.close();
        w.blank();
        w.line(format!("impl std::error::Error for {} {{}}", name));
    }

    // ========================================================================
    // Multiple inheritance
    // ========================================================================

    /// One capability trait per base, an aggregate struct and one trait impl per base
    fn multiple_inheritance(
        &self,
        w: &mut RustWriter,
        unit: &mut UnitCtx,
        class: &Class,
        bases: &[String],
        capabilities: &mut BTreeSet<String>,
    ) {
        let in_module: Vec<&'a Class> = bases.iter().filter_map(|b| self.module.class(b)).collect();

        for base in bases {
            let trait_name = format!("{}Capability", short_name(base));
            if !capabilities.insert(trait_name.clone()) {
                continue;
            }
            match self.module.class(base) {
                Some(base_class) => {
                    w.doc(Some(format!("Behaviour contributed by `{}`", base).as_str()));
                    w.open(format!("pub trait {}", trait_name));
                    for method in trait_methods(base_class) {
                        let qualified = format!("{}.{}", base_class.name, method.name);
                        let Some(sig) = self.inference.signature(&qualified) else {
                            continue;
                        };
                        let shape = FnShape::of(method, qualified.clone(), self.receiver(method, &qualified), "");
                        let mut ctx = FnCtx::new(self, unit, qualified);
                        ctx.class = Some(base_class);
                        ctx.emit_function(w, &shape, sig, Body::Declaration);
                    }
                    w.close();
                }
                None => w.line(format!("pub trait {} {{}}", trait_name)),
            }
            w.blank();
        }

        let mut definers: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for base in &in_module {
            for method in trait_methods(base) {
                definers.entry(method.name.as_str()).or_default().push(base.name.as_str());
            }
        }
        let mut ambiguous: BTreeSet<&str> = BTreeSet::new();
        for (method, owners) in &definers {
            if owners.len() > 1 && class.method(method).is_none() {
                unit.raise_finding(ConstructKind::AmbiguousCapability, class.loc, method);
                ambiguous.insert(*method);
            }
        }

        let reference = unit.justify(class.loc, &format!("multiple inheritance in `{}`", class.name));
        w.comment(format!(
            "{}: `{}` combines {} as one struct implementing their capability traits, see {}",
            PLACEHOLDER_MARKER,
            class.name,
            bases.iter().map(|b| format!("`{}`", b)).collect::<Vec<_>>().join(", "),
            reference
        ));

        let mut owners: Vec<&str> = in_module.iter().map(|b| b.name.as_str()).collect();
        owners.push(class.name.as_str());
        let fields = self.struct_fields(&owners);
        self.struct_decl(w, unit, class, &fields);
        w.blank();

        let trait_names: BTreeSet<&str> = definers.keys().copied().collect();
        w.open(format!("impl {}", rust_ident(&class.name)));
        self.constructor(w, unit, class, &fields);
        for method in class
            .methods
            .iter()
            .filter(|m| m.name != "__init__" && !trait_names.contains(m.name.as_str()))
        {
            w.blank();
            self.method(w, unit, class, method);
        }
        w.close();

        for base in &in_module {
            w.blank();
            w.open(format!(
                "impl {}Capability for {}",
                short_name(&base.name),
                rust_ident(&class.name)
            ));
            for (idx, method) in trait_methods(base).enumerate() {
                if idx > 0 {
                    w.blank();
                }
                self.capability_method(w, unit, class, base, method, &ambiguous);
            }
            w.close();
        }
        self.display_impl(w, &class.name);
    }

    /// A trait method in the aggregate: the class's override, or the base's own body
    fn capability_method(
        &self,
        w: &mut RustWriter,
        unit: &mut UnitCtx,
        class: &Class,
        base: &Class,
        method: &Function,
        ambiguous: &BTreeSet<&str>,
    ) {
        let base_key = format!("{}.{}", base.name, method.name);
        let receiver = self.receiver(method, &base_key);
        let (owner, body_fn) = match class.method(&method.name) {
            Some(own) => (class, own),
            None => (base, method),
        };
        let qualified = format!("{}.{}", owner.name, body_fn.name);
        let Some(sig) = self.inference.signature(&qualified) else {
            return;
        };
        let mut shape = FnShape::of(body_fn, qualified.clone(), receiver, "");
        if ambiguous.contains(method.name.as_str()) {
            shape.blocker = Some(Unsupported::new(
                class.loc,
                rule(ConstructKind::AmbiguousCapability)
                    .message
                    .replace("{detail}", &method.name),
            ));
        } else if receiver != Receiver::Mutable && self.inference.mutating.contains(&qualified) {
            shape.blocker = Some(Unsupported::new(
                body_fn.loc,
                format!("override `{}` mutates a receiver its trait shares", qualified),
            ));
        }
        let mut ctx = FnCtx::new(self, unit, qualified);
        ctx.class = Some(owner);
        ctx.emit_function(w, &shape, sig, Body::Block(&body_fn.body));
    }
}

impl<'a> FnCtx<'a> {
    /// `new`: the `__init__` body over locals, then the struct literal
    pub fn emit_constructor(
        &mut self,
        w: &mut RustWriter,
        shape: &FnShape<'_>,
        sig: &FunctionSig,
        body: &[Stmt],
        fields: &[StructField],
        defaults: &BTreeMap<&str, &Expr>,
    ) {
        self.usage = Usage::of(body);
        self.collect_mutable(body);
        w.doc(shape.doc);
        let blocker = self.shape_blocker(shape, Body::Block(body));
        let header = self.header(w, shape, sig, Body::Block(body));

        let writes = field_writes(body);
        let mut locals: BTreeMap<String, String> = BTreeMap::new();
        let mut nested: Vec<(&str, String, Type)> = Vec::new();
        for field in fields {
            let Some(write) = writes.get(&field.name) else {
                continue;
            };
            let passthrough = write.count == 1
                && write.first_depth == 0
                && !write.mutated
                && write.first_value.and_then(Expr::as_name) == Some(field.name.as_str())
                && sig.param(&field.name).is_some_and(|p| {
                    p.ownership == Ownership::ByValue && !p.rebound && p.ty == field.ty
                })
                && !self.mutable.contains(&field.name);
            if passthrough {
                self.passthrough.insert(field.name.clone());
                locals.insert(field.name.clone(), rust_ident(&field.name));
                continue;
            }
            let local = if matches!(self.binding(&field.name), Binding::Unknown) {
                rust_ident(&field.name)
            } else {
                format!("{}_field", field.name)
            };
            if write.count > 1 || write.mutated {
                self.mutable.insert(local.clone());
            }
            if write.first_depth > 0 {
                nested.push((field.name.as_str(), local.clone(), field.ty.clone()));
            }
            locals.insert(field.name.clone(), local);
        }
        self.init_fields = Some(locals.clone());
        let unassigned = nested
            .iter()
            .map(|(field, _, _)| *field)
            .find(|field| !self.always_binds(body, &|t: &Expr| t.self_attribute() == Some(*field)));
        let blocker = blocker.or_else(|| {
            unassigned.map(|field| {
                Unsupported::new(
                    shape.loc,
                    format!("`self.{}` is not assigned on every path through the constructor", field),
                )
            })
        });

        w.open(header);
        if let Some(unsupported) = blocker {
            self.unit.placeholder(w, &unsupported);
            w.close();
            return;
        }
        for (_, local, ty) in nested {
            let Some(rust_ty) = ty.to_rust() else { continue };
            let mutability = if self.mutable.contains(&local) { "mut " } else { "" };
            w.line(format!("let {}{}: {};", mutability, local, rust_ty));
            self.declared.insert(local);
        }
        self.hoist(w, body);
        for stmt in body {
            self.stmt_or_placeholder(w, stmt);
        }

        let mut inits = Vec::with_capacity(fields.len());
        for field in fields {
            let name = rust_ident(&field.name);
            if field.ty.to_rust().is_none() {
                self.unit.placeholder(
                    w,
                    &Unsupported::new(field.loc, format!("type of field `{}`", field.name)),
                );
                w.close();
                return;
            }
            if let Some(local) = locals.get(&field.name) {
                inits.push(if *local == name {
                    name
                } else {
                    format!("{}: {}", name, local)
                });
                continue;
            }
            if sig.param(&field.name).is_some() {
                inits.push(name);
                continue;
            }
            let lowered = match defaults.get(field.name.as_str()) {
                Some(default) => self.coerce(default, &field.ty),
                None => Err(Unsupported::new(
                    shape.loc,
                    format!("value of field `{}` after construction", field.name),
                )),
            };
            match lowered {
                Ok(code) => inits.push(format!("{}: {}", name, code)),
                Err(unsupported) => {
                    self.unit.placeholder(w, &unsupported);
                    w.close();
                    return;
                }
            }
        }
        let literal = if inits.is_empty() {
            "Self {}".to_string()
        } else {
            format!("Self {{ {} }}", inits.join(", "))
        };
        w.line(if self.fallible {
            format!("Ok({})", literal)
        } else {
            literal
        });
        w.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(id: &str) -> Expr {
        Expr::new(ExprKind::Name(id.to_string()), Location::new(1, 0))
    }

    fn self_attr(attr: &str) -> Expr {
        Expr::new(
            ExprKind::Attribute {
                value: Box::new(name("self")),
                attr: attr.to_string(),
            },
            Location::new(1, 0),
        )
    }

    fn assign(target: Expr, value: Expr) -> Stmt {
        Stmt::new(
            StmtKind::Assign {
                targets: vec![target],
                value,
            },
            Location::new(1, 0),
        )
    }

    #[test]
    fn test_is_dunder() {
        assert!(is_dunder("__eq__"));
        assert!(!is_dunder("__"));
        assert!(!is_dunder("_private"));
        assert!(!is_dunder("area"));
    }

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("mixins.Logging"), "Logging");
        assert_eq!(short_name("Shape"), "Shape");
    }

    #[test]
    fn test_field_writes_counts_and_depth() {
        let body = vec![
            assign(self_attr("x"), name("x")),
            Stmt::new(
                StmtKind::If {
                    test: name("flag"),
                    body: vec![assign(self_attr("y"), name("x")), assign(self_attr("x"), name("y"))],
                    orelse: Vec::new(),
                },
                Location::new(2, 0),
            ),
        ];
        let writes = field_writes(&body);
        assert_eq!(writes["x"].count, 2);
        assert_eq!(writes["x"].first_depth, 0);
        assert_eq!(writes["y"].count, 1);
        assert_eq!(writes["y"].first_depth, 1);
        assert!(!writes["x"].mutated);
    }

    #[test]
    fn test_field_writes_detects_mutation_through_field() {
        let call = Expr::new(
            ExprKind::Call {
                func: Box::new(Expr::new(
                    ExprKind::Attribute {
                        value: Box::new(self_attr("items")),
                        attr: "append".to_string(),
                    },
                    Location::new(2, 0),
                )),
                args: vec![name("x")],
                keywords: Vec::new(),
            },
            Location::new(2, 0),
        );
        let body = vec![
            assign(self_attr("items"), Expr::new(ExprKind::List(Vec::new()), Location::new(1, 0))),
            Stmt::new(StmtKind::Expr(call), Location::new(2, 0)),
        ];
        let writes = field_writes(&body);
        assert_eq!(writes["items"].count, 1);
        assert!(writes["items"].mutated);
    }
}
