//! Symbol graph builder: one walk per file, tree in, fragment out.
//!
//! The builder is a pure function of a file's syntax tree. It creates one
//! symbol per declaration, records raw references without resolving them,
//! and lowers everything the analyzers need (entity registrations, field
//! declarations, call shapes, domain expressions) into serializable fragment
//! data so nothing downstream touches tree nodes.
//!
//! Malformed declarations degrade: a class with a non-string registered name
//! becomes an `Unknown` symbol plus a diagnostic; the rest of the file is
//! still analyzed.

use tree_sitter::{Node, Tree};

use loupe_core::diag::{DiagCode, Diagnostic};
use loupe_core::graph::{
    CallArg, CallSite, CondElem, DepDecl, DomainItem, DomainSite, DomainSubject, DomainValue,
    EntityDecl, FieldDecl, FileId, Fragment, LitKind, Param, ParamKind, RefId, RefTarget,
    Reference, Scope, ScopeId, ScopeKind, Signature, Span, SymKind, SymLink, Symbol, SymbolId,
};

use crate::syntax;

/// Class-body attribute that registers a logical entity name.
const NAME_ATTR: &str = "_name";
/// Class-body attribute that declares extension of registered names.
const EXTEND_ATTR: &str = "_inherit";
/// Field constructor namespace: `x = fields.Char(...)`.
const FIELDS_NAMESPACE: &str = "fields";
/// Registry accessor: `env["logical.name"]`.
const REGISTRY_ACCESSOR: &str = "env";
/// Methods whose first argument is a domain expression.
const DOMAIN_METHODS: &[&str] = &["search", "search_count"];
/// Decorators declaring field-path dependencies.
const DEP_DECORATORS: &[&str] = &["depends", "onchange", "constrains"];

/// Build a file's graph fragment from its syntax tree.
///
/// Pure per-file: never consults other files or the store.
pub fn build(file_id: FileId, path: &str, text: &str, tree: &Tree) -> Fragment {
    let mut b = Builder {
        src: text,
        frag: Fragment::new(file_id, path, text.len()),
        next_sym: 1,
        next_ref: 0,
        next_scope: 1,
    };

    // The file itself is a module symbol; imports terminate on it.
    let module_name = module_name_of(path);
    let root = tree.root_node();
    let mut module_sym = Symbol::new(
        SymbolId(0),
        SymKind::Module,
        module_name,
        Span::new(0, 0),
        b.frag.module_scope,
    );
    module_sym.body_scope = Some(b.frag.module_scope);
    module_sym.doc = syntax::docstring(root, text);
    b.frag.symbols.insert(SymbolId(0), module_sym);

    b.visit_body(root, b.frag.module_scope, None, "");
    b.frag
}

/// Module name of a workspace-relative path: `pkg/mod.py` → `mod`,
/// `pkg/__init__.py` → `pkg`.
fn module_name_of(path: &str) -> String {
    let stem = path
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .trim_end_matches(".py");
    if stem == "__init__" {
        let parent = path.rsplit('/').nth(1).unwrap_or(stem);
        parent.to_string()
    } else {
        stem.to_string()
    }
}

/// Class context threaded through class-body statement visits.
struct ClassCtx {
    sym: SymbolId,
    #[allow(dead_code)]
    scope: ScopeId,
}

struct Builder<'s> {
    src: &'s str,
    frag: Fragment,
    next_sym: u32,
    next_ref: u32,
    next_scope: u32,
}

impl<'s> Builder<'s> {
    fn new_symbol(&mut self, kind: SymKind, name: &str, span: Span, scope: ScopeId) -> SymbolId {
        let id = SymbolId(self.next_sym);
        self.next_sym += 1;
        self.frag
            .symbols
            .insert(id, Symbol::new(id, kind, name, span, scope));
        id
    }

    fn new_scope(&mut self, kind: ScopeKind, parent: ScopeId, span: Span) -> ScopeId {
        let id = ScopeId(self.next_scope);
        self.next_scope += 1;
        self.frag
            .scopes
            .insert(id, Scope::new(id, kind, Some(parent), span));
        id
    }

    fn bind(&mut self, scope: ScopeId, name: &str, sym: SymbolId) {
        if let Some(s) = self.frag.scopes.get_mut(&scope) {
            s.bindings.insert(name.to_string(), sym);
        }
    }

    fn add_reference(&mut self, scope: ScopeId, span: Span, target: RefTarget) {
        let id = RefId(self.next_ref);
        self.next_ref += 1;
        self.frag.references.insert(
            id,
            Reference {
                ref_id: id,
                span,
                scope,
                target,
            },
        );
    }

    fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        self.frag
            .symbols
            .get_mut(&id)
            .expect("symbol created by this builder")
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn visit_body(&mut self, body: Node<'_>, scope: ScopeId, class: Option<&ClassCtx>, q: &str) {
        for stmt in syntax::children(body) {
            self.visit_stmt(stmt, scope, class, q);
        }
    }

    fn visit_stmt(&mut self, stmt: Node<'_>, scope: ScopeId, class: Option<&ClassCtx>, q: &str) {
        match stmt.kind() {
            "class_definition" => self.visit_class(stmt, stmt, &[], scope, q),
            "function_definition" => self.visit_function(stmt, stmt, &[], scope, class, q),
            "decorated_definition" => {
                let decorators: Vec<Node<'_>> = syntax::children(stmt)
                    .into_iter()
                    .filter(|n| n.kind() == "decorator")
                    .collect();
                if let Some(def) = stmt.child_by_field_name("definition") {
                    match def.kind() {
                        "class_definition" => self.visit_class(def, stmt, &decorators, scope, q),
                        "function_definition" => {
                            self.visit_function(def, stmt, &decorators, scope, class, q)
                        }
                        _ => {}
                    }
                }
            }
            "expression_statement" => {
                for expr in syntax::children(stmt) {
                    match expr.kind() {
                        "assignment" => self.visit_assignment(expr, stmt, scope, class, q),
                        _ => self.visit_expr(expr, scope),
                    }
                }
            }
            "import_statement" => self.visit_import(stmt, scope),
            "import_from_statement" => self.visit_import_from(stmt, scope),
            "comment" => {}
            _ => {
                // Compound statements (if/for/while/try/with...) introduce no
                // scope in Python; walk their blocks in place and treat other
                // children as expressions.
                for child in syntax::children(stmt) {
                    if child.kind() == "block" {
                        self.visit_body(child, scope, class, q);
                    } else {
                        self.visit_expr(child, scope);
                    }
                }
            }
        }
    }

    fn visit_class(
        &mut self,
        node: Node<'_>,
        outer: Node<'_>,
        _decorators: &[Node<'_>],
        scope: ScopeId,
        q: &str,
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = syntax::text(name_node, self.src).to_string();
        let qualified = join_qualified(q, &name);
        let class_scope = self.new_scope(ScopeKind::Class, scope, syntax::span(node));
        let class_id = self.new_symbol(SymKind::Class, &name, syntax::span(name_node), scope);
        self.bind(scope, &name, class_id);

        let body = node.child_by_field_name("body");
        let doc = body
            .and_then(|b| syntax::docstring(b, self.src))
            .or_else(|| syntax::leading_comments(outer, self.src));

        {
            let sym = self.symbol_mut(class_id);
            sym.qualified_name = qualified.clone();
            sym.decl_span = Some(syntax::span(node));
            sym.body_scope = Some(class_scope);
            sym.doc = doc;
        }

        // Base-class expressions are ordinary references.
        if let Some(supers) = node.child_by_field_name("superclasses") {
            for base in syntax::children(supers) {
                self.visit_expr(base, scope);
            }
        }

        if let Some(body) = body {
            self.scan_entity_decl(body, class_id, &name);
            let ctx = ClassCtx {
                sym: class_id,
                scope: class_scope,
            };
            self.visit_body(body, class_scope, Some(&ctx), &qualified);
        }
    }

    /// Scan a class body for registry participation (`_name` / `_inherit`).
    fn scan_entity_decl(&mut self, body: Node<'_>, class_id: SymbolId, class_name: &str) {
        let mut logical_name: Option<String> = None;
        let mut extends: Vec<String> = Vec::new();
        let mut decl_span: Option<Span> = None;

        for stmt in syntax::children(body) {
            if stmt.kind() != "expression_statement" {
                continue;
            }
            for expr in syntax::children(stmt) {
                if expr.kind() != "assignment" {
                    continue;
                }
                let (Some(left), Some(right)) = (
                    expr.child_by_field_name("left"),
                    expr.child_by_field_name("right"),
                ) else {
                    continue;
                };
                if left.kind() != "identifier" {
                    continue;
                }
                match syntax::text(left, self.src) {
                    NAME_ATTR => match syntax::string_value(right, self.src) {
                        Some(value) => {
                            logical_name = Some(value);
                            decl_span = Some(syntax::span(right));
                        }
                        None => {
                            self.frag.diagnostics.push(Diagnostic::new(
                                DiagCode::EntityInvalidName,
                                syntax::span(right),
                                format!(
                                    "registered name of class {} must be a string literal",
                                    class_name
                                ),
                            ));
                            self.symbol_mut(class_id).kind = SymKind::Unknown;
                        }
                    },
                    EXTEND_ATTR => {
                        decl_span.get_or_insert(syntax::span(right));
                        if let Some(value) = syntax::string_value(right, self.src) {
                            extends.push(value);
                        } else if right.kind() == "list" {
                            for el in syntax::children(right) {
                                if let Some(value) = syntax::string_value(el, self.src) {
                                    extends.push(value);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        if logical_name.is_some() || !extends.is_empty() {
            let span = decl_span.unwrap_or_else(|| {
                self.frag
                    .symbols
                    .get(&class_id)
                    .map(|s| s.span)
                    .unwrap_or_default()
            });
            self.frag.entities.push(EntityDecl {
                class_sym: class_id,
                logical_name,
                extends,
                span,
            });
        }
    }

    fn visit_function(
        &mut self,
        node: Node<'_>,
        outer: Node<'_>,
        decorators: &[Node<'_>],
        scope: ScopeId,
        class: Option<&ClassCtx>,
        q: &str,
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = syntax::text(name_node, self.src).to_string();
        let qualified = join_qualified(q, &name);
        let kind = if class.is_some() {
            SymKind::Method
        } else {
            SymKind::Function
        };
        let func_scope = self.new_scope(ScopeKind::Function, scope, syntax::span(node));
        let func_id = self.new_symbol(kind, &name, syntax::span(name_node), scope);
        self.bind(scope, &name, func_id);

        let mut is_property = false;
        for dec in decorators {
            let Some(expr) = syntax::children(*dec).into_iter().next() else {
                continue;
            };
            match expr.kind() {
                "identifier" | "attribute" => {
                    if let Some(chain) = syntax::name_chain(expr, self.src) {
                        if chain.last().map(String::as_str) == Some("property") {
                            is_property = true;
                        }
                    }
                }
                "call" => self.visit_dep_decorator(expr, class),
                _ => {}
            }
        }

        let signature = self.collect_params(node, func_scope);
        let returns = node
            .child_by_field_name("return_type")
            .map(|t| syntax::text(t, self.src).trim().to_string());
        let body = node.child_by_field_name("body");
        let doc = body
            .and_then(|b| syntax::docstring(b, self.src))
            .or_else(|| syntax::leading_comments(outer, self.src));

        {
            let sym = self.symbol_mut(func_id);
            sym.qualified_name = qualified.clone();
            sym.decl_span = Some(syntax::span(node));
            sym.body_scope = Some(func_scope);
            sym.is_property = is_property;
            sym.signature = Some(signature);
            sym.returns = returns;
            sym.doc = doc;
        }

        if let Some(body) = body {
            self.visit_body(body, func_scope, None, &qualified);
        }
    }

    /// `@api.depends("a.b")` and friends: record each string argument as a
    /// dependency path on the enclosing class.
    fn visit_dep_decorator(&mut self, call: Node<'_>, class: Option<&ClassCtx>) {
        let Some(class) = class else {
            return;
        };
        let Some(func) = call.child_by_field_name("function") else {
            return;
        };
        let Some(chain) = syntax::name_chain(func, self.src) else {
            return;
        };
        let Some(last) = chain.last() else {
            return;
        };
        if !DEP_DECORATORS.contains(&last.as_str()) {
            return;
        }
        let Some(args) = call.child_by_field_name("arguments") else {
            return;
        };
        for arg in syntax::children(args) {
            if let Some(path) = syntax::string_value(arg, self.src) {
                self.frag.deps.push(DepDecl {
                    class_sym: class.sym,
                    decorator: last.clone(),
                    path,
                    span: syntax::span(arg),
                });
            }
        }
    }

    fn collect_params(&mut self, func: Node<'_>, func_scope: ScopeId) -> Signature {
        let mut params: Vec<Param> = Vec::new();
        let Some(params_node) = func.child_by_field_name("parameters") else {
            return Signature::default();
        };
        let mut seen_star = false;
        for child in syntax::children(params_node) {
            let span = syntax::span(child);
            let param = match child.kind() {
                "identifier" => Some(Param {
                    name: syntax::text(child, self.src).to_string(),
                    kind: if seen_star {
                        ParamKind::KeywordOnly
                    } else {
                        ParamKind::PositionalOrKeyword
                    },
                    has_default: false,
                    annotation: None,
                    span,
                }),
                "typed_parameter" => {
                    let name = syntax::children(child)
                        .into_iter()
                        .find(|n| n.kind() == "identifier")
                        .map(|n| syntax::text(n, self.src).to_string())
                        .unwrap_or_default();
                    let annotation = child
                        .child_by_field_name("type")
                        .map(|t| syntax::text(t, self.src).trim().to_string());
                    Some(Param {
                        name,
                        kind: if seen_star {
                            ParamKind::KeywordOnly
                        } else {
                            ParamKind::PositionalOrKeyword
                        },
                        has_default: false,
                        annotation,
                        span,
                    })
                }
                "default_parameter" | "typed_default_parameter" => {
                    let name = child
                        .child_by_field_name("name")
                        .map(|n| syntax::text(n, self.src).to_string())
                        .unwrap_or_default();
                    let annotation = child
                        .child_by_field_name("type")
                        .map(|t| syntax::text(t, self.src).trim().to_string());
                    if let Some(value) = child.child_by_field_name("value") {
                        self.visit_expr(value, func_scope);
                    }
                    Some(Param {
                        name,
                        kind: if seen_star {
                            ParamKind::KeywordOnly
                        } else {
                            ParamKind::PositionalOrKeyword
                        },
                        has_default: true,
                        annotation,
                        span,
                    })
                }
                "list_splat_pattern" => {
                    seen_star = true;
                    syntax::children(child)
                        .into_iter()
                        .find(|n| n.kind() == "identifier")
                        .map(|n| Param {
                            name: syntax::text(n, self.src).to_string(),
                            kind: ParamKind::VarArgs,
                            has_default: false,
                            annotation: None,
                            span,
                        })
                }
                "dictionary_splat_pattern" => syntax::children(child)
                    .into_iter()
                    .find(|n| n.kind() == "identifier")
                    .map(|n| Param {
                        name: syntax::text(n, self.src).to_string(),
                        kind: ParamKind::KwArgs,
                        has_default: false,
                        annotation: None,
                        span,
                    }),
                "keyword_separator" => {
                    seen_star = true;
                    None
                }
                "positional_separator" => {
                    // Everything declared so far is positional-only.
                    for p in params.iter_mut() {
                        if p.kind == ParamKind::PositionalOrKeyword {
                            p.kind = ParamKind::PositionalOnly;
                        }
                    }
                    None
                }
                _ => None,
            };
            if let Some(param) = param {
                let sym = self.new_symbol(SymKind::Variable, &param.name, param.span, func_scope);
                if let Some(ann) = &param.annotation {
                    self.symbol_mut(sym).link = SymLink::Annotation(ann.clone());
                }
                self.bind(func_scope, &param.name, sym);
                params.push(param);
            }
        }
        Signature::new(params)
    }

    fn visit_assignment(
        &mut self,
        node: Node<'_>,
        outer: Node<'_>,
        scope: ScopeId,
        class: Option<&ClassCtx>,
        q: &str,
    ) {
        let left = node.child_by_field_name("left");
        let right = node.child_by_field_name("right");
        let annotation = node
            .child_by_field_name("type")
            .map(|t| syntax::text(t, self.src).trim().to_string());

        let Some(left) = left else {
            if let Some(right) = right {
                self.visit_expr(right, scope);
            }
            return;
        };

        match left.kind() {
            "identifier" => {
                let name = syntax::text(left, self.src).to_string();
                let span = syntax::span(left);

                let mut kind = SymKind::Variable;
                let mut field: Option<FieldDecl> = None;
                if let (Some(class), Some(right)) = (class, right) {
                    if let Some(decl) = self.lower_field_decl(class.sym, &name, span, right) {
                        kind = SymKind::Property;
                        field = Some(decl);
                    }
                }

                let qualified = join_qualified(q, &name);
                let sym = self.new_symbol(kind, &name, span, scope);
                let link = match (&annotation, right) {
                    (Some(ann), _) => SymLink::Annotation(ann.clone()),
                    (None, Some(right)) => self.lower_link(right),
                    (None, None) => SymLink::None,
                };
                let doc = syntax::leading_comments(outer, self.src);
                {
                    let s = self.symbol_mut(sym);
                    s.qualified_name = qualified;
                    s.is_type_alias =
                        matches!(link, SymLink::Name(_) | SymLink::Attribute { .. });
                    s.link = link;
                    s.doc = doc;
                }
                if let Some(mut decl) = field {
                    decl.symbol = sym;
                    self.frag.fields.push(decl);
                }
                if let Some(right) = right {
                    if right.kind() == "list" {
                        let items = self.lower_domain_items(right);
                        self.frag.list_literals.insert(sym, items);
                    }
                }
                self.bind(scope, &name, sym);
            }
            "pattern_list" | "tuple_pattern" => {
                // Multi-target assignment: bind names, no value tracking.
                for target in syntax::children(left) {
                    if target.kind() == "identifier" {
                        let name = syntax::text(target, self.src).to_string();
                        let sym = self.new_symbol(
                            SymKind::Variable,
                            &name,
                            syntax::span(target),
                            scope,
                        );
                        self.bind(scope, &name, sym);
                    }
                }
            }
            _ => {
                // Attribute / subscript stores: not declarations here.
            }
        }

        if let Some(right) = right {
            self.visit_expr(right, scope);
        }
    }

    /// Lower `name = fields.Kind(...)` into a field declaration.
    fn lower_field_decl(
        &mut self,
        class_sym: SymbolId,
        name: &str,
        span: Span,
        right: Node<'_>,
    ) -> Option<FieldDecl> {
        if right.kind() != "call" {
            return None;
        }
        let func = right.child_by_field_name("function")?;
        let chain = syntax::name_chain(func, self.src)?;
        let [namespace, kind] = chain.as_slice() else {
            return None;
        };
        if namespace != FIELDS_NAMESPACE {
            return None;
        }

        let mut decl = FieldDecl {
            class_sym,
            symbol: SymbolId(0), // patched by the caller
            name: name.to_string(),
            kind: kind.clone(),
            relation: None,
            inverse_name: None,
            related: None,
            compute: None,
            inverse: None,
            search: None,
            span,
        };

        if let Some(args) = right.child_by_field_name("arguments") {
            let mut positional_strings: Vec<String> = Vec::new();
            for arg in syntax::children(args) {
                if arg.kind() == "keyword_argument" {
                    let (Some(kw), Some(value)) = (
                        arg.child_by_field_name("name"),
                        arg.child_by_field_name("value"),
                    ) else {
                        continue;
                    };
                    let value = syntax::string_value(value, self.src);
                    match syntax::text(kw, self.src) {
                        "comodel_name" => decl.relation = decl.relation.take().or(value),
                        "inverse_name" => decl.inverse_name = decl.inverse_name.take().or(value),
                        "related" => decl.related = value,
                        "compute" => decl.compute = value,
                        "inverse" => decl.inverse = value,
                        "search" => decl.search = value,
                        _ => {}
                    }
                } else if let Some(value) = syntax::string_value(arg, self.src) {
                    positional_strings.push(value);
                }
            }
            if decl.is_relational() {
                let mut positional = positional_strings.into_iter();
                if decl.relation.is_none() {
                    decl.relation = positional.next();
                } else {
                    let _ = positional.next();
                }
                if decl.inverse_name.is_none() && decl.kind == "One2many" {
                    decl.inverse_name = positional.next();
                }
            }
        }

        Some(decl)
    }

    fn visit_import(&mut self, stmt: Node<'_>, scope: ScopeId) {
        for child in syntax::children(stmt) {
            match child.kind() {
                "dotted_name" => {
                    let module = syntax::text(child, self.src).to_string();
                    // `import a.b.c` binds the top-level package name.
                    let binding = module.split('.').next().unwrap_or(&module).to_string();
                    let top = binding.clone();
                    let sym =
                        self.new_symbol(SymKind::Import, &binding, syntax::span(child), scope);
                    self.symbol_mut(sym).link = SymLink::Import {
                        module: top,
                        name: None,
                    };
                    self.bind(scope, &binding, sym);
                    self.add_reference(
                        scope,
                        syntax::span(child),
                        RefTarget::Import { module, name: None },
                    );
                }
                "aliased_import" => {
                    let (Some(name_node), Some(alias_node)) = (
                        child.child_by_field_name("name"),
                        child.child_by_field_name("alias"),
                    ) else {
                        continue;
                    };
                    let module = syntax::text(name_node, self.src).to_string();
                    let alias = syntax::text(alias_node, self.src).to_string();
                    let sym =
                        self.new_symbol(SymKind::Import, &alias, syntax::span(alias_node), scope);
                    self.symbol_mut(sym).link = SymLink::Import {
                        module: module.clone(),
                        name: None,
                    };
                    self.bind(scope, &alias, sym);
                    self.add_reference(
                        scope,
                        syntax::span(name_node),
                        RefTarget::Import { module, name: None },
                    );
                }
                _ => {}
            }
        }
    }

    fn visit_import_from(&mut self, stmt: Node<'_>, scope: ScopeId) {
        let Some(module_node) = stmt.child_by_field_name("module_name") else {
            return;
        };
        let module = syntax::text(module_node, self.src).to_string();
        self.add_reference(
            scope,
            syntax::span(module_node),
            RefTarget::Import {
                module: module.clone(),
                name: None,
            },
        );

        let mut cursor = stmt.walk();
        let names: Vec<Node<'_>> = stmt.children_by_field_name("name", &mut cursor).collect();
        for name_node in names {
            match name_node.kind() {
                "dotted_name" => {
                    let imported = syntax::text(name_node, self.src).to_string();
                    let sym = self.new_symbol(
                        SymKind::Import,
                        &imported,
                        syntax::span(name_node),
                        scope,
                    );
                    self.symbol_mut(sym).link = SymLink::Import {
                        module: module.clone(),
                        name: Some(imported.clone()),
                    };
                    self.bind(scope, &imported, sym);
                    self.add_reference(
                        scope,
                        syntax::span(name_node),
                        RefTarget::Import {
                            module: module.clone(),
                            name: Some(imported),
                        },
                    );
                }
                "aliased_import" => {
                    let (Some(orig), Some(alias_node)) = (
                        name_node.child_by_field_name("name"),
                        name_node.child_by_field_name("alias"),
                    ) else {
                        continue;
                    };
                    let imported = syntax::text(orig, self.src).to_string();
                    let alias = syntax::text(alias_node, self.src).to_string();
                    let sym =
                        self.new_symbol(SymKind::Import, &alias, syntax::span(alias_node), scope);
                    self.symbol_mut(sym).link = SymLink::Import {
                        module: module.clone(),
                        name: Some(imported.clone()),
                    };
                    self.bind(scope, &alias, sym);
                    self.add_reference(
                        scope,
                        syntax::span(orig),
                        RefTarget::Import {
                            module: module.clone(),
                            name: Some(imported),
                        },
                    );
                }
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn visit_expr(&mut self, node: Node<'_>, scope: ScopeId) {
        match node.kind() {
            "call" => self.visit_call(node, scope),
            "identifier" => {
                let name = syntax::text(node, self.src).to_string();
                self.add_reference(scope, syntax::span(node), RefTarget::Name(name));
            }
            "attribute" => {
                if let Some(chain) = syntax::name_chain(node, self.src) {
                    let attr_span = node
                        .child_by_field_name("attribute")
                        .map(syntax::span)
                        .unwrap_or_else(|| syntax::span(node));
                    if let Some((attr, base)) = chain.split_last() {
                        self.add_reference(
                            scope,
                            attr_span,
                            RefTarget::Attribute {
                                base: base.to_vec(),
                                attr: attr.clone(),
                            },
                        );
                    }
                }
                if let Some(object) = node.child_by_field_name("object") {
                    self.visit_expr(object, scope);
                }
            }
            "subscript" => {
                if let Some((name, key_span)) = self.registry_lookup(node) {
                    self.add_reference(scope, key_span, RefTarget::Registry { name });
                    if let Some(value) = node.child_by_field_name("value") {
                        self.visit_expr(value, scope);
                    }
                } else {
                    for child in syntax::children(node) {
                        self.visit_expr(child, scope);
                    }
                }
            }
            "string" | "integer" | "float" | "true" | "false" | "none" | "comment" => {}
            _ => {
                for child in syntax::children(node) {
                    self.visit_expr(child, scope);
                }
            }
        }
    }

    /// Match `env["logical.name"]` / `self.env["logical.name"]`.
    fn registry_lookup(&self, subscript: Node<'_>) -> Option<(String, Span)> {
        let value = subscript.child_by_field_name("value")?;
        let chain = syntax::name_chain(value, self.src)?;
        if chain.last().map(String::as_str) != Some(REGISTRY_ACCESSOR) {
            return None;
        }
        let key = subscript.child_by_field_name("subscript")?;
        let name = syntax::string_value(key, self.src)?;
        Some((name, syntax::span(key)))
    }

    fn visit_call(&mut self, node: Node<'_>, scope: ScopeId) {
        let func = node.child_by_field_name("function");
        let args_node = node.child_by_field_name("arguments");
        let chain = func.and_then(|f| syntax::name_chain(f, self.src));

        let mut args: Vec<CallArg> = Vec::new();
        let mut has_splat = false;
        let mut seen_keyword = false;
        let mut positional_nodes: Vec<Node<'_>> = Vec::new();
        if let Some(args_node) = args_node {
            for arg in syntax::children(args_node) {
                match arg.kind() {
                    "keyword_argument" => {
                        seen_keyword = true;
                        let name = arg
                            .child_by_field_name("name")
                            .map(|n| syntax::text(n, self.src).to_string())
                            .unwrap_or_default();
                        args.push(CallArg {
                            keyword: Some(name),
                            span: syntax::span(arg),
                            after_keyword: false,
                        });
                    }
                    "list_splat" | "dictionary_splat" => {
                        has_splat = true;
                    }
                    "comment" => {}
                    _ => {
                        positional_nodes.push(arg);
                        args.push(CallArg {
                            keyword: None,
                            span: syntax::span(arg),
                            after_keyword: seen_keyword,
                        });
                    }
                }
            }
        }

        self.frag.call_sites.push(CallSite {
            span: syntax::span(node),
            scope,
            callee: chain.clone().unwrap_or_default(),
            args,
            has_splat,
        });

        self.capture_domain(func, scope, chain.as_deref(), &positional_nodes);

        if let Some(func) = func {
            self.visit_expr(func, scope);
        }
        if let Some(args_node) = args_node {
            for arg in syntax::children(args_node) {
                match arg.kind() {
                    "keyword_argument" => {
                        if let Some(value) = arg.child_by_field_name("value") {
                            self.visit_expr(value, scope);
                        }
                    }
                    _ => self.visit_expr(arg, scope),
                }
            }
        }
    }

    /// Capture the domain argument of a search-style call.
    fn capture_domain(
        &mut self,
        func: Option<Node<'_>>,
        scope: ScopeId,
        chain: Option<&[String]>,
        positional: &[Node<'_>],
    ) {
        match chain {
            Some(chain) => {
                let is_domain = chain
                    .last()
                    .is_some_and(|m| DOMAIN_METHODS.contains(&m.as_str()));
                if !is_domain {
                    return;
                }
            }
            None => {
                // `env["x"].search(...)`: callee is not a pure name chain.
                let Some(func) = func else { return };
                if func.kind() != "attribute" {
                    return;
                }
                let Some(attr) = func.child_by_field_name("attribute") else {
                    return;
                };
                if !DOMAIN_METHODS.contains(&syntax::text(attr, self.src)) {
                    return;
                }
            }
        }

        let subject = match chain {
            Some([first, .., _last]) if first == "self" => DomainSubject::SelfEntity,
            _ => {
                let entity = func
                    .and_then(|f| f.child_by_field_name("object"))
                    .filter(|obj| obj.kind() == "subscript")
                    .and_then(|obj| self.registry_lookup(obj))
                    .map(|(name, _)| name);
                match entity {
                    Some(name) => DomainSubject::Entity(name),
                    None => DomainSubject::Unknown,
                }
            }
        };

        let Some(first_arg) = positional.first() else {
            return;
        };
        let value = match first_arg.kind() {
            "list" => DomainValue::List(self.lower_domain_items(*first_arg)),
            "identifier" => DomainValue::Name(syntax::text(*first_arg, self.src).to_string()),
            "integer" => DomainValue::Other("int literal".to_string()),
            "float" => DomainValue::Other("float literal".to_string()),
            "string" => DomainValue::Other("string literal".to_string()),
            "tuple" => DomainValue::Other("tuple literal".to_string()),
            "dictionary" => DomainValue::Other("dict literal".to_string()),
            _ => return,
        };

        self.frag.domains.push(DomainSite {
            span: syntax::span(*first_arg),
            scope,
            subject,
            value,
        });
    }

    fn lower_domain_items(&mut self, list: Node<'_>) -> Vec<DomainItem> {
        let mut items = Vec::new();
        for el in syntax::children(list) {
            let span = syntax::span(el);
            match el.kind() {
                "string" => {
                    if let Some(token) = syntax::string_value(el, self.src) {
                        items.push(DomainItem::Op { token, span });
                    } else {
                        items.push(DomainItem::Other { span });
                    }
                }
                "tuple" | "list" => {
                    let elems = self.lower_cond_elems(el);
                    items.push(DomainItem::Cond { elems, span });
                }
                "comment" => {}
                _ => items.push(DomainItem::Other { span }),
            }
        }
        items
    }

    fn lower_cond_elems(&mut self, tuple: Node<'_>) -> Vec<CondElem> {
        let mut elems = Vec::new();
        for el in syntax::children(tuple) {
            let span = syntax::span(el);
            match el.kind() {
                "string" => match syntax::string_value(el, self.src) {
                    Some(value) => elems.push(CondElem::Str { value, span }),
                    None => elems.push(CondElem::Other { span }),
                },
                "list" => elems.push(CondElem::Nested {
                    items: self.lower_domain_items(el),
                    span,
                }),
                "comment" => {}
                _ => elems.push(CondElem::Other { span }),
            }
        }
        elems
    }

    fn lower_link(&mut self, right: Node<'_>) -> SymLink {
        match right.kind() {
            "identifier" => SymLink::Name(syntax::text(right, self.src).to_string()),
            "attribute" => match syntax::name_chain(right, self.src).as_deref() {
                Some([base @ .., attr]) => SymLink::Attribute {
                    base: base.to_vec(),
                    attr: attr.clone(),
                },
                _ => SymLink::None,
            },
            "call" => {
                let callee = right
                    .child_by_field_name("function")
                    .and_then(|f| syntax::name_chain(f, self.src));
                match callee {
                    Some(chain) => SymLink::Call { callee: chain },
                    None => SymLink::None,
                }
            }
            "subscript" => match self.registry_lookup(right) {
                Some((name, _)) => SymLink::Registry { name },
                None => SymLink::None,
            },
            "string" => SymLink::Literal(LitKind::Str),
            "integer" => SymLink::Literal(LitKind::Int),
            "float" => SymLink::Literal(LitKind::Float),
            "true" | "false" => SymLink::Literal(LitKind::Bool),
            "none" => SymLink::Literal(LitKind::NoneLit),
            "list" | "list_comprehension" => SymLink::Literal(LitKind::List),
            "tuple" => SymLink::Literal(LitKind::Tuple),
            "dictionary" | "dictionary_comprehension" => SymLink::Literal(LitKind::Dict),
            "set" | "set_comprehension" => SymLink::Literal(LitKind::Set),
            _ => SymLink::None,
        }
    }
}

fn join_qualified(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn build_source(src: &str) -> Fragment {
        let tree = syntax::parse(src).expect("parse");
        build(FileId(0), "test.py", src, &tree)
    }

    fn symbol_named<'f>(frag: &'f Fragment, name: &str) -> &'f Symbol {
        frag.symbols
            .values()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("symbol {} not found", name))
    }

    #[test]
    fn module_symbol_is_created() {
        let frag = build_source("x = 1\n");
        let module = frag.symbol(SymbolId(0)).unwrap();
        assert_eq!(module.kind, SymKind::Module);
        assert_eq!(module.name, "test");
    }

    #[test]
    fn class_and_method_symbols() {
        let src = "\
class Widget:
    \"\"\"A widget.\"\"\"

    def render(self):
        return 1
";
        let frag = build_source(src);
        let class = symbol_named(&frag, "Widget");
        assert_eq!(class.kind, SymKind::Class);
        assert_eq!(class.doc.as_deref(), Some("A widget."));
        assert!(class.body_scope.is_some());

        let method = symbol_named(&frag, "render");
        assert_eq!(method.kind, SymKind::Method);
        assert_eq!(method.qualified_name, "Widget.render");
        let sig = method.signature.as_ref().unwrap();
        assert_eq!(sig.params.len(), 1);
        assert_eq!(sig.params[0].name, "self");
    }

    #[test]
    fn assignment_links_are_lowered() {
        let src = "\
a = 1
b = a
c = Widget()
d = pkg.mod.thing
e = env[\"res.partner\"]
";
        let frag = build_source(src);
        assert_eq!(
            symbol_named(&frag, "a").link,
            SymLink::Literal(LitKind::Int)
        );
        assert_eq!(symbol_named(&frag, "b").link, SymLink::Name("a".into()));
        assert!(symbol_named(&frag, "b").is_type_alias);
        assert_eq!(
            symbol_named(&frag, "c").link,
            SymLink::Call {
                callee: vec!["Widget".into()]
            }
        );
        assert_eq!(
            symbol_named(&frag, "d").link,
            SymLink::Attribute {
                base: vec!["pkg".into(), "mod".into()],
                attr: "thing".into()
            }
        );
        assert_eq!(
            symbol_named(&frag, "e").link,
            SymLink::Registry {
                name: "res.partner".into()
            }
        );
    }

    #[test]
    fn entity_declaration_is_registered() {
        let src = "\
class Partner(Model):
    _name = \"res.partner\"
    _inherit = \"base.mixin\"
";
        let frag = build_source(src);
        assert_eq!(frag.entities.len(), 1);
        let decl = &frag.entities[0];
        assert_eq!(decl.logical_name.as_deref(), Some("res.partner"));
        assert_eq!(decl.extends, vec!["base.mixin".to_string()]);
    }

    #[test]
    fn inherit_list_collects_all_names() {
        let src = "\
class Mixin(Model):
    _inherit = [\"a.model\", \"b.model\"]
";
        let frag = build_source(src);
        let decl = &frag.entities[0];
        assert_eq!(decl.logical_name, None);
        assert_eq!(
            decl.extends,
            vec!["a.model".to_string(), "b.model".to_string()]
        );
    }

    #[test]
    fn malformed_entity_name_degrades_to_unknown() {
        let src = "\
class Broken(Model):
    _name = 123
";
        let frag = build_source(src);
        let class = symbol_named(&frag, "Broken");
        assert_eq!(class.kind, SymKind::Unknown);
        assert_eq!(frag.diagnostics.len(), 1);
        assert_eq!(frag.diagnostics[0].code, DiagCode::EntityInvalidName);
        // The rest of the file is still analyzed.
        assert!(frag.symbols.len() > 1);
    }

    #[test]
    fn field_declarations_capture_metadata() {
        let src = "\
class Wheel(Model):
    _name = \"bike.wheel\"

    name = fields.Char(required=True)
    bike_id = fields.Many2one(\"bike.bike\", string=\"Bike\")
    part_ids = fields.One2many(\"bike.part\", \"wheel_id\")
    weight = fields.Float(compute=\"_compute_weight\", inverse=\"_inverse_weight\")
    brand = fields.Char(related=\"bike_id.brand\")
";
        let frag = build_source(src);
        assert_eq!(frag.fields.len(), 5);

        let by_name = |n: &str| frag.fields.iter().find(|f| f.name == n).unwrap();
        assert_eq!(by_name("name").kind, "Char");
        assert_eq!(by_name("bike_id").relation.as_deref(), Some("bike.bike"));
        assert_eq!(by_name("part_ids").relation.as_deref(), Some("bike.part"));
        assert_eq!(by_name("part_ids").inverse_name.as_deref(), Some("wheel_id"));
        assert_eq!(by_name("weight").compute.as_deref(), Some("_compute_weight"));
        assert_eq!(by_name("weight").inverse.as_deref(), Some("_inverse_weight"));
        assert_eq!(by_name("brand").related.as_deref(), Some("bike_id.brand"));

        let field_sym = symbol_named(&frag, "bike_id");
        assert_eq!(field_sym.kind, SymKind::Property);
    }

    #[test]
    fn property_decorator_marks_accessor() {
        let src = "\
class Widget:
    @property
    def total(self) -> int:
        return 1
";
        let frag = build_source(src);
        let method = symbol_named(&frag, "total");
        assert!(method.is_property);
        assert_eq!(method.returns.as_deref(), Some("int"));
    }

    #[test]
    fn dependency_decorators_are_captured() {
        let src = "\
class Widget(Model):
    _name = \"widget\"

    @api.depends(\"price\", \"parts.weight\")
    def _compute_total(self):
        pass
";
        let frag = build_source(src);
        assert_eq!(frag.deps.len(), 2);
        assert_eq!(frag.deps[0].decorator, "depends");
        assert_eq!(frag.deps[0].path, "price");
        assert_eq!(frag.deps[1].path, "parts.weight");
    }

    #[test]
    fn parameters_classify_into_five_kinds() {
        let src = "def f(a, b, /, c, d=1, *args, e, f=2, **kw):\n    pass\n";
        let frag = build_source(src);
        let func = symbol_named(&frag, "f");
        let params = &func.signature.as_ref().unwrap().params;
        let kinds: Vec<(String, ParamKind, bool)> = params
            .iter()
            .map(|p| (p.name.clone(), p.kind, p.has_default))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("a".into(), ParamKind::PositionalOnly, false),
                ("b".into(), ParamKind::PositionalOnly, false),
                ("c".into(), ParamKind::PositionalOrKeyword, false),
                ("d".into(), ParamKind::PositionalOrKeyword, true),
                ("args".into(), ParamKind::VarArgs, false),
                ("e".into(), ParamKind::KeywordOnly, false),
                ("f".into(), ParamKind::KeywordOnly, true),
                ("kw".into(), ParamKind::KwArgs, false),
            ]
        );
    }

    #[test]
    fn call_sites_record_argument_shapes() {
        let src = "f(1, 2, x=3)\n";
        let frag = build_source(src);
        assert_eq!(frag.call_sites.len(), 1);
        let call = &frag.call_sites[0];
        assert_eq!(call.callee, vec!["f".to_string()]);
        assert_eq!(call.args.len(), 3);
        assert_eq!(call.args[0].keyword, None);
        assert_eq!(call.args[2].keyword.as_deref(), Some("x"));
        assert!(!call.has_splat);
    }

    #[test]
    fn positional_after_keyword_is_flagged_on_the_arg() {
        let src = "f(1, x=2, 3)\n";
        let frag = build_source(src);
        let call = &frag.call_sites[0];
        assert!(!call.args[0].after_keyword);
        assert!(call.args[2].after_keyword);
    }

    #[test]
    fn splat_calls_are_marked_unverifiable() {
        let src = "f(*args, **kw)\n";
        let frag = build_source(src);
        assert!(frag.call_sites[0].has_splat);
    }

    #[test]
    fn search_domain_is_lowered() {
        let src = "\
class Widget(Model):
    _name = \"widget\"

    def go(self):
        self.search([(\"price\", \"=\", 0), \"|\"])
";
        let frag = build_source(src);
        assert_eq!(frag.domains.len(), 1);
        let site = &frag.domains[0];
        assert_eq!(site.subject, DomainSubject::SelfEntity);
        let DomainValue::List(items) = &site.value else {
            panic!("expected lowered list");
        };
        assert_eq!(items.len(), 2);
        match &items[0] {
            DomainItem::Cond { elems, .. } => {
                assert_eq!(elems.len(), 3);
                assert!(matches!(&elems[0], CondElem::Str { value, .. } if value == "price"));
            }
            other => panic!("expected condition, got {:?}", other),
        }
        assert!(matches!(&items[1], DomainItem::Op { token, .. } if token == "|"));
    }

    #[test]
    fn registry_subject_search_is_captured() {
        let src = "def go(env):\n    env[\"res.partner\"].search([])\n";
        let frag = build_source(src);
        assert_eq!(frag.domains.len(), 1);
        assert_eq!(
            frag.domains[0].subject,
            DomainSubject::Entity("res.partner".into())
        );
    }

    #[test]
    fn domain_by_name_is_lowered_at_the_assignment() {
        let src = "\
class Widget(Model):
    _name = \"widget\"

    def go(self):
        d = [(\"price\", \"=\", 0)]
        self.search(d)
";
        let frag = build_source(src);
        assert_eq!(frag.domains.len(), 1);
        assert!(matches!(&frag.domains[0].value, DomainValue::Name(n) if n == "d"));
        let d = symbol_named(&frag, "d");
        assert!(frag.list_literals.contains_key(&d.symbol_id));
    }

    #[test]
    fn registry_lookup_reference_is_recorded() {
        let src = "def go(self):\n    self.env[\"res.partner\"]\n";
        let frag = build_source(src);
        let registry_ref = frag
            .references
            .values()
            .find(|r| matches!(&r.target, RefTarget::Registry { .. }))
            .expect("registry reference");
        match &registry_ref.target {
            RefTarget::Registry { name } => assert_eq!(name, "res.partner"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn imports_bind_names() {
        let src = "\
import pkg.util
from pkg.models import Widget as W
";
        let frag = build_source(src);
        let pkg = symbol_named(&frag, "pkg");
        assert_eq!(pkg.kind, SymKind::Import);
        let w = symbol_named(&frag, "W");
        assert_eq!(
            w.link,
            SymLink::Import {
                module: "pkg.models".into(),
                name: Some("Widget".into())
            }
        );
    }

    #[test]
    fn leading_comments_become_docs() {
        let src = "\
# Retry budget for flaky backends.
MAX_RETRIES = 3
";
        let frag = build_source(src);
        let sym = symbol_named(&frag, "MAX_RETRIES");
        assert_eq!(sym.doc.as_deref(), Some("Retry budget for flaky backends."));
    }

    #[test]
    fn malformed_file_still_yields_symbols() {
        let src = "def ok():\n    pass\n\ndef broken(:\n";
        let frag = build_source(src);
        assert!(frag.symbols.values().any(|s| s.name == "ok"));
    }
}
