//! Reference resolver: lazy chain walking with cycle and depth protection.
//!
//! Resolution follows the implicit chain *use → declaration → declared value
//! → …* until a terminal is reached: a class, function, module, literal or
//! merged entity. Broken chains, cycles and exhausted depth budgets all
//! degrade to `Any` — resolution never errors.
//!
//! Results are memoized per symbol in the store's generation-stamped eval
//! table; a stale generation reads as unset, so rebuilds invalidate lazily.
//! Walks that cross a file boundary record a reverse dependency edge and may
//! trigger a lazy build of the target file through [`FragmentSource`].

use std::collections::HashSet;

use loupe_core::graph::{
    Eval, FileId, GraphStore, RefTarget, Reference, ScopeId, SymKind, SymLink, Symbol, SymbolId,
    SymbolKey, TypeRef,
};

use crate::engine::CancelToken;

/// Lazily provides analyzed files to cross-file walks.
pub trait FragmentSource {
    /// Ensure `path` is analyzed, returning its file id when available.
    fn ensure_file(&self, path: &str) -> Option<FileId>;

    /// Resolve a dotted module path to a workspace-relative file path.
    fn resolve_module(&self, module: &str) -> Option<String>;
}

/// Per-query resolution state. Created per query, discarded after.
#[derive(Debug, Default)]
pub struct Context {
    /// Cycle guard: symbols already visited in this walk.
    visited: HashSet<SymbolKey>,
    /// Stop as soon as a structural type is reached.
    pub stop_on_type: bool,
    /// Remaining chain-step budget.
    fuel: u32,
    cancel: Option<CancelToken>,
}

impl Context {
    pub fn new() -> Self {
        Context {
            visited: HashSet::new(),
            stop_on_type: false,
            fuel: 64,
            cancel: None,
        }
    }

    pub fn with_stop_on_type(mut self, stop: bool) -> Self {
        self.stop_on_type = stop;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

/// Outcome of a resolution walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Terminal symbol of the raw chain (last good symbol on degradation).
    pub symbol: Option<SymbolKey>,
    /// Symbol after accessor-return substitution; equals `symbol` unless the
    /// terminal is a property-like accessor.
    pub effective: Option<SymbolKey>,
    pub type_ref: TypeRef,
    /// The binding holds an instance of the type rather than the type itself.
    pub is_instance: bool,
}

impl Resolution {
    fn any(symbol: Option<SymbolKey>) -> Self {
        Resolution {
            symbol,
            effective: symbol,
            type_ref: TypeRef::Any,
            is_instance: false,
        }
    }

    fn terminal(key: SymbolKey, type_ref: TypeRef, is_instance: bool) -> Self {
        Resolution {
            symbol: Some(key),
            effective: Some(key),
            type_ref,
            is_instance,
        }
    }
}

/// Read-only resolution engine over the shared graph.
pub struct Resolver<'a> {
    store: &'a GraphStore,
    source: &'a dyn FragmentSource,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a GraphStore, source: &'a dyn FragmentSource) -> Self {
        Resolver { store, source }
    }

    /// Resolve a raw reference to its terminal symbol and inferred type,
    /// applying the accessor-return override for property-like terminals.
    pub fn resolve_reference(
        &self,
        file: FileId,
        reference: &Reference,
        ctx: &mut Context,
    ) -> Resolution {
        let res = match &reference.target {
            RefTarget::Name(name) => self.resolve_name(file, reference.scope, name, ctx),
            RefTarget::Attribute { base, attr } => {
                self.resolve_attribute(file, reference.scope, base, attr, ctx)
            }
            RefTarget::Registry { name } => self.resolve_registry(name),
            RefTarget::Import { module, name } => {
                self.resolve_import(file, module, name.as_deref(), ctx)
            }
        };
        self.apply_accessor_override(res, ctx)
    }

    /// Resolve a symbol (e.g. hover on a declaration) the same way.
    pub fn resolve_symbol(&self, key: SymbolKey, ctx: &mut Context) -> Resolution {
        let res = self.follow_symbol(key, ctx);
        self.apply_accessor_override(res, ctx)
    }

    /// The declaration a use site points at, without following its value
    /// chain: `c` in `x = c` answers the variable `c`, not what `c` holds.
    pub fn declaration_of(
        &self,
        file: FileId,
        reference: &Reference,
        ctx: &mut Context,
    ) -> Option<SymbolKey> {
        match &reference.target {
            RefTarget::Name(name) => {
                if name == "self" {
                    if let Some(res) = self.resolve_self(file, reference.scope) {
                        return res.symbol;
                    }
                }
                self.store
                    .with_fragment(file, |frag| frag.lookup(reference.scope, name))
                    .flatten()
                    .map(|sym| SymbolKey::new(file, sym))
            }
            RefTarget::Attribute { base, attr } => {
                let first = base.first()?;
                let mut cur = self.resolve_name(file, reference.scope, first, ctx);
                for seg in base.iter().skip(1) {
                    cur = self.member_of(file, cur, seg, ctx);
                }
                self.member_key(file, &cur, attr)
            }
            RefTarget::Registry { name } => self.entity_representative(name),
            RefTarget::Import { module, name } => {
                let path = self.source.resolve_module(module)?;
                let target = self.source.ensure_file(&path)?;
                self.store.record_dep(file, target);
                match name {
                    None => Some(SymbolKey::new(target, SymbolId(0))),
                    Some(n) => self
                        .store
                        .with_fragment(target, |frag| {
                            frag.scope(frag.module_scope)?.bindings.get(n.as_str()).copied()
                        })
                        .flatten()
                        .map(|sym| SymbolKey::new(target, sym)),
                }
            }
        }
    }

    /// Member lookup without following the member's own value chain.
    fn member_key(&self, from_file: FileId, cur: &Resolution, name: &str) -> Option<SymbolKey> {
        match &cur.type_ref {
            TypeRef::Entity(entity) => self
                .store
                .entity_field(entity, name)
                .map(|(key, _)| key)
                .or_else(|| self.store.entity_method(entity, name)),
            TypeRef::Symbol(k) => {
                let sym = self.store.symbol(*k)?;
                let member = match sym.kind {
                    SymKind::Class => self
                        .store
                        .with_fragment(k.file, |frag| {
                            let scope = frag.scope(sym.body_scope?)?;
                            scope.bindings.get(name).copied()
                        })
                        .flatten(),
                    SymKind::Module | SymKind::Package => self
                        .store
                        .with_fragment(k.file, |frag| {
                            frag.scope(frag.module_scope)?.bindings.get(name).copied()
                        })
                        .flatten(),
                    _ => None,
                }?;
                self.store.record_dep(from_file, k.file);
                Some(SymbolKey::new(k.file, member))
            }
            TypeRef::Any | TypeRef::Literal(_) => None,
        }
    }

    /// Property/descriptor override: if the terminal symbol is a
    /// property-like accessor, substitute its inferred return type as the
    /// effective symbol. Two-step lookup, not a resolver special case.
    fn apply_accessor_override(&self, mut res: Resolution, ctx: &mut Context) -> Resolution {
        let Some(key) = res.symbol else { return res };
        let Some(sym) = self.store.symbol(key) else {
            return res;
        };
        if !(sym.is_property && matches!(sym.kind, SymKind::Function | SymKind::Method)) {
            return res;
        }
        let ret = self.accessor_return(key, &sym, ctx);
        res.effective = ret.symbol;
        res.type_ref = ret.type_ref;
        res.is_instance = true;
        res
    }

    /// Resolve the declared return type of an accessor.
    fn accessor_return(&self, key: SymbolKey, sym: &Symbol, ctx: &mut Context) -> Resolution {
        let Some(returns) = &sym.returns else {
            return Resolution::any(None);
        };
        let head = annotation_head(returns);
        let mut res = self.resolve_name(key.file, sym.scope, head, ctx);
        res.is_instance = true;
        res
    }

    /// Resolve a plain name through the scope chain.
    pub fn resolve_name(
        &self,
        file: FileId,
        scope: ScopeId,
        name: &str,
        ctx: &mut Context,
    ) -> Resolution {
        // `self` in a method body is an instance of the enclosing class's
        // registered entity (or of the class when unregistered).
        if name == "self" {
            if let Some(res) = self.resolve_self(file, scope) {
                return res;
            }
        }
        let found = self
            .store
            .with_fragment(file, |frag| frag.lookup(scope, name))
            .flatten();
        match found {
            Some(sym) => self.follow_symbol(SymbolKey::new(file, sym), ctx),
            None => Resolution::any(None),
        }
    }

    /// `self` is an instance of the enclosing class; when that class
    /// registers (or extends) a logical entity, it is an instance of the
    /// merged entity instead.
    fn resolve_self(&self, file: FileId, scope: ScopeId) -> Option<Resolution> {
        self.store
            .with_fragment(file, |frag| {
                let class = frag.enclosing_class(scope)?;
                let key = SymbolKey::new(file, class.symbol_id);
                let entity = frag
                    .entities
                    .iter()
                    .find(|e| e.class_sym == class.symbol_id)
                    .and_then(|d| {
                        d.logical_name
                            .clone()
                            .or_else(|| d.extends.first().cloned())
                    });
                let type_ref = match entity {
                    Some(name) => TypeRef::Entity(name),
                    None => TypeRef::Symbol(key),
                };
                Some(Resolution {
                    symbol: Some(key),
                    effective: Some(key),
                    type_ref,
                    is_instance: true,
                })
            })
            .flatten()
    }

    /// Follow a symbol's forward chain to its terminal.
    pub fn follow_symbol(&self, key: SymbolKey, ctx: &mut Context) -> Resolution {
        if ctx.cancelled() {
            return Resolution::any(Some(key));
        }
        // Cycle guard: same symbol twice in this walk degrades to Any,
        // keeping the last good symbol.
        if !ctx.visited.insert(key) {
            return Resolution::any(Some(key));
        }
        if ctx.fuel == 0 {
            return Resolution::any(Some(key));
        }
        ctx.fuel -= 1;

        // Memoized answers are full-walk answers; a stop-on-type walk may
        // legitimately need a different one, so it bypasses the memo.
        if !ctx.stop_on_type {
            if let Some(eval) = self.store.eval_get(key) {
                return self.resolution_from_eval(eval);
            }
        }

        let Some(sym) = self.store.symbol(key) else {
            return Resolution::any(None);
        };

        let mut res = match sym.kind {
            SymKind::Class => Resolution::terminal(key, TypeRef::Symbol(key), false),
            SymKind::Module | SymKind::Package => {
                Resolution::terminal(key, TypeRef::Symbol(key), false)
            }
            SymKind::Function | SymKind::Method | SymKind::Property => {
                Resolution::terminal(key, TypeRef::Symbol(key), false)
            }
            SymKind::Variable | SymKind::Import | SymKind::Unknown => {
                self.follow_link(key, &sym, ctx)
            }
        };

        // Stop at the structural type: an instance answer collapses to the
        // class itself instead of descending further.
        if ctx.stop_on_type && res.is_instance {
            if let TypeRef::Symbol(k) = res.type_ref {
                res = Resolution::terminal(k, TypeRef::Symbol(k), false);
            }
        }

        if !ctx.stop_on_type {
            self.store.eval_set(
                key,
                Eval {
                    symbol: res.symbol,
                    type_ref: res.type_ref.clone(),
                    is_instance: res.is_instance,
                },
            );
        }
        res
    }

    fn resolution_from_eval(&self, eval: Eval) -> Resolution {
        Resolution {
            symbol: eval.symbol,
            effective: eval.symbol,
            type_ref: eval.type_ref,
            is_instance: eval.is_instance,
        }
    }

    fn follow_link(&self, key: SymbolKey, sym: &Symbol, ctx: &mut Context) -> Resolution {
        match &sym.link {
            SymLink::None => Resolution::terminal(key, TypeRef::Symbol(key), false),
            SymLink::Name(name) => {
                let next = self
                    .store
                    .with_fragment(key.file, |frag| frag.lookup(sym.scope, name))
                    .flatten();
                match next {
                    Some(next) => self.follow_symbol(SymbolKey::new(key.file, next), ctx),
                    None => Resolution::any(Some(key)),
                }
            }
            SymLink::Annotation(ann) => {
                let head = annotation_head(ann);
                let mut res = self.resolve_name(key.file, sym.scope, head, ctx);
                if res.symbol.is_some() {
                    res.is_instance = true;
                }
                res
            }
            SymLink::Attribute { base, attr } => {
                self.resolve_attribute(key.file, sym.scope, base, attr, ctx)
            }
            SymLink::Call { callee } => self.resolve_call(key, sym.scope, callee, ctx),
            SymLink::Import { module, name } => {
                self.resolve_import(key.file, module, name.as_deref(), ctx)
            }
            SymLink::Registry { name } => self.resolve_registry(name),
            SymLink::Literal(kind) => Resolution::terminal(key, TypeRef::Literal(*kind), true),
        }
    }

    /// Resolve `base[0].base[1]….attr` from a scope.
    pub fn resolve_attribute(
        &self,
        file: FileId,
        scope: ScopeId,
        base: &[String],
        attr: &str,
        ctx: &mut Context,
    ) -> Resolution {
        let Some(first) = base.first() else {
            return self.resolve_name(file, scope, attr, ctx);
        };
        let mut cur = self.resolve_name(file, scope, first, ctx);
        for seg in base.iter().skip(1) {
            cur = self.member_of(file, cur, seg, ctx);
        }
        self.member_of(file, cur, attr, ctx)
    }

    /// Resolve a called chain: `x = Foo()` / `x = a.b()`.
    ///
    /// A call of a class yields an instance of that class; a call of a
    /// function with a declared return annotation yields an instance of the
    /// annotated type; anything else degrades to Any.
    fn resolve_call(
        &self,
        key: SymbolKey,
        scope: ScopeId,
        callee: &[String],
        ctx: &mut Context,
    ) -> Resolution {
        let Some((attr, base)) = callee.split_last() else {
            return Resolution::any(Some(key));
        };
        let target = if base.is_empty() {
            self.resolve_name(key.file, scope, attr, ctx)
        } else {
            self.resolve_attribute(key.file, scope, base, attr, ctx)
        };
        let Some(target_key) = target.symbol else {
            return Resolution::any(Some(key));
        };
        let Some(target_sym) = self.store.symbol(target_key) else {
            return Resolution::any(Some(key));
        };
        match target_sym.kind {
            SymKind::Class => Resolution {
                symbol: Some(target_key),
                effective: Some(target_key),
                type_ref: TypeRef::Symbol(target_key),
                is_instance: true,
            },
            SymKind::Function | SymKind::Method => {
                let ret = self.accessor_return(target_key, &target_sym, ctx);
                match ret.symbol {
                    Some(_) => ret,
                    None => Resolution::any(Some(key)),
                }
            }
            _ => Resolution::any(Some(key)),
        }
    }

    /// Resolve one member step on a previously resolved base.
    fn member_of(
        &self,
        from_file: FileId,
        cur: Resolution,
        name: &str,
        ctx: &mut Context,
    ) -> Resolution {
        if ctx.cancelled() {
            return Resolution::any(cur.symbol);
        }
        // Property terminals are substituted by their return type before the
        // member lookup continues.
        let cur = match cur.symbol {
            Some(k) => {
                let sym = self.store.symbol(k);
                match sym {
                    Some(s)
                        if s.is_property
                            && matches!(s.kind, SymKind::Function | SymKind::Method) =>
                    {
                        self.accessor_return(k, &s, ctx)
                    }
                    _ => cur,
                }
            }
            None => cur,
        };

        match &cur.type_ref {
            TypeRef::Entity(entity) => self.entity_member(entity.clone(), name, ctx),
            TypeRef::Symbol(k) => {
                let Some(sym) = self.store.symbol(*k) else {
                    return Resolution::any(cur.symbol);
                };
                match sym.kind {
                    SymKind::Class => {
                        let member = self
                            .store
                            .with_fragment(k.file, |frag| {
                                let scope = frag.scope(sym.body_scope?)?;
                                scope.bindings.get(name).copied()
                            })
                            .flatten();
                        match member {
                            Some(m) => {
                                self.store.record_dep(from_file, k.file);
                                self.follow_symbol(SymbolKey::new(k.file, m), ctx)
                            }
                            None => Resolution::any(None),
                        }
                    }
                    SymKind::Module | SymKind::Package => {
                        let member = self
                            .store
                            .with_fragment(k.file, |frag| {
                                frag.scope(frag.module_scope)?.bindings.get(name).copied()
                            })
                            .flatten();
                        match member {
                            Some(m) => {
                                self.store.record_dep(from_file, k.file);
                                self.follow_symbol(SymbolKey::new(k.file, m), ctx)
                            }
                            None => Resolution::any(None),
                        }
                    }
                    _ => Resolution::any(cur.symbol),
                }
            }
            TypeRef::Any | TypeRef::Literal(_) => Resolution::any(cur.symbol),
        }
    }

    /// Member lookup on a merged entity: fields first, then methods.
    fn entity_member(&self, entity: String, name: &str, ctx: &mut Context) -> Resolution {
        if let Some((key, decl)) = self.store.entity_field(&entity, name) {
            let type_ref = match &decl.relation {
                Some(rel) if decl.is_relational() => TypeRef::Entity(rel.clone()),
                _ => TypeRef::Symbol(key),
            };
            return Resolution {
                symbol: Some(key),
                effective: Some(key),
                type_ref,
                is_instance: true,
            };
        }
        if let Some(key) = self.store.entity_method(&entity, name) {
            return self.follow_symbol(key, ctx);
        }
        Resolution::any(None)
    }

    /// Resolve a registry lookup to its merged entity.
    fn resolve_registry(&self, name: &str) -> Resolution {
        if !self.store.entity_exists(name) {
            return Resolution::any(None);
        }
        let symbol = self.entity_representative(name);
        Resolution {
            symbol,
            effective: symbol,
            type_ref: TypeRef::Entity(name.to_string()),
            is_instance: true,
        }
    }

    /// Representative declaration of an entity: its last base registration,
    /// falling back to the last member.
    fn entity_representative(&self, name: &str) -> Option<SymbolKey> {
        let members = self.store.entity_members(name);
        members
            .iter()
            .rev()
            .find(|m| m.is_base)
            .or_else(|| members.last())
            .map(|m| m.key)
    }

    /// Cross-file import resolution; lazily builds the target file and
    /// records the reverse dependency edge.
    fn resolve_import(
        &self,
        from_file: FileId,
        module: &str,
        name: Option<&str>,
        ctx: &mut Context,
    ) -> Resolution {
        let Some(path) = self.source.resolve_module(module) else {
            return Resolution::any(None);
        };
        let Some(target) = self.source.ensure_file(&path) else {
            return Resolution::any(None);
        };
        self.store.record_dep(from_file, target);
        match name {
            None => {
                let key = SymbolKey::new(target, SymbolId(0));
                Resolution::terminal(key, TypeRef::Symbol(key), false)
            }
            Some(n) => {
                let member = self
                    .store
                    .with_fragment(target, |frag| {
                        frag.scope(frag.module_scope)?.bindings.get(n).copied()
                    })
                    .flatten();
                match member {
                    Some(m) => self.follow_symbol(SymbolKey::new(target, m), ctx),
                    None => Resolution::any(None),
                }
            }
        }
    }
}

/// Leading identifier of an annotation: `list[int]` → `list`,
/// `Optional[Handler]` → `Optional`. Quoted annotations are unquoted first.
fn annotation_head(ann: &str) -> &str {
    let ann = ann.trim().trim_matches(|c| c == '"' || c == '\'');
    let end = ann
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
        .unwrap_or(ann.len());
    let head = &ann[..end];
    head.split('.').next_back().unwrap_or(head)
}
