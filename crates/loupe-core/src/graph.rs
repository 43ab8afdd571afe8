//! Symbol graph: per-file fragments, the cross-file store and the merge index.
//!
//! The graph has two layers:
//!
//! - [`Fragment`]: everything one file's build produced — symbols, raw
//!   references, scopes, entity/field declarations, call sites, lowered
//!   domain expressions. Fragments are immutable after installation and
//!   serializable (they are the cache payload).
//! - [`GraphStore`]: the shared cross-file state — fragment table behind
//!   per-file reader/writer locks, the entity merge index, reverse
//!   dependency edges and the generation-stamped eval memo table.
//!
//! Only a file's own rebuild replaces that file's fragment; readers copy out
//! what they need under a short read lock. Primary tables are `BTreeMap` so
//! iteration order is deterministic.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::diag::Diagnostic;

/// Schema version for serialized fragments.
///
/// Incremented on any breaking change to the fragment types below; cache
/// entries with a different version are discarded.
pub const FRAGMENT_SCHEMA_VERSION: u32 = 1;

// ============================================================================
// Spans and IDs
// ============================================================================

/// Byte range in a source file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    /// Half-open containment check.
    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Unique identifier for an analyzed file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FileId(pub u32);

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "file_{}", self.0)
    }
}

/// Unique identifier for a symbol within its fragment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SymbolId(pub u32);

impl std::fmt::Display for SymbolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sym_{}", self.0)
    }
}

/// Unique identifier for a reference within its fragment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RefId(pub u32);

impl std::fmt::Display for RefId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ref_{}", self.0)
    }
}

/// Unique identifier for a scope within its fragment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ScopeId(pub u32);

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope_{}", self.0)
    }
}

/// Global symbol address: fragment plus local symbol id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SymbolKey {
    pub file: FileId,
    pub sym: SymbolId,
}

impl SymbolKey {
    pub fn new(file: FileId, sym: SymbolId) -> Self {
        SymbolKey { file, sym }
    }
}

impl std::fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.sym)
    }
}

// ============================================================================
// Symbols
// ============================================================================

/// Kind of symbol declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SymKind {
    Module,
    Package,
    Class,
    Function,
    Method,
    Property,
    #[default]
    Variable,
    Import,
    /// Malformed declaration the builder could not classify.
    Unknown,
}

impl SymKind {
    /// True for kinds that terminate a resolution chain as a structural type.
    pub fn is_type_like(&self) -> bool {
        matches!(self, SymKind::Class)
    }
}

/// Literal kinds a resolution chain can terminate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LitKind {
    Int,
    Float,
    Str,
    Bool,
    NoneLit,
    List,
    Tuple,
    Dict,
    Set,
}

/// Raw forward edge from a symbol to whatever its declaration assigned.
///
/// Recorded by the builder without resolution; the resolver walks these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SymLink {
    /// Terminal: nothing to follow (classes, functions, parameters...).
    #[default]
    None,
    /// `x = y`
    Name(String),
    /// `x = a.b.c` (pure name chain only)
    Attribute { base: Vec<String>, attr: String },
    /// `x = Foo(...)` / `x = a.b(...)` — dotted callee chain
    Call { callee: Vec<String> },
    /// Import binding: `import m` / `from m import n`
    Import {
        module: String,
        name: Option<String>,
    },
    /// `x = env["logical.name"]`
    Registry { name: String },
    /// `x = <literal>`
    Literal(LitKind),
    /// Declared annotation: `x: Handler`. Resolves like a name, but the
    /// binding holds an instance of the named type, not the type itself.
    Annotation(String),
}

/// Function/method parameter kinds, in binding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    PositionalOnly,
    PositionalOrKeyword,
    VarArgs,
    KeywordOnly,
    KwArgs,
}

/// A declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    pub has_default: bool,
    pub annotation: Option<String>,
    pub span: Span,
}

/// A callable's declared parameter list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Signature {
    pub params: Vec<Param>,
}

impl Signature {
    pub fn new(params: Vec<Param>) -> Self {
        Signature { params }
    }
}

/// A named, typed declaration site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub symbol_id: SymbolId,
    pub kind: SymKind,
    pub name: String,
    /// Dotted path from the module root, e.g. `pkg.mod.Class.method`.
    pub qualified_name: String,
    /// Span of the declared name.
    pub span: Span,
    /// Span of the whole defining node; `None` for synthetic symbols.
    pub decl_span: Option<Span>,
    pub doc: Option<String>,
    /// Binding holds a type rather than a stored value.
    pub is_type_alias: bool,
    /// Property-like accessor: invoking substitutes its return type.
    pub is_property: bool,
    /// Raw forward edge to the assigned/imported value.
    pub link: SymLink,
    /// Declared return annotation, functions only.
    pub returns: Option<String>,
    /// Declared parameters, functions/methods only.
    pub signature: Option<Signature>,
    /// Scope the symbol is bound in.
    pub scope: ScopeId,
    /// Scope introduced by the symbol's own body (classes, functions).
    pub body_scope: Option<ScopeId>,
}

impl Symbol {
    pub fn new(
        symbol_id: SymbolId,
        kind: SymKind,
        name: impl Into<String>,
        span: Span,
        scope: ScopeId,
    ) -> Self {
        let name = name.into();
        Symbol {
            symbol_id,
            kind,
            qualified_name: name.clone(),
            name,
            span,
            decl_span: None,
            doc: None,
            is_type_alias: false,
            is_property: false,
            link: SymLink::None,
            returns: None,
            signature: None,
            scope,
            body_scope: None,
        }
    }

    pub fn with_link(mut self, link: SymLink) -> Self {
        self.link = link;
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn with_qualified_name(mut self, qname: impl Into<String>) -> Self {
        self.qualified_name = qname.into();
        self
    }
}

// ============================================================================
// References
// ============================================================================

/// What a use site points at, structurally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefTarget {
    /// Plain identifier load.
    Name(String),
    /// Attribute access with a pure name-chain base: `a.b.c`.
    Attribute { base: Vec<String>, attr: String },
    /// Import use site.
    Import {
        module: String,
        name: Option<String>,
    },
    /// String-keyed registry lookup: `env["logical.name"]`.
    Registry { name: String },
}

/// A use site that must resolve to a symbol.
///
/// Owns its containing scope, never a symbol pointer; the link is discovered
/// at resolution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub ref_id: RefId,
    pub span: Span,
    pub scope: ScopeId,
    pub target: RefTarget,
}

// ============================================================================
// Scopes
// ============================================================================

/// Kind of lexical scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    #[default]
    Module,
    Class,
    Function,
}

/// A lexical scope with its bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub scope_id: ScopeId,
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub span: Span,
    /// Name → declaring symbol, last binding wins.
    pub bindings: BTreeMap<String, SymbolId>,
}

impl Scope {
    pub fn new(scope_id: ScopeId, kind: ScopeKind, parent: Option<ScopeId>, span: Span) -> Self {
        Scope {
            scope_id,
            kind,
            parent,
            span,
            bindings: BTreeMap::new(),
        }
    }
}

// ============================================================================
// Framework declarations
// ============================================================================

/// A class declaration's participation in the entity registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDecl {
    pub class_sym: SymbolId,
    /// Registered logical name; `None` for pure extensions.
    pub logical_name: Option<String>,
    /// Names this declaration extends (`_inherit`).
    pub extends: Vec<String>,
    /// Span of the registering attribute (or the class name when absent).
    pub span: Span,
}

impl EntityDecl {
    /// A base registration declares its own logical name.
    pub fn is_base(&self) -> bool {
        self.logical_name.is_some()
    }
}

/// A declared entity field: `name = fields.Kind(...)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub class_sym: SymbolId,
    pub symbol: SymbolId,
    pub name: String,
    /// Field constructor name, e.g. `Char`, `Many2one`, `Date`.
    pub kind: String,
    /// Target entity of relational kinds (first string argument).
    pub relation: Option<String>,
    /// Inverse member name on the target entity (One2many-style second arg).
    pub inverse_name: Option<String>,
    pub related: Option<String>,
    pub compute: Option<String>,
    pub inverse: Option<String>,
    pub search: Option<String>,
    pub span: Span,
}

impl FieldDecl {
    /// Relational kinds point at another entity.
    pub fn is_relational(&self) -> bool {
        matches!(self.kind.as_str(), "Many2one" | "One2many" | "Many2many")
    }

    /// Temporal kinds expose virtual calendar sub-attributes.
    pub fn is_temporal(&self) -> bool {
        matches!(self.kind.as_str(), "Date" | "Datetime")
    }
}

/// A dependency-decorator path: `@api.depends("a.b")` and friends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepDecl {
    pub class_sym: SymbolId,
    /// `depends`, `onchange` or `constrains`.
    pub decorator: String,
    pub path: String,
    pub span: Span,
}

// ============================================================================
// Call sites and domains
// ============================================================================

/// One argument at a call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallArg {
    /// `None` for positional, `Some(name)` for keyword arguments.
    pub keyword: Option<String>,
    pub span: Span,
    /// Positional argument lexically after a keyword argument.
    pub after_keyword: bool,
}

/// A captured call site with its argument shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub span: Span,
    pub scope: ScopeId,
    /// Dotted callee chain, e.g. `["self", "compute_total"]`. Empty when the
    /// callee is not a pure name chain.
    pub callee: Vec<String>,
    pub args: Vec<CallArg>,
    /// Call uses `*args`/`**kwargs` splats; binding cannot be validated.
    pub has_splat: bool,
}

/// Whose member set a domain expression is checked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainSubject {
    /// `self.search(...)` — the enclosing class's registered entity.
    SelfEntity,
    /// `env["name"].search(...)`.
    Entity(String),
    Unknown,
}

/// One element of a condition tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CondElem {
    Str { value: String, span: Span },
    /// Nested domain (value of `any` / `not any`).
    Nested { items: Vec<DomainItem>, span: Span },
    Other { span: Span },
}

/// One element of a domain list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainItem {
    /// String literal element — a logical operator token or a stray string.
    Op { token: String, span: Span },
    /// Tuple (or list) element — a condition.
    Cond { elems: Vec<CondElem>, span: Span },
    Other { span: Span },
}

/// Lowered value of a domain argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainValue {
    List(Vec<DomainItem>),
    /// A plain name; resolved to its assigned value at analysis time.
    Name(String),
    /// Known non-list value; carries a short description for the message.
    Other(String),
}

/// A captured domain expression at a search-style call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSite {
    pub span: Span,
    pub scope: ScopeId,
    pub subject: DomainSubject,
    pub value: DomainValue,
}

// ============================================================================
// Fragment
// ============================================================================

/// Everything one file's build produced. Serializable; the cache payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub file_id: FileId,
    pub path: String,
    /// Build generation, assigned by the store at installation.
    pub generation: u64,
    pub module_scope: ScopeId,
    pub scopes: BTreeMap<ScopeId, Scope>,
    pub symbols: BTreeMap<SymbolId, Symbol>,
    pub references: BTreeMap<RefId, Reference>,
    pub entities: Vec<EntityDecl>,
    pub fields: Vec<FieldDecl>,
    pub deps: Vec<DepDecl>,
    pub call_sites: Vec<CallSite>,
    pub domains: Vec<DomainSite>,
    /// Lowered list literals assigned to variables, for domain-by-name
    /// resolution (`d = [...]; search(d)`).
    pub list_literals: BTreeMap<SymbolId, Vec<DomainItem>>,
    /// Builder-emitted diagnostics (malformed declarations).
    pub diagnostics: Vec<Diagnostic>,
}

impl Fragment {
    /// Create an empty fragment with its module scope pre-installed.
    pub fn new(file_id: FileId, path: impl Into<String>, file_len: usize) -> Self {
        let module_scope = ScopeId(0);
        let mut scopes = BTreeMap::new();
        scopes.insert(
            module_scope,
            Scope::new(module_scope, ScopeKind::Module, None, Span::new(0, file_len)),
        );
        Fragment {
            file_id,
            path: path.into(),
            generation: 0,
            module_scope,
            scopes,
            symbols: BTreeMap::new(),
            references: BTreeMap::new(),
            entities: Vec::new(),
            fields: Vec::new(),
            deps: Vec::new(),
            call_sites: Vec::new(),
            domains: Vec::new(),
            list_literals: BTreeMap::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn symbol(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(&id)
    }

    pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(&id)
    }

    /// Innermost scope containing the byte offset.
    pub fn scope_at(&self, offset: usize) -> ScopeId {
        let mut best = self.module_scope;
        let mut best_len = usize::MAX;
        for scope in self.scopes.values() {
            if scope.span.contains(offset) && scope.span.len() < best_len {
                best = scope.scope_id;
                best_len = scope.span.len();
            }
        }
        best
    }

    /// Smallest reference whose span contains the byte offset.
    pub fn reference_at(&self, offset: usize) -> Option<&Reference> {
        self.references
            .values()
            .filter(|r| r.span.contains(offset))
            .min_by_key(|r| r.span.len())
    }

    /// Symbol whose declared-name span contains the byte offset.
    pub fn symbol_at(&self, offset: usize) -> Option<&Symbol> {
        self.symbols.values().find(|s| s.span.contains(offset))
    }

    /// Resolve `name` in `scope`, walking the lexical chain.
    ///
    /// Class scopes are skipped when reached from an inner scope (names in a
    /// class body are not visible inside its methods).
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        let mut current = Some(scope);
        let start = scope;
        while let Some(id) = current {
            let s = self.scopes.get(&id)?;
            let skip = s.kind == ScopeKind::Class && id != start;
            if !skip {
                if let Some(&sym) = s.bindings.get(name) {
                    return Some(sym);
                }
            }
            current = s.parent;
        }
        None
    }

    /// The class whose body (or methods) contain `scope`.
    pub fn enclosing_class(&self, scope: ScopeId) -> Option<&Symbol> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = self.scopes.get(&id)?;
            if s.kind == ScopeKind::Class {
                return self.symbols.values().find(|sym| sym.body_scope == Some(id));
            }
            current = s.parent;
        }
        None
    }

    /// The entity declaration (if any) of the class enclosing `scope`.
    pub fn enclosing_entity(&self, scope: ScopeId) -> Option<&EntityDecl> {
        let class = self.enclosing_class(scope)?;
        self.entities.iter().find(|e| e.class_sym == class.symbol_id)
    }
}

// ============================================================================
// Merge index
// ============================================================================

/// One class declaration contributing to a merged entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMember {
    pub key: SymbolKey,
    pub path: String,
    pub span: Span,
    /// Declared its own logical name (`_name`), not just an extension.
    pub is_base: bool,
    pub extends: Vec<String>,
}

/// A logical entity formed by unioning same-named declarations across files.
///
/// Members are kept in deterministic `(path, span)` order; member-set queries
/// are a read-time union with last-writer-wins per member name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MergedEntity {
    pub members: Vec<EntityMember>,
}

impl MergedEntity {
    fn insert(&mut self, member: EntityMember) {
        self.members.push(member);
        self.members
            .sort_by(|a, b| (&a.path, a.span).cmp(&(&b.path, b.span)));
    }

    fn remove_file(&mut self, file: FileId) {
        self.members.retain(|m| m.key.file != file);
    }
}

// ============================================================================
// Eval memo
// ============================================================================

/// Best-known inferred type of a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeRef {
    /// Unknown; the universal degraded answer.
    Any,
    /// A concrete symbol (class, function, module, variable).
    Symbol(SymbolKey),
    /// A merged logical entity.
    Entity(String),
    /// A literal value's kind.
    Literal(LitKind),
}

/// A symbol's best-known evaluation: the terminal symbol of its chain, its
/// inferred type and whether the binding holds an instance of that type
/// (vs. the type itself).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eval {
    pub symbol: Option<SymbolKey>,
    pub type_ref: TypeRef,
    pub is_instance: bool,
}

impl Eval {
    pub fn any() -> Self {
        Eval {
            symbol: None,
            type_ref: TypeRef::Any,
            is_instance: false,
        }
    }
}

/// Generation-stamped memo cell. A stale stamp reads as unset.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EvalCell {
    value: Eval,
    stamp: u64,
}

// ============================================================================
// GraphStore
// ============================================================================

/// Shared cross-file graph state.
///
/// Fragment mutation follows single-writer discipline: only
/// [`GraphStore::install_fragment`] replaces a fragment, under that file's
/// write lock. All other access is read-only and copies data out.
#[derive(Debug, Default)]
pub struct GraphStore {
    next_file: AtomicU32,
    epoch: AtomicU64,
    ids_by_path: DashMap<String, FileId>,
    paths_by_id: DashMap<FileId, String>,
    fragments: DashMap<FileId, Arc<RwLock<Fragment>>>,
    /// Merge index: logical name → contributing declarations.
    entities: DashMap<String, MergedEntity>,
    /// Logical names each file contributed to (for removal on rebuild).
    contributions: DashMap<FileId, Vec<String>>,
    /// file → files whose resolution walks crossed into it.
    reverse_deps: DashMap<FileId, HashSet<FileId>>,
    /// Memoized evals; valid iff stamp >= the owning file's eval floor.
    evals: DashMap<SymbolKey, EvalCell>,
    eval_floor: DashMap<FileId, u64>,
}

impl GraphStore {
    pub fn new() -> Self {
        GraphStore::default()
    }

    /// Intern a path, returning its stable file id.
    pub fn intern_file(&self, path: &str) -> FileId {
        if let Some(id) = self.ids_by_path.get(path) {
            return *id;
        }
        let id = FileId(self.next_file.fetch_add(1, Ordering::SeqCst));
        self.ids_by_path.insert(path.to_string(), id);
        self.paths_by_id.insert(id, path.to_string());
        id
    }

    pub fn file_id(&self, path: &str) -> Option<FileId> {
        self.ids_by_path.get(path).map(|r| *r)
    }

    pub fn path_of(&self, file: FileId) -> Option<String> {
        self.paths_by_id.get(&file).map(|r| r.clone())
    }

    pub fn has_fragment(&self, file: FileId) -> bool {
        self.fragments.contains_key(&file)
    }

    /// Current global epoch (advances on every installation).
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Install (or replace) a file's fragment.
    ///
    /// Bumps the epoch, re-registers the file's entity declarations in the
    /// merge index, and floors the eval memos of this file and of every file
    /// whose previous walks crossed into it. Dependents are not re-resolved
    /// eagerly; their memos simply read as unset on next query.
    pub fn install_fragment(&self, mut fragment: Fragment) {
        let file = fragment.file_id;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        fragment.generation = epoch;
        tracing::debug!(
            path = %fragment.path,
            generation = epoch,
            symbols = fragment.symbols.len(),
            "installing fragment"
        );

        // Re-register merge-index contributions.
        if let Some((_, old)) = self.contributions.remove(&file) {
            for name in old {
                if let Some(mut entity) = self.entities.get_mut(&name) {
                    entity.remove_file(file);
                }
            }
        }
        let mut contributed = Vec::new();
        for decl in &fragment.entities {
            let Some(class_sym) = fragment.symbols.get(&decl.class_sym) else {
                continue;
            };
            let mut names: Vec<&String> = decl.logical_name.iter().collect();
            for extended in &decl.extends {
                if !names.iter().any(|n| *n == extended) {
                    names.push(extended);
                }
            }
            for name in names {
                let member = EntityMember {
                    key: SymbolKey::new(file, class_sym.symbol_id),
                    path: fragment.path.clone(),
                    span: decl.span,
                    is_base: decl.logical_name.as_deref() == Some(name.as_str()),
                    extends: decl.extends.clone(),
                };
                self.entities.entry(name.clone()).or_default().insert(member);
                contributed.push(name.clone());
            }
        }
        contributed.sort();
        contributed.dedup();
        self.contributions.insert(file, contributed);

        // Floor memos: this file and everything that crossed into it.
        self.eval_floor.insert(file, epoch);
        if let Some(dependents) = self.reverse_deps.get(&file) {
            for &d in dependents.iter() {
                self.eval_floor.insert(d, epoch);
            }
        }

        match self.fragments.entry(file) {
            dashmap::mapref::entry::Entry::Occupied(slot) => {
                let lock = slot.get().clone();
                drop(slot);
                let mut guard = lock.write().unwrap_or_else(|e| e.into_inner());
                *guard = fragment;
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(RwLock::new(fragment)));
            }
        }
    }

    /// Run `f` against a file's fragment under a short read lock.
    pub fn with_fragment<R>(&self, file: FileId, f: impl FnOnce(&Fragment) -> R) -> Option<R> {
        let lock = self.fragments.get(&file)?.clone();
        let guard = lock.read().unwrap_or_else(|e| e.into_inner());
        Some(f(&guard))
    }

    /// Copy a symbol out of its fragment.
    pub fn symbol(&self, key: SymbolKey) -> Option<Symbol> {
        self.with_fragment(key.file, |frag| frag.symbol(key.sym).cloned())?
    }

    /// Record that a resolution walk starting in `from` crossed into `to`.
    pub fn record_dep(&self, from: FileId, to: FileId) {
        if from != to {
            self.reverse_deps.entry(to).or_default().insert(from);
        }
    }

    /// Read a memoized eval, treating a stale generation stamp as unset.
    pub fn eval_get(&self, key: SymbolKey) -> Option<Eval> {
        let cell = self.evals.get(&key)?;
        let floor = self.eval_floor.get(&key.file).map(|f| *f).unwrap_or(0);
        if cell.stamp >= floor {
            Some(cell.value.clone())
        } else {
            None
        }
    }

    /// Memoize an eval at the current epoch.
    pub fn eval_set(&self, key: SymbolKey, value: Eval) {
        let stamp = self.epoch();
        self.evals.insert(key, EvalCell { value, stamp });
    }

    /// True if the logical name has at least one registered contributor.
    pub fn entity_exists(&self, name: &str) -> bool {
        self.entities
            .get(name)
            .map(|e| !e.members.is_empty())
            .unwrap_or(false)
    }

    /// Copy out an entity's members in deterministic order.
    pub fn entity_members(&self, name: &str) -> Vec<EntityMember> {
        self.entities
            .get(name)
            .map(|e| e.members.clone())
            .unwrap_or_default()
    }

    /// Look up a field on a merged entity: read-time union over contributors,
    /// last writer (in member order) wins. Returns the field symbol's global
    /// key alongside the declaration.
    pub fn entity_field(&self, entity: &str, field: &str) -> Option<(SymbolKey, FieldDecl)> {
        let members = self.entity_members(entity);
        let mut found = None;
        for member in &members {
            let hit = self
                .with_fragment(member.key.file, |frag| {
                    frag.fields
                        .iter()
                        .find(|f| f.class_sym == member.key.sym && f.name == field)
                        .map(|f| (SymbolKey::new(member.key.file, f.symbol), f.clone()))
                })
                .flatten();
            if let Some(decl) = hit {
                found = Some(decl);
            }
        }
        found
    }

    /// Look up a method on a merged entity, last writer wins.
    pub fn entity_method(&self, entity: &str, method: &str) -> Option<SymbolKey> {
        let members = self.entity_members(entity);
        let mut found = None;
        for member in &members {
            let hit = self
                .with_fragment(member.key.file, |frag| {
                    let class = frag.symbol(member.key.sym)?;
                    let body = class.body_scope?;
                    let scope = frag.scope(body)?;
                    let &sym = scope.bindings.get(method)?;
                    let symbol = frag.symbol(sym)?;
                    match symbol.kind {
                        SymKind::Function | SymKind::Method | SymKind::Property => {
                            Some(SymbolKey::new(member.key.file, sym))
                        }
                        _ => None,
                    }
                })
                .flatten();
            if let Some(key) = hit {
                found = Some(key);
            }
        }
        found
    }

    /// True if the entity exposes `name` as a field or method.
    pub fn entity_has_member(&self, entity: &str, name: &str) -> bool {
        self.entity_field(entity, name).is_some() || self.entity_method(entity, name).is_some()
    }
}

// ============================================================================
// Tests
// ============================================================================
