//! Engine facade: file tracking, lazy builds, queries and diagnostics.
//!
//! The engine owns the shared [`GraphStore`], the on-disk fragment cache and
//! an in-memory text overlay (editor buffers win over disk). Analysis is
//! demand-driven: a file is parsed and built the first time a query needs
//! it, either from a valid cache entry or from source. Edits rebuild only
//! the edited file; dependents re-resolve lazily through the store's eval
//! floors.
//!
//! Queries are safe to run concurrently; a per-file build mutex makes
//! concurrent queries share one build instead of racing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, warn};
use walkdir::WalkDir;

use loupe_core::diag::Diagnostic;
use loupe_core::graph::{
    CallSite, FileId, Fragment, GraphStore, ParamKind, SymKind, Symbol, SymbolKey, TypeRef,
};
use loupe_core::hash::ContentHash;
use loupe_core::text::position_to_byte_offset;

use crate::builder;
use crate::cache::FragmentCache;
use crate::callbind;
use crate::domain;
use crate::fields;
use crate::registry;
use crate::resolver::{Context, FragmentSource, Resolver};
use crate::syntax;

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation for abandoned queries.
///
/// Cancelling stops the query from consuming resolver output promptly; it
/// never interrupts an in-flight file build, which other queries may need.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Query results
// ============================================================================

/// Answer to a `resolve_at` query.
#[derive(Debug, Clone)]
pub struct ResolveAnswer {
    /// The symbol under the cursor (or the reference's resolved target).
    pub symbol: Option<Symbol>,
    /// Symbol after accessor-return substitution; differs from `symbol` for
    /// property-like accessors.
    pub effective: Option<Symbol>,
    pub type_ref: TypeRef,
    pub is_instance: bool,
}

// ============================================================================
// Engine
// ============================================================================

/// The analysis engine. Cheap to share behind an `Arc`; all methods take
/// `&self` and are safe under concurrent readers.
#[derive(Debug, Default)]
pub struct Engine {
    store: GraphStore,
    cache: Option<FragmentCache>,
    /// In-memory file contents; wins over disk.
    overlay: DashMap<String, String>,
    /// Project root for disk reads and scanning.
    root: Option<PathBuf>,
    /// Per-file build locks so concurrent queries share one build.
    building: DashMap<FileId, Arc<Mutex<()>>>,
}

impl Engine {
    /// In-memory engine: files arrive via [`Engine::add_file`].
    pub fn new() -> Self {
        Engine::default()
    }

    /// Engine over a project directory on disk.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Engine {
            root: Some(root.into()),
            ..Engine::default()
        }
    }

    /// Attach a fragment cache.
    pub fn set_cache(&mut self, cache: FragmentCache) {
        self.cache = Some(cache);
    }

    /// Shared graph store (read-only use).
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Register a file's contents without analyzing it (analysis is lazy).
    pub fn add_file(&self, path: &str, text: impl Into<String>) {
        self.overlay.insert(path.to_string(), text.into());
    }

    /// Apply an edit: replace the file's contents, invalidate its cache
    /// entry, and rebuild its fragment if it was already analyzed.
    /// Dependents are not touched; their memoized evals go stale lazily.
    pub fn update_file(&self, path: &str, text: impl Into<String>) {
        self.overlay.insert(path.to_string(), text.into());
        if let Some(cache) = &self.cache {
            cache.invalidate(path);
        }
        if let Some(file) = self.store.file_id(path) {
            if self.store.has_fragment(file) {
                self.rebuild(file, path);
            }
        }
    }

    /// Forget a file: its fragment is replaced by an empty one so lookups
    /// vanish and dependents degrade instead of reading stale state.
    pub fn remove_file(&self, path: &str) {
        self.overlay.remove(path);
        if let Some(cache) = &self.cache {
            cache.invalidate(path);
        }
        if let Some(file) = self.store.file_id(path) {
            if self.store.has_fragment(file) {
                self.store
                    .install_fragment(Fragment::new(file, path, 0));
            }
        }
    }

    /// Workspace-relative paths of all Python files under the root.
    pub fn scan_project(&self) -> Vec<String> {
        let Some(root) = &self.root else {
            return self.overlay.iter().map(|e| e.key().clone()).collect();
        };
        let mut paths = Vec::new();
        for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("py") {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(root) {
                paths.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        paths.sort();
        paths
    }

    /// Current text of a tracked file: overlay first, then disk.
    pub fn text_of(&self, path: &str) -> Option<String> {
        if let Some(text) = self.overlay.get(path) {
            return Some(text.clone());
        }
        let root = self.root.as_ref()?;
        std::fs::read_to_string(root.join(path)).ok()
    }

    /// Resolve the symbol at a 1-indexed line/column position.
    pub fn resolve_at(&self, path: &str, line: u32, col: u32) -> Option<ResolveAnswer> {
        self.resolve_at_with(path, line, col, None)
    }

    /// `resolve_at` with cooperative cancellation.
    pub fn resolve_at_with(
        &self,
        path: &str,
        line: u32,
        col: u32,
        cancel: Option<CancelToken>,
    ) -> Option<ResolveAnswer> {
        let file = self.ensure_file(path)?;
        let text = self.text_of(path)?;
        let offset = position_to_byte_offset(&text, line, col);

        // Declaration under the cursor wins; fall back to a use site.
        enum Hit {
            Decl(SymbolKey),
            Use(loupe_core::graph::Reference),
        }
        let hit = self.store.with_fragment(file, |frag| {
            if let Some(sym) = frag.symbol_at(offset) {
                Some(Hit::Decl(SymbolKey::new(file, sym.symbol_id)))
            } else {
                frag.reference_at(offset).cloned().map(Hit::Use)
            }
        })??;

        let resolver = Resolver::new(&self.store, self);
        let mut ctx = Context::new();
        if let Some(token) = &cancel {
            ctx = ctx.with_cancel(token.clone());
        }

        let answer = match hit {
            Hit::Decl(key) => {
                let res = resolver.resolve_symbol(key, &mut ctx);
                ResolveAnswer {
                    symbol: self.store.symbol(key),
                    effective: res.effective.and_then(|k| self.store.symbol(k)),
                    type_ref: res.type_ref,
                    is_instance: res.is_instance,
                }
            }
            Hit::Use(reference) => {
                // The symbol under the cursor is the use's declaration; the
                // effective symbol and type come from the full chain walk.
                let mut decl_ctx = Context::new();
                if let Some(token) = &cancel {
                    decl_ctx = decl_ctx.with_cancel(token.clone());
                }
                let decl = resolver.declaration_of(file, &reference, &mut decl_ctx);
                let res = resolver.resolve_reference(file, &reference, &mut ctx);
                ResolveAnswer {
                    symbol: decl
                        .or(res.symbol)
                        .and_then(|k| self.store.symbol(k)),
                    effective: res.effective.and_then(|k| self.store.symbol(k)),
                    type_ref: res.type_ref,
                    is_instance: res.is_instance,
                }
            }
        };
        Some(answer)
    }

    /// All diagnostics for a file: builder-emitted problems plus the
    /// call-binding, registry, domain and field analyzers. Analyzer failures
    /// are per-construct and never abort the rest of the file.
    pub fn diagnostics_for(&self, path: &str) -> Vec<Diagnostic> {
        let Some(file) = self.ensure_file(path) else {
            return Vec::new();
        };
        // Copy the fragment out; analyzers take their own short locks on
        // other files' fragments.
        let Some(frag) = self.store.with_fragment(file, |f| f.clone()) else {
            return Vec::new();
        };

        let mut diags = frag.diagnostics.clone();
        diags.extend(registry::check(&self.store, &frag));
        diags.extend(domain::check(&self.store, &frag));
        diags.extend(fields::check(&self.store, &frag));
        self.check_call_sites(file, &frag, &mut diags);

        diags.sort_by_key(|d| (d.range.start, d.range.end, d.code.as_str()));
        diags
    }

    /// Validate call sites whose callee resolves to a known signature.
    fn check_call_sites(&self, file: FileId, frag: &Fragment, diags: &mut Vec<Diagnostic>) {
        let resolver = Resolver::new(&self.store, self);
        for call in &frag.call_sites {
            if call.has_splat {
                continue;
            }
            if let Some((signature, skip_first)) =
                self.callee_signature(&resolver, file, call)
            {
                diags.extend(callbind::check(call, &signature, skip_first));
            }
        }
    }

    /// Resolve a call site's callee to its signature, deciding whether the
    /// leading receiver parameter is already bound.
    fn callee_signature(
        &self,
        resolver: &Resolver<'_>,
        file: FileId,
        call: &CallSite,
    ) -> Option<(loupe_core::graph::Signature, bool)> {
        let (name, base) = call.callee.split_last()?;
        let mut ctx = Context::new();
        let target = if base.is_empty() {
            resolver.resolve_name(file, call.scope, name, &mut ctx)
        } else {
            resolver.resolve_attribute(file, call.scope, base, name, &mut ctx)
        };
        let key = target.symbol?;
        let sym = self.store.symbol(key)?;
        if !matches!(sym.kind, SymKind::Function | SymKind::Method) {
            return None;
        }
        let signature = sym.signature?;

        let bound = match base.split_last() {
            None => false,
            Some((last, rest)) => {
                let mut base_ctx = Context::new();
                let base_res = if rest.is_empty() {
                    resolver.resolve_name(file, call.scope, last, &mut base_ctx)
                } else {
                    resolver.resolve_attribute(file, call.scope, rest, last, &mut base_ctx)
                };
                base_res.is_instance || matches!(base_res.type_ref, TypeRef::Entity(_))
            }
        };
        let skip_first = bound
            && signature
                .params
                .first()
                .is_some_and(|p| {
                    p.kind == ParamKind::PositionalOrKeyword
                        && (p.name == "self" || p.name == "cls")
                });
        Some((signature, skip_first))
    }

    /// Ensure a file is analyzed: cache load, else parse and build.
    /// Concurrent callers share one build through the per-file mutex.
    pub fn ensure_file(&self, path: &str) -> Option<FileId> {
        let text = self.text_of(path)?;
        let file = self.store.intern_file(path);
        if self.store.has_fragment(file) {
            return Some(file);
        }

        let lock = self
            .building
            .entry(file)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.store.has_fragment(file) {
            return Some(file);
        }

        if let Some(cache) = &self.cache {
            if let Ok(mut frag) = cache.load(path, &text) {
                frag.file_id = file;
                frag.path = path.to_string();
                self.store.install_fragment(frag);
                return Some(file);
            }
        }

        debug!(path, "building fragment from source");
        self.build_and_install(file, path, &text)?;
        Some(file)
    }

    fn rebuild(&self, file: FileId, path: &str) {
        if let Some(text) = self.text_of(path) {
            self.build_and_install(file, path, &text);
        }
    }

    fn build_and_install(&self, file: FileId, path: &str, text: &str) -> Option<()> {
        let tree = syntax::parse(text)?;
        let frag = builder::build(file, path, text, &tree);
        if let Some(cache) = &self.cache {
            let hash = ContentHash::compute(text.as_bytes());
            if let Err(e) = cache.store(path, hash, &frag) {
                warn!(path, error = %e, "failed to store cache entry");
            }
        }
        self.store.install_fragment(frag);
        Some(())
    }
}

impl FragmentSource for Engine {
    fn ensure_file(&self, path: &str) -> Option<FileId> {
        Engine::ensure_file(self, path)
    }

    /// Module path candidates, module file preferred over package init:
    /// `pkg.mod` → `pkg/mod.py`, then `pkg/mod/__init__.py`.
    fn resolve_module(&self, module: &str) -> Option<String> {
        if module.starts_with('.') {
            return None;
        }
        let base = module.replace('.', "/");
        let candidates = [format!("{base}.py"), format!("{base}/__init__.py")];
        candidates.into_iter().find(|c| self.file_exists(c))
    }
}

impl Engine {
    fn file_exists(&self, path: &str) -> bool {
        if self.overlay.contains_key(path) {
            return true;
        }
        self.root
            .as_ref()
            .is_some_and(|root| root.join(path).is_file())
    }
}
