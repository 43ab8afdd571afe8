//! Field cross-reference analyzer.
//!
//! Relation-typed fields carry names that must resolve elsewhere:
//! - the inverse member of a One2many-style field must exist on the target
//!   entity;
//! - `related=` dotted paths must resolve on the owning entity, and the
//!   terminal field's kind must match the declaring field's kind;
//! - `compute=`/`inverse=`/`search=` accessor names must resolve to methods
//!   on the owning entity;
//! - dependency-decorator paths (`@api.depends` and friends) must resolve
//!   like field paths.
//!
//! Every unresolved name is flagged with its own code; unknown target
//! entities degrade to a registry complaint rather than cascading.

use loupe_core::diag::{DiagCode, Diagnostic};
use loupe_core::graph::{FieldDecl, Fragment, GraphStore, SymbolId};

/// Run the field cross-reference checks for one file's fragment.
pub fn check(store: &GraphStore, frag: &Fragment) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    for field in &frag.fields {
        let Some(owner) = owning_entity(frag, field.class_sym) else {
            continue;
        };
        check_relation(store, field, &mut diags);
        check_inverse_name(store, field, &mut diags);
        check_accessors(store, &owner, field, &mut diags);
        check_related(store, &owner, field, &mut diags);
    }

    for dep in &frag.deps {
        let Some(owner) = owning_entity(frag, dep.class_sym) else {
            continue;
        };
        if !store.entity_exists(&owner) {
            continue;
        }
        if resolve_path(store, &owner, &dep.path).is_none() {
            diags.push(Diagnostic::new(
                DiagCode::FieldUnknownDependency,
                dep.span,
                format!(
                    "@{} path '{}' does not resolve on entity '{}'",
                    dep.decorator, dep.path, owner
                ),
            ));
        }
    }

    diags
}

/// Logical entity a class contributes to, if any.
fn owning_entity(frag: &Fragment, class_sym: SymbolId) -> Option<String> {
    let decl = frag.entities.iter().find(|e| e.class_sym == class_sym)?;
    decl.logical_name
        .clone()
        .or_else(|| decl.extends.first().cloned())
}

/// Relational fields must point at a registered entity.
fn check_relation(store: &GraphStore, field: &FieldDecl, diags: &mut Vec<Diagnostic>) {
    if !field.is_relational() {
        return;
    }
    let Some(relation) = &field.relation else {
        return;
    };
    if !store.entity_exists(relation) {
        diags.push(Diagnostic::new(
            DiagCode::EntityUnknown,
            field.span,
            format!(
                "field '{}' relates to unknown entity '{}'",
                field.name, relation
            ),
        ));
    }
}

fn check_inverse_name(store: &GraphStore, field: &FieldDecl, diags: &mut Vec<Diagnostic>) {
    let Some(inverse) = &field.inverse_name else {
        return;
    };
    let Some(relation) = &field.relation else {
        return;
    };
    if !store.entity_exists(relation) {
        // Already flagged by check_relation.
        return;
    }
    if store.entity_field(relation, inverse).is_none() {
        diags.push(Diagnostic::new(
            DiagCode::FieldInverseNotFound,
            field.span,
            format!(
                "inverse field '{}' not found on entity '{}'",
                inverse, relation
            ),
        ));
    }
}

fn check_accessors(
    store: &GraphStore,
    owner: &str,
    field: &FieldDecl,
    diags: &mut Vec<Diagnostic>,
) {
    if !store.entity_exists(owner) {
        return;
    }
    let accessors: [(&str, &Option<String>); 3] = [
        ("compute", &field.compute),
        ("inverse", &field.inverse),
        ("search", &field.search),
    ];
    for (kind, name) in accessors {
        let Some(name) = name else { continue };
        if store.entity_method(owner, name).is_none() {
            diags.push(Diagnostic::new(
                DiagCode::FieldAccessorNotFound,
                field.span,
                format!(
                    "{} method '{}' not found on entity '{}'",
                    kind, name, owner
                ),
            ));
        }
    }
}

fn check_related(store: &GraphStore, owner: &str, field: &FieldDecl, diags: &mut Vec<Diagnostic>) {
    let Some(related) = &field.related else {
        return;
    };
    if !store.entity_exists(owner) {
        return;
    }
    match resolve_path(store, owner, related) {
        None => {
            diags.push(Diagnostic::new(
                DiagCode::FieldRelatedPathNotFound,
                field.span,
                format!(
                    "related path '{}' does not resolve on entity '{}'",
                    related, owner
                ),
            ));
        }
        Some(terminal) => {
            if terminal.kind != field.kind {
                diags.push(Diagnostic::new(
                    DiagCode::FieldRelatedTypeMismatch,
                    field.span,
                    format!(
                        "related path '{}' is a {} field, but '{}' is declared {}",
                        related, terminal.kind, field.name, field.kind
                    ),
                ));
            }
        }
    }
}

/// Resolve a dotted field path on an entity, descending through relational
/// segments. Returns the terminal field when every segment resolves;
/// `None` on the first unresolved segment. Paths crossing into unknown
/// target entities resolve vacuously (degrade, don't cascade).
fn resolve_path(store: &GraphStore, entity: &str, path: &str) -> Option<FieldDecl> {
    let mut entity = entity.to_string();
    let segments: Vec<&str> = path.split('.').collect();
    let mut resolved: Option<FieldDecl> = None;

    for (i, seg) in segments.iter().enumerate() {
        let (_, field) = store.entity_field(&entity, seg)?;
        let is_last = i + 1 == segments.len();
        if is_last {
            resolved = Some(field);
            break;
        }
        if !field.is_relational() {
            return None;
        }
        match &field.relation {
            Some(rel) if store.entity_exists(rel) => entity = rel.clone(),
            _ => {
                // Unknown target: accept the rest of the path as-is.
                resolved = Some(field);
                break;
            }
        }
    }
    resolved
}
