//! Entity-registry analyzer.
//!
//! Validates registry lookups and registrations against the merge index:
//! - every `env["name"]` lookup must name a registered entity with at least
//!   one base registration;
//! - a base registration of a name already base-registered by an unrelated
//!   declaration (no extension relationship on either side) is flagged on
//!   the later declaration;
//! - an extension of a name that is never base-registered is flagged.

use loupe_core::diag::{DiagCode, Diagnostic};
use loupe_core::graph::{Fragment, GraphStore, RefTarget, SymbolKey};

/// Run the registry checks for one file's fragment.
pub fn check(store: &GraphStore, frag: &Fragment) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    check_lookups(store, frag, &mut diags);
    check_registrations(store, frag, &mut diags);
    diags
}

fn check_lookups(store: &GraphStore, frag: &Fragment, diags: &mut Vec<Diagnostic>) {
    for reference in frag.references.values() {
        let RefTarget::Registry { name } = &reference.target else {
            continue;
        };
        let members = store.entity_members(name);
        if members.is_empty() {
            diags.push(Diagnostic::new(
                DiagCode::EntityUnknown,
                reference.span,
                format!("unknown entity '{}'", name),
            ));
        } else if !members.iter().any(|m| m.is_base) {
            diags.push(Diagnostic::new(
                DiagCode::EntityUnknown,
                reference.span,
                format!("entity '{}' is extended but never registered", name),
            ));
        }
    }
}

fn check_registrations(store: &GraphStore, frag: &Fragment, diags: &mut Vec<Diagnostic>) {
    for decl in &frag.entities {
        let own_key = SymbolKey::new(frag.file_id, decl.class_sym);

        if let Some(name) = &decl.logical_name {
            // Duplicate base registration: someone earlier in deterministic
            // order already base-registered this name, and neither side
            // declares an extension relationship for it.
            let members = store.entity_members(name);
            let earlier_base = members.iter().take_while(|m| m.key != own_key).find(|m| {
                m.is_base && !m.extends.iter().any(|e| e == name)
            });
            let own_extends = decl.extends.iter().any(|e| e == name);
            if earlier_base.is_some() && !own_extends {
                diags.push(Diagnostic::new(
                    DiagCode::EntityDuplicate,
                    decl.span,
                    format!("entity '{}' is already registered elsewhere", name),
                ));
            }
        }

        for extended in &decl.extends {
            // `_name` + `_inherit` of the same name extends itself.
            if decl.logical_name.as_deref() == Some(extended.as_str()) {
                continue;
            }
            let members = store.entity_members(extended);
            let has_base = members.iter().any(|m| m.is_base);
            if !has_base {
                diags.push(Diagnostic::new(
                    DiagCode::EntityUnknownExtension,
                    decl.span,
                    format!("extension of unregistered entity '{}'", extended),
                ));
            }
        }
    }
}
