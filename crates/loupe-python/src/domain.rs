//! Structured-query ("domain") expression analyzer.
//!
//! A domain is a list mixing prefix logical operators (`"&"`, `"|"`, `"!"`)
//! with 2-or-3-element condition tuples `(field, operator, value)`. The
//! analyzer validates:
//! - the argument is actually a list (resolving plain names to their
//!   assigned list literal first);
//! - logical operator arity (`&`/`|` binary, `!` unary) with bare-word
//!   spellings (`and`/`or`/`not`) flagged separately;
//! - condition tuple arity and the operator whitelist;
//! - dot-separated field paths against the subject entity's merged member
//!   set, including the virtual calendar sub-attributes of temporal fields
//!   and nested domains under `any`/`not any`.
//!
//! Unresolvable subjects or arguments are skipped, never guessed at.

use loupe_core::diag::{DiagCode, Diagnostic};
use loupe_core::graph::{
    CondElem, DomainItem, DomainSubject, DomainValue, Fragment, GraphStore, LitKind, Span,
    SymLink,
};

/// Comparison/membership operators allowed in a binary condition.
const OPERATORS: &[&str] = &[
    "=", "!=", ">", "<", ">=", "<=", "like", "ilike", "in", "not in", "child_of", "parent_of",
    "any", "not any",
];

/// Operators whose value is a nested domain on a relational field.
const NESTED_OPERATORS: &[&str] = &["any", "not any"];

/// Virtual calendar sub-attributes of temporal fields.
const DATE_ATTRS: &[&str] = &[
    "year_number",
    "quarter_number",
    "month_number",
    "iso_week_number",
    "day_of_week",
    "day_of_month",
    "day_of_year",
    "hour_number",
    "minute_number",
    "second_number",
];

/// Bare-word spellings of logical operators, flagged as invalid.
const WORD_OPERATORS: &[(&str, u32)] = &[("and", 2), ("or", 2), ("not", 1)];

/// Run the domain checks for one file's fragment.
pub fn check(store: &GraphStore, frag: &Fragment) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    for site in &frag.domains {
        let subject = subject_of(frag, site);
        match &site.value {
            DomainValue::List(items) => {
                validate_items(store, subject.as_deref(), items, &mut diags);
            }
            DomainValue::Name(name) => {
                // Resolve the variable locally; skip when nothing is known.
                let Some(sym_id) = frag.lookup(site.scope, name) else {
                    continue;
                };
                if let Some(items) = frag.list_literals.get(&sym_id) {
                    validate_items(store, subject.as_deref(), items, &mut diags);
                } else if let Some(sym) = frag.symbol(sym_id) {
                    match &sym.link {
                        SymLink::Literal(LitKind::List) => {}
                        SymLink::Literal(kind) => {
                            diags.push(not_a_list(site.span, &literal_name(*kind)));
                        }
                        _ => {}
                    }
                }
            }
            DomainValue::Other(what) => {
                diags.push(not_a_list(site.span, what));
            }
        }
    }
    diags
}

fn not_a_list(span: Span, what: &str) -> Diagnostic {
    Diagnostic::new(
        DiagCode::DomainNotAList,
        span,
        format!("domain must be a list, got {}", what),
    )
}

fn literal_name(kind: LitKind) -> String {
    match kind {
        LitKind::Int => "int literal".to_string(),
        LitKind::Float => "float literal".to_string(),
        LitKind::Str => "string literal".to_string(),
        LitKind::Bool => "bool literal".to_string(),
        LitKind::NoneLit => "None".to_string(),
        LitKind::List => "list literal".to_string(),
        LitKind::Tuple => "tuple literal".to_string(),
        LitKind::Dict => "dict literal".to_string(),
        LitKind::Set => "set literal".to_string(),
    }
}

/// Entity the domain's field paths are checked against.
fn subject_of(frag: &Fragment, site: &loupe_core::graph::DomainSite) -> Option<String> {
    match &site.subject {
        DomainSubject::Entity(name) => Some(name.clone()),
        DomainSubject::SelfEntity => {
            let decl = frag.enclosing_entity(site.scope)?;
            decl.logical_name
                .clone()
                .or_else(|| decl.extends.first().cloned())
        }
        DomainSubject::Unknown => None,
    }
}

/// Validate one lowered domain list.
fn validate_items(
    store: &GraphStore,
    subject: Option<&str>,
    items: &[DomainItem],
    diags: &mut Vec<Diagnostic>,
) {
    // Prefix-notation arity check: operators open a frame consuming N
    // operands; a completed frame becomes an operand of the enclosing one.
    let mut frames: Vec<(String, u32, Span)> = Vec::new();

    for item in items {
        match item {
            DomainItem::Op { token, span } => {
                match token.as_str() {
                    "&" | "|" => frames.push((token.clone(), 2, *span)),
                    "!" => frames.push((token.clone(), 1, *span)),
                    _ => {
                        if let Some((_, arity)) =
                            WORD_OPERATORS.iter().find(|(w, _)| *w == token.as_str())
                        {
                            diags.push(Diagnostic::new(
                                DiagCode::DomainInvalidOperatorSpelling,
                                *span,
                                format!(
                                    "'{}' is not a valid operator spelling, use the symbol form",
                                    token
                                ),
                            ));
                            frames.push((token.clone(), *arity, *span));
                        } else {
                            diags.push(Diagnostic::new(
                                DiagCode::DomainInvalidOperator,
                                *span,
                                format!("unknown logical operator '{}'", token),
                            ));
                            consume_operand(&mut frames);
                        }
                    }
                }
            }
            DomainItem::Cond { elems, span } => {
                validate_condition(store, subject, elems, *span, diags);
                consume_operand(&mut frames);
            }
            DomainItem::Other { .. } => {
                // Unlowerable element: treat as an operand, claim nothing.
                consume_operand(&mut frames);
            }
        }
    }

    for (token, remaining, span) in frames {
        diags.push(Diagnostic::new(
            DiagCode::DomainOperatorArity,
            span,
            format!(
                "operator '{}' is missing {} operand{}",
                token,
                remaining,
                if remaining == 1 { "" } else { "s" }
            ),
        ));
    }
}

/// One operand arrived: feed the innermost open frame; completed frames are
/// operands of their enclosing frame.
fn consume_operand(frames: &mut Vec<(String, u32, Span)>) {
    while let Some(top) = frames.last_mut() {
        top.1 -= 1;
        if top.1 == 0 {
            frames.pop();
            continue;
        }
        break;
    }
}

fn validate_condition(
    store: &GraphStore,
    subject: Option<&str>,
    elems: &[CondElem],
    span: Span,
    diags: &mut Vec<Diagnostic>,
) {
    if elems.len() != 2 && elems.len() != 3 {
        diags.push(Diagnostic::new(
            DiagCode::DomainConditionArity,
            span,
            format!("condition must have 2 or 3 elements, got {}", elems.len()),
        ));
        return;
    }

    let operator = match &elems[1] {
        CondElem::Str { value, span } => Some((value.as_str(), *span)),
        _ => None,
    };
    if let Some((op, op_span)) = operator {
        if !OPERATORS.contains(&op) {
            diags.push(Diagnostic::new(
                DiagCode::DomainInvalidOperator,
                op_span,
                format!("invalid condition operator '{}'", op),
            ));
        }
    }

    let CondElem::Str {
        value: path,
        span: path_span,
    } = &elems[0]
    else {
        return;
    };
    let Some(subject) = subject else { return };

    let terminal = validate_field_path(store, subject, path, *path_span, diags);

    // `any` / `not any` take a nested domain on a relational field.
    if let Some((op, op_span)) = operator {
        if NESTED_OPERATORS.contains(&op) {
            match &terminal {
                Some(field) if field.is_relational() => {
                    if let (Some(rel), Some(CondElem::Nested { items, .. })) =
                        (&field.relation, elems.get(2))
                    {
                        if store.entity_exists(rel) {
                            validate_items(store, Some(rel), items, diags);
                        }
                    }
                }
                Some(_) => {
                    diags.push(Diagnostic::new(
                        DiagCode::DomainInvalidOperator,
                        op_span,
                        format!("operator '{}' requires a relational field", op),
                    ));
                }
                None => {}
            }
        }
    }
}

/// Walk a dot-separated field path against the subject entity. Returns the
/// terminal field declaration when the whole path resolved.
fn validate_field_path(
    store: &GraphStore,
    subject: &str,
    path: &str,
    span: Span,
    diags: &mut Vec<Diagnostic>,
) -> Option<loupe_core::graph::FieldDecl> {
    // Unregistered subject: nothing to check against.
    if !store.entity_exists(subject) {
        return None;
    }

    let segments: Vec<&str> = path.split('.').collect();
    let mut entity = subject.to_string();

    let mut i = 0;
    while i < segments.len() {
        let seg = segments[i];
        let Some((_, field)) = store.entity_field(&entity, seg) else {
            diags.push(Diagnostic::new(
                DiagCode::DomainUnknownField,
                span,
                format!("unknown field '{}' on entity '{}'", seg, entity),
            ));
            return None;
        };
        let is_last = i + 1 == segments.len();
        if is_last {
            return Some(field);
        }
        if field.is_relational() {
            match &field.relation {
                Some(rel) if store.entity_exists(rel) => {
                    entity = rel.clone();
                    i += 1;
                }
                // Unknown target entity: degrade, the field analyzer owns
                // that complaint.
                _ => return None,
            }
        } else if field.is_temporal() {
            let attr = segments[i + 1];
            if !DATE_ATTRS.contains(&attr) {
                diags.push(Diagnostic::new(
                    DiagCode::DomainUnknownDateAttribute,
                    span,
                    format!("'{}' is not a calendar attribute of '{}'", attr, seg),
                ));
            } else if i + 2 < segments.len() {
                diags.push(Diagnostic::new(
                    DiagCode::DomainUnknownDateAttribute,
                    span,
                    format!("nothing follows a calendar attribute ('{}')", attr),
                ));
            }
            return None;
        } else {
            diags.push(Diagnostic::new(
                DiagCode::DomainAttributeOnScalar,
                span,
                format!("field '{}' has no attribute '{}'", seg, segments[i + 1]),
            ));
            return None;
        }
    }
    None
}

// ============================================================================
// Tests
// ============================================================================
