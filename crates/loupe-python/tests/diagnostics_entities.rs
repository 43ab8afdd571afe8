//! Entity-registry and field cross-reference diagnostics through the engine.

use loupe_core::diag::DiagCode;
use loupe_python::Engine;

fn engine_with(files: &[(&str, &str)]) -> Engine {
    let engine = Engine::new();
    for (path, content) in files {
        engine.add_file(path, *content);
    }
    // Analysis is demand-driven; pull every file in so the merge index is
    // complete before asserting.
    for (path, _) in files {
        engine.ensure_file(path);
    }
    engine
}

fn codes(engine: &Engine, path: &str) -> Vec<DiagCode> {
    engine
        .diagnostics_for(path)
        .iter()
        .map(|d| d.code)
        .collect()
}

// ============================================================================
// Registry
// ============================================================================

#[test]
fn known_registry_lookup_is_clean() {
    let code = r#"class Partner(Model):
    _name = "res.partner"

    def use_it(self):
        self.env["res.partner"]
"#;
    let engine = engine_with(&[("a.py", code)]);
    assert!(codes(&engine, "a.py").is_empty());
}

#[test]
fn unknown_registry_lookup_is_flagged() {
    let code = r#"class Partner(Model):
    _name = "res.partner"

    def use_it(self):
        self.env["no.such.entity"]
"#;
    let engine = engine_with(&[("a.py", code)]);
    assert_eq!(codes(&engine, "a.py"), vec![DiagCode::EntityUnknown]);
}

#[test]
fn extension_only_entity_lookup_is_flagged() {
    // `ghost.entity` is extended somewhere but never base-registered.
    let a = r#"class Ext(Model):
    _inherit = "ghost.entity"
"#;
    let b = r#"class User(Model):
    _name = "res.user"

    def use_it(self):
        self.env["ghost.entity"]
"#;
    let engine = engine_with(&[("a.py", a), ("b.py", b)]);
    let b_codes = codes(&engine, "b.py");
    assert_eq!(b_codes, vec![DiagCode::EntityUnknown]);
    // The extension itself is flagged too, on its own file.
    assert!(codes(&engine, "a.py").contains(&DiagCode::EntityUnknownExtension));
}

#[test]
fn duplicate_registration_flags_the_second_declaration() {
    let first = r#"class Original(Model):
    _name = "res.partner"
"#;
    let second = r#"class Clone(Model):
    _name = "res.partner"
"#;
    let engine = engine_with(&[("a.py", first), ("b.py", second)]);
    // Deterministic order: a.py registers first, b.py is the duplicate.
    assert!(codes(&engine, "a.py").is_empty());
    assert_eq!(codes(&engine, "b.py"), vec![DiagCode::EntityDuplicate]);
}

#[test]
fn extension_relationship_is_not_a_duplicate() {
    let base = r#"class Partner(Model):
    _name = "res.partner"
"#;
    let extension = r#"class PartnerExt(Model):
    _name = "res.partner"
    _inherit = "res.partner"
"#;
    let engine = engine_with(&[("a.py", base), ("b.py", extension)]);
    assert!(codes(&engine, "a.py").is_empty());
    assert!(codes(&engine, "b.py").is_empty());
}

#[test]
fn pure_extension_merges_members() {
    let base = r#"class Partner(Model):
    _name = "res.partner"

    name = fields.Char()
"#;
    let extension = r#"class PartnerExt(Model):
    _inherit = "res.partner"

    nickname = fields.Char()
"#;
    let engine = engine_with(&[("a.py", base), ("b.py", extension)]);
    assert!(codes(&engine, "a.py").is_empty());
    assert!(codes(&engine, "b.py").is_empty());
    // Union of members across both declarations.
    assert!(engine.store().entity_field("res.partner", "name").is_some());
    assert!(engine
        .store()
        .entity_field("res.partner", "nickname")
        .is_some());
}

#[test]
fn malformed_registered_name_degrades_with_a_diagnostic() {
    let code = r#"class Broken(Model):
    _name = 123
"#;
    let engine = engine_with(&[("a.py", code)]);
    assert_eq!(codes(&engine, "a.py"), vec![DiagCode::EntityInvalidName]);
}

// ============================================================================
// Field cross-references
// ============================================================================

#[test]
fn consistent_field_wiring_is_clean() {
    let code = r#"class Wheel(Model):
    _name = "bike.wheel"

    bike_id = fields.Many2one("bike.bike")
    price = fields.Float()

class Bike(Model):
    _name = "bike.bike"

    wheel_ids = fields.One2many("bike.wheel", "bike_id")
    total = fields.Float(compute="_compute_total")
    wheel_price = fields.Float(related="wheel_ids.price")

    @api.depends("wheel_ids.price")
    def _compute_total(self):
        pass
"#;
    let engine = engine_with(&[("a.py", code)]);
    assert!(codes(&engine, "a.py").is_empty());
}

#[test]
fn unknown_relation_entity_is_flagged() {
    let code = r#"class Bike(Model):
    _name = "bike.bike"

    wheel_id = fields.Many2one("no.such.entity")
"#;
    let engine = engine_with(&[("a.py", code)]);
    assert_eq!(codes(&engine, "a.py"), vec![DiagCode::EntityUnknown]);
}

#[test]
fn missing_inverse_field_is_flagged() {
    let code = r#"class Wheel(Model):
    _name = "bike.wheel"

class Bike(Model):
    _name = "bike.bike"

    wheel_ids = fields.One2many("bike.wheel", "bike_id")
"#;
    let engine = engine_with(&[("a.py", code)]);
    assert_eq!(codes(&engine, "a.py"), vec![DiagCode::FieldInverseNotFound]);
}

#[test]
fn missing_compute_method_is_flagged() {
    let code = r#"class Bike(Model):
    _name = "bike.bike"

    total = fields.Float(compute="_compute_total")
"#;
    let engine = engine_with(&[("a.py", code)]);
    assert_eq!(codes(&engine, "a.py"), vec![DiagCode::FieldAccessorNotFound]);
}

#[test]
fn accessor_from_an_extension_counts() {
    // The compute method lives on another contributor of the merged entity.
    let base = r#"class Bike(Model):
    _name = "bike.bike"

    total = fields.Float(compute="_compute_total")
"#;
    let extension = r#"class BikeExt(Model):
    _inherit = "bike.bike"

    def _compute_total(self):
        pass
"#;
    let engine = engine_with(&[("a.py", base), ("b.py", extension)]);
    assert!(codes(&engine, "a.py").is_empty());
}

#[test]
fn related_path_must_resolve() {
    let code = r#"class Bike(Model):
    _name = "bike.bike"

    label = fields.Char(related="missing.path")
"#;
    let engine = engine_with(&[("a.py", code)]);
    assert_eq!(
        codes(&engine, "a.py"),
        vec![DiagCode::FieldRelatedPathNotFound]
    );
}

#[test]
fn related_path_kind_must_match() {
    let code = r#"class Wheel(Model):
    _name = "bike.wheel"

    price = fields.Float()

class Bike(Model):
    _name = "bike.bike"

    wheel_id = fields.Many2one("bike.wheel")
    wheel_price = fields.Char(related="wheel_id.price")
"#;
    let engine = engine_with(&[("a.py", code)]);
    assert_eq!(
        codes(&engine, "a.py"),
        vec![DiagCode::FieldRelatedTypeMismatch]
    );
}

#[test]
fn unknown_dependency_path_is_flagged() {
    let code = r#"class Bike(Model):
    _name = "bike.bike"

    price = fields.Float()

    @api.depends("price")
    @api.depends("wrong_field")
    def _compute_anything(self):
        pass
"#;
    let engine = engine_with(&[("a.py", code)]);
    assert_eq!(
        codes(&engine, "a.py"),
        vec![DiagCode::FieldUnknownDependency]
    );
}
