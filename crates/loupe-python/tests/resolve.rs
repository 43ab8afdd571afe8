//! Resolution walks through the engine: assignment chains, imports,
//! accessor overrides, cycles and memoization behavior.
//!
//! `resolve_at` answers with the declaration under the cursor (`symbol`),
//! the chain's terminal after accessor substitution (`effective`) and the
//! inferred type.

use loupe_core::graph::{LitKind, SymKind, TypeRef};
use loupe_python::Engine;

fn engine_with(files: &[(&str, &str)]) -> Engine {
    let engine = Engine::new();
    for (path, content) in files {
        engine.add_file(path, *content);
    }
    engine
}

#[test]
fn identifier_resolves_through_assignment_chain() {
    let code = r#"class Widget:
    pass

a = Widget
b = a
c = b
"#;
    let engine = engine_with(&[("test.py", code)]);
    // Hover on the `c` declaration (line 6, col 1).
    let answer = engine.resolve_at("test.py", 6, 1).expect("answer");
    assert_eq!(answer.symbol.expect("declaration").name, "c");
    let effective = answer.effective.expect("terminal symbol");
    assert_eq!(effective.name, "Widget");
    assert_eq!(effective.kind, SymKind::Class);
    // `c = b = a = Widget` is an alias chain, not an instance.
    assert!(!answer.is_instance);
}

#[test]
fn constructor_call_yields_an_instance() {
    let code = r#"class Widget:
    pass

w = Widget()
"#;
    let engine = engine_with(&[("test.py", code)]);
    let answer = engine.resolve_at("test.py", 4, 1).expect("answer");
    assert_eq!(answer.effective.expect("terminal").name, "Widget");
    assert!(answer.is_instance);
}

#[test]
fn literal_assignment_resolves_to_literal_type() {
    let engine = engine_with(&[("test.py", "x = 42\n")]);
    let answer = engine.resolve_at("test.py", 1, 1).expect("answer");
    assert_eq!(answer.type_ref, TypeRef::Literal(LitKind::Int));
    assert!(answer.is_instance);
}

#[test]
fn import_resolves_to_original_definition() {
    let lib = r#"class Handler:
    """Handles things."""
    pass
"#;
    let main = r#"from lib import Handler

h = Handler()
"#;
    let engine = engine_with(&[("lib.py", lib), ("main.py", main)]);
    let answer = engine.resolve_at("main.py", 3, 1).expect("answer");
    let effective = answer.effective.expect("terminal symbol");
    assert_eq!(effective.name, "Handler");
    assert_eq!(effective.kind, SymKind::Class);
    assert_eq!(effective.doc.as_deref(), Some("Handles things."));
    assert!(answer.is_instance);
}

#[test]
fn package_init_is_a_module_candidate() {
    let engine = engine_with(&[
        ("pkg/__init__.py", "class Thing:\n    pass\n"),
        ("main.py", "from pkg import Thing\n\nt = Thing()\n"),
    ]);
    let answer = engine.resolve_at("main.py", 3, 1).expect("answer");
    assert_eq!(answer.effective.expect("terminal").name, "Thing");
}

#[test]
fn unresolved_name_degrades_to_any() {
    let engine = engine_with(&[("test.py", "x = nothing_known\n")]);
    let answer = engine.resolve_at("test.py", 1, 1).expect("answer");
    assert_eq!(answer.type_ref, TypeRef::Any);
}

#[test]
fn cyclic_assignment_degrades_to_any() {
    // a and b feed each other; the walk must terminate and answer Any.
    let code = "a = b\nb = a\n";
    let engine = engine_with(&[("test.py", code)]);
    let answer = engine.resolve_at("test.py", 1, 1).expect("answer");
    assert_eq!(answer.type_ref, TypeRef::Any);
    // The last good symbol is still reported.
    assert!(answer.symbol.is_some());
}

#[test]
fn resolution_is_idempotent() {
    let code = r#"class Widget:
    pass

w = Widget()
v = w
"#;
    let engine = engine_with(&[("test.py", code)]);
    let first = engine.resolve_at("test.py", 5, 1).expect("first");
    let second = engine.resolve_at("test.py", 5, 1).expect("second");
    assert_eq!(
        first.effective.as_ref().map(|s| s.symbol_id),
        second.effective.as_ref().map(|s| s.symbol_id)
    );
    assert_eq!(first.type_ref, second.type_ref);
    assert_eq!(first.is_instance, second.is_instance);
}

#[test]
fn property_accessor_substitutes_return_type() {
    let code = r#"class Price:
    pass

class Widget:
    @property
    def cost(self) -> Price:
        return Price()

    def use_it(self):
        return self.cost
"#;
    let engine = engine_with(&[("test.py", code)]);
    // Hover on the `cost` attribute use (line 10, col 21).
    let answer = engine.resolve_at("test.py", 10, 21).expect("answer");
    let symbol = answer.symbol.expect("raw symbol");
    assert_eq!(symbol.name, "cost");
    assert!(symbol.is_property);
    // The effective symbol is the accessor's return type, not the accessor.
    let effective = answer.effective.expect("effective symbol");
    assert_eq!(effective.name, "Price");
    assert_eq!(effective.kind, SymKind::Class);
}

#[test]
fn annotated_parameter_resolves_to_instance_of_annotation() {
    let code = r#"class Handler:
    pass

def run(h: Handler):
    return h
"#;
    let engine = engine_with(&[("test.py", code)]);
    // Hover on `h` in the body (line 5, col 12).
    let answer = engine.resolve_at("test.py", 5, 12).expect("answer");
    assert_eq!(answer.symbol.expect("declaration").name, "h");
    assert_eq!(answer.effective.expect("terminal").name, "Handler");
    assert!(answer.is_instance);
}

#[test]
fn registry_lookup_resolves_to_entity() {
    let code = r#"class Partner(Model):
    _name = "res.partner"

    def use_it(self):
        return self.env["res.partner"]
"#;
    let engine = engine_with(&[("test.py", code)]);
    // Hover on the registry key string (line 5, col 25).
    let answer = engine.resolve_at("test.py", 5, 25).expect("answer");
    assert_eq!(answer.type_ref, TypeRef::Entity("res.partner".to_string()));
    assert!(answer.is_instance);
    assert_eq!(answer.symbol.expect("class symbol").name, "Partner");
}

#[test]
fn entity_field_access_resolves_across_files() {
    let wheels = r#"class Wheel(Model):
    _name = "bike.wheel"

    price = fields.Float()
"#;
    let bikes = r#"class Bike(Model):
    _name = "bike.bike"

    wheel_id = fields.Many2one("bike.wheel")

    def weight(self):
        return self.wheel_id.price
"#;
    let engine = engine_with(&[("wheels.py", wheels), ("bikes.py", bikes)]);
    // Both files must be analyzed for the merge index to know the wheel.
    engine.ensure_file("wheels.py").expect("wheels analyzed");
    // Hover on `price` in `self.wheel_id.price` (line 7, col 30).
    let answer = engine.resolve_at("bikes.py", 7, 30).expect("answer");
    let symbol = answer.symbol.expect("field symbol");
    assert_eq!(symbol.name, "price");
    assert_eq!(symbol.kind, SymKind::Property);
}

#[test]
fn module_attribute_resolves_through_import() {
    let util = "def helper():\n    return 1\n";
    let main = "import util\n\nh = util.helper\n";
    let engine = engine_with(&[("util.py", util), ("main.py", main)]);
    let answer = engine.resolve_at("main.py", 3, 1).expect("answer");
    let effective = answer.effective.expect("terminal");
    assert_eq!(effective.name, "helper");
    assert_eq!(effective.kind, SymKind::Function);
}

#[test]
fn stop_on_type_answers_the_type_not_the_instance() {
    use loupe_core::graph::SymbolKey;
    use loupe_python::{Context, Resolver};

    let code = r#"class Widget:
    pass

w = Widget()
v = w
"#;
    let engine = engine_with(&[("test.py", code)]);
    let file = engine.ensure_file("test.py").expect("analyzed");
    let v = engine
        .store()
        .with_fragment(file, |frag| {
            frag.symbols
                .values()
                .find(|s| s.name == "v")
                .map(|s| s.symbol_id)
        })
        .flatten()
        .expect("v declared");

    let resolver = Resolver::new(engine.store(), &engine);
    let mut ctx = Context::new().with_stop_on_type(true);
    let res = resolver.follow_symbol(SymbolKey::new(file, v), &mut ctx);
    // The walk stops at the structural type, not the instance of it.
    assert!(!res.is_instance);
    let class = res.symbol.and_then(|k| engine.store().symbol(k)).unwrap();
    assert_eq!(class.name, "Widget");
}

#[test]
fn hover_on_declaration_reports_the_declaration() {
    let code = "def compute_total(x, y=0):\n    return x + y\n";
    let engine = engine_with(&[("test.py", code)]);
    // Hover on the function name itself (line 1, col 5).
    let answer = engine.resolve_at("test.py", 1, 5).expect("answer");
    let symbol = answer.symbol.expect("symbol");
    assert_eq!(symbol.name, "compute_total");
    assert!(symbol.signature.is_some());
}
