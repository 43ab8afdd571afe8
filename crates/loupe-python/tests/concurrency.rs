//! Concurrent access smoke tests: parallel queries against rebuilds, and
//! cancellation of an in-flight query.

use std::sync::Arc;
use std::thread;

use loupe_python::{CancelToken, Engine};

#[test]
fn parallel_queries_share_one_engine() {
    let engine = Arc::new(Engine::new());
    engine.add_file("lib.py", "class Handler:\n    pass\n");
    for i in 0..8 {
        engine.add_file(
            &format!("m{}.py", i),
            "from lib import Handler\n\nh = Handler()\n",
        );
    }

    thread::scope(|s| {
        for i in 0..8 {
            let engine = Arc::clone(&engine);
            s.spawn(move || {
                let path = format!("m{}.py", i);
                let answer = engine.resolve_at(&path, 3, 1).expect("answer");
                assert_eq!(answer.effective.expect("terminal").name, "Handler");
            });
        }
    });
}

#[test]
fn queries_interleave_with_rebuilds_of_other_files() {
    let engine = Arc::new(Engine::new());
    engine.add_file("lib.py", "class Handler:\n    pass\n");
    engine.add_file("main.py", "from lib import Handler\n\nh = Handler()\n");
    engine.add_file("other.py", "x = 1\n");
    engine.ensure_file("other.py").unwrap();

    thread::scope(|s| {
        {
            let engine = Arc::clone(&engine);
            s.spawn(move || {
                for round in 0..20 {
                    engine.update_file("other.py", format!("x = {}\n", round));
                }
            });
        }
        for _ in 0..4 {
            let engine = Arc::clone(&engine);
            s.spawn(move || {
                for _ in 0..20 {
                    let answer = engine.resolve_at("main.py", 3, 1).expect("answer");
                    assert_eq!(answer.effective.expect("terminal").name, "Handler");
                }
            });
        }
    });
}

#[test]
fn cancelled_query_still_returns_a_degraded_answer() {
    let engine = Engine::new();
    engine.add_file("test.py", "a = b\nb = a\n");
    let token = CancelToken::new();
    token.cancel();
    // A pre-cancelled query must come back promptly and never panic.
    let answer = engine.resolve_at_with("test.py", 1, 1, Some(token));
    assert!(answer.is_some());
}
