// ABOUTME: Integration tests for source map emission, adjustment, and runtime lookup

use hql::sourcemap::{prepend_lines, MappingsBuilder, SourceMapJson};
use hql::span::Span;
use hql::stack_trace::{apply_source_map, SourceMapCache, StackFrame};
use hql::{compile, CompileOptions, SourceMapMode};
use source_map_mappings::{parse_mappings, Bias};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

static TEST_DIR_SEQ: AtomicU32 = AtomicU32::new(0);

fn temp_dir() -> PathBuf {
    let n = TEST_DIR_SEQ.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("hql-map-test-{}-{}", std::process::id(), n));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn compile_external(source: &str) -> (String, SourceMapJson) {
    let options = CompileOptions {
        source_map: SourceMapMode::External,
        ..CompileOptions::default()
    };
    let out = compile(source, "demo.hql", &options).unwrap();
    let map = serde_json::from_str(out.map.as_deref().unwrap()).unwrap();
    (out.code, map)
}

/// Find the 1-based line and 0-based column of `needle` in generated code.
fn find_position(code: &str, needle: &str) -> (u32, u32) {
    for (i, line) in code.lines().enumerate() {
        if let Some(col) = line.find(needle) {
            return (i as u32 + 1, col as u32);
        }
    }
    panic!("`{}` not found in generated code:\n{}", needle, code);
}

#[test]
fn test_every_mapping_resolves_inside_the_input() {
    let source = "(defn area [w h]\n  (* w h))\n(def total\n  (-> (area 3 4) inc))\n(print total)";
    let (code, map) = compile_external(source);
    let src_lines: Vec<&str> = source.lines().collect();
    let gen_lines = code.lines().count() as u32;

    let mut mappings = parse_mappings::<()>(map.mappings.as_bytes()).unwrap();
    for line0 in 0..gen_lines {
        for col in 0..120 {
            let Some(hit) = mappings.original_location_for(line0, col, Bias::GreatestLowerBound)
            else {
                continue;
            };
            let Some(original) = &hit.original else {
                continue;
            };
            let src_line = original.original_line as usize;
            assert!(src_line < src_lines.len(), "mapping beyond input lines");
            assert!(
                (original.original_column as usize) <= src_lines[src_line].chars().count(),
                "mapping beyond line end"
            );
        }
    }
}

#[test]
fn test_prepend_adjustment_law() {
    let mut builder = MappingsBuilder::new();
    builder.add(1, 2, &Span::point("a.hql", 1, 0), None);
    builder.add(2, 4, &Span::point("a.hql", 3, 1), None);
    let before = builder.encode();
    let after = prepend_lines(&before, 3);

    let mut pre = parse_mappings::<()>(before.as_bytes()).unwrap();
    let mut post = parse_mappings::<()>(after.as_bytes()).unwrap();

    // Every mapping at line L before exists at L + 3 after
    for (line0, col) in [(0u32, 2u32), (1, 4)] {
        let a = pre
            .original_location_for(line0, col, Bias::GreatestLowerBound)
            .and_then(|m| m.original.as_ref())
            .map(|o| (o.source, o.original_line, o.original_column));
        let b = post
            .original_location_for(line0 + 3, col, Bias::GreatestLowerBound)
            .and_then(|m| m.original.as_ref())
            .map(|o| (o.source, o.original_line, o.original_column));
        assert!(a.is_some());
        assert_eq!(a, b);
    }
    // Nothing survives on the prepended lines
    for line0 in 0..3 {
        assert!(post
            .original_location_for(line0, 200, Bias::GreatestLowerBound)
            .is_none());
    }
}

#[test]
fn test_runtime_error_position_maps_to_hql() {
    // Scenario: (x.nope) throws at runtime; the frame maps back to the
    // call's span in the HQL source
    let source = "(let (x 10) (x.nope))";
    let (code, map) = compile_external(source);

    let dir = temp_dir();
    let js = dir.join("app.js");
    fs::write(&js, &code).unwrap();
    fs::write(dir.join("app.js.map"), serde_json::to_string(&map).unwrap()).unwrap();

    let (line, col) = find_position(&code, "nope");
    let cache = SourceMapCache::new();
    let pos = cache
        .lookup(js.to_str().unwrap(), line, col)
        .expect("frame resolves");
    assert_eq!(pos.file, "demo.hql");
    assert_eq!(pos.line, 1);
    // The span of x.nope starts at column 13; the method name sits at 15
    assert!((13..=15).contains(&pos.column), "column was {}", pos.column);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_inline_map_supports_runtime_lookup() {
    let source = "(def answer (+ 40 two))";
    let out = compile(source, "demo.hql", &CompileOptions::default()).unwrap();
    assert!(out.map.is_none());

    let dir = temp_dir();
    let js = dir.join("inline.js");
    fs::write(&js, &out.code).unwrap();

    let (line, col) = find_position(&out.code, "answer");
    let cache = SourceMapCache::new();
    let pos = cache
        .lookup(js.to_str().unwrap(), line, col)
        .expect("inline map resolves");
    assert_eq!(pos.file, "demo.hql");
    assert_eq!(pos.line, 1);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_stack_rewriting_mixes_mapped_and_unmapped_frames() {
    let (code, map) = compile_external("(defn boom [] (missing))\n(boom)");
    let dir = temp_dir();
    let js = dir.join("app.js");
    fs::write(&js, &code).unwrap();
    fs::write(dir.join("app.js.map"), serde_json::to_string(&map).unwrap()).unwrap();

    let (line, col) = find_position(&code, "missing");
    let frames = vec![
        StackFrame {
            file: js.to_str().unwrap().to_string(),
            line,
            column: col,
            function_name: Some("boom".into()),
        },
        StackFrame {
            file: "node:internal/process".into(),
            line: 10,
            column: 0,
            function_name: None,
        },
        StackFrame {
            file: "/elsewhere/plain.js".into(),
            line: 7,
            column: 3,
            function_name: Some("main".into()),
        },
    ];

    let rewritten = apply_source_map(&frames, &cache_for(), false);
    assert_eq!(rewritten.len(), 2);
    assert_eq!(rewritten[0].file, "demo.hql");
    assert_eq!(rewritten[0].line, 1);
    assert_eq!(rewritten[0].function_name.as_deref(), Some("boom"));
    // Unmapped frames pass through unchanged
    assert_eq!(rewritten[1].file, "/elsewhere/plain.js");
    assert_eq!(rewritten[1].line, 7);

    fs::remove_dir_all(&dir).ok();
}

fn cache_for() -> SourceMapCache {
    SourceMapCache::new()
}

#[test]
fn test_sources_content_lets_consumers_render_snippets() {
    let source = "(defn f [x]\n  (inc x))";
    let (_, map) = compile_external(source);
    assert_eq!(map.sources, vec!["demo.hql"]);
    assert_eq!(map.sources_content.unwrap()[0], source);
    assert_eq!(map.version, 3);
}

#[test]
fn test_identifier_names_recorded() {
    let (_, map) = compile_external("(defn add-two [n] (+ n 2))");
    assert!(map.names.contains(&"add_two".to_string()));
    assert!(map.names.contains(&"n".to_string()));
}
