// ABOUTME: Runtime error-location mapper inverting source maps for JavaScript stack frames

use crate::error::CompileError;
use crate::sourcemap::SourceMapJson;
use crate::span::Span;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::debug;
use source_map_mappings::{parse_mappings, Bias, Mappings};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One frame of an engine stack trace. Lines are 1-based, columns
/// 0-based; hook installers adapt whatever their engine reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub function_name: Option<String>,
}

/// A resolved HQL-level position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HqlPosition {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

struct LoadedMap {
    mappings: Mappings<()>,
    sources: Vec<String>,
}

/// Frames from these files are engine or compiler internals and are
/// suppressed unless verbose output is requested.
pub const FRAME_DENYLIST: &[&str] = &["node:internal", "internal/", "deno:", "ext:", "<anonymous>"];

pub fn is_denied(file: &str) -> bool {
    FRAME_DENYLIST.iter().any(|prefix| file.starts_with(prefix))
}

/// Source maps loaded on demand, keyed by normalised absolute path.
/// A `None` entry records that a previous load found no map, so the
/// miss is cached too.
#[derive(Default)]
pub struct SourceMapCache {
    maps: Mutex<HashMap<PathBuf, Option<LoadedMap>>>,
}

impl SourceMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop one cached map so the next lookup reloads it.
    pub fn invalidate(&self, path: &Path) {
        let mut maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        maps.remove(&cache_key(path));
    }

    pub fn clear(&self) {
        let mut maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        maps.clear();
    }

    /// Translate a JavaScript position into an HQL position, or `None`
    /// when the file has no recognised map or no segment covers the
    /// position under either bias.
    pub fn lookup(&self, file: &str, line: u32, column: u32) -> Option<HqlPosition> {
        let first = self.resolve_once(Path::new(file), line, column)?;

        // One chained hop: the mapped source may itself carry a map when a
        // later bundler applied another transformation.
        let chained_path = Path::new(file)
            .parent()
            .map(|dir| dir.join(&first.file))
            .unwrap_or_else(|| PathBuf::from(&first.file));
        match self.resolve_once(&chained_path, first.line, first.column) {
            Some(second) => Some(second),
            None => Some(first),
        }
    }

    /// `lookup` with a RuntimeError instead of `None`, for callers that
    /// report mapping failures.
    pub fn position_for(
        &self,
        file: &str,
        line: u32,
        column: u32,
    ) -> Result<HqlPosition, CompileError> {
        self.lookup(file, line, column).ok_or_else(|| {
            CompileError::runtime(
                format!("no mapping for {}:{}:{}", file, line, column + 1),
                Span::point(file, line, column),
            )
        })
    }

    fn resolve_once(&self, path: &Path, line: u32, column: u32) -> Option<HqlPosition> {
        if line == 0 {
            return None;
        }
        let mut maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        let entry = maps
            .entry(cache_key(path))
            .or_insert_with(|| load_map(path));
        let loaded = entry.as_mut()?;

        let (source, src_line, src_col) = bias_lookup(&mut loaded.mappings, line - 1, column)?;
        let file = loaded.sources.get(source as usize)?.clone();
        Some(HqlPosition {
            file,
            line: src_line + 1,
            column: src_col,
        })
    }
}

/// Greatest-lower-bound first; emitter-inserted positions can fall before
/// the first segment, so retry with least-upper-bound.
fn bias_lookup(mappings: &mut Mappings<()>, line0: u32, column: u32) -> Option<(u32, u32, u32)> {
    for bias in [Bias::GreatestLowerBound, Bias::LeastUpperBound] {
        if let Some(mapping) = mappings.original_location_for(line0, column, bias) {
            if let Some(original) = &mapping.original {
                return Some((
                    original.source,
                    original.original_line,
                    original.original_column,
                ));
            }
        }
    }
    None
}

fn cache_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Try the external `.map` sibling first, then scan the file itself for a
/// `sourceMappingURL` marker (inline base64 or a relative file).
fn load_map(js_path: &Path) -> Option<LoadedMap> {
    let sibling = PathBuf::from(format!("{}.map", js_path.display()));
    let json = match fs::read_to_string(&sibling) {
        Ok(text) => text,
        Err(_) => marker_map(js_path)?,
    };
    let doc: SourceMapJson = serde_json::from_str(&json).ok()?;
    let mappings = parse_mappings::<()>(doc.mappings.as_bytes()).ok()?;
    debug!(
        "loaded source map for {} ({} sources)",
        js_path.display(),
        doc.sources.len()
    );
    Some(LoadedMap {
        mappings,
        sources: doc.sources,
    })
}

fn marker_map(js_path: &Path) -> Option<String> {
    let text = fs::read_to_string(js_path).ok()?;
    const MARKER: &str = "sourceMappingURL=";
    let idx = text.rfind(MARKER)?;
    let url = text[idx + MARKER.len()..].lines().next()?.trim();

    if let Some(b64) = url.strip_prefix("data:application/json;base64,") {
        let bytes = BASE64.decode(b64.as_bytes()).ok()?;
        return String::from_utf8(bytes).ok();
    }
    // Relative external reference recorded in the marker
    let relative = js_path.parent().unwrap_or_else(|| Path::new(".")).join(url);
    fs::read_to_string(relative).ok()
}

/// Rewrite a stack: frames that resolve get HQL positions, unresolved
/// frames pass through unchanged, denylisted frames are dropped unless
/// verbose.
pub fn apply_source_map(
    frames: &[StackFrame],
    cache: &SourceMapCache,
    verbose: bool,
) -> Vec<StackFrame> {
    let mut out = Vec::with_capacity(frames.len());
    for frame in frames {
        if !verbose && is_denied(&frame.file) {
            continue;
        }
        match cache.lookup(&frame.file, frame.line, frame.column) {
            Some(pos) => out.push(StackFrame {
                file: pos.file,
                line: pos.line,
                column: pos.column,
                function_name: frame.function_name.clone(),
            }),
            None => out.push(frame.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::MappingsBuilder;
    use std::sync::atomic::{AtomicU32, Ordering};

    static TEST_FILE_SEQ: AtomicU32 = AtomicU32::new(0);

    fn temp_path(name: &str) -> PathBuf {
        let n = TEST_FILE_SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "hql-stack-trace-{}-{}-{}",
            std::process::id(),
            n,
            name
        ))
    }

    fn map_json(source: &str, mappings: &str) -> String {
        serde_json::to_string(&SourceMapJson {
            version: 3,
            file: None,
            sources: vec![source.to_string()],
            sources_content: None,
            names: vec![],
            mappings: mappings.to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_external_map_lookup() {
        let mut builder = MappingsBuilder::new();
        builder.add(2, 6, &Span::point("demo.hql", 5, 3), None);

        let js = temp_path("a.js");
        let map = PathBuf::from(format!("{}.map", js.display()));
        fs::write(&js, "// generated\n").unwrap();
        fs::write(&map, map_json("demo.hql", &builder.encode())).unwrap();

        let cache = SourceMapCache::new();
        let pos = cache
            .lookup(js.to_str().unwrap(), 2, 6)
            .expect("position resolves");
        assert_eq!(pos.file, "demo.hql");
        assert_eq!(pos.line, 5);
        assert_eq!(pos.column, 3);

        fs::remove_file(&js).ok();
        fs::remove_file(&map).ok();
    }

    #[test]
    fn test_glb_bias_with_lub_fallback() {
        let mut builder = MappingsBuilder::new();
        builder.add(1, 10, &Span::point("demo.hql", 2, 0), None);

        let js = temp_path("bias.js");
        let map = PathBuf::from(format!("{}.map", js.display()));
        fs::write(&js, "x\n").unwrap();
        fs::write(&map, map_json("demo.hql", &builder.encode())).unwrap();

        let cache = SourceMapCache::new();
        // Column 20 resolves via the greatest lower bound
        assert!(cache.lookup(js.to_str().unwrap(), 1, 20).is_some());
        // Column 2 precedes every segment; the least-upper-bound retry hits
        let pos = cache.lookup(js.to_str().unwrap(), 1, 2).expect("LUB retry");
        assert_eq!(pos.line, 2);

        fs::remove_file(&js).ok();
        fs::remove_file(&map).ok();
    }

    #[test]
    fn test_inline_data_uri_map() {
        let mut builder = MappingsBuilder::new();
        builder.add(1, 0, &Span::point("inline.hql", 7, 1), None);
        let json = map_json("inline.hql", &builder.encode());

        let js = temp_path("inline.js");
        fs::write(
            &js,
            format!(
                "1;\n//# sourceMappingURL=data:application/json;base64,{}\n",
                BASE64.encode(&json)
            ),
        )
        .unwrap();

        let cache = SourceMapCache::new();
        let pos = cache.lookup(js.to_str().unwrap(), 1, 0).expect("inline map");
        assert_eq!(pos.file, "inline.hql");
        assert_eq!(pos.line, 7);

        fs::remove_file(&js).ok();
    }

    #[test]
    fn test_unmapped_frame_passes_through() {
        let cache = SourceMapCache::new();
        let frames = vec![StackFrame {
            file: "/no/such/file.js".into(),
            line: 3,
            column: 1,
            function_name: Some("f".into()),
        }];
        let out = apply_source_map(&frames, &cache, false);
        assert_eq!(out, frames);
    }

    #[test]
    fn test_denylist_suppression() {
        let cache = SourceMapCache::new();
        let frames = vec![
            StackFrame {
                file: "node:internal/modules".into(),
                line: 1,
                column: 0,
                function_name: None,
            },
            StackFrame {
                file: "/app/user.js".into(),
                line: 1,
                column: 0,
                function_name: None,
            },
        ];
        let filtered = apply_source_map(&frames, &cache, false);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].file, "/app/user.js");

        let verbose = apply_source_map(&frames, &cache, true);
        assert_eq!(verbose.len(), 2);
    }

    #[test]
    fn test_cache_invalidate_reloads() {
        let mut builder = MappingsBuilder::new();
        builder.add(1, 0, &Span::point("one.hql", 1, 0), None);

        let js = temp_path("inv.js");
        let map = PathBuf::from(format!("{}.map", js.display()));
        fs::write(&js, "x\n").unwrap();
        fs::write(&map, map_json("one.hql", &builder.encode())).unwrap();

        let cache = SourceMapCache::new();
        assert_eq!(
            cache.lookup(js.to_str().unwrap(), 1, 0).unwrap().file,
            "one.hql"
        );

        // Rewrite the map; the cached copy answers until invalidated
        let mut builder2 = MappingsBuilder::new();
        builder2.add(1, 0, &Span::point("two.hql", 1, 0), None);
        fs::write(&map, map_json("two.hql", &builder2.encode())).unwrap();
        assert_eq!(
            cache.lookup(js.to_str().unwrap(), 1, 0).unwrap().file,
            "one.hql"
        );
        cache.invalidate(&js);
        assert_eq!(
            cache.lookup(js.to_str().unwrap(), 1, 0).unwrap().file,
            "two.hql"
        );

        fs::remove_file(&js).ok();
        fs::remove_file(&map).ok();
    }

    #[test]
    fn test_chained_map_resolves_one_hop() {
        // bundle.js maps to mid.js, and mid.js maps to origin.hql
        let dir = temp_path("chain-dir");
        fs::create_dir_all(&dir).unwrap();
        let bundle = dir.join("bundle.js");
        let mid = dir.join("mid.js");

        let mut to_mid = MappingsBuilder::new();
        to_mid.add(1, 0, &Span::point("mid.js", 4, 2), None);
        fs::write(&bundle, "x\n").unwrap();
        fs::write(
            PathBuf::from(format!("{}.map", bundle.display())),
            map_json("mid.js", &to_mid.encode()),
        )
        .unwrap();

        let mut to_origin = MappingsBuilder::new();
        to_origin.add(4, 2, &Span::point("origin.hql", 9, 5), None);
        fs::write(&mid, "y\n").unwrap();
        fs::write(
            PathBuf::from(format!("{}.map", mid.display())),
            map_json("origin.hql", &to_origin.encode()),
        )
        .unwrap();

        let cache = SourceMapCache::new();
        let pos = cache
            .lookup(bundle.to_str().unwrap(), 1, 0)
            .expect("chained resolution");
        assert_eq!(pos.file, "origin.hql");
        assert_eq!(pos.line, 9);
        assert_eq!(pos.column, 5);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_position_for_reports_runtime_error() {
        let cache = SourceMapCache::new();
        let err = cache
            .position_for("/no/such/file.js", 1, 0)
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Runtime);
    }
}
